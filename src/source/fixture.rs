//! In-memory [`Source`] for tests, with per-method call counters and
//! injectable failures.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::stream::{self, StreamExt};

use crate::error::{Error, Result};
use crate::source::{
    Commit, CommitFilter, EntryKind, Issue, IssueState, Listing, Order, PullFilter, PullRequest,
    Repository, Source, SourceFactory, StateFilter, TreeEntry,
};

pub fn ts(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

pub fn issue(number: u64, created_at: DateTime<Utc>, closed_at: Option<DateTime<Utc>>) -> Issue {
    Issue {
        number,
        state: if closed_at.is_some() {
            IssueState::Closed
        } else {
            IssueState::Open
        },
        created_at,
        closed_at,
    }
}

pub fn pull(number: u64, created_at: DateTime<Utc>, merged_at: Option<DateTime<Utc>>) -> PullRequest {
    PullRequest {
        number,
        created_at,
        merged_at,
        merged: merged_at.is_some(),
    }
}

pub fn file(path: &str, size: u64) -> TreeEntry {
    TreeEntry {
        kind: EntryKind::File,
        path: path.to_string(),
        size,
    }
}

pub fn dir(path: &str) -> TreeEntry {
    TreeEntry {
        kind: EntryKind::Dir,
        path: path.to_string(),
        size: 0,
    }
}

#[derive(Debug, Clone)]
pub struct FixtureCommit {
    pub commit: Commit,
    pub paths: Vec<String>,
}

pub fn commit(sha: &str, author: Option<&str>, date: DateTime<Utc>, paths: &[&str]) -> FixtureCommit {
    FixtureCommit {
        commit: Commit {
            sha: sha.to_string(),
            author_login: author.map(str::to_string),
            date,
        },
        paths: paths.iter().map(|p| p.to_string()).collect(),
    }
}

#[derive(Default)]
pub struct FixtureSource {
    pub default_branch: String,
    pub commits: Vec<FixtureCommit>,
    pub issues: Vec<Issue>,
    /// Overrides the all-time issue count; defaults to `issues.len()`.
    pub issue_total: Option<u64>,
    pub pulls: Vec<PullRequest>,
    pub pull_total: Option<u64>,
    pub tree: HashMap<String, Vec<TreeEntry>>,
    pub order: Option<Order>,
    /// Method names that fail with `SourceUnavailable`.
    pub failing: Vec<&'static str>,
    /// Repositories (`name` or `owner/name`) that resolve to `NotFound`.
    pub missing: Vec<String>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl FixtureSource {
    pub fn new() -> Self {
        Self {
            default_branch: "main".into(),
            ..Default::default()
        }
    }

    pub fn calls(&self, method: &str) -> usize {
        self.calls.lock().unwrap().get(method).copied().unwrap_or(0)
    }

    fn record(&self, method: &'static str) -> Result<()> {
        *self.calls.lock().unwrap().entry(method).or_insert(0) += 1;
        if self.failing.contains(&method) {
            return Err(Error::SourceUnavailable(format!("{method} failed")));
        }
        Ok(())
    }

    fn listing<'a, T: Clone + Send + 'a>(&'a self, method: &'static str, items: Vec<T>) -> Listing<'a, T> {
        let items = match self.record(method) {
            Ok(()) => stream::iter(items.into_iter().map(Ok)).boxed(),
            Err(e) => stream::iter(vec![Err(e)]).boxed(),
        };
        Listing {
            items,
            order: self.order.unwrap_or(Order::Unordered),
        }
    }
}

#[async_trait]
impl Source for FixtureSource {
    async fn repository(&self, owner: &str, name: &str) -> Result<Repository> {
        self.record("repository")?;
        let full_name = format!("{owner}/{name}");
        if self.missing.iter().any(|m| m == name || *m == full_name) {
            return Err(Error::NotFound(format!("{owner}/{name}")));
        }
        Ok(Repository {
            owner: owner.to_string(),
            name: name.to_string(),
            default_branch: self.default_branch.clone(),
        })
    }

    fn commits<'a>(&'a self, _repo: &'a Repository, filter: CommitFilter) -> Listing<'a, Commit> {
        let matching: Vec<Commit> = self
            .commits
            .iter()
            .filter(|c| {
                filter
                    .path
                    .as_ref()
                    .map_or(true, |p| c.paths.iter().any(|cp| cp == p))
            })
            .filter(|c| filter.since.map_or(true, |s| c.commit.date >= s))
            .filter(|c| filter.until.map_or(true, |u| c.commit.date <= u))
            .map(|c| c.commit.clone())
            .collect();
        let method = if filter.path.is_some() { "commits_by_path" } else { "commits" };
        self.listing(method, matching)
    }

    fn issues<'a>(&'a self, _repo: &'a Repository, state: StateFilter) -> Listing<'a, Issue> {
        let matching: Vec<Issue> = self
            .issues
            .iter()
            .filter(|i| match state {
                StateFilter::All => true,
                StateFilter::Open => i.state == IssueState::Open,
                StateFilter::Closed => i.state == IssueState::Closed,
            })
            .cloned()
            .collect();
        self.listing("issues", matching)
    }

    async fn issue_count(&self, _repo: &Repository, _state: StateFilter) -> Result<u64> {
        self.record("issue_count")?;
        Ok(self.issue_total.unwrap_or(self.issues.len() as u64))
    }

    fn pulls<'a>(&'a self, _repo: &'a Repository, _filter: PullFilter) -> Listing<'a, PullRequest> {
        self.listing("pulls", self.pulls.clone())
    }

    async fn pull_count(&self, _repo: &Repository, _filter: &PullFilter) -> Result<u64> {
        self.record("pull_count")?;
        Ok(self.pull_total.unwrap_or(self.pulls.len() as u64))
    }

    async fn tree(&self, _repo: &Repository, path: &str) -> Result<Vec<TreeEntry>> {
        self.record("tree")?;
        Ok(self.tree.get(path).cloned().unwrap_or_default())
    }
}

/// Hands out the same shared fixture regardless of token.
pub struct FixtureFactory(pub Arc<FixtureSource>);

impl SourceFactory for FixtureFactory {
    fn connect(&self, _token: Option<&str>) -> Result<Arc<dyn Source>> {
        Ok(self.0.clone())
    }
}
