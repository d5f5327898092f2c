pub mod github;
pub mod retry;

#[cfg(test)]
pub(crate) mod fixture;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::error::{Error, Result};

pub use github::{GitHubClient, GitHubFactory};
pub use retry::RetryPolicy;

/// A resolved repository handle. Every per-metric call reuses the same handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub owner: String,
    pub name: String,
    pub default_branch: String,
}

impl Repository {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub sha: String,
    /// `None` for commits whose author has no account (bots, unlinked emails).
    pub author_login: Option<String>,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueState {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub number: u64,
    pub state: IssueState,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PullRequest {
    pub number: u64,
    pub created_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    pub merged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeEntry {
    pub kind: EntryKind,
    pub path: String,
    pub size: u64,
}

/// State filter accepted by issue and pull listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateFilter {
    Open,
    Closed,
    All,
}

impl StateFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateFilter::Open => "open",
            StateFilter::Closed => "closed",
            StateFilter::All => "all",
        }
    }
}

/// Server-side narrowing for commit listings. Filters are hints: callers
/// still test every returned commit themselves.
#[derive(Debug, Clone, Default)]
pub struct CommitFilter {
    pub author: Option<String>,
    pub path: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct PullFilter {
    pub state: StateFilter,
    pub base: Option<String>,
}

/// Ordering guarantee a listing makes about its items' creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Unordered,
    NewestFirst,
}

/// A lazy, paginated listing. Pages are fetched only as the stream is polled,
/// and calling the listing method again restarts from the first page.
pub struct Listing<'a, T> {
    pub items: BoxStream<'a, Result<T>>,
    pub order: Order,
}

/// The remote hosting provider, seen as a set of paginated collections.
#[async_trait]
pub trait Source: Send + Sync {
    async fn repository(&self, owner: &str, name: &str) -> Result<Repository>;

    fn commits<'a>(&'a self, repo: &'a Repository, filter: CommitFilter) -> Listing<'a, Commit>;

    fn issues<'a>(&'a self, repo: &'a Repository, state: StateFilter) -> Listing<'a, Issue>;

    /// All-time number of issues matching `state`.
    async fn issue_count(&self, repo: &Repository, state: StateFilter) -> Result<u64>;

    fn pulls<'a>(&'a self, repo: &'a Repository, filter: PullFilter) -> Listing<'a, PullRequest>;

    /// All-time number of pull requests matching `filter`.
    async fn pull_count(&self, repo: &Repository, filter: &PullFilter) -> Result<u64>;

    /// Direct children of the directory at `path` (`""` is the root).
    async fn tree(&self, repo: &Repository, path: &str) -> Result<Vec<TreeEntry>>;
}

/// Builds a [`Source`] for an optional access token.
pub trait SourceFactory: Send + Sync {
    fn connect(&self, token: Option<&str>) -> Result<Arc<dyn Source>>;
}

/// Split a repository identifier into `(owner, name)`.
///
/// `owner/name` is taken as-is; a bare `name` is looked up under `default_owner`.
pub fn split_repository(repository: &str, default_owner: &str) -> Result<(String, String)> {
    let repository = repository.trim();
    let (owner, name) = match repository.split_once('/') {
        Some((owner, name)) => (owner.trim(), name.trim()),
        None => (default_owner.trim(), repository),
    };
    if owner.is_empty() || name.is_empty() || name.contains('/') {
        return Err(Error::Validation(format!(
            "invalid repository identifier: {repository}"
        )));
    }
    Ok((owner.to_string(), name.to_string()))
}
