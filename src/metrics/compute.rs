//! Metric computers: each consumes one listing plus a window and yields a scalar.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use futures::stream::{Stream, StreamExt, TryStreamExt};

use crate::error::Result;
use crate::metrics::filter::{created_since, in_window};
use crate::metrics::types::StateCounts;
use crate::source::{
    Commit, CommitFilter, EntryKind, Issue, IssueState, Listing, PullRequest, Repository, Source,
};
use crate::window::Window;

const SECONDS_PER_DAY: i64 = 86_400;
const SECONDS_PER_MINUTE: i64 = 60;

/// Remote filter for commits by `username` that may fall inside `window`.
///
/// GitHub applies `since`/`until` to the committer date while the window is
/// tested against the author date. Only the lower bound goes to the server,
/// since a commit is never committed before it is authored; the upper bound
/// is left to [`in_window`].
pub fn window_commit_filter(username: &str, path: Option<&str>, window: &Window) -> CommitFilter {
    CommitFilter {
        author: Some(username.to_string()),
        path: path.map(str::to_string),
        since: Some(window.start),
        until: None,
    }
}

fn authored_by(commit: &Commit, username: &str) -> bool {
    commit.author_login.as_deref() == Some(username)
}

/// Commits authored by `username` with a timestamp inside the window.
/// Commits without an author account never match.
pub async fn commit_count(commits: Listing<'_, Commit>, username: &str, window: &Window) -> Result<u64> {
    let mut matching = in_window(commits, *window, |c: &Commit| c.date);
    let mut count = 0;
    while let Some(commit) = matching.try_next().await? {
        if authored_by(&commit, username) {
            count += 1;
        }
    }
    Ok(count)
}

/// Closed issues created inside the window; open is the all-time `total` minus that.
pub async fn issue_counts(issues: Listing<'_, Issue>, total: u64, window: &Window) -> Result<StateCounts> {
    let closed = in_window(issues, *window, |i: &Issue| i.created_at)
        .try_filter(|i| futures::future::ready(i.state == IssueState::Closed))
        .try_fold(0u64, |n, _| futures::future::ready(Ok(n + 1)))
        .await?;
    Ok(StateCounts::from_total(total, closed))
}

/// Merged pull requests created inside the window; open is `total` minus that.
pub async fn pull_counts(pulls: Listing<'_, PullRequest>, total: u64, window: &Window) -> Result<StateCounts> {
    let merged = in_window(pulls, *window, |p: &PullRequest| p.created_at)
        .try_filter(|p| futures::future::ready(p.merged))
        .try_fold(0u64, |n, _| futures::future::ready(Ok(n + 1)))
        .await?;
    Ok(StateCounts::from_total(total, merged))
}

/// Average whole days from creation to close, over issues created at or
/// after `window.start` and closed by `window.end`.
pub async fn issue_cycle_time_days(issues: Listing<'_, Issue>, window: &Window) -> Result<f64> {
    if window.is_empty() {
        return Ok(0.0);
    }
    let end = window.end;
    let spans = created_since(
        issues,
        window.start,
        |i: &Issue| i.created_at,
        move |i: &Issue| i.closed_at.is_some_and(|closed| closed <= end),
    )
    .map_ok(|i| elapsed(i.created_at, i.closed_at));
    average_whole_units(spans, SECONDS_PER_DAY).await
}

/// Average whole minutes from creation to merge, over pull requests created
/// at or after `window.start` and merged by `window.end`.
pub async fn code_review_time_minutes(pulls: Listing<'_, PullRequest>, window: &Window) -> Result<f64> {
    if window.is_empty() {
        return Ok(0.0);
    }
    let end = window.end;
    let spans = created_since(
        pulls,
        window.start,
        |p: &PullRequest| p.created_at,
        move |p: &PullRequest| p.merged_at.is_some_and(|merged| merged <= end),
    )
    .map_ok(|p| elapsed(p.created_at, p.merged_at));
    average_whole_units(spans, SECONDS_PER_MINUTE).await
}

/// Coarse size proxy: the byte size of every file in the repository tree
/// that `username` touched with at least one commit inside the window.
/// Each file counts once, at its full current size, regardless of how many
/// commits touched it or how much they changed.
pub async fn lines_of_code(
    source: &dyn Source,
    repo: &Repository,
    username: &str,
    window: &Window,
) -> Result<u64> {
    if window.is_empty() {
        return Ok(0);
    }
    let mut pending = VecDeque::from([String::new()]);
    let mut total = 0;
    while let Some(dir) = pending.pop_front() {
        for entry in source.tree(repo, &dir).await? {
            match entry.kind {
                EntryKind::Dir => pending.push_back(entry.path),
                EntryKind::File => {
                    if touched_in_window(source, repo, &entry.path, username, window).await? {
                        total += entry.size;
                    }
                }
                EntryKind::Other => {}
            }
        }
    }
    Ok(total)
}

async fn touched_in_window(
    source: &dyn Source,
    repo: &Repository,
    path: &str,
    username: &str,
    window: &Window,
) -> Result<bool> {
    let filter = window_commit_filter(username, Some(path), window);
    let mut commits = in_window(source.commits(repo, filter), *window, |c: &Commit| c.date);
    while let Some(commit) = commits.try_next().await? {
        if authored_by(&commit, username) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn elapsed(from: DateTime<Utc>, to: Option<DateTime<Utc>>) -> Duration {
    to.map(|to| to - from).unwrap_or_else(Duration::zero)
}

/// Mean of the spans floored to whole `unit_seconds`. Negative spans
/// (clock skew in the source) count as zero.
async fn average_whole_units<S>(spans: S, unit_seconds: i64) -> Result<f64>
where
    S: Stream<Item = Result<Duration>>,
{
    let (sum, count) = spans
        .try_fold((0i64, 0u64), |(sum, count), span| {
            let units = span.num_seconds().max(0).div_euclid(unit_seconds);
            futures::future::ready(Ok((sum + units, count + 1)))
        })
        .await?;
    if count == 0 {
        return Ok(0.0);
    }
    Ok(sum as f64 / count as f64)
}
