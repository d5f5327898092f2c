pub mod compute;
pub mod filter;
pub mod types;

pub use types::*;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::source::{split_repository, PullFilter, Source, StateFilter};
use crate::window::Window;

/// What to compute: one developer, one repository, one window.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsRequest {
    pub username: String,
    pub repository: String,
    pub window: Window,
}

impl MetricsRequest {
    /// Validate identifiers and resolve the window defaults against `now`.
    pub fn new(
        username: &str,
        repository: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let username = username.trim();
        let repository = repository.trim();
        if username.is_empty() || repository.is_empty() {
            return Err(Error::Validation(
                "both username and repository are required".into(),
            ));
        }
        Ok(Self {
            username: username.to_string(),
            repository: repository.to_string(),
            window: Window::resolve(start, end, now)?,
        })
    }
}

/// Compute one metrics record.
///
/// The repository is resolved once and every computer reuses the handle.
/// Any failing computation aborts the whole record: the result is either
/// complete metrics or the error that stopped them. `computed_at` becomes
/// the record's `last_modified`.
pub async fn generate(
    source: &dyn Source,
    request: &MetricsRequest,
    computed_at: DateTime<Utc>,
) -> MetricsRecord {
    let result = compute_all(source, request, computed_at).await;
    if let Err(e) = &result {
        log::error!(
            "Metrics for {} on {} failed: {e}",
            request.username,
            request.repository
        );
    }
    result
}

async fn compute_all(
    source: &dyn Source,
    request: &MetricsRequest,
    computed_at: DateTime<Utc>,
) -> Result<Metrics> {
    let username = request.username.as_str();
    let window = request.window;
    let (owner, name) = split_repository(&request.repository, username)?;

    log::info!("Resolving repository {owner}/{name}");
    let repo = source.repository(&owner, &name).await?;

    log::info!(
        "Collecting metrics for {username} on {} ({} .. {})",
        repo.full_name(),
        window.start,
        window.end
    );
    let issue_total = source.issue_count(&repo, StateFilter::All).await?;
    let issues =
        compute::issue_counts(source.issues(&repo, StateFilter::All), issue_total, &window).await?;

    let pull_filter = PullFilter {
        state: StateFilter::All,
        base: Some(repo.default_branch.clone()),
    };
    let pull_total = source.pull_count(&repo, &pull_filter).await?;
    let pulls =
        compute::pull_counts(source.pulls(&repo, pull_filter.clone()), pull_total, &window).await?;

    let issue_cycle_time_days =
        compute::issue_cycle_time_days(source.issues(&repo, StateFilter::All), &window).await?;
    let code_review_time_minutes =
        compute::code_review_time_minutes(source.pulls(&repo, pull_filter), &window).await?;

    let commit_filter = compute::window_commit_filter(username, None, &window);
    let commits =
        compute::commit_count(source.commits(&repo, commit_filter), username, &window).await?;
    let lines_of_code = compute::lines_of_code(source, &repo, username, &window).await?;

    Ok(Metrics {
        username: username.to_string(),
        repository: request.repository.clone(),
        window,
        counters: Counters {
            closed_issues: issues.closed,
            open_issues: issues.open,
            merged_prs: pulls.closed,
            open_prs: pulls.open,
            commits,
            lines_of_code,
        },
        durations: Durations {
            issue_cycle_time_days,
            code_review_time_minutes,
        },
        last_modified: computed_at,
    })
}
