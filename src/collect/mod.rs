pub mod schedule;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Error;
use crate::history;
use crate::metrics::{self, Metrics, MetricsRequest};
use crate::source::Source;
use crate::storage::{repository, Database};

/// Callbacks for a collection run. Every method defaults to doing nothing.
pub trait CollectProgress: Send + Sync {
    fn on_user_start(&self, _username: &str, _index: usize, _total: usize) {}
    fn on_user_complete(&self, _metrics: &Metrics) {}
    fn on_user_failed(&self, _username: &str, _error: &Error) {}
    fn on_batch_stored(&self, _count: usize) {}
}

/// Reports nothing.
pub struct NoopProgress;

impl CollectProgress for NoopProgress {}

/// Forwards progress to the `log` facade.
pub struct LogProgress;

impl CollectProgress for LogProgress {
    fn on_user_start(&self, username: &str, index: usize, total: usize) {
        log::info!("[{}/{}] Collecting metrics for {username}", index + 1, total);
    }

    fn on_user_complete(&self, metrics: &Metrics) {
        log::info!(
            "Collected {} commit(s) for {}",
            metrics.counters.commits,
            metrics.username
        );
    }

    fn on_user_failed(&self, username: &str, error: &Error) {
        log::warn!("Skipping {username}: {error}");
    }

    fn on_batch_stored(&self, count: usize) {
        log::info!("Stored {count} snapshot(s)");
    }
}

/// Outcome of one collection run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub repository: String,
    pub status: RunStatus,
    pub users_total: usize,
    pub users_succeeded: usize,
    pub users_failed: usize,
    pub records_stored: usize,
    pub error: Option<String>,
}

impl RunReport {
    /// Create a RunReport with the status derived from counts. A storage
    /// `error` fails the run regardless of how many users succeeded.
    pub fn from_counts(
        repository: String,
        users_total: usize,
        users_succeeded: usize,
        records_stored: usize,
        error: Option<String>,
    ) -> Self {
        let users_failed = users_total.saturating_sub(users_succeeded);
        let status = if error.is_some() {
            RunStatus::Failed
        } else if users_failed == 0 {
            RunStatus::Success
        } else if users_succeeded > 0 {
            RunStatus::PartialFailure
        } else {
            RunStatus::Failed
        };
        let error = error.or_else(|| {
            (users_failed > 0).then(|| format!("{users_failed} of {users_total} users failed"))
        });
        Self {
            repository,
            status,
            users_total,
            users_succeeded,
            users_failed,
            records_stored,
            error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Success,
    PartialFailure,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::PartialFailure => "partial_failure",
            RunStatus::Failed => "failed",
        }
    }
}

/// One scheduled run: a seven-day snapshot ending at `now` for each user in
/// turn, appended to the history as a single batch.
///
/// Users whose generation fails are logged and left out of the batch.
/// Nothing here returns an error; storage failures end up in the report.
pub async fn run_collection(
    db: &Database,
    source: &dyn Source,
    usernames: &[String],
    repository: &str,
    now: DateTime<Utc>,
    progress: &dyn CollectProgress,
) -> RunReport {
    let repo_name = repository.to_string();
    let users_total = usernames.len();
    let run_id = match db
        .writer()
        .call(move |conn| repository::insert_run(conn, &repo_name, now, users_total))
        .await
    {
        Ok(id) => id,
        Err(e) => {
            let e = Error::from(e);
            log::error!("Could not record collection run, skipping: {e}");
            return RunReport::from_counts(repository.to_string(), users_total, 0, 0, Some(e.to_string()));
        }
    };

    let mut batch = Vec::with_capacity(users_total);
    for (index, username) in usernames.iter().enumerate() {
        progress.on_user_start(username, index, users_total);
        let record = match MetricsRequest::new(username, repository, None, None, now) {
            Ok(request) => metrics::generate(source, &request, now).await,
            Err(e) => Err(e),
        };
        match record {
            Ok(m) => {
                progress.on_user_complete(&m);
                batch.push(m);
            }
            Err(e) => progress.on_user_failed(username, &e),
        }
    }

    let users_succeeded = batch.len();
    let (records_stored, error) = match history::append_batch(db, &batch).await {
        Ok(n) => {
            progress.on_batch_stored(n);
            (n, None)
        }
        Err(e) => {
            log::error!("Storing {} snapshot(s) failed: {e}", batch.len());
            (0, Some(e.to_string()))
        }
    };

    let report = RunReport::from_counts(
        repository.to_string(),
        users_total,
        users_succeeded,
        records_stored,
        error,
    );
    finish_run(db, run_id, &report, Utc::now()).await;
    report
}

async fn finish_run(db: &Database, run_id: i64, report: &RunReport, completed_at: DateTime<Utc>) {
    let report = report.clone();
    let result = db
        .writer()
        .call(move |conn| {
            repository::complete_run(
                conn,
                run_id,
                report.status.as_str(),
                completed_at,
                report.users_succeeded,
                report.users_failed,
                report.records_stored,
                report.error.as_deref(),
            )
        })
        .await;
    if let Err(e) = result {
        log::error!("Could not record completion of run {run_id}: {e}");
    }
}
