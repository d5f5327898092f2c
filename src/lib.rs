pub mod api;
pub mod cache;
pub mod collect;
pub mod config;
pub mod error;
pub mod history;
pub mod metrics;
pub mod report;
pub mod source;
pub mod storage;
pub mod window;

pub use collect::schedule::WeeklySchedule;
pub use collect::{CollectProgress, LogProgress, NoopProgress, RunReport, RunStatus};
pub use config::Config;
pub use error::{Error, Result};
pub use metrics::{Counters, Durations, Metrics, MetricsRecord, MetricsRequest};
pub use source::{GitHubClient, GitHubFactory, Source, SourceFactory};
pub use storage::Database;
pub use window::Window;

// Re-export repository types needed by the binary crate, but not the module itself
pub use storage::repository::ScheduledRun;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use storage::repository;

/// Row counts per table plus the most recent scheduled run.
#[derive(Debug, Clone)]
pub struct Status {
    pub tables: Vec<(&'static str, i64)>,
    pub last_run: Option<ScheduledRun>,
}

/// Response shape shared by the HTTP API and the CLI's JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct DeveloperMetrics {
    pub developer: String,
    pub metrics: Metrics,
}

/// Main entry point for the productivity metrics engine.
pub struct DevPulse {
    db: Database,
    sources: Arc<dyn SourceFactory>,
}

impl DevPulse {
    pub fn new(db: Database, sources: Arc<dyn SourceFactory>) -> Self {
        Self { db, sources }
    }

    /// Access the database (for direct queries in the CLI).
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Metrics for the last seven days, served from the snapshot cache while
    /// it is less than an hour old.
    pub async fn metrics(
        &self,
        username: &str,
        repository: &str,
        token: Option<&str>,
    ) -> Result<Metrics> {
        let source = self.sources.connect(token)?;
        cache::get_or_refresh(&self.db, source.as_ref(), username, repository, Utc::now()).await
    }

    /// Compute metrics for an explicit window, bypassing the cache.
    pub async fn generate(
        &self,
        username: &str,
        repository: &str,
        token: Option<&str>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> MetricsRecord {
        let now = Utc::now();
        let request = MetricsRequest::new(username, repository, start, end, now)?;
        let source = self.sources.connect(token)?;
        metrics::generate(source.as_ref(), &request, now).await
    }

    pub async fn history(
        &self,
        repository: &str,
        usernames: Option<&[String]>,
    ) -> Result<Vec<Metrics>> {
        history::query(&self.db, repository, usernames).await
    }

    /// PDF report over the stored snapshots for `repository`.
    pub async fn report(&self, repository: &str, usernames: Option<&[String]>) -> Result<Vec<u8>> {
        let repository = repository.trim();
        if repository.is_empty() {
            return Err(Error::Validation("repository is required".into()));
        }
        let rows = self.history(repository, usernames).await?;
        Ok(report::render_report(repository, &rows))
    }

    /// Run one scheduled collection now. Never fails; problems are in the report.
    pub async fn collect(
        &self,
        usernames: &[String],
        repository: &str,
        token: Option<&str>,
        progress: &dyn CollectProgress,
    ) -> RunReport {
        match self.sources.connect(token) {
            Ok(source) => {
                collect::run_collection(
                    &self.db,
                    source.as_ref(),
                    usernames,
                    repository,
                    Utc::now(),
                    progress,
                )
                .await
            }
            Err(e) => {
                log::error!("Cannot reach source for collection: {e}");
                RunReport::from_counts(repository.to_string(), usernames.len(), 0, 0, Some(e.to_string()))
            }
        }
    }

    pub async fn status(&self) -> Result<Status> {
        let (tables, last_run) = self
            .db
            .reader()
            .call(|conn| {
                let tables = repository::table_counts(conn)?;
                let last_run = repository::latest_run(conn)?;
                Ok::<_, rusqlite::Error>((tables, last_run))
            })
            .await?;
        Ok(Status { tables, last_run })
    }
}
