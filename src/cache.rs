//! Per-developer snapshot cache with read-triggered refresh.

use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::metrics::{self, Metrics, MetricsRequest};
use crate::source::Source;
use crate::storage::{repository, Database};

/// Snapshots at least this old are recomputed on the next read.
pub const STALE_AFTER_SECS: i64 = 60 * 60;

/// A snapshot is stale once it is an hour old, or when it was computed for
/// a different repository than the one now requested.
pub fn is_stale(cached: &Metrics, repository: &str, now: DateTime<Utc>) -> bool {
    cached.repository != repository
        || now - cached.last_modified >= Duration::seconds(STALE_AFTER_SECS)
}

/// Serve the cached snapshot for `username`, or recompute it over the
/// seven days ending at `now` and replace the cached row. The cache is keyed
/// by username alone, so a row computed for another repository is treated
/// as stale however recent it is (see [`is_stale`]).
///
/// Generation failures are returned without touching the cache, so the last
/// good snapshot stays servable. Two concurrent refreshes for one user both
/// recompute and the later write wins.
pub async fn get_or_refresh(
    db: &Database,
    source: &dyn Source,
    username: &str,
    repository: &str,
    now: DateTime<Utc>,
) -> Result<Metrics> {
    let request = MetricsRequest::new(username, repository, None, None, now)?;

    let key = request.username.clone();
    let cached = db
        .reader()
        .call(move |conn| repository::get_cached_metrics(conn, &key))
        .await?;

    if let Some(cached) = cached {
        if !is_stale(&cached, &request.repository, now) {
            log::debug!("Cache hit for {}", request.username);
            return Ok(cached);
        }
        log::info!(
            "Cached metrics for {} computed at {} are stale, refreshing",
            request.username,
            cached.last_modified
        );
    }

    let fresh = metrics::generate(source, &request, now).await?;

    let row = fresh.clone();
    db.writer()
        .call(move |conn| repository::upsert_cached_metrics(conn, &row))
        .await?;
    Ok(fresh)
}
