//! Append-only store of weekly snapshots.

use crate::error::Result;
use crate::metrics::Metrics;
use crate::storage::{repository, Database};

/// Insert one snapshot. Never replaces an existing row.
pub async fn append(db: &Database, metrics: &Metrics) -> Result<()> {
    let row = metrics.clone();
    db.writer()
        .call(move |conn| repository::insert_historical(conn, &row))
        .await?;
    Ok(())
}

/// Insert a whole run's snapshots in one transaction.
pub async fn append_batch(db: &Database, batch: &[Metrics]) -> Result<usize> {
    if batch.is_empty() {
        return Ok(0);
    }
    let rows = batch.to_vec();
    let stored = db
        .writer()
        .call(move |conn| repository::insert_historical_batch(conn, &rows))
        .await?;
    log::info!("Appended {stored} historical snapshot(s)");
    Ok(stored)
}

/// Snapshots for `repository` in insertion order, optionally limited to `usernames`.
pub async fn query(
    db: &Database,
    repository: &str,
    usernames: Option<&[String]>,
) -> Result<Vec<Metrics>> {
    let repo = repository.to_string();
    let usernames = usernames.map(<[String]>::to_vec);
    let rows = db
        .reader()
        .call(move |conn| repository::query_historical(conn, &repo, usernames.as_deref()))
        .await?;
    Ok(rows)
}
