use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::metrics::{Counters, Durations, Metrics};
use crate::window::Window;

const METRICS_COLUMNS: &str = "username, repository, window_start, window_end,
    closed_issues, open_issues, merged_prs, open_prs, commits, lines_of_code,
    issue_cycle_time_days, code_review_time_minutes, last_modified";

// ── Cached Metrics ─────────────────────────────────────────────────

pub fn get_cached_metrics(
    conn: &Connection,
    username: &str,
) -> Result<Option<Metrics>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {METRICS_COLUMNS} FROM user_metrics WHERE username = ?1"),
        params![username],
        metrics_from_row,
    )
    .optional()
}

/// Replace the cached snapshot for `metrics.username`. Never merges fields.
pub fn upsert_cached_metrics(conn: &Connection, metrics: &Metrics) -> Result<(), rusqlite::Error> {
    execute_metrics(
        conn,
        &format!(
            "INSERT INTO user_metrics ({METRICS_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(username) DO UPDATE SET
                repository=excluded.repository, window_start=excluded.window_start,
                window_end=excluded.window_end, closed_issues=excluded.closed_issues,
                open_issues=excluded.open_issues, merged_prs=excluded.merged_prs,
                open_prs=excluded.open_prs, commits=excluded.commits,
                lines_of_code=excluded.lines_of_code,
                issue_cycle_time_days=excluded.issue_cycle_time_days,
                code_review_time_minutes=excluded.code_review_time_minutes,
                last_modified=excluded.last_modified"
        ),
        metrics,
    )?;
    Ok(())
}

// ── Historical Metrics ─────────────────────────────────────────────

pub fn insert_historical(conn: &Connection, metrics: &Metrics) -> Result<i64, rusqlite::Error> {
    execute_metrics(
        conn,
        &format!(
            "INSERT INTO historical_metrics ({METRICS_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
        ),
        metrics,
    )?;
    Ok(conn.last_insert_rowid())
}

/// Insert every record or none of them.
pub fn insert_historical_batch(
    conn: &mut Connection,
    batch: &[Metrics],
) -> Result<usize, rusqlite::Error> {
    let tx = conn.transaction()?;
    for metrics in batch {
        insert_historical(&tx, metrics)?;
    }
    tx.commit()?;
    Ok(batch.len())
}

/// Rows for `repository` in insertion order, optionally restricted to `usernames`.
/// An empty username list matches nothing.
pub fn query_historical(
    conn: &Connection,
    repository: &str,
    usernames: Option<&[String]>,
) -> Result<Vec<Metrics>, rusqlite::Error> {
    let mut sql = format!("SELECT {METRICS_COLUMNS} FROM historical_metrics WHERE repository = ?1");
    let mut values: Vec<&str> = vec![repository];
    if let Some(names) = usernames {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders: Vec<String> = (0..names.len()).map(|i| format!("?{}", i + 2)).collect();
        sql.push_str(&format!(" AND username IN ({})", placeholders.join(", ")));
        values.extend(names.iter().map(String::as_str));
    }
    sql.push_str(" ORDER BY id");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values), metrics_from_row)?;
    rows.collect()
}

// ── Scheduled Runs ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledRun {
    pub id: i64,
    pub repository: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub users_total: u64,
    pub users_succeeded: u64,
    pub users_failed: u64,
    pub records_stored: u64,
    pub error_message: Option<String>,
}

pub fn insert_run(
    conn: &Connection,
    repository: &str,
    started_at: DateTime<Utc>,
    users_total: usize,
) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO scheduled_runs (repository, status, started_at, users_total)
         VALUES (?1, 'running', ?2, ?3)",
        params![repository, fmt_ts(started_at), users_total as i64],
    )?;
    Ok(conn.last_insert_rowid())
}

#[allow(clippy::too_many_arguments)]
pub fn complete_run(
    conn: &Connection,
    run_id: i64,
    status: &str,
    completed_at: DateTime<Utc>,
    users_succeeded: usize,
    users_failed: usize,
    records_stored: usize,
    error_message: Option<&str>,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE scheduled_runs SET
            status = ?2, completed_at = ?3,
            users_succeeded = ?4, users_failed = ?5,
            records_stored = ?6, error_message = ?7
         WHERE id = ?1",
        params![
            run_id,
            status,
            fmt_ts(completed_at),
            users_succeeded as i64,
            users_failed as i64,
            records_stored as i64,
            error_message,
        ],
    )?;
    Ok(())
}

pub fn latest_run(conn: &Connection) -> Result<Option<ScheduledRun>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, repository, status, started_at, completed_at, users_total,
                users_succeeded, users_failed, records_stored, error_message
         FROM scheduled_runs ORDER BY id DESC LIMIT 1",
        [],
        |row| {
            Ok(ScheduledRun {
                id: row.get(0)?,
                repository: row.get(1)?,
                status: row.get(2)?,
                started_at: ts_column(row, 3)?,
                completed_at: row
                    .get::<_, Option<String>>(4)?
                    .map(|s| parse_ts(&s).map_err(|e| conversion_error(4, e)))
                    .transpose()?,
                users_total: row.get::<_, i64>(5)? as u64,
                users_succeeded: row.get::<_, i64>(6)? as u64,
                users_failed: row.get::<_, i64>(7)? as u64,
                records_stored: row.get::<_, i64>(8)? as u64,
                error_message: row.get(9)?,
            })
        },
    )
    .optional()
}

// ── Status ─────────────────────────────────────────────────────────

pub fn table_counts(conn: &Connection) -> Result<Vec<(&'static str, i64)>, rusqlite::Error> {
    let mut counts = Vec::new();
    for table in ["user_metrics", "historical_metrics", "scheduled_runs"] {
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        counts.push((table, n));
    }
    Ok(counts)
}

// ── Helpers ────────────────────────────────────────────────────────

/// Fixed-width RFC 3339 in UTC, so text order is time order.
pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn parse_ts(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

fn conversion_error(idx: usize, e: chrono::ParseError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn ts_column(row: &Row<'_>, idx: usize) -> Result<DateTime<Utc>, rusqlite::Error> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).map_err(|e| conversion_error(idx, e))
}

fn count_column(row: &Row<'_>, idx: usize) -> Result<u64, rusqlite::Error> {
    Ok(row.get::<_, i64>(idx)?.max(0) as u64)
}

fn execute_metrics(conn: &Connection, sql: &str, m: &Metrics) -> Result<usize, rusqlite::Error> {
    conn.execute(
        sql,
        params![
            m.username,
            m.repository,
            fmt_ts(m.window.start),
            fmt_ts(m.window.end),
            m.counters.closed_issues as i64,
            m.counters.open_issues as i64,
            m.counters.merged_prs as i64,
            m.counters.open_prs as i64,
            m.counters.commits as i64,
            m.counters.lines_of_code as i64,
            m.durations.issue_cycle_time_days,
            m.durations.code_review_time_minutes,
            fmt_ts(m.last_modified),
        ],
    )
}

fn metrics_from_row(row: &Row<'_>) -> Result<Metrics, rusqlite::Error> {
    Ok(Metrics {
        username: row.get(0)?,
        repository: row.get(1)?,
        window: Window {
            start: ts_column(row, 2)?,
            end: ts_column(row, 3)?,
        },
        counters: Counters {
            closed_issues: count_column(row, 4)?,
            open_issues: count_column(row, 5)?,
            merged_prs: count_column(row, 6)?,
            open_prs: count_column(row, 7)?,
            commits: count_column(row, 8)?,
            lines_of_code: count_column(row, 9)?,
        },
        durations: Durations {
            issue_cycle_time_days: row.get(10)?,
            code_review_time_minutes: row.get(11)?,
        },
        last_modified: ts_column(row, 12)?,
    })
}
