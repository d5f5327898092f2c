use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Span used when a caller gives no explicit start.
pub const DEFAULT_SPAN_DAYS: i64 = 7;

/// A half-open UTC interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    /// Build a window, rejecting `start >= end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(Error::Validation(format!(
                "window start {start} must be before end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// The `days`-long window that ends at `end`.
    pub fn ending_at(end: DateTime<Utc>, days: i64) -> Self {
        Self {
            start: end - Duration::days(days),
            end,
        }
    }

    /// Apply the generator defaults: `end = now`, `start = end - 7 days`.
    pub fn resolve(
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let end = end.unwrap_or(now);
        let start = start.unwrap_or(end - Duration::days(DEFAULT_SPAN_DAYS));
        Self::new(start, end)
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }

    /// True for degenerate windows (`start >= end`), which match nothing.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Parse a user-supplied timestamp and normalize it to UTC.
///
/// Accepts RFC 3339 with any offset, a naive `YYYY-MM-DDTHH:MM:SS`
/// (or space-separated) datetime, or a bare `YYYY-MM-DD` date. Naive
/// inputs are taken to be UTC.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }
    Err(Error::Validation(format!("invalid timestamp: {s}")))
}
