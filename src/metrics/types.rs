use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::window::Window;

/// Throughput counters for one developer over one window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub closed_issues: u64,
    /// All-time issue total minus `closed_issues`; not scoped to the window.
    pub open_issues: u64,
    pub merged_prs: u64,
    /// All-time PR total minus `merged_prs`; not scoped to the window.
    pub open_prs: u64,
    pub commits: u64,
    /// Whole-file byte sizes of files touched in the window (not diff lines).
    pub lines_of_code: u64,
}

/// Average elapsed times. Zero when nothing qualifies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Durations {
    pub issue_cycle_time_days: f64,
    pub code_review_time_minutes: f64,
}

/// One computed metrics snapshot. Never mutated after construction;
/// a refresh always builds a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub username: String,
    pub repository: String,
    pub window: Window,
    pub counters: Counters,
    pub durations: Durations,
    /// When the snapshot was computed. Drives cache staleness only.
    pub last_modified: DateTime<Utc>,
}

impl Metrics {
    /// Compare the computed values, ignoring `last_modified`.
    pub fn same_values(&self, other: &Metrics) -> bool {
        self.username == other.username
            && self.repository == other.repository
            && self.window == other.window
            && self.counters == other.counters
            && self.durations == other.durations
    }
}

/// Outcome of one generation: valid metrics, or the failure that aborted them.
pub type MetricsRecord = Result<Metrics>;

/// Open/closed split for issues or pull requests. For pull requests
/// `closed` counts merged ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub open: u64,
    pub closed: u64,
}

impl StateCounts {
    /// `open = total - closed`, where `total` is all-time and `closed` is
    /// window-scoped. The asymmetry is deliberate and kept as-is.
    pub fn from_total(total: u64, closed: u64) -> Self {
        Self {
            open: total.saturating_sub(closed),
            closed,
        }
    }
}
