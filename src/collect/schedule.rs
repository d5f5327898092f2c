//! Weekly trigger for collection runs. All times are UTC.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use regex::Regex;

use crate::collect::{RunReport, RunStatus};
use crate::error::Error;

static RE_SCHEDULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^([a-z]+)\s+(\d{1,2}):(\d{2})$").unwrap());

/// A fixed weekday and wall-clock time, e.g. `mon 07:00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklySchedule {
    pub weekday: Weekday,
    pub at: NaiveTime,
}

impl Default for WeeklySchedule {
    fn default() -> Self {
        Self {
            weekday: Weekday::Mon,
            at: NaiveTime::from_hms_opt(7, 0, 0).unwrap_or_default(),
        }
    }
}

impl FromStr for WeeklySchedule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let invalid = || Error::Config(format!("invalid schedule '{s}', expected e.g. 'mon 07:00'"));
        let caps = RE_SCHEDULE.captures(s.trim()).ok_or_else(invalid)?;
        let weekday: Weekday = caps[1].parse().map_err(|_| invalid())?;
        let hour: u32 = caps[2].parse().map_err(|_| invalid())?;
        let minute: u32 = caps[3].parse().map_err(|_| invalid())?;
        let at = NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(invalid)?;
        Ok(Self { weekday, at })
    }
}

impl fmt::Display for WeeklySchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let day = match self.weekday {
            Weekday::Mon => "mon",
            Weekday::Tue => "tue",
            Weekday::Wed => "wed",
            Weekday::Thu => "thu",
            Weekday::Fri => "fri",
            Weekday::Sat => "sat",
            Weekday::Sun => "sun",
        };
        write!(f, "{day} {}", self.at.format("%H:%M"))
    }
}

impl WeeklySchedule {
    /// The first trigger strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive();
        let days_ahead = (7 + self.weekday.num_days_from_monday()
            - today.weekday().num_days_from_monday())
            % 7;
        let candidate = (today + Duration::days(i64::from(days_ahead)))
            .and_time(self.at)
            .and_utc();
        if candidate > now {
            candidate
        } else {
            candidate + Duration::days(7)
        }
    }
}

/// Sleep until each trigger and run `job` with the trigger time. Never returns.
/// A failed run is logged and the next tick proceeds as usual.
pub async fn run_forever<F, Fut>(schedule: WeeklySchedule, mut job: F)
where
    F: FnMut(DateTime<Utc>) -> Fut,
    Fut: Future<Output = RunReport>,
{
    loop {
        let now = Utc::now();
        let next = schedule.next_after(now);
        log::info!("Next collection run at {next} ({schedule} UTC)");
        let wait = (next - now).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        let report = job(next).await;
        match report.status {
            RunStatus::Success => log::info!(
                "Collection run for {} stored {} snapshot(s)",
                report.repository,
                report.records_stored
            ),
            RunStatus::PartialFailure | RunStatus::Failed => log::warn!(
                "Collection run for {} finished with status {}: {}",
                report.repository,
                report.status.as_str(),
                report.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}
