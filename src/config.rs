use std::net::SocketAddr;
use std::path::PathBuf;

use crate::collect::schedule::WeeklySchedule;
use crate::error::{Error, Result};
use crate::source::github::DEFAULT_API_URL;
use crate::storage;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:5000";

/// Runtime settings, read from environment variables.
///
/// | Variable | Default |
/// |---|---|
/// | `USERNAMES` | none (comma-separated) |
/// | `TARGET_REPOSITORY` | none |
/// | `PERSONAL_GITHUB_TOKEN` | none |
/// | `METRICS_DATABASE_PATH` | `~/.devpulse/productivity_metrics.db` |
/// | `GITHUB_API_URL` | `https://api.github.com` |
/// | `METRICS_LISTEN_ADDR` | `127.0.0.1:5000` |
/// | `COLLECT_SCHEDULE` | `mon 07:00` (UTC) |
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub usernames: Vec<String>,
    pub repository: Option<String>,
    pub token: Option<String>,
    /// Explicit `METRICS_DATABASE_PATH`; see [`Config::database_path`].
    pub database_path: Option<PathBuf>,
    pub api_url: String,
    pub listen_addr: SocketAddr,
    pub schedule: WeeklySchedule,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let usernames = get("USERNAMES")
            .map(|v| split_list(&v))
            .unwrap_or_default();

        let listen_addr = get("METRICS_LISTEN_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let listen_addr = listen_addr
            .parse()
            .map_err(|e| Error::Config(format!("METRICS_LISTEN_ADDR '{listen_addr}': {e}")))?;

        let schedule = match get("COLLECT_SCHEDULE") {
            Some(s) => s.parse()?,
            None => WeeklySchedule::default(),
        };

        Ok(Self {
            usernames,
            repository: get("TARGET_REPOSITORY"),
            token: get("PERSONAL_GITHUB_TOKEN"),
            database_path: get("METRICS_DATABASE_PATH").map(PathBuf::from),
            api_url: get("GITHUB_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            listen_addr,
            schedule,
        })
    }

    /// The configured database file, or the per-user default. The default
    /// needs a home directory, so it is only looked up when asked for.
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => storage::default_path(),
        }
    }

    /// The target repository, required by scheduled collection and reports.
    pub fn require_repository(&self) -> Result<&str> {
        self.repository
            .as_deref()
            .ok_or_else(|| Error::Config("TARGET_REPOSITORY is not set".into()))
    }
}

/// Split a comma-separated list, dropping blanks and duplicates.
pub fn split_list(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !out.iter().any(|seen| seen == item) {
            out.push(item.to_string());
        }
    }
    out
}

/// Optional username filter from a comma-separated value. An absent or
/// blank value selects every user.
pub fn username_filter(raw: Option<&str>) -> Option<Vec<String>> {
    raw.map(split_list).filter(|names| !names.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[("METRICS_DATABASE_PATH", "/tmp/metrics.db")]).unwrap();
        assert!(cfg.usernames.is_empty());
        assert_eq!(cfg.repository, None);
        assert_eq!(cfg.token, None);
        assert_eq!(cfg.api_url, "https://api.github.com");
        assert_eq!(cfg.listen_addr, "127.0.0.1:5000".parse().unwrap());
        assert_eq!(cfg.schedule, WeeklySchedule::default());
        assert!(cfg.require_repository().is_err());
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("USERNAMES", " alice, bob ,,alice"),
            ("TARGET_REPOSITORY", "acme/widgets"),
            ("PERSONAL_GITHUB_TOKEN", "ghp_x"),
            ("METRICS_DATABASE_PATH", "/var/lib/devpulse.db"),
            ("GITHUB_API_URL", "http://localhost:8080"),
            ("METRICS_LISTEN_ADDR", "0.0.0.0:8000"),
            ("COLLECT_SCHEDULE", "fri 18:30"),
        ])
        .unwrap();
        assert_eq!(cfg.usernames, vec!["alice", "bob"]);
        assert_eq!(cfg.require_repository().unwrap(), "acme/widgets");
        assert_eq!(cfg.token.as_deref(), Some("ghp_x"));
        assert_eq!(cfg.database_path().unwrap(), PathBuf::from("/var/lib/devpulse.db"));
        assert_eq!(cfg.api_url, "http://localhost:8080");
        assert_eq!(cfg.listen_addr.port(), 8000);
        assert_eq!(cfg.schedule.weekday, Weekday::Fri);
    }

    #[test]
    fn test_username_filter_treats_blank_as_everyone() {
        assert_eq!(username_filter(None), None);
        assert_eq!(username_filter(Some("")), None);
        assert_eq!(username_filter(Some(" , ")), None);
        assert_eq!(username_filter(Some("alice, bob")), Some(vec!["alice".to_string(), "bob".to_string()]));
    }

    #[test]
    fn test_database_path_is_resolved_lazily() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.database_path, None);
        assert_eq!(cfg.database_path().ok(), storage::default_path().ok());

        let cfg = config(&[("METRICS_DATABASE_PATH", "/tmp/metrics.db")]).unwrap();
        assert_eq!(cfg.database_path, Some(PathBuf::from("/tmp/metrics.db")));
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let cfg = config(&[
            ("METRICS_DATABASE_PATH", "/tmp/metrics.db"),
            ("PERSONAL_GITHUB_TOKEN", "   "),
            ("COLLECT_SCHEDULE", ""),
        ])
        .unwrap();
        assert_eq!(cfg.token, None);
        assert_eq!(cfg.schedule, WeeklySchedule::default());
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        let bad_addr = config(&[("METRICS_DATABASE_PATH", "/tmp/m.db"), ("METRICS_LISTEN_ADDR", "nowhere")]);
        assert!(matches!(bad_addr, Err(Error::Config(_))));

        let bad_schedule = config(&[("METRICS_DATABASE_PATH", "/tmp/m.db"), ("COLLECT_SCHEDULE", "daily")]);
        assert!(matches!(bad_schedule, Err(Error::Config(_))));
    }
}
