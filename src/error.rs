use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Network, rate-limit or auth failure talking to the hosting provider.
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Report error: {0}")]
    Report(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Storage failures, as opposed to failures reaching the remote source.
    pub fn is_persistence(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Migration(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<rusqlite_migration::Error> for Error {
    fn from(e: rusqlite_migration::Error) -> Self {
        Error::Migration(e.to_string())
    }
}

impl<E: fmt::Display> From<tokio_rusqlite::Error<E>> for Error {
    fn from(e: tokio_rusqlite::Error<E>) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(reqwest::StatusCode::NOT_FOUND) => Error::NotFound(e.to_string()),
            _ => Error::SourceUnavailable(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
