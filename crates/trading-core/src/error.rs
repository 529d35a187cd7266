//! Error types for the swing trading bot.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Data validation error: {0}")]
    DataValidation(String),

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Order error: {message}")]
    Order { message: String },

    #[error("Live trading locked: {0}")]
    LiveLock(String),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Configuration file error: {0}")]
    ConfigFile(#[from] config::ConfigError),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Strategy error: {0}")]
    Strategy(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// How an error should be treated by retry and halt policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Transient; the operation may be retried and counts toward the breaker.
    Recoverable,
    /// Misconfiguration; never retried, must surface to the caller.
    Fatal,
    /// Unclassified; logged and treated as non-fatal.
    Unknown,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Recoverable => "recoverable",
            Classification::Fatal => "fatal",
            Classification::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    pub fn order(message: impl Into<String>) -> Self {
        Error::Order {
            message: message.into(),
        }
    }

    pub fn classification(&self) -> Classification {
        match self {
            Error::DataValidation(_)
            | Error::Connectivity(_)
            | Error::Order { .. }
            | Error::LiveLock(_)
            | Error::Http(_) => Classification::Recoverable,
            Error::Config { .. } | Error::ConfigFile(_) | Error::Migration(_) => {
                Classification::Fatal
            }
            Error::Json(_) | Error::Database(_) | Error::Strategy(_) | Error::Corrupt(_) => {
                Classification::Unknown
            }
        }
    }

    /// Whether re-running the same call could plausibly succeed.
    ///
    /// Live-lock rejections are recoverable by the operator, not by a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Connectivity(_) | Error::Http(_))
    }

    pub fn is_fatal(&self) -> bool {
        self.classification() == Classification::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_taxonomy() {
        assert_eq!(
            Error::DataValidation("empty".into()).classification(),
            Classification::Recoverable
        );
        assert_eq!(
            Error::Connectivity("timeout".into()).classification(),
            Classification::Recoverable
        );
        assert_eq!(Error::order("rejected").classification(), Classification::Recoverable);
        assert_eq!(Error::config("bad").classification(), Classification::Fatal);
        assert_eq!(
            Error::Strategy("panic".into()).classification(),
            Classification::Unknown
        );
    }

    #[test]
    fn test_retryable_is_narrower_than_recoverable() {
        assert!(Error::Connectivity("reset".into()).is_retryable());
        assert!(!Error::DataValidation("gap".into()).is_retryable());
        assert!(!Error::LiveLock("locked".into()).is_retryable());
        assert!(!Error::config("missing").is_retryable());
    }

    #[test]
    fn test_classification_display() {
        assert_eq!(Classification::Recoverable.to_string(), "recoverable");
        assert_eq!(Classification::Fatal.to_string(), "fatal");
        assert_eq!(Classification::Unknown.to_string(), "unknown");
    }
}
