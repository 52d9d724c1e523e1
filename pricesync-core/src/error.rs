//! Configuration errors. Always fatal, raised before any network call.

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("batch size must be at least 1 (got {0})")]
    InvalidBatchSize(usize),

    #[error("start date {start} is after end date {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("missing required setting '{setting}' (set {env} or add it to the config file)")]
    MissingSetting {
        setting: &'static str,
        env: &'static str,
    },

    #[error("environment variable {key} has an invalid value {value:?}: {reason}")]
    InvalidEnv {
        key: String,
        value: String,
        reason: String,
    },

    #[error("invalid setting '{setting}': {reason}")]
    InvalidSetting {
        setting: &'static str,
        reason: String,
    },

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),
}

/// Fail with [`ConfigError::InvalidDateRange`] when `start > end`.
pub fn check_date_range(start: NaiveDate, end: NaiveDate) -> Result<(), ConfigError> {
    if start > end {
        return Err(ConfigError::InvalidDateRange { start, end });
    }
    Ok(())
}
