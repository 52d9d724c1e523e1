//! Sync configuration: TOML file, then environment, then CLI overrides.
//!
//! Every section has defaults, so an empty file (or no file) is valid until
//! a credential is actually needed. The environment is passed in as a map
//! so loading is deterministic under test.

use pricesync_core::data::{RetryPolicy, TIINGO_DAILY_URL};
use pricesync_core::store::NotionProperties;
use pricesync_core::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const ENV_TIINGO_API_KEY: &str = "TIINGO_API_KEY";
pub const ENV_BATCH_SIZE: &str = "TIINGO_BATCH_SIZE";
pub const ENV_MAX_RETRIES: &str = "TIINGO_MAX_RETRIES";
pub const ENV_BACKOFF_SECONDS: &str = "TIINGO_BACKOFF_SECONDS";
pub const ENV_EXPORT_DIR: &str = "TIINGO_EXPORT_DIR";
pub const ENV_JSON_PREFIX: &str = "TIINGO_JSON_PREFIX";
pub const ENV_NOTION_API_KEY: &str = "NOTION_API_KEY";
pub const ENV_NOTION_DATABASE_ID: &str = "NOTION_DATABASE_ID";
pub const ENV_DRIVE_FOLDER_ID: &str = "GOOGLE_DRIVE_FOLDER_ID";
pub const ENV_DRIVE_ACCESS_TOKEN: &str = "GOOGLE_DRIVE_ACCESS_TOKEN";

/// Complete configuration for a sync run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub tiingo: TiingoSettings,
    pub batch: BatchSettings,
    pub retry: RetrySettings,
    pub export: ExportSettings,
    pub notion: NotionSettings,
    pub drive: DriveSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TiingoSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for TiingoSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: TIINGO_DAILY_URL.to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub size: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self { size: 8 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub backoff_seconds: f64,
    pub max_backoff_seconds: Option<f64>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_seconds: 1.0,
            max_backoff_seconds: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub output_dir: PathBuf,
    pub json_prefix: String,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("exports"),
            json_prefix: "tiingo_prices".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotionSettings {
    pub api_key: Option<String>,
    pub database_id: Option<String>,
    pub page_size: usize,
    pub max_pages: Option<usize>,
    pub properties: NotionProperties,
}

impl Default for NotionSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            database_id: None,
            page_size: 50,
            max_pages: None,
            properties: NotionProperties::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveSettings {
    pub folder_id: Option<String>,
    pub access_token: Option<String>,
}

impl SyncConfig {
    /// Parse a config from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// File (if any), then environment overrides, then validation.
    pub fn load(path: Option<&Path>, env: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    /// Override settings from environment variables that are set and non-blank.
    pub fn apply_env(&mut self, env: &HashMap<String, String>) -> Result<(), ConfigError> {
        if let Some(v) = env_str(env, ENV_TIINGO_API_KEY) {
            self.tiingo.api_key = Some(v);
        }
        if let Some(v) = env_parse(env, ENV_BATCH_SIZE)? {
            self.batch.size = v;
        }
        if let Some(v) = env_parse(env, ENV_MAX_RETRIES)? {
            self.retry.max_retries = v;
        }
        if let Some(v) = env_parse(env, ENV_BACKOFF_SECONDS)? {
            self.retry.backoff_seconds = v;
        }
        if let Some(v) = env_str(env, ENV_EXPORT_DIR) {
            self.export.output_dir = PathBuf::from(v);
        }
        if let Some(v) = env_str(env, ENV_JSON_PREFIX) {
            self.export.json_prefix = v;
        }
        if let Some(v) = env_str(env, ENV_NOTION_API_KEY) {
            self.notion.api_key = Some(v);
        }
        if let Some(v) = env_str(env, ENV_NOTION_DATABASE_ID) {
            self.notion.database_id = Some(v);
        }
        if let Some(v) = env_str(env, ENV_DRIVE_FOLDER_ID) {
            self.drive.folder_id = Some(v);
        }
        if let Some(v) = env_str(env, ENV_DRIVE_ACCESS_TOKEN) {
            self.drive.access_token = Some(v);
        }

        let props = &mut self.notion.properties;
        for (field, slot) in [
            ("TICKER", &mut props.ticker),
            ("DATE", &mut props.date),
            ("OPEN", &mut props.open),
            ("HIGH", &mut props.high),
            ("LOW", &mut props.low),
            ("CLOSE", &mut props.close),
            ("VOLUME", &mut props.volume),
            ("ADJ_CLOSE", &mut props.adj_close),
        ] {
            if let Some(v) = env_str(env, &format!("NOTION_{field}_PROPERTY")) {
                *slot = v;
            }
        }
        Ok(())
    }

    /// Reject values no run could use. Credentials are checked when needed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch.size == 0 {
            return Err(ConfigError::InvalidBatchSize(0));
        }
        check_seconds("retry.backoff_seconds", self.retry.backoff_seconds)?;
        if let Some(cap) = self.retry.max_backoff_seconds {
            check_seconds("retry.max_backoff_seconds", cap)?;
        }
        if self.tiingo.timeout_secs == 0 {
            return Err(ConfigError::InvalidSetting {
                setting: "tiingo.timeout_secs",
                reason: "must be at least 1".into(),
            });
        }
        if self.export.json_prefix.trim().is_empty() {
            return Err(ConfigError::InvalidSetting {
                setting: "export.json_prefix",
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            base_delay: seconds(self.retry.backoff_seconds),
            max_delay: self.retry.max_backoff_seconds.map(seconds),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.tiingo.timeout_secs)
    }

    pub fn tiingo_api_key(&self) -> Result<&str, ConfigError> {
        self.tiingo
            .api_key
            .as_deref()
            .ok_or(ConfigError::MissingSetting {
                setting: "tiingo.api_key",
                env: ENV_TIINGO_API_KEY,
            })
    }

    /// `(api_key, database_id)` for the Notion store.
    pub fn notion_credentials(&self) -> Result<(&str, &str), ConfigError> {
        let key = self.notion.api_key.as_deref().ok_or(ConfigError::MissingSetting {
            setting: "notion.api_key",
            env: ENV_NOTION_API_KEY,
        })?;
        let db = self
            .notion
            .database_id
            .as_deref()
            .ok_or(ConfigError::MissingSetting {
                setting: "notion.database_id",
                env: ENV_NOTION_DATABASE_ID,
            })?;
        Ok((key, db))
    }

    /// `(access_token, folder_id)` when Drive upload is configured.
    pub fn drive_target(&self) -> Option<(&str, &str)> {
        Some((
            self.drive.access_token.as_deref()?,
            self.drive.folder_id.as_deref()?,
        ))
    }
}

fn env_str(env: &HashMap<String, String>, key: &str) -> Option<String> {
    env.get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn env_parse<T>(env: &HashMap<String, String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_str(env, key) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnv {
                key: key.to_string(),
                value: raw,
                reason: e.to_string(),
            }),
    }
}

fn check_seconds(setting: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::InvalidSetting {
            setting,
            reason: format!("must be a non-negative number of seconds (got {value})"),
        });
    }
    Ok(())
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}
