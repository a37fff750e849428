//! Worklens configuration: a TOML file (path from `WORKLENS_CONFIG`) with
//! environment overrides for the secrets that should not live on disk.

use std::path::Path;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorklensConfig {
    pub database_url: String,
    /// Directory holding the per-provider index partitions.
    pub index_dir: String,
    /// Base64-encoded 32-byte AES key for credential encryption.
    pub credential_key: String,
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub confluence: ConfluenceConfig,
    #[serde(default = "default_retry_config")]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_slack_interval")]
    pub sync_interval_seconds: u64,
    /// Upper bound on channels crawled concurrently within one run.
    #[serde(default = "default_channel_fanout")]
    pub channel_fanout: usize,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfluenceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_confluence_interval")]
    pub sync_interval_seconds: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub starting_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

fn default_true() -> bool {
    true
}

fn default_slack_interval() -> u64 {
    2 * 60 * 60
}

fn default_confluence_interval() -> u64 {
    6 * 60 * 60
}

fn default_channel_fanout() -> usize {
    4
}

fn default_page_size() -> u32 {
    1000
}

fn default_retry_config() -> RetryConfig {
    RetryConfig {
        max_attempts: 5,
        starting_delay_ms: 100,
        max_delay_ms: 1000,
        multiplier: 2.0,
    }
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sync_interval_seconds: default_slack_interval(),
            channel_fanout: default_channel_fanout(),
            page_size: default_page_size(),
        }
    }
}

impl Default for ConfluenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sync_interval_seconds: default_confluence_interval(),
            page_size: default_page_size(),
        }
    }
}

impl WorklensConfig {
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Self = toml::from_str(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Secrets may be supplied via environment instead of the file.
    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("WORKLENS_CREDENTIAL_KEY") {
            self.credential_key = key;
        }
        if let Ok(url) = std::env::var("WORKLENS_DATABASE_URL") {
            self.database_url = url;
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.database_url.is_empty() {
            return Err(ConfigError::Invalid("database_url is required".into()));
        }
        if self.index_dir.is_empty() {
            return Err(ConfigError::Invalid("index_dir is required".into()));
        }
        self.decoded_credential_key()?;
        if self.slack.sync_interval_seconds == 0 || self.confluence.sync_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "sync_interval_seconds must be non-zero".into(),
            ));
        }
        if self.slack.channel_fanout == 0 {
            return Err(ConfigError::Invalid("channel_fanout must be non-zero".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be non-zero".into()));
        }
        Ok(())
    }

    /// The process-wide credential encryption key.
    pub fn decoded_credential_key(&self) -> ConfigResult<[u8; 32]> {
        let bytes = BASE64
            .decode(&self.credential_key)
            .map_err(|e| ConfigError::Invalid(format!("credential_key is not base64: {e}")))?;
        bytes
            .try_into()
            .map_err(|_| ConfigError::Invalid("credential_key must decode to 32 bytes".into()))
    }

    pub fn slack_interval(&self) -> Duration {
        Duration::from_secs(self.slack.sync_interval_seconds)
    }

    pub fn confluence_interval(&self) -> Duration {
        Duration::from_secs(self.confluence.sync_interval_seconds)
    }
}
