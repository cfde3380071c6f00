use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, SyncError};
use crate::sync::{BackoffConfig, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    #[default]
    Local,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default)]
    pub storage_mode: StorageMode,

    pub remote_url: Option<String>,
    pub remote_token: Option<String>,

    #[serde(default = "default_device_id")]
    pub device_id: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold_bytes: usize,

    #[serde(default)]
    pub max_concurrent_chunk_ops: Option<usize>,

    /// Opt-in exponential backoff between retries. Kept last so it
    /// serializes as a trailing table.
    #[serde(default)]
    pub backoff: Option<BackoffConfig>,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("speedy-reader");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("sync.db").to_string_lossy().to_string()
}

fn default_device_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_request_timeout() -> u64 {
    45
}

fn default_max_retries() -> usize {
    3
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_threshold() -> usize {
    500_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            storage_mode: StorageMode::Local,
            remote_url: None,
            remote_token: None,
            device_id: default_device_id(),
            request_timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
            chunk_size: default_chunk_size(),
            chunk_threshold_bytes: default_chunk_threshold(),
            max_concurrent_chunk_ops: None,
            backoff: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| SyncError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("speedy-reader")
            .join("sync.toml")
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(SyncError::Config("chunk_size must be greater than 0".into()));
        }
        if self.max_retries == 0 {
            return Err(SyncError::Config("max_retries must be greater than 0".into()));
        }
        if self.storage_mode == StorageMode::Remote && self.remote_url.is_none() {
            return Err(SyncError::Config(
                "storage_mode = \"remote\" requires remote_url".into(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::new(self.max_retries);
        match &self.backoff {
            Some(backoff) => policy.with_backoff(backoff.clone()),
            None => policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml_fills_defaults() {
        let config: Config = toml::from_str("device_id = \"phone\"").unwrap();
        assert_eq!(config.device_id, "phone");
        assert_eq!(config.storage_mode, StorageMode::Local);
        assert_eq!(config.request_timeout(), Duration::from_secs(45));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.chunk_size, 1000);
        assert!(config.backoff.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_backoff_block_enables_backoff() {
        let config: Config = toml::from_str(
            r#"
            storage_mode = "remote"
            remote_url = "https://sync.example.com"

            [backoff]
            initial_delay_ms = 50
            max_delay_ms = 2000
            factor = 2.0
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert!(config.retry_policy().backoff().is_some());
    }

    #[test]
    fn test_remote_mode_requires_url() {
        let config: Config = toml::from_str("storage_mode = \"remote\"").unwrap();
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));
    }
}
