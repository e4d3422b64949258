use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::network::{OverflowStrategy, DEFAULT_MAX_RETRIES};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading config: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub device_id: u64,
    pub max_retries: u32,
    /// Per-record processing timeout. `None` waits forever.
    pub process_timeout_ms: Option<u64>,
    /// `None` leaves the queue unbounded.
    pub queue_capacity: Option<usize>,
    pub overflow: OverflowStrategy,
    /// Evicted actions kept for inspection. Zero disables the list.
    pub dead_letter_capacity: usize,
    pub start_online: bool,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    #[serde(rename = "memory")]
    Memory,
    #[serde(rename = "sled")]
    Sled { data_dir: String },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sled {
            data_dir: "./data".to_string(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_id: 1,
            max_retries: DEFAULT_MAX_RETRIES,
            process_timeout_ms: Some(30_000),
            queue_capacity: None,
            overflow: OverflowStrategy::RejectNew,
            dead_letter_capacity: 100,
            start_online: true,
            storage: StorageConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

impl EngineConfig {
    /// Ephemeral engine, nothing written to disk.
    pub fn in_memory() -> Self {
        Self {
            storage: StorageConfig::Memory,
            ..Self::default()
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `RESYNC_*` environment overrides. Unparsable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(n) = env_parse::<u32>("RESYNC_MAX_RETRIES").filter(|&n| n > 0) {
            self.max_retries = n;
        }
        if let Some(ms) = env_parse::<u64>("RESYNC_PROCESS_TIMEOUT_MS") {
            self.process_timeout_ms = (ms > 0).then_some(ms);
        }
        if let Some(cap) = env_parse::<usize>("RESYNC_QUEUE_CAPACITY") {
            self.queue_capacity = (cap > 0).then_some(cap);
        }
        if let Ok(dir) = std::env::var("RESYNC_DATA_DIR") {
            if !dir.is_empty() {
                self.storage = StorageConfig::Sled { data_dir: dir };
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid("max_retries must be at least 1".into()));
        }
        if self.queue_capacity == Some(0) {
            return Err(ConfigError::Invalid(
                "queue_capacity must be positive (omit it for an unbounded queue)".into(),
            ));
        }
        if let StorageConfig::Sled { data_dir } = &self.storage {
            if data_dir.is_empty() {
                return Err(ConfigError::Invalid("sled data_dir is empty".into()));
            }
        }
        Ok(())
    }

    pub fn process_timeout(&self) -> Option<Duration> {
        self.process_timeout_ms.map(Duration::from_millis)
    }
}
