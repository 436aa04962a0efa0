//! Background synchronization and local storage configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Timing of the recurring mapping sync and the schema retry loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Period of the mapping version check.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Schema collection attempts while the result is empty.
    #[serde(default = "default_collect_attempts")]
    pub collect_attempts: u32,

    /// Fixed delay between collection attempts.
    #[serde(default = "default_collect_delay_ms")]
    pub collect_delay_ms: u64,

    /// Schema push attempts per cycle.
    #[serde(default = "default_push_attempts")]
    pub push_attempts: u32,

    /// Linear backoff step between push attempts.
    #[serde(default = "default_push_backoff_ms")]
    pub push_backoff_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            collect_attempts: default_collect_attempts(),
            collect_delay_ms: default_collect_delay_ms(),
            push_attempts: default_push_attempts(),
            push_backoff_ms: default_push_backoff_ms(),
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn collect_delay(&self) -> Duration {
        Duration::from_millis(self.collect_delay_ms)
    }

    pub fn push_backoff(&self) -> Duration {
        Duration::from_millis(self.push_backoff_ms)
    }
}

/// Where persisted state lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
        }
    }
}

fn default_interval_secs() -> u64 {
    30
}

fn default_collect_attempts() -> u32 {
    3
}

fn default_collect_delay_ms() -> u64 {
    2000
}

fn default_push_attempts() -> u32 {
    3
}

fn default_push_backoff_ms() -> u64 {
    1000
}

fn default_directory() -> PathBuf {
    PathBuf::from(".cloak")
}
