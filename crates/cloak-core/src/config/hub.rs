//! Hub connection configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the central authority ("the Hub").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Whether to talk to the Hub at all. When disabled, only persisted
    /// state is used.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Base URL, e.g. `https://hub.internal:8443`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Stable versioned path prefix for every Hub operation.
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// Human-readable instance alias reported to the Hub.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_base_url(),
            api_prefix: default_api_prefix(),
            alias: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl HubConfig {
    /// Full URL of a Hub operation path (e.g. `/mappings/check`).
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.api_prefix.trim_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_api_prefix() -> String {
    "/api/v1".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    3000
}

fn default_read_timeout_ms() -> u64 {
    10000
}
