//! Configuration types for Cloak.
//!
//! Configuration is loaded from a single YAML file (`cloak.yaml`). Every
//! section is optional and falls back to its defaults, so a minimal file
//! only needs the datasource and the Hub URL:
//!
//! ```yaml
//! datasource:
//!   database_url_env: DATABASE_URL
//! hub:
//!   base_url: https://hub.internal:8443
//! ```

pub mod datasource;
pub mod engine;
pub mod hub;
pub mod interception;
pub mod runtime;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub use datasource::{ConnectionPoolConfig, DatasourceConfig};
pub use engine::{EngineConfig, EnvelopeScheme, LegacyEnvelope};
pub use hub::HubConfig;
pub use interception::{FailureMode, InterceptionConfig};
pub use runtime::{StorageConfig, SyncConfig};

/// Complete Cloak configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloakConfig {
    /// Live database the application talks to.
    #[serde(default)]
    pub datasource: DatasourceConfig,

    /// Central authority holding policies and identities.
    #[serde(default)]
    pub hub: HubConfig,

    /// Remote crypto engine settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Background synchronization settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Local persisted state.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Statement/result interception behavior.
    #[serde(default)]
    pub interception: InterceptionConfig,
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CloakConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot work at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hub.enabled && self.hub.base_url.trim().is_empty() {
            return Err(ConfigError::Config(
                "hub.base_url must be set when the hub is enabled".to_string(),
            ));
        }
        if self.sync.interval_secs == 0 {
            return Err(ConfigError::Config(
                "sync.interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.sync.collect_attempts == 0 || self.sync.push_attempts == 0 {
            return Err(ConfigError::Config(
                "sync attempt counts must be greater than zero".to_string(),
            ));
        }
        for scheme in &self.engine.envelopes {
            if scheme.prefix.is_empty() || scheme.prefix.contains(':') {
                return Err(ConfigError::Config(format!(
                    "invalid envelope prefix '{}'",
                    scheme.prefix
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_yaml_uses_defaults() {
        let config = CloakConfig::from_yaml(
            r#"
hub:
  base_url: http://hub:8080
"#,
        )
        .unwrap();

        assert_eq!(config.sync.interval_secs, 30);
        assert_eq!(config.hub.api_prefix, "/api/v1");
        assert_eq!(config.interception.failure_mode, FailureMode::FailOpen);
        assert_eq!(config.datasource.schema, "public");
        assert!(!config.engine.envelopes.is_empty());
    }

    #[test]
    fn fail_closed_is_parsed() {
        let config = CloakConfig::from_yaml(
            r#"
hub:
  base_url: http://hub:8080
interception:
  failure_mode: fail_closed
"#,
        )
        .unwrap();
        assert_eq!(config.interception.failure_mode, FailureMode::FailClosed);
    }

    #[test]
    fn empty_hub_url_is_rejected() {
        let err = CloakConfig::from_yaml("hub:\n  base_url: ''\n").unwrap_err();
        assert!(matches!(err, ConfigError::Config(_)));
    }

    #[test]
    fn disabled_hub_needs_no_url() {
        let config = CloakConfig::from_yaml("hub:\n  enabled: false\n").unwrap();
        assert!(!config.hub.enabled);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = CloakConfig::from_yaml(
            "hub:\n  base_url: http://hub\nsync:\n  interval_secs: 0\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("interval_secs"));
    }
}
