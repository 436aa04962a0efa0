//! CLI command implementations.

pub mod bootstrap;
pub mod inspect;
pub mod policy;
pub mod schema;

use anyhow::Context;
use cloak_core::CloakConfig;
use std::path::Path;

/// Load and validate a configuration file.
pub fn load_config(path: &Path) -> anyhow::Result<CloakConfig> {
    let config = CloakConfig::from_file(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    config.validate()?;
    Ok(config)
}
