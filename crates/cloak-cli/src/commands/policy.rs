//! `cloak policy show` - print what a restart would load from disk.

use super::load_config;
use cloak_core::CloakConfig;
use cloak_policy::PolicyCache;
use cloak_runtime::{EndpointStore, IdentityStore};
use std::fmt::Write as _;
use std::path::Path;

pub fn show(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    print!("{}", render(&config)?);
    Ok(())
}

pub fn render(config: &CloakConfig) -> anyhow::Result<String> {
    let directory = &config.storage.directory;
    let instance_key = config.datasource.metadata().instance_key();
    let mut out = String::new();

    writeln!(out, "State directory: {}", directory.display())?;
    match IdentityStore::new(directory).load(&instance_key) {
        Some(identity) => writeln!(
            out,
            "Identity:        {} (datasource {})",
            identity.hub_id,
            identity.datasource_id.as_deref().unwrap_or("-")
        )?,
        None => writeln!(out, "Identity:        none for {instance_key}")?,
    }
    match EndpointStore::new(directory).load() {
        Some(endpoint) => writeln!(out, "Engine:          {}", endpoint.engine_url)?,
        None => writeln!(out, "Engine:          none")?,
    }

    let policies = PolicyCache::persisted(directory);
    if !policies.persisted_reload() {
        writeln!(out, "Policies:        none persisted")?;
        return Ok(out);
    }
    let snapshot = policies.snapshot();
    writeln!(
        out,
        "Policies:        version {}",
        snapshot
            .version
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string())
    )?;

    let mut mappings: Vec<_> = snapshot.mappings.values().collect();
    mappings.sort_by(|a, b| a.key.cmp(&b.key));
    for mapping in mappings {
        let deterministic = snapshot
            .attributes
            .get(&mapping.policy_name)
            .is_some_and(|a| a.deterministic);
        writeln!(
            out,
            "  {:<40} {}{}{}",
            mapping.key,
            mapping.policy_name,
            if deterministic { " (searchable)" } else { "" },
            if mapping.enabled { "" } else { " [disabled]" }
        )?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloak_core::{PolicyAttributes, PolicyMapping};
    use tempfile::TempDir;

    #[test]
    fn test_render_persisted_policies() {
        let dir = TempDir::new().unwrap();
        let mut config = CloakConfig::default();
        config.storage.directory = dir.path().to_path_buf();

        PolicyCache::persisted(dir.path())
            .refresh(
                vec![
                    PolicyMapping::new("users.email", "pii"),
                    PolicyMapping::new("users.ssn", "ssn"),
                ],
                vec![PolicyAttributes {
                    policy_name: "ssn".into(),
                    deterministic: true,
                    algorithm: None,
                }],
                Some(4),
            )
            .unwrap();

        let out = render(&config).unwrap();
        assert!(out.contains("Identity:        none"));
        assert!(out.contains("version 4"));
        assert!(out.contains("users.ssn"));
        assert!(out.contains("ssn (searchable)"));
        assert!(out.find("users.email").unwrap() < out.find("users.ssn").unwrap());
    }

    #[test]
    fn test_render_empty_state() {
        let dir = TempDir::new().unwrap();
        let mut config = CloakConfig::default();
        config.storage.directory = dir.path().to_path_buf();

        let out = render(&config).unwrap();
        assert!(out.contains("Policies:        none persisted"));
        assert!(out.contains("Engine:          none"));
    }
}
