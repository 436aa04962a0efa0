//! The policy cache and its persisted form.

use crate::error::PolicyError;
use chrono::{DateTime, Utc};
use cloak_core::store::POLICY_FILE;
use cloak_core::{ColumnKey, JsonFileStore, PolicyAttributes, PolicyMapping, Version};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

/// One immutable generation of the policy map.
#[derive(Debug, Clone, Default)]
pub struct PolicySnapshot {
    pub version: Option<Version>,
    /// Lowercased lookup key → mapping.
    pub mappings: Arc<HashMap<String, PolicyMapping>>,
    /// Policy name → attributes.
    pub attributes: Arc<HashMap<String, PolicyAttributes>>,
}

impl PolicySnapshot {
    fn build(
        mappings: Vec<PolicyMapping>,
        attributes: Vec<PolicyAttributes>,
        version: Option<Version>,
    ) -> Self {
        let mappings = mappings
            .into_iter()
            .map(|mut m| {
                m.key = m.key.trim().to_lowercase();
                m.version = version;
                (m.key.clone(), m)
            })
            .collect();
        let attributes = attributes
            .into_iter()
            .map(|a| (a.policy_name.clone(), a))
            .collect();
        Self {
            version,
            mappings: Arc::new(mappings),
            attributes: Arc::new(attributes),
        }
    }

    fn lookup(&self, key: &ColumnKey) -> Option<&PolicyMapping> {
        key.lookup_keys()
            .into_iter()
            .find_map(|k| self.mappings.get(&k.to_lowercase()))
    }
}

/// On-disk shape of `policy-mappings.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedPolicies {
    #[serde(default)]
    pub version: Option<Version>,
    #[serde(default)]
    pub mappings: Vec<PolicyMapping>,
    #[serde(default)]
    pub policies: Vec<PolicyAttributes>,
    pub saved_at: DateTime<Utc>,
}

/// Shared, versioned `column → policy` cache.
pub struct PolicyCache {
    current: RwLock<Arc<PolicySnapshot>>,
    store: Option<JsonFileStore<PersistedPolicies>>,
}

impl Default for PolicyCache {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl PolicyCache {
    /// A cache that never touches the disk.
    pub fn in_memory() -> Self {
        Self {
            current: RwLock::new(Arc::new(PolicySnapshot::default())),
            store: None,
        }
    }

    /// A cache persisted to `policy-mappings.json` in `directory`.
    pub fn persisted(directory: impl AsRef<Path>) -> Self {
        Self {
            current: RwLock::new(Arc::new(PolicySnapshot::default())),
            store: Some(JsonFileStore::in_directory(directory, POLICY_FILE)),
        }
    }

    /// The snapshot currently in effect.
    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        let guard = self.current.read().unwrap_or_else(|p| p.into_inner());
        Arc::clone(&guard)
    }

    /// Policy for a column, trying `ds:schema.table.column`, then
    /// `schema.table.column`, then `table.column`. Disabled mappings never match.
    pub fn resolve(
        &self,
        datasource_id: Option<&str>,
        schema: Option<&str>,
        table: &str,
        column: &str,
    ) -> Option<String> {
        let key = ColumnKey::new(table, column)
            .with_schema(schema)
            .with_datasource(datasource_id);
        self.resolve_key(&key)
    }

    pub fn resolve_key(&self, key: &ColumnKey) -> Option<String> {
        let snapshot = self.snapshot();
        snapshot
            .lookup(key)
            .filter(|m| m.enabled)
            .map(|m| m.policy_name.clone())
    }

    pub fn attributes(&self, policy_name: &str) -> Option<PolicyAttributes> {
        self.snapshot().attributes.get(policy_name).cloned()
    }

    pub fn current_version(&self) -> Option<Version> {
        self.snapshot().version
    }

    pub fn len(&self) -> usize {
        self.snapshot().mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the whole map atomically.
    ///
    /// The in-memory swap always happens; the returned error only reports a
    /// failure to persist the new snapshot.
    pub fn refresh(
        &self,
        mappings: Vec<PolicyMapping>,
        attributes: Vec<PolicyAttributes>,
        version: Option<Version>,
    ) -> Result<(), PolicyError> {
        let snapshot = Arc::new(PolicySnapshot::build(mappings, attributes, version));
        let count = snapshot.mappings.len();
        self.swap(Arc::clone(&snapshot));
        tracing::info!(version = ?version, mappings = count, "Policy cache refreshed");

        if version.is_some() {
            self.persist(&snapshot)?;
        }
        Ok(())
    }

    /// Stamp a new version on the current map without touching its contents.
    pub fn set_version(&self, version: Version) -> Result<(), PolicyError> {
        let snapshot = self.restamp(Some(version));
        tracing::debug!(version, "Policy version stamped");
        self.persist(&snapshot)
    }

    /// Forget the version, e.g. after the instance was re-registered. The
    /// mappings stay in effect until the next refresh.
    pub fn reset_version(&self) -> Result<(), PolicyError> {
        let snapshot = self.restamp(None);
        tracing::info!("Policy version reset");
        self.persist(&snapshot)
    }

    /// Load `policy-mappings.json` into memory. Returns whether a snapshot was found.
    pub fn persisted_reload(&self) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        let Some(persisted) = store.load() else {
            return false;
        };

        let snapshot =
            PolicySnapshot::build(persisted.mappings, persisted.policies, persisted.version);
        tracing::info!(
            version = ?snapshot.version,
            mappings = snapshot.mappings.len(),
            saved_at = %persisted.saved_at,
            "Loaded persisted policy snapshot"
        );
        self.swap(Arc::new(snapshot));
        true
    }

    fn restamp(&self, version: Option<Version>) -> Arc<PolicySnapshot> {
        let mut guard = self.current.write().unwrap_or_else(|p| p.into_inner());
        let mappings = guard
            .mappings
            .iter()
            .map(|(k, m)| {
                let mut m = m.clone();
                m.version = version;
                (k.clone(), m)
            })
            .collect();
        let snapshot = Arc::new(PolicySnapshot {
            version,
            mappings: Arc::new(mappings),
            attributes: Arc::clone(&guard.attributes),
        });
        *guard = Arc::clone(&snapshot);
        snapshot
    }

    fn swap(&self, snapshot: Arc<PolicySnapshot>) {
        let mut guard = self.current.write().unwrap_or_else(|p| p.into_inner());
        *guard = snapshot;
    }

    fn persist(&self, snapshot: &PolicySnapshot) -> Result<(), PolicyError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let mut mappings: Vec<PolicyMapping> = snapshot.mappings.values().cloned().collect();
        mappings.sort_by(|a, b| a.key.cmp(&b.key));
        let mut policies: Vec<PolicyAttributes> = snapshot.attributes.values().cloned().collect();
        policies.sort_by(|a, b| a.policy_name.cmp(&b.policy_name));

        store.save(&PersistedPolicies {
            version: snapshot.version,
            mappings,
            policies,
            saved_at: Utc::now(),
        })?;
        Ok(())
    }
}
