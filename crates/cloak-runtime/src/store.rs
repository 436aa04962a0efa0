//! Persisted identity, endpoint and schema snapshot.

use chrono::{DateTime, Utc};
use cloak_core::store::{ENDPOINT_FILE, IDENTITY_FILE, SCHEMA_SNAPSHOT_FILE};
use cloak_core::{
    ENDPOINT_SCHEMA_VERSION, EndpointInfo, InstanceIdentity, JsonFileStore, SchemaColumnRecord,
    StoreError,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedIdentities {
    /// Instance key → identity.
    #[serde(default)]
    identities: BTreeMap<String, InstanceIdentity>,
}

/// Hub-issued identities, one per instance key, in `identity.json`.
///
/// Every save re-reads the document and replaces only its own entry, so
/// entries written by other instances survive.
pub struct IdentityStore {
    file: JsonFileStore<PersistedIdentities>,
    writing: Mutex<()>,
}

impl IdentityStore {
    pub fn new(directory: impl AsRef<Path>) -> Self {
        Self {
            file: JsonFileStore::in_directory(directory, IDENTITY_FILE),
            writing: Mutex::new(()),
        }
    }

    pub fn load(&self, instance_key: &str) -> Option<InstanceIdentity> {
        self.file.load()?.identities.get(instance_key).cloned()
    }

    pub fn save(&self, identity: &InstanceIdentity) -> Result<(), StoreError> {
        let _guard = self.writing.lock().unwrap_or_else(|p| p.into_inner());
        let mut state = self.file.load().unwrap_or_default();
        state
            .identities
            .insert(identity.instance_key.clone(), identity.clone());
        self.file.save(&state)
    }
}

/// The crypto engine endpoint, in `endpoint.json`.
pub struct EndpointStore {
    file: JsonFileStore<EndpointInfo>,
}

impl EndpointStore {
    pub fn new(directory: impl AsRef<Path>) -> Self {
        Self {
            file: JsonFileStore::in_directory(directory, ENDPOINT_FILE),
        }
    }

    /// Load the endpoint. Documents with an unknown schema version are
    /// logged and used as far as they deserialize.
    pub fn load(&self) -> Option<EndpointInfo> {
        let info = self.file.load()?;
        if info.schema_version != ENDPOINT_SCHEMA_VERSION {
            tracing::warn!(
                found = info.schema_version,
                expected = ENDPOINT_SCHEMA_VERSION,
                "Persisted endpoint has an unknown schema version, loading best effort"
            );
        }
        Some(info)
    }

    pub fn save(&self, info: &EndpointInfo) -> Result<(), StoreError> {
        let mut info = info.clone();
        info.schema_version = ENDPOINT_SCHEMA_VERSION;
        self.file.save(&info)
    }
}

/// Last known schema records plus the fingerprint of the last successful
/// push, per identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSnapshot {
    #[serde(default)]
    pub records: Vec<SchemaColumnRecord>,
    /// Identity cache key → SHA-256 hex of the live records.
    #[serde(default)]
    pub hashes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

/// The schema snapshot, in `schema-snapshot.json`.
pub struct SchemaSnapshotStore {
    file: JsonFileStore<SchemaSnapshot>,
}

impl SchemaSnapshotStore {
    pub fn new(directory: impl AsRef<Path>) -> Self {
        Self {
            file: JsonFileStore::in_directory(directory, SCHEMA_SNAPSHOT_FILE),
        }
    }

    pub fn load(&self) -> Option<SchemaSnapshot> {
        self.file.load()
    }

    pub fn save(&self, snapshot: &SchemaSnapshot) -> Result<(), StoreError> {
        let mut snapshot = snapshot.clone();
        snapshot.saved_at = Some(Utc::now());
        self.file.save(&snapshot)
    }
}
