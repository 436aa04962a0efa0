//! # cloak-core
//!
//! Shared types and configuration for Cloak, a transparent field-level
//! encryption layer between an application and its relational database.
//!
//! The types here are the vocabulary every other crate speaks:
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`ColumnKey`] | `datasource:schema.table.column` identity used for policy lookups |
//! | [`SchemaColumnRecord`] | One observed column with its Hub lifecycle status |
//! | [`PolicyMapping`] | Column key → policy name, as delivered by the Hub |
//! | [`PolicyAttributes`] | Cached per-policy traits (e.g. searchable) |
//! | [`EndpointInfo`] | Where the crypto engine lives, plus telemetry settings |
//! | [`InstanceIdentity`] | Hub-issued instance and datasource ids |
//! | [`DatasourceMetadata`] | vendor/host/port/database/schema of the live database |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// Configuration types shared across all Cloak crates
pub mod config;
pub mod store;

pub use config::{
    CloakConfig, ConfigError, DatasourceConfig, EngineConfig, EnvelopeScheme, FailureMode,
    HubConfig, InterceptionConfig, LegacyEnvelope, StorageConfig, SyncConfig,
};
pub use store::{JsonFileStore, StoreError};

/// Policy/mapping version number issued by the Hub.
pub type Version = i64;

/// Normalize an SQL identifier for key construction.
///
/// Strips quoting (`"x"`, `` `x` ``, `[x]`) and lowercases.
pub fn normalize_identifier(raw: &str) -> String {
    let trimmed = raw.trim();
    let unquoted = trimmed
        .trim_matches('"')
        .trim_matches('`')
        .trim_start_matches('[')
        .trim_end_matches(']');
    unquoted.to_lowercase()
}

/// Composite identity of a column, used both for schema records and policy lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datasource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub table: String,
    pub column: String,
}

impl ColumnKey {
    /// Build a key from a table and column. Identifiers are normalized.
    pub fn new(table: &str, column: &str) -> Self {
        Self {
            datasource_id: None,
            schema: None,
            table: normalize_identifier(table),
            column: normalize_identifier(column),
        }
    }

    pub fn with_schema(mut self, schema: Option<&str>) -> Self {
        self.schema = schema
            .map(normalize_identifier)
            .filter(|s| !s.is_empty());
        self
    }

    pub fn with_datasource(mut self, datasource_id: Option<&str>) -> Self {
        self.datasource_id = datasource_id
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self
    }

    /// Lookup keys in precedence order:
    /// `ds:schema.table.column`, then `schema.table.column`, then `table.column`.
    pub fn lookup_keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(3);
        if let (Some(ds), Some(schema)) = (&self.datasource_id, &self.schema) {
            keys.push(format!("{}:{}.{}.{}", ds, schema, self.table, self.column));
        }
        if let Some(schema) = &self.schema {
            keys.push(format!("{}.{}.{}", schema, self.table, self.column));
        }
        keys.push(format!("{}.{}", self.table, self.column));
        keys
    }

    /// The most specific form of this key.
    pub fn canonical(&self) -> String {
        self.lookup_keys()
            .into_iter()
            .next()
            .unwrap_or_else(|| format!("{}.{}", self.table, self.column))
    }
}

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Lifecycle status of a schema column record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchemaStatus {
    /// Observed locally, not yet acknowledged by the Hub.
    Created,
    /// Acknowledged by the Hub.
    Registered,
    /// No longer observed in the live database. Kept for history.
    Deleted,
}

/// One observed `schema.table.column` of the live database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaColumnRecord {
    pub schema_name: String,
    pub table_name: String,
    pub column_name: String,
    pub column_type: String,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datasource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_name: Option<String>,
    pub status: SchemaStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_changed_at: Option<DateTime<Utc>>,
}

impl SchemaColumnRecord {
    /// A freshly observed column (status `CREATED`).
    pub fn observed(
        schema_name: impl Into<String>,
        table_name: impl Into<String>,
        column_name: impl Into<String>,
        column_type: impl Into<String>,
        nullable: bool,
        column_default: Option<String>,
    ) -> Self {
        Self {
            schema_name: schema_name.into(),
            table_name: table_name.into(),
            column_name: column_name.into(),
            column_type: column_type.into(),
            nullable,
            column_default,
            datasource_id: None,
            policy_name: None,
            status: SchemaStatus::Created,
            status_changed_at: Some(Utc::now()),
        }
    }

    /// Identity key (datasource, schema, table, column).
    pub fn key(&self) -> ColumnKey {
        ColumnKey::new(&self.table_name, &self.column_name)
            .with_schema(Some(&self.schema_name))
            .with_datasource(self.datasource_id.as_deref())
    }

    /// Whether two observations describe the same column shape.
    pub fn same_shape(&self, other: &SchemaColumnRecord) -> bool {
        self.column_type.eq_ignore_ascii_case(&other.column_type)
            && self.nullable == other.nullable
            && self.column_default == other.column_default
    }

    pub fn set_status(&mut self, status: SchemaStatus) {
        if self.status != status {
            self.status = status;
            self.status_changed_at = Some(Utc::now());
        }
    }
}

/// A single policy mapping delivered by the Hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyMapping {
    /// Lookup key, one of the forms produced by [`ColumnKey::lookup_keys`].
    pub key: String,
    pub policy_name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
}

impl PolicyMapping {
    pub fn new(key: impl Into<String>, policy_name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            policy_name: policy_name.into(),
            enabled: true,
            version: None,
        }
    }
}

/// Per-policy traits cached next to the mappings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyAttributes {
    pub policy_name: String,
    /// Deterministic policies produce equal ciphertext for equal plaintext,
    /// so filter values can be encrypted for equality/prefix search.
    #[serde(default)]
    pub deterministic: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
}

/// Telemetry settings delivered with the endpoint info.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: f64,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_telemetry_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            buffer_size: default_buffer_size(),
            sampling_rate: default_sampling_rate(),
            flush_interval_ms: default_flush_interval_ms(),
            timeout_ms: default_telemetry_timeout_ms(),
        }
    }
}

/// Current schema version of the persisted endpoint document.
pub const ENDPOINT_SCHEMA_VERSION: u32 = 2;

/// Crypto engine location and its auxiliary configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointInfo {
    pub engine_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default = "default_endpoint_schema_version")]
    pub schema_version: u32,
}

impl EndpointInfo {
    pub fn new(engine_url: impl Into<String>) -> Self {
        Self {
            engine_url: engine_url.into(),
            hub_id: None,
            version: None,
            telemetry: TelemetryConfig::default(),
            schema_version: ENDPOINT_SCHEMA_VERSION,
        }
    }
}

/// Connection metadata of the live database, captured once per instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceMetadata {
    pub vendor: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub schema: String,
}

impl DatasourceMetadata {
    /// Stable key identifying this physical database for deduplication.
    pub fn instance_key(&self) -> String {
        format!(
            "{}://{}:{}/{}/{}",
            self.vendor.to_lowercase(),
            self.host.to_lowercase(),
            self.port,
            self.database,
            self.schema
        )
    }
}

/// Hub-issued identity of this instance and its datasource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceIdentity {
    pub hub_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datasource_id: Option<String>,
    /// [`DatasourceMetadata::instance_key`] this identity was issued for.
    pub instance_key: String,
    pub registered_at: DateTime<Utc>,
}

impl InstanceIdentity {
    pub fn new(
        hub_id: impl Into<String>,
        datasource_id: Option<String>,
        metadata: &DatasourceMetadata,
    ) -> Self {
        Self {
            hub_id: hub_id.into(),
            datasource_id,
            instance_key: metadata.instance_key(),
            registered_at: Utc::now(),
        }
    }

    /// Key used to scope per-identity caches (e.g. schema hashes).
    pub fn cache_key(&self) -> String {
        match &self.datasource_id {
            Some(ds) => format!("{}:{}", self.hub_id, ds),
            None => self.hub_id.clone(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_buffer_size() -> usize {
    1000
}

fn default_sampling_rate() -> f64 {
    1.0
}

fn default_flush_interval_ms() -> u64 {
    5000
}

fn default_telemetry_timeout_ms() -> u64 {
    3000
}

fn default_endpoint_schema_version() -> u32 {
    ENDPOINT_SCHEMA_VERSION
}
