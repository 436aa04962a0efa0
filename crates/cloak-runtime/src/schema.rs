//! Schema collection, lifecycle reconciliation and the push to the Hub.

use crate::error::HubError;
use crate::hub::{HubApi, SchemaSyncRequest};
use crate::retry::{RetryPolicy, Sleeper, retry_when};
use crate::store::{SchemaSnapshot, SchemaSnapshotStore};
use async_trait::async_trait;
use cloak_core::{InstanceIdentity, SchemaColumnRecord, SchemaStatus};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Reads the live column catalogue of the database.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn collect(&self) -> anyhow::Result<Vec<SchemaColumnRecord>>;
}

/// Collect the schema, retrying while the result is empty or the source fails.
///
/// Returns an empty list when every attempt came back empty.
pub async fn collect_with_retry(
    source: &dyn SchemaSource,
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
) -> Vec<SchemaColumnRecord> {
    for attempt in 1..=policy.max_attempts {
        match source.collect().await {
            Ok(records) if !records.is_empty() => {
                tracing::info!(columns = records.len(), attempt, "Schema collected");
                return records;
            }
            Ok(_) => tracing::debug!(attempt, "Schema collection returned no columns"),
            Err(e) => tracing::warn!(attempt, error = %e, "Schema collection failed"),
        }
        if attempt < policy.max_attempts {
            sleeper.sleep(policy.delay_after(attempt)).await;
        }
    }

    tracing::warn!(attempts = policy.max_attempts, "Schema collection gave up, continuing without a live schema");
    Vec::new()
}

fn identity_key(record: &SchemaColumnRecord) -> (String, String, String) {
    (
        record.schema_name.to_lowercase(),
        record.table_name.to_lowercase(),
        record.column_name.to_lowercase(),
    )
}

/// Merge a fresh observation into the previous records.
///
/// - New columns and columns whose shape changed are `CREATED`.
/// - Columns that were `DELETED` and reappear are `CREATED` again.
/// - Unchanged columns keep their status.
/// - Columns missing from the observation become `DELETED`; records are
///   never dropped.
///
/// An empty observation means collection failed and leaves `previous` as is.
pub fn reconcile(
    previous: &[SchemaColumnRecord],
    observed: Vec<SchemaColumnRecord>,
    datasource_id: Option<&str>,
) -> Vec<SchemaColumnRecord> {
    if observed.is_empty() {
        return previous.to_vec();
    }

    let mut prior: BTreeMap<_, _> = previous
        .iter()
        .map(|r| (identity_key(r), r.clone()))
        .collect();
    let mut merged = BTreeMap::new();

    for mut record in observed {
        let key = identity_key(&record);
        match prior.remove(&key) {
            Some(old) if old.status != SchemaStatus::Deleted && old.same_shape(&record) => {
                record.status = old.status;
                record.status_changed_at = old.status_changed_at;
                record.policy_name = record.policy_name.or(old.policy_name);
            }
            Some(old) => {
                record.policy_name = record.policy_name.or(old.policy_name);
                record.status = old.status;
                record.set_status(SchemaStatus::Created);
            }
            None => record.status = SchemaStatus::Created,
        }
        if let Some(ds) = datasource_id {
            record.datasource_id = Some(ds.to_string());
        }
        merged.insert(key, record);
    }

    for (key, mut gone) in prior {
        gone.set_status(SchemaStatus::Deleted);
        merged.insert(key, gone);
    }

    merged.into_values().collect()
}

/// SHA-256 over the live (non-deleted) records in a stable order.
pub fn fingerprint(records: &[SchemaColumnRecord]) -> String {
    let mut lines: Vec<String> = records
        .iter()
        .filter(|r| r.status != SchemaStatus::Deleted)
        .map(|r| {
            let (schema, table, column) = identity_key(r);
            format!(
                "{schema}.{table}.{column}|{}|{}|{}",
                r.column_type.to_lowercase(),
                r.nullable,
                r.column_default.as_deref().unwrap_or("")
            )
        })
        .collect();
    lines.sort();

    let mut hasher = Sha256::new();
    for line in &lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Outcome of one schema push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Pushed and acknowledged.
    Synced { sent: usize },
    /// Pushed and acknowledged under a hub id the Hub assigned itself.
    Reassigned { sent: usize, hub_id: String },
    /// Fingerprint unchanged since the last success for this identity.
    Skipped,
    /// The Hub does not know this identity; records are kept for the next one.
    NotFound,
    /// Gave up for this cycle.
    Failed(String),
}

/// Owns the schema snapshot and pushes it to the Hub.
pub struct SchemaSyncService {
    hub: Arc<dyn HubApi>,
    store: Option<SchemaSnapshotStore>,
    state: Mutex<SchemaSnapshot>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl SchemaSyncService {
    pub fn new(
        hub: Arc<dyn HubApi>,
        store: Option<SchemaSnapshotStore>,
        retry: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            hub,
            store,
            state: Mutex::new(SchemaSnapshot::default()),
            retry,
            sleeper,
        }
    }

    /// Load the persisted snapshot. Returns whether one was found.
    pub fn load(&self) -> bool {
        let Some(snapshot) = self.store.as_ref().and_then(|s| s.load()) else {
            return false;
        };
        tracing::debug!(records = snapshot.records.len(), "Loaded schema snapshot");
        *self.lock() = snapshot;
        true
    }

    pub fn records(&self) -> Vec<SchemaColumnRecord> {
        self.lock().records.clone()
    }

    /// Apply a fresh observation to the snapshot and persist it.
    pub fn reconcile(&self, observed: Vec<SchemaColumnRecord>, datasource_id: Option<&str>) {
        let snapshot = {
            let mut state = self.lock();
            state.records = reconcile(&state.records, observed, datasource_id);
            state.clone()
        };
        self.persist(&snapshot);
    }

    /// Mark every live record `CREATED`, e.g. after the Hub issued a new identity.
    pub fn mark_all_created(&self) {
        let snapshot = {
            let mut state = self.lock();
            for record in state
                .records
                .iter_mut()
                .filter(|r| r.status == SchemaStatus::Registered)
            {
                record.set_status(SchemaStatus::Created);
            }
            state.clone()
        };
        self.persist(&snapshot);
    }

    /// Push `CREATED` and `DELETED` records for `identity`.
    pub async fn sync_to_hub(&self, identity: &InstanceIdentity) -> SyncOutcome {
        let cache_key = identity.cache_key();
        let (hash, pending) = {
            let state = self.lock();
            let hash = fingerprint(&state.records);
            if state.hashes.get(&cache_key) == Some(&hash) {
                tracing::debug!(hub_id = %identity.hub_id, "Schema unchanged since last sync");
                return SyncOutcome::Skipped;
            }
            let pending: Vec<SchemaColumnRecord> = state
                .records
                .iter()
                .filter(|r| r.status != SchemaStatus::Registered)
                .cloned()
                .map(|mut r| {
                    r.datasource_id = identity.datasource_id.clone().or(r.datasource_id);
                    r
                })
                .collect();
            (hash, pending)
        };

        let sent = pending.len();
        let mut reassigned: Option<String> = None;
        if sent > 0 {
            let request = SchemaSyncRequest {
                instance_id: identity.hub_id.clone(),
                hub_id: identity.hub_id.clone(),
                datasource_id: identity.datasource_id.clone(),
                schemas: pending,
            };
            let result = retry_when(
                &self.retry,
                self.sleeper.as_ref(),
                |_| self.hub.sync_schema(&request),
                |e: &HubError| !e.is_not_found() && !matches!(e, HubError::Disabled),
            )
            .await;

            match result {
                Ok(response) => {
                    reassigned = response
                        .received_hub_id
                        .filter(|received| *received != identity.hub_id);
                }
                Err(HubError::NotFound) => {
                    tracing::info!(hub_id = %identity.hub_id, "Hub does not know this instance, schema kept for re-registration");
                    return SyncOutcome::NotFound;
                }
                Err(e) => {
                    tracing::warn!(hub_id = %identity.hub_id, error = %e, "Schema sync failed");
                    return SyncOutcome::Failed(e.to_string());
                }
            }
        }

        let snapshot = {
            let mut state = self.lock();
            for record in state
                .records
                .iter_mut()
                .filter(|r| r.status == SchemaStatus::Created)
            {
                record.set_status(SchemaStatus::Registered);
                if record.datasource_id.is_none() {
                    record.datasource_id = identity.datasource_id.clone();
                }
            }
            if let Some(received) = &reassigned {
                let mut adopted = identity.clone();
                adopted.hub_id = received.clone();
                state.hashes.insert(adopted.cache_key(), hash.clone());
            }
            state.hashes.insert(cache_key, hash);
            state.clone()
        };
        self.persist(&snapshot);

        match reassigned {
            Some(hub_id) => {
                tracing::info!(sent_hub_id = %identity.hub_id, received_hub_id = %hub_id, sent, "Schema synced under a reassigned hub id");
                SyncOutcome::Reassigned { sent, hub_id }
            }
            None => {
                tracing::info!(hub_id = %identity.hub_id, sent, "Schema synced");
                SyncOutcome::Synced { sent }
            }
        }
    }

    fn persist(&self, snapshot: &SchemaSnapshot) {
        if let Some(store) = &self.store
            && let Err(e) = store.save(snapshot)
        {
            tracing::warn!(error = %e, "Failed to persist schema snapshot");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SchemaSnapshot> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}
