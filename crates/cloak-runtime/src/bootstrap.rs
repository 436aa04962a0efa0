//! Per-instance bootstrap.
//!
//! Runs once per logical instance (one physical database as identified by
//! [`DatasourceMetadata::instance_key`]):
//!
//! 1. collect the live schema
//! 2. load persisted identity, policies, endpoint and schema snapshot
//! 3. reconcile column lifecycle statuses
//! 4. without an identity: register, then push `CREATED` columns
//! 5. with an identity: push `CREATED` columns; on 404 re-register and push
//!    again under the new identity
//! 6. apply persisted endpoint and policy attributes, run one mapping check
//!    and start the recurring sync
//!
//! Concurrent callers for the same instance share one execution and all
//! receive its [`RunningInstance`].

use crate::hub::HubApi;
use crate::mapping_sync::{MappingSync, MappingSyncHandle, TickOutcome};
use crate::registration::{IdentityRenewal, Registrar};
use crate::retry::{RetryPolicy, Sleeper};
use crate::schema::{SchemaSource, SchemaSyncService, SyncOutcome, collect_with_retry};
use crate::store::{EndpointStore, IdentityStore, SchemaSnapshotStore};
use cloak_core::{CloakConfig, DatasourceMetadata, InstanceIdentity};
use cloak_crypto::CryptoClient;
use cloak_policy::PolicyCache;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

/// How usable the instance is after bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Identity confirmed with the Hub, policies current.
    Ready,
    /// Hub unreachable, but persisted identity/endpoint/policies are in use.
    Degraded { reason: String },
    /// Nothing usable yet; the recurring sync keeps trying.
    Inert { reason: String },
}

impl BootstrapOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, BootstrapOutcome::Ready)
    }
}

/// Collaborators for one instance. The shared caches are owned by the
/// caller so the interception layer can hold the same `Arc`s.
pub struct InstanceDeps {
    pub config: CloakConfig,
    pub metadata: DatasourceMetadata,
    pub hub: Arc<dyn HubApi>,
    pub source: Arc<dyn SchemaSource>,
    pub policies: Arc<PolicyCache>,
    pub crypto: Arc<CryptoClient>,
    pub sleeper: Arc<dyn Sleeper>,
}

/// A bootstrapped instance and its background sync.
pub struct RunningInstance {
    pub outcome: BootstrapOutcome,
    pub metadata: DatasourceMetadata,
    pub registrar: Arc<Registrar>,
    pub schema: Arc<SchemaSyncService>,
    pub mapping_sync: Arc<MappingSync>,
    handle: Option<MappingSyncHandle>,
}

impl RunningInstance {
    pub fn identity(&self) -> Option<InstanceIdentity> {
        self.registrar.current()
    }

    pub fn is_syncing(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| h.is_running())
    }

    /// Stop the recurring sync.
    pub async fn shutdown(&self) {
        if let Some(handle) = &self.handle {
            handle.shutdown().await;
        }
    }
}

/// Deduplicates bootstrap per instance key.
///
/// Instances sharing a state directory also share one [`IdentityStore`], so
/// their identities land in the same document without overwriting each other.
#[derive(Default)]
pub struct Bootstrapper {
    instances: Mutex<HashMap<String, Arc<OnceCell<Arc<RunningInstance>>>>>,
    identity_stores: Mutex<HashMap<PathBuf, Arc<IdentityStore>>>,
}

impl Bootstrapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bootstrap the instance described by `deps`, or join the execution
    /// already started for the same database.
    pub async fn bootstrap(&self, deps: InstanceDeps) -> Arc<RunningInstance> {
        let key = deps.metadata.instance_key();
        let cell = {
            let mut instances = self.instances.lock().unwrap_or_else(|p| p.into_inner());
            Arc::clone(instances.entry(key.clone()).or_default())
        };

        let instance = cell
            .get_or_init(|| async move {
                tracing::info!(instance = %key, "Bootstrapping instance");
                let identities = self.identity_store(&deps.config.storage.directory);
                Arc::new(run(deps, identities).await)
            })
            .await;
        Arc::clone(instance)
    }

    fn identity_store(&self, directory: &Path) -> Arc<IdentityStore> {
        let mut stores = self
            .identity_stores
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        Arc::clone(
            stores
                .entry(directory.to_path_buf())
                .or_insert_with(|| Arc::new(IdentityStore::new(directory))),
        )
    }
}

async fn run(deps: InstanceDeps, identities: Arc<IdentityStore>) -> RunningInstance {
    let InstanceDeps {
        config,
        metadata,
        hub,
        source,
        policies,
        crypto,
        sleeper,
    } = deps;
    let directory = &config.storage.directory;

    let endpoints = Arc::new(EndpointStore::new(directory));
    let schema = Arc::new(SchemaSyncService::new(
        Arc::clone(&hub),
        Some(SchemaSnapshotStore::new(directory)),
        RetryPolicy::linear(config.sync.push_attempts, config.sync.push_backoff()),
        Arc::clone(&sleeper),
    ));
    let registrar = Arc::new(Registrar::new(
        Arc::clone(&hub),
        metadata.clone(),
        config.hub.alias.clone(),
        identities.clone(),
        Arc::clone(&policies),
        Arc::clone(&schema),
    ));

    // 1. live schema
    let collect_policy =
        RetryPolicy::fixed(config.sync.collect_attempts, config.sync.collect_delay());
    let observed = collect_with_retry(source.as_ref(), &collect_policy, sleeper.as_ref()).await;

    // 2. persisted state
    let identity = identities.load(&metadata.instance_key());
    let had_policies = policies.persisted_reload();
    let endpoint = endpoints.load();
    schema.load();

    if let Some(endpoint) = &endpoint {
        crypto.apply_endpoint(endpoint.clone());
    }
    crypto.set_policy_attributes(policies.snapshot().attributes.values().cloned());

    // 3. lifecycle
    schema.reconcile(
        observed,
        identity.as_ref().and_then(|i| i.datasource_id.as_deref()),
    );

    // 4 / 5. identity and schema push
    let mut hub_error: Option<String> = None;
    if let Some(identity) = &identity {
        registrar.set_current(identity.clone());
    }
    if !config.hub.enabled {
        hub_error = Some("hub disabled in configuration".to_string());
    } else {
        let pushed = match &identity {
            None => registrar.register_and_push().await.map(|(_, outcome)| outcome),
            Some(identity) => match registrar.push_schema(identity).await {
                Ok((_, SyncOutcome::NotFound)) => {
                    registrar.reregister().await.map(|(_, outcome)| outcome)
                }
                other => other.map(|(_, outcome)| outcome),
            },
        };
        match pushed {
            Ok(SyncOutcome::Failed(reason)) => hub_error = Some(reason),
            Ok(_) => {}
            Err(e) => hub_error = Some(e.to_string()),
        }
    }

    // 6. mapping sync
    let mapping_sync = Arc::new(MappingSync::new(
        Arc::clone(&hub),
        registrar.clone() as Arc<dyn IdentityRenewal>,
        Arc::clone(&policies),
        Arc::clone(&crypto),
        endpoints,
        config.hub.alias.clone(),
        config.sync.interval(),
    )
    .with_schema(Arc::clone(&schema)));

    let handle = if config.hub.enabled {
        if registrar.current().is_some()
            && let TickOutcome::Failed(reason) = mapping_sync.tick().await
        {
            hub_error.get_or_insert(reason);
        }
        Some(Arc::clone(&mapping_sync).spawn())
    } else {
        None
    };

    let usable_offline = registrar.current().is_some() || crypto.endpoint().is_some() || had_policies;
    let outcome = match hub_error {
        None if registrar.current().is_some() => BootstrapOutcome::Ready,
        Some(reason) if usable_offline => BootstrapOutcome::Degraded { reason },
        reason => BootstrapOutcome::Inert {
            reason: reason.unwrap_or_else(|| "no identity available".to_string()),
        },
    };

    match &outcome {
        BootstrapOutcome::Ready => tracing::info!(
            hub_id = ?registrar.current().map(|i| i.hub_id),
            policy_version = ?policies.current_version(),
            "Instance ready"
        ),
        BootstrapOutcome::Degraded { reason } => {
            tracing::warn!(reason = %reason, "Instance running on persisted state")
        }
        BootstrapOutcome::Inert { reason } => {
            tracing::warn!(reason = %reason, "Instance inert until the Hub is reachable")
        }
    }

    RunningInstance {
        outcome,
        metadata,
        registrar,
        schema,
        mapping_sync,
        handle,
    }
}
