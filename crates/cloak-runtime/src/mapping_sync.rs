//! Periodic policy version check.

use crate::error::HubError;
use crate::hub::{CheckOutcome, CheckRequest, HubApi};
use crate::registration::IdentityRenewal;
use crate::schema::{SchemaSyncService, SyncOutcome};
use crate::store::EndpointStore;
use cloak_core::{InstanceIdentity, Version};
use cloak_crypto::CryptoClient;
use cloak_policy::PolicyCache;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// 304 with the version we already have.
    Unchanged,
    /// 304 carrying a different version; stamped without fetching.
    Stamped(Version),
    /// Full snapshot fetched and applied.
    Refreshed(Option<Version>),
    /// 404 handled by re-registration.
    Reregistered(String),
    /// No identity yet; one was acquired.
    Registered(String),
    /// Logged and swallowed.
    Failed(String),
}

/// Keeps the policy cache, policy attributes and crypto endpoint current.
///
/// With a schema service attached, each tick also pushes schema records the
/// Hub has not acknowledged yet; unchanged schema costs no request.
pub struct MappingSync {
    hub: Arc<dyn HubApi>,
    renewal: Arc<dyn IdentityRenewal>,
    schema: Option<Arc<SchemaSyncService>>,
    policies: Arc<PolicyCache>,
    crypto: Arc<CryptoClient>,
    endpoints: Arc<EndpointStore>,
    alias: Option<String>,
    interval: Duration,
}

impl MappingSync {
    pub fn new(
        hub: Arc<dyn HubApi>,
        renewal: Arc<dyn IdentityRenewal>,
        policies: Arc<PolicyCache>,
        crypto: Arc<CryptoClient>,
        endpoints: Arc<EndpointStore>,
        alias: Option<String>,
        interval: Duration,
    ) -> Self {
        Self {
            hub,
            renewal,
            schema: None,
            policies,
            crypto,
            endpoints,
            alias,
            interval,
        }
    }

    pub fn with_schema(mut self, schema: Arc<SchemaSyncService>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Run one check. Never fails; problems are logged and reported.
    pub async fn tick(&self) -> TickOutcome {
        let Some(mut identity) = self.renewal.current() else {
            return match self.renewal.renew().await {
                Ok(identity) => TickOutcome::Registered(identity.hub_id),
                Err(e) => {
                    tracing::warn!(error = %e, "Registration attempt from mapping sync failed");
                    TickOutcome::Failed(e.to_string())
                }
            };
        };

        if let Some(schema) = &self.schema {
            match schema.sync_to_hub(&identity).await {
                SyncOutcome::NotFound => return self.on_not_found(&identity).await,
                SyncOutcome::Reassigned { hub_id, .. } => {
                    match self.renewal.adopt_hub_id(&hub_id) {
                        Ok(adopted) => identity = adopted,
                        Err(e) => tracing::warn!(error = %e, "Failed to adopt new hub id"),
                    }
                }
                // Failures were logged; pending records go out on the next tick.
                _ => {}
            }
        }

        let request = CheckRequest {
            instance_id: identity.hub_id.clone(),
            current_version: self.policies.current_version(),
            alias: self.alias.clone(),
            datasource_id: identity.datasource_id.clone(),
        };

        match self.hub.check_mappings(&request).await {
            Ok(CheckOutcome::Unchanged { current_version }) => {
                self.on_unchanged(current_version)
            }
            Ok(CheckOutcome::Changed {
                reregistered_hub_id,
            }) => self.on_changed(identity, reregistered_hub_id).await,
            Ok(CheckOutcome::NotFound) => self.on_not_found(&identity).await,
            Err(e) => {
                tracing::warn!(hub_id = %identity.hub_id, error = %e, "Mapping check failed");
                TickOutcome::Failed(e.to_string())
            }
        }
    }

    fn on_unchanged(&self, current_version: Option<Version>) -> TickOutcome {
        let local = self.policies.current_version();
        match current_version {
            Some(version) if Some(version) != local => {
                if let Err(e) = self.policies.set_version(version) {
                    tracing::warn!(error = %e, "Failed to persist stamped policy version");
                }
                tracing::debug!(version, "Mappings unchanged, version stamped");
                TickOutcome::Stamped(version)
            }
            _ => {
                tracing::debug!(version = ?local, "Mappings unchanged");
                TickOutcome::Unchanged
            }
        }
    }

    async fn on_changed(
        &self,
        mut identity: InstanceIdentity,
        reregistered_hub_id: Option<String>,
    ) -> TickOutcome {
        if let Some(new_id) = reregistered_hub_id
            && new_id != identity.hub_id
        {
            match self.renewal.adopt_hub_id(&new_id) {
                Ok(adopted) => identity = adopted,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to adopt new hub id");
                    return TickOutcome::Failed(e.to_string());
                }
            }
        }

        let snapshot = match self
            .hub
            .fetch_policies(&identity.hub_id, self.policies.current_version())
            .await
        {
            Ok(snapshot) => snapshot,
            Err(HubError::NotFound) => return self.on_not_found(&identity).await,
            Err(e) => {
                tracing::warn!(hub_id = %identity.hub_id, error = %e, "Policy snapshot fetch failed");
                return TickOutcome::Failed(e.to_string());
            }
        };

        let version = snapshot.version;
        self.crypto.set_policy_attributes(snapshot.policies.clone());
        if let Err(e) = self
            .policies
            .refresh(snapshot.mappings, snapshot.policies, version)
        {
            tracing::warn!(error = %e, "Failed to persist policy snapshot");
        }

        if let Some(mut endpoint) = snapshot.endpoint {
            endpoint.hub_id.get_or_insert_with(|| identity.hub_id.clone());
            if endpoint.version.is_none() {
                endpoint.version = version;
            }
            if let Err(e) = self.endpoints.save(&endpoint) {
                tracing::warn!(error = %e, "Failed to persist engine endpoint");
            }
            self.crypto.apply_endpoint(endpoint);
        }

        TickOutcome::Refreshed(version)
    }

    async fn on_not_found(&self, identity: &InstanceIdentity) -> TickOutcome {
        tracing::info!(hub_id = %identity.hub_id, "Hub no longer knows this instance, re-registering");
        match self.renewal.renew().await {
            Ok(renewed) => TickOutcome::Reregistered(renewed.hub_id),
            Err(e) => {
                tracing::warn!(error = %e, "Re-registration failed");
                TickOutcome::Failed(e.to_string())
            }
        }
    }

    /// Start the recurring check. The first run happens one interval from now.
    pub fn spawn(self: Arc<Self>) -> MappingSyncHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let period = self.interval;

        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let outcome = self.tick().await;
                        tracing::trace!(?outcome, "Mapping sync tick");
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Mapping sync stopped");
        });

        tracing::info!(interval_secs = period.as_secs(), "Mapping sync started");
        MappingSyncHandle {
            shutdown: shutdown_tx,
            task: Mutex::new(Some(task)),
        }
    }
}

/// Stops the background check when asked.
pub struct MappingSyncHandle {
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MappingSyncHandle {
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let task = self.task.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            tracing::warn!(error = %e, "Mapping sync task ended abnormally");
        }
    }
}
