//! Acquisition and replacement of the Hub-issued identity.

use crate::error::RuntimeError;
use crate::hub::{HubApi, RegisterRequest};
use crate::schema::{SchemaSyncService, SyncOutcome};
use crate::store::IdentityStore;
use async_trait::async_trait;
use cloak_core::{DatasourceMetadata, InstanceIdentity};
use cloak_policy::PolicyCache;
use std::sync::{Arc, RwLock};

/// Callback through which the mapping sync asks for a (new) identity.
///
/// The mapping sync never registers on its own; it only signals.
#[async_trait]
pub trait IdentityRenewal: Send + Sync {
    /// The identity currently in effect.
    fn current(&self) -> Option<InstanceIdentity>;

    /// Register from scratch, replacing any current identity.
    async fn renew(&self) -> Result<InstanceIdentity, RuntimeError>;

    /// Switch to a hub id the Hub assigned on its own.
    fn adopt_hub_id(&self, hub_id: &str) -> Result<InstanceIdentity, RuntimeError>;
}

/// Owns identity acquisition for one logical instance.
///
/// Holds the connection metadata captured at bootstrap so re-registration
/// never has to touch the database again.
pub struct Registrar {
    hub: Arc<dyn HubApi>,
    metadata: DatasourceMetadata,
    alias: Option<String>,
    identities: Arc<IdentityStore>,
    policies: Arc<PolicyCache>,
    schema: Arc<SchemaSyncService>,
    current: RwLock<Option<InstanceIdentity>>,
    renewing: tokio::sync::Mutex<()>,
}

impl Registrar {
    pub fn new(
        hub: Arc<dyn HubApi>,
        metadata: DatasourceMetadata,
        alias: Option<String>,
        identities: Arc<IdentityStore>,
        policies: Arc<PolicyCache>,
        schema: Arc<SchemaSyncService>,
    ) -> Self {
        Self {
            hub,
            metadata,
            alias,
            identities,
            policies,
            schema,
            current: RwLock::new(None),
            renewing: tokio::sync::Mutex::new(()),
        }
    }

    pub fn metadata(&self) -> &DatasourceMetadata {
        &self.metadata
    }

    /// Use an identity loaded from disk.
    pub fn set_current(&self, identity: InstanceIdentity) {
        *self.current.write().unwrap_or_else(|p| p.into_inner()) = Some(identity);
    }

    /// Register the datasource and persist the returned identity.
    ///
    /// Instance id and datasource id arrive in one answer and are stored
    /// together, so a half-registered state is never observable.
    pub async fn register(&self) -> Result<InstanceIdentity, RuntimeError> {
        let request = RegisterRequest {
            vendor: self.metadata.vendor.clone(),
            host: self.metadata.host.clone(),
            port: self.metadata.port,
            database: self.metadata.database.clone(),
            schema: self.metadata.schema.clone(),
            alias: self.alias.clone(),
            current_version: self.policies.current_version(),
        };
        let response = self.hub.register(&request).await?;
        let identity = InstanceIdentity::new(response.hub_id, response.datasource_id, &self.metadata);

        self.identities.save(&identity)?;
        self.set_current(identity.clone());
        tracing::info!(
            hub_id = %identity.hub_id,
            datasource_id = ?identity.datasource_id,
            instance = %identity.instance_key,
            "Instance registered"
        );
        Ok(identity)
    }

    /// Push pending schema records for `identity`, adopting the hub id the
    /// Hub acknowledged them under when it differs.
    pub async fn push_schema(
        &self,
        identity: &InstanceIdentity,
    ) -> Result<(InstanceIdentity, SyncOutcome), RuntimeError> {
        let outcome = self.schema.sync_to_hub(identity).await;
        let identity = match &outcome {
            SyncOutcome::Reassigned { hub_id, .. } => self.adopt_hub_id(hub_id)?,
            _ => identity.clone(),
        };
        Ok((identity, outcome))
    }

    /// Register, then push pending schema records under the new identity.
    pub async fn register_and_push(&self) -> Result<(InstanceIdentity, SyncOutcome), RuntimeError> {
        let identity = self.register().await?;
        let (identity, outcome) = self.push_schema(&identity).await?;
        if outcome == SyncOutcome::NotFound {
            tracing::warn!(hub_id = %identity.hub_id, "Freshly issued identity rejected by schema sync");
        }
        Ok((identity, outcome))
    }

    /// Full re-registration: new identity, version reset, every live column
    /// re-announced.
    pub async fn reregister(&self) -> Result<(InstanceIdentity, SyncOutcome), RuntimeError> {
        let _guard = self.renewing.lock().await;
        let previous = self.current().map(|i| i.hub_id);

        self.policies.reset_version()?;
        self.schema.mark_all_created();
        let (identity, outcome) = self.register_and_push().await?;

        tracing::info!(
            previous_hub_id = ?previous,
            hub_id = %identity.hub_id,
            "Instance re-registered"
        );
        Ok((identity, outcome))
    }
}

#[async_trait]
impl IdentityRenewal for Registrar {
    fn current(&self) -> Option<InstanceIdentity> {
        self.current.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    async fn renew(&self) -> Result<InstanceIdentity, RuntimeError> {
        let (identity, _) = self.reregister().await?;
        Ok(identity)
    }

    fn adopt_hub_id(&self, hub_id: &str) -> Result<InstanceIdentity, RuntimeError> {
        let mut identity = match self.current() {
            Some(current) => current,
            None => InstanceIdentity::new(hub_id, None, &self.metadata),
        };
        let previous = std::mem::replace(&mut identity.hub_id, hub_id.to_string());
        self.identities.save(&identity)?;
        self.set_current(identity.clone());
        tracing::info!(previous_hub_id = %previous, hub_id = %hub_id, "Adopted hub id assigned by the Hub");
        Ok(identity)
    }
}
