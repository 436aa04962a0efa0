//! `cloak bootstrap` - bring an instance up against the configured Hub.

use super::load_config;
use cloak_adapter_pg::{PgDriver, PgSchemaCollector};
use cloak_core::{CloakConfig, DatasourceMetadata};
use cloak_crypto::CryptoClient;
use cloak_policy::PolicyCache;
use cloak_proxy::{EncryptingConnection, InterceptionContext};
use cloak_runtime::{
    BootstrapOutcome, Bootstrapper, HttpHubClient, IdentityRenewal, InstanceDeps, RunningInstance,
    TokioSleeper,
};
use std::path::Path;
use std::sync::Arc;

pub async fn run(config_path: &Path, watch: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let metadata = config.datasource.metadata();
    let driver = PgDriver::connect(&config.datasource).await?;

    let policies = Arc::new(PolicyCache::persisted(&config.storage.directory));
    let crypto = Arc::new(CryptoClient::http(&config.engine)?);
    let deps = InstanceDeps {
        config: config.clone(),
        metadata: metadata.clone(),
        hub: Arc::new(HttpHubClient::new(&config.hub)?),
        source: Arc::new(PgSchemaCollector::new(
            driver.pool().clone(),
            config.datasource.schema.clone(),
        )),
        policies: Arc::clone(&policies),
        crypto: Arc::clone(&crypto),
        sleeper: Arc::new(TokioSleeper),
    };

    let instance = Bootstrapper::new().bootstrap(deps).await;
    print_summary(&metadata, &instance, &policies);

    if watch {
        let connection = encrypting_connection(&config, driver, &instance, policies, crypto);
        tracing::info!(
            datasource = %metadata.instance_key(),
            schema = %metadata.schema,
            failure_mode = ?config.interception.failure_mode,
            "Interception connection ready"
        );
        println!();
        println!("Mapping sync running, press Ctrl-C to stop.");
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutdown requested, stopping mapping sync");
        instance.shutdown().await;
        cloak_proxy::Connection::close(&connection).await?;
        tracing::info!("Interception connection closed");
        println!("Stopped.");
    } else {
        instance.shutdown().await;
    }

    if let BootstrapOutcome::Inert { reason } = &instance.outcome {
        tracing::error!(reason = %reason, "Bootstrap left the instance inert");
        anyhow::bail!("instance has no usable identity or policy state");
    }
    Ok(())
}

/// The connection an embedding application would use for its statements.
fn encrypting_connection(
    config: &CloakConfig,
    driver: PgDriver,
    instance: &RunningInstance,
    policies: Arc<PolicyCache>,
    crypto: Arc<CryptoClient>,
) -> EncryptingConnection {
    let identity: Arc<dyn IdentityRenewal> = instance.registrar.clone();
    let context = InterceptionContext::new(&config.interception, policies, crypto)
        .with_identity(identity)
        .with_default_schema(config.datasource.schema.clone());
    EncryptingConnection::new(Arc::new(driver), Arc::new(context))
}

fn print_summary(metadata: &DatasourceMetadata, instance: &RunningInstance, policies: &PolicyCache) {
    match &instance.outcome {
        BootstrapOutcome::Ready => println!("✔ Instance ready"),
        BootstrapOutcome::Degraded { reason } => {
            println!("⚠️  Running on persisted state: {reason}")
        }
        BootstrapOutcome::Inert { reason } => println!("✘ Instance inert: {reason}"),
    }
    println!("  Datasource:     {}", metadata.instance_key());
    match instance.identity() {
        Some(identity) => {
            println!("  Hub id:         {}", identity.hub_id);
            println!(
                "  Datasource id:  {}",
                identity.datasource_id.as_deref().unwrap_or("-")
            );
        }
        None => println!("  Hub id:         -"),
    }
    println!(
        "  Policy version: {}",
        policies
            .current_version()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!("  Mappings:       {}", policies.len());
    println!("  Schema columns: {}", instance.schema.records().len());
}
