//! `cloak schema snapshot` - print the live schema as the Hub would receive it.

use super::load_config;
use cloak_adapter_pg::{PgDriver, PgSchemaCollector};
use cloak_runtime::SchemaSource;
use std::path::Path;

pub async fn snapshot(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let driver = PgDriver::connect(&config.datasource).await?;
    let collector = PgSchemaCollector::new(driver.pool().clone(), config.datasource.schema.clone());

    let records = collector.collect().await?;
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}
