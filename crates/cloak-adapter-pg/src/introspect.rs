use async_trait::async_trait;
use cloak_core::SchemaColumnRecord;
use cloak_runtime::SchemaSource;
use sqlx::{PgPool, Row};

/// Collects the columns of every base table in one schema.
pub struct PgSchemaCollector {
    pool: PgPool,
    schema: String,
}

impl PgSchemaCollector {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }
}

#[async_trait]
impl SchemaSource for PgSchemaCollector {
    async fn collect(&self) -> anyhow::Result<Vec<SchemaColumnRecord>> {
        let rows = sqlx::query(
            r#"
            select c.table_schema, c.table_name, c.column_name, c.data_type,
                   c.is_nullable, c.column_default
            from information_schema.columns c
            join information_schema.tables t
              on t.table_schema = c.table_schema
             and t.table_name = c.table_name
            where t.table_type = 'BASE TABLE'
              and c.table_schema = $1
            order by c.table_name, c.ordinal_position
            "#,
        )
        .bind(&self.schema)
        .fetch_all(&self.pool)
        .await?;

        let records: Vec<SchemaColumnRecord> = rows
            .iter()
            .map(|row| {
                let is_nullable: String = row.get("is_nullable");
                SchemaColumnRecord::observed(
                    row.get::<String, _>("table_schema"),
                    row.get::<String, _>("table_name"),
                    row.get::<String, _>("column_name"),
                    row.get::<String, _>("data_type"),
                    is_nullable == "YES",
                    row.get::<Option<String>, _>("column_default"),
                )
            })
            .collect();

        tracing::debug!(schema = %self.schema, columns = records.len(), "Collected Postgres schema");
        Ok(records)
    }
}
