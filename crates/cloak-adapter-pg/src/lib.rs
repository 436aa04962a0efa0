//! # cloak-adapter-pg
//!
//! PostgreSQL implementations of the seams Cloak needs from a database:
//! [`PgSchemaCollector`] feeds schema sync, [`PgDriver`] implements the
//! driver traits the interceptors decorate.
//!
//! Postgres reports a result column's source as a relation oid and attribute
//! number. [`PgDriver`] resolves those through the catalog once per statement
//! so [`ColumnMetadata`] carries schema, table and column for statements the
//! parser cannot analyze. Computed columns have no source and stay unnamed.

use async_trait::async_trait;
use cloak_core::DatasourceConfig;
use cloak_proxy::{
    ColumnMetadata, Connection, DriverError, PreparedStatement, ResultSet, Row, SqlValue,
};
use sqlx::postgres::{PgArguments, PgColumn, PgPoolOptions, PgRow};
use sqlx::{Arguments, Column, PgPool, Row as _};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

pub mod introspect;

pub use introspect::PgSchemaCollector;

/// SQLSTATE `string_data_right_truncation`.
const VALUE_TOO_LONG: &str = "22001";

const COLUMN_ORIGINS_QUERY: &str = r#"
SELECT a.attrelid::int8 AS relation_id,
       a.attnum AS attribute_no,
       n.nspname AS schema_name,
       c.relname AS table_name,
       a.attname AS column_name
FROM pg_catalog.pg_attribute a
JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE a.attrelid::int8 = ANY($1)
  AND a.attnum > 0
"#;

/// Catalog position of a result column: relation oid and attribute number.
type Relation = (u32, i16);

/// Where a result column is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ColumnOrigin {
    schema: String,
    table: String,
    column: String,
}

fn args_add<T>(args: &mut PgArguments, v: T) -> Result<(), DriverError>
where
    T: Send + Sync + 'static,
    for<'q> T: sqlx::Encode<'q, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    args.add(v).map_err(|e| DriverError::database(e.to_string()))
}

/// Translate a sqlx error, recognising value-too-long rejections.
pub fn map_sqlx_error(err: sqlx::Error) -> DriverError {
    match &err {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.to_string());
            if code.as_deref() == Some(VALUE_TOO_LONG) {
                DriverError::ValueTooLong(db.message().to_string())
            } else {
                DriverError::Database {
                    code,
                    message: db.message().to_string(),
                }
            }
        }
        sqlx::Error::PoolClosed => DriverError::Closed,
        _ => DriverError::database(err.to_string()),
    }
}

/// Pool-backed driver.
#[derive(Clone)]
pub struct PgDriver {
    pool: PgPool,
}

impl PgDriver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatasourceConfig) -> anyhow::Result<Self> {
        let pool_config = config.pool_config();
        let pool = PgPoolOptions::new()
            .min_connections(pool_config.min_connections)
            .max_connections(pool_config.max_connections)
            .acquire_timeout(Duration::from_secs(pool_config.acquire_timeout_seconds.into()))
            .connect(&config.connection_string())
            .await?;
        tracing::info!(
            max_connections = pool_config.max_connections,
            "Connected to Postgres"
        );
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Connection for PgDriver {
    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>, DriverError> {
        if self.pool.is_closed() {
            return Err(DriverError::Closed);
        }
        Ok(Box::new(PgStatement {
            pool: self.pool.clone(),
            sql: sql.to_string(),
            numbered: cloak_sql::numbered_placeholders(sql),
            params: BTreeMap::new(),
            origins: HashMap::new(),
        }))
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.pool.close().await;
        Ok(())
    }
}

struct PgStatement {
    pool: PgPool,
    sql: String,
    numbered: String,
    params: BTreeMap<usize, SqlValue>,
    origins: HashMap<Relation, ColumnOrigin>,
}

impl PgStatement {
    fn arguments(&self) -> Result<PgArguments, DriverError> {
        let mut args = PgArguments::default();
        let count = self.params.keys().next_back().copied().unwrap_or(0);
        for position in 1..=count {
            match self.params.get(&position) {
                None | Some(SqlValue::Null) => args_add(&mut args, None::<String>)?,
                Some(SqlValue::Text(v)) => args_add(&mut args, v.clone())?,
                Some(SqlValue::Int(v)) => args_add(&mut args, *v)?,
                Some(SqlValue::Float(v)) => args_add(&mut args, *v)?,
                Some(SqlValue::Bool(v)) => args_add(&mut args, *v)?,
                Some(SqlValue::Bytes(v)) => args_add(&mut args, v.clone())?,
            }
        }
        Ok(args)
    }

    /// Look up catalog names for relations not seen by this statement yet.
    async fn resolve_origins(&mut self, relations: &[Relation]) -> Result<(), DriverError> {
        let mut missing: Vec<i64> = relations
            .iter()
            .filter(|r| !self.origins.contains_key(r))
            .map(|(oid, _)| i64::from(*oid))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        missing.sort_unstable();
        missing.dedup();

        let rows: Vec<(i64, i16, String, String, String)> = sqlx::query_as(COLUMN_ORIGINS_QUERY)
            .bind(missing)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        for (relation_id, attribute_no, schema, table, column) in rows {
            let Ok(oid) = u32::try_from(relation_id) else {
                continue;
            };
            self.origins.insert(
                (oid, attribute_no),
                ColumnOrigin {
                    schema,
                    table,
                    column,
                },
            );
        }
        tracing::trace!(resolved = self.origins.len(), "Resolved result column origins");
        Ok(())
    }
}

fn relation_of(column: &PgColumn) -> Option<Relation> {
    Some((column.relation_id()?.0, column.relation_attribute_no()?))
}

fn column_metadata(
    label: &str,
    relation: Option<Relation>,
    origins: &HashMap<Relation, ColumnOrigin>,
) -> ColumnMetadata {
    match relation.and_then(|r| origins.get(&r)) {
        Some(origin) => ColumnMetadata {
            label: label.to_string(),
            name: Some(origin.column.clone()),
            table: Some(origin.table.clone()),
            schema: Some(origin.schema.clone()),
        },
        None => ColumnMetadata::labelled(label),
    }
}

#[async_trait]
impl PreparedStatement for PgStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    async fn bind(&mut self, position: usize, value: SqlValue) -> Result<(), DriverError> {
        if position == 0 {
            return Err(DriverError::ParameterIndex(position));
        }
        self.params.insert(position, value);
        Ok(())
    }

    fn clear_parameters(&mut self) {
        self.params.clear();
    }

    async fn execute_update(&mut self) -> Result<u64, DriverError> {
        let args = self.arguments()?;
        let result = sqlx::query_with(&self.numbered, args)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn execute_query(&mut self) -> Result<Box<dyn ResultSet>, DriverError> {
        let args = self.arguments()?;
        let rows = sqlx::query_with(&self.numbered, args)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let described: Vec<(String, Option<Relation>)> = rows
            .first()
            .map(|row| {
                row.columns()
                    .iter()
                    .map(|c| (c.name().to_string(), relation_of(c)))
                    .collect()
            })
            .unwrap_or_default();
        let relations: Vec<Relation> = described.iter().filter_map(|(_, r)| *r).collect();
        if let Err(e) = self.resolve_origins(&relations).await {
            tracing::warn!(error = %e, "Could not resolve result column origins");
        }
        let columns = described
            .iter()
            .map(|(label, relation)| column_metadata(label, *relation, &self.origins))
            .collect();
        let rows = rows.iter().map(decode_row).collect();
        Ok(Box::new(PgResultSet { columns, rows }))
    }
}

fn decode_row(row: &PgRow) -> Row {
    (0..row.len())
        .map(|i| {
            if let Ok(v) = row.try_get::<Option<String>, _>(i) {
                return v.map(SqlValue::Text).unwrap_or(SqlValue::Null);
            }
            row.try_get::<i64, _>(i)
                .map(SqlValue::Int)
                .or_else(|_| row.try_get::<i32, _>(i).map(|v| SqlValue::Int(v.into())))
                .or_else(|_| row.try_get::<i16, _>(i).map(|v| SqlValue::Int(v.into())))
                .or_else(|_| row.try_get::<f64, _>(i).map(SqlValue::Float))
                .or_else(|_| row.try_get::<bool, _>(i).map(SqlValue::Bool))
                .or_else(|_| row.try_get::<Vec<u8>, _>(i).map(SqlValue::Bytes))
                .or_else(|_| {
                    row.try_get::<chrono::NaiveDateTime, _>(i)
                        .map(|v| SqlValue::Text(v.to_string()))
                })
                .or_else(|_| {
                    row.try_get::<uuid::Uuid, _>(i)
                        .map(|v| SqlValue::Text(v.to_string()))
                })
                .or_else(|_| {
                    row.try_get::<serde_json::Value, _>(i)
                        .map(|v| SqlValue::Text(v.to_string()))
                })
                .unwrap_or(SqlValue::Null)
        })
        .collect()
}

struct PgResultSet {
    columns: Vec<ColumnMetadata>,
    rows: VecDeque<Row>,
}

#[async_trait]
impl ResultSet for PgResultSet {
    fn metadata(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    async fn next_row(&mut self) -> Result<Option<Row>, DriverError> {
        Ok(self.rows.pop_front())
    }
}
