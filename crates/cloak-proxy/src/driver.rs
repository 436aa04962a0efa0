//! Driver abstraction the interceptors decorate.
//!
//! Positions are 1-based, like SQL placeholders. Column indexes are
//! 0-based, like `Vec` indexes.

use crate::error::DriverError;
use async_trait::async_trait;

/// A bound parameter or fetched value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl SqlValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

/// What the driver knows about one result column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMetadata {
    /// Label as it appears in the result (alias if one was given).
    pub label: String,
    /// Underlying column name, when the driver reports it.
    pub name: Option<String>,
    /// Source table, when the driver reports it.
    pub table: Option<String>,
    pub schema: Option<String>,
}

impl ColumnMetadata {
    pub fn labelled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn from_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }
}

pub type Row = Vec<SqlValue>;

#[async_trait]
pub trait Connection: Send + Sync {
    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>, DriverError>;

    async fn close(&self) -> Result<(), DriverError>;
}

#[async_trait]
pub trait PreparedStatement: Send + Sync {
    fn sql(&self) -> &str;

    async fn bind(&mut self, position: usize, value: SqlValue) -> Result<(), DriverError>;

    fn clear_parameters(&mut self);

    /// Run a write; returns affected rows.
    async fn execute_update(&mut self) -> Result<u64, DriverError>;

    async fn execute_query(&mut self) -> Result<Box<dyn ResultSet>, DriverError>;
}

#[async_trait]
pub trait ResultSet: Send + Sync {
    fn metadata(&self) -> &[ColumnMetadata];

    async fn next_row(&mut self) -> Result<Option<Row>, DriverError>;

    /// Drain the remaining rows.
    async fn fetch_all(&mut self) -> Result<Vec<Row>, DriverError> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row().await? {
            rows.push(row);
        }
        Ok(rows)
    }
}
