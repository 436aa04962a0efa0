//! Read-path interception.

use crate::context::InterceptionContext;
use crate::driver::{ColumnMetadata, ResultSet, Row, SqlValue};
use crate::error::DriverError;
use async_trait::async_trait;
use cloak_core::{FailureMode, Version};
use cloak_sql::ParsedStatement;
use futures::future::try_join_all;
use std::sync::Arc;

/// Metadata-derived policy for one column, valid for one policy version.
#[derive(Debug, Clone)]
struct FallbackEntry {
    version: Option<Version>,
    policy: Option<String>,
}

/// Decrypts fetched values of protected columns.
///
/// Column identity comes from the parsed statement when it names a table
/// (aliases and ORM labels undone). Otherwise the driver's column metadata
/// is used, cached per column and recomputed when the policy version moves.
pub struct DecryptingResultSet {
    inner: Box<dyn ResultSet>,
    parsed: Arc<ParsedStatement>,
    context: Arc<InterceptionContext>,
    fallback: Vec<Option<FallbackEntry>>,
}

impl DecryptingResultSet {
    pub fn new(
        inner: Box<dyn ResultSet>,
        parsed: Arc<ParsedStatement>,
        context: Arc<InterceptionContext>,
    ) -> Self {
        let columns = inner.metadata().len();
        Self {
            inner,
            parsed,
            context,
            fallback: vec![None; columns],
        }
    }

    fn column_policies(&mut self) -> Vec<Option<String>> {
        let columns = self.inner.metadata();
        if self.fallback.len() < columns.len() {
            self.fallback.resize(columns.len(), None);
        }
        columns
            .iter()
            .zip(self.fallback.iter_mut())
            .map(|(column, cached)| policy_for_column(&self.context, &self.parsed, column, cached))
            .collect()
    }
}

fn policy_for_column(
    context: &InterceptionContext,
    parsed: &ParsedStatement,
    column: &ColumnMetadata,
    cached: &mut Option<FallbackEntry>,
) -> Option<String> {
    if parsed.has_table() {
        return parsed
            .origin_for_label(&column.label)
            .and_then(|origin| context.policy_for_origin(&origin));
    }

    let version = context.policies().current_version();
    if let Some(entry) = cached
        && entry.version == version
    {
        return entry.policy.clone();
    }

    let policy = column.table.as_deref().and_then(|table| {
        let name = column.name.as_deref().unwrap_or(&column.label);
        context.resolve(column.schema.as_deref(), table, name)
    });
    tracing::trace!(label = %column.label, ?version, ?policy, "Resolved column policy from driver metadata");
    *cached = Some(FallbackEntry {
        version,
        policy: policy.clone(),
    });
    policy
}

#[async_trait]
impl ResultSet for DecryptingResultSet {
    fn metadata(&self) -> &[ColumnMetadata] {
        self.inner.metadata()
    }

    async fn next_row(&mut self) -> Result<Option<Row>, DriverError> {
        let Some(mut row) = self.inner.next_row().await? else {
            return Ok(None);
        };

        let policies = self.column_policies();
        for (value, policy) in row.iter_mut().zip(policies) {
            let (Some(policy), SqlValue::Text(text)) = (policy, &*value) else {
                continue;
            };
            let result = self.context.crypto().decrypt(text, &policy, None).await;
            let plain = self.context.recover(result, text, "decrypt")?;
            *value = SqlValue::Text(plain);
        }
        Ok(Some(row))
    }

    /// Drain the remaining rows, decrypting each protected column with one
    /// batch call.
    async fn fetch_all(&mut self) -> Result<Vec<Row>, DriverError> {
        let mut rows = Vec::new();
        while let Some(row) = self.inner.next_row().await? {
            rows.push(row);
        }
        if rows.is_empty() {
            return Ok(rows);
        }

        let policies = self.column_policies();
        let context = &self.context;
        let batches = policies
            .iter()
            .enumerate()
            .filter_map(|(index, policy)| policy.as_deref().map(|p| (index, p)))
            .map(|(index, policy)| {
                let cells: Vec<(usize, String)> = rows
                    .iter()
                    .enumerate()
                    .filter_map(|(r, row)| {
                        row.get(index)
                            .and_then(SqlValue::as_text)
                            .map(|t| (r, t.to_string()))
                    })
                    .collect();
                async move {
                    let values: Vec<String> = cells.iter().map(|(_, v)| v.clone()).collect();
                    let decrypted = match context.crypto().decrypt_batch(&values, policy, None).await {
                        Ok(decrypted) => decrypted,
                        Err(e) if context.failure_mode() == FailureMode::FailOpen => {
                            tracing::warn!(error = %e, policy = %policy, "Batch decrypt failed, returning stored values");
                            values
                        }
                        Err(e) => return Err(DriverError::Encryption(e)),
                    };
                    let cells = cells.into_iter().map(|(r, _)| r).zip(decrypted).collect::<Vec<_>>();
                    Ok::<_, DriverError>((index, cells))
                }
            });

        for (index, cells) in try_join_all(batches).await? {
            for (r, plain) in cells {
                rows[r][index] = SqlValue::Text(plain);
            }
        }
        Ok(rows)
    }
}
