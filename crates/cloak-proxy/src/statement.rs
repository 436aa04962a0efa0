//! Write-path interception.

use crate::context::InterceptionContext;
use crate::driver::{PreparedStatement, ResultSet, SqlValue};
use crate::error::DriverError;
use crate::result_set::DecryptingResultSet;
use async_trait::async_trait;
use cloak_sql::ParsedStatement;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Encrypts bound parameters that land in, or are compared against,
/// protected columns.
///
/// Both forms of every parameter encrypted for a written column are kept by
/// position so a write rejected as too long can be retried once with the
/// original values, after which the ciphertext is bound again.
pub struct EncryptingStatement {
    inner: Box<dyn PreparedStatement>,
    parsed: Arc<ParsedStatement>,
    context: Arc<InterceptionContext>,
    sealed: BTreeMap<usize, Sealed>,
}

#[derive(Debug, Clone)]
struct Sealed {
    plaintext: SqlValue,
    ciphertext: SqlValue,
}

impl EncryptingStatement {
    pub fn new(
        inner: Box<dyn PreparedStatement>,
        parsed: Arc<ParsedStatement>,
        context: Arc<InterceptionContext>,
    ) -> Self {
        Self {
            inner,
            parsed,
            context,
            sealed: BTreeMap::new(),
        }
    }

    pub fn parsed(&self) -> &ParsedStatement {
        &self.parsed
    }

    /// Positions currently bound to ciphertext.
    pub fn tracked_positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.sealed.keys().copied()
    }

    async fn encrypt_written(
        &self,
        position: usize,
        plaintext: &str,
    ) -> Result<Option<String>, DriverError> {
        let Some(target) = self.parsed.write_target(position) else {
            return Ok(None);
        };
        let Some(policy) = self.context.policy_for_target(target) else {
            return Ok(None);
        };
        match self.context.crypto().detector().policy_id(plaintext) {
            Some(id) if id == policy => {
                tracing::debug!(position, column = %target.column, "Parameter already encrypted");
                return Ok(None);
            }
            Some(id) => {
                tracing::debug!(position, column = %target.column, envelope = %id, policy = %policy, "Parameter sealed for another policy, encrypting");
            }
            None => {}
        }

        let result = self.context.crypto().encrypt(plaintext, &policy).await;
        let value = self.context.recover(result, plaintext, "encrypt")?;
        Ok(Some(value))
    }

    async fn encrypt_filter(
        &self,
        position: usize,
        plaintext: &str,
    ) -> Result<Option<String>, DriverError> {
        let Some(target) = self.parsed.filter_target(position) else {
            return Ok(None);
        };
        let Some(policy) = self.context.policy_for_target(target) else {
            return Ok(None);
        };
        if !self.context.crypto().is_deterministic(&policy) {
            tracing::debug!(position, policy = %policy, "Filter on non-deterministic policy left as plaintext");
            return Ok(None);
        }

        let result = self
            .context
            .crypto()
            .encrypt_for_search(plaintext, &policy)
            .await;
        let value = self.context.recover(result, plaintext, "encrypt_for_search")?;
        Ok(Some(value))
    }

    async fn rebind(&mut self, plaintext: bool) -> Result<(), DriverError> {
        for (position, sealed) in &self.sealed {
            let value = if plaintext {
                &sealed.plaintext
            } else {
                &sealed.ciphertext
            };
            self.inner.bind(*position, value.clone()).await?;
        }
        Ok(())
    }

    async fn retry_with_plaintext(&mut self, error: DriverError) -> Result<u64, DriverError> {
        if let Err(e) = self.rebind(true).await {
            tracing::warn!(error = %e, "Could not restore plaintext parameters");
            return Err(error);
        }
        match self.inner.execute_update().await {
            Ok(rows) => Ok(rows),
            Err(retry_error) => {
                tracing::warn!(error = %retry_error, "Plaintext retry failed");
                Err(error)
            }
        }
    }
}

#[async_trait]
impl PreparedStatement for EncryptingStatement {
    fn sql(&self) -> &str {
        self.inner.sql()
    }

    async fn bind(&mut self, position: usize, value: SqlValue) -> Result<(), DriverError> {
        self.sealed.remove(&position);

        let Some(text) = value.as_text() else {
            return self.inner.bind(position, value).await;
        };

        if let Some(ciphertext) = self.encrypt_written(position, text).await? {
            let ciphertext = SqlValue::Text(ciphertext);
            if ciphertext != value {
                self.sealed.insert(
                    position,
                    Sealed {
                        plaintext: value.clone(),
                        ciphertext: ciphertext.clone(),
                    },
                );
            }
            return self.inner.bind(position, ciphertext).await;
        }
        if let Some(search_value) = self.encrypt_filter(position, text).await? {
            return self.inner.bind(position, SqlValue::Text(search_value)).await;
        }
        self.inner.bind(position, value).await
    }

    fn clear_parameters(&mut self) {
        self.sealed.clear();
        self.inner.clear_parameters();
    }

    async fn execute_update(&mut self) -> Result<u64, DriverError> {
        let error = match self.inner.execute_update().await {
            Ok(rows) => return Ok(rows),
            Err(e) if e.is_value_too_long() && !self.sealed.is_empty() => e,
            Err(e) => return Err(e),
        };

        let positions: Vec<usize> = self.tracked_positions().collect();
        tracing::warn!(
            ?positions,
            error = %error,
            "Ciphertext too long for column, retrying once with plaintext"
        );
        let result = self.retry_with_plaintext(error).await;
        if let Err(e) = self.rebind(false).await {
            tracing::warn!(error = %e, "Could not rebind ciphertext after retry");
        }
        result
    }

    async fn execute_query(&mut self) -> Result<Box<dyn ResultSet>, DriverError> {
        let inner = self.inner.execute_query().await?;
        Ok(Box::new(DecryptingResultSet::new(
            inner,
            Arc::clone(&self.parsed),
            Arc::clone(&self.context),
        )))
    }
}
