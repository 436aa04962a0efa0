//! State shared by every interceptor created from one instance.

use cloak_core::{FailureMode, InterceptionConfig};
use cloak_crypto::{CryptoClient, CryptoError};
use cloak_policy::PolicyCache;
use cloak_runtime::IdentityRenewal;
use cloak_sql::{ColumnOrigin, ParameterTarget, ParseCache, ParsedStatement};
use std::sync::Arc;

use crate::error::DriverError;

/// Parser, policy cache and crypto client, plus the configured failure mode.
pub struct InterceptionContext {
    parser: ParseCache,
    policies: Arc<PolicyCache>,
    crypto: Arc<CryptoClient>,
    identity: Option<Arc<dyn IdentityRenewal>>,
    default_schema: Option<String>,
    failure_mode: FailureMode,
}

impl InterceptionContext {
    pub fn new(
        config: &InterceptionConfig,
        policies: Arc<PolicyCache>,
        crypto: Arc<CryptoClient>,
    ) -> Self {
        if config.failure_mode == FailureMode::FailOpen {
            tracing::info!("Interception fails open: values the engine cannot process pass through unchanged");
        }
        Self {
            parser: ParseCache::new(config.parse_cache_size),
            policies,
            crypto,
            identity: None,
            default_schema: None,
            failure_mode: config.failure_mode,
        }
    }

    /// Scope datasource-qualified mappings to the instance's current identity.
    pub fn with_identity(mut self, identity: Arc<dyn IdentityRenewal>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Schema assumed for tables the SQL or driver leaves unqualified.
    pub fn with_default_schema(mut self, schema: impl Into<String>) -> Self {
        self.default_schema = Some(schema.into());
        self
    }

    pub fn parse(&self, sql: &str) -> Arc<ParsedStatement> {
        self.parser.get_or_parse(sql)
    }

    pub fn policies(&self) -> &PolicyCache {
        &self.policies
    }

    pub fn crypto(&self) -> &CryptoClient {
        &self.crypto
    }

    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    pub fn datasource_id(&self) -> Option<String> {
        self.identity
            .as_ref()
            .and_then(|i| i.current())
            .and_then(|i| i.datasource_id)
    }

    pub fn policy_for_target(&self, target: &ParameterTarget) -> Option<String> {
        let table = target.table.as_deref()?;
        self.resolve(target.schema.as_deref(), table, &target.column)
    }

    pub fn policy_for_origin(&self, origin: &ColumnOrigin) -> Option<String> {
        let table = origin.table.as_deref()?;
        self.resolve(origin.schema.as_deref(), table, &origin.column)
    }

    /// Resolve a column's policy, filling in the default schema when the
    /// table is unqualified.
    pub fn resolve(&self, schema: Option<&str>, table: &str, column: &str) -> Option<String> {
        let schema = schema.or(self.default_schema.as_deref());
        self.policies
            .resolve(self.datasource_id().as_deref(), schema, table, column)
    }

    /// Apply the failure mode to a per-value crypto result.
    pub(crate) fn recover(
        &self,
        result: Result<String, CryptoError>,
        original: &str,
        what: &'static str,
    ) -> Result<String, DriverError> {
        match result {
            Ok(value) => Ok(value),
            Err(e) if self.failure_mode == FailureMode::FailOpen => {
                tracing::warn!(error = %e, operation = what, "Crypto call failed, using the original value");
                Ok(original.to_string())
            }
            Err(e) => Err(DriverError::Encryption(e)),
        }
    }
}
