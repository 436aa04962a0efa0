use crate::context::InterceptionContext;
use crate::driver::{Connection, PreparedStatement};
use crate::error::DriverError;
use crate::statement::EncryptingStatement;
use async_trait::async_trait;
use std::sync::Arc;

/// Wraps a driver connection so every statement it prepares is intercepted.
pub struct EncryptingConnection {
    inner: Arc<dyn Connection>,
    context: Arc<InterceptionContext>,
}

impl EncryptingConnection {
    pub fn new(inner: Arc<dyn Connection>, context: Arc<InterceptionContext>) -> Self {
        Self { inner, context }
    }

    pub fn context(&self) -> &Arc<InterceptionContext> {
        &self.context
    }
}

#[async_trait]
impl Connection for EncryptingConnection {
    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>, DriverError> {
        let parsed = self.context.parse(sql);
        let inner = self.inner.prepare(sql).await?;
        Ok(Box::new(EncryptingStatement::new(
            inner,
            parsed,
            Arc::clone(&self.context),
        )))
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.inner.close().await
    }
}
