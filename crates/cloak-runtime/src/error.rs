//! Error types for Hub synchronization.

use cloak_core::StoreError;
use cloak_policy::PolicyError;
use thiserror::Error;

/// Errors from Hub calls.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The Hub does not know this instance (HTTP 404).
    #[error("instance not found on the Hub")]
    NotFound,

    #[error("Hub answered {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Hub is disabled in configuration")]
    Disabled,
}

impl HubError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, HubError::NotFound)
    }
}

/// Errors from the runtime orchestration.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Hub(#[from] HubError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("schema collection failed: {0}")]
    Collect(String),
}
