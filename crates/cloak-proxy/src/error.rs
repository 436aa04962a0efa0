//! Error types for the interception layer.

use cloak_crypto::CryptoError;
use thiserror::Error;

/// Errors surfaced through the driver traits.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The database rejected a value as too long for its column.
    #[error("value too long for column: {0}")]
    ValueTooLong(String),

    /// Any other database failure.
    #[error("database error{}: {message}", code.as_ref().map(|c| format!(" ({c})")).unwrap_or_default())]
    Database {
        code: Option<String>,
        message: String,
    },

    /// Parameter position outside the statement.
    #[error("parameter index {0} out of range")]
    ParameterIndex(usize),

    /// Encrypting or decrypting a value failed and the failure mode is closed.
    #[error("encryption failed: {0}")]
    Encryption(#[from] CryptoError),

    #[error("connection closed")]
    Closed,
}

impl DriverError {
    pub fn database(message: impl Into<String>) -> Self {
        DriverError::Database {
            code: None,
            message: message.into(),
        }
    }

    pub fn is_value_too_long(&self) -> bool {
        matches!(self, DriverError::ValueTooLong(_))
    }
}
