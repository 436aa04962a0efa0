//! Error types for engine calls.

use thiserror::Error;

/// Errors from the crypto engine client.
///
/// The client never decides between failing open or closed; that is the
/// interceptor's job.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no crypto engine endpoint is known yet")]
    NoEndpoint,

    #[error("engine rejected the request (status {status}, code {code:?}): {message}")]
    Engine {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("invalid engine response: {0}")]
    InvalidResponse(String),
}

impl CryptoError {
    /// Whether the failure happened before the engine produced an answer.
    pub fn is_connectivity(&self) -> bool {
        match self {
            CryptoError::Http(e) => e.is_connect() || e.is_timeout(),
            CryptoError::NoEndpoint => true,
            _ => false,
        }
    }
}
