//! Error types for the policy cache.

use cloak_core::StoreError;
use thiserror::Error;

/// Errors raised by the policy cache.
///
/// Lookups never fail; only persistence of a refreshed snapshot can.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to persist policy snapshot: {0}")]
    Store(#[from] StoreError),
}
