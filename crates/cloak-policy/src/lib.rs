//! # cloak-policy
//!
//! In-memory `column → policy` map with a single authoritative version.
//!
//! The map is replaced wholesale on every refresh; readers hold an
//! [`Arc`](std::sync::Arc) to the snapshot they started with and never see a
//! half-applied update. Lookups are pure memory reads. Every change that
//! carries a version is written to `policy-mappings.json` so a restart can
//! serve traffic before the Hub is reachable.

pub mod cache;
pub mod error;

pub use cache::{PersistedPolicies, PolicyCache, PolicySnapshot};
pub use error::PolicyError;
