//! # cloak-runtime
//!
//! Everything that talks to the Hub.
//!
//! - [`bootstrap`]: one pass per logical instance that loads persisted
//!   state, reconciles the schema, registers or re-registers, and starts
//!   the recurring sync. Concurrent callers for the same database share
//!   one execution.
//! - [`registration`]: acquires and replaces the Hub-issued identity.
//! - [`schema`]: schema collection, lifecycle reconciliation and the
//!   fingerprinted push to the Hub.
//! - [`mapping_sync`]: the periodic version check that keeps the policy
//!   cache and the crypto endpoint current.
//! - [`hub`]: the Hub API seam and its reqwest implementation.
//! - [`retry`]: retry policies with an injectable sleeper.
//! - [`store`]: persisted identity, endpoint and schema snapshot.

pub mod bootstrap;
pub mod error;
pub mod hub;
pub mod mapping_sync;
pub mod registration;
pub mod retry;
pub mod schema;
pub mod store;

#[cfg(test)]
mod testing;

pub use bootstrap::{BootstrapOutcome, Bootstrapper, InstanceDeps, RunningInstance};
pub use error::{HubError, RuntimeError};
pub use hub::{CheckOutcome, HttpHubClient, HubApi};
pub use mapping_sync::{MappingSync, MappingSyncHandle, TickOutcome};
pub use registration::{IdentityRenewal, Registrar};
pub use retry::{Backoff, RetryPolicy, Sleeper, TokioSleeper};
pub use schema::{SchemaSource, SchemaSyncService, SyncOutcome};
pub use store::{EndpointStore, IdentityStore, SchemaSnapshot, SchemaSnapshotStore};
