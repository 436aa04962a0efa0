//! # cloak-proxy
//!
//! Transparent encryption around a database driver.
//!
//! The driver is abstracted by three traits ([`Connection`],
//! [`PreparedStatement`], [`ResultSet`]). This crate decorates them:
//!
//! ```text
//! Application
//!       │
//!       ▼
//! ┌──────────────────────┐
//! │ EncryptingConnection │  prepare → parse SQL once (cached)
//! │ EncryptingStatement  │  bind    → encrypt / search-encrypt / pass
//! │ DecryptingResultSet  │  fetch   → decrypt protected columns
//! └──────────┬───────────┘
//!            │
//!            ▼
//!      Database driver
//! ```
//!
//! Per-value crypto failures follow [`cloak_core::FailureMode`]: fail open
//! (default) keeps the original value, fail closed surfaces
//! [`DriverError::Encryption`].

pub mod connection;
pub mod context;
pub mod driver;
pub mod error;
pub mod result_set;
pub mod statement;

pub use connection::EncryptingConnection;
pub use context::InterceptionContext;
pub use driver::{ColumnMetadata, Connection, PreparedStatement, ResultSet, Row, SqlValue};
pub use error::DriverError;
pub use result_set::DecryptingResultSet;
pub use statement::EncryptingStatement;
