//! # cloak-sql
//!
//! Best-effort SQL analysis for Cloak.
//!
//! The interceptor needs to know, for every bound parameter and every result
//! column, which `table.column` it belongs to. This crate recovers that
//! identity; it does not validate or plan queries.
//!
//! | Statement | What is recovered |
//! |-----------|-------------------|
//! | `INSERT`  | table, parameter position → column (from the column list and `VALUES`) |
//! | `UPDATE`  | table, `SET col = ?` positions, filter positions |
//! | `SELECT`  | tables and aliases, filter positions, result label → column |
//! | `DELETE`  | table, filter positions |
//!
//! Parsing never fails from the caller's point of view: anything the parser
//! cannot handle yields a [`ParsedStatement`] without a table, and the
//! interceptor falls back to the driver's own result metadata.

pub mod cache;
pub mod error;
mod lexical;
pub mod parser;

pub use cache::ParseCache;
pub use error::SqlError;
pub use lexical::numbered_placeholders;
pub use parser::{
    ColumnOrigin, ParameterTarget, ParsedStatement, StatementKind, StatementParser, TableRef,
};
