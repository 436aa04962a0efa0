//! Error types for the SQL analysis crate.

use thiserror::Error;

/// Errors raised while analysing a statement.
///
/// These never reach the application: [`crate::StatementParser::parse`]
/// turns them into a table-less result.
#[derive(Debug, Error)]
pub enum SqlError {
    /// SQL parsing failed.
    #[error("failed to parse SQL: {0}")]
    ParseError(String),

    /// The input contained no statement.
    #[error("empty statement")]
    Empty,

    /// The statement parsed but its target table could not be determined.
    #[error("cannot determine target table")]
    NoTable,
}
