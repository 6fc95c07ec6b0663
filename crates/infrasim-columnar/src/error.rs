//! Error types for the columnar engine.
//!
//! Messages follow the server's `Code: N. DB::Exception: ...` shape so the
//! query console can show them verbatim.

use thiserror::Error;

/// Result type alias for columnar operations.
pub type ColumnarResult<T> = Result<T, ColumnarError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ColumnarError {
    #[error("Code: 62. DB::Exception: Empty query. (SYNTAX_ERROR)")]
    EmptyQuery,

    #[error("Code: 62. DB::Exception: Syntax error: {0}. (SYNTAX_ERROR)")]
    Syntax(String),

    #[error("Code: 57. DB::Exception: Table {database}.{table} already exists. (TABLE_ALREADY_EXISTS)")]
    TableExists { database: String, table: String },

    #[error("Code: 60. DB::Exception: Table {database}.{table} does not exist. (UNKNOWN_TABLE)")]
    UnknownTable { database: String, table: String },

    #[error("Code: 81. DB::Exception: Database {0} does not exist. (UNKNOWN_DATABASE)")]
    UnknownDatabase(String),

    #[error("Code: 56. DB::Exception: Unknown table engine {0}. (UNKNOWN_STORAGE)")]
    UnknownEngine(String),

    #[error("Code: 48. DB::Exception: unknown command '{0}'. (NOT_IMPLEMENTED)")]
    UnknownCommand(String),

    #[error("invalid statement pattern: {0}")]
    Pattern(String),
}

impl From<regex::Error> for ColumnarError {
    fn from(e: regex::Error) -> Self {
        Self::Pattern(e.to_string())
    }
}
