//! # Error Module
//!
//! Every failure a load plan can produce before anything touches the server.

use thiserror::Error;

/// Errors from planning a bulk load.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BcpError {
    /// A row does not have one cell per column.
    #[error("Row {row} has {found} cells, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },

    /// SQL requires unique column names.
    #[error(
        "Columns with duplicate names detected, SQL requires that column names be unique. Duplicates: {0:?}"
    )]
    DuplicateColumns(Vec<String>),

    /// Every candidate delimiter occurs somewhere in the data.
    #[error(
        "Data contains all of the possible delimiter characters {0:?}, cannot use bcp to import it. \
         Replace one of the possible delimiter characters in your data, or use another method"
    )]
    DelimiterExhausted(Vec<char>),

    /// A text cell holds a line break, which bcp character mode cannot carry.
    #[error("Cell in column {column:?} at row {row} contains a line break")]
    EmbeddedNewline { column: String, row: usize },

    /// A column referenced by name is not part of the table.
    #[error("Column {0:?} is not present")]
    UnknownColumn(String),

    /// Frame columns that have no counterpart in the destination table.
    #[error(
        "Column(s) detected in the frame that are not in the database, cannot have new columns \
         when appending, the extra column(s): {0:?}"
    )]
    ExtraColumns(Vec<String>),

    /// `if_exists = fail` and the destination exists.
    #[error("The {kind} called {table} already exists, `if_exists` was set to `fail`")]
    AlreadyExists { kind: String, table: String },

    /// Invalid parameter value.
    #[error("Invalid value for {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// Direction not allowed for the SQL item kind.
    #[error("Direction {direction} is not valid for a {kind}")]
    InvalidDirection { direction: String, kind: String },

    /// The requested operation is not supported.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Connection string could not be parsed.
    #[error("The connection string could not be parsed: {0}")]
    InvalidConnectionString(String),

    /// Format file text could not be parsed.
    #[error("Invalid format file: {0}")]
    InvalidFormatFile(String),

    /// Input data could not be interpreted.
    #[error("Invalid input data: {0}")]
    InvalidInput(String),

    /// CSV reading or writing failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON input could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Writer failure while rendering a flat file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience `Result` alias for planning operations.
pub type Result<T> = std::result::Result<T, BcpError>;

impl BcpError {
    /// Shorthand for [`BcpError::InvalidParameter`].
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}
