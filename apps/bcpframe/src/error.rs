//! # Error Module
//!
//! Failures of the app layer: processes, files, configuration.

use bcpframe_core::BcpError;
use thiserror::Error;

/// Errors from running a load or export.
#[derive(Debug, Error)]
pub enum AppError {
    /// Planning rejected the input.
    #[error(transparent)]
    Plan(#[from] BcpError),

    /// File-system failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A child process could not be started.
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// bcp exited unsuccessfully.
    #[error("bcp command failed with exit code {}", display_code(.code))]
    BcpFailed {
        code: Option<i32>,
        /// Last lines bcp printed.
        tail: Vec<String>,
    },

    /// sqlcmd exited unsuccessfully.
    #[error("sqlcmd failed with exit code {}: {message}", display_code(.code))]
    SqlCmdFailed { code: Option<i32>, message: String },

    /// bcp failed and so did the native fallback.
    #[error("bcp failed ({bcp}) and the native fallback failed too: {native}")]
    FallbackFailed {
        bcp: Box<AppError>,
        native: Box<AppError>,
    },

    /// The catalog returned something unexpected.
    #[error("Unexpected catalog output: {0}")]
    Catalog(String),

    /// Configuration is missing or contradictory.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Config file is not valid TOML.
    #[error("Config file error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON output could not be produced.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience `Result` alias for the app layer.
pub type Result<T> = std::result::Result<T, AppError>;

fn display_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "none (terminated by signal)".to_string(), |c| c.to_string())
}
