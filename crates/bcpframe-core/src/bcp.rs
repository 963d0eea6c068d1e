//! # BCP Command Module
//!
//! Argument vectors for the `bcp` bulk-copy utility.
//!
//! Building is pure: the app layer spawns the process. The password never
//! leaves this module unredacted except through [`BcpCommand::args`].

use crate::creds::{REDACTED, SqlCreds};
use crate::ddl::TableRef;
use crate::delimiter::ROW_TERMINATOR;
use crate::error::{BcpError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Program name used when no explicit path is configured.
pub const DEFAULT_BCP_PROGRAM: &str = "bcp";

// =============================================================================
// DIRECTION / ITEM KIND
// =============================================================================

/// Direction of the copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
    QueryOut,
}

impl Direction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
            Self::QueryOut => "queryout",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = BcpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "in" => Ok(Self::In),
            "out" => Ok(Self::Out),
            "queryout" => Ok(Self::QueryOut),
            other => Err(BcpError::invalid(
                "direction",
                format!("{other:?}, expected one of in, out, queryout"),
            )),
        }
    }
}

/// Kind of SQL object on the server side of the copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlItemKind {
    Table,
    View,
    Query,
}

impl SqlItemKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::View => "view",
            Self::Query => "query",
        }
    }

    /// Directions `bcp` accepts for this kind.
    #[must_use]
    pub fn allowed_directions(&self) -> &'static [Direction] {
        match self {
            Self::Table | Self::View => &[Direction::In, Direction::Out],
            Self::Query => &[Direction::QueryOut],
        }
    }
}

impl fmt::Display for SqlItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SqlItemKind {
    type Err = BcpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "view" => Ok(Self::View),
            "query" => Ok(Self::Query),
            other => Err(BcpError::invalid(
                "sql_type",
                format!("{other:?}, expected one of table, view, query"),
            )),
        }
    }
}

// =============================================================================
// COMMAND
// =============================================================================

/// Server-side object of the copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlItem {
    /// A table or view.
    Object { kind: SqlItemKind, table: TableRef },
    /// A query for `queryout`.
    Query(String),
}

impl SqlItem {
    #[must_use]
    pub fn kind(&self) -> SqlItemKind {
        match self {
            Self::Object { kind, .. } => *kind,
            Self::Query(_) => SqlItemKind::Query,
        }
    }

    /// The first positional argument of `bcp`.
    ///
    /// Tables and views are `schema.name`; queries are folded onto one line.
    #[must_use]
    pub fn to_arg(&self) -> String {
        match self {
            Self::Object { table, .. } => format!("{}.{}", table.schema, table.name),
            Self::Query(sql) => sql
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// A validated `bcp` invocation.
#[derive(Clone, PartialEq, Eq)]
pub struct BcpCommand {
    program: PathBuf,
    args: Vec<String>,
    /// Position of the password in `args`.
    password_at: Option<usize>,
}

impl BcpCommand {
    /// Start building a command.
    #[must_use]
    pub fn builder(item: SqlItem, direction: Direction, flat_file: impl Into<PathBuf>) -> BcpCommandBuilder {
        BcpCommandBuilder {
            item,
            direction,
            flat_file: flat_file.into(),
            format_file: None,
            error_file: None,
            batch_size: None,
            delimiter: ',',
            program: None,
        }
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments exactly as passed to the process, password included.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Arguments with the password replaced by [`REDACTED`], for logging.
    #[must_use]
    pub fn redacted_args(&self) -> Vec<String> {
        self.args
            .iter()
            .enumerate()
            .map(|(i, arg)| {
                if Some(i) == self.password_at {
                    REDACTED.to_string()
                } else {
                    arg.clone()
                }
            })
            .collect()
    }
}

impl fmt::Debug for BcpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BcpCommand")
            .field("program", &self.program)
            .field("args", &self.redacted_args())
            .finish()
    }
}

impl fmt::Display for BcpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in self.redacted_args() {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Builder for [`BcpCommand`].
#[derive(Debug, Clone)]
pub struct BcpCommandBuilder {
    item: SqlItem,
    direction: Direction,
    flat_file: PathBuf,
    format_file: Option<PathBuf>,
    error_file: Option<PathBuf>,
    batch_size: Option<u32>,
    delimiter: char,
    program: Option<PathBuf>,
}

impl BcpCommandBuilder {
    /// Format file used by `in` copies.
    #[must_use]
    pub fn format_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.format_file = Some(path.into());
        self
    }

    /// Error file (`-e`).
    #[must_use]
    pub fn error_file(mut self, path: Option<PathBuf>) -> Self {
        self.error_file = path;
        self
    }

    /// Rows per batch (`-b`).
    #[must_use]
    pub fn batch_size(mut self, batch_size: Option<u32>) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Field terminator for `out` / `queryout`.
    #[must_use]
    pub fn delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Path to the bcp executable, when not on `PATH`.
    #[must_use]
    pub fn program(mut self, program: Option<PathBuf>) -> Self {
        self.program = program;
        self
    }

    /// Validate and assemble the argument vector.
    pub fn build(self, creds: &SqlCreds) -> Result<BcpCommand> {
        let kind = self.item.kind();
        if !kind.allowed_directions().contains(&self.direction) {
            return Err(BcpError::InvalidDirection {
                direction: self.direction.to_string(),
                kind: kind.to_string(),
            });
        }
        if self.batch_size == Some(0) {
            return Err(BcpError::invalid("batch_size", "can't be 0"));
        }

        let mut args = vec![
            self.item.to_arg(),
            self.direction.to_string(),
            self.flat_file.display().to_string(),
            "-S".to_string(),
            creds.server_arg(),
            "-d".to_string(),
            creds.database.clone(),
            // SET QUOTED_IDENTIFIER ON, needed for Azure Synapse
            "-q".to_string(),
        ];

        if let Some(error_file) = &self.error_file {
            args.push("-e".to_string());
            args.push(error_file.display().to_string());
        }

        let password_at = match creds.login() {
            Some((user, password)) => {
                args.extend([
                    "-U".to_string(),
                    user.to_string(),
                    "-P".to_string(),
                    password.to_string(),
                ]);
                Some(args.len() - 1)
            }
            None => {
                args.push("-T".to_string());
                None
            }
        };

        if let Some(batch) = self.batch_size {
            args.push("-b".to_string());
            args.push(batch.to_string());
        }

        match self.direction {
            Direction::In => {
                let format_file = self.format_file.ok_or_else(|| {
                    BcpError::invalid("format_file", "required when copying in")
                })?;
                args.push("-f".to_string());
                args.push(format_file.display().to_string());
            }
            Direction::Out | Direction::QueryOut => {
                args.push("-c".to_string());
                args.push(format!("-t{}", self.delimiter.escape_default()));
                args.push(format!("-r{}", ROW_TERMINATOR.escape_default()));
            }
        }

        Ok(BcpCommand {
            program: self
                .program
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BCP_PROGRAM)),
            args,
            password_at,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
