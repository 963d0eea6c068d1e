//! # Native SQL Client
//!
//! Catalog queries and DDL go through `sqlcmd`, the command-line client that
//! ships with the same SQL Server tools package as `bcp`.
//!
//! [`SqlExecutor`] is the seam: the loader only needs "run this query and give
//! me rows" and "run this statement". Tests substitute an in-memory executor.

use crate::error::{AppError, Result};
use crate::runner::run_streaming;
use bcpframe_core::creds::REDACTED;
use bcpframe_core::ddl::{self, TableRef};
use bcpframe_core::{CatalogState, DbColumns, SqlCreds, SqlItemKind};
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempPath;

/// Program name used when no explicit path is configured.
pub const DEFAULT_SQLCMD_PROGRAM: &str = "sqlcmd";

/// Column separator requested from sqlcmd (ASCII unit separator).
const COLUMN_SEPARATOR: char = '\u{1f}';

/// Code page flag value telling sqlcmd the script is UTF-8.
const UTF8_CODEPAGE: &str = "65001";

/// Rows of string cells.
pub type Rows = Vec<Vec<String>>;

// =============================================================================
// EXECUTOR TRAIT
// =============================================================================

/// Something that runs T-SQL against the destination database.
pub trait SqlExecutor {
    /// Run a query and return its rows.
    fn query(&self, sql: &str) -> impl Future<Output = Result<Rows>> + Send;

    /// Run a statement for its side effects.
    fn execute(&self, sql: &str) -> impl Future<Output = Result<()>> + Send;
}

// =============================================================================
// SQLCMD
// =============================================================================

/// [`SqlExecutor`] backed by the `sqlcmd` utility.
#[derive(Debug, Clone)]
pub struct SqlCmd {
    creds: SqlCreds,
    program: PathBuf,
}

impl SqlCmd {
    pub fn new(creds: SqlCreds, program: Option<PathBuf>) -> Self {
        Self {
            creds,
            program: program.unwrap_or_else(|| PathBuf::from(DEFAULT_SQLCMD_PROGRAM)),
        }
    }

    /// Arguments for running the script at `script`, password included.
    ///
    /// SQL travels in a file because a single command-line argument is
    /// limited in size, and insert batches easily exceed it.
    pub fn args(&self, script: &Path) -> Vec<String> {
        let mut args = vec![
            "-S".to_string(),
            self.creds.server_arg(),
            "-d".to_string(),
            self.creds.database.clone(),
            // exit with a non-zero code on SQL errors
            "-b".to_string(),
            "-h".to_string(),
            "-1".to_string(),
            "-W".to_string(),
            "-s".to_string(),
            COLUMN_SEPARATOR.to_string(),
            "-f".to_string(),
            UTF8_CODEPAGE.to_string(),
        ];
        match self.creds.login() {
            Some((user, password)) => args.extend([
                "-U".to_string(),
                user.to_string(),
                "-P".to_string(),
                password.to_string(),
            ]),
            None => args.push("-E".to_string()),
        }
        args.push("-i".to_string());
        args.push(script.display().to_string());
        args
    }

    /// Command line safe for logs.
    fn display(&self, args: &[String]) -> String {
        let shown: Vec<&str> = args
            .iter()
            .enumerate()
            .map(|(i, arg)| match i.checked_sub(1).map(|prev| args[prev].as_str()) {
                Some("-P") => REDACTED,
                _ => arg.as_str(),
            })
            .collect();
        format!("{} {}", self.program.display(), shown.join(" "))
    }

    async fn run(&self, sql: &str) -> Result<Vec<String>> {
        let script = write_script(sql)?;
        let args = self.args(&script);
        let output = run_streaming(&self.program, &args, "sqlcmd", &self.display(&args), true).await?;
        if !output.success {
            return Err(AppError::SqlCmdFailed {
                code: output.code,
                message: output.tail.join("\n"),
            });
        }
        Ok(output.stdout)
    }
}

/// Write `sql` to a temporary UTF-8 script, removed when the path drops.
fn write_script(sql: &str) -> Result<TempPath> {
    let mut file = tempfile::Builder::new()
        .prefix("bcpframe-")
        .suffix(".sql")
        .tempfile()?;
    writeln!(file, "SET NOCOUNT ON;")?;
    writeln!(file, "{sql}")?;
    file.flush()?;
    Ok(file.into_temp_path())
}

impl SqlExecutor for SqlCmd {
    async fn query(&self, sql: &str) -> Result<Rows> {
        Ok(parse_rows(&self.run(sql).await?))
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        self.run(sql).await.map(|_| ())
    }
}

/// Split sqlcmd output lines into cells, dropping blank lines.
pub fn parse_rows(lines: &[String]) -> Rows {
    lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            line.split(COLUMN_SEPARATOR)
                .map(|cell| cell.trim().to_string())
                .collect()
        })
        .collect()
}

// =============================================================================
// CATALOG
// =============================================================================

/// Does the table (or view) exist?
pub async fn table_exists<E: SqlExecutor>(
    executor: &E,
    table: &TableRef,
    kind: SqlItemKind,
) -> Result<bool> {
    let rows = executor.query(&ddl::exists_sql(table, kind)).await?;
    Ok(!rows.is_empty())
}

/// Destination columns with their ordinals.
pub async fn table_columns<E: SqlExecutor>(executor: &E, table: &TableRef) -> Result<DbColumns> {
    let rows = executor.query(&ddl::columns_sql(table)).await?;
    let pairs = rows
        .into_iter()
        .map(|row| match row.as_slice() {
            [name, ordinal] => ordinal
                .parse::<usize>()
                .map(|o| (name.clone(), o))
                .map_err(|_| AppError::Catalog(format!("bad ordinal {ordinal:?} for {name:?}"))),
            other => Err(AppError::Catalog(format!(
                "expected COLUMN_NAME and ORDINAL_POSITION, got {other:?}"
            ))),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(DbColumns::from_pairs(pairs))
}

/// Everything the planner needs to know about the destination.
///
/// Columns are only fetched when `with_columns` is set and the table exists.
pub async fn catalog_state<E: SqlExecutor>(
    executor: &E,
    table: &TableRef,
    kind: SqlItemKind,
    with_columns: bool,
) -> Result<CatalogState> {
    if !table_exists(executor, table, kind).await? {
        tracing::debug!(table = %table, "Destination does not exist");
        return Ok(CatalogState::absent());
    }
    let columns = if with_columns {
        table_columns(executor, table).await?
    } else {
        DbColumns::default()
    };
    tracing::debug!(table = %table, columns = columns.len(), "Destination exists");
    Ok(CatalogState::existing(columns))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn parse_rows_splits_on_unit_separator() {
        let lines = vec![
            "id\u{1f}1".to_string(),
            String::new(),
            "name \u{1f} 2".to_string(),
        ];
        assert_eq!(
            parse_rows(&lines),
            vec![vec!["id", "1"], vec!["name", "2"]]
        );
    }

    #[test]
    fn args_use_trusted_auth_without_login() {
        let cmd = SqlCmd::new(SqlCreds::new("db01", "sales"), None);
        let args = cmd.args(Path::new("/tmp/q.sql"));
        assert!(args.contains(&"-E".to_string()));
        assert!(!args.contains(&"-Q".to_string()));
        assert_eq!(&args[args.len() - 2..], ["-i", "/tmp/q.sql"]);
    }

    #[test]
    fn script_holds_statement_after_nocount() {
        let script = write_script("SELECT 1;").unwrap();
        let text = std::fs::read_to_string(&script).unwrap();
        assert_eq!(text, "SET NOCOUNT ON;\nSELECT 1;\n");
    }

    #[test]
    fn display_redacts_password() {
        let creds = SqlCreds::new("db01", "sales").with_login("sa", "pa55");
        let cmd = SqlCmd::new(creds, Some(PathBuf::from("/opt/mssql-tools/bin/sqlcmd")));
        let args = cmd.args(Path::new("/tmp/q.sql"));
        assert!(args.contains(&"pa55".to_string()));
        let shown = cmd.display(&args);
        assert!(shown.starts_with("/opt/mssql-tools/bin/sqlcmd -S db01,1433"));
        assert!(!shown.contains("pa55"));
    }

    #[test]
    fn display_redacts_by_position_only() {
        // password identical to the database name
        let creds = SqlCreds::new("db01", "sales").with_login("loader", "sales");
        let cmd = SqlCmd::new(creds, None);
        let shown = cmd.display(&cmd.args(Path::new("/tmp/q.sql")));
        assert!(shown.contains("-d sales"));
        assert!(shown.contains(&format!("-P {REDACTED}")));
    }
}
