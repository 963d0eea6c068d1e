//! # Export
//!
//! `bcp out` / `bcp queryout` into a delimited file with a header row.
//!
//! bcp writes data rows only, so the header comes from the catalog (tables
//! and views) or from the caller (queries) and is stitched in front of the
//! data once bcp has finished.

use crate::error::{AppError, Result};
use crate::runner::run_bcp;
use crate::sqlcmd::{table_columns, SqlExecutor};
use bcpframe_core::ddl::TableRef;
use bcpframe_core::{BcpCommand, BcpError, Direction, SqlCreds, SqlItem, SqlItemKind};
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// What to export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportSource {
    /// A table or view; the header is read from the catalog.
    Object { kind: SqlItemKind, table: TableRef },
    /// A query; `columns` becomes the header and may be empty for none.
    Query { sql: String, columns: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub path: PathBuf,
    pub delimiter: char,
    pub bcp_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    pub path: PathBuf,
    pub rows: usize,
    pub columns: Vec<String>,
}

/// Export `source` to `settings.path`.
pub async fn export<E: SqlExecutor>(
    creds: &SqlCreds,
    executor: &E,
    source: &ExportSource,
    settings: &ExportSettings,
) -> Result<ExportReport> {
    if matches!(settings.delimiter, '\n' | '\r') {
        return Err(BcpError::invalid("delimiter", "can't be a line break").into());
    }

    let (item, direction, columns) = match source {
        ExportSource::Object { kind, table } => {
            let columns = table_columns(executor, table).await?.names_in_order();
            if columns.is_empty() {
                return Err(AppError::Catalog(format!(
                    "no columns found for {kind} {table}, does it exist?"
                )));
            }
            (
                SqlItem::Object {
                    kind: *kind,
                    table: table.clone(),
                },
                Direction::Out,
                columns,
            )
        }
        ExportSource::Query { sql, columns } => {
            (SqlItem::Query(sql.clone()), Direction::QueryOut, columns.clone())
        }
    };
    let header = header_line(&columns, settings.delimiter)?;

    let dir = match settings.path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let data = tempfile::Builder::new()
        .prefix(".bcpframe-")
        .suffix(".out")
        .tempfile_in(dir)?
        .into_temp_path();

    let command = BcpCommand::builder(item, direction, &*data)
        .delimiter(settings.delimiter)
        .program(settings.bcp_path.clone())
        .build(creds)?;
    run_bcp(&command).await?;

    let out = BufWriter::new(File::create(&settings.path)?);
    let copied = write_with_header(header.as_deref(), settings.delimiter, File::open(&data)?, out)?;
    if copied.ragged > 0 {
        tracing::warn!(
            rows = copied.ragged,
            columns = columns.len(),
            delimiter = %settings.delimiter.escape_default(),
            "Rows have more fields than the header, a value likely contains the delimiter"
        );
    }
    let rows = copied.rows;
    tracing::info!(path = %settings.path.display(), rows, "Export finished");

    Ok(ExportReport {
        path: settings.path.clone(),
        rows,
        columns,
    })
}

/// Header text for `columns`, or `None` when there are none.
fn header_line(columns: &[String], delimiter: char) -> Result<Option<String>> {
    if columns.is_empty() {
        return Ok(None);
    }
    if let Some(bad) = columns.iter().find(|c| c.contains(delimiter)) {
        return Err(BcpError::invalid(
            "delimiter",
            format!("{delimiter:?} appears in column name {bad:?}"),
        )
        .into());
    }
    let sep = delimiter.to_string();
    Ok(Some(columns.join(&sep)))
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Copied {
    rows: usize,
    /// Rows with more fields than the header.
    ragged: usize,
}

/// Number of `delimiter`-separated fields in one line of bcp output.
fn field_count(line: &[u8], delimiter: char) -> usize {
    let mut buf = [0; 4];
    let delim = delimiter.encode_utf8(&mut buf).as_bytes();
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    1 + line.windows(delim.len()).filter(|w| *w == delim).count()
}

/// Copy `data` to `out` behind an optional header line.
///
/// bcp does not quote, so a value holding the delimiter shows up as a row
/// with extra fields. Those rows are copied as-is and counted.
fn write_with_header<R: Read, W: Write>(
    header: Option<&str>,
    delimiter: char,
    data: R,
    mut out: W,
) -> Result<Copied> {
    let expected = header.map(|h| field_count(h.as_bytes(), delimiter));
    if let Some(header) = header {
        out.write_all(header.as_bytes())?;
        out.write_all(b"\n")?;
    }
    let mut reader = BufReader::new(data);
    let mut line = Vec::new();
    let mut copied = Copied::default();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        if expected.is_some_and(|n| field_count(&line, delimiter) > n) {
            copied.ragged += 1;
        }
        out.write_all(&line)?;
        copied.rows += 1;
    }
    out.flush()?;
    Ok(copied)
}

// =============================================================================
// TESTS
// =============================================================================
