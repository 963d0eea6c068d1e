//! # CLI Commands
//!
//! One `cmd_*` function per subcommand. Each returns the text to print so
//! the binary stays a thin argument parser and the commands can be tested
//! without spawning it.

use crate::error::{AppError, Result};
use crate::export::{export, ExportReport, ExportSettings, ExportSource};
use crate::loader::{load_frame, LoadMethod, LoadReport, LoadSettings};
use crate::sqlcmd::SqlExecutor;
use bcpframe_core::{plan_load, CatalogState, Frame, LoadOptions, LoadPlan, SqlCreds, TableAction};
use clap::ValueEnum;
use std::fmt::Write as _;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

// =============================================================================
// INPUT
// =============================================================================

/// Layout of the input file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum InputFormat {
    /// Pick by file extension (`.json` is JSON, anything else delimited).
    #[default]
    Auto,
    /// Delimited text with a header row.
    Csv,
    /// Array of flat JSON objects.
    Json,
}

impl InputFormat {
    fn resolve(self, path: &Path) -> Self {
        match self {
            Self::Auto => {
                let is_json = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("json"));
                if is_json { Self::Json } else { Self::Csv }
            }
            other => other,
        }
    }
}

/// Read the frame to load.
///
/// `index_column`, when given, moves that column out of the data and into
/// the row index.
pub fn read_frame(
    path: &Path,
    format: InputFormat,
    delimiter: u8,
    index_column: Option<&str>,
) -> Result<Frame> {
    let file = File::open(path).map_err(|e| {
        AppError::Config(format!("failed to open input {}: {e}", path.display()))
    })?;
    let reader = BufReader::new(file);
    let frame = match format.resolve(path) {
        InputFormat::Json => Frame::from_json_reader(reader)?,
        _ => Frame::from_csv_reader(reader, delimiter)?,
    };
    tracing::debug!(
        path = %path.display(),
        rows = frame.row_count(),
        columns = frame.column_count(),
        "Read input"
    );
    match index_column {
        Some(column) => Ok(frame.set_index(column)?),
        None => Ok(frame),
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

/// Format file a fresh load of `frame` would use, or `None` when there is
/// nothing to load.
pub fn cmd_format_file(frame: &Frame, options: &LoadOptions) -> Result<Option<String>> {
    match plan_load(frame, options, &CatalogState::absent())? {
        LoadPlan::Skip => Ok(None),
        LoadPlan::Load(load) => Ok(Some(load.format_file)),
    }
}

/// Describe what a load would do against the given catalog state.
pub fn cmd_check(
    frame: &Frame,
    options: &LoadOptions,
    catalog: &CatalogState,
    json: bool,
) -> Result<String> {
    let plan = plan_load(frame, options, catalog)?;
    if json {
        return Ok(serde_json::to_string_pretty(&plan)?);
    }
    Ok(render_plan(&plan, options))
}

/// Load `frame` and report the outcome.
pub async fn cmd_load<E: SqlExecutor>(
    frame: &Frame,
    creds: &SqlCreds,
    executor: &E,
    settings: &LoadSettings,
    json: bool,
) -> Result<String> {
    let report = load_frame(frame, creds, executor, settings).await?;
    if json {
        return Ok(serde_json::to_string_pretty(&report)?);
    }
    Ok(render_load_report(&report))
}

/// Export a table, view or query to a delimited file.
pub async fn cmd_export<E: SqlExecutor>(
    creds: &SqlCreds,
    executor: &E,
    source: &ExportSource,
    settings: &ExportSettings,
    json: bool,
) -> Result<String> {
    let report = export(creds, executor, source, settings).await?;
    if json {
        return Ok(serde_json::to_string_pretty(&report)?);
    }
    Ok(render_export_report(&report))
}

// =============================================================================
// RENDERING
// =============================================================================

fn render_plan(plan: &LoadPlan, options: &LoadOptions) -> String {
    let LoadPlan::Load(load) = plan else {
        return format!("Nothing to load into {}: the input is empty", options.table);
    };

    let mut out = String::new();
    let _ = writeln!(out, "Table:     {}", load.table);
    let _ = writeln!(out, "Rows:      {}", load.rows);
    let _ = writeln!(out, "Columns:   {}", load.columns.join(", "));
    let _ = writeln!(out, "Delimiter: {}", load.delimiter.escape_default());
    if let Some(batch) = load.batch_size {
        let _ = writeln!(out, "Batch:     {batch}");
    }
    let action = match &load.action {
        TableAction::UseExisting => "append to existing table",
        TableAction::Create { .. } => "create table",
        TableAction::Replace { .. } => "drop and re-create table",
    };
    let _ = writeln!(out, "Action:    {action}");
    for statement in load.action.statements() {
        let _ = writeln!(out, "  {statement}");
    }
    if !load.mapping.missing.is_empty() {
        let _ = writeln!(
            out,
            "Not in input (left to defaults): {}",
            load.mapping.missing.join(", ")
        );
    }
    if load.mapping.reordered {
        let _ = writeln!(out, "Input columns are mapped out of table order");
    }
    let _ = writeln!(out, "Format file:");
    out.push_str(&load.format_file);
    out.trim_end().to_string()
}

fn render_load_report(report: &LoadReport) -> String {
    let mut out = match report.method {
        LoadMethod::Skipped => format!("Nothing to load into {}: the input is empty", report.table),
        LoadMethod::Bcp => format!(
            "Loaded {} rows ({} columns) into {} with bcp",
            report.rows, report.columns, report.table
        ),
        LoadMethod::Native => format!(
            "Loaded {} rows ({} columns) into {} with native inserts after bcp failed",
            report.rows, report.columns, report.table
        ),
    };
    for path in &report.kept_files {
        let _ = write!(out, "\nKept {}", path.display());
    }
    out
}

fn render_export_report(report: &ExportReport) -> String {
    format!("Exported {} rows to {}", report.rows, report.path.display())
}

// =============================================================================
// TESTS
// =============================================================================
