//! # Loader
//!
//! Runs a planned load end to end:
//!
//! 1. ask the catalog about the destination
//! 2. plan (validation, delimiter, DDL, format file)
//! 3. write the flat file and format file to temporary paths
//! 4. run the DDL through the [`SqlExecutor`]
//! 5. run `bcp in`
//! 6. on bcp failure, optionally re-load with native `INSERT` batches
//!
//! Temporary files are removed when the load returns, successful or not,
//! unless debug mode keeps them for inspection.

use crate::error::{AppError, Result};
use crate::runner::run_bcp;
use crate::sqlcmd::{catalog_state, SqlExecutor};
use bcpframe_core::ddl::{self, TableRef};
use bcpframe_core::{
    plan_load, BcpCommand, Direction, Frame, IfExists, LoadOptions, LoadPlan, PlannedLoad,
    SqlCreds, SqlItem, SqlItemKind, TableAction,
};
use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

// =============================================================================
// SETTINGS / REPORT
// =============================================================================

/// Runtime settings around the planning options.
#[derive(Debug, Clone)]
pub struct LoadSettings {
    pub options: LoadOptions,
    /// Keep the temporary flat file and format file and log their paths.
    pub debug: bool,
    /// Path to `bcp` when it is not on `PATH`.
    pub bcp_path: Option<PathBuf>,
    /// Directory for `<table>_bcp_error.txt`.
    pub error_dir: Option<PathBuf>,
    /// Re-load with `INSERT` statements if bcp fails.
    pub fallback_native: bool,
    /// Where temporary files are created; the system temp dir when `None`.
    pub temp_dir: Option<PathBuf>,
}

impl LoadSettings {
    pub fn new(options: LoadOptions) -> Self {
        Self {
            options,
            debug: false,
            bcp_path: None,
            error_dir: None,
            fallback_native: false,
            temp_dir: None,
        }
    }
}

/// How the rows reached the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMethod {
    Bcp,
    Native,
    Skipped,
}

/// Outcome of a load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub table: TableRef,
    pub rows: usize,
    pub columns: usize,
    pub method: LoadMethod,
    /// Paths of files kept by debug mode.
    pub kept_files: Vec<PathBuf>,
}

impl LoadReport {
    fn skipped(table: &TableRef) -> Self {
        Self {
            table: table.clone(),
            rows: 0,
            columns: 0,
            method: LoadMethod::Skipped,
            kept_files: Vec::new(),
        }
    }
}

// =============================================================================
// TEMPORARY FILES
// =============================================================================

/// A file written for bcp, deleted on drop unless kept.
enum Artifact {
    Temp(tempfile::TempPath),
    Kept(PathBuf),
}

impl Artifact {
    fn write(
        dir: Option<&Path>,
        suffix: &str,
        keep: bool,
        contents: impl FnOnce(&mut dyn Write) -> Result<()>,
    ) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("bcpframe-").suffix(suffix);
        let file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        {
            let mut writer = BufWriter::new(file.as_file());
            contents(&mut writer)?;
            writer.flush()?;
        }
        let path = file.into_temp_path();
        if keep {
            Ok(Self::Kept(path.keep().map_err(|e| e.error)?))
        } else {
            Ok(Self::Temp(path))
        }
    }

    fn path(&self) -> &Path {
        match self {
            Self::Temp(path) => &**path,
            Self::Kept(path) => path.as_path(),
        }
    }
}

// =============================================================================
// LOAD
// =============================================================================

/// Load `frame` into the table named by `settings.options`.
pub async fn load_frame<E: SqlExecutor>(
    frame: &Frame,
    creds: &SqlCreds,
    executor: &E,
    settings: &LoadSettings,
) -> Result<LoadReport> {
    let options = &settings.options;
    if frame.is_empty() {
        tracing::info!(table = %options.table, "Frame has no rows or columns, nothing to load");
        return Ok(LoadReport::skipped(&options.table));
    }

    let catalog = catalog_state(
        executor,
        &options.table,
        options.kind,
        options.if_exists == IfExists::Append,
    )
    .await?;

    let LoadPlan::Load(load) = plan_load(frame, options, &catalog)? else {
        return Ok(LoadReport::skipped(&options.table));
    };
    if !load.mapping.missing.is_empty() {
        tracing::info!(
            table = %load.table,
            missing = ?load.mapping.missing,
            "Destination columns absent from the frame will be left to their defaults"
        );
    }

    let temp_dir = settings.temp_dir.as_deref();
    let flat_file = Artifact::write(temp_dir, ".csv", settings.debug, |w| {
        load.frame.write_flat_file(w, load.delimiter)?;
        Ok(())
    })?;
    tracing::debug!(path = %flat_file.path().display(), delimiter = ?load.delimiter, "Saved frame to flat file");

    let format_file = Artifact::write(temp_dir, ".fmt", settings.debug, |w| {
        w.write_all(load.format_file.as_bytes())?;
        Ok(())
    })?;
    tracing::debug!(path = %format_file.path().display(), "Created bcp format file");

    if settings.debug {
        tracing::info!(
            flat_file = %flat_file.path().display(),
            format_file = %format_file.path().display(),
            "Debug mode, keeping temporary files"
        );
    }

    for statement in load.action.statements() {
        executor.execute(statement).await?;
    }

    let error_file = settings
        .error_dir
        .as_ref()
        .map(|dir| dir.join(format!("{}_bcp_error.txt", load.table.name)));

    let command = BcpCommand::builder(
        SqlItem::Object {
            kind: SqlItemKind::Table,
            table: load.table.clone(),
        },
        Direction::In,
        flat_file.path(),
    )
    .format_file(format_file.path())
    .batch_size(load.batch_size)
    .error_file(error_file)
    .program(settings.bcp_path.clone())
    .build(creds)?;

    let method = match run_bcp(&command).await {
        Ok(_) => LoadMethod::Bcp,
        Err(bcp_err) if settings.fallback_native => {
            tracing::warn!(error = %bcp_err, "bcp failed, retrying with native inserts");
            match load_native(executor, &load).await {
                Ok(()) => LoadMethod::Native,
                Err(native_err) => {
                    return Err(AppError::FallbackFailed {
                        bcp: Box::new(bcp_err),
                        native: Box::new(native_err),
                    });
                }
            }
        }
        Err(bcp_err) => return Err(bcp_err),
    };

    tracing::info!(
        table = %load.table,
        rows = load.rows,
        method = ?method,
        "Load finished"
    );

    let kept_files = match (&flat_file, &format_file) {
        (Artifact::Kept(a), Artifact::Kept(b)) => vec![a.clone(), b.clone()],
        _ => Vec::new(),
    };

    Ok(LoadReport {
        table: load.table.clone(),
        rows: load.rows,
        columns: load.columns.len(),
        method,
        kept_files,
    })
}

/// Re-load every row with `INSERT` statements.
///
/// Only tables created by this load are eligible: bcp commits per batch, so
/// an appended table may already hold part of the data.
pub async fn load_native<E: SqlExecutor>(executor: &E, load: &PlannedLoad) -> Result<()> {
    if load.action == TableAction::UseExisting {
        return Err(AppError::Config(
            "native fallback is not available when appending to an existing table".into(),
        ));
    }

    executor.execute(&ddl::truncate_table_sql(&load.table)).await?;

    let statements =
        ddl::insert_batches_sql(&load.table, &load.columns, load.frame.rows(), load.batch_size)?;
    let total = statements.len();
    for (i, statement) in statements.iter().enumerate() {
        executor.execute(statement).await?;
        tracing::debug!(batch = i + 1, total, "Inserted batch");
    }
    Ok(())
}
