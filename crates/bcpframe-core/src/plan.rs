//! # Load Plan Module
//!
//! Decides what a load will do before anything runs.
//!
//! Given the frame, the options and what the catalog says about the
//! destination, [`plan_load`] produces either [`LoadPlan::Skip`] (nothing to
//! load) or a [`PlannedLoad`] carrying the prepared frame, the chosen
//! delimiter, the format file text and the DDL to run first.

use crate::bcp::SqlItemKind;
use crate::ddl::{self, IfExists, TableRef};
use crate::delimiter::choose_delimiter;
use crate::error::{BcpError, Result};
use crate::format_file::build_format_file;
use crate::frame::Frame;
use crate::schema::{reconcile, ColumnMapping, DbColumns};
use serde::Serialize;
use std::collections::BTreeMap;

// =============================================================================
// INPUTS
// =============================================================================

/// Options that shape the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    pub table: TableRef,
    /// Only [`SqlItemKind::Table`] can be loaded.
    pub kind: SqlItemKind,
    /// Write the row index as the leading column.
    pub index: bool,
    pub if_exists: IfExists,
    /// Rows per batch; `None` leaves bcp's default of 1000.
    pub batch_size: Option<u32>,
    /// Column name -> SQL type overrides for table creation.
    pub dtypes: BTreeMap<String, String>,
    /// Primary key columns for table creation.
    pub keys: Vec<String>,
}

impl LoadOptions {
    /// Options for loading into `schema.name` with every default.
    pub fn new(table: TableRef) -> Self {
        Self {
            table,
            kind: SqlItemKind::Table,
            index: true,
            if_exists: IfExists::Fail,
            batch_size: None,
            dtypes: BTreeMap::new(),
            keys: Vec::new(),
        }
    }
}

/// What the catalog reported about the destination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogState {
    pub exists: bool,
    /// Destination columns; only consulted when appending to an existing table.
    pub columns: DbColumns,
}

impl CatalogState {
    #[must_use]
    pub fn absent() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn existing(columns: DbColumns) -> Self {
        Self {
            exists: true,
            columns,
        }
    }
}

// =============================================================================
// OUTPUTS
// =============================================================================

/// DDL to run before copying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TableAction {
    /// Load into the table as it is.
    UseExisting,
    /// Create the table.
    Create { create_sql: String },
    /// Drop the table if present, then create it.
    Replace {
        drop_sql: String,
        create_sql: String,
    },
}

impl TableAction {
    /// Statements in execution order.
    #[must_use]
    pub fn statements(&self) -> Vec<&str> {
        match self {
            Self::UseExisting => Vec::new(),
            Self::Create { create_sql } => vec![create_sql.as_str()],
            Self::Replace {
                drop_sql,
                create_sql,
            } => vec![drop_sql.as_str(), create_sql.as_str()],
        }
    }
}

/// A load that will run.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedLoad {
    /// Frame as it will be written, index column included.
    #[serde(skip)]
    pub frame: Frame,
    pub table: TableRef,
    pub rows: usize,
    pub columns: Vec<String>,
    pub delimiter: char,
    pub action: TableAction,
    pub mapping: ColumnMapping,
    pub format_file: String,
    pub batch_size: Option<u32>,
}

/// Outcome of planning.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "plan", rename_all = "snake_case")]
pub enum LoadPlan {
    /// The frame has no rows or no columns.
    Skip,
    Load(Box<PlannedLoad>),
}

// =============================================================================
// PLANNING
// =============================================================================

/// Plan a load of `frame` into `options.table`.
pub fn plan_load(frame: &Frame, options: &LoadOptions, catalog: &CatalogState) -> Result<LoadPlan> {
    if frame.is_empty() {
        return Ok(LoadPlan::Skip);
    }
    if options.kind != SqlItemKind::Table {
        return Err(BcpError::Unsupported(format!(
            "loading into a {} is not supported, only tables",
            options.kind
        )));
    }

    let prepared = if options.index {
        frame.with_index()
    } else {
        frame.clone()
    };

    let duplicates = prepared.duplicate_columns();
    if !duplicates.is_empty() {
        return Err(BcpError::DuplicateColumns(duplicates));
    }

    let delimiter = choose_delimiter(&prepared)?;
    check_batch_size(options.batch_size, prepared.row_count())?;

    let columns = prepared.columns().to_vec();
    let create_sql = || {
        ddl::create_table_sql(
            &options.table,
            &columns,
            &prepared.column_types(),
            &options.dtypes,
            &options.keys,
        )
    };

    let (action, mapping) = match (options.if_exists, catalog.exists) {
        (IfExists::Fail, true) => {
            return Err(BcpError::AlreadyExists {
                kind: options.kind.to_string(),
                table: options.table.to_string(),
            });
        }
        (IfExists::Fail | IfExists::Append, false) => (
            TableAction::Create {
                create_sql: create_sql()?,
            },
            ColumnMapping::identity(&columns),
        ),
        (IfExists::Replace, _) => (
            TableAction::Replace {
                drop_sql: ddl::drop_table_sql(&options.table),
                create_sql: create_sql()?,
            },
            ColumnMapping::identity(&columns),
        ),
        (IfExists::Append, true) => (
            TableAction::UseExisting,
            reconcile(&columns, &catalog.columns)?,
        ),
    };

    let format_file = build_format_file(&columns, delimiter, Some(&mapping.as_db_columns()))?;

    Ok(LoadPlan::Load(Box::new(PlannedLoad {
        rows: prepared.row_count(),
        frame: prepared,
        table: options.table.clone(),
        columns,
        delimiter,
        action,
        mapping,
        format_file,
        batch_size: options.batch_size,
    })))
}

fn check_batch_size(batch_size: Option<u32>, rows: usize) -> Result<()> {
    match batch_size {
        Some(0) => Err(BcpError::invalid("batch_size", "can't be 0")),
        Some(n) if n as usize > rows => Err(BcpError::invalid(
            "batch_size",
            format!("can't be larger than the number of rows in the frame ({rows})"),
        )),
        _ => Ok(()),
    }
}

// =============================================================================
// TESTS
// =============================================================================
