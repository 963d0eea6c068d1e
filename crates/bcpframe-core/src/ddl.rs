//! # DDL Module
//!
//! T-SQL text for everything a load runs outside of `bcp`:
//! catalog lookups, table creation and the native `INSERT` fallback.
//!
//! Identifiers are bracket-quoted and string literals are `N'...'` with
//! embedded quotes doubled. No statement is ever built from unescaped input.

use crate::bcp::SqlItemKind;
use crate::error::{BcpError, Result};
use crate::frame::{Cell, ColumnType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Default schema for destination tables.
pub const DEFAULT_SCHEMA: &str = "dbo";

/// SQL Server's limit on row constructors in one `VALUES` clause.
pub const MAX_ROWS_PER_INSERT: usize = 1000;

// =============================================================================
// IF EXISTS
// =============================================================================

/// What to do when the destination table already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IfExists {
    /// Refuse to load.
    #[default]
    Fail,
    /// Drop and recreate the table.
    Replace,
    /// Insert into the existing table, matching columns by name.
    Append,
}

impl fmt::Display for IfExists {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fail => "fail",
            Self::Replace => "replace",
            Self::Append => "append",
        };
        f.write_str(s)
    }
}

impl FromStr for IfExists {
    type Err = BcpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fail" => Ok(Self::Fail),
            "replace" => Ok(Self::Replace),
            "append" => Ok(Self::Append),
            other => Err(BcpError::invalid(
                "if_exists",
                format!("{other:?}, expected one of fail, replace, append"),
            )),
        }
    }
}

// =============================================================================
// TABLE REF
// =============================================================================

/// A schema-qualified table or view name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// `[schema].[name]`
    #[must_use]
    pub fn quoted(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Bracket-quote an identifier, doubling any `]`.
#[must_use]
pub fn quote_ident(ident: &str) -> String {
    format!("[{}]", ident.replace(']', "]]"))
}

/// `N'...'` literal with `'` doubled.
#[must_use]
pub fn quote_literal(value: &str) -> String {
    format!("N'{}'", value.replace('\'', "''"))
}

// =============================================================================
// TYPES
// =============================================================================

/// Default SQL Server type for an inferred column type.
#[must_use]
pub fn sql_type_for(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Bool => "BIT",
        ColumnType::Int => "BIGINT",
        ColumnType::Float => "FLOAT",
        ColumnType::Text => "NVARCHAR(max)",
    }
}

/// Resolve the SQL type of every column.
///
/// `dtypes` overrides win. Text key columns without an override become
/// `NVARCHAR(450)`, because `max` columns cannot be indexed.
pub fn resolve_sql_types(
    columns: &[String],
    types: &[ColumnType],
    dtypes: &BTreeMap<String, String>,
    keys: &[String],
) -> Result<Vec<String>> {
    if let Some(unknown) = dtypes.keys().find(|name| !columns.contains(name)) {
        return Err(BcpError::UnknownColumn(unknown.clone()));
    }
    Ok(columns
        .iter()
        .zip(types)
        .map(|(name, ty)| match dtypes.get(name) {
            Some(explicit) => explicit.clone(),
            None if *ty == ColumnType::Text && keys.contains(name) => "NVARCHAR(450)".to_string(),
            None => sql_type_for(*ty).to_string(),
        })
        .collect())
}

// =============================================================================
// STATEMENTS
// =============================================================================

/// `CREATE TABLE` for the given columns.
///
/// Key columns are declared `NOT NULL` and form the primary key.
pub fn create_table_sql(
    table: &TableRef,
    columns: &[String],
    types: &[ColumnType],
    dtypes: &BTreeMap<String, String>,
    keys: &[String],
) -> Result<String> {
    if let Some(unknown) = keys.iter().find(|k| !columns.contains(k)) {
        return Err(BcpError::UnknownColumn(unknown.clone()));
    }
    let sql_types = resolve_sql_types(columns, types, dtypes, keys)?;

    let mut defs: Vec<String> = columns
        .iter()
        .zip(&sql_types)
        .map(|(name, ty)| {
            let nullability = if keys.contains(name) { "NOT NULL" } else { "NULL" };
            format!("{} {} {}", quote_ident(name), ty, nullability)
        })
        .collect();

    if !keys.is_empty() {
        let key_list: Vec<String> = keys.iter().map(|k| quote_ident(k)).collect();
        defs.push(format!(
            "CONSTRAINT {} PRIMARY KEY ({})",
            quote_ident(&format!("pk_{}", table.name)),
            key_list.join(", ")
        ));
    }

    Ok(format!(
        "CREATE TABLE {} (\n    {}\n);",
        table.quoted(),
        defs.join(",\n    ")
    ))
}

/// Drop a table if it exists.
#[must_use]
pub fn drop_table_sql(table: &TableRef) -> String {
    format!("DROP TABLE IF EXISTS {};", table.quoted())
}

/// Remove every row, keeping the table.
#[must_use]
pub fn truncate_table_sql(table: &TableRef) -> String {
    format!("TRUNCATE TABLE {};", table.quoted())
}

/// Query returning one row when the table or view exists.
#[must_use]
pub fn exists_sql(table: &TableRef, kind: SqlItemKind) -> String {
    let catalog = match kind {
        SqlItemKind::View => "VIEWS",
        SqlItemKind::Table | SqlItemKind::Query => "TABLES",
    };
    format!(
        "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.{catalog} WHERE TABLE_SCHEMA = {} AND TABLE_NAME = {};",
        quote_literal(&table.schema),
        quote_literal(&table.name)
    )
}

/// Query returning `COLUMN_NAME, ORDINAL_POSITION` rows.
#[must_use]
pub fn columns_sql(table: &TableRef) -> String {
    format!(
        "SELECT COLUMN_NAME, ORDINAL_POSITION FROM INFORMATION_SCHEMA.COLUMNS \
         WHERE TABLE_SCHEMA = {} AND TABLE_NAME = {} ORDER BY ORDINAL_POSITION;",
        quote_literal(&table.schema),
        quote_literal(&table.name)
    )
}

/// SQL literal for a cell.
#[must_use]
pub fn cell_literal(cell: &Cell) -> String {
    match cell {
        Cell::Null => "NULL".to_string(),
        Cell::Text(s) => quote_literal(s),
        other => other.to_string(),
    }
}

/// `INSERT ... VALUES` statements, at most `min(batch, 1000)` rows each.
pub fn insert_batches_sql(
    table: &TableRef,
    columns: &[String],
    rows: &[Vec<Cell>],
    batch_size: Option<u32>,
) -> Result<Vec<String>> {
    let per_statement = match batch_size {
        Some(0) => return Err(BcpError::invalid("batch_size", "can't be 0")),
        Some(n) => (n as usize).min(MAX_ROWS_PER_INSERT),
        None => MAX_ROWS_PER_INSERT,
    };

    let column_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let head = format!(
        "INSERT INTO {} ({}) VALUES",
        table.quoted(),
        column_list.join(", ")
    );

    Ok(rows
        .chunks(per_statement)
        .map(|chunk| {
            let values: Vec<String> = chunk
                .iter()
                .map(|row| {
                    let cells: Vec<String> = row.iter().map(cell_literal).collect();
                    format!("({})", cells.join(", "))
                })
                .collect();
            format!("{head}\n{};", values.join(",\n"))
        })
        .collect())
}

// =============================================================================
// TESTS
// =============================================================================
