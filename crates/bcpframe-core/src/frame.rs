//! # Frame Module
//!
//! The in-memory table handed to a load.
//!
//! A `Frame` is an ordered list of column names, rows of scalar [`Cell`]s and
//! an optional row index. Cells are rendered to flat-file text with SQL Server
//! semantics (booleans become `1`/`0`, nulls become empty fields).

use crate::error::{BcpError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};

/// Name given to the index column when the index has no name.
pub const DEFAULT_INDEX_NAME: &str = "index";

// =============================================================================
// CELL
// =============================================================================

/// A single scalar value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    /// Interpret a raw delimited-text field.
    ///
    /// Empty → Null, `true`/`false` (any case) → Bool, integer → Int,
    /// finite float → Float, anything else → Text.
    pub fn parse(raw: &str) -> Self {
        if raw.is_empty() {
            return Self::Null;
        }
        if raw.eq_ignore_ascii_case("true") {
            return Self::Bool(true);
        }
        if raw.eq_ignore_ascii_case("false") {
            return Self::Bool(false);
        }
        if let Ok(i) = raw.parse::<i64>() {
            return Self::Int(i);
        }
        match raw.parse::<f64>() {
            Ok(f) if f.is_finite() => Self::Float(f),
            _ => Self::Text(raw.to_string()),
        }
    }

    /// Interpret a raw field as a member of a column of type `ty`.
    ///
    /// Empty → Null. Text columns keep the value verbatim; Float columns
    /// store integers as floats. A value that does not fit `ty` stays Text.
    pub fn parse_as(raw: String, ty: ColumnType) -> Self {
        if raw.is_empty() {
            return Self::Null;
        }
        match (ty, Self::parse(&raw)) {
            (ColumnType::Bool, cell @ Self::Bool(_))
            | (ColumnType::Int, cell @ Self::Int(_))
            | (ColumnType::Float, cell @ Self::Float(_)) => cell,
            (ColumnType::Float, Self::Int(_)) => match raw.parse::<f64>() {
                Ok(f) => Self::Float(f),
                Err(_) => Self::Text(raw),
            },
            _ => Self::Text(raw),
        }
    }

    /// Convert a JSON scalar. Arrays and objects are rejected.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        use serde_json::Value;
        match value {
            Value::Null => Ok(Self::Null),
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Self::Float(f))
                } else {
                    Err(BcpError::InvalidInput(format!("unrepresentable number {n}")))
                }
            }
            Value::String(s) => Ok(Self::Text(s.clone())),
            Value::Array(_) | Value::Object(_) => Err(BcpError::InvalidInput(format!(
                "nested values are not supported: {value}"
            ))),
        }
    }

    /// Check if this cell is null.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Column type this cell alone would produce. `None` for nulls.
    #[must_use]
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(ColumnType::Bool),
            Self::Int(_) => Some(ColumnType::Int),
            Self::Float(_) => Some(ColumnType::Float),
            Self::Text(_) => Some(ColumnType::Text),
        }
    }
}

impl fmt::Display for Cell {
    /// Flat-file rendering.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(true) => f.write_str("1"),
            Self::Bool(false) => f.write_str("0"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

// =============================================================================
// COLUMN TYPE
// =============================================================================

/// Inferred storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Bool,
    Int,
    Float,
    Text,
}

impl ColumnType {
    /// Narrowest type holding values of both `self` and `other`.
    ///
    /// Int and Float widen to Float; Bool mixed with anything else widens to Text.
    #[must_use]
    pub fn widen(self, other: Self) -> Self {
        use ColumnType::{Float, Int, Text};
        match (self, other) {
            (a, b) if a == b => a,
            (Int, Float) | (Float, Int) => Float,
            _ => Text,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Text => "text",
        };
        f.write_str(name)
    }
}

// =============================================================================
// FRAME
// =============================================================================

/// Row index carried beside the data columns.
#[derive(Debug, Clone, PartialEq, Default)]
struct RowIndex {
    name: Option<String>,
    values: Vec<Cell>,
}

/// An ordered, column-named table of cells.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
    index: Option<RowIndex>,
}

impl Frame {
    /// Create a frame, checking that every row has one cell per column.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Result<Self> {
        let expected = columns.len();
        if let Some((row, cells)) = rows
            .iter()
            .enumerate()
            .find(|(_, cells)| cells.len() != expected)
        {
            return Err(BcpError::RaggedRow {
                row,
                expected,
                found: cells.len(),
            });
        }
        Ok(Self {
            columns,
            rows,
            index: None,
        })
    }

    /// Read a delimited file whose first record is the header.
    pub fn from_csv_reader<R: Read>(reader: R, delimiter: u8) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .from_reader(reader);

        let columns: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
        let mut raw: Vec<Vec<String>> = Vec::new();
        for record in rdr.records() {
            raw.push(record?.iter().map(str::to_string).collect());
        }

        // A column is typed as a whole: one non-numeric value keeps every
        // value of the column as the text that was read.
        let types: Vec<ColumnType> = (0..columns.len())
            .map(|col| {
                raw.iter()
                    .filter_map(|row| row.get(col).and_then(|v| Cell::parse(v).column_type()))
                    .reduce(ColumnType::widen)
                    .unwrap_or(ColumnType::Text)
            })
            .collect();

        let rows = raw
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .zip(&types)
                    .map(|(value, ty)| Cell::parse_as(value, *ty))
                    .collect()
            })
            .collect();
        Self::new(columns, rows)
    }

    /// Build a frame from a JSON array of flat objects.
    ///
    /// Columns appear in order of first appearance; absent keys become nulls.
    pub fn from_json_records(value: &serde_json::Value) -> Result<Self> {
        let records = value
            .as_array()
            .ok_or_else(|| BcpError::InvalidInput("expected a JSON array of objects".into()))?;

        let mut columns: Vec<String> = Vec::new();
        let mut positions: BTreeMap<String, usize> = BTreeMap::new();
        let mut sparse: Vec<BTreeMap<usize, Cell>> = Vec::with_capacity(records.len());

        for (row, record) in records.iter().enumerate() {
            let object = record.as_object().ok_or_else(|| {
                BcpError::InvalidInput(format!("record {row} is not a JSON object"))
            })?;
            let mut cells = BTreeMap::new();
            for (key, value) in object {
                let position = *positions.entry(key.clone()).or_insert_with(|| {
                    columns.push(key.clone());
                    columns.len() - 1
                });
                cells.insert(position, Cell::from_json(value)?);
            }
            sparse.push(cells);
        }

        let width = columns.len();
        let rows = sparse
            .into_iter()
            .map(|mut cells| {
                (0..width)
                    .map(|i| cells.remove(&i).unwrap_or(Cell::Null))
                    .collect()
            })
            .collect();
        Self::new(columns, rows)
    }

    /// Read JSON records from a reader.
    pub fn from_json_reader<R: Read>(reader: R) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_reader(reader)?;
        Self::from_json_records(&value)
    }

    /// Column names in order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows in order.
    #[must_use]
    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// A frame with no rows or no columns has nothing to load.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.columns.is_empty()
    }

    /// Position of a column by exact name.
    #[must_use]
    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Names occurring more than once, each reported once, in first-appearance order.
    #[must_use]
    pub fn duplicate_columns(&self) -> Vec<String> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for name in &self.columns {
            *counts.entry(name.as_str()).or_default() += 1;
        }
        let mut seen = Vec::new();
        for name in &self.columns {
            if counts.get(name.as_str()).copied().unwrap_or(0) > 1 && !seen.contains(name) {
                seen.push(name.clone());
            }
        }
        seen
    }

    /// Move a data column into the row index.
    pub fn set_index(mut self, column: &str) -> Result<Self> {
        let position = self
            .column_position(column)
            .ok_or_else(|| BcpError::UnknownColumn(column.to_string()))?;
        let name = self.columns.remove(position);
        let values = self.rows.iter_mut().map(|row| row.remove(position)).collect();
        self.index = Some(RowIndex {
            name: Some(name),
            values,
        });
        Ok(self)
    }

    /// Name of the row index, if one was set.
    #[must_use]
    pub fn index_name(&self) -> Option<&str> {
        self.index.as_ref().and_then(|i| i.name.as_deref())
    }

    /// Return a frame whose first column is the row index.
    ///
    /// Without an explicit index the column holds 0-based row numbers and is
    /// named [`DEFAULT_INDEX_NAME`].
    #[must_use]
    pub fn with_index(&self) -> Self {
        let (name, values) = match &self.index {
            Some(index) => (
                index
                    .name
                    .clone()
                    .unwrap_or_else(|| DEFAULT_INDEX_NAME.to_string()),
                index.values.clone(),
            ),
            None => (
                DEFAULT_INDEX_NAME.to_string(),
                (0..self.rows.len()).map(|i| Cell::Int(i as i64)).collect(),
            ),
        };

        let mut columns = Vec::with_capacity(self.columns.len() + 1);
        columns.push(name);
        columns.extend(self.columns.iter().cloned());

        let rows = self
            .rows
            .iter()
            .zip(values)
            .map(|(row, value)| {
                let mut cells = Vec::with_capacity(row.len() + 1);
                cells.push(value);
                cells.extend(row.iter().cloned());
                cells
            })
            .collect();

        Self {
            columns,
            rows,
            index: None,
        }
    }

    /// Inferred type of every column, in column order.
    #[must_use]
    pub fn column_types(&self) -> Vec<ColumnType> {
        (0..self.columns.len())
            .map(|col| {
                self.rows
                    .iter()
                    .filter_map(|row| row.get(col).and_then(Cell::column_type))
                    .reduce(ColumnType::widen)
                    .unwrap_or(ColumnType::Text)
            })
            .collect()
    }

    /// Write rows (no header) as a bcp character-mode flat file.
    ///
    /// Fields are never quoted: the delimiter must already be known to be
    /// absent from the data (see [`crate::delimiter::choose_delimiter`]).
    pub fn write_flat_file<W: Write>(&self, writer: W, delimiter: char) -> Result<()> {
        let delimiter = u8::try_from(delimiter)
            .map_err(|_| BcpError::invalid("delimiter", "must be an ASCII character"))?;
        let mut wtr = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .quote_style(csv::QuoteStyle::Never)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(writer);

        for row in &self.rows {
            wtr.write_record(row.iter().map(|cell| cell.to_string()))?;
        }
        wtr.flush()?;
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
