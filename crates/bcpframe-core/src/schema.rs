//! # Schema Module
//!
//! Reconciliation of frame columns against an existing destination table.
//!
//! Appending to a table requires every frame column to exist in the table.
//! The reverse is not required: table columns missing from the frame are left
//! to their default (or NULL), and frame columns may arrive in any order. Both
//! cases are resolved by mapping each frame column to its server ordinal.

use crate::error::{BcpError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// DB COLUMNS
// =============================================================================

/// Destination columns as reported by `INFORMATION_SCHEMA.COLUMNS`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbColumns {
    /// Column name -> 1-based ordinal.
    ordinals: BTreeMap<String, usize>,
}

impl DbColumns {
    /// Build from `(name, ordinal)` pairs.
    #[must_use]
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, usize)>) -> Self {
        Self {
            ordinals: pairs.into_iter().collect(),
        }
    }

    /// Ordinal of a column by exact name.
    #[must_use]
    pub fn ordinal(&self, name: &str) -> Option<usize> {
        self.ordinals.get(name).copied()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.ordinals.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ordinals.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ordinals.is_empty()
    }

    /// Column names ordered by ordinal.
    #[must_use]
    pub fn names_in_order(&self) -> Vec<String> {
        let mut pairs: Vec<(&String, &usize)> = self.ordinals.iter().collect();
        pairs.sort_by_key(|(_, ordinal)| **ordinal);
        pairs.into_iter().map(|(name, _)| name.clone()).collect()
    }
}

// =============================================================================
// COLUMN MAPPING
// =============================================================================

/// Result of reconciling frame columns with a destination table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    /// `(frame column, server ordinal)` in frame order.
    pub columns: Vec<(String, usize)>,
    /// Table columns the frame does not supply, in ordinal order.
    pub missing: Vec<String>,
    /// True when frame order differs from table order.
    pub reordered: bool,
}

impl ColumnMapping {
    /// Mapping for a freshly created table: ordinals follow frame order.
    #[must_use]
    pub fn identity(columns: &[String]) -> Self {
        Self {
            columns: columns
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), i + 1))
                .collect(),
            missing: Vec::new(),
            reordered: false,
        }
    }

    /// Server ordinals keyed by column name, for the format file.
    #[must_use]
    pub fn as_db_columns(&self) -> DbColumns {
        DbColumns::from_pairs(self.columns.iter().cloned())
    }

    /// True when host fields map one-to-one onto ordinals 1..=n.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.missing.is_empty()
            && self
                .columns
                .iter()
                .enumerate()
                .all(|(i, (_, ordinal))| *ordinal == i + 1)
    }
}

/// Map each frame column to its server ordinal.
///
/// Fails with [`BcpError::ExtraColumns`] listing every frame column that the
/// table lacks. Names are compared exactly.
pub fn reconcile(frame_columns: &[String], db: &DbColumns) -> Result<ColumnMapping> {
    let extra: Vec<String> = frame_columns
        .iter()
        .filter(|name| !db.contains(name))
        .cloned()
        .collect();
    if !extra.is_empty() {
        return Err(BcpError::ExtraColumns(extra));
    }

    let columns: Vec<(String, usize)> = frame_columns
        .iter()
        .filter_map(|name| db.ordinal(name).map(|ordinal| (name.clone(), ordinal)))
        .collect();

    let missing = db
        .names_in_order()
        .into_iter()
        .filter(|name| !frame_columns.contains(name))
        .collect();

    let reordered = columns.windows(2).any(|pair| pair[0].1 > pair[1].1);

    Ok(ColumnMapping {
        columns,
        missing,
        reordered,
    })
}

// =============================================================================
// TESTS
// =============================================================================
