//! # Delimiter Module
//!
//! Field delimiter selection for bcp character-mode flat files.
//!
//! bcp has no quoting: a field terminator that occurs inside the data splits
//! the field. The delimiter is therefore the first candidate that does not
//! occur in any rendered cell, and line breaks inside cells are rejected.

use crate::error::{BcpError, Result};
use crate::frame::{Cell, Frame};

/// Delimiter candidates, in order of preference.
pub const DELIMITER_OPTIONS: [char; 3] = [',', '|', '\t'];

/// Row terminator used in flat files and format files.
pub const ROW_TERMINATOR: char = '\n';

/// Choose the first delimiter that appears in no cell.
///
/// Also fails when a text cell contains `\n` or `\r`.
pub fn choose_delimiter(frame: &Frame) -> Result<char> {
    let mut present = [false; DELIMITER_OPTIONS.len()];

    for (row, cells) in frame.rows().iter().enumerate() {
        for (col, cell) in cells.iter().enumerate() {
            let owned;
            let rendered: &str = match cell {
                Cell::Text(s) => {
                    if s.contains(['\n', '\r']) {
                        return Err(BcpError::EmbeddedNewline {
                            column: frame.columns().get(col).cloned().unwrap_or_default(),
                            row,
                        });
                    }
                    s
                }
                other => {
                    owned = other.to_string();
                    &owned
                }
            };
            for (flag, candidate) in present.iter_mut().zip(DELIMITER_OPTIONS) {
                if !*flag && rendered.contains(candidate) {
                    *flag = true;
                }
            }
        }
    }

    DELIMITER_OPTIONS
        .iter()
        .zip(present)
        .find(|(_, used)| !used)
        .map(|(candidate, _)| *candidate)
        .ok_or_else(|| BcpError::DelimiterExhausted(DELIMITER_OPTIONS.to_vec()))
}

// =============================================================================
// TESTS
// =============================================================================
