//! # Format File Module
//!
//! Non-XML bcp format files (version 9.0).
//!
//! A format file tells `bcp in` how each host-file field is terminated and
//! which server column it lands in. Mapping fields to server ordinals is what
//! lets a load skip destination columns or feed them out of order.
//!
//! Layout:
//!
//! ```text
//! 9.0
//! 3
//! 1    SQLCHAR    0    0    ","     2    name     SQL_Latin1_General_CP1_CI_AS
//! 2    SQLCHAR    0    0    ","     1    id       SQL_Latin1_General_CP1_CI_AS
//! 3    SQLCHAR    0    0    "\n"    3    score    SQL_Latin1_General_CP1_CI_AS
//! ```

use crate::delimiter::ROW_TERMINATOR;
use crate::error::{BcpError, Result};
use crate::schema::DbColumns;
use std::fmt;

/// Format file version understood by SQL Server 2005 and later.
pub const FORMAT_VERSION: &str = "9.0";

/// Host file data type for character data.
pub const SQLCHAR: &str = "SQLCHAR";

/// Collation written for every column.
pub const SQL_COLLATION: &str = "SQL_Latin1_General_CP1_CI_AS";

const FIELD_SEPARATOR: &str = "    ";

// =============================================================================
// FORMAT FIELD
// =============================================================================

/// One host-file field line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatField {
    /// 1-based position in the host file.
    pub host_order: usize,
    /// Field terminator (unescaped).
    pub terminator: String,
    /// 1-based destination column ordinal.
    pub server_order: usize,
    /// Destination column name.
    pub name: String,
}

/// A parsed or generated non-XML format file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatFile {
    pub fields: Vec<FormatField>,
}

impl FormatFile {
    /// Lay out fields for `columns`, terminated by `delimiter` except the last
    /// one, which ends the row.
    ///
    /// Server ordinals follow host order unless `db_order` is given, in which
    /// case each column's ordinal is looked up by name.
    pub fn new(columns: &[String], delimiter: char, db_order: Option<&DbColumns>) -> Result<Self> {
        let count = columns.len();
        let mut fields = Vec::with_capacity(count);
        for (i, name) in columns.iter().enumerate() {
            let host_order = i + 1;
            let terminator = if host_order == count {
                ROW_TERMINATOR
            } else {
                delimiter
            };
            let server_order = match db_order {
                Some(db) => db
                    .ordinal(name)
                    .ok_or_else(|| BcpError::UnknownColumn(name.clone()))?,
                None => host_order,
            };
            fields.push(FormatField {
                host_order,
                terminator: terminator.to_string(),
                server_order,
                name: name.clone(),
            });
        }
        Ok(Self { fields })
    }

    /// Read format file text back.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());

        let version = lines
            .next()
            .ok_or_else(|| BcpError::InvalidFormatFile("empty file".into()))?;
        if version.trim() != FORMAT_VERSION {
            return Err(BcpError::InvalidFormatFile(format!(
                "unsupported version {:?}",
                version.trim()
            )));
        }

        let count: usize = lines
            .next()
            .and_then(|l| l.trim().parse().ok())
            .ok_or_else(|| BcpError::InvalidFormatFile("missing column count".into()))?;

        let fields = lines.map(parse_field).collect::<Result<Vec<_>>>()?;
        if fields.len() != count {
            return Err(BcpError::InvalidFormatFile(format!(
                "declares {count} fields but has {}",
                fields.len()
            )));
        }
        Ok(Self { fields })
    }
}

impl fmt::Display for FormatFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{FORMAT_VERSION}")?;
        writeln!(f, "{}", self.fields.len())?;
        for field in &self.fields {
            let parts = [
                field.host_order.to_string(),
                SQLCHAR.to_string(),
                "0".to_string(),
                "0".to_string(),
                format!("\"{}\"", escape_terminator(&field.terminator)),
                field.server_order.to_string(),
                field.name.clone(),
                SQL_COLLATION.to_string(),
            ];
            // bcp rejects a format file whose last line lacks a line break
            writeln!(f, "{}", parts.join(FIELD_SEPARATOR))?;
        }
        Ok(())
    }
}

/// Build the text of a format file. See [`FormatFile::new`].
pub fn build_format_file(
    columns: &[String],
    delimiter: char,
    db_order: Option<&DbColumns>,
) -> Result<String> {
    Ok(FormatFile::new(columns, delimiter, db_order)?.to_string())
}

// =============================================================================
// ESCAPING
// =============================================================================

/// Escape a terminator for use inside the quoted terminator column.
pub fn escape_terminator(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            other => out.push(other),
        }
    }
    out
}

/// Inverse of [`escape_terminator`].
pub fn unescape_terminator(escaped: &str) -> Result<String> {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('0') => out.push('\0'),
            other => {
                return Err(BcpError::InvalidFormatFile(format!(
                    "bad escape sequence \\{}",
                    other.map(String::from).unwrap_or_default()
                )));
            }
        }
    }
    Ok(out)
}

/// Parse one field line. The terminator is quoted and may contain spaces.
fn parse_field(line: &str) -> Result<FormatField> {
    let bad = || BcpError::InvalidFormatFile(format!("malformed field line {line:?}"));

    let open = line.find('"').ok_or_else(bad)?;
    let close = find_closing_quote(line, open + 1).ok_or_else(bad)?;

    let head: Vec<&str> = line[..open].split_whitespace().collect();
    let tail: Vec<&str> = line[close + 1..].split_whitespace().collect();
    if head.len() != 4 || tail.len() < 3 {
        return Err(bad());
    }

    let host_order = head[0].parse().map_err(|_| bad())?;
    let server_order = tail[0].parse().map_err(|_| bad())?;
    let terminator = unescape_terminator(&line[open + 1..close])?;

    Ok(FormatField {
        host_order,
        terminator,
        server_order,
        name: tail[1..tail.len() - 1].join(" "),
    })
}

fn find_closing_quote(line: &str, from: usize) -> Option<usize> {
    let bytes = line.as_bytes();
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| (*n).to_string()).collect()
    }

    #[test]
    fn default_order_follows_columns() {
        let text = build_format_file(&cols(&["a", "b"]), ',', None).unwrap();
        let expected = "9.0\n2\n\
            1    SQLCHAR    0    0    \",\"    1    a    SQL_Latin1_General_CP1_CI_AS\n\
            2    SQLCHAR    0    0    \"\\n\"    2    b    SQL_Latin1_General_CP1_CI_AS\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn text_ends_with_line_break() {
        let text = build_format_file(&cols(&["only"]), '|', None).unwrap();
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn tab_delimiter_is_escaped() {
        let text = build_format_file(&cols(&["a", "b"]), '\t', None).unwrap();
        assert!(text.contains("\"\\t\""));
    }

    #[test]
    fn db_order_maps_server_ordinals() {
        let db = DbColumns::from_pairs(vec![
            ("id".to_string(), 1),
            ("name".to_string(), 2),
            ("score".to_string(), 3),
        ]);
        let file = FormatFile::new(&cols(&["score", "id"]), ',', Some(&db)).unwrap();
        let orders: Vec<usize> = file.fields.iter().map(|f| f.server_order).collect();
        assert_eq!(orders, vec![3, 1]);
    }

    #[test]
    fn db_order_missing_column_fails() {
        let db = DbColumns::from_pairs(vec![("id".to_string(), 1)]);
        let result = FormatFile::new(&cols(&["id", "nope"]), ',', Some(&db));
        assert!(matches!(result, Err(BcpError::UnknownColumn(c)) if c == "nope"));
    }

    #[test]
    fn parse_reads_generated_file() {
        let file = FormatFile::new(&cols(&["x", "y", "z"]), '|', None).unwrap();
        let parsed = FormatFile::parse(&file.to_string()).unwrap();
        assert_eq!(parsed, file);
    }

    #[test]
    fn parse_rejects_wrong_version_and_count() {
        assert!(FormatFile::parse("").is_err());
        assert!(FormatFile::parse("14.0\n0\n").is_err());
        let text = "9.0\n2\n1    SQLCHAR    0    0    \"\\n\"    1    a    SQL_Latin1_General_CP1_CI_AS\n";
        assert!(FormatFile::parse(text).is_err());
    }

    proptest! {
        #[test]
        fn terminator_escaping_is_reversible(raw in "[ -~\t\n\r]{0,8}") {
            let escaped = escape_terminator(&raw);
            prop_assert!(!escaped.contains('\n'));
            prop_assert_eq!(unescape_terminator(&escaped).unwrap(), raw);
        }
    }
}
