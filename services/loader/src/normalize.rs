//! Column normalizer and value coercion.
//!
//! Every header the pipeline reads goes through [`canonical_header`], and
//! every ward key through [`parse_ward`]; topic tables are joined on
//! nothing else.

use crate::error::{EtlError, Result};
use crate::reader::{RawRow, RawTable, SkippedRow};

/// Trim, lowercase, and turn spaces and slashes into underscores.
pub fn canonical_header(raw: &str) -> String {
    raw.trim().to_lowercase().replace([' ', '/'], "_")
}

/// Parse `"7"`, `"WARD 7"` or `"Ward   7"` into `7`.
pub fn parse_ward(raw: &str) -> Result<i32> {
    let trimmed = raw.trim();
    let invalid = || EtlError::InvalidWardIdentifier {
        value: raw.to_string(),
    };

    let digits = match trimmed.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("ward") => trimmed[4..].trim_start(),
        _ => trimmed,
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    digits.parse::<i32>().map_err(|_| invalid())
}

/// Collapse internal whitespace runs to a single space and trim.
pub fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

// =============================================================================
// Numeric coercion
// =============================================================================

fn strip_number(raw: &str) -> String {
    raw.trim()
        .trim_end_matches('%')
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect()
}

/// Non-negative integer count; thousands separators and a zero fraction
/// (`"1,234"`, `"12.0"`) are accepted.
pub fn parse_count(raw: &str, line: u64, column: &str) -> Result<i64> {
    let cleaned = strip_number(raw);
    let cleaned = cleaned.strip_suffix(".0").unwrap_or(&cleaned);
    let value: i64 = cleaned.parse().map_err(|_| EtlError::MalformedRow {
        line,
        reason: format!("{column}: expected a count, found {raw:?}"),
    })?;
    if value < 0 {
        return Err(EtlError::MalformedRow {
            line,
            reason: format!("{column}: negative count {value}"),
        });
    }
    Ok(value)
}

/// Non-negative rate or percentage; a trailing `%` is dropped and the number
/// kept on the 0-100 scale.
pub fn parse_measure(raw: &str, line: u64, column: &str) -> Result<f64> {
    let cleaned = strip_number(raw);
    let value: f64 = cleaned.parse().map_err(|_| EtlError::MalformedRow {
        line,
        reason: format!("{column}: expected a number, found {raw:?}"),
    })?;
    if !value.is_finite() || value < 0.0 {
        return Err(EtlError::MalformedRow {
            line,
            reason: format!("{column}: invalid measure {raw:?}"),
        });
    }
    Ok(value)
}

pub fn parse_optional_count(raw: &str, line: u64, column: &str) -> Result<Option<i64>> {
    if is_blank(raw) {
        return Ok(None);
    }
    parse_count(raw, line, column).map(Some)
}

pub fn parse_optional_measure(raw: &str, line: u64, column: &str) -> Result<Option<f64>> {
    if is_blank(raw) {
        return Ok(None);
    }
    parse_measure(raw, line, column).map(Some)
}

fn is_blank(raw: &str) -> bool {
    let t = raw.trim();
    t.is_empty() || t.eq_ignore_ascii_case("nan") || t.eq_ignore_ascii_case("null")
}

// =============================================================================
// Topic tables
// =============================================================================

/// A source table with canonical headers.
#[derive(Debug, Clone)]
pub struct TopicTable {
    pub file: String,
    pub content_hash: String,
    pub headers: Vec<String>,
    /// Source header text, trimmed; used as category labels for wide topics
    pub labels: Vec<String>,
    pub rows: Vec<RawRow>,
    pub fallback_rows: usize,
    /// Rows the reader already dropped
    pub read_skipped: Vec<SkippedRow>,
}

impl From<RawTable> for TopicTable {
    fn from(raw: RawTable) -> Self {
        Self {
            headers: raw.headers.iter().map(|h| canonical_header(h)).collect(),
            labels: raw.headers.iter().map(|h| collapse_whitespace(h)).collect(),
            file: raw.file,
            content_hash: raw.content_hash,
            rows: raw.rows,
            fallback_rows: raw.fallback_rows,
            read_skipped: raw.skipped,
        }
    }
}

impl TopicTable {
    /// Index of a configured column, compared after canonicalization.
    pub fn column(&self, name: &str) -> Result<usize> {
        let wanted = canonical_header(name);
        self.headers
            .iter()
            .position(|h| *h == wanted)
            .ok_or_else(|| EtlError::MissingColumn {
                column: wanted,
                available: self.headers.join(", "),
            })
    }

    pub fn optional_column(&self, name: Option<&str>) -> Result<Option<usize>> {
        name.map(|n| self.column(n)).transpose()
    }
}

/// Field accessor tolerant of short rows.
pub fn field(row: &RawRow, idx: usize) -> &str {
    row.fields.get(idx).map(String::as_str).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // HEADER CANONICALIZATION
    // -------------------------------------------------------------------------

    #[test]
    fn test_canonical_header() {
        assert_eq!(canonical_header("  Total Crime "), "total_crime");
        assert_eq!(canonical_header("Rate per 1000 Residents"), "rate_per_1000_residents");
        assert_eq!(canonical_header("Men/Women"), "men_women");
        assert_eq!(canonical_header("ward"), "ward");
    }

    #[test]
    fn test_canonical_header_is_idempotent() {
        let once = canonical_header(" Labour Force/Participation Rate");
        assert_eq!(canonical_header(&once), once);
    }

    // -------------------------------------------------------------------------
    // WARD IDENTIFIERS
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_ward_forms() {
        assert_eq!(parse_ward("WARD 7").unwrap(), 7);
        assert_eq!(parse_ward("Ward   7").unwrap(), 7);
        assert_eq!(parse_ward("ward 7").unwrap(), 7);
        assert_eq!(parse_ward("7").unwrap(), 7);
        assert_eq!(parse_ward(&7.to_string()).unwrap(), 7);
        assert_eq!(parse_ward("  WARD 14 ").unwrap(), 14);
    }

    #[test]
    fn test_parse_ward_without_number_fails() {
        assert!(matches!(
            parse_ward("WARD"),
            Err(EtlError::InvalidWardIdentifier { .. })
        ));
    }

    #[test]
    fn test_parse_ward_garbage_fails() {
        for bad in ["", "  ", "WARD X", "Ward 7b", "-3", "Wards 7", "7.5"] {
            assert!(
                matches!(parse_ward(bad), Err(EtlError::InvalidWardIdentifier { .. })),
                "{bad:?} should not parse"
            );
        }
    }

    // -------------------------------------------------------------------------
    // NUMERIC COERCION
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_count_thousands_separator() {
        assert_eq!(parse_count("1,234,567", 2, "votes").unwrap(), 1_234_567);
        assert_eq!(parse_count(" 42 ", 2, "votes").unwrap(), 42);
        assert_eq!(parse_count("12.0", 2, "votes").unwrap(), 12);
    }

    #[test]
    fn test_parse_count_rejects_non_numeric() {
        let err = parse_count("n/a", 9, "total").unwrap_err();
        assert!(err.is_row_level());
        assert!(err.to_string().contains("line 9"));
        assert!(parse_count("-5", 2, "total").is_err());
        assert!(parse_count("1.5", 2, "total").is_err());
    }

    #[test]
    fn test_parse_measure_percent() {
        assert_eq!(parse_measure("12.5%", 2, "percent").unwrap(), 12.5);
        assert_eq!(parse_measure("3.1", 2, "rate").unwrap(), 3.1);
        assert!(parse_measure("abc", 2, "rate").is_err());
        assert!(parse_measure("-1", 2, "rate").is_err());
    }

    #[test]
    fn test_parse_optional_blank() {
        assert_eq!(parse_optional_count("", 2, "x").unwrap(), None);
        assert_eq!(parse_optional_measure("NaN", 2, "x").unwrap(), None);
        assert_eq!(parse_optional_measure("2.5", 2, "x").unwrap(), Some(2.5));
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  Jane   Smith "), "Jane Smith");
    }

    // -------------------------------------------------------------------------
    // TOPIC TABLE
    // -------------------------------------------------------------------------

    #[test]
    fn test_topic_table_column_lookup() {
        let raw = crate::reader::read_bytes(
            "crime.csv",
            b"Ward,Total Crime,Rate per 1000 Residents\nWARD 1,10,1.5\n",
            crate::reader::LATIN1,
        )
        .unwrap();
        let table = TopicTable::from(raw);
        assert_eq!(table.column("Total Crime").unwrap(), 1);
        assert_eq!(table.column("rate_per_1000_residents").unwrap(), 2);
        let err = table.column("population").unwrap_err();
        assert!(matches!(err, EtlError::MissingColumn { .. }));
        assert!(err.to_string().contains("total_crime"));
    }
}
