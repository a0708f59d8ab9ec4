//! Source file reader.
//!
//! Detects a CSV's text encoding from its leading bytes, then parses it
//! record by record. A record that does not decode under the detected
//! encoding is retried once under the fallback; records that still fail,
//! or that the CSV parser rejects, are skipped and counted. Only an
//! unopenable file or an unreadable header row fails the whole file.

use std::borrow::Cow;
use std::path::Path;

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::ReadError;

/// Bytes inspected for encoding detection.
const SAMPLE_BYTES: usize = 10_000;

/// Latin-1 as browsers and `encoding_rs` define it (the `latin1` label).
pub const LATIN1: &Encoding = WINDOWS_1252;

#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    /// 1-based line number in the source file
    pub line: u64,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRow {
    pub line: u64,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct RawTable {
    pub file: String,
    pub encoding: &'static Encoding,
    pub content_hash: String,
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
    /// Rows that only decoded under the fallback encoding
    pub fallback_rows: usize,
    pub skipped: Vec<SkippedRow>,
}

/// Pick an encoding from a leading sample: BOM, then UTF-8 validity, then `fallback`.
pub fn detect_encoding(sample: &[u8], fallback: &'static Encoding) -> &'static Encoding {
    if let Some((encoding, _)) = Encoding::for_bom(sample) {
        return encoding;
    }
    match std::str::from_utf8(sample) {
        Ok(_) => UTF_8,
        // A multi-byte sequence cut off by the sample boundary is still UTF-8.
        Err(e) if e.error_len().is_none() && sample.len() == SAMPLE_BYTES => UTF_8,
        Err(_) => fallback,
    }
}

pub fn read_file(path: &Path, fallback: &'static Encoding) -> Result<RawTable, ReadError> {
    let bytes = std::fs::read(path).map_err(|source| ReadError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    read_bytes(&name, &bytes, fallback)
}

/// Parse an in-memory CSV. `file` is only used for diagnostics.
pub fn read_bytes(
    file: &str,
    bytes: &[u8],
    fallback: &'static Encoding,
) -> Result<RawTable, ReadError> {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let content_hash = format!("sha256:{:x}", hasher.finalize());

    let sample = &bytes[..bytes.len().min(SAMPLE_BYTES)];
    let detected = detect_encoding(sample, fallback);

    // The CSV parser works on ASCII-compatible bytes; UTF-16 input is
    // transcoded up front and then handled as UTF-8.
    let (body, encoding): (Cow<[u8]>, &'static Encoding) = if detected.is_ascii_compatible() {
        let bom_len = Encoding::for_bom(bytes).map(|(_, len)| len).unwrap_or(0);
        (Cow::Borrowed(&bytes[bom_len..]), detected)
    } else {
        let (text, _, _) = detected.decode(bytes);
        (Cow::Owned(text.into_owned().into_bytes()), UTF_8)
    };

    let mut reader = csv::ReaderBuilder::new()
        .flexible(false)
        .trim(csv::Trim::All)
        .from_reader(body.as_ref());

    let header_record = reader
        .byte_headers()
        .map_err(|e| ReadError::MalformedRow {
            file: file.to_string(),
            line: 1,
            reason: e.to_string(),
        })?
        .clone();

    if header_record.iter().all(|h| h.is_empty()) {
        return Err(ReadError::MalformedRow {
            file: file.to_string(),
            line: 1,
            reason: "missing header row".to_string(),
        });
    }

    let (headers, _) = decode_record(&header_record, encoding, fallback).ok_or_else(|| {
        ReadError::EncodingFailure {
            file: file.to_string(),
            detected: encoding.name(),
            fallback: fallback.name(),
        }
    })?;

    let mut rows = Vec::new();
    let mut skipped = Vec::new();
    let mut fallback_rows = 0;
    let mut last_line = 1;

    for result in reader.byte_records() {
        match result {
            Ok(record) => {
                let line = record.position().map(|p| p.line()).unwrap_or(last_line + 1);
                last_line = line;
                match decode_record(&record, encoding, fallback) {
                    Some((fields, used_fallback)) => {
                        if used_fallback {
                            fallback_rows += 1;
                        }
                        rows.push(RawRow { line, fields });
                    }
                    None => skipped.push(SkippedRow {
                        line,
                        reason: format!(
                            "not decodable as {} or {}",
                            encoding.name(),
                            fallback.name()
                        ),
                    }),
                }
            }
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(last_line + 1);
                last_line = line;
                skipped.push(SkippedRow {
                    line,
                    reason: e.to_string(),
                });
            }
        }
    }

    for row in &skipped {
        debug!(file, line = row.line, reason = %row.reason, "skipped row");
    }
    if !skipped.is_empty() {
        warn!(file, skipped = skipped.len(), "skipped unreadable rows");
    }
    if fallback_rows > 0 {
        info!(
            file,
            rows = fallback_rows,
            encoding = fallback.name(),
            "decoded rows with fallback encoding"
        );
    }

    Ok(RawTable {
        file: file.to_string(),
        encoding,
        content_hash,
        headers,
        rows,
        fallback_rows,
        skipped,
    })
}

/// Decode every field strictly under `primary`, retrying the whole record
/// under `fallback`. Returns the fields and whether the fallback was used.
fn decode_record(
    record: &csv::ByteRecord,
    primary: &'static Encoding,
    fallback: &'static Encoding,
) -> Option<(Vec<String>, bool)> {
    if let Some(fields) = decode_fields(record, primary) {
        return Some((fields, false));
    }
    if fallback != primary {
        return decode_fields(record, fallback).map(|fields| (fields, true));
    }
    None
}

fn decode_fields(record: &csv::ByteRecord, encoding: &'static Encoding) -> Option<Vec<String>> {
    record
        .iter()
        .map(|field| {
            encoding
                .decode_without_bom_handling_and_without_replacement(field)
                .map(Cow::into_owned)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // ENCODING DETECTION
    // -------------------------------------------------------------------------

    #[test]
    fn test_detect_utf8() {
        assert_eq!(detect_encoding("ward,name\n1,Café\n".as_bytes(), LATIN1), UTF_8);
    }

    #[test]
    fn test_detect_latin1_fallback() {
        assert_eq!(detect_encoding(b"ward,name\n1,Caf\xe9\n", LATIN1), LATIN1);
    }

    #[test]
    fn test_detect_bom() {
        assert_eq!(detect_encoding(b"\xef\xbb\xbfward\n", LATIN1), UTF_8);
        assert_eq!(
            detect_encoding(b"\xff\xfew\x00", LATIN1),
            encoding_rs::UTF_16LE
        );
    }

    #[test]
    fn test_detect_sample_cut_mid_sequence() {
        let mut sample = vec![b'a'; SAMPLE_BYTES - 1];
        sample.push(0xc3); // first byte of 'é'
        assert_eq!(detect_encoding(&sample, LATIN1), UTF_8);
    }

    // -------------------------------------------------------------------------
    // PARSING
    // -------------------------------------------------------------------------

    #[test]
    fn test_read_basic() {
        let csv = "Ward,Population\nWARD 1,1000\nWARD 2,2000\n";
        let table = read_bytes("pop.csv", csv.as_bytes(), LATIN1).unwrap();
        assert_eq!(table.headers, vec!["Ward", "Population"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].line, 2);
        assert_eq!(table.rows[1].fields, vec!["WARD 2", "2000"]);
        assert!(table.skipped.is_empty());
        assert_eq!(table.encoding, UTF_8);
    }

    #[test]
    fn test_read_latin1_file_row_count() {
        let mut bytes = b"ward,facility\n".to_vec();
        for i in 1..=14 {
            bytes.extend_from_slice(format!("{},Ar", i).as_bytes());
            bytes.push(0xe9); // 'é' in Latin-1, invalid as UTF-8
            bytes.extend_from_slice(b"na\n");
        }
        let table = read_bytes("rec.csv", &bytes, LATIN1).unwrap();
        assert_eq!(table.encoding, LATIN1);
        assert_eq!(table.rows.len(), 14);
        assert!(table.skipped.is_empty());
        assert_eq!(table.rows[0].fields[1], "Aréna");
    }

    #[test]
    fn test_read_latin1_row_after_utf8_sample() {
        // Leading sample is pure ASCII, so detection picks UTF-8; the Latin-1
        // row beyond the sample must be retried under the fallback.
        let mut bytes = b"ward,name\n".to_vec();
        let mut rows = 1;
        while bytes.len() < SAMPLE_BYTES + 100 {
            bytes.extend_from_slice(b"3,plain ascii name\n");
            rows += 1;
        }
        bytes.extend_from_slice(b"4,Montr\xe9al\n");
        let table = read_bytes("mixed.csv", &bytes, LATIN1).unwrap();
        assert_eq!(table.encoding, UTF_8);
        assert_eq!(table.rows.len(), rows);
        assert_eq!(table.fallback_rows, 1);
        assert_eq!(table.rows.last().unwrap().fields[1], "Montréal");
    }

    #[test]
    fn test_read_strips_utf8_bom() {
        let csv = "\u{feff}ward,total\n1,5\n";
        let table = read_bytes("bom.csv", csv.as_bytes(), LATIN1).unwrap();
        assert_eq!(table.headers[0], "ward");
    }

    #[test]
    fn test_read_skips_malformed_rows() {
        let csv = "ward,total\n1,5\n2,6,extra\n3,7\n";
        let table = read_bytes("bad.csv", csv.as_bytes(), LATIN1).unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.skipped.len(), 1);
        assert_eq!(table.skipped[0].line, 3);
        assert_eq!(table.rows[1].fields, vec!["3", "7"]);
    }

    #[test]
    fn test_read_empty_file_fails() {
        let result = read_bytes("empty.csv", b"", LATIN1);
        assert!(matches!(result, Err(ReadError::MalformedRow { .. })));
    }

    #[test]
    fn test_read_missing_file() {
        let result = read_file(Path::new("/nonexistent/_Ward_Crime.csv"), LATIN1);
        assert!(matches!(result, Err(ReadError::Open { .. })));
    }

    #[test]
    fn test_content_hash_is_stable() {
        let a = read_bytes("a.csv", b"ward\n1\n", LATIN1).unwrap();
        let b = read_bytes("b.csv", b"ward\n1\n", LATIN1).unwrap();
        assert_eq!(a.content_hash, b.content_hash);
        assert!(a.content_hash.starts_with("sha256:"));
    }
}
