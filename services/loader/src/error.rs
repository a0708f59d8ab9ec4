//! Error taxonomy for the ward data pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Failures raised while opening and decoding a source CSV.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The header row decodes under neither the detected nor the fallback encoding.
    #[error("encoding failure in {file}: not decodable as {detected} or {fallback}")]
    EncodingFailure {
        file: String,
        detected: &'static str,
        fallback: &'static str,
    },

    #[error("malformed row in {file} at line {line}: {reason}")]
    MalformedRow {
        file: String,
        line: u64,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum EtlError {
    #[error(transparent)]
    Read(#[from] ReadError),

    #[error("invalid ward identifier {value:?}")]
    InvalidWardIdentifier { value: String },

    #[error("column '{column}' not found (available: {available})")]
    MissingColumn { column: String, available: String },

    #[error("malformed row at line {line}: {reason}")]
    MalformedRow { line: u64, reason: String },

    #[error("malformed result at line {line}: {reason}")]
    MalformedResult { line: u64, reason: String },

    #[error("database unreachable after {attempts} attempts: {source}")]
    ConnectionFailure {
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to load table {table}: {reason}")]
    LoadFailure { table: &'static str, reason: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EtlError {
    /// True for per-row failures that are counted and skipped rather than raised.
    pub fn is_row_level(&self) -> bool {
        matches!(
            self,
            EtlError::MalformedRow { .. } | EtlError::MalformedResult { .. }
        )
    }
}

pub type Result<T, E = EtlError> = std::result::Result<T, E>;
