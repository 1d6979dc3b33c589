//! Error types for csvdb

use crate::inference::ColumnType;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// csvdb error type
#[derive(Error, Debug)]
pub enum CsvDbError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] csvdb_engine::BackendError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Source unavailable: {path}: {source}")]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Table '{table}' line {line}: expected {expected} fields, found {found}")]
    SchemaMismatch {
        table: String,
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("Table '{table}' line {line}: value '{value}' in column {column} is not {expected}")]
    TypeCoercion {
        table: String,
        line: u64,
        column: String,
        value: String,
        expected: ColumnType,
    },

    #[error("Cannot infer a schema for '{table}' from an empty row")]
    EmptyRow { table: String },

    #[error("Table not found: {0}")]
    UnknownTable(String),

    #[error("Refresh of table '{table}' failed: {source}")]
    Refresh {
        table: String,
        #[source]
        source: Box<CsvDbError>,
    },
}

impl CsvDbError {
    /// True for the per-row load failures (shape or value) of a reload.
    pub fn is_row_error(&self) -> bool {
        matches!(
            self,
            CsvDbError::SchemaMismatch { .. } | CsvDbError::TypeCoercion { .. }
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, CsvDbError>;
