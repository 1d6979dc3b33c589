//! Delimited file reading.
//!
//! Each call opens the file afresh and yields data rows lazily. Header
//! records and blank lines are never yielded.

use crate::error::{CsvDbError, Result};
use csv::{ReaderBuilder, StringRecordsIntoIter};
use std::fs::File;
use std::path::Path;

/// One data record and the 1-based line it started on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRow {
    pub line: u64,
    pub fields: Vec<String>,
}

/// Reader settings shared by every table in a directory.
#[derive(Debug, Clone, Copy)]
pub struct DelimitedReader {
    delimiter: u8,
    has_headers: bool,
}

impl DelimitedReader {
    pub fn new(delimiter: u8, has_headers: bool) -> Self {
        Self {
            delimiter,
            has_headers,
        }
    }

    /// Open `path` and iterate its data rows.
    ///
    /// Ragged rows are passed through; width checks belong to the table.
    pub fn open_rows(&self, path: &Path) -> Result<SourceRows> {
        let file = File::open(path).map_err(|source| CsvDbError::SourceUnavailable {
            path: path.to_path_buf(),
            source,
        })?;
        let reader = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(self.has_headers)
            .flexible(true)
            .from_reader(file);
        Ok(SourceRows {
            records: reader.into_records(),
        })
    }

    /// First data row of `path`, if it has one.
    pub fn first_row(&self, path: &Path) -> Result<Option<SourceRow>> {
        self.open_rows(path)?.next().transpose()
    }
}

/// Lazy sequence of data rows from one file.
pub struct SourceRows {
    records: StringRecordsIntoIter<File>,
}

impl Iterator for SourceRows {
    type Item = Result<SourceRow>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.records.next()? {
            Ok(record) => record,
            Err(e) => return Some(Err(e.into())),
        };
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        Some(Ok(SourceRow {
            line,
            fields: record.iter().map(str::to_string).collect(),
        }))
    }
}
