//! Table descriptors: the schema and freshness of one materialized table.
//!
//! A descriptor's columns never change after construction. A source file
//! whose shape or types move on gets a brand new descriptor at reload.

use crate::error::{CsvDbError, Result};
use crate::inference::{infer, ColumnType};
use crate::reader::SourceRow;
use csvdb_engine::{quote_ident, values_placeholders, BackendError, DbTransaction, DbValue};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

/// Schema plus dirty flag for one table.
#[derive(Debug, Clone)]
pub struct TableDescriptor {
    name: String,
    columns: Vec<Column>,
    dirty: bool,
}

impl TableDescriptor {
    /// Derive a schema from one sample row.
    ///
    /// Column `i` is named `<name>_<i>` and typed by `infer(sample_row[i])`.
    /// New descriptors start dirty: nothing has been loaded yet.
    pub fn infer_schema<S: AsRef<str>>(sample_row: &[S], name: &str) -> Result<Self> {
        if sample_row.is_empty() {
            return Err(CsvDbError::EmptyRow {
                table: name.to_string(),
            });
        }
        let types = sample_row.iter().map(|v| infer(v.as_ref())).collect();
        Ok(Self::with_types(name, types))
    }

    /// Descriptor with positional column names over the given types.
    pub fn with_types(name: &str, types: Vec<ColumnType>) -> Self {
        let columns = types
            .into_iter()
            .enumerate()
            .map(|(i, column_type)| Column {
                name: format!("{}_{}", name, i),
                column_type,
            })
            .collect();
        Self {
            name: name.to_string(),
            columns,
            dirty: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_types(&self) -> Vec<ColumnType> {
        self.columns.iter().map(|c| c.column_type).collect()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Same column count and types as `other`.
    pub fn same_shape(&self, other: &TableDescriptor) -> bool {
        self.column_types() == other.column_types()
    }

    pub fn render_drop(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", quote_ident(&self.name))
    }

    pub fn render_create(&self) -> String {
        let cols = self
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.column_type.sql_type()))
            .collect::<Vec<_>>()
            .join(", ");
        format!("CREATE TABLE {} ({})", quote_ident(&self.name), cols)
    }

    /// Check width and convert every field of one row to its column's type.
    pub fn typed_row(&self, row: &SourceRow) -> Result<Vec<DbValue>> {
        if row.fields.len() != self.columns.len() {
            return Err(CsvDbError::SchemaMismatch {
                table: self.name.clone(),
                line: row.line,
                expected: self.columns.len(),
                found: row.fields.len(),
            });
        }
        self.columns
            .iter()
            .zip(&row.fields)
            .map(|(column, raw)| {
                column
                    .column_type
                    .coerce(raw)
                    .ok_or_else(|| CsvDbError::TypeCoercion {
                        table: self.name.clone(),
                        line: row.line,
                        column: column.name.clone(),
                        value: raw.clone(),
                        expected: column.column_type,
                    })
            })
            .collect()
    }

    /// Validate and convert all rows into one batch insert.
    ///
    /// The first bad row aborts the whole batch.
    pub fn render_batch_insert<I>(&self, rows: I) -> Result<BatchInsert>
    where
        I: IntoIterator<Item = Result<SourceRow>>,
    {
        let mut typed = Vec::new();
        for row in rows {
            typed.push(self.typed_row(&row?)?);
        }
        Ok(BatchInsert {
            table: self.name.clone(),
            columns: self.columns.iter().map(|c| c.name.clone()).collect(),
            rows: typed,
        })
    }
}

/// A fully validated multi-row insert for one table.
#[derive(Debug, Clone)]
pub struct BatchInsert {
    table: String,
    columns: Vec<String>,
    rows: Vec<Vec<DbValue>>,
}

impl BatchInsert {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Vec<DbValue>] {
        &self.rows
    }

    /// The single-statement form: `INSERT INTO "t" VALUES (?, ?), (?, ?)`.
    pub fn statement(&self) -> String {
        format!(
            "INSERT INTO {} VALUES {}",
            quote_ident(&self.table),
            values_placeholders(self.columns.len(), self.rows.len())
        )
    }

    /// Bind parameters for [`BatchInsert::statement`], row-major.
    pub fn params(&self) -> Vec<DbValue> {
        self.rows.iter().flatten().cloned().collect()
    }

    /// Load the rows through the engine's bulk binding path.
    pub fn execute(&self, tx: &mut DbTransaction<'_>) -> std::result::Result<u64, BackendError> {
        let columns: Vec<&str> = self.columns.iter().map(String::as_str).collect();
        tx.bulk_insert_rows(&self.table, &columns, &self.rows)
    }
}
