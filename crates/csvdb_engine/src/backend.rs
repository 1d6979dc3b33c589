//! The engine connection and its commit boundary.
//!
//! One DuckDB connection per process, confined to the thread that opened
//! it. Table loads run inside `transaction`; user query text goes through
//! `query` untouched.

use crate::lock::{LockError, StoreLock};
use crate::value::{DbValue, FromDbValue};
use duckdb::types::Value;
use std::fmt;
use std::path::Path;
use std::rc::Rc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug_span, info};

/// Errors from engine operations.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Database is locked by another process: {0}")]
    Locked(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Type conversion error: {0}")]
    TypeConversion(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),
}

/// One result row. Column names are shared by every row of a result.
#[derive(Debug, Clone)]
pub struct DbRow {
    columns: Rc<[String]>,
    values: Vec<DbValue>,
}

impl DbRow {
    /// Typed read of column `index`.
    pub fn get<T: FromDbValue>(&self, index: usize) -> Result<T, BackendError> {
        let value = self.values.get(index).ok_or_else(|| {
            BackendError::TypeConversion(format!(
                "column {} out of range ({} columns)",
                index,
                self.columns.len()
            ))
        })?;
        T::from_db_value(value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[DbValue] {
        &self.values
    }
}

/// Column names plus rows, so an empty result still has a shape.
#[derive(Debug, Clone, Default)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<DbRow>,
}

/// The engine connection. Not `Send`.
pub struct DbConnection {
    conn: Rc<duckdb::Connection>,
    in_memory: bool,
    _lock: Option<StoreLock>,
}

impl fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConnection")
            .field("in_memory", &self.in_memory)
            .finish()
    }
}

impl DbConnection {
    /// On-disk store at `location`, or in-memory for `None`.
    pub fn open(location: Option<&Path>) -> Result<Self, BackendError> {
        match location {
            Some(path) => Self::open_duckdb(path),
            None => Self::open_duckdb_memory(),
        }
    }

    /// Open a DuckDB file, taking the store lock first.
    pub fn open_duckdb(path: &Path) -> Result<Self, BackendError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                BackendError::Database(format!("Cannot create {}: {}", parent.display(), e))
            })?;
        }

        let lock = StoreLock::acquire(path).map_err(|e| match e {
            LockError::Locked { .. } => BackendError::Locked(e.to_string()),
            LockError::Io { .. } => BackendError::Database(e.to_string()),
        })?;
        let conn = duckdb::Connection::open(path)?;
        info!(path = %path.display(), "Opened DuckDB store");

        Ok(Self {
            conn: Rc::new(conn),
            in_memory: false,
            _lock: Some(lock),
        })
    }

    pub fn open_duckdb_memory() -> Result<Self, BackendError> {
        let conn = duckdb::Connection::open_in_memory()?;
        info!("Opened in-memory DuckDB store");

        Ok(Self {
            conn: Rc::new(conn),
            in_memory: true,
            _lock: None,
        })
    }

    pub fn is_in_memory(&self) -> bool {
        self.in_memory
    }

    pub fn backend_name(&self) -> &'static str {
        "DuckDB"
    }

    /// Run one or more statements without parameters or results.
    pub fn execute_batch(&self, sql: &str) -> Result<(), BackendError> {
        run_batch(&self.conn, sql)
    }

    /// Run a query and collect its columns and rows.
    pub fn query(&self, sql: &str, params: &[DbValue]) -> Result<QueryOutput, BackendError> {
        traced("db.query", sql, || {
            let mut stmt = self.conn.prepare(sql)?;
            let bound = bind(params);
            let mut result = stmt.query(duckdb::params_from_iter(bound.iter()))?;

            let columns: Vec<String> = match result.as_ref() {
                Some(s) => s.column_names(),
                None => return Ok(QueryOutput::default()),
            };
            let shared: Rc<[String]> = columns.clone().into();

            let mut rows = Vec::new();
            while let Some(row) = result.next()? {
                let values = (0..columns.len())
                    .map(|i| row.get::<_, Value>(i).map(DbValue::from_engine))
                    .collect::<Result<Vec<_>, _>>()?;
                rows.push(DbRow {
                    columns: Rc::clone(&shared),
                    values,
                });
            }
            Ok(QueryOutput { columns, rows })
        })
    }

    /// First column of the first row.
    pub fn query_scalar<T: FromDbValue>(
        &self,
        sql: &str,
        params: &[DbValue],
    ) -> Result<T, BackendError> {
        let output = self.query(sql, params)?;
        match output.rows.first() {
            Some(row) => row.get(0),
            None => Err(BackendError::Query(format!(
                "expected a row from: {}",
                statement_verb(sql)
            ))),
        }
    }

    /// Run `op` between BEGIN and COMMIT. An error from `op` rolls back.
    pub fn transaction<T, F>(&self, op: F) -> Result<T, BackendError>
    where
        F: for<'a> FnOnce(&'a mut DbTransaction<'a>) -> Result<T, BackendError>,
    {
        self.conn.execute_batch("BEGIN")?;
        let mut tx = DbTransaction { conn: &self.conn };
        match op(&mut tx) {
            Ok(value) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                    return Err(BackendError::Transaction(format!(
                        "{err}; rollback also failed: {rollback}"
                    )));
                }
                Err(err)
            }
        }
    }
}

/// Statements issued inside `DbConnection::transaction`.
pub struct DbTransaction<'a> {
    conn: &'a duckdb::Connection,
}

impl DbTransaction<'_> {
    pub fn execute_batch(&mut self, sql: &str) -> Result<(), BackendError> {
        run_batch(self.conn, sql)
    }

    /// Insert `rows` into `table`; every row must have one value per column.
    ///
    /// Small loads go through multi-row parameterized INSERTs; larger ones
    /// through the DuckDB appender.
    pub fn bulk_insert_rows(
        &mut self,
        table: &str,
        columns: &[&str],
        rows: &[Vec<DbValue>],
    ) -> Result<u64, BackendError> {
        if rows.is_empty() {
            return Ok(0);
        }
        if columns.is_empty() {
            return Err(BackendError::InvalidInput(format!(
                "no columns given for {table}"
            )));
        }
        if let Some((line, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(BackendError::InvalidInput(format!(
                "row {} of {} has {} values for {} columns",
                line,
                table,
                row.len(),
                columns.len()
            )));
        }

        if rows.len() * columns.len() > MAX_BOUND_PARAMS {
            return self.append_rows(table, rows);
        }

        let column_list = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            quote_ident(table),
            column_list,
            values_placeholders(columns.len(), rows.len())
        );
        let bound: Vec<Value> = rows.iter().flatten().map(DbValue::to_engine).collect();
        traced("db.exec", &sql, || {
            let inserted = self
                .conn
                .execute(&sql, duckdb::params_from_iter(bound.iter()))?;
            Ok(inserted as u64)
        })
    }

    fn append_rows(&mut self, table: &str, rows: &[Vec<DbValue>]) -> Result<u64, BackendError> {
        let _span = debug_span!("db.append", table, rows = rows.len()).entered();
        let mut appender = self.conn.appender(table)?;
        for row in rows {
            let bound = bind(row);
            appender.append_row(duckdb::appender_params_from_iter(bound.iter()))?;
        }
        appender.flush()?;
        Ok(rows.len() as u64)
    }
}

/// Parameters per INSERT before loads switch to the appender.
const MAX_BOUND_PARAMS: usize = 999;

fn bind(params: &[DbValue]) -> Vec<Value> {
    params.iter().map(DbValue::to_engine).collect()
}

fn run_batch(conn: &duckdb::Connection, sql: &str) -> Result<(), BackendError> {
    traced("db.exec_batch", sql, || Ok(conn.execute_batch(sql)?))
}

/// Run `op` inside a debug span tagged with the statement verb, a stable
/// hash of the text and the elapsed time.
fn traced<T>(
    name: &'static str,
    sql: &str,
    op: impl FnOnce() -> Result<T, BackendError>,
) -> Result<T, BackendError> {
    let span = debug_span!(
        "db",
        kind = name,
        op = statement_verb(sql),
        sql_hash = %sql_fingerprint(sql),
        duration_ms = tracing::field::Empty
    );
    let _guard = span.enter();
    let started = Instant::now();
    let result = op();
    span.record("duration_ms", started.elapsed().as_millis() as u64);
    result
}

/// `(?, ?), (?, ?)` for `rows` rows of `cols` placeholders each.
pub fn values_placeholders(cols: usize, rows: usize) -> String {
    let row = format!("({})", vec!["?"; cols].join(", "));
    vec![row; rows].join(", ")
}

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn statement_verb(sql: &str) -> &str {
    sql.split_whitespace().next().unwrap_or("unknown")
}

/// FNV-1a over the statement text.
fn sql_fingerprint(sql: &str) -> String {
    let hash = sql.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |acc, b| {
        (acc ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    });
    format!("{hash:016x}")
}
