//! Embedded SQL engine layer for csvdb.
//!
//! Everything the table cache needs from the engine goes through
//! [`DbConnection`]: DDL, parameterized bulk loads inside a transaction,
//! and ad-hoc query text from the user.
//!
//! ```rust,ignore
//! use csvdb_engine::{DbConnection, DbValue};
//!
//! let conn = DbConnection::open(None)?;
//! conn.transaction(|tx| {
//!     tx.execute_batch("CREATE TABLE t (id BIGINT)")?;
//!     tx.bulk_insert_rows("t", &["id"], &[vec![DbValue::Integer(1)]])
//! })?;
//! let output = conn.query("SELECT * FROM t", &[])?;
//! ```

mod backend;
mod lock;
pub mod sql_guard;
mod value;

pub use backend::{
    quote_ident, values_placeholders, BackendError, DbConnection, DbRow, DbTransaction,
    QueryOutput,
};
pub use value::{DbValue, FromDbValue};
pub use lock::{lock_path_for, read_holder, LockError, LockHolder, StoreLock};
