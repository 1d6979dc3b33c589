//! Query a directory of delimited files as SQL tables.
//!
//! Every file in the watched directory becomes a table named after the
//! file. A background monitor polls modification times and marks changed
//! tables dirty; a query reloads only the dirty tables it mentions before
//! it runs.

pub mod cache;
pub mod config;
pub mod error;
pub mod inference;
pub mod monitor;
pub mod reader;
pub mod session;
pub mod table;

pub use cache::{table_name_for, ChangeOutcome, RefreshReport, TableCache};
pub use config::{CsvDbConfig, RefreshMatching};
pub use error::{CsvDbError, Result};
pub use inference::{infer, ColumnType};
pub use monitor::{ChangeMonitor, FileChange, MonitorConfig, MonitorState, PollStats, Poller};
pub use reader::{DelimitedReader, SourceRow};
pub use session::{ColumnDescription, CsvDb, QueryOutcome, TableListing};
pub use table::{BatchInsert, Column, TableDescriptor};
