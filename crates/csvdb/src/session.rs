//! `CsvDb`: the query-facing handle over a watched directory.

use crate::cache::{ChangeOutcome, TableCache};
use crate::config::CsvDbConfig;
use crate::error::{CsvDbError, Result};
use crate::inference::ColumnType;
use crate::monitor::{ChangeMonitor, MonitorConfig, MonitorState};
use csvdb_engine::{DbConnection, DbRow};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Rows of one query plus what it took to produce them.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub columns: Vec<String>,
    pub rows: Vec<DbRow>,
    pub row_count: usize,
    pub tables_refreshed: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableListing {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDescription {
    pub name: String,
    pub column_type: ColumnType,
}

/// A directory of delimited files exposed as SQL tables.
///
/// ```rust,ignore
/// let mut db = CsvDb::open(CsvDbConfig::for_directory("data"))?;
/// db.start()?;
/// let outcome = db.execute("SELECT COUNT(*) FROM orders")?;
/// db.stop();
/// ```
pub struct CsvDb {
    config: CsvDbConfig,
    cache: TableCache,
    monitor: ChangeMonitor,
}

impl CsvDb {
    /// Validate the config and open the engine store. Nothing is watched
    /// until [`CsvDb::start`].
    pub fn open(config: CsvDbConfig) -> Result<Self> {
        config.validate()?;
        let conn = DbConnection::open(config.database_path.as_deref())?;
        info!(
            "Opened {} store ({})",
            conn.backend_name(),
            if conn.is_in_memory() { "in-memory" } else { "on disk" }
        );
        let cache = TableCache::new(conn, &config)?;
        let monitor = ChangeMonitor::new(MonitorConfig {
            directory: config.directory.clone(),
            extension: config.normalized_extension(),
            poll_interval: config.poll_interval(),
        });
        Ok(Self {
            config,
            cache,
            monitor,
        })
    }

    pub fn config(&self) -> &CsvDbConfig {
        &self.config
    }

    /// Register every file already present, then start watching.
    ///
    /// Returns the number of tables registered from the initial scan.
    pub fn start(&mut self) -> Result<usize> {
        let (tx, rx) = mpsc::channel();
        let baseline = self.monitor.start(move |change| {
            // Receiver gone means the handle is shutting down
            let _ = tx.send(change.clone());
        })?;
        self.cache.attach_events(rx);

        let mut registered = 0;
        for change in &baseline {
            match self.cache.handle_change(change) {
                Ok(ChangeOutcome::Created) => registered += 1,
                Ok(_) => {}
                Err(e) => warn!("Skipping {}: {}", change.path.display(), e),
            }
        }
        info!(
            "Watching {} ({} tables)",
            self.config.directory.display(),
            registered
        );
        Ok(registered)
    }

    /// Stop the monitor and wait for its thread. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if self.monitor.state() == MonitorState::Running {
            self.monitor.stop();
            self.monitor.join();
            info!("Stopped watching {}", self.config.directory.display());
        }
    }

    pub fn monitor_state(&self) -> MonitorState {
        self.monitor.state()
    }

    /// Refresh the dirty tables the query refers to, then run it.
    pub fn execute(&mut self, sql: &str) -> Result<QueryOutcome> {
        let start = Instant::now();
        let (output, tables_refreshed) = self.cache.execute(sql)?;
        Ok(QueryOutcome {
            row_count: output.rows.len(),
            columns: output.columns,
            rows: output.rows,
            tables_refreshed,
            elapsed: start.elapsed(),
        })
    }

    /// Known tables and their source files, sorted by name.
    pub fn show_tables(&mut self) -> Vec<TableListing> {
        self.cache
            .tables()
            .into_iter()
            .map(|(name, path)| TableListing { name, path })
            .collect()
    }

    pub fn describe_table(&mut self, name: &str) -> Result<Vec<ColumnDescription>> {
        let descriptor = self
            .cache
            .descriptor(name)
            .ok_or_else(|| CsvDbError::UnknownTable(name.to_string()))?;
        Ok(descriptor
            .columns()
            .iter()
            .map(|c| ColumnDescription {
                name: c.name.clone(),
                column_type: c.column_type,
            })
            .collect())
    }

    pub fn plan_refresh(&mut self, sql: &str) -> BTreeSet<String> {
        self.cache.plan_refresh(sql)
    }

    pub fn cache_mut(&mut self) -> &mut TableCache {
        &mut self.cache
    }
}

impl Drop for CsvDb {
    fn drop(&mut self) {
        self.stop();
    }
}
