//! Table cache: which source file backs each table, and whether the
//! engine's copy is stale.
//!
//! The cache owns the engine connection and is confined to one thread.
//! Change events from the monitor thread arrive over a channel and are
//! applied before every refresh plan and listing, so any change delivered
//! before a query starts is visible to that query.

use crate::config::{CsvDbConfig, RefreshMatching};
use crate::error::{CsvDbError, Result};
use crate::monitor::FileChange;
use crate::reader::DelimitedReader;
use crate::table::TableDescriptor;
use csvdb_engine::{sql_guard, DbConnection, QueryOutput};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, TryRecvError};
use tracing::{debug, info, warn};

/// What `handle_change` did with one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    Created,
    MarkedDirty,
    Skipped,
}

/// Result of one `ensure_fresh` pass.
#[derive(Debug, Default)]
pub struct RefreshReport {
    /// Reloaded tables and their row counts
    pub reloaded: Vec<(String, u64)>,
    pub failed: Vec<(String, CsvDbError)>,
}

impl RefreshReport {
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug)]
struct TableEntry {
    descriptor: TableDescriptor,
    path: PathBuf,
}

pub struct TableCache {
    conn: DbConnection,
    reader: DelimitedReader,
    extension: String,
    matching: RefreshMatching,
    /// Keyed by lowercased name; the engine resolves identifiers without case.
    tables: BTreeMap<String, TableEntry>,
    events: Option<Receiver<FileChange>>,
}

impl TableCache {
    pub fn new(conn: DbConnection, config: &CsvDbConfig) -> Result<Self> {
        Ok(Self {
            conn,
            reader: DelimitedReader::new(config.delimiter_byte()?, config.has_headers),
            extension: config.normalized_extension(),
            matching: config.refresh_matching,
            tables: BTreeMap::new(),
            events: None,
        })
    }

    /// Feed change events from another thread into this cache.
    pub fn attach_events(&mut self, rx: Receiver<FileChange>) {
        self.events = Some(rx);
    }

    /// Apply every queued change event. Returns how many were applied.
    ///
    /// Event failures are logged; the table stays as it was and the next
    /// change to its file retries.
    pub fn drain_events(&mut self) -> usize {
        let mut pending = Vec::new();
        let mut closed = false;
        if let Some(rx) = &self.events {
            loop {
                match rx.try_recv() {
                    Ok(change) => pending.push(change),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        closed = true;
                        break;
                    }
                }
            }
        }
        if closed {
            debug!("Change channel closed");
            self.events = None;
        }

        let applied = pending.len();
        for change in pending {
            if let Err(e) = self.handle_change(&change) {
                warn!("Failed to register {}: {}", change.path.display(), e);
            }
        }
        applied
    }

    /// React to a created or modified source file.
    ///
    /// Unknown names are created: any stale engine table of that name is
    /// dropped and an empty table with the inferred schema takes its place.
    /// Rows load on the first query that needs them. Known names, compared
    /// without case, are only marked dirty; no I/O happens here.
    pub fn handle_change(&mut self, change: &FileChange) -> Result<ChangeOutcome> {
        let name = match table_name_for(&change.file_name, &self.extension) {
            Some(name) => name,
            None => {
                warn!("No usable table name for {}", change.file_name);
                return Ok(ChangeOutcome::Skipped);
            }
        };
        let key = name.to_ascii_lowercase();

        if let Some(entry) = self.tables.get_mut(&key) {
            if entry.path != change.path {
                warn!(
                    "Table '{}' now backed by {} (was {})",
                    entry.descriptor.name(),
                    change.path.display(),
                    entry.path.display()
                );
                entry.path = change.path.clone();
            }
            entry.descriptor.mark_dirty();
            debug!(table = %entry.descriptor.name(), "marked dirty");
            return Ok(ChangeOutcome::MarkedDirty);
        }

        let sample = match self.reader.first_row(&change.path)? {
            Some(row) => row,
            None => {
                warn!("{} has no data rows yet, not registering", change.file_name);
                return Ok(ChangeOutcome::Skipped);
            }
        };
        let descriptor = TableDescriptor::infer_schema(&sample.fields, &name)?;
        self.conn.transaction(|tx| {
            tx.execute_batch(&descriptor.render_drop())?;
            tx.execute_batch(&descriptor.render_create())
        })?;

        info!(
            "Registered table '{}' ({} columns) from {}",
            name,
            descriptor.columns().len(),
            change.path.display()
        );
        self.tables.insert(
            key,
            TableEntry {
                descriptor,
                path: change.path.clone(),
            },
        );
        Ok(ChangeOutcome::Created)
    }

    /// Known, dirty tables the query text refers to.
    pub fn plan_refresh(&mut self, sql: &str) -> BTreeSet<String> {
        self.drain_events();
        let referenced: Box<dyn Fn(&str) -> bool> = match self.matching {
            RefreshMatching::Substring => {
                let haystack = sql.to_ascii_lowercase();
                Box::new(move |name| haystack.contains(&name.to_ascii_lowercase()))
            }
            RefreshMatching::Identifiers => {
                let tokens = sql_guard::identifier_tokens(sql);
                Box::new(move |name| tokens.contains(&name.to_ascii_lowercase()))
            }
        };
        self.tables
            .values()
            .map(|entry| &entry.descriptor)
            .filter(|descriptor| descriptor.is_dirty() && referenced(descriptor.name()))
            .map(|descriptor| descriptor.name().to_string())
            .collect()
    }

    /// Reload every dirty table in `names`. Each reload commits or rolls
    /// back on its own; one failure never touches another table.
    pub fn ensure_fresh(&mut self, names: &BTreeSet<String>) -> RefreshReport {
        let mut report = RefreshReport::default();
        for name in names {
            let dirty = self
                .entry(name)
                .map(|entry| entry.descriptor.is_dirty())
                .unwrap_or(false);
            if !dirty {
                continue;
            }
            match self.reload(name) {
                Ok(rows) => report.reloaded.push((name.clone(), rows)),
                Err(e) => {
                    warn!("Reload of '{}' failed: {}", name, e);
                    report.failed.push((name.clone(), e));
                }
            }
        }
        report
    }

    /// Drop, recreate and fill one table from its source file.
    ///
    /// All rows are read and converted before the engine is touched. On any
    /// failure the previous table and descriptor stay, still dirty.
    fn reload(&mut self, name: &str) -> Result<u64> {
        let entry = self
            .entry(name)
            .ok_or_else(|| CsvDbError::UnknownTable(name.to_string()))?;
        let path = entry.path.clone();
        let name = entry.descriptor.name().to_string();

        let mut fresh = match self.reader.first_row(&path)? {
            Some(row) => TableDescriptor::infer_schema(&row.fields, &name)?,
            // Emptied file: keep the layout, load zero rows
            None => TableDescriptor::with_types(&name, entry.descriptor.column_types()),
        };
        if !fresh.same_shape(&entry.descriptor) {
            info!(
                "Schema of '{}' changed: {:?} -> {:?}",
                name,
                entry.descriptor.column_types(),
                fresh.column_types()
            );
        }

        let batch = fresh.render_batch_insert(self.reader.open_rows(&path)?)?;
        let inserted = self.conn.transaction(|tx| {
            tx.execute_batch(&fresh.render_drop())?;
            tx.execute_batch(&fresh.render_create())?;
            batch.execute(tx)
        })?;

        fresh.mark_clean();
        if let Some(entry) = self.tables.get_mut(&name.to_ascii_lowercase()) {
            entry.descriptor = fresh;
        }
        info!("Reloaded '{}' ({} rows)", name, inserted);
        Ok(inserted)
    }

    /// Refresh what the query needs, then run it verbatim.
    ///
    /// Returns the output and how many tables were reloaded. If any
    /// refresh fails the query is not run.
    pub fn execute(&mut self, sql: &str) -> Result<(QueryOutput, usize)> {
        let plan = self.plan_refresh(sql);
        let report = self.ensure_fresh(&plan);
        let refreshed = report.reloaded.len();
        if let Some((table, source)) = report.failed.into_iter().next() {
            return Err(CsvDbError::Refresh {
                table,
                source: Box::new(source),
            });
        }
        let output = self.conn.query(sql, &[])?;
        Ok((output, refreshed))
    }

    /// Table names with their source paths, sorted by name without case.
    pub fn tables(&mut self) -> Vec<(String, PathBuf)> {
        self.drain_events();
        self.tables
            .values()
            .map(|entry| (entry.descriptor.name().to_string(), entry.path.clone()))
            .collect()
    }

    /// Descriptor of `name`, matched without case.
    pub fn descriptor(&mut self, name: &str) -> Option<&TableDescriptor> {
        self.drain_events();
        self.entry(name).map(|entry| &entry.descriptor)
    }

    pub fn source_path(&self, name: &str) -> Option<&Path> {
        self.entry(name).map(|entry| entry.path.as_path())
    }

    fn entry(&self, name: &str) -> Option<&TableEntry> {
        self.tables.get(&name.to_ascii_lowercase())
    }

    pub fn connection(&self) -> &DbConnection {
        &self.conn
    }
}

/// Table name for a source file name, or `None` if nothing usable remains.
///
/// The watched extension is stripped, characters outside `[A-Za-z0-9_]`
/// become `_`, and a leading digit gets a `t_` prefix.
pub fn table_name_for(file_name: &str, extension: &str) -> Option<String> {
    let stem = match file_name.rsplit_once('.') {
        Some((stem, ext)) if ext.eq_ignore_ascii_case(extension) => stem,
        _ => file_name,
    };
    let mut name: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if name.is_empty() {
        return None;
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert_str(0, "t_");
    }
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::ColumnType;
    use std::fs;
    use std::time::SystemTime;
    use tempfile::TempDir;

    struct Fixture {
        tmp: TempDir,
        cache: TableCache,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_config(|_| {})
        }

        fn with_config(adjust: impl FnOnce(&mut CsvDbConfig)) -> Self {
            let tmp = TempDir::new().unwrap();
            let mut config = CsvDbConfig::for_directory(tmp.path());
            adjust(&mut config);
            let conn = DbConnection::open_duckdb_memory().unwrap();
            let cache = TableCache::new(conn, &config).unwrap();
            Self { tmp, cache }
        }

        fn write(&self, file_name: &str, content: &str) -> FileChange {
            let path = self.tmp.path().join(file_name);
            fs::write(&path, content).unwrap();
            FileChange {
                file_name: file_name.to_string(),
                path,
                modified: SystemTime::now(),
            }
        }

        fn count(&self, table: &str) -> i64 {
            self.cache
                .connection()
                .query_scalar(&format!("SELECT COUNT(*) FROM {}", table), &[])
                .unwrap()
        }

        fn is_dirty(&mut self, table: &str) -> bool {
            self.cache.descriptor(table).unwrap().is_dirty()
        }
    }

    fn names(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_table_name_for() {
        assert_eq!(table_name_for("orders.csv", "csv").as_deref(), Some("orders"));
        assert_eq!(table_name_for("Orders.CSV", "csv").as_deref(), Some("Orders"));
        assert_eq!(
            table_name_for("sales-2024.q1.csv", "csv").as_deref(),
            Some("sales_2024_q1")
        );
        assert_eq!(table_name_for("2024.csv", "csv").as_deref(), Some("t_2024"));
        assert_eq!(table_name_for(".csv", "csv"), None);
    }

    #[test]
    fn test_create_registers_empty_dirty_table() {
        let mut fx = Fixture::new();
        let change = fx.write("orders.csv", "id,amount\n1,10.5\n2,20.0\n");

        assert_eq!(fx.cache.handle_change(&change).unwrap(), ChangeOutcome::Created);
        assert!(fx.is_dirty("orders"));
        assert_eq!(fx.count("orders"), 0);

        let types = fx.cache.descriptor("orders").unwrap().column_types();
        assert_eq!(types, vec![ColumnType::Integer, ColumnType::Real]);
    }

    #[test]
    fn test_create_replaces_stale_engine_table() {
        let mut fx = Fixture::new();
        fx.cache
            .connection()
            .execute_batch("CREATE TABLE orders (x VARCHAR); INSERT INTO orders VALUES ('old')")
            .unwrap();

        let change = fx.write("orders.csv", "id\n1\n");
        fx.cache.handle_change(&change).unwrap();
        assert_eq!(fx.count("orders"), 0);
    }

    #[test]
    fn test_known_table_only_marked_dirty() {
        let mut fx = Fixture::new();
        let change = fx.write("orders.csv", "id\n1\n");
        fx.cache.handle_change(&change).unwrap();
        fx.cache.ensure_fresh(&names(&["orders"]));
        assert!(!fx.is_dirty("orders"));

        // Even a now-unreadable file is only marked, not read
        fs::remove_file(&change.path).unwrap();
        assert_eq!(
            fx.cache.handle_change(&change).unwrap(),
            ChangeOutcome::MarkedDirty
        );
        assert!(fx.is_dirty("orders"));
    }

    #[test]
    fn test_file_without_data_rows_is_skipped() {
        let mut fx = Fixture::new();
        let change = fx.write("empty.csv", "id,amount\n");
        assert_eq!(fx.cache.handle_change(&change).unwrap(), ChangeOutcome::Skipped);
        assert!(fx.cache.tables().is_empty());

        // Registered once it gains a row
        let change = fx.write("empty.csv", "id,amount\n1,2\n");
        assert_eq!(fx.cache.handle_change(&change).unwrap(), ChangeOutcome::Created);
    }

    #[test]
    fn test_plan_refresh_scoping() {
        let mut fx = Fixture::new();
        let orders = fx.write("orders.csv", "id\n1\n");
        let customers = fx.write("customers.csv", "name\nann\n");
        fx.cache.handle_change(&orders).unwrap();
        fx.cache.handle_change(&customers).unwrap();

        assert_eq!(fx.cache.plan_refresh("select * from orders"), names(&["orders"]));
        assert_eq!(fx.cache.plan_refresh("SELECT * FROM ORDERS"), names(&["orders"]));

        fx.cache.ensure_fresh(&names(&["orders"]));
        assert!(fx.cache.plan_refresh("select * from orders").is_empty());
        assert_eq!(
            fx.cache
                .plan_refresh("select * from orders join customers on true"),
            names(&["customers"])
        );
    }

    #[test]
    fn test_substring_matching_over_matches() {
        let mut fx = Fixture::new();
        let change = fx.write("orders.csv", "id\n1\n");
        fx.cache.handle_change(&change).unwrap();
        assert_eq!(
            fx.cache.plan_refresh("select 'orders' as label"),
            names(&["orders"])
        );
    }

    #[test]
    fn test_identifier_matching() {
        let mut fx = Fixture::with_config(|c| c.refresh_matching = RefreshMatching::Identifiers);
        let orders = fx.write("orders.csv", "id\n1\n");
        let items = fx.write("order_items.csv", "id\n1\n");
        fx.cache.handle_change(&orders).unwrap();
        fx.cache.handle_change(&items).unwrap();

        assert!(fx.cache.plan_refresh("select 'orders' as label").is_empty());
        assert_eq!(
            fx.cache.plan_refresh("select * from order_items"),
            names(&["order_items"])
        );
        assert_eq!(
            fx.cache.plan_refresh(r#"select * from "orders""#),
            names(&["orders"])
        );
    }

    #[test]
    fn test_dirty_to_fresh_convergence() {
        let mut fx = Fixture::new();
        let change = fx.write("orders.csv", "id,amount\n1,10.5\n\n2,20.0\n");
        fx.cache.handle_change(&change).unwrap();

        let report = fx.cache.ensure_fresh(&names(&["orders"]));
        assert!(report.is_ok());
        assert_eq!(report.reloaded, vec![("orders".to_string(), 2)]);
        assert!(!fx.is_dirty("orders"));
        assert_eq!(fx.count("orders"), 2);

        // Clean tables are not reloaded again
        let report = fx.cache.ensure_fresh(&names(&["orders"]));
        assert!(report.reloaded.is_empty());
    }

    #[test]
    fn test_reload_failure_is_isolated() {
        let mut fx = Fixture::new();
        let a = fx.write("a.csv", "id\n1\n2\n");
        let b = fx.write("b.csv", "id\n1\n");
        fx.cache.handle_change(&a).unwrap();
        fx.cache.handle_change(&b).unwrap();
        fx.cache.ensure_fresh(&names(&["a", "b"]));
        assert_eq!(fx.count("a"), 2);

        // A gets a bad row, B gets a good one
        let a = fx.write("a.csv", "id\n1\n2\nthree\n");
        let b = fx.write("b.csv", "id\n1\n2\n3\n");
        fx.cache.handle_change(&a).unwrap();
        fx.cache.handle_change(&b).unwrap();

        let report = fx.cache.ensure_fresh(&names(&["a", "b"]));
        assert_eq!(report.reloaded, vec![("b".to_string(), 3)]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "a");
        assert!(report.failed[0].1.is_row_error());

        assert!(fx.is_dirty("a"));
        assert_eq!(fx.count("a"), 2);
        assert!(!fx.is_dirty("b"));
        assert_eq!(fx.count("b"), 3);
    }

    #[test]
    fn test_missing_source_keeps_old_contents() {
        let mut fx = Fixture::new();
        let change = fx.write("orders.csv", "id\n1\n");
        fx.cache.handle_change(&change).unwrap();
        fx.cache.ensure_fresh(&names(&["orders"]));

        fs::remove_file(&change.path).unwrap();
        fx.cache.handle_change(&change).unwrap();
        let err = fx.cache.execute("select * from orders").unwrap_err();
        match err {
            CsvDbError::Refresh { table, source } => {
                assert_eq!(table, "orders");
                assert!(matches!(*source, CsvDbError::SourceUnavailable { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(fx.is_dirty("orders"));
        assert_eq!(fx.count("orders"), 1);

        // Recovers once the file is back
        fx.write("orders.csv", "id\n1\n2\n");
        let (output, refreshed) = fx.cache.execute("select * from orders").unwrap();
        assert_eq!(refreshed, 1);
        assert_eq!(output.rows.len(), 2);
    }

    #[test]
    fn test_engine_error_leaves_flags_alone() {
        let mut fx = Fixture::new();
        let change = fx.write("orders.csv", "id\n1\n");
        fx.cache.handle_change(&change).unwrap();

        let err = fx.cache.execute("select nope from orders").unwrap_err();
        assert!(matches!(err, CsvDbError::Engine(_)));
        // The refresh ran before the engine rejected the query
        assert!(!fx.is_dirty("orders"));

        let other = fx.write("other.csv", "id\n1\n");
        fx.cache.handle_change(&other).unwrap();
        assert!(fx.cache.execute("selec broken").is_err());
        assert!(fx.is_dirty("other"));
    }

    #[test]
    fn test_schema_change_on_reload() {
        let mut fx = Fixture::new();
        let change = fx.write("m.csv", "a\n1\n");
        fx.cache.handle_change(&change).unwrap();
        fx.cache.ensure_fresh(&names(&["m"]));

        let change = fx.write("m.csv", "a,b\nx,2.5\n");
        fx.cache.handle_change(&change).unwrap();
        let (output, refreshed) = fx.cache.execute("select * from m").unwrap();
        assert_eq!(refreshed, 1);
        assert_eq!(output.columns, vec!["m_0", "m_1"]);
        assert_eq!(
            fx.cache.descriptor("m").unwrap().column_types(),
            vec![ColumnType::Text, ColumnType::Real]
        );
    }

    #[test]
    fn test_emptied_file_reloads_zero_rows() {
        let mut fx = Fixture::new();
        let change = fx.write("orders.csv", "id,amount\n1,10.5\n");
        fx.cache.handle_change(&change).unwrap();
        fx.cache.ensure_fresh(&names(&["orders"]));

        let change = fx.write("orders.csv", "id,amount\n");
        fx.cache.handle_change(&change).unwrap();
        let (output, _) = fx.cache.execute("select * from orders").unwrap();
        assert!(output.rows.is_empty());
        assert_eq!(output.columns, vec!["orders_0", "orders_1"]);
    }

    #[test]
    fn test_names_differing_only_in_case_share_one_table() {
        let mut fx = Fixture::new();
        let upper = fx.write("Orders.csv", "id\n1\n2\n3\n");
        assert_eq!(fx.cache.handle_change(&upper).unwrap(), ChangeOutcome::Created);
        let (output, refreshed) = fx.cache.execute("SELECT * FROM Orders").unwrap();
        assert_eq!((output.rows.len(), refreshed), (3, 1));

        // Same engine table: re-pointed, not registered twice
        let lower = fx.write("orders.csv", "name\nx\n");
        assert_eq!(
            fx.cache.handle_change(&lower).unwrap(),
            ChangeOutcome::MarkedDirty
        );
        let tables = fx.cache.tables();
        assert_eq!(tables, vec![("Orders".to_string(), lower.path.clone())]);
        assert_eq!(fx.cache.source_path("ORDERS"), Some(lower.path.as_path()));

        let (output, refreshed) = fx.cache.execute("SELECT * FROM orders").unwrap();
        assert_eq!((output.rows.len(), refreshed), (1, 1));
        assert_eq!(output.columns, vec!["Orders_0"]);
        assert_eq!(
            fx.cache.descriptor("orders").unwrap().column_types(),
            vec![ColumnType::Text]
        );
    }

    #[test]
    fn test_events_drained_before_planning() {
        let mut fx = Fixture::new();
        let (tx, rx) = std::sync::mpsc::channel();
        fx.cache.attach_events(rx);

        tx.send(fx.write("orders.csv", "id\n1\n")).unwrap();
        let (output, refreshed) = fx.cache.execute("select * from orders").unwrap();
        assert_eq!(refreshed, 1);
        assert_eq!(output.rows.len(), 1);

        tx.send(fx.write("orders.csv", "id\n1\n2\n")).unwrap();
        assert_eq!(fx.cache.plan_refresh("select * from orders"), names(&["orders"]));

        drop(tx);
        assert_eq!(fx.cache.drain_events(), 0);
    }
}
