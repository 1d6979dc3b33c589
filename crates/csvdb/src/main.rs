//! csvdb: a directory of delimited files as live SQL tables.

use anyhow::{Context, Result};
use clap::Parser;
use csvdb::{CsvDb, CsvDbConfig};
use csvdb_logging::{init_logging, LogConfig};
use tracing::info;

mod cli;

use cli::Cli;

fn main() -> Result<()> {
    let args = Cli::parse();

    let _log_guard = init_logging(LogConfig {
        app_name: "csvdb",
        verbose: args.verbose,
        interactive: args.execute.is_none(),
    })?;

    let base = match &args.config {
        Some(path) => CsvDbConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => CsvDbConfig::default(),
    };
    let config = args.apply_to(base);

    let mut db = CsvDb::open(config).context("Failed to open csvdb")?;
    let registered = db.start().context("Failed to start watching")?;
    info!("Started with {} tables", registered);

    let result = match &args.execute {
        Some(sql) => db
            .execute(sql)
            .map(|outcome| cli::output::print_outcome(&outcome))
            .context("Query failed"),
        None => cli::console::run(&mut db),
    };

    db.stop();
    result
}
