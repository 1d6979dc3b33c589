//! Command-line front end: argument parsing, the console and output.

pub mod console;
pub mod output;

use clap::Parser;
use csvdb::{CsvDbConfig, RefreshMatching};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "csvdb",
    version,
    about = "Query a directory of delimited files as SQL tables"
)]
pub struct Cli {
    /// Directory of delimited files to watch [default: data]
    #[arg(long)]
    pub csvdir: Option<PathBuf>,

    /// TOML config file; flags given here override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// File extension to watch
    #[arg(long)]
    pub extension: Option<String>,

    /// Field delimiter
    #[arg(long)]
    pub delimiter: Option<char>,

    /// Files have no header row
    #[arg(long)]
    pub no_headers: bool,

    /// Poll interval in milliseconds
    #[arg(long)]
    pub poll_ms: Option<u64>,

    /// On-disk engine store (in-memory when omitted)
    #[arg(long)]
    pub database: Option<PathBuf>,

    /// How queries are matched to tables before refreshing
    #[arg(long = "match", value_enum)]
    pub matching: Option<RefreshMatching>,

    /// Run one query after startup and exit
    #[arg(short = 'e', long)]
    pub execute: Option<String>,

    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl Cli {
    /// Apply command-line overrides on top of a base config.
    pub fn apply_to(&self, mut config: CsvDbConfig) -> CsvDbConfig {
        if let Some(csvdir) = &self.csvdir {
            config.directory = csvdir.clone();
        }
        if let Some(extension) = &self.extension {
            config.extension = extension.clone();
        }
        if let Some(delimiter) = self.delimiter {
            config.delimiter = delimiter;
        }
        if self.no_headers {
            config.has_headers = false;
        }
        if let Some(poll_ms) = self.poll_ms {
            config.poll_interval_ms = poll_ms;
        }
        if let Some(database) = &self.database {
            config.database_path = Some(database.clone());
        }
        if let Some(matching) = self.matching {
            config.refresh_matching = matching;
        }
        config
    }
}
