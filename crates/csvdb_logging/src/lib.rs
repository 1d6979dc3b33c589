//! Logging setup for the csvdb binary.
//!
//! Two layers over one registry: a daily rolling file under the csvdb home
//! directory and stderr. `RUST_LOG` overrides the default filter for both.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "csvdb=info,csvdb_engine=info";
const MAX_LOG_FILES: usize = 5;

/// How the process wants its logs.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
    /// The console owns the terminal; only warnings go to stderr.
    pub interactive: bool,
}

/// Keeps the background file writer alive. Dropping it flushes the file.
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber.
///
/// A log directory that cannot be created disables the file layer with a
/// warning on stderr; it never stops the program.
pub fn init_logging(config: LogConfig<'_>) -> Result<LogGuard> {
    let file_filter = env_filter();
    let console_filter = if config.interactive && !config.verbose {
        EnvFilter::new("warn")
    } else {
        env_filter()
    };

    let mut guard = None;
    let file_layer = match ensure_logs_dir().and_then(|dir| file_appender(dir, config.app_name)) {
        Ok(appender) => {
            let (writer, worker) = tracing_appender::non_blocking(appender);
            guard = Some(worker);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(file_filter),
            )
        }
        Err(err) => {
            eprintln!("Warning: file logging disabled: {:#}", err);
            None
        }
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    Ok(LogGuard { _file: guard })
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Daily file `<app>.<date>.log` in `dir`, keeping the newest few.
pub fn file_appender(dir: PathBuf, app_name: &str) -> Result<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(sanitize_name(app_name))
        .filename_suffix("log")
        .max_log_files(MAX_LOG_FILES)
        .build(&dir)
        .with_context(|| format!("Failed to open log file in {}", dir.display()))
}

/// csvdb home directory: `$CSVDB_HOME`, else `~/.csvdb`.
pub fn csvdb_home() -> PathBuf {
    resolve_home(std::env::var_os("CSVDB_HOME").map(PathBuf::from), dirs::home_dir())
}

fn resolve_home(override_path: Option<PathBuf>, home: Option<PathBuf>) -> PathBuf {
    match (override_path, home) {
        (Some(path), _) if !path.as_os_str().is_empty() => path,
        (_, Some(home)) => home.join(".csvdb"),
        _ => PathBuf::from(".csvdb"),
    }
}

pub fn logs_dir() -> PathBuf {
    csvdb_home().join("logs")
}

pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "csvdb".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_file_appender_writes_prefixed_file() {
        let tmp = TempDir::new().unwrap();
        let mut appender = file_appender(tmp.path().to_path_buf(), "csvdb").unwrap();
        appender.write_all(b"hello\n").unwrap();
        appender.flush().unwrap();

        let names: Vec<String> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("csvdb."));
        assert!(names[0].ends_with(".log"));
    }

    #[test]
    fn test_resolve_home() {
        let home = Some(PathBuf::from("/home/u"));
        assert_eq!(
            resolve_home(Some(PathBuf::from("/srv/csvdb")), home.clone()),
            PathBuf::from("/srv/csvdb")
        );
        assert_eq!(
            resolve_home(Some(PathBuf::new()), home.clone()),
            PathBuf::from("/home/u/.csvdb")
        );
        assert_eq!(resolve_home(None, home), PathBuf::from("/home/u/.csvdb"));
        assert_eq!(resolve_home(None, None), PathBuf::from(".csvdb"));
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("csvdb console"), "csvdb_console");
        assert_eq!(sanitize_name("a/b"), "a_b");
        assert_eq!(sanitize_name(""), "csvdb");
    }
}
