//! Configuration for a csvdb instance

use crate::error::{CsvDbError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How query text is matched against table names when planning a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RefreshMatching {
    /// Table name appears anywhere in the query text (case-insensitive).
    /// Can over-match on literals or longer identifiers.
    #[default]
    Substring,
    /// Table name appears as a whole identifier outside literals and comments.
    Identifiers,
}

/// Main configuration for csvdb
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvDbConfig {
    /// Directory watched for delimited files
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// File extension to watch, without the dot
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Field delimiter (single ASCII character)
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    /// First record of each file is a header
    #[serde(default = "default_has_headers")]
    pub has_headers: bool,

    /// Change monitor poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// On-disk engine store; in-memory when absent
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    #[serde(default)]
    pub refresh_matching: RefreshMatching,
}

fn default_directory() -> PathBuf {
    PathBuf::from("data")
}

fn default_extension() -> String {
    "csv".to_string()
}

fn default_delimiter() -> char {
    ','
}

fn default_has_headers() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for CsvDbConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            extension: default_extension(),
            delimiter: default_delimiter(),
            has_headers: default_has_headers(),
            poll_interval_ms: default_poll_interval_ms(),
            database_path: None,
            refresh_matching: RefreshMatching::default(),
        }
    }
}

impl CsvDbConfig {
    /// Default configuration watching `directory`.
    pub fn for_directory(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CsvDbConfig =
            toml::from_str(&content).map_err(|e| CsvDbError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| CsvDbError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.delimiter_byte()?;
        if self.normalized_extension().is_empty() {
            return Err(CsvDbError::Config("extension must not be empty".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(CsvDbError::Config(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn delimiter_byte(&self) -> Result<u8> {
        if self.delimiter.is_ascii() {
            Ok(self.delimiter as u8)
        } else {
            Err(CsvDbError::Config(format!(
                "delimiter must be a single ASCII character, got {:?}",
                self.delimiter
            )))
        }
    }

    /// Extension without a leading dot, lowercased.
    pub fn normalized_extension(&self) -> String {
        self.extension.trim_start_matches('.').to_ascii_lowercase()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = CsvDbConfig::default();
        assert_eq!(config.directory, PathBuf::from("data"));
        assert_eq!(config.extension, "csv");
        assert_eq!(config.delimiter_byte().unwrap(), b',');
        assert!(config.has_headers);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert!(config.database_path.is_none());
        assert_eq!(config.refresh_matching, RefreshMatching::Substring);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: CsvDbConfig = toml::from_str(
            r#"
            directory = "/srv/exports"
            delimiter = "|"
            refresh_matching = "identifiers"
            "#,
        )
        .unwrap();

        assert_eq!(config.directory, PathBuf::from("/srv/exports"));
        assert_eq!(config.delimiter_byte().unwrap(), b'|');
        assert_eq!(config.refresh_matching, RefreshMatching::Identifiers);
        assert_eq!(config.poll_interval_ms, 1000);
        assert!(config.has_headers);
    }

    #[test]
    fn test_save_then_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("csvdb.toml");
        let config = CsvDbConfig {
            poll_interval_ms: 250,
            database_path: Some(tmp.path().join("cache.duckdb")),
            ..CsvDbConfig::for_directory(tmp.path())
        };

        config.save(&path).unwrap();
        let loaded = CsvDbConfig::load(&path).unwrap();
        assert_eq!(loaded.directory, config.directory);
        assert_eq!(loaded.poll_interval_ms, 250);
        assert_eq!(loaded.database_path, config.database_path);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_delimiter = CsvDbConfig {
            delimiter: '§',
            ..CsvDbConfig::default()
        };
        assert!(matches!(bad_delimiter.validate(), Err(CsvDbError::Config(_))));

        let no_extension = CsvDbConfig {
            extension: ".".to_string(),
            ..CsvDbConfig::default()
        };
        assert!(no_extension.validate().is_err());

        let zero_interval = CsvDbConfig {
            poll_interval_ms: 0,
            ..CsvDbConfig::default()
        };
        assert!(zero_interval.validate().is_err());
    }

    #[test]
    fn test_normalized_extension() {
        let config = CsvDbConfig {
            extension: ".TSV".to_string(),
            ..CsvDbConfig::default()
        };
        assert_eq!(config.normalized_extension(), "tsv");
    }
}
