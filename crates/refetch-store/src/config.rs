//! Store configuration
//!
//! Loaded from TOML:
//!
//! ```toml
//! [database]
//! path = "library.db"     # omit for an in-memory database
//! foreign_keys = true
//! journal_mode = "wal"    # delete | wal | memory
//!
//! [logging]
//! profile = "production"  # development | production | test
//! ```

use std::path::{Path, PathBuf};

use refetch_core::logging_facility::{self, Profile};
use serde::Deserialize;

use crate::errors::{config_error, io_error, Result};

/// SQLite journal mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    #[default]
    Delete,
    Wal,
    Memory,
}

impl JournalMode {
    pub fn as_pragma(&self) -> &'static str {
        match self {
            JournalMode::Delete => "DELETE",
            JournalMode::Wal => "WAL",
            JournalMode::Memory => "MEMORY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
    pub foreign_keys: bool,
    pub journal_mode: JournalMode,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            foreign_keys: true,
            journal_mode: JournalMode::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub profile: Profile,
}

/// Configuration of an `EntityManager`
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

impl StoreConfig {
    /// In-memory database with default settings
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// File-backed database with default settings
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            database: DatabaseConfig {
                path: Some(path.into()),
                ..DatabaseConfig::default()
            },
            ..Self::default()
        }
    }

    /// Parse a TOML document
    ///
    /// # Errors
    ///
    /// `Config` when the document is malformed or has unknown keys.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| config_error(format!("Invalid store config: {}", e)))
    }

    /// Read and parse a TOML file
    ///
    /// # Errors
    ///
    /// `Io` when the file cannot be read, `Config` when it does not parse.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source =
            std::fs::read_to_string(path.as_ref()).map_err(|e| io_error("config_load", e))?;
        Self::from_toml_str(&source)
    }

    /// Install the configured logging profile
    pub fn init_logging(&self) {
        logging_facility::init(self.logging.profile);
    }
}
