//! Database connection management
//!
//! Provides utilities for opening and configuring SQLite connections

use crate::config::DatabaseConfig;
use crate::errors::{from_rusqlite, Result};
use rusqlite::Connection;
use std::path::Path;

/// Open a SQLite database at the given path
pub fn open<P: AsRef<Path>>(path: P) -> Result<Connection> {
    Connection::open(path).map_err(from_rusqlite)
}

/// Open an in-memory SQLite database
pub fn open_in_memory() -> Result<Connection> {
    Connection::open_in_memory().map_err(from_rusqlite)
}

/// Open the database described by `config` and apply its pragmas
pub fn open_configured(config: &DatabaseConfig) -> Result<Connection> {
    let conn = match &config.path {
        Some(path) => open(path)?,
        None => open_in_memory()?,
    };
    configure(&conn, config)?;
    Ok(conn)
}

/// Configure a connection
///
/// The journal mode is left alone for in-memory databases, which only
/// support `memory`.
pub fn configure(conn: &Connection, config: &DatabaseConfig) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", config.foreign_keys)
        .map_err(from_rusqlite)?;

    if config.path.is_some() {
        let journal_mode = config.journal_mode.as_pragma();
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", journal_mode, |row| row.get(0))
            .map_err(from_rusqlite)?;
        tracing::debug!(journal_mode = %mode, "configured sqlite journal mode");
    }

    Ok(())
}
