//! Migration runner
//!
//! Applies migrations in order, once each, recording a checksum per id

use crate::errors::{checksum_mismatch, from_rusqlite, migration_error, Result};
use crate::migrations::checksums::compute_checksum;
use crate::migrations::Migration;
use refetch_core::{log_op_end, log_op_error, log_op_start};
use rusqlite::{Connection, OptionalExtension};

/// Apply all pending migrations to the database
///
/// Returns the number of migrations applied by this call.
///
/// # Errors
///
/// `Persistence` when a migration fails (its transaction is rolled back) or
/// when an applied migration's SQL no longer matches its recorded checksum.
pub fn apply_migrations(conn: &Connection, migrations: &[Migration]) -> Result<usize> {
    log_op_start!("apply_migrations", pending = migrations.len());
    let start = std::time::Instant::now();

    let applied = apply_all(conn, migrations).map_err(|e| {
        log_op_error!(
            "apply_migrations",
            e,
            duration_ms = start.elapsed().as_millis() as u64
        );
        e
    })?;

    log_op_end!(
        "apply_migrations",
        duration_ms = start.elapsed().as_millis() as u64,
        applied = applied
    );

    Ok(applied)
}

/// Ids of the applied migrations, in application order
pub fn applied_migrations(conn: &Connection) -> Result<Vec<String>> {
    create_schema_version_table(conn)?;
    let mut stmt = conn
        .prepare("SELECT migration_id FROM schema_version ORDER BY id")
        .map_err(from_rusqlite)?;
    let ids = stmt
        .query_map([], |row| row.get(0))
        .map_err(from_rusqlite)?
        .collect::<std::result::Result<Vec<String>, _>>()
        .map_err(from_rusqlite)?;
    Ok(ids)
}

fn apply_all(conn: &Connection, migrations: &[Migration]) -> Result<usize> {
    create_schema_version_table(conn)?;

    let mut applied = 0;
    for migration in migrations {
        if apply_migration(conn, migration)? {
            applied += 1;
        }
    }
    Ok(applied)
}

/// Create the schema_version table if it doesn't exist
fn create_schema_version_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY,
            migration_id TEXT NOT NULL UNIQUE,
            applied_at INTEGER NOT NULL,
            checksum TEXT
        )",
        [],
    )
    .map_err(from_rusqlite)?;

    Ok(())
}

/// Apply a single migration if not already applied
fn apply_migration(conn: &Connection, migration: &Migration) -> Result<bool> {
    let checksum = compute_checksum(migration.sql);

    let recorded: Option<Option<String>> = conn
        .query_row(
            "SELECT checksum FROM schema_version WHERE migration_id = ?",
            [migration.id],
            |row| row.get(0),
        )
        .optional()
        .map_err(from_rusqlite)?;

    if let Some(recorded) = recorded {
        return match recorded {
            Some(expected) if expected != checksum => {
                Err(checksum_mismatch(migration.id, &expected, &checksum))
            }
            _ => Ok(false),
        };
    }

    let tx = conn.unchecked_transaction().map_err(from_rusqlite)?;

    tx.execute_batch(migration.sql)
        .map_err(|e| migration_error(migration.id, &e.to_string()))?;

    let now = chrono::Utc::now().timestamp();
    tx.execute(
        "INSERT INTO schema_version (migration_id, applied_at, checksum) VALUES (?, ?, ?)",
        rusqlite::params![migration.id, now, checksum],
    )
    .map_err(from_rusqlite)?;

    tx.commit().map_err(from_rusqlite)?;

    tracing::debug!(migration_id = migration.id, "applied migration");
    Ok(true)
}
