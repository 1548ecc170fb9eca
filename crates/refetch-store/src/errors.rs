//! Error handling for refetch-store
//!
//! Wraps refetch-core EngineError with store-specific helpers

use refetch_core::errors::{EngineError, ErrorKind};
use thiserror::Error;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Create a migration error
pub fn migration_error(migration_id: &str, reason: &str) -> EngineError {
    EngineError::new(ErrorKind::Persistence)
        .with_op("migration")
        .with_message(format!("Migration {} failed: {}", migration_id, reason))
}

/// Create a checksum mismatch error
pub fn checksum_mismatch(migration_id: &str, expected: &str, actual: &str) -> EngineError {
    EngineError::new(ErrorKind::Persistence)
        .with_op("migration_checksum")
        .with_message(format!(
            "Checksum mismatch for migration {}: expected {}, got {}",
            migration_id, expected, actual
        ))
}

/// Create a database error from rusqlite::Error
pub fn from_rusqlite(err: rusqlite::Error) -> EngineError {
    EngineError::new(ErrorKind::Persistence)
        .with_op("sqlite")
        .with_message(err.to_string())
        .with_source(err)
}

/// Create an IO error
pub fn io_error(operation: &str, err: std::io::Error) -> EngineError {
    EngineError::new(ErrorKind::Io)
        .with_op(operation.to_string())
        .with_message(err.to_string())
        .with_source(err)
}

/// Create a configuration error
pub fn config_error(reason: impl Into<String>) -> EngineError {
    EngineError::new(ErrorKind::Config)
        .with_op("config")
        .with_message(reason)
}

/// Criteria referencing something the mapping cannot translate
pub fn invalid_criteria(entity_type: &str, reason: impl Into<String>) -> EngineError {
    EngineError::new(ErrorKind::InvalidCriteria)
        .with_op("matching")
        .with_entity_type(entity_type)
        .with_message(reason)
}

/// Problems reading a materialised row
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("Column '{column}' is not selected for {table}")]
    MissingColumn { table: String, column: String },

    #[error("Column '{column}' of {table} holds {found}, expected {expected}")]
    UnexpectedType {
        table: String,
        column: String,
        expected: &'static str,
        found: String,
    },
}

impl From<RecordError> for EngineError {
    fn from(err: RecordError) -> Self {
        EngineError::new(ErrorKind::Mapping)
            .with_op("hydrate")
            .with_message(err.to_string())
            .with_source(err)
    }
}
