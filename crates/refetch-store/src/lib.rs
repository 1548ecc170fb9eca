//! Refetch Store - SQLite reference engine for refetch-core
//!
//! Provides:
//! - `EntityManager`: identity map, unit of work and lazy collections over
//!   one SQLite connection, implementing `PersistenceEngine`
//! - Entity mappings (`EntityMapping`, `FieldMapping`, `Record`)
//! - Criteria to SQL translation
//! - TOML configuration and connection setup
//! - Migrations framework with checksums

pub mod config;
pub mod db;
pub mod errors;
pub mod manager;
pub mod mapping;
pub mod migrations;
mod query;
pub mod unit_of_work;

// Re-export key types
pub use config::{DatabaseConfig, JournalMode, StoreConfig};
pub use errors::Result;
pub use manager::{EntityManager, FlushSummary};
pub use mapping::{EntityMapping, FieldMapping, JoinRows, Record};
pub use migrations::Migration;
