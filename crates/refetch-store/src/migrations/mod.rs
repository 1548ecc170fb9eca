//! Migration framework
//!
//! Provides:
//! - Migration runner with checksums and idempotent application
//! - Caller-supplied, ordered SQL migrations

mod checksums;
mod runner;

pub use checksums::compute_checksum;
pub use runner::{apply_migrations, applied_migrations};

/// One schema migration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    pub id: &'static str,
    pub sql: &'static str,
}

impl Migration {
    pub const fn new(id: &'static str, sql: &'static str) -> Self {
        Self { id, sql }
    }
}
