//! Refetch Core - identity-map aware refetch and snapshot utilities
//!
//! This crate sits on top of a persistence engine's tracking session (its
//! identity map) and provides:
//! - `RefetchManager`: resolve a possibly stale or detached object to the
//!   managed instance for the same primary key
//! - `SnapshotManager`: checkpoint the tracked key set and later detach
//!   everything admitted since the checkpoint
//! - The engine contract (`EntityMetadata`, `PersistenceEngine`) both depend on
//! - Lazy collections and criteria passed through to the engine
//! - The error and logging facilities shared with engine adapters

pub mod collection;
pub mod criteria;
pub mod engine;
pub mod errors;
pub mod identity_map;
pub mod logging_facility;
pub mod model;
pub mod refetch;
pub mod snapshot;

// Re-export commonly used types
pub use collection::LazyCollection;
pub use criteria::{Criteria, Expr, Order};
pub use engine::{EntityMetadata, PersistenceEngine};
pub use errors::{
    EngineError, EntityNotFoundError, ErrorKind, LibraryError, RefetchError, Result,
    SnapshotNotDoneError,
};
pub use identity_map::{IdentityMap, KeySet};
pub use model::{AnyEntity, ClassMetadata, EntityKey, Managed, Value};
pub use refetch::RefetchManager;
pub use snapshot::SnapshotManager;
