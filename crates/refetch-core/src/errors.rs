use std::sync::Arc;

use thiserror::Error;

use crate::model::EntityKey;

/// Result type alias using RefetchError
pub type Result<T> = std::result::Result<T, RefetchError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Every error raised by this crate or by an engine adapter maps to one kind,
/// and every kind maps to a stable code usable for programmatic handling and
/// log assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // Domain
    NotFound,
    SnapshotNotDone,
    ObjectBorrowed,

    // Engine contract
    Mapping,
    TypeMismatch,
    InvalidCriteria,

    // Integration/IO
    Persistence,
    Closed,
    Config,
    Io,

    // Internal
    Internal,
}

impl ErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "ERR_NOT_FOUND",
            ErrorKind::SnapshotNotDone => "ERR_SNAPSHOT_NOT_DONE",
            ErrorKind::ObjectBorrowed => "ERR_OBJECT_BORROWED",
            ErrorKind::Mapping => "ERR_MAPPING",
            ErrorKind::TypeMismatch => "ERR_TYPE_MISMATCH",
            ErrorKind::InvalidCriteria => "ERR_INVALID_CRITERIA",
            ErrorKind::Persistence => "ERR_PERSISTENCE",
            ErrorKind::Closed => "ERR_CLOSED",
            ErrorKind::Config => "ERR_CONFIG",
            ErrorKind::Io => "ERR_IO",
            ErrorKind::Internal => "ERR_INTERNAL",
        }
    }
}

/// Structured error raised by a persistence engine
///
/// Engine adapters report every failure (unmapped types, storage errors,
/// configuration problems) through this type. The managers in this crate
/// never rewrite it: it reaches the caller inside `RefetchError::Engine`.
#[derive(Debug, Clone)]
pub struct EngineError {
    kind: ErrorKind,
    op: Option<String>,
    entity_type: Option<String>,
    message: String,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl EngineError {
    /// Create a new error with the specified kind
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            op: None,
            entity_type: None,
            message: String::new(),
            source: None,
        }
    }

    /// The requested type is not registered as an entity
    pub fn mapping(type_name: &str) -> Self {
        Self::new(ErrorKind::Mapping)
            .with_entity_type(type_name)
            .with_message(format!(
                "Class \"{}\" is not a valid entity or mapped super class",
                type_name
            ))
    }

    /// A tracked instance does not have the Rust type its metadata promised
    pub fn type_mismatch(type_name: &str) -> Self {
        Self::new(ErrorKind::TypeMismatch)
            .with_entity_type(type_name)
            .with_message(format!(
                "Tracked instance is not of the requested type '{}'",
                type_name
            ))
    }

    /// Backing-store failure
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Persistence).with_message(message)
    }

    /// The engine behind a lazy handle has been dropped
    pub fn closed() -> Self {
        Self::new(ErrorKind::Closed).with_message("The entity manager is closed")
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add entity type context
    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Attach the underlying driver error
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Get the operation context, if any
    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    /// Get the entity type context, if any
    pub fn entity_type(&self) -> Option<&str> {
        self.entity_type.as_deref()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(entity_type) = &self.entity_type {
            write!(f, " (entity_type: {})", entity_type)?;
        }
        Ok(())
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

// ========== Library errors ==========

/// Marker shared by the errors this library defines itself
///
/// Engine errors never implement it, so callers can tell "the record is gone"
/// or "you forgot to snapshot" apart from storage trouble.
pub trait LibraryError: std::error::Error {
    /// Canonical kind of this error
    fn kind(&self) -> ErrorKind;
}

/// No backing record exists for the requested type and key
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", not_found_message(.type_name, .key))]
pub struct EntityNotFoundError {
    type_name: String,
    key: EntityKey,
}

fn not_found_message(type_name: &str, key: &EntityKey) -> String {
    if key.is_empty() {
        format!("Entity of type '{}' was not found", type_name)
    } else {
        format!(
            "Entity of type '{}' for IDs {} was not found",
            type_name,
            key.describe()
        )
    }
}

impl EntityNotFoundError {
    pub fn from_type_and_key(type_name: impl Into<String>, key: EntityKey) -> Self {
        Self {
            type_name: type_name.into(),
            key,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn key(&self) -> &EntityKey {
        &self.key
    }
}

impl LibraryError for EntityNotFoundError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::NotFound
    }
}

/// `SnapshotManager::clear` was called before any snapshot was taken
#[derive(Error, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[error("The snapshot was not done")]
pub struct SnapshotNotDoneError;

impl LibraryError for SnapshotNotDoneError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::SnapshotNotDone
    }
}

/// Errors surfaced by the refetch and snapshot managers
#[derive(Error, Debug, Clone)]
pub enum RefetchError {
    /// The record behind the object no longer exists
    #[error(transparent)]
    EntityNotFound(#[from] EntityNotFoundError),

    /// `clear` called before `snapshot`
    #[error(transparent)]
    SnapshotNotDone(#[from] SnapshotNotDoneError),

    /// The caller holds a mutable borrow on the object being refetched
    #[error("Object of type '{type_name}' is mutably borrowed and cannot be inspected")]
    ObjectBorrowed { type_name: String },

    /// Failure reported by the persistence engine, passed through verbatim
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl RefetchError {
    /// Canonical kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            RefetchError::EntityNotFound(e) => e.kind(),
            RefetchError::SnapshotNotDone(e) => e.kind(),
            RefetchError::ObjectBorrowed { .. } => ErrorKind::ObjectBorrowed,
            RefetchError::Engine(e) => e.kind(),
        }
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// True for the errors carrying the `LibraryError` marker
    pub fn is_library_error(&self) -> bool {
        self.as_library_error().is_some()
    }

    /// The library error behind this value, if it is one
    pub fn as_library_error(&self) -> Option<&dyn LibraryError> {
        match self {
            RefetchError::EntityNotFound(e) => Some(e),
            RefetchError::SnapshotNotDone(e) => Some(e),
            _ => None,
        }
    }

    /// The engine error behind this value, if it is one
    pub fn as_engine_error(&self) -> Option<&EngineError> {
        match self {
            RefetchError::Engine(e) => Some(e),
            _ => None,
        }
    }
}

// ========== End Error Facility ==========
