//! Canonical logging macros
//!
//! These macros provide a structured, consistent way to log operations.

/// Log the start of an operation
///
/// # Example
///
/// ```
/// # use refetch_core::log_op_start;
/// log_op_start!("get_object");
/// log_op_start!("get_object", entity_type = "Book");
/// ```
#[macro_export]
macro_rules! log_op_start {
    ($op:expr) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = refetch_core_types::schema::EVENT_START,
        );
    };
    ($op:expr, $($field:tt)*) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = refetch_core_types::schema::EVENT_START,
            $($field)*
        );
    };
}

/// Log the successful end of an operation
///
/// # Example
///
/// ```
/// # use refetch_core::log_op_end;
/// log_op_end!("get_object", duration_ms = 42);
/// ```
#[macro_export]
macro_rules! log_op_end {
    ($op:expr, duration_ms = $duration:expr) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = refetch_core_types::schema::EVENT_END,
            duration_ms = $duration,
        );
    };
    ($op:expr, duration_ms = $duration:expr, $($field:tt)*) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = refetch_core_types::schema::EVENT_END,
            duration_ms = $duration,
            $($field)*
        );
    };
}

/// Log an operation error
///
/// `$err` is anything with a `kind()` method returning
/// `refetch_core::errors::ErrorKind`.
///
/// # Example
///
/// ```
/// # use refetch_core::{log_op_error, errors::SnapshotNotDoneError, RefetchError};
/// let err = RefetchError::from(SnapshotNotDoneError);
/// log_op_error!("snapshot_clear", err, duration_ms = 10);
/// ```
#[macro_export]
macro_rules! log_op_error {
    ($op:expr, $err:expr, duration_ms = $duration:expr) => {{
        let err_kind: $crate::errors::ErrorKind = $err.kind();
        tracing::error!(
            component = module_path!(),
            op = $op,
            event = refetch_core_types::schema::EVENT_END_ERROR,
            duration_ms = $duration,
            err.kind = ?err_kind,
            err.code = err_kind.code(),
        );
    }};
    ($op:expr, $err:expr, duration_ms = $duration:expr, $($field:tt)*) => {{
        let err_kind: $crate::errors::ErrorKind = $err.kind();
        tracing::error!(
            component = module_path!(),
            op = $op,
            event = refetch_core_types::schema::EVENT_END_ERROR,
            duration_ms = $duration,
            err.kind = ?err_kind,
            err.code = err_kind.code(),
            $($field)*
        );
    }};
}
