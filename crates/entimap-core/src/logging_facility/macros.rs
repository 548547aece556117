//! Lifecycle logging macros
//!
//! Public repository and query operations wrap their work in one
//! `log_op_start!` and exactly one of `log_op_end!` or `log_op_error!`.
//! Extra `key = value` fields are passed through to `tracing`.

/// Emit a lifecycle event; not part of the public interface
#[doc(hidden)]
#[macro_export]
macro_rules! __log_lifecycle {
    ($level:ident, $op:expr, $phase:ident $(, $($field:tt)*)?) => {
        tracing::$level!(
            component = module_path!(),
            op = $op,
            event = entimap_core_types::schema::Lifecycle::$phase.as_str(),
            $($($field)*)?
        )
    };
}

/// Operation entered
///
/// ```
/// # use entimap_core::log_op_start;
/// log_op_start!("repository_read", entity_type = "product", entity_id = 3);
/// ```
#[macro_export]
macro_rules! log_op_start {
    ($op:expr $(, $($field:tt)*)?) => {
        $crate::__log_lifecycle!(info, $op, Start $(, $($field)*)?)
    };
}

/// Operation finished; `duration_ms` is required
///
/// ```
/// # use entimap_core::log_op_end;
/// log_op_end!("repository_read", duration_ms = 2, entity_type = "product");
/// ```
#[macro_export]
macro_rules! log_op_end {
    ($op:expr, duration_ms = $duration:expr $(, $($field:tt)*)?) => {
        $crate::__log_lifecycle!(info, $op, End, duration_ms = $duration $(, $($field)*)?)
    };
}

/// Operation failed
///
/// The error may be anything convertible into
/// [`ExError`](crate::errors::ExError); its kind and stable code are logged.
///
/// ```
/// # use entimap_core::log_op_error;
/// # use entimap_core::errors::MapError;
/// let err = MapError::NotFound { entity_type: "product".into(), id: 4 };
/// log_op_error!("repository_read", err, duration_ms = 1);
/// ```
#[macro_export]
macro_rules! log_op_error {
    ($op:expr, $err:expr, duration_ms = $duration:expr $(, $($field:tt)*)?) => {{
        let failure: $crate::errors::ExError = $err.into();
        $crate::__log_lifecycle!(
            error,
            $op,
            EndError,
            duration_ms = $duration,
            err.kind = ?failure.kind(),
            err.code = failure.code()
            $(, $($field)*)?
        )
    }};
}
