//! Canonical logging macros
//!
//! Field names come from `cfgvault_core_types::schema`, reached through
//! `$crate::types` so callers only need `cfgvault-core` and `tracing`.

/// Log the start of an operation
///
/// # Example
///
/// ```
/// # use cfgvault_core::log_op_start;
/// log_op_start!("collect");
/// log_op_start!("collect", device_id = "rtr-01");
/// ```
#[macro_export]
macro_rules! log_op_start {
    ($op:expr) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::types::schema::EVENT_START,
        );
    };
    ($op:expr, $($field:tt)*) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::types::schema::EVENT_START,
            $($field)*
        );
    };
}

/// Log the successful end of an operation
///
/// # Example
///
/// ```
/// # use cfgvault_core::log_op_end;
/// log_op_end!("collect", duration_ms = 42);
/// ```
#[macro_export]
macro_rules! log_op_end {
    ($op:expr, duration_ms = $duration:expr) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::types::schema::EVENT_END,
            duration_ms = $duration,
        );
    };
    ($op:expr, duration_ms = $duration:expr, $($field:tt)*) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::types::schema::EVENT_END,
            duration_ms = $duration,
            $($field)*
        );
    };
}

/// Log an operation error
///
/// `$err` is anything convertible into `CvError`.
///
/// # Example
///
/// ```
/// # use cfgvault_core::{log_op_error, errors::VaultError};
/// let err = VaultError::DeviceNotFound { device_id: "rtr-01".to_string() };
/// log_op_error!("read_head", err, duration_ms = 10);
/// ```
#[macro_export]
macro_rules! log_op_error {
    ($op:expr, $err:expr, duration_ms = $duration:expr) => {{
        let cv_err: $crate::errors::CvError = ::core::convert::Into::into($err);
        tracing::error!(
            component = module_path!(),
            op = $op,
            event = $crate::types::schema::EVENT_END_ERROR,
            duration_ms = $duration,
            err_kind = ?cv_err.kind(),
            err_code = cv_err.code(),
            error = %cv_err,
        );
    }};
    ($op:expr, $err:expr, duration_ms = $duration:expr, $($field:tt)*) => {{
        let cv_err: $crate::errors::CvError = ::core::convert::Into::into($err);
        tracing::error!(
            component = module_path!(),
            op = $op,
            event = $crate::types::schema::EVENT_END_ERROR,
            duration_ms = $duration,
            err_kind = ?cv_err.kind(),
            err_code = cv_err.code(),
            error = %cv_err,
            $($field)*
        );
    }};
}
