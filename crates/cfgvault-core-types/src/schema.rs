//! Canonical schema constants for structured logging and audit events
//!
//! These constants keep field names consistent between the logging macros,
//! the audit trail and the tests that assert on captured events.

// Canonical field keys for structured logging
pub const FIELD_COMPONENT: &str = "component";
pub const FIELD_OP: &str = "op";
pub const FIELD_EVENT: &str = "event";
pub const FIELD_DURATION_MS: &str = "duration_ms";

// Entity identifiers
pub const FIELD_DEVICE_ID: &str = "device_id";
pub const FIELD_JOB_ID: &str = "job_id";
pub const FIELD_SNAPSHOT_ID: &str = "snapshot_id";
pub const FIELD_SEQUENCE: &str = "sequence";
pub const FIELD_SOURCE_ID: &str = "source_id";
pub const FIELD_PEER: &str = "peer";

// Error fields
pub const FIELD_ERR_KIND: &str = "err_kind";
pub const FIELD_ERR_CODE: &str = "err_code";

// Canonical event names
pub const EVENT_START: &str = "start";
pub const EVENT_END: &str = "end";
pub const EVENT_END_ERROR: &str = "end_error";

// Audit trail categories
pub const AUDIT_INTEGRITY: &str = "integrity";
pub const AUDIT_INGESTION: &str = "ingestion";
pub const AUDIT_JOB: &str = "job";
