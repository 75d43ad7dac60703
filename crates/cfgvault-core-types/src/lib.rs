//! Core types shared across cfgvault facilities
//!
//! This crate provides the foundational types used by the model, the error
//! facility and the logging facility:
//!
//! - **Identifiers**: DeviceId, JobId, SnapshotId, IngestionId
//! - **Sensitive data**: Sensitive<T> marker for automatic redaction
//! - **Schema constants**: Canonical field keys and event names

pub mod ids;
pub mod schema;
pub mod sensitive;

pub use ids::{DeviceId, IngestionId, JobId, SnapshotId};
pub use sensitive::Sensitive;
