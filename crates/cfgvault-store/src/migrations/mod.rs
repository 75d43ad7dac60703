//! Migration framework
//!
//! - Embedded SQL migrations, applied in order
//! - Each migration in its own transaction, recorded with a checksum
//! - Idempotent; a recorded migration whose SQL changed is refused

mod checksums;
mod embedded;
mod runner;

pub use runner::{applied_migrations, apply_migrations};
