//! cfgvault Engine - collection and ingestion runtime
//!
//! Wires the device adapters, the job coordinator, the collection scheduler
//! and the FTP ingestion listener around a `SnapshotStore`.

pub mod adapter;
pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod ingestion;
pub mod scheduler;
pub mod secrets;
pub mod service;

pub use adapter::{AdapterError, AdapterSettings, CliAdapter, DeviceAdapter, Session};
pub use config::{ConfigError, EngineConfig};
pub use coordinator::{CoordinatorSettings, DeviceLease, DeviceLocks, Dispatch, JobCoordinator};
pub use credentials::{Credential, CredentialStore, FileCredentialStore};
pub use ingestion::{FtpListener, FtpSettings, IngestionEvent, IngestionPipeline};
pub use scheduler::{Scheduler, TickReport};
pub use secrets::{MasterKey, SecretError};
pub use service::Engine;
