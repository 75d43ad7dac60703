//! Device adapters
//!
//! One capability contract over every vendor variant: `open` a session,
//! `collect` the configuration with the variant's fixed command, `close`.
//! Adapters hold no orchestration logic; timeouts, retries and job
//! bookkeeping belong to the coordinator.

pub mod cli;
pub mod prompt;
pub mod ssh;
pub mod telnet;

use crate::credentials::CredentialStore;
use async_trait::async_trait;
use cfgvault_core::{Device, RawConfig, Transport, VaultError};
use cfgvault_core_types::DeviceId;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use cli::{CliSession, CliStream};

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("authentication rejected")]
    Auth,

    #[error("unknown credential reference '{0}'")]
    UnknownCredential(String),

    #[error("transport {transport} not permitted for this vendor")]
    TransportNotPermitted { transport: Transport },

    #[error("session closed by the device")]
    Closed,

    #[error("output exceeded {limit} bytes")]
    OutputTooLarge { limit: usize },

    #[error("unexpected output: {0}")]
    UnexpectedOutput(String),

    #[error("device reported: {0}")]
    CommandRejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Which half of the contract produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Open,
    Collect,
}

impl AdapterError {
    /// Map into the domain taxonomy: failures while opening are connect
    /// errors, failures while collecting are collect errors.
    pub fn into_vault_error(self, device_id: &DeviceId, phase: Phase) -> VaultError {
        let device_id = device_id.to_string();
        match (self, phase) {
            (AdapterError::Auth, _) => VaultError::AuthenticationFailed { device_id },
            (AdapterError::UnknownCredential(credential_ref), _) => {
                VaultError::UnknownCredential {
                    device_id,
                    credential_ref,
                }
            }
            (AdapterError::TransportNotPermitted { transport }, _) => VaultError::InvalidDevice {
                device_id,
                reason: format!("transport {} not permitted", transport),
            },
            (AdapterError::OutputTooLarge { limit }, _) => VaultError::UnexpectedOutput {
                device_id,
                reason: format!("output exceeded {} bytes", limit),
            },
            (AdapterError::UnexpectedOutput(reason), _) => {
                VaultError::UnexpectedOutput { device_id, reason }
            }
            (AdapterError::CommandRejected(reason), _) => {
                VaultError::CommandFailed { device_id, reason }
            }
            (other, Phase::Open) => VaultError::DeviceUnreachable {
                device_id,
                reason: other.to_string(),
            },
            (other, Phase::Collect) => VaultError::CommandFailed {
                device_id,
                reason: other.to_string(),
            },
        }
    }
}

/// An authenticated session, ready to run the variant's command
#[async_trait]
pub trait Session: Send {
    /// Run the fixed retrieval command and return its output
    async fn collect(&mut self) -> Result<RawConfig, AdapterError>;

    /// Tear the session down; never fails
    async fn close(self: Box<Self>);
}

#[async_trait]
pub trait DeviceAdapter: Send + Sync {
    async fn open(&self, device: &Device) -> Result<Box<dyn Session>, AdapterError>;
}

/// Session limits applied by [`CliAdapter`]
#[derive(Debug, Clone, Copy)]
pub struct AdapterSettings {
    pub max_output_bytes: usize,
    /// SSH keep-alive bound for an idle session
    pub inactivity_timeout: Duration,
}

/// SSH and Telnet CLI adapter for every vendor variant
pub struct CliAdapter {
    credentials: Arc<dyn CredentialStore>,
    settings: AdapterSettings,
}

impl CliAdapter {
    pub fn new(credentials: Arc<dyn CredentialStore>, settings: AdapterSettings) -> Self {
        Self {
            credentials,
            settings,
        }
    }
}

#[async_trait]
impl DeviceAdapter for CliAdapter {
    async fn open(&self, device: &Device) -> Result<Box<dyn Session>, AdapterError> {
        let profile = device.profile();
        if !profile.supports(device.transport) {
            return Err(AdapterError::TransportNotPermitted {
                transport: device.transport,
            });
        }
        let credential = self
            .credentials
            .resolve(&device.credential_ref)
            .ok_or_else(|| AdapterError::UnknownCredential(device.credential_ref.clone()))?;

        tracing::debug!(
            device_id = %device.id,
            transport = device.transport.as_str(),
            address = %device.address,
            port = device.port(),
            "Opening device session"
        );

        match device.transport {
            Transport::Ssh => {
                let stream = ssh::connect(device, &credential, self.settings).await?;
                let session =
                    CliSession::establish(stream, device, &credential, self.settings.max_output_bytes)
                        .await?;
                Ok(Box::new(session))
            }
            Transport::Telnet => {
                let tcp =
                    tokio::net::TcpStream::connect((device.address.as_str(), device.port()))
                        .await
                        .map_err(|e| AdapterError::Connect(e.to_string()))?;
                let stream = telnet::TelnetStream::new(tcp);
                let session = CliSession::login_and_establish(
                    stream,
                    device,
                    &credential,
                    self.settings.max_output_bytes,
                )
                .await?;
                Ok(Box::new(session))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{Credential, FileCredentialStore};
    use cfgvault_core::VendorVariant;

    fn adapter() -> CliAdapter {
        let creds = FileCredentialStore::from_entries([(
            "lab".to_string(),
            Credential::new("backup", "pw"),
        )]);
        CliAdapter::new(
            Arc::new(creds),
            AdapterSettings {
                max_output_bytes: 1024,
                inactivity_timeout: Duration::from_secs(5),
            },
        )
    }

    #[tokio::test]
    async fn test_unknown_credential_fails_before_connecting() {
        let device = Device::new("sw-1", VendorVariant::Cisco, "192.0.2.1", "nope");
        let err = adapter().open(&device).await.err().unwrap();
        assert!(matches!(err, AdapterError::UnknownCredential(ref r) if r == "nope"));
    }

    #[tokio::test]
    async fn test_transport_checked_against_variant() {
        let device = Device::new("rtr-1", VendorVariant::Juniper, "192.0.2.1", "lab")
            .with_transport(Transport::Telnet);
        let err = adapter().open(&device).await.err().unwrap();
        assert!(matches!(err, AdapterError::TransportNotPermitted { .. }));
    }

    #[test]
    fn test_error_mapping_depends_on_phase() {
        let id = DeviceId::new("sw-1");
        assert!(matches!(
            AdapterError::Closed.into_vault_error(&id, Phase::Open),
            VaultError::DeviceUnreachable { .. }
        ));
        assert!(matches!(
            AdapterError::Closed.into_vault_error(&id, Phase::Collect),
            VaultError::CommandFailed { .. }
        ));
        assert!(matches!(
            AdapterError::Auth.into_vault_error(&id, Phase::Open),
            VaultError::AuthenticationFailed { .. }
        ));
    }
}
