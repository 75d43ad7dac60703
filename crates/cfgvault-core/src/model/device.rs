use cfgvault_core_types::DeviceId;
use serde::{Deserialize, Serialize};

use super::cadence::Cadence;
use super::vendor::{Transport, VendorProfile, VendorVariant};
use crate::errors::{Result, VaultError};

/// A managed device as read from the external catalog
///
/// Read-only to the engine. The vendor variant fixes the command and the
/// permitted transports; `validate` is applied once when the record is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub variant: VendorVariant,
    pub address: String,
    /// Overrides the transport's default port
    pub port: Option<u16>,
    pub transport: Transport,
    /// Key into the credential store
    pub credential_ref: String,
    /// Devices without a cadence are only collected on demand
    pub cadence: Option<Cadence>,
    pub enabled: bool,
}

impl Device {
    /// Create an enabled device using the variant's default transport
    pub fn new(
        id: impl Into<DeviceId>,
        variant: VendorVariant,
        address: impl Into<String>,
        credential_ref: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            variant,
            address: address.into(),
            port: None,
            transport: variant.profile().default_transport(),
            credential_ref: credential_ref.into(),
            cadence: None,
            enabled: true,
        }
    }

    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_cadence(mut self, cadence: Cadence) -> Self {
        self.cadence = Some(cadence);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn profile(&self) -> &'static VendorProfile {
        self.variant.profile()
    }

    /// Effective TCP port
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.transport.default_port())
    }

    /// Check the record against the vendor table
    ///
    /// # Errors
    ///
    /// `TransportNotSupported` when the variant does not allow the transport,
    /// `InvalidDevice` for an empty address or credential reference.
    pub fn validate(&self) -> Result<()> {
        if self.id.as_str().trim().is_empty() {
            return Err(VaultError::InvalidDevice {
                device_id: self.id.to_string(),
                reason: "device id is empty".to_string(),
            });
        }
        if self.address.trim().is_empty() {
            return Err(VaultError::InvalidDevice {
                device_id: self.id.to_string(),
                reason: "address is empty".to_string(),
            });
        }
        if self.credential_ref.trim().is_empty() {
            return Err(VaultError::InvalidDevice {
                device_id: self.id.to_string(),
                reason: "credential reference is empty".to_string(),
            });
        }
        if self.port == Some(0) {
            return Err(VaultError::InvalidDevice {
                device_id: self.id.to_string(),
                reason: "port 0 is not valid".to_string(),
            });
        }
        if !self.profile().supports(self.transport) {
            return Err(VaultError::TransportNotSupported {
                vendor: self.variant.to_string(),
                transport: self.transport.to_string(),
            });
        }
        Ok(())
    }
}
