//! SSH transport (password authentication, interactive shell)

use super::{AdapterError, AdapterSettings, CliStream};
use crate::credentials::Credential;
use async_trait::async_trait;
use cfgvault_core::Device;
use cfgvault_core_types::DeviceId;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use std::sync::Arc;

const PTY_COLUMNS: u32 = 511;
const PTY_ROWS: u32 = 24;

/// Accepts whatever host key the device presents and logs its fingerprint
pub struct LoggingHostKeyPolicy {
    device_id: DeviceId,
}

#[async_trait]
impl client::Handler for LoggingHostKeyPolicy {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::info!(
            device_id = %self.device_id,
            fingerprint = %server_public_key.fingerprint(),
            "Accepted SSH host key"
        );
        Ok(true)
    }
}

/// Shell channel on an authenticated SSH connection
pub struct SshStream {
    handle: Handle<LoggingHostKeyPolicy>,
    channel: Channel<Msg>,
}

/// Connect, authenticate with the password and open an interactive shell
///
/// # Errors
///
/// `Ssh` for transport failures, `Auth` if the password is rejected.
pub async fn connect(
    device: &Device,
    credential: &Credential,
    settings: AdapterSettings,
) -> Result<SshStream, AdapterError> {
    let config = Arc::new(client::Config {
        inactivity_timeout: Some(settings.inactivity_timeout),
        ..Default::default()
    });
    let policy = LoggingHostKeyPolicy {
        device_id: device.id.clone(),
    };

    let mut handle =
        client::connect(config, (device.address.as_str(), device.port()), policy).await?;

    let accepted = handle
        .authenticate_password(credential.username.clone(), credential.password.expose().clone())
        .await?;
    if !accepted {
        return Err(AdapterError::Auth);
    }

    let mut channel = handle.channel_open_session().await?;
    channel
        .request_pty(false, "vt100", PTY_COLUMNS, PTY_ROWS, 0, 0, &[])
        .await?;
    channel.request_shell(false).await?;

    Ok(SshStream { handle, channel })
}

#[async_trait]
impl CliStream for SshStream {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), AdapterError> {
        self.channel.data(bytes).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>, AdapterError> {
        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Data { data }) => return Ok(Some(data.to_vec())),
                Some(ChannelMsg::ExtendedData { data, .. }) => return Ok(Some(data.to_vec())),
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => return Ok(None),
                Some(_) => continue,
            }
        }
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.channel.eof().await {
            tracing::debug!(error = %e, "SSH channel EOF failed");
        }
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            tracing::debug!(error = %e, "SSH disconnect failed");
        }
    }
}
