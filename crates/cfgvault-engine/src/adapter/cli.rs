//! Transport-independent CLI conversation
//!
//! SSH channels and Telnet streams both reduce to a byte pipe. The
//! conversation reads until one of a set of patterns shows up at the end of
//! the buffer, answering pager prompts on the way.

use super::prompt::PromptSet;
use super::{AdapterError, Session};
use crate::credentials::Credential;
use async_trait::async_trait;
use cfgvault_core::{Device, PrivilegeMode, RawConfig, VendorProfile};
use cfgvault_core_types::{DeviceId, Sensitive};
use regex::bytes::Regex;

/// Byte pipe to a device shell
#[async_trait]
pub trait CliStream: Send {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), AdapterError>;

    /// Next chunk of device output; `None` once the device hung up
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, AdapterError>;

    async fn shutdown(&mut self);

    /// Line terminator the device expects after a command
    fn newline(&self) -> &'static [u8] {
        b"\n"
    }
}

struct Conversation<S> {
    stream: S,
    buffer: Vec<u8>,
    max_bytes: usize,
    prompts: PromptSet,
}

impl<S: CliStream> Conversation<S> {
    async fn send_line(&mut self, line: &str) -> Result<(), AdapterError> {
        let mut bytes = line.as_bytes().to_vec();
        bytes.extend_from_slice(self.stream.newline());
        self.stream.send(&bytes).await
    }

    async fn send_secret(&mut self, secret: &Sensitive<String>) -> Result<(), AdapterError> {
        self.send_line(secret.expose()).await
    }

    /// Read until one of `patterns` matches at the end of the buffer
    ///
    /// Returns the index of the matching pattern and everything read. Pager
    /// prompts are cut out of the buffer and answered with a space.
    async fn expect(&mut self, patterns: &[&Regex]) -> Result<(usize, Vec<u8>), AdapterError> {
        loop {
            if let Some(start) = self.prompts.pager_at_end(&self.buffer) {
                self.buffer.truncate(start);
                while self.buffer.last().is_some_and(|b| *b == b' ' || *b == b'\t') {
                    self.buffer.pop();
                }
                self.stream.send(b" ").await?;
            } else if let Some(idx) = self.prompts.match_at_end(&self.buffer, patterns) {
                return Ok((idx, std::mem::take(&mut self.buffer)));
            }

            if self.buffer.len() > self.max_bytes {
                return Err(AdapterError::OutputTooLarge {
                    limit: self.max_bytes,
                });
            }

            match self.stream.recv().await? {
                Some(chunk) => self.buffer.extend_from_slice(&chunk),
                None => return Err(AdapterError::Closed),
            }
        }
    }
}

/// An authenticated CLI session on one device
pub struct CliSession<S> {
    device_id: DeviceId,
    profile: &'static VendorProfile,
    conversation: Conversation<S>,
}

impl<S: CliStream> CliSession<S> {
    /// Wait for the first prompt of an already authenticated shell, then
    /// raise privilege if the variant needs it
    ///
    /// # Errors
    ///
    /// `Closed` or `Io` if the device hangs up, `Auth` if `enable` is refused.
    pub async fn establish(
        stream: S,
        device: &Device,
        credential: &Credential,
        max_output_bytes: usize,
    ) -> Result<Self, AdapterError> {
        let mut session = Self::new(stream, device, max_output_bytes)?;
        let prompt = session.conversation.prompts.prompt.clone();
        let (_, banner) = session.conversation.expect(&[&prompt]).await?;
        session.raise_privilege(&banner, credential).await?;
        Ok(session)
    }

    /// Drive an interactive `Username:`/`Password:` login first (Telnet)
    ///
    /// # Errors
    ///
    /// `Auth` on a failure banner or a repeated login prompt.
    pub async fn login_and_establish(
        stream: S,
        device: &Device,
        credential: &Credential,
        max_output_bytes: usize,
    ) -> Result<Self, AdapterError> {
        let mut session = Self::new(stream, device, max_output_bytes)?;
        let prompts = session.conversation.prompts.clone();

        let mut sent_username = false;
        let mut sent_password = false;
        let banner = loop {
            let (idx, seen) = session
                .conversation
                .expect(&[&prompts.username, &prompts.password, &prompts.prompt])
                .await?;
            if prompts.login_failed(&seen) {
                return Err(AdapterError::Auth);
            }
            match idx {
                0 => {
                    if sent_username {
                        return Err(AdapterError::Auth);
                    }
                    session.conversation.send_line(&credential.username).await?;
                    sent_username = true;
                }
                1 => {
                    if sent_password {
                        return Err(AdapterError::Auth);
                    }
                    session.conversation.send_secret(&credential.password).await?;
                    sent_password = true;
                }
                _ => break seen,
            }
        };

        session.raise_privilege(&banner, credential).await?;
        Ok(session)
    }

    fn new(stream: S, device: &Device, max_output_bytes: usize) -> Result<Self, AdapterError> {
        let profile = device.profile();
        Ok(Self {
            device_id: device.id.clone(),
            profile,
            conversation: Conversation {
                stream,
                buffer: Vec::new(),
                max_bytes: max_output_bytes,
                prompts: PromptSet::for_profile(profile)?,
            },
        })
    }

    async fn raise_privilege(
        &mut self,
        prompt_seen: &[u8],
        credential: &Credential,
    ) -> Result<(), AdapterError> {
        if self.profile.privilege != PrivilegeMode::EnableWhenUnprivileged {
            return Ok(());
        }
        let prompts = self.conversation.prompts.clone();
        if !prompts.is_unprivileged(prompt_seen) {
            return Ok(());
        }
        let Some(secret) = credential.enable_secret.as_ref() else {
            tracing::debug!(device_id = %self.device_id, "No enable secret; staying unprivileged");
            return Ok(());
        };

        self.conversation.send_line("enable").await?;
        let (mut idx, mut seen) = self
            .conversation
            .expect(&[&prompts.password, &prompts.prompt])
            .await?;
        if idx == 0 {
            self.conversation.send_secret(secret).await?;
            (idx, seen) = self
                .conversation
                .expect(&[&prompts.password, &prompts.prompt])
                .await?;
        }
        if idx == 0 || prompts.is_unprivileged(&seen) {
            return Err(AdapterError::Auth);
        }
        tracing::debug!(device_id = %self.device_id, "Entered privileged mode");
        Ok(())
    }
}

#[async_trait]
impl<S: CliStream> Session for CliSession<S> {
    async fn collect(&mut self) -> Result<RawConfig, AdapterError> {
        let command = self.profile.command;
        self.conversation.send_line(command).await?;

        let prompt = self.conversation.prompts.prompt.clone();
        let (_, raw) = self.conversation.expect(&[&prompt]).await?;
        let prompts = &self.conversation.prompts;
        let output = prompts.clean_output(&raw, command);

        if let Some(line) = prompts.command_error(&output) {
            return Err(AdapterError::CommandRejected(line));
        }
        if output.iter().all(u8::is_ascii_whitespace) {
            return Err(AdapterError::UnexpectedOutput("empty output".to_string()));
        }

        tracing::debug!(
            device_id = %self.device_id,
            bytes = output.len(),
            "Collected configuration"
        );
        Ok(RawConfig::new(output))
    }

    async fn close(self: Box<Self>) {
        let mut this = self;
        this.conversation.stream.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfgvault_core::VendorVariant;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replays scripted device output and records what was sent
    struct ScriptedStream {
        replies: VecDeque<Vec<u8>>,
        sent: Arc<Mutex<Vec<u8>>>,
    }

    impl ScriptedStream {
        fn new(replies: &[&[u8]]) -> (Self, Arc<Mutex<Vec<u8>>>) {
            let sent = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    replies: replies.iter().map(|r| r.to_vec()).collect(),
                    sent: sent.clone(),
                },
                sent,
            )
        }
    }

    #[async_trait]
    impl CliStream for ScriptedStream {
        async fn send(&mut self, bytes: &[u8]) -> Result<(), AdapterError> {
            self.sent.lock().unwrap().extend_from_slice(bytes);
            Ok(())
        }

        async fn recv(&mut self) -> Result<Option<Vec<u8>>, AdapterError> {
            Ok(self.replies.pop_front())
        }

        async fn shutdown(&mut self) {}
    }

    fn sent_text(sent: &Arc<Mutex<Vec<u8>>>) -> String {
        String::from_utf8_lossy(&sent.lock().unwrap()).to_string()
    }

    #[tokio::test]
    async fn test_collect_with_pager_and_enable() {
        // Given: a Cisco shell that starts unprivileged and pages its output
        let device = Device::new("sw-1", VendorVariant::Cisco, "192.0.2.1", "lab");
        let credential = Credential::new("backup", "pw").with_enable_secret("en");
        let (stream, sent) = ScriptedStream::new(&[
            b"\r\nsw-1>",
            b"enable\r\nPassword: ",
            b"\r\nsw-1#",
            b"show running-config\r\nhostname sw-1\r\n --More-- ",
            b"\x08\x08\x08\x08\x08\x08\x08\x08\x08\x08         \x08\x08\x08\x08\x08\x08\x08\x08\x08\x08interface Gi0/1\r\nend\r\nsw-1#",
        ]);

        // When: the session is established and collected
        let mut session = CliSession::establish(stream, &device, &credential, 4096)
            .await
            .unwrap();
        let config = session.collect().await.unwrap();

        // Then: enable was used, the pager answered and the output cleaned
        assert_eq!(config.to_text(), "hostname sw-1\ninterface Gi0/1\nend\n");
        let sent = sent_text(&sent);
        assert!(sent.starts_with("enable\nen\nshow running-config\n"));
        assert!(sent.ends_with(' '));
    }

    #[tokio::test]
    async fn test_output_ceiling_fails_collect() {
        let device = Device::new("rtr-1", VendorVariant::Huawei, "192.0.2.1", "lab");
        let credential = Credential::new("backup", "pw");
        let big = vec![b'x'; 200];
        let (stream, _) = ScriptedStream::new(&[b"\r\n<rtr-1>", &big, &big]);

        let mut session = CliSession::establish(stream, &device, &credential, 256)
            .await
            .unwrap();
        let err = session.collect().await.unwrap_err();
        assert!(matches!(err, AdapterError::OutputTooLarge { limit: 256 }));
    }

    #[tokio::test]
    async fn test_device_error_line_is_a_command_failure() {
        let device = Device::new("sw-2", VendorVariant::GenericSaved, "192.0.2.1", "lab");
        let credential = Credential::new("backup", "pw");
        let (stream, _) = ScriptedStream::new(&[
            b"\r\nsw-2#",
            b"show saved-config\r\n          ^\r\n% Invalid input detected at '^' marker.\r\n\r\nsw-2#",
        ]);

        let mut session = CliSession::establish(stream, &device, &credential, 4096)
            .await
            .unwrap();
        let err = session.collect().await.unwrap_err();
        assert!(matches!(err, AdapterError::CommandRejected(_)));
    }

    #[tokio::test]
    async fn test_empty_output_is_unexpected() {
        let device = Device::new("mt-1", VendorVariant::Mikrotik, "192.0.2.1", "lab");
        let credential = Credential::new("admin", "pw");
        let (stream, _) = ScriptedStream::new(&[
            b"\r\n[admin@mt-1] > ",
            b"/export\r\n\r\n[admin@mt-1] > ",
        ]);

        let mut session = CliSession::establish(stream, &device, &credential, 4096)
            .await
            .unwrap();
        let err = session.collect().await.unwrap_err();
        assert!(matches!(err, AdapterError::UnexpectedOutput(_)));
    }

    #[tokio::test]
    async fn test_hangup_before_prompt_is_closed() {
        let device = Device::new("sw-3", VendorVariant::Cisco, "192.0.2.1", "lab");
        let credential = Credential::new("backup", "pw");
        let (stream, _) = ScriptedStream::new(&[b"Welcome\r\n"]);

        let err = CliSession::establish(stream, &device, &credential, 4096)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AdapterError::Closed));
    }

    #[tokio::test]
    async fn test_interactive_login_failure_is_auth() {
        let device = Device::new("sw-4", VendorVariant::Cisco, "192.0.2.1", "lab")
            .with_transport(cfgvault_core::Transport::Telnet);
        let credential = Credential::new("backup", "wrong");
        let (stream, _) = ScriptedStream::new(&[
            b"\r\nUsername: ",
            b"backup\r\nPassword: ",
            b"\r\n% Login invalid\r\n\r\nUsername: ",
        ]);

        let err = CliSession::login_and_establish(stream, &device, &credential, 4096)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AdapterError::Auth));
    }
}
