//! Telnet transport
//!
//! Minimal client side of RFC 854: every option the server asks us to enable
//! is refused, and of the options the server offers only ECHO and
//! SUPPRESS-GO-AHEAD are accepted. Subnegotiations are skipped.

use super::{AdapterError, CliStream};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

const OPT_ECHO: u8 = 1;
const OPT_SGA: u8 = 3;

const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Data,
    Iac,
    Negotiate(u8),
    Sub,
    SubIac,
}

/// Splits a byte stream into data and negotiation replies
#[derive(Debug)]
struct Negotiator {
    state: ParseState,
}

impl Negotiator {
    fn new() -> Self {
        Self {
            state: ParseState::Data,
        }
    }

    /// Returns (data bytes, replies to send)
    fn feed(&mut self, input: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut data = Vec::with_capacity(input.len());
        let mut replies = Vec::new();

        for &byte in input {
            self.state = match (self.state, byte) {
                (ParseState::Data, IAC) => ParseState::Iac,
                (ParseState::Data, b) => {
                    data.push(b);
                    ParseState::Data
                }
                (ParseState::Iac, IAC) => {
                    data.push(IAC);
                    ParseState::Data
                }
                (ParseState::Iac, cmd @ (DO | DONT | WILL | WONT)) => ParseState::Negotiate(cmd),
                (ParseState::Iac, SB) => ParseState::Sub,
                (ParseState::Iac, _) => ParseState::Data,
                (ParseState::Negotiate(cmd), option) => {
                    match cmd {
                        DO => replies.extend_from_slice(&[IAC, WONT, option]),
                        WILL if option == OPT_ECHO || option == OPT_SGA => {
                            replies.extend_from_slice(&[IAC, DO, option])
                        }
                        WILL => replies.extend_from_slice(&[IAC, DONT, option]),
                        _ => {}
                    }
                    ParseState::Data
                }
                (ParseState::Sub, IAC) => ParseState::SubIac,
                (ParseState::Sub, _) => ParseState::Sub,
                (ParseState::SubIac, SE) => ParseState::Data,
                (ParseState::SubIac, _) => ParseState::Sub,
            };
        }
        (data, replies)
    }
}

/// Telnet over any async byte stream
pub struct TelnetStream<T> {
    io: T,
    negotiator: Negotiator,
}

impl<T> TelnetStream<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(io: T) -> Self {
        Self {
            io,
            negotiator: Negotiator::new(),
        }
    }
}

/// Double any IAC in outgoing data
fn escape(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    for &b in bytes {
        out.push(b);
        if b == IAC {
            out.push(IAC);
        }
    }
    out
}

#[async_trait]
impl<T> CliStream for TelnetStream<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, bytes: &[u8]) -> Result<(), AdapterError> {
        self.io.write_all(&escape(bytes)).await?;
        self.io.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>, AdapterError> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let n = self.io.read(&mut buf).await?;
            if n == 0 {
                return Ok(None);
            }
            let (data, replies) = self.negotiator.feed(&buf[..n]);
            if !replies.is_empty() {
                self.io.write_all(&replies).await?;
                self.io.flush().await?;
            }
            if !data.is_empty() {
                return Ok(Some(data));
            }
        }
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.io.shutdown().await {
            tracing::debug!(error = %e, "Telnet shutdown failed");
        }
    }

    fn newline(&self) -> &'static [u8] {
        b"\r\n"
    }
}
