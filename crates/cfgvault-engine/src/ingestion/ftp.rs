//! Write-only FTP listener
//!
//! A small RFC 959 server covering what push-only devices use to drop a
//! file: login with the shared credential, walk or create
//! `group/source-id/`, open a data connection and `STOR`. Every command
//! passes the mask in [`super::permissions`] before it touches the
//! filesystem. Uploads land in a hidden `.part` file that is sealed as a
//! uniquely named `.ready` file only after the data connection closes
//! cleanly; the pipeline archives and removes it.

use super::permissions::{classify, CommandClass};
use super::IngestionEvent;
use crate::config::IngestionSection;
use crate::coordinator::shutdown_requested;
use cfgvault_core::model::ingestion::is_valid_source_id;
use cfgvault_core_types::Sensitive;
use chrono::Utc;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

const MAX_LINE: u64 = 1024;
const DATA_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const RECV_CHUNK: usize = 16 * 1024;

/// Listener limits and credentials
#[derive(Debug, Clone)]
pub struct FtpSettings {
    pub root: PathBuf,
    pub username: String,
    pub password: Sensitive<String>,
    pub max_connections: usize,
    pub max_per_source: usize,
    pub idle_timeout: Duration,
    pub passive_ports: (u16, u16),
    pub passive_address: Option<IpAddr>,
    pub max_upload_bytes: u64,
}

impl FtpSettings {
    pub fn from_config(section: &IngestionSection) -> Self {
        Self {
            root: section.root.clone(),
            username: section.username.clone(),
            password: section.password.clone(),
            max_connections: section.max_connections,
            max_per_source: section.max_per_source,
            idle_timeout: section.idle_timeout,
            passive_ports: (section.passive_ports.start, section.passive_ports.end),
            passive_address: section.passive_address,
            max_upload_bytes: section.max_upload_bytes,
        }
    }
}

// ----- connection caps -----

#[derive(Debug, Default)]
struct TrackerState {
    total: usize,
    per_source: HashMap<IpAddr, usize>,
}

#[derive(Debug)]
struct ConnectionTracker {
    state: Mutex<TrackerState>,
    max_total: usize,
    max_per_source: usize,
}

/// Held for the lifetime of one control connection
#[derive(Debug)]
struct ConnectionSlot {
    tracker: Arc<ConnectionTracker>,
    ip: IpAddr,
}

impl ConnectionTracker {
    fn new(max_total: usize, max_per_source: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TrackerState::default()),
            max_total,
            max_per_source,
        })
    }

    fn admit(self: &Arc<Self>, ip: IpAddr) -> Option<ConnectionSlot> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let from_source = state.per_source.get(&ip).copied().unwrap_or(0);
        if state.total >= self.max_total || from_source >= self.max_per_source {
            return None;
        }
        state.total += 1;
        *state.per_source.entry(ip).or_insert(0) += 1;
        Some(ConnectionSlot {
            tracker: Arc::clone(self),
            ip,
        })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        let mut state = self
            .tracker
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.total = state.total.saturating_sub(1);
        if let Some(count) = state.per_source.get_mut(&self.ip) {
            *count -= 1;
            if *count == 0 {
                state.per_source.remove(&self.ip);
            }
        }
    }
}

// ----- listener -----

struct Shared {
    settings: FtpSettings,
    events: mpsc::Sender<IngestionEvent>,
    next_passive: AtomicU16,
    shutdown: watch::Receiver<bool>,
}

pub struct FtpListener {
    listener: TcpListener,
    tracker: Arc<ConnectionTracker>,
    shared: Arc<Shared>,
}

impl FtpListener {
    /// # Errors
    ///
    /// Fails if the control port cannot be bound or the root created.
    pub async fn bind(
        addr: SocketAddr,
        settings: FtpSettings,
        events: mpsc::Sender<IngestionEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> io::Result<Self> {
        tokio::fs::create_dir_all(&settings.root).await?;
        let listener = TcpListener::bind(addr).await?;
        let tracker = ConnectionTracker::new(settings.max_connections, settings.max_per_source);
        Ok(Self {
            listener,
            tracker,
            shared: Arc::new(Shared {
                next_passive: AtomicU16::new(settings.passive_ports.0),
                settings,
                events,
                shutdown,
            }),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept control connections until shutdown
    pub async fn serve(self) {
        match self.listener.local_addr() {
            Ok(addr) => tracing::info!(%addr, root = %self.shared.settings.root.display(), "FTP ingestion listening"),
            Err(e) => tracing::warn!(error = %e, "FTP ingestion listening on unknown address"),
        }

        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                _ = shutdown_requested(self.shared.shutdown.clone()) => break,
            };
            let (stream, peer) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "FTP accept failed");
                    continue;
                }
            };

            match self.tracker.admit(peer.ip()) {
                Some(slot) => {
                    let shared = Arc::clone(&self.shared);
                    tokio::spawn(async move {
                        let _slot = slot;
                        match ControlSession::new(stream, peer, shared) {
                            Ok(session) => session.run().await,
                            Err(e) => tracing::warn!(%peer, error = %e, "FTP session setup failed"),
                        }
                    });
                }
                None => {
                    tracing::warn!(%peer, "FTP connection refused: too many connections");
                    tokio::spawn(refuse(stream));
                }
            }
        }
        tracing::info!("FTP ingestion stopped");
    }
}

async fn refuse(mut stream: TcpStream) {
    let _ = stream
        .write_all(b"421 Too many connections, try again later.\r\n")
        .await;
    let _ = stream.shutdown().await;
}

// ----- control line handling -----

const IAC: u8 = 255;

/// Drop Telnet commands from a control line (IP/DM before ABOR, option
/// negotiation)
fn strip_telnet(line: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(line.len());
    let mut bytes = line.iter().copied();
    while let Some(b) = bytes.next() {
        if b != IAC {
            out.push(b);
            continue;
        }
        match bytes.next() {
            Some(IAC) => out.push(IAC),
            // WILL WONT DO DONT carry an option byte
            Some(251..=254) => {
                bytes.next();
            }
            _ => {}
        }
    }
    out
}

/// One command line, or `None` at EOF
async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = Vec::new();
    let n = reader.take(MAX_LINE).read_until(b'\n', &mut raw).await?;
    if n == 0 {
        return Ok(None);
    }
    if raw.last() != Some(&b'\n') && n as u64 == MAX_LINE {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "command line too long"));
    }
    let line = String::from_utf8_lossy(&strip_telnet(&raw))
        .trim_end_matches(['\r', '\n'])
        .to_string();
    Ok(Some(line))
}

fn split_command(line: &str) -> (String, &str) {
    match line.split_once(' ') {
        Some((verb, arg)) => (verb.to_ascii_uppercase(), arg.trim()),
        None => (line.trim().to_ascii_uppercase(), ""),
    }
}

/// Normalise `arg` against `cwd` into an absolute virtual path
///
/// `..` never climbs above the root. Returns `None` for paths with
/// backslashes or NUL bytes.
fn resolve(cwd: &str, arg: &str) -> Option<String> {
    if arg.contains('\\') || arg.contains('\0') {
        return None;
    }
    let mut parts: Vec<&str> = if arg.starts_with('/') {
        Vec::new()
    } else {
        cwd.split('/').filter(|p| !p.is_empty()).collect()
    };
    for part in arg.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    Some(format!("/{}", parts.join("/")))
}

fn components(virtual_path: &str) -> Vec<&str> {
    virtual_path.split('/').filter(|p| !p.is_empty()).collect()
}

fn to_local(root: &Path, virtual_path: &str) -> PathBuf {
    components(virtual_path)
        .into_iter()
        .fold(root.to_path_buf(), |path, part| path.join(part))
}

fn parse_port_arg(arg: &str) -> Option<SocketAddr> {
    let nums: Vec<u8> = arg
        .split(',')
        .map(|p| p.trim().parse().ok())
        .collect::<Option<Vec<u8>>>()?;
    let [a, b, c, d, hi, lo] = nums.as_slice() else {
        return None;
    };
    let ip = IpAddr::from([*a, *b, *c, *d]);
    Some(SocketAddr::new(ip, u16::from(*hi) << 8 | u16::from(*lo)))
}

// ----- data connections -----

enum DataChannel {
    Passive(TcpListener),
    Active(SocketAddr),
}

#[derive(Debug, Error)]
enum TransferError {
    #[error("upload exceeded {0} bytes")]
    TooLarge(u64),
    #[error("data connection timed out")]
    Stalled,
    #[error("data connection failed: {0}")]
    Io(#[from] io::Error),
}

enum Interrupt {
    Abort,
    ControlLost,
}

enum Outcome {
    Complete(u64),
    Failed(TransferError),
    Interrupted(Interrupt),
}

async fn receive(
    mut data: TcpStream,
    file: &mut tokio::fs::File,
    limit: u64,
    idle: Duration,
) -> Result<u64, TransferError> {
    let mut buf = vec![0u8; RECV_CHUNK];
    let mut total = 0u64;
    loop {
        let n = tokio::time::timeout(idle, data.read(&mut buf))
            .await
            .map_err(|_| TransferError::Stalled)??;
        if n == 0 {
            break;
        }
        total += n as u64;
        if total > limit {
            return Err(TransferError::TooLarge(limit));
        }
        file.write_all(&buf[..n]).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(total)
}

/// Read the control channel while a transfer runs; only `ABOR` and
/// disconnects matter
async fn watch_control<R>(reader: &mut R) -> Interrupt
where
    R: AsyncBufRead + Unpin,
{
    loop {
        match read_line(reader).await {
            Ok(Some(line)) if split_command(&line).0 == "ABOR" => return Interrupt::Abort,
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => return Interrupt::ControlLost,
        }
    }
}

// ----- control session -----

struct ControlSession {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer: SocketAddr,
    local: SocketAddr,
    shared: Arc<Shared>,
    user: Option<String>,
    authenticated: bool,
    cwd: String,
    data: Option<DataChannel>,
}

enum Flow {
    Continue,
    Close,
}

impl ControlSession {
    fn new(stream: TcpStream, peer: SocketAddr, shared: Arc<Shared>) -> io::Result<Self> {
        let local = stream.local_addr()?;
        let (read, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer,
            peer,
            local,
            shared,
            user: None,
            authenticated: false,
            cwd: "/".to_string(),
            data: None,
        })
    }

    async fn reply(&mut self, code: u16, text: &str) -> io::Result<()> {
        self.writer
            .write_all(format!("{} {}\r\n", code, text).as_bytes())
            .await
    }

    async fn run(mut self) {
        tracing::debug!(peer = %self.peer, "FTP session opened");
        if let Err(e) = self.converse().await {
            tracing::debug!(peer = %self.peer, error = %e, "FTP session ended with error");
        }
        let _ = self.writer.shutdown().await;
        tracing::debug!(peer = %self.peer, "FTP session closed");
    }

    async fn converse(&mut self) -> io::Result<()> {
        self.reply(220, "cfgvault ingestion ready").await?;
        let idle = self.shared.settings.idle_timeout;
        loop {
            let next = tokio::select! {
                next = tokio::time::timeout(idle, read_line(&mut self.reader)) => next,
                _ = shutdown_requested(self.shared.shutdown.clone()) => {
                    return self.reply(421, "Service shutting down").await;
                }
            };
            let line = match next {
                Err(_) => return self.reply(421, "Idle timeout, closing control connection").await,
                Ok(Err(e)) if e.kind() == io::ErrorKind::InvalidData => {
                    return self.reply(500, "Command line too long").await;
                }
                Ok(Err(e)) => return Err(e),
                Ok(Ok(None)) => return Ok(()),
                Ok(Ok(Some(line))) => line,
            };
            if line.is_empty() {
                continue;
            }
            if let Flow::Close = self.dispatch(&line).await? {
                return Ok(());
            }
        }
    }

    async fn dispatch(&mut self, line: &str) -> io::Result<Flow> {
        let (verb, arg) = split_command(line);
        let class = classify(&verb);

        if !self.authenticated && class != CommandClass::Public {
            self.reply(530, "Please login with USER and PASS").await?;
            return Ok(Flow::Continue);
        }
        match class {
            CommandClass::Denied => {
                tracing::info!(peer = %self.peer, verb = %verb, "FTP command denied");
                self.reply(550, "Permission denied").await?;
                return Ok(Flow::Continue);
            }
            CommandClass::Unsupported => {
                self.reply(502, "Command not implemented").await?;
                return Ok(Flow::Continue);
            }
            CommandClass::Public | CommandClass::Allowed => {}
        }

        match verb.as_str() {
            "USER" => {
                self.user = Some(arg.to_string());
                self.authenticated = false;
                self.reply(331, "Password required").await?;
            }
            "PASS" => self.login(arg).await?,
            "QUIT" => {
                self.reply(221, "Goodbye").await?;
                return Ok(Flow::Close);
            }
            "NOOP" => self.reply(200, "OK").await?,
            "SYST" => self.reply(215, "UNIX Type: L8").await?,
            "FEAT" => {
                self.writer
                    .write_all(b"211-Features:\r\n EPSV\r\n PASV\r\n211 End\r\n")
                    .await?
            }
            "TYPE" => match arg.to_ascii_uppercase().as_str() {
                "A" | "A N" | "I" | "L 8" => self.reply(200, "Type set").await?,
                _ => self.reply(504, "Type not supported").await?,
            },
            "MODE" => match arg.to_ascii_uppercase().as_str() {
                "S" => self.reply(200, "Mode set to S").await?,
                _ => self.reply(504, "Only stream mode is supported").await?,
            },
            "STRU" => match arg.to_ascii_uppercase().as_str() {
                "F" => self.reply(200, "Structure set to F").await?,
                _ => self.reply(504, "Only file structure is supported").await?,
            },
            "PWD" => {
                let text = format!("\"{}\" is the current directory", self.cwd);
                self.reply(257, &text).await?;
            }
            "CWD" => self.change_dir(arg).await?,
            "CDUP" => self.change_dir("..").await?,
            "MKD" => self.make_dir(arg).await?,
            "PASV" => self.passive(false).await?,
            "EPSV" => self.passive(true).await?,
            "PORT" => self.active(arg).await?,
            "STOR" => return self.store(arg).await,
            "ABOR" => {
                self.data = None;
                self.reply(226, "No transfer to abort").await?;
            }
            _ => self.reply(502, "Command not implemented").await?,
        }
        Ok(Flow::Continue)
    }

    async fn login(&mut self, password: &str) -> io::Result<()> {
        let Some(user) = self.user.as_deref() else {
            return self.reply(503, "Login with USER first").await;
        };
        let settings = &self.shared.settings;
        if user == settings.username && settings.password.matches(password) {
            self.authenticated = true;
            tracing::info!(peer = %self.peer, "FTP login accepted");
            self.reply(230, "Login successful").await
        } else {
            self.user = None;
            tracing::warn!(peer = %self.peer, "FTP login rejected");
            self.reply(530, "Login incorrect").await
        }
    }

    async fn change_dir(&mut self, arg: &str) -> io::Result<()> {
        let Some(target) = resolve(&self.cwd, arg) else {
            return self.reply(550, "Invalid path").await;
        };
        let local = to_local(&self.shared.settings.root, &target);
        match tokio::fs::metadata(&local).await {
            Ok(meta) if meta.is_dir() => {
                self.cwd = target;
                self.reply(250, "Directory changed").await
            }
            _ => self.reply(550, "No such directory").await,
        }
    }

    /// Directories exist only at `group` and `group/source-id` depth
    async fn make_dir(&mut self, arg: &str) -> io::Result<()> {
        let Some(target) = resolve(&self.cwd, arg) else {
            return self.reply(550, "Invalid path").await;
        };
        let parts = components(&target);
        if parts.is_empty() || parts.len() > 2 || !parts.iter().all(|p| is_valid_source_id(p)) {
            return self.reply(550, "Directory not allowed here").await;
        }
        let local = to_local(&self.shared.settings.root, &target);
        let created = format!("\"{}\" created", target);
        match tokio::fs::create_dir(&local).await {
            Ok(()) => self.reply(257, &created).await,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => self.reply(257, &created).await,
            Err(e) => {
                tracing::warn!(path = %target, error = %e, "FTP MKD failed");
                self.reply(550, "Cannot create directory").await
            }
        }
    }

    async fn bind_passive(&self) -> Option<TcpListener> {
        let (start, end) = self.shared.settings.passive_ports;
        let span = u32::from(end - start) + 1;
        let first = self.shared.next_passive.fetch_add(1, Ordering::Relaxed);
        for i in 0..span {
            let offset = (u32::from(first.wrapping_sub(start)) + i) % span;
            let port = start + offset as u16;
            if let Ok(listener) = TcpListener::bind(SocketAddr::new(self.local.ip(), port)).await {
                return Some(listener);
            }
        }
        None
    }

    async fn passive(&mut self, extended: bool) -> io::Result<()> {
        let Some(listener) = self.bind_passive().await else {
            return self.reply(425, "No passive port available").await;
        };
        let port = listener.local_addr()?.port();
        self.data = Some(DataChannel::Passive(listener));

        if extended {
            let text = format!("Entering Extended Passive Mode (|||{}|)", port);
            return self.reply(229, &text).await;
        }
        let advertised = self.shared.settings.passive_address.unwrap_or(self.local.ip());
        match advertised {
            IpAddr::V4(ip) => {
                let [a, b, c, d] = ip.octets();
                let text = format!(
                    "Entering Passive Mode ({},{},{},{},{},{})",
                    a,
                    b,
                    c,
                    d,
                    port >> 8,
                    port & 0xff
                );
                self.reply(227, &text).await
            }
            IpAddr::V6(_) => {
                self.data = None;
                self.reply(425, "Use EPSV on IPv6").await
            }
        }
    }

    /// Active mode only ever connects back to the control peer
    async fn active(&mut self, arg: &str) -> io::Result<()> {
        match parse_port_arg(arg) {
            Some(addr) if addr.ip() == self.peer.ip() => {
                self.data = Some(DataChannel::Active(addr));
                self.reply(200, "PORT command successful").await
            }
            Some(_) => self.reply(500, "PORT must name the control connection's address").await,
            None => self.reply(501, "Invalid PORT argument").await,
        }
    }

    async fn open_data(&self, channel: DataChannel) -> io::Result<TcpStream> {
        let connect = async move {
            match channel {
                DataChannel::Passive(listener) => {
                    let (stream, from) = listener.accept().await?;
                    if from.ip() != self.peer.ip() {
                        return Err(io::Error::new(
                            io::ErrorKind::PermissionDenied,
                            "data connection from foreign address",
                        ));
                    }
                    Ok(stream)
                }
                DataChannel::Active(addr) => TcpStream::connect(addr).await,
            }
        };
        tokio::time::timeout(DATA_CONNECT_TIMEOUT, connect)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "data connection timed out"))?
    }

    async fn store(&mut self, arg: &str) -> io::Result<Flow> {
        let Some(target) = resolve(&self.cwd, arg) else {
            self.reply(553, "Invalid file name").await?;
            return Ok(Flow::Continue);
        };
        let parts = components(&target);
        let Some((file_name, _)) = parts.split_last() else {
            self.reply(553, "Invalid file name").await?;
            return Ok(Flow::Continue);
        };
        let relative = parts.join("/");
        let local = to_local(&self.shared.settings.root, &target);
        let Some(dir) = local.parent().map(Path::to_path_buf) else {
            self.reply(553, "Invalid file name").await?;
            return Ok(Flow::Continue);
        };
        if !tokio::fs::metadata(&dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            self.reply(553, "No such directory").await?;
            return Ok(Flow::Continue);
        }
        let Some(channel) = self.data.take() else {
            self.reply(425, "Use PORT, PASV or EPSV first").await?;
            return Ok(Flow::Continue);
        };

        let temp_path = dir.join(staging_name(file_name, "part"));
        let mut file = match tokio::fs::File::create(&temp_path).await {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(path = %relative, error = %e, "FTP cannot create upload file");
                self.reply(553, "Cannot create file").await?;
                return Ok(Flow::Continue);
            }
        };

        self.reply(150, "Ok to send data").await?;
        let data = match self.open_data(channel).await {
            Ok(stream) => stream,
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(&temp_path).await;
                tracing::warn!(path = %relative, error = %e, "FTP data connection failed");
                self.reply(425, "Cannot open data connection").await?;
                return Ok(Flow::Continue);
            }
        };

        let settings = &self.shared.settings;
        let outcome = {
            let transfer = receive(data, &mut file, settings.max_upload_bytes, settings.idle_timeout);
            let control = watch_control(&mut self.reader);
            tokio::pin!(transfer, control);
            tokio::select! {
                done = &mut transfer => match done {
                    Ok(bytes) => Outcome::Complete(bytes),
                    Err(e) => Outcome::Failed(e),
                },
                interrupt = &mut control => Outcome::Interrupted(interrupt),
            }
        };
        drop(file);
        let received_at = Utc::now();

        let (detail, flow) = match outcome {
            Outcome::Complete(bytes) => {
                return self
                    .finish_upload(&temp_path, relative, bytes, received_at)
                    .await;
            }
            Outcome::Failed(TransferError::TooLarge(limit)) => {
                self.reply(552, "Exceeded storage allocation").await?;
                (format!("upload exceeded {} bytes", limit), Flow::Continue)
            }
            Outcome::Failed(e) => {
                self.reply(426, "Connection closed; transfer aborted").await?;
                (e.to_string(), Flow::Continue)
            }
            Outcome::Interrupted(Interrupt::Abort) => {
                self.reply(426, "Transfer aborted").await?;
                self.reply(226, "ABOR successful").await?;
                ("aborted by client".to_string(), Flow::Continue)
            }
            Outcome::Interrupted(Interrupt::ControlLost) => {
                ("control connection lost".to_string(), Flow::Close)
            }
        };
        let _ = tokio::fs::remove_file(&temp_path).await;
        tracing::warn!(peer = %self.peer, path = %relative, detail = %detail, "FTP upload incomplete");
        self.emit(IngestionEvent::Incomplete {
            relative,
            local_path: temp_path,
            received_at,
            detail,
        })
        .await;
        Ok(flow)
    }

    /// Seal a finished upload under its own name and hand it to the pipeline
    ///
    /// Each upload keeps a distinct staged file until the pipeline archives
    /// it, so a later upload to the same name cannot replace it.
    async fn finish_upload(
        &mut self,
        temp_path: &Path,
        relative: String,
        bytes: u64,
        received_at: chrono::DateTime<Utc>,
    ) -> io::Result<Flow> {
        let ready_path = temp_path.with_extension("ready");
        if let Err(e) = tokio::fs::rename(temp_path, &ready_path).await {
            let _ = tokio::fs::remove_file(temp_path).await;
            tracing::error!(path = %relative, error = %e, "FTP cannot move upload into place");
            self.reply(451, "Local error while storing file").await?;
            return Ok(Flow::Continue);
        }
        tracing::info!(peer = %self.peer, path = %relative, bytes, "FTP upload complete");
        self.reply(226, "Transfer complete").await?;
        self.emit(IngestionEvent::FileReceived {
            relative,
            local_path: ready_path,
            received_at,
        })
        .await;
        Ok(Flow::Continue)
    }

    async fn emit(&self, event: IngestionEvent) {
        if self.shared.events.send(event).await.is_err() {
            tracing::error!("Ingestion pipeline gone; upload event dropped");
        }
    }
}

/// Hidden per-upload file name next to the target, e.g. `.startrun.dat.<id>.part`
fn staging_name(file_name: &str, suffix: &str) -> String {
    format!(".{}.{}.{}", file_name, uuid::Uuid::new_v4().simple(), suffix)
}

/// Uploaded file name of a sealed `.ready` staging file
fn staged_file_name(staged: &str) -> Option<&str> {
    let (name, id) = staged
        .strip_prefix('.')?
        .strip_suffix(".ready")?
        .rsplit_once('.')?;
    let is_id = id.len() == 32 && id.bytes().all(|b| b.is_ascii_hexdigit());
    (is_id && !name.is_empty()).then_some(name)
}

/// Sealed uploads left under `root/group/source-id/` by an earlier process
///
/// They were acknowledged with 226 but not archived; replaying them through
/// the pipeline keeps one snapshot per accepted upload.
pub fn staged_uploads(root: &Path) -> Vec<IngestionEvent> {
    fn entries(dir: &Path) -> Vec<std::fs::DirEntry> {
        std::fs::read_dir(dir)
            .map(|it| it.filter_map(|e| e.ok()).collect())
            .unwrap_or_default()
    }

    let mut events = Vec::new();
    for group in entries(root).into_iter().filter(|e| e.path().is_dir()) {
        for source in entries(&group.path()).into_iter().filter(|e| e.path().is_dir()) {
            for file in entries(&source.path()) {
                let staged = file.file_name().to_string_lossy().into_owned();
                let Some(name) = staged_file_name(&staged) else {
                    continue;
                };
                let relative = format!(
                    "{}/{}/{}",
                    group.file_name().to_string_lossy(),
                    source.file_name().to_string_lossy(),
                    name
                );
                let received_at = file
                    .metadata()
                    .and_then(|m| m.modified())
                    .map(chrono::DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                events.push(IngestionEvent::FileReceived {
                    relative,
                    local_path: file.path(),
                    received_at,
                });
            }
        }
    }
    events.sort_by_key(|event| match event {
        IngestionEvent::FileReceived { received_at, .. }
        | IngestionEvent::Incomplete { received_at, .. } => *received_at,
    });
    events
}
