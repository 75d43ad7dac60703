//! Engine configuration
//!
//! Loaded from an optional TOML file and `CFGVAULT__SECTION__KEY` environment
//! overrides, then validated once. Durations use humantime strings
//! (`30s`, `2m`, `1h30m`).

use crate::credentials::FileCredentialStore;
use crate::secrets::MasterKey;
use cfgvault_core::logging_facility::Profile;
use cfgvault_core::model::ingestion::is_valid_source_id;
use cfgvault_core_types::Sensitive;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const ENV_PREFIX: &str = "CFGVAULT";
pub const ENV_SEPARATOR: &str = "__";

/// Smallest accepted scheduler tick
pub const MIN_POLL_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for cfgvault_core::CvError {
    fn from(err: ConfigError) -> Self {
        cfgvault_core::CvError::new(cfgvault_core::CvErrorKind::Config)
            .with_op("load_config")
            .with_message(err.to_string())
    }
}

fn default_poll_tick() -> Duration {
    Duration::from_secs(60)
}

fn default_max_concurrent_jobs() -> usize {
    8
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_collect_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_max_output_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(30)
}

/// Scheduler and coordinator limits
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_poll_tick", with = "humantime_serde")]
    pub poll_tick_interval: Duration,

    /// Worker pool size
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    #[serde(default = "default_collect_timeout", with = "humantime_serde")]
    pub per_device_collect_timeout: Duration,

    /// Ceiling on one command's output; larger output fails the collect
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// How long shutdown waits for in-flight jobs
    #[serde(default = "default_shutdown_grace", with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            poll_tick_interval: default_poll_tick(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            connect_timeout: default_connect_timeout(),
            per_device_collect_timeout: default_collect_timeout(),
            max_output_bytes: default_max_output_bytes(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data")
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    /// Holds `index.db` and `objects/`
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,

    /// Database holding the `devices` table; defaults to the index database
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            catalog_path: None,
        }
    }
}

/// Inclusive port range for passive data connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 50000,
            end: 50100,
        }
    }
}

fn default_ftp_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_ftp_port() -> u16 {
    21
}

fn default_ftp_root() -> PathBuf {
    PathBuf::from("ftp-root")
}

fn default_source_group() -> String {
    "zte".to_string()
}

fn default_expected_file_name() -> String {
    "startrun.dat".to_string()
}

fn default_ftp_username() -> String {
    "cfgvault".to_string()
}

fn default_max_connections() -> usize {
    16
}

fn default_max_per_source() -> usize {
    2
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_max_upload_bytes() -> u64 {
    64 * 1024 * 1024
}

/// Write-only FTP listener for push-only devices
#[derive(Debug, Clone, Deserialize)]
pub struct IngestionSection {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_ftp_bind")]
    pub bind: String,

    #[serde(default = "default_ftp_port")]
    pub port: u16,

    /// Drop directory; uploads land in `root/<group>/<source-id>/`
    #[serde(default = "default_ftp_root")]
    pub root: PathBuf,

    #[serde(default = "default_source_group")]
    pub source_group: String,

    #[serde(default = "default_expected_file_name")]
    pub expected_file_name: String,

    #[serde(default = "default_ftp_username")]
    pub username: String,

    /// Single credential shared by every push-only device
    #[serde(default)]
    pub password: Sensitive<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Simultaneous sessions allowed from one remote address
    #[serde(default = "default_max_per_source")]
    pub max_per_source: usize,

    #[serde(default = "default_idle_timeout", with = "humantime_serde")]
    pub idle_timeout: Duration,

    #[serde(default)]
    pub passive_ports: PortRange,

    /// Address advertised in PASV replies; defaults to the control socket's
    #[serde(default)]
    pub passive_address: Option<IpAddr>,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

impl Default for IngestionSection {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_ftp_bind(),
            port: default_ftp_port(),
            root: default_ftp_root(),
            source_group: default_source_group(),
            expected_file_name: default_expected_file_name(),
            username: default_ftp_username(),
            password: Sensitive::default(),
            max_connections: default_max_connections(),
            max_per_source: default_max_per_source(),
            idle_timeout: default_idle_timeout(),
            passive_ports: PortRange::default(),
            passive_address: None,
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl IngestionSection {
    /// Control listener address
    ///
    /// # Errors
    ///
    /// `Invalid` unless `bind` is an IP address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.bind.parse().map_err(|_| {
            ConfigError::Invalid(format!("ingestion.bind '{}' is not an IP address", self.bind))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

fn default_credentials_file() -> PathBuf {
    PathBuf::from("credentials.toml")
}

fn default_master_key_env() -> String {
    crate::secrets::DEFAULT_MASTER_KEY_ENV.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsSection {
    #[serde(default = "default_credentials_file")]
    pub file: PathBuf,
    /// Environment variable holding the key for sealed secrets
    #[serde(default = "default_master_key_env")]
    pub master_key_env: String,
}

impl Default for CredentialsSection {
    fn default() -> Self {
        Self {
            file: default_credentials_file(),
            master_key_env: default_master_key_env(),
        }
    }
}

impl CredentialsSection {
    /// The master key from the configured variable, if it is set
    ///
    /// # Errors
    ///
    /// `Invalid` when the variable is set but unusable.
    pub fn master_key(&self) -> Result<Option<MasterKey>, ConfigError> {
        MasterKey::from_env(&self.master_key_env)
            .map_err(|e| ConfigError::Invalid(format!("{}: {}", self.master_key_env, e)))
    }

    /// Load the credentials file, opening sealed secrets
    ///
    /// # Errors
    ///
    /// See [`FileCredentialStore::load`] and [`Self::master_key`].
    pub fn load(&self) -> Result<FileCredentialStore, ConfigError> {
        let key = self.master_key()?;
        FileCredentialStore::load(&self.file, key.as_ref())
    }
}

fn default_log_profile() -> String {
    "production".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    /// `development`, `production` or `test`
    #[serde(default = "default_log_profile")]
    pub profile: String,

    /// `EnvFilter` directive; `RUST_LOG` still wins
    #[serde(default)]
    pub filter: Option<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            profile: default_log_profile(),
            filter: None,
        }
    }
}

impl LoggingSection {
    /// # Errors
    ///
    /// `Invalid` for an unknown profile name.
    pub fn parsed_profile(&self) -> Result<Profile, ConfigError> {
        self.profile.parse().map_err(ConfigError::Invalid)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub ingestion: IngestionSection,
    #[serde(default)]
    pub credentials: CredentialsSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl EngineConfig {
    /// Load from `path` (if given) layered under environment overrides
    ///
    /// # Errors
    ///
    /// `Load` when the file or an override cannot be parsed, `Invalid` when a
    /// value is out of range.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        Self::finish(builder)
    }

    /// Same as [`EngineConfig::load`] with the file content given inline
    ///
    /// # Errors
    ///
    /// See [`EngineConfig::load`].
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::from_str(content, config::FileFormat::Toml));
        Self::finish(builder)
    }

    fn finish(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?;
        let cfg: EngineConfig = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Path of the database holding the `devices` table
    pub fn catalog_path(&self) -> PathBuf {
        self.storage
            .catalog_path
            .clone()
            .unwrap_or_else(|| self.storage.root.join(cfgvault_store::store::INDEX_FILE))
    }

    /// # Errors
    ///
    /// `Invalid` naming the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        let engine = &self.engine;

        if engine.max_concurrent_jobs == 0 {
            return invalid("engine.max_concurrent_jobs must be at least 1".into());
        }
        if engine.poll_tick_interval < MIN_POLL_TICK {
            return invalid(format!(
                "engine.poll_tick_interval must be at least {}",
                humantime::format_duration(MIN_POLL_TICK)
            ));
        }
        if engine.connect_timeout.is_zero() || engine.per_device_collect_timeout.is_zero() {
            return invalid("engine timeouts must be non-zero".into());
        }
        if engine.max_output_bytes == 0 {
            return invalid("engine.max_output_bytes must be non-zero".into());
        }
        if self.storage.root.as_os_str().is_empty() {
            return invalid("storage.root must be set".into());
        }

        self.logging.parsed_profile()?;

        let ingestion = &self.ingestion;
        if !ingestion.enabled {
            return Ok(());
        }
        ingestion.bind_addr()?;
        if ingestion.username.trim().is_empty() {
            return invalid("ingestion.username must be set".into());
        }
        if ingestion.password.is_empty() {
            return invalid("ingestion.password must be set when ingestion is enabled".into());
        }
        if ingestion.max_connections == 0 || ingestion.max_per_source == 0 {
            return invalid("ingestion connection limits must be at least 1".into());
        }
        if ingestion.max_per_source > ingestion.max_connections {
            return invalid("ingestion.max_per_source exceeds ingestion.max_connections".into());
        }
        let ports = ingestion.passive_ports;
        if ports.start == 0 || ports.start > ports.end {
            return invalid(format!(
                "ingestion.passive_ports {}-{} is not a valid range",
                ports.start, ports.end
            ));
        }
        if !is_valid_source_id(&ingestion.source_group) {
            return invalid(format!(
                "ingestion.source_group '{}' is not a valid directory name",
                ingestion.source_group
            ));
        }
        if !is_valid_source_id(&ingestion.expected_file_name) {
            return invalid(format!(
                "ingestion.expected_file_name '{}' is not a valid file name",
                ingestion.expected_file_name
            ));
        }
        if ingestion.idle_timeout.is_zero() || ingestion.max_upload_bytes == 0 {
            return invalid("ingestion idle timeout and upload limit must be non-zero".into());
        }
        Ok(())
    }
}
