use thiserror::Error;

/// Result type alias using VaultError
pub type Result<T> = std::result::Result<T, VaultError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Every failure that crosses a component boundary is classified into one of
/// these kinds. Each kind maps to a stable code that job records, audit
/// events and tests rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CvErrorKind {
    // Collection
    /// Transport could not be established or authentication was refused
    Connect,
    /// Session established but configuration retrieval failed
    Collect,
    /// A collection for the same device is already running
    AlreadyRunning,

    // Storage
    /// Stored object missing or its checksum does not match the index
    Integrity,
    NotFound,

    // Structural/Validation
    Validation,
    InvalidInput,
    IllegalTransition,

    // Integration/IO
    Io,
    Serialization,
    Persistence,
    Config,
    Timeout,
    Concurrency,
    Cancelled,

    // Internal
    Internal,
}

impl CvErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            CvErrorKind::Connect => "ERR_CONNECT",
            CvErrorKind::Collect => "ERR_COLLECT",
            CvErrorKind::AlreadyRunning => "ERR_ALREADY_RUNNING",
            CvErrorKind::Integrity => "ERR_INTEGRITY",
            CvErrorKind::NotFound => "ERR_NOT_FOUND",
            CvErrorKind::Validation => "ERR_VALIDATION",
            CvErrorKind::InvalidInput => "ERR_INVALID_INPUT",
            CvErrorKind::IllegalTransition => "ERR_ILLEGAL_TRANSITION",
            CvErrorKind::Io => "ERR_IO",
            CvErrorKind::Serialization => "ERR_SERIALIZATION",
            CvErrorKind::Persistence => "ERR_PERSISTENCE",
            CvErrorKind::Config => "ERR_CONFIG",
            CvErrorKind::Timeout => "ERR_TIMEOUT",
            CvErrorKind::Concurrency => "ERR_CONCURRENCY",
            CvErrorKind::Cancelled => "ERR_CANCELLED",
            CvErrorKind::Internal => "ERR_INTERNAL",
        }
    }

    /// Failures the scheduler simply retries at the next due-check
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CvErrorKind::Connect | CvErrorKind::Collect | CvErrorKind::Timeout
        )
    }
}

/// Canonical structured error type
///
/// Carries the classification plus enough context (operation, device) to be
/// written into a job record or an audit event without further formatting.
#[derive(Debug, Clone)]
pub struct CvError {
    kind: CvErrorKind,
    op: Option<String>,
    device_id: Option<String>,
    entity_id: Option<String>,
    message: String,
    source: Option<Box<CvError>>,
}

impl CvError {
    /// Create a new error with the specified kind
    pub fn new(kind: CvErrorKind) -> Self {
        Self {
            kind,
            op: None,
            device_id: None,
            entity_id: None,
            message: String::new(),
            source: None,
        }
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add device context
    pub fn with_device_id(mut self, id: impl Into<String>) -> Self {
        self.device_id = Some(id.into());
        self
    }

    /// Add entity ID context (snapshot, job or ingestion id)
    pub fn with_entity_id(mut self, id: impl Into<String>) -> Self {
        self.entity_id = Some(id.into());
        self
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Add source error
    pub fn with_source(mut self, source: CvError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> CvErrorKind {
        self.kind
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Get the operation context, if any
    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    /// Get the device context, if any
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    /// Get the entity ID context, if any
    pub fn entity_id(&self) -> Option<&str> {
        self.entity_id.as_deref()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the source error, if any
    pub fn source_error(&self) -> Option<&CvError> {
        self.source.as_deref()
    }
}

impl std::fmt::Display for CvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(device_id) = &self.device_id {
            write!(f, " (device_id: {})", device_id)?;
        }
        if let Some(entity_id) = &self.entity_id {
            write!(f, " (entity_id: {})", entity_id)?;
        }
        Ok(())
    }
}

impl std::error::Error for CvError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

// ========== End Error Facility ==========

/// Domain error taxonomy for cfgvault operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VaultError {
    // ===== Collection =====
    /// TCP connect or transport handshake failed
    #[error("Device {device_id} unreachable: {reason}")]
    DeviceUnreachable { device_id: String, reason: String },

    /// Credentials were rejected by the device
    #[error("Authentication failed for device {device_id}")]
    AuthenticationFailed { device_id: String },

    /// Credential reference does not resolve in the credential store
    #[error("Unknown credential reference '{credential_ref}' for device {device_id}")]
    UnknownCredential {
        device_id: String,
        credential_ref: String,
    },

    /// Retrieval command produced an error or no usable output
    #[error("Command failed on device {device_id}: {reason}")]
    CommandFailed { device_id: String, reason: String },

    /// Output exceeded the configured ceiling or was otherwise malformed
    #[error("Unexpected output from device {device_id}: {reason}")]
    UnexpectedOutput { device_id: String, reason: String },

    /// The collect step exceeded its time bound
    #[error("Collection timed out on device {device_id} after {elapsed_ms}ms")]
    CollectTimeout { device_id: String, elapsed_ms: u64 },

    /// Another collection holds the device lock
    #[error("Collection already running for device {device_id}")]
    AlreadyRunning { device_id: String },

    /// Engine shutdown interrupted the job
    #[error("Job for device {device_id} cancelled by shutdown")]
    ShutdownCancelled { device_id: String },

    // ===== Storage =====
    /// Stored bytes do not hash to the indexed checksum
    #[error("Checksum mismatch for snapshot {snapshot_id}: expected {expected}, found {actual}")]
    ChecksumMismatch {
        snapshot_id: String,
        expected: String,
        actual: String,
    },

    /// Index entry exists but its object is gone
    #[error("Object missing for snapshot {snapshot_id}")]
    ObjectMissing { snapshot_id: String },

    #[error("Snapshot not found: {snapshot_id}")]
    SnapshotNotFound { snapshot_id: String },

    #[error("Device not found: {device_id}")]
    DeviceNotFound { device_id: String },

    /// The device catalog could not be read at all
    #[error("Device catalog unavailable: {reason}")]
    CatalogUnavailable { reason: String },

    // ===== Validation =====
    #[error("Unknown vendor variant: {vendor}")]
    UnknownVendor { vendor: String },

    #[error("Unknown transport: {transport}")]
    UnknownTransport { transport: String },

    /// The device record names a transport its vendor does not support
    #[error("Transport {transport} not supported by vendor {vendor}")]
    TransportNotSupported { vendor: String, transport: String },

    #[error("Invalid device record {device_id}: {reason}")]
    InvalidDevice { device_id: String, reason: String },

    #[error("Invalid cadence: {reason}")]
    InvalidCadence { reason: String },

    // ===== Ingestion =====
    /// Uploaded file does not carry the expected name
    #[error("Unexpected upload file name '{file_name}', expected '{expected}'")]
    UnexpectedFileName { file_name: String, expected: String },

    /// Upload path does not resolve to a valid group/source pair
    #[error("Invalid ingestion source '{path}': {reason}")]
    InvalidSource { path: String, reason: String },

    /// Transfer ended before completion
    #[error("Upload incomplete: {path}")]
    IncompleteUpload { path: String },

    // ===== Jobs =====
    #[error("Job {job_id} cannot move from {from} to {to}")]
    IllegalTransition {
        job_id: String,
        from: String,
        to: String,
    },

    // ===== Serialization =====
    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl From<VaultError> for CvError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::DeviceUnreachable { device_id, reason } => {
                CvError::new(CvErrorKind::Connect)
                    .with_device_id(device_id)
                    .with_message(format!("Device unreachable: {}", reason))
            }

            VaultError::AuthenticationFailed { device_id } => CvError::new(CvErrorKind::Connect)
                .with_device_id(device_id)
                .with_message("Authentication failed"),

            VaultError::UnknownCredential {
                device_id,
                credential_ref,
            } => CvError::new(CvErrorKind::Connect)
                .with_device_id(device_id)
                .with_message(format!("Unknown credential reference '{}'", credential_ref)),

            VaultError::CommandFailed { device_id, reason } => CvError::new(CvErrorKind::Collect)
                .with_device_id(device_id)
                .with_message(format!("Command failed: {}", reason)),

            VaultError::UnexpectedOutput { device_id, reason } => {
                CvError::new(CvErrorKind::Collect)
                    .with_device_id(device_id)
                    .with_message(format!("Unexpected output: {}", reason))
            }

            VaultError::CollectTimeout {
                device_id,
                elapsed_ms,
            } => CvError::new(CvErrorKind::Timeout)
                .with_device_id(device_id)
                .with_message(format!("Collection timed out after {}ms", elapsed_ms)),

            VaultError::AlreadyRunning { device_id } => {
                CvError::new(CvErrorKind::AlreadyRunning)
                    .with_device_id(device_id)
                    .with_message("Collection already running")
            }

            VaultError::ShutdownCancelled { device_id } => CvError::new(CvErrorKind::Cancelled)
                .with_device_id(device_id)
                .with_message("Cancelled by shutdown"),

            VaultError::ChecksumMismatch {
                snapshot_id,
                expected,
                actual,
            } => CvError::new(CvErrorKind::Integrity)
                .with_entity_id(snapshot_id)
                .with_message(format!(
                    "Checksum mismatch: expected {}, found {}",
                    expected, actual
                )),

            VaultError::ObjectMissing { snapshot_id } => CvError::new(CvErrorKind::Integrity)
                .with_entity_id(snapshot_id)
                .with_message("Stored object missing"),

            VaultError::SnapshotNotFound { snapshot_id } => CvError::new(CvErrorKind::NotFound)
                .with_entity_id(snapshot_id)
                .with_message("Snapshot not found"),

            VaultError::DeviceNotFound { device_id } => CvError::new(CvErrorKind::NotFound)
                .with_device_id(device_id)
                .with_message("Device not found"),

            VaultError::CatalogUnavailable { reason } => CvError::new(CvErrorKind::Persistence)
                .with_op("load_devices")
                .with_message(format!("Device catalog unavailable: {}", reason)),

            VaultError::UnknownVendor { vendor } => CvError::new(CvErrorKind::Validation)
                .with_message(format!("Unknown vendor variant: {}", vendor)),

            VaultError::UnknownTransport { transport } => CvError::new(CvErrorKind::Validation)
                .with_message(format!("Unknown transport: {}", transport)),

            VaultError::TransportNotSupported { vendor, transport } => {
                CvError::new(CvErrorKind::Validation).with_message(format!(
                    "Transport {} not supported by vendor {}",
                    transport, vendor
                ))
            }

            VaultError::InvalidDevice { device_id, reason } => {
                CvError::new(CvErrorKind::Validation)
                    .with_device_id(device_id)
                    .with_message(reason)
            }

            VaultError::InvalidCadence { reason } => {
                CvError::new(CvErrorKind::Validation).with_message(reason)
            }

            VaultError::UnexpectedFileName {
                file_name,
                expected,
            } => CvError::new(CvErrorKind::Validation).with_message(format!(
                "Unexpected upload file name '{}', expected '{}'",
                file_name, expected
            )),

            VaultError::InvalidSource { path, reason } => CvError::new(CvErrorKind::Validation)
                .with_message(format!("Invalid ingestion source '{}': {}", path, reason)),

            VaultError::IncompleteUpload { path } => CvError::new(CvErrorKind::Validation)
                .with_message(format!("Upload incomplete: {}", path)),

            VaultError::IllegalTransition { job_id, from, to } => {
                CvError::new(CvErrorKind::IllegalTransition)
                    .with_entity_id(job_id)
                    .with_message(format!("Cannot move from {} to {}", from, to))
            }

            VaultError::Serialization { message } => {
                CvError::new(CvErrorKind::Serialization).with_message(message)
            }
        }
    }
}
