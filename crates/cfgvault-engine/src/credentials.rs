//! Device credentials
//!
//! Devices refer to credentials by name. The credentials file is a TOML table
//! of named entries:
//!
//! ```toml
//! [lab]
//! username = "backup"
//! password = "..."
//! enable_secret = "..."   # optional, Cisco-like variants only
//! ```
//!
//! Any secret may instead be an `enc:v1:` token sealed with the master key
//! (see [`crate::secrets`]); tokens are opened once at load time.

use crate::config::ConfigError;
use crate::secrets::{is_sealed, MasterKey};
use cfgvault_core_types::Sensitive;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password: Sensitive<String>,
    #[serde(default)]
    pub enable_secret: Option<Sensitive<String>>,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Sensitive::new(password.into()),
            enable_secret: None,
        }
    }

    pub fn with_enable_secret(mut self, secret: impl Into<String>) -> Self {
        self.enable_secret = Some(Sensitive::new(secret.into()));
        self
    }
}

/// Resolves a device's credential reference
pub trait CredentialStore: Send + Sync {
    fn resolve(&self, reference: &str) -> Option<Credential>;
}

#[derive(Debug, Default)]
pub struct FileCredentialStore {
    entries: HashMap<String, Credential>,
}

impl FileCredentialStore {
    /// # Errors
    ///
    /// `Io` if the file cannot be read, `Parse` if it is not a table of
    /// credentials, `Invalid` if a sealed secret cannot be opened.
    pub fn load(path: impl AsRef<Path>, key: Option<&MasterKey>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let entries = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Self::unsealed(entries, key)
    }

    /// # Errors
    ///
    /// `Parse` for malformed content, `Invalid` for unopenable secrets.
    pub fn from_toml_str(content: &str, key: Option<&MasterKey>) -> Result<Self, ConfigError> {
        let entries = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: "<inline>".into(),
            source,
        })?;
        Self::unsealed(entries, key)
    }

    fn unsealed(
        mut entries: HashMap<String, Credential>,
        key: Option<&MasterKey>,
    ) -> Result<Self, ConfigError> {
        for (name, credential) in entries.iter_mut() {
            credential.password = open_secret(name, "password", &credential.password, key)?;
            if let Some(secret) = credential.enable_secret.as_ref() {
                credential.enable_secret = Some(open_secret(name, "enable_secret", secret, key)?);
            }
        }
        Ok(Self { entries })
    }

    /// Entry names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (String, Credential)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn open_secret(
    name: &str,
    field: &str,
    value: &Sensitive<String>,
    key: Option<&MasterKey>,
) -> Result<Sensitive<String>, ConfigError> {
    if !is_sealed(value.expose()) {
        return Ok(value.clone());
    }
    let Some(key) = key else {
        return Err(ConfigError::Invalid(format!(
            "credential '{}' has a sealed {} but no master key is set",
            name, field
        )));
    };
    key.open(value.expose())
        .map(Sensitive::new)
        .map_err(|e| ConfigError::Invalid(format!("credential '{}' {}: {}", name, field, e)))
}

impl CredentialStore for FileCredentialStore {
    fn resolve(&self, reference: &str) -> Option<Credential> {
        self.entries.get(reference).cloned()
    }
}
