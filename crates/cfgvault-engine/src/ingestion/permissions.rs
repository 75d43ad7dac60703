//! Write-only command mask
//!
//! Enforced per command before any filesystem access; filesystem permissions
//! are never relied on.

/// How the listener treats a command verb
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    /// Accepted before login
    Public,
    /// Accepted after login
    Allowed,
    /// Recognised but refused with 550
    Denied,
    /// Unknown; answered with 502
    Unsupported,
}

const PUBLIC: &[&str] = &["USER", "PASS", "QUIT"];

const ALLOWED: &[&str] = &[
    "NOOP", "SYST", "FEAT", "TYPE", "MODE", "STRU", "PWD", "CWD", "CDUP", "MKD", "PASV", "EPSV",
    "PORT", "STOR", "ABOR",
];

const DENIED: &[&str] = &[
    "RETR", "LIST", "NLST", "MLSD", "MLST", "SIZE", "MDTM", "DELE", "RMD", "RNFR", "RNTO", "APPE",
    "STOU", "SITE",
];

/// Classify a verb; case-insensitive
pub fn classify(verb: &str) -> CommandClass {
    let verb = verb.to_ascii_uppercase();
    let verb = verb.as_str();
    if PUBLIC.contains(&verb) {
        CommandClass::Public
    } else if ALLOWED.contains(&verb) {
        CommandClass::Allowed
    } else if DENIED.contains(&verb) {
        CommandClass::Denied
    } else {
        CommandClass::Unsupported
    }
}
