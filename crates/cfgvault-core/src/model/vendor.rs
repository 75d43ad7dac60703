use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::errors::VaultError;

/// Access protocol used to reach a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Ssh,
    Telnet,
}

impl Transport {
    pub fn default_port(&self) -> u16 {
        match self {
            Transport::Ssh => 22,
            Transport::Telnet => 23,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Ssh => "ssh",
            Transport::Telnet => "telnet",
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ssh" => Ok(Transport::Ssh),
            "telnet" => Ok(Transport::Telnet),
            _ => Err(VaultError::UnknownTransport {
                transport: s.to_string(),
            }),
        }
    }
}

/// How a session obtains the privilege level needed to read the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegeMode {
    /// The login shell can already read the configuration
    LoginShell,
    /// Send `enable` (plus the enable secret) when the prompt ends in `>`
    EnableWhenUnprivileged,
}

/// Fixed per-vendor behaviour: transports, the one read-only command and the
/// prompt that terminates its output
#[derive(Debug)]
pub struct VendorProfile {
    pub variant: VendorVariant,
    pub transports: &'static [Transport],
    pub command: &'static str,
    /// Regex matched against the tail of the receive buffer
    pub prompt_pattern: &'static str,
    pub privilege: PrivilegeMode,
}

impl VendorProfile {
    pub fn supports(&self, transport: Transport) -> bool {
        self.transports.contains(&transport)
    }

    /// First listed transport; used when a device record omits one
    pub fn default_transport(&self) -> Transport {
        self.transports[0]
    }
}

/// Pager prompts answered with a space, shared by every variant
pub const PAGER_PATTERN: &str = r"(?:--\s?[Mm]ore\s?--|-{2,4}\s*[Mm]ore\s*-{2,4}|---\(more[^)]*\)---)\s*\z";

const CISCO_PROMPT: &str = r"(?:^|[\r\n])[A-Za-z0-9][\w.\-@()/:]*[>#]\s*\z";
const SSH_AND_TELNET: &[Transport] = &[Transport::Ssh, Transport::Telnet];
const SSH_ONLY: &[Transport] = &[Transport::Ssh];

static PROFILES: [VendorProfile; 7] = [
    VendorProfile {
        variant: VendorVariant::Mikrotik,
        transports: SSH_ONLY,
        command: "/export",
        prompt_pattern: r"\[[^\[\]\r\n]+@[^\[\]\r\n]+\]\s*>\s*\z",
        privilege: PrivilegeMode::LoginShell,
    },
    VendorProfile {
        variant: VendorVariant::Cisco,
        transports: SSH_AND_TELNET,
        command: "show running-config",
        prompt_pattern: CISCO_PROMPT,
        privilege: PrivilegeMode::EnableWhenUnprivileged,
    },
    VendorProfile {
        variant: VendorVariant::Huawei,
        transports: SSH_AND_TELNET,
        command: "display current-configuration",
        prompt_pattern: r"(?:^|[\r\n])(?:<[\w.\-@/:]+>|\[[~*]?[\w.\-@/:]+\])\s*\z",
        privilege: PrivilegeMode::LoginShell,
    },
    VendorProfile {
        variant: VendorVariant::Juniper,
        transports: SSH_ONLY,
        command: "show configuration | display set | no-more",
        prompt_pattern: r"(?:^|[\r\n])[\w.\-]+@[\w.\-]+[>#%]\s*\z",
        privilege: PrivilegeMode::LoginShell,
    },
    VendorProfile {
        variant: VendorVariant::GenericRunning,
        transports: SSH_AND_TELNET,
        command: "show running-config",
        prompt_pattern: CISCO_PROMPT,
        privilege: PrivilegeMode::EnableWhenUnprivileged,
    },
    VendorProfile {
        variant: VendorVariant::GenericSaved,
        transports: SSH_AND_TELNET,
        command: "show saved-config",
        prompt_pattern: CISCO_PROMPT,
        privilege: PrivilegeMode::EnableWhenUnprivileged,
    },
    VendorProfile {
        variant: VendorVariant::GenericStartup,
        transports: SSH_AND_TELNET,
        command: "show startup-config",
        prompt_pattern: CISCO_PROMPT,
        privilege: PrivilegeMode::EnableWhenUnprivileged,
    },
];

/// Closed set of supported device families
///
/// The variant alone determines the command a session runs; nothing at
/// runtime can substitute another one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VendorVariant {
    #[serde(rename = "mikrotik")]
    Mikrotik,
    #[serde(rename = "cisco")]
    Cisco,
    #[serde(rename = "huawei")]
    Huawei,
    #[serde(rename = "juniper")]
    Juniper,
    #[serde(rename = "generic", alias = "generic-running")]
    GenericRunning,
    #[serde(rename = "generic-saved")]
    GenericSaved,
    #[serde(rename = "generic-startup")]
    GenericStartup,
}

impl VendorVariant {
    pub const ALL: [VendorVariant; 7] = [
        VendorVariant::Mikrotik,
        VendorVariant::Cisco,
        VendorVariant::Huawei,
        VendorVariant::Juniper,
        VendorVariant::GenericRunning,
        VendorVariant::GenericSaved,
        VendorVariant::GenericStartup,
    ];

    pub fn profile(&self) -> &'static VendorProfile {
        let idx = match self {
            VendorVariant::Mikrotik => 0,
            VendorVariant::Cisco => 1,
            VendorVariant::Huawei => 2,
            VendorVariant::Juniper => 3,
            VendorVariant::GenericRunning => 4,
            VendorVariant::GenericSaved => 5,
            VendorVariant::GenericStartup => 6,
        };
        &PROFILES[idx]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VendorVariant::Mikrotik => "mikrotik",
            VendorVariant::Cisco => "cisco",
            VendorVariant::Huawei => "huawei",
            VendorVariant::Juniper => "juniper",
            VendorVariant::GenericRunning => "generic",
            VendorVariant::GenericSaved => "generic-saved",
            VendorVariant::GenericStartup => "generic-startup",
        }
    }
}

impl std::fmt::Display for VendorVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VendorVariant {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "mikrotik" => Ok(VendorVariant::Mikrotik),
            "cisco" => Ok(VendorVariant::Cisco),
            "huawei" => Ok(VendorVariant::Huawei),
            "juniper" => Ok(VendorVariant::Juniper),
            "generic" | "generic-running" => Ok(VendorVariant::GenericRunning),
            "generic-saved" => Ok(VendorVariant::GenericSaved),
            "generic-startup" => Ok(VendorVariant::GenericStartup),
            _ => Err(VaultError::UnknownVendor {
                vendor: s.to_string(),
            }),
        }
    }
}
