//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ProvisionError;

/// Longest accepted client name
pub const MAX_CLIENT_NAME_LEN: usize = 32;

/// Tunnel protocol variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// Plain WireGuard
    #[serde(rename = "wireguard")]
    WireGuard,
    /// AmneziaWG, WireGuard with traffic obfuscation parameters
    #[serde(rename = "amneziawg")]
    AmneziaWg,
}

impl Protocol {
    /// The other variant
    pub fn other(self) -> Self {
        match self {
            Protocol::WireGuard => Protocol::AmneziaWg,
            Protocol::AmneziaWg => Protocol::WireGuard,
        }
    }

    /// Whether configs carry an obfuscation block
    pub fn is_obfuscated(self) -> bool {
        matches!(self, Protocol::AmneziaWg)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::WireGuard => write!(f, "wireguard"),
            Protocol::AmneziaWg => write!(f, "amneziawg"),
        }
    }
}

impl FromStr for Protocol {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wireguard" | "wg" => Ok(Protocol::WireGuard),
            "amneziawg" | "awg" => Ok(Protocol::AmneziaWg),
            other => Err(ProvisionError::InvalidConfig(format!(
                "unknown protocol '{}'",
                other
            ))),
        }
    }
}

/// Operating system family of the remote host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OsClass {
    /// Debian, Ubuntu and derivatives
    Debian,
    /// RHEL, CentOS, Fedora, AlmaLinux, Rocky and derivatives
    Rhel,
    /// Anything else; carries the reported identifier
    Unsupported(String),
}

impl OsClass {
    /// Whether the installer has a sequence for this family
    pub fn is_supported(&self) -> bool {
        !matches!(self, OsClass::Unsupported(_))
    }
}

impl fmt::Display for OsClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsClass::Debian => write!(f, "debian"),
            OsClass::Rhel => write!(f, "rhel"),
            OsClass::Unsupported(id) if id.is_empty() => write!(f, "unknown"),
            OsClass::Unsupported(id) => write!(f, "{}", id),
        }
    }
}

/// A validated client name
///
/// Names are 1 to 32 characters drawn from ASCII letters, digits, `-` and
/// `_`. Since no other character can occur, a name is always safe to embed
/// in a remote path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ClientName(String);

impl ClientName {
    /// Validate and wrap a name
    pub fn new(name: impl Into<String>) -> Result<Self, ProvisionError> {
        let name = name.into();
        if Self::is_valid(&name) {
            Ok(Self(name))
        } else {
            Err(ProvisionError::InvalidName(name))
        }
    }

    /// Check a candidate without constructing a name
    pub fn is_valid(name: &str) -> bool {
        (1..=MAX_CLIENT_NAME_LEN).contains(&name.len())
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    /// Get the raw name
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the name carries the given prefix, ignoring ASCII case
    pub fn has_prefix_ignore_case(&self, prefix: &str) -> bool {
        self.0.len() >= prefix.len()
            && self.0.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
    }
}

impl fmt::Display for ClientName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ClientName {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.trim())
    }
}

impl AsRef<str> for ClientName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Outcome of one health probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Probe identifier, e.g. `os_supported`
    pub name: String,
    /// Whether the probe passed
    pub ok: bool,
    /// Raw observation behind the verdict
    pub details: String,
}

impl CheckResult {
    /// Create a check result
    pub fn new(name: impl Into<String>, ok: bool, details: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ok,
            details: details.into(),
        }
    }
}

/// A registered client with its live statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub address: String,
    pub public_key: String,
    pub endpoint: Option<String>,
    pub latest_handshake: Option<String>,
    pub transfer_rx: Option<String>,
    pub transfer_tx: Option<String>,
    /// Tunnel interface the client belongs to (`wg0`, `awg0`, `awg1`)
    pub interface: String,
}

/// Result of adding or rotating a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddedClient {
    pub name: String,
    pub address: String,
    /// Full client config text
    pub config: String,
    pub interface: String,
}

/// A client's stored credentials and config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedClient {
    pub name: String,
    pub address: String,
    pub public_key: String,
    pub config: String,
    pub interface: String,
}

/// Service state plus the raw tunnel daemon dump
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// `systemctl is-active` answer
    pub service: String,
    /// `<tool> show <iface>` output
    pub raw: String,
}

impl ServiceStatus {
    /// Whether systemd reports the unit active
    pub fn is_active(&self) -> bool {
        self.service == "active"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_name_accepts_valid() {
        assert!(ClientName::new("client-1").is_ok());
        assert!(ClientName::new("Client_2").is_ok());
        assert!(ClientName::new("a".repeat(32)).is_ok());
    }

    #[test]
    fn test_client_name_rejects_invalid() {
        for bad in ["", "has/slash", "with space", "dollar$", "dot.conf", "ünï"] {
            assert!(
                matches!(ClientName::new(bad), Err(ProvisionError::InvalidName(_))),
                "{:?} should be rejected",
                bad
            );
        }
        assert!(ClientName::new("a".repeat(33)).is_err());
    }

    #[test]
    fn test_client_name_prefix_ignores_case() {
        let name = ClientName::new("TyumenPhone").unwrap();
        assert!(name.has_prefix_ignore_case("tyumen"));
        assert!(!ClientName::new("tyu").unwrap().has_prefix_ignore_case("tyumen"));
    }

    #[test]
    fn test_protocol_parse_and_display() {
        assert_eq!("wireguard".parse::<Protocol>().unwrap(), Protocol::WireGuard);
        assert_eq!("AWG".parse::<Protocol>().unwrap(), Protocol::AmneziaWg);
        assert!("openvpn".parse::<Protocol>().is_err());
        assert_eq!(Protocol::AmneziaWg.to_string(), "amneziawg");
        assert_eq!(Protocol::WireGuard.other(), Protocol::AmneziaWg);
    }

    #[test]
    fn test_protocol_serde_names() {
        let json = serde_json::to_string(&Protocol::AmneziaWg).unwrap();
        assert_eq!(json, "\"amneziawg\"");
        let parsed: Protocol = serde_json::from_str("\"wireguard\"").unwrap();
        assert_eq!(parsed, Protocol::WireGuard);
    }

    #[test]
    fn test_os_class_display() {
        assert_eq!(OsClass::Debian.to_string(), "debian");
        assert_eq!(OsClass::Unsupported("arch".into()).to_string(), "arch");
        assert_eq!(OsClass::Unsupported(String::new()).to_string(), "unknown");
        assert!(!OsClass::Unsupported("arch".into()).is_supported());
    }
}
