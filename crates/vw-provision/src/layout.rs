//! Remote file layout per protocol variant and interface slot

use vw_core::{ClientName, Protocol};

/// Reserved client-name prefix that routes a client to the secondary interface
pub const SECONDARY_PREFIX: &str = "tyumen";

/// Server address and prefix of the secondary interface
pub const SECONDARY_SUBNET: &str = "10.11.0.1/24";

/// Fixed MTU written into the secondary interface header
pub const SECONDARY_MTU: u16 = 1280;

/// Which tunnel interface of a host an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// `wg0` or `awg0`
    Primary,
    /// `awg1`, obfuscated variant only
    Secondary,
}

impl Slot {
    /// Resolve the slot a client belongs to
    pub fn for_client(protocol: Protocol, name: &ClientName) -> Self {
        if protocol.is_obfuscated() && name.has_prefix_ignore_case(SECONDARY_PREFIX) {
            Slot::Secondary
        } else {
            Slot::Primary
        }
    }
}

/// Paths, tool and unit names for one tunnel interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceLayout {
    pub protocol: Protocol,
    pub slot: Slot,
    /// Interface name, e.g. `wg0`
    pub interface: &'static str,
    /// Directory holding the interface file and server keys
    pub root: &'static str,
    /// Directory holding `<name>.conf`, `<name>.key` and `<name>.pub` per client
    pub clients_dir: String,
    pub server_private_key: String,
    pub server_public_key: String,
    /// Key generation and status CLI, `wg` or `awg`
    pub tool: &'static str,
}

impl InterfaceLayout {
    /// Primary interface of a protocol variant
    pub fn primary(protocol: Protocol) -> Self {
        let (root, interface, tool) = match protocol {
            Protocol::WireGuard => ("/etc/wireguard", "wg0", "wg"),
            Protocol::AmneziaWg => ("/etc/amnezia/amneziawg", "awg0", "awg"),
        };
        Self {
            protocol,
            slot: Slot::Primary,
            interface,
            root,
            clients_dir: format!("{}/clients", root),
            server_private_key: format!("{}/server_private.key", root),
            server_public_key: format!("{}/server_public.key", root),
            tool,
        }
    }

    /// Secondary obfuscated interface
    pub fn secondary() -> Self {
        let root = "/etc/amnezia/amneziawg";
        Self {
            protocol: Protocol::AmneziaWg,
            slot: Slot::Secondary,
            interface: "awg1",
            root,
            clients_dir: format!("{}/clients_tyumen", root),
            server_private_key: format!("{}/server_private_awg1.key", root),
            server_public_key: format!("{}/server_public_awg1.key", root),
            tool: "awg",
        }
    }

    /// Layout for a slot; the standard variant has only a primary interface
    pub fn resolve(protocol: Protocol, slot: Slot) -> Self {
        match (protocol, slot) {
            (Protocol::AmneziaWg, Slot::Secondary) => Self::secondary(),
            _ => Self::primary(protocol),
        }
    }

    /// Layout a client's files live under
    pub fn for_client(protocol: Protocol, name: &ClientName) -> Self {
        Self::resolve(protocol, Slot::for_client(protocol, name))
    }

    /// Every interface a variant may run, primary first
    pub fn all(protocol: Protocol) -> Vec<Self> {
        match protocol {
            Protocol::WireGuard => vec![Self::primary(protocol)],
            Protocol::AmneziaWg => vec![Self::primary(protocol), Self::secondary()],
        }
    }

    /// Interface file (header plus peers)
    pub fn config_path(&self) -> String {
        format!("{}/{}.conf", self.root, self.interface)
    }

    /// Backups are `<prefix>.<timestamp>`
    pub fn backup_prefix(&self) -> String {
        format!("{}.bak", self.config_path())
    }

    /// systemd unit of the interface
    pub fn unit(&self) -> String {
        let quick = match self.protocol {
            Protocol::WireGuard => "wg-quick",
            Protocol::AmneziaWg => "awg-quick",
        };
        format!("{}@{}", quick, self.interface)
    }

    pub fn client_config(&self, name: &ClientName) -> String {
        format!("{}/{}.conf", self.clients_dir, name)
    }

    pub fn client_private_key(&self, name: &ClientName) -> String {
        format!("{}/{}.key", self.clients_dir, name)
    }

    pub fn client_public_key(&self, name: &ClientName) -> String {
        format!("{}/{}.pub", self.clients_dir, name)
    }

    /// All three files of a client
    pub fn client_files(&self, name: &ClientName) -> Vec<String> {
        vec![
            self.client_config(name),
            self.client_private_key(name),
            self.client_public_key(name),
        ]
    }

    /// Fixed header MTU, if the interface pins one
    pub fn fixed_mtu(&self) -> Option<u16> {
        match self.slot {
            Slot::Secondary => Some(SECONDARY_MTU),
            Slot::Primary => None,
        }
    }
}

/// Client name from a `<dir>/<name>.conf` path
pub fn client_name_from_path(path: &str) -> Option<&str> {
    let file = path.rsplit('/').next()?;
    file.strip_suffix(".conf").filter(|stem| !stem.is_empty())
}
