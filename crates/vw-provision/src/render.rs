//! Interface and client config text
//!
//! Server interface files are a header (`[Interface]` plus everything up to
//! the first `[Peer]`) followed by peer blocks. The header is written once;
//! the peer blocks are always regenerated from the per-client files.

use std::fmt::Write;

use crate::obfuscation::ObfuscationParams;

/// Line that opens a peer block
pub const PEER_MARKER: &str = "[Peer]";

/// Keepalive written into every client config
pub const PERSISTENT_KEEPALIVE: u16 = 15;

/// Fixed IPv6 ULA prefix used by the IPv6 NAT hooks
pub const IPV6_PREFIX: &str = "fd42:42:42::/64";

/// Server interface header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHeader {
    /// Server address with prefix
    pub address: String,
    pub listen_port: u16,
    pub private_key: String,
    pub mtu: Option<u16>,
    /// Present for the obfuscated variant only
    pub obfuscation: Option<ObfuscationParams>,
    pub hooks: FirewallHooks,
}

impl ServerHeader {
    pub fn render(&self) -> String {
        let mut out = String::from("[Interface]\n");
        let _ = writeln!(out, "Address = {}", self.address);
        let _ = writeln!(out, "ListenPort = {}", self.listen_port);
        let _ = writeln!(out, "PrivateKey = {}", self.private_key.trim());
        if let Some(mtu) = self.mtu {
            let _ = writeln!(out, "MTU = {}", mtu);
        }
        if let Some(params) = &self.obfuscation {
            out.push_str(&params.render());
        }
        let _ = writeln!(out, "PostUp = {}", self.hooks.post_up);
        let _ = writeln!(out, "PostDown = {}", self.hooks.post_down);
        out
    }
}

/// A client's config file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub private_key: String,
    /// Client address with prefix, normally `/32`
    pub address: String,
    pub dns: String,
    pub mtu: Option<u16>,
    pub obfuscation: Option<ObfuscationParams>,
    pub server_public_key: String,
    /// `host:port` of the server
    pub endpoint: String,
    pub allowed_ips: String,
}

impl ClientConfig {
    pub fn render(&self) -> String {
        let mut out = String::from("[Interface]\n");
        let _ = writeln!(out, "PrivateKey = {}", self.private_key.trim());
        let _ = writeln!(out, "Address = {}", self.address);
        let _ = writeln!(out, "DNS = {}", self.dns);
        if let Some(mtu) = self.mtu {
            let _ = writeln!(out, "MTU = {}", mtu);
        }
        if let Some(params) = &self.obfuscation {
            out.push_str(&params.render());
        }
        out.push('\n');
        let _ = writeln!(out, "{}", PEER_MARKER);
        let _ = writeln!(out, "PublicKey = {}", self.server_public_key.trim());
        let _ = writeln!(out, "Endpoint = {}", self.endpoint);
        let _ = writeln!(out, "AllowedIPs = {}", self.allowed_ips);
        let _ = writeln!(out, "PersistentKeepalive = {}", PERSISTENT_KEEPALIVE);
        out
    }
}

/// One server-side peer block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    pub public_key: String,
    pub allowed_ips: String,
}

/// `PostUp` / `PostDown` commands of a server header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallHooks {
    pub post_up: String,
    pub post_down: String,
}

impl FirewallHooks {
    /// Forwarding, NAT and MSS clamp rules for an interface and its subnet
    pub fn new(interface: &str, subnet: &str, allow_ipv6: bool) -> Self {
        Self::build(interface, subnet, allow_ipv6, None)
    }

    /// Same rules with masquerading pinned to one outbound interface
    pub fn with_egress(interface: &str, subnet: &str, allow_ipv6: bool, egress: &str) -> Self {
        Self::build(interface, subnet, allow_ipv6, Some(egress))
    }

    fn build(interface: &str, subnet: &str, allow_ipv6: bool, egress: Option<&str>) -> Self {
        let out = egress.map(|e| format!(" -o {}", e)).unwrap_or_default();
        let mut up = vec![
            "sysctl -w net.ipv4.ip_forward=1".to_string(),
            "sysctl -w net.ipv6.conf.all.forwarding=1".to_string(),
            format!("iptables -w -I FORWARD 1 -i {} -j ACCEPT", interface),
            format!("iptables -w -I FORWARD 1 -o {} -j ACCEPT", interface),
            format!("iptables -w -t nat -A POSTROUTING -s {}{} -j MASQUERADE", subnet, out),
            "iptables -w -t mangle -A FORWARD -p tcp --tcp-flags SYN,RST SYN -j TCPMSS --clamp-mss-to-pmtu".to_string(),
        ];
        let mut down = vec![
            format!("iptables -w -D FORWARD -i {} -j ACCEPT", interface),
            format!("iptables -w -D FORWARD -o {} -j ACCEPT", interface),
            format!("iptables -w -t nat -D POSTROUTING -s {}{} -j MASQUERADE", subnet, out),
            "iptables -w -t mangle -D FORWARD -p tcp --tcp-flags SYN,RST SYN -j TCPMSS --clamp-mss-to-pmtu".to_string(),
        ];
        if allow_ipv6 {
            up.extend([
                format!("ip6tables -w -I FORWARD 1 -i {} -j ACCEPT || true", interface),
                format!("ip6tables -w -I FORWARD 1 -o {} -j ACCEPT || true", interface),
                format!(
                    "ip6tables -w -t nat -A POSTROUTING -s {} -j MASQUERADE || true",
                    IPV6_PREFIX
                ),
            ]);
            down.extend([
                format!("ip6tables -w -D FORWARD -i {} -j ACCEPT || true", interface),
                format!("ip6tables -w -D FORWARD -o {} -j ACCEPT || true", interface),
                format!(
                    "ip6tables -w -t nat -D POSTROUTING -s {} -j MASQUERADE || true",
                    IPV6_PREFIX
                ),
            ]);
        }
        Self {
            post_up: up.join("; "),
            post_down: down.join("; "),
        }
    }
}

/// Client `AllowedIPs` for full-tunnel routing
pub fn default_allowed_ips(allow_ipv6: bool) -> &'static str {
    if allow_ipv6 {
        "0.0.0.0/0, ::/0"
    } else {
        "0.0.0.0/0"
    }
}

/// Text before the first peer block
pub fn header_section(text: &str) -> &str {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.trim_start().starts_with(PEER_MARKER) {
            return &text[..offset];
        }
        offset += line.len();
    }
    text
}

/// Rebuild an interface file from its current text and the peer set
///
/// The header is kept verbatim except that trailing blank lines collapse
/// into one line break, so repeated rebuilds are byte-identical.
pub fn rebuild_interface(current: &str, peers: &[PeerEntry]) -> String {
    let mut out = header_section(current).trim_end_matches(['\n', '\r']).to_string();
    out.push('\n');
    for peer in peers {
        let _ = write!(
            out,
            "\n{}\nPublicKey = {}\nAllowedIPs = {}\n",
            PEER_MARKER, peer.public_key, peer.allowed_ips
        );
    }
    out
}

/// Value of the first `Key = value` line with exactly this key
pub fn header_value(text: &str, key: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let (k, v) = line.split_once('=')?;
        if k.trim() == key {
            Some(v.trim().to_string())
        } else {
            None
        }
    })
}

/// Replace the value of `key` inside the header, adding the line if absent
///
/// Peer blocks are never touched.
pub fn set_header_value(text: &str, key: &str, value: &str) -> String {
    let header = header_section(text);
    let peers = &text[header.len()..];

    let mut lines: Vec<String> = header.lines().map(str::to_string).collect();
    let replacement = format!("{} = {}", key, value);
    let existing = lines.iter().position(|line| {
        line.split_once('=')
            .map(|(k, _)| k.trim() == key)
            .unwrap_or(false)
    });
    match existing {
        Some(index) => lines[index] = replacement,
        None => {
            let last_content = lines
                .iter()
                .rposition(|line| !line.trim().is_empty())
                .map(|i| i + 1)
                .unwrap_or(lines.len());
            lines.insert(last_content, replacement);
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out.push_str(peers);
    out
}

/// Bare IPv4 address from an `Address` value such as `10.10.0.2/32`
pub fn address_host(value: &str) -> &str {
    value.split('/').next().unwrap_or(value).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONF: &str = "[Interface]\nAddress = 10.10.0.1/24\nListenPort = 51820\nPrivateKey = srv\nPostUp = a\nPostDown = b\n\n[Peer]\nPublicKey = p1\nAllowedIPs = 10.10.0.2/32\n";

    #[test]
    fn test_header_section_stops_at_first_peer() {
        assert_eq!(
            header_section(CONF),
            "[Interface]\nAddress = 10.10.0.1/24\nListenPort = 51820\nPrivateKey = srv\nPostUp = a\nPostDown = b\n\n"
        );
        assert_eq!(header_section("[Interface]\nMTU = 1280\n"), "[Interface]\nMTU = 1280\n");
    }

    #[test]
    fn test_rebuild_replaces_peers() {
        let peers = vec![
            PeerEntry {
                public_key: "k2".into(),
                allowed_ips: "10.10.0.3/32".into(),
            },
            PeerEntry {
                public_key: "k3".into(),
                allowed_ips: "10.10.0.4/32".into(),
            },
        ];
        let rebuilt = rebuild_interface(CONF, &peers);
        assert!(rebuilt.starts_with("[Interface]\nAddress = 10.10.0.1/24\n"));
        assert!(rebuilt.ends_with(
            "PostDown = b\n\n[Peer]\nPublicKey = k2\nAllowedIPs = 10.10.0.3/32\n\n[Peer]\nPublicKey = k3\nAllowedIPs = 10.10.0.4/32\n"
        ));
        assert!(!rebuilt.contains("p1"));
        assert_eq!(rebuild_interface(&rebuilt, &peers), rebuilt);
    }

    #[test]
    fn test_rebuild_with_no_peers_keeps_header() {
        assert_eq!(
            rebuild_interface(CONF, &[]),
            "[Interface]\nAddress = 10.10.0.1/24\nListenPort = 51820\nPrivateKey = srv\nPostUp = a\nPostDown = b\n"
        );
    }

    #[test]
    fn test_header_value_matches_exact_key() {
        assert_eq!(header_value(CONF, "ListenPort").as_deref(), Some("51820"));
        assert_eq!(header_value(CONF, "Listen"), None);
        assert_eq!(header_value("H1 = 5\nH12 = 6", "H1").as_deref(), Some("5"));
        assert_eq!(
            header_value("PostUp = sysctl -w net.ipv4.ip_forward=1", "PostUp").as_deref(),
            Some("sysctl -w net.ipv4.ip_forward=1")
        );
    }

    #[test]
    fn test_set_header_value_leaves_peers() {
        let updated = set_header_value(CONF, "ListenPort", "3478");
        assert!(updated.contains("ListenPort = 3478\n"));
        assert!(updated.ends_with("\n[Peer]\nPublicKey = p1\nAllowedIPs = 10.10.0.2/32\n"));

        let added = set_header_value("[Interface]\nAddress = 10.11.0.1/24\n", "MTU", "1280");
        assert_eq!(added, "[Interface]\nAddress = 10.11.0.1/24\nMTU = 1280\n");
    }

    #[test]
    fn test_hooks_ipv6_only_when_allowed() {
        let v4 = FirewallHooks::new("wg0", "10.10.0.1/24", false);
        assert!(v4.post_up.starts_with("sysctl -w net.ipv4.ip_forward=1; "));
        assert!(v4.post_up.contains("-t nat -A POSTROUTING -s 10.10.0.1/24 -j MASQUERADE"));
        assert!(v4.post_down.contains("iptables -w -D FORWARD -i wg0 -j ACCEPT"));
        assert!(!v4.post_up.contains("ip6tables"));

        let v6 = FirewallHooks::new("awg0", "10.10.0.1/24", true);
        assert!(v6
            .post_up
            .ends_with("ip6tables -w -t nat -A POSTROUTING -s fd42:42:42::/64 -j MASQUERADE || true"));
        assert!(v6.post_down.contains("ip6tables -w -D FORWARD -o awg0 -j ACCEPT || true"));

        let pinned = FirewallHooks::with_egress("wg0", "10.10.0.1/24", false, "ens3");
        assert!(pinned
            .post_up
            .contains("-t nat -A POSTROUTING -s 10.10.0.1/24 -o ens3 -j MASQUERADE"));
        assert!(pinned
            .post_down
            .contains("-t nat -D POSTROUTING -s 10.10.0.1/24 -o ens3 -j MASQUERADE"));
    }

    #[test]
    fn test_client_config_layout() {
        let config = ClientConfig {
            private_key: "cpriv\n".into(),
            address: "10.10.0.2/32".into(),
            dns: "1.1.1.1".into(),
            mtu: Some(1380),
            obfuscation: None,
            server_public_key: "spub".into(),
            endpoint: "203.0.113.7:51820".into(),
            allowed_ips: default_allowed_ips(false).into(),
        };
        assert_eq!(
            config.render(),
            "[Interface]\nPrivateKey = cpriv\nAddress = 10.10.0.2/32\nDNS = 1.1.1.1\nMTU = 1380\n\n[Peer]\nPublicKey = spub\nEndpoint = 203.0.113.7:51820\nAllowedIPs = 0.0.0.0/0\nPersistentKeepalive = 15\n"
        );
    }

    #[test]
    fn test_address_host() {
        assert_eq!(address_host("10.10.0.2/32"), "10.10.0.2");
        assert_eq!(address_host(" 10.10.0.9 "), "10.10.0.9");
    }
}
