//! Parsing of `wg show` / `awg show` output

use serde::Serialize;
use std::collections::HashMap;

/// Live statistics of one peer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PeerStats {
    pub endpoint: Option<String>,
    pub latest_handshake: Option<String>,
    pub transfer_rx: Option<String>,
    pub transfer_tx: Option<String>,
}

/// Statistics keyed by peer public key
///
/// A `peer: <key>` line opens a block; the indented lines that follow, up to
/// the next peer line, describe that peer. Interface blocks are ignored.
pub fn parse_peer_stats(output: &str) -> HashMap<String, PeerStats> {
    let mut peers: HashMap<String, PeerStats> = HashMap::new();
    let mut current: Option<String> = None;

    for raw in output.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();

        match key {
            "peer" => {
                let id = value.to_string();
                peers.entry(id.clone()).or_default();
                current = Some(id);
            }
            "interface" => current = None,
            _ => {
                let Some(stats) = current.as_ref().and_then(|id| peers.get_mut(id)) else {
                    continue;
                };
                match key {
                    "endpoint" => stats.endpoint = Some(value.to_string()),
                    "latest handshake" => stats.latest_handshake = Some(value.to_string()),
                    "transfer" => {
                        let mut parts = value.split(',').map(str::trim);
                        let rx = parts.next().map(|p| p.trim_end_matches("received").trim());
                        let tx = parts.next().map(|p| p.trim_end_matches("sent").trim());
                        stats.transfer_rx = rx.filter(|s| !s.is_empty()).map(str::to_string);
                        stats.transfer_tx = tx.filter(|s| !s.is_empty()).map(str::to_string);
                    }
                    _ => {}
                }
            }
        }
    }

    peers
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOW: &str = "\
interface: wg0
  public key: SrvKey=
  private key: (hidden)
  listening port: 51820

peer: PeerOne=
  endpoint: 198.51.100.4:50412
  allowed ips: 10.10.0.2/32
  latest handshake: 1 minute, 3 seconds ago
  transfer: 1.20 MiB received, 15.33 MiB sent

peer: PeerTwo=
  allowed ips: 10.10.0.3/32
";

    #[test]
    fn test_parses_each_peer() {
        let stats = parse_peer_stats(SHOW);
        assert_eq!(stats.len(), 2);

        let one = &stats["PeerOne="];
        assert_eq!(one.endpoint.as_deref(), Some("198.51.100.4:50412"));
        assert_eq!(
            one.latest_handshake.as_deref(),
            Some("1 minute, 3 seconds ago")
        );
        assert_eq!(one.transfer_rx.as_deref(), Some("1.20 MiB"));
        assert_eq!(one.transfer_tx.as_deref(), Some("15.33 MiB"));

        assert_eq!(stats["PeerTwo="], PeerStats::default());
    }

    #[test]
    fn test_interface_lines_do_not_leak_into_peers() {
        let stats = parse_peer_stats("interface: awg0\n  listening port: 3478\n");
        assert!(stats.is_empty());
    }
}
