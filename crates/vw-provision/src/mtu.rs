//! Path MTU discovery
//!
//! Binary search over ICMP payload sizes with the don't-fragment bit set,
//! then conversion of the largest payload that got through into a tunnel MTU.

use vw_core::{quote, CommandError, RemoteCommand, RemoteExec};

/// Smallest probed ICMP payload
pub const PROBE_PAYLOAD_MIN: u16 = 1200;
/// Largest probed ICMP payload (1500 byte path minus IP and ICMP headers)
pub const PROBE_PAYLOAD_MAX: u16 = 1472;
/// IPv4 plus ICMP header bytes
const ICMP_OVERHEAD: u16 = 28;
/// Outer IP, UDP and WireGuard framing
const TUNNEL_OVERHEAD: u16 = 80;
pub const TUNNEL_MTU_MIN: u16 = 1280;
pub const TUNNEL_MTU_MAX: u16 = 1420;

/// Tunnel MTU for the largest payload that crossed the path unfragmented
pub fn tunnel_mtu_from_payload(payload: u16) -> u16 {
    let path_mtu = payload.saturating_add(ICMP_OVERHEAD);
    path_mtu
        .saturating_sub(TUNNEL_OVERHEAD)
        .clamp(TUNNEL_MTU_MIN, TUNNEL_MTU_MAX)
}

/// Probe the path towards `probe_host`
///
/// Returns `None` when `ping` is missing, lacks `-M`, or no probe got through.
pub async fn detect<R: RemoteExec + ?Sized>(
    exec: &R,
    probe_host: &str,
) -> Result<Option<u16>, CommandError> {
    let has_ping = exec
        .run(
            RemoteCommand::shell("command -v ping >/dev/null 2>&1 && echo ok || echo missing")
                .allow_failure(),
        )
        .await?;
    if has_ping != "ok" {
        tracing::warn!("ping not available, skipping MTU detection");
        return Ok(None);
    }

    let supports_df = exec
        .run(
            RemoteCommand::shell("ping -h 2>&1 | grep -q ' -M ' && echo ok || echo no")
                .allow_failure(),
        )
        .await?;
    if supports_df != "ok" {
        tracing::warn!("ping lacks -M (don't fragment), skipping MTU detection");
        return Ok(None);
    }

    let target = quote(probe_host);
    let mut low = PROBE_PAYLOAD_MIN;
    let mut high = PROBE_PAYLOAD_MAX;
    let mut best = None;
    while low <= high {
        let mid = low + (high - low) / 2;
        let probe = format!(
            "ping -c 1 -W 1 -M do -s {} {} >/dev/null 2>&1 && echo ok || echo fail",
            mid, target
        );
        let result = exec.run(RemoteCommand::shell(probe).allow_failure()).await?;
        tracing::debug!("MTU probe payload {}: {}", mid, result);
        if result == "ok" {
            best = Some(mid);
            low = mid + 1;
        } else {
            high = mid - 1;
        }
    }

    Ok(best.map(tunnel_mtu_from_payload))
}
