//! Provisioning parameters

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::types::Protocol;

/// Parameters for one provisioning run and later client operations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Name of the client created during provisioning
    pub client_name: String,

    /// Address of the client created during provisioning
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,

    /// Server address with prefix, e.g. `10.10.0.1/24`
    pub server_cidr: String,

    /// UDP listen port
    pub listen_port: u16,

    /// DNS servers written into client configs
    pub dns: String,

    /// Explicit tunnel MTU; disables detection when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u16>,

    /// Probe the path MTU when no explicit MTU is set
    pub auto_mtu: bool,

    /// MTU used when detection finds nothing
    pub mtu_fallback: u16,

    /// Host pinged during MTU detection
    pub mtu_probe_host: String,

    /// Apply congestion-control and buffer tuning
    pub tune: bool,

    /// Tunnel protocol variant
    pub protocol: Protocol,

    /// Route IPv6 through the tunnel
    pub allow_ipv6: bool,

    /// Package-manager lock retry policy
    pub apt_retry: RetryConfig,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            client_name: "client1".to_string(),
            client_ip: Some("10.10.0.2/32".to_string()),
            server_cidr: "10.10.0.1/24".to_string(),
            listen_port: 51820,
            dns: "1.1.1.1".to_string(),
            mtu: None,
            auto_mtu: true,
            mtu_fallback: 1280,
            mtu_probe_host: "1.1.1.1".to_string(),
            tune: true,
            protocol: Protocol::AmneziaWg,
            allow_ipv6: false,
            apt_retry: RetryConfig::default(),
        }
    }
}

/// Fixed-delay retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first
    pub attempts: u32,

    /// Delay between attempts
    #[serde(with = "duration_secs")]
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 10,
            delay: Duration::from_secs(10),
        }
    }
}
