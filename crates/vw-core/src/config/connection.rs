//! Connection settings for the remote host

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;

/// How to reach and authenticate against the remote host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Hostname or IP address of the server
    pub host: String,

    /// Login user; commands are elevated with sudo unless this is `root`
    pub user: String,

    /// SSH port
    pub port: u16,

    /// Password for login and sudo
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Path to a private key used instead of a password
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,

    /// Expected host key fingerprint (`SHA256:...`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_key: Option<String>,

    /// Connect timeout
    #[serde(with = "duration_secs")]
    pub timeout: Duration,

    /// Retry policy for transient connect failures
    pub backoff: BackoffConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            user: "root".to_string(),
            port: 22,
            password: None,
            key_path: None,
            host_key: None,
            timeout: Duration::from_secs(20),
            backoff: BackoffConfig::default(),
        }
    }
}

impl ConnectionConfig {
    /// `host:port` socket address string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether the login user is root, in which case no sudo prefix is needed
    pub fn is_root(&self) -> bool {
        self.user == "root"
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_secs")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_secs")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,

    /// Connection attempts before giving up
    pub attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.25,
            attempts: 4,
        }
    }
}
