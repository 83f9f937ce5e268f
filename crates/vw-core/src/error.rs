//! Core error types for VPN Wizard

use std::path::PathBuf;
use thiserror::Error;

/// Substrings that identify package-manager lock contention.
const LOCK_MARKERS: &[&str] = &[
    "could not get lock",
    "resource temporarily unavailable",
    "dpkg/lock",
    "lock-frontend",
    "unable to acquire the dpkg frontend lock",
];

/// Failure of a single remote command
#[derive(Error, Debug, Clone)]
pub enum CommandError {
    /// The command exited nonzero and was required to succeed
    #[error("{}", describe_failure(.command, .exit_code, .stdout, .stderr))]
    Failed {
        /// One-line summary of the command (never a file body)
        command: String,
        /// Remote exit code
        exit_code: u32,
        /// Captured stdout (trimmed)
        stdout: String,
        /// Captured stderr (trimmed)
        stderr: String,
    },

    /// The channel itself failed: closed, timed out, or transport error
    #[error("Remote channel error: {0}")]
    Channel(String),
}

impl CommandError {
    /// Whether the failure text indicates package-manager lock contention
    pub fn is_lock_contention(&self) -> bool {
        match self {
            CommandError::Failed { stdout, stderr, .. } => {
                let text = format!("{}\n{}", stderr, stdout).to_lowercase();
                LOCK_MARKERS.iter().any(|marker| text.contains(marker))
            }
            CommandError::Channel(_) => false,
        }
    }

    /// Combined stderr and stdout of a failed command
    pub fn output_text(&self) -> String {
        match self {
            CommandError::Failed { stdout, stderr, .. } => format!("{}\n{}", stderr, stdout),
            CommandError::Channel(msg) => msg.clone(),
        }
    }
}

fn describe_failure(command: &str, exit_code: &u32, stdout: &str, stderr: &str) -> String {
    let mut msg = format!("Command failed ({}): {}", exit_code, command);
    if !stderr.is_empty() {
        msg.push_str(&format!("\nSTDERR: {}", stderr));
    }
    if !stdout.is_empty() {
        msg.push_str(&format!("\nSTDOUT: {}", stdout));
    }
    msg
}

/// Errors surfaced by provisioning operations
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// A required remote command failed
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The remote OS descriptor could not be parsed
    #[error("Unable to detect OS: {0}")]
    Detection(String),

    /// The remote distribution is not supported
    #[error("Unsupported distro: {0}")]
    UnsupportedDistro(String),

    /// A client name failed validation
    #[error("Invalid client name '{0}'. Use 1-32 letters, numbers, dash, underscore.")]
    InvalidName(String),

    /// The named client has no config on the host
    #[error("Client not found: {0}")]
    ClientNotFound(String),

    /// Address allocation exhausted the subnet
    #[error("No free IPs available in {0} subnet")]
    NoFreeAddresses(String),

    /// The target interface has not been provisioned
    #[error("{0} not found. Provision the server first.")]
    InterfaceMissing(String),

    /// The tunnel tooling is absent after installation
    #[error("{0}")]
    ToolMissing(String),

    /// A parameter or remote value could not be interpreted
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
