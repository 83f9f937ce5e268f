//! Effective settings: the config file overlaid with command-line flags

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use vw_core::config::{self, ConfigFile, ConnectionConfig, ProvisionConfig};
use vw_core::Protocol;

/// How to reach the server
#[derive(Args, Debug, Default, Clone)]
pub struct ConnectionArgs {
    /// Server hostname or IP address
    #[arg(short = 'H', long, global = true, env = "VPN_WIZARD_HOST")]
    pub host: Option<String>,

    /// SSH login user
    #[arg(short, long, global = true)]
    pub user: Option<String>,

    /// SSH port
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// Password for SSH login and sudo
    #[arg(long, global = true, env = "VPN_WIZARD_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Private key used instead of a password
    #[arg(short = 'i', long = "key", global = true)]
    pub key_path: Option<PathBuf>,

    /// Expected host key fingerprint (SHA256:...)
    #[arg(long, global = true)]
    pub host_key: Option<String>,
}

impl ConnectionArgs {
    /// Overlay the flags that were given
    pub fn apply(&self, config: &mut ConnectionConfig) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(user) = &self.user {
            config.user = user.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(password) = &self.password {
            config.password = Some(password.clone());
        }
        if let Some(key_path) = &self.key_path {
            config.key_path = Some(key_path.clone());
        }
        if let Some(host_key) = &self.host_key {
            config.host_key = Some(host_key.clone());
        }
    }
}

/// Tunnel parameters
#[derive(Args, Debug, Default, Clone)]
pub struct ProvisionArgs {
    /// Tunnel variant: wireguard or amneziawg
    #[arg(long, global = true)]
    pub protocol: Option<Protocol>,

    /// UDP listen port
    #[arg(long, global = true)]
    pub listen_port: Option<u16>,

    /// Server address with prefix, e.g. 10.10.0.1/24
    #[arg(long, global = true)]
    pub server_cidr: Option<String>,

    /// Name of the client created during provisioning
    #[arg(long, global = true)]
    pub client_name: Option<String>,

    /// Address of the client created during provisioning
    #[arg(long, global = true)]
    pub client_ip: Option<String>,

    /// DNS servers for client configs
    #[arg(long, global = true)]
    pub dns: Option<String>,

    /// Fixed tunnel MTU (disables detection)
    #[arg(long, global = true)]
    pub mtu: Option<u16>,

    /// Skip path MTU detection
    #[arg(long, global = true)]
    pub no_auto_mtu: bool,

    /// Skip congestion control and buffer tuning
    #[arg(long, global = true)]
    pub no_tune: bool,

    /// Route IPv6 through the tunnel
    #[arg(long, global = true)]
    pub ipv6: bool,
}

impl ProvisionArgs {
    /// Overlay the flags that were given
    pub fn apply(&self, config: &mut ProvisionConfig) {
        if let Some(protocol) = self.protocol {
            config.protocol = protocol;
        }
        if let Some(port) = self.listen_port {
            config.listen_port = port;
        }
        if let Some(cidr) = &self.server_cidr {
            config.server_cidr = cidr.clone();
        }
        if let Some(name) = &self.client_name {
            config.client_name = name.clone();
        }
        if let Some(ip) = &self.client_ip {
            config.client_ip = Some(ip.clone());
        }
        if let Some(dns) = &self.dns {
            config.dns = dns.clone();
        }
        if let Some(mtu) = self.mtu {
            config.mtu = Some(mtu);
        }
        if self.no_auto_mtu {
            config.auto_mtu = false;
        }
        if self.no_tune {
            config.tune = false;
        }
        if self.ipv6 {
            config.allow_ipv6 = true;
        }
    }
}

/// Config file path in effect
pub fn config_path(explicit: Option<&PathBuf>) -> PathBuf {
    explicit.cloned().unwrap_or_else(config::default_config_path)
}

/// Read the config file
///
/// An explicitly given file must exist; a missing default file yields the
/// built-in defaults.
pub fn load_file(explicit: Option<&PathBuf>) -> Result<ConfigFile> {
    match explicit {
        Some(path) => config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path)),
        None => {
            let path = config::default_config_path();
            if path.exists() {
                config::load_config(&path)
                    .with_context(|| format!("Failed to load config from {:?}", path))
            } else {
                tracing::debug!("No config at {:?}, using defaults", path);
                Ok(ConfigFile::default())
            }
        }
    }
}

/// Config file overlaid with the given flags
pub fn resolve(
    explicit: Option<&PathBuf>,
    connection: &ConnectionArgs,
    provision: &ProvisionArgs,
) -> Result<ConfigFile> {
    let mut settings = load_file(explicit)?;
    connection.apply(&mut settings.connection);
    provision.apply(&mut settings.provision);
    Ok(settings)
}

/// Check that the settings name a reachable server
pub fn validate(settings: &ConfigFile) -> Result<()> {
    if settings.connection.host.trim().is_empty() {
        anyhow::bail!("No host configured: pass --host or set connection.host in the config file");
    }
    if settings.connection.password.is_none() && settings.connection.key_path.is_none() {
        anyhow::bail!("No credentials configured: pass --password or --key");
    }
    Ok(())
}

/// Settings with the password masked, for display
pub fn redacted(settings: &ConfigFile) -> ConfigFile {
    let mut shown = settings.clone();
    if shown.connection.password.is_some() {
        shown.connection.password = Some("***".to_string());
    }
    shown
}

/// Write the commented starter config
pub fn write_template(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }
    std::fs::write(path, default_config())
        .with_context(|| format!("Failed to write config file: {:?}", path))
}

/// Commented starter configuration
pub fn default_config() -> &'static str {
    r#"# VPN Wizard configuration

[connection]
# Server to provision
host = ""
# Login user; anything but root elevates with sudo
user = "root"
port = 22
# password = "..."
# key_path = "~/.ssh/id_ed25519"
# Pin the server host key
# host_key = "SHA256:..."
# Connect timeout in seconds
timeout = 20

[connection.backoff]
initial = 1
max = 30
multiplier = 2.0
jitter = 0.25
attempts = 4

[provision]
# "amneziawg" or "wireguard"
protocol = "amneziawg"
listen_port = 51820
server_cidr = "10.10.0.1/24"
client_name = "client1"
client_ip = "10.10.0.2/32"
dns = "1.1.1.1"
# Fixed MTU; leave unset to probe the path
# mtu = 1420
auto_mtu = true
mtu_fallback = 1280
mtu_probe_host = "1.1.1.1"
tune = true
allow_ipv6 = false

[provision.apt_retry]
attempts = 10
delay = 10
"#
}
