//! Provisioning orchestrator

use std::net::IpAddr;

use tracing::{debug, info, warn};
use vw_core::config::ProvisionConfig;
use vw_core::{
    quote, ClientName, CommandError, CommandOutput, OsClass, Protocol, ProvisionError,
    RemoteCommand, RemoteExec, Script,
};

use crate::clients::ClientSettings;
use crate::install::Installer;
use crate::layout::{InterfaceLayout, Slot};
use crate::obfuscation::ObfuscationParams;
use crate::render::{default_allowed_ips, FirewallHooks, ServerHeader};
use crate::{mtu, os};

/// Mode of every file holding key material
pub(crate) const PRIVATE_MODE: u32 = 0o600;

const PUBLIC_IP_LOOKUP: &str = "curl -s https://api.ipify.org || wget -qO- https://api.ipify.org";

/// Drives one remote host through provisioning and client management
///
/// Every operation re-reads the state it needs from the host. The only
/// values kept between calls are the obfuscation parameters generated at
/// construction, the resolved MTU, the resolved public IP and the active
/// protocol variant. Operations run one remote command at a time.
pub struct Provisioner<R> {
    pub(crate) exec: R,
    pub(crate) params: ProvisionConfig,
    pub(crate) protocol: Protocol,
    pub(crate) obfuscation: ObfuscationParams,
    mtu: Option<Option<u16>>,
    public_ip: Option<String>,
}

impl<R: RemoteExec> Provisioner<R> {
    /// Create a provisioner with freshly generated obfuscation parameters
    pub fn new(exec: R, params: ProvisionConfig) -> Self {
        Self::with_obfuscation(exec, params, ObfuscationParams::generate())
    }

    /// Create a provisioner with fixed obfuscation parameters
    pub fn with_obfuscation(exec: R, params: ProvisionConfig, obfuscation: ObfuscationParams) -> Self {
        let protocol = params.protocol;
        Self {
            exec,
            params,
            protocol,
            obfuscation,
            mtu: None,
            public_ip: None,
        }
    }

    /// Active protocol variant
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn params(&self) -> &ProvisionConfig {
        &self.params
    }

    pub fn obfuscation(&self) -> &ObfuscationParams {
        &self.obfuscation
    }

    pub fn exec(&self) -> &R {
        &self.exec
    }

    /// Give back the channel, e.g. to close it
    pub fn into_exec(self) -> R {
        self.exec
    }

    /// Install, configure and start the tunnel on a fresh or existing host
    ///
    /// An existing interface header is kept as is and the configured client
    /// is (re)written against its live settings, then the peer list rebuilt.
    pub async fn provision(&mut self) -> Result<(), ProvisionError> {
        info!("Detecting OS");
        let os = os::detect(&self.exec).await?;
        if let OsClass::Unsupported(id) = &os {
            return Err(ProvisionError::UnsupportedDistro(id.clone()));
        }
        info!("Detected {} family", os);

        info!("Installing {} packages", self.protocol);
        Installer::new(&self.exec, &self.params.apt_retry)
            .install(self.protocol, &os)
            .await?;

        info!("Configuring sysctl");
        self.configure_sysctl().await?;

        info!("Configuring {} interface", self.protocol);
        self.setup_interface().await?;

        info!("Configuring firewall");
        self.enable_firewall().await?;

        let layout = InterfaceLayout::primary(self.protocol);
        info!("Starting {}", layout.unit());
        self.run(RemoteCommand::shell(format!(
            "systemctl enable --now {}",
            quote(&layout.unit())
        )))
        .await?;

        info!("Provisioning complete");
        Ok(())
    }

    async fn setup_interface(&mut self) -> Result<(), ProvisionError> {
        let layout = InterfaceLayout::primary(self.protocol);
        let name = ClientName::new(self.params.client_name.as_str())?;

        self.run(Script::MakeDir {
            path: layout.clients_dir.clone(),
        })
        .await?;
        self.backup_interface(&layout).await?;
        self.generate_key_pair(
            layout.tool,
            &layout.server_private_key,
            &layout.server_public_key,
        )
        .await?;

        let settings = if self.file_exists(&layout.config_path()).await? {
            info!("Keeping existing {} header", layout.config_path());
            self.live_settings(&layout).await?
        } else {
            let mtu = self.resolve_mtu().await?;
            let private_key = self.read_file(&layout.server_private_key).await?;
            let header = ServerHeader {
                address: self.params.server_cidr.clone(),
                listen_port: self.params.listen_port,
                private_key: private_key.trim().to_string(),
                mtu,
                obfuscation: self.protocol.is_obfuscated().then_some(self.obfuscation),
                hooks: FirewallHooks::new(
                    layout.interface,
                    &self.params.server_cidr,
                    self.params.allow_ipv6,
                ),
            };
            self.write_private(&layout.config_path(), header.render())
                .await?;
            ClientSettings {
                listen_port: self.params.listen_port,
                mtu,
                dns: self.params.dns.clone(),
                allowed_ips: default_allowed_ips(self.params.allow_ipv6).to_string(),
                obfuscation: self.protocol.is_obfuscated().then_some(self.obfuscation),
            }
        };

        let address = self.provisioned_client_address(&layout, &name).await?;
        self.write_client(&layout, &name, &address, &settings)
            .await?;
        self.write_peers(&layout).await?;
        Ok(())
    }

    /// Switch to the other variant when only its interface file exists
    pub async fn detect_protocol(&mut self) -> Result<Protocol, ProvisionError> {
        let current = InterfaceLayout::primary(self.protocol);
        if !self.file_exists(&current.config_path()).await? {
            let other = InterfaceLayout::primary(self.protocol.other());
            if self.file_exists(&other.config_path()).await? {
                info!(
                    "Found {} instead of {}, switching to {}",
                    other.config_path(),
                    current.config_path(),
                    other.protocol
                );
                self.protocol = other.protocol;
            }
        }
        Ok(self.protocol)
    }

    /// Back up the active primary interface file
    pub async fn backup_config(&mut self) -> Result<Option<String>, ProvisionError> {
        self.detect_protocol().await?;
        let layout = InterfaceLayout::primary(self.protocol);
        Ok(self.backup_interface(&layout).await?)
    }

    /// Copy an interface file to a timestamped sibling
    ///
    /// Returns `None` when the interface has not been provisioned.
    pub(crate) async fn backup_interface(
        &self,
        layout: &InterfaceLayout,
    ) -> Result<Option<String>, CommandError> {
        let path = self
            .exec
            .run(
                RemoteCommand::new(Script::Backup {
                    source: layout.config_path(),
                    prefix: layout.backup_prefix(),
                })
                .sudo(),
            )
            .await?;
        if path.is_empty() {
            Ok(None)
        } else {
            debug!("Backed up {} to {}", layout.config_path(), path);
            Ok(Some(path))
        }
    }

    /// Restore the newest backup of the primary interface
    pub async fn rollback_last_backup(&mut self) -> Result<Option<String>, ProvisionError> {
        self.rollback_interface(Slot::Primary).await
    }

    /// Restore the newest backup of an interface and restart it
    pub async fn rollback_interface(&mut self, slot: Slot) -> Result<Option<String>, ProvisionError> {
        self.detect_protocol().await?;
        let layout = InterfaceLayout::resolve(self.protocol, slot);

        let listing = self
            .run_text(Script::ListBackups {
                prefix: layout.backup_prefix(),
            })
            .await?;
        let Some(latest) = listing.lines().map(str::trim).find(|l| !l.is_empty()) else {
            info!("No backups of {}", layout.config_path());
            return Ok(None);
        };
        let latest = latest.to_string();

        info!("Restoring {} from {}", layout.config_path(), latest);
        self.run(Script::Restore {
            backup: latest.clone(),
            target: layout.config_path(),
        })
        .await?;
        self.best_effort(RemoteCommand::new(Script::RestartService {
            unit: layout.unit(),
            delay: None,
        }))
        .await?;
        Ok(Some(latest))
    }

    /// Tunnel MTU for this run, resolved once
    ///
    /// An explicit MTU wins. With detection disabled the MTU line is
    /// omitted. A failed detection falls back to the configured default.
    pub async fn resolve_mtu(&mut self) -> Result<Option<u16>, ProvisionError> {
        if let Some(cached) = self.mtu {
            return Ok(cached);
        }
        let resolved = match (self.params.mtu, self.params.auto_mtu) {
            (Some(mtu), _) => Some(mtu),
            (None, false) => None,
            (None, true) => {
                info!("Detecting path MTU towards {}", self.params.mtu_probe_host);
                match mtu::detect(&self.exec, &self.params.mtu_probe_host).await? {
                    Some(mtu) => {
                        info!("Detected tunnel MTU {}", mtu);
                        Some(mtu)
                    }
                    None => {
                        warn!(
                            "MTU detection failed, using fallback {}",
                            self.params.mtu_fallback
                        );
                        Some(self.params.mtu_fallback)
                    }
                }
            }
        };
        self.mtu = Some(resolved);
        Ok(resolved)
    }

    /// Public address clients connect to, resolved once
    pub async fn public_ip(&mut self) -> Result<String, ProvisionError> {
        if let Some(ip) = &self.public_ip {
            return Ok(ip.clone());
        }
        let host = self.exec.host().to_string();
        let ip = if host.parse::<IpAddr>().is_ok() {
            host
        } else {
            let output = self
                .exec
                .execute(&RemoteCommand::shell(PUBLIC_IP_LOOKUP).allow_failure())
                .await?;
            let found = output.stdout.trim();
            if found.parse::<IpAddr>().is_ok() {
                found.to_string()
            } else {
                warn!("Public IP lookup failed, using {}", host);
                host
            }
        };
        self.public_ip = Some(ip.clone());
        Ok(ip)
    }

    pub(crate) async fn endpoint(&mut self, port: u16) -> Result<String, ProvisionError> {
        Ok(format_endpoint(&self.public_ip().await?, port))
    }

    /// Run an elevated command that must succeed
    pub(crate) async fn run(
        &self,
        command: impl Into<RemoteCommand>,
    ) -> Result<CommandOutput, CommandError> {
        self.exec.execute(&command.into().sudo()).await
    }

    /// Run an elevated command that must succeed and return its text
    pub(crate) async fn run_text(&self, command: impl Into<RemoteCommand>) -> Result<String, CommandError> {
        Ok(self.run(command).await?.text())
    }

    /// Run an elevated command whose failure is only logged
    pub(crate) async fn best_effort(
        &self,
        command: impl Into<RemoteCommand>,
    ) -> Result<CommandOutput, CommandError> {
        let command = command.into().sudo().allow_failure();
        let output = self.exec.execute(&command).await?;
        if !output.succeeded() {
            warn!(
                "Ignoring failure of '{}' (exit {}): {}",
                command.summary(),
                output.exit_code,
                output.text()
            );
        }
        Ok(output)
    }

    pub(crate) async fn file_exists(&self, path: &str) -> Result<bool, CommandError> {
        let answer = self
            .run_text(Script::FileExists {
                path: path.to_string(),
            })
            .await?;
        Ok(answer == "yes")
    }

    /// Raw contents of a remote file
    pub(crate) async fn read_file(&self, path: &str) -> Result<String, CommandError> {
        Ok(self
            .run(Script::ReadFile {
                path: path.to_string(),
            })
            .await?
            .stdout)
    }

    pub(crate) async fn write_private(&self, path: &str, contents: String) -> Result<(), CommandError> {
        self.run(Script::WriteFile {
            path: path.to_string(),
            contents,
            mode: PRIVATE_MODE,
        })
        .await?;
        Ok(())
    }

    pub(crate) async fn generate_key_pair(
        &self,
        tool: &str,
        private_key: &str,
        public_key: &str,
    ) -> Result<(), CommandError> {
        self.run(Script::GenerateKeyPair {
            tool: tool.to_string(),
            private_key: private_key.to_string(),
            public_key: public_key.to_string(),
        })
        .await?;
        Ok(())
    }
}

/// `host:port`, bracketing IPv6 literals
pub(crate) fn format_endpoint(host: &str, port: u16) -> String {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => format!("[{}]:{}", v6, port),
        _ => format!("{}:{}", host, port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_endpoint() {
        assert_eq!(format_endpoint("203.0.113.7", 51820), "203.0.113.7:51820");
        assert_eq!(format_endpoint("2001:db8::1", 443), "[2001:db8::1]:443");
        assert_eq!(format_endpoint("vpn.example.com", 51820), "vpn.example.com:51820");
    }
}
