//! Client registry: add, remove, rotate, list, export and peer rebuild

use std::collections::HashSet;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use tracing::{info, warn};
use vw_core::{
    quote, AddedClient, ClientInfo, ClientName, CommandError, ExportedClient, ProvisionError,
    RemoteCommand, RemoteExec, Script,
};

use crate::layout::{client_name_from_path, InterfaceLayout, Slot, SECONDARY_SUBNET};
use crate::obfuscation::ObfuscationParams;
use crate::provisioner::Provisioner;
use crate::registry::{self, allocate_address, parse_client_address, parse_subnet, used_addresses};
use crate::render::{
    self, address_host, default_allowed_ips, header_section, header_value, set_header_value,
    ClientConfig, FirewallHooks, PeerEntry, ServerHeader,
};
use crate::status::parse_peer_stats;

const CONF_EXTENSION: &str = "conf";

/// Delay before the tunnel restarts after a peer rebuild, in seconds
const REBUILD_RESTART_DELAY: u32 = 1;

/// Values written into a new client config
#[derive(Debug, Clone)]
pub(crate) struct ClientSettings {
    pub listen_port: u16,
    pub mtu: Option<u16>,
    pub dns: String,
    pub allowed_ips: String,
    pub obfuscation: Option<ObfuscationParams>,
}

impl<R: RemoteExec> Provisioner<R> {
    /// Lowest unused `client<N>` across every client directory
    pub async fn next_client_name(&mut self) -> Result<String, ProvisionError> {
        self.detect_protocol().await?;
        let mut names = Vec::new();
        for layout in InterfaceLayout::all(self.protocol) {
            for path in self.client_paths(&layout).await? {
                if let Some(name) = client_name_from_path(&path) {
                    names.push(name.to_string());
                }
            }
        }
        Ok(registry::next_client_name(names.iter().map(String::as_str)))
    }

    /// First free address on the primary interface
    pub async fn next_client_ip(&mut self) -> Result<String, ProvisionError> {
        self.detect_protocol().await?;
        let layout = InterfaceLayout::primary(self.protocol);
        self.next_client_ip_for(&layout).await
    }

    pub(crate) async fn next_client_ip_for(
        &self,
        layout: &InterfaceLayout,
    ) -> Result<String, ProvisionError> {
        let configs = self
            .run(Script::ConcatFiles {
                dir: layout.clients_dir.clone(),
                extension: CONF_EXTENSION.to_string(),
            })
            .await?
            .stdout;
        let used = used_addresses(&configs);
        let subnet = self.interface_subnet(layout).await?;
        allocate_address(subnet, &used)
    }

    /// Address of the client created by `provision`
    ///
    /// The configured address is used, then the client's current one. A
    /// candidate held by another client or outside the interface subnet is
    /// skipped, and the next free address is taken instead.
    pub(crate) async fn provisioned_client_address(
        &self,
        layout: &InterfaceLayout,
        name: &ClientName,
    ) -> Result<String, ProvisionError> {
        let own = layout.client_config(name);
        let mut used: HashSet<Ipv4Addr> = HashSet::new();
        let mut current = None;
        for path in self.client_paths(layout).await? {
            let Some(conf) = self.read_optional(&path).await? else {
                continue;
            };
            if path == own {
                current = header_value(&conf, "Address");
            } else {
                used.extend(used_addresses(&conf));
            }
        }
        let subnet = self.interface_subnet(layout).await?;

        let configured = match &self.params.client_ip {
            Some(ip) => Some(parse_client_address(ip)?),
            None => None,
        };
        let current = current.and_then(|addr| parse_client_address(&addr).ok());
        for candidate in configured.into_iter().chain(current) {
            match address_host(&candidate).parse::<Ipv4Addr>() {
                Ok(host) if subnet.contains(&host) && !used.contains(&host) => {
                    return Ok(candidate)
                }
                _ => warn!("Address {} unavailable for {}", candidate, name),
            }
        }
        allocate_address(subnet, &used)
    }

    /// Subnet from the interface header, or the configured one before provisioning
    async fn interface_subnet(&self, layout: &InterfaceLayout) -> Result<Ipv4Net, ProvisionError> {
        let from_header = match self.read_optional(&layout.config_path()).await? {
            Some(conf) => header_value(header_section(&conf), "Address"),
            None => None,
        };
        let cidr = from_header.unwrap_or_else(|| match layout.slot {
            Slot::Primary => self.params.server_cidr.clone(),
            Slot::Secondary => SECONDARY_SUBNET.to_string(),
        });
        // IPv4 entry of a possibly dual-stack Address line
        let first = cidr.split(',').next().unwrap_or_default();
        parse_subnet(first)
    }

    /// Create a client, replacing any existing client of the same name
    ///
    /// Without a name the next free `client<N>` is used; without an address
    /// the next free one in the target interface's subnet. DNS, MTU, listen
    /// port, allowed ranges and obfuscation values are read from the live
    /// interface and its sibling clients.
    pub async fn add_client(
        &mut self,
        name: Option<&str>,
        address: Option<&str>,
    ) -> Result<AddedClient, ProvisionError> {
        let name = match name {
            Some(name) => ClientName::new(name)?,
            None => ClientName::new(self.next_client_name().await?)?,
        };
        self.detect_protocol().await?;
        let layout = InterfaceLayout::for_client(self.protocol, &name);

        if layout.slot == Slot::Secondary {
            self.ensure_secondary_interface().await?;
        } else if !self.file_exists(&layout.config_path()).await? {
            return Err(ProvisionError::InterfaceMissing(layout.config_path()));
        }

        if self.file_exists(&layout.client_config(&name)).await? {
            info!("Client {} already exists, replacing it", name);
            self.run(Script::RemoveFiles {
                paths: layout.client_files(&name),
            })
            .await?;
        }

        let address = match address {
            Some(address) => parse_client_address(address)?,
            None => self.next_client_ip_for(&layout).await?,
        };
        let settings = self.live_settings(&layout).await?;

        self.run(Script::MakeDir {
            path: layout.clients_dir.clone(),
        })
        .await?;
        self.generate_key_pair(
            layout.tool,
            &layout.server_private_key,
            &layout.server_public_key,
        )
        .await?;
        let config = self
            .write_client(&layout, &name, &address, &settings)
            .await?;

        self.backup_interface(&layout).await?;
        self.rebuild_layout(&layout).await?;
        info!("Added client {} ({}) on {}", name, address, layout.interface);

        Ok(AddedClient {
            name: name.to_string(),
            address,
            config,
            interface: layout.interface.to_string(),
        })
    }

    /// Delete a client's files and rebuild; `false` if it does not exist
    pub async fn remove_client(&mut self, name: &str) -> Result<bool, ProvisionError> {
        let name = ClientName::new(name)?;
        self.detect_protocol().await?;
        let layout = InterfaceLayout::for_client(self.protocol, &name);

        if !self.file_exists(&layout.client_config(&name)).await? {
            return Ok(false);
        }

        self.run(Script::RemoveFiles {
            paths: layout.client_files(&name),
        })
        .await?;
        self.backup_interface(&layout).await?;
        self.rebuild_layout(&layout).await?;
        info!("Removed client {} from {}", name, layout.interface);
        Ok(true)
    }

    /// Regenerate a client's keys while keeping its address
    pub async fn rotate_client(&mut self, name: &str) -> Result<AddedClient, ProvisionError> {
        let name = ClientName::new(name)?;
        self.detect_protocol().await?;
        let layout = InterfaceLayout::for_client(self.protocol, &name);

        let address = self
            .read_optional(&layout.client_config(&name))
            .await?
            .and_then(|conf| header_value(&conf, "Address"))
            .ok_or_else(|| ProvisionError::ClientNotFound(name.to_string()))?;

        info!("Rotating keys of {} at {}", name, address);
        self.remove_client(name.as_str()).await?;
        self.add_client(Some(name.as_str()), Some(&address)).await
    }

    /// Every client with live statistics from the tunnel daemon
    pub async fn list_clients(&mut self) -> Result<Vec<ClientInfo>, ProvisionError> {
        self.detect_protocol().await?;
        let mut clients = Vec::new();

        for layout in InterfaceLayout::all(self.protocol) {
            let paths = self.client_paths(&layout).await?;
            if paths.is_empty() {
                continue;
            }

            let dump = self
                .best_effort(RemoteCommand::shell(format!(
                    "{} show {}",
                    layout.tool, layout.interface
                )))
                .await?
                .stdout;
            let stats = parse_peer_stats(&dump);

            for path in paths {
                let Some(name) = valid_name(&path) else {
                    continue;
                };
                let address = self
                    .read_optional(&path)
                    .await?
                    .and_then(|conf| header_value(&conf, "Address"))
                    .unwrap_or_default();
                let public_key = self
                    .read_optional(&layout.client_public_key(&name))
                    .await?
                    .map(|key| key.trim().to_string())
                    .unwrap_or_default();
                let live = stats.get(&public_key).cloned().unwrap_or_default();

                clients.push(ClientInfo {
                    name: name.to_string(),
                    address,
                    public_key,
                    endpoint: live.endpoint,
                    latest_handshake: live.latest_handshake,
                    transfer_rx: live.transfer_rx,
                    transfer_tx: live.transfer_tx,
                    interface: layout.interface.to_string(),
                });
            }
        }

        Ok(clients)
    }

    /// A client's stored config and credentials, primary directory first
    pub async fn export_client(&mut self, name: &str) -> Result<ExportedClient, ProvisionError> {
        let name = ClientName::new(name)?;
        self.detect_protocol().await?;

        for layout in InterfaceLayout::all(self.protocol) {
            let Some(config) = self.read_optional(&layout.client_config(&name)).await? else {
                continue;
            };
            let public_key = self
                .read_optional(&layout.client_public_key(&name))
                .await?
                .map(|key| key.trim().to_string())
                .unwrap_or_default();
            return Ok(ExportedClient {
                name: name.to_string(),
                address: header_value(&config, "Address").unwrap_or_default(),
                public_key,
                config,
                interface: layout.interface.to_string(),
            });
        }

        Err(ProvisionError::ClientNotFound(name.to_string()))
    }

    /// Config text of a client
    pub async fn export_client_config(&mut self, name: &str) -> Result<String, ProvisionError> {
        Ok(self.export_client(name).await?.config)
    }

    /// Regenerate an interface's peer list from its client files and restart it
    pub async fn rebuild_interface(&mut self, slot: Slot) -> Result<(), ProvisionError> {
        self.detect_protocol().await?;
        let layout = InterfaceLayout::resolve(self.protocol, slot);
        if !self.file_exists(&layout.config_path()).await? {
            return Err(ProvisionError::InterfaceMissing(layout.config_path()));
        }
        self.rebuild_layout(&layout).await
    }

    pub(crate) async fn rebuild_layout(&self, layout: &InterfaceLayout) -> Result<(), ProvisionError> {
        self.write_peers(layout).await?;
        self.run(Script::RestartService {
            unit: layout.unit(),
            delay: Some(REBUILD_RESTART_DELAY),
        })
        .await?;
        Ok(())
    }

    /// Rewrite the interface file: existing header plus one peer per client
    ///
    /// Clients are taken in sorted path order. A client without a readable
    /// address or public key is skipped.
    pub(crate) async fn write_peers(&self, layout: &InterfaceLayout) -> Result<(), ProvisionError> {
        let current = self.read_file(&layout.config_path()).await?;

        let mut peers = Vec::new();
        for path in self.client_paths(layout).await? {
            let Some(name) = valid_name(&path) else {
                continue;
            };
            let Some(address) = self
                .read_optional(&path)
                .await?
                .and_then(|conf| header_value(&conf, "Address"))
            else {
                warn!("Skipping {}: no Address line", path);
                continue;
            };
            let public_key = self
                .read_optional(&layout.client_public_key(&name))
                .await?
                .map(|key| key.trim().to_string())
                .unwrap_or_default();
            if public_key.is_empty() {
                warn!("Skipping {}: public key missing", name);
                continue;
            }
            peers.push(PeerEntry {
                public_key,
                allowed_ips: address,
            });
        }

        let rebuilt = render::rebuild_interface(&current, &peers);
        self.write_private(&layout.config_path(), rebuilt).await?;
        info!("Wrote {} with {} peers", layout.config_path(), peers.len());
        Ok(())
    }

    /// Generate the client key pair if absent and write its config
    pub(crate) async fn write_client(
        &mut self,
        layout: &InterfaceLayout,
        name: &ClientName,
        address: &str,
        settings: &ClientSettings,
    ) -> Result<String, ProvisionError> {
        self.generate_key_pair(
            layout.tool,
            &layout.client_private_key(name),
            &layout.client_public_key(name),
        )
        .await?;
        let private_key = self.read_file(&layout.client_private_key(name)).await?;
        let server_public_key = self.read_file(&layout.server_public_key).await?;
        let endpoint = self.endpoint(settings.listen_port).await?;

        let config = ClientConfig {
            private_key: private_key.trim().to_string(),
            address: address.to_string(),
            dns: settings.dns.clone(),
            mtu: settings.mtu,
            obfuscation: settings.obfuscation,
            server_public_key: server_public_key.trim().to_string(),
            endpoint,
            allowed_ips: settings.allowed_ips.clone(),
        }
        .render();
        self.write_private(&layout.client_config(name), config.clone())
            .await?;
        Ok(config)
    }

    /// Settings a new client must share with the running interface
    pub(crate) async fn live_settings(&mut self, layout: &InterfaceLayout) -> Result<ClientSettings, ProvisionError> {
        let conf = self.read_file(&layout.config_path()).await?;
        let header = header_section(&conf).to_string();

        let listen_port = header_value(&header, "ListenPort")
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.params.listen_port);

        let mtu = match header_value(&header, "MTU").and_then(|v| v.parse().ok()) {
            Some(mtu) => Some(mtu),
            None => match layout.fixed_mtu() {
                Some(mtu) => Some(mtu),
                None => self.resolve_mtu().await?,
            },
        };

        let siblings = self
            .run(Script::ConcatFiles {
                dir: layout.clients_dir.clone(),
                extension: CONF_EXTENSION.to_string(),
            })
            .await?
            .stdout;
        let dns = header_value(&siblings, "DNS").unwrap_or_else(|| self.params.dns.clone());
        let allowed_ips = if self.params.allow_ipv6 {
            header_value(&siblings, "AllowedIPs")
                .unwrap_or_else(|| default_allowed_ips(true).to_string())
        } else {
            default_allowed_ips(false).to_string()
        };

        let obfuscation = if layout.protocol.is_obfuscated() {
            Some(ObfuscationParams::parse(&header).unwrap_or(match layout.slot {
                Slot::Primary => self.obfuscation,
                Slot::Secondary => self.obfuscation.secondary(),
            }))
        } else {
            None
        };

        Ok(ClientSettings {
            listen_port,
            mtu,
            dns,
            allowed_ips,
            obfuscation,
        })
    }

    /// Create the secondary interface, or sync its listen port
    async fn ensure_secondary_interface(&self) -> Result<(), ProvisionError> {
        let layout = InterfaceLayout::secondary();
        let port = self.params.listen_port;
        self.best_effort(RemoteCommand::shell(format!("ufw allow {}/udp", port)))
            .await?;

        if let Some(conf) = self.read_optional(&layout.config_path()).await? {
            let current = header_value(header_section(&conf), "ListenPort");
            if current.as_deref() != Some(port.to_string().as_str()) {
                info!(
                    "Moving {} from port {} to {}",
                    layout.interface,
                    current.unwrap_or_default(),
                    port
                );
                let updated = set_header_value(&conf, "ListenPort", &port.to_string());
                self.write_private(&layout.config_path(), updated).await?;
                self.run(Script::RestartService {
                    unit: layout.unit(),
                    delay: None,
                })
                .await?;
            }
            return Ok(());
        }

        info!("Creating secondary interface {}", layout.interface);
        self.run(Script::MakeDir {
            path: layout.clients_dir.clone(),
        })
        .await?;
        self.generate_key_pair(
            layout.tool,
            &layout.server_private_key,
            &layout.server_public_key,
        )
        .await?;
        let private_key = self.read_file(&layout.server_private_key).await?;

        let header = ServerHeader {
            address: SECONDARY_SUBNET.to_string(),
            listen_port: port,
            private_key: private_key.trim().to_string(),
            mtu: layout.fixed_mtu(),
            obfuscation: Some(self.obfuscation.secondary()),
            hooks: FirewallHooks::new(layout.interface, SECONDARY_SUBNET, self.params.allow_ipv6),
        };
        self.write_private(&layout.config_path(), header.render())
            .await?;
        self.run(RemoteCommand::shell(format!(
            "systemctl enable --now {}",
            quote(&layout.unit())
        )))
        .await?;
        Ok(())
    }

    /// Sorted client config paths of an interface
    async fn client_paths(&self, layout: &InterfaceLayout) -> Result<Vec<String>, CommandError> {
        let listing = self
            .run(Script::ListFiles {
                dir: layout.clients_dir.clone(),
                extension: CONF_EXTENSION.to_string(),
            })
            .await?
            .stdout;
        Ok(listing
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Contents of a remote file, `None` if it cannot be read
    pub(crate) async fn read_optional(&self, path: &str) -> Result<Option<String>, CommandError> {
        let output = self
            .exec
            .execute(
                &RemoteCommand::new(Script::ReadFile {
                    path: path.to_string(),
                })
                .sudo()
                .allow_failure(),
            )
            .await?;
        Ok(output.succeeded().then_some(output.stdout))
    }
}

fn valid_name(path: &str) -> Option<ClientName> {
    let stem = client_name_from_path(path)?;
    match ClientName::new(stem) {
        Ok(name) => Some(name),
        Err(_) => {
            warn!("Ignoring {}: not a valid client name", path);
            None
        }
    }
}
