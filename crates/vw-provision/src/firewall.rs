//! Kernel forwarding, tuning and host firewall setup

use tracing::{info, warn};
use vw_core::{ProvisionError, RemoteCommand, RemoteExec, Script};

use crate::layout::InterfaceLayout;
use crate::provisioner::Provisioner;
use crate::render::{header_section, header_value, set_header_value, FirewallHooks};

pub const FORWARDING_CONF: &str = "/etc/sysctl.d/99-vpn-wizard.conf";
pub const TUNING_CONF: &str = "/etc/sysctl.d/99-vpn-wizard-tuning.conf";
pub const REPAIR_CONF: &str = "/etc/sysctl.d/99-vpn-wizard-repair.conf";

const UFW_DEFAULTS: &str = "/etc/default/ufw";
const UFW_BEFORE_RULES: &str = "/etc/ufw/before.rules";

/// Marker line of the NAT block appended to the ufw rules
pub const NAT_MARKER: &str = "# VPN Wizard NAT";

/// Interface assumed when the default route cannot be read
pub const FALLBACK_EGRESS: &str = "eth0";

const SYSCTL_MODE: u32 = 0o644;

const FORWARDING: &str = "net.ipv4.ip_forward=1\nnet.ipv6.conf.all.forwarding=1\n";

const TUNING: &str = "\
net.core.default_qdisc=fq
net.ipv4.tcp_congestion_control=bbr
net.core.rmem_max=26214400
net.core.wmem_max=26214400
net.core.rmem_default=2097152
net.core.wmem_default=2097152
net.ipv4.udp_rmem_min=16384
net.ipv4.udp_wmem_min=16384
net.ipv4.tcp_mtu_probing=1
";

const EGRESS_PROBE: &str =
    "ip -4 route get 1.1.1.1 2>/dev/null | awk '{for(i=1;i<NF;i++) if($i==\"dev\"){print $(i+1); exit}}'";

const UFW_FORWARD_ACCEPT: &str =
    "sed -i 's/^DEFAULT_FORWARD_POLICY=.*/DEFAULT_FORWARD_POLICY=\"ACCEPT\"/' /etc/default/ufw";

fn sysctl_file(path: &str, contents: &str) -> Script {
    Script::WriteFile {
        path: path.to_string(),
        contents: contents.to_string(),
        mode: SYSCTL_MODE,
    }
}

/// `*nat` table masquerading `subnet` out of `egress`
pub fn nat_block(subnet: &str, egress: &str) -> String {
    format!(
        "\n{}\n*nat\n:POSTROUTING ACCEPT [0:0]\n-A POSTROUTING -s {} -o {} -j MASQUERADE\nCOMMIT\n",
        NAT_MARKER, subnet, egress
    )
}

/// Interface name printed by the egress probe, if it looks like one
pub fn parse_egress(output: &str) -> Option<String> {
    let name = output.lines().next()?.trim();
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));
    valid.then(|| name.to_string())
}

impl<R: RemoteExec> Provisioner<R> {
    /// Persist forwarding and, when enabled, apply network tuning
    pub async fn configure_sysctl(&self) -> Result<(), ProvisionError> {
        self.run(sysctl_file(FORWARDING_CONF, FORWARDING)).await?;
        self.run(RemoteCommand::shell("sysctl --system")).await?;

        if self.params.tune {
            info!("Applying network tuning");
            self.run(sysctl_file(TUNING_CONF, TUNING)).await?;
            self.best_effort(RemoteCommand::shell("modprobe tcp_bbr"))
                .await?;
            self.best_effort(RemoteCommand::shell(format!("sysctl -p {}", TUNING_CONF)))
                .await?;
        }
        Ok(())
    }

    /// Open the port and NAT the tunnel subnet in ufw and firewalld
    ///
    /// Every step may fail without aborting; the tunnel hooks carry the
    /// rules the tunnel needs.
    pub async fn enable_firewall(&self) -> Result<(), ProvisionError> {
        let port = self.params.listen_port;
        self.best_effort(RemoteCommand::shell(format!("ufw allow {}/udp", port)))
            .await?;
        self.best_effort(RemoteCommand::shell(UFW_FORWARD_ACCEPT))
            .await?;

        let egress = self.egress_interface().await?;
        let subnet = self.params.server_cidr.clone();
        self.best_effort(Script::AppendIfMissing {
            path: UFW_BEFORE_RULES.to_string(),
            marker: NAT_MARKER.to_string(),
            block: nat_block(&subnet, &egress),
        })
        .await?;
        self.best_effort(RemoteCommand::shell("ufw reload")).await?;

        self.best_effort(RemoteCommand::shell(format!(
            "firewall-cmd --permanent --add-port={}/udp",
            port
        )))
        .await?;
        self.best_effort(RemoteCommand::shell("firewall-cmd --permanent --add-masquerade"))
            .await?;
        self.best_effort(RemoteCommand::shell("firewall-cmd --reload"))
            .await?;
        Ok(())
    }

    /// Outbound interface of the default route, `eth0` if undetectable
    pub async fn egress_interface(&self) -> Result<String, ProvisionError> {
        let output = self
            .best_effort(RemoteCommand::shell(EGRESS_PROBE))
            .await?;
        Ok(match parse_egress(&output.stdout) {
            Some(name) => name,
            None => {
                warn!(
                    "Could not detect the primary interface, using {}",
                    FALLBACK_EGRESS
                );
                FALLBACK_EGRESS.to_string()
            }
        })
    }

    /// Restore forwarding and rewrite the tunnel hooks of the active interface
    ///
    /// Only the `PostUp`/`PostDown` lines change; the rest of the header and
    /// every peer block are kept. Returns the steps taken, for display.
    pub async fn repair_network(&mut self) -> Result<Vec<String>, ProvisionError> {
        self.detect_protocol().await?;
        let layout = InterfaceLayout::primary(self.protocol);
        let mut log = Vec::new();
        let mut step = |line: String| {
            info!("{}", line);
            log.push(line);
        };

        step("Starting network repair...".to_string());
        let Some(conf) = self.read_optional(&layout.config_path()).await? else {
            return Err(ProvisionError::InterfaceMissing(layout.config_path()));
        };

        step("Enabling IP forwarding...".to_string());
        self.run(sysctl_file(REPAIR_CONF, "net.ipv4.ip_forward=1\n"))
            .await?;
        self.run(RemoteCommand::shell("sysctl --system")).await?;

        step("Setting ufw forward policy...".to_string());
        let ufw = self
            .best_effort(RemoteCommand::shell(format!(
                "test -f {} && {} && ufw reload",
                UFW_DEFAULTS, UFW_FORWARD_ACCEPT
            )))
            .await?;
        if !ufw.succeeded() {
            step("ufw not configured, skipped".to_string());
        }

        let egress = self.egress_interface().await?;
        step(format!("Detected primary interface: {}", egress));

        let subnet = header_value(header_section(&conf), "Address")
            .unwrap_or_else(|| self.params.server_cidr.clone());
        let subnet = subnet.split(',').next().unwrap_or_default().trim().to_string();
        let hooks =
            FirewallHooks::with_egress(layout.interface, &subnet, self.params.allow_ipv6, &egress);

        if let Some(backup) = self.backup_interface(&layout).await? {
            step(format!("Backed up config to {}", backup));
        }
        step(format!("Updating {} rules...", layout.config_path()));
        let updated = set_header_value(&conf, "PostUp", &hooks.post_up);
        let updated = set_header_value(&updated, "PostDown", &hooks.post_down);
        self.write_private(&layout.config_path(), updated).await?;

        step(format!("Restarting {}...", layout.unit()));
        self.run(Script::RestartService {
            unit: layout.unit(),
            delay: None,
        })
        .await?;
        step("Network repair complete".to_string());
        Ok(log)
    }
}
