//! Pre- and post-provisioning checks, status and diagnostics

use tracing::debug;
use vw_core::{
    CheckResult, CommandError, ProvisionError, RemoteCommand, RemoteExec, ServiceStatus,
};

use crate::layout::InterfaceLayout;
use crate::os;
use crate::provisioner::Provisioner;
use crate::render::{header_section, header_value};

/// Checks whose failure must stop provisioning
pub const CRITICAL_CHECKS: [&str; 3] = ["os_supported", "sudo", "port_available"];

const REPORT_HEADER: &str = "=== VPN WIZARD DIAGNOSTIC REPORT ===";

/// Names of the failed critical checks
pub fn critical_failures(checks: &[CheckResult]) -> Vec<String> {
    checks
        .iter()
        .filter(|check| !check.ok && CRITICAL_CHECKS.contains(&check.name.as_str()))
        .map(|check| check.name.clone())
        .collect()
}

fn udp_listener_probe(port: u16) -> String {
    format!(
        "ss -lun | awk '{{print $4}}' | grep -qE ':{}$' && echo busy || echo free",
        port
    )
}

fn check_from(name: &str, result: Result<(bool, String), CommandError>) -> CheckResult {
    match result {
        Ok((ok, details)) => CheckResult::new(name, ok, details),
        Err(e) => CheckResult::new(name, false, e.to_string()),
    }
}

impl<R: RemoteExec> Provisioner<R> {
    /// Probe a host before provisioning
    ///
    /// Every check runs regardless of earlier failures.
    pub async fn pre_check(&self) -> Result<Vec<CheckResult>, ProvisionError> {
        let mut checks = Vec::with_capacity(5);

        checks.push(match os::detect(&self.exec).await {
            Ok(os) => CheckResult::new("os_supported", os.is_supported(), os.to_string()),
            Err(e) => CheckResult::new("os_supported", false, e.to_string()),
        });

        let ping = self
            .probe("ping -c 1 -W 1 1.1.1.1 >/dev/null 2>&1 && echo ok || echo fail")
            .await
            .map(|out| (out == "ok", out));
        checks.push(check_from("ping", ping));

        let sudo = if self.exec.uses_password() {
            Ok((true, "password auth".to_string()))
        } else {
            // unelevated: the probe invokes sudo itself
            self.exec
                .run(
                    RemoteCommand::shell(
                        "[ \"$(id -u)\" = 0 ] && echo root || (sudo -n true >/dev/null 2>&1 && echo ok || echo fail)",
                    )
                    .allow_failure(),
                )
                .await
                .map(|out| match out.as_str() {
                    "root" => (true, "root login".to_string()),
                    "ok" => (true, "passwordless".to_string()),
                    _ => (false, "sudo requires password".to_string()),
                })
        };
        checks.push(check_from("sudo", sudo));

        let port = self
            .probe(&udp_listener_probe(self.params.listen_port))
            .await
            .map(|out| (out == "free", out));
        checks.push(check_from("port_available", port));

        let layout = InterfaceLayout::primary(self.protocol);
        let conf = self
            .file_exists(&layout.config_path())
            .await
            .map(|exists| {
                let state = if exists { "present" } else { "missing" };
                (!exists, state.to_string())
            });
        checks.push(check_from("server_conf_exists", conf));

        for check in &checks {
            debug!("pre-check {}: {} ({})", check.name, check.ok, check.details);
        }
        Ok(checks)
    }

    /// Verify a provisioned host
    pub async fn post_check(&mut self) -> Result<Vec<CheckResult>, ProvisionError> {
        self.detect_protocol().await?;
        let layout = InterfaceLayout::primary(self.protocol);
        let port = match self.read_optional(&layout.config_path()).await? {
            Some(conf) => header_value(header_section(&conf), "ListenPort")
                .and_then(|v| v.parse().ok())
                .unwrap_or(self.params.listen_port),
            None => self.params.listen_port,
        };

        let mut checks = Vec::with_capacity(4);

        let service = self
            .probe(&format!("systemctl is-active {} || true", layout.unit()))
            .await
            .map(|out| (out == "active", out));
        checks.push(check_from("service_active", service));

        let link = self
            .probe(&format!(
                "ip link show {} >/dev/null 2>&1 && echo ok || echo missing",
                layout.interface
            ))
            .await
            .map(|out| (out == "ok", out));
        checks.push(check_from("interface", link));

        let forward = self
            .probe("sysctl -n net.ipv4.ip_forward 2>/dev/null || echo missing")
            .await
            .map(|out| (out == "1", out));
        checks.push(check_from("ip_forward", forward));

        let listen = self
            .probe(&udp_listener_probe(port))
            .await
            .map(|out| (out == "busy", out));
        checks.push(check_from("udp_listen", listen));

        Ok(checks)
    }

    /// Service state and the raw tunnel status dump
    pub async fn status(&mut self) -> Result<ServiceStatus, ProvisionError> {
        self.detect_protocol().await?;
        let layout = InterfaceLayout::primary(self.protocol);
        let service = self
            .probe(&format!("systemctl is-active {} || true", layout.unit()))
            .await?;
        let raw = self
            .best_effort(RemoteCommand::shell(format!(
                "{} show {}",
                layout.tool, layout.interface
            )))
            .await?
            .text();
        Ok(ServiceStatus { service, raw })
    }

    /// Diagnostic dump of the tunnel, routing and firewall state
    ///
    /// A failing section records its error and the report continues.
    pub async fn get_system_report(&mut self) -> Result<String, ProvisionError> {
        self.detect_protocol().await?;
        let layout = InterfaceLayout::primary(self.protocol);
        let sections = [
            (
                "Service Status",
                format!("systemctl status {} --no-pager", layout.unit()),
            ),
            ("Tunnel Status", format!("{} show all", layout.tool)),
            ("Interfaces", "ip addr".to_string()),
            ("Routes", "ip route".to_string()),
            ("IP Forwarding", "sysctl net.ipv4.ip_forward".to_string()),
            ("UFW Status", "ufw status verbose".to_string()),
            ("IPTables NAT", "iptables -t nat -S".to_string()),
            ("IPTables Filter", "iptables -S".to_string()),
            ("IP6Tables NAT", "ip6tables -t nat -S".to_string()),
            (
                "Sysctl Conf",
                "cat /etc/sysctl.d/99-vpn-wizard.conf || echo 'missing'".to_string(),
            ),
            (
                "UFW Before Rules",
                "tail -n 20 /etc/ufw/before.rules".to_string(),
            ),
            (
                "Journal Log",
                format!("journalctl -u {} -n 50 --no-pager", layout.unit()),
            ),
            ("Ping 1.1.1.1", "ping -c 3 1.1.1.1 || echo 'failed'".to_string()),
        ];

        let mut report = String::from(REPORT_HEADER);
        report.push('\n');
        for (title, command) in sections {
            let body = match self
                .exec
                .execute(&RemoteCommand::shell(command).sudo().allow_failure())
                .await
            {
                Ok(output) => output.text(),
                Err(e) => format!("Error running command: {}", e),
            };
            report.push_str(&format!("\n--- {} ---\n{}\n", title, body));
        }
        Ok(report)
    }

    /// Elevated probe whose exit code is ignored; returns trimmed output
    async fn probe(&self, command: &str) -> Result<String, CommandError> {
        self.exec
            .run(RemoteCommand::shell(command).sudo().allow_failure())
            .await
    }
}
