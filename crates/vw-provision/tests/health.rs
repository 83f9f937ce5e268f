mod common;

use std::sync::Arc;

use common::{provisioned, provisioner, FakeHost};
use vw_core::Protocol;
use vw_provision::critical_failures;

fn by_name<'a>(checks: &'a [vw_core::CheckResult], name: &str) -> &'a vw_core::CheckResult {
    checks
        .iter()
        .find(|c| c.name == name)
        .unwrap_or_else(|| panic!("no {} check", name))
}

#[tokio::test]
async fn test_pre_check_on_fresh_host() {
    let host = Arc::new(FakeHost::debian());
    host.respond_text("ping -c 1", "ok");
    host.respond_text("id -u", "ok");
    host.respond_text("ss -lun", "free");
    let prov = provisioner(host, Protocol::WireGuard);

    let checks = prov.pre_check().await.unwrap();
    let names: Vec<&str> = checks.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        names,
        ["os_supported", "ping", "sudo", "port_available", "server_conf_exists"]
    );
    assert!(checks.iter().all(|c| c.ok), "{:?}", checks);
    assert_eq!(by_name(&checks, "sudo").details, "passwordless");
    assert_eq!(by_name(&checks, "server_conf_exists").details, "missing");
    assert!(critical_failures(&checks).is_empty());
}

#[tokio::test]
async fn test_pre_check_reports_every_failure() {
    let host = Arc::new(FakeHost::new());
    host.set_file("/etc/os-release", "ID=arch\nNAME=\"Arch Linux\"\n");
    host.respond_text("ping -c 1", "fail");
    host.respond_text("id -u", "fail");
    host.respond_text("ss -lun", "busy");
    let prov = provisioner(host, Protocol::WireGuard);

    let checks = prov.pre_check().await.unwrap();
    assert_eq!(checks.len(), 5);
    let os = by_name(&checks, "os_supported");
    assert!(!os.ok);
    assert!(os.details.contains("arch"));
    assert!(!by_name(&checks, "ping").ok);
    assert_eq!(by_name(&checks, "sudo").details, "sudo requires password");
    assert_eq!(
        critical_failures(&checks),
        ["os_supported", "sudo", "port_available"]
    );
}

#[tokio::test]
async fn test_pre_check_flags_existing_server_config() {
    let (host, _) = provisioned(Protocol::WireGuard).await;
    let prov = provisioner(host, Protocol::WireGuard);

    let checks = prov.pre_check().await.unwrap();
    let conf = by_name(&checks, "server_conf_exists");
    assert!(!conf.ok);
    assert_eq!(conf.details, "present");
    // soft check
    assert!(!critical_failures(&checks).contains(&"server_conf_exists".to_string()));
}

#[tokio::test]
async fn test_post_check_on_running_tunnel() {
    let (host, mut prov) = provisioned(Protocol::AmneziaWg).await;
    host.respond_text("systemctl is-active", "active");
    host.respond_text("ip link show", "ok");
    host.respond_text("sysctl -n net.ipv4.ip_forward", "1");
    host.respond_text("ss -lun", "busy");

    let checks = prov.post_check().await.unwrap();
    let names: Vec<&str> = checks.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["service_active", "interface", "ip_forward", "udp_listen"]);
    assert!(checks.iter().all(|c| c.ok), "{:?}", checks);
    assert!(host.ran("systemctl is-active awg-quick@awg0"));
    assert!(host.ran("ip link show awg0"));
    assert!(host.ran(":51820$"));
}

#[tokio::test]
async fn test_post_check_reports_stopped_service() {
    let (host, mut prov) = provisioned(Protocol::WireGuard).await;
    host.respond_text("systemctl is-active", "inactive");
    host.respond_text("ip link show", "missing");
    host.respond_text("sysctl -n net.ipv4.ip_forward", "0");
    host.respond_text("ss -lun", "free");

    let checks = prov.post_check().await.unwrap();
    assert!(checks.iter().all(|c| !c.ok));
    assert_eq!(by_name(&checks, "service_active").details, "inactive");
}

#[tokio::test]
async fn test_status_reports_service_and_dump() {
    let (host, mut prov) = provisioned(Protocol::WireGuard).await;
    host.respond_text("systemctl is-active", "active");
    host.respond_text("wg show wg0", "interface: wg0\n  listening port: 51820");

    let status = prov.status().await.unwrap();
    assert_eq!(status.service, "active");
    assert!(status.raw.contains("listening port: 51820"));
}

#[tokio::test]
async fn test_system_report_continues_past_failures() {
    let (host, mut prov) = provisioned(Protocol::WireGuard).await;
    host.respond_text("ip route", "default via 203.0.113.1 dev ens3");
    host.respond_failure("ufw status", 1, "ufw: command not found");

    let report = prov.get_system_report().await.unwrap();
    assert!(report.starts_with("=== VPN WIZARD DIAGNOSTIC REPORT ===\n"));
    for title in [
        "Service Status",
        "Tunnel Status",
        "Routes",
        "UFW Status",
        "Journal Log",
        "Ping 1.1.1.1",
    ] {
        assert!(report.contains(&format!("--- {} ---", title)), "{}", title);
    }
    assert!(report.contains("default via 203.0.113.1 dev ens3"));
    assert!(report.contains("ufw: command not found"));
    assert!(host.ran("journalctl -u wg-quick@wg0 -n 50 --no-pager"));
}
