//! Status, backup, rollback, repair and diagnostics commands

use std::path::Path;

use anyhow::{Context, Result};
use vw_core::RemoteExec;
use vw_provision::{Provisioner, Slot};

use crate::output::{print_info, print_json, print_success, print_warning};

fn slot(secondary: bool) -> Slot {
    if secondary {
        Slot::Secondary
    } else {
        Slot::Primary
    }
}

/// Show the service state and the tunnel status dump
pub async fn status_command<R: RemoteExec>(prov: &mut Provisioner<R>, json: bool) -> Result<()> {
    let status = prov.status().await?;
    if json {
        return print_json(&status);
    }
    if status.service == "active" {
        print_success(&format!("{} service is active", prov.protocol()));
    } else {
        print_warning(&format!("{} service is {}", prov.protocol(), status.service));
    }
    if !status.raw.is_empty() {
        println!("\n{}", status.raw);
    }
    Ok(())
}

/// Back up the active interface file
pub async fn backup_command<R: RemoteExec>(prov: &mut Provisioner<R>, json: bool) -> Result<()> {
    let backup = prov.backup_config().await?;
    if json {
        return print_json(&serde_json::json!({ "backup": backup }));
    }
    match backup {
        Some(path) => print_success(&format!("Backed up to {}", path)),
        None => print_warning("Nothing to back up: the interface is not provisioned"),
    }
    Ok(())
}

/// Restore the newest backup of an interface file
pub async fn rollback_command<R: RemoteExec>(
    prov: &mut Provisioner<R>,
    secondary: bool,
    json: bool,
) -> Result<()> {
    let restored = prov.rollback_interface(slot(secondary)).await?;
    if json {
        return print_json(&serde_json::json!({ "restored": restored }));
    }
    match restored {
        Some(path) => print_success(&format!("Restored {}", path)),
        None => print_warning("No backups found"),
    }
    Ok(())
}

/// Rewrite the peer list of an interface from the client files
pub async fn rebuild_command<R: RemoteExec>(
    prov: &mut Provisioner<R>,
    secondary: bool,
) -> Result<()> {
    prov.rebuild_interface(slot(secondary)).await?;
    print_success("Interface rebuilt and restart scheduled");
    Ok(())
}

/// Restore forwarding and NAT rules of the active interface
pub async fn repair_command<R: RemoteExec>(prov: &mut Provisioner<R>, json: bool) -> Result<()> {
    let steps = prov.repair_network().await?;
    if json {
        return print_json(&steps);
    }
    for step in &steps {
        print_info(step);
    }
    Ok(())
}

/// Collect the diagnostic report
pub async fn report_command<R: RemoteExec>(
    prov: &mut Provisioner<R>,
    output: Option<&Path>,
) -> Result<()> {
    let report = prov.get_system_report().await?;
    match output {
        Some(path) => {
            std::fs::write(path, &report)
                .with_context(|| format!("Failed to write report: {:?}", path))?;
            print_success(&format!("Report written to {:?}", path));
        }
        None => println!("{}", report),
    }
    Ok(())
}
