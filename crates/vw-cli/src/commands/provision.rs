//! Provisioning and health check commands

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use vw_core::{CheckResult, ExportedClient, RemoteExec};
use vw_provision::{critical_failures, Provisioner};

use super::clients::write_client_config;
use crate::output::{format_checks, print_info, print_json, print_success, print_warning};

#[derive(Serialize)]
struct ProvisionReport<'a> {
    protocol: String,
    pre_check: &'a [CheckResult],
    post_check: &'a [CheckResult],
    client: &'a ExportedClient,
}

/// Pre-check, provision, post-check and print the first client config
///
/// Refuses to touch the host when a critical pre-check fails unless
/// `force` is set.
pub async fn provision_command<R: RemoteExec>(
    prov: &mut Provisioner<R>,
    force: bool,
    output: Option<&Path>,
    json: bool,
) -> Result<()> {
    let pre = prov.pre_check().await.context("Pre-check failed")?;
    if !json {
        println!("{}", format_checks(&pre));
    }

    let blocking = critical_failures(&pre);
    if !blocking.is_empty() {
        if !force {
            anyhow::bail!(
                "Critical checks failed: {} (use --force to provision anyway)",
                blocking.join(", ")
            );
        }
        print_warning(&format!("Ignoring failed checks: {}", blocking.join(", ")));
    }

    if !json {
        print_info(&format!(
            "Provisioning {} on {}...",
            prov.protocol(),
            prov.exec().host()
        ));
    }
    prov.provision().await.context("Provisioning failed")?;

    let post = prov.post_check().await.context("Post-check failed")?;
    let name = prov.params().client_name.clone();
    let client = prov
        .export_client(&name)
        .await
        .with_context(|| format!("Failed to read client '{}'", name))?;

    if let Some(path) = output {
        write_client_config(path, &client.config)?;
    }

    if json {
        return print_json(&ProvisionReport {
            protocol: prov.protocol().to_string(),
            pre_check: &pre,
            post_check: &post,
            client: &client,
        });
    }

    println!("{}", format_checks(&post));
    let failed: Vec<&str> = post
        .iter()
        .filter(|c| !c.ok)
        .map(|c| c.name.as_str())
        .collect();
    if !failed.is_empty() {
        print_warning(&format!(
            "Post-check failed: {}. Try 'vpn-wizard repair'",
            failed.join(", ")
        ));
    }
    print_success(&format!(
        "Server provisioned, client '{}' at {}",
        client.name, client.address
    ));
    match output {
        Some(path) => print_success(&format!("Client config written to {:?}", path)),
        None => println!("\n{}", client.config),
    }
    Ok(())
}

/// Run the pre-provisioning checks
pub async fn precheck_command<R: RemoteExec>(prov: &Provisioner<R>, json: bool) -> Result<()> {
    let checks = prov.pre_check().await?;
    if json {
        return print_json(&checks);
    }
    println!("{}", format_checks(&checks));
    let blocking = critical_failures(&checks);
    if blocking.is_empty() {
        print_success("Host is ready to provision");
    } else {
        print_warning(&format!("Critical checks failed: {}", blocking.join(", ")));
    }
    Ok(())
}

/// Verify a provisioned host
pub async fn postcheck_command<R: RemoteExec>(prov: &mut Provisioner<R>, json: bool) -> Result<()> {
    let checks = prov.post_check().await?;
    if json {
        return print_json(&checks);
    }
    println!("{}", format_checks(&checks));
    if checks.iter().all(|c| c.ok) {
        print_success("Tunnel is up");
    } else {
        print_warning("Some checks failed. Try 'vpn-wizard repair'");
    }
    Ok(())
}
