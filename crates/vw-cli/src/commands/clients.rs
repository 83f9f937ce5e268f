//! Client management commands

use std::path::Path;

use anyhow::{Context, Result};
use vw_core::{AddedClient, RemoteExec};
use vw_provision::Provisioner;

use crate::output::{format_clients, print_json, print_success, print_warning};

/// Save a client config locally, readable by the owner only
pub fn write_client_config(path: &Path, config: &str) -> Result<()> {
    std::fs::write(path, config)
        .with_context(|| format!("Failed to write client config: {:?}", path))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to restrict permissions of {:?}", path))?;
    }

    Ok(())
}

fn show_added(client: &AddedClient, verb: &str, output: Option<&Path>, json: bool) -> Result<()> {
    if let Some(path) = output {
        write_client_config(path, &client.config)?;
    }
    if json {
        return print_json(client);
    }
    print_success(&format!(
        "{} client '{}' at {} on {}",
        verb, client.name, client.address, client.interface
    ));
    match output {
        Some(path) => print_success(&format!("Client config written to {:?}", path)),
        None => println!("\n{}", client.config),
    }
    Ok(())
}

/// List clients with live statistics
pub async fn list_command<R: RemoteExec>(prov: &mut Provisioner<R>, json: bool) -> Result<()> {
    let clients = prov.list_clients().await?;
    if json {
        return print_json(&clients);
    }
    println!("{}", format_clients(&clients));
    Ok(())
}

/// Add a client, generating the name and address when not given
pub async fn add_command<R: RemoteExec>(
    prov: &mut Provisioner<R>,
    name: Option<&str>,
    address: Option<&str>,
    output: Option<&Path>,
    json: bool,
) -> Result<()> {
    let client = prov.add_client(name, address).await?;
    show_added(&client, "Added", output, json)
}

/// Remove a client and rebuild its interface
pub async fn remove_command<R: RemoteExec>(
    prov: &mut Provisioner<R>,
    name: &str,
    json: bool,
) -> Result<()> {
    let removed = prov.remove_client(name).await?;
    if json {
        return print_json(&serde_json::json!({ "name": name, "removed": removed }));
    }
    if removed {
        print_success(&format!("Removed client '{}'", name));
    } else {
        print_warning(&format!("No client named '{}'", name));
    }
    Ok(())
}

/// Issue fresh keys for a client, keeping its address
pub async fn rotate_command<R: RemoteExec>(
    prov: &mut Provisioner<R>,
    name: &str,
    output: Option<&Path>,
    json: bool,
) -> Result<()> {
    let client = prov.rotate_client(name).await?;
    show_added(&client, "Rotated", output, json)
}

/// Print or save a client's config
pub async fn export_command<R: RemoteExec>(
    prov: &mut Provisioner<R>,
    name: &str,
    output: Option<&Path>,
    json: bool,
) -> Result<()> {
    let client = prov.export_client(name).await?;
    if let Some(path) = output {
        write_client_config(path, &client.config)?;
    }
    if json {
        return print_json(&client);
    }
    match output {
        Some(path) => print_success(&format!("Client config written to {:?}", path)),
        None => print!("{}", client.config),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_client_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("laptop.conf");
        write_client_config(&path, "[Interface]\nPrivateKey = abc\n").unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "[Interface]\nPrivateKey = abc\n"
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
