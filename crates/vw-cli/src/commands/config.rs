//! Config command implementations

use std::path::PathBuf;

use anyhow::Result;

use crate::output::{print_error, print_info, print_success, print_warning};
use crate::settings::{self, ConnectionArgs, ProvisionArgs};

/// Show the effective configuration: file values overlaid with flags
pub fn config_show(
    config_path: Option<&PathBuf>,
    connection: &ConnectionArgs,
    provision: &ProvisionArgs,
) -> Result<()> {
    let path = settings::config_path(config_path);
    if path.exists() {
        print_info(&format!("Configuration file: {:?}", path));
    } else {
        print_warning(&format!("No configuration file found at {:?}", path));
        print_info("Run 'vpn-wizard config init' to create one");
    }
    println!();

    let effective = settings::resolve(config_path, connection, provision)?;
    println!("{}", toml::to_string_pretty(&settings::redacted(&effective))?);
    Ok(())
}

/// Print the config file path in effect
pub fn config_path(config_path: Option<&PathBuf>) {
    println!("{}", settings::config_path(config_path).display());
}

/// Write the starter configuration
pub fn config_init(config_path: Option<&PathBuf>, force: bool) -> Result<()> {
    let path = settings::config_path(config_path);

    if path.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    settings::write_template(&path)?;
    print_success(&format!("Created configuration file: {:?}", path));
    print_info("Set connection.host and a password or key_path before provisioning");
    Ok(())
}
