//! VPN Wizard CLI
//!
//! Provisions a WireGuard or AmneziaWG server on a remote Linux host over
//! SSH and manages its clients.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vpn_wizard::commands;
use vpn_wizard::settings::{self, ConnectionArgs, ProvisionArgs};
use vw_provision::Provisioner;
use vw_ssh::SshSession;

#[derive(Parser)]
#[command(name = "vpn-wizard")]
#[command(author, version, about = "Provision WireGuard and AmneziaWG servers over SSH")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(flatten)]
    provision: ProvisionArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Remote(ServerCommand),

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Operations against the server
#[derive(Subcommand)]
enum ServerCommand {
    /// Install and configure the tunnel, then create the first client
    Provision {
        /// Provision even when critical pre-checks fail
        #[arg(short, long)]
        force: bool,
        /// Write the client config to a file instead of printing it
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check that the host can be provisioned
    Precheck,

    /// Check that the tunnel is running
    Postcheck,

    /// Show service state and tunnel status
    Status,

    /// Manage clients
    Clients {
        #[command(subcommand)]
        action: ClientsAction,
    },

    /// Back up the interface config
    Backup,

    /// Restore the newest interface config backup
    Rollback {
        /// Target the secondary AmneziaWG interface
        #[arg(long)]
        secondary: bool,
    },

    /// Rewrite the peer list from the stored clients
    Rebuild {
        /// Target the secondary AmneziaWG interface
        #[arg(long)]
        secondary: bool,
    },

    /// Restore forwarding and NAT rules
    Repair,

    /// Collect a diagnostic report
    Report {
        /// Write the report to a file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ClientsAction {
    /// List clients with live statistics
    #[command(alias = "ls")]
    List,
    /// Add a client
    Add {
        /// Client name (generated when omitted)
        name: Option<String>,
        /// Client address (next free address when omitted)
        #[arg(long)]
        address: Option<String>,
        /// Write the client config to a file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Remove a client
    #[command(alias = "rm")]
    Remove { name: String },
    /// Issue new keys for a client, keeping its address
    Rotate {
        name: String,
        /// Write the client config to a file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print a client config
    Export {
        name: String,
        /// Write the client config to a file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Show config file path
    Path,
    /// Create a starter config file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    let command = match cli.command {
        Commands::Config { action } => {
            match action {
                ConfigAction::Show => {
                    commands::config_show(cli.config.as_ref(), &cli.connection, &cli.provision)?;
                }
                ConfigAction::Path => commands::config_path(cli.config.as_ref()),
                ConfigAction::Init { force } => {
                    commands::config_init(cli.config.as_ref(), force)?;
                }
            }
            return Ok(());
        }
        Commands::Remote(command) => command,
    };

    let settings = settings::resolve(cli.config.as_ref(), &cli.connection, &cli.provision)?;
    settings::validate(&settings)?;

    let address = settings.connection.address();
    let session = SshSession::connect(settings.connection)
        .await
        .with_context(|| format!("Failed to connect to {}", address))?;
    let mut prov = Provisioner::new(session, settings.provision);

    let result = run_remote(command, &mut prov, cli.json).await;

    if let Err(e) = prov.into_exec().close().await {
        tracing::warn!("Failed to close SSH session: {}", e);
    }
    result
}

async fn run_remote(
    command: ServerCommand,
    prov: &mut Provisioner<SshSession>,
    json: bool,
) -> Result<()> {
    match command {
        ServerCommand::Provision { force, output } => {
            commands::provision_command(prov, force, output.as_deref(), json).await
        }
        ServerCommand::Precheck => commands::precheck_command(prov, json).await,
        ServerCommand::Postcheck => commands::postcheck_command(prov, json).await,
        ServerCommand::Status => commands::status_command(prov, json).await,
        ServerCommand::Clients { action } => match action {
            ClientsAction::List => commands::list_command(prov, json).await,
            ClientsAction::Add {
                name,
                address,
                output,
            } => {
                commands::add_command(
                    prov,
                    name.as_deref(),
                    address.as_deref(),
                    output.as_deref(),
                    json,
                )
                .await
            }
            ClientsAction::Remove { name } => commands::remove_command(prov, &name, json).await,
            ClientsAction::Rotate { name, output } => {
                commands::rotate_command(prov, &name, output.as_deref(), json).await
            }
            ClientsAction::Export { name, output } => {
                commands::export_command(prov, &name, output.as_deref(), json).await
            }
        },
        ServerCommand::Backup => commands::backup_command(prov, json).await,
        ServerCommand::Rollback { secondary } => {
            commands::rollback_command(prov, secondary, json).await
        }
        ServerCommand::Rebuild { secondary } => commands::rebuild_command(prov, secondary).await,
        ServerCommand::Repair => commands::repair_command(prov, json).await,
        ServerCommand::Report { output } => commands::report_command(prov, output.as_deref()).await,
    }
}
