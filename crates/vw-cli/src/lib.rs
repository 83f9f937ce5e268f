//! vw-cli: Command-line interface for VPN Wizard
//!
//! Provides the `vpn-wizard` CLI, a thin front end that maps each
//! subcommand onto one provisioner operation against a host reached over SSH.

pub mod commands;
pub mod output;
pub mod settings;
