//! vw-core: Core abstractions and configuration for VPN Wizard
//!
//! This crate provides the shared domain types, the remote execution
//! contract, the typed remote script builder, and the configuration
//! structures used by the SSH channel, the provisioner, and the CLI.

pub mod config;
pub mod error;
pub mod script;
pub mod traits;
pub mod types;

pub use error::{CommandError, ConfigError, ProvisionError};
pub use script::{quote, Script};
pub use traits::{CommandOutput, RemoteCommand, RemoteExec};
pub use types::{
    AddedClient, CheckResult, ClientInfo, ClientName, ExportedClient, OsClass, Protocol,
    ServiceStatus,
};
