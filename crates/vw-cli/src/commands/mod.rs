//! CLI command implementations

mod clients;
mod config;
mod maintenance;
mod provision;

pub use clients::{
    add_command, export_command, list_command, remove_command, rotate_command,
    write_client_config,
};
pub use config::{config_init, config_path, config_show};
pub use maintenance::{
    backup_command, rebuild_command, repair_command, report_command, rollback_command,
    status_command,
};
pub use provision::{postcheck_command, precheck_command, provision_command};
