//! vw-provision: WireGuard and AmneziaWG provisioning orchestrator
//!
//! A [`Provisioner`] drives one remote host through a [`vw_core::RemoteExec`]
//! channel. All state lives in files on that host and is re-read on every
//! operation; the provisioner only memoizes the resolved MTU, the public IP
//! and the detected protocol variant.

pub mod firewall;
pub mod health;
pub mod install;
pub mod layout;
pub mod mtu;
pub mod obfuscation;
pub mod os;
pub mod registry;
pub mod render;
pub mod status;

mod clients;
mod provisioner;

pub use health::{critical_failures, CRITICAL_CHECKS};
pub use layout::{InterfaceLayout, Slot};
pub use obfuscation::ObfuscationParams;
pub use provisioner::Provisioner;
