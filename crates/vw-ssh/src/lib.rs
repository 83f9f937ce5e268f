//! vw-ssh: SSH remote execution channel for VPN Wizard
//!
//! Implements [`vw_core::RemoteExec`] over an SSH session: one exec channel
//! per command, optional sudo elevation with a piped password, and
//! redaction of that password from everything captured.

pub mod command;
pub mod reconnect;
pub mod session;

pub use reconnect::ExponentialBackoff;
pub use session::{SshError, SshSession};
