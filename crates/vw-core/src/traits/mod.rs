//! Core trait definitions

mod remote;

pub use remote::{CommandOutput, RemoteCommand, RemoteExec};
