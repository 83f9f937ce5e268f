//! Remote execution contract

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::CommandError;
use crate::script::Script;

/// A command to run on the remote host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    /// What to run
    pub script: Script,
    /// Run with superuser privileges
    pub elevated: bool,
    /// Fail with [`CommandError::Failed`] on a nonzero exit
    pub check: bool,
    /// Request a terminal for the command
    pub interactive: bool,
}

impl RemoteCommand {
    /// Unprivileged command that must succeed
    pub fn new(script: Script) -> Self {
        Self {
            script,
            elevated: false,
            check: true,
            interactive: false,
        }
    }

    /// Shorthand for a fixed-shape shell command
    pub fn shell(text: impl Into<String>) -> Self {
        Self::new(Script::Shell(text.into()))
    }

    /// Run with superuser privileges
    pub fn sudo(mut self) -> Self {
        self.elevated = true;
        self
    }

    /// Report a nonzero exit in the output instead of failing
    pub fn allow_failure(mut self) -> Self {
        self.check = false;
        self
    }

    /// Request a terminal
    pub fn with_pty(mut self) -> Self {
        self.interactive = true;
        self
    }

    /// Shell text sent to the host
    pub fn render(&self) -> String {
        self.script.render()
    }

    /// One-line description safe to log
    pub fn summary(&self) -> String {
        self.script.summary()
    }
}

impl From<Script> for RemoteCommand {
    fn from(script: Script) -> Self {
        Self::new(script)
    }
}

/// Captured result of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: u32,
}

impl CommandOutput {
    /// Output of a command that exited zero with the given stdout
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    /// Trimmed stdout, or trimmed stderr when stdout is empty
    pub fn text(&self) -> String {
        let out = self.stdout.trim();
        if out.is_empty() {
            self.stderr.trim().to_string()
        } else {
            out.to_string()
        }
    }

    /// Whether the command exited zero
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a nonzero exit into [`CommandError::Failed`]
    pub fn into_checked(self, command: &RemoteCommand) -> Result<Self, CommandError> {
        if self.succeeded() {
            return Ok(self);
        }
        Err(CommandError::Failed {
            command: command.summary(),
            exit_code: self.exit_code,
            stdout: self.stdout.trim().to_string(),
            stderr: self.stderr.trim().to_string(),
        })
    }
}

/// A channel that executes commands on one remote host
///
/// Implementations run one command at a time in request/response fashion.
/// Closing the underlying transport must make in-flight and later calls
/// fail with [`CommandError::Channel`].
#[async_trait]
pub trait RemoteExec: Send + Sync {
    /// Run a command; fails on nonzero exit when `command.check` is set
    async fn execute(&self, command: &RemoteCommand) -> Result<CommandOutput, CommandError>;

    /// Run a command and return [`CommandOutput::text`]
    async fn run(&self, command: RemoteCommand) -> Result<String, CommandError> {
        Ok(self.execute(&command).await?.text())
    }

    /// Whether elevation is backed by a configured password
    fn uses_password(&self) -> bool {
        false
    }

    /// Host name or address the channel is connected to
    fn host(&self) -> &str;
}

#[async_trait]
impl<T: RemoteExec + ?Sized> RemoteExec for Arc<T> {
    async fn execute(&self, command: &RemoteCommand) -> Result<CommandOutput, CommandError> {
        (**self).execute(command).await
    }

    fn uses_password(&self) -> bool {
        (**self).uses_password()
    }

    fn host(&self) -> &str {
        (**self).host()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_prefers_stdout() {
        let out = CommandOutput {
            stdout: "  active\n".into(),
            stderr: "warning".into(),
            exit_code: 0,
        };
        assert_eq!(out.text(), "active");

        let out = CommandOutput {
            stdout: "\n".into(),
            stderr: "inactive\n".into(),
            exit_code: 3,
        };
        assert_eq!(out.text(), "inactive");
    }

    #[test]
    fn test_builder_flags() {
        let cmd = RemoteCommand::shell("sysctl --system").sudo().allow_failure();
        assert!(cmd.elevated);
        assert!(!cmd.check);
        assert!(!cmd.interactive);
        assert_eq!(cmd.render(), "sysctl --system");
    }

    #[test]
    fn test_into_checked_reports_summary() {
        let cmd = RemoteCommand::new(Script::WriteFile {
            path: "/etc/wireguard/wg0.conf".into(),
            contents: "PrivateKey = secret".into(),
            mode: 0o600,
        });
        let out = CommandOutput {
            stdout: String::new(),
            stderr: "Permission denied\n".into(),
            exit_code: 1,
        };
        let err = out.into_checked(&cmd).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("write /etc/wireguard/wg0.conf"));
        assert!(text.contains("Permission denied"));
        assert!(!text.contains("secret"));
    }
}
