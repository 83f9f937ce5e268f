//! SSH session implementing the remote execution channel

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::BytesMut;
use russh::client::{self, Config, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use thiserror::Error;

use vw_core::config::ConnectionConfig;
use vw_core::{CommandError, CommandOutput, RemoteCommand, RemoteExec};

use crate::command::{self, Elevation};
use crate::reconnect::ExponentialBackoff;

/// Connection failures
#[derive(Debug, Error)]
pub enum SshError {
    /// Private key could not be read
    #[error("Private key not usable at {path}: {source}")]
    KeyNotFound {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    /// Neither a password nor a key was configured
    #[error("No credentials configured: set a password or a private key path")]
    NoCredentials,

    /// The server refused the credentials
    #[error("Authentication rejected for user '{0}'")]
    AuthRejected(String),

    /// The server's host key does not match the pinned fingerprint
    #[error("Host key verification failed: {0}")]
    HostKeyRejected(String),

    /// Connect did not finish within the configured timeout
    #[error("Connection to {0} timed out")]
    Timeout(String),

    /// Other transport error
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl SshError {
    /// Whether another attempt could succeed
    fn is_transient(&self) -> bool {
        matches!(self, SshError::Timeout(_) | SshError::Other(_))
    }
}

/// An authenticated SSH session to the provisioning target
pub struct SshSession {
    config: ConnectionConfig,
    handle: Handle<SshHandler>,
}

impl SshSession {
    /// Connect, retrying transient failures with exponential backoff
    ///
    /// Authentication and host key failures are returned immediately.
    pub async fn connect(config: ConnectionConfig) -> Result<Self, SshError> {
        let mut backoff = ExponentialBackoff::from_config(&config.backoff);
        loop {
            match Self::try_connect(&config).await {
                Ok(session) => {
                    tracing::info!("Connected to {}", config.address());
                    return Ok(session);
                }
                Err(e) if e.is_transient() => match backoff.next_delay() {
                    Some(delay) => {
                        tracing::warn!("Connection failed: {}. Retrying in {:?}", e, delay);
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_connect(config: &ConnectionConfig) -> Result<Self, SshError> {
        let ssh_config = Arc::new(Config::default());
        let rejected = Arc::new(AtomicBool::new(false));
        let handler = SshHandler {
            expected_host_key: config.host_key.clone(),
            rejected: Arc::clone(&rejected),
        };

        let address = config.address();
        tracing::debug!("Connecting to {}", address);
        let mut handle = tokio::time::timeout(
            config.timeout,
            client::connect(ssh_config, (config.host.as_str(), config.port), handler),
        )
        .await
        .map_err(|_| SshError::Timeout(address.clone()))?
        .map_err(|e| {
            if rejected.load(Ordering::SeqCst) {
                SshError::HostKeyRejected(format!(
                    "{} does not present the pinned host key",
                    address
                ))
            } else {
                SshError::Other(anyhow!("Failed to connect to {}: {}", address, e))
            }
        })?;

        tracing::debug!("Authenticating as user '{}'", config.user);
        let authenticated = if let Some(key_path) = &config.key_path {
            let key = russh_keys::load_secret_key(key_path, None).map_err(|e| {
                SshError::KeyNotFound {
                    path: key_path.display().to_string(),
                    source: anyhow!("Failed to load key: {}", e),
                }
            })?;
            handle
                .authenticate_publickey(&config.user, Arc::new(key))
                .await
                .map_err(|e| anyhow!("Authentication error: {}", e))?
        } else if let Some(password) = &config.password {
            handle
                .authenticate_password(&config.user, password)
                .await
                .map_err(|e| anyhow!("Authentication error: {}", e))?
        } else {
            return Err(SshError::NoCredentials);
        };

        if !authenticated {
            return Err(SshError::AuthRejected(config.user.clone()));
        }

        Ok(Self {
            config: config.clone(),
            handle,
        })
    }

    /// Disconnect from the server
    pub async fn close(self) -> anyhow::Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "closing", "en")
            .await?;
        Ok(())
    }

    async fn run(&self, command: &RemoteCommand) -> Result<CommandOutput, CommandError> {
        let elevation = Elevation::select(
            command.elevated,
            self.config.is_root(),
            self.config.password.is_some(),
        );
        let line = command::wrap(&command.render(), elevation);

        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| CommandError::Channel(format!("Failed to open channel: {}", e)))?;

        if command::wants_pty(command.interactive, elevation) {
            channel
                .request_pty(false, "xterm", 200, 50, 0, 0, &[])
                .await
                .map_err(|e| CommandError::Channel(format!("PTY request failed: {}", e)))?;
        }

        channel
            .exec(true, line)
            .await
            .map_err(|e| CommandError::Channel(format!("Exec failed: {}", e)))?;

        if elevation == Elevation::Password {
            let mut secret = BytesMut::new();
            if let Some(password) = &self.config.password {
                secret.extend_from_slice(password.as_bytes());
            }
            secret.extend_from_slice(b"\n");
            channel
                .data(&secret[..])
                .await
                .map_err(|e| CommandError::Channel(format!("Failed to send password: {}", e)))?;
        }
        channel
            .eof()
            .await
            .map_err(|e| CommandError::Channel(format!("Failed to close stdin: {}", e)))?;

        let mut stdout = BytesMut::new();
        let mut stderr = BytesMut::new();
        let mut exit_code = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status),
                _ => {}
            }
        }

        let exit_code = exit_code.ok_or_else(|| {
            CommandError::Channel(format!(
                "Channel closed without exit status: {}",
                command.summary()
            ))
        })?;

        let secret = self.config.password.as_deref();
        Ok(CommandOutput {
            stdout: command::redact(&String::from_utf8_lossy(&stdout), secret),
            stderr: command::redact(&String::from_utf8_lossy(&stderr), secret),
            exit_code,
        })
    }
}

#[async_trait]
impl RemoteExec for SshSession {
    async fn execute(&self, command: &RemoteCommand) -> Result<CommandOutput, CommandError> {
        tracing::debug!(elevated = command.elevated, "$ {}", command.summary());
        let output = self.run(command).await?;
        if output.exit_code != 0 {
            tracing::debug!("exit {}: {}", output.exit_code, output.stderr.trim());
        }
        if command.check {
            output.into_checked(command)
        } else {
            Ok(output)
        }
    }

    fn uses_password(&self) -> bool {
        self.config.password.is_some()
    }

    fn host(&self) -> &str {
        &self.config.host
    }
}

/// SSH client handler
struct SshHandler {
    /// Pinned fingerprint, with or without the `SHA256:` prefix
    expected_host_key: Option<String>,
    /// Set when the server key fails the pin
    rejected: Arc<AtomicBool>,
}

fn normalize_fingerprint(fingerprint: &str) -> &str {
    fingerprint.trim().trim_start_matches("SHA256:")
}

#[async_trait]
impl client::Handler for SshHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();

        match &self.expected_host_key {
            Some(expected)
                if normalize_fingerprint(expected) != normalize_fingerprint(&fingerprint) =>
            {
                tracing::error!(
                    "Host key mismatch: expected {}, got SHA256:{}",
                    expected,
                    normalize_fingerprint(&fingerprint)
                );
                self.rejected.store(true, Ordering::SeqCst);
                Ok(false)
            }
            Some(_) => {
                tracing::debug!("Host key verified against pinned fingerprint");
                Ok(true)
            }
            None => {
                tracing::info!(
                    "Accepting host key SHA256:{} (pin it with host_key to verify)",
                    normalize_fingerprint(&fingerprint)
                );
                Ok(true)
            }
        }
    }
}
