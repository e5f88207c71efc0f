//! SSH sessions built on russh.
//!
//! Each session holds one authenticated connection; every command opens a
//! fresh exec channel on it, so commands on one session run strictly one
//! after another as the caller awaits them.

use crate::descriptor::{ConnectionDescriptor, Credential};
use crate::error::SessionError;
use crate::session::{CommandOutput, RemoteSession, SessionConnector};
use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Extended data stream number carrying stderr.
const STDERR_STREAM: u32 = 1;

/// Timeouts applied to SSH sessions.
#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    /// Upper bound on TCP connect plus handshake plus authentication.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Upper bound on a single remote command.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Idle connections are dropped after this many seconds.
    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_command_timeout_secs() -> u64 {
    30
}

fn default_inactivity_timeout_secs() -> u64 {
    300
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            command_timeout_secs: default_command_timeout_secs(),
            inactivity_timeout_secs: default_inactivity_timeout_secs(),
        }
    }
}

/// Client handler that accepts the server's host key.
///
/// Devices are boards the owner registered by address, so there is no
/// known_hosts file to check against; the fingerprint is logged instead.
struct AcceptingHandler {
    host: String,
}

#[async_trait]
impl client::Handler for AcceptingHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            host = %self.host,
            fingerprint = %server_public_key.fingerprint(),
            "accepting host key"
        );
        Ok(true)
    }
}

/// Opens SSH sessions.
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    config: SshConfig,
}

impl SshConnector {
    /// Creates a connector with the given timeouts.
    #[must_use]
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Handle<AcceptingHandler>, SessionError> {
        let client_config = Arc::new(client::Config {
            inactivity_timeout: Some(Duration::from_secs(self.config.inactivity_timeout_secs)),
            ..Default::default()
        });
        let handler = AcceptingHandler {
            host: descriptor.host.clone(),
        };

        let mut handle = client::connect(
            client_config,
            (descriptor.host.as_str(), descriptor.port),
            handler,
        )
        .await
        .map_err(|e| SessionError::Unreachable {
            host: descriptor.host.clone(),
            reason: e.to_string(),
        })?;

        let authenticated = match &descriptor.credential {
            Credential::Password { password } => handle
                .authenticate_password(descriptor.username.as_str(), password.as_str())
                .await
                .map_err(|e| auth_failed(descriptor, e))?,
            Credential::PrivateKey { key, passphrase } => {
                let key_pair = russh_keys::decode_secret_key(key, passphrase.as_deref())
                    .map_err(|e| SessionError::InvalidKey {
                        reason: e.to_string(),
                    })?;
                handle
                    .authenticate_publickey(descriptor.username.as_str(), Arc::new(key_pair))
                    .await
                    .map_err(|e| auth_failed(descriptor, e))?
            }
        };

        if !authenticated {
            return Err(SessionError::AuthenticationRejected {
                host: descriptor.host.clone(),
                username: descriptor.username.clone(),
            });
        }

        Ok(handle)
    }
}

#[async_trait]
impl SessionConnector for SshConnector {
    #[instrument(skip(self, descriptor), fields(address = %descriptor.address(), username = %descriptor.username, method = descriptor.credential.method()))]
    async fn open(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn RemoteSession>, SessionError> {
        let limit = Duration::from_secs(self.config.connect_timeout_secs);
        let handle = tokio::time::timeout(limit, self.connect(descriptor))
            .await
            .map_err(|_| SessionError::ConnectTimeout {
                host: descriptor.host.clone(),
                seconds: self.config.connect_timeout_secs,
            })??;

        debug!("ssh session established");

        Ok(Box::new(SshSession {
            handle: Some(handle),
            host: descriptor.host.clone(),
            command_timeout_secs: self.config.command_timeout_secs,
        }))
    }
}

/// An authenticated SSH connection.
pub struct SshSession {
    handle: Option<Handle<AcceptingHandler>>,
    host: String,
    command_timeout_secs: u64,
}

impl SshSession {
    async fn exec(
        handle: &Handle<AcceptingHandler>,
        command: &str,
    ) -> Result<CommandOutput, SessionError> {
        let mut channel =
            handle
                .channel_open_session()
                .await
                .map_err(|e| SessionError::ChannelFailed {
                    reason: e.to_string(),
                })?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| SessionError::ChannelFailed {
                reason: e.to_string(),
            })?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;

        // Exit status may arrive before the remaining output, so drain
        // until the server closes the channel.
        while let Some(message) = channel.wait().await {
            match message {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext } if ext == STDERR_STREAM => {
                    stderr.extend_from_slice(data);
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    exit_code = Some(i32::try_from(exit_status).unwrap_or(i32::MAX));
                }
                _ => {}
            }
        }

        Ok(CommandOutput {
            exit_code: exit_code.unwrap_or(-1),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    #[instrument(skip(self), fields(host = %self.host))]
    async fn run(&self, command: &str) -> Result<CommandOutput, SessionError> {
        let handle = self.handle.as_ref().ok_or(SessionError::Closed)?;
        let limit = Duration::from_secs(self.command_timeout_secs);

        let output = tokio::time::timeout(limit, Self::exec(handle, command))
            .await
            .map_err(|_| SessionError::CommandTimeout {
                seconds: self.command_timeout_secs,
            })??;

        debug!(exit_code = output.exit_code, "remote command finished");
        Ok(output)
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        if let Err(e) = handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            // The peer may already have dropped the connection.
            warn!(host = %self.host, error = %e, "ssh disconnect failed");
        }
        Ok(())
    }

    fn host(&self) -> &str {
        &self.host
    }
}

fn auth_failed(descriptor: &ConnectionDescriptor, err: impl std::fmt::Display) -> SessionError {
    SessionError::AuthenticationFailed {
        host: descriptor.host.clone(),
        reason: err.to_string(),
    }
}
