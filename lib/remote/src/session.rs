//! Session traits.
//!
//! The flow engine only sees these traits, so runs can be exercised in tests
//! without a reachable host.

use crate::descriptor::ConnectionDescriptor;
use crate::error::SessionError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    /// Process exit code; `-1` when the host never reported one.
    pub exit_code: i32,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

impl CommandOutput {
    /// Creates an output record.
    #[must_use]
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Returns true if the command exited with status 0.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// One live command channel to exactly one remote host.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Runs a command and waits for it to finish.
    ///
    /// Fails only for transport problems; a nonzero exit code is returned
    /// as a normal `CommandOutput`.
    async fn run(&self, command: &str) -> Result<CommandOutput, SessionError>;

    /// Releases the channel. Calling it again is a no-op.
    async fn close(&mut self) -> Result<(), SessionError>;

    /// The host this session is connected to.
    fn host(&self) -> &str;
}

/// Opens sessions from connection descriptors.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Opens and authenticates a new session.
    async fn open(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn RemoteSession>, SessionError>;
}
