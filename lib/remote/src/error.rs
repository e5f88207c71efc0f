//! Error types for remote sessions.
//!
//! Failures split into two groups that callers treat differently:
//! - connection failures while opening a session (host unreachable,
//!   authentication rejected or interrupted, bad key material, connect
//!   timeout)
//! - execution failures on an open session (channel dropped, command
//!   timeout, session already closed)
//!
//! A nonzero exit code is never an error; it is part of `CommandOutput`.

use std::fmt;

/// Errors from remote session operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The host could not be reached or the SSH handshake failed.
    Unreachable { host: String, reason: String },
    /// The host rejected the supplied credentials.
    AuthenticationRejected { host: String, username: String },
    /// The transport failed during the authentication exchange.
    AuthenticationFailed { host: String, reason: String },
    /// The private key could not be decoded.
    InvalidKey { reason: String },
    /// Opening the session took longer than the configured limit.
    ConnectTimeout { host: String, seconds: u64 },
    /// The command channel failed mid-command.
    ChannelFailed { reason: String },
    /// The command did not finish within the configured limit.
    CommandTimeout { seconds: u64 },
    /// The session was already closed.
    Closed,
}

impl SessionError {
    /// Returns true if this error happened while establishing the session.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Unreachable { .. }
                | Self::AuthenticationRejected { .. }
                | Self::AuthenticationFailed { .. }
                | Self::InvalidKey { .. }
                | Self::ConnectTimeout { .. }
        )
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable { host, reason } => {
                write!(f, "failed to connect to {host}: {reason}")
            }
            Self::AuthenticationRejected { host, username } => {
                write!(f, "authentication rejected for {username}@{host}")
            }
            Self::AuthenticationFailed { host, reason } => {
                write!(f, "authentication with {host} failed: {reason}")
            }
            Self::InvalidKey { reason } => write!(f, "invalid private key: {reason}"),
            Self::ConnectTimeout { host, seconds } => {
                write!(f, "connection to {host} timed out after {seconds}s")
            }
            Self::ChannelFailed { reason } => write!(f, "command channel failed: {reason}"),
            Self::CommandTimeout { seconds } => {
                write!(f, "command timed out after {seconds}s")
            }
            Self::Closed => write!(f, "session is closed"),
        }
    }
}

impl std::error::Error for SessionError {}
