//! Connection descriptors for remote hosts.
//!
//! Descriptors come either inline from a flow node or from the device
//! registry. Secrets never appear in `Debug` output or logs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default SSH port.
pub const DEFAULT_PORT: u16 = 22;

/// How to authenticate against the remote host.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Credential {
    /// Password authentication.
    Password { password: String },
    /// Public key authentication with a PEM/OpenSSH encoded private key.
    PrivateKey {
        #[serde(rename = "privateKey")]
        key: String,
        passphrase: Option<String>,
    },
}

impl Credential {
    /// Creates a password credential.
    #[must_use]
    pub fn password(password: impl Into<String>) -> Self {
        Self::Password {
            password: password.into(),
        }
    }

    /// Creates a private key credential without a passphrase.
    #[must_use]
    pub fn private_key(key: impl Into<String>) -> Self {
        Self::PrivateKey {
            key: key.into(),
            passphrase: None,
        }
    }

    /// Returns a short label for the authentication method.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::Password { .. } => "password",
            Self::PrivateKey { .. } => "publickey",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password { .. } => f.debug_struct("Password").finish_non_exhaustive(),
            Self::PrivateKey { passphrase, .. } => f
                .debug_struct("PrivateKey")
                .field("has_passphrase", &passphrase.is_some())
                .finish_non_exhaustive(),
        }
    }
}

/// Everything needed to open a session to one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDescriptor {
    /// Hostname or IP address.
    pub host: String,
    /// TCP port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Login name.
    pub username: String,
    /// Authentication secret.
    pub credential: Credential,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl ConnectionDescriptor {
    /// Creates a descriptor for the default SSH port.
    #[must_use]
    pub fn new(host: impl Into<String>, username: impl Into<String>, credential: Credential) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            username: username.into(),
            credential,
        }
    }

    /// Sets the port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Returns `host:port` for logging.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
