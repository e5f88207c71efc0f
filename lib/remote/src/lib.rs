//! Remote command sessions for boardflow.
//!
//! A session is one authenticated command channel to one remote host:
//!
//! - **Descriptor**: where to connect and how to authenticate
//! - **Session**: run a command, get back exit code, stdout and stderr
//! - **SSH**: the production transport, built on russh

pub mod descriptor;
pub mod error;
pub mod session;
pub mod ssh;

pub use descriptor::{ConnectionDescriptor, Credential};
pub use error::SessionError;
pub use session::{CommandOutput, RemoteSession, SessionConnector};
pub use ssh::{SshConfig, SshConnector};
