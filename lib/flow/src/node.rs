//! Flow node types and their parameters.
//!
//! A node carries its kind and a loosely typed parameter object, exactly as
//! the editor saved it. Parameters are decoded into a typed `NodeAction` only
//! when the node is about to run, so a malformed node fails on its own path
//! instead of rejecting the whole graph.

use crate::error::NodeError;
use boardflow_core::DeviceId;
use boardflow_remote::{ConnectionDescriptor, Credential};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Highest BCM pin number on a 40-pin header.
pub const MAX_PIN: u8 = 27;

/// Highest hardware PWM duty cycle accepted by the `gpio` utility.
pub const MAX_DUTY_CYCLE: u16 = 1023;

/// Identifier of a node, unique within one flow.
///
/// Ids are chosen by the editor, so they are opaque strings rather than ULIDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Result key holding this node's status tag.
    #[must_use]
    pub fn status_key(&self) -> String {
        format!("{}_status", self.0)
    }

    /// Result key holding the outcome of loop iteration `n` (1-based).
    #[must_use]
    pub fn iteration_key(&self, n: u32) -> String {
        format!("{}_iteration_{n}", self.0)
    }

    /// Returns true if this id has the shape of a derived result key
    /// (`<id>_status` or `<id>_iteration_<n>`).
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        if self.0.ends_with("_status") {
            return true;
        }
        self.0
            .rsplit_once("_iteration_")
            .is_some_and(|(_, n)| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// The kind of a flow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    /// Entry point; exactly one per flow.
    Start,
    /// Terminal node; stops the current path.
    End,
    /// Opens a remote session, replacing any current one.
    ConnectRemoteHost,
    /// Runs a shell command on the current session.
    RunCommand,
    /// Drives a GPIO pin on the remote board.
    SetRemoteOutput,
    /// Repeats its body a fixed number of times.
    Loop,
    /// Evaluates a condition and follows the matching labeled edges.
    ConditionalBranch,
    /// Produces a text message outcome.
    SendTextMessage,
}

impl NodeKind {
    /// Returns the wire name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
            Self::ConnectRemoteHost => "connectRemoteHost",
            Self::RunCommand => "runCommand",
            Self::SetRemoteOutput => "setRemoteOutput",
            Self::Loop => "loop",
            Self::ConditionalBranch => "conditionalBranch",
            Self::SendTextMessage => "sendTextMessage",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node in a flow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier within the flow.
    pub id: NodeId,
    /// What the node does.
    pub kind: NodeKind,
    /// Kind-specific parameters as saved by the editor.
    #[serde(default)]
    pub parameters: JsonValue,
}

impl Node {
    /// Creates a node with no parameters.
    #[must_use]
    pub fn new(id: impl Into<NodeId>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            parameters: JsonValue::Object(serde_json::Map::new()),
        }
    }

    /// Replaces the node's parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: JsonValue) -> Self {
        self.parameters = parameters;
        self
    }

    /// Decodes the parameters into the typed action for this node's kind.
    ///
    /// # Errors
    ///
    /// Returns `NodeError::Validation` if the parameters do not match the kind.
    pub fn action(&self) -> Result<NodeAction, NodeError> {
        Ok(match self.kind {
            NodeKind::Start => NodeAction::Start,
            NodeKind::End => NodeAction::End,
            NodeKind::ConnectRemoteHost => NodeAction::Connect(self.decode()?),
            NodeKind::RunCommand => NodeAction::RunCommand(self.decode()?),
            NodeKind::SetRemoteOutput => NodeAction::SetOutput(self.decode()?),
            NodeKind::Loop => NodeAction::Loop(self.decode()?),
            NodeKind::ConditionalBranch => NodeAction::Branch(self.decode()?),
            NodeKind::SendTextMessage => NodeAction::SendMessage(self.decode()?),
        })
    }

    fn decode<T: DeserializeOwned>(&self) -> Result<T, NodeError> {
        let parameters = match &self.parameters {
            JsonValue::Null => JsonValue::Object(serde_json::Map::new()),
            other => other.clone(),
        };
        serde_json::from_value(parameters).map_err(|e| {
            NodeError::validation(format!("Invalid {} parameters: {e}", self.kind))
        })
    }
}

/// A node's decoded parameters, one variant per kind.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeAction {
    Start,
    End,
    Connect(ConnectParams),
    RunCommand(RunCommandParams),
    SetOutput(OutputParams),
    Loop(LoopParams),
    Branch(BranchParams),
    SendMessage(MessageParams),
}

/// Parameters for `ConnectRemoteHost`.
///
/// Either `device_id` names a registered device, or the connection details
/// are given inline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub device_id: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub private_key: Option<String>,
    pub passphrase: Option<String>,
}

/// Where a `ConnectRemoteHost` node gets its connection details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectTarget {
    /// A device from the registry.
    Device(DeviceId),
    /// Details given inline on the node.
    Inline(ConnectionDescriptor),
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

impl ConnectParams {
    /// Resolves the parameters into a connection target.
    ///
    /// # Errors
    ///
    /// Returns `NodeError::Validation` if neither a valid device id nor a
    /// complete inline descriptor is present.
    pub fn target(&self) -> Result<ConnectTarget, NodeError> {
        if let Some(raw) = non_empty(self.device_id.as_ref()) {
            let device_id = raw
                .parse::<DeviceId>()
                .map_err(|e| NodeError::validation(format!("Invalid device id: {e}")))?;
            return Ok(ConnectTarget::Device(device_id));
        }

        let host = non_empty(self.host.as_ref())
            .ok_or_else(|| NodeError::validation("Host is required"))?;
        let username = non_empty(self.username.as_ref())
            .ok_or_else(|| NodeError::validation("Username is required"))?;

        let credential = if let Some(key) = non_empty(self.private_key.as_ref()) {
            Credential::PrivateKey {
                key: key.to_string(),
                passphrase: self.passphrase.clone().filter(|p| !p.is_empty()),
            }
        } else if let Some(password) = self.password.as_ref() {
            Credential::password(password.clone())
        } else {
            return Err(NodeError::validation(
                "Either a password or a private key is required",
            ));
        };

        let mut descriptor = ConnectionDescriptor::new(host, username, credential);
        if let Some(port) = self.port {
            descriptor = descriptor.with_port(port);
        }
        Ok(ConnectTarget::Inline(descriptor))
    }
}

/// Parameters for `RunCommand`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCommandParams {
    #[serde(default)]
    pub command: String,
}

/// How a GPIO pin is driven.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputMode {
    /// High or low.
    #[default]
    Digital,
    /// Hardware PWM with a duty cycle.
    Pwm,
}

impl OutputMode {
    /// Returns the wire name of this mode.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Digital => "digital",
            Self::Pwm => "pwm",
        }
    }
}

/// Parameters for `SetRemoteOutput`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputParams {
    pub pin: Option<u8>,
    #[serde(default)]
    pub mode: OutputMode,
    #[serde(default)]
    pub state: bool,
    pub duty_cycle: Option<u16>,
}

/// Parameters for `Loop`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopParams {
    pub iterations: Option<u32>,
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default)]
    pub stop_on_error: bool,
}

/// String comparison applied to command output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Comparison {
    #[default]
    Contains,
    Equals,
    NotContains,
    NotEquals,
}

impl Comparison {
    /// Compares `actual` against `expected`.
    #[must_use]
    pub fn evaluate(&self, actual: &str, expected: &str) -> bool {
        match self {
            Self::Contains => actual.contains(expected),
            Self::Equals => actual == expected,
            Self::NotContains => !actual.contains(expected),
            Self::NotEquals => actual != expected,
        }
    }
}

/// A condition evaluated by `ConditionalBranch`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Condition {
    /// Compare a command's trimmed stdout against an expected string.
    #[serde(rename_all = "camelCase")]
    Command {
        command: String,
        #[serde(default)]
        operator: Comparison,
        #[serde(default)]
        expected: String,
    },
    /// Test whether a path exists on the remote host.
    FileExists { path: String },
    /// Read a pin and compare it to an expected level.
    Gpio { pin: u8, expected: bool },
}

/// Parameters for `ConditionalBranch`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchParams {
    pub condition: Condition,
}

/// Parameters for `SendTextMessage`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageParams {
    #[serde(default)]
    pub recipient: String,
    #[serde(default)]
    pub message: String,
}
