//! Error types for the flow crate.
//!
//! Errors are split by how far they propagate:
//! - `NodeError`: expected, node-local failures. Handlers turn these into
//!   `success: false` outcomes; they halt only the path through that node.
//! - `GraphError`: malformed graphs. Aborts the run.
//! - `FlowError`: anything that aborts a run (graph or authorization).
//! - `StoreError`: failures reported by flow storage or the device registry.
//! - `ServiceError`: failures returned to callers of `FlowRunner`, wrapped
//!   in a rootcause `Report`.

use crate::node::NodeId;
use boardflow_core::{DeviceId, FlowId};
use boardflow_remote::SessionError;
use std::fmt;

/// Errors from graph structure checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The flow has no start node.
    MissingStart,
    /// The flow has more than one start node.
    MultipleStarts { count: usize },
    /// Two nodes share the same id.
    DuplicateNode { node_id: NodeId },
    /// A node id would collide with another node's derived result keys.
    ReservedNodeId { node_id: NodeId },
    /// An edge points at a node that does not exist.
    DanglingEdge { edge_id: String, target: NodeId },
    /// The graph contains a directed cycle.
    CycleDetected,
    /// The walk went deeper than the configured limit.
    DepthExceeded { limit: usize },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingStart => write!(f, "flow has no start node"),
            Self::MultipleStarts { count } => {
                write!(f, "flow has {count} start nodes, expected exactly one")
            }
            Self::DuplicateNode { node_id } => write!(f, "duplicate node id: {node_id}"),
            Self::ReservedNodeId { node_id } => {
                write!(f, "node id {node_id} ends with a reserved result suffix")
            }
            Self::DanglingEdge { edge_id, target } => {
                write!(f, "edge {edge_id} targets missing node {target}")
            }
            Self::CycleDetected => write!(f, "flow graph contains a cycle"),
            Self::DepthExceeded { limit } => {
                write!(f, "flow walk exceeded the maximum depth of {limit}")
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// Node-local failures, recorded as the node's outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// A required parameter is missing or malformed.
    Validation { reason: String },
    /// The node needs a remote session but none is open on this path.
    NoActiveSession,
    /// Opening the remote session failed.
    Connection(SessionError),
    /// The remote session failed while running a command.
    Execution(SessionError),
    /// The referenced device is not registered.
    DeviceNotFound { device_id: DeviceId },
    /// The device registry could not be queried.
    DeviceLookupFailed { reason: String },
}

impl NodeError {
    /// Creates a validation error.
    #[must_use]
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation { reason } => write!(f, "{reason}"),
            Self::NoActiveSession => write!(
                f,
                "No active session. Add a Connect Remote Host node before this node."
            ),
            Self::Connection(e) => write!(f, "Connection failed: {e}"),
            Self::Execution(e) => write!(f, "Command execution failed: {e}"),
            Self::DeviceNotFound { device_id } => write!(f, "Device not found: {device_id}"),
            Self::DeviceLookupFailed { reason } => write!(f, "Device lookup failed: {reason}"),
        }
    }
}

impl std::error::Error for NodeError {}

/// Failures that abort a whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    /// The graph is malformed.
    Graph(GraphError),
    /// The flow's owner is not entitled to a referenced resource.
    Authorization { resource: String },
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Graph(e) => write!(f, "invalid flow graph: {e}"),
            Self::Authorization { resource } => write!(f, "access denied to {resource}"),
        }
    }
}

impl std::error::Error for FlowError {}

impl From<GraphError> for FlowError {
    fn from(e: GraphError) -> Self {
        Self::Graph(e)
    }
}

/// Errors reported by flow storage and the device registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The resource does not exist.
    NotFound { resource: String },
    /// The resource exists but belongs to another owner.
    AccessDenied { resource: String },
    /// The backing store failed.
    Backend { details: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { resource } => write!(f, "{resource} not found"),
            Self::AccessDenied { resource } => write!(f, "access denied to {resource}"),
            Self::Backend { details } => write!(f, "store error: {details}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors returned by `FlowRunner` operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// A run of this flow is already in progress.
    AlreadyRunning { flow_id: FlowId },
    /// The flow does not exist.
    FlowNotFound { flow_id: FlowId },
    /// The caller does not own the flow.
    AccessDenied { flow_id: FlowId },
    /// Flow storage failed.
    Store { details: String },
}

impl ServiceError {
    /// Maps a storage error for the given flow.
    #[must_use]
    pub fn from_store(flow_id: FlowId, err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::FlowNotFound { flow_id },
            StoreError::AccessDenied { .. } => Self::AccessDenied { flow_id },
            StoreError::Backend { details } => Self::Store { details },
        }
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning { flow_id } => write!(f, "flow {flow_id} is already running"),
            Self::FlowNotFound { flow_id } => write!(f, "flow not found: {flow_id}"),
            Self::AccessDenied { flow_id } => write!(f, "access denied to flow {flow_id}"),
            Self::Store { details } => write!(f, "flow storage failed: {details}"),
        }
    }
}

impl std::error::Error for ServiceError {}
