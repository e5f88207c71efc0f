//! Edge types for flow graphs.
//!
//! Edges are directed links between nodes. A label on the source side picks
//! which edges a branching node follows.

use crate::node::NodeId;
use serde::{Deserialize, Serialize};

/// Label followed when a condition is met.
pub const TRUE_BRANCH: &str = "true";

/// Label followed when a condition is not met.
pub const FALSE_BRANCH: &str = "false";

/// Label of a loop's continuation edge, walked once after the last iteration.
pub const LOOP_DONE: &str = "done";

/// Label of a loop's body edge. Unlabeled loop edges are body edges too.
pub const LOOP_BODY: &str = "body";

/// A directed edge between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_branch_label: Option<String>,
}

impl Edge {
    /// Creates an unlabeled edge.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
    ) -> Self {
        Self {
            id: id.into(),
            source_node_id: source.into(),
            target_node_id: target.into(),
            source_branch_label: None,
        }
    }

    /// Sets the branch label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.source_branch_label = Some(label.into());
        self
    }

    /// Returns the branch label, if any.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.source_branch_label.as_deref()
    }

    /// Returns true if this edge carries the given label.
    #[must_use]
    pub fn has_label(&self, label: &str) -> bool {
        self.label() == Some(label)
    }
}
