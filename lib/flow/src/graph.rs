//! Flow graphs and navigation.
//!
//! A flow graph is stored exactly as the editor saves it: an ordered node
//! list and an ordered edge list. Walk order depends on edge-list order, so
//! navigation works on the lists directly; petgraph is only used to check
//! the structure before a run.

use crate::edge::Edge;
use crate::error::GraphError;
use crate::node::{Node, NodeId, NodeKind};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A flow's nodes and edges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowGraph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl FlowGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a node.
    #[must_use]
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Appends an edge.
    #[must_use]
    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Appends an unlabeled edge with a generated id.
    #[must_use]
    pub fn connect(self, source: &str, target: &str) -> Self {
        let id = format!("{source}->{target}");
        self.with_edge(Edge::new(id, source, target))
    }

    /// Appends a labeled edge with a generated id.
    #[must_use]
    pub fn connect_labeled(self, source: &str, target: &str, label: &str) -> Self {
        let id = format!("{source}-{label}->{target}");
        self.with_edge(Edge::new(id, source, target).with_label(label))
    }

    /// Returns a node by id.
    #[must_use]
    pub fn node(&self, node_id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == node_id)
    }

    /// Returns the unique start node.
    ///
    /// # Errors
    ///
    /// Returns `MissingStart` or `MultipleStarts` unless exactly one exists.
    pub fn find_start(&self) -> Result<&Node, GraphError> {
        let mut starts = self.nodes.iter().filter(|n| n.kind == NodeKind::Start);
        let start = starts.next().ok_or(GraphError::MissingStart)?;
        let extra = starts.count();
        if extra > 0 {
            return Err(GraphError::MultipleStarts { count: extra + 1 });
        }
        Ok(start)
    }

    /// Returns the outgoing edges of a node in edge-list order.
    ///
    /// With a label, only edges carrying exactly that label are returned.
    pub fn outgoing<'a>(
        &'a self,
        node_id: &'a NodeId,
        label: Option<&'a str>,
    ) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges
            .iter()
            .filter(move |e| &e.source_node_id == node_id)
            .filter(move |e| label.is_none_or(|l| e.has_label(l)))
    }

    /// Returns the node an edge points at.
    ///
    /// # Errors
    ///
    /// Returns `DanglingEdge` if the target does not exist.
    pub fn target_node(&self, edge: &Edge) -> Result<&Node, GraphError> {
        self.node(&edge.target_node_id)
            .ok_or_else(|| GraphError::DanglingEdge {
                edge_id: edge.id.clone(),
                target: edge.target_node_id.clone(),
            })
    }

    /// Checks the graph before a run.
    ///
    /// Checks:
    /// - Exactly one start node
    /// - No duplicate node ids
    /// - No node id shaped like a derived result key
    /// - No cycles over edges whose endpoints both exist
    ///
    /// Dangling edges are not an error here; the walk skips them.
    ///
    /// # Errors
    ///
    /// Returns the first structural problem found.
    pub fn validate(&self) -> Result<(), GraphError> {
        self.find_start()?;

        let mut graph: DiGraph<(), ()> = DiGraph::with_capacity(self.nodes.len(), self.edges.len());
        let mut index_map: HashMap<&NodeId, NodeIndex> = HashMap::with_capacity(self.nodes.len());

        for node in &self.nodes {
            if node.id.is_reserved() {
                return Err(GraphError::ReservedNodeId {
                    node_id: node.id.clone(),
                });
            }
            let index = graph.add_node(());
            if index_map.insert(&node.id, index).is_some() {
                return Err(GraphError::DuplicateNode {
                    node_id: node.id.clone(),
                });
            }
        }

        for edge in &self.edges {
            let (Some(&source), Some(&target)) = (
                index_map.get(&edge.source_node_id),
                index_map.get(&edge.target_node_id),
            ) else {
                continue;
            };
            graph.add_edge(source, target, ());
        }

        if petgraph::algo::is_cyclic_directed(&graph) {
            return Err(GraphError::CycleDetected);
        }

        Ok(())
    }
}
