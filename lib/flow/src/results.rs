//! The result store: per-node outcomes and the overall flow status.
//!
//! A `ResultStore` accumulates one run's record and is passed by reference
//! through the walk. After every write the orchestrator hands the record to
//! a `ResultSink`, so a node's status write is persisted before its outcome,
//! and its outcome before any successor's status.

use crate::error::StoreError;
use crate::node::NodeId;
use crate::outcome::OutcomeRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Overall status of a flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    /// Never run.
    #[default]
    Idle,
    /// A run is in progress.
    Running,
    /// The last run completed without aborting.
    Success,
    /// The last run aborted.
    Error,
}

impl FlowStatus {
    /// Returns the stored name of this status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    /// Parses a stored status name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-node status tag stored under `<nodeId>_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Running,
    Success,
    Error,
}

/// One value in the results map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultEntry {
    Status(NodeStatus),
    Outcome(OutcomeRecord),
}

impl ResultEntry {
    /// Returns the outcome, if this entry holds one.
    #[must_use]
    pub fn as_outcome(&self) -> Option<&OutcomeRecord> {
        match self {
            Self::Outcome(outcome) => Some(outcome),
            Self::Status(_) => None,
        }
    }

    /// Returns the status tag, if this entry holds one.
    #[must_use]
    pub fn as_status(&self) -> Option<NodeStatus> {
        match self {
            Self::Status(status) => Some(*status),
            Self::Outcome(_) => None,
        }
    }
}

/// The persisted state of a flow's most recent run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub flow_status: FlowStatus,
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub results: BTreeMap<String, ResultEntry>,
}

impl RunRecord {
    /// Returns the primary outcome of a node.
    #[must_use]
    pub fn outcome(&self, node_id: &str) -> Option<&OutcomeRecord> {
        self.results.get(node_id).and_then(ResultEntry::as_outcome)
    }

    /// Returns the status tag of a node.
    #[must_use]
    pub fn node_status(&self, node_id: &str) -> Option<NodeStatus> {
        self.results
            .get(&format!("{node_id}_status"))
            .and_then(ResultEntry::as_status)
    }

    /// Returns the outcome of loop iteration `n` (1-based).
    #[must_use]
    pub fn iteration(&self, node_id: &str, n: u32) -> Option<&OutcomeRecord> {
        self.results
            .get(&format!("{node_id}_iteration_{n}"))
            .and_then(ResultEntry::as_outcome)
    }
}

/// Accumulates one run's results.
#[derive(Debug, Clone, Default)]
pub struct ResultStore {
    record: RunRecord,
}

impl ResultStore {
    /// Creates an idle, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a run: clears previous results and marks the flow running.
    pub fn begin(&mut self, now: DateTime<Utc>) {
        self.record = RunRecord {
            flow_status: FlowStatus::Running,
            last_run_at: Some(now),
            error: None,
            results: BTreeMap::new(),
        };
    }

    /// Tags a node as running.
    pub fn mark_running(&mut self, node_id: &NodeId) {
        self.record.results.insert(
            node_id.status_key(),
            ResultEntry::Status(NodeStatus::Running),
        );
    }

    /// Stores a node's outcome and derives its status tag.
    pub fn record_outcome(&mut self, node_id: &NodeId, outcome: OutcomeRecord) {
        let status = if outcome.success {
            NodeStatus::Success
        } else {
            NodeStatus::Error
        };
        self.record
            .results
            .insert(node_id.to_string(), ResultEntry::Outcome(outcome));
        self.record
            .results
            .insert(node_id.status_key(), ResultEntry::Status(status));
    }

    /// Stores the outcome of loop iteration `n` (1-based).
    pub fn record_iteration(&mut self, node_id: &NodeId, n: u32, outcome: OutcomeRecord) {
        self.record
            .results
            .insert(node_id.iteration_key(n), ResultEntry::Outcome(outcome));
    }

    /// Ends the run with a final status and optional error.
    pub fn finish(&mut self, status: FlowStatus, error: Option<String>, now: DateTime<Utc>) {
        self.record.flow_status = status;
        self.record.error = error;
        self.record.last_run_at = Some(now);
    }

    /// Returns the current record.
    #[must_use]
    pub fn record(&self) -> &RunRecord {
        &self.record
    }

    /// Consumes the store, returning the record.
    #[must_use]
    pub fn into_record(self) -> RunRecord {
        self.record
    }
}

/// Receives the run record after every write.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Persists a snapshot of the record.
    async fn persist(&self, record: &RunRecord) -> Result<(), StoreError>;
}

/// A sink that keeps nothing; used for unsaved graphs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardResults;

#[async_trait]
impl ResultSink for DiscardResults {
    async fn persist(&self, _record: &RunRecord) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn begin_clears_previous_results() {
        let mut store = ResultStore::new();
        let node = NodeId::new("a");
        store.begin(Utc::now());
        store.record_outcome(&node, OutcomeRecord::succeeded());
        store.finish(FlowStatus::Success, None, Utc::now());

        store.begin(Utc::now());
        assert_eq!(store.record().flow_status, FlowStatus::Running);
        assert!(store.record().results.is_empty());
    }

    #[test]
    fn outcome_sets_derived_status() {
        let mut store = ResultStore::new();
        let node = NodeId::new("cmd");
        store.mark_running(&node);
        assert_eq!(store.record().node_status("cmd"), Some(NodeStatus::Running));

        store.record_outcome(&node, OutcomeRecord::failed("boom"));
        assert_eq!(store.record().node_status("cmd"), Some(NodeStatus::Error));
        assert_eq!(
            store.record().outcome("cmd").and_then(|o| o.error.as_deref()),
            Some("boom")
        );
    }

    #[test]
    fn record_serializes_to_wire_shape() {
        let mut store = ResultStore::new();
        let node = NodeId::new("loop");
        store.record_outcome(&node, OutcomeRecord::succeeded());
        store.record_iteration(&node, 1, OutcomeRecord::succeeded());

        let json = serde_json::to_value(store.record()).expect("serialize");
        assert_eq!(json["flowStatus"], "idle");
        assert_eq!(json["lastRunAt"], json!(null));
        assert_eq!(json["results"]["loop_status"], "success");
        assert_eq!(json["results"]["loop_iteration_1"]["success"], true);

        let back: RunRecord = serde_json::from_value(json).expect("deserialize");
        assert_eq!(&back, store.record());
    }

    #[test]
    fn flow_status_names() {
        for status in [
            FlowStatus::Idle,
            FlowStatus::Running,
            FlowStatus::Success,
            FlowStatus::Error,
        ] {
            assert_eq!(FlowStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(FlowStatus::parse("paused"), None);
    }
}
