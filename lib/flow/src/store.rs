//! Collaborator traits: flow storage and the device registry.
//!
//! Both check ownership themselves and report a mismatch as
//! `StoreError::AccessDenied`, never as `NotFound`.

use crate::error::StoreError;
use crate::graph::FlowGraph;
use crate::results::{ResultSink, RunRecord};
use async_trait::async_trait;
use boardflow_core::{DeviceId, FlowId, UserId};
use boardflow_remote::ConnectionDescriptor;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Read access to saved flows and write access to their run records.
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Loads a flow's graph.
    async fn load_graph(&self, flow_id: FlowId, owner_id: UserId) -> Result<FlowGraph, StoreError>;

    /// Loads a flow's last run record.
    async fn load_run_record(
        &self,
        flow_id: FlowId,
        owner_id: UserId,
    ) -> Result<RunRecord, StoreError>;

    /// Replaces a flow's run record.
    async fn persist_results(&self, flow_id: FlowId, record: &RunRecord) -> Result<(), StoreError>;
}

/// Reachability of a registered device, as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Online,
    Offline,
}

impl DeviceStatus {
    /// Returns the stored name of this status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

/// Resolves registered devices into connection descriptors.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Returns the descriptor of a device owned by `owner_id`.
    async fn resolve_device(
        &self,
        device_id: DeviceId,
        owner_id: UserId,
    ) -> Result<ConnectionDescriptor, StoreError>;

    /// Records whether the device was reachable.
    async fn mark_device_status(
        &self,
        device_id: DeviceId,
        status: DeviceStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Persists run records onto a saved flow.
pub struct FlowResultSink {
    store: Arc<dyn FlowStore>,
    flow_id: FlowId,
}

impl FlowResultSink {
    /// Creates a sink writing to the given flow.
    #[must_use]
    pub fn new(store: Arc<dyn FlowStore>, flow_id: FlowId) -> Self {
        Self { store, flow_id }
    }
}

#[async_trait]
impl ResultSink for FlowResultSink {
    async fn persist(&self, record: &RunRecord) -> Result<(), StoreError> {
        self.store.persist_results(self.flow_id, record).await
    }
}
