//! The run service: the operations callers use to run flows.

use crate::config::EngineConfig;
use crate::context::ExecutionContext;
use crate::error::ServiceError;
use crate::graph::FlowGraph;
use crate::orchestrator::Orchestrator;
use crate::results::{DiscardResults, FlowStatus, ResultSink, ResultStore, RunRecord};
use crate::store::{DeviceRegistry, FlowResultSink, FlowStore};
use boardflow_core::{FlowId, Result, UserId};
use boardflow_remote::SessionConnector;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

struct RunnerInner {
    flows: Arc<dyn FlowStore>,
    devices: Arc<dyn DeviceRegistry>,
    connector: Arc<dyn SessionConnector>,
    config: EngineConfig,
    active: Mutex<HashSet<FlowId>>,
}

impl RunnerInner {
    async fn execute(
        &self,
        graph: &FlowGraph,
        ctx: &mut ExecutionContext,
        sink: &dyn ResultSink,
    ) -> RunRecord {
        let orchestrator = Orchestrator::new(
            graph,
            self.connector.as_ref(),
            self.devices.as_ref(),
            sink,
            &self.config,
        );
        let mut results = ResultStore::new();
        orchestrator.run(ctx, &mut results).await;
        results.into_record()
    }
}

/// Marks a flow as running in this process until dropped.
struct RunClaim {
    inner: Arc<RunnerInner>,
    flow_id: FlowId,
}

impl RunClaim {
    fn acquire(inner: &Arc<RunnerInner>, flow_id: FlowId) -> Option<Self> {
        let mut active = inner.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(flow_id) {
            return None;
        }
        Some(Self {
            inner: Arc::clone(inner),
            flow_id,
        })
    }
}

impl Drop for RunClaim {
    fn drop(&mut self) {
        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.flow_id);
    }
}

/// Returned by `start_run` once a run has been accepted.
#[derive(Debug)]
pub struct RunTicket {
    pub accepted: bool,
    task: JoinHandle<RunRecord>,
}

impl RunTicket {
    /// Waits for the run to finish.
    ///
    /// Returns `None` if the run task panicked or was cancelled.
    pub async fn wait(self) -> Option<RunRecord> {
        match self.task.await {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "flow run task failed");
                None
            }
        }
    }
}

/// Runs saved and unsaved flows.
#[derive(Clone)]
pub struct FlowRunner {
    inner: Arc<RunnerInner>,
}

impl FlowRunner {
    /// Creates a runner over the given collaborators.
    #[must_use]
    pub fn new(
        flows: Arc<dyn FlowStore>,
        devices: Arc<dyn DeviceRegistry>,
        connector: Arc<dyn SessionConnector>,
        config: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                flows,
                devices,
                connector,
                config,
                active: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Starts a saved flow in the background.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRunning` if this runner is already executing the
    /// flow, or the mapped storage error if the flow cannot be loaded for
    /// this owner.
    #[instrument(skip_all, fields(%flow_id, %owner_id))]
    pub async fn start_run(&self, flow_id: FlowId, owner_id: UserId) -> Result<RunTicket, ServiceError> {
        let graph = self
            .inner
            .flows
            .load_graph(flow_id, owner_id)
            .await
            .map_err(|e| ServiceError::from_store(flow_id, e))?;

        let claim = RunClaim::acquire(&self.inner, flow_id)
            .ok_or(ServiceError::AlreadyRunning { flow_id })?;

        let record = self
            .inner
            .flows
            .load_run_record(flow_id, owner_id)
            .await
            .map_err(|e| ServiceError::from_store(flow_id, e))?;
        if record.flow_status == FlowStatus::Running {
            // Only this process executes runs, and it holds no claim.
            warn!("stored status is running with no active run, replacing it");
        }

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let _claim = claim;
            let sink = FlowResultSink::new(Arc::clone(&inner.flows), flow_id);
            let mut ctx = ExecutionContext::new(Some(flow_id), owner_id);
            inner.execute(&graph, &mut ctx, &sink).await
        });

        info!("flow run accepted");
        Ok(RunTicket {
            accepted: true,
            task,
        })
    }

    /// Runs an unsaved graph to completion without persisting anything.
    #[instrument(skip_all, fields(%owner_id, nodes = graph.nodes.len()))]
    pub async fn run_direct(&self, graph: FlowGraph, owner_id: UserId) -> RunRecord {
        let mut ctx = ExecutionContext::new(None, owner_id);
        self.inner.execute(&graph, &mut ctx, &DiscardResults).await
    }

    /// Returns a saved flow's last run record.
    ///
    /// # Errors
    ///
    /// Returns the mapped storage error if the flow cannot be read.
    pub async fn get_run_status(&self, flow_id: FlowId, owner_id: UserId) -> Result<RunRecord, ServiceError> {
        let record = self
            .inner
            .flows
            .load_run_record(flow_id, owner_id)
            .await
            .map_err(|e| ServiceError::from_store(flow_id, e))?;
        Ok(record)
    }
}
