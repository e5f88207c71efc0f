//! In-memory collaborators for tests and local development.
//!
//! - `InMemoryFlowStore` keeps every persisted snapshot so write order can be
//!   inspected.
//! - `InMemoryDeviceRegistry` resolves devices and records status updates.
//! - `ScriptedConnector` opens fake sessions that answer commands from a
//!   script and counts opens and closes.

use crate::error::StoreError;
use crate::graph::FlowGraph;
use crate::results::RunRecord;
use crate::store::{DeviceRegistry, DeviceStatus, FlowStore};
use async_trait::async_trait;
use boardflow_core::{DeviceId, FlowId, UserId};
use boardflow_remote::{
    CommandOutput, ConnectionDescriptor, RemoteSession, SessionConnector, SessionError,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct StoredFlow {
    owner_id: UserId,
    graph: FlowGraph,
    record: RunRecord,
}

/// Flow storage backed by a map.
#[derive(Default)]
pub struct InMemoryFlowStore {
    flows: Mutex<HashMap<FlowId, StoredFlow>>,
    history: Mutex<Vec<(FlowId, RunRecord)>>,
}

impl InMemoryFlowStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Saves a flow and returns its new id.
    pub fn insert(&self, owner_id: UserId, graph: FlowGraph) -> FlowId {
        let flow_id = FlowId::new();
        lock(&self.flows).insert(
            flow_id,
            StoredFlow {
                owner_id,
                graph,
                record: RunRecord::default(),
            },
        );
        flow_id
    }

    /// Overwrites a flow's run record without recording history.
    pub fn set_record(&self, flow_id: FlowId, record: RunRecord) {
        if let Some(flow) = lock(&self.flows).get_mut(&flow_id) {
            flow.record = record;
        }
    }

    /// Returns a flow's current run record.
    #[must_use]
    pub fn record(&self, flow_id: FlowId) -> Option<RunRecord> {
        lock(&self.flows).get(&flow_id).map(|f| f.record.clone())
    }

    /// Returns every snapshot persisted for a flow, oldest first.
    #[must_use]
    pub fn history(&self, flow_id: FlowId) -> Vec<RunRecord> {
        lock(&self.history)
            .iter()
            .filter(|(id, _)| *id == flow_id)
            .map(|(_, record)| record.clone())
            .collect()
    }

    fn owned<T>(
        &self,
        flow_id: FlowId,
        owner_id: UserId,
        read: impl FnOnce(&StoredFlow) -> T,
    ) -> Result<T, StoreError> {
        let flows = lock(&self.flows);
        let flow = flows.get(&flow_id).ok_or_else(|| StoreError::NotFound {
            resource: format!("flow {flow_id}"),
        })?;
        if flow.owner_id != owner_id {
            return Err(StoreError::AccessDenied {
                resource: format!("flow {flow_id}"),
            });
        }
        Ok(read(flow))
    }
}

#[async_trait]
impl FlowStore for InMemoryFlowStore {
    async fn load_graph(&self, flow_id: FlowId, owner_id: UserId) -> Result<FlowGraph, StoreError> {
        self.owned(flow_id, owner_id, |f| f.graph.clone())
    }

    async fn load_run_record(
        &self,
        flow_id: FlowId,
        owner_id: UserId,
    ) -> Result<RunRecord, StoreError> {
        self.owned(flow_id, owner_id, |f| f.record.clone())
    }

    async fn persist_results(&self, flow_id: FlowId, record: &RunRecord) -> Result<(), StoreError> {
        let mut flows = lock(&self.flows);
        let flow = flows.get_mut(&flow_id).ok_or_else(|| StoreError::NotFound {
            resource: format!("flow {flow_id}"),
        })?;
        flow.record = record.clone();
        lock(&self.history).push((flow_id, record.clone()));
        Ok(())
    }
}

/// Device registry backed by a map.
#[derive(Default)]
pub struct InMemoryDeviceRegistry {
    devices: Mutex<HashMap<DeviceId, (UserId, ConnectionDescriptor)>>,
    statuses: Mutex<HashMap<DeviceId, (DeviceStatus, DateTime<Utc>)>>,
}

impl InMemoryDeviceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a device and returns its new id.
    pub fn register(&self, owner_id: UserId, descriptor: ConnectionDescriptor) -> DeviceId {
        let device_id = DeviceId::new();
        lock(&self.devices).insert(device_id, (owner_id, descriptor));
        device_id
    }

    /// Returns the last recorded status of a device.
    #[must_use]
    pub fn status(&self, device_id: DeviceId) -> Option<DeviceStatus> {
        lock(&self.statuses).get(&device_id).map(|(status, _)| *status)
    }
}

#[async_trait]
impl DeviceRegistry for InMemoryDeviceRegistry {
    async fn resolve_device(
        &self,
        device_id: DeviceId,
        owner_id: UserId,
    ) -> Result<ConnectionDescriptor, StoreError> {
        let devices = lock(&self.devices);
        let (owner, descriptor) = devices.get(&device_id).ok_or_else(|| StoreError::NotFound {
            resource: format!("device {device_id}"),
        })?;
        if *owner != owner_id {
            return Err(StoreError::AccessDenied {
                resource: format!("device {device_id}"),
            });
        }
        Ok(descriptor.clone())
    }

    async fn mark_device_status(
        &self,
        device_id: DeviceId,
        status: DeviceStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        lock(&self.statuses).insert(device_id, (status, at));
        Ok(())
    }
}

type Reply = Result<CommandOutput, SessionError>;

#[derive(Default)]
struct Script {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    unreachable: Mutex<HashSet<String>>,
    commands: Mutex<Vec<String>>,
    hosts: Mutex<Vec<String>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
}

impl Script {
    fn reply(&self, command: &str) -> Reply {
        let mut replies = lock(&self.replies);
        match replies.get_mut(command) {
            Some(queue) if queue.len() > 1 => queue
                .pop_front()
                .unwrap_or_else(|| Ok(CommandOutput::default())),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| Ok(CommandOutput::default())),
            None => Ok(CommandOutput::default()),
        }
    }
}

/// Opens fake sessions that answer commands from a script.
///
/// Each command has a queue of replies; the last reply repeats once the
/// queue is down to one. Unscripted commands exit 0 with no output.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    script: Arc<Script>,
}

impl ScriptedConnector {
    /// Creates a connector where every command succeeds silently.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply for a command.
    #[must_use]
    pub fn respond(self, command: &str, output: CommandOutput) -> Self {
        self.push(command, Ok(output));
        self
    }

    /// Queues a transport failure for a command.
    #[must_use]
    pub fn fail(self, command: &str, error: SessionError) -> Self {
        self.push(command, Err(error));
        self
    }

    /// Makes every connection to `host` fail.
    #[must_use]
    pub fn unreachable(self, host: &str) -> Self {
        lock(&self.script.unreachable).insert(host.to_string());
        self
    }

    fn push(&self, command: &str, reply: Reply) {
        lock(&self.script.replies)
            .entry(command.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Commands run so far, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        lock(&self.script.commands).clone()
    }

    /// Hosts connected to so far, in order.
    #[must_use]
    pub fn hosts(&self) -> Vec<String> {
        lock(&self.script.hosts).clone()
    }

    /// Number of sessions opened.
    #[must_use]
    pub fn opens(&self) -> usize {
        self.script.opens.load(Ordering::SeqCst)
    }

    /// Number of sessions closed.
    #[must_use]
    pub fn closes(&self) -> usize {
        self.script.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionConnector for ScriptedConnector {
    async fn open(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn RemoteSession>, SessionError> {
        if lock(&self.script.unreachable).contains(&descriptor.host) {
            return Err(SessionError::Unreachable {
                host: descriptor.host.clone(),
                reason: "connection refused".to_string(),
            });
        }

        self.script.opens.fetch_add(1, Ordering::SeqCst);
        lock(&self.script.hosts).push(descriptor.host.clone());
        Ok(Box::new(ScriptedSession {
            script: Arc::clone(&self.script),
            host: descriptor.host.clone(),
            open: true,
        }))
    }
}

struct ScriptedSession {
    script: Arc<Script>,
    host: String,
    open: bool,
}

#[async_trait]
impl RemoteSession for ScriptedSession {
    async fn run(&self, command: &str) -> Result<CommandOutput, SessionError> {
        if !self.open {
            return Err(SessionError::Closed);
        }
        lock(&self.script.commands).push(command.to_string());
        self.script.reply(command)
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        if self.open {
            self.open = false;
            self.script.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn host(&self) -> &str {
        &self.host
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boardflow_remote::Credential;

    fn descriptor(host: &str) -> ConnectionDescriptor {
        ConnectionDescriptor::new(host, "pi", Credential::password("raspberry"))
    }

    #[tokio::test]
    async fn scripted_replies_repeat_the_last_one() {
        let connector = ScriptedConnector::new()
            .respond("gpio -g read 4", CommandOutput::new(0, "0\n", ""))
            .respond("gpio -g read 4", CommandOutput::new(0, "1\n", ""));

        let session = connector.open(&descriptor("pi.local")).await.expect("open");
        let mut reads = Vec::new();
        for _ in 0..3 {
            reads.push(session.run("gpio -g read 4").await.expect("run").stdout);
        }

        assert_eq!(reads, ["0\n", "1\n", "1\n"]);
        assert_eq!(connector.commands().len(), 3);
    }

    #[tokio::test]
    async fn close_is_counted_once() {
        let connector = ScriptedConnector::new();
        let mut session = connector.open(&descriptor("pi.local")).await.expect("open");
        session.close().await.expect("close");
        session.close().await.expect("close again");

        assert_eq!(connector.opens(), 1);
        assert_eq!(connector.closes(), 1);
        assert_eq!(session.run("true").await, Err(SessionError::Closed));
    }

    #[tokio::test]
    async fn unreachable_hosts_fail_to_open() {
        let connector = ScriptedConnector::new().unreachable("10.0.0.9");
        let err = connector
            .open(&descriptor("10.0.0.9"))
            .await
            .err()
            .expect("unreachable");
        assert!(err.is_connection_error());
        assert_eq!(connector.opens(), 0);
    }

    #[tokio::test]
    async fn flow_store_checks_owner() {
        let store = InMemoryFlowStore::new();
        let owner = UserId::new();
        let flow_id = store.insert(owner, FlowGraph::new());

        assert!(store.load_graph(flow_id, owner).await.is_ok());
        assert!(matches!(
            store.load_graph(flow_id, UserId::new()).await,
            Err(StoreError::AccessDenied { .. })
        ));
        assert!(matches!(
            store.load_graph(FlowId::new(), owner).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn device_registry_checks_owner() {
        let registry = InMemoryDeviceRegistry::new();
        let owner = UserId::new();
        let device_id = registry.register(owner, descriptor("pi.local"));

        let resolved = registry
            .resolve_device(device_id, owner)
            .await
            .expect("resolve");
        assert_eq!(resolved.host, "pi.local");
        assert!(matches!(
            registry.resolve_device(device_id, UserId::new()).await,
            Err(StoreError::AccessDenied { .. })
        ));
    }
}
