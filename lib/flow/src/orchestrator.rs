//! Flow execution orchestrator.
//!
//! The orchestrator walks a flow graph depth-first from its start node:
//!
//! 1. Tag the node `running` and persist
//! 2. Dispatch to the node's handler with the current session
//! 3. Store the outcome and derived status, and persist
//! 4. Stop this path on `End` or a failed outcome
//! 5. Otherwise walk the successors in edge-list order, one at a time
//!
//! Node failures stay on their path. Only graph and authorization errors
//! abort the run; the session is closed on every exit.

use crate::config::EngineConfig;
use crate::context::ExecutionContext;
use crate::edge::{Edge, FALSE_BRANCH, LOOP_DONE, TRUE_BRANCH};
use crate::error::{FlowError, GraphError, NodeError};
use crate::graph::FlowGraph;
use crate::handlers;
use crate::node::{LoopParams, Node, NodeAction, NodeKind};
use crate::outcome::OutcomeRecord;
use crate::results::{FlowStatus, ResultSink, ResultStore};
use crate::store::DeviceRegistry;
use boardflow_remote::SessionConnector;
use chrono::Utc;
use futures::future::BoxFuture;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Attempts made to persist a finished run's record.
const FINAL_PERSIST_ATTEMPTS: u32 = 3;

/// Pause before the second attempt; grows linearly after that.
const FINAL_PERSIST_BACKOFF: Duration = Duration::from_millis(200);

/// Which outgoing edges to follow after a node succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Successors {
    All,
    Labeled(&'static str),
}

/// Runs one flow graph.
pub struct Orchestrator<'a> {
    graph: &'a FlowGraph,
    connector: &'a dyn SessionConnector,
    devices: &'a dyn DeviceRegistry,
    sink: &'a dyn ResultSink,
    config: &'a EngineConfig,
}

impl<'a> Orchestrator<'a> {
    /// Creates an orchestrator over a graph and its collaborators.
    #[must_use]
    pub fn new(
        graph: &'a FlowGraph,
        connector: &'a dyn SessionConnector,
        devices: &'a dyn DeviceRegistry,
        sink: &'a dyn ResultSink,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            graph,
            connector,
            devices,
            sink,
            config,
        }
    }

    /// Runs the flow to completion.
    ///
    /// Never fails: an aborting error is logged and stored as the flow's
    /// error with status `Error`.
    pub async fn run(&self, ctx: &mut ExecutionContext, results: &mut ResultStore) {
        let flow_id = ctx.flow_id.map(|id| id.to_string());
        info!(flow_id = ?flow_id, nodes = self.graph.nodes.len(), "flow run started");

        results.begin(Utc::now());
        self.checkpoint(results).await;

        let walked = self.execute(ctx, results).await;
        ctx.close_session().await;

        match walked {
            Ok(()) => {
                results.finish(FlowStatus::Success, None, Utc::now());
                info!(flow_id = ?flow_id, status = %FlowStatus::Success, "flow run finished");
            }
            Err(e) => {
                error!(flow_id = ?flow_id, error = %e, "flow run aborted");
                results.finish(FlowStatus::Error, Some(e.to_string()), Utc::now());
            }
        }
        self.persist_final(results).await;
    }

    async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        results: &mut ResultStore,
    ) -> Result<(), FlowError> {
        self.graph.validate()?;
        let start = self.graph.find_start()?;
        self.walk(start, ctx, results, 0).await?;
        Ok(())
    }

    /// Walks one node and everything reachable from it.
    ///
    /// Returns whether the node's own outcome succeeded.
    fn walk<'b>(
        &'b self,
        node: &'a Node,
        ctx: &'b mut ExecutionContext,
        results: &'b mut ResultStore,
        depth: usize,
    ) -> BoxFuture<'b, Result<bool, FlowError>> {
        Box::pin(async move {
            if depth >= self.config.max_walk_depth {
                return Err(GraphError::DepthExceeded {
                    limit: self.config.max_walk_depth,
                }
                .into());
            }

            results.mark_running(&node.id);
            self.checkpoint(results).await;

            debug!(node_id = %node.id, kind = %node.kind, depth, "dispatching node");
            let (outcome, successors) = self.dispatch(node, ctx, results, depth).await?;
            let success = outcome.success;
            results.record_outcome(&node.id, outcome);
            self.checkpoint(results).await;

            if !success || node.kind == NodeKind::End {
                return Ok(success);
            }

            let label = match successors {
                Successors::All => None,
                Successors::Labeled(label) => Some(label),
            };
            for edge in self.graph.outgoing(&node.id, label) {
                if let Some(next) = self.resolve(edge) {
                    self.walk(next, ctx, results, depth + 1).await?;
                }
            }

            Ok(success)
        })
    }

    fn resolve(&self, edge: &Edge) -> Option<&'a Node> {
        match self.graph.target_node(edge) {
            Ok(node) => Some(node),
            Err(e) => {
                warn!(edge_id = %edge.id, error = %e, "skipping dangling edge");
                None
            }
        }
    }

    async fn dispatch(
        &self,
        node: &'a Node,
        ctx: &mut ExecutionContext,
        results: &mut ResultStore,
        depth: usize,
    ) -> Result<(OutcomeRecord, Successors), FlowError> {
        let action = match node.action() {
            Ok(action) => action,
            Err(e) => return Ok((OutcomeRecord::failed(e.to_string()), Successors::All)),
        };

        Ok(match action {
            NodeAction::Start => (handlers::start(), Successors::All),
            NodeAction::End => (handlers::end(), Successors::All),
            NodeAction::Connect(params) => (
                handlers::connect(ctx, &params, self.connector, self.devices).await?,
                Successors::All,
            ),
            NodeAction::RunCommand(params) => {
                (handlers::run_command(ctx, &params).await, Successors::All)
            }
            NodeAction::SetOutput(params) => {
                (handlers::set_output(ctx, &params).await, Successors::All)
            }
            NodeAction::Branch(params) => {
                let outcome = handlers::branch(ctx, &params).await;
                let label = if outcome.condition_met == Some(true) {
                    TRUE_BRANCH
                } else {
                    FALSE_BRANCH
                };
                (outcome, Successors::Labeled(label))
            }
            NodeAction::Loop(params) => (
                self.run_loop(node, &params, ctx, results, depth).await?,
                Successors::Labeled(LOOP_DONE),
            ),
            NodeAction::SendMessage(params) => (handlers::send_message(&params), Successors::All),
        })
    }

    /// Runs a loop's body edges `iterations` times.
    ///
    /// The loop itself succeeds whenever it ran, even if iterations failed.
    async fn run_loop(
        &self,
        node: &'a Node,
        params: &LoopParams,
        ctx: &mut ExecutionContext,
        results: &mut ResultStore,
        depth: usize,
    ) -> Result<OutcomeRecord, FlowError> {
        if !ctx.has_session() {
            return Ok(OutcomeRecord::failed(NodeError::NoActiveSession.to_string()));
        }

        let max = self.config.max_loop_iterations;
        let requested = match params.iterations {
            Some(n) if (1..=max).contains(&n) => n,
            Some(n) => {
                return Ok(OutcomeRecord::failed(
                    NodeError::validation(format!(
                        "Iterations must be between 1 and {max}, got {n}"
                    ))
                    .to_string(),
                ));
            }
            None => {
                return Ok(OutcomeRecord::failed(
                    NodeError::validation("Iteration count is required").to_string(),
                ));
            }
        };

        let max_delay = self.config.max_loop_delay_ms;
        if params.delay_ms > max_delay {
            return Ok(OutcomeRecord::failed(
                NodeError::validation(format!(
                    "Delay must be at most {max_delay} ms, got {}",
                    params.delay_ms
                ))
                .to_string(),
            ));
        }

        let body: Vec<&'a Edge> = self
            .graph
            .outgoing(&node.id, None)
            .filter(|e| !e.has_label(LOOP_DONE))
            .collect();

        let mut completed = 0;
        for n in 1..=requested {
            if n > 1 && params.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(params.delay_ms)).await;
            }

            let mut iteration_ok = true;
            for edge in &body {
                if let Some(target) = self.resolve(edge) {
                    iteration_ok &= self.walk(target, ctx, results, depth + 1).await?;
                }
            }
            completed = n;

            let record = if iteration_ok {
                OutcomeRecord::succeeded().with_message(format!("Iteration {n} completed"))
            } else {
                OutcomeRecord::failed(format!("Iteration {n} failed"))
            };
            results.record_iteration(&node.id, n, record.with_detail("iteration", n));
            self.checkpoint(results).await;

            if !iteration_ok && params.stop_on_error {
                debug!(node_id = %node.id, iteration = n, "stopping loop after failed iteration");
                break;
            }
        }

        Ok(OutcomeRecord::succeeded()
            .with_message(format!("Completed {completed} iterations"))
            .with_detail("iterations", completed)
            .with_detail("requestedIterations", requested))
    }

    /// Persists the finished record, retrying failed writes.
    ///
    /// A record left at `running` does not lock the flow: the runner only
    /// treats flows it is executing in this process as running.
    async fn persist_final(&self, results: &ResultStore) {
        for attempt in 1..=FINAL_PERSIST_ATTEMPTS {
            match self.sink.persist(results.record()).await {
                Ok(()) => return,
                Err(e) if attempt < FINAL_PERSIST_ATTEMPTS => {
                    warn!(attempt, error = %e, "failed to persist final run results, retrying");
                    tokio::time::sleep(FINAL_PERSIST_BACKOFF * attempt).await;
                }
                Err(e) => {
                    error!(attempts = attempt, error = %e, "giving up on persisting final run results");
                }
            }
        }
    }

    async fn checkpoint(&self, results: &ResultStore) {
        if let Err(e) = self.sink.persist(results.record()).await {
            warn!(error = %e, "failed to persist run results");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::LOOP_BODY;
    use crate::memory::{InMemoryDeviceRegistry, ScriptedConnector};
    use crate::results::{DiscardResults, NodeStatus, RunRecord};
    use crate::store::DeviceStatus;
    use boardflow_core::UserId;
    use boardflow_remote::{CommandOutput, ConnectionDescriptor, Credential, SessionError};
    use serde_json::json;

    struct Harness {
        connector: ScriptedConnector,
        devices: InMemoryDeviceRegistry,
        config: EngineConfig,
        owner: UserId,
    }

    impl Harness {
        fn new(connector: ScriptedConnector) -> Self {
            Self {
                connector,
                devices: InMemoryDeviceRegistry::new(),
                config: EngineConfig::default(),
                owner: UserId::new(),
            }
        }

        async fn run(&self, graph: &FlowGraph) -> RunRecord {
            let orchestrator = Orchestrator::new(
                graph,
                &self.connector,
                &self.devices,
                &DiscardResults,
                &self.config,
            );
            let mut ctx = ExecutionContext::new(None, self.owner);
            let mut results = ResultStore::new();
            orchestrator.run(&mut ctx, &mut results).await;
            results.into_record()
        }
    }

    fn connect_node(id: &str) -> Node {
        Node::new(id, NodeKind::ConnectRemoteHost).with_parameters(json!({
            "host": "pi.local",
            "username": "pi",
            "password": "raspberry"
        }))
    }

    fn command_node(id: &str, command: &str) -> Node {
        Node::new(id, NodeKind::RunCommand).with_parameters(json!({ "command": command }))
    }

    fn loop_node(id: &str, iterations: u32, stop_on_error: bool) -> Node {
        Node::new(id, NodeKind::Loop).with_parameters(json!({
            "iterations": iterations,
            "stopOnError": stop_on_error
        }))
    }

    fn branch_node(id: &str, command: &str, expected: &str) -> Node {
        Node::new(id, NodeKind::ConditionalBranch).with_parameters(json!({
            "condition": {
                "type": "command",
                "command": command,
                "operator": "contains",
                "expected": expected
            }
        }))
    }

    #[tokio::test]
    async fn command_without_connect_fails_but_flow_succeeds() {
        let harness = Harness::new(ScriptedConnector::new());
        let graph = FlowGraph::new()
            .with_node(Node::new("start", NodeKind::Start))
            .with_node(command_node("cmd", "echo hi"))
            .with_node(Node::new("end", NodeKind::End))
            .connect("start", "cmd")
            .connect("cmd", "end");

        let record = harness.run(&graph).await;

        let outcome = record.outcome("cmd").expect("cmd outcome");
        assert!(!outcome.success);
        assert!(
            outcome
                .error
                .as_deref()
                .is_some_and(|e| e.starts_with("No active session"))
        );
        assert_eq!(record.flow_status, FlowStatus::Success);
        assert!(record.outcome("end").is_none());
        assert!(harness.connector.commands().is_empty());
        assert_eq!(harness.connector.opens(), 0);
    }

    #[tokio::test]
    async fn connected_command_runs_and_session_is_closed() {
        let connector = ScriptedConnector::new().respond(
            "uname -a",
            CommandOutput::new(0, "Linux pi 6.1.21-v8+ aarch64\n", ""),
        );
        let harness = Harness::new(connector);
        let device_id = harness.devices.register(
            harness.owner,
            ConnectionDescriptor::new("pi.local", "pi", Credential::password("raspberry")),
        );
        let graph = FlowGraph::new()
            .with_node(Node::new("start", NodeKind::Start))
            .with_node(
                Node::new("connect", NodeKind::ConnectRemoteHost)
                    .with_parameters(json!({ "deviceId": device_id.to_string() })),
            )
            .with_node(command_node("cmd", "uname -a"))
            .with_node(Node::new("end", NodeKind::End))
            .connect("start", "connect")
            .connect("connect", "cmd")
            .connect("cmd", "end");

        let record = harness.run(&graph).await;

        assert!(record.outcome("connect").is_some_and(|o| o.success));
        assert_eq!(harness.devices.status(device_id), Some(DeviceStatus::Online));
        let cmd = record.outcome("cmd").expect("cmd outcome");
        assert!(cmd.success);
        assert_eq!(cmd.stdout.as_deref(), Some("Linux pi 6.1.21-v8+ aarch64\n"));
        assert!(record.outcome("end").is_some_and(|o| o.success));
        assert_eq!(record.flow_status, FlowStatus::Success);
        assert_eq!(harness.connector.opens(), 1);
        assert_eq!(harness.connector.closes(), 1);
    }

    #[tokio::test]
    async fn loop_stops_on_failed_iteration_but_reports_success() {
        let connector = ScriptedConnector::new()
            .respond("./step.sh", CommandOutput::new(0, "ok\n", ""))
            .respond("./step.sh", CommandOutput::new(1, "", "step failed"))
            .respond("./step.sh", CommandOutput::new(0, "ok\n", ""));
        let harness = Harness::new(connector);
        let graph = FlowGraph::new()
            .with_node(Node::new("start", NodeKind::Start))
            .with_node(connect_node("connect"))
            .with_node(loop_node("loop", 3, true))
            .with_node(command_node("step", "./step.sh"))
            .connect("start", "connect")
            .connect("connect", "loop")
            .connect("loop", "step");

        let record = harness.run(&graph).await;

        assert!(record.iteration("loop", 1).is_some_and(|o| o.success));
        assert!(record.iteration("loop", 2).is_some_and(|o| !o.success));
        assert!(record.iteration("loop", 3).is_none());
        assert_eq!(harness.connector.commands().len(), 2);

        let outcome = record.outcome("loop").expect("loop outcome");
        assert!(outcome.success);
        assert_eq!(outcome.message.as_deref(), Some("Completed 2 iterations"));
        assert_eq!(outcome.detail("requestedIterations"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn loop_reports_success_even_when_every_iteration_fails() {
        let connector =
            ScriptedConnector::new().respond("false", CommandOutput::new(1, "", ""));
        let harness = Harness::new(connector);
        let graph = FlowGraph::new()
            .with_node(Node::new("start", NodeKind::Start))
            .with_node(connect_node("connect"))
            .with_node(loop_node("loop", 2, false))
            .with_node(command_node("body", "false"))
            .connect("start", "connect")
            .connect("connect", "loop")
            .connect("loop", "body");

        let record = harness.run(&graph).await;

        assert!(record.iteration("loop", 1).is_some_and(|o| !o.success));
        assert!(record.iteration("loop", 2).is_some_and(|o| !o.success));
        assert!(record.outcome("loop").is_some_and(|o| o.success));
    }

    #[tokio::test]
    async fn loop_done_edge_runs_once_after_iterations() {
        let harness = Harness::new(ScriptedConnector::new());
        let graph = FlowGraph::new()
            .with_node(Node::new("start", NodeKind::Start))
            .with_node(connect_node("connect"))
            .with_node(loop_node("loop", 3, false))
            .with_node(command_node("blink", "blink"))
            .with_node(command_node("after", "after"))
            .connect("start", "connect")
            .connect("connect", "loop")
            .connect_labeled("loop", "after", LOOP_DONE)
            .connect_labeled("loop", "blink", LOOP_BODY);

        harness.run(&graph).await;

        assert_eq!(
            harness.connector.commands(),
            ["blink", "blink", "blink", "after"]
        );
    }

    #[tokio::test]
    async fn loop_without_session_fails() {
        let harness = Harness::new(ScriptedConnector::new());
        let graph = FlowGraph::new()
            .with_node(Node::new("start", NodeKind::Start))
            .with_node(loop_node("loop", 2, false))
            .connect("start", "loop");

        let record = harness.run(&graph).await;
        assert!(record.outcome("loop").is_some_and(|o| !o.success));
    }

    #[tokio::test]
    async fn loop_rejects_too_many_iterations() {
        let mut harness = Harness::new(ScriptedConnector::new());
        harness.config.max_loop_iterations = 5;
        let graph = FlowGraph::new()
            .with_node(Node::new("start", NodeKind::Start))
            .with_node(connect_node("connect"))
            .with_node(loop_node("loop", 6, false))
            .connect("start", "connect")
            .connect("connect", "loop");

        let record = harness.run(&graph).await;
        assert!(record.outcome("loop").is_some_and(|o| !o.success));
        assert!(record.iteration("loop", 1).is_none());
    }

    fn delayed_loop(iterations: u32, delay_ms: u64) -> FlowGraph {
        FlowGraph::new()
            .with_node(Node::new("start", NodeKind::Start))
            .with_node(connect_node("connect"))
            .with_node(Node::new("loop", NodeKind::Loop).with_parameters(json!({
                "iterations": iterations,
                "delayMs": delay_ms
            })))
            .with_node(command_node("tick", "tick"))
            .connect("start", "connect")
            .connect("connect", "loop")
            .connect("loop", "tick")
    }

    #[tokio::test(start_paused = true)]
    async fn loop_waits_between_iterations_only() {
        let harness = Harness::new(ScriptedConnector::new());
        let started = tokio::time::Instant::now();

        let record = harness.run(&delayed_loop(3, 1_000)).await;

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(2_000), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(3_000), "{elapsed:?}");
        assert!(record.iteration("loop", 3).is_some_and(|o| o.success));
        assert_eq!(harness.connector.commands(), ["tick", "tick", "tick"]);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_rejects_delay_above_limit() {
        let mut harness = Harness::new(ScriptedConnector::new());
        harness.config.max_loop_delay_ms = 5_000;
        let started = tokio::time::Instant::now();

        let record = harness.run(&delayed_loop(1_000, 31_536_000_000)).await;

        let outcome = record.outcome("loop").expect("loop outcome");
        assert!(!outcome.success);
        assert!(
            outcome
                .error
                .as_deref()
                .is_some_and(|e| e.contains("at most 5000 ms"))
        );
        assert!(record.iteration("loop", 1).is_none());
        assert!(harness.connector.commands().is_empty());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(record.flow_status, FlowStatus::Success);
    }

    #[tokio::test]
    async fn branch_transport_failure_walks_no_successors() {
        let connector = ScriptedConnector::new().fail(
            "cat /proc/loadavg",
            SessionError::ChannelFailed {
                reason: "connection reset".to_string(),
            },
        );
        let harness = Harness::new(connector);
        let graph = FlowGraph::new()
            .with_node(Node::new("start", NodeKind::Start))
            .with_node(connect_node("connect"))
            .with_node(branch_node("branch", "cat /proc/loadavg", "0.00"))
            .with_node(Node::new("yes", NodeKind::End))
            .with_node(Node::new("no", NodeKind::End))
            .connect("start", "connect")
            .connect("connect", "branch")
            .connect_labeled("branch", "yes", TRUE_BRANCH)
            .connect_labeled("branch", "no", FALSE_BRANCH);

        let record = harness.run(&graph).await;

        let outcome = record.outcome("branch").expect("branch outcome");
        assert!(!outcome.success);
        assert!(outcome.error.is_some());
        assert!(record.outcome("yes").is_none());
        assert!(record.outcome("no").is_none());
        assert_eq!(record.flow_status, FlowStatus::Success);
    }

    #[tokio::test]
    async fn branch_nonzero_exit_walks_no_successors() {
        let connector = ScriptedConnector::new()
            .respond("pgrep app", CommandOutput::new(1, "", ""));
        let harness = Harness::new(connector);
        let graph = FlowGraph::new()
            .with_node(Node::new("start", NodeKind::Start))
            .with_node(connect_node("connect"))
            .with_node(branch_node("branch", "pgrep app", "1"))
            .with_node(Node::new("no", NodeKind::End))
            .connect("start", "connect")
            .connect("connect", "branch")
            .connect_labeled("branch", "no", FALSE_BRANCH);

        let record = harness.run(&graph).await;
        assert!(record.outcome("branch").is_some_and(|o| !o.success));
        assert!(record.outcome("no").is_none());
    }

    #[tokio::test]
    async fn branch_follows_only_matching_label() {
        let connector = ScriptedConnector::new()
            .respond("cat /etc/os-release", CommandOutput::new(0, "ID=raspbian\n", ""));
        let harness = Harness::new(connector);
        let graph = FlowGraph::new()
            .with_node(Node::new("start", NodeKind::Start))
            .with_node(connect_node("connect"))
            .with_node(branch_node("branch", "cat /etc/os-release", "raspbian"))
            .with_node(Node::new("yes", NodeKind::End))
            .with_node(Node::new("no", NodeKind::End))
            .with_node(Node::new("unlabeled", NodeKind::End))
            .connect("start", "connect")
            .connect("connect", "branch")
            .connect_labeled("branch", "no", FALSE_BRANCH)
            .connect_labeled("branch", "yes", TRUE_BRANCH)
            .connect("branch", "unlabeled");

        let record = harness.run(&graph).await;

        assert_eq!(
            record.outcome("branch").and_then(|o| o.condition_met),
            Some(true)
        );
        assert!(record.outcome("yes").is_some());
        assert!(record.outcome("no").is_none());
        assert!(record.outcome("unlabeled").is_none());
    }

    #[tokio::test]
    async fn branch_without_matching_edge_ends_the_path() {
        let connector =
            ScriptedConnector::new().respond("hostname", CommandOutput::new(0, "pi\n", ""));
        let harness = Harness::new(connector);
        let graph = FlowGraph::new()
            .with_node(Node::new("start", NodeKind::Start))
            .with_node(connect_node("connect"))
            .with_node(branch_node("branch", "hostname", "server"))
            .with_node(Node::new("yes", NodeKind::End))
            .connect("start", "connect")
            .connect("connect", "branch")
            .connect_labeled("branch", "yes", TRUE_BRANCH);

        let record = harness.run(&graph).await;

        let outcome = record.outcome("branch").expect("branch outcome");
        assert!(outcome.success);
        assert_eq!(outcome.condition_met, Some(false));
        assert!(record.outcome("yes").is_none());
        assert_eq!(record.flow_status, FlowStatus::Success);
    }

    #[tokio::test]
    async fn successors_run_in_edge_list_order() {
        let harness = Harness::new(ScriptedConnector::new());
        let graph = FlowGraph::new()
            .with_node(Node::new("start", NodeKind::Start))
            .with_node(connect_node("connect"))
            .with_node(command_node("b", "second"))
            .with_node(command_node("a", "first"))
            .with_node(command_node("a2", "first-child"))
            .connect("start", "connect")
            .connect("connect", "a")
            .connect("connect", "b")
            .connect("a", "a2");

        harness.run(&graph).await;

        assert_eq!(
            harness.connector.commands(),
            ["first", "first-child", "second"]
        );
    }

    #[tokio::test]
    async fn missing_start_aborts_the_run() {
        let harness = Harness::new(ScriptedConnector::new());
        let graph = FlowGraph::new().with_node(Node::new("end", NodeKind::End));

        let record = harness.run(&graph).await;

        assert_eq!(record.flow_status, FlowStatus::Error);
        assert!(record.error.as_deref().is_some_and(|e| e.contains("no start node")));
        assert!(record.results.is_empty());
        assert!(record.last_run_at.is_some());
    }

    #[tokio::test]
    async fn cycle_aborts_before_any_node_runs() {
        let harness = Harness::new(ScriptedConnector::new());
        let graph = FlowGraph::new()
            .with_node(Node::new("start", NodeKind::Start))
            .with_node(command_node("a", "a"))
            .with_node(command_node("b", "b"))
            .connect("start", "a")
            .connect("a", "b")
            .connect("b", "a");

        let record = harness.run(&graph).await;
        assert_eq!(record.flow_status, FlowStatus::Error);
        assert!(record.results.is_empty());
    }

    #[tokio::test]
    async fn dangling_edge_is_skipped() {
        let harness = Harness::new(ScriptedConnector::new());
        let graph = FlowGraph::new()
            .with_node(Node::new("start", NodeKind::Start))
            .with_node(Node::new("end", NodeKind::End))
            .connect("start", "ghost")
            .connect("start", "end");

        let record = harness.run(&graph).await;
        assert_eq!(record.flow_status, FlowStatus::Success);
        assert!(record.outcome("end").is_some());
    }

    #[tokio::test]
    async fn depth_limit_aborts_and_closes_session() {
        let mut harness = Harness::new(ScriptedConnector::new());
        harness.config.max_walk_depth = 3;
        let graph = FlowGraph::new()
            .with_node(Node::new("start", NodeKind::Start))
            .with_node(connect_node("connect"))
            .with_node(command_node("a", "a"))
            .with_node(command_node("b", "b"))
            .connect("start", "connect")
            .connect("connect", "a")
            .connect("a", "b");

        let record = harness.run(&graph).await;

        assert_eq!(record.flow_status, FlowStatus::Error);
        assert!(record.outcome("a").is_some());
        assert!(record.outcome("b").is_none());
        assert_eq!(harness.connector.opens(), 1);
        assert_eq!(harness.connector.closes(), 1);
    }

    #[tokio::test]
    async fn foreign_device_aborts_and_closes_open_session() {
        let harness = Harness::new(ScriptedConnector::new());
        let foreign = harness.devices.register(
            UserId::new(),
            ConnectionDescriptor::new("other.local", "pi", Credential::password("x")),
        );
        let graph = FlowGraph::new()
            .with_node(Node::new("start", NodeKind::Start))
            .with_node(connect_node("connect"))
            .with_node(
                Node::new("steal", NodeKind::ConnectRemoteHost)
                    .with_parameters(json!({ "deviceId": foreign.to_string() })),
            )
            .connect("start", "connect")
            .connect("connect", "steal");

        let record = harness.run(&graph).await;

        assert_eq!(record.flow_status, FlowStatus::Error);
        assert!(record.error.as_deref().is_some_and(|e| e.contains("access denied")));
        assert_eq!(record.node_status("steal"), Some(NodeStatus::Running));
        assert_eq!(harness.connector.opens(), harness.connector.closes());
    }

    #[tokio::test]
    async fn reconnecting_closes_each_session_once() {
        let harness = Harness::new(ScriptedConnector::new());
        let graph = FlowGraph::new()
            .with_node(Node::new("start", NodeKind::Start))
            .with_node(connect_node("c1"))
            .with_node(connect_node("c2"))
            .with_node(connect_node("c3"))
            .connect("start", "c1")
            .connect("c1", "c2")
            .connect("c2", "c3");

        harness.run(&graph).await;

        assert_eq!(harness.connector.opens(), 3);
        assert_eq!(harness.connector.closes(), 3);
    }

    #[tokio::test]
    async fn malformed_parameters_fail_only_that_node() {
        let harness = Harness::new(ScriptedConnector::new());
        let graph = FlowGraph::new()
            .with_node(Node::new("start", NodeKind::Start))
            .with_node(
                Node::new("gpio", NodeKind::SetRemoteOutput).with_parameters(json!({ "pin": "x" })),
            )
            .with_node(
                Node::new("sms", NodeKind::SendTextMessage)
                    .with_parameters(json!({ "recipient": "+15550100", "message": "hi" })),
            )
            .connect("start", "gpio")
            .connect("start", "sms");

        let record = harness.run(&graph).await;

        assert!(record.outcome("gpio").is_some_and(|o| !o.success));
        assert!(record.outcome("sms").is_some_and(|o| o.success));
        assert_eq!(record.flow_status, FlowStatus::Success);
    }
}
