//! Flow execution engine for boardflow.
//!
//! This crate runs node/edge flow graphs against remote boards:
//!
//! - **Graph Model**: nodes, labeled edges and structural validation
//! - **Handlers**: one action per node kind, producing outcome records
//! - **Orchestrator**: depth-first walk threading one remote session
//! - **Results**: per-node outcomes and flow status, persisted after each step
//! - **Service**: `FlowRunner` with `start_run`, `run_direct` and `get_run_status`

pub mod condition;
pub mod config;
pub mod context;
pub mod edge;
pub mod error;
pub mod gpio;
pub mod graph;
pub mod handlers;
pub mod memory;
pub mod node;
pub mod orchestrator;
pub mod outcome;
pub mod results;
pub mod service;
pub mod store;

pub use config::EngineConfig;
pub use context::ExecutionContext;
pub use edge::Edge;
pub use error::{FlowError, GraphError, NodeError, ServiceError, StoreError};
pub use graph::FlowGraph;
pub use node::{Node, NodeAction, NodeId, NodeKind};
pub use orchestrator::Orchestrator;
pub use outcome::OutcomeRecord;
pub use results::{FlowStatus, NodeStatus, ResultEntry, ResultSink, ResultStore, RunRecord};
pub use service::{FlowRunner, RunTicket};
pub use store::{DeviceRegistry, DeviceStatus, FlowResultSink, FlowStore};
