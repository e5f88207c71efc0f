//! HTTP routes over the flow runner.

use crate::error::ApiError;
use crate::owner::Owner;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use boardflow_core::FlowId;
use boardflow_flow::{FlowGraph, FlowRunner, RunRecord};
use serde::Serialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

/// Shared state for request handlers.
#[derive(Clone)]
pub struct AppState {
    pub runner: FlowRunner,
}

impl AppState {
    /// Creates application state.
    #[must_use]
    pub fn new(runner: FlowRunner) -> Self {
        Self { runner }
    }
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/flows/run", post(run_direct))
        .route("/api/flows/{flow_id}/run", post(start_run))
        .route("/api/flows/{flow_id}/status", get(run_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct StartRunResponse {
    accepted: bool,
}

fn parse_flow_id(raw: &str) -> Result<FlowId, ApiError> {
    raw.parse().map_err(|e: boardflow_core::ParseIdError| ApiError::InvalidFlowId {
        id: raw.to_string(),
        reason: e.reason,
    })
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn start_run(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(flow_id): Path<String>,
) -> Result<(StatusCode, Json<StartRunResponse>), ApiError> {
    let flow_id = parse_flow_id(&flow_id)?;
    let ticket = state.runner.start_run(flow_id, owner).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(StartRunResponse {
            accepted: ticket.accepted,
        }),
    ))
}

async fn run_direct(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(graph): Json<FlowGraph>,
) -> Json<RunRecord> {
    Json(state.runner.run_direct(graph, owner).await)
}

async fn run_status(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(flow_id): Path<String>,
) -> Result<Json<RunRecord>, ApiError> {
    let flow_id = parse_flow_id(&flow_id)?;
    let record = state.runner.get_run_status(flow_id, owner).await?;
    Ok(Json(record))
}
