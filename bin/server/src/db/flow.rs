//! Flow repository.

use super::{backend, check_owner};
use async_trait::async_trait;
use boardflow_core::{FlowId, UserId};
use boardflow_flow::{FlowGraph, FlowStatus, FlowStore, RunRecord, StoreError};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

/// Error stored on runs that were cut off by a restart.
pub const INTERRUPTED_RUN_MESSAGE: &str = "Run interrupted by server restart";

/// Row type for graph queries.
#[derive(FromRow)]
struct GraphRow {
    owner_id: String,
    graph_data: serde_json::Value,
}

impl GraphRow {
    fn try_into_graph(self, flow_id: FlowId, owner_id: UserId) -> Result<FlowGraph, StoreError> {
        check_owner(&resource(flow_id), &self.owner_id, owner_id)?;
        serde_json::from_value(self.graph_data).map_err(|e| StoreError::Backend {
            details: format!("invalid graph for {}: {}", resource(flow_id), e),
        })
    }
}

/// Row type for run record queries.
#[derive(FromRow)]
struct RunRow {
    owner_id: String,
    flow_status: String,
    last_run_at: Option<DateTime<Utc>>,
    run_error: Option<String>,
    results: serde_json::Value,
}

impl RunRow {
    fn try_into_record(self, flow_id: FlowId, owner_id: UserId) -> Result<RunRecord, StoreError> {
        check_owner(&resource(flow_id), &self.owner_id, owner_id)?;
        let flow_status =
            FlowStatus::parse(&self.flow_status).ok_or_else(|| StoreError::Backend {
                details: format!(
                    "invalid status '{}' for {}",
                    self.flow_status,
                    resource(flow_id)
                ),
            })?;
        let results = serde_json::from_value(self.results).map_err(|e| StoreError::Backend {
            details: format!("invalid results for {}: {}", resource(flow_id), e),
        })?;
        Ok(RunRecord {
            flow_status,
            last_run_at: self.last_run_at,
            error: self.run_error,
            results,
        })
    }
}

fn resource(flow_id: FlowId) -> String {
    format!("flow {flow_id}")
}

/// Repository for saved flows and their run records.
pub struct FlowRepository {
    pool: PgPool,
}

impl FlowRepository {
    /// Creates a new repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Marks every flow still flagged as running as failed.
    ///
    /// Runs live in process memory, so any `running` row found at startup
    /// belongs to a process that no longer exists.
    pub async fn reset_stale_runs(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE flows
            SET flow_status = 'error', run_error = $1, updated_at = NOW()
            WHERE flow_status = 'running'
            "#,
        )
        .bind(INTERRUPTED_RUN_MESSAGE)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl FlowStore for FlowRepository {
    async fn load_graph(&self, flow_id: FlowId, owner_id: UserId) -> Result<FlowGraph, StoreError> {
        let row: Option<GraphRow> = sqlx::query_as(
            r#"
            SELECT owner_id, graph_data
            FROM flows
            WHERE id = $1
            "#,
        )
        .bind(flow_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.ok_or_else(|| StoreError::NotFound {
            resource: resource(flow_id),
        })?
        .try_into_graph(flow_id, owner_id)
    }

    async fn load_run_record(
        &self,
        flow_id: FlowId,
        owner_id: UserId,
    ) -> Result<RunRecord, StoreError> {
        let row: Option<RunRow> = sqlx::query_as(
            r#"
            SELECT owner_id, flow_status, last_run_at, run_error, results
            FROM flows
            WHERE id = $1
            "#,
        )
        .bind(flow_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.ok_or_else(|| StoreError::NotFound {
            resource: resource(flow_id),
        })?
        .try_into_record(flow_id, owner_id)
    }

    async fn persist_results(&self, flow_id: FlowId, record: &RunRecord) -> Result<(), StoreError> {
        let results = serde_json::to_value(&record.results).map_err(|e| StoreError::Backend {
            details: format!("failed to encode results for {}: {}", resource(flow_id), e),
        })?;

        let result = sqlx::query(
            r#"
            UPDATE flows
            SET flow_status = $2, last_run_at = $3, run_error = $4, results = $5,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(flow_id.to_string())
        .bind(record.flow_status.as_str())
        .bind(record.last_run_at)
        .bind(&record.error)
        .bind(&results)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                resource: resource(flow_id),
            });
        }
        Ok(())
    }
}
