//! PostgreSQL execution store.
//!
//! Executions are one row each; `update` writes the full mutable state in a
//! single statement, which is the engine's atomic persistence boundary.
//! Claims take a lease (`locked_by`/`locked_until`) inside an `UPDATE ...
//! WHERE id IN (SELECT ... FOR UPDATE SKIP LOCKED)` so concurrent scheduler
//! workers never double-claim.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dunflow_core::{ClientId, ExecutionId, TenantId, WorkflowId};
use dunflow_workflow::context::ExecutionContext;
use dunflow_workflow::envelope::Envelope;
use dunflow_workflow::execution::{Execution, ExecutionStatus};
use dunflow_workflow::graph::WorkflowGraph;
use dunflow_workflow::node::NodeId;
use dunflow_workflow::store::{EffectKey, ExecutionStore, StoreError};
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use std::str::FromStr;

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend {
        reason: e.to_string(),
    }
}

fn decode(reason: impl Into<String>) -> StoreError {
    StoreError::Serialization {
        reason: reason.into(),
    }
}

/// Row type for execution queries.
#[derive(FromRow)]
struct ExecutionRow {
    id: String,
    workflow_id: String,
    tenant_id: String,
    client_id: String,
    status: String,
    current_node_id: String,
    context: serde_json::Value,
    snapshot: serde_json::Value,
    attempts: serde_json::Value,
    invocations: serde_json::Value,
    wake_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ExecutionRow {
    fn try_into_execution(self) -> Result<Execution, StoreError> {
        let id = ExecutionId::from_str(&self.id)
            .map_err(|e| decode(format!("invalid execution id '{}': {e}", self.id)))?;
        let workflow_id = WorkflowId::from_str(&self.workflow_id)
            .map_err(|e| decode(format!("invalid workflow id '{}': {e}", self.workflow_id)))?;
        let tenant_id = TenantId::from_str(&self.tenant_id)
            .map_err(|e| decode(format!("invalid tenant id '{}': {e}", self.tenant_id)))?;
        let client_id = ClientId::from_str(&self.client_id)
            .map_err(|e| decode(format!("invalid client id '{}': {e}", self.client_id)))?;
        let status = ExecutionStatus::from_str(&self.status).map_err(decode)?;
        let current_node_id = NodeId::from_str(&self.current_node_id).map_err(|e| {
            decode(format!(
                "invalid node id '{}': {e}",
                self.current_node_id
            ))
        })?;

        let envelope: Envelope<WorkflowGraph> =
            serde_json::from_value(self.snapshot).map_err(|e| decode(e.to_string()))?;
        if !envelope.is_current_version() {
            tracing::warn!(
                execution_id = %id,
                version = envelope.version,
                "execution snapshot stored with an older envelope version"
            );
        }
        let mut graph = envelope.into_payload();
        graph.rebuild_index_map();

        let context = ExecutionContext::from_value(self.context);
        let attempts: HashMap<NodeId, u32> =
            serde_json::from_value(self.attempts).map_err(|e| decode(e.to_string()))?;
        let invocations: HashMap<NodeId, u32> =
            serde_json::from_value(self.invocations).map_err(|e| decode(e.to_string()))?;

        Ok(Execution {
            id,
            workflow_id,
            tenant_id,
            client_id,
            graph,
            status,
            current_node_id,
            context,
            wake_at: self.wake_at,
            attempts,
            invocations,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const EXECUTION_COLUMNS: &str = "id, workflow_id, tenant_id, client_id, status, \
     current_node_id, context, snapshot, attempts, invocations, wake_at, \
     created_at, updated_at";

/// Execution store backed by PostgreSQL.
#[derive(Clone)]
pub struct PgExecutionStore {
    pool: PgPool,
}

impl PgExecutionStore {
    /// Creates a new store.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn encode_execution(
        execution: &Execution,
    ) -> Result<
        (
            serde_json::Value,
            serde_json::Value,
            serde_json::Value,
            serde_json::Value,
        ),
        StoreError,
    > {
        let context = execution.context.to_value();
        let snapshot = serde_json::to_value(Envelope::new(&execution.graph))
            .map_err(|e| decode(e.to_string()))?;
        let attempts =
            serde_json::to_value(&execution.attempts).map_err(|e| decode(e.to_string()))?;
        let invocations =
            serde_json::to_value(&execution.invocations).map_err(|e| decode(e.to_string()))?;
        Ok((context, snapshot, attempts, invocations))
    }
}

#[async_trait]
impl ExecutionStore for PgExecutionStore {
    async fn insert(&self, execution: &Execution) -> Result<(), StoreError> {
        let (context, snapshot, attempts, invocations) = Self::encode_execution(execution)?;

        sqlx::query(
            r#"
            INSERT INTO workflow_executions
                (id, workflow_id, tenant_id, client_id, status, current_node_id,
                 context, snapshot, attempts, invocations, wake_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(execution.tenant_id.to_string())
        .bind(execution.client_id.to_string())
        .bind(execution.status.as_str())
        .bind(execution.current_node_id.to_string())
        .bind(context)
        .bind(snapshot)
        .bind(attempts)
        .bind(invocations)
        .bind(execution.wake_at)
        .bind(execution.created_at)
        .bind(execution.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn update(&self, execution: &Execution) -> Result<(), StoreError> {
        let (context, _snapshot, attempts, invocations) = Self::encode_execution(execution)?;

        // The snapshot is immutable after insert and deliberately not
        // rewritten here.
        let result = sqlx::query(
            r#"
            UPDATE workflow_executions SET
                status = $2,
                current_node_id = $3,
                context = $4,
                attempts = $5,
                invocations = $6,
                wake_at = $7,
                updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.status.as_str())
        .bind(execution.current_node_id.to_string())
        .bind(context)
        .bind(attempts)
        .bind(invocations)
        .bind(execution.wake_at)
        .bind(execution.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ExecutionNotFound {
                execution_id: execution.id,
            });
        }
        Ok(())
    }

    async fn load(&self, id: ExecutionId) -> Result<Execution, StoreError> {
        let row: Option<ExecutionRow> = sqlx::query_as(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE id = $1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(row) => row.try_into_execution(),
            None => Err(StoreError::ExecutionNotFound { execution_id: id }),
        }
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        worker: &str,
        limit: usize,
    ) -> Result<Vec<Execution>, StoreError> {
        let rows: Vec<ExecutionRow> = sqlx::query_as(&format!(
            r#"
            UPDATE workflow_executions SET locked_by = $1, locked_until = $2
            WHERE id IN (
                SELECT id FROM workflow_executions
                WHERE status = 'waiting_timer'
                  AND wake_at <= $3
                  AND (locked_until IS NULL OR locked_until <= $3)
                ORDER BY wake_at
                LIMIT $4
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {EXECUTION_COLUMNS}
            "#
        ))
        .bind(worker)
        .bind(lease_until)
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(ExecutionRow::try_into_execution).collect()
    }

    async fn claim_stale_running(
        &self,
        cutoff: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        worker: &str,
        limit: usize,
    ) -> Result<Vec<Execution>, StoreError> {
        let rows: Vec<ExecutionRow> = sqlx::query_as(&format!(
            r#"
            UPDATE workflow_executions SET locked_by = $1, locked_until = $2
            WHERE id IN (
                SELECT id FROM workflow_executions
                WHERE status = 'running'
                  AND updated_at <= $3
                  AND (locked_until IS NULL OR locked_until <= $4)
                ORDER BY updated_at
                LIMIT $5
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {EXECUTION_COLUMNS}
            "#
        ))
        .bind(worker)
        .bind(lease_until)
        .bind(cutoff)
        .bind(Utc::now())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(ExecutionRow::try_into_execution).collect()
    }

    async fn release(&self, id: ExecutionId, worker: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE workflow_executions SET locked_by = NULL, locked_until = NULL
            WHERE id = $1 AND locked_by = $2
            "#,
        )
        .bind(id.to_string())
        .bind(worker)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn record_effect(&self, key: &EffectKey, output: &serde_json::Value) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO execution_effects (execution_id, node_id, attempt, output, recorded_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (execution_id, node_id, attempt) DO NOTHING
            "#,
        )
        .bind(key.execution_id.to_string())
        .bind(key.node_id.to_string())
        .bind(i64::from(key.attempt))
        .bind(output)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn completed_effect(
        &self,
        key: &EffectKey,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let row: Option<(serde_json::Value,)> = sqlx::query_as(
            r#"
            SELECT output FROM execution_effects
            WHERE execution_id = $1 AND node_id = $2 AND attempt = $3
            "#,
        )
        .bind(key.execution_id.to_string())
        .bind(key.node_id.to_string())
        .bind(i64::from(key.attempt))
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(row.map(|(output,)| output))
    }

    async fn last_started_at(
        &self,
        workflow_id: WorkflowId,
        client_id: ClientId,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let row: Option<(Option<DateTime<Utc>>,)> = sqlx::query_as(
            r#"
            SELECT MAX(created_at) FROM workflow_executions
            WHERE workflow_id = $1 AND client_id = $2
            "#,
        )
        .bind(workflow_id.to_string())
        .bind(client_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(row.and_then(|(max,)| max))
    }

    async fn active_for_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Vec<ExecutionId>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT id FROM workflow_executions
            WHERE workflow_id = $1
              AND status NOT IN ('done', 'error', 'cancelled')
            ORDER BY id
            "#,
        )
        .bind(workflow_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter()
            .map(|(id,)| {
                ExecutionId::from_str(&id)
                    .map_err(|e| decode(format!("invalid execution id '{id}': {e}")))
            })
            .collect()
    }
}
