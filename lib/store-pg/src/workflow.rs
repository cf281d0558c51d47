//! PostgreSQL workflow repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dunflow_core::{TenantId, WorkflowId};
use dunflow_workflow::definition::{Workflow, WorkflowMetadata, WorkflowSummary};
use dunflow_workflow::envelope::Envelope;
use dunflow_workflow::graph::WorkflowGraph;
use dunflow_workflow::node::TriggerKind;
use dunflow_workflow::store::{StoreError, WorkflowRepository};
use sqlx::{FromRow, PgPool};
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

/// Row type for workflow queries.
#[derive(FromRow)]
struct WorkflowRow {
    id: String,
    tenant_id: String,
    name: String,
    description: Option<String>,
    trigger_type: String,
    is_active: bool,
    graph: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WorkflowRow {
    fn try_into_workflow(self) -> Result<Workflow, StoreError> {
        let id = WorkflowId::from_str(&self.id)
            .map_err(|e| decode(format!("invalid workflow id '{}': {e}", self.id)))?;
        let tenant_id = TenantId::from_str(&self.tenant_id)
            .map_err(|e| decode(format!("invalid tenant id '{}': {e}", self.tenant_id)))?;
        let trigger_type = TriggerKind::from_str(&self.trigger_type).map_err(decode)?;

        let envelope: Envelope<WorkflowGraph> =
            serde_json::from_value(self.graph).map_err(|e| decode(e.to_string()))?;
        if !envelope.is_current_version() {
            tracing::warn!(
                workflow_id = %id,
                version = envelope.version,
                "workflow graph stored with an older envelope version"
            );
        }
        let mut graph = envelope.into_payload();
        graph.rebuild_index_map();

        Ok(Workflow {
            id,
            tenant_id,
            metadata: WorkflowMetadata {
                name: self.name,
                description: self.description,
                created_at: self.created_at,
                updated_at: self.updated_at,
            },
            trigger_type,
            is_active: self.is_active,
            graph,
        })
    }
}

const WORKFLOW_COLUMNS: &str =
    "id, tenant_id, name, description, trigger_type, is_active, graph, created_at, updated_at";

/// Repository for workflow definitions backed by PostgreSQL.
#[derive(Clone)]
pub struct PgWorkflowRepository {
    pool: PgPool,
}

impl PgWorkflowRepository {
    /// Creates a new repository.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkflowRepository for PgWorkflowRepository {
    async fn save(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let graph = serde_json::to_value(Envelope::new(&workflow.graph))
            .map_err(|e| decode(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO workflows
                (id, tenant_id, name, description, trigger_type, is_active, graph,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                trigger_type = EXCLUDED.trigger_type,
                is_active = EXCLUDED.is_active,
                graph = EXCLUDED.graph,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(workflow.id.to_string())
        .bind(workflow.tenant_id.to_string())
        .bind(&workflow.metadata.name)
        .bind(&workflow.metadata.description)
        .bind(workflow.trigger_type.as_str())
        .bind(workflow.is_active)
        .bind(graph)
        .bind(workflow.metadata.created_at)
        .bind(workflow.metadata.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn load(&self, id: WorkflowId) -> Result<Workflow, StoreError> {
        let row: Option<WorkflowRow> = sqlx::query_as(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = $1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(row) => row.try_into_workflow(),
            None => Err(StoreError::WorkflowNotFound { workflow_id: id }),
        }
    }

    async fn list_active_by_trigger(
        &self,
        tenant_id: TenantId,
        trigger_type: TriggerKind,
    ) -> Result<Vec<Workflow>, StoreError> {
        let rows: Vec<WorkflowRow> = sqlx::query_as(&format!(
            r#"
            SELECT {WORKFLOW_COLUMNS} FROM workflows
            WHERE tenant_id = $1 AND trigger_type = $2 AND is_active
            ORDER BY created_at
            "#
        ))
        .bind(tenant_id.to_string())
        .bind(trigger_type.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(WorkflowRow::try_into_workflow).collect()
    }

    async fn list(&self, tenant_id: TenantId) -> Result<Vec<WorkflowSummary>, StoreError> {
        let rows: Vec<WorkflowRow> = sqlx::query_as(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE tenant_id = $1 ORDER BY created_at"
        ))
        .bind(tenant_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter()
            .map(|row| row.try_into_workflow().map(|w| WorkflowSummary::from(&w)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dunflow_workflow::edge::Edge;
    use dunflow_workflow::node::{Node, NodeConfig, TriggerNodeConfig};

    fn sample_workflow() -> Workflow {
        let mut workflow = Workflow::new(
            TenantId::new(),
            "Régua de cobrança",
            TriggerKind::InvoiceOverdue,
        );
        let trigger = Node::new(
            "Fatura vencida",
            NodeConfig::Trigger(TriggerNodeConfig::InvoiceOverdue { days: 1 }),
        );
        let end = Node::new("Fim", NodeConfig::EndFlow);
        let trigger_id = trigger.id;
        let end_id = end.id;
        workflow.graph.add_node(trigger);
        workflow.graph.add_node(end);
        workflow
            .graph
            .add_edge(trigger_id, end_id, Edge::new())
            .unwrap();
        workflow
    }

    #[test]
    fn row_roundtrip_preserves_workflow() {
        let workflow = sample_workflow();
        let row = WorkflowRow {
            id: workflow.id.to_string(),
            tenant_id: workflow.tenant_id.to_string(),
            name: workflow.metadata.name.clone(),
            description: None,
            trigger_type: workflow.trigger_type.as_str().to_string(),
            is_active: workflow.is_active,
            graph: serde_json::to_value(Envelope::new(&workflow.graph)).unwrap(),
            created_at: workflow.metadata.created_at,
            updated_at: workflow.metadata.updated_at,
        };

        let decoded = row.try_into_workflow().expect("decode");
        assert_eq!(decoded.id, workflow.id);
        assert_eq!(decoded.trigger_type, TriggerKind::InvoiceOverdue);
        assert_eq!(decoded.graph.node_count(), 2);
        assert_eq!(decoded.graph.edge_count(), 1);
        // Index map was rebuilt: entry lookup works.
        assert!(decoded.graph.entry_node().is_ok());
    }

    #[test]
    fn row_with_bad_id_fails_decode() {
        let workflow = sample_workflow();
        let row = WorkflowRow {
            id: "not-an-id".to_string(),
            tenant_id: workflow.tenant_id.to_string(),
            name: workflow.metadata.name.clone(),
            description: None,
            trigger_type: workflow.trigger_type.as_str().to_string(),
            is_active: false,
            graph: serde_json::to_value(Envelope::new(&workflow.graph)).unwrap(),
            created_at: workflow.metadata.created_at,
            updated_at: workflow.metadata.updated_at,
        };

        assert!(matches!(
            row.try_into_workflow(),
            Err(StoreError::Serialization { .. })
        ));
    }
}
