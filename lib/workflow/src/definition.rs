//! Workflow definition types.
//!
//! A workflow is a named automation owned by a tenant: a trigger type, an
//! active flag, and a directed graph of nodes and edges. The definition is
//! what the (out-of-scope) editor reads and writes; running executions only
//! ever see a snapshot of the graph taken at start time.

use crate::error::ValidationError;
use crate::graph::WorkflowGraph;
use crate::node::{NodeConfig, TriggerKind};
use crate::validator;
use chrono::{DateTime, Utc};
use dunflow_core::{TenantId, WorkflowId};
use serde::{Deserialize, Serialize};

/// Metadata for a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    /// Human-readable name for this workflow.
    pub name: String,
    /// Description of what this workflow does.
    pub description: Option<String>,
    /// When this workflow was created.
    pub created_at: DateTime<Utc>,
    /// When this workflow was last updated.
    pub updated_at: DateTime<Utc>,
}

impl WorkflowMetadata {
    /// Creates new metadata with default values.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A complete workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique identifier for this workflow.
    pub id: WorkflowId,
    /// The tenant owning this workflow.
    pub tenant_id: TenantId,
    /// Workflow metadata.
    pub metadata: WorkflowMetadata,
    /// The domain event class that starts this workflow.
    pub trigger_type: TriggerKind,
    /// Whether the trigger dispatcher considers this workflow.
    pub is_active: bool,
    /// The workflow graph (nodes and edges).
    pub graph: WorkflowGraph,
}

impl Workflow {
    /// Creates a new, inactive workflow with the given name.
    #[must_use]
    pub fn new(tenant_id: TenantId, name: impl Into<String>, trigger_type: TriggerKind) -> Self {
        Self {
            id: WorkflowId::new(),
            tenant_id,
            metadata: WorkflowMetadata::new(name),
            trigger_type,
            is_active: false,
            graph: WorkflowGraph::new(),
        }
    }

    /// Returns the workflow name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Validates the workflow, returning every structural violation.
    ///
    /// On top of the graph checks, the entry trigger must react to the
    /// workflow's declared trigger type.
    #[must_use]
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = validator::validate(&self.graph);

        if let Ok(entry) = self.graph.entry_node() {
            if let NodeConfig::Trigger(config) = &entry.config {
                let actual = config.kind();
                if actual != self.trigger_type {
                    errors.push(ValidationError::TriggerMismatch {
                        node_id: entry.id,
                        expected: self.trigger_type,
                        actual,
                    });
                }
            }
        }

        errors
    }

    /// Activates the workflow.
    ///
    /// # Errors
    ///
    /// Returns the validation errors when the graph has any; a workflow with
    /// violations can never be activated.
    pub fn activate(&mut self) -> Result<(), Vec<ValidationError>> {
        let errors = self.validate();
        if !errors.is_empty() {
            return Err(errors);
        }
        self.is_active = true;
        self.touch();
        Ok(())
    }

    /// Deactivates the workflow.
    pub fn deactivate(&mut self) {
        self.is_active = false;
        self.touch();
    }

    /// Returns a snapshot of the graph for a new execution.
    #[must_use]
    pub fn snapshot(&self) -> WorkflowGraph {
        self.graph.clone()
    }

    /// Marks the workflow as updated (bumps updated_at timestamp).
    pub fn touch(&mut self) {
        self.metadata.updated_at = Utc::now();
    }
}

/// Summary information about a workflow (for listings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    /// Workflow ID.
    pub id: WorkflowId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Workflow name.
    pub name: String,
    /// Trigger type.
    pub trigger_type: TriggerKind,
    /// Whether active.
    pub is_active: bool,
    /// Number of nodes in the graph.
    pub node_count: usize,
    /// Last updated timestamp.
    pub updated_at: DateTime<Utc>,
}

impl From<&Workflow> for WorkflowSummary {
    fn from(workflow: &Workflow) -> Self {
        Self {
            id: workflow.id,
            tenant_id: workflow.tenant_id,
            name: workflow.metadata.name.clone(),
            trigger_type: workflow.trigger_type,
            is_active: workflow.is_active,
            node_count: workflow.graph.node_count(),
            updated_at: workflow.metadata.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::Edge;
    use crate::node::{Node, TriggerNodeConfig};

    fn linear_workflow(trigger_type: TriggerKind, entry: TriggerNodeConfig) -> Workflow {
        let mut workflow = Workflow::new(TenantId::new(), "Régua de cobrança", trigger_type);
        let trigger = Node::new("Gatilho", NodeConfig::Trigger(entry));
        let end = Node::new("Fim", NodeConfig::EndFlow);
        let trigger_id = trigger.id;
        let end_id = end.id;
        workflow.graph.add_node(trigger);
        workflow.graph.add_node(end);
        workflow.graph.add_edge(trigger_id, end_id, Edge::new()).unwrap();
        workflow
    }

    #[test]
    fn new_workflow_starts_inactive() {
        let workflow = Workflow::new(TenantId::new(), "Teste", TriggerKind::Manual);
        assert!(!workflow.is_active);
        assert_eq!(workflow.name(), "Teste");
    }

    #[test]
    fn activate_valid_workflow() {
        let mut workflow = linear_workflow(
            TriggerKind::InvoiceOverdue,
            TriggerNodeConfig::InvoiceOverdue { days: 1 },
        );
        workflow.activate().expect("activate");
        assert!(workflow.is_active);
    }

    #[test]
    fn activate_refuses_invalid_graph() {
        let mut workflow = Workflow::new(TenantId::new(), "Vazio", TriggerKind::Manual);
        let result = workflow.activate();
        assert!(result.is_err());
        assert!(!workflow.is_active);
    }

    #[test]
    fn validate_catches_trigger_mismatch() {
        let workflow = linear_workflow(TriggerKind::AgreementBroken, TriggerNodeConfig::Manual);
        let errors = workflow.validate();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::TriggerMismatch { .. })));
    }

    #[test]
    fn snapshot_is_independent_of_edits() {
        let mut workflow = linear_workflow(
            TriggerKind::Manual,
            TriggerNodeConfig::Manual,
        );
        let snapshot = workflow.snapshot();
        let before = snapshot.node_count();

        workflow
            .graph
            .add_node(Node::new("Nova", NodeConfig::EndFlow));

        assert_eq!(snapshot.node_count(), before);
        assert_eq!(workflow.graph.node_count(), before + 1);
    }

    #[test]
    fn summary_from_workflow() {
        let workflow = linear_workflow(
            TriggerKind::InvoiceOverdue,
            TriggerNodeConfig::InvoiceOverdue { days: 5 },
        );
        let summary = WorkflowSummary::from(&workflow);
        assert_eq!(summary.id, workflow.id);
        assert_eq!(summary.node_count, 2);
        assert!(!summary.is_active);
    }

    #[test]
    fn workflow_serde_roundtrip() {
        let workflow = linear_workflow(
            TriggerKind::InvoiceOverdue,
            TriggerNodeConfig::InvoiceOverdue { days: 3 },
        );
        let json = serde_json::to_string(&workflow).expect("serialize");
        let mut parsed: Workflow = serde_json::from_str(&json).expect("deserialize");
        parsed.graph.rebuild_index_map();

        assert_eq!(workflow.id, parsed.id);
        assert_eq!(workflow.name(), parsed.name());
        assert_eq!(parsed.graph.node_count(), 2);
    }
}
