//! Trigger dispatcher: maps domain events to workflow executions.
//!
//! An inbound event (invoice overdue, broken agreement, webhook, manual)
//! selects every active workflow of the tenant whose trigger type matches,
//! suppresses repeats inside the dedup window, and starts one execution per
//! surviving match with the event payload as initial context.
//!
//! The dispatcher only accepts a live engine; simulation engines are for
//! authors dry-running drafts and must never receive real events.

use crate::config::DispatchConfig;
use crate::error::DispatchError;
use chrono::Utc;
use dunflow_core::{ClientId, ExecutionId, TenantId};
use dunflow_workflow::adapter::ActionAdapter;
use dunflow_workflow::context::ExecutionContext;
use dunflow_workflow::engine::{EngineMode, ExecutionEngine};
use dunflow_workflow::node::TriggerKind;
use dunflow_workflow::store::{ExecutionStore, WorkflowRepository};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// A domain event that may start workflow executions.
#[derive(Debug, Clone)]
pub struct DomainEvent {
    /// The trigger class of the event.
    pub trigger_type: TriggerKind,
    /// The tenant the event belongs to.
    pub tenant_id: TenantId,
    /// The client case the event concerns.
    pub client_id: ClientId,
    /// Event payload, merged into the initial execution context.
    pub payload: JsonValue,
}

/// Starts executions for domain events.
pub struct TriggerDispatcher<R, S, A> {
    repository: R,
    store: S,
    engine: Arc<ExecutionEngine<S, A>>,
    config: DispatchConfig,
}

impl<R, S, A> TriggerDispatcher<R, S, A>
where
    R: WorkflowRepository,
    S: ExecutionStore,
    A: ActionAdapter,
{
    /// Creates a new dispatcher.
    ///
    /// # Errors
    ///
    /// Returns `SimulationEngine` when handed a simulation-mode engine.
    pub fn new(
        repository: R,
        store: S,
        engine: Arc<ExecutionEngine<S, A>>,
        config: DispatchConfig,
    ) -> Result<Self, DispatchError> {
        if engine.mode() != EngineMode::Live {
            return Err(DispatchError::SimulationEngine);
        }
        Ok(Self {
            repository,
            store,
            engine,
            config,
        })
    }

    /// Dispatches an event, returning the started execution ids.
    ///
    /// Returns an empty list when no active workflow matches. A workflow
    /// that fails to start (for example, an invalid stale graph) is logged
    /// and skipped; it never blocks the other matches.
    ///
    /// # Errors
    ///
    /// Returns a store error if workflow lookup or dedup lookup fails.
    pub async fn dispatch(&self, event: DomainEvent) -> Result<Vec<ExecutionId>, DispatchError> {
        let workflows = self
            .repository
            .list_active_by_trigger(event.tenant_id, event.trigger_type)
            .await?;

        tracing::debug!(
            tenant_id = %event.tenant_id,
            client_id = %event.client_id,
            trigger_type = %event.trigger_type,
            matches = workflows.len(),
            "dispatching event"
        );

        let mut started = Vec::new();
        for workflow in workflows {
            if self.suppressed(&workflow.id, event.client_id).await? {
                tracing::debug!(
                    workflow_id = %workflow.id,
                    client_id = %event.client_id,
                    "repeat trigger suppressed within dedup window"
                );
                continue;
            }

            let context = ExecutionContext::from_value(event.payload.clone());
            match self.engine.start(&workflow, event.client_id, context).await {
                Ok(id) => {
                    tracing::info!(
                        execution_id = %id,
                        workflow_id = %workflow.id,
                        client_id = %event.client_id,
                        "execution started from event"
                    );
                    started.push(id);
                }
                Err(error) => {
                    tracing::error!(
                        workflow_id = %workflow.id,
                        error = %error,
                        "failed to start execution for event"
                    );
                }
            }
        }
        Ok(started)
    }

    /// Returns true when the most recent execution of this workflow for the
    /// client is inside the dedup window.
    async fn suppressed(
        &self,
        workflow_id: &dunflow_core::WorkflowId,
        client_id: ClientId,
    ) -> Result<bool, DispatchError> {
        let Some(last) = self.store.last_started_at(*workflow_id, client_id).await? else {
            return Ok(false);
        };
        Ok(Utc::now() - last < self.config.dedup_window())
    }
}
