//! Persistence traits for workflows and executions.
//!
//! The engine is generic over these traits: production uses the PostgreSQL
//! implementations from `dunflow-store-pg`, while tests and the simulator
//! use the in-memory implementations provided here.
//!
//! `ExecutionStore::update` is the engine's crash-safety boundary: it must
//! write status, current node, context, attempt counters and wake time in
//! one atomic operation. The effect ledger (`record_effect` /
//! `completed_effect`) is the idempotency side of the same contract.

use crate::definition::{Workflow, WorkflowSummary};
use crate::execution::{Execution, ExecutionStatus, WaitReason};
use crate::node::{NodeId, TriggerKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dunflow_core::{ClientId, ExecutionId, TenantId, WorkflowId};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Errors from store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Execution not found.
    ExecutionNotFound { execution_id: ExecutionId },
    /// Workflow not found.
    WorkflowNotFound { workflow_id: WorkflowId },
    /// Payload could not be (de)serialized.
    Serialization { reason: String },
    /// The backing store failed.
    Backend { reason: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExecutionNotFound { execution_id } => {
                write!(f, "execution not found: {execution_id}")
            }
            Self::WorkflowNotFound { workflow_id } => {
                write!(f, "workflow not found: {workflow_id}")
            }
            Self::Serialization { reason } => write!(f, "serialization failed: {reason}"),
            Self::Backend { reason } => write!(f, "store backend failed: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Identity of one external effect: which execution, at which node, on which
/// attempt. Recorded before an execution advances past an effect node so a
/// retried step can skip the adapter call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectKey {
    /// The execution the effect belongs to.
    pub execution_id: ExecutionId,
    /// The effect node.
    pub node_id: NodeId,
    /// The attempt counter at invocation time.
    pub attempt: u32,
}

impl EffectKey {
    /// Creates a new effect key.
    #[must_use]
    pub fn new(execution_id: ExecutionId, node_id: NodeId, attempt: u32) -> Self {
        Self {
            execution_id,
            node_id,
            attempt,
        }
    }
}

impl fmt::Display for EffectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.execution_id, self.node_id, self.attempt)
    }
}

/// Persistence of execution state.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Inserts a newly created execution.
    async fn insert(&self, execution: &Execution) -> Result<(), StoreError>;

    /// Persists an execution's full mutable state in one atomic write.
    async fn update(&self, execution: &Execution) -> Result<(), StoreError>;

    /// Loads an execution by ID.
    async fn load(&self, id: ExecutionId) -> Result<Execution, StoreError>;

    /// Claims timer-suspended executions whose wake time has passed.
    ///
    /// A claim takes a lease until `lease_until` for `worker`; executions
    /// already leased (and not expired) are skipped, so two workers never
    /// resume the same execution concurrently.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        worker: &str,
        limit: usize,
    ) -> Result<Vec<Execution>, StoreError>;

    /// Claims executions stuck in `running` that have not been persisted
    /// since `cutoff` (orphaned by a crashed worker).
    async fn claim_stale_running(
        &self,
        cutoff: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        worker: &str,
        limit: usize,
    ) -> Result<Vec<Execution>, StoreError>;

    /// Releases a lease held by `worker`.
    async fn release(&self, id: ExecutionId, worker: &str) -> Result<(), StoreError>;

    /// Records a completed effect. Recording the same key twice keeps the
    /// first output.
    async fn record_effect(&self, key: &EffectKey, output: &JsonValue) -> Result<(), StoreError>;

    /// Returns the recorded output for an effect key, if it completed.
    async fn completed_effect(&self, key: &EffectKey) -> Result<Option<JsonValue>, StoreError>;

    /// Returns when the most recent execution of this workflow for this
    /// client was created. Used by the trigger dedup window.
    async fn last_started_at(
        &self,
        workflow_id: WorkflowId,
        client_id: ClientId,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Returns the ids of non-terminal executions of a workflow. Used when
    /// deactivating a workflow to cancel outstanding timers.
    async fn active_for_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Vec<ExecutionId>, StoreError>;
}

/// Storage and lookup of workflow definitions.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Inserts or replaces a workflow.
    async fn save(&self, workflow: &Workflow) -> Result<(), StoreError>;

    /// Loads a workflow by ID.
    async fn load(&self, id: WorkflowId) -> Result<Workflow, StoreError>;

    /// Lists active workflows of a tenant matching a trigger kind.
    async fn list_active_by_trigger(
        &self,
        tenant_id: TenantId,
        trigger_type: TriggerKind,
    ) -> Result<Vec<Workflow>, StoreError>;

    /// Lists summaries of a tenant's workflows.
    async fn list(&self, tenant_id: TenantId) -> Result<Vec<WorkflowSummary>, StoreError>;
}

#[derive(Default)]
struct InMemoryExecutions {
    executions: HashMap<ExecutionId, Execution>,
    leases: HashMap<ExecutionId, (String, DateTime<Utc>)>,
    effects: HashMap<String, JsonValue>,
}

/// In-memory execution store for tests and simulator dry-runs.
#[derive(Clone, Default)]
pub struct InMemoryExecutionStore {
    inner: Arc<Mutex<InMemoryExecutions>>,
}

impl InMemoryExecutionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryExecutions> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the number of recorded effects (test observability).
    #[must_use]
    pub fn effect_count(&self) -> usize {
        self.lock().effects.len()
    }

    fn lease_available(
        leases: &HashMap<ExecutionId, (String, DateTime<Utc>)>,
        id: ExecutionId,
        now: DateTime<Utc>,
    ) -> bool {
        match leases.get(&id) {
            Some((_, until)) => *until <= now,
            None => true,
        }
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn insert(&self, execution: &Execution) -> Result<(), StoreError> {
        self.lock()
            .executions
            .insert(execution.id, execution.clone());
        Ok(())
    }

    async fn update(&self, execution: &Execution) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if !inner.executions.contains_key(&execution.id) {
            return Err(StoreError::ExecutionNotFound {
                execution_id: execution.id,
            });
        }
        inner.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn load(&self, id: ExecutionId) -> Result<Execution, StoreError> {
        self.lock()
            .executions
            .get(&id)
            .cloned()
            .ok_or(StoreError::ExecutionNotFound { execution_id: id })
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        worker: &str,
        limit: usize,
    ) -> Result<Vec<Execution>, StoreError> {
        let mut inner = self.lock();
        let mut due: Vec<ExecutionId> = inner
            .executions
            .values()
            .filter(|e| {
                e.status == ExecutionStatus::Suspended(WaitReason::Timer)
                    && e.wake_at.is_some_and(|wake| wake <= now)
            })
            .map(|e| e.id)
            .filter(|&id| Self::lease_available(&inner.leases, id, now))
            .collect();
        due.sort_by_key(ExecutionId::as_ulid);
        due.truncate(limit);

        for &id in &due {
            inner.leases.insert(id, (worker.to_string(), lease_until));
        }

        Ok(due
            .into_iter()
            .filter_map(|id| inner.executions.get(&id).cloned())
            .collect())
    }

    async fn claim_stale_running(
        &self,
        cutoff: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        worker: &str,
        limit: usize,
    ) -> Result<Vec<Execution>, StoreError> {
        let now = Utc::now();
        let mut inner = self.lock();
        let mut stale: Vec<ExecutionId> = inner
            .executions
            .values()
            .filter(|e| e.status == ExecutionStatus::Running && e.updated_at <= cutoff)
            .map(|e| e.id)
            .filter(|&id| Self::lease_available(&inner.leases, id, now))
            .collect();
        stale.sort_by_key(ExecutionId::as_ulid);
        stale.truncate(limit);

        for &id in &stale {
            inner.leases.insert(id, (worker.to_string(), lease_until));
        }

        Ok(stale
            .into_iter()
            .filter_map(|id| inner.executions.get(&id).cloned())
            .collect())
    }

    async fn release(&self, id: ExecutionId, worker: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let held_by_worker = inner
            .leases
            .get(&id)
            .is_some_and(|(holder, _)| holder == worker);
        if held_by_worker {
            inner.leases.remove(&id);
        }
        Ok(())
    }

    async fn record_effect(&self, key: &EffectKey, output: &JsonValue) -> Result<(), StoreError> {
        self.lock()
            .effects
            .entry(key.to_string())
            .or_insert_with(|| output.clone());
        Ok(())
    }

    async fn completed_effect(&self, key: &EffectKey) -> Result<Option<JsonValue>, StoreError> {
        Ok(self.lock().effects.get(&key.to_string()).cloned())
    }

    async fn last_started_at(
        &self,
        workflow_id: WorkflowId,
        client_id: ClientId,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .lock()
            .executions
            .values()
            .filter(|e| e.workflow_id == workflow_id && e.client_id == client_id)
            .map(|e| e.created_at)
            .max())
    }

    async fn active_for_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Vec<ExecutionId>, StoreError> {
        let mut active: Vec<ExecutionId> = self
            .lock()
            .executions
            .values()
            .filter(|e| e.workflow_id == workflow_id && !e.status.is_terminal())
            .map(|e| e.id)
            .collect();
        active.sort_by_key(ExecutionId::as_ulid);
        Ok(active)
    }
}

/// In-memory workflow repository for tests and simulator dry-runs.
#[derive(Clone, Default)]
pub struct InMemoryWorkflowRepository {
    inner: Arc<Mutex<HashMap<WorkflowId, Workflow>>>,
}

impl InMemoryWorkflowRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WorkflowId, Workflow>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn save(&self, workflow: &Workflow) -> Result<(), StoreError> {
        self.lock().insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn load(&self, id: WorkflowId) -> Result<Workflow, StoreError> {
        self.lock()
            .get(&id)
            .cloned()
            .ok_or(StoreError::WorkflowNotFound { workflow_id: id })
    }

    async fn list_active_by_trigger(
        &self,
        tenant_id: TenantId,
        trigger_type: TriggerKind,
    ) -> Result<Vec<Workflow>, StoreError> {
        Ok(self
            .lock()
            .values()
            .filter(|w| w.tenant_id == tenant_id && w.is_active && w.trigger_type == trigger_type)
            .cloned()
            .collect())
    }

    async fn list(&self, tenant_id: TenantId) -> Result<Vec<WorkflowSummary>, StoreError> {
        Ok(self
            .lock()
            .values()
            .filter(|w| w.tenant_id == tenant_id)
            .map(WorkflowSummary::from)
            .collect())
    }
}
