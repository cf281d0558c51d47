//! Execution state: one running instance of a workflow bound to a case.
//!
//! An execution snapshots its workflow graph at creation time, so edits to
//! the live workflow never affect in-flight executions. All mutation goes
//! through the execution engine, which persists the execution after every
//! step; the struct here only encodes the state machine.
//!
//! Status transitions are monotonic except the Running↔Suspended cycle:
//! `Running → {Suspended(_) | Done | Error | Cancelled}` and
//! `Suspended(_) → Running` on resume.

use crate::context::ExecutionContext;
use crate::graph::WorkflowGraph;
use crate::node::{Node, NodeId};
use chrono::{DateTime, Utc};
use dunflow_core::{ClientId, ExecutionId, TenantId, WorkflowId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Why a suspended execution is waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitReason {
    /// Waiting for a timer to fire (`wake_at` is set).
    Timer,
    /// Waiting for an inbound reply from the debtor.
    Response,
    /// Waiting for the simulator operator to pick a branch.
    Choice,
}

/// The overall status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ExecutionStatus {
    /// Actively stepping through nodes.
    Running,
    /// Durably suspended, waiting to be resumed.
    Suspended(WaitReason),
    /// Finished successfully.
    Done,
    /// Finished with an error (reason recorded in context).
    Error,
    /// Cancelled by an operator or workflow deactivation.
    Cancelled,
}

impl ExecutionStatus {
    /// Returns the persisted string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Suspended(WaitReason::Timer) => "waiting_timer",
            Self::Suspended(WaitReason::Response) => "waiting_response",
            Self::Suspended(WaitReason::Choice) => "waiting_choice",
            Self::Done => "done",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true if this is a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Cancelled)
    }

    /// Returns the wait reason if the execution is suspended.
    #[must_use]
    pub fn wait_reason(&self) -> Option<WaitReason> {
        match self {
            Self::Suspended(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "waiting_timer" => Ok(Self::Suspended(WaitReason::Timer)),
            "waiting_response" => Ok(Self::Suspended(WaitReason::Response)),
            "waiting_choice" => Ok(Self::Suspended(WaitReason::Choice)),
            "done" => Ok(Self::Done),
            "error" => Ok(Self::Error),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

impl From<ExecutionStatus> for String {
    fn from(status: ExecutionStatus) -> Self {
        status.as_str().to_string()
    }
}

impl TryFrom<String> for ExecutionStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, String> {
        s.parse()
    }
}

/// One running instance of a workflow bound to a client case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    /// Unique identifier for this execution.
    pub id: ExecutionId,
    /// The workflow this execution was started from.
    pub workflow_id: WorkflowId,
    /// The tenant owning the workflow.
    pub tenant_id: TenantId,
    /// The client case this execution runs against.
    pub client_id: ClientId,
    /// The graph snapshot captured at creation time.
    pub graph: WorkflowGraph,
    /// Current status.
    pub status: ExecutionStatus,
    /// The node the execution is at.
    pub current_node_id: NodeId,
    /// Accumulated variable map.
    pub context: ExecutionContext,
    /// When a timer-suspended execution should be woken.
    pub wake_at: Option<DateTime<Utc>>,
    /// Per-node consecutive action failure counters (retry limit, backoff).
    pub attempts: HashMap<NodeId, u32>,
    /// Per-node effect invocation sequence numbers (idempotency keys).
    ///
    /// Bumped after every completed effect so a loop-body revisit gets a
    /// fresh key; retries of a failed attempt share the sequence number
    /// until one completes.
    pub invocations: HashMap<NodeId, u32>,
    /// When the execution was created.
    pub created_at: DateTime<Utc>,
    /// When the execution was last persisted.
    pub updated_at: DateTime<Utc>,
}

impl Execution {
    /// Creates a new running execution positioned at the entry node.
    #[must_use]
    pub fn new(
        workflow_id: WorkflowId,
        tenant_id: TenantId,
        client_id: ClientId,
        graph: WorkflowGraph,
        entry_node_id: NodeId,
        context: ExecutionContext,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ExecutionId::new(),
            workflow_id,
            tenant_id,
            client_id,
            graph,
            status: ExecutionStatus::Running,
            current_node_id: entry_node_id,
            context,
            wake_at: None,
            attempts: HashMap::new(),
            invocations: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuilds transient graph state after deserialization from a store.
    pub fn after_load(&mut self) {
        self.graph.rebuild_index_map();
    }

    /// Returns the node the execution is currently at.
    #[must_use]
    pub fn current_node(&self) -> Option<&Node> {
        self.graph.get_node(self.current_node_id)
    }

    /// Moves the execution to the given node.
    pub fn advance_to(&mut self, node_id: NodeId) {
        self.current_node_id = node_id;
        self.touch();
    }

    /// Suspends the execution with the given reason.
    pub fn suspend(&mut self, reason: WaitReason, wake_at: Option<DateTime<Utc>>) {
        self.status = ExecutionStatus::Suspended(reason);
        self.wake_at = wake_at;
        self.touch();
    }

    /// Resumes a suspended execution.
    pub fn resume(&mut self) {
        self.status = ExecutionStatus::Running;
        self.wake_at = None;
        self.touch();
    }

    /// Marks the execution as finished successfully.
    pub fn complete(&mut self) {
        self.status = ExecutionStatus::Done;
        self.wake_at = None;
        self.touch();
    }

    /// Marks the execution as failed, recording the reason in context.
    pub fn fail(&mut self, reason: impl Into<String>, node_id: NodeId) {
        self.context.record_error(reason, node_id);
        self.status = ExecutionStatus::Error;
        self.wake_at = None;
        self.touch();
    }

    /// Cancels the execution, clearing any pending timer.
    pub fn cancel(&mut self) {
        self.status = ExecutionStatus::Cancelled;
        self.wake_at = None;
        self.touch();
    }

    /// Returns the consecutive failure counter for a node.
    #[must_use]
    pub fn attempt(&self, node_id: NodeId) -> u32 {
        self.attempts.get(&node_id).copied().unwrap_or(0)
    }

    /// Increments the failure counter for a node, returning the new value.
    pub fn bump_attempt(&mut self, node_id: NodeId) -> u32 {
        let counter = self.attempts.entry(node_id).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Resets the failure counter after a completed effect.
    pub fn reset_attempts(&mut self, node_id: NodeId) {
        self.attempts.remove(&node_id);
    }

    /// Returns the effect invocation sequence number for a node.
    #[must_use]
    pub fn invocation(&self, node_id: NodeId) -> u32 {
        self.invocations.get(&node_id).copied().unwrap_or(0)
    }

    /// Advances the effect invocation sequence after a completed effect.
    pub fn bump_invocation(&mut self, node_id: NodeId) -> u32 {
        let counter = self.invocations.entry(node_id).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Bumps the updated_at timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Returns true if the execution has finished.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
