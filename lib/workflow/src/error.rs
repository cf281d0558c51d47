//! Error types for the workflow crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `GraphError`: Low-level graph construction (nodes, edges, handles)
//! - `ValidationError`: Structural violations reported by the validator
//! - `EngineError`: Execution engine operations (wraps store errors)

use crate::edge::Handle;
use crate::execution::ExecutionStatus;
use crate::node::{NodeId, TriggerKind};
use crate::store::StoreError;
use dunflow_core::ExecutionId;
use std::fmt;

/// Errors from graph construction.
///
/// These errors contain only information available at the graph layer.
/// Workflow-level context (like workflow_id) should be added by the caller
/// using `.context()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Node with the given ID was not found in the graph.
    NodeNotFound { node_id: NodeId },
    /// An edge out of a branching node must carry a handle.
    HandleRequired { node_id: NodeId },
    /// The branching node already has an edge for this handle.
    DuplicateHandle { node_id: NodeId, handle: Handle },
    /// An edge out of a non-branching node cannot carry a handle.
    UnexpectedHandle { node_id: NodeId },
    /// The non-branching node already has a successor.
    SuccessorExists { node_id: NodeId },
    /// The graph has no entry node.
    NoEntryNode,
    /// The graph has more than one entry node.
    MultipleEntryNodes { node_ids: Vec<NodeId> },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NodeNotFound { node_id } => {
                write!(f, "node not found: {node_id}")
            }
            Self::HandleRequired { node_id } => {
                write!(f, "edges leaving branching node {node_id} must carry a handle")
            }
            Self::DuplicateHandle { node_id, handle } => {
                write!(f, "node {node_id} already has a '{handle}' edge")
            }
            Self::UnexpectedHandle { node_id } => {
                write!(f, "edges leaving node {node_id} cannot carry a handle")
            }
            Self::SuccessorExists { node_id } => {
                write!(f, "node {node_id} already has a successor")
            }
            Self::NoEntryNode => write!(f, "graph has no entry node"),
            Self::MultipleEntryNodes { node_ids } => {
                write!(f, "graph has {} entry nodes", node_ids.len())
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// A structural violation found by the workflow validator.
///
/// Validation collects every violation instead of failing fast, so the
/// editor collaborator can surface all of them at once. A workflow with any
/// violation cannot be activated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The graph has no entry node.
    NoEntryNode,
    /// The graph has more than one node without incoming edges.
    MultipleEntryNodes { node_ids: Vec<NodeId> },
    /// The entry node is not a trigger.
    EntryNotTrigger { node_id: NodeId },
    /// The entry trigger does not match the workflow's declared trigger type.
    TriggerMismatch {
        node_id: NodeId,
        expected: TriggerKind,
        actual: TriggerKind,
    },
    /// A node cannot be reached from the entry node.
    Unreachable { node_id: NodeId },
    /// A branching node is missing one of its handle edges.
    MissingBranch { node_id: NodeId, handle: Handle },
    /// A branching node has extra or unlabelled outgoing edges.
    ExtraBranch { node_id: NodeId },
    /// A non-branching node has more than one outgoing edge.
    AmbiguousSuccessor { node_id: NodeId },
    /// A terminal node has outgoing edges.
    TerminalSuccessor { node_id: NodeId },
    /// A cycle does not pass through any loop node.
    UnguardedCycle { node_ids: Vec<NodeId> },
    /// A loop node declares a zero iteration cap.
    InvalidLoopCap { node_id: NodeId },
}

impl ValidationError {
    /// Returns the node the violation is attached to, when there is one.
    #[must_use]
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            Self::NoEntryNode | Self::MultipleEntryNodes { .. } | Self::UnguardedCycle { .. } => {
                None
            }
            Self::EntryNotTrigger { node_id }
            | Self::TriggerMismatch { node_id, .. }
            | Self::Unreachable { node_id }
            | Self::MissingBranch { node_id, .. }
            | Self::ExtraBranch { node_id }
            | Self::AmbiguousSuccessor { node_id }
            | Self::TerminalSuccessor { node_id }
            | Self::InvalidLoopCap { node_id } => Some(*node_id),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoEntryNode => write!(f, "workflow has no entry node"),
            Self::MultipleEntryNodes { node_ids } => {
                write!(f, "workflow has {} entry nodes", node_ids.len())
            }
            Self::EntryNotTrigger { node_id } => {
                write!(f, "entry node {node_id} is not a trigger")
            }
            Self::TriggerMismatch {
                node_id,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "trigger node {node_id} reacts to '{actual}' but the workflow declares '{expected}'"
                )
            }
            Self::Unreachable { node_id } => {
                write!(f, "node {node_id} is unreachable from the entry node")
            }
            Self::MissingBranch { node_id, handle } => {
                write!(f, "branching node {node_id} is missing its '{handle}' edge")
            }
            Self::ExtraBranch { node_id } => {
                write!(f, "branching node {node_id} has extra outgoing edges")
            }
            Self::AmbiguousSuccessor { node_id } => {
                write!(f, "node {node_id} has more than one successor")
            }
            Self::TerminalSuccessor { node_id } => {
                write!(f, "terminal node {node_id} has outgoing edges")
            }
            Self::UnguardedCycle { node_ids } => {
                write!(
                    f,
                    "cycle through {} nodes has no loop node bounding it",
                    node_ids.len()
                )
            }
            Self::InvalidLoopCap { node_id } => {
                write!(f, "loop node {node_id} declares zero max_iterations")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Errors from execution engine operations.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Execution store operation failed.
    Store(StoreError),
    /// The workflow graph failed validation.
    InvalidGraph { errors: Vec<ValidationError> },
    /// Execution not found.
    ExecutionNotFound { execution_id: ExecutionId },
    /// The execution is not in a status the operation accepts.
    InvalidStatus {
        execution_id: ExecutionId,
        status: ExecutionStatus,
        expected: &'static str,
    },
    /// The operation is only available in simulation mode.
    SimulationOnly,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "execution store error: {e}"),
            Self::InvalidGraph { errors } => {
                write!(f, "workflow graph has {} validation errors", errors.len())
            }
            Self::ExecutionNotFound { execution_id } => {
                write!(f, "execution not found: {execution_id}")
            }
            Self::InvalidStatus {
                execution_id,
                status,
                expected,
            } => {
                write!(
                    f,
                    "execution {execution_id} is {status}, expected {expected}"
                )
            }
            Self::SimulationOnly => {
                write!(f, "operation is only available on a simulation engine")
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}
