//! Workflow engine for the dunflow collections-automation platform.
//!
//! This crate provides the core workflow execution engine, including:
//!
//! - **Graph Model**: Directed graphs using petgraph with typed nodes and
//!   handle-tagged edges
//! - **Validator**: Structural validation collecting every violation
//! - **Condition Evaluator**: Pure branch resolution over the context
//! - **Template Resolver**: Single-pass `{{variable}}` substitution
//! - **Execution**: Durable state machine for workflow runs, with timer,
//!   response and choice suspension
//! - **Engine**: Crash-safe node-by-node stepping with an idempotent effect
//!   ledger, plus a side-effect-free simulation mode
//! - **Stores**: Persistence traits with in-memory implementations

pub mod adapter;
pub mod condition;
pub mod context;
pub mod definition;
pub mod edge;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod execution;
pub mod graph;
pub mod node;
pub mod store;
pub mod template;
pub mod validator;

pub use adapter::{ActionAdapter, ActionOutput, ActionRequest, AdapterError};
pub use condition::{ComparisonOp, ConditionSpec};
pub use context::ExecutionContext;
pub use definition::{Workflow, WorkflowMetadata, WorkflowSummary};
pub use edge::{Edge, EdgeRef, Handle};
pub use engine::{EngineConfig, EngineMode, ExecutionEngine};
pub use envelope::Envelope;
pub use error::{EngineError, GraphError, ValidationError};
pub use execution::{Execution, ExecutionStatus, WaitReason};
pub use graph::WorkflowGraph;
pub use node::{Node, NodeConfig, NodeId, NodeKind, TriggerKind};
pub use store::{
    EffectKey, ExecutionStore, InMemoryExecutionStore, InMemoryWorkflowRepository, StoreError,
    WorkflowRepository,
};
pub use template::{Rendered, resolve};
