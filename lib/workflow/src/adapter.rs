//! Action adapter: the boundary to real-world effects.
//!
//! Message senders, webhook callers, CRM status updaters and the AI
//! negotiation agent are external collaborators. The engine only sees this
//! trait: it hands over the node's data (templates already rendered) and the
//! execution context, and merges whatever context the adapter returns.
//!
//! Adapter calls may be slow and are invoked under a timeout; failures are
//! retried with backoff by the engine, guarded by the effect ledger.

use crate::node::{NodeConfig, NodeId};
use async_trait::async_trait;
use dunflow_core::{ClientId, ExecutionId, TenantId};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// One action to perform on behalf of an execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    /// The execution the action belongs to.
    pub execution_id: ExecutionId,
    /// The tenant owning the workflow.
    pub tenant_id: TenantId,
    /// The client case the action targets.
    pub client_id: ClientId,
    /// The effect node being executed.
    pub node_id: NodeId,
    /// The node's human-readable name.
    pub node_name: String,
    /// The node's configuration, with templates already rendered.
    pub config: NodeConfig,
    /// Snapshot of the execution context.
    pub context: JsonValue,
}

/// The result of a successful action.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActionOutput {
    /// Context to merge into the execution (message ids, API responses, ...).
    pub context: JsonValue,
}

impl ActionOutput {
    /// An output carrying no context.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            context: JsonValue::Null,
        }
    }

    /// An output merging the given context object.
    #[must_use]
    pub fn with_context(context: JsonValue) -> Self {
        Self { context }
    }
}

/// Errors from action execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// The action failed (network error, provider rejection, ...).
    Failed { reason: String },
    /// The action did not complete within the engine's timeout.
    Timeout,
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { reason } => write!(f, "action failed: {reason}"),
            Self::Timeout => write!(f, "action timed out"),
        }
    }
}

impl std::error::Error for AdapterError {}

/// Trait through which a node's real-world effect is performed.
#[async_trait]
pub trait ActionAdapter: Send + Sync {
    /// Executes an action, returning context to merge on success.
    async fn execute(&self, request: &ActionRequest) -> Result<ActionOutput, AdapterError>;
}

/// An adapter that records every request and succeeds with a fixed output.
#[derive(Clone, Default)]
pub struct RecordingAdapter {
    requests: Arc<Mutex<Vec<ActionRequest>>>,
    output: JsonValue,
}

impl RecordingAdapter {
    /// Creates a recording adapter returning empty output.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a recording adapter returning the given context on success.
    #[must_use]
    pub fn with_output(output: JsonValue) -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            output,
        }
    }

    /// Returns the requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<ActionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns how many requests were received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl ActionAdapter for RecordingAdapter {
    async fn execute(&self, request: &ActionRequest) -> Result<ActionOutput, AdapterError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        Ok(ActionOutput::with_context(self.output.clone()))
    }
}

/// An adapter that fails a configured number of times before succeeding.
#[derive(Clone)]
pub struct FlakyAdapter {
    failures_remaining: Arc<Mutex<u32>>,
    calls: Arc<Mutex<u32>>,
}

impl FlakyAdapter {
    /// Creates an adapter that fails the first `failures` calls.
    #[must_use]
    pub fn failing_times(failures: u32) -> Self {
        Self {
            failures_remaining: Arc::new(Mutex::new(failures)),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Returns how many times the adapter was invoked.
    #[must_use]
    pub fn call_count(&self) -> u32 {
        *self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ActionAdapter for FlakyAdapter {
    async fn execute(&self, _request: &ActionRequest) -> Result<ActionOutput, AdapterError> {
        *self.calls.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        let mut remaining = self
            .failures_remaining
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *remaining > 0 {
            *remaining -= 1;
            return Err(AdapterError::Failed {
                reason: "provider unavailable".to_string(),
            });
        }
        Ok(ActionOutput::empty())
    }
}
