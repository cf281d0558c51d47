//! Error types for the scheduler crate.

use dunflow_workflow::{EngineError, StoreError};
use std::fmt;

/// Errors from timer scheduler operations.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerError {
    /// Execution store operation failed.
    Store(StoreError),
    /// The engine failed while resuming an execution.
    Engine(EngineError),
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::Engine(e) => write!(f, "engine error: {e}"),
        }
    }
}

impl std::error::Error for SchedulerError {}

impl From<StoreError> for SchedulerError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<EngineError> for SchedulerError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

/// Errors from trigger dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchError {
    /// The dispatcher was handed a simulation engine.
    SimulationEngine,
    /// Workflow or execution store operation failed.
    Store(StoreError),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SimulationEngine => {
                write!(f, "trigger dispatcher requires a live engine")
            }
            Self::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<StoreError> for DispatchError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_error_display() {
        let err = SchedulerError::Store(StoreError::Backend {
            reason: "pool exhausted".to_string(),
        });
        assert!(err.to_string().contains("pool exhausted"));
    }

    #[test]
    fn dispatch_error_display() {
        let err = DispatchError::SimulationEngine;
        assert!(err.to_string().contains("live engine"));
    }
}
