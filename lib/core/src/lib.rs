//! Core domain types and utilities for the dunflow platform.
//!
//! This crate provides the foundational identifier types and error handling
//! used throughout the dunflow collections-automation engine.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ClientId, EdgeId, ExecutionId, TenantId, WorkflowId};
