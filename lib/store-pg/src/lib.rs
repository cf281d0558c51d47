//! PostgreSQL persistence for the dunflow platform.
//!
//! Implements the `WorkflowRepository` and `ExecutionStore` traits from
//! `dunflow-workflow` on top of sqlx. Graph snapshots and contexts are
//! stored as JSONB; claim queries use `FOR UPDATE SKIP LOCKED` so scheduler
//! workers never contend on the same rows.

pub mod execution;
pub mod schema;
pub mod workflow;

pub use execution::PgExecutionStore;
pub use schema::ensure_schema;
pub use workflow::PgWorkflowRepository;
