//! Scheduler for dunflow workflow executions.
//!
//! This crate provides:
//!
//! - **Timer Scheduler**: Polls for due timer-suspended executions and
//!   resumes them under a lease, with a watchdog sweep for orphans
//! - **Trigger Dispatcher**: Maps domain events to executions with a
//!   configurable dedup window
//! - **Configuration**: Environment-sourced scheduler and dispatch settings

pub mod config;
pub mod dispatch;
pub mod error;
pub mod timer;

pub use config::{DispatchConfig, SchedulerConfig};
pub use dispatch::{DomainEvent, TriggerDispatcher};
pub use error::{DispatchError, SchedulerError};
pub use timer::TimerScheduler;
