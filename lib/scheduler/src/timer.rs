//! Durable timer scheduler.
//!
//! Polls the execution store for timer-suspended executions whose wake time
//! has passed, claims each under a lease so concurrent workers never resume
//! the same execution, and hands them to the engine. A watchdog sweep in the
//! same tick reclaims executions left in `running` by a crashed worker; the
//! effect ledger makes re-driving them safe.

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use chrono::{Duration, Utc};
use dunflow_workflow::adapter::ActionAdapter;
use dunflow_workflow::engine::ExecutionEngine;
use dunflow_workflow::execution::Execution;
use dunflow_workflow::store::ExecutionStore;
use std::sync::Arc;
use tokio::sync::watch;

/// Resumes timer-suspended executions when they come due.
pub struct TimerScheduler<S, A> {
    store: S,
    engine: Arc<ExecutionEngine<S, A>>,
    config: SchedulerConfig,
}

impl<S, A> TimerScheduler<S, A>
where
    S: ExecutionStore,
    A: ActionAdapter,
{
    /// Creates a new scheduler over the given store and engine.
    pub fn new(store: S, engine: Arc<ExecutionEngine<S, A>>, config: SchedulerConfig) -> Self {
        Self {
            store,
            engine,
            config,
        }
    }

    /// Runs the poll loop until `shutdown` flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.config.poll_interval_seconds));
        tracing::info!(
            worker_id = %self.config.worker_id,
            poll_interval_seconds = self.config.poll_interval_seconds,
            "timer scheduler started"
        );
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(error) = self.tick().await {
                        tracing::error!(error = %error, "scheduler tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!(worker_id = %self.config.worker_id, "timer scheduler stopping");
                    break;
                }
            }
        }
    }

    /// One poll: resume due timers, then sweep for orphaned executions.
    ///
    /// Returns how many executions were resumed.
    ///
    /// # Errors
    ///
    /// Returns a store error if claiming fails; individual resume failures
    /// are logged and do not abort the tick.
    pub async fn tick(&self) -> Result<usize, SchedulerError> {
        let now = Utc::now();
        let lease_until = now + Duration::seconds(self.config.lease_seconds);
        let worker = self.config.worker_id.as_str();

        let due = self
            .store
            .claim_due(now, lease_until, worker, self.config.batch_size)
            .await?;
        let mut resumed = 0;
        for execution in due {
            if self.resume_one(execution).await {
                resumed += 1;
            }
        }

        let cutoff = now - Duration::seconds(self.config.stale_after_seconds);
        let stale = self
            .store
            .claim_stale_running(cutoff, lease_until, worker, self.config.batch_size)
            .await?;
        for execution in stale {
            tracing::warn!(
                execution_id = %execution.id,
                updated_at = %execution.updated_at,
                "reclaiming stalled execution"
            );
            if self.resume_one(execution).await {
                resumed += 1;
            }
        }

        Ok(resumed)
    }

    /// Resumes a claimed execution and releases its lease.
    async fn resume_one(&self, execution: Execution) -> bool {
        let id = execution.id;
        let outcome = self.engine.resume_due(execution).await;
        if let Err(error) = self
            .store
            .release(id, self.config.worker_id.as_str())
            .await
        {
            tracing::error!(execution_id = %id, error = %error, "failed to release lease");
        }
        match outcome {
            Ok(resumed) => {
                tracing::debug!(
                    execution_id = %id,
                    status = %resumed.status,
                    "execution resumed"
                );
                true
            }
            Err(error) => {
                tracing::error!(execution_id = %id, error = %error, "failed to resume execution");
                false
            }
        }
    }
}
