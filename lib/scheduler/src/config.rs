//! Scheduler and dispatcher configuration.
//!
//! Loaded via the `config` crate from environment variables with `__` as
//! the nesting separator (e.g. `ENGINE__MAX_ACTION_ATTEMPTS=5`).

use dunflow_workflow::EngineConfig;
use serde::Deserialize;

/// Configuration for the timer scheduler.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between polls for due executions.
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,

    /// How long a claim lease lasts before another worker may reclaim it.
    #[serde(default = "default_lease_seconds")]
    pub lease_seconds: i64,

    /// Maximum executions claimed per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Age after which a `running` execution with no persisted progress is
    /// considered orphaned and reclaimed by the watchdog.
    #[serde(default = "default_stale_after_seconds")]
    pub stale_after_seconds: i64,

    /// Identity this worker claims leases under.
    #[serde(default = "default_worker_id")]
    pub worker_id: String,

    /// Engine tuning knobs.
    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_poll_interval_seconds() -> u64 {
    5
}

fn default_lease_seconds() -> i64 {
    60
}

fn default_batch_size() -> usize {
    20
}

fn default_stale_after_seconds() -> i64 {
    300
}

fn default_worker_id() -> String {
    format!("worker-{}", std::process::id())
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval_seconds(),
            lease_seconds: default_lease_seconds(),
            batch_size: default_batch_size(),
            stale_after_seconds: default_stale_after_seconds(),
            worker_id: default_worker_id(),
            engine: EngineConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if present configuration values are invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

/// Configuration for the trigger dispatcher.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Hours during which a repeated trigger for the same (workflow, client)
    /// is suppressed.
    #[serde(default = "default_dedup_window_hours")]
    pub dedup_window_hours: i64,
}

fn default_dedup_window_hours() -> i64 {
    24
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            dedup_window_hours: default_dedup_window_hours(),
        }
    }
}

impl DispatchConfig {
    /// Returns the dedup window as a duration.
    #[must_use]
    pub fn dedup_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.dedup_window_hours)
    }
}
