use crate::notifier::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use warden_core::{WardenError, WardenResult};

/// Tunables for the orchestrator and its background loops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Period of the queue processor sweep.
    #[serde(default = "default_queue_interval_secs")]
    pub queue_interval_secs: u64,
    /// Period of the stuck-task watchdog sweep.
    #[serde(default = "default_watchdog_interval_secs")]
    pub watchdog_interval_secs: u64,
    /// An active task not updated for this long is stale.
    #[serde(default = "default_stale_threshold_secs")]
    pub stale_threshold_secs: u64,
    /// Watchdog re-notifications before a stale task is reset.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Cap on concurrently running task executions.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Delivery policy for every agent message.
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_queue_interval_secs() -> u64 {
    600
}

fn default_watchdog_interval_secs() -> u64 {
    300
}

fn default_stale_threshold_secs() -> u64 {
    1800
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_parallel() -> usize {
    3
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            queue_interval_secs: default_queue_interval_secs(),
            watchdog_interval_secs: default_watchdog_interval_secs(),
            stale_threshold_secs: default_stale_threshold_secs(),
            max_retries: default_max_retries(),
            max_parallel: default_max_parallel(),
            retry: RetryPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Queue processor period.
    pub fn queue_interval(&self) -> Duration {
        Duration::from_secs(self.queue_interval_secs)
    }

    /// Watchdog period.
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }

    /// Age after which an active task counts as stale.
    pub fn stale_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.stale_threshold_secs).unwrap_or(i64::MAX))
    }

    /// Reject values that would spin a loop or disable a safeguard.
    pub fn validate(&self) -> WardenResult<()> {
        let checks = [
            (self.queue_interval_secs == 0, "queue_interval_secs must be > 0"),
            (self.watchdog_interval_secs == 0, "watchdog_interval_secs must be > 0"),
            (self.stale_threshold_secs == 0, "stale_threshold_secs must be > 0"),
            (self.max_parallel == 0, "max_parallel must be > 0"),
            (self.retry.max_attempts == 0, "retry.max_attempts must be > 0"),
            (
                self.retry.initial_backoff_ms > self.retry.max_backoff_ms,
                "retry.initial_backoff_ms must not exceed retry.max_backoff_ms",
            ),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, msg)) => Err(WardenError::Config((*msg).to_string())),
            None => Ok(()),
        }
    }
}
