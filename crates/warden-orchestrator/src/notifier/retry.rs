use super::{is_retryable, AgentNotifier};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use warden_core::{WardenError, WardenResult};

/// Type alias for the injectable sleep function used in tests.
#[cfg(test)]
type SleepFn = Box<
    dyn Fn(u64) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> + Send + Sync,
>;

/// Backoff schedule for agent notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Wait before the second attempt; doubles afterwards.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Cap on the wait between two attempts.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Timeout of a single attempt, independent of the backoff.
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_initial_backoff_ms() -> u64 {
    30_000
}

fn default_max_backoff_ms() -> u64 {
    300_000
}

fn default_attempt_timeout_ms() -> u64 {
    300_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

/// Delay to wait after the failed attempt with zero-based index `attempt`.
pub fn compute_backoff(policy: &RetryPolicy, attempt: u32) -> u64 {
    let delay = policy
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt));
    delay.min(policy.max_backoff_ms)
}

/// An [`AgentNotifier`] that retries transient failures of an inner notifier
/// with capped exponential backoff.
///
/// Fatal failures are returned after the first attempt as
/// [`WardenError::FatalDelivery`]. Once every attempt is spent the result is
/// [`WardenError::DeliveryExhausted`] carrying the last failure.
pub struct RetryingNotifier {
    inner: Arc<dyn AgentNotifier>,
    policy: RetryPolicy,
    #[cfg(test)]
    sleep_fn: Option<SleepFn>,
}

impl RetryingNotifier {
    pub fn new(inner: Arc<dyn AgentNotifier>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            #[cfg(test)]
            sleep_fn: None,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn do_sleep(&self, ms: u64) {
        #[cfg(test)]
        if let Some(ref f) = self.sleep_fn {
            f(ms).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    async fn attempt(&self, agent_id: &str, message: &str) -> WardenResult<String> {
        match tokio::time::timeout(
            self.policy.attempt_timeout(),
            self.inner.send(agent_id, message),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(WardenError::TransientDelivery(format!(
                "attempt timed out after {}ms",
                self.policy.attempt_timeout_ms
            ))),
        }
    }
}

#[async_trait]
impl AgentNotifier for RetryingNotifier {
    async fn send(&self, agent_id: &str, message: &str) -> WardenResult<String> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_err: Option<WardenError> = None;

        for attempt in 0..max_attempts {
            match self.attempt(agent_id, message).await {
                Ok(reply) => {
                    if attempt > 0 {
                        info!(agent_id, attempt, "Notification delivered after retry");
                    }
                    return Ok(reply);
                }
                Err(e) => {
                    if !is_retryable(&e) {
                        warn!(agent_id, attempt, error = %e, "Non-retryable notification error");
                        return Err(match e {
                            WardenError::Notifier(msg) => WardenError::FatalDelivery(msg),
                            other => other,
                        });
                    }

                    if attempt + 1 < max_attempts {
                        let delay = compute_backoff(&self.policy, attempt);
                        info!(
                            agent_id,
                            attempt,
                            delay_ms = delay,
                            error = %e,
                            "Retryable notification error, backing off"
                        );
                        self.do_sleep(delay).await;
                    }
                    last_err = Some(e);
                }
            }
        }

        let last = last_err.map(|e| e.to_string()).unwrap_or_default();
        warn!(agent_id, attempts = max_attempts, last = %last, "Notification retries exhausted");
        Err(WardenError::DeliveryExhausted {
            attempts: max_attempts,
            last,
        })
    }
}
