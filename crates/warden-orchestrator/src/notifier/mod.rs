//! Agent notifier contract and delivery-error classification.

mod retry;

pub use retry::{compute_backoff, RetryPolicy, RetryingNotifier};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use warden_core::{WardenError, WardenResult};

/// Delivers a message to an agent and returns its reply.
///
/// Implementations report failures as [`WardenError::Notifier`] with the
/// raw failure text, or directly as [`WardenError::TransientDelivery`] /
/// [`WardenError::FatalDelivery`] when they can classify it themselves.
#[async_trait]
pub trait AgentNotifier: Send + Sync {
    /// Send `message` to `agent_id` and return its reply.
    async fn send(&self, agent_id: &str, message: &str) -> WardenResult<String>;
}

/// Closed set of delivery failures that are expected to clear up on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientReason {
    /// Another process holds the agent's session.
    SessionLocked,
    /// The agent did not answer in time.
    TimedOut,
    /// The model provider behind the agent failed.
    UpstreamModel,
}

/// Free-text markers recognised per [`TransientReason`]. Matching is
/// case-insensitive.
const TRANSIENT_MARKERS: &[(&str, TransientReason)] = &[
    ("session file locked", TransientReason::SessionLocked),
    ("session is locked", TransientReason::SessionLocked),
    ("session locked", TransientReason::SessionLocked),
    ("timed out", TransientReason::TimedOut),
    ("timeout", TransientReason::TimedOut),
    ("failovererror", TransientReason::UpstreamModel),
    ("upstream model", TransientReason::UpstreamModel),
    ("model failure", TransientReason::UpstreamModel),
];

/// Classify free-text failure output.
///
/// Notifiers that shell out to an agent runtime only see stderr, so this
/// substring match is the compatibility path. Notifiers that know the cause
/// should return [`WardenError::TransientDelivery`] instead.
pub fn classify(message: &str) -> Option<TransientReason> {
    let lower = message.to_lowercase();
    TRANSIENT_MARKERS
        .iter()
        .find(|(marker, _)| lower.contains(marker))
        .map(|(_, reason)| *reason)
}

/// Whether a delivery error should be retried.
pub fn is_retryable(err: &WardenError) -> bool {
    match err {
        WardenError::TransientDelivery(_) => true,
        WardenError::Notifier(msg) => classify(msg).is_some(),
        _ => false,
    }
}
