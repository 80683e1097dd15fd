//! Tracked background notifications.
//!
//! Every outbound agent message runs in its own task so the operation that
//! triggered it never waits on the agent. The [`Outbox`] keeps track of those
//! tasks: callers get a [`NotificationHandle`] per message, subscribers get
//! every [`NotificationOutcome`], and [`Outbox::settle`] waits until nothing
//! is in flight.

use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

/// Why an agent was messaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationKind {
    /// New work, dequeued work, or a manual retry.
    Assignment,
    /// Watchdog re-notification of a stalled task.
    WatchdogRetry {
        /// Reminder number, starting at 1.
        attempt: u32,
    },
    /// Orchestrator agent told about a finished sub-task.
    Delegation,
    /// Specialist asked to rework a sub-task.
    ChangeRequest,
}

/// Final result of one notification sequence, retries included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationOutcome {
    /// Task the outcome is recorded on.
    pub task_id: Uuid,
    /// Agent that was messaged.
    pub agent_id: String,
    /// Why it was messaged.
    pub kind: NotificationKind,
    /// Agent reply, or the rendered delivery error.
    pub result: Result<String, String>,
}

impl NotificationOutcome {
    /// Whether the agent acknowledged the message.
    pub fn is_delivered(&self) -> bool {
        self.result.is_ok()
    }
}

/// Resolves once the notification sequence has finished.
pub type NotificationHandle = JoinHandle<NotificationOutcome>;

/// Spawner and tracker for notification tasks.
pub struct Outbox {
    tracker: TaskTracker,
    outcomes: broadcast::Sender<NotificationOutcome>,
}

impl Outbox {
    /// An empty outbox.
    pub fn new() -> Self {
        let (outcomes, _) = broadcast::channel(256);
        Self {
            tracker: TaskTracker::new(),
            outcomes,
        }
    }

    /// Run `delivery` in the background and broadcast its outcome.
    pub fn spawn<F>(&self, delivery: F) -> NotificationHandle
    where
        F: Future<Output = NotificationOutcome> + Send + 'static,
    {
        let outcomes = self.outcomes.clone();
        self.tracker.spawn(async move {
            let outcome = delivery.await;
            let _ = outcomes.send(outcome.clone());
            outcome
        })
    }

    /// Live feed of finished notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationOutcome> {
        self.outcomes.subscribe()
    }

    /// Notifications spawned and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every in-flight notification, including any spawned while
    /// waiting, then accept new ones again.
    pub async fn settle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new()
    }
}
