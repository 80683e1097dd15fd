use chrono::{DateTime, Utc};
use warden_core::Task;

/// Where a task goes when it is created, reassigned, or becomes due.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchDecision {
    /// No agent: stays in backlog.
    Unassigned,
    /// `scheduled_at` is in the future: stays in backlog, the queue
    /// processor picks it up once due.
    Defer {
        /// The task's `scheduled_at`.
        until: DateTime<Utc>,
    },
    /// Agent is busy: goes to its queue.
    Enqueue {
        /// The busy agent.
        agent_id: String,
    },
    /// Agent is idle: backlog, and the agent is messaged right away.
    NotifyNow {
        /// The idle agent.
        agent_id: String,
    },
}

/// Decide dispatch for `task`, given how many active tasks its agent has
/// besides this one.
///
/// A future `scheduled_at` wins over busyness so that a deferred task never
/// sits in a queue it could be dequeued from early.
pub fn decide(task: &Task, active_count: usize, now: DateTime<Utc>) -> DispatchDecision {
    let Some(agent_id) = task.assigned_agent_id.clone() else {
        return DispatchDecision::Unassigned;
    };
    if let Some(until) = task.scheduled_at.filter(|_| task.is_deferred(now)) {
        return DispatchDecision::Defer { until };
    }
    if active_count > 0 {
        DispatchDecision::Enqueue { agent_id }
    } else {
        DispatchDecision::NotifyNow { agent_id }
    }
}
