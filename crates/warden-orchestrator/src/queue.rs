//! Per-agent dispatch queue.
//!
//! There is no queue structure: an agent's queue is the ordered set of its
//! tasks in status `queued`, read from the store on demand.

use crate::engine::Orchestrator;
use crate::messages;
use crate::outbox::NotificationKind;
use serde::{Deserialize, Serialize};
use tracing::info;
use warden_core::{Event, EventKind, Task, TaskStatus, WardenError, WardenResult};

/// Snapshot of one agent's queue, head first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentQueue {
    /// Agent the queue belongs to.
    pub agent_id: String,
    /// Number of queued tasks.
    pub queue_depth: usize,
    /// Head first.
    pub tasks: Vec<Task>,
}

impl Orchestrator {
    /// The agent's queued tasks in dispatch order.
    pub async fn agent_queue(&self, agent_id: &str) -> WardenResult<AgentQueue> {
        let tasks = self.inner.store.queued_for_agent(agent_id).await?;
        Ok(AgentQueue {
            agent_id: agent_id.to_string(),
            queue_depth: tasks.len(),
            tasks,
        })
    }

    /// Promote the head of an idle agent's queue to dispatch.
    ///
    /// Returns `Conflict` without touching anything while the agent has an
    /// active task, and `None` when its queue is empty. Busyness is
    /// re-checked here rather than locked; a concurrent dequeue for the same
    /// agent can at worst dispatch one extra task.
    pub async fn dequeue_next(&self, agent_id: &str) -> WardenResult<Option<Task>> {
        let active = self.active_load(agent_id, None).await?;
        if active > 0 {
            return Err(WardenError::Conflict(format!(
                "agent {agent_id} is busy with {active} active task(s)"
            )));
        }

        let queue = self.inner.store.queued_for_agent(agent_id).await?;
        let Some(head) = queue.first() else {
            return Ok(None);
        };
        let task = self.write_status(head, TaskStatus::Backlog).await?;
        info!(
            task_id = %task.id,
            agent_id,
            queue_depth = queue.len(),
            priority = task.priority,
            "Task dequeued"
        );
        self.record_event(
            Event::new(EventKind::TaskDequeued)
                .for_task(task.id)
                .for_agent(agent_id)
                .with_payload(serde_json::json!({
                    "queue_depth": queue.len(),
                    "priority": task.priority,
                })),
        )
        .await;
        self.notify(
            agent_id.to_string(),
            task.id,
            NotificationKind::Assignment,
            messages::assignment(&task),
        );
        Ok(Some(task))
    }
}
