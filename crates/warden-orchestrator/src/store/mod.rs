//! Task persistence boundary.
//!
//! A [`TaskStore`] only has to provide four primitives: `insert`, `get`,
//! `list` and the atomic single-record `modify`. Every query and targeted
//! update the orchestrator needs has a default implementation on top of
//! those; backends with an index or a query language can override them.

mod file;
mod memory;

pub use file::FileTaskStore;
pub use memory::MemoryTaskStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use uuid::Uuid;
use warden_core::{Task, TaskStatus, WardenError, WardenResult};

/// In-place change applied to one task under the store's write lock.
pub type TaskMutation = Box<dyn FnOnce(&mut Task) + Send>;

/// Persistence for tasks.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new task. Fails with `Conflict` if the id is taken.
    async fn insert(&self, task: &Task) -> WardenResult<()>;

    /// Fetch a task, `None` if it does not exist.
    async fn get(&self, id: Uuid) -> WardenResult<Option<Task>>;

    /// Every task, oldest first.
    async fn list(&self) -> WardenResult<Vec<Task>>;

    /// Atomically apply `mutation` to the task and return the stored result.
    async fn modify(&self, id: Uuid, mutation: TaskMutation) -> WardenResult<Task>;

    /// Like [`TaskStore::get`], but a missing task is `NotFound`.
    async fn require(&self, id: Uuid) -> WardenResult<Task> {
        self.get(id)
            .await?
            .ok_or_else(|| WardenError::task_not_found(id))
    }

    /// Tasks in `status`.
    async fn list_by_status(&self, status: TaskStatus) -> WardenResult<Vec<Task>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|t| t.status == status)
            .collect())
    }

    /// Tasks assigned to `agent_id`, any status.
    async fn list_by_agent(&self, agent_id: &str) -> WardenResult<Vec<Task>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|t| t.is_assigned_to(agent_id))
            .collect())
    }

    /// Sub-tasks of `parent_id`, oldest first.
    async fn list_children(&self, parent_id: Uuid) -> WardenResult<Vec<Task>> {
        let mut children: Vec<Task> = self
            .list()
            .await?
            .into_iter()
            .filter(|t| t.parent_task_id == Some(parent_id))
            .collect();
        children.sort_by_key(|t| t.created_at);
        Ok(children)
    }

    /// The agent's queue: status `queued`, priority ascending, then FIFO.
    async fn queued_for_agent(&self, agent_id: &str) -> WardenResult<Vec<Task>> {
        let mut queued: Vec<Task> = self
            .list_by_agent(agent_id)
            .await?
            .into_iter()
            .filter(|t| t.status == TaskStatus::Queued)
            .collect();
        queued.sort_by(Task::queue_order);
        Ok(queued)
    }

    /// Distinct agents that have at least one queued task, sorted.
    async fn agents_with_queued_tasks(&self) -> WardenResult<Vec<String>> {
        let agents: BTreeSet<String> = self
            .list_by_status(TaskStatus::Queued)
            .await?
            .into_iter()
            .filter_map(|t| t.assigned_agent_id)
            .collect();
        Ok(agents.into_iter().collect())
    }

    /// Number of the agent's tasks in an active status.
    async fn count_active_for_agent(&self, agent_id: &str) -> WardenResult<usize> {
        Ok(self
            .list_by_agent(agent_id)
            .await?
            .iter()
            .filter(|t| t.is_active())
            .count())
    }

    /// Active tasks whose `updated_at` is older than `cutoff`.
    async fn stale_active(&self, cutoff: DateTime<Utc>) -> WardenResult<Vec<Task>> {
        let mut stale: Vec<Task> = self
            .list()
            .await?
            .into_iter()
            .filter(|t| t.is_active() && t.updated_at < cutoff)
            .collect();
        stale.sort_by_key(|t| t.updated_at);
        Ok(stale)
    }

    /// Backlog tasks whose `scheduled_at` has passed.
    async fn due_scheduled(&self, now: DateTime<Utc>) -> WardenResult<Vec<Task>> {
        let mut due: Vec<Task> = self
            .list_by_status(TaskStatus::Backlog)
            .await?
            .into_iter()
            .filter(|t| t.scheduled_at.is_some_and(|at| at <= now))
            .collect();
        due.sort_by(Task::queue_order);
        Ok(due)
    }

    /// Tasks whose `retry_at` has passed, whatever their status.
    async fn due_retries(&self, now: DateTime<Utc>) -> WardenResult<Vec<Task>> {
        let mut due: Vec<Task> = self
            .list()
            .await?
            .into_iter()
            .filter(|t| t.retry_at.is_some_and(|at| at <= now))
            .collect();
        due.sort_by(Task::queue_order);
        Ok(due)
    }

    /// Explicit status write; see [`Task::set_status`].
    async fn update_status(&self, id: Uuid, status: TaskStatus) -> WardenResult<Task> {
        self.modify(id, Box::new(move |t| t.set_status(status, Utc::now())))
            .await
    }

    /// Bump the watchdog counter and the staleness clock together.
    async fn increment_retry_count(&self, id: Uuid) -> WardenResult<Task> {
        self.modify(
            id,
            Box::new(|t| {
                t.retry_count = t.retry_count.saturating_add(1);
                t.updated_at = Utc::now();
            }),
        )
        .await
    }

    /// Zero the watchdog counter without a status write.
    async fn reset_retry_count(&self, id: Uuid) -> WardenResult<Task> {
        self.modify(id, Box::new(|t| t.retry_count = 0)).await
    }

    /// Set or clear `retry_at`.
    async fn set_retry_at(&self, id: Uuid, at: Option<DateTime<Utc>>) -> WardenResult<Task> {
        self.modify(id, Box::new(move |t| t.retry_at = at)).await
    }

    /// Hold (or release) a sub-task report awaiting approval.
    async fn set_pending_report(
        &self,
        id: Uuid,
        report: Option<TaskStatus>,
    ) -> WardenResult<Task> {
        self.modify(id, Box::new(move |t| t.pending_report = report))
            .await
    }

    /// Clear `scheduled_at` once it has been acted on.
    async fn clear_scheduled_at(&self, id: Uuid) -> WardenResult<Task> {
        self.modify(id, Box::new(|t| t.scheduled_at = None)).await
    }
}
