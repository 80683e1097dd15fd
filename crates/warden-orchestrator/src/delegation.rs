//! Reporting finished sub-tasks to their orchestrator agent, with an
//! optional human approval gate.

use crate::engine::Orchestrator;
use crate::messages;
use crate::outbox::{NotificationHandle, NotificationKind};
use tracing::{info, warn};
use uuid::Uuid;
use warden_core::{
    Comment, DelegationMode, Event, EventKind, Task, TaskStatus, WardenError, WardenResult,
};

impl Orchestrator {
    /// Sub-task reached `final_status` (or was reset by the watchdog, which
    /// reports it as `failed`). Failures are logged, never propagated.
    pub(crate) async fn on_subtask_finished(&self, subtask: &Task, final_status: TaskStatus) {
        if let Err(e) = self.report_subtask(subtask, final_status).await {
            warn!(task_id = %subtask.id, error = %e, "Delegation report failed");
        }
    }

    async fn report_subtask(&self, subtask: &Task, final_status: TaskStatus) -> WardenResult<()> {
        let Some(parent_id) = subtask.parent_task_id else {
            return Ok(());
        };
        let Some(parent) = self.inner.store.get(parent_id).await? else {
            warn!(task_id = %subtask.id, parent_id = %parent_id, "Parent task not found");
            return Ok(());
        };
        let Some(parent_agent) = parent.assigned_agent_id.clone() else {
            info!(task_id = %subtask.id, parent_id = %parent_id, "Parent has no agent, nothing to notify");
            return Ok(());
        };

        match subtask.delegation_mode {
            DelegationMode::Auto => {
                self.notify_parent(subtask, final_status, &parent).await?;
            }
            DelegationMode::Manual => {
                info!(task_id = %subtask.id, agent_id = %parent_agent, "Sub-task awaiting approval");
                self.inner
                    .store
                    .set_pending_report(subtask.id, Some(final_status))
                    .await?;
                self.record_event(
                    Event::new(EventKind::PendingApproval)
                        .for_task(subtask.id)
                        .for_agent(&parent_agent)
                        .with_payload(serde_json::json!({
                            "parent_task_id": parent_id,
                            "final_status": final_status,
                            "specialist": subtask.assigned_agent_id,
                        })),
                )
                .await;
                self.record_comment(Comment::system(
                    subtask.id,
                    format!(
                        "Finished as {final_status}. Waiting for approval before {parent_agent} is told."
                    ),
                ))
                .await;
            }
        }
        Ok(())
    }

    async fn notify_parent(
        &self,
        subtask: &Task,
        final_status: TaskStatus,
        parent: &Task,
    ) -> WardenResult<NotificationHandle> {
        let agent = parent.assigned_agent_id.clone().ok_or_else(|| {
            WardenError::Validation(format!("parent task {} has no assigned agent", parent.id))
        })?;
        let remaining: Vec<Task> = self
            .inner
            .store
            .list_children(parent.id)
            .await?
            .into_iter()
            .filter(|t| t.id != subtask.id && !t.is_terminal())
            .collect();
        info!(
            task_id = %subtask.id,
            parent_id = %parent.id,
            agent_id = %agent,
            remaining = remaining.len(),
            "Reporting sub-task to orchestrator"
        );
        let message = messages::delegation(subtask, final_status, parent, &remaining);
        Ok(self.notify(agent, parent.id, NotificationKind::Delegation, message))
    }

    /// Release a held sub-task report to the parent's agent.
    ///
    /// The sub-task must be `done` or `failed`, or hold a report from a
    /// watchdog reset; the held final status is the one reported. A parent
    /// without an agent is logged and nobody is notified.
    pub async fn approve_delegation(&self, subtask_id: Uuid) -> WardenResult<Task> {
        let subtask = self.inner.store.require(subtask_id).await?;
        let final_status = match (subtask.pending_report, subtask.status) {
            (Some(held), _) => held,
            (None, status @ (TaskStatus::Done | TaskStatus::Failed)) => status,
            (None, status) => {
                return Err(WardenError::Conflict(format!(
                    "sub-task {subtask_id} is {status}; only done or failed sub-tasks can be approved"
                )));
            }
        };
        let parent_id = subtask.parent_task_id.ok_or_else(|| {
            WardenError::Validation(format!("task {subtask_id} has no parent task"))
        })?;
        let parent = self.inner.store.require(parent_id).await?;
        let subtask = if subtask.pending_report.is_some() {
            self.inner.store.set_pending_report(subtask_id, None).await?
        } else {
            subtask
        };

        if parent.assigned_agent_id.is_some() {
            self.notify_parent(&subtask, final_status, &parent).await?;
        } else {
            info!(task_id = %subtask_id, parent_id = %parent_id, "Parent has no agent, nothing to notify");
        }
        self.record_event(
            Event::new(EventKind::DelegationApproved)
                .for_task(subtask_id)
                .for_agent_opt(parent.assigned_agent_id.as_deref())
                .with_payload(serde_json::json!({
                    "parent_task_id": parent_id,
                    "final_status": final_status,
                })),
        )
        .await;
        Ok(subtask)
    }

    /// Send a sub-task back to its specialist.
    ///
    /// Records the human comment, moves the sub-task to `executing`, then
    /// messages the specialist, in that order. The orchestrator agent is
    /// not told.
    pub async fn request_changes(&self, subtask_id: Uuid, comment: &str) -> WardenResult<Task> {
        if comment.trim().is_empty() {
            return Err(WardenError::Validation("comment must not be empty".into()));
        }
        let subtask = self.inner.store.require(subtask_id).await?;

        self.inner
            .sink
            .record_comment(Comment::human(subtask_id, comment))
            .await?;
        let subtask = self.transition(subtask, TaskStatus::Executing).await?;
        self.record_event(
            Event::new(EventKind::ChangesRequested)
                .for_task(subtask_id)
                .for_agent_opt(subtask.assigned_agent_id.as_deref())
                .with_payload(serde_json::json!({ "comment": comment })),
        )
        .await;

        match subtask.assigned_agent_id.clone() {
            Some(agent) => {
                info!(task_id = %subtask_id, agent_id = %agent, "Changes requested");
                self.notify(
                    agent,
                    subtask_id,
                    NotificationKind::ChangeRequest,
                    messages::change_request(&subtask, comment),
                );
            }
            None => warn!(task_id = %subtask_id, "Changes requested on a task with no specialist"),
        }
        Ok(subtask)
    }
}
