use crate::config::OrchestratorConfig;
use crate::dispatch::{decide, DispatchDecision};
use crate::messages;
use crate::monitor::SweepMonitor;
use crate::notifier::{AgentNotifier, RetryingNotifier};
use crate::outbox::{NotificationHandle, NotificationKind, NotificationOutcome, Outbox};
use crate::processor::QueueProcessor;
use crate::runs::TaskRuns;
use crate::sink::EventSink;
use crate::store::TaskStore;
use crate::watchdog::Watchdog;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use warden_core::{
    validate_priority, Comment, DelegationMode, Event, EventKind, Task, TaskStatus, WardenError,
    WardenResult, PRIORITY_DEFAULT,
};

/// Input for a new task or sub-task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    /// Short summary; must not be blank.
    pub title: String,
    /// Full instructions.
    #[serde(default)]
    pub description: String,
    /// Agent to assign. Blank ids are treated as none.
    #[serde(default)]
    pub assigned_agent_id: Option<String>,
    /// 1 (most urgent) to 5.
    #[serde(default = "default_priority")]
    pub priority: u8,
    /// How completion is reported when this is a sub-task.
    #[serde(default)]
    pub delegation_mode: DelegationMode,
    /// Defer dispatch until this time.
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

fn default_priority() -> u8 {
    PRIORITY_DEFAULT
}

impl NewTask {
    /// Unassigned task with default priority.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            assigned_agent_id: None,
            priority: PRIORITY_DEFAULT,
            delegation_mode: DelegationMode::Auto,
            scheduled_at: None,
        }
    }

    /// Set the full instructions.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Assign to an agent.
    pub fn assigned_to(mut self, agent_id: impl Into<String>) -> Self {
        self.assigned_agent_id = Some(agent_id.into());
        self
    }

    /// Set the priority, 1 to 5.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Set how sub-task completion is reported.
    pub fn with_delegation_mode(mut self, mode: DelegationMode) -> Self {
        self.delegation_mode = mode;
        self
    }

    /// Defer dispatch until `at`.
    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }
}

/// Partial update of a task. `None` leaves a field untouched; the doubly
/// optional fields use `Some(None)` to clear.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    /// New title.
    pub title: Option<String>,
    /// New instructions.
    pub description: Option<String>,
    /// New priority, 1 to 5.
    pub priority: Option<u8>,
    /// New delegation mode.
    pub delegation_mode: Option<DelegationMode>,
    /// `Some(None)` clears the schedule.
    pub scheduled_at: Option<Option<DateTime<Utc>>>,
    /// `Some(None)` unassigns; any change re-runs dispatch.
    pub assigned_agent_id: Option<Option<String>>,
    /// Ignored when the assignment changes in the same update.
    pub status: Option<TaskStatus>,
}

impl TaskUpdate {
    /// Only change the status.
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Only change the assigned agent.
    pub fn assign(agent_id: impl Into<String>) -> Self {
        Self {
            assigned_agent_id: Some(Some(agent_id.into())),
            ..Default::default()
        }
    }

    /// Clear the assignment; the task goes to backlog.
    pub fn unassign() -> Self {
        Self {
            assigned_agent_id: Some(None),
            ..Default::default()
        }
    }

    /// Also change the status.
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Also change the priority.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    fn edits_fields(&self) -> bool {
        self.title.is_some()
            || self.description.is_some()
            || self.priority.is_some()
            || self.delegation_mode.is_some()
            || self.scheduled_at.is_some()
            || self.assigned_agent_id.is_some()
    }
}

/// Manual retry: re-dispatch now, or let the queue processor do it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryRequest {
    /// Reset the counter, move to backlog and message the agent now.
    Now,
    /// Dispatch from the queue processor once this time passes.
    At(DateTime<Utc>),
}

/// Filter for [`Orchestrator::list_tasks`]. Empty matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    /// Only tasks in this status.
    pub status: Option<TaskStatus>,
    /// Only tasks assigned to this agent.
    pub agent_id: Option<String>,
    /// Only sub-tasks of this task.
    pub parent_task_id: Option<Uuid>,
}

impl TaskFilter {
    fn matches(&self, task: &Task) -> bool {
        self.status.map_or(true, |s| task.status == s)
            && self
                .agent_id
                .as_deref()
                .map_or(true, |a| task.is_assigned_to(a))
            && self
                .parent_task_id
                .map_or(true, |p| task.parent_task_id == Some(p))
    }
}

pub(crate) struct Inner {
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) notifier: Arc<dyn AgentNotifier>,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) outbox: Outbox,
    pub(crate) runs: TaskRuns,
    pub(crate) config: OrchestratorConfig,
    pub(crate) monitor: SweepMonitor,
}

/// Task orchestration engine.
///
/// Cheap to clone; clones share the store, the outbox and the registry of
/// running tasks. Every status write goes through [`Orchestrator::update_task`]
/// (or its shorthand [`Orchestrator::update_status`]), which applies the
/// dispatch, queue and delegation side effects. Agent notifications never
/// block the caller: they run on the outbox and report through the event
/// sink. Use [`Orchestrator::settle`] to wait for them.
#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) inner: Arc<Inner>,
}

impl Orchestrator {
    /// Build an orchestrator. `notifier` is wrapped in the configured retry
    /// policy.
    pub fn new(
        store: Arc<dyn TaskStore>,
        notifier: Arc<dyn AgentNotifier>,
        sink: Arc<dyn EventSink>,
        config: OrchestratorConfig,
    ) -> WardenResult<Self> {
        config.validate()?;
        let notifier: Arc<dyn AgentNotifier> =
            Arc::new(RetryingNotifier::new(notifier, config.retry.clone()));
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                notifier,
                sink,
                outbox: Outbox::new(),
                runs: TaskRuns::new(config.max_parallel),
                config,
                monitor: SweepMonitor::new(),
            }),
        })
    }

    /// The task store.
    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.inner.store
    }

    /// The configuration this orchestrator was built with.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Telemetry for the background loops.
    pub fn monitor(&self) -> &SweepMonitor {
        &self.inner.monitor
    }

    /// Live feed of notification outcomes.
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationOutcome> {
        self.inner.outbox.subscribe()
    }

    /// Notifications spawned but not yet finished.
    pub fn notifications_in_flight(&self) -> usize {
        self.inner.outbox.in_flight()
    }

    /// Wait until every background notification has finished and its
    /// outcome has been recorded.
    pub async fn settle(&self) {
        self.inner.outbox.settle().await;
    }

    /// Create a top-level task and dispatch it.
    pub async fn create_task(&self, new: NewTask) -> WardenResult<Task> {
        self.create(new, None).await
    }

    /// Create a sub-task of `parent_id`. Its completion is reported to the
    /// parent's agent according to its delegation mode.
    pub async fn delegate(&self, parent_id: Uuid, new: NewTask) -> WardenResult<Task> {
        let parent = self.inner.store.require(parent_id).await?;
        if parent.is_terminal() {
            return Err(WardenError::Conflict(format!(
                "parent task {parent_id} is already {}",
                parent.status
            )));
        }
        self.create(new, Some(parent_id)).await
    }

    async fn create(&self, new: NewTask, parent: Option<Uuid>) -> WardenResult<Task> {
        if new.title.trim().is_empty() {
            return Err(WardenError::Validation("title must not be empty".into()));
        }
        validate_priority(new.priority)?;

        let mut task = Task::new(new.title)
            .with_description(new.description)
            .with_priority(new.priority)
            .with_delegation_mode(new.delegation_mode);
        task.assigned_agent_id = new.assigned_agent_id.filter(|a| !a.trim().is_empty());
        task.parent_task_id = parent;
        task.scheduled_at = new.scheduled_at;

        let active = match &task.assigned_agent_id {
            Some(agent) => self.active_load(agent, None).await?,
            None => 0,
        };
        let decision = decide(&task, active, Utc::now());
        if matches!(decision, DispatchDecision::Enqueue { .. }) {
            task.status = TaskStatus::Queued;
        }

        self.inner.store.insert(&task).await?;
        info!(
            task_id = %task.id,
            agent_id = task.assigned_agent_id.as_deref().unwrap_or("-"),
            status = %task.status,
            "Task created"
        );
        self.record_event(
            Event::new(EventKind::TaskCreated)
                .for_task(task.id)
                .for_agent_opt(task.assigned_agent_id.as_deref())
                .with_payload(serde_json::json!({
                    "title": task.title,
                    "status": task.status,
                    "priority": task.priority,
                    "parent_task_id": task.parent_task_id,
                })),
        )
        .await;

        self.apply_decision(task, decision).await
    }

    /// The single entry point for edits and status writes.
    ///
    /// Clearing the assignment forces `backlog` whatever status was asked
    /// for. Assigning a different agent re-runs the creation rule, which
    /// then decides the status. Otherwise a requested status is applied as a
    /// transition with its side effects.
    pub async fn update_task(&self, id: Uuid, update: TaskUpdate) -> WardenResult<Task> {
        let current = self.inner.store.require(id).await?;
        if let Some(title) = &update.title {
            if title.trim().is_empty() {
                return Err(WardenError::Validation("title must not be empty".into()));
            }
        }
        if let Some(priority) = update.priority {
            validate_priority(priority)?;
        }

        let mut task = current.clone();
        if update.edits_fields() {
            let edit = update.clone();
            task = self
                .inner
                .store
                .modify(
                    id,
                    Box::new(move |t| {
                        if let Some(title) = edit.title {
                            t.title = title;
                        }
                        if let Some(description) = edit.description {
                            t.description = description;
                        }
                        if let Some(priority) = edit.priority {
                            t.priority = priority;
                        }
                        if let Some(mode) = edit.delegation_mode {
                            t.delegation_mode = mode;
                        }
                        if let Some(at) = edit.scheduled_at {
                            t.scheduled_at = at;
                        }
                        if let Some(agent) = edit.assigned_agent_id {
                            t.assigned_agent_id = agent.filter(|a| !a.trim().is_empty());
                        }
                        t.updated_at = Utc::now();
                    }),
                )
                .await?;
        }

        let previous_agent = current.assigned_agent_id.clone();
        if task.assigned_agent_id != previous_agent {
            self.record_event(
                Event::new(EventKind::TaskReassigned)
                    .for_task(id)
                    .for_agent_opt(task.assigned_agent_id.as_deref())
                    .with_payload(serde_json::json!({
                        "from": previous_agent,
                        "to": task.assigned_agent_id,
                    })),
            )
            .await;

            let task = if task.assigned_agent_id.is_none() {
                if update.status.is_some_and(|s| s != TaskStatus::Backlog) {
                    debug!(task_id = %id, "Assignment cleared, requested status ignored");
                }
                self.write_status(&task, TaskStatus::Backlog).await?
            } else {
                self.dispatch(task).await?
            };
            // The old agent may have just lost its only active task.
            if let Some(old) = previous_agent.filter(|_| current.is_active()) {
                self.reevaluate_queue(&old).await;
            }
            return Ok(task);
        }

        match update.status {
            Some(status) => self.transition(task, status).await,
            None => Ok(task),
        }
    }

    /// Shorthand for a status-only [`Orchestrator::update_task`].
    pub async fn update_status(&self, id: Uuid, status: TaskStatus) -> WardenResult<Task> {
        self.update_task(id, TaskUpdate::status(status)).await
    }

    /// Fetch a task; `NotFound` if it does not exist.
    pub async fn get_task(&self, id: Uuid) -> WardenResult<Task> {
        self.inner.store.require(id).await
    }

    /// Tasks matching every set field of `filter`, oldest first.
    pub async fn list_tasks(&self, filter: &TaskFilter) -> WardenResult<Vec<Task>> {
        Ok(self
            .inner
            .store
            .list()
            .await?
            .into_iter()
            .filter(|t| filter.matches(t))
            .collect())
    }

    /// Manual escape hatch, independent of the watchdog.
    ///
    /// `Now` reopens the task to `backlog` and messages its agent whether
    /// or not the agent is busy. `At` only records `retry_at`; the queue
    /// processor dispatches once it passes.
    pub async fn retry_task(&self, id: Uuid, request: RetryRequest) -> WardenResult<Task> {
        let task = self.inner.store.require(id).await?;
        match request {
            RetryRequest::Now => {
                self.write_status(&task, TaskStatus::Backlog).await?;
                let task = self.inner.store.set_retry_at(id, None).await?;
                self.record_event(
                    Event::new(EventKind::TaskRetried)
                        .for_task(id)
                        .for_agent_opt(task.assigned_agent_id.as_deref())
                        .with_payload(serde_json::json!({ "scheduled": false })),
                )
                .await;
                match task.assigned_agent_id.clone() {
                    Some(agent) => {
                        info!(task_id = %id, agent_id = %agent, "Retrying task now");
                        self.notify(
                            agent,
                            id,
                            NotificationKind::Assignment,
                            messages::assignment(&task),
                        );
                    }
                    None => warn!(task_id = %id, "Retried task has no agent to notify"),
                }
                Ok(task)
            }
            RetryRequest::At(at) => {
                if at <= Utc::now() {
                    return Err(WardenError::Validation(format!(
                        "retry time {} is not in the future",
                        at.to_rfc3339()
                    )));
                }
                let task = self.inner.store.set_retry_at(id, Some(at)).await?;
                info!(task_id = %id, retry_at = %at, "Retry scheduled");
                self.record_event(
                    Event::new(EventKind::RetryScheduled)
                        .for_task(id)
                        .for_agent_opt(task.assigned_agent_id.as_deref())
                        .with_payload(serde_json::json!({ "retry_at": at })),
                )
                .await;
                Ok(task)
            }
        }
    }

    /// Execute `work` for a task inside its own cancellable scope.
    ///
    /// Fails immediately with `CapacityExceeded` when `max_parallel`
    /// executions are already running, and with `Conflict` if this task is
    /// already running or finished. The returned handle resolves to the
    /// task after its final status write: `done` when `work` succeeds,
    /// `failed` when it errors, `cancelled` after [`Orchestrator::cancel_task`].
    pub async fn run_task<F, Fut>(
        &self,
        id: Uuid,
        work: F,
    ) -> WardenResult<JoinHandle<WardenResult<Task>>>
    where
        F: FnOnce(Task, CancellationToken) -> Fut,
        Fut: Future<Output = WardenResult<String>> + Send + 'static,
    {
        let task = self.inner.store.require(id).await?;
        if task.is_terminal() {
            return Err(WardenError::Conflict(format!(
                "task {id} is already {}",
                task.status
            )));
        }
        let token = self.inner.runs.try_register(id)?;
        let task = if task.is_active() {
            task
        } else {
            match self.transition(task, TaskStatus::Executing).await {
                Ok(task) => task,
                Err(e) => {
                    self.inner.runs.finish(id);
                    return Err(e);
                }
            }
        };
        self.record_event(
            Event::new(EventKind::RunStarted)
                .for_task(id)
                .for_agent_opt(task.assigned_agent_id.as_deref()),
        )
        .await;
        info!(task_id = %id, running = self.inner.runs.running_count(), "Task run started");

        let agent = task.assigned_agent_id.clone();
        let work = work(task, token.clone());
        let this = self.clone();
        Ok(tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                result = work => Some(result),
            };
            this.inner.runs.finish(id);
            let task = this.get_task(id).await?;
            // cancel_task writes `cancelled` before firing the token, and a
            // result that lost that race must not overwrite it.
            if token.is_cancelled() || task.is_terminal() {
                return Ok(task);
            }
            match result {
                None => Ok(task),
                Some(Ok(output)) => {
                    if let Some(agent) = agent.filter(|_| !output.trim().is_empty()) {
                        this.record_comment(Comment::agent(id, agent, output)).await;
                    }
                    this.transition(task, TaskStatus::Done).await
                }
                Some(Err(e)) => {
                    warn!(task_id = %id, error = %e, "Task run failed");
                    this.record_comment(Comment::system(id, format!("Execution failed: {e}")))
                        .await;
                    this.transition(task, TaskStatus::Failed).await
                }
            }
        }))
    }

    /// Cancel a task: move it to `cancelled`, then stop its execution scope
    /// if it is running here. The watchdog never retries cancelled tasks.
    pub async fn cancel_task(&self, id: Uuid) -> WardenResult<Task> {
        let task = self.inner.store.require(id).await?;
        let task = self.transition(task, TaskStatus::Cancelled).await?;
        if self.inner.runs.cancel(id) {
            info!(task_id = %id, "Task run cancelled");
            self.record_event(
                Event::new(EventKind::RunCancelled)
                    .for_task(id)
                    .for_agent_opt(task.assigned_agent_id.as_deref()),
            )
            .await;
        }
        Ok(task)
    }

    /// Whether [`Orchestrator::run_task`] is executing this task.
    pub fn is_running(&self, id: Uuid) -> bool {
        self.inner.runs.is_running(id)
    }

    /// Spawn the queue processor and the watchdog. Both stop when
    /// `shutdown` is cancelled.
    pub fn start_background(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        vec![
            QueueProcessor::new(self.clone()).start(shutdown.clone()),
            Watchdog::new(self.clone()).start(shutdown),
        ]
    }

    // --- state machine ---

    /// Apply a status change with its side effects.
    pub(crate) async fn transition(&self, task: Task, status: TaskStatus) -> WardenResult<Task> {
        let previous = task.status;
        let task = self.write_status(&task, status).await?;
        if status.is_terminal() && !previous.is_terminal() {
            if task.parent_task_id.is_some() {
                self.on_subtask_finished(&task, status).await;
            }
            if let Some(agent) = task.assigned_agent_id.clone() {
                self.reevaluate_queue(&agent).await;
            }
        }
        Ok(task)
    }

    /// Validated explicit status write, without side effects beyond the
    /// `status_changed` event.
    pub(crate) async fn write_status(&self, task: &Task, status: TaskStatus) -> WardenResult<Task> {
        if status == TaskStatus::Queued && task.assigned_agent_id.is_none() {
            return Err(WardenError::Validation(format!(
                "task {} cannot be queued without an assigned agent",
                task.id
            )));
        }
        let updated = self.inner.store.update_status(task.id, status).await?;
        debug!(task_id = %task.id, from = %task.status, to = %status, "Status changed");
        self.record_event(
            Event::new(EventKind::StatusChanged)
                .for_task(task.id)
                .for_agent_opt(updated.assigned_agent_id.as_deref())
                .with_payload(serde_json::json!({
                    "from": task.status,
                    "to": status,
                })),
        )
        .await;
        Ok(updated)
    }

    /// Re-run the creation rule for an existing task.
    pub(crate) async fn dispatch(&self, task: Task) -> WardenResult<Task> {
        let active = match &task.assigned_agent_id {
            Some(agent) => self.active_load(agent, Some(&task)).await?,
            None => 0,
        };
        let decision = decide(&task, active, Utc::now());
        let target = match decision {
            DispatchDecision::Enqueue { .. } => TaskStatus::Queued,
            _ => TaskStatus::Backlog,
        };
        let task = if task.status == target {
            task
        } else {
            self.write_status(&task, target).await?
        };
        self.apply_decision(task, decision).await
    }

    async fn apply_decision(&self, task: Task, decision: DispatchDecision) -> WardenResult<Task> {
        match decision {
            DispatchDecision::Unassigned => {}
            DispatchDecision::Defer { until } => {
                debug!(task_id = %task.id, until = %until, "Dispatch deferred");
            }
            DispatchDecision::Enqueue { agent_id } => {
                let depth = self.inner.store.queued_for_agent(&agent_id).await?.len();
                info!(task_id = %task.id, agent_id = %agent_id, queue_depth = depth, "Agent busy, task queued");
                self.record_event(
                    Event::new(EventKind::TaskQueued)
                        .for_task(task.id)
                        .for_agent(&agent_id)
                        .with_payload(serde_json::json!({
                            "queue_depth": depth,
                            "priority": task.priority,
                        })),
                )
                .await;
            }
            DispatchDecision::NotifyNow { agent_id } => {
                self.notify(
                    agent_id,
                    task.id,
                    NotificationKind::Assignment,
                    messages::assignment(&task),
                );
            }
        }
        Ok(task)
    }

    /// Give an agent that just freed up its next queued task.
    pub(crate) async fn reevaluate_queue(&self, agent_id: &str) {
        match self.dequeue_next(agent_id).await {
            Ok(Some(task)) => debug!(agent_id, task_id = %task.id, "Queue advanced"),
            Ok(None) => {}
            Err(WardenError::Conflict(_)) => debug!(agent_id, "Agent still busy"),
            Err(e) => warn!(agent_id, error = %e, "Queue re-evaluation failed"),
        }
    }

    /// Active tasks of `agent_id`, not counting `exclude`.
    pub(crate) async fn active_load(
        &self,
        agent_id: &str,
        exclude: Option<&Task>,
    ) -> WardenResult<usize> {
        let active = self.inner.store.count_active_for_agent(agent_id).await?;
        let excluded = exclude.is_some_and(|t| t.is_active() && t.is_assigned_to(agent_id));
        Ok(active.saturating_sub(usize::from(excluded)))
    }

    // --- notifications and audit ---

    /// Message an agent in the background and record the outcome on
    /// `record_on`.
    pub(crate) fn notify(
        &self,
        agent_id: String,
        record_on: Uuid,
        kind: NotificationKind,
        message: String,
    ) -> NotificationHandle {
        debug!(agent_id = %agent_id, task_id = %record_on, ?kind, "Notification spawned");
        let this = self.clone();
        self.inner.outbox.spawn(async move {
            let result = this.inner.notifier.send(&agent_id, &message).await;
            this.record_outcome(record_on, &agent_id, kind, &result).await;
            NotificationOutcome {
                task_id: record_on,
                agent_id,
                kind,
                result: result.map_err(|e| e.to_string()),
            }
        })
    }

    async fn record_outcome(
        &self,
        task_id: Uuid,
        agent_id: &str,
        kind: NotificationKind,
        result: &WardenResult<String>,
    ) {
        let delegation = kind == NotificationKind::Delegation;
        match result {
            Ok(reply) => {
                info!(task_id = %task_id, agent_id, ?kind, "Agent notified");
                if !reply.trim().is_empty() {
                    self.record_comment(Comment::agent(task_id, agent_id, reply.clone()))
                        .await;
                }
                let event_kind = if delegation {
                    EventKind::DelegationNotified
                } else {
                    EventKind::AgentNotified
                };
                self.record_event(
                    Event::new(event_kind)
                        .for_task(task_id)
                        .for_agent(agent_id)
                        .with_payload(serde_json::json!({ "notification": kind })),
                )
                .await;
            }
            Err(e) => {
                warn!(task_id = %task_id, agent_id, ?kind, error = %e, "Agent notification failed");
                self.record_comment(Comment::system(
                    task_id,
                    format!("Failed to notify {agent_id}: {e}"),
                ))
                .await;
                let event_kind = if delegation {
                    EventKind::DelegationFailed
                } else {
                    EventKind::NotificationFailed
                };
                self.record_event(
                    Event::new(event_kind)
                        .for_task(task_id)
                        .for_agent(agent_id)
                        .with_payload(serde_json::json!({
                            "notification": kind,
                            "error": e.to_string(),
                        })),
                )
                .await;
            }
        }
    }

    /// Audit writes never fail the operation that produced them.
    pub(crate) async fn record_event(&self, event: Event) {
        let kind = event.kind;
        if let Err(e) = self.inner.sink.record_event(event).await {
            warn!(event = %kind, error = %e, "Failed to record event");
        }
    }

    pub(crate) async fn record_comment(&self, comment: Comment) {
        let task_id = comment.task_id;
        if let Err(e) = self.inner.sink.record_comment(comment).await {
            warn!(task_id = %task_id, error = %e, "Failed to record comment");
        }
    }
}
