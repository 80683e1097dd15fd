//! End-to-end orchestration tests.
//!
//! Drives the orchestrator through its public API against the in-memory
//! store and sink with a recording notifier. Covers the queue, watchdog,
//! delegation and retry paths, plus the file-backed collaborators.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use warden_core::{
    CommentAuthor, DelegationMode, EventKind, Task, TaskStatus, WardenError, WardenResult,
};
use warden_orchestrator::*;

// ---------------------------------------------------------------------------
// Recording notifier: logs every attempt, fails on demand
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
    failures: Mutex<HashMap<String, VecDeque<String>>>,
}

impl RecordingNotifier {
    /// The next `times` attempts to `agent` fail with `error`.
    fn fail_next(&self, agent: &str, error: &str, times: usize) {
        let mut failures = self.failures.lock();
        let queue = failures.entry(agent.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(error.to_string());
        }
    }

    fn messages_to(&self, agent: &str) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|(a, _)| a == agent)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl AgentNotifier for RecordingNotifier {
    async fn send(&self, agent_id: &str, message: &str) -> WardenResult<String> {
        self.sent
            .lock()
            .push((agent_id.to_string(), message.to_string()));
        let failure = self
            .failures
            .lock()
            .get_mut(agent_id)
            .and_then(|q| q.pop_front());
        match failure {
            Some(error) => Err(WardenError::Notifier(error)),
            None => Ok(format!("ack from {agent_id}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    orch: Orchestrator,
    store: Arc<MemoryTaskStore>,
    sink: Arc<MemoryEventSink>,
    notifier: Arc<RecordingNotifier>,
}

fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        max_retries: 3,
        stale_threshold_secs: 1800,
        max_parallel: 3,
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            attempt_timeout_ms: 5_000,
        },
        ..Default::default()
    }
}

fn harness_with(config: OrchestratorConfig) -> Harness {
    let store = Arc::new(MemoryTaskStore::new());
    let sink = Arc::new(MemoryEventSink::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let orch = Orchestrator::new(store.clone(), notifier.clone(), sink.clone(), config).unwrap();
    Harness {
        orch,
        store,
        sink,
        notifier,
    }
}

fn harness() -> Harness {
    harness_with(test_config())
}

impl Harness {
    async fn insert(&self, task: Task) -> Task {
        self.store.insert(&task).await.unwrap();
        task
    }

    /// An executing task that makes `agent` busy.
    async fn busy(&self, agent: &str) -> Task {
        self.insert(
            Task::new(format!("{agent} keeps busy"))
                .assigned_to(agent)
                .with_status(TaskStatus::Executing),
        )
        .await
    }

    async fn age(&self, id: uuid::Uuid, minutes: i64) {
        self.store
            .modify(
                id,
                Box::new(move |t| t.updated_at = Utc::now() - Duration::minutes(minutes)),
            )
            .await
            .unwrap();
    }

    async fn status(&self, id: uuid::Uuid) -> TaskStatus {
        self.orch.get_task(id).await.unwrap().status
    }
}

// ---------------------------------------------------------------------------
// Queue and dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn busy_agent_gets_task_queued_then_dequeued_on_completion() {
    let h = harness();
    let active = h.busy("alpha").await;

    let t = h
        .orch
        .create_task(
            NewTask::new("Write migration")
                .assigned_to("alpha")
                .with_priority(2),
        )
        .await
        .unwrap();
    assert_eq!(t.status, TaskStatus::Queued);
    h.orch.settle().await;
    assert!(h.notifier.messages_to("alpha").is_empty());

    let queued = h.sink.events_of(EventKind::TaskQueued).await;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].payload["priority"], 2);

    h.orch
        .update_status(active.id, TaskStatus::Done)
        .await
        .unwrap();
    h.orch.settle().await;

    assert_eq!(h.status(t.id).await, TaskStatus::Backlog);
    let sent = h.notifier.messages_to("alpha");
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("Write migration"));

    let dequeued = h.sink.events_of(EventKind::TaskDequeued).await;
    assert_eq!(dequeued.len(), 1);
    assert_eq!(dequeued[0].task_id, Some(t.id));
    assert_eq!(dequeued[0].payload["queue_depth"], 1);
    assert_eq!(dequeued[0].payload["priority"], 2);
}

#[tokio::test]
async fn agent_queue_orders_by_priority_then_fifo() {
    let h = harness();
    h.busy("alpha").await;
    let base = Utc::now() - Duration::minutes(10);
    for (title, priority, offset) in [("c", 3, 0), ("a", 1, 5), ("d", 3, 7), ("b", 2, 1)] {
        h.insert(
            Task::new(title)
                .assigned_to("alpha")
                .with_priority(priority)
                .with_status(TaskStatus::Queued)
                .created(base + Duration::seconds(offset)),
        )
        .await;
    }

    let queue = h.orch.agent_queue("alpha").await.unwrap();
    assert_eq!(queue.agent_id, "alpha");
    assert_eq!(queue.queue_depth, 4);
    let titles: Vec<&str> = queue.tasks.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, vec!["a", "b", "c", "d"]);
}

#[tokio::test]
async fn dequeue_while_busy_conflicts_and_leaves_queue_alone() {
    let h = harness();
    h.busy("alpha").await;
    h.insert(
        Task::new("waiting")
            .assigned_to("alpha")
            .with_status(TaskStatus::Queued),
    )
    .await;
    let before = h.orch.agent_queue("alpha").await.unwrap();

    let result = h.orch.dequeue_next("alpha").await;
    assert!(matches!(result, Err(WardenError::Conflict(_))));

    let after = h.orch.agent_queue("alpha").await.unwrap();
    assert_eq!(before, after);
    assert!(h.sink.events_of(EventKind::TaskDequeued).await.is_empty());
}

#[tokio::test]
async fn dequeue_empty_queue_returns_none() {
    let h = harness();
    assert!(h.orch.dequeue_next("idle").await.unwrap().is_none());
}

#[tokio::test]
async fn reassignment_reruns_creation_rule() {
    let h = harness();
    h.busy("beta").await;
    let t = h
        .orch
        .create_task(NewTask::new("Port parser").assigned_to("alpha"))
        .await
        .unwrap();
    assert_eq!(t.status, TaskStatus::Backlog);

    let moved = h
        .orch
        .update_task(t.id, TaskUpdate::assign("beta"))
        .await
        .unwrap();
    assert_eq!(moved.status, TaskStatus::Queued);
    assert_eq!(moved.assigned_agent_id.as_deref(), Some("beta"));

    let moved = h
        .orch
        .update_task(t.id, TaskUpdate::assign("gamma"))
        .await
        .unwrap();
    assert_eq!(moved.status, TaskStatus::Backlog);
    h.orch.settle().await;
    assert_eq!(h.notifier.messages_to("gamma").len(), 1);
    assert_eq!(h.sink.events_of(EventKind::TaskReassigned).await.len(), 2);
}

/// Store whose busyness index counts agents busy elsewhere.
struct IndexedStore {
    inner: MemoryTaskStore,
    busy_elsewhere: Vec<String>,
}

#[async_trait]
impl TaskStore for IndexedStore {
    async fn insert(&self, task: &Task) -> WardenResult<()> {
        self.inner.insert(task).await
    }

    async fn get(&self, id: uuid::Uuid) -> WardenResult<Option<Task>> {
        self.inner.get(id).await
    }

    async fn list(&self) -> WardenResult<Vec<Task>> {
        self.inner.list().await
    }

    async fn modify(&self, id: uuid::Uuid, mutation: TaskMutation) -> WardenResult<Task> {
        self.inner.modify(id, mutation).await
    }

    async fn count_active_for_agent(&self, agent_id: &str) -> WardenResult<usize> {
        let local = self.inner.count_active_for_agent(agent_id).await?;
        let remote = self.busy_elsewhere.iter().filter(|a| *a == agent_id).count();
        Ok(local + remote)
    }
}

#[tokio::test]
async fn busyness_comes_from_the_store_count_query() {
    let store = Arc::new(IndexedStore {
        inner: MemoryTaskStore::new(),
        busy_elsewhere: vec!["alpha".into()],
    });
    let sink = Arc::new(MemoryEventSink::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let orch = Orchestrator::new(store, notifier.clone(), sink, test_config()).unwrap();

    let t = orch
        .create_task(NewTask::new("Audit deps").assigned_to("alpha"))
        .await
        .unwrap();
    assert_eq!(t.status, TaskStatus::Queued);
    assert!(matches!(
        orch.dequeue_next("alpha").await,
        Err(WardenError::Conflict(_))
    ));

    let idle = orch
        .create_task(NewTask::new("Audit deps").assigned_to("beta"))
        .await
        .unwrap();
    assert_eq!(idle.status, TaskStatus::Backlog);
    orch.settle().await;
    assert!(notifier.messages_to("alpha").is_empty());
    assert_eq!(notifier.messages_to("beta").len(), 1);
}

// ---------------------------------------------------------------------------
// Queue processor
// ---------------------------------------------------------------------------

#[tokio::test]
async fn processor_dispatches_scheduled_retry_and_idle_queues() {
    let h = harness();
    let now = Utc::now();

    let scheduled = h
        .insert(
            Task::new("nightly report")
                .assigned_to("alpha")
                .scheduled_for(now - Duration::minutes(1)),
        )
        .await;
    let not_yet = h
        .insert(
            Task::new("tomorrow")
                .assigned_to("alpha")
                .scheduled_for(now + Duration::hours(12)),
        )
        .await;
    let mut failed = Task::new("flaky deploy")
        .assigned_to("beta")
        .with_status(TaskStatus::Failed);
    failed.retry_at = Some(now - Duration::seconds(5));
    let failed = h.insert(failed).await;
    let queued = h
        .insert(
            Task::new("queued for idle")
                .assigned_to("gamma")
                .with_status(TaskStatus::Queued),
        )
        .await;
    h.busy("delta").await;
    let stuck = h
        .insert(
            Task::new("queued for busy")
                .assigned_to("delta")
                .with_status(TaskStatus::Queued),
        )
        .await;

    let report = QueueProcessor::new(h.orch.clone()).sweep().await.unwrap();
    h.orch.settle().await;
    assert_eq!(
        report,
        SweepReport {
            scheduled: 1,
            retried: 1,
            dequeued: 1,
            failures: 0,
        }
    );

    let scheduled = h.orch.get_task(scheduled.id).await.unwrap();
    assert!(scheduled.scheduled_at.is_none());
    assert_eq!(scheduled.status, TaskStatus::Backlog);
    assert!(h.orch.get_task(not_yet.id).await.unwrap().scheduled_at.is_some());

    let failed = h.orch.get_task(failed.id).await.unwrap();
    assert_eq!(failed.status, TaskStatus::Backlog);
    assert!(failed.retry_at.is_none());

    assert_eq!(h.status(queued.id).await, TaskStatus::Backlog);
    assert_eq!(h.status(stuck.id).await, TaskStatus::Queued);

    assert_eq!(h.notifier.messages_to("alpha").len(), 1);
    assert_eq!(h.notifier.messages_to("beta").len(), 1);
    assert_eq!(h.notifier.messages_to("gamma").len(), 1);
    assert!(h.notifier.messages_to("delta").is_empty());

    // Idempotent: nothing left to do.
    let again = QueueProcessor::new(h.orch.clone()).sweep().await.unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn scheduled_task_for_busy_agent_is_queued() {
    let h = harness();
    h.busy("alpha").await;
    let t = h
        .insert(
            Task::new("due")
                .assigned_to("alpha")
                .scheduled_for(Utc::now() - Duration::seconds(1)),
        )
        .await;

    QueueProcessor::new(h.orch.clone()).sweep().await.unwrap();
    assert_eq!(h.status(t.id).await, TaskStatus::Queued);
}

#[tokio::test]
async fn background_processor_runs_at_startup_and_stops() {
    let h = harness_with(OrchestratorConfig {
        queue_interval_secs: 3600,
        watchdog_interval_secs: 3600,
        ..test_config()
    });
    let t = h
        .insert(
            Task::new("waiting")
                .assigned_to("alpha")
                .with_status(TaskStatus::Queued),
        )
        .await;
    let mut outcomes = h.orch.subscribe();

    let shutdown = CancellationToken::new();
    let handles = h.orch.start_background(shutdown.clone());

    let outcome = tokio::time::timeout(std::time::Duration::from_secs(5), outcomes.recv())
        .await
        .expect("startup sweep should dispatch")
        .unwrap();
    assert_eq!(outcome.task_id, t.id);
    assert_eq!(outcome.kind, NotificationKind::Assignment);

    shutdown.cancel();
    for handle in handles {
        handle.await.unwrap();
    }
    let stats = h.orch.monitor().get("queue_processor").await.unwrap();
    assert_eq!(stats.runs, 1);
    assert_eq!(stats.last_summary.unwrap()["dequeued"], 1);
    assert_eq!(h.orch.monitor().get("watchdog").await.unwrap().runs, 0);
}

// ---------------------------------------------------------------------------
// Watchdog
// ---------------------------------------------------------------------------

#[tokio::test]
async fn watchdog_renotifies_then_resets() {
    let h = harness();
    let mut stuck = Task::new("Refactor storage")
        .assigned_to("alpha")
        .with_status(TaskStatus::Executing)
        .created(Utc::now() - Duration::minutes(31));
    stuck.retry_count = 2;
    let stuck = h.insert(stuck).await;
    let watchdog = Watchdog::new(h.orch.clone());

    let report = watchdog.sweep().await.unwrap();
    h.orch.settle().await;
    assert_eq!(report.stale, 1);
    assert_eq!(report.renotified, 1);
    let t = h.orch.get_task(stuck.id).await.unwrap();
    assert_eq!(t.retry_count, 3);
    assert_eq!(t.status, TaskStatus::Executing);
    assert!(t.updated_at > stuck.updated_at);
    let sent = h.notifier.messages_to("alpha");
    assert_eq!(sent.len(), 1);
    assert!(sent[0].starts_with("Reminder (3/3)"));
    assert_eq!(h.sink.events_of(EventKind::TaskStalled).await.len(), 1);

    // Just re-notified: not flagged again.
    assert_eq!(watchdog.sweep().await.unwrap().stale, 0);

    h.age(stuck.id, 31).await;
    let report = watchdog.sweep().await.unwrap();
    h.orch.settle().await;
    assert_eq!(report.reset, 1);
    let t = h.orch.get_task(stuck.id).await.unwrap();
    assert_eq!(t.status, TaskStatus::Backlog);
    assert_eq!(t.retry_count, 0);
    assert_eq!(t.assigned_agent_id.as_deref(), Some("alpha"));
    assert_eq!(h.notifier.messages_to("alpha").len(), 1);

    let resets = h.sink.events_of(EventKind::TaskReset).await;
    assert_eq!(resets.len(), 1);
    assert_eq!(resets[0].payload["reason"], "retries_exhausted");
    let comments = h.sink.comments_for(stuck.id).await;
    assert!(comments
        .iter()
        .any(|c| c.author == CommentAuthor::System && c.body.contains("Reset to backlog")));
}

#[tokio::test]
async fn watchdog_resets_unassigned_and_ignores_terminal() {
    let h = harness();
    let old = Utc::now() - Duration::hours(2);
    let loose = h
        .insert(
            Task::new("orphan")
                .with_status(TaskStatus::Planning)
                .created(old),
        )
        .await;
    h.insert(
        Task::new("gone")
            .assigned_to("alpha")
            .with_status(TaskStatus::Cancelled)
            .created(old),
    )
    .await;
    h.insert(
        Task::new("waiting on human")
            .assigned_to("alpha")
            .with_status(TaskStatus::Review)
            .created(old),
    )
    .await;

    let report = Watchdog::new(h.orch.clone()).sweep().await.unwrap();
    assert_eq!(report.stale, 1);
    assert_eq!(report.reset, 1);
    assert_eq!(h.status(loose.id).await, TaskStatus::Backlog);
    let resets = h.sink.events_of(EventKind::TaskReset).await;
    assert_eq!(resets[0].payload["reason"], "unassigned");
}

#[tokio::test]
async fn watchdog_reset_of_subtask_reports_failure_to_parent() {
    let h = harness();
    let parent = h
        .insert(
            Task::new("Release 2.0")
                .assigned_to("lead")
                .with_status(TaskStatus::Executing),
        )
        .await;
    let mut sub = Task::new("Update docs")
        .assigned_to("writer")
        .with_parent(parent.id)
        .with_status(TaskStatus::Executing)
        .created(Utc::now() - Duration::hours(1));
    sub.retry_count = 3;
    let sub = h.insert(sub).await;

    Watchdog::new(h.orch.clone()).sweep().await.unwrap();
    h.orch.settle().await;

    assert_eq!(h.status(sub.id).await, TaskStatus::Backlog);
    let to_lead = h.notifier.messages_to("lead");
    assert_eq!(to_lead.len(), 1);
    assert!(to_lead[0].contains(&sub.id.to_string()));
    assert!(to_lead[0].contains("Final status: failed"));
}

// ---------------------------------------------------------------------------
// Delegation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn auto_delegation_notifies_parent_agent_once() {
    let h = harness();
    let parent = h
        .insert(
            Task::new("Launch site")
                .assigned_to("lead")
                .with_status(TaskStatus::Executing),
        )
        .await;
    let sub = h
        .orch
        .delegate(parent.id, NewTask::new("Design logo").assigned_to("designer"))
        .await
        .unwrap();
    let sibling = h
        .orch
        .delegate(parent.id, NewTask::new("Write copy").assigned_to("writer"))
        .await
        .unwrap();

    h.orch.update_status(sub.id, TaskStatus::Done).await.unwrap();
    h.orch.settle().await;

    let to_lead = h.notifier.messages_to("lead");
    assert_eq!(to_lead.len(), 1);
    assert!(to_lead[0].contains("Design logo"));
    assert!(to_lead[0].contains("Specialist: designer"));
    assert!(to_lead[0].contains(&sibling.id.to_string()));

    let notified = h.sink.events_of(EventKind::DelegationNotified).await;
    assert_eq!(notified.len(), 1);
    assert_eq!(notified[0].task_id, Some(parent.id));
    let parent_comments = h.sink.comments_for(parent.id).await;
    assert_eq!(parent_comments.len(), 1);
    assert_eq!(parent_comments[0].author, CommentAuthor::Agent("lead".into()));
}

#[tokio::test]
async fn finished_subtask_reports_once_even_if_cancelled_later() {
    let h = harness();
    let parent = h
        .insert(
            Task::new("Ship release")
                .assigned_to("lead")
                .with_status(TaskStatus::Executing),
        )
        .await;
    let sub = h
        .orch
        .delegate(parent.id, NewTask::new("Tag build").assigned_to("builder"))
        .await
        .unwrap();

    h.orch.update_status(sub.id, TaskStatus::Done).await.unwrap();
    h.orch.settle().await;
    h.orch.cancel_task(sub.id).await.unwrap();
    h.orch.update_status(sub.id, TaskStatus::Failed).await.unwrap();
    h.orch.settle().await;

    assert_eq!(h.notifier.messages_to("lead").len(), 1);
    assert_eq!(h.sink.events_of(EventKind::DelegationNotified).await.len(), 1);
    assert_eq!(h.status(sub.id).await, TaskStatus::Failed);
}

#[tokio::test]
async fn manual_delegation_waits_for_approval() {
    let h = harness();
    let parent = h
        .insert(
            Task::new("Quarterly audit")
                .assigned_to("lead")
                .with_status(TaskStatus::Executing),
        )
        .await;
    let sub = h
        .orch
        .delegate(
            parent.id,
            NewTask::new("Reconcile ledger")
                .assigned_to("accountant")
                .with_delegation_mode(DelegationMode::Manual),
        )
        .await
        .unwrap();

    h.orch.update_status(sub.id, TaskStatus::Done).await.unwrap();
    h.orch.settle().await;
    let pending = h.sink.events_of(EventKind::PendingApproval).await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].task_id, Some(sub.id));
    assert!(h.notifier.messages_to("lead").is_empty());

    h.orch.approve_delegation(sub.id).await.unwrap();
    h.orch.settle().await;
    let to_lead = h.notifier.messages_to("lead");
    assert_eq!(to_lead.len(), 1);
    assert!(to_lead[0].contains(&sub.id.to_string()));
    assert!(to_lead[0].contains("Reconcile ledger"));
    assert!(to_lead[0].contains("Final status: done"));
    assert_eq!(h.sink.events_of(EventKind::DelegationApproved).await.len(), 1);
}

#[tokio::test]
async fn approve_requires_finished_subtask() {
    let h = harness();
    let parent = h.insert(Task::new("p").assigned_to("lead")).await;
    let sub = h
        .insert(
            Task::new("s")
                .assigned_to("writer")
                .with_parent(parent.id)
                .with_status(TaskStatus::Executing),
        )
        .await;
    assert!(matches!(
        h.orch.approve_delegation(sub.id).await,
        Err(WardenError::Conflict(_))
    ));
    assert!(matches!(
        h.orch.approve_delegation(uuid::Uuid::new_v4()).await,
        Err(WardenError::NotFound(_))
    ));
}

#[tokio::test]
async fn parent_without_agent_is_not_notified() {
    let h = harness();
    let parent = h.insert(Task::new("headless")).await;
    let sub = h
        .insert(
            Task::new("s")
                .assigned_to("writer")
                .with_parent(parent.id)
                .with_status(TaskStatus::Executing),
        )
        .await;
    h.orch.update_status(sub.id, TaskStatus::Done).await.unwrap();
    h.orch.settle().await;
    assert!(h.sink.events_of(EventKind::DelegationNotified).await.is_empty());
    assert!(h.sink.events_of(EventKind::PendingApproval).await.is_empty());
}

#[tokio::test]
async fn approving_under_headless_parent_notifies_nobody() {
    let h = harness();
    let parent = h.insert(Task::new("headless")).await;
    let sub = h
        .orch
        .delegate(
            parent.id,
            NewTask::new("Translate README")
                .assigned_to("translator")
                .with_delegation_mode(DelegationMode::Manual),
        )
        .await
        .unwrap();
    h.orch.update_status(sub.id, TaskStatus::Done).await.unwrap();
    h.orch.settle().await;

    let approved = h.orch.approve_delegation(sub.id).await.unwrap();
    h.orch.settle().await;
    assert_eq!(approved.status, TaskStatus::Done);
    assert!(h.sink.events_of(EventKind::DelegationNotified).await.is_empty());
    assert_eq!(h.sink.events_of(EventKind::DelegationApproved).await.len(), 1);
}

#[tokio::test]
async fn watchdog_reset_of_manual_subtask_can_be_approved() {
    let h = harness();
    let parent = h
        .insert(
            Task::new("Migrate database")
                .assigned_to("lead")
                .with_status(TaskStatus::Executing),
        )
        .await;
    let mut sub = Task::new("Write migration")
        .assigned_to("dba")
        .with_parent(parent.id)
        .with_delegation_mode(DelegationMode::Manual)
        .with_status(TaskStatus::Executing)
        .created(Utc::now() - Duration::hours(1));
    sub.retry_count = 3;
    let sub = h.insert(sub).await;

    Watchdog::new(h.orch.clone()).sweep().await.unwrap();
    h.orch.settle().await;
    assert_eq!(h.sink.events_of(EventKind::PendingApproval).await.len(), 1);
    assert!(h.notifier.messages_to("lead").is_empty());
    let held = h.orch.get_task(sub.id).await.unwrap();
    assert_eq!(held.status, TaskStatus::Backlog);
    assert_eq!(held.pending_report, Some(TaskStatus::Failed));

    let approved = h.orch.approve_delegation(sub.id).await.unwrap();
    h.orch.settle().await;
    assert_eq!(approved.status, TaskStatus::Backlog);
    assert!(approved.pending_report.is_none());
    let to_lead = h.notifier.messages_to("lead");
    assert_eq!(to_lead.len(), 1);
    assert!(to_lead[0].contains("Final status: failed"));

    // The held report is released once; a second approval is refused.
    assert!(matches!(
        h.orch.approve_delegation(sub.id).await,
        Err(WardenError::Conflict(_))
    ));
}

#[tokio::test]
async fn request_changes_comments_then_reopens_then_messages_specialist() {
    let h = harness();
    let parent = h
        .insert(
            Task::new("Ship API")
                .assigned_to("lead")
                .with_status(TaskStatus::Executing),
        )
        .await;
    let sub = h
        .insert(
            Task::new("Draft OpenAPI")
                .assigned_to("writer")
                .with_parent(parent.id)
                .with_delegation_mode(DelegationMode::Manual)
                .with_status(TaskStatus::Done),
        )
        .await;

    assert!(matches!(
        h.orch.request_changes(sub.id, "   ").await,
        Err(WardenError::Validation(_))
    ));

    let reopened = h
        .orch
        .request_changes(sub.id, "Paginate the list endpoints")
        .await
        .unwrap();
    h.orch.settle().await;
    assert_eq!(reopened.status, TaskStatus::Executing);

    let records: Vec<SinkRecord> = h
        .sink
        .records()
        .await
        .into_iter()
        .filter(|r| r.task_id() == Some(sub.id))
        .collect();
    let human = records
        .iter()
        .position(|r| matches!(r, SinkRecord::Comment(c) if c.author == CommentAuthor::Human))
        .unwrap();
    let reopen = records
        .iter()
        .position(|r| {
            matches!(r, SinkRecord::Event(e)
                if e.kind == EventKind::StatusChanged && e.payload["to"] == "executing")
        })
        .unwrap();
    let requested = records
        .iter()
        .position(|r| matches!(r, SinkRecord::Event(e) if e.kind == EventKind::ChangesRequested))
        .unwrap();
    assert!(human < reopen && reopen < requested);

    let to_writer = h.notifier.messages_to("writer");
    assert_eq!(to_writer.len(), 1);
    assert!(to_writer[0].contains("Paginate the list endpoints"));
    assert!(h.notifier.messages_to("lead").is_empty());
}

// ---------------------------------------------------------------------------
// Retry and delivery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn retry_now_reopens_and_notifies_even_when_busy() {
    let h = harness();
    h.busy("alpha").await;
    let mut failed = Task::new("broken build")
        .assigned_to("alpha")
        .with_status(TaskStatus::Failed);
    failed.retry_count = 2;
    let failed = h.insert(failed).await;

    let t = h.orch.retry_task(failed.id, RetryRequest::Now).await.unwrap();
    h.orch.settle().await;
    assert_eq!(t.status, TaskStatus::Backlog);
    assert_eq!(t.retry_count, 0);
    assert_eq!(h.notifier.messages_to("alpha").len(), 1);
    assert_eq!(h.sink.events_of(EventKind::TaskRetried).await.len(), 1);
}

#[tokio::test]
async fn scheduled_retry_leaves_status_until_due() {
    let h = harness();
    let failed = h
        .insert(
            Task::new("broken build")
                .assigned_to("alpha")
                .with_status(TaskStatus::Failed),
        )
        .await;
    let at = Utc::now() + Duration::minutes(10);
    let t = h
        .orch
        .retry_task(failed.id, RetryRequest::At(at))
        .await
        .unwrap();
    assert_eq!(t.status, TaskStatus::Failed);

    let report = QueueProcessor::new(h.orch.clone()).sweep().await.unwrap();
    assert_eq!(report.retried, 0);
    assert_eq!(h.status(failed.id).await, TaskStatus::Failed);
}

#[tokio::test]
async fn transient_failures_are_retried_until_delivered() {
    let h = harness();
    h.notifier.fail_next("alpha", "session file locked", 2);

    let t = h
        .orch
        .create_task(NewTask::new("Compile docs").assigned_to("alpha"))
        .await
        .unwrap();
    h.orch.settle().await;

    assert_eq!(h.notifier.messages_to("alpha").len(), 3);
    assert_eq!(h.sink.events_of(EventKind::AgentNotified).await.len(), 1);
    assert!(h.sink.events_of(EventKind::NotificationFailed).await.is_empty());
    assert_eq!(h.status(t.id).await, TaskStatus::Backlog);
}

#[tokio::test]
async fn fatal_failure_is_recorded_not_raised() {
    let h = harness();
    h.notifier.fail_next("ghost", "agent ghost does not exist", 1);

    let t = h
        .orch
        .create_task(NewTask::new("Haunt").assigned_to("ghost"))
        .await
        .unwrap();
    h.orch.settle().await;

    assert_eq!(h.notifier.messages_to("ghost").len(), 1);
    let failed = h.sink.events_of(EventKind::NotificationFailed).await;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].task_id, Some(t.id));
    let comments = h.sink.comments_for(t.id).await;
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].author, CommentAuthor::System);
    assert!(comments[0].body.contains("does not exist"));
}

#[tokio::test]
async fn exhausted_retries_surface_as_failed_outcome() {
    let h = harness();
    h.notifier.fail_next("alpha", "request timed out", 5);
    let mut outcomes = h.orch.subscribe();

    h.orch
        .create_task(NewTask::new("Slow").assigned_to("alpha"))
        .await
        .unwrap();
    h.orch.settle().await;

    assert_eq!(h.notifier.messages_to("alpha").len(), 3);
    let outcome = outcomes.recv().await.unwrap();
    let error = outcome.result.unwrap_err();
    assert!(error.contains("after 3 attempts"));
    assert!(error.contains("timed out"));
}

// ---------------------------------------------------------------------------
// Running tasks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn run_task_respects_cap_and_cancellation() {
    let h = harness_with(OrchestratorConfig {
        max_parallel: 1,
        ..test_config()
    });
    let first = h.insert(Task::new("long job").assigned_to("alpha")).await;
    let second = h.insert(Task::new("other job").assigned_to("beta")).await;

    let handle = h
        .orch
        .run_task(first.id, |_task, token| async move {
            token.cancelled().await;
            Ok(String::new())
        })
        .await
        .unwrap();
    assert!(h.orch.is_running(first.id));
    assert_eq!(h.status(first.id).await, TaskStatus::Executing);

    let over_cap = h
        .orch
        .run_task(second.id, |_, _| async { Ok(String::new()) })
        .await;
    assert!(matches!(over_cap, Err(WardenError::CapacityExceeded(_))));
    let twice = h
        .orch
        .run_task(first.id, |_, _| async { Ok(String::new()) })
        .await;
    assert!(matches!(twice, Err(WardenError::Conflict(_))));

    let cancelled = h.orch.cancel_task(first.id).await.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    let finished = handle.await.unwrap().unwrap();
    assert_eq!(finished.status, TaskStatus::Cancelled);
    assert!(!h.orch.is_running(first.id));
    assert_eq!(h.sink.events_of(EventKind::RunCancelled).await.len(), 1);

    // The slot is free again.
    let handle = h
        .orch
        .run_task(second.id, |_, _| async { Ok("shipped".to_string()) })
        .await
        .unwrap();
    let done = handle.await.unwrap().unwrap();
    assert_eq!(done.status, TaskStatus::Done);
    let comments = h.sink.comments_for(second.id).await;
    assert!(comments.iter().any(|c| c.body == "shipped"));
}

#[tokio::test]
async fn cancelled_run_is_not_overwritten_by_late_output() {
    let h = harness();
    let task = h.insert(Task::new("index repo").assigned_to("alpha")).await;
    let handle = h
        .orch
        .run_task(task.id, |_task, _token| async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok("late output".to_string())
        })
        .await
        .unwrap();

    h.orch.cancel_task(task.id).await.unwrap();
    let finished = handle.await.unwrap().unwrap();
    assert_eq!(finished.status, TaskStatus::Cancelled);
    assert_eq!(h.status(task.id).await, TaskStatus::Cancelled);
    assert!(h
        .sink
        .comments_for(task.id)
        .await
        .iter()
        .all(|c| c.body != "late output"));
}

#[tokio::test]
async fn failed_run_marks_task_failed() {
    let h = harness();
    let t = h.insert(Task::new("doomed").assigned_to("alpha")).await;
    let handle = h
        .orch
        .run_task(t.id, |_, _| async {
            Err(WardenError::Notifier("compiler crashed".into()))
        })
        .await
        .unwrap();
    let finished = handle.await.unwrap().unwrap();
    assert_eq!(finished.status, TaskStatus::Failed);
    let comments = h.sink.comments_for(t.id).await;
    assert!(comments
        .iter()
        .any(|c| c.body.contains("Execution failed") && c.body.contains("compiler crashed")));
}

// ---------------------------------------------------------------------------
// File-backed collaborators
// ---------------------------------------------------------------------------

#[tokio::test]
async fn file_backed_orchestrator_persists_tasks_and_audit_log() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(FileTaskStore::new(tmp.path().join("tasks")).await.unwrap());
    let sink = Arc::new(JsonlEventSink::new(tmp.path().to_path_buf()).await.unwrap());
    let notifier = Arc::new(RecordingNotifier::default());
    let orch = Orchestrator::new(store.clone(), notifier.clone(), sink.clone(), test_config())
        .unwrap();

    let t = orch
        .create_task(NewTask::new("Persisted").assigned_to("alpha"))
        .await
        .unwrap();
    orch.update_status(t.id, TaskStatus::Planning).await.unwrap();
    orch.settle().await;

    let reopened = FileTaskStore::new(tmp.path().join("tasks")).await.unwrap();
    let loaded = reopened.require(t.id).await.unwrap();
    assert_eq!(loaded.status, TaskStatus::Planning);
    assert!(loaded.started_at.is_some());

    let log = sink.read_for_task(t.id).await.unwrap();
    let kinds: Vec<EventKind> = log
        .iter()
        .filter_map(|r| match r {
            SinkRecord::Event(e) => Some(e.kind),
            SinkRecord::Comment(_) => None,
        })
        .collect();
    assert!(kinds.contains(&EventKind::TaskCreated));
    assert!(kinds.contains(&EventKind::StatusChanged));
    assert!(kinds.contains(&EventKind::AgentNotified));
}
