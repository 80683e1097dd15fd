use crate::engine::Orchestrator;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use warden_core::{Event, EventKind, Task, WardenError, WardenResult};

/// Monitor name of the queue processor loop.
pub const QUEUE_PROCESSOR: &str = "queue_processor";

/// Counts from one queue-processor sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Backlog tasks whose `scheduled_at` passed.
    pub scheduled: usize,
    /// Tasks whose `retry_at` passed.
    pub retried: usize,
    /// Queue heads handed to idle agents.
    pub dequeued: usize,
    /// Per-task failures, logged and skipped.
    pub failures: usize,
}

impl SweepReport {
    /// Whether the sweep found nothing to do.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Periodic sweep that dispatches scheduled, retry-due and queued work.
///
/// Runs once at startup and then every `queue_interval_secs`. Every step is
/// idempotent per task, and one task failing does not stop the sweep.
pub struct QueueProcessor {
    orch: Orchestrator,
}

impl QueueProcessor {
    /// Processor over `orch`.
    pub fn new(orch: Orchestrator) -> Self {
        Self { orch }
    }

    /// Run one sweep: scheduled dispatch, retry dispatch, then idle agents.
    pub async fn sweep(&self) -> WardenResult<SweepReport> {
        let mut report = SweepReport::default();
        let store = self.orch.store();
        let now = chrono::Utc::now();

        for task in store.due_scheduled(now).await? {
            match self.dispatch_scheduled(&task).await {
                Ok(()) => report.scheduled += 1,
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "Scheduled dispatch failed");
                    report.failures += 1;
                }
            }
        }

        for task in store.due_retries(now).await? {
            match self.dispatch_retry(&task).await {
                Ok(()) => report.retried += 1,
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "Retry dispatch failed");
                    report.failures += 1;
                }
            }
        }

        for agent in store.agents_with_queued_tasks().await? {
            match self.orch.dequeue_next(&agent).await {
                Ok(Some(_)) => report.dequeued += 1,
                Ok(None) => {}
                Err(WardenError::Conflict(_)) => debug!(agent_id = %agent, "Agent busy, queue left alone"),
                Err(e) => {
                    warn!(agent_id = %agent, error = %e, "Dequeue failed");
                    report.failures += 1;
                }
            }
        }

        Ok(report)
    }

    async fn dispatch_scheduled(&self, task: &Task) -> WardenResult<()> {
        let task = self.orch.store().clear_scheduled_at(task.id).await?;
        debug!(task_id = %task.id, "Scheduled task due");
        self.orch.dispatch(task).await?;
        Ok(())
    }

    async fn dispatch_retry(&self, task: &Task) -> WardenResult<()> {
        let task = self.orch.store().set_retry_at(task.id, None).await?;
        self.orch
            .record_event(
                Event::new(EventKind::TaskRetried)
                    .for_task(task.id)
                    .for_agent_opt(task.assigned_agent_id.as_deref())
                    .with_payload(serde_json::json!({ "scheduled": true })),
            )
            .await;
        self.orch.dispatch(task).await?;
        Ok(())
    }

    async fn run_once(&self) {
        let started = Instant::now();
        let result = self.sweep().await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let monitor = self.orch.monitor();
        match result {
            Ok(report) => {
                if report.is_empty() {
                    debug!("Queue sweep: nothing to do");
                } else {
                    info!(
                        scheduled = report.scheduled,
                        retried = report.retried,
                        dequeued = report.dequeued,
                        failures = report.failures,
                        "Queue sweep finished"
                    );
                }
                let summary = serde_json::to_value(&report).unwrap_or_default();
                monitor.record_success(QUEUE_PROCESSOR, summary, elapsed_ms).await;
            }
            Err(e) => {
                error!(error = %e, "Queue sweep failed");
                monitor
                    .record_failure(QUEUE_PROCESSOR, &e.to_string(), elapsed_ms)
                    .await;
            }
        }
    }

    /// Spawn the sweep loop. The first sweep runs immediately.
    pub fn start(self, shutdown: CancellationToken) -> JoinHandle<()> {
        let period = self.orch.config().queue_interval();
        tokio::spawn(async move {
            self.orch
                .monitor()
                .register(QUEUE_PROCESSOR, period.as_secs())
                .await;
            info!(interval_secs = period.as_secs(), "Queue processor started");
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Queue processor stopped");
                        break;
                    }
                    _ = ticker.tick() => self.run_once().await,
                }
            }
        })
    }
}
