use crate::engine::Orchestrator;
use crate::messages;
use crate::outbox::NotificationKind;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use warden_core::{Comment, Event, EventKind, Task, TaskStatus, WardenResult};

/// Monitor name of the watchdog loop.
pub const WATCHDOG: &str = "watchdog";

/// Why a stale task went back to backlog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetReason {
    /// The task has no agent to remind.
    Unassigned,
    /// The agent was reminded `max_retries` times already.
    RetriesExhausted,
}

impl std::fmt::Display for ResetReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResetReason::Unassigned => write!(f, "no assigned agent"),
            ResetReason::RetriesExhausted => write!(f, "re-notification retries exhausted"),
        }
    }
}

/// What the watchdog does with one stale task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleAction {
    /// Bump `retry_count` to `attempt` and message the agent again.
    Renotify {
        /// Reminder number, starting at 1.
        attempt: u32,
    },
    /// Move the task back to backlog.
    Reset {
        /// Why the task was given up on.
        reason: ResetReason,
    },
}

/// Two-path policy: at most `max_retries` re-notifications, then reset.
pub fn decide(task: &Task, max_retries: u32) -> StaleAction {
    if task.assigned_agent_id.is_none() {
        StaleAction::Reset {
            reason: ResetReason::Unassigned,
        }
    } else if task.retry_count < max_retries {
        StaleAction::Renotify {
            attempt: task.retry_count + 1,
        }
    } else {
        StaleAction::Reset {
            reason: ResetReason::RetriesExhausted,
        }
    }
}

/// Counts from one watchdog sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogReport {
    /// Active tasks older than the stale threshold.
    pub stale: usize,
    /// Stale tasks whose agent was reminded.
    pub renotified: usize,
    /// Stale tasks moved back to backlog.
    pub reset: usize,
    /// Tasks whose handling errored.
    pub failures: usize,
}

/// Periodic sweep over tasks stuck in an active status.
///
/// A reset keeps the agent assignment: the task lands in `backlog` for a
/// manual retry or reassignment instead of being re-offered to the same
/// agent automatically.
pub struct Watchdog {
    orch: Orchestrator,
}

impl Watchdog {
    /// Watchdog over `orch`.
    pub fn new(orch: Orchestrator) -> Self {
        Self { orch }
    }

    /// Handle every stale task once.
    pub async fn sweep(&self) -> WardenResult<WatchdogReport> {
        let cutoff = chrono::Utc::now() - self.orch.config().stale_threshold();
        let stale = self.orch.store().stale_active(cutoff).await?;
        let mut report = WatchdogReport {
            stale: stale.len(),
            ..Default::default()
        };

        for task in stale {
            let action = decide(&task, self.orch.config().max_retries);
            let result = match action {
                StaleAction::Renotify { attempt } => self.renotify(&task, attempt).await,
                StaleAction::Reset { reason } => self.reset(&task, reason).await,
            };
            match (result, action) {
                (Ok(()), StaleAction::Renotify { .. }) => report.renotified += 1,
                (Ok(()), StaleAction::Reset { .. }) => report.reset += 1,
                (Err(e), _) => {
                    warn!(task_id = %task.id, error = %e, "Stale task recovery failed");
                    report.failures += 1;
                }
            }
        }
        Ok(report)
    }

    async fn renotify(&self, task: &Task, attempt: u32) -> WardenResult<()> {
        let Some(agent) = task.assigned_agent_id.clone() else {
            return Ok(());
        };
        let max_retries = self.orch.config().max_retries;
        let updated = self.orch.store().increment_retry_count(task.id).await?;
        warn!(
            task_id = %task.id,
            agent_id = %agent,
            status = %task.status,
            attempt,
            max_retries,
            "Task stalled, re-notifying agent"
        );
        self.orch
            .record_event(
                Event::new(EventKind::TaskStalled)
                    .for_task(task.id)
                    .for_agent(&agent)
                    .with_payload(serde_json::json!({
                        "status": task.status,
                        "attempt": attempt,
                        "max_retries": max_retries,
                        "last_update": task.updated_at,
                    })),
            )
            .await;
        self.orch
            .record_comment(Comment::system(
                task.id,
                format!(
                    "No update since {} while {}. Re-notifying {agent} (attempt {attempt}/{max_retries}).",
                    task.updated_at.to_rfc3339(),
                    task.status
                ),
            ))
            .await;
        self.orch.notify(
            agent,
            task.id,
            NotificationKind::WatchdogRetry { attempt },
            messages::stall(task, attempt, max_retries),
        );
        debug!(task_id = %task.id, retry_count = updated.retry_count, "Stall recorded");
        Ok(())
    }

    async fn reset(&self, task: &Task, reason: ResetReason) -> WardenResult<()> {
        let updated = self.orch.write_status(task, TaskStatus::Backlog).await?;
        warn!(task_id = %task.id, status = %task.status, %reason, "Stale task reset to backlog");
        self.orch
            .record_event(
                Event::new(EventKind::TaskReset)
                    .for_task(task.id)
                    .for_agent_opt(task.assigned_agent_id.as_deref())
                    .with_payload(serde_json::json!({
                        "reason": reason,
                        "previous_status": task.status,
                        "retry_count": task.retry_count,
                    })),
            )
            .await;
        self.orch
            .record_comment(Comment::system(
                task.id,
                format!("Reset to backlog from {}: {reason}.", task.status),
            ))
            .await;
        // An unresponsive specialist must not stall its orchestrator.
        if updated.parent_task_id.is_some() {
            self.orch
                .on_subtask_finished(&updated, TaskStatus::Failed)
                .await;
        }
        Ok(())
    }

    async fn run_once(&self) {
        let started = Instant::now();
        let result = self.sweep().await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let monitor = self.orch.monitor();
        match result {
            Ok(report) => {
                if report.stale > 0 {
                    info!(
                        stale = report.stale,
                        renotified = report.renotified,
                        reset = report.reset,
                        failures = report.failures,
                        "Watchdog sweep finished"
                    );
                }
                let summary = serde_json::to_value(&report).unwrap_or_default();
                monitor.record_success(WATCHDOG, summary, elapsed_ms).await;
            }
            Err(e) => {
                error!(error = %e, "Watchdog sweep failed");
                monitor.record_failure(WATCHDOG, &e.to_string(), elapsed_ms).await;
            }
        }
    }

    /// Spawn the sweep loop. The first sweep runs one interval after start.
    pub fn start(self, shutdown: CancellationToken) -> JoinHandle<()> {
        let period = self.orch.config().watchdog_interval();
        tokio::spawn(async move {
            self.orch.monitor().register(WATCHDOG, period.as_secs()).await;
            info!(
                interval_secs = period.as_secs(),
                stale_threshold_secs = self.orch.config().stale_threshold_secs,
                "Watchdog started"
            );
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Watchdog stopped");
                        break;
                    }
                    _ = ticker.tick() => self.run_once().await,
                }
            }
        })
    }
}
