use crate::error::{WardenError, WardenResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;
use uuid::Uuid;

/// Most urgent priority.
pub const PRIORITY_HIGHEST: u8 = 1;
/// Least urgent priority.
pub const PRIORITY_LOWEST: u8 = 5;
/// Priority given to tasks created without one.
pub const PRIORITY_DEFAULT: u8 = 3;

/// Status of a task in the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for its agent to become idle.
    Queued,
    /// Not being worked on; either freshly dispatched or reset.
    Backlog,
    /// Active: working out an approach.
    Planning,
    /// Active: clarifying with other agents.
    Discussing,
    /// Active: doing the work.
    Executing,
    /// Active: checking the result.
    Verifying,
    /// Work handed back for human review.
    Review,
    /// Terminal: finished successfully.
    Done,
    /// Terminal: gave up.
    Failed,
    /// Terminal: stopped by a person.
    Cancelled,
}

impl TaskStatus {
    /// Every status, in workflow order.
    pub const ALL: [TaskStatus; 10] = [
        TaskStatus::Queued,
        TaskStatus::Backlog,
        TaskStatus::Planning,
        TaskStatus::Discussing,
        TaskStatus::Executing,
        TaskStatus::Verifying,
        TaskStatus::Review,
        TaskStatus::Done,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    /// Statuses that count toward an agent's busyness.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            TaskStatus::Planning
                | TaskStatus::Discussing
                | TaskStatus::Executing
                | TaskStatus::Verifying
        )
    }

    /// Statuses that end a task's lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Done | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Wire name, as used in serialized tasks.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Backlog => "backlog",
            TaskStatus::Planning => "planning",
            TaskStatus::Discussing => "discussing",
            TaskStatus::Executing => "executing",
            TaskStatus::Verifying => "verifying",
            TaskStatus::Review => "review",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        TaskStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == lower)
            .ok_or_else(|| WardenError::Validation(format!("unknown task status '{s}'")))
    }
}

/// Whether a finished sub-task reports to its orchestrator immediately or
/// only after a human approves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelegationMode {
    /// Report as soon as the sub-task finishes.
    #[default]
    Auto,
    /// Hold the report until a human approves it.
    Manual,
}

impl std::fmt::Display for DelegationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DelegationMode::Auto => write!(f, "auto"),
            DelegationMode::Manual => write!(f, "manual"),
        }
    }
}

impl FromStr for DelegationMode {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(DelegationMode::Auto),
            "manual" => Ok(DelegationMode::Manual),
            other => Err(WardenError::Validation(format!(
                "unknown delegation mode '{other}'"
            ))),
        }
    }
}

/// Check that a priority lies in `1..=5`.
pub fn validate_priority(priority: u8) -> WardenResult<u8> {
    if (PRIORITY_HIGHEST..=PRIORITY_LOWEST).contains(&priority) {
        Ok(priority)
    } else {
        Err(WardenError::Validation(format!(
            "priority must be between {PRIORITY_HIGHEST} and {PRIORITY_LOWEST}, got {priority}"
        )))
    }
}

/// A unit of work assigned to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task id.
    pub id: Uuid,
    /// Short summary shown to agents.
    pub title: String,
    /// Full instructions.
    #[serde(default)]
    pub description: String,
    /// Agent the task is assigned to.
    #[serde(default)]
    pub assigned_agent_id: Option<String>,
    /// Orchestrator task this sub-task was delegated from.
    #[serde(default)]
    pub parent_task_id: Option<Uuid>,
    /// Current workflow status.
    pub status: TaskStatus,
    /// 1 (most urgent) to 5.
    pub priority: u8,
    /// How completion of this sub-task reaches its parent's agent.
    #[serde(default)]
    pub delegation_mode: DelegationMode,
    /// Watchdog re-notify counter.
    #[serde(default)]
    pub retry_count: u32,
    /// Do not dispatch before this time.
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Operator-requested retry time.
    #[serde(default)]
    pub retry_at: Option<DateTime<Utc>>,
    /// Creation time; breaks priority ties in a queue.
    pub created_at: DateTime<Utc>,
    /// Staleness clock.
    pub updated_at: DateTime<Utc>,
    /// First entry into an active status.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// Last entry into a terminal status.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Final status of a sub-task report held for human approval. Cleared
    /// by the next status write or by approval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_report: Option<TaskStatus>,
}

impl Task {
    /// A new unassigned backlog task with default priority.
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: String::new(),
            assigned_agent_id: None,
            parent_task_id: None,
            status: TaskStatus::Backlog,
            priority: PRIORITY_DEFAULT,
            delegation_mode: DelegationMode::Auto,
            retry_count: 0,
            scheduled_at: None,
            retry_at: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            pending_report: None,
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

    /// Make this a sub-task of `parent_task_id`.
    pub fn with_parent(mut self, parent_task_id: Uuid) -> Self {
        self.parent_task_id = Some(parent_task_id);
        self
    }

    /// Set the priority. Out-of-range values are rejected at the
    /// orchestrator boundary, not here.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Set how sub-task completion is reported.
    pub fn with_delegation_mode(mut self, mode: DelegationMode) -> Self {
        self.delegation_mode = mode;
        self
    }

    /// Set the status directly, bypassing [`Task::set_status`].
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Defer dispatch until `at`.
    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// Override both creation and update timestamps.
    pub fn created(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self.updated_at = at;
        self
    }

    /// See [`TaskStatus::is_active`].
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// See [`TaskStatus::is_terminal`].
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether `agent_id` is the assigned agent.
    pub fn is_assigned_to(&self, agent_id: &str) -> bool {
        self.assigned_agent_id.as_deref() == Some(agent_id)
    }

    /// Whether `scheduled_at` gates dispatch at `now`.
    pub fn is_deferred(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.is_some_and(|at| at > now)
    }

    /// Apply an explicit status write.
    ///
    /// Resets `retry_count`, drops any held sub-task report and advances
    /// `updated_at`. Stamps `started_at` on the first entry into an active
    /// status and `completed_at` on entry into a terminal one. Re-opening a
    /// terminal task clears `completed_at`.
    pub fn set_status(&mut self, status: TaskStatus, now: DateTime<Utc>) {
        self.status = status;
        self.retry_count = 0;
        self.pending_report = None;
        self.updated_at = now;
        if status.is_active() && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if status.is_terminal() {
            self.completed_at = Some(now);
        } else {
            self.completed_at = None;
        }
    }

    /// Dispatch order within one agent's queue: priority ascending, then
    /// creation time ascending. The id breaks exact timestamp ties so the
    /// order is total.
    pub fn queue_order(a: &Task, b: &Task) -> Ordering {
        a.priority
            .cmp(&b.priority)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    }
}
