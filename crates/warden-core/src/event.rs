use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of an audit [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A task was created.
    TaskCreated,
    /// An explicit status write.
    StatusChanged,
    /// The assigned agent changed.
    TaskReassigned,
    /// Task was placed in its agent's queue because the agent was busy.
    TaskQueued,
    /// Head of an agent's queue was promoted to dispatch.
    TaskDequeued,
    /// Agent acknowledged a notification.
    AgentNotified,
    /// Every attempt to message an agent failed.
    NotificationFailed,
    /// Watchdog found a stalled task and re-notified its agent.
    TaskStalled,
    /// Watchdog gave up on a stalled task and moved it back to backlog.
    TaskReset,
    /// A scheduled retry became due and was dispatched.
    TaskRetried,
    /// A retry was scheduled for later.
    RetryScheduled,
    /// Orchestrator agent was told a sub-task finished.
    DelegationNotified,
    /// Reporting a sub-task to its orchestrator agent failed.
    DelegationFailed,
    /// Sub-task finished under manual delegation and waits for a human.
    PendingApproval,
    /// A held sub-task report was released.
    DelegationApproved,
    /// A sub-task was sent back to its specialist.
    ChangesRequested,
    /// A task execution started.
    RunStarted,
    /// A task execution was cancelled.
    RunCancelled,
}

impl EventKind {
    /// Wire name, as used in serialized events.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::TaskCreated => "task_created",
            EventKind::StatusChanged => "status_changed",
            EventKind::TaskReassigned => "task_reassigned",
            EventKind::TaskQueued => "task_queued",
            EventKind::TaskDequeued => "task_dequeued",
            EventKind::AgentNotified => "agent_notified",
            EventKind::NotificationFailed => "notification_failed",
            EventKind::TaskStalled => "task_stalled",
            EventKind::TaskReset => "task_reset",
            EventKind::TaskRetried => "task_retried",
            EventKind::RetryScheduled => "retry_scheduled",
            EventKind::DelegationNotified => "delegation_notified",
            EventKind::DelegationFailed => "delegation_failed",
            EventKind::PendingApproval => "pending_approval",
            EventKind::DelegationApproved => "delegation_approved",
            EventKind::ChangesRequested => "changes_requested",
            EventKind::RunStarted => "run_started",
            EventKind::RunCancelled => "run_cancelled",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable, typed audit record scoped to a task and/or an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event id.
    pub id: Uuid,
    /// What happened.
    pub kind: EventKind,
    /// Task the event concerns, if any.
    pub task_id: Option<Uuid>,
    /// Agent the event concerns, if any.
    pub agent_id: Option<String>,
    /// Kind-specific details.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// When it was recorded.
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// A new event with no scope and an empty payload.
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            task_id: None,
            agent_id: None,
            payload: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    /// Scope the event to a task.
    pub fn for_task(mut self, task_id: Uuid) -> Self {
        self.task_id = Some(task_id);
        self
    }

    /// Scope the event to an agent.
    pub fn for_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Attach an agent only when one is known.
    pub fn for_agent_opt(mut self, agent_id: Option<&str>) -> Self {
        self.agent_id = agent_id.map(str::to_string);
        self
    }

    /// Attach kind-specific details.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Who wrote a [`Comment`]. Serialized as a bare string: `"system"`,
/// `"human"`, or the agent id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CommentAuthor {
    /// The orchestrator.
    System,
    /// A person, through the API or CLI.
    Human,
    /// An agent, by id.
    Agent(String),
}

impl From<String> for CommentAuthor {
    fn from(value: String) -> Self {
        match value.as_str() {
            "system" => CommentAuthor::System,
            "human" => CommentAuthor::Human,
            _ => CommentAuthor::Agent(value),
        }
    }
}

impl From<CommentAuthor> for String {
    fn from(value: CommentAuthor) -> Self {
        match value {
            CommentAuthor::System => "system".to_string(),
            CommentAuthor::Human => "human".to_string(),
            CommentAuthor::Agent(id) => id,
        }
    }
}

impl std::fmt::Display for CommentAuthor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommentAuthor::System => write!(f, "system"),
            CommentAuthor::Human => write!(f, "human"),
            CommentAuthor::Agent(id) => write!(f, "{id}"),
        }
    }
}

/// Immutable free-text note on a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    /// Unique comment id.
    pub id: Uuid,
    /// Task the comment is attached to.
    pub task_id: Uuid,
    /// Who wrote it.
    pub author: CommentAuthor,
    /// Comment text.
    pub body: String,
    /// When it was written.
    pub created_at: DateTime<Utc>,
}

impl Comment {
    /// A new comment stamped now.
    pub fn new(task_id: Uuid, author: CommentAuthor, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            author,
            body: body.into(),
            created_at: Utc::now(),
        }
    }

    /// Comment written by the orchestrator itself.
    pub fn system(task_id: Uuid, body: impl Into<String>) -> Self {
        Self::new(task_id, CommentAuthor::System, body)
    }

    /// Comment written by a person.
    pub fn human(task_id: Uuid, body: impl Into<String>) -> Self {
        Self::new(task_id, CommentAuthor::Human, body)
    }

    /// Comment written by an agent, usually its reply to a message.
    pub fn agent(task_id: Uuid, agent_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(task_id, CommentAuthor::Agent(agent_id.into()), body)
    }
}
