//! Task orchestration and delegation engine.
//!
//! Assigns tasks to worker agents, queues work for busy agents, recovers
//! tasks whose agent stopped responding, and reports finished sub-tasks
//! back to the agent that delegated them.
//!
//! # Main types
//!
//! - [`Orchestrator`]: State machine entry point and owner of every collaborator.
//! - [`QueueProcessor`]: Periodic dispatch of scheduled, retry-due and queued work.
//! - [`Watchdog`]: Periodic re-notification or reset of stalled tasks.
//! - [`TaskStore`]: Persistence boundary, with [`MemoryTaskStore`] and [`FileTaskStore`].
//! - [`AgentNotifier`]: Agent messaging boundary; [`RetryingNotifier`] adds backoff.
//! - [`EventSink`]: Audit trail, with [`MemoryEventSink`] and [`JsonlEventSink`].
//! - [`Outbox`]: Tracker for background notifications.

/// Orchestrator and sweep configuration.
pub mod config;
/// Sub-task completion reports and the approval gate.
pub mod delegation;
/// Notify-now versus enqueue decision.
pub mod dispatch;
/// The orchestrator and its state machine.
pub mod engine;
/// Message texts sent to agents.
pub mod messages;
/// Telemetry for the background loops.
pub mod monitor;
/// Agent notifier contract, error classification and retry policy.
pub mod notifier;
/// Background notification tracking.
pub mod outbox;
/// Queue processor loop.
pub mod processor;
/// Per-agent queue view and dequeue.
pub mod queue;
/// Registry of running task executions.
pub mod runs;
/// Event and comment sinks.
pub mod sink;
/// Task persistence.
pub mod store;
/// Stuck-task watchdog loop.
pub mod watchdog;

pub use config::OrchestratorConfig;
pub use dispatch::{decide, DispatchDecision};
pub use engine::{NewTask, Orchestrator, RetryRequest, TaskFilter, TaskUpdate};
pub use monitor::{SweepMonitor, SweepStats};
pub use notifier::{
    classify, compute_backoff, is_retryable, AgentNotifier, RetryPolicy, RetryingNotifier,
    TransientReason,
};
pub use outbox::{NotificationHandle, NotificationKind, NotificationOutcome, Outbox};
pub use processor::{QueueProcessor, SweepReport};
pub use queue::AgentQueue;
pub use runs::TaskRuns;
pub use sink::{EventSink, JsonlEventSink, MemoryEventSink, SinkRecord};
pub use store::{FileTaskStore, MemoryTaskStore, TaskMutation, TaskStore};
pub use watchdog::{ResetReason, StaleAction, Watchdog, WatchdogReport};
