//! Core types and error definitions for the warden task orchestration crates.
//!
//! # Main types
//!
//! - [`Task`]: A unit of work, its assignment, and its lifecycle timestamps.
//! - [`TaskStatus`]: Workflow status; see [`TaskStatus::is_active`] and
//!   [`TaskStatus::is_terminal`].
//! - [`DelegationMode`]: Whether sub-task completion needs human approval.
//! - [`Event`] / [`EventKind`]: Typed audit records.
//! - [`Comment`] / [`CommentAuthor`]: Free-text audit notes.
//! - [`WardenError`]: Unified error enum; [`WardenResult`] is the alias.

/// Error types.
pub mod error;
/// Audit events and comments.
pub mod event;
/// Task model and status rules.
pub mod task;

pub use error::{WardenError, WardenResult};
pub use event::{Comment, CommentAuthor, Event, EventKind};
pub use task::{
    validate_priority, DelegationMode, Task, TaskStatus, PRIORITY_DEFAULT, PRIORITY_HIGHEST,
    PRIORITY_LOWEST,
};
