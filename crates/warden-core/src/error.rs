use thiserror::Error;

/// A convenience `Result` alias using [`WardenError`].
pub type WardenResult<T> = Result<T, WardenError>;

/// Top-level error type for the warden crates.
///
/// Delivery failures come in three flavours: [`WardenError::Notifier`] is the
/// raw text an agent notifier reported, which the retry policy later
/// classifies as either [`WardenError::TransientDelivery`] or
/// [`WardenError::FatalDelivery`]. [`WardenError::DeliveryExhausted`] wraps
/// the last failure once every attempt has been spent.
#[derive(Error, Debug)]
pub enum WardenError {
    /// Unknown task, agent or record.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The operation is valid but cannot run in the current state
    /// (agent busy on dequeue, approving a running sub-task, ...).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Caller supplied invalid input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unclassified failure text reported by an agent notifier.
    #[error("Notifier error: {0}")]
    Notifier(String),

    /// Delivery failure that is worth retrying.
    #[error("Transient delivery error: {0}")]
    TransientDelivery(String),

    /// Delivery failure that will not succeed on retry.
    #[error("Fatal delivery error: {0}")]
    FatalDelivery(String),

    /// Every delivery attempt failed.
    #[error("Delivery failed after {attempts} attempts: {last}")]
    DeliveryExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Message of the last failure.
        last: String,
    },

    /// The running-task registry is at its `max_parallel` limit.
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Task store failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration parsing or validation failure.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WardenError {
    /// Shorthand for a [`WardenError::NotFound`] on a task id.
    pub fn task_not_found(id: impl std::fmt::Display) -> Self {
        WardenError::NotFound(format!("task {id}"))
    }

    /// Whether this error is one of the delivery variants.
    pub fn is_delivery(&self) -> bool {
        matches!(
            self,
            WardenError::Notifier(_)
                | WardenError::TransientDelivery(_)
                | WardenError::FatalDelivery(_)
                | WardenError::DeliveryExhausted { .. }
        )
    }
}
