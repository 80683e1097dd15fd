use parking_lot::Mutex;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use warden_core::{WardenError, WardenResult};

/// Registry of task executions currently running in this process, keyed by
/// task id. Owned by one orchestrator; never global.
pub struct TaskRuns {
    max_parallel: usize,
    running: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl TaskRuns {
    /// Registry allowing `max_parallel` concurrent executions.
    pub fn new(max_parallel: usize) -> Self {
        Self {
            max_parallel,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Claim an execution slot for `task_id`.
    ///
    /// Starting beyond the cap is rejected, never queued.
    pub fn try_register(&self, task_id: Uuid) -> WardenResult<CancellationToken> {
        let mut running = self.running.lock();
        if running.contains_key(&task_id) {
            return Err(WardenError::Conflict(format!(
                "task {task_id} is already running"
            )));
        }
        if running.len() >= self.max_parallel {
            return Err(WardenError::CapacityExceeded(format!(
                "{} of {} execution slots in use",
                running.len(),
                self.max_parallel
            )));
        }
        let token = CancellationToken::new();
        running.insert(task_id, token.clone());
        Ok(token)
    }

    /// Release the slot after the execution ended on its own.
    pub fn finish(&self, task_id: Uuid) -> bool {
        self.running.lock().remove(&task_id).is_some()
    }

    /// Cancel the execution scope and release the slot.
    pub fn cancel(&self, task_id: Uuid) -> bool {
        match self.running.lock().remove(&task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether `task_id` holds a slot.
    pub fn is_running(&self, task_id: Uuid) -> bool {
        self.running.lock().contains_key(&task_id)
    }

    /// Slots in use.
    pub fn running_count(&self) -> usize {
        self.running.lock().len()
    }

    /// Slot limit.
    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }
}
