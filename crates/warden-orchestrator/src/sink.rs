//! Append-only audit trail with live broadcast.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;
use warden_core::{Comment, Event, EventKind, WardenError, WardenResult};

/// One entry of the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SinkRecord {
    /// A typed event.
    Event(Event),
    /// A free-text comment.
    Comment(Comment),
}

impl SinkRecord {
    /// Task the record belongs to, if any.
    pub fn task_id(&self) -> Option<Uuid> {
        match self {
            SinkRecord::Event(e) => e.task_id,
            SinkRecord::Comment(c) => Some(c.task_id),
        }
    }
}

/// Destination for audit events and comments.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Append and broadcast an event.
    async fn record_event(&self, event: Event) -> WardenResult<()>;
    /// Append and broadcast a comment.
    async fn record_comment(&self, comment: Comment) -> WardenResult<()>;
}

/// In-memory audit trail. Keeps every record in arrival order and forwards
/// each one to live subscribers.
pub struct MemoryEventSink {
    records: RwLock<Vec<SinkRecord>>,
    tx: broadcast::Sender<SinkRecord>,
}

impl MemoryEventSink {
    /// Sink whose broadcast channel buffers `capacity` records.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            records: RwLock::new(Vec::new()),
            tx,
        }
    }

    /// Live feed of new records.
    pub fn subscribe(&self) -> broadcast::Receiver<SinkRecord> {
        self.tx.subscribe()
    }

    /// Every record, in arrival order.
    pub async fn records(&self) -> Vec<SinkRecord> {
        self.records.read().await.clone()
    }

    /// Every event, in arrival order.
    pub async fn events(&self) -> Vec<Event> {
        self.records
            .read()
            .await
            .iter()
            .filter_map(|r| match r {
                SinkRecord::Event(e) => Some(e.clone()),
                SinkRecord::Comment(_) => None,
            })
            .collect()
    }

    /// Events scoped to `task_id`.
    pub async fn events_for(&self, task_id: Uuid) -> Vec<Event> {
        self.events()
            .await
            .into_iter()
            .filter(|e| e.task_id == Some(task_id))
            .collect()
    }

    /// Events of one kind, any task.
    pub async fn events_of(&self, kind: EventKind) -> Vec<Event> {
        self.events()
            .await
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect()
    }

    /// Comments on `task_id`, oldest first.
    pub async fn comments_for(&self, task_id: Uuid) -> Vec<Comment> {
        self.records
            .read()
            .await
            .iter()
            .filter_map(|r| match r {
                SinkRecord::Comment(c) if c.task_id == task_id => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    async fn push(&self, record: SinkRecord) {
        self.records.write().await.push(record.clone());
        // No subscribers is not an error.
        let _ = self.tx.send(record);
    }
}

impl Default for MemoryEventSink {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn record_event(&self, event: Event) -> WardenResult<()> {
        self.push(SinkRecord::Event(event)).await;
        Ok(())
    }

    async fn record_comment(&self, comment: Comment) -> WardenResult<()> {
        self.push(SinkRecord::Comment(comment)).await;
        Ok(())
    }
}

/// Audit trail persisted as JSON lines in `<dir>/events.jsonl`.
pub struct JsonlEventSink {
    path: PathBuf,
    append_lock: Mutex<()>,
    tx: broadcast::Sender<SinkRecord>,
}

impl JsonlEventSink {
    /// Open (or create) `<dir>/events.jsonl`.
    pub async fn new(dir: PathBuf) -> WardenResult<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        let (tx, _) = broadcast::channel(256);
        Ok(Self {
            path: dir.join("events.jsonl"),
            append_lock: Mutex::new(()),
            tx,
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Live feed of new records.
    pub fn subscribe(&self) -> broadcast::Receiver<SinkRecord> {
        self.tx.subscribe()
    }

    /// Read the whole log back. Malformed lines are reported, not skipped.
    pub async fn read_all(&self) -> WardenResult<Vec<SinkRecord>> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }
        let data = tokio::fs::read_to_string(&self.path).await?;
        data.lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(n, line)| {
                serde_json::from_str(line).map_err(|e| {
                    WardenError::Store(format!(
                        "Malformed record on line {} of '{}': {e}",
                        n + 1,
                        self.path.display()
                    ))
                })
            })
            .collect()
    }

    /// Records that concern one task, in log order.
    pub async fn read_for_task(&self, task_id: Uuid) -> WardenResult<Vec<SinkRecord>> {
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .filter(|r| r.task_id() == Some(task_id))
            .collect())
    }

    async fn append(&self, record: SinkRecord) -> WardenResult<()> {
        let line = format!("{}\n", serde_json::to_string(&record)?);
        {
            let _guard = self.append_lock.lock().await;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await?;
        }
        debug!(path = %self.path.display(), "audit record appended");
        let _ = self.tx.send(record);
        Ok(())
    }
}

#[async_trait]
impl EventSink for JsonlEventSink {
    async fn record_event(&self, event: Event) -> WardenResult<()> {
        self.append(SinkRecord::Event(event)).await
    }

    async fn record_comment(&self, comment: Comment) -> WardenResult<()> {
        self.append(SinkRecord::Comment(comment)).await
    }
}
