use super::{TaskMutation, TaskStore};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use uuid::Uuid;
use warden_core::{Task, WardenError, WardenResult};

/// File-based task store: one JSON document per task.
///
/// Writes go through a single async mutex and land via write-to-temp plus
/// rename, so a reader never sees a half-written record.
pub struct FileTaskStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileTaskStore {
    /// Open a store rooted at `dir`, creating it if needed.
    pub async fn new(dir: PathBuf) -> WardenResult<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Directory holding the task files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn task_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn read_task(path: &Path) -> WardenResult<Task> {
        let data = tokio::fs::read_to_string(path).await?;
        serde_json::from_str(&data).map_err(|e| {
            WardenError::Store(format!("Failed to parse task '{}': {e}", path.display()))
        })
    }

    async fn write_task(&self, task: &Task) -> WardenResult<()> {
        let path = self.task_path(task.id);
        let tmp = self.dir.join(format!("{}.json.tmp", task.id));
        let json = serde_json::to_string_pretty(task)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn insert(&self, task: &Task) -> WardenResult<()> {
        let _guard = self.write_lock.lock().await;
        if tokio::fs::try_exists(self.task_path(task.id)).await? {
            return Err(WardenError::Conflict(format!("task {} already exists", task.id)));
        }
        self.write_task(task).await
    }

    async fn get(&self, id: Uuid) -> WardenResult<Option<Task>> {
        let path = self.task_path(id);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }
        Self::read_task(&path).await.map(Some)
    }

    async fn list(&self) -> WardenResult<Vec<Task>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut tasks = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let is_task = entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_suffix(".json"))
                .is_some_and(|stem| Uuid::parse_str(stem).is_ok());
            if !is_task {
                continue;
            }
            match Self::read_task(&entry.path()).await {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "Skipping unreadable task file");
                }
            }
        }
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn modify(&self, id: Uuid, mutation: TaskMutation) -> WardenResult<Task> {
        let _guard = self.write_lock.lock().await;
        let mut task = self
            .get(id)
            .await?
            .ok_or_else(|| WardenError::task_not_found(id))?;
        mutation(&mut task);
        self.write_task(&task).await?;
        Ok(task)
    }
}
