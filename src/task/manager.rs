//! In-memory task manager

use super::{Notification, Notifier, TaskBridge, TaskEvent, TaskRecord, TaskStatus, TaskTrigger};
use crate::error::{AppError, Result};
use crate::logging::Logger;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;

/// Finished tasks kept for inspection before the oldest are evicted
pub const DEFAULT_FINISHED_RETENTION: usize = 500;

struct TaskEntry {
    record: TaskRecord,
    cancel: CancellationToken,
    /// Position in finishing order, set once the task finished
    finished_seq: Option<u64>,
}

/// Tracks tasks, their cancellation tokens and subscribers.
///
/// Construct one per process (or per test) and share it; there is no global
/// instance.
pub struct TaskManager {
    tasks: RwLock<HashMap<String, TaskEntry>>,
    events: broadcast::Sender<TaskEvent>,
    notifier: Option<Arc<dyn Notifier>>,
    logger: Logger,
    retention: usize,
    finished_count: AtomicU64,
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskManager {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            tasks: RwLock::new(HashMap::new()),
            events,
            notifier: None,
            logger: Logger::new("TASK".to_string()),
            retention: DEFAULT_FINISHED_RETENTION,
            finished_count: AtomicU64::new(0),
        }
    }

    /// Keep at most `retention` finished tasks; running tasks are never evicted
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    pub async fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.tasks.read().await.get(task_id).map(|e| e.record.clone())
    }

    /// All tasks, oldest first
    pub async fn list(&self) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self.tasks.read().await.values().map(|e| e.record.clone()).collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    /// Signal cancellation. Returns `false` when the task already finished.
    pub async fn cancel(&self, task_id: &str) -> Result<bool> {
        let tasks = self.tasks.read().await;
        let entry = tasks
            .get(task_id)
            .ok_or_else(|| AppError::task_tracking(format!("Task {} not found", task_id)))?;
        if entry.record.status.is_finished() {
            return Ok(false);
        }
        entry.cancel.cancel();
        Ok(true)
    }

    /// Cancel every running task; returns how many were signalled
    pub async fn cancel_running(&self) -> usize {
        let tasks = self.tasks.read().await;
        let mut count = 0;
        for entry in tasks.values().filter(|e| !e.record.status.is_finished()) {
            entry.cancel.cancel();
            count += 1;
        }
        count
    }

    /// Drop all but the `keep` most recently finished tasks. Returns how many
    /// were removed.
    pub async fn prune_finished(&self, keep: usize) -> usize {
        evict_finished(&mut *self.tasks.write().await, keep)
    }

    fn emit(&self, event: TaskEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn finish(&self, task_id: &str, status: Option<TaskStatus>, message: &str, result: Option<serde_json::Value>) -> Result<TaskRecord> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| AppError::task_tracking(format!("Task {} not found", task_id)))?;
        if entry.record.status.is_finished() {
            return Err(AppError::task_tracking(format!(
                "Task {} already finished as {:?}",
                task_id, entry.record.status
            )));
        }

        let status = status.unwrap_or(if entry.cancel.is_cancelled() {
            TaskStatus::Cancelled
        } else {
            TaskStatus::Completed
        });
        let now = Utc::now();
        entry.record.status = status;
        entry.record.message = Some(message.to_string());
        entry.record.result = result;
        entry.record.updated_at = now;
        entry.record.finished_at = Some(now);
        entry.finished_seq = Some(self.finished_count.fetch_add(1, Ordering::Relaxed));
        let record = entry.record.clone();
        let evicted = evict_finished(&mut tasks, self.retention);
        drop(tasks);

        if evicted > 0 {
            self.logger
                .debug(&format!("Evicted {} finished tasks", evicted))
                .field("retention", self.retention)
                .log()
                .await;
        }

        self.emit(TaskEvent::Finished { task: record.clone() });
        Ok(record)
    }

    async fn broadcast_notification(&self, record: &TaskRecord) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let suffix = match record.status {
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Failed => "failed",
            TaskStatus::Running => return,
        };
        let notification = Notification {
            event: format!("{}.{}", record.kind, suffix),
            title: format!("{} {}", record.name, suffix),
            message: record.message.clone().unwrap_or_default(),
            payload: record.result.clone().unwrap_or(serde_json::Value::Null),
        };
        if let Err(e) = notifier.notify(&notification).await {
            self.logger
                .warn(&format!("Notification for task {} failed: {}", record.id, e))
                .error_info(&e)
                .log()
                .await;
        }
    }
}

fn evict_finished(tasks: &mut HashMap<String, TaskEntry>, keep: usize) -> usize {
    let mut finished: Vec<(u64, String)> = tasks
        .values()
        .filter_map(|e| e.finished_seq.map(|seq| (seq, e.record.id.clone())))
        .collect();
    if finished.len() <= keep {
        return 0;
    }
    finished.sort();
    let excess = finished.len() - keep;
    for (_, id) in finished.into_iter().take(excess) {
        tasks.remove(&id);
    }
    excess
}

#[async_trait]
impl TaskBridge for TaskManager {
    async fn create_task(
        &self,
        kind: &str,
        name: &str,
        trigger: TaskTrigger,
        total: usize,
    ) -> Result<(TaskRecord, CancellationToken)> {
        let now = Utc::now();
        let record = TaskRecord {
            id: Uuid::new_v4().to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            trigger,
            status: TaskStatus::Running,
            total,
            current: 0,
            current_item: None,
            message: None,
            result: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        };
        let cancel = CancellationToken::new();

        self.tasks.write().await.insert(
            record.id.clone(),
            TaskEntry {
                record: record.clone(),
                cancel: cancel.clone(),
                finished_seq: None,
            },
        );
        self.emit(TaskEvent::Created { task: record.clone() });
        Ok((record, cancel))
    }

    async fn update_total(&self, task_id: &str, total: usize) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| AppError::task_tracking(format!("Task {} not found", task_id)))?;
        entry.record.total = total;
        entry.record.updated_at = Utc::now();
        Ok(())
    }

    async fn update_progress(
        &self,
        task_id: &str,
        current: usize,
        item: &str,
        snapshot: Option<serde_json::Value>,
    ) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| AppError::task_tracking(format!("Task {} not found", task_id)))?;
        if entry.record.status.is_finished() {
            return Ok(());
        }
        // Completions race; never move the counter backwards
        entry.record.current = entry.record.current.max(current);
        entry.record.current_item = Some(item.to_string());
        entry.record.updated_at = Utc::now();
        let event = TaskEvent::Progress {
            task_id: task_id.to_string(),
            current: entry.record.current,
            total: entry.record.total,
            item: entry.record.current_item.clone(),
            snapshot,
        };
        drop(tasks);

        self.emit(event);
        Ok(())
    }

    async fn complete_task(&self, task_id: &str, message: &str, result: Option<serde_json::Value>) -> Result<()> {
        let record = self.finish(task_id, None, message, result).await?;
        self.broadcast_notification(&record).await;
        Ok(())
    }

    async fn fail_task(&self, task_id: &str, message: &str) -> Result<()> {
        let result = serde_json::json!({ "error": message });
        let record = self.finish(task_id, Some(TaskStatus::Failed), message, Some(result)).await?;
        self.broadcast_notification(&record).await;
        Ok(())
    }
}
