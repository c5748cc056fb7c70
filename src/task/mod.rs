//! Task tracking: the externally observable lifecycle of a run
//!
//! The pipeline talks to a [`TaskBridge`] only. The bundled [`TaskManager`]
//! keeps records in memory, broadcasts [`TaskEvent`]s and owns the
//! cancellation token of every task it creates.

pub mod manager;
pub mod notify;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use manager::TaskManager;
pub use notify::{LogNotifier, Notification, Notifier};

/// Task kind used for speed test runs
pub const SPEEDTEST_TASK_KIND: &str = "speedtest";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

/// What started a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskTrigger {
    #[default]
    Manual,
    Scheduled,
    Api,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub kind: String,
    pub name: String,
    pub trigger: TaskTrigger,
    pub status: TaskStatus,
    pub total: usize,
    pub current: usize,
    pub current_item: Option<String>,
    pub message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Broadcast on every task state change
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    Created {
        task: TaskRecord,
    },
    Progress {
        task_id: String,
        current: usize,
        total: usize,
        item: Option<String>,
        snapshot: Option<serde_json::Value>,
    },
    Finished {
        task: TaskRecord,
    },
}

impl TaskEvent {
    pub fn task_id(&self) -> &str {
        match self {
            TaskEvent::Created { task } | TaskEvent::Finished { task } => &task.id,
            TaskEvent::Progress { task_id, .. } => task_id,
        }
    }
}

/// Progress and cancellation surface used by the pipeline
#[async_trait]
pub trait TaskBridge: Send + Sync {
    async fn create_task(
        &self,
        kind: &str,
        name: &str,
        trigger: TaskTrigger,
        total: usize,
    ) -> Result<(TaskRecord, CancellationToken)>;

    async fn update_total(&self, task_id: &str, total: usize) -> Result<()>;

    async fn update_progress(
        &self,
        task_id: &str,
        current: usize,
        item: &str,
        snapshot: Option<serde_json::Value>,
    ) -> Result<()>;

    async fn complete_task(&self, task_id: &str, message: &str, result: Option<serde_json::Value>) -> Result<()>;

    async fn fail_task(&self, task_id: &str, message: &str) -> Result<()>;
}

/// A run's view of its task; untracked runs report nowhere
#[derive(Clone)]
pub struct ProgressSink {
    tracked: Option<(Arc<dyn TaskBridge>, String)>,
}

impl ProgressSink {
    pub fn tracked(bridge: Arc<dyn TaskBridge>, task_id: impl Into<String>) -> Self {
        Self {
            tracked: Some((bridge, task_id.into())),
        }
    }

    pub fn untracked() -> Self {
        Self { tracked: None }
    }

    pub fn task_id(&self) -> Option<&str> {
        self.tracked.as_ref().map(|(_, id)| id.as_str())
    }

    pub fn is_tracked(&self) -> bool {
        self.tracked.is_some()
    }

    pub async fn update_total(&self, total: usize) -> Result<()> {
        match &self.tracked {
            Some((bridge, id)) => bridge.update_total(id, total).await,
            None => Ok(()),
        }
    }

    pub async fn advance(&self, current: usize, item: &str, snapshot: Option<serde_json::Value>) -> Result<()> {
        match &self.tracked {
            Some((bridge, id)) => bridge.update_progress(id, current, item, snapshot).await,
            None => Ok(()),
        }
    }

    pub async fn complete(&self, message: &str, result: Option<serde_json::Value>) -> Result<()> {
        match &self.tracked {
            Some((bridge, id)) => bridge.complete_task(id, message, result).await,
            None => Ok(()),
        }
    }

    pub async fn fail(&self, message: &str) -> Result<()> {
        match &self.tracked {
            Some((bridge, id)) => bridge.fail_task(id, message).await,
            None => Ok(()),
        }
    }
}
