//! Completion notifications

use crate::error::Result;
use crate::logging::Logger;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One structured broadcast about a finished task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Event name, e.g. `speedtest.completed`
    pub event: String,
    pub title: String,
    pub message: String,
    pub payload: serde_json::Value,
}

/// Delivers notifications to some transport
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the structured log
pub struct LogNotifier {
    logger: Logger,
}

impl LogNotifier {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        self.logger
            .info(&format!("{}: {}", notification.title, notification.message))
            .field("event", &notification.event)
            .field("payload", &notification.payload)
            .log()
            .await;
        Ok(())
    }
}
