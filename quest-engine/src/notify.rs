//! Notification collaborator.
//!
//! Delivery is fire-and-forget: failures and timeouts are logged and never
//! reach the caller.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// A task was assigned
    NewTask {
        assignment_id: String,
        title: String,
    },
    LevelUp {
        level: u32,
    },
}

#[derive(Debug, thiserror::Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: &str, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, user_id: &str, notification: &Notification) -> Result<(), NotifyError> {
        info!(user_id, ?notification, "Notification sent");
        Ok(())
    }
}

/// Deliver a notification, swallowing any failure.
pub async fn send(
    notifier: &Arc<dyn Notifier>,
    user_id: &str,
    notification: Notification,
    timeout: Duration,
) {
    match tokio::time::timeout(timeout, notifier.notify(user_id, &notification)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(user_id, error = %e, "Notification dropped"),
        Err(_) => warn!(user_id, timeout_ms = timeout.as_millis() as u64, "Notification timed out"),
    }
}
