//! Notification service trait and in-memory implementation.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::OrderId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned by the notification service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Notification failed: {0}")]
pub struct NotificationError(pub String);

/// What happened to the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationKind {
    OrderPaid,
    OrderCancelled { reason: String },
}

/// A customer-facing order notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub order_id: OrderId,
    pub order_number: String,
    pub customer_email: String,
    pub kind: NotificationKind,
}

/// Best-effort delivery of order notifications (email, etc).
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), NotificationError>;
}

#[derive(Debug, Default)]
struct InMemoryNotificationState {
    sent: Vec<Notification>,
    fail_on_notify: bool,
}

/// In-memory notification service that records what was sent.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotificationService {
    state: Arc<RwLock<InMemoryNotificationState>>,
}

impl InMemoryNotificationService {
    /// Creates a new in-memory notification service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures every send to fail.
    pub fn set_fail_on_notify(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .fail_on_notify = fail;
    }

    /// Returns the notifications sent so far.
    pub fn sent(&self) -> Vec<Notification> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .sent
            .clone()
    }
}

#[async_trait]
impl NotificationService for InMemoryNotificationService {
    async fn notify(&self, notification: Notification) -> Result<(), NotificationError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if state.fail_on_notify {
            return Err(NotificationError("mail relay unreachable".to_string()));
        }
        state.sent.push(notification);
        Ok(())
    }
}
