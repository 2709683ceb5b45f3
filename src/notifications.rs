//! In-memory notifications with broadcast fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::NotificationConfig;

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Default page size for `list`.
pub const DEFAULT_LIST_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewLead,
    ExistingLead,
    EmailSent,
    HighPriority,
    Error,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 5] = [
        NotificationKind::NewLead,
        NotificationKind::ExistingLead,
        NotificationKind::EmailSent,
        NotificationKind::HighPriority,
        NotificationKind::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::NewLead => "new_lead",
            NotificationKind::ExistingLead => "existing_lead",
            NotificationKind::EmailSent => "email_sent",
            NotificationKind::HighPriority => "high_priority",
            NotificationKind::Error => "error",
        }
    }
}

impl std::str::FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NotificationKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown notification type: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub priority: Priority,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
    pub data: serde_json::Value,
}

/// Holds notifications and fans them out to subscribers.
pub struct NotificationCenter {
    items: RwLock<Vec<Notification>>,
    subscribers: HashMap<NotificationKind, Vec<String>>,
    tx: broadcast::Sender<Notification>,
}

impl NotificationCenter {
    pub fn new(config: &NotificationConfig) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Arc::new(Self {
            items: RwLock::new(Vec::new()),
            subscribers: config.subscribers.clone(),
            tx,
        })
    }

    /// Subscribe to notifications as they are created.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// Record and broadcast a notification.
    pub async fn notify(
        &self,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
        priority: Priority,
        data: serde_json::Value,
    ) -> Notification {
        let notification = Notification {
            id: Uuid::new_v4(),
            kind,
            title: title.into(),
            message: message.into(),
            priority,
            timestamp: Utc::now(),
            read: false,
            data,
        };

        let recipients = self.subscribers.get(&kind).map(Vec::as_slice).unwrap_or(&[]);
        info!(
            id = %notification.id,
            kind = kind.as_str(),
            recipients = ?recipients,
            "{}",
            notification.title
        );

        self.items.write().await.push(notification.clone());
        // Ok if nobody is listening.
        let _ = self.tx.send(notification.clone());
        notification
    }

    pub async fn notify_new_lead(&self, name: &str, email: &str, intent: &str) -> Notification {
        self.notify(
            NotificationKind::NewLead,
            "New Lead Received",
            format!("New lead from {name} ({email}) with intent: {intent}"),
            Priority::High,
            serde_json::json!({ "name": name, "email": email, "intent": intent }),
        )
        .await
    }

    pub async fn notify_existing_lead(&self, name: &str, email: &str, intent: &str) -> Notification {
        self.notify(
            NotificationKind::ExistingLead,
            "Existing Customer Contact",
            format!("Existing customer {name} ({email}) contacted with intent: {intent}"),
            Priority::Medium,
            serde_json::json!({ "name": name, "email": email, "intent": intent }),
        )
        .await
    }

    pub async fn notify_email_sent(&self, to: &str, subject: &str, message_id: Option<&str>) -> Notification {
        self.notify(
            NotificationKind::EmailSent,
            "Email Sent",
            format!("Reply sent to {to}: {subject}"),
            Priority::Low,
            serde_json::json!({ "to": to, "subject": subject, "message_id": message_id }),
        )
        .await
    }

    pub async fn notify_error(&self, operation: &str, error: &str) -> Notification {
        self.notify(
            NotificationKind::Error,
            "Processing Error",
            format!("{operation} failed: {error}"),
            Priority::High,
            serde_json::json!({ "operation": operation, "error": error }),
        )
        .await
    }

    /// Newest first, optionally filtered.
    pub async fn list(&self, kind: Option<NotificationKind>, unread_only: bool, limit: usize) -> Vec<Notification> {
        let items = self.items.read().await;
        items
            .iter()
            .rev()
            .filter(|n| kind.is_none_or(|k| n.kind == k))
            .filter(|n| !unread_only || !n.read)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns false when no notification has this id.
    pub async fn mark_read(&self, id: Uuid) -> bool {
        let mut items = self.items.write().await;
        match items.iter_mut().find(|n| n.id == id) {
            Some(n) => {
                n.read = true;
                true
            }
            None => false,
        }
    }

    pub async fn unread_count(&self) -> usize {
        self.items.read().await.iter().filter(|n| !n.read).count()
    }

    /// Drop notifications older than `days`. Returns how many were removed.
    pub async fn cleanup_older_than(&self, days: i64) -> usize {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let mut items = self.items.write().await;
        let before = items.len();
        items.retain(|n| n.timestamp >= cutoff);
        let removed = before - items.len();
        if removed > 0 {
            debug!(removed, "Cleaned up old notifications");
        }
        removed
    }
}

/// Spawn a daily sweep that drops notifications older than `retain_days`.
pub fn spawn_cleanup_task(center: Arc<NotificationCenter>, retain_days: i64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(24 * 60 * 60));
        loop {
            interval.tick().await;
            center.cleanup_older_than(retain_days).await;
        }
    })
}
