use std::sync::{Mutex, MutexGuard};

use mindhaven_common::{Error, NotificationId, Result};
use mindhaven_realtime::Notification;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

/// Marker the backend puts in appointment reminders that carry a call link.
const CALL_MARKER: &str = "Join here:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    General,
    VideoCall,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredNotification {
    #[serde(flatten)]
    pub notification: Notification,
    pub kind: NotificationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_link: Option<String>,
}

impl StoredNotification {
    pub fn classify(notification: Notification) -> Self {
        let (kind, call_link) = if notification.content.contains(CALL_MARKER) {
            (
                NotificationKind::VideoCall,
                extract_call_link(&notification.content),
            )
        } else {
            (NotificationKind::General, None)
        };
        Self {
            notification,
            kind,
            call_link,
        }
    }

    pub fn id(&self) -> &NotificationId {
        &self.notification.id
    }
}

/// The link starts at the first `http` and runs to the next space or the end.
fn extract_call_link(content: &str) -> Option<String> {
    let start = content.find("http")?;
    let rest = &content[start..];
    let end = rest.find(' ').unwrap_or(rest.len());
    Some(rest[..end].to_string())
}

/// Unread notifications, newest first.
#[derive(Debug, Default)]
pub struct NotificationStore {
    items: Mutex<Vec<StoredNotification>>,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> Result<MutexGuard<'_, Vec<StoredNotification>>> {
        self.items
            .lock()
            .map_err(|_| Error::Store("notification store lock poisoned".into()))
    }

    pub fn add(&self, notification: Notification) -> Result<StoredNotification> {
        let stored = StoredNotification::classify(notification);
        self.items()?.insert(0, stored.clone());
        Ok(stored)
    }

    /// Replaces everything with a freshly loaded list, keeping its order.
    pub fn replace_all(&self, notifications: Vec<Notification>) -> Result<()> {
        *self.items()? = notifications
            .into_iter()
            .map(StoredNotification::classify)
            .collect();
        Ok(())
    }

    /// Merges `fields` into the notification with `id`. Returns false when no
    /// such notification exists.
    pub fn update(&self, id: &NotificationId, fields: Map<String, Value>) -> Result<bool> {
        let mut items = self.items()?;
        let Some(stored) = items.iter_mut().find(|n| n.id() == id) else {
            debug!(notification_id = %id, "stores: update for unknown notification");
            return Ok(false);
        };

        let Value::Object(mut merged) = serde_json::to_value(&stored.notification)? else {
            return Err(Error::Store("notification did not serialize to an object".into()));
        };
        merged.extend(fields);
        let mut notification: Notification = serde_json::from_value(Value::Object(merged))?;
        // The id is the lookup key and never changes.
        notification.id = id.clone();
        *stored = StoredNotification::classify(notification);
        Ok(true)
    }

    /// Marking a notification read removes it.
    pub fn mark_read(&self, id: &NotificationId) -> Result<bool> {
        let mut items = self.items()?;
        let before = items.len();
        items.retain(|n| n.id() != id);
        Ok(items.len() != before)
    }

    pub fn clear(&self) -> Result<()> {
        self.items()?.clear();
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<StoredNotification>> {
        Ok(self.items()?.clone())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.items()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.items()?.is_empty())
    }
}
