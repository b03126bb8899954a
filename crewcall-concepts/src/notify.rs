//! Notify: per-user notifications

use crate::error::{ConceptError, Result};
use crate::storage::{fresh_id, Collection, Versioned};
use crate::wire::{parse, rows};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crewcall_sync::{Completion, Concept};
use crewcall_types::{fields, Fields, Value};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(rename = "_id")]
    pub id: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub unread: bool,
}

/// Confirms a recipient is a known user. Without one, any id is accepted.
#[async_trait]
pub trait UserExistenceGuard: Send + Sync {
    async fn user_exists(&self, user: &str) -> bool;
}

#[derive(Debug, Clone, Deserialize)]
pub struct Notify {
    pub recipient: String,
    #[serde(default)]
    pub subject: Value,
    #[serde(default)]
    pub body: Value,
}

/// Arguments for `markRead` and `deleteNotification`
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationUser {
    pub notification: String,
    pub user: String,
}

#[derive(Deserialize)]
struct ByNotification {
    notification: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListUser {
    user: String,
    #[serde(default)]
    only_unread: bool,
}

const ACTIONS: &[&str] = &["notify", "markRead", "deleteNotification"];
const QUERIES: &[&str] = &["_getNotification", "_listUserNotifications"];

pub struct NotifyConcept {
    notifications: Collection<Notification>,
    guard: Option<Arc<dyn UserExistenceGuard>>,
}

impl Default for NotifyConcept {
    fn default() -> Self {
        Self::new()
    }
}

fn non_empty(value: &Value, field: &str) -> Result<String> {
    match value.as_str().map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(ConceptError::validation(format!(
            "{field} must be a non-empty string"
        ))),
    }
}

impl NotifyConcept {
    pub fn new() -> Self {
        Self {
            notifications: Collection::new("notifications"),
            guard: None,
        }
    }

    pub fn with_guard(guard: Arc<dyn UserExistenceGuard>) -> Self {
        Self {
            notifications: Collection::new("notifications"),
            guard: Some(guard),
        }
    }

    fn require_notification(&self, notification: &str) -> Result<Versioned<Notification>> {
        self.notifications.get(notification).ok_or_else(|| {
            ConceptError::NotFound(format!("Notification {notification} not found"))
        })
    }

    pub async fn notify(&self, args: Notify) -> Result<String> {
        let subject = non_empty(&args.subject, "subject")?;
        let body = non_empty(&args.body, "body")?;
        if let Some(guard) = &self.guard {
            if !guard.user_exists(&args.recipient).await {
                return Err(ConceptError::validation(format!(
                    "Recipient {} is not a valid user",
                    args.recipient
                )));
            }
        }

        let id = fresh_id();
        self.notifications.insert(
            &id,
            Notification {
                id: id.clone(),
                recipient: args.recipient,
                subject,
                body,
                created_at: Utc::now(),
                unread: true,
            },
        )?;
        Ok(id)
    }

    /// Marking an already-read notification is a no-op
    pub fn mark_read(&self, args: NotificationUser) -> Result<()> {
        let current = self.require_notification(&args.notification)?;
        if current.doc.recipient != args.user {
            return Err(ConceptError::forbidden(
                "Users may only modify their own notifications",
            ));
        }
        if !current.doc.unread {
            return Ok(());
        }
        self.notifications
            .update_if(&args.notification, current.version, |n| n.unread = false)?;
        Ok(())
    }

    pub fn delete_notification(&self, args: NotificationUser) -> Result<()> {
        let current = self.require_notification(&args.notification)?;
        if current.doc.recipient != args.user {
            return Err(ConceptError::forbidden(
                "Users may only delete their own notifications",
            ));
        }
        self.notifications
            .delete_if(&args.notification, current.version)?;
        Ok(())
    }

    pub fn get_notification(&self, notification: &str) -> Option<Notification> {
        self.notifications.get(notification).map(|v| v.doc)
    }

    /// Newest first
    pub fn user_notifications(&self, user: &str, only_unread: bool) -> Vec<Notification> {
        let mut found = self
            .notifications
            .find(|n| n.recipient == user && (!only_unread || n.unread));
        found.reverse();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        found
    }

    async fn run(&self, action: &str, input: &Fields) -> Result<Fields> {
        match action {
            "notify" => {
                let notification = self.notify(parse(input)?).await?;
                Ok(fields! { "notification" => notification })
            }
            "markRead" => self.mark_read(parse(input)?).map(|_| Fields::new()),
            "deleteNotification" => self.delete_notification(parse(input)?).map(|_| Fields::new()),
            other => Err(ConceptError::validation(format!("Unknown action Notify.{other}"))),
        }
    }

    fn lookup(&self, query: &str, input: &Fields) -> Result<Vec<Fields>> {
        match query {
            "_getNotification" => {
                let ByNotification { notification } = parse(input)?;
                Ok(rows(self.get_notification(&notification).iter()))
            }
            "_listUserNotifications" => {
                let ListUser { user, only_unread } = parse(input)?;
                Ok(rows(&self.user_notifications(&user, only_unread)))
            }
            other => Err(ConceptError::validation(format!("Unknown query Notify.{other}"))),
        }
    }
}

#[async_trait]
impl Concept for NotifyConcept {
    fn name(&self) -> &str {
        "Notify"
    }

    fn actions(&self) -> &[&'static str] {
        ACTIONS
    }

    fn queries(&self) -> &[&'static str] {
        QUERIES
    }

    async fn invoke(&self, action: &str, input: &Fields) -> Completion {
        self.run(action, input).await.into()
    }

    async fn query(&self, query: &str, input: &Fields) -> std::result::Result<Vec<Fields>, String> {
        self.lookup(query, input).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Known(&'static [&'static str]);

    #[async_trait]
    impl UserExistenceGuard for Known {
        async fn user_exists(&self, user: &str) -> bool {
            self.0.contains(&user)
        }
    }

    fn message(recipient: &str, subject: Value) -> Notify {
        Notify {
            recipient: recipient.into(),
            subject,
            body: json!("  Bring the banner  "),
        }
    }

    #[tokio::test]
    async fn notify_trims_and_validates() {
        let notify = NotifyConcept::new();
        let id = notify.notify(message("bob", json!(" Setup "))).await.unwrap();
        let stored = notify.get_notification(&id).unwrap();
        assert_eq!(stored.subject, "Setup");
        assert_eq!(stored.body, "Bring the banner");
        assert!(stored.unread);

        let err = notify.notify(message("bob", json!("   "))).await.unwrap_err();
        assert_eq!(err.to_string(), "subject must be a non-empty string");
        let err = notify.notify(message("bob", json!(7))).await.unwrap_err();
        assert_eq!(err.to_string(), "subject must be a non-empty string");
    }

    #[tokio::test]
    async fn guard_rejects_unknown_recipients() {
        let notify = NotifyConcept::with_guard(Arc::new(Known(&["bob"])));
        assert!(notify.notify(message("bob", json!("Hi"))).await.is_ok());
        let err = notify.notify(message("mallory", json!("Hi"))).await.unwrap_err();
        assert_eq!(err.to_string(), "Recipient mallory is not a valid user");
    }

    #[tokio::test]
    async fn only_the_recipient_may_read_or_delete() {
        let notify = NotifyConcept::new();
        let id = notify.notify(message("bob", json!("Hi"))).await.unwrap();
        let as_user = |user: &str| NotificationUser {
            notification: id.clone(),
            user: user.into(),
        };

        let err = notify.mark_read(as_user("carol")).unwrap_err();
        assert_eq!(err.to_string(), "Users may only modify their own notifications");

        notify.mark_read(as_user("bob")).unwrap();
        notify.mark_read(as_user("bob")).unwrap();
        assert!(notify.user_notifications("bob", true).is_empty());
        assert_eq!(notify.user_notifications("bob", false).len(), 1);

        let err = notify.delete_notification(as_user("carol")).unwrap_err();
        assert_eq!(err.to_string(), "Users may only delete their own notifications");
        notify.delete_notification(as_user("bob")).unwrap();
        let err = notify.delete_notification(as_user("bob")).unwrap_err();
        assert_eq!(err.to_string(), format!("Notification {id} not found"));
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let notify = NotifyConcept::new();
        let first = notify.notify(message("bob", json!("First"))).await.unwrap();
        let second = notify.notify(message("bob", json!("Second"))).await.unwrap();
        let listed: Vec<_> = notify
            .user_notifications("bob", false)
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(listed, vec![second, first]);
    }
}
