//! Notification center.
//!
//! Notifications live in a bounded ring buffer, newest first. Persistence and
//! email mirroring run as detached tasks: callers never wait on them and never
//! see their failures. Store writes go through one queue and are applied in
//! the order they were issued, so a read mark never overtakes its insert.
//! A failed mirror turns into a `system` notification flagged to skip
//! mirroring, so the failure is visible without looping.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::mail::Mailer;
use crate::db::{NotificationRepository, UserRepository};
use crate::errors::{AppError, AppResult};
use crate::models::{NotificationType, Recipients, ServerNotification, SKIP_EMAIL_MIRROR};

pub const DEFAULT_CAPACITY: usize = 500;

enum StoreWrite {
    Insert(ServerNotification),
    MarkRead { ids: Vec<String>, user_id: String },
}

/// Applies store writes one at a time until every sender is gone.
async fn run_store_writer(
    store: Arc<dyn NotificationRepository>,
    mut writes: mpsc::UnboundedReceiver<StoreWrite>,
) {
    while let Some(write) = writes.recv().await {
        match write {
            StoreWrite::Insert(notification) => {
                if let Err(e) = store.insert(&notification).await {
                    tracing::warn!("Failed to persist notification {}: {}", notification.id, e);
                }
            }
            StoreWrite::MarkRead { ids, user_id } => {
                for id in ids {
                    if let Err(e) = store.mark_read(&id, &user_id).await {
                        tracing::warn!("Failed to persist read state of {}: {}", id, e);
                    }
                }
            }
        }
    }
}

struct Inner {
    buffer: Mutex<VecDeque<ServerNotification>>,
    capacity: usize,
    mail_mirror: bool,
    store: Arc<dyn NotificationRepository>,
    writes: mpsc::UnboundedSender<StoreWrite>,
    users: Arc<dyn UserRepository>,
    mailer: Arc<dyn Mailer>,
}

#[derive(Clone)]
pub struct NotificationCenter {
    inner: Arc<Inner>,
}

impl NotificationCenter {
    /// Must be called inside a Tokio runtime: the store writer is spawned here.
    pub fn new(
        store: Arc<dyn NotificationRepository>,
        users: Arc<dyn UserRepository>,
        mailer: Arc<dyn Mailer>,
        capacity: usize,
        mail_mirror: bool,
    ) -> Self {
        let (writes, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_store_writer(store.clone(), receiver));
        Self {
            inner: Arc::new(Inner {
                buffer: Mutex::new(VecDeque::new()),
                capacity: capacity.max(1),
                mail_mirror,
                store,
                writes,
                users,
                mailer,
            }),
        }
    }

    fn buffer(&self) -> MutexGuard<'_, VecDeque<ServerNotification>> {
        self.inner
            .buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Notify every user.
    pub fn broadcast(
        &self,
        kind: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> ServerNotification {
        self.publish(Recipients::All, kind, title.into(), message.into(), data)
    }

    /// Notify an explicit set of users.
    pub fn notify_users(
        &self,
        user_ids: Vec<String>,
        kind: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> ServerNotification {
        self.publish(
            Recipients::Users(user_ids),
            kind,
            title.into(),
            message.into(),
            data,
        )
    }

    fn publish(
        &self,
        recipients: Recipients,
        kind: NotificationType,
        title: String,
        message: String,
        data: Option<Value>,
    ) -> ServerNotification {
        let notification = ServerNotification {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            title,
            message,
            data,
            recipients,
            read_by: BTreeSet::new(),
            created_at: Utc::now(),
        };

        {
            let mut buffer = self.buffer();
            buffer.push_front(notification.clone());
            buffer.truncate(self.inner.capacity);
        }

        self.queue_write(StoreWrite::Insert(notification.clone()));
        if self.inner.mail_mirror && !notification.skips_email_mirror() {
            self.spawn_mirror(notification.clone());
        }

        notification
    }

    fn queue_write(&self, write: StoreWrite) {
        if self.inner.writes.send(write).is_err() {
            tracing::warn!("Notification store writer has stopped; write dropped");
        }
    }

    fn spawn_mirror(&self, notification: ServerNotification) {
        let center = self.clone();
        tokio::spawn(async move {
            if let Err(e) = center.mirror(&notification).await {
                tracing::warn!("Email mirror failed for notification {}: {}", notification.id, e);
                center.publish(
                    Recipients::All,
                    NotificationType::System,
                    "Email delivery failed".to_string(),
                    format!(
                        "The email copy of \"{}\" could not be sent: {}",
                        notification.title,
                        e.message()
                    ),
                    Some(json!({
                        SKIP_EMAIL_MIRROR: true,
                        "failedNotificationId": notification.id,
                    })),
                );
            }
        });
    }

    async fn mirror(&self, notification: &ServerNotification) -> AppResult<()> {
        let emails = self.recipient_emails(&notification.recipients).await?;
        if emails.is_empty() {
            tracing::debug!("No email recipients for notification {}", notification.id);
            return Ok(());
        }
        self.inner
            .mailer
            .enqueue(
                &emails,
                &notification.title,
                &notification.message,
                notification.kind,
            )
            .await
    }

    async fn recipient_emails(&self, recipients: &Recipients) -> AppResult<Vec<String>> {
        let users = match recipients {
            Recipients::All => self.inner.users.find_all().await?,
            Recipients::Users(ids) => {
                let mut users = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(user) = self.inner.users.find_by_id(id).await? {
                        users.push(user);
                    }
                }
                users
            }
        };
        Ok(users.into_iter().filter_map(|u| u.email).collect())
    }

    /// Notifications addressed to `user_id`, newest first.
    pub fn list_for_user(&self, user_id: &str) -> Vec<ServerNotification> {
        self.buffer()
            .iter()
            .filter(|n| n.recipients.includes(user_id))
            .cloned()
            .collect()
    }

    pub fn unread_count(&self, user_id: &str) -> usize {
        self.buffer()
            .iter()
            .filter(|n| n.recipients.includes(user_id) && !n.is_read_by(user_id))
            .count()
    }

    pub fn mark_read(&self, id: &str, user_id: &str) -> AppResult<()> {
        {
            let mut buffer = self.buffer();
            let notification = buffer
                .iter_mut()
                .find(|n| n.id == id && n.recipients.includes(user_id))
                .ok_or_else(|| AppError::NotFound(format!("Notification {} not found", id)))?;
            if !notification.read_by.insert(user_id.to_string()) {
                return Ok(());
            }
        }
        self.queue_write(StoreWrite::MarkRead {
            ids: vec![id.to_string()],
            user_id: user_id.to_string(),
        });
        Ok(())
    }

    /// Returns how many notifications changed state.
    pub fn mark_all_read(&self, user_id: &str) -> usize {
        let ids: Vec<String> = self
            .buffer()
            .iter_mut()
            .filter(|n| n.recipients.includes(user_id))
            .filter_map(|n| n.read_by.insert(user_id.to_string()).then(|| n.id.clone()))
            .collect();
        let changed = ids.len();
        if changed > 0 {
            self.queue_write(StoreWrite::MarkRead {
                ids,
                user_id: user_id.to_string(),
            });
        }
        changed
    }

    /// Load the most recent persisted notifications into an empty buffer.
    pub async fn hydrate(&self) -> AppResult<usize> {
        let recent = self.inner.store.find_recent(self.inner.capacity).await?;
        let mut buffer = self.buffer();
        if !buffer.is_empty() {
            return Ok(0);
        }
        let loaded = recent.len();
        buffer.extend(recent);
        Ok(loaded)
    }

    pub fn len(&self) -> usize {
        self.buffer().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}
