//! Notification store port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::Notification;

/// Store interface for user-facing notifications.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, notification: &Notification) -> DomainResult<()>;

    /// Unread notifications, newest first.
    async fn list_unread(&self) -> DomainResult<Vec<Notification>>;

    async fn mark_read(&self, id: &str) -> DomainResult<()>;
}
