//! Thinking-log store port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::ThinkingStep;

/// Store interface for the per-task thinking log.
#[async_trait]
pub trait ThinkingLogStore: Send + Sync {
    async fn append(&self, step: &ThinkingStep) -> DomainResult<()>;

    /// Steps recorded for a task, oldest first.
    async fn list_by_task(&self, task_id: &str) -> DomainResult<Vec<ThinkingStep>>;
}
