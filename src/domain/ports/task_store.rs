//! Task store port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Task, TaskStatus};

/// Filter criteria for listing tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub assigned_to: Option<String>,
    pub session_id: Option<String>,
    /// Exact label match.
    pub label: Option<String>,
}

impl TaskFilter {
    pub fn by_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn by_label(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Default::default()
        }
    }
}

/// Store interface for Task persistence.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task.
    async fn insert(&self, task: &Task) -> DomainResult<()>;

    /// Update an existing task.
    async fn update(&self, task: &Task) -> DomainResult<()>;

    /// Get a task by id.
    async fn get(&self, id: &str) -> DomainResult<Option<Task>>;

    /// List tasks matching the filter.
    async fn list(&self, filter: &TaskFilter) -> DomainResult<Vec<Task>>;

    /// First task carrying the given label, if any.
    async fn find_first_by_label(&self, label: &str) -> DomainResult<Option<Task>>;
}
