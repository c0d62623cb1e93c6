//! SQLite task store.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use super::utils::{
    decode_list, encode_list, from_millis, label_pattern, opt_from_millis, opt_to_millis,
    to_millis,
};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Task, TaskPriority, TaskStatus};
use crate::domain::ports::{TaskFilter, TaskStore};

pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> DomainResult<Task> {
        let status_raw: String = row.get("status");
        let priority_raw: String = row.get("priority");
        Ok(Task {
            id: row.get("id"),
            session_id: row.get("session_id"),
            title: row.get("title"),
            intent: row.get("intent"),
            scope: row.get("scope"),
            priority: TaskPriority::from_str(&priority_raw).ok_or_else(|| {
                DomainError::StoreFailure(format!("bad task priority: {priority_raw}"))
            })?,
            labels: decode_list(&row.get::<String, _>("labels")),
            status: TaskStatus::from_str(&status_raw).ok_or_else(|| {
                DomainError::StoreFailure(format!("bad task status: {status_raw}"))
            })?,
            assigned_to: row.get("assigned_to"),
            parent_task_id: row.get("parent_task_id"),
            dependencies: decode_list(&row.get::<String, _>("dependencies")),
            retry_count: row.get::<i64, _>("retry_count") as u32,
            max_retries: row.get::<Option<i64>, _>("max_retries").map(|v| v as u32),
            timeout_seconds: row.get::<Option<i64>, _>("timeout_seconds").map(|v| v as u64),
            run_after: opt_from_millis(row.get("run_after")),
            last_started_at: opt_from_millis(row.get("last_started_at")),
            result_summary: row.get("result_summary"),
            result_details: row.get("result_details"),
            created_by: row.get("created_by"),
            metadata: serde_json::from_str(&row.get::<String, _>("metadata"))
                .unwrap_or(serde_json::Value::Null),
            created_at: from_millis(row.get("created_at")),
            updated_at: from_millis(row.get("updated_at")),
            completed_at: opt_from_millis(row.get("completed_at")),
        })
    }

    fn bind_all<'q>(
        query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
        task: &'q Task,
    ) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
        query
            .bind(&task.session_id)
            .bind(&task.title)
            .bind(&task.intent)
            .bind(&task.scope)
            .bind(task.priority.as_str())
            .bind(encode_list(&task.labels))
            .bind(task.status.as_str())
            .bind(&task.assigned_to)
            .bind(&task.parent_task_id)
            .bind(encode_list(&task.dependencies))
            .bind(task.retry_count as i64)
            .bind(task.max_retries.map(|v| v as i64))
            .bind(task.timeout_seconds.map(|v| v as i64))
            .bind(opt_to_millis(task.run_after))
            .bind(opt_to_millis(task.last_started_at))
            .bind(&task.result_summary)
            .bind(&task.result_details)
            .bind(&task.created_by)
            .bind(task.metadata.to_string())
            .bind(to_millis(task.created_at))
            .bind(to_millis(task.updated_at))
            .bind(opt_to_millis(task.completed_at))
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn insert(&self, task: &Task) -> DomainResult<()> {
        let query = sqlx::query(
            "INSERT INTO tasks (
                id, session_id, title, intent, scope, priority, labels, status,
                assigned_to, parent_task_id, dependencies, retry_count, max_retries,
                timeout_seconds, run_after, last_started_at, result_summary,
                result_details, created_by, metadata, created_at, updated_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&task.id);
        Self::bind_all(query, task).execute(&self.pool).await?;
        Ok(())
    }

    async fn update(&self, task: &Task) -> DomainResult<()> {
        let query = sqlx::query(
            "UPDATE tasks SET
                session_id = ?, title = ?, intent = ?, scope = ?, priority = ?,
                labels = ?, status = ?, assigned_to = ?, parent_task_id = ?,
                dependencies = ?, retry_count = ?, max_retries = ?, timeout_seconds = ?,
                run_after = ?, last_started_at = ?, result_summary = ?, result_details = ?,
                created_by = ?, metadata = ?, created_at = ?, updated_at = ?, completed_at = ?
             WHERE id = ?",
        );
        let result = Self::bind_all(query, task)
            .bind(&task.id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::TaskNotFound(task.id.clone()));
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> DomainResult<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::row_to_task(&r)).transpose()
    }

    async fn list(&self, filter: &TaskFilter) -> DomainResult<Vec<Task>> {
        let mut sql = String::from("SELECT * FROM tasks WHERE 1 = 1");
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filter.assigned_to.is_some() {
            sql.push_str(" AND assigned_to = ?");
        }
        if filter.session_id.is_some() {
            sql.push_str(" AND session_id = ?");
        }
        if filter.label.is_some() {
            sql.push_str(" AND labels LIKE ? ESCAPE '\\'");
        }
        sql.push_str(" ORDER BY created_at ASC");

        let mut query = sqlx::query(&sql);
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(assigned) = &filter.assigned_to {
            query = query.bind(assigned);
        }
        if let Some(session) = &filter.session_id {
            query = query.bind(session);
        }
        let pattern = filter.label.as_deref().map(label_pattern);
        if let Some(pattern) = &pattern {
            query = query.bind(pattern);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn find_first_by_label(&self, label: &str) -> DomainResult<Option<Task>> {
        let row = sqlx::query(
            "SELECT * FROM tasks WHERE labels LIKE ? ESCAPE '\\' ORDER BY created_at ASC LIMIT 1",
        )
        .bind(label_pattern(label))
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| Self::row_to_task(&r)).transpose()
    }
}
