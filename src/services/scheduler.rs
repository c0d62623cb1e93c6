//! Task scheduler.
//!
//! Owns every `Task.status` / `assigned_to` transition: task creation with
//! dependency-aware initial status, idempotent once-by-label creation,
//! lock-guarded assignment to the least-loaded capable agent, timeout
//! sweeps with retry budgets, and dependency unblocking.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    lock::task_lock_resource, Agent, Notification, NotificationLevel, Task, TaskStatus,
};
use crate::domain::ports::{AgentStore, LockStore, NotificationStore, TaskFilter, TaskStore};
use crate::services::event_bus::{BusEvent, EventBus};

/// Scheduler tuning knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Assignment tick interval.
    pub tick_interval_secs: u64,
    /// Timeout sweep interval.
    pub sweep_interval_secs: u64,
    /// TTL for task execution locks.
    pub lock_ttl_secs: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 2,
            sweep_interval_secs: 10,
            lock_ttl_secs: crate::domain::models::lock::DEFAULT_LOCK_TTL_SECS,
        }
    }
}

/// Record of a task timeout handled by the sweep.
#[derive(Debug, Clone)]
pub struct TaskTimeoutRecord {
    pub task_id: String,
    pub runtime_secs: i64,
    /// True when the task was requeued; false when it was failed.
    pub retried: bool,
}

/// The task scheduler service.
pub struct TaskScheduler {
    tasks: Arc<dyn TaskStore>,
    agents: Arc<dyn AgentStore>,
    locks: Arc<dyn LockStore>,
    notifications: Arc<dyn NotificationStore>,
    bus: Arc<EventBus>,
    config: SchedulerConfig,
}

impl TaskScheduler {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        agents: Arc<dyn AgentStore>,
        locks: Arc<dyn LockStore>,
        notifications: Arc<dyn NotificationStore>,
        bus: Arc<EventBus>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            tasks,
            agents,
            locks,
            notifications,
            bus,
            config,
        }
    }

    pub fn lock_ttl_secs(&self) -> i64 {
        self.config.lock_ttl_secs
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Insert a new task. Initial status is `blocked` when any dependency
    /// is not yet completed, `pending` otherwise.
    pub async fn create_task(&self, mut task: Task) -> DomainResult<Task> {
        task.status = if self.dependencies_completed(&task).await? {
            TaskStatus::Pending
        } else {
            TaskStatus::Blocked
        };
        task.updated_at = Utc::now();
        self.tasks.insert(&task).await?;
        debug!(task_id = %task.id, status = %task.status, "Task created");
        self.publish(&task);
        Ok(task)
    }

    /// Idempotent creation: if any task already carries `unique_label`,
    /// return it; otherwise create the task with that label attached.
    pub async fn create_task_once_by_label(
        &self,
        unique_label: &str,
        mut task: Task,
    ) -> DomainResult<Task> {
        if let Some(existing) = self.tasks.find_first_by_label(unique_label).await? {
            debug!(task_id = %existing.id, label = unique_label, "Task reused by label");
            return Ok(existing);
        }
        task.add_label(unique_label);
        self.create_task(task).await
    }

    // ========================================================================
    // Status transitions
    // ========================================================================

    /// Apply a status transition, rejecting anything outside the legal set.
    pub async fn update_task_status(
        &self,
        task_id: &str,
        next: TaskStatus,
        reason: Option<&str>,
    ) -> DomainResult<Task> {
        let mut task = self.get_required(task_id).await?;
        if !task.status.can_transition_to(next) {
            warn!(
                task_id,
                from = %task.status,
                to = %next,
                "Rejected illegal task transition"
            );
            return Err(DomainError::InvalidTransition {
                from: task.status.to_string(),
                to: next.to_string(),
            });
        }

        let previous = task.status;
        task.status = next;
        task.updated_at = Utc::now();
        match next {
            TaskStatus::Running => {
                task.last_started_at = Some(Utc::now());
            }
            TaskStatus::Pending => {
                // Requeued tasks lose their claim.
                if let Some(holder) = task.assigned_to.take() {
                    let _ = self
                        .locks
                        .release(&task_lock_resource(&task.id), &holder)
                        .await;
                }
            }
            TaskStatus::Completed | TaskStatus::Failed => {
                task.completed_at = Some(Utc::now());
            }
            _ => {}
        }
        if let Some(reason) = reason {
            task.result_details = Some(reason.to_string());
        }
        self.tasks.update(&task).await?;
        debug!(task_id, from = %previous, to = %next, "Task transitioned");
        self.publish(&task);
        Ok(task)
    }

    /// Terminal success. Sets result fields, releases the lock, and runs a
    /// dependency unblocking pass.
    pub async fn complete_task(
        &self,
        task_id: &str,
        summary: Option<String>,
        details: Option<String>,
    ) -> DomainResult<Task> {
        let mut task = self.get_required(task_id).await?;
        if task.status.is_terminal() {
            return Err(DomainError::InvalidTransition {
                from: task.status.to_string(),
                to: TaskStatus::Completed.to_string(),
            });
        }
        task.status = TaskStatus::Completed;
        task.completed_at = Some(Utc::now());
        task.updated_at = Utc::now();
        if summary.is_some() {
            task.result_summary = summary;
        }
        if details.is_some() {
            task.result_details = details;
        }
        self.tasks.update(&task).await?;
        self.release_lock_for(&task).await;
        info!(task_id, "Task completed");
        self.publish(&task);
        self.unblock_dependents().await?;
        Ok(task)
    }

    /// Terminal failure.
    pub async fn fail_task(&self, task_id: &str, reason: &str) -> DomainResult<Task> {
        let mut task = self.get_required(task_id).await?;
        if task.status.is_terminal() {
            return Err(DomainError::InvalidTransition {
                from: task.status.to_string(),
                to: TaskStatus::Failed.to_string(),
            });
        }
        task.status = TaskStatus::Failed;
        task.completed_at = Some(Utc::now());
        task.updated_at = Utc::now();
        task.result_details = Some(reason.to_string());
        self.tasks.update(&task).await?;
        self.release_lock_for(&task).await;
        warn!(task_id, reason, "Task failed");
        self.publish(&task);
        self.unblock_dependents().await?;
        Ok(task)
    }

    /// Append labels to a task.
    pub async fn add_task_labels(&self, task_id: &str, new_labels: &[String]) -> DomainResult<Task> {
        let mut task = self.get_required(task_id).await?;
        for label in new_labels {
            task.add_label(label.clone());
        }
        task.updated_at = Utc::now();
        self.tasks.update(&task).await?;
        self.publish(&task);
        Ok(task)
    }

    /// Release a claim held by `holder_id`: drop the lock and requeue the
    /// task if it was assigned or queued.
    pub async fn release_task_claim(&self, task_id: &str, holder_id: &str) -> DomainResult<Task> {
        let mut task = self.get_required(task_id).await?;
        let _ = self
            .locks
            .release(&task_lock_resource(task_id), holder_id)
            .await?;
        if matches!(
            task.status,
            TaskStatus::Assigned | TaskStatus::Queued | TaskStatus::Running
        ) {
            task.status = TaskStatus::Pending;
            task.assigned_to = None;
            task.updated_at = Utc::now();
            self.tasks.update(&task).await?;
            self.publish(&task);
        }
        Ok(task)
    }

    /// Claim a task for a specific agent: acquire its lock, then transition
    /// to `assigned`. Used by the assignment pass and by mention interrupts.
    pub async fn assign_to(&self, task_id: &str, agent_id: &str) -> DomainResult<Task> {
        let mut task = self.get_required(task_id).await?;
        if !task.status.can_transition_to(TaskStatus::Assigned) {
            return Err(DomainError::InvalidTransition {
                from: task.status.to_string(),
                to: TaskStatus::Assigned.to_string(),
            });
        }
        let resource = task_lock_resource(task_id);
        let acquired = self
            .locks
            .try_acquire(
                &resource,
                agent_id,
                task.session_id.as_deref(),
                self.config.lock_ttl_secs,
            )
            .await?;
        if !acquired {
            let holder = self
                .locks
                .get(&resource)
                .await?
                .map(|l| l.holder_id)
                .unwrap_or_default();
            return Err(DomainError::LockContention { resource, holder });
        }
        task.status = TaskStatus::Assigned;
        task.assigned_to = Some(agent_id.to_string());
        task.updated_at = Utc::now();
        self.tasks.update(&task).await?;
        info!(task_id, agent_id, "Task assigned");
        self.publish(&task);
        Ok(task)
    }

    // ========================================================================
    // Assignment pass
    // ========================================================================

    /// Assign pending tasks to capable agents. Returns the number assigned.
    pub async fn assignment_pass(&self) -> DomainResult<usize> {
        let mut pending = self
            .tasks
            .list(&TaskFilter::by_status(TaskStatus::Pending))
            .await?;
        if pending.is_empty() {
            return Ok(0);
        }
        // High > medium > low, FIFO within a priority band.
        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });

        let agents = self.agents.list().await?;
        let all_tasks = self.tasks.list(&TaskFilter::default()).await?;
        let mut loads = agent_loads(&all_tasks);

        let now = Utc::now();
        let mut assigned = 0usize;
        for task in pending {
            if task.run_after.map_or(false, |after| after > now) {
                continue;
            }
            if !self.dependencies_completed(&task).await? {
                // Regressed dependency; park the task again.
                let _ = self
                    .update_task_status(&task.id, TaskStatus::Blocked, None)
                    .await;
                continue;
            }

            let Some(agent) = pick_agent(&task, &agents, &loads) else {
                debug!(task_id = %task.id, "No eligible agent; task stays pending");
                continue;
            };

            match self.assign_to(&task.id, &agent).await {
                Ok(_) => {
                    *loads.entry(agent).or_insert(0) += 1;
                    assigned += 1;
                }
                Err(DomainError::LockContention { resource, holder }) => {
                    debug!(task_id = %task.id, %resource, %holder, "Lock contention; skipping");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(assigned)
    }

    // ========================================================================
    // Timeout sweep
    // ========================================================================

    /// Requeue or fail running tasks whose execution exceeded the timeout.
    pub async fn timeout_sweep(&self) -> DomainResult<Vec<TaskTimeoutRecord>> {
        let running = self
            .tasks
            .list(&TaskFilter::by_status(TaskStatus::Running))
            .await?;
        let now = Utc::now();
        let mut records = Vec::new();

        for task in running {
            let Some(timeout) = task.timeout_seconds else {
                continue;
            };
            let Some(started) = task.last_started_at else {
                continue;
            };
            let runtime = (now - started).num_seconds();
            if runtime <= timeout as i64 {
                continue;
            }

            let retried = task.can_retry();
            if retried {
                let mut requeued = task.clone();
                requeued.retry_count += 1;
                requeued.status = TaskStatus::Pending;
                requeued.updated_at = now;
                if let Some(holder) = requeued.assigned_to.take() {
                    let _ = self
                        .locks
                        .release(&task_lock_resource(&task.id), &holder)
                        .await;
                }
                self.tasks.update(&requeued).await?;
                warn!(
                    task_id = %task.id,
                    retry = requeued.retry_count,
                    runtime_secs = runtime,
                    "Task timed out; requeued"
                );
                self.publish(&requeued);
            } else {
                self.fail_task(&task.id, &format!("timed out after {runtime}s"))
                    .await?;
            }

            let _ = self
                .notifications
                .insert(
                    &Notification::new(
                        NotificationLevel::Warning,
                        "Task timeout",
                        format!(
                            "Task {} exceeded its {}s timeout ({}s elapsed); {}",
                            task.id,
                            timeout,
                            runtime,
                            if retried { "requeued" } else { "failed" }
                        ),
                    ),
                )
                .await;
            records.push(TaskTimeoutRecord {
                task_id: task.id.clone(),
                runtime_secs: runtime,
                retried,
            });
        }
        Ok(records)
    }

    // ========================================================================
    // Dependency unblocking
    // ========================================================================

    /// Move blocked tasks whose dependencies are now all completed back to
    /// pending.
    pub async fn unblock_dependents(&self) -> DomainResult<usize> {
        let blocked = self
            .tasks
            .list(&TaskFilter::by_status(TaskStatus::Blocked))
            .await?;
        let mut unblocked = 0usize;
        for task in blocked {
            if self.dependencies_completed(&task).await? {
                self.update_task_status(&task.id, TaskStatus::Pending, None)
                    .await?;
                unblocked += 1;
            }
        }
        if unblocked > 0 {
            debug!(count = unblocked, "Unblocked tasks");
        }
        Ok(unblocked)
    }

    // ========================================================================
    // Background loop
    // ========================================================================

    /// Run assignment ticks and timeout sweeps until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(Duration::from_secs(self.config.tick_interval_secs));
        let mut sweep = tokio::time::interval(Duration::from_secs(self.config.sweep_interval_secs));
        info!("Scheduler started");
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.unblock_dependents().await {
                        warn!(error = %e, "Dependency unblocking failed");
                    }
                    if let Err(e) = self.assignment_pass().await {
                        warn!(error = %e, "Assignment pass failed");
                    }
                }
                _ = sweep.tick() => {
                    if let Err(e) = self.timeout_sweep().await {
                        warn!(error = %e, "Timeout sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Scheduler stopping; no further assignments");
                        return;
                    }
                }
            }
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn get_required(&self, task_id: &str) -> DomainResult<Task> {
        self.tasks
            .get(task_id)
            .await?
            .ok_or_else(|| DomainError::TaskNotFound(task_id.to_string()))
    }

    async fn dependencies_completed(&self, task: &Task) -> DomainResult<bool> {
        for dep in &task.dependencies {
            let completed = self
                .tasks
                .get(dep)
                .await?
                .map(|d| d.status == TaskStatus::Completed)
                .unwrap_or(false);
            if !completed {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn release_lock_for(&self, task: &Task) {
        if let Some(holder) = task.assigned_to.as_deref() {
            let _ = self
                .locks
                .release(&task_lock_resource(&task.id), holder)
                .await;
        }
    }

    fn publish(&self, task: &Task) {
        self.bus.publish(BusEvent::TasksUpdate(vec![task.clone()]));
    }
}

/// Non-terminal task count per assignee.
fn agent_loads(tasks: &[Task]) -> HashMap<String, usize> {
    let mut loads = HashMap::new();
    for task in tasks {
        if task.status.is_terminal() {
            continue;
        }
        if let Some(assignee) = task.assigned_to.as_deref() {
            *loads.entry(assignee.to_string()).or_insert(0) += 1;
        }
    }
    loads
}

/// Pick the least-loaded enabled online agent whose roles satisfy the task
/// and who is not excluded. Tie-break by earliest `status_updated_at`.
fn pick_agent(task: &Task, agents: &[Agent], loads: &HashMap<String, usize>) -> Option<String> {
    let required_role = task.required_role();
    let excluded = task.excluded_agents();

    agents
        .iter()
        .filter(|a| a.is_assignable())
        .filter(|a| required_role.map_or(true, |role| a.has_role(role)))
        .filter(|a| !excluded.contains(&a.id.as_str()))
        .min_by(|a, b| {
            let load_a = loads.get(&a.id).copied().unwrap_or(0);
            let load_b = loads.get(&b.id).copied().unwrap_or(0);
            load_a
                .cmp(&load_b)
                .then(a.status_updated_at.cmp(&b.status_updated_at))
        })
        .map(|a| a.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AgentStatus, TaskPriority};
    use crate::infrastructure::memory::MemoryStores;
    use crate::services::event_bus::EventBusConfig;

    fn scheduler(stores: &MemoryStores) -> TaskScheduler {
        TaskScheduler::new(
            stores.tasks.clone(),
            stores.agents.clone(),
            stores.locks.clone(),
            stores.notifications.clone(),
            Arc::new(EventBus::new(EventBusConfig::default())),
            SchedulerConfig::default(),
        )
    }

    async fn online_agent(stores: &MemoryStores, id: &str, roles: &[&str]) {
        let mut agent = Agent::new(id, roles.iter().map(ToString::to_string).collect());
        agent.status = AgentStatus::Online;
        stores.agents.upsert(&agent).await.unwrap();
    }

    #[tokio::test]
    async fn create_task_computes_blocked_status() {
        let stores = MemoryStores::new();
        let scheduler = scheduler(&stores);

        let dep = scheduler.create_task(Task::new("dep")).await.unwrap();
        let mut child = Task::new("child");
        child.dependencies = vec![dep.id.clone()];
        let child = scheduler.create_task(child).await.unwrap();
        assert_eq!(child.status, TaskStatus::Blocked);
    }

    #[tokio::test]
    async fn completion_unblocks_dependents() {
        let stores = MemoryStores::new();
        let scheduler = scheduler(&stores);

        let dep = scheduler.create_task(Task::new("dep")).await.unwrap();
        let mut child = Task::new("child");
        child.dependencies = vec![dep.id.clone()];
        let child = scheduler.create_task(child).await.unwrap();

        scheduler.complete_task(&dep.id, None, None).await.unwrap();
        let child = stores.tasks.get(&child.id).await.unwrap().unwrap();
        assert_eq!(child.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn once_by_label_returns_same_task() {
        let stores = MemoryStores::new();
        let scheduler = scheduler(&stores);

        let first = scheduler
            .create_task_once_by_label("workflow_auto:inst-1:plan:0", Task::new("a"))
            .await
            .unwrap();
        for _ in 0..3 {
            let again = scheduler
                .create_task_once_by_label("workflow_auto:inst-1:plan:0", Task::new("a"))
                .await
                .unwrap();
            assert_eq!(again.id, first.id);
        }
        let all = stores.tasks.list(&TaskFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn illegal_transition_rejected() {
        let stores = MemoryStores::new();
        let scheduler = scheduler(&stores);
        let task = scheduler.create_task(Task::new("t")).await.unwrap();

        let err = scheduler
            .update_task_status(&task.id, TaskStatus::Running, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
        // State unchanged.
        let task = stores.tasks.get(&task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn assignment_prefers_least_loaded_with_role() {
        let stores = MemoryStores::new();
        let scheduler = scheduler(&stores);
        online_agent(&stores, "backend-1", &["backend"]).await;
        online_agent(&stores, "backend-2", &["backend"]).await;
        online_agent(&stores, "doc-1", &["doc"]).await;

        // Load backend-1 with an existing assignment.
        let mut busy = Task::new("busy");
        busy.status = TaskStatus::Assigned;
        busy.assigned_to = Some("backend-1".into());
        stores.tasks.insert(&busy).await.unwrap();

        let mut task = Task::new("api work");
        task.add_label("workflow_role:backend");
        let task = scheduler.create_task(task).await.unwrap();

        let assigned = scheduler.assignment_pass().await.unwrap();
        assert_eq!(assigned, 1);
        let task = stores.tasks.get(&task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Assigned);
        assert_eq!(task.assigned_to.as_deref(), Some("backend-2"));

        // Exactly one valid lock exists for the assignment.
        let lock = stores
            .locks
            .get(&task_lock_resource(&task.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lock.holder_id, "backend-2");
        assert!(!lock.is_expired());
    }

    #[tokio::test]
    async fn excluded_agent_is_skipped() {
        let stores = MemoryStores::new();
        let scheduler = scheduler(&stores);
        online_agent(&stores, "dev-1", &["backend"]).await;
        online_agent(&stores, "dev-2", &["backend"]).await;

        let mut task = Task::new("retry elsewhere");
        task.add_label("workflow_role:backend");
        task.add_label("agent_exclude:dev-1");
        let task = scheduler.create_task(task).await.unwrap();

        scheduler.assignment_pass().await.unwrap();
        let task = stores.tasks.get(&task.id).await.unwrap().unwrap();
        assert_eq!(task.assigned_to.as_deref(), Some("dev-2"));
    }

    #[tokio::test]
    async fn no_capable_agent_leaves_task_pending() {
        let stores = MemoryStores::new();
        let scheduler = scheduler(&stores);
        online_agent(&stores, "doc-1", &["doc"]).await;

        let mut task = Task::new("needs backend");
        task.add_label("workflow_role:backend");
        let task = scheduler.create_task(task).await.unwrap();

        let assigned = scheduler.assignment_pass().await.unwrap();
        assert_eq!(assigned, 0);
        let task = stores.tasks.get(&task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn priority_order_governs_assignment() {
        let stores = MemoryStores::new();
        let scheduler = scheduler(&stores);
        online_agent(&stores, "dev-1", &["backend"]).await;

        let mut low = Task::new("low");
        low.priority = TaskPriority::Low;
        let _low = scheduler.create_task(low).await.unwrap();
        let mut high = Task::new("high");
        high.priority = TaskPriority::High;
        let high = scheduler.create_task(high).await.unwrap();

        scheduler.assignment_pass().await.unwrap();
        // Single agent: the high-priority task wins the first claim.
        let high = stores.tasks.get(&high.id).await.unwrap().unwrap();
        assert_eq!(high.status, TaskStatus::Assigned);
    }

    #[tokio::test]
    async fn timeout_requeues_within_retry_budget() {
        let stores = MemoryStores::new();
        let scheduler = scheduler(&stores);

        let mut task = Task::new("slow");
        task.status = TaskStatus::Running;
        task.assigned_to = Some("dev-1".into());
        task.timeout_seconds = Some(1);
        task.max_retries = Some(2);
        task.last_started_at = Some(Utc::now() - chrono::Duration::seconds(120));
        stores.tasks.insert(&task).await.unwrap();

        let records = scheduler.timeout_sweep().await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].retried);

        let task = stores.tasks.get(&task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 1);
        assert!(task.assigned_to.is_none());
    }

    #[tokio::test]
    async fn timeout_fails_when_budget_exhausted() {
        let stores = MemoryStores::new();
        let scheduler = scheduler(&stores);

        let mut task = Task::new("slow");
        task.status = TaskStatus::Running;
        task.timeout_seconds = Some(1);
        task.max_retries = Some(1);
        task.retry_count = 1;
        task.last_started_at = Some(Utc::now() - chrono::Duration::seconds(120));
        stores.tasks.insert(&task).await.unwrap();

        let records = scheduler.timeout_sweep().await.unwrap();
        assert!(!records[0].retried);
        let task = stores.tasks.get(&task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn release_claim_requeues_assigned_task() {
        let stores = MemoryStores::new();
        let scheduler = scheduler(&stores);
        online_agent(&stores, "dev-1", &[]).await;

        let task = scheduler.create_task(Task::new("t")).await.unwrap();
        scheduler.assign_to(&task.id, "dev-1").await.unwrap();

        let task = scheduler.release_task_claim(&task.id, "dev-1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.assigned_to.is_none());
        assert!(stores
            .locks
            .get(&task_lock_resource(&task.id))
            .await
            .unwrap()
            .is_none());
    }
}
