//! Shared fixtures for integration tests: a temporary SQLite database with
//! the full service stack wired over it.

use std::sync::Arc;

use arranger::domain::models::{Agent, AgentStatus};
use arranger::infrastructure::database::{
    DatabaseConnection, SqliteAgentStore, SqliteApprovalStore, SqliteInstanceStore,
    SqliteLockStore, SqliteMessageStore, SqliteNotificationStore, SqliteProofStore,
    SqliteTaskStore, SqliteThinkingLogStore, SqliteVoteStore,
};
use arranger::services::{
    ApprovalService, EventBus, EventBusConfig, MessageService, NotificationService,
    PluginContext, ProofService, SchedulerConfig, TaskScheduler, VoteService, WorkflowKernel,
};

pub struct TestHarness {
    // Keeps the database directory alive for the test's duration.
    _dir: tempfile::TempDir,
    pub tasks: Arc<SqliteTaskStore>,
    pub agents: Arc<SqliteAgentStore>,
    pub messages: Arc<SqliteMessageStore>,
    pub approvals: Arc<SqliteApprovalStore>,
    pub votes: Arc<SqliteVoteStore>,
    pub proofs: Arc<SqliteProofStore>,
    pub locks: Arc<SqliteLockStore>,
    pub notifications: Arc<SqliteNotificationStore>,
    pub instances: Arc<SqliteInstanceStore>,
    pub thinking: Arc<SqliteThinkingLogStore>,
    pub bus: Arc<EventBus>,
    pub kernel: Arc<WorkflowKernel>,
    pub scheduler: Arc<TaskScheduler>,
    pub ctx: Arc<PluginContext>,
}

pub async fn harness() -> TestHarness {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite:{}/test.db", dir.path().display());
    let db = DatabaseConnection::new(&url).await.expect("database");
    db.migrate().await.expect("migrations");
    let pool = db.pool().clone();

    let tasks = Arc::new(SqliteTaskStore::new(pool.clone()));
    let agents = Arc::new(SqliteAgentStore::new(pool.clone()));
    let messages_store = Arc::new(SqliteMessageStore::new(pool.clone()));
    let approvals_store = Arc::new(SqliteApprovalStore::new(pool.clone()));
    let votes_store = Arc::new(SqliteVoteStore::new(pool.clone()));
    let proofs_store = Arc::new(SqliteProofStore::new(pool.clone()));
    let locks = Arc::new(SqliteLockStore::new(pool.clone()));
    let notifications_store = Arc::new(SqliteNotificationStore::new(pool.clone()));
    let instances = Arc::new(SqliteInstanceStore::new(pool.clone()));
    let thinking = Arc::new(SqliteThinkingLogStore::new(pool));

    let bus = Arc::new(EventBus::new(EventBusConfig::default()));
    let kernel = Arc::new(WorkflowKernel::new(instances.clone(), bus.clone()));
    let scheduler = Arc::new(TaskScheduler::new(
        tasks.clone(),
        agents.clone(),
        locks.clone(),
        notifications_store.clone(),
        bus.clone(),
        SchedulerConfig::default(),
    ));
    let notifications = Arc::new(NotificationService::new(notifications_store.clone()));
    let messages = Arc::new(MessageService::new(messages_store.clone(), bus.clone()));
    let approvals = Arc::new(ApprovalService::new(
        approvals_store.clone(),
        notifications.clone(),
        messages.clone(),
        bus.clone(),
    ));
    let votes = Arc::new(VoteService::new(
        votes_store.clone(),
        agents.clone(),
        notifications.clone(),
        messages.clone(),
        bus.clone(),
    ));
    let proofs = Arc::new(ProofService::new(proofs_store.clone()));

    let ctx = Arc::new(PluginContext {
        kernel: kernel.clone(),
        scheduler: scheduler.clone(),
        messages,
        notifications,
        approvals,
        votes,
        proofs,
        agents: agents.clone(),
        tasks: tasks.clone(),
        bus: bus.clone(),
        default_workflow_id: "universal_flow_v1".into(),
    });

    TestHarness {
        _dir: dir,
        tasks,
        agents,
        messages: messages_store,
        approvals: approvals_store,
        votes: votes_store,
        proofs: proofs_store,
        locks,
        notifications: notifications_store,
        instances,
        thinking,
        bus,
        kernel,
        scheduler,
        ctx,
    }
}

/// Register an enabled online agent.
pub async fn online_agent(harness: &TestHarness, id: &str, roles: &[&str]) -> Agent {
    use arranger::domain::ports::AgentStore;
    let mut agent = Agent::new(id, roles.iter().map(ToString::to_string).collect());
    agent.status = AgentStatus::Online;
    harness.agents.upsert(&agent).await.expect("agent upsert");
    agent
}
