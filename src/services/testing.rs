//! Shared fixtures for service unit tests.

use std::sync::Arc;

use crate::domain::models::{Agent, AgentStatus};
use crate::domain::ports::AgentStore;
use crate::infrastructure::memory::MemoryStores;
use crate::services::event_bus::{EventBus, EventBusConfig};
use crate::services::governance::{
    ApprovalService, NotificationService, ProofService, VoteService,
};
use crate::services::kernel::WorkflowKernel;
use crate::services::messages::MessageService;
use crate::services::plugin_bus::PluginContext;
use crate::services::scheduler::{SchedulerConfig, TaskScheduler};

/// Build a full plugin context over in-memory stores.
pub fn test_context(stores: &MemoryStores) -> Arc<PluginContext> {
    let bus = Arc::new(EventBus::new(EventBusConfig::default()));
    let kernel = Arc::new(WorkflowKernel::new(stores.instances.clone(), bus.clone()));
    let scheduler = Arc::new(TaskScheduler::new(
        stores.tasks.clone(),
        stores.agents.clone(),
        stores.locks.clone(),
        stores.notifications.clone(),
        bus.clone(),
        SchedulerConfig::default(),
    ));
    let notifications = Arc::new(NotificationService::new(stores.notifications.clone()));
    let messages = Arc::new(MessageService::new(stores.messages.clone(), bus.clone()));
    let approvals = Arc::new(ApprovalService::new(
        stores.approvals.clone(),
        notifications.clone(),
        messages.clone(),
        bus.clone(),
    ));
    let votes = Arc::new(VoteService::new(
        stores.votes.clone(),
        stores.agents.clone(),
        notifications.clone(),
        messages.clone(),
        bus.clone(),
    ));
    let proofs = Arc::new(ProofService::new(stores.proofs.clone()));
    Arc::new(PluginContext {
        kernel,
        scheduler,
        messages,
        notifications,
        approvals,
        votes,
        proofs,
        agents: stores.agents.clone(),
        tasks: stores.tasks.clone(),
        bus,
        default_workflow_id: "universal_flow_v1".into(),
    })
}

/// Register an online agent with the given roles.
pub async fn online_agent(stores: &MemoryStores, id: &str, roles: &[&str]) -> Agent {
    let mut agent = Agent::new(id, roles.iter().map(ToString::to_string).collect());
    agent.status = AgentStatus::Online;
    stores.agents.upsert(&agent).await.unwrap();
    agent
}
