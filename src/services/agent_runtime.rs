//! Per-agent execution runtime.
//!
//! Each agent runs a single loop: heartbeat, pickup of tasks assigned to
//! it (behind the scheduler lock), an LLM-with-tools executor with a hard
//! iteration bound and a context token budget, and self-governance
//! watchers that cast votes and resolve approvals addressed to the agent.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    lock::task_lock_resource, task::labels, AgentStatus, ApprovalDecision, BallotDecision,
    MessageType, NotificationLevel, Task, TaskPriority, TaskStatus, ThinkingStep,
    ThinkingStepType,
};
use crate::domain::ports::llm::{ChatMessage, ChatRequest, ToolRunner};
use crate::domain::ports::{AgentStore, LockStore, TaskStore, ThinkingLogStore};
use crate::infrastructure::llm::LlmClient;
use crate::services::event_bus::{BusEvent, EventBus, LlmStreamUpdate};
use crate::services::governance::{ApprovalService, NotificationService, VoteService};
use crate::services::messages::MessageService;
use crate::services::scheduler::TaskScheduler;

/// Agent runtime tuning.
#[derive(Debug, Clone)]
pub struct AgentRuntimeConfig {
    pub heartbeat_interval_secs: u64,
    pub governance_poll_secs: u64,
    /// Hard bound on executor iterations per task.
    pub max_iterations: u32,
    /// Context budget in estimated tokens; oldest non-system messages are
    /// dropped past it.
    pub token_budget: usize,
    /// Escalate failures to a user takeover approval instead of failing.
    pub enable_takeover: bool,
    /// Ballot cast when the LLM's vote answer is unclear.
    pub default_vote_on_unclear: BallotDecision,
}

impl Default for AgentRuntimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            governance_poll_secs: 30,
            max_iterations: 20,
            token_budget: 3200,
            enable_takeover: true,
            default_vote_on_unclear: BallotDecision::Abstain,
        }
    }
}

/// Runtime driving one agent.
pub struct AgentRuntime {
    agent_id: String,
    agents: Arc<dyn AgentStore>,
    tasks: Arc<dyn TaskStore>,
    locks: Arc<dyn LockStore>,
    thinking: Arc<dyn ThinkingLogStore>,
    scheduler: Arc<TaskScheduler>,
    approvals: Arc<ApprovalService>,
    votes: Arc<VoteService>,
    messages: Arc<MessageService>,
    notifications: Arc<NotificationService>,
    llm: Arc<LlmClient>,
    tools: Arc<dyn ToolRunner>,
    bus: Arc<EventBus>,
    config: AgentRuntimeConfig,
}

#[allow(clippy::too_many_arguments)]
impl AgentRuntime {
    pub fn new(
        agent_id: impl Into<String>,
        agents: Arc<dyn AgentStore>,
        tasks: Arc<dyn TaskStore>,
        locks: Arc<dyn LockStore>,
        thinking: Arc<dyn ThinkingLogStore>,
        scheduler: Arc<TaskScheduler>,
        approvals: Arc<ApprovalService>,
        votes: Arc<VoteService>,
        messages: Arc<MessageService>,
        notifications: Arc<NotificationService>,
        llm: Arc<LlmClient>,
        tools: Arc<dyn ToolRunner>,
        bus: Arc<EventBus>,
        config: AgentRuntimeConfig,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            agents,
            tasks,
            locks,
            thinking,
            scheduler,
            approvals,
            votes,
            messages,
            notifications,
            llm,
            tools,
            bus,
            config,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Main loop. The agent record must pre-exist in the store.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> DomainResult<()> {
        self.set_status(AgentStatus::Online, None).await?;
        info!(agent_id = %self.agent_id, "Agent online");

        let mut events = self.bus.subscribe();
        let mut heartbeat =
            tokio::time::interval(Duration::from_secs(self.config.heartbeat_interval_secs));
        let mut governance =
            tokio::time::interval(Duration::from_secs(self.config.governance_poll_secs));

        loop {
            tokio::select! {
                received = events.recv() => {
                    match received {
                        Ok(published) => match published.event {
                            BusEvent::TasksUpdate(tasks) => {
                                for task in &tasks {
                                    if let Err(e) = self.maybe_pickup(task).await {
                                        warn!(agent_id = %self.agent_id, task_id = %task.id, error = %e, "Pickup failed");
                                    }
                                }
                            }
                            BusEvent::VotesUpdate(_) => {
                                if let Err(e) = self.poll_votes().await {
                                    warn!(agent_id = %self.agent_id, error = %e, "Vote watcher failed");
                                }
                            }
                            BusEvent::ApprovalsUpdate(_) => {
                                if let Err(e) = self.poll_approvals().await {
                                    warn!(agent_id = %self.agent_id, error = %e, "Approval watcher failed");
                                }
                            }
                            _ => {}
                        },
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(agent_id = %self.agent_id, missed, "Agent lagged behind the event stream");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = heartbeat.tick() => {
                    if let Err(e) = self.beat().await {
                        warn!(agent_id = %self.agent_id, error = %e, "Heartbeat failed");
                    }
                }
                _ = governance.tick() => {
                    if let Err(e) = self.poll_votes().await {
                        warn!(agent_id = %self.agent_id, error = %e, "Vote poll failed");
                    }
                    if let Err(e) = self.poll_approvals().await {
                        warn!(agent_id = %self.agent_id, error = %e, "Approval poll failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Orderly stop: offline, no claims left behind.
        self.set_status(AgentStatus::Offline, None).await?;
        let released = self.locks.release_all(&self.agent_id).await?;
        info!(agent_id = %self.agent_id, released, "Agent offline");
        Ok(())
    }

    /// Pick up a task assigned to this agent if its dependencies are met
    /// and the scheduler lock can be held.
    pub async fn maybe_pickup(&self, task: &Task) -> DomainResult<()> {
        if task.assigned_to.as_deref() != Some(self.agent_id.as_str())
            || task.status != TaskStatus::Assigned
        {
            return Ok(());
        }
        for dep in &task.dependencies {
            let done = self
                .tasks
                .get(dep)
                .await?
                .map(|d| d.status == TaskStatus::Completed)
                .unwrap_or(false);
            if !done {
                debug!(task_id = %task.id, dep, "Dependency not complete; not picking up");
                return Ok(());
            }
        }

        let acquired = self
            .locks
            .try_acquire(
                &task_lock_resource(&task.id),
                &self.agent_id,
                task.session_id.as_deref(),
                self.scheduler.lock_ttl_secs(),
            )
            .await?;
        if !acquired {
            debug!(task_id = %task.id, "Execution lock contended; skipping");
            return Ok(());
        }

        self.execute(task).await
    }

    /// Execute a claimed task end to end.
    pub async fn execute(&self, task: &Task) -> DomainResult<()> {
        self.scheduler
            .update_task_status(&task.id, TaskStatus::Running, None)
            .await?;
        self.set_status(AgentStatus::Busy, Some(task.id.clone())).await?;
        self.record(&task.id, ThinkingStepType::Start, format!("executing: {}", task.title))
            .await;

        let outcome = if task.has_label(labels::REQUIREMENT_ANALYSIS) {
            self.plan_requirement(task).await
        } else {
            self.run_llm_loop(task).await
        };

        match outcome {
            Ok(summary) => {
                self.scheduler
                    .complete_task(&task.id, Some(summary.clone()), None)
                    .await?;
                // Root tasks get a blackboard summary for the audit trail.
                if task.parent_task_id.is_none() {
                    if let Some(session) = task.session_id.as_deref() {
                        let _ = self
                            .messages
                            .post(crate::domain::models::BlackboardMessage::new(
                                session,
                                self.agent_id.clone(),
                                MessageType::Status,
                                format!("completed \"{}\": {}", task.title, truncate(&summary, 400)),
                            ))
                            .await;
                    }
                }
                let _ = self
                    .locks
                    .release(&task_lock_resource(&task.id), &self.agent_id)
                    .await;
                self.set_status(AgentStatus::Online, None).await?;
                Ok(())
            }
            Err(e) => {
                error!(agent_id = %self.agent_id, task_id = %task.id, error = %e, "Task execution failed");
                self.record(&task.id, ThinkingStepType::Error, e.to_string()).await;
                if task.has_label(labels::REQUIREMENT_ANALYSIS) {
                    self.notify_decomposition_failure(task, &e.to_string()).await;
                }
                if self.config.enable_takeover {
                    self.approvals
                        .request_task_takeover(&self.scheduler, task, &self.agent_id)
                        .await?;
                } else {
                    self.scheduler.fail_task(&task.id, &e.to_string()).await?;
                }
                self.set_status(AgentStatus::Online, None).await?;
                Ok(())
            }
        }
    }

    // ========================================================================
    // Executor
    // ========================================================================

    /// Generic LLM-with-tools loop with a hard iteration bound.
    async fn run_llm_loop(&self, task: &Task) -> DomainResult<String> {
        let mut messages = vec![
            ChatMessage::system(format!(
                "You are agent {} working inside a software delivery workflow. \
                 Finish the task and answer with a concise result summary.",
                self.agent_id
            )),
            ChatMessage::user(task_prompt(task)),
        ];
        let specs = self.tools.specs();

        for iteration in 0..self.config.max_iterations {
            let mut request = ChatRequest::new(messages.clone());
            request.tools = specs.clone();
            let response = self.llm.chat(&request).await?;
            self.publish_stream(task, &response.content, true, None);
            self.record(
                &task.id,
                ThinkingStepType::LlmResponse,
                truncate(&response.content, 1000),
            )
            .await;

            if response.tool_calls.is_empty() {
                return Ok(response.content);
            }

            let mut assistant = ChatMessage::assistant(response.content.clone());
            assistant.tool_calls = response.tool_calls.clone();
            messages.push(assistant);

            for call in &response.tool_calls {
                self.record(
                    &task.id,
                    ThinkingStepType::ToolCall,
                    format!("{}({})", call.name, call.arguments),
                )
                .await;
                match self.tools.run(&call.name, &call.arguments).await {
                    Ok(result) => {
                        self.record(
                            &task.id,
                            ThinkingStepType::ToolResult,
                            truncate(&result.to_string(), 1000),
                        )
                        .await;
                        messages.push(ChatMessage::tool_result(
                            call.id.clone(),
                            result.to_string(),
                        ));
                    }
                    Err(e) => {
                        // Tool failures go back to the model; it decides
                        // whether to work around or give up.
                        self.record(&task.id, ThinkingStepType::Error, e.to_string()).await;
                        messages.push(ChatMessage::tool_result(
                            call.id.clone(),
                            format!("tool error: {e}"),
                        ));
                    }
                }
            }

            trim_to_budget(&mut messages, self.config.token_budget);
            debug!(task_id = %task.id, iteration, "Executor iteration finished");
        }

        Err(DomainError::LlmFailure(format!(
            "iteration bound ({}) reached without a final answer",
            self.config.max_iterations
        )))
    }

    /// Requirement decomposition: ask for a structured JSON plan and spawn
    /// child tasks with index-based dependencies.
    async fn plan_requirement(&self, task: &Task) -> DomainResult<String> {
        let request = ChatRequest::new(vec![
            ChatMessage::system(
                "You are a planning agent. Decompose the requirement into executable tasks. \
                 Respond with ONLY a JSON array; each element: \
                 {\"title\": string, \"intent\": string, \"role\": string|null, \
                  \"depends_on\": [array indices of prerequisite tasks]}",
            ),
            ChatMessage::user(task_prompt(task)),
        ]);
        let response = self.llm.chat(&request).await?;
        self.record(
            &task.id,
            ThinkingStepType::LlmResponse,
            truncate(&response.content, 1000),
        )
        .await;

        let plan = parse_plan(&response.content).map_err(|e| {
            DomainError::LlmFailure(format!("requirement decomposition unparseable: {e}"))
        })?;
        if plan.is_empty() {
            return Err(DomainError::LlmFailure(
                "requirement decomposition produced no tasks".into(),
            ));
        }

        let mut created_ids: Vec<String> = Vec::with_capacity(plan.len());
        for item in &plan {
            let mut child = Task::new(item.title.clone());
            child.intent = item.intent.clone();
            child.session_id = task.session_id.clone();
            child.parent_task_id = Some(task.id.clone());
            child.priority = TaskPriority::Medium;
            child.dependencies = item
                .depends_on
                .iter()
                .filter_map(|i| created_ids.get(*i).cloned())
                .collect();
            if let Some(role) = item.role.as_deref() {
                child.add_label(format!("{}{role}", labels::WORKFLOW_ROLE));
            }
            for label in &task.labels {
                if label.starts_with(labels::WORKFLOW_INSTANCE)
                    || label.starts_with(labels::WORKFLOW_PHASE)
                    || label.starts_with(labels::WORKFLOW)
                {
                    child.add_label(label.clone());
                }
            }
            let created = self.scheduler.create_task(child).await?;
            created_ids.push(created.id);
        }
        info!(
            agent_id = %self.agent_id,
            task_id = %task.id,
            children = created_ids.len(),
            "Requirement decomposed"
        );
        Ok(format!("decomposed into {} tasks", created_ids.len()))
    }

    // ========================================================================
    // Self-governance watchers
    // ========================================================================

    /// Cast one ballot on each pending topic whose electorate includes us.
    pub async fn poll_votes(&self) -> DomainResult<()> {
        let Some(me) = self.agents.get(&self.agent_id).await? else {
            return Err(DomainError::AgentNotFound(self.agent_id.clone()));
        };
        for topic in self.votes.list_pending().await? {
            if !topic.required_roles.is_empty()
                && !topic.required_roles.iter().any(|r| me.has_role(r))
            {
                continue;
            }
            let already = self
                .votes
                .list_votes(&topic.id)
                .await?
                .iter()
                .any(|v| v.agent_id == self.agent_id);
            if already {
                continue;
            }

            let decision = self.decide_ballot(&topic.subject).await;
            match self
                .votes
                .cast_vote(&topic.id, &self.agent_id, decision, None)
                .await
            {
                Ok(_) => {
                    info!(agent_id = %self.agent_id, topic_id = %topic.id, decision = decision.as_str(), "Ballot cast");
                }
                Err(DomainError::DuplicateVote { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Resolve pending approvals addressed to this agent.
    pub async fn poll_approvals(&self) -> DomainResult<()> {
        for approval in self.approvals.list_pending_for(&self.agent_id).await? {
            let prompt = format!(
                "Approve or reject: task {} (requested by {})",
                approval.task_id, approval.created_by
            );
            let decision = match self.decide_ballot(&prompt).await {
                BallotDecision::Approve => ApprovalDecision::Approved,
                BallotDecision::Reject => ApprovalDecision::Rejected,
                BallotDecision::Abstain => {
                    if self.config.default_vote_on_unclear == BallotDecision::Approve {
                        ApprovalDecision::Approved
                    } else {
                        ApprovalDecision::Rejected
                    }
                }
            };
            self.approvals
                .resolve(&approval.id, decision, Some("agent self-governance".into()))
                .await?;
        }
        Ok(())
    }

    async fn decide_ballot(&self, subject: &str) -> BallotDecision {
        let request = ChatRequest::new(vec![
            ChatMessage::system(
                "You are casting a governance vote. Answer with exactly one word: \
                 approve, reject, or abstain.",
            ),
            ChatMessage::user(subject.to_string()),
        ]);
        match self.llm.chat(&request).await {
            Ok(response) => {
                let lowered = response.content.to_lowercase();
                if lowered.contains("approve") && !lowered.contains("reject") {
                    BallotDecision::Approve
                } else if lowered.contains("reject") {
                    BallotDecision::Reject
                } else if lowered.contains("abstain") {
                    BallotDecision::Abstain
                } else {
                    self.config.default_vote_on_unclear
                }
            }
            Err(e) => {
                warn!(agent_id = %self.agent_id, error = %e, "Vote LLM call failed");
                self.config.default_vote_on_unclear
            }
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn beat(&self) -> DomainResult<()> {
        let Some(mut agent) = self.agents.get(&self.agent_id).await? else {
            return Err(DomainError::AgentNotFound(self.agent_id.clone()));
        };
        agent.last_heartbeat_at = Utc::now();
        self.agents.upsert(&agent).await
    }

    async fn set_status(
        &self,
        status: AgentStatus,
        active_task_id: Option<String>,
    ) -> DomainResult<()> {
        let Some(mut agent) = self.agents.get(&self.agent_id).await? else {
            return Err(DomainError::AgentNotFound(self.agent_id.clone()));
        };
        if agent.status != status {
            agent.status_updated_at = Utc::now();
        }
        agent.status = status;
        agent.active_task_id = active_task_id;
        agent.last_heartbeat_at = Utc::now();
        self.agents.upsert(&agent).await
    }

    async fn record(&self, task_id: &str, step_type: ThinkingStepType, content: String) {
        let step = ThinkingStep::new(task_id, self.agent_id.clone(), step_type, content);
        if let Err(e) = self.thinking.append(&step).await {
            warn!(task_id, error = %e, "Thinking step not persisted");
        }
    }

    fn publish_stream(&self, task: &Task, content: &str, done: bool, error: Option<String>) {
        self.bus.publish(BusEvent::LlmStreamUpdate(LlmStreamUpdate {
            task_id: task.id.clone(),
            agent_id: self.agent_id.clone(),
            content_delta: Some(content.to_string()),
            done,
            error,
        }));
    }

    /// Surface a decomposition failure to the user.
    async fn notify_decomposition_failure(&self, task: &Task, reason: &str) {
        let _ = self
            .notifications
            .notify(
                NotificationLevel::Error,
                "Requirement decomposition failed",
                format!("Task {}: {reason}", task.id),
                task.session_id.as_deref(),
            )
            .await;
    }
}

fn task_prompt(task: &Task) -> String {
    let mut prompt = format!("Task: {}", task.title);
    if !task.intent.is_empty() {
        prompt.push_str(&format!("\nIntent: {}", task.intent));
    }
    if !task.scope.is_empty() {
        prompt.push_str(&format!("\nScope: {}", task.scope));
    }
    prompt
}

/// Drop the oldest non-system messages until the estimated token total
/// fits the budget. Always keeps the system prompt and the latest message.
fn trim_to_budget(messages: &mut Vec<ChatMessage>, budget: usize) {
    let total = |msgs: &[ChatMessage]| msgs.iter().map(ChatMessage::estimated_tokens).sum::<usize>();
    while messages.len() > 2 && total(messages) > budget {
        let dropped = messages.remove(1);
        debug!(
            dropped_tokens = dropped.estimated_tokens(),
            "Context budget exceeded; dropped oldest message"
        );
    }
}

#[derive(Debug, Deserialize)]
struct PlanItem {
    title: String,
    #[serde(default)]
    intent: String,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    depends_on: Vec<usize>,
}

/// Extract the JSON array from an LLM answer (tolerating prose around it).
fn parse_plan(content: &str) -> Result<Vec<PlanItem>, String> {
    let start = content.find('[').ok_or("no JSON array found")?;
    let end = content.rfind(']').ok_or("unterminated JSON array")?;
    if end < start {
        return Err("malformed JSON array".into());
    }
    serde_json::from_str(&content[start..=end]).map_err(|e| e.to_string())
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::llm::{ChatResponse, StopReason, TokenUsage, ToolCall};
    use crate::domain::ports::{ApprovalStore, TaskFilter};
    use crate::infrastructure::llm::MockLlm;
    use crate::infrastructure::memory::MemoryStores;
    use crate::services::testing::{online_agent, test_context};
    use async_trait::async_trait;

    struct EchoTools;

    #[async_trait]
    impl ToolRunner for EchoTools {
        fn specs(&self) -> Vec<crate::domain::ports::llm::ToolSpec> {
            vec![crate::domain::ports::llm::ToolSpec {
                name: "echo".into(),
                description: "Echo the input".into(),
                parameters: serde_json::json!({"type": "object"}),
            }]
        }

        async fn run(
            &self,
            _name: &str,
            arguments: &serde_json::Value,
        ) -> DomainResult<serde_json::Value> {
            Ok(arguments.clone())
        }
    }

    struct Fixture {
        stores: MemoryStores,
        ctx: Arc<crate::services::plugin_bus::PluginContext>,
        runtime: AgentRuntime,
    }

    async fn fixture(agent_id: &str, roles: &[&str], config: AgentRuntimeConfig) -> Fixture {
        let stores = MemoryStores::new();
        let ctx = test_context(&stores);
        online_agent(&stores, agent_id, roles).await;
        let runtime = AgentRuntime::new(
            agent_id,
            stores.agents.clone(),
            stores.tasks.clone(),
            stores.locks.clone(),
            stores.thinking.clone(),
            ctx.scheduler.clone(),
            ctx.approvals.clone(),
            ctx.votes.clone(),
            ctx.messages.clone(),
            ctx.notifications.clone(),
            Arc::new(LlmClient::Mock(MockLlm::new())),
            Arc::new(EchoTools),
            ctx.bus.clone(),
            config,
        );
        Fixture {
            stores,
            ctx,
            runtime,
        }
    }

    fn runtime_with_llm(f: &Fixture, llm: LlmClient) -> AgentRuntime {
        AgentRuntime::new(
            f.runtime.agent_id(),
            f.stores.agents.clone(),
            f.stores.tasks.clone(),
            f.stores.locks.clone(),
            f.stores.thinking.clone(),
            f.ctx.scheduler.clone(),
            f.ctx.approvals.clone(),
            f.ctx.votes.clone(),
            f.ctx.messages.clone(),
            f.ctx.notifications.clone(),
            Arc::new(llm),
            Arc::new(EchoTools),
            f.ctx.bus.clone(),
            f.runtime.config.clone(),
        )
    }

    #[tokio::test]
    async fn executes_assigned_task_to_completion() {
        let f = fixture("dev-1", &["backend"], AgentRuntimeConfig::default()).await;
        let mock = MockLlm::new();
        mock.push_text("implemented the endpoint").await;
        let runtime = runtime_with_llm(&f, LlmClient::Mock(mock));

        let task = f.ctx.scheduler.create_task(Task::new("build endpoint")).await.unwrap();
        let task = f.ctx.scheduler.assign_to(&task.id, "dev-1").await.unwrap();

        runtime.maybe_pickup(&task).await.unwrap();

        let task = f.stores.tasks.get(&task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(
            task.result_summary.as_deref(),
            Some("implemented the endpoint")
        );
        // Lock released after completion.
        assert!(f
            .stores
            .locks
            .get(&task_lock_resource(&task.id))
            .await
            .unwrap()
            .is_none());
        // Thinking log captured start + response.
        let steps = f.stores.thinking.list_by_task(&task.id).await.unwrap();
        assert!(steps.len() >= 2);
    }

    #[tokio::test]
    async fn tool_loop_round_trips_results() {
        let f = fixture("dev-1", &[], AgentRuntimeConfig::default()).await;
        let mock = MockLlm::new();
        mock.push_response(ChatResponse {
            content: "let me check".into(),
            tool_calls: vec![ToolCall {
                id: "tu_1".into(),
                name: "echo".into(),
                arguments: serde_json::json!({"ping": true}),
            }],
            stop_reason: StopReason::ToolUse,
            usage: TokenUsage::default(),
        })
        .await;
        mock.push_text("done after tool use").await;
        let runtime = runtime_with_llm(&f, LlmClient::Mock(mock));

        let task = f.ctx.scheduler.create_task(Task::new("needs a tool")).await.unwrap();
        let task = f.ctx.scheduler.assign_to(&task.id, "dev-1").await.unwrap();
        runtime.maybe_pickup(&task).await.unwrap();

        let task = f.stores.tasks.get(&task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        let steps = f.stores.thinking.list_by_task(&task.id).await.unwrap();
        assert!(steps
            .iter()
            .any(|s| s.step_type == ThinkingStepType::ToolCall));
        assert!(steps
            .iter()
            .any(|s| s.step_type == ThinkingStepType::ToolResult));
    }

    #[tokio::test]
    async fn failure_requests_takeover_and_excludes_agent() {
        let f = fixture("dev-1", &[], AgentRuntimeConfig::default()).await;
        let mock = MockLlm::new();
        mock.push_error("model exploded").await;
        let runtime = runtime_with_llm(&f, LlmClient::Mock(mock));

        let task = f.ctx.scheduler.create_task(Task::new("doomed")).await.unwrap();
        let task = f.ctx.scheduler.assign_to(&task.id, "dev-1").await.unwrap();
        runtime.maybe_pickup(&task).await.unwrap();

        // Approval to the user, exclusion label, task back to pending.
        let pending = f.stores.approvals.list_pending_for("user").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].task_id, task.id);
        let task = f.stores.tasks.get(&task.id).await.unwrap().unwrap();
        assert!(task.has_label("agent_exclude:dev-1"));
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.assigned_to.is_none());
    }

    #[tokio::test]
    async fn failure_without_takeover_fails_task() {
        let mut config = AgentRuntimeConfig::default();
        config.enable_takeover = false;
        let f = fixture("dev-1", &[], config).await;
        let mock = MockLlm::new();
        mock.push_error("model exploded").await;
        let runtime = runtime_with_llm(&f, LlmClient::Mock(mock));

        let task = f.ctx.scheduler.create_task(Task::new("doomed")).await.unwrap();
        let task = f.ctx.scheduler.assign_to(&task.id, "dev-1").await.unwrap();
        runtime.maybe_pickup(&task).await.unwrap();

        let task = f.stores.tasks.get(&task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn requirement_planner_creates_children_with_index_deps() {
        let f = fixture("planner-1", &["product"], AgentRuntimeConfig::default()).await;
        let mock = MockLlm::new();
        mock.push_text(
            r#"Here is the plan:
            [
              {"title": "Design API", "intent": "schema", "role": "backend", "depends_on": []},
              {"title": "Build UI", "intent": "forms", "role": "frontend", "depends_on": [0]},
              {"title": "Verify", "intent": "e2e", "role": "qa", "depends_on": [0, 1]}
            ]"#,
        )
        .await;
        let runtime = runtime_with_llm(&f, LlmClient::Mock(mock));

        let mut task = Task::new("登录页面");
        task.add_label(labels::REQUIREMENT_ANALYSIS.to_string());
        let task = f.ctx.scheduler.create_task(task).await.unwrap();
        let task = f.ctx.scheduler.assign_to(&task.id, "planner-1").await.unwrap();
        runtime.maybe_pickup(&task).await.unwrap();

        let all = f.stores.tasks.list(&TaskFilter::default()).await.unwrap();
        let children: Vec<_> = all
            .iter()
            .filter(|t| t.parent_task_id.as_deref() == Some(task.id.as_str()))
            .collect();
        assert_eq!(children.len(), 3);
        let verify = children.iter().find(|t| t.title == "Verify").unwrap();
        assert_eq!(verify.dependencies.len(), 2);
        assert_eq!(verify.status, TaskStatus::Blocked);
        let parent = f.stores.tasks.get(&task.id).await.unwrap().unwrap();
        assert_eq!(parent.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn votes_cast_once_per_topic() {
        let f = fixture("dev-1", &["backend"], AgentRuntimeConfig::default()).await;
        let mock = MockLlm::new();
        mock.push_text("approve").await;
        let runtime = runtime_with_llm(&f, LlmClient::Mock(mock));

        let topic = f
            .ctx
            .votes
            .create_topic("merge?", None, crate::domain::models::VoteType::SimpleMajority, vec!["backend".into()], 600)
            .await
            .unwrap();

        runtime.poll_votes().await.unwrap();
        runtime.poll_votes().await.unwrap();
        let votes = f.ctx.votes.list_votes(&topic.id).await.unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].decision, BallotDecision::Approve);
    }

    #[tokio::test]
    async fn unclear_vote_uses_configured_default() {
        let f = fixture("dev-1", &[], AgentRuntimeConfig::default()).await;
        let mock = MockLlm::new();
        mock.push_text("well, it depends on many factors").await;
        let runtime = runtime_with_llm(&f, LlmClient::Mock(mock));

        let topic = f
            .ctx
            .votes
            .create_topic("?", None, crate::domain::models::VoteType::SimpleMajority, vec![], 600)
            .await
            .unwrap();
        runtime.poll_votes().await.unwrap();
        let votes = f.ctx.votes.list_votes(&topic.id).await.unwrap();
        assert_eq!(votes[0].decision, BallotDecision::Abstain);
    }

    #[tokio::test]
    async fn resolves_approvals_addressed_to_self() {
        let f = fixture("lead-1", &[], AgentRuntimeConfig::default()).await;
        let mock = MockLlm::new();
        mock.push_text("approve").await;
        let runtime = runtime_with_llm(&f, LlmClient::Mock(mock));

        let approval = f
            .ctx
            .approvals
            .create("task-1", "dev-2", "lead-1")
            .await
            .unwrap();
        runtime.poll_approvals().await.unwrap();
        let resolved = f.stores.approvals.get(&approval.id).await.unwrap().unwrap();
        assert_eq!(resolved.decision, ApprovalDecision::Approved);
    }

    #[test]
    fn trim_drops_oldest_non_system() {
        let mut messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::user("a".repeat(4000)),
            ChatMessage::user("b".repeat(4000)),
            ChatMessage::user("latest"),
        ];
        trim_to_budget(&mut messages, 1200);
        assert!(messages.len() >= 2);
        assert_eq!(messages[0].content, "sys");
        assert_eq!(messages.last().unwrap().content, "latest");
        assert!(!messages.iter().any(|m| m.content.starts_with('a')));
    }

    #[test]
    fn parse_plan_tolerates_surrounding_prose() {
        let plan = parse_plan("sure thing!\n[{\"title\": \"x\"}]\nthanks").unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].title, "x");
        assert!(parse_plan("no json here").is_err());
    }
}
