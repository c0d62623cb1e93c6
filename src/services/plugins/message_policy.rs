//! Message policy plugin.
//!
//! Classifies each new blackboard message into a scenario, merges the
//! scenario into the session's workflow metadata, then evaluates routing
//! policies in descending priority. Matching policies fire their actions
//! in order: mention interrupts, deduplicated task creation, notifications,
//! and requirement marking (which bootstraps a workflow instance for the
//! session).

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    scenario::{classify, scenario_tag},
    task::labels,
    BlackboardMessage, MessagePolicy, MessageType, NotificationLevel, PolicyAction,
    PolicyConditions, PolicyType, Task, TaskPriority, TaskStatus,
};
use crate::domain::ports::{AgentStore, TaskStore};
use crate::services::event_bus::BusEvent;
use crate::services::plugin_bus::{Plugin, PluginContext};

/// Tag marking a message as the requirement that bootstrapped a workflow.
const REQUIREMENT_TAG: &str = "workflow:requirement";

/// The built-in policy set: mention interrupts outrank requirement intake.
pub fn default_policies() -> Vec<MessagePolicy> {
    vec![
        MessagePolicy {
            id: "mention-interrupt".into(),
            name: "Mention interrupt".into(),
            policy_type: PolicyType::MessageRouter,
            enabled: true,
            priority: 100,
            conditions: PolicyConditions {
                require_mentions: true,
                ..Default::default()
            },
            actions: vec![PolicyAction::InterruptMentions],
        },
        MessagePolicy {
            id: "requirement-intake".into(),
            name: "Requirement intake".into(),
            policy_type: PolicyType::MessageRouter,
            enabled: true,
            priority: 50,
            conditions: PolicyConditions {
                message_types: vec![MessageType::Chat, MessageType::Requirement],
                require_user: true,
                exclude_tags: vec![REQUIREMENT_TAG.into()],
                ..Default::default()
            },
            actions: vec![PolicyAction::MarkRequirement],
        },
    ]
}

pub struct MessagePolicyPlugin {
    policies: Vec<MessagePolicy>,
    seen_messages: Mutex<HashSet<String>>,
}

impl MessagePolicyPlugin {
    pub fn new(mut policies: Vec<MessagePolicy>) -> Self {
        policies.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self {
            policies,
            seen_messages: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(default_policies())
    }

    async fn on_message(&self, ctx: &PluginContext, message: &BlackboardMessage) -> DomainResult<()> {
        {
            let mut seen = self.seen_messages.lock().await;
            if !seen.insert(message.id.clone()) {
                return Ok(());
            }
        }

        // 1. Scenario classification + metadata enrichment. Work from the
        // stored copy so prior enrichment is never clobbered.
        let mut message = ctx
            .messages
            .get(&message.id)
            .await?
            .unwrap_or_else(|| message.clone());
        let scenario = classify(&message.content);
        let tag = scenario_tag(scenario);
        if !message.has_tag(&tag) {
            message.tags.push(tag);
            ctx.messages.update_tags(&message.id, &message.tags).await?;
        }
        self.merge_session_scenario(ctx, &message, scenario).await?;

        // 2. Policy evaluation, descending priority, failures isolated.
        for policy in &self.policies {
            if !policy.enabled || policy.policy_type != PolicyType::MessageRouter {
                continue;
            }
            if !policy.conditions.matches(&message) {
                continue;
            }
            debug!(policy_id = %policy.id, message_id = %message.id, "Policy matched");
            if let Err(e) = self.execute(ctx, policy, &message, scenario).await {
                warn!(
                    policy_id = %policy.id,
                    message_id = %message.id,
                    error = %e,
                    "Policy execution failed"
                );
            }
        }
        Ok(())
    }

    /// Merge the classified scenario into the session instance's metadata
    /// (deduplicated). Re-running the kernel's activation pass may now
    /// satisfy scenario gates.
    async fn merge_session_scenario(
        &self,
        ctx: &PluginContext,
        message: &BlackboardMessage,
        scenario: &str,
    ) -> DomainResult<()> {
        let Some(instance) = ctx.kernel.find_instance_by_session(&message.session_id).await
        else {
            return Ok(());
        };
        let mut scenarios = instance.scenario_set();
        if !scenarios.insert(scenario.to_string()) {
            return Ok(());
        }
        let mut sorted: Vec<String> = scenarios.into_iter().collect();
        sorted.sort();
        let mut patch = serde_json::Map::new();
        patch.insert("scenario".into(), serde_json::json!(sorted));
        ctx.kernel.update_instance_metadata(&instance.id, patch).await
    }

    async fn execute(
        &self,
        ctx: &PluginContext,
        policy: &MessagePolicy,
        message: &BlackboardMessage,
        scenario: &str,
    ) -> DomainResult<()> {
        for action in &policy.actions {
            match action {
                PolicyAction::InterruptMentions => {
                    self.interrupt_mentions(ctx, message).await?;
                }
                PolicyAction::CreateTask {
                    title,
                    role,
                    priority,
                    per_mention,
                } => {
                    if *per_mention && !message.mentions.is_empty() {
                        for mention in &message.mentions {
                            self.create_policy_task(
                                ctx,
                                policy,
                                message,
                                title.as_deref(),
                                role.as_deref(),
                                *priority,
                                Some(mention),
                            )
                            .await?;
                        }
                    } else {
                        self.create_policy_task(
                            ctx,
                            policy,
                            message,
                            title.as_deref(),
                            role.as_deref(),
                            *priority,
                            None,
                        )
                        .await?;
                    }
                }
                PolicyAction::Notify { level, title } => {
                    ctx.notifications
                        .notify(
                            *level,
                            title.clone().unwrap_or_else(|| policy.name.clone()),
                            message.content.clone(),
                            Some(&message.session_id),
                        )
                        .await?;
                }
                PolicyAction::MarkRequirement => {
                    self.mark_requirement(ctx, message, scenario).await?;
                }
            }
        }
        Ok(())
    }

    /// For each mentioned agent: pause its active task and hand it a
    /// high-priority mention task, pre-assigned and locked.
    async fn interrupt_mentions(
        &self,
        ctx: &PluginContext,
        message: &BlackboardMessage,
    ) -> DomainResult<()> {
        for mention in &message.mentions {
            let Some(agent) = ctx.agents.get(mention).await? else {
                debug!(mention, "Mentioned agent unknown; skipping");
                continue;
            };

            if let Some(active_id) = agent.active_task_id.as_deref() {
                match ctx
                    .scheduler
                    .update_task_status(active_id, TaskStatus::Paused, Some("mention interrupt"))
                    .await
                {
                    Ok(_) => info!(agent_id = %agent.id, task_id = active_id, "Active task paused"),
                    Err(DomainError::InvalidTransition { .. }) => {}
                    Err(e) => return Err(e),
                }
            }

            let unique = format!("mention:{}:{}", message.id, agent.id);
            if ctx.tasks.find_first_by_label(&unique).await?.is_some() {
                continue;
            }
            let mut task = Task::new(format!("Mention from {}", message.agent_id));
            task.intent = message.content.clone();
            task.session_id = Some(message.session_id.clone());
            task.priority = TaskPriority::High;
            task.add_label(unique.clone());
            let created = ctx.scheduler.create_task_once_by_label(&unique, task).await?;
            ctx.scheduler.assign_to(&created.id, &agent.id).await?;
            info!(agent_id = %agent.id, task_id = %created.id, "Mention task assigned");
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_policy_task(
        &self,
        ctx: &PluginContext,
        policy: &MessagePolicy,
        message: &BlackboardMessage,
        title: Option<&str>,
        role: Option<&str>,
        priority: Option<TaskPriority>,
        mention: Option<&str>,
    ) -> DomainResult<()> {
        let unique = match mention {
            Some(m) => format!("message_policy:{}:{}:{m}", policy.id, message.id),
            None => format!("message_policy:{}:{}", policy.id, message.id),
        };
        let mut task = Task::new(
            title
                .map(ToString::to_string)
                .unwrap_or_else(|| truncate(&message.content, 80)),
        );
        task.intent = message.content.clone();
        task.session_id = Some(message.session_id.clone());
        if let Some(priority) = priority {
            task.priority = priority;
        }
        // Role resolution matches the scheduler's label convention.
        if let Some(role) = role {
            task.add_label(format!("{}{role}", labels::WORKFLOW_ROLE));
        }
        ctx.scheduler.create_task_once_by_label(&unique, task).await?;
        Ok(())
    }

    /// Tag the message as a requirement and bootstrap a workflow instance
    /// for the session when none exists.
    async fn mark_requirement(
        &self,
        ctx: &PluginContext,
        message: &BlackboardMessage,
        scenario: &str,
    ) -> DomainResult<()> {
        let mut tags = message.tags.clone();
        if !tags.iter().any(|t| t == REQUIREMENT_TAG) {
            tags.push(REQUIREMENT_TAG.to_string());
            ctx.messages.update_tags(&message.id, &tags).await?;
        }

        if ctx
            .kernel
            .find_instance_by_session(&message.session_id)
            .await
            .is_some()
        {
            return Ok(());
        }
        if ctx.kernel.definition(&ctx.default_workflow_id).await.is_none() {
            warn!(
                workflow_id = %ctx.default_workflow_id,
                "Default workflow not registered; requirement not bootstrapped"
            );
            return Ok(());
        }

        let mut metadata = serde_json::Map::new();
        metadata.insert("scenario".into(), serde_json::json!([scenario]));
        metadata.insert(
            "requirementContent".into(),
            serde_json::json!(message.content),
        );
        metadata.insert("requirementMessageId".into(), serde_json::json!(message.id));
        let instance = ctx
            .kernel
            .create_instance(
                &ctx.default_workflow_id,
                Some(message.session_id.clone()),
                metadata,
            )
            .await?;
        info!(
            instance_id = %instance.id,
            session_id = %message.session_id,
            scenario,
            "Workflow bootstrapped from requirement"
        );
        ctx.notifications
            .notify(
                NotificationLevel::Info,
                "Workflow started",
                format!("Requirement accepted; workflow instance {}", instance.id),
                Some(&message.session_id),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Plugin for MessagePolicyPlugin {
    fn id(&self) -> &str {
        "message_policy"
    }

    async fn handle_event(&self, ctx: &PluginContext, event: &BusEvent) -> DomainResult<()> {
        let BusEvent::MessagesUpdate(messages) = event else {
            return Ok(());
        };
        for message in messages {
            if let Err(e) = self.on_message(ctx, message).await {
                // Isolation per message: one bad message must not starve
                // the rest of the batch.
                warn!(message_id = %message.id, error = %e, "Message policy failed");
            }
        }
        Ok(())
    }
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
    use crate::domain::models::lock::task_lock_resource;
    use crate::domain::ports::{LockStore, MessageStore, TaskFilter};
    use crate::infrastructure::memory::MemoryStores;
    use crate::services::testing::{online_agent, test_context};

    async fn deliver(
        plugin: &MessagePolicyPlugin,
        ctx: &crate::services::plugin_bus::PluginContext,
        message: &BlackboardMessage,
    ) {
        plugin
            .handle_event(ctx, &BusEvent::MessagesUpdate(vec![message.clone()]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn mention_interrupt_pauses_and_assigns() {
        let stores = MemoryStores::new();
        let ctx = test_context(&stores);
        let mut agent = online_agent(&stores, "dev-1", &["backend"]).await;

        // dev-1 is busy with an assigned task.
        let active = ctx
            .scheduler
            .create_task(Task::new("current work"))
            .await
            .unwrap();
        ctx.scheduler.assign_to(&active.id, "dev-1").await.unwrap();
        agent.active_task_id = Some(active.id.clone());
        stores.agents.upsert(&agent).await.unwrap();

        let message = ctx
            .messages
            .post(BlackboardMessage::new(
                "sess-1",
                "user",
                MessageType::Chat,
                "@dev-1 请修复登录",
            ))
            .await
            .unwrap();

        let plugin = MessagePolicyPlugin::with_defaults();
        deliver(&plugin, &ctx, &message).await;

        let active = stores.tasks.get(&active.id).await.unwrap().unwrap();
        assert_eq!(active.status, TaskStatus::Paused);

        let unique = format!("mention:{}:dev-1", message.id);
        let mention_task = stores.tasks.find_first_by_label(&unique).await.unwrap().unwrap();
        assert_eq!(mention_task.status, TaskStatus::Assigned);
        assert_eq!(mention_task.assigned_to.as_deref(), Some("dev-1"));
        assert_eq!(mention_task.priority, TaskPriority::High);
        let lock = stores
            .locks
            .get(&task_lock_resource(&mention_task.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lock.holder_id, "dev-1");

        // Second evaluation of the same message: no duplicates.
        let fresh = MessagePolicyPlugin::with_defaults();
        deliver(&fresh, &ctx, &message).await;
        let mentions = stores.tasks.list(&TaskFilter::by_label(&unique)).await.unwrap();
        assert_eq!(mentions.len(), 1);
    }

    #[tokio::test]
    async fn message_is_tagged_with_scenario() {
        let stores = MemoryStores::new();
        let ctx = test_context(&stores);
        let message = ctx
            .messages
            .post(BlackboardMessage::new(
                "sess-1",
                "dev-1",
                MessageType::Status,
                "紧急修复线上故障",
            ))
            .await
            .unwrap();

        let plugin = MessagePolicyPlugin::with_defaults();
        deliver(&plugin, &ctx, &message).await;

        let stored = stores.messages.get(&message.id).await.unwrap().unwrap();
        assert!(stored.has_tag("scenario:ops_hotfix"));
    }

    #[tokio::test]
    async fn scenario_merges_into_session_instance_metadata() {
        let stores = MemoryStores::new();
        let ctx = test_context(&stores);
        ctx.kernel
            .register_definition(crate::domain::models::WorkflowDefinition {
                id: "universal_flow_v1".into(),
                name: "Universal".into(),
                version: "1".into(),
                phases: vec![crate::domain::models::PhaseDefinition {
                    id: "intake".into(),
                    title: "Intake".into(),
                    dependencies: vec![],
                    scenario_tags: vec![],
                    entry: Default::default(),
                    exit: crate::domain::models::ExitGate {
                        require_decisions: vec!["done".into()],
                        ..Default::default()
                    },
                }],
                description: None,
            })
            .await
            .unwrap();

        let plugin = MessagePolicyPlugin::with_defaults();
        // First user message bootstraps the instance with its scenario.
        let first = ctx
            .messages
            .post(BlackboardMessage::new(
                "sess-1",
                "user",
                MessageType::Chat,
                "实现登录页面",
            ))
            .await
            .unwrap();
        deliver(&plugin, &ctx, &first).await;
        let instance = ctx.kernel.find_instance_by_session("sess-1").await.unwrap();
        assert!(instance.scenario_set().contains("new_feature"));

        // A later bug message merges its scenario into the set.
        let second = ctx
            .messages
            .post(BlackboardMessage::new(
                "sess-1",
                "user",
                MessageType::Chat,
                "报错了，请修复",
            ))
            .await
            .unwrap();
        deliver(&plugin, &ctx, &second).await;
        let instance = ctx.kernel.find_instance_by_session("sess-1").await.unwrap();
        let scenarios = instance.scenario_set();
        assert!(scenarios.contains("new_feature"));
        assert!(scenarios.contains("bug_fix"));
    }

    #[tokio::test]
    async fn requirement_bootstraps_single_instance() {
        let stores = MemoryStores::new();
        let ctx = test_context(&stores);
        ctx.kernel
            .register_definition(crate::domain::models::WorkflowDefinition {
                id: "universal_flow_v1".into(),
                name: "Universal".into(),
                version: "1".into(),
                phases: vec![crate::domain::models::PhaseDefinition {
                    id: "intake".into(),
                    title: "Intake".into(),
                    dependencies: vec![],
                    scenario_tags: vec![],
                    entry: Default::default(),
                    exit: crate::domain::models::ExitGate {
                        require_decisions: vec!["done".into()],
                        ..Default::default()
                    },
                }],
                description: None,
            })
            .await
            .unwrap();

        let plugin = MessagePolicyPlugin::with_defaults();
        for content in ["实现登录页面", "再加一个注册页面"] {
            let message = ctx
                .messages
                .post(BlackboardMessage::new(
                    "sess-1", "user", MessageType::Chat, content,
                ))
                .await
                .unwrap();
            deliver(&plugin, &ctx, &message).await;
        }
        assert_eq!(ctx.kernel.list_instances().await.len(), 1);
        let message = stores
            .messages
            .list_by_session("sess-1")
            .await
            .unwrap()
            .remove(0);
        assert!(message.has_tag(REQUIREMENT_TAG));
    }
}
