//! Auto-task plugin.
//!
//! Consumes `phase_enter` events and expands the phase's entry templates
//! into concrete tasks, either directly or through a named generator.
//! Spawned tasks are deduplicated with once-by-label creation
//! (`workflow_auto:<instance>:<phase>:<index>`), so replayed events never
//! double-spawn. The plugin also mirrors workflow-labeled task updates into
//! the kernel's tracked-task map for exit gating.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    task::labels, AutoTaskTemplate, NotificationLevel, Task, TaskPriority, TaskStatus,
    TrackedTask, WorkflowInstance,
};
use crate::domain::ports::{AgentStore, TaskFilter, TaskStore};
use crate::services::event_bus::{BusEvent, WorkflowRuntimeEvent};
use crate::services::plugin_bus::{Plugin, PluginContext};
use crate::services::plugins::generators::{GeneratorInput, GeneratorRegistry};

/// Role assigned when no agent can fill the required one.
const HUMAN_PORTAL_ROLE: &str = "human_portal";

pub struct AutoTaskPlugin {
    generators: GeneratorRegistry,
    /// Phase-enter keys already expanded this process lifetime.
    seen_phases: Mutex<HashSet<String>>,
}

impl AutoTaskPlugin {
    pub fn new() -> Self {
        Self {
            generators: GeneratorRegistry::builtin(),
            seen_phases: Mutex::new(HashSet::new()),
        }
    }

    /// Unique label for the template at `index` of a phase entry.
    fn unique_label(instance_id: &str, phase_id: &str, index: usize) -> String {
        format!("workflow_auto:{instance_id}:{phase_id}:{index}")
    }

    async fn on_phase_enter(
        &self,
        ctx: &PluginContext,
        instance_id: &str,
        phase_id: &str,
    ) -> DomainResult<()> {
        let key = format!("{instance_id}:{phase_id}");
        {
            let mut seen = self.seen_phases.lock().await;
            if !seen.insert(key) {
                return Ok(());
            }
        }

        let instance = ctx.kernel.get_instance(instance_id).await?;
        let Some(definition) = ctx.kernel.definition(&instance.workflow_id).await else {
            warn!(instance_id, "No definition for instance workflow; skipping auto-tasks");
            return Ok(());
        };
        let Some(phase_def) = definition.phase(phase_id) else {
            return Ok(());
        };

        for (index, template) in phase_def.entry.auto_tasks.iter().enumerate() {
            let unique = Self::unique_label(instance_id, phase_id, index);
            if let Some(name) = template.generator.as_deref() {
                self.spawn_generated(ctx, &instance, phase_id, &unique, name)
                    .await?;
            } else {
                self.spawn_single(ctx, &instance, phase_id, &unique, template)
                    .await?;
            }
        }
        Ok(())
    }

    /// Expand a generator into a dependent pipeline of tasks. The root
    /// unique label guards the whole batch.
    async fn spawn_generated(
        &self,
        ctx: &PluginContext,
        instance: &WorkflowInstance,
        phase_id: &str,
        unique: &str,
        generator: &str,
    ) -> DomainResult<()> {
        if ctx.tasks.find_first_by_label(unique).await?.is_some() {
            debug!(unique, "Generator batch already spawned");
            return Ok(());
        }

        let input = GeneratorInput {
            instance_id: instance.id.clone(),
            workflow_id: instance.workflow_id.clone(),
            session_id: instance.session_id.clone(),
            phase_id: phase_id.to_string(),
            requirement: instance.requirement_content().unwrap_or_default().to_string(),
        };
        let specs = self.generators.generate(generator, &input)?;

        let mut created_ids: Vec<String> = Vec::with_capacity(specs.len());
        for (index, spec) in specs.iter().enumerate() {
            let mut task = Task::new(spec.title.clone());
            task.intent = spec.intent.clone();
            task.priority = spec.priority;
            task.session_id = instance.session_id.clone();
            task.metadata = spec.metadata.clone();
            task.dependencies = spec
                .depends_on
                .iter()
                .filter_map(|i| created_ids.get(*i).cloned())
                .collect();

            let role = self
                .resolve_role(ctx, instance, spec.role.as_deref(), &mut task)
                .await?;
            for label in &spec.labels {
                task.add_label(label.clone());
            }
            self.apply_workflow_labels(&mut task, instance, phase_id);
            if let Some(role) = role {
                task.add_label(format!("{}{role}", labels::WORKFLOW_ROLE));
            }
            let batch_label = if index == 0 {
                unique.to_string()
            } else {
                format!("{unique}:{index}")
            };
            let created = ctx
                .scheduler
                .create_task_once_by_label(&batch_label, task)
                .await?;
            created_ids.push(created.id);
        }
        info!(
            instance_id = %instance.id,
            phase_id,
            generator,
            count = created_ids.len(),
            "Generator batch spawned"
        );
        Ok(())
    }

    /// Create one task from a plain template.
    async fn spawn_single(
        &self,
        ctx: &PluginContext,
        instance: &WorkflowInstance,
        phase_id: &str,
        unique: &str,
        template: &AutoTaskTemplate,
    ) -> DomainResult<()> {
        let mut task = Task::new(if template.title.is_empty() {
            format!("{phase_id} task")
        } else {
            template.title.clone()
        });
        task.intent = template.intent.clone();
        task.scope = template.scope.clone();
        task.session_id = instance.session_id.clone();
        task.timeout_seconds = template.timeout_seconds;
        if let Some(priority) = template.priority.as_deref().and_then(TaskPriority::from_str) {
            task.priority = priority;
        }

        let role = self
            .resolve_role(ctx, instance, template.role.as_deref(), &mut task)
            .await?;
        for label in &template.labels {
            task.add_label(label.clone());
        }
        self.apply_workflow_labels(&mut task, instance, phase_id);
        if let Some(role) = role {
            task.add_label(format!("{}{role}", labels::WORKFLOW_ROLE));
        }
        if let Some(track_id) = template.track_id.as_deref() {
            task.add_label(format!("{}{track_id}", labels::WORKFLOW_TRACK));
        }

        ctx.scheduler.create_task_once_by_label(unique, task).await?;
        Ok(())
    }

    /// Resolve the effective role. When no enabled agent carries the
    /// requested role, the task is routed to the human portal and a
    /// warning notification goes out.
    async fn resolve_role(
        &self,
        ctx: &PluginContext,
        instance: &WorkflowInstance,
        role: Option<&str>,
        task: &mut Task,
    ) -> DomainResult<Option<String>> {
        let Some(role) = role else {
            return Ok(None);
        };
        let agents = ctx.agents.list().await?;
        let covered = agents.iter().any(|a| a.is_enabled && a.has_role(role));
        if covered {
            return Ok(Some(role.to_string()));
        }

        task.add_label(labels::HUMAN_REQUIRED.to_string());
        ctx.notifications
            .notify(
                NotificationLevel::Warning,
                "Human required",
                format!(
                    "No agent carries role \"{role}\"; task \"{}\" routed to the human portal",
                    task.title
                ),
                instance.session_id.as_deref(),
            )
            .await?;
        warn!(role, task_title = %task.title, "No agent for role; routing to human portal");
        Ok(Some(HUMAN_PORTAL_ROLE.to_string()))
    }

    fn apply_workflow_labels(
        &self,
        task: &mut Task,
        instance: &WorkflowInstance,
        phase_id: &str,
    ) {
        task.add_label(format!("{}{}", labels::WORKFLOW, instance.workflow_id));
        task.add_label(format!("{}{phase_id}", labels::WORKFLOW_PHASE));
        task.add_label(format!("{}{}", labels::WORKFLOW_INSTANCE, instance.id));
        task.add_label(labels::WORKFLOW_AUTO.to_string());
    }

    /// Mirror workflow-labeled task state into the kernel's tracked tasks.
    async fn sync_tracked(&self, ctx: &PluginContext, tasks: &[Task]) -> DomainResult<()> {
        for task in tasks {
            let (Some(instance_id), Some(phase_id)) =
                (task.workflow_instance(), task.workflow_phase())
            else {
                continue;
            };
            let tracked_id = task
                .label_value(labels::WORKFLOW_TRACK)
                .unwrap_or(&task.id)
                .to_string();
            let result = ctx
                .kernel
                .update_tracked_task(
                    instance_id,
                    phase_id,
                    TrackedTask {
                        id: tracked_id,
                        status: task.status.as_str().to_string(),
                        assignee: task.assigned_to.clone(),
                        labels: task.labels.clone(),
                    },
                )
                .await;
            if let Err(e) = result {
                debug!(task_id = %task.id, error = %e, "Tracked-task sync skipped");
            }
        }
        Ok(())
    }
}

impl Default for AutoTaskPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for AutoTaskPlugin {
    fn id(&self) -> &str {
        "auto_task"
    }

    /// Requeue auto-tasks stuck in `assigned` from a previous run by
    /// releasing their claim.
    async fn start(&self, ctx: &PluginContext) -> DomainResult<()> {
        let stale = ctx
            .tasks
            .list(&TaskFilter {
                status: Some(TaskStatus::Assigned),
                label: Some(labels::WORKFLOW_AUTO.to_string()),
                ..Default::default()
            })
            .await?;
        for task in stale {
            let Some(holder) = task.assigned_to.clone() else {
                continue;
            };
            info!(task_id = %task.id, holder = %holder, "Requeuing stale auto-task");
            ctx.scheduler.release_task_claim(&task.id, &holder).await?;
        }
        Ok(())
    }

    async fn handle_event(&self, ctx: &PluginContext, event: &BusEvent) -> DomainResult<()> {
        match event {
            BusEvent::Workflow(WorkflowRuntimeEvent::PhaseEnter {
                instance_id,
                phase_id,
                ..
            }) => self.on_phase_enter(ctx, instance_id, phase_id).await,
            BusEvent::TasksUpdate(tasks) => self.sync_tracked(ctx, tasks).await,
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::domain::models::workflow::{
        ExitGate, PhaseDefinition, PhaseEntry, WorkflowDefinition,
    };
    use crate::domain::ports::NotificationStore;
    use crate::infrastructure::memory::MemoryStores;
    use crate::services::plugin_bus::PluginContext;
    use crate::services::testing::{online_agent, test_context};

    fn generator_definition() -> WorkflowDefinition {
        WorkflowDefinition {
            id: "wf".into(),
            name: "wf".into(),
            version: "1".into(),
            phases: vec![PhaseDefinition {
                id: "build".into(),
                title: "Build".into(),
                dependencies: vec![],
                scenario_tags: vec![],
                entry: PhaseEntry {
                    auto_tasks: vec![AutoTaskTemplate {
                        generator: Some("feature_breakdown".into()),
                        ..Default::default()
                    }],
                },
                exit: ExitGate {
                    require_decisions: vec!["never".into()],
                    ..Default::default()
                },
            }],
            description: None,
        }
    }

    async fn enter_event(
        ctx: &Arc<PluginContext>,
        requirement: &str,
    ) -> (WorkflowInstance, BusEvent) {
        ctx.kernel
            .register_definition(generator_definition())
            .await
            .unwrap();
        let mut metadata = serde_json::Map::new();
        metadata.insert("scenario".into(), serde_json::json!(["new_feature"]));
        metadata.insert("requirementContent".into(), serde_json::json!(requirement));
        let instance = ctx
            .kernel
            .create_instance("wf", Some("sess-1".into()), metadata)
            .await
            .unwrap();
        let event = BusEvent::Workflow(WorkflowRuntimeEvent::PhaseEnter {
            instance_id: instance.id.clone(),
            workflow_id: "wf".into(),
            session_id: Some("sess-1".into()),
            phase_id: "build".into(),
        });
        (instance, event)
    }

    #[tokio::test]
    async fn feature_breakdown_spawns_labeled_pipeline() {
        let stores = MemoryStores::new();
        let ctx = test_context(&stores);
        for (id, role) in [
            ("p-1", "product"),
            ("fe-1", "frontend"),
            ("be-1", "backend"),
            ("qa-1", "qa"),
            ("doc-1", "doc"),
        ] {
            online_agent(&stores, id, &[role]).await;
        }
        let plugin = AutoTaskPlugin::new();
        let (instance, event) = enter_event(&ctx, "登录页面").await;

        plugin.handle_event(&ctx, &event).await.unwrap();

        let tasks = stores
            .tasks
            .list(&TaskFilter::by_label("workflow:business_task"))
            .await
            .unwrap();
        assert_eq!(tasks.len(), 5);
        for task in &tasks {
            assert!(task.has_label("scenario:new_feature"));
            assert!(task.has_label("workflow:auto"));
            assert!(task.has_label(&format!("workflow_instance:{}", instance.id)));
            assert!(task.has_label("workflow_phase:build"));
        }
        let qa = tasks
            .iter()
            .find(|t| t.required_role() == Some("qa"))
            .expect("qa task");
        let command = qa
            .metadata
            .pointer("/automation/command")
            .and_then(|v| v.as_str())
            .unwrap();
        assert!(command.starts_with("echo"));
        // qa depends on both implementation tasks.
        assert_eq!(qa.dependencies.len(), 2);
        assert_eq!(qa.status, TaskStatus::Blocked);
    }

    #[tokio::test]
    async fn replayed_phase_enter_does_not_duplicate() {
        let stores = MemoryStores::new();
        let ctx = test_context(&stores);
        online_agent(&stores, "fe-1", &["frontend", "backend", "qa", "doc", "product"]).await;
        let (_, event) = enter_event(&ctx, "登录页面").await;

        // Two plugin instances simulate a restart; label dedupe must hold.
        let plugin_a = AutoTaskPlugin::new();
        let plugin_b = AutoTaskPlugin::new();
        plugin_a.handle_event(&ctx, &event).await.unwrap();
        plugin_a.handle_event(&ctx, &event).await.unwrap();
        plugin_b.handle_event(&ctx, &event).await.unwrap();

        let tasks = stores
            .tasks
            .list(&TaskFilter::by_label("workflow:business_task"))
            .await
            .unwrap();
        assert_eq!(tasks.len(), 5);
    }

    #[tokio::test]
    async fn missing_role_routes_to_human_portal() {
        let stores = MemoryStores::new();
        let ctx = test_context(&stores);
        // No agents registered at all.
        let plugin = AutoTaskPlugin::new();
        let (_, event) = enter_event(&ctx, "登录页面").await;

        plugin.handle_event(&ctx, &event).await.unwrap();

        let tasks = stores
            .tasks
            .list(&TaskFilter::by_label("workflow:human_required"))
            .await
            .unwrap();
        assert_eq!(tasks.len(), 5);
        for task in &tasks {
            assert_eq!(task.required_role(), Some("human_portal"));
        }
        let unread = stores.notifications.list_unread().await.unwrap();
        assert!(!unread.is_empty());
    }

    #[tokio::test]
    async fn tasks_update_syncs_tracked_tasks() {
        let stores = MemoryStores::new();
        let ctx = test_context(&stores);
        online_agent(&stores, "all-1", &["frontend", "backend", "qa", "doc", "product"]).await;
        let plugin = AutoTaskPlugin::new();
        let (instance, event) = enter_event(&ctx, "登录页面").await;
        plugin.handle_event(&ctx, &event).await.unwrap();

        let tasks = stores
            .tasks
            .list(&TaskFilter::by_label("workflow:business_task"))
            .await
            .unwrap();
        plugin
            .handle_event(&ctx, &BusEvent::TasksUpdate(tasks.clone()))
            .await
            .unwrap();

        let state = ctx
            .kernel
            .get_phase_state(&instance.id, "build")
            .await
            .unwrap();
        assert_eq!(state.tracked_tasks.len(), 5);
    }

    #[tokio::test]
    async fn stale_assigned_auto_tasks_requeued_on_start() {
        let stores = MemoryStores::new();
        let ctx = test_context(&stores);
        let mut task = Task::new("leftover");
        task.add_label("workflow:auto");
        task.status = TaskStatus::Assigned;
        task.assigned_to = Some("dev-1".into());
        stores.tasks.insert(&task).await.unwrap();

        let plugin = AutoTaskPlugin::new();
        plugin.start(&ctx).await.unwrap();

        let task = stores.tasks.get(&task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.assigned_to.is_none());
    }
}
