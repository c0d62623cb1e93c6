//! Lane plugins: clarifier, planner, builder.
//!
//! Each lane watches `tasks_update` for completed tasks in its phase and
//! records that lane's decisions and artifacts on the kernel. A one-shot
//! set per instance prevents re-firing when further tasks of the same
//! phase complete.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Artifact, Task, TaskStatus};
use crate::services::event_bus::BusEvent;
use crate::services::plugin_bus::{Plugin, PluginContext};

/// A phase-watching plugin recording fixed decisions and artifacts.
pub struct LanePlugin {
    id: &'static str,
    phase: &'static str,
    decisions: &'static [&'static str],
    artifacts: &'static [&'static str],
    seen_instances: Mutex<HashSet<String>>,
}

impl LanePlugin {
    fn new(
        id: &'static str,
        phase: &'static str,
        decisions: &'static [&'static str],
        artifacts: &'static [&'static str],
    ) -> Self {
        Self {
            id,
            phase,
            decisions,
            artifacts,
            seen_instances: Mutex::new(HashSet::new()),
        }
    }

    /// Clarify lane: scope decision plus acceptance criteria.
    pub fn clarifier() -> Self {
        Self::new(
            "clarifier",
            "clarify",
            &["clarified_scope"],
            &["acceptance_criteria"],
        )
    }

    /// Planning lane: architecture sign-off plus generated task sets.
    pub fn planner() -> Self {
        Self::new(
            "planner",
            "plan",
            &["architecture_signoff"],
            &["design_tasks_generated", "implementation_tasks_generated"],
        )
    }

    /// Build lane: implementation completion artifact.
    pub fn builder() -> Self {
        Self::new("builder", "build", &[], &["implementation_complete"])
    }

    async fn on_completed(&self, ctx: &PluginContext, task: &Task) -> DomainResult<()> {
        let Some(instance_id) = task.workflow_instance() else {
            return Ok(());
        };
        if task.workflow_phase() != Some(self.phase) {
            return Ok(());
        }
        {
            let mut seen = self.seen_instances.lock().await;
            if !seen.insert(instance_id.to_string()) {
                return Ok(());
            }
        }

        for decision in self.decisions {
            ctx.kernel
                .record_decision(instance_id, self.phase, decision)
                .await?;
        }
        for artifact_id in self.artifacts {
            let mut artifact = Artifact::new(*artifact_id);
            artifact.data = serde_json::json!({ "source_task": task.id });
            ctx.kernel
                .record_artifact(instance_id, self.phase, artifact)
                .await?;
        }
        info!(
            plugin_id = self.id,
            instance_id,
            phase = self.phase,
            "Lane outputs recorded"
        );
        Ok(())
    }
}

#[async_trait]
impl Plugin for LanePlugin {
    fn id(&self) -> &str {
        self.id
    }

    async fn handle_event(&self, ctx: &PluginContext, event: &BusEvent) -> DomainResult<()> {
        let BusEvent::TasksUpdate(tasks) = event else {
            return Ok(());
        };
        for task in tasks {
            if task.status == TaskStatus::Completed {
                self.on_completed(ctx, task).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::workflow::{
        ExitGate, PhaseDefinition, PhaseEntry, WorkflowDefinition,
    };
    use crate::infrastructure::memory::MemoryStores;
    use crate::services::testing::test_context;

    fn clarify_definition() -> WorkflowDefinition {
        WorkflowDefinition {
            id: "wf".into(),
            name: "wf".into(),
            version: "1".into(),
            phases: vec![PhaseDefinition {
                id: "clarify".into(),
                title: "Clarify".into(),
                dependencies: vec![],
                scenario_tags: vec![],
                entry: PhaseEntry::default(),
                exit: ExitGate {
                    require_decisions: vec!["clarified_scope".into()],
                    require_artifacts: vec!["acceptance_criteria".into()],
                    ..Default::default()
                },
            }],
            description: None,
        }
    }

    #[tokio::test]
    async fn clarifier_records_and_completes_phase() {
        let stores = MemoryStores::new();
        let ctx = test_context(&stores);
        ctx.kernel
            .register_definition(clarify_definition())
            .await
            .unwrap();
        let instance = ctx
            .kernel
            .create_instance("wf", None, serde_json::Map::new())
            .await
            .unwrap();

        let mut task = Task::new("clarify work");
        task.add_label(format!("workflow_instance:{}", instance.id));
        task.add_label("workflow_phase:clarify");
        task.status = TaskStatus::Completed;

        let plugin = LanePlugin::clarifier();
        plugin
            .handle_event(&ctx, &BusEvent::TasksUpdate(vec![task.clone()]))
            .await
            .unwrap();
        // Re-delivery is a no-op.
        plugin
            .handle_event(&ctx, &BusEvent::TasksUpdate(vec![task]))
            .await
            .unwrap();

        let state = ctx
            .kernel
            .get_phase_state(&instance.id, "clarify")
            .await
            .unwrap();
        assert_eq!(state.decisions, vec!["clarified_scope"]);
        assert!(state.artifacts.contains_key("acceptance_criteria"));
        assert_eq!(
            state.status,
            crate::domain::models::PhaseStatus::Completed
        );
    }

    #[tokio::test]
    async fn other_phase_tasks_ignored() {
        let stores = MemoryStores::new();
        let ctx = test_context(&stores);
        ctx.kernel
            .register_definition(clarify_definition())
            .await
            .unwrap();
        let instance = ctx
            .kernel
            .create_instance("wf", None, serde_json::Map::new())
            .await
            .unwrap();

        let mut task = Task::new("build work");
        task.add_label(format!("workflow_instance:{}", instance.id));
        task.add_label("workflow_phase:build");
        task.status = TaskStatus::Completed;

        LanePlugin::clarifier()
            .handle_event(&ctx, &BusEvent::TasksUpdate(vec![task]))
            .await
            .unwrap();
        let state = ctx
            .kernel
            .get_phase_state(&instance.id, "clarify")
            .await
            .unwrap();
        assert!(state.decisions.is_empty());
    }
}
