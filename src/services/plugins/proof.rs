//! Proof plugin.
//!
//! On entry to an evidence-bearing phase (verify, delivery), spawns a
//! proof-of-work / proof-of-agreement task pair from a fixed template
//! table. On completion of workflow-labeled tasks it records
//! `WorkflowProof`s on the kernel, persists them, synchronizes defect
//! entries, and forwards `decision:` / `artifact:` labels.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    task::labels, Artifact, DefectSeverity, ProofType, Task, TaskPriority, TaskStatus,
    WorkflowProof,
};
use crate::services::event_bus::{BusEvent, WorkflowRuntimeEvent};
use crate::services::plugin_bus::{Plugin, PluginContext};

/// Phases that carry proof obligations.
const PROOF_PHASES: &[&str] = &["verify", "delivery"];

/// Fixed template table: one work-evidence and one sign-off task per phase.
const PROOF_TASK_TEMPLATES: &[(ProofType, &str, &str, &str)] = &[
    (
        ProofType::Work,
        labels::PROOF_WORK,
        "Collect work evidence",
        "qa",
    ),
    (
        ProofType::Agreement,
        labels::PROOF_AGREEMENT,
        "Sign off on the delivered work",
        "product",
    ),
];

/// Decision recorded when an agreement proof lands.
const QA_SIGNOFF_DECISION: &str = "qa_signoff";

pub struct ProofPlugin;

impl ProofPlugin {
    pub fn new() -> Self {
        Self
    }

    async fn on_phase_enter(
        &self,
        ctx: &PluginContext,
        instance_id: &str,
        phase_id: &str,
    ) -> DomainResult<()> {
        if !PROOF_PHASES.contains(&phase_id) {
            return Ok(());
        }
        let instance = ctx.kernel.get_instance(instance_id).await?;

        for (proof_type, marker, title, role) in PROOF_TASK_TEMPLATES {
            let unique = format!("workflow_proof:{instance_id}:{phase_id}:{}", proof_type.as_str());
            let mut task = Task::new(format!("{title} ({phase_id})"));
            task.session_id = instance.session_id.clone();
            task.priority = TaskPriority::High;
            task.add_label((*marker).to_string());
            task.add_label(format!("{}{}", labels::WORKFLOW, instance.workflow_id));
            task.add_label(format!("{}{phase_id}", labels::WORKFLOW_PHASE));
            task.add_label(format!("{}{instance_id}", labels::WORKFLOW_INSTANCE));
            task.add_label(format!("{}{role}", labels::WORKFLOW_ROLE));
            ctx.scheduler.create_task_once_by_label(&unique, task).await?;
        }
        info!(instance_id, phase_id, "Proof tasks spawned");
        Ok(())
    }

    async fn on_task_update(&self, ctx: &PluginContext, task: &Task) -> DomainResult<()> {
        let (Some(instance_id), Some(phase_id)) =
            (task.workflow_instance(), task.workflow_phase())
        else {
            return Ok(());
        };
        let instance_id = instance_id.to_string();
        let phase_id = phase_id.to_string();

        // Defect synchronisation tracks every status, not just completion.
        if task.has_label(labels::DEFECT) {
            self.sync_defect(ctx, &instance_id, &phase_id, task).await?;
        }

        if task.status != TaskStatus::Completed {
            return Ok(());
        }

        if task.has_label(labels::PROOF_WORK) {
            self.record_proof(ctx, &instance_id, &phase_id, task, ProofType::Work)
                .await?;
        }
        if task.has_label(labels::PROOF_AGREEMENT) {
            self.record_proof(ctx, &instance_id, &phase_id, task, ProofType::Agreement)
                .await?;
            ctx.kernel
                .record_decision(&instance_id, &phase_id, QA_SIGNOFF_DECISION)
                .await?;
        }

        // Forward declarative labels on completed tasks.
        for decision in task.label_values(labels::DECISION) {
            ctx.kernel
                .record_decision(&instance_id, &phase_id, decision)
                .await?;
        }
        for artifact_id in task.label_values(labels::ARTIFACT) {
            let mut artifact = Artifact::new(artifact_id);
            artifact.data = serde_json::json!({ "source_task": task.id });
            ctx.kernel
                .record_artifact(&instance_id, &phase_id, artifact)
                .await?;
        }
        Ok(())
    }

    async fn record_proof(
        &self,
        ctx: &PluginContext,
        instance_id: &str,
        phase_id: &str,
        task: &Task,
        proof_type: ProofType,
    ) -> DomainResult<()> {
        let mut proof = WorkflowProof::for_task(instance_id, phase_id, proof_type, &task.id);

        // Evidence URI: the task result when it looks like one, else the
        // first artifact recorded on the phase.
        let phase_state = ctx.kernel.get_phase_state(instance_id, phase_id).await?;
        let (evidence_uri, evidence_bytes) = match task.result_details.as_deref() {
            Some(details) if looks_like_uri(details) => {
                (Some(details.to_string()), details.as_bytes().to_vec())
            }
            _ => {
                let mut artifacts: Vec<&Artifact> = phase_state.artifacts.values().collect();
                artifacts.sort_by(|a, b| a.id.cmp(&b.id));
                match artifacts.first() {
                    Some(artifact) => (
                        artifact.uri.clone(),
                        serde_json::to_vec(artifact).unwrap_or_default(),
                    ),
                    None => (
                        None,
                        task.result_details
                            .as_deref()
                            .unwrap_or(&task.title)
                            .as_bytes()
                            .to_vec(),
                    ),
                }
            }
        };
        proof.evidence_uri = evidence_uri;
        proof.hash = Some(sha256_hex(&evidence_bytes));
        if let Some(assignee) = task.assigned_to.clone() {
            proof.acknowledgers.push(assignee);
        }

        ctx.kernel
            .record_proof(instance_id, phase_id, proof.clone())
            .await?;
        ctx.proofs.record(&proof).await?;
        debug!(proof_id = %proof.id, proof_type = proof_type.as_str(), "Proof recorded");
        Ok(())
    }

    async fn sync_defect(
        &self,
        ctx: &PluginContext,
        instance_id: &str,
        phase_id: &str,
        task: &Task,
    ) -> DomainResult<()> {
        let severity = task
            .label_value(labels::SEVERITY)
            .and_then(DefectSeverity::from_str);
        let status = if task.status == TaskStatus::Completed {
            "closed"
        } else {
            "open"
        };
        ctx.kernel
            .update_defect(instance_id, phase_id, &task.id, status, severity)
            .await
    }
}

impl Default for ProofPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for ProofPlugin {
    fn id(&self) -> &str {
        "proof"
    }

    async fn handle_event(&self, ctx: &PluginContext, event: &BusEvent) -> DomainResult<()> {
        match event {
            BusEvent::Workflow(WorkflowRuntimeEvent::PhaseEnter {
                instance_id,
                phase_id,
                ..
            }) => self.on_phase_enter(ctx, instance_id, phase_id).await,
            BusEvent::TasksUpdate(tasks) => {
                for task in tasks {
                    self.on_task_update(ctx, task).await?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn looks_like_uri(s: &str) -> bool {
    s.starts_with("http://")
        || s.starts_with("https://")
        || s.starts_with("file://")
        || s.starts_with("s3://")
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::workflow::{
        ExitGate, PhaseDefinition, PhaseEntry, WorkflowDefinition,
    };
    use crate::domain::models::PhaseStatus;
    use crate::domain::ports::{TaskFilter, TaskStore};
    use crate::infrastructure::memory::MemoryStores;
    use crate::services::plugin_bus::PluginContext;
    use crate::services::testing::test_context;
    use std::sync::Arc;

    fn verify_definition() -> WorkflowDefinition {
        WorkflowDefinition {
            id: "wf".into(),
            name: "wf".into(),
            version: "1".into(),
            phases: vec![PhaseDefinition {
                id: "verify".into(),
                title: "Verify".into(),
                dependencies: vec![],
                scenario_tags: vec![],
                entry: PhaseEntry::default(),
                exit: ExitGate {
                    require_decisions: vec![QA_SIGNOFF_DECISION.into()],
                    require_defects_open: Some(0),
                    ..Default::default()
                },
            }],
            description: None,
        }
    }

    async fn setup() -> (MemoryStores, Arc<PluginContext>, String) {
        let stores = MemoryStores::new();
        let ctx = test_context(&stores);
        ctx.kernel
            .register_definition(verify_definition())
            .await
            .unwrap();
        let instance = ctx
            .kernel
            .create_instance("wf", Some("sess-1".into()), serde_json::Map::new())
            .await
            .unwrap();
        (stores, ctx, instance.id)
    }

    fn enter(instance_id: &str) -> BusEvent {
        BusEvent::Workflow(WorkflowRuntimeEvent::PhaseEnter {
            instance_id: instance_id.into(),
            workflow_id: "wf".into(),
            session_id: Some("sess-1".into()),
            phase_id: "verify".into(),
        })
    }

    #[tokio::test]
    async fn phase_enter_spawns_proof_pair_once() {
        let (stores, ctx, instance_id) = setup().await;
        let plugin = ProofPlugin::new();
        plugin.handle_event(&ctx, &enter(&instance_id)).await.unwrap();
        plugin.handle_event(&ctx, &enter(&instance_id)).await.unwrap();

        let work = stores
            .tasks
            .list(&TaskFilter::by_label(labels::PROOF_WORK))
            .await
            .unwrap();
        let agreement = stores
            .tasks
            .list(&TaskFilter::by_label(labels::PROOF_AGREEMENT))
            .await
            .unwrap();
        assert_eq!(work.len(), 1);
        assert_eq!(agreement.len(), 1);
    }

    #[tokio::test]
    async fn completing_proof_tasks_records_proofs_and_signoff() {
        let (stores, ctx, instance_id) = setup().await;
        let plugin = ProofPlugin::new();
        plugin.handle_event(&ctx, &enter(&instance_id)).await.unwrap();

        let mut work = stores
            .tasks
            .list(&TaskFilter::by_label(labels::PROOF_WORK))
            .await
            .unwrap()
            .remove(0);
        work.status = TaskStatus::Completed;
        work.result_details = Some("https://ci.example.com/run/42".into());
        stores.tasks.update(&work).await.unwrap();
        plugin
            .handle_event(&ctx, &BusEvent::TasksUpdate(vec![work.clone()]))
            .await
            .unwrap();

        let state = ctx
            .kernel
            .get_phase_state(&instance_id, "verify")
            .await
            .unwrap();
        assert_eq!(state.proofs.len(), 1);
        assert_eq!(state.proofs[0].proof_type, ProofType::Work);
        assert_eq!(
            state.proofs[0].evidence_uri.as_deref(),
            Some("https://ci.example.com/run/42")
        );
        assert_eq!(state.proofs[0].hash.as_deref().map(str::len), Some(64));
        // Persisted through the proof service too.
        assert!(ctx
            .proofs
            .get(&format!("proof:{}", work.id))
            .await
            .unwrap()
            .is_some());

        let mut agreement = stores
            .tasks
            .list(&TaskFilter::by_label(labels::PROOF_AGREEMENT))
            .await
            .unwrap()
            .remove(0);
        agreement.status = TaskStatus::Completed;
        stores.tasks.update(&agreement).await.unwrap();
        plugin
            .handle_event(&ctx, &BusEvent::TasksUpdate(vec![agreement]))
            .await
            .unwrap();

        let state = ctx
            .kernel
            .get_phase_state(&instance_id, "verify")
            .await
            .unwrap();
        assert!(state.decisions.contains(&QA_SIGNOFF_DECISION.to_string()));
        // qa_signoff satisfied with no open defects: phase exits.
        assert_eq!(state.status, PhaseStatus::Completed);
    }

    #[tokio::test]
    async fn open_defect_blocks_exit_until_closed() {
        let (stores, ctx, instance_id) = setup().await;
        let plugin = ProofPlugin::new();
        plugin.handle_event(&ctx, &enter(&instance_id)).await.unwrap();

        // An open defect task in the phase.
        let mut defect = Task::new("login broken");
        defect.add_label(labels::DEFECT.to_string());
        defect.add_label("severity:high");
        defect.add_label(format!("workflow_instance:{instance_id}"));
        defect.add_label("workflow_phase:verify");
        stores.tasks.insert(&defect).await.unwrap();
        plugin
            .handle_event(&ctx, &BusEvent::TasksUpdate(vec![defect.clone()]))
            .await
            .unwrap();

        // Sign-off lands while the defect is open: the phase must hold.
        let mut agreement = stores
            .tasks
            .list(&TaskFilter::by_label(labels::PROOF_AGREEMENT))
            .await
            .unwrap()
            .remove(0);
        agreement.status = TaskStatus::Completed;
        stores.tasks.update(&agreement).await.unwrap();
        plugin
            .handle_event(&ctx, &BusEvent::TasksUpdate(vec![agreement]))
            .await
            .unwrap();

        let state = ctx
            .kernel
            .get_phase_state(&instance_id, "verify")
            .await
            .unwrap();
        assert_eq!(state.open_defects.len(), 1);
        assert_eq!(state.status, PhaseStatus::Active);

        // Closing the defect releases the gate.
        defect.status = TaskStatus::Completed;
        stores.tasks.update(&defect).await.unwrap();
        plugin
            .handle_event(&ctx, &BusEvent::TasksUpdate(vec![defect]))
            .await
            .unwrap();
        let state = ctx
            .kernel
            .get_phase_state(&instance_id, "verify")
            .await
            .unwrap();
        assert!(state.open_defects.is_empty());
        assert_eq!(state.status, PhaseStatus::Completed);
    }

    #[tokio::test]
    async fn decision_and_artifact_labels_forwarded() {
        let (stores, ctx, instance_id) = setup().await;
        let plugin = ProofPlugin::new();

        let mut task = Task::new("carries labels");
        task.add_label(format!("workflow_instance:{instance_id}"));
        task.add_label("workflow_phase:verify");
        task.add_label("decision:security_review");
        task.add_label("artifact:scan_report");
        task.status = TaskStatus::Completed;
        stores.tasks.insert(&task).await.unwrap();

        plugin
            .handle_event(&ctx, &BusEvent::TasksUpdate(vec![task]))
            .await
            .unwrap();
        let state = ctx
            .kernel
            .get_phase_state(&instance_id, "verify")
            .await
            .unwrap();
        assert!(state.decisions.contains(&"security_review".to_string()));
        assert!(state.artifacts.contains_key("scan_report"));
    }
}
