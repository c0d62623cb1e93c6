//! Workflow kernel: the phase state machine.
//!
//! The kernel exclusively owns `WorkflowInstance` mutation. Every mutating
//! operation runs under the instance's mutex, then re-evaluates eligibility
//! to a fixpoint: exit gates complete active phases, completed dependencies
//! activate pending phases, and a fully-completed instance completes the
//! workflow. Store writes and event publication happen after the instance
//! lock is released.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Artifact, DefectRecord, DefectSeverity, InstanceStatus, InstanceSummary, PhaseRuntimeState,
    PhaseStatus, TrackedTask, WorkflowDefinition, WorkflowInstance, WorkflowProof,
};
use crate::domain::ports::InstanceStore;
use crate::services::event_bus::{BusEvent, EventBus, TemplateSummary, WorkflowRuntimeEvent};

/// The workflow execution kernel.
pub struct WorkflowKernel {
    definitions: RwLock<HashMap<String, Arc<WorkflowDefinition>>>,
    instances: RwLock<HashMap<String, Arc<Mutex<WorkflowInstance>>>>,
    store: Arc<dyn InstanceStore>,
    bus: Arc<EventBus>,
}

impl WorkflowKernel {
    pub fn new(store: Arc<dyn InstanceStore>, bus: Arc<EventBus>) -> Self {
        Self {
            definitions: RwLock::new(HashMap::new()),
            instances: RwLock::new(HashMap::new()),
            store,
            bus,
        }
    }

    // ========================================================================
    // Definitions
    // ========================================================================

    /// Validate and store a workflow definition.
    pub async fn register_definition(&self, definition: WorkflowDefinition) -> DomainResult<()> {
        definition.validate()?;
        let summary = TemplateSummary {
            id: definition.id.clone(),
            name: definition.name.clone(),
            version: definition.version.clone(),
        };
        {
            let mut defs = self.definitions.write().await;
            defs.insert(definition.id.clone(), Arc::new(definition));
        }
        let summaries = {
            let defs = self.definitions.read().await;
            let mut all: Vec<TemplateSummary> = defs
                .values()
                .map(|d| TemplateSummary {
                    id: d.id.clone(),
                    name: d.name.clone(),
                    version: d.version.clone(),
                })
                .collect();
            all.sort_by(|a, b| a.id.cmp(&b.id));
            all
        };
        info!(workflow_id = %summary.id, version = %summary.version, "Workflow definition registered");
        self.bus.publish(BusEvent::WorkflowTemplateUpdate(summaries));
        Ok(())
    }

    /// Get a registered definition.
    pub async fn definition(&self, workflow_id: &str) -> Option<Arc<WorkflowDefinition>> {
        self.definitions.read().await.get(workflow_id).cloned()
    }

    // ========================================================================
    // Instance lifecycle
    // ========================================================================

    /// Instantiate a workflow: all phases pending, then one activation pass.
    pub async fn create_instance(
        &self,
        workflow_id: &str,
        session_id: Option<String>,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> DomainResult<WorkflowInstance> {
        let definition = self
            .definition(workflow_id)
            .await
            .ok_or_else(|| DomainError::ValidationFailed(format!("unknown workflow: {workflow_id}")))?;

        let mut instance = WorkflowInstance::new(&definition, session_id, metadata);
        let mut events = Vec::new();
        self.reevaluate(&mut instance, &definition, &mut events);

        let snapshot = instance.clone();
        let summary = InstanceSummary::from(&instance);
        {
            let mut instances = self.instances.write().await;
            instances.insert(instance.id.clone(), Arc::new(Mutex::new(instance)));
        }

        info!(
            instance_id = %snapshot.id,
            workflow_id = %snapshot.workflow_id,
            phases = snapshot.phase_state.len(),
            "Workflow instance created"
        );
        self.persist(&snapshot).await;
        for event in events {
            self.bus.publish(BusEvent::Workflow(event));
        }
        self.bus.publish(BusEvent::WorkflowInstancesUpdate(vec![summary]));

        Ok(snapshot)
    }

    /// Remove an instance. Instances are destroyed only on explicit dispose.
    pub async fn dispose_instance(&self, instance_id: &str) -> DomainResult<()> {
        let removed = {
            let mut instances = self.instances.write().await;
            instances.remove(instance_id)
        };
        if removed.is_none() {
            return Err(DomainError::InstanceNotFound(instance_id.to_string()));
        }
        self.store.delete(instance_id).await?;
        info!(instance_id, "Workflow instance disposed");
        Ok(())
    }

    // ========================================================================
    // Recording mutations
    // ========================================================================

    /// Append a decision id to a phase (set semantics).
    pub async fn record_decision(
        &self,
        instance_id: &str,
        phase_id: &str,
        decision_id: &str,
    ) -> DomainResult<()> {
        let decision = decision_id.to_string();
        self.apply(instance_id, |instance, _def, _events| {
            let phase = phase_state_mut(instance, instance_id, phase_id)?;
            if phase.record_decision(&decision) {
                debug!(instance_id, phase_id, decision = %decision, "Decision recorded");
            }
            Ok(())
        })
        .await
    }

    /// Upsert an artifact on a phase.
    pub async fn record_artifact(
        &self,
        instance_id: &str,
        phase_id: &str,
        artifact: Artifact,
    ) -> DomainResult<()> {
        self.apply(instance_id, |instance, _def, _events| {
            let phase = phase_state_mut(instance, instance_id, phase_id)?;
            phase.record_artifact(artifact);
            Ok(())
        })
        .await
    }

    /// Upsert a proof on a phase (re-recording by id replaces).
    pub async fn record_proof(
        &self,
        instance_id: &str,
        phase_id: &str,
        proof: WorkflowProof,
    ) -> DomainResult<()> {
        self.apply(instance_id, |instance, _def, _events| {
            let phase = phase_state_mut(instance, instance_id, phase_id)?;
            phase.record_proof(proof);
            Ok(())
        })
        .await
    }

    /// Overwrite the tracked snapshot of a task on a phase.
    pub async fn update_tracked_task(
        &self,
        instance_id: &str,
        phase_id: &str,
        tracked: TrackedTask,
    ) -> DomainResult<()> {
        self.apply(instance_id, |instance, _def, _events| {
            let phase = phase_state_mut(instance, instance_id, phase_id)?;
            phase.track_task(tracked);
            Ok(())
        })
        .await
    }

    /// Update a defect entry; status `closed` removes it.
    pub async fn update_defect(
        &self,
        instance_id: &str,
        phase_id: &str,
        defect_id: &str,
        status: &str,
        severity: Option<DefectSeverity>,
    ) -> DomainResult<()> {
        let defect_id = defect_id.to_string();
        let status = status.to_string();
        self.apply(instance_id, |instance, _def, _events| {
            let phase = phase_state_mut(instance, instance_id, phase_id)?;
            if status == "closed" {
                phase.open_defects.remove(&defect_id);
            } else {
                let entry = phase
                    .open_defects
                    .entry(defect_id.clone())
                    .or_insert_with(|| DefectRecord {
                        severity: severity.unwrap_or_default(),
                        status: status.clone(),
                    });
                if let Some(sev) = severity {
                    entry.severity = sev;
                }
                entry.status = status.clone();
            }
            Ok(())
        })
        .await
    }

    /// Transition a phase to `blocked` and record the blocker.
    pub async fn block_phase(
        &self,
        instance_id: &str,
        phase_id: &str,
        blocker: &str,
    ) -> DomainResult<()> {
        let blocker = blocker.to_string();
        self.apply(instance_id, |instance, _def, events| {
            let iid = instance.id.clone();
            {
                let phase = phase_state_mut(instance, &iid, phase_id)?;
                phase.status = PhaseStatus::Blocked;
                phase.blockers.push(blocker.clone());
            }
            instance.active_phases.retain(|p| p != phase_id);
            events.push(WorkflowRuntimeEvent::PhaseBlocked {
                instance_id: iid,
                phase_id: phase_id.to_string(),
                blocker: blocker.clone(),
            });
            Ok(())
        })
        .await
    }

    /// Shallow-merge a metadata patch, then re-run the activation pass
    /// (scenario gates may now match).
    pub async fn update_instance_metadata(
        &self,
        instance_id: &str,
        patch: serde_json::Map<String, serde_json::Value>,
    ) -> DomainResult<()> {
        self.apply(instance_id, |instance, _def, _events| {
            for (key, value) in patch {
                instance.metadata.insert(key, value);
            }
            Ok(())
        })
        .await
    }

    // ========================================================================
    // Read APIs
    // ========================================================================

    /// Deep copy of an instance.
    pub async fn get_instance(&self, instance_id: &str) -> DomainResult<WorkflowInstance> {
        let handle = self.instance_handle(instance_id).await?;
        let instance = handle.lock().await;
        Ok(instance.clone())
    }

    /// Deep copies of all instances.
    pub async fn list_instances(&self) -> Vec<WorkflowInstance> {
        let handles: Vec<Arc<Mutex<WorkflowInstance>>> =
            self.instances.read().await.values().cloned().collect();
        let mut result = Vec::with_capacity(handles.len());
        for handle in handles {
            result.push(handle.lock().await.clone());
        }
        result
    }

    /// Deep copy of one phase's runtime state.
    pub async fn get_phase_state(
        &self,
        instance_id: &str,
        phase_id: &str,
    ) -> DomainResult<PhaseRuntimeState> {
        let handle = self.instance_handle(instance_id).await?;
        let instance = handle.lock().await;
        instance
            .phase(phase_id)
            .cloned()
            .ok_or_else(|| DomainError::PhaseNotFound {
                instance: instance_id.to_string(),
                phase: phase_id.to_string(),
            })
    }

    /// First instance bound to the given session, if any.
    pub async fn find_instance_by_session(&self, session_id: &str) -> Option<WorkflowInstance> {
        let handles: Vec<Arc<Mutex<WorkflowInstance>>> =
            self.instances.read().await.values().cloned().collect();
        for handle in handles {
            let instance = handle.lock().await;
            if instance.session_id.as_deref() == Some(session_id) {
                return Some(instance.clone());
            }
        }
        None
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn instance_handle(
        &self,
        instance_id: &str,
    ) -> DomainResult<Arc<Mutex<WorkflowInstance>>> {
        self.instances
            .read()
            .await
            .get(instance_id)
            .cloned()
            .ok_or_else(|| DomainError::InstanceNotFound(instance_id.to_string()))
    }

    /// Run a mutation under the instance lock, re-evaluate to fixpoint,
    /// then persist and publish outside the lock.
    async fn apply<F>(&self, instance_id: &str, mutate: F) -> DomainResult<()>
    where
        F: FnOnce(
            &mut WorkflowInstance,
            &WorkflowDefinition,
            &mut Vec<WorkflowRuntimeEvent>,
        ) -> DomainResult<()>,
    {
        let handle = self.instance_handle(instance_id).await?;
        let workflow_id = { handle.lock().await.workflow_id.clone() };
        let definition = self
            .definition(&workflow_id)
            .await
            .ok_or_else(|| DomainError::ValidationFailed(format!("unknown workflow: {workflow_id}")))?;

        let (snapshot, events, summary) = {
            let mut instance = handle.lock().await;
            let mut events = Vec::new();
            mutate(&mut instance, &definition, &mut events)?;
            self.reevaluate(&mut instance, &definition, &mut events);
            instance.updated_at = Utc::now();
            let summary = InstanceSummary::from(&*instance);
            (instance.clone(), events, summary)
        };

        // I/O only after the per-instance lock is released.
        self.persist(&snapshot).await;
        for event in events {
            self.bus.publish(BusEvent::Workflow(event));
        }
        self.bus.publish(BusEvent::WorkflowInstancesUpdate(vec![summary]));
        Ok(())
    }

    async fn persist(&self, snapshot: &WorkflowInstance) {
        if let Err(e) = self.store.upsert(snapshot).await {
            warn!(instance_id = %snapshot.id, error = %e, "Failed to persist instance snapshot");
        }
    }

    /// Drive the instance to a fixpoint: activate eligible pending phases,
    /// complete active phases whose exit gate is satisfied, and complete
    /// the instance when every phase has completed.
    fn reevaluate(
        &self,
        instance: &mut WorkflowInstance,
        definition: &WorkflowDefinition,
        events: &mut Vec<WorkflowRuntimeEvent>,
    ) {
        loop {
            let mut changed = false;

            // Activation pass, in declaration order.
            let scenarios = instance.scenario_set();
            for phase_def in &definition.phases {
                let Some(phase) = instance.phase_state.get_mut(&phase_def.id) else {
                    continue;
                };
                if phase.status != PhaseStatus::Pending {
                    continue;
                }

                if !phase_def.scenario_tags.is_empty()
                    && !phase_def.scenario_tags.iter().any(|t| scenarios.contains(t))
                {
                    phase
                        .metadata
                        .insert("scenario_pending".into(), serde_json::Value::Bool(true));
                    phase.metadata.insert(
                        "scenario_gate".into(),
                        serde_json::json!(phase_def.scenario_tags),
                    );
                    continue;
                }

                let deps_completed = phase_def.dependencies.iter().all(|dep| {
                    instance
                        .phase_state
                        .get(dep)
                        .map(|d| d.status == PhaseStatus::Completed)
                        .unwrap_or(false)
                });
                if !deps_completed {
                    continue;
                }

                let phase = instance
                    .phase_state
                    .get_mut(&phase_def.id)
                    .expect("phase state exists");
                phase.status = PhaseStatus::Active;
                phase.entered_at = Some(Utc::now());
                phase.metadata.remove("scenario_pending");
                instance.active_phases.push(phase_def.id.clone());
                events.push(WorkflowRuntimeEvent::PhaseEnter {
                    instance_id: instance.id.clone(),
                    workflow_id: instance.workflow_id.clone(),
                    session_id: instance.session_id.clone(),
                    phase_id: phase_def.id.clone(),
                });
                debug!(instance_id = %instance.id, phase_id = %phase_def.id, "Phase entered");
                changed = true;
            }

            // Exit-gate evaluation on active phases.
            for phase_def in &definition.phases {
                let Some(phase) = instance.phase_state.get_mut(&phase_def.id) else {
                    continue;
                };
                if phase.status != PhaseStatus::Active {
                    continue;
                }
                if phase.gate_satisfied(&phase_def.exit) {
                    phase.status = PhaseStatus::Completed;
                    phase.completed_at = Some(Utc::now());
                    instance.active_phases.retain(|p| p != &phase_def.id);
                    events.push(WorkflowRuntimeEvent::PhaseComplete {
                        instance_id: instance.id.clone(),
                        phase_id: phase_def.id.clone(),
                    });
                    info!(instance_id = %instance.id, phase_id = %phase_def.id, "Phase completed");
                    changed = true;
                }
            }

            if !changed {
                break;
            }
        }

        if instance.status == InstanceStatus::Running && instance.all_phases_completed() {
            instance.status = InstanceStatus::Completed;
            instance.completed_at = Some(Utc::now());
            events.push(WorkflowRuntimeEvent::WorkflowCompleted {
                instance_id: instance.id.clone(),
                workflow_id: instance.workflow_id.clone(),
                session_id: instance.session_id.clone(),
            });
            info!(instance_id = %instance.id, "Workflow completed");
        }
    }
}

fn phase_state_mut<'a>(
    instance: &'a mut WorkflowInstance,
    instance_id: &str,
    phase_id: &str,
) -> DomainResult<&'a mut PhaseRuntimeState> {
    instance
        .phase_state
        .get_mut(phase_id)
        .ok_or_else(|| DomainError::PhaseNotFound {
            instance: instance_id.to_string(),
            phase: phase_id.to_string(),
        })
}
