//! Workflow instance runtime state.
//!
//! A `WorkflowInstance` is the mutable counterpart of a
//! [`super::workflow::WorkflowDefinition`]: one `PhaseRuntimeState` per
//! phase, plus instance-level metadata (scenario set, requirement content).
//! Instances are created and mutated exclusively by the kernel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::governance::WorkflowProof;
use super::workflow::{ExitGate, WorkflowDefinition};

/// Status of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Status of a phase within an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// Waiting on dependencies or a scenario match.
    Pending,
    /// Entered; exit gate not yet satisfied.
    Active,
    /// Exit gate satisfied.
    Completed,
    /// Explicitly blocked; requires intervention.
    Blocked,
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

/// An artifact recorded on a phase. Identity is `id`; upsert replaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

impl Artifact {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            uri: None,
            data: serde_json::Value::Null,
        }
    }
}

/// Snapshot of a task the phase tracks for exit gating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedTask {
    pub id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Severity of a defect blocking phase exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for DefectSeverity {
    fn default() -> Self {
        Self::Medium
    }
}

impl DefectSeverity {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// An open defect entry. Closing a defect removes the entry entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefectRecord {
    pub severity: DefectSeverity,
    pub status: String,
}

/// Runtime state of a single phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRuntimeState {
    pub status: PhaseStatus,
    pub entered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Recorded decision ids (set semantics).
    pub decisions: Vec<String>,
    /// Artifacts keyed by id.
    pub artifacts: HashMap<String, Artifact>,
    /// Proofs, id-unique; re-recording replaces.
    pub proofs: Vec<WorkflowProof>,
    /// Tasks observed for exit gating, keyed by tracked id.
    pub tracked_tasks: HashMap<String, TrackedTask>,
    /// Open defects keyed by defect id.
    pub open_defects: HashMap<String, DefectRecord>,
    pub blockers: Vec<String>,
    /// Free-form phase metadata (scenario_gate, scenario_pending, user_notes).
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Default for PhaseRuntimeState {
    fn default() -> Self {
        Self {
            status: PhaseStatus::Pending,
            entered_at: None,
            completed_at: None,
            decisions: Vec::new(),
            artifacts: HashMap::new(),
            proofs: Vec::new(),
            tracked_tasks: HashMap::new(),
            open_defects: HashMap::new(),
            blockers: Vec::new(),
            metadata: serde_json::Map::new(),
        }
    }
}

impl PhaseRuntimeState {
    /// Append a decision id; returns false when already present.
    pub fn record_decision(&mut self, decision_id: &str) -> bool {
        if self.decisions.iter().any(|d| d == decision_id) {
            return false;
        }
        self.decisions.push(decision_id.to_string());
        true
    }

    /// Upsert an artifact by id.
    pub fn record_artifact(&mut self, artifact: Artifact) {
        self.artifacts.insert(artifact.id.clone(), artifact);
    }

    /// Upsert a proof by id; re-recording replaces the previous record.
    pub fn record_proof(&mut self, proof: WorkflowProof) {
        if let Some(existing) = self.proofs.iter_mut().find(|p| p.id == proof.id) {
            *existing = proof;
        } else {
            self.proofs.push(proof);
        }
    }

    /// Overwrite the tracked snapshot of a task.
    pub fn track_task(&mut self, tracked: TrackedTask) {
        self.tracked_tasks.insert(tracked.id.clone(), tracked);
    }

    /// Whether the exit gate is satisfied by the current phase state.
    pub fn gate_satisfied(&self, gate: &ExitGate) -> bool {
        let decisions_ok = gate
            .require_decisions
            .iter()
            .all(|d| self.decisions.iter().any(|have| have == d));
        let artifacts_ok = gate
            .require_artifacts
            .iter()
            .all(|a| self.artifacts.contains_key(a));
        let created_ok = gate
            .require_tasks_created
            .iter()
            .all(|t| self.tracked_tasks.contains_key(t));
        let completed_ok = gate.require_tasks_completed.iter().all(|t| {
            self.tracked_tasks
                .get(t)
                .map(|tt| tt.status == "completed")
                .unwrap_or(false)
        });
        let defects_ok = match gate.require_defects_open {
            Some(max) => self.open_defects.len() <= max,
            None => true,
        };
        decisions_ok && artifacts_ok && created_ok && completed_ok && defects_ok
    }
}

/// Mutable runtime state for one workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: String,
    pub workflow_id: String,
    pub session_id: Option<String>,
    pub status: InstanceStatus,
    /// Instance metadata; `scenario` holds the classified scenario set,
    /// `requirementContent` the originating requirement text.
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Phase state keyed by phase id.
    pub phase_state: HashMap<String, PhaseRuntimeState>,
    /// Phase ids currently in `active` status, in activation order.
    pub active_phases: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Generate a new prefixed instance id.
pub fn new_instance_id() -> String {
    format!("inst-{}", Uuid::new_v4())
}

impl WorkflowInstance {
    /// Create a fresh instance with every phase pending.
    pub fn new(
        definition: &WorkflowDefinition,
        session_id: Option<String>,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        let phase_state = definition
            .phases
            .iter()
            .map(|p| (p.id.clone(), PhaseRuntimeState::default()))
            .collect();
        Self {
            id: new_instance_id(),
            workflow_id: definition.id.clone(),
            session_id,
            status: InstanceStatus::Running,
            metadata,
            phase_state,
            active_phases: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// The scenario set attached to this instance's metadata.
    pub fn scenario_set(&self) -> HashSet<String> {
        self.metadata
            .get("scenario")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(ToString::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The requirement text the instance was bootstrapped from, if any.
    pub fn requirement_content(&self) -> Option<&str> {
        self.metadata.get("requirementContent").and_then(|v| v.as_str())
    }

    pub fn phase(&self, phase_id: &str) -> Option<&PhaseRuntimeState> {
        self.phase_state.get(phase_id)
    }

    pub fn phase_mut(&mut self, phase_id: &str) -> Option<&mut PhaseRuntimeState> {
        self.phase_state.get_mut(phase_id)
    }

    /// True when every phase has completed.
    pub fn all_phases_completed(&self) -> bool {
        self.phase_state
            .values()
            .all(|p| p.status == PhaseStatus::Completed)
    }
}

/// Lightweight instance summary published on `workflow_instances_update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub id: String,
    pub workflow_id: String,
    pub session_id: Option<String>,
    pub status: InstanceStatus,
    pub active_phases: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&WorkflowInstance> for InstanceSummary {
    fn from(instance: &WorkflowInstance) -> Self {
        Self {
            id: instance.id.clone(),
            workflow_id: instance.workflow_id.clone(),
            session_id: instance.session_id.clone(),
            status: instance.status,
            active_phases: instance.active_phases.clone(),
            updated_at: instance.updated_at,
        }
    }
}
