//! Workflow definition domain model.
//!
//! A `WorkflowDefinition` is an immutable, validated template: an ordered
//! list of phases whose dependency edges form a DAG. Definitions are loaded
//! from JSON templates and registered with the kernel; runtime state lives
//! in [`super::instance::WorkflowInstance`].

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::domain::errors::{DomainError, DomainResult};

/// A task template evaluated on phase entry by the auto-task plugin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoTaskTemplate {
    /// Named generator to invoke instead of creating a single task
    /// (feature_breakdown, bugfix_lane, doc_delivery, ops_hotfix, test_request).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<String>,
    /// Title for a single-task template.
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub scope: String,
    /// Role required to execute the spawned task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    /// Stable id under which the spawned task is tracked by exit gates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

/// Entry contract of a phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseEntry {
    /// Task templates spawned when the phase activates.
    #[serde(default)]
    pub auto_tasks: Vec<AutoTaskTemplate>,
}

/// Exit gate of a phase. The phase completes only when every listed
/// requirement holds and the open defect count is within the threshold.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExitGate {
    #[serde(default)]
    pub require_decisions: Vec<String>,
    #[serde(default)]
    pub require_artifacts: Vec<String>,
    /// Tracked-task ids that must exist.
    #[serde(default)]
    pub require_tasks_created: Vec<String>,
    /// Tracked-task ids that must be completed.
    #[serde(default)]
    pub require_tasks_completed: Vec<String>,
    /// Maximum number of open defects tolerated (None = unlimited).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_defects_open: Option<usize>,
}

impl ExitGate {
    /// An exit gate with no requirements completes as soon as it is checked.
    pub fn is_empty(&self) -> bool {
        self.require_decisions.is_empty()
            && self.require_artifacts.is_empty()
            && self.require_tasks_created.is_empty()
            && self.require_tasks_completed.is_empty()
            && self.require_defects_open.is_none()
    }
}

/// Definition of a single phase within a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseDefinition {
    /// Unique phase identifier within the definition (e.g. "clarify").
    pub id: String,
    /// Human-readable phase title.
    pub title: String,
    /// Phase ids that must complete before this phase activates.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Scenario tags gating activation; empty means always eligible.
    #[serde(default)]
    pub scenario_tags: Vec<String>,
    #[serde(default)]
    pub entry: PhaseEntry,
    #[serde(default)]
    pub exit: ExitGate,
}

/// An immutable workflow template: ordered phases plus dependency edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    pub version: String,
    pub phases: Vec<PhaseDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl WorkflowDefinition {
    /// Look up a phase by id.
    pub fn phase(&self, phase_id: &str) -> Option<&PhaseDefinition> {
        self.phases.iter().find(|p| p.id == phase_id)
    }

    /// Validate the definition for registration.
    ///
    /// Rejects: missing id/version, empty phase list, duplicate phase ids,
    /// duplicate or dangling dependencies, self-dependencies, and cycles.
    pub fn validate(&self) -> DomainResult<()> {
        if self.id.is_empty() {
            return Err(DomainError::DefinitionInvalid("missing workflow id".into()));
        }
        if self.version.is_empty() {
            return Err(DomainError::DefinitionInvalid(format!(
                "workflow {} has no version",
                self.id
            )));
        }
        if self.phases.is_empty() {
            return Err(DomainError::DefinitionInvalid(format!(
                "workflow {} has no phases",
                self.id
            )));
        }

        let mut ids = HashSet::new();
        for phase in &self.phases {
            if !ids.insert(phase.id.as_str()) {
                return Err(DomainError::DefinitionInvalid(format!(
                    "duplicate phase id: {}",
                    phase.id
                )));
            }
        }

        for phase in &self.phases {
            let mut seen = HashSet::new();
            for dep in &phase.dependencies {
                if dep == &phase.id {
                    return Err(DomainError::DefinitionInvalid(format!(
                        "phase {} depends on itself",
                        phase.id
                    )));
                }
                if !ids.contains(dep.as_str()) {
                    return Err(DomainError::DefinitionInvalid(format!(
                        "phase {} depends on unknown phase {}",
                        phase.id, dep
                    )));
                }
                if !seen.insert(dep.as_str()) {
                    return Err(DomainError::DefinitionInvalid(format!(
                        "phase {} lists dependency {} twice",
                        phase.id, dep
                    )));
                }
            }
        }

        self.check_acyclic()
    }

    /// Kahn's algorithm over the dependency edges; errors on a cycle.
    fn check_acyclic(&self) -> DomainResult<()> {
        let mut in_degree: HashMap<&str, usize> =
            self.phases.iter().map(|p| (p.id.as_str(), 0)).collect();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for phase in &self.phases {
            for dep in &phase.dependencies {
                *in_degree.entry(phase.id.as_str()).or_default() += 1;
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(phase.id.as_str());
            }
        }

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|&(_, &deg)| deg == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut visited = 0usize;
        while let Some(node) = queue.pop_front() {
            visited += 1;
            if let Some(next) = dependents.get(node) {
                for succ in next {
                    if let Some(deg) = in_degree.get_mut(succ) {
                        *deg -= 1;
                        if *deg == 0 {
                            queue.push_back(*succ);
                        }
                    }
                }
            }
        }

        if visited != self.phases.len() {
            return Err(DomainError::DefinitionInvalid(format!(
                "cycle detected in phase dependencies of workflow {}",
                self.id
            )));
        }
        Ok(())
    }
}
