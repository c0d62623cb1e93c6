//! Task domain model.
//!
//! Tasks are discrete units of work executed by agents. They form a DAG
//! through `dependencies`; the scheduler owns all status transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a task in the scheduling pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Eligible for assignment (dependencies met).
    Pending,
    /// Picked up by the scheduler, not yet claimed.
    Queued,
    /// Claimed for a specific agent.
    Assigned,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Waiting on unmet dependencies.
    Blocked,
    /// Suspended (e.g., by a mention interrupt).
    Paused,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Assigned => "assigned",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Paused => "paused",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "queued" => Some(Self::Queued),
            "assigned" => Some(Self::Assigned),
            "running" => Some(Self::Running),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "blocked" => Some(Self::Blocked),
            "paused" => Some(Self::Paused),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[Self::Queued, Self::Assigned, Self::Blocked],
            Self::Queued => &[Self::Assigned, Self::Pending],
            Self::Assigned => &[Self::Running, Self::Pending, Self::Paused],
            Self::Running => &[Self::Completed, Self::Failed, Self::Paused, Self::Pending],
            Self::Blocked => &[Self::Pending],
            Self::Paused => &[Self::Pending],
            Self::Completed => &[],
            Self::Failed => &[],
        }
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Priority level for tasks. Ordering: High > Medium > Low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" | "normal" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// Well-known label prefixes used as a secondary index on tasks.
pub mod labels {
    /// Role required to execute the task.
    pub const WORKFLOW_ROLE: &str = "workflow_role:";
    /// Alternate role prefix accepted by the scheduler.
    pub const ROLE: &str = "role:";
    /// Agents that must not be assigned this task.
    pub const AGENT_EXCLUDE: &str = "agent_exclude:";
    /// Workflow the task belongs to.
    pub const WORKFLOW: &str = "workflow:";
    /// Phase the task belongs to.
    pub const WORKFLOW_PHASE: &str = "workflow_phase:";
    /// Workflow instance the task belongs to.
    pub const WORKFLOW_INSTANCE: &str = "workflow_instance:";
    /// Tracked-task id used by phase exit gates.
    pub const WORKFLOW_TRACK: &str = "workflow_track:";
    /// Marker for auto-generated workflow tasks.
    pub const WORKFLOW_AUTO: &str = "workflow:auto";
    /// Marker for tasks that need a human.
    pub const HUMAN_REQUIRED: &str = "workflow:human_required";
    /// Defect marker; the phase cannot exit while the task is open.
    pub const DEFECT: &str = "defect";
    /// Defect severity.
    pub const SEVERITY: &str = "severity:";
    /// Decision recorded on completion.
    pub const DECISION: &str = "decision:";
    /// Artifact recorded on completion.
    pub const ARTIFACT: &str = "artifact:";
    /// Proof-of-work task marker.
    pub const PROOF_WORK: &str = "proof:work";
    /// Proof-of-agreement task marker.
    pub const PROOF_AGREEMENT: &str = "proof:agreement";
    /// Requirement-analysis tasks route to the decomposition planner.
    pub const REQUIREMENT_ANALYSIS: &str = "requirement_analysis";
}

/// A unit of work tracked by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub session_id: Option<String>,
    pub title: String,
    /// What the task is trying to achieve (free-form).
    pub intent: String,
    /// Boundaries of the work (files, components, constraints).
    pub scope: String,
    pub priority: TaskPriority,
    pub labels: Vec<String>,
    pub status: TaskStatus,
    pub assigned_to: Option<String>,
    pub parent_task_id: Option<String>,
    /// Task ids that must complete before this task can run.
    pub dependencies: Vec<String>,
    pub retry_count: u32,
    pub max_retries: Option<u32>,
    pub timeout_seconds: Option<u64>,
    /// Do not assign before this instant.
    pub run_after: Option<DateTime<Utc>>,
    pub last_started_at: Option<DateTime<Utc>>,
    pub result_summary: Option<String>,
    pub result_details: Option<String>,
    pub created_by: Option<String>,
    /// Free-form metadata bag (automation specs, generator hints).
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Generate a new prefixed task id.
pub fn new_task_id() -> String {
    format!("task-{}", Uuid::new_v4())
}

impl Task {
    /// Create a new pending task with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_task_id(),
            session_id: None,
            title: title.into(),
            intent: String::new(),
            scope: String::new(),
            priority: TaskPriority::default(),
            labels: Vec::new(),
            status: TaskStatus::Pending,
            assigned_to: None,
            parent_task_id: None,
            dependencies: Vec::new(),
            retry_count: 0,
            max_retries: None,
            timeout_seconds: None,
            run_after: None,
            last_started_at: None,
            result_summary: None,
            result_details: None,
            created_by: None,
            metadata: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Add a label if not already present.
    pub fn add_label(&mut self, label: impl Into<String>) {
        let label = label.into();
        if !self.has_label(&label) {
            self.labels.push(label);
        }
    }

    /// First label value for the given prefix, e.g. `label_value("role:")`.
    pub fn label_value(&self, prefix: &str) -> Option<&str> {
        self.labels
            .iter()
            .find_map(|l| l.strip_prefix(prefix))
            .filter(|v| !v.is_empty())
    }

    /// All label values for the given prefix.
    pub fn label_values(&self, prefix: &str) -> Vec<&str> {
        self.labels
            .iter()
            .filter_map(|l| l.strip_prefix(prefix))
            .filter(|v| !v.is_empty())
            .collect()
    }

    /// Role required to execute this task, from `workflow_role:` or `role:` labels.
    pub fn required_role(&self) -> Option<&str> {
        self.label_value(labels::WORKFLOW_ROLE)
            .or_else(|| self.label_value(labels::ROLE))
    }

    /// Agents excluded from assignment via `agent_exclude:` labels.
    pub fn excluded_agents(&self) -> Vec<&str> {
        self.label_values(labels::AGENT_EXCLUDE)
    }

    /// Whether the task may still be retried.
    pub fn can_retry(&self) -> bool {
        match self.max_retries {
            Some(max) => self.retry_count < max,
            None => false,
        }
    }

    /// The workflow instance this task belongs to, if labeled.
    pub fn workflow_instance(&self) -> Option<&str> {
        self.label_value(labels::WORKFLOW_INSTANCE)
    }

    /// The workflow phase this task belongs to, if labeled.
    pub fn workflow_phase(&self) -> Option<&str> {
        self.label_value(labels::WORKFLOW_PHASE)
    }
}
