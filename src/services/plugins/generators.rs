//! Scenario-specific task generators.
//!
//! A generator expands one phase-entry template into a small pipeline of
//! business tasks with intra-batch dependencies (by index). The registry is
//! an explicit map populated at bootstrap and never mutated afterwards.

use std::collections::HashMap;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::TaskPriority;

/// Input handed to a generator when a phase enters.
#[derive(Debug, Clone)]
pub struct GeneratorInput {
    pub instance_id: String,
    pub workflow_id: String,
    pub session_id: Option<String>,
    pub phase_id: String,
    /// Requirement text from instance metadata, when present.
    pub requirement: String,
}

/// One task in a generated pipeline. `depends_on` refers to indices of
/// earlier specs in the same batch.
#[derive(Debug, Clone)]
pub struct GeneratedTaskSpec {
    pub title: String,
    pub intent: String,
    pub role: Option<String>,
    pub priority: TaskPriority,
    pub labels: Vec<String>,
    pub metadata: serde_json::Value,
    pub depends_on: Vec<usize>,
}

impl GeneratedTaskSpec {
    fn new(title: String, intent: String, role: &str, scenario: &str) -> Self {
        Self {
            title,
            intent,
            role: Some(role.to_string()),
            priority: TaskPriority::Medium,
            labels: vec![
                "workflow:business_task".to_string(),
                format!("scenario:{scenario}"),
            ],
            metadata: serde_json::Value::Null,
            depends_on: Vec::new(),
        }
    }

    fn after(mut self, deps: &[usize]) -> Self {
        self.depends_on = deps.to_vec();
        self
    }

    fn high_priority(mut self) -> Self {
        self.priority = TaskPriority::High;
        self
    }

    fn with_automation(mut self, command: &str) -> Self {
        self.metadata = serde_json::json!({ "automation": { "command": command } });
        self
    }
}

type GeneratorFn = fn(&GeneratorInput) -> Vec<GeneratedTaskSpec>;

/// Registry of named generators. Built once at startup.
pub struct GeneratorRegistry {
    generators: HashMap<&'static str, GeneratorFn>,
}

impl GeneratorRegistry {
    /// The built-in generator set.
    pub fn builtin() -> Self {
        let mut generators: HashMap<&'static str, GeneratorFn> = HashMap::new();
        generators.insert("feature_breakdown", feature_breakdown);
        generators.insert("bugfix_lane", bugfix_lane);
        generators.insert("doc_delivery", doc_delivery);
        generators.insert("ops_hotfix", ops_hotfix);
        generators.insert("test_request", test_request);
        Self { generators }
    }

    /// Expand a named generator.
    pub fn generate(
        &self,
        name: &str,
        input: &GeneratorInput,
    ) -> DomainResult<Vec<GeneratedTaskSpec>> {
        let generator = self.generators.get(name).ok_or_else(|| {
            DomainError::ValidationFailed(format!("unknown task generator: {name}"))
        })?;
        Ok(generator(input))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.generators.contains_key(name)
    }
}

fn subject(input: &GeneratorInput) -> &str {
    if input.requirement.is_empty() {
        "the requirement"
    } else {
        &input.requirement
    }
}

/// Feature pipeline: clarify → frontend + backend → qa → doc.
fn feature_breakdown(input: &GeneratorInput) -> Vec<GeneratedTaskSpec> {
    let s = subject(input);
    vec![
        GeneratedTaskSpec::new(
            format!("Clarify requirement: {s}"),
            format!("Pin down acceptance criteria and scope for {s}"),
            "product",
            "new_feature",
        ),
        GeneratedTaskSpec::new(
            format!("Frontend implementation: {s}"),
            format!("Build the user-facing side of {s}"),
            "frontend",
            "new_feature",
        )
        .after(&[0]),
        GeneratedTaskSpec::new(
            format!("Backend implementation: {s}"),
            format!("Build the service side of {s}"),
            "backend",
            "new_feature",
        )
        .after(&[0]),
        GeneratedTaskSpec::new(
            format!("QA verification: {s}"),
            format!("Verify {s} end to end and wire up automation"),
            "qa",
            "new_feature",
        )
        .after(&[1, 2])
        .with_automation("echo run-regression-suite"),
        GeneratedTaskSpec::new(
            format!("Documentation: {s}"),
            format!("Document {s} for users and operators"),
            "doc",
            "new_feature",
        )
        .after(&[3]),
    ]
}

/// Bugfix pipeline: reproduce → fix → regression guard.
fn bugfix_lane(input: &GeneratorInput) -> Vec<GeneratedTaskSpec> {
    let s = subject(input);
    vec![
        GeneratedTaskSpec::new(
            format!("Reproduce: {s}"),
            format!("Produce a minimal reproduction for {s}"),
            "qa",
            "bug_fix",
        ),
        GeneratedTaskSpec::new(
            format!("Fix: {s}"),
            format!("Land the fix for {s}"),
            "backend",
            "bug_fix",
        )
        .after(&[0]),
        GeneratedTaskSpec::new(
            format!("Regression guard: {s}"),
            format!("Add a regression test covering {s}"),
            "qa",
            "bug_fix",
        )
        .after(&[1])
        .with_automation("echo run-regression-suite"),
    ]
}

/// Documentation pipeline: outline → write → review.
fn doc_delivery(input: &GeneratorInput) -> Vec<GeneratedTaskSpec> {
    let s = subject(input);
    vec![
        GeneratedTaskSpec::new(
            format!("Outline: {s}"),
            format!("Draft the document structure for {s}"),
            "doc",
            "doc_work",
        ),
        GeneratedTaskSpec::new(
            format!("Write: {s}"),
            format!("Write the full document for {s}"),
            "doc",
            "doc_work",
        )
        .after(&[0]),
        GeneratedTaskSpec::new(
            format!("Review: {s}"),
            format!("Review the document for {s}"),
            "product",
            "doc_work",
        )
        .after(&[1]),
    ]
}

/// Hotfix pipeline: diagnose → mitigate → postmortem. Everything is urgent.
fn ops_hotfix(input: &GeneratorInput) -> Vec<GeneratedTaskSpec> {
    let s = subject(input);
    vec![
        GeneratedTaskSpec::new(
            format!("Diagnose incident: {s}"),
            format!("Find the root cause of {s}"),
            "ops",
            "ops_hotfix",
        )
        .high_priority(),
        GeneratedTaskSpec::new(
            format!("Mitigate: {s}"),
            format!("Roll out the mitigation for {s}"),
            "ops",
            "ops_hotfix",
        )
        .after(&[0])
        .high_priority(),
        GeneratedTaskSpec::new(
            format!("Postmortem: {s}"),
            format!("Write the postmortem for {s}"),
            "ops",
            "ops_hotfix",
        )
        .after(&[1]),
    ]
}

/// Test pipeline: design cases → automate.
fn test_request(input: &GeneratorInput) -> Vec<GeneratedTaskSpec> {
    let s = subject(input);
    vec![
        GeneratedTaskSpec::new(
            format!("Design test cases: {s}"),
            format!("Enumerate the cases covering {s}"),
            "qa",
            "test_request",
        ),
        GeneratedTaskSpec::new(
            format!("Automate tests: {s}"),
            format!("Automate the agreed cases for {s}"),
            "qa",
            "test_request",
        )
        .after(&[0])
        .with_automation("echo run-test-suite"),
    ]
}
