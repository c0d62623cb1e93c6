//! Workflow template loading.
//!
//! Templates are JSON files referenced by an index
//! (`{"templates": [{"id", "name", "path", "description"?}]}`). A built-in
//! `universal_flow_v1` ships with the binary so a bare workspace still has
//! a working pipeline.

use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::WorkflowDefinition;

const BUILTIN_UNIVERSAL_FLOW: &str = include_str!("../../templates/universal_flow_v1.json");

#[derive(Debug, Deserialize)]
struct TemplateIndexEntry {
    id: String,
    #[allow(dead_code)]
    name: String,
    path: String,
    #[serde(default)]
    #[allow(dead_code)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TemplateIndex {
    templates: Vec<TemplateIndexEntry>,
}

/// Validated workflow definitions available to the kernel.
pub struct TemplateRegistry {
    definitions: Vec<WorkflowDefinition>,
}

impl TemplateRegistry {
    /// The built-in template set.
    pub fn builtin() -> Self {
        let definition: WorkflowDefinition = serde_json::from_str(BUILTIN_UNIVERSAL_FLOW)
            .expect("built-in template is valid JSON");
        Self {
            definitions: vec![definition],
        }
    }

    /// Load templates from an index file; each entry's `path` is resolved
    /// relative to the index's directory. Every definition is validated.
    pub fn load_from_index(index_path: &Path) -> DomainResult<Self> {
        let raw = std::fs::read_to_string(index_path).map_err(|e| {
            DomainError::ConfigError(format!(
                "cannot read template index {}: {e}",
                index_path.display()
            ))
        })?;
        let index: TemplateIndex = serde_json::from_str(&raw).map_err(|e| {
            DomainError::ConfigError(format!("bad template index: {e}"))
        })?;
        let base = index_path.parent().unwrap_or_else(|| Path::new("."));

        let mut definitions = Vec::with_capacity(index.templates.len());
        for entry in &index.templates {
            let path = base.join(&entry.path);
            let raw = std::fs::read_to_string(&path).map_err(|e| {
                DomainError::ConfigError(format!(
                    "cannot read template {} ({}): {e}",
                    entry.id,
                    path.display()
                ))
            })?;
            let definition: WorkflowDefinition = serde_json::from_str(&raw)
                .map_err(|e| DomainError::ConfigError(format!("bad template {}: {e}", entry.id)))?;
            definition.validate()?;
            definitions.push(definition);
        }
        if definitions.is_empty() {
            return Err(DomainError::ConfigError("template index is empty".into()));
        }
        Ok(Self { definitions })
    }

    pub fn definitions(&self) -> &[WorkflowDefinition] {
        &self.definitions
    }

    /// Select a template by id, falling back to the first available one
    /// with a warning.
    pub fn select(&self, template_id: &str) -> &WorkflowDefinition {
        self.definitions
            .iter()
            .find(|d| d.id == template_id)
            .unwrap_or_else(|| {
                let first = &self.definitions[0];
                warn!(
                    requested = template_id,
                    fallback = %first.id,
                    "Workflow template not found; falling back"
                );
                first
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_template_is_valid() {
        let registry = TemplateRegistry::builtin();
        assert_eq!(registry.definitions().len(), 1);
        let definition = &registry.definitions()[0];
        assert_eq!(definition.id, "universal_flow_v1");
        definition.validate().unwrap();
        // The verify phase gates on sign-off with zero open defects.
        let verify = definition.phase("verify").unwrap();
        assert_eq!(verify.exit.require_decisions, vec!["qa_signoff"]);
        assert_eq!(verify.exit.require_defects_open, Some(0));
    }

    #[test]
    fn select_falls_back_to_first() {
        let registry = TemplateRegistry::builtin();
        assert_eq!(registry.select("missing_flow").id, "universal_flow_v1");
        assert_eq!(registry.select("universal_flow_v1").id, "universal_flow_v1");
    }

    #[test]
    fn index_loading_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("flow.json"),
            r#"{"id": "custom", "name": "Custom", "version": "1", "phases": [{"id": "only", "title": "Only"}]}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("index.json"),
            r#"{"templates": [{"id": "custom", "name": "Custom", "path": "flow.json"}]}"#,
        )
        .unwrap();

        let registry = TemplateRegistry::load_from_index(&dir.path().join("index.json")).unwrap();
        assert_eq!(registry.definitions().len(), 1);
        assert_eq!(registry.definitions()[0].id, "custom");
    }

    #[test]
    fn invalid_template_in_index_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("flow.json"),
            r#"{"id": "bad", "name": "Bad", "version": "1", "phases": [{"id": "a", "title": "A", "dependencies": ["ghost"]}]}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("index.json"),
            r#"{"templates": [{"id": "bad", "name": "Bad", "path": "flow.json"}]}"#,
        )
        .unwrap();
        assert!(TemplateRegistry::load_from_index(&dir.path().join("index.json")).is_err());
    }
}
