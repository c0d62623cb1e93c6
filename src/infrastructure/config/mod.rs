//! Configuration loading.
//!
//! Hierarchical merge (lowest to highest precedence): programmatic
//! defaults, `<workspace>/.arranger/config.json`, then `ARRANGER_*`
//! environment variables. The per-workspace workflow selection lives in
//! its own small file, `<workspace>/.arranger/workflow-config.json`.

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Json, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Default workflow template id.
pub const DEFAULT_TEMPLATE_ID: &str = "universal_flow_v1";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid LLM backend: {0}. Must be one of: mock, claude, openai")]
    InvalidLlmBackend(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Configuration load failed: {0}")]
    LoadFailed(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: ".arranger/arranger.db".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`.
    pub format: String,
    /// Optional directory for rotated log files.
    pub directory: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    pub tick_interval_secs: u64,
    pub sweep_interval_secs: u64,
    pub lock_ttl_secs: i64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: 2,
            sweep_interval_secs: 10,
            lock_ttl_secs: 15 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSettings {
    pub max_iterations: u32,
    pub token_budget: usize,
    pub enable_takeover: bool,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            token_budget: 3200,
            enable_takeover: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceSettings {
    pub poll_interval_secs: u64,
    /// Ballot cast when an LLM vote answer is unclear: `approve` or `abstain`.
    pub default_vote_on_unclear: String,
    pub vote_timeout_secs: i64,
}

impl Default for GovernanceSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            default_vote_on_unclear: "abstain".into(),
            vote_timeout_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// `mock`, `claude`, or `openai`.
    pub backend: String,
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub model: String,
    /// Deadline for retrieval-class requests.
    pub retrieval_timeout_secs: u64,
    /// Deadline for everything else.
    pub rpc_timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            backend: "mock".into(),
            base_url: "https://api.anthropic.com".into(),
            api_key_env: "ANTHROPIC_API_KEY".into(),
            model: "claude-sonnet-4-20250514".into(),
            retrieval_timeout_secs: 60,
            rpc_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Path to a template index JSON; the built-in set is used when unset.
    pub template_index: Option<String>,
}

/// The full application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub scheduler: SchedulerSettings,
    pub executor: ExecutorSettings,
    pub governance: GovernanceSettings,
    pub llm: LlmSettings,
    pub workflow: WorkflowSettings,
}

impl Config {
    fn validate(&self) -> Result<(), ConfigError> {
        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.level.clone()));
        }
        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(self.logging.format.clone()));
        }
        if !["mock", "claude", "openai"].contains(&self.llm.backend.as_str()) {
            return Err(ConfigError::InvalidLlmBackend(self.llm.backend.clone()));
        }
        if self.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        Ok(())
    }
}

/// Loads the application configuration for a workspace.
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load(workspace_root: &Path) -> Result<Config, ConfigError> {
        let config_path = workspace_root.join(".arranger").join("config.json");
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Json::file(config_path))
            .merge(Env::prefixed("ARRANGER_").split("__"))
            .extract()
            .map_err(|e| ConfigError::LoadFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Per-workspace workflow selection, `.arranger/workflow-config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceWorkflowConfig {
    pub workflow_template_id: String,
}

impl Default for WorkspaceWorkflowConfig {
    fn default() -> Self {
        Self {
            workflow_template_id: DEFAULT_TEMPLATE_ID.into(),
        }
    }
}

impl WorkspaceWorkflowConfig {
    /// Read the workspace selection; a missing or unreadable file falls
    /// back to the default template with a warning.
    pub fn load(workspace_root: &Path) -> Self {
        let path: PathBuf = workspace_root.join(".arranger").join("workflow-config.json");
        match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(config) => config,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Bad workflow-config.json; using default");
                    Self::default()
                }
            },
            Err(_) => {
                warn!(path = %path.display(), "No workflow-config.json; using default template");
                Self::default()
            }
        }
    }
}
