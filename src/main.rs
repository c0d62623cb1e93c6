//! Arranger CLI entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::Table;
use tokio::sync::watch;
use tracing::{info, warn};

use arranger::domain::models::BallotDecision;
use arranger::domain::ports::llm::NullToolRunner;
use arranger::infrastructure::config::{ConfigLoader, WorkspaceWorkflowConfig};
use arranger::infrastructure::database::{
    DatabaseConnection, SqliteAgentStore, SqliteApprovalStore, SqliteInstanceStore,
    SqliteLockStore, SqliteMessageStore, SqliteNotificationStore, SqliteProofStore,
    SqliteTaskStore, SqliteThinkingLogStore, SqliteVoteStore,
};
use arranger::infrastructure::llm::{ClaudeClient, LlmClient, MockLlm, OpenAiCompatibleClient};
use arranger::infrastructure::logging;
use arranger::infrastructure::templates::TemplateRegistry;
use arranger::services::plugins::{
    AutoTaskPlugin, LanePlugin, MessagePolicyPlugin, ProofPlugin,
};
use arranger::services::{
    AgentRuntime, AgentRuntimeConfig, ApprovalService, EventBus, EventBusConfig, MessageService,
    NotificationService, PluginBus, PluginContext, ProofService, SchedulerConfig, TaskScheduler,
    VoteService, WorkflowKernel,
};

#[derive(Parser)]
#[command(name = "arranger", about = "Multi-agent software engineering orchestrator", version)]
struct Cli {
    /// Workspace root (contains `.arranger/`).
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestrator daemon.
    Serve,
    /// Workflow template utilities.
    Template {
        #[command(subcommand)]
        command: TemplateCommands,
    },
}

#[derive(Subcommand)]
enum TemplateCommands {
    /// List available workflow templates.
    List,
    /// Validate a workflow template file.
    Validate { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve => serve(&cli.workspace).await,
        Commands::Template { command } => template_command(&cli.workspace, command),
    }
}

fn load_templates(
    workspace: &std::path::Path,
    config: &arranger::infrastructure::config::Config,
) -> Result<TemplateRegistry> {
    match &config.workflow.template_index {
        Some(index) => {
            let path = workspace.join(index);
            TemplateRegistry::load_from_index(&path)
                .with_context(|| format!("failed to load template index {}", path.display()))
        }
        None => Ok(TemplateRegistry::builtin()),
    }
}

fn template_command(workspace: &std::path::Path, command: TemplateCommands) -> Result<()> {
    match command {
        TemplateCommands::List => {
            let config = ConfigLoader::load(workspace).context("failed to load configuration")?;
            let registry = load_templates(workspace, &config)?;
            let mut table = Table::new();
            table.set_header(vec!["ID", "Name", "Version", "Phases"]);
            for definition in registry.definitions() {
                table.add_row(vec![
                    definition.id.clone(),
                    definition.name.clone(),
                    definition.version.clone(),
                    definition.phases.len().to_string(),
                ]);
            }
            println!("{table}");
            Ok(())
        }
        TemplateCommands::Validate { path } => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            let definition: arranger::domain::models::WorkflowDefinition =
                serde_json::from_str(&raw).context("template is not valid JSON")?;
            definition.validate().context("template validation failed")?;
            println!("OK: {} ({} phases)", definition.id, definition.phases.len());
            Ok(())
        }
    }
}

async fn serve(workspace: &std::path::Path) -> Result<()> {
    let config = ConfigLoader::load(workspace).context("failed to load configuration")?;
    let _log_guard = logging::init(&config.logging)?;

    let registry = load_templates(workspace, &config)?;
    let workflow_config = WorkspaceWorkflowConfig::load(workspace);
    let default_workflow_id = registry
        .select(&workflow_config.workflow_template_id)
        .id
        .clone();

    // Store adapter.
    let database_path = workspace.join(&config.database.path);
    if let Some(parent) = database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }
    let database_url = format!("sqlite:{}", database_path.display());
    let db = DatabaseConnection::new(&database_url)
        .await
        .context("failed to open database")?;
    db.migrate().await.context("failed to run migrations")?;
    let pool = db.pool().clone();

    let tasks = Arc::new(SqliteTaskStore::new(pool.clone()));
    let agents = Arc::new(SqliteAgentStore::new(pool.clone()));
    let messages_store = Arc::new(SqliteMessageStore::new(pool.clone()));
    let approvals_store = Arc::new(SqliteApprovalStore::new(pool.clone()));
    let votes_store = Arc::new(SqliteVoteStore::new(pool.clone()));
    let proofs_store = Arc::new(SqliteProofStore::new(pool.clone()));
    let locks = Arc::new(SqliteLockStore::new(pool.clone()));
    let notifications_store = Arc::new(SqliteNotificationStore::new(pool.clone()));
    let instances = Arc::new(SqliteInstanceStore::new(pool.clone()));
    let thinking = Arc::new(SqliteThinkingLogStore::new(pool));

    // Core services.
    let bus = Arc::new(EventBus::new(EventBusConfig::default()));
    let kernel = Arc::new(WorkflowKernel::new(instances, bus.clone()));
    for definition in registry.definitions() {
        kernel
            .register_definition(definition.clone())
            .await
            .with_context(|| format!("failed to register workflow {}", definition.id))?;
    }

    let scheduler = Arc::new(TaskScheduler::new(
        tasks.clone(),
        agents.clone(),
        locks.clone(),
        notifications_store.clone(),
        bus.clone(),
        SchedulerConfig {
            tick_interval_secs: config.scheduler.tick_interval_secs,
            sweep_interval_secs: config.scheduler.sweep_interval_secs,
            lock_ttl_secs: config.scheduler.lock_ttl_secs,
        },
    ));
    let notifications = Arc::new(NotificationService::new(notifications_store));
    let messages = Arc::new(MessageService::new(messages_store, bus.clone()));
    let approvals = Arc::new(ApprovalService::new(
        approvals_store,
        notifications.clone(),
        messages.clone(),
        bus.clone(),
    ));
    let votes = Arc::new(VoteService::new(
        votes_store,
        agents.clone(),
        notifications.clone(),
        messages.clone(),
        bus.clone(),
    ));
    let proofs = Arc::new(ProofService::new(proofs_store));

    // Plugin bus.
    let context = Arc::new(PluginContext {
        kernel: kernel.clone(),
        scheduler: scheduler.clone(),
        messages: messages.clone(),
        notifications: notifications.clone(),
        approvals: approvals.clone(),
        votes: votes.clone(),
        proofs: proofs.clone(),
        agents: agents.clone(),
        tasks: tasks.clone(),
        bus: bus.clone(),
        default_workflow_id,
    });
    let mut plugin_bus = PluginBus::new(context);
    plugin_bus.register(Arc::new(AutoTaskPlugin::new()))?;
    plugin_bus.register(Arc::new(LanePlugin::clarifier()))?;
    plugin_bus.register(Arc::new(LanePlugin::planner()))?;
    plugin_bus.register(Arc::new(LanePlugin::builder()))?;
    plugin_bus.register(Arc::new(ProofPlugin::new()))?;
    plugin_bus.register(Arc::new(MessagePolicyPlugin::with_defaults()))?;
    plugin_bus.start_all().await;

    // LLM backend.
    let llm = Arc::new(match config.llm.backend.as_str() {
        "claude" => {
            let api_key = std::env::var(&config.llm.api_key_env).with_context(|| {
                format!("environment variable {} not set", config.llm.api_key_env)
            })?;
            LlmClient::Claude(ClaudeClient::new(
                config.llm.base_url.clone(),
                api_key,
                config.llm.model.clone(),
            ))
        }
        "openai" => {
            let api_key = std::env::var(&config.llm.api_key_env).with_context(|| {
                format!("environment variable {} not set", config.llm.api_key_env)
            })?;
            LlmClient::OpenAiCompatible(OpenAiCompatibleClient::new(
                config.llm.base_url.clone(),
                api_key,
                config.llm.model.clone(),
            ))
        }
        _ => LlmClient::Mock(MockLlm::new()),
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::new();

    {
        let scheduler = scheduler.clone();
        let rx = shutdown_rx.clone();
        handles.push(tokio::spawn(async move { scheduler.run(rx).await }));
    }
    {
        let rx = shutdown_rx.clone();
        handles.push(tokio::spawn(async move { plugin_bus.run(rx).await }));
    }
    {
        // Vote timeout sweeper.
        let votes = votes.clone();
        let mut rx = shutdown_rx.clone();
        let interval = config.governance.poll_interval_secs;
        handles.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(std::time::Duration::from_secs(interval));
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        if let Err(e) = votes.timeout_sweep().await {
                            warn!(error = %e, "Vote timeout sweep failed");
                        }
                    }
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            return;
                        }
                    }
                }
            }
        }));
    }

    // One runtime per registered enabled agent.
    let runtime_config = AgentRuntimeConfig {
        heartbeat_interval_secs: 30,
        governance_poll_secs: config.governance.poll_interval_secs,
        max_iterations: config.executor.max_iterations,
        token_budget: config.executor.token_budget,
        enable_takeover: config.executor.enable_takeover,
        default_vote_on_unclear: if config.governance.default_vote_on_unclear == "approve" {
            BallotDecision::Approve
        } else {
            BallotDecision::Abstain
        },
    };
    let registered = arranger::domain::ports::AgentStore::list(agents.as_ref())
        .await
        .context("failed to list agents")?;
    for agent in registered.into_iter().filter(|a| a.is_enabled) {
        let runtime = AgentRuntime::new(
            agent.id.clone(),
            agents.clone(),
            tasks.clone(),
            locks.clone(),
            thinking.clone(),
            scheduler.clone(),
            approvals.clone(),
            votes.clone(),
            messages.clone(),
            notifications.clone(),
            llm.clone(),
            Arc::new(NullToolRunner),
            bus.clone(),
            runtime_config.clone(),
        );
        let rx = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = runtime.run(rx).await {
                warn!(error = %e, "Agent runtime exited with error");
            }
        }));
    }

    info!("Arranger running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.context("signal handler failed")?;
    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}
