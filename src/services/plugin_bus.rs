//! Plugin bus: sequential event dispatch to registered plugins.
//!
//! Plugins register a unique id plus start/dispose hooks and receive every
//! bus event in registration order. A handler failure is logged and never
//! aborts delivery to sibling plugins. Plugins are expected to be
//! idempotent; they typically keep a set of already-processed ids.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::{AgentStore, TaskStore};
use crate::services::event_bus::{BusEvent, EventBus};
use crate::services::governance::{
    ApprovalService, NotificationService, ProofService, VoteService,
};
use crate::services::kernel::WorkflowKernel;
use crate::services::messages::MessageService;
use crate::services::scheduler::TaskScheduler;

/// Shared context handed to plugins on start and with every event.
pub struct PluginContext {
    pub kernel: Arc<WorkflowKernel>,
    pub scheduler: Arc<TaskScheduler>,
    pub messages: Arc<MessageService>,
    pub notifications: Arc<NotificationService>,
    pub approvals: Arc<ApprovalService>,
    pub votes: Arc<VoteService>,
    pub proofs: Arc<ProofService>,
    pub agents: Arc<dyn AgentStore>,
    pub tasks: Arc<dyn TaskStore>,
    pub bus: Arc<EventBus>,
    /// Template the message policy plugin bootstraps requirements into.
    pub default_workflow_id: String,
}

/// A plugin reacting to bus events through the owners' public APIs.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique plugin id.
    fn id(&self) -> &str;

    /// Called once before event delivery begins.
    async fn start(&self, _ctx: &PluginContext) -> DomainResult<()> {
        Ok(())
    }

    /// Called once on shutdown, after delivery stops.
    async fn dispose(&self) {}

    /// Handle one bus event.
    async fn handle_event(&self, ctx: &PluginContext, event: &BusEvent) -> DomainResult<()>;
}

/// The sequential dispatcher.
pub struct PluginBus {
    context: Arc<PluginContext>,
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginBus {
    pub fn new(context: Arc<PluginContext>) -> Self {
        Self {
            context,
            plugins: Vec::new(),
        }
    }

    /// Register a plugin. Ids must be unique.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> DomainResult<()> {
        if self.plugins.iter().any(|p| p.id() == plugin.id()) {
            return Err(DomainError::ValidationFailed(format!(
                "duplicate plugin id: {}",
                plugin.id()
            )));
        }
        info!(plugin_id = plugin.id(), "Plugin registered");
        self.plugins.push(plugin);
        Ok(())
    }

    pub fn context(&self) -> Arc<PluginContext> {
        self.context.clone()
    }

    /// Start every plugin. A failing start is logged and the plugin is
    /// skipped for delivery.
    pub async fn start_all(&mut self) {
        let mut started = Vec::with_capacity(self.plugins.len());
        for plugin in self.plugins.drain(..) {
            match plugin.start(&self.context).await {
                Ok(()) => started.push(plugin),
                Err(e) => {
                    error!(plugin_id = plugin.id(), error = %e, "Plugin start failed; disabled");
                }
            }
        }
        self.plugins = started;
    }

    /// Deliver one event to every plugin in registration order with
    /// failure isolation.
    pub async fn dispatch(&self, event: &BusEvent) {
        for plugin in &self.plugins {
            if let Err(e) = plugin.handle_event(&self.context, event).await {
                warn!(
                    plugin_id = plugin.id(),
                    event = event.variant_name(),
                    error = %e,
                    "Plugin handler failed"
                );
            }
        }
    }

    /// Run the dispatch loop until shutdown, then dispose every plugin.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut rx = self.context.bus.subscribe();
        info!(plugins = self.plugins.len(), "Plugin bus running");
        loop {
            tokio::select! {
                received = rx.recv() => {
                    match received {
                        Ok(published) => self.dispatch(&published.event).await,
                        Err(RecvError::Lagged(missed)) => {
                            warn!(missed, "Plugin bus lagged behind the event stream");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        // Drain whatever is already queued, then dispose.
        while let Ok(published) = rx.try_recv() {
            self.dispatch(&published.event).await;
        }
        for plugin in &self.plugins {
            plugin.dispose().await;
        }
        info!("Plugin bus stopped");
    }
}
