//! Core services: event bus, kernel, scheduler, plugin bus, plugins,
//! governance, messages, and the agent runtime.

pub mod agent_runtime;
pub mod event_bus;
pub mod governance;
pub mod kernel;
pub mod messages;
pub mod plugin_bus;
pub mod plugins;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use agent_runtime::{AgentRuntime, AgentRuntimeConfig};
pub use event_bus::{BusEvent, EventBus, EventBusConfig, WorkflowRuntimeEvent};
pub use governance::{ApprovalService, NotificationService, ProofService, VoteService};
pub use kernel::WorkflowKernel;
pub use messages::MessageService;
pub use plugin_bus::{Plugin, PluginBus, PluginContext};
pub use scheduler::{SchedulerConfig, TaskScheduler, TaskTimeoutRecord};
