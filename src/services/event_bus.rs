//! Typed in-process event bus.
//!
//! A broadcast-based pub/sub carrying the orchestrator's update streams.
//! Publication is synchronous; every subscriber observes events in
//! publication order (sequence numbers are assigned atomically at publish).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

use crate::domain::models::{
    Approval, BlackboardMessage, InstanceSummary, Task, VoteTopic,
};

/// Workflow lifecycle events emitted by the kernel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowRuntimeEvent {
    /// A phase transitioned pending → active.
    PhaseEnter {
        instance_id: String,
        workflow_id: String,
        session_id: Option<String>,
        phase_id: String,
    },
    /// A phase satisfied its exit gate.
    PhaseComplete {
        instance_id: String,
        phase_id: String,
    },
    /// A phase was explicitly blocked.
    PhaseBlocked {
        instance_id: String,
        phase_id: String,
        blocker: String,
    },
    /// Every phase of the instance completed.
    WorkflowCompleted {
        instance_id: String,
        workflow_id: String,
        session_id: Option<String>,
    },
}

impl WorkflowRuntimeEvent {
    pub fn instance_id(&self) -> &str {
        match self {
            Self::PhaseEnter { instance_id, .. }
            | Self::PhaseComplete { instance_id, .. }
            | Self::PhaseBlocked { instance_id, .. }
            | Self::WorkflowCompleted { instance_id, .. } => instance_id,
        }
    }
}

/// Incremental LLM stream state forwarded to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmStreamUpdate {
    pub task_id: String,
    pub agent_id: String,
    pub content_delta: Option<String>,
    pub done: bool,
    pub error: Option<String>,
}

/// Summary row published when the template registry changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSummary {
    pub id: String,
    pub name: String,
    pub version: String,
}

/// The typed event set carried by the bus.
#[derive(Debug, Clone)]
pub enum BusEvent {
    TasksUpdate(Vec<Task>),
    MessagesUpdate(Vec<BlackboardMessage>),
    VotesUpdate(Vec<VoteTopic>),
    ApprovalsUpdate(Vec<Approval>),
    Workflow(WorkflowRuntimeEvent),
    WorkflowInstancesUpdate(Vec<InstanceSummary>),
    LlmStreamUpdate(LlmStreamUpdate),
    WorkflowTemplateUpdate(Vec<TemplateSummary>),
}

impl BusEvent {
    /// Discriminant name, used for logging and filtering.
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::TasksUpdate(_) => "tasks_update",
            Self::MessagesUpdate(_) => "messages_update",
            Self::VotesUpdate(_) => "votes_update",
            Self::ApprovalsUpdate(_) => "approvals_update",
            Self::Workflow(_) => "workflow_event",
            Self::WorkflowInstancesUpdate(_) => "workflow_instances_update",
            Self::LlmStreamUpdate(_) => "llm_stream_update",
            Self::WorkflowTemplateUpdate(_) => "workflow_template_update",
        }
    }
}

/// Envelope with bus-assigned ordering metadata.
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub event: BusEvent,
}

/// Configuration for the event bus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Capacity of the broadcast channel.
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

/// Central event bus broadcasting to all subscribers.
pub struct EventBus {
    sender: broadcast::Sender<PublishedEvent>,
    sequence: AtomicU64,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity);
        Self {
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    /// Publish an event, assigning the next sequence number.
    pub fn publish(&self, event: BusEvent) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let published = PublishedEvent {
            sequence,
            timestamp: Utc::now(),
            event,
        };
        // Send errors only mean there are no subscribers yet.
        let _ = self.sender.send(published);
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Next sequence number to be assigned.
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequence_numbers_are_monotonic() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(BusEvent::TasksUpdate(vec![]));
        bus.publish(BusEvent::MessagesUpdate(vec![]));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert_eq!(bus.current_sequence(), 2);
    }

    #[tokio::test]
    async fn all_subscribers_see_publication_order() {
        let bus = EventBus::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(BusEvent::TasksUpdate(vec![]));
        bus.publish(BusEvent::VotesUpdate(vec![]));

        for rx in [&mut a, &mut b] {
            let first = rx.recv().await.unwrap();
            let second = rx.recv().await.unwrap();
            assert_eq!(first.event.variant_name(), "tasks_update");
            assert_eq!(second.event.variant_name(), "votes_update");
        }
    }

    #[test]
    fn variant_names_match_wire_names() {
        assert_eq!(
            BusEvent::Workflow(WorkflowRuntimeEvent::PhaseComplete {
                instance_id: "inst-1".into(),
                phase_id: "plan".into(),
            })
            .variant_name(),
            "workflow_event"
        );
        assert_eq!(
            BusEvent::WorkflowInstancesUpdate(vec![]).variant_name(),
            "workflow_instances_update"
        );
    }
}
