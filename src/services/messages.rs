//! Blackboard message service.
//!
//! The single entry point for messages: persists the entry and publishes
//! `messages_update`. Significant lifecycle events elsewhere in the system
//! are mirrored here as audit entries.

use std::sync::Arc;

use tracing::debug;

use crate::domain::errors::DomainResult;
use crate::domain::models::{BlackboardMessage, MessageType};
use crate::domain::ports::MessageStore;
use crate::services::event_bus::{BusEvent, EventBus};

/// Service owning blackboard message creation and enrichment.
pub struct MessageService {
    store: Arc<dyn MessageStore>,
    bus: Arc<EventBus>,
}

impl MessageService {
    pub fn new(store: Arc<dyn MessageStore>, bus: Arc<EventBus>) -> Self {
        Self { store, bus }
    }

    /// Append a message and broadcast it.
    pub async fn post(&self, message: BlackboardMessage) -> DomainResult<BlackboardMessage> {
        self.store.insert(&message).await?;
        debug!(message_id = %message.id, session_id = %message.session_id, "Message posted");
        self.bus
            .publish(BusEvent::MessagesUpdate(vec![message.clone()]));
        Ok(message)
    }

    /// Mirror a lifecycle event as an audit entry on the session blackboard.
    pub async fn post_audit(
        &self,
        session_id: &str,
        content: impl Into<String>,
    ) -> DomainResult<BlackboardMessage> {
        let message =
            BlackboardMessage::new(session_id, "system", MessageType::Audit, content.into());
        self.post(message).await
    }

    /// Replace a message's tag set (metadata enrichment only; content is
    /// immutable). Enrichment does not re-broadcast the message.
    pub async fn update_tags(&self, message_id: &str, tags: &[String]) -> DomainResult<()> {
        self.store.update_tags(message_id, tags).await
    }

    pub async fn get(&self, message_id: &str) -> DomainResult<Option<BlackboardMessage>> {
        self.store.get(message_id).await
    }

    pub async fn list_by_session(
        &self,
        session_id: &str,
    ) -> DomainResult<Vec<BlackboardMessage>> {
        self.store.list_by_session(session_id).await
    }
}
