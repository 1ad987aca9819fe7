//! Engine event bus.
//!
//! The UI layer subscribes here to refresh views after the engine changes
//! local state in the background.

use serde::Serialize;
use tokio::sync::broadcast;

use courier_shared::{ConversationId, MessageId, MessageStatus, OutboxEntryId, OutboxKind};

/// Event names follow the `domain:action` convention of the UI bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    #[serde(rename = "message:status")]
    MessageStatusChanged {
        message_id: MessageId,
        conversation_id: ConversationId,
        status: MessageStatus,
    },

    #[serde(rename = "outbox:delivered")]
    OutboxEntryDelivered {
        entry_id: OutboxEntryId,
        kind: OutboxKind,
    },

    /// The entry was removed without delivery (ceiling reached or rejected).
    #[serde(rename = "outbox:failed")]
    OutboxEntryFailed {
        entry_id: OutboxEntryId,
        kind: OutboxKind,
        reason: String,
    },

    #[serde(rename = "network:changed")]
    ConnectivityChanged { online: bool },

    #[serde(rename = "sync:completed")]
    SyncCompleted {
        messages_applied: usize,
        conversations_applied: usize,
        users_applied: usize,
        failed_conversations: usize,
    },
}

/// Broadcast fan-out of [`EngineEvent`]s. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is fine.
    pub fn emit(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("No event subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
