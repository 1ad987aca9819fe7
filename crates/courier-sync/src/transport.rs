//! The seam between the engine and the server.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use courier_shared::{Ack, ConversationId, OutboxPayload};
use courier_store::{Conversation, Message, User};

use crate::error::TransportError;

/// One page of a delta pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Opaque position after this page; stored verbatim as the new cursor.
    pub cursor: Option<String>,
    /// More changes are available past `cursor`.
    #[serde(default)]
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>, cursor: Option<String>) -> Self {
        Self {
            items,
            cursor,
            has_more: false,
        }
    }
}

/// Server operations the engine depends on.
///
/// Every call is idempotent on the server side: sends are deduplicated by
/// message id, so delivering the same payload twice is harmless.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_message(&self, payload: &OutboxPayload) -> Result<Ack, TransportError>;

    async fn fetch_conversation_delta(
        &self,
        conversation_id: &ConversationId,
        since: Option<String>,
    ) -> Result<Page<Message>, TransportError>;

    async fn fetch_conversations_delta(
        &self,
        since: Option<String>,
    ) -> Result<Page<Conversation>, TransportError>;

    async fn fetch_users_delta(&self, since: Option<String>)
        -> Result<Page<User>, TransportError>;
}
