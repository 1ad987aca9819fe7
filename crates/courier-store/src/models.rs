//! Domain model structs persisted in the local SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so the same types can
//! travel over the transport and up to the UI layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use courier_shared::constants::SUMMARY_PREVIEW_CHARS;
use courier_shared::{
    ConversationId, MessageId, MessageStatus, OutboxEntryId, OutboxKind, OutboxPayload, Presence,
    UserId,
};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Client-generated id, stable across retries.
    pub id: MessageId,
    /// The conversation this message belongs to.
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    /// Client clock at creation; only used for local ordering.
    pub created_at: DateTime<Utc>,
    /// Authoritative server timestamp, absent until the server acknowledges
    /// this id.
    pub server_updated_at: Option<DateTime<Utc>>,
    pub status: MessageStatus,
    /// True until the server has ever acknowledged this id. Local state
    /// only; never read from the wire.
    #[serde(skip_deserializing)]
    pub local_only: bool,
}

impl Message {
    /// A freshly composed local message, not yet seen by the server.
    pub fn outgoing(
        conversation_id: ConversationId,
        sender_id: UserId,
        content: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            conversation_id,
            sender_id,
            content: content.into(),
            created_at: now,
            server_updated_at: None,
            status: MessageStatus::Sending,
            local_only: true,
        }
    }

    /// Timestamp used to order messages within a conversation: the server
    /// timestamp when present, the client creation time otherwise.
    pub fn ordering_timestamp(&self) -> DateTime<Utc> {
        self.server_updated_at.unwrap_or(self.created_at)
    }

    pub fn summary(&self) -> MessageSummary {
        MessageSummary {
            message_id: self.id,
            sender_id: self.sender_id.clone(),
            preview: self.content.chars().take(SUMMARY_PREVIEW_CHARS).collect(),
            at: self.ordering_timestamp(),
        }
    }

    /// The outbox payload that delivers this message.
    pub fn send_payload(&self) -> OutboxPayload {
        OutboxPayload::SendMessage {
            message_id: self.id,
            conversation_id: self.conversation_id.clone(),
            sender_id: self.sender_id.clone(),
            content: self.content.clone(),
            created_at: self.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// Preview of the newest message of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageSummary {
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub preview: String,
    /// Ordering timestamp of the summarized message.
    pub at: DateTime<Utc>,
}

/// A conversation (direct or group).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub participants: Vec<UserId>,
    pub last_message: Option<MessageSummary>,
    pub updated_at: DateTime<Utc>,
    /// Locally authoritative; never overwritten wholesale by server data.
    #[serde(default)]
    pub unread_count: u32,
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// Cached copy of a server-side user profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub presence: Presence,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

/// A write that has not been confirmed by the server yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboxEntry {
    pub id: OutboxEntryId,
    pub kind: OutboxKind,
    pub payload: OutboxPayload,
    pub enqueued_at: DateTime<Utc>,
    pub attempt_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Most recent transport failure, for diagnostics.
    pub last_error: Option<String>,
}

impl OutboxEntry {
    /// Wrap a payload in a fresh entry. Message sends reuse the message id.
    pub fn new(payload: OutboxPayload, now: DateTime<Utc>) -> Self {
        let id = payload
            .message_id()
            .map(OutboxEntryId::from)
            .unwrap_or_default();
        Self {
            id,
            kind: payload.kind(),
            payload,
            enqueued_at: now,
            attempt_count: 0,
            last_attempt_at: None,
            last_error: None,
        }
    }

    pub fn message_id(&self) -> Option<MessageId> {
        self.payload.message_id()
    }
}

// ---------------------------------------------------------------------------
// Sync cursor
// ---------------------------------------------------------------------------

/// High-water mark of one delta stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncCursor {
    /// `conversation:<id>`, `conversations` or `users`.
    pub key: String,
    /// Opaque value handed back to the server as `since`.
    pub value: String,
    pub updated_at: DateTime<Utc>,
}
