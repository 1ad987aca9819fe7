use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::types::{ConversationId, MessageId, UserId};

/// A locally-originated write waiting in the outbox.
///
/// Serialized as tagged JSON both into the outbox table and onto the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboxPayload {
    /// New chat message
    SendMessage {
        message_id: MessageId,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: String,
        created_at: DateTime<Utc>,
    },

    /// Tell the server the local user has read a conversation
    ReadReceipt {
        conversation_id: ConversationId,
        /// Newest message covered by the receipt, if known
        up_to: Option<MessageId>,
        read_at: DateTime<Utc>,
    },

    /// Any other queued write, passed through opaquely
    Custom {
        name: String,
        body: serde_json::Value,
    },
}

impl OutboxPayload {
    pub fn kind(&self) -> OutboxKind {
        match self {
            Self::SendMessage { .. } => OutboxKind::MessageSend,
            Self::ReadReceipt { .. } => OutboxKind::ReadReceipt,
            Self::Custom { .. } => OutboxKind::Custom,
        }
    }

    /// The message this payload delivers, for message sends.
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            Self::SendMessage { message_id, .. } => Some(*message_id),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OutboxKind {
    MessageSend,
    ReadReceipt,
    Custom,
}

impl OutboxKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MessageSend => "message_send",
            Self::ReadReceipt => "read_receipt",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for OutboxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message_send" => Ok(Self::MessageSend),
            "read_receipt" => Ok(Self::ReadReceipt),
            "custom" => Ok(Self::Custom),
            other => Err(ParseError::OutboxKind(other.to_string())),
        }
    }
}

/// Server acknowledgement of a delivered outbox payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Ack {
    /// Authoritative timestamp assigned by the server (message sends)
    pub server_updated_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_json_is_tagged() {
        let payload = OutboxPayload::ReadReceipt {
            conversation_id: ConversationId::new("c1"),
            up_to: None,
            read_at: Utc::now(),
        };

        let json = payload.to_json().unwrap();
        assert!(json.contains("\"type\":\"read_receipt\""));
        assert!(json.contains("\"conversation_id\":\"c1\""));
        assert_eq!(OutboxPayload::from_json(&json).unwrap(), payload);
    }

    #[test]
    fn test_payload_kind_and_message_id() {
        let id = MessageId::new();
        let payload = OutboxPayload::SendMessage {
            message_id: id,
            conversation_id: ConversationId::new("c1"),
            sender_id: UserId::new("u1"),
            content: "hi".into(),
            created_at: Utc::now(),
        };
        assert_eq!(payload.kind(), OutboxKind::MessageSend);
        assert_eq!(payload.message_id(), Some(id));

        let custom = OutboxPayload::Custom {
            name: "typing".into(),
            body: serde_json::json!({ "on": true }),
        };
        assert_eq!(custom.kind(), OutboxKind::Custom);
        assert_eq!(custom.message_id(), None);
    }
}
