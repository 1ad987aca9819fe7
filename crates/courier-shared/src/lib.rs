//! Types shared by every Courier crate: identifiers, the message status
//! lattice, outbox payloads and the default engine policy values.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ParseError;
pub use protocol::{Ack, OutboxKind, OutboxPayload};
pub use types::{ConversationId, MessageId, MessageStatus, OutboxEntryId, Presence, UserId};
