use thiserror::Error;

/// Failure to parse one of the shared enums from its stored text form.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unknown message status: {0}")]
    MessageStatus(String),

    #[error("Unknown outbox kind: {0}")]
    OutboxKind(String),

    #[error("Unknown presence: {0}")]
    Presence(String),
}
