use courier_store::StoreError;
use thiserror::Error;

/// Failure reported by a [`Transport`](crate::Transport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Timeout, dropped connection, 5xx. Retried with backoff.
    #[error("Transient transport failure: {0}")]
    Transient(String),

    /// The server refused the request for good (invalid payload, missing
    /// conversation). Never retried.
    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    /// Local storage failed. Not retried by the engine.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, SyncError>;
