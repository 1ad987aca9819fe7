use courier_shared::{MessageStatus, ParseError};
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// An insert collided with an existing primary key.
    #[error("Record already exists: {0}")]
    Duplicate(String),

    /// A status change that would move a message backwards in the lattice.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: MessageStatus, to: MessageStatus },

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// JSON column (participants, outbox payload) could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored enum text did not parse.
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Another thread panicked while holding the store lock.
    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Map `QueryReturnedNoRows` to [`StoreError::NotFound`].
pub(crate) fn not_found(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    }
}
