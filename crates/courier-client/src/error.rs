use courier_store::StoreError;
use courier_sync::SyncError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    /// Sending requires `COURIER_USER_ID`.
    #[error("No local user configured")]
    NoLocalUser,
}

pub type Result<T> = std::result::Result<T, ClientError>;
