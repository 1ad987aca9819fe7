//! # courier-store
//!
//! Durable local storage for the Courier sync engine, backed by SQLite.
//!
//! The store is the system of record while the client is offline. It keeps
//! conversations, messages, users, the outbox of pending writes and the
//! per-stream sync cursors. [`Database`] wraps a `rusqlite::Connection` and
//! provides typed helpers for every model; [`LocalStore`] is the cloneable,
//! mutex-guarded handle the engine shares between tasks.

pub mod conversations;
pub mod cursors;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod outbox;
pub mod users;

mod codec;
mod error;

pub use database::{Database, LocalStore};
pub use error::{Result, StoreError};
pub use models::*;
