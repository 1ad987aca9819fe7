//! # courier-sync
//!
//! The offline-first synchronization engine.
//!
//! - [`OutboxManager`] delivers queued local writes with backoff and a retry
//!   ceiling.
//! - [`NetworkMonitor`] tracks connectivity and fans transitions out to
//!   subscribers.
//! - [`SyncScheduler`] runs single-flight sync passes on a timer and on every
//!   reconnect.
//! - [`resolver`] decides between local and server versions of an entity.
//!
//! Components are explicit instances wired together by the embedding client;
//! nothing here is global.

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod network;
pub mod outbox;
pub mod resolver;
pub mod scheduler;
pub mod transport;

mod flight;

#[cfg(test)]
mod test_support;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RetryPolicy, SyncConfig};
pub use error::{Result, SyncError, TransportError};
pub use events::{EngineEvent, EventBus};
pub use network::{NetworkMonitor, Subscription};
pub use outbox::{FlushOutcome, FlushReport, OutboxManager};
pub use resolver::Resolve;
pub use scheduler::{PassOutcome, SyncReport, SyncScheduler, SyncState};
pub use transport::{Page, Transport};
