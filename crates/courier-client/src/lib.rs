//! # courier-client
//!
//! Composition of the sync engine for a real deployment: the HTTP
//! transport, the connectivity heartbeat and the [`Client`] facade the UI
//! layer talks to.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod probe;

#[cfg(test)]
mod test_server;

use tracing_subscriber::{fmt, EnvFilter};

pub use client::Client;
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use http::HttpTransport;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("courier_sync=debug,courier_store=info,courier_client=debug,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
