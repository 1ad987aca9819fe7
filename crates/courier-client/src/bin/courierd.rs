//! Headless sync daemon: keeps the local database in sync with the server
//! and logs engine events until Ctrl+C.

use tracing::info;

use courier_client::{init_tracing, Client, ClientConfig};
use courier_shared::constants::APP_NAME;
use courier_sync::EngineEvent;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Tracing and configuration
    // -----------------------------------------------------------------------
    init_tracing();
    info!("Starting {APP_NAME} sync daemon v{}", env!("CARGO_PKG_VERSION"));

    let config = ClientConfig::from_env();
    info!(
        server = %config.server_url,
        user = ?config.sync.local_user,
        token = config.api_token.is_some(),
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 2. Engine
    // -----------------------------------------------------------------------
    let client = Client::open(config)?;
    let mut events = client.subscribe();
    client.start();

    let logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(EngineEvent::OutboxEntryFailed { entry_id, kind, reason }) => {
                    tracing::warn!(%entry_id, %kind, %reason, "Delivery failed");
                }
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => tracing::debug!(event = %json, "Engine event"),
                    Err(e) => tracing::error!(error = %e, "Failed to encode event"),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event log lagging");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // -----------------------------------------------------------------------
    // 3. Run until Ctrl+C
    // -----------------------------------------------------------------------
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    client.shutdown().await;
    logger.abort();
    Ok(())
}
