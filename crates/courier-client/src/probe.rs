//! Connectivity heartbeat.
//!
//! Polls the server's health endpoint and feeds the result into the
//! [`NetworkMonitor`]. An OS reachability hook can drive the same monitor
//! through [`NetworkMonitor::set_online`] instead.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use courier_sync::NetworkMonitor;

#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Probe every `every` until `shutdown` fires. The first probe runs
/// immediately.
pub async fn run_heartbeat(
    probe: Arc<dyn HealthCheck>,
    network: NetworkMonitor,
    every: Duration,
    mut shutdown: mpsc::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let online = probe.is_reachable().await;
                if network.set_online(online) {
                    tracing::debug!(online, "Heartbeat changed connectivity");
                }
            }
            _ = shutdown.recv() => {
                tracing::debug!("Heartbeat stopping");
                break;
            }
        }
    }
}
