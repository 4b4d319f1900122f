//! Liveness supervisor: heartbeat emitter and stale-connection reaper.

use crate::hub::ConnectionHub;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, info};
use tradecast_sdk::{Envelope, EventKind};

/// Heartbeat and eviction cadence.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Interval between heartbeat envelopes pushed to every
    /// connection.
    pub heartbeat_interval: Duration,
    /// A connection with no heartbeat refresh inside this window is
    /// considered dead.
    pub heartbeat_timeout: Duration,
    /// Interval between reaper sweeps.
    pub reap_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(300),
            reap_interval: Duration::from_secs(60),
        }
    }
}

/// Periodically pings every live connection and evicts the ones whose
/// heartbeat has expired, through the ordinary `disconnect` path.
pub struct LivenessSupervisor {
    hub: Arc<ConnectionHub>,
    config: SupervisorConfig,
}

impl LivenessSupervisor {
    pub fn new(hub: Arc<ConnectionHub>, config: SupervisorConfig) -> Self {
        Self { hub, config }
    }

    /// Run until shutdown is signaled.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            heartbeat_interval = ?self.config.heartbeat_interval,
            reap_interval = ?self.config.reap_interval,
            "LivenessSupervisor started"
        );

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        let mut reap = tokio::time::interval(self.config.reap_interval);
        // The first tick of an interval fires immediately; skip it so
        // a fresh server does not ping before anyone connects.
        heartbeat.tick().await;
        reap.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("LivenessSupervisor received shutdown signal");
                        break;
                    }
                }

                _ = heartbeat.tick() => {
                    let envelope = Envelope::new(
                        EventKind::Heartbeat,
                        json!({ "server_time": OffsetDateTime::now_utc().unix_timestamp() }),
                    );
                    let delivered = self.hub.broadcast_to_all(envelope).await;
                    debug!(delivered, "heartbeat emitted");
                }

                _ = reap.tick() => {
                    let timeout = time::Duration::try_from(self.config.heartbeat_timeout)
                        .unwrap_or(time::Duration::seconds(300));
                    let cutoff = OffsetDateTime::now_utc() - timeout;
                    let evicted = self.hub.reap_stale(cutoff).await;
                    if !evicted.is_empty() {
                        info!(count = evicted.len(), "reaper evicted stale connections");
                    }
                }
            }
        }

        info!("LivenessSupervisor shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::connection_channel;

    #[tokio::test(start_paused = true)]
    async fn emits_heartbeats_on_the_configured_interval() {
        let hub = Arc::new(ConnectionHub::default());
        let (tx, mut rx) = connection_channel();
        hub.connect(1, tx).await.unwrap();
        rx.recv().await.unwrap(); // connection ack

        let supervisor = LivenessSupervisor::new(
            hub.clone(),
            SupervisorConfig {
                heartbeat_interval: Duration::from_secs(30),
                heartbeat_timeout: Duration::from_secs(300),
                reap_interval: Duration::from_secs(60),
            },
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(supervisor.run(shutdown_rx));

        tokio::time::advance(Duration::from_secs(31)).await;
        let beat = rx.recv().await.unwrap();
        assert_eq!(beat.kind, EventKind::Heartbeat);
        assert!(beat.payload["server_time"].is_i64());

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shuts_down_promptly_on_signal() {
        let hub = Arc::new(ConnectionHub::default());
        let supervisor = LivenessSupervisor::new(hub, SupervisorConfig::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(supervisor.run(shutdown_rx));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
