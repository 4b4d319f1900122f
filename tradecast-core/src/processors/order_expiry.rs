//! Periodic sweep that expires orders past their expiry timestamp.

use crate::controllers::OrderController;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::info;

/// Default sweep cadence.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Moves due open orders to `Expired` through the order controller,
/// so the ordinary lifecycle events fire for each.
pub struct OrderExpirySweep {
    orders: Arc<OrderController>,
    interval: Duration,
}

impl OrderExpirySweep {
    pub fn new(orders: Arc<OrderController>, interval: Duration) -> Self {
        Self { orders, interval }
    }

    /// Run until shutdown is signaled.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(interval = ?self.interval, "OrderExpirySweep started");

        let mut sweep = tokio::time::interval(self.interval);
        sweep.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("OrderExpirySweep received shutdown signal");
                        break;
                    }
                }

                _ = sweep.tick() => {
                    let expired = self.orders.expire_due(OffsetDateTime::now_utc()).await;
                    if expired > 0 {
                        info!(expired, "expired due orders");
                    }
                }
            }
        }

        info!("OrderExpirySweep shutdown complete");
    }
}
