//! Application state shared across all request handlers.

use std::sync::Arc;
use tradecast_core::controllers::{OrderController, SessionController};
use tradecast_core::hub::ConnectionHub;
use tradecast_core::store::SnapshotProvider;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind
/// Arc). All components are constructed once in `main` and injected
/// here; there are no module-level instances.
#[derive(Clone)]
pub struct AppState {
    /// Connection registry and broadcast engine.
    pub hub: Arc<ConnectionHub>,
    /// Trading-session lifecycle controller.
    pub sessions: Arc<SessionController>,
    /// Order lifecycle controller.
    pub orders: Arc<OrderController>,
    /// Read-only snapshot collaborator for the get_* socket queries.
    pub snapshots: Arc<dyn SnapshotProvider>,
}

impl AppState {
    pub fn new(
        hub: Arc<ConnectionHub>,
        sessions: Arc<SessionController>,
        orders: Arc<OrderController>,
        snapshots: Arc<dyn SnapshotProvider>,
    ) -> Self {
        Self {
            hub,
            sessions,
            orders,
            snapshots,
        }
    }
}
