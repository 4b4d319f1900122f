//! Tradecast Server
//!
//! Realtime control plane for a trading platform: clients hold
//! long-lived WebSocket connections, subscribe to named topics, and
//! the server pushes typed events as sessions and orders move.

mod api;
mod config;
mod server;
mod shutdown;
mod state;

use clap::Parser;
use config::{ConfigLoader, hub_config, supervisor_config};
use server::{build_router, run_server};
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tradecast_core::controllers::{OrderController, SessionController};
use tradecast_core::hub::ConnectionHub;
use tradecast_core::processors::{LivenessSupervisor, OrderExpirySweep};
use tradecast_core::store::memory::MemoryStore;
use tradecast_core::store::{
    OrderStore, SessionEventLog, SessionStore, SnapshotProvider, TradeLedger,
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Tradecast - realtime trading session and order event hub
#[derive(Parser, Debug)]
#[command(name = "tradecast-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./tradecast.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    // Parse command line arguments
    let args = Args::parse();

    tracing::info!("Starting tradecast-server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_loader = ConfigLoader::new(&args.config, args.listen);
    let loaded_config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;

    let listen_addr = loaded_config.server.listen;
    tracing::info!("Configuration loaded from {:?}", args.config);

    // Construct the components. The in-memory store backs all the
    // collaborator contracts in this deployment.
    let store = Arc::new(MemoryStore::new());
    let hub = Arc::new(ConnectionHub::new(hub_config(&loaded_config)));
    let orders = Arc::new(OrderController::new(
        store.clone() as Arc<dyn OrderStore>,
        store.clone() as Arc<dyn SessionStore>,
        hub.clone(),
    ));
    let sessions = Arc::new(SessionController::new(
        store.clone() as Arc<dyn SessionStore>,
        store.clone() as Arc<dyn TradeLedger>,
        store.clone() as Arc<dyn SessionEventLog>,
        orders.clone(),
        hub.clone(),
    ));
    let state = AppState::new(
        hub.clone(),
        sessions,
        orders.clone(),
        store.clone() as Arc<dyn SnapshotProvider>,
    );

    // Spawn the background processors with a shared shutdown signal.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisor = LivenessSupervisor::new(hub.clone(), supervisor_config(&loaded_config));
    let supervisor_handle = tokio::spawn(supervisor.run(shutdown_rx.clone()));
    let sweep = OrderExpirySweep::new(
        orders,
        Duration::from_secs(loaded_config.hub.order_expiry_interval_secs),
    );
    let sweep_handle = tokio::spawn(sweep.run(shutdown_rx));

    // Build the router
    let router = build_router(state);

    // Run the server
    tracing::info!("Starting HTTP server on {}", listen_addr);
    let result = run_server(router, listen_addr).await;

    // Stop the background processors
    let _ = shutdown_tx.send(true);
    let _ = supervisor_handle.await;
    let _ = sweep_handle.await;
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
