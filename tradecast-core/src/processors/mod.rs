//! Long-lived background tasks.
//!
//! Both processors follow the same shape: constructed with their
//! collaborators, then `run(shutdown_rx)` consumed by a spawned task
//! that loops on `tokio::select!` with a biased shutdown arm.

pub mod liveness;
pub mod order_expiry;

pub use liveness::{LivenessSupervisor, SupervisorConfig};
pub use order_expiry::OrderExpirySweep;
