//! Session and order lifecycle controllers.
//!
//! Each controller is the sole writer of its entity's state and
//! re-validates resource ownership before touching anything. Both are
//! explicitly constructed with their collaborators injected; there are
//! no module-level instances.

pub mod orders;
pub mod sessions;

pub use orders::{BulkCreateFailure, BulkCreateReport, OrderController};
pub use sessions::{RiskReport, SessionController};

use crate::error::ControlError;
use crate::store::StoreError;

/// Map a storage collaborator failure to the opaque `Internal` error,
/// logging the detail server-side.
pub(crate) fn store_failure(err: StoreError) -> ControlError {
    tracing::error!(error = %err, "storage collaborator failure");
    ControlError::Internal(err.to_string())
}
