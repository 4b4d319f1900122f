//! Error taxonomy for session and order operations.

use thiserror::Error;

/// Errors surfaced by the session and order controllers.
///
/// Every variant maps to a distinct caller-visible failure class; a
/// failed operation leaves the entity unchanged. Delivery failures
/// inside the hub never appear here; they are contained by the hub
/// itself.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The referenced session/order does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The caller does not own the resource. Logged for audit at the
    /// call site.
    #[error("caller does not own this resource")]
    Forbidden,

    /// The requested action is not legal from the current state.
    #[error("action '{action}' is not allowed from state '{current}'")]
    InvalidTransition { current: String, action: String },

    /// Missing or malformed required fields; fails before any write.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The per-user connection limit was reached.
    #[error("connection limit reached")]
    CapacityExceeded,

    /// Unexpected collaborator failure, opaque to the caller.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Build the transition error for a rejected (state, action) pair.
    pub fn invalid_transition(current: impl ToString, action: impl ToString) -> Self {
        Self::InvalidTransition {
            current: current.to_string(),
            action: action.to_string(),
        }
    }
}

/// Confirm that `caller` owns a resource belonging to `owner`.
///
/// The explicit pre-action ownership check used by every controller
/// method before it touches state.
pub fn ensure_owner(caller: i64, owner: i64) -> Result<(), ControlError> {
    if caller == owner {
        Ok(())
    } else {
        tracing::warn!(caller, owner, "ownership check failed");
        Err(ControlError::Forbidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_owner_accepts_matching_ids() {
        assert!(ensure_owner(7, 7).is_ok());
    }

    #[test]
    fn ensure_owner_rejects_foreign_caller() {
        assert!(matches!(ensure_owner(7, 8), Err(ControlError::Forbidden)));
    }
}
