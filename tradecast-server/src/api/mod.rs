//! HTTP and WebSocket API handlers.
//!
//! # Endpoints
//!
//! - `GET  /ws/{user_id}`                      – event stream (WebSocket)
//! - `POST /sessions` / `GET /sessions`        – create / list sessions
//! - `GET|PATCH|DELETE /sessions/{id}`         – read / edit / delete
//! - `POST /sessions/{id}/control`             – start, pause, resume, stop
//! - `POST /sessions/{id}/trades`              – settle a trade
//! - `GET  /sessions/{id}/performance`         – derived metrics
//! - `GET  /sessions/{id}/risk`                – risk report
//! - `GET  /sessions/{id}/logs`                – event log
//! - `GET  /sessions/{id}/orders`              – orders attached to a session
//! - `POST /orders` / `POST /orders/bulk`      – create / bulk create
//! - `GET  /orders` / `GET /orders/{id}`       – list / read
//! - `PATCH /orders/{id}`                      – edit an open order
//! - `POST /orders/{id}/cancel`                – cancel
//! - `POST /orders/{id}/fills`                 – apply a fill
//!
//! Caller identity comes from the `X-User-Id` header; credential
//! issuance lives in front of this service.

use axum::{
    Router,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use tradecast_core::error::ControlError;

use crate::state::AppState;

mod orders;
mod sessions;
mod ws;

/// Build the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(ws::router())
        .merge(sessions::router())
        .merge(orders::router())
}

// ---------------------------------------------------------------------------
// Caller identity
// ---------------------------------------------------------------------------

/// The authenticated caller, taken from the `X-User-Id` header.
pub(super) struct Caller(pub i64);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("x-user-id")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<i64>().ok())
            .map(Caller)
            .ok_or(ApiError::Unauthenticated)
    }
}

// ---------------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------------

/// Errors that can occur in API handlers.
#[derive(Debug)]
pub(super) enum ApiError {
    /// No usable caller identity on the request.
    Unauthenticated,
    /// A controller operation failed.
    Control(ControlError),
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        Self::Control(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "missing or invalid X-User-Id header".to_string(),
            )
                .into_response(),
            ApiError::Control(err) => {
                let status = match &err {
                    ControlError::NotFound(_) => StatusCode::NOT_FOUND,
                    ControlError::Forbidden => StatusCode::FORBIDDEN,
                    ControlError::InvalidTransition { .. } => StatusCode::CONFLICT,
                    ControlError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    ControlError::CapacityExceeded => StatusCode::TOO_MANY_REQUESTS,
                    ControlError::Internal(_) => {
                        tracing::error!(error = %err, "API internal error");
                        return (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "internal server error".to_string(),
                        )
                            .into_response();
                    }
                };
                (status, err.to_string()).into_response()
            }
        }
    }
}
