//! Trading-session control surface.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tradecast_core::entities::{NewSession, SessionAction, SessionUpdate, TradeSettlement};
use uuid::Uuid;

use super::{ApiError, Caller};
use crate::state::AppState;

pub(super) fn router() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(create_session).get(list_sessions))
        .route(
            "/sessions/{session_id}",
            get(get_session).patch(update_session).delete(delete_session),
        )
        .route("/sessions/{session_id}/control", post(control_session))
        .route("/sessions/{session_id}/trades", post(record_trade))
        .route("/sessions/{session_id}/performance", get(performance))
        .route("/sessions/{session_id}/risk", get(risk_report))
        .route("/sessions/{session_id}/logs", get(logs))
        .route("/sessions/{session_id}/orders", get(session_orders))
}

async fn create_session(
    state: State<AppState>,
    Caller(caller): Caller,
    Json(new): Json<NewSession>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.sessions.create(caller, new).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn list_sessions(
    state: State<AppState>,
    Caller(caller): Caller,
) -> Result<impl IntoResponse, ApiError> {
    let sessions = state.sessions.list(caller).await?;
    Ok(Json(sessions))
}

async fn get_session(
    state: State<AppState>,
    Caller(caller): Caller,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.sessions.get(caller, session_id).await?;
    Ok(Json(session))
}

async fn update_session(
    state: State<AppState>,
    Caller(caller): Caller,
    Path(session_id): Path<Uuid>,
    Json(update): Json<SessionUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.sessions.update(caller, session_id, update).await?;
    Ok(Json(session))
}

async fn delete_session(
    state: State<AppState>,
    Caller(caller): Caller,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.sessions.delete(caller, session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Body of `POST /sessions/{id}/control`.
#[derive(Debug, Deserialize)]
struct ControlRequest {
    action: SessionAction,
    reason: Option<String>,
}

async fn control_session(
    state: State<AppState>,
    Caller(caller): Caller,
    Path(session_id): Path<Uuid>,
    Json(request): Json<ControlRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .sessions
        .control(caller, session_id, request.action, request.reason)
        .await?;
    Ok(Json(session))
}

async fn record_trade(
    state: State<AppState>,
    Caller(caller): Caller,
    Path(session_id): Path<Uuid>,
    Json(settlement): Json<TradeSettlement>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .sessions
        .record_trade(caller, session_id, settlement)
        .await?;
    Ok(Json(session))
}

async fn performance(
    state: State<AppState>,
    Caller(caller): Caller,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let metrics = state.sessions.performance(caller, session_id).await?;
    Ok(Json(metrics))
}

async fn risk_report(
    state: State<AppState>,
    Caller(caller): Caller,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.sessions.risk_report(caller, session_id).await?;
    Ok(Json(report))
}

async fn logs(
    state: State<AppState>,
    Caller(caller): Caller,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let events = state.sessions.logs(caller, session_id).await?;
    Ok(Json(events))
}

async fn session_orders(
    state: State<AppState>,
    Caller(caller): Caller,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let orders = state.orders.list_for_session(caller, session_id).await?;
    Ok(Json(orders))
}
