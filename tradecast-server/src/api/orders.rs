//! Order control surface.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use rust_decimal::Decimal;
use serde::Deserialize;
use tradecast_core::entities::{NewOrder, OrderUpdate};
use uuid::Uuid;

use super::{ApiError, Caller};
use crate::state::AppState;

pub(super) fn router() -> Router<AppState> {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/bulk", post(bulk_create))
        .route("/orders/{order_id}", get(get_order).patch(update_order))
        .route("/orders/{order_id}/cancel", post(cancel_order))
        .route("/orders/{order_id}/fills", post(apply_fill))
}

async fn create_order(
    state: State<AppState>,
    Caller(caller): Caller,
    Json(new): Json<NewOrder>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state.orders.create(caller, new).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// Best-effort batch: the response always carries both the created
/// orders and the per-index failures.
async fn bulk_create(
    state: State<AppState>,
    Caller(caller): Caller,
    Json(inputs): Json<Vec<NewOrder>>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.orders.bulk_create(caller, inputs).await;
    Ok(Json(report))
}

async fn list_orders(
    state: State<AppState>,
    Caller(caller): Caller,
) -> Result<impl IntoResponse, ApiError> {
    let orders = state.orders.list(caller).await?;
    Ok(Json(orders))
}

async fn get_order(
    state: State<AppState>,
    Caller(caller): Caller,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state.orders.get(caller, order_id).await?;
    Ok(Json(order))
}

async fn update_order(
    state: State<AppState>,
    Caller(caller): Caller,
    Path(order_id): Path<Uuid>,
    Json(update): Json<OrderUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state.orders.update(caller, order_id, update).await?;
    Ok(Json(order))
}

async fn cancel_order(
    state: State<AppState>,
    Caller(caller): Caller,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state.orders.cancel(caller, order_id).await?;
    Ok(Json(order))
}

/// Body of `POST /orders/{id}/fills`.
#[derive(Debug, Deserialize)]
struct FillRequest {
    quantity: Decimal,
    price: Decimal,
}

/// Report a fill against the caller's order. Ownership is checked
/// before the fill is applied.
async fn apply_fill(
    state: State<AppState>,
    Caller(caller): Caller,
    Path(order_id): Path<Uuid>,
    Json(fill): Json<FillRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.orders.get(caller, order_id).await?;
    let order = state
        .orders
        .apply_fill(order_id, fill.quantity, fill.price)
        .await?;
    Ok(Json(order))
}
