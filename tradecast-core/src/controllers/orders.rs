//! Open-order lifecycle controller.

use super::store_failure;
use crate::entities::{NewOrder, OpenOrder, OrderKind, OrderStatus, OrderUpdate};
use crate::error::{ControlError, ensure_owner};
use crate::hub::ConnectionHub;
use crate::store::{OrderStore, SessionStore};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{info, warn};
use tradecast_sdk::{Envelope, EventKind, topics};
use uuid::Uuid;

/// Outcome of a best-effort batch creation.
#[derive(Debug, Serialize)]
pub struct BulkCreateReport {
    pub requested: usize,
    pub created: Vec<OpenOrder>,
    pub failed: Vec<BulkCreateFailure>,
}

/// One rejected entry of a batch, keyed by its position in the input.
#[derive(Debug, Serialize)]
pub struct BulkCreateFailure {
    pub index: usize,
    pub input: NewOrder,
    pub error: String,
}

/// Owns the open-order lifecycle: creation, updates, fills,
/// cancellation, expiry.
///
/// Attaching an order to a session re-validates that the session
/// belongs to the caller; the session store is read-only here.
pub struct OrderController {
    orders: Arc<dyn OrderStore>,
    sessions: Arc<dyn SessionStore>,
    hub: Arc<ConnectionHub>,
}

impl OrderController {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        sessions: Arc<dyn SessionStore>,
        hub: Arc<ConnectionHub>,
    ) -> Self {
        Self {
            orders,
            sessions,
            hub,
        }
    }

    /// Create a pending order for `caller`.
    pub async fn create(&self, caller: i64, new: NewOrder) -> Result<OpenOrder, ControlError> {
        validate_new(&new)?;
        if let Some(session_id) = new.session_id {
            let session = self
                .sessions
                .load(session_id)
                .await
                .map_err(store_failure)?
                .ok_or(ControlError::NotFound("session"))?;
            ensure_owner(caller, session.user_id)?;
        }

        let order = OpenOrder::create(caller, new);
        self.orders
            .insert(order.clone())
            .await
            .map_err(store_failure)?;

        info!(order_id = %order.id, user_id = caller, symbol = %order.symbol, "order created");
        self.publish(
            caller,
            EventKind::OrderUpdate,
            json!({ "action": "created", "order": as_value(&order) }),
        )
        .await;
        Ok(order)
    }

    /// Create each order independently; a failed entry never aborts
    /// the rest of the batch.
    pub async fn bulk_create(
        &self,
        caller: i64,
        inputs: Vec<NewOrder>,
    ) -> BulkCreateReport {
        let mut report = BulkCreateReport {
            requested: inputs.len(),
            created: Vec::new(),
            failed: Vec::new(),
        };
        for (index, input) in inputs.into_iter().enumerate() {
            match self.create(caller, input.clone()).await {
                Ok(order) => report.created.push(order),
                Err(error) => {
                    warn!(index, error = %error, "bulk create entry rejected");
                    report.failed.push(BulkCreateFailure {
                        index,
                        input,
                        error: error.to_string(),
                    });
                }
            }
        }
        report
    }

    pub async fn get(&self, caller: i64, id: Uuid) -> Result<OpenOrder, ControlError> {
        let order = self.load(id).await?;
        ensure_owner(caller, order.user_id)?;
        Ok(order)
    }

    pub async fn list(&self, caller: i64) -> Result<Vec<OpenOrder>, ControlError> {
        self.orders.list_for_user(caller).await.map_err(store_failure)
    }

    /// The orders attached to one of the caller's sessions.
    pub async fn list_for_session(
        &self,
        caller: i64,
        session_id: Uuid,
    ) -> Result<Vec<OpenOrder>, ControlError> {
        let session = self
            .sessions
            .load(session_id)
            .await
            .map_err(store_failure)?
            .ok_or(ControlError::NotFound("session"))?;
        ensure_owner(caller, session.user_id)?;
        self.orders
            .list_for_session(session_id)
            .await
            .map_err(store_failure)
    }

    /// Change an order's open fields. Permitted only while the order
    /// is Pending or PartiallyFilled.
    pub async fn update(
        &self,
        caller: i64,
        id: Uuid,
        update: OrderUpdate,
    ) -> Result<OpenOrder, ControlError> {
        let mut order = self.load(id).await?;
        ensure_owner(caller, order.user_id)?;
        if !order.status.is_open() {
            return Err(ControlError::invalid_transition(order.status, "update"));
        }

        let mut changed: Vec<&'static str> = Vec::new();
        if let Some(quantity) = update.quantity {
            if quantity <= Decimal::ZERO {
                return Err(ControlError::Validation(
                    "quantity must be positive".into(),
                ));
            }
            if quantity < order.filled_quantity {
                return Err(ControlError::Validation(format!(
                    "quantity {} is below the filled quantity {}",
                    quantity, order.filled_quantity
                )));
            }
            order.quantity = quantity;
            order.remaining_quantity = quantity - order.filled_quantity;
            changed.push("quantity");
        }
        if let Some(limit_price) = update.limit_price {
            order.limit_price = Some(limit_price);
            changed.push("limit_price");
        }
        if let Some(stop_price) = update.stop_price {
            order.stop_price = Some(stop_price);
            changed.push("stop_price");
        }
        if let Some(expires_at) = update.expires_at {
            order.expires_at = Some(expires_at);
            changed.push("expires_at");
        }
        if changed.is_empty() {
            return Ok(order);
        }

        order.updated_at = OffsetDateTime::now_utc();
        self.orders
            .update(order.clone())
            .await
            .map_err(store_failure)?;

        self.publish(
            caller,
            EventKind::OrderUpdate,
            json!({ "action": "updated", "changed": changed, "order": as_value(&order) }),
        )
        .await;
        Ok(order)
    }

    /// Cancel an open order.
    pub async fn cancel(&self, caller: i64, id: Uuid) -> Result<OpenOrder, ControlError> {
        let mut order = self.load(id).await?;
        ensure_owner(caller, order.user_id)?;
        if !order.status.is_open() {
            return Err(ControlError::invalid_transition(order.status, "cancel"));
        }

        order.status = OrderStatus::Cancelled;
        order.updated_at = OffsetDateTime::now_utc();
        self.orders
            .update(order.clone())
            .await
            .map_err(store_failure)?;

        info!(order_id = %id, user_id = caller, "order cancelled");
        self.publish(
            caller,
            EventKind::OrderCancelled,
            json!({ "order": as_value(&order) }),
        )
        .await;
        Ok(order)
    }

    /// Apply a fill reported by the execution venue.
    ///
    /// Maintains `filled + remaining == quantity` and the
    /// volume-weighted average fill price; the status moves to
    /// PartiallyFilled or Filled.
    pub async fn apply_fill(
        &self,
        id: Uuid,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<OpenOrder, ControlError> {
        let mut order = self.load(id).await?;
        if !order.status.is_open() {
            return Err(ControlError::invalid_transition(order.status, "fill"));
        }
        if quantity <= Decimal::ZERO {
            return Err(ControlError::Validation(
                "fill quantity must be positive".into(),
            ));
        }
        if quantity > order.remaining_quantity {
            return Err(ControlError::Validation(format!(
                "fill quantity {} exceeds remaining {}",
                quantity, order.remaining_quantity
            )));
        }

        let prior_cost = order.avg_fill_price.unwrap_or(Decimal::ZERO) * order.filled_quantity;
        order.filled_quantity += quantity;
        order.remaining_quantity -= quantity;
        order.avg_fill_price = Some((prior_cost + price * quantity) / order.filled_quantity);
        order.status = if order.remaining_quantity.is_zero() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        order.updated_at = OffsetDateTime::now_utc();
        self.orders
            .update(order.clone())
            .await
            .map_err(store_failure)?;

        self.publish(
            order.user_id,
            EventKind::OrderExecuted,
            json!({
                "order": as_value(&order),
                "fill": { "quantity": quantity, "price": price },
            }),
        )
        .await;
        Ok(order)
    }

    /// Cancel every open order attached to a session. Best-effort: a
    /// failed record is logged and skipped, the loop continues.
    /// Returns the number of orders cancelled.
    pub async fn cancel_open_for_session(&self, session_id: Uuid) -> usize {
        let orders = match self.orders.list_for_session(session_id).await {
            Ok(orders) => orders,
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "failed to list session orders");
                return 0;
            }
        };

        let mut cancelled = 0usize;
        for mut order in orders.into_iter().filter(|o| o.status.is_open()) {
            order.status = OrderStatus::Cancelled;
            order.updated_at = OffsetDateTime::now_utc();
            let order_id = order.id;
            let user_id = order.user_id;
            match self.orders.update(order.clone()).await {
                Ok(()) => {
                    cancelled += 1;
                    self.publish(
                        user_id,
                        EventKind::OrderCancelled,
                        json!({ "order": as_value(&order), "reason": "session_stopped" }),
                    )
                    .await;
                }
                Err(err) => {
                    warn!(order_id = %order_id, error = %err, "failed to cancel order, continuing");
                }
            }
        }
        cancelled
    }

    /// Move every open order whose expiry has passed to Expired.
    /// Returns the number of orders expired.
    pub async fn expire_due(&self, now: OffsetDateTime) -> usize {
        let due = match self.orders.list_open_due(now).await {
            Ok(due) => due,
            Err(err) => {
                warn!(error = %err, "failed to list due orders");
                return 0;
            }
        };

        let mut expired = 0usize;
        for mut order in due {
            order.status = OrderStatus::Expired;
            order.updated_at = now;
            let order_id = order.id;
            let user_id = order.user_id;
            match self.orders.update(order.clone()).await {
                Ok(()) => {
                    expired += 1;
                    info!(order_id = %order_id, "order expired");
                    self.publish(
                        user_id,
                        EventKind::OrderUpdate,
                        json!({ "action": "expired", "order": as_value(&order) }),
                    )
                    .await;
                }
                Err(err) => {
                    warn!(order_id = %order_id, error = %err, "failed to expire order, continuing");
                }
            }
        }
        expired
    }

    async fn load(&self, id: Uuid) -> Result<OpenOrder, ControlError> {
        self.orders
            .load(id)
            .await
            .map_err(store_failure)?
            .ok_or(ControlError::NotFound("order"))
    }

    async fn publish(&self, user_id: i64, kind: EventKind, payload: serde_json::Value) {
        let envelope = Envelope::new(kind, payload).for_user(user_id);
        self.hub
            .broadcast_to_topic(&topics::orders(user_id), envelope)
            .await;
    }
}

fn validate_new(new: &NewOrder) -> Result<(), ControlError> {
    if new.symbol.trim().is_empty() {
        return Err(ControlError::Validation("symbol must not be empty".into()));
    }
    if new.quantity <= Decimal::ZERO {
        return Err(ControlError::Validation(
            "quantity must be positive".into(),
        ));
    }
    match new.kind {
        OrderKind::Limit if new.limit_price.is_none() => Err(ControlError::Validation(
            "limit orders require a limit price".into(),
        )),
        OrderKind::StopLoss | OrderKind::TakeProfit if new.stop_price.is_none() => {
            Err(ControlError::Validation(
                "stop orders require a stop price".into(),
            ))
        }
        _ => Ok(()),
    }
}

fn as_value<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{NewSession, OrderSide, RiskConfig};
    use crate::store::memory::MemoryStore;

    fn controller() -> (Arc<MemoryStore>, Arc<ConnectionHub>, OrderController) {
        let store = Arc::new(MemoryStore::new());
        let hub = Arc::new(ConnectionHub::default());
        let controller = OrderController::new(
            store.clone() as Arc<dyn OrderStore>,
            store.clone() as Arc<dyn SessionStore>,
            hub.clone(),
        );
        (store, hub, controller)
    }

    fn market_order(quantity: i64) -> NewOrder {
        NewOrder {
            session_id: None,
            symbol: "BTC".into(),
            kind: OrderKind::Market,
            side: OrderSide::Buy,
            quantity: Decimal::from(quantity),
            limit_price: None,
            stop_price: None,
            expires_at: None,
        }
    }

    async fn seeded_session(store: &Arc<MemoryStore>, user_id: i64) -> Uuid {
        let session = crate::entities::TradingSession::create(
            user_id,
            NewSession {
                name: "s".into(),
                strategy: "breakout".into(),
                simulated: true,
                tags: vec![],
                initial_capital: Decimal::from(1_000),
                risk: RiskConfig::default(),
                params: Default::default(),
            },
        );
        let id = session.id;
        SessionStore::insert(store.as_ref(), session).await.unwrap();
        id
    }

    #[tokio::test]
    async fn create_initializes_pending_with_full_remaining() {
        let (_store, _hub, controller) = controller();
        let order = controller.create(1, market_order(10)).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.remaining_quantity, Decimal::from(10));
    }

    #[tokio::test]
    async fn create_rejects_limit_order_without_price() {
        let (_store, _hub, controller) = controller();
        let mut new = market_order(1);
        new.kind = OrderKind::Limit;
        let err = controller.create(1, new).await.unwrap_err();
        assert!(matches!(err, ControlError::Validation(_)));
    }

    #[tokio::test]
    async fn create_checks_session_ownership() {
        let (store, _hub, controller) = controller();
        let session_id = seeded_session(&store, 2).await;
        let mut new = market_order(1);
        new.session_id = Some(session_id);
        let err = controller.create(1, new).await.unwrap_err();
        assert!(matches!(err, ControlError::Forbidden));

        let mut new = market_order(1);
        new.session_id = Some(Uuid::new_v4());
        let err = controller.create(1, new).await.unwrap_err();
        assert!(matches!(err, ControlError::NotFound("session")));
    }

    #[tokio::test]
    async fn fills_conserve_quantity_and_track_vwap() {
        let (_store, _hub, controller) = controller();
        let order = controller.create(1, market_order(10)).await.unwrap();

        let order = controller
            .apply_fill(order.id, Decimal::from(4), Decimal::from(100))
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(
            order.filled_quantity + order.remaining_quantity,
            order.quantity
        );
        assert_eq!(order.avg_fill_price, Some(Decimal::from(100)));

        let order = controller
            .apply_fill(order.id, Decimal::from(6), Decimal::from(200))
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.remaining_quantity, Decimal::ZERO);
        // (4*100 + 6*200) / 10
        assert_eq!(order.avg_fill_price, Some(Decimal::from(160)));
    }

    #[tokio::test]
    async fn over_fill_is_rejected_without_mutation() {
        let (_store, _hub, controller) = controller();
        let order = controller.create(1, market_order(5)).await.unwrap();
        let err = controller
            .apply_fill(order.id, Decimal::from(6), Decimal::from(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Validation(_)));
        let reloaded = controller.get(1, order.id).await.unwrap();
        assert_eq!(reloaded, order);
    }

    #[tokio::test]
    async fn terminal_orders_are_immutable() {
        let (_store, _hub, controller) = controller();
        let order = controller.create(1, market_order(5)).await.unwrap();
        let cancelled = controller.cancel(1, order.id).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);

        let err = controller
            .update(
                1,
                order.id,
                OrderUpdate {
                    quantity: Some(Decimal::from(9)),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::InvalidTransition { .. }));

        let err = controller.cancel(1, order.id).await.unwrap_err();
        assert!(matches!(err, ControlError::InvalidTransition { .. }));

        let err = controller
            .apply_fill(order.id, Decimal::ONE, Decimal::from(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::InvalidTransition { .. }));

        // Nothing about the record moved.
        let reloaded = controller.get(1, order.id).await.unwrap();
        assert_eq!(reloaded, cancelled);
    }

    #[tokio::test]
    async fn update_reports_changed_fields_and_keeps_conservation() {
        let (_store, _hub, controller) = controller();
        let order = controller.create(1, market_order(10)).await.unwrap();
        controller
            .apply_fill(order.id, Decimal::from(3), Decimal::from(50))
            .await
            .unwrap();

        let updated = controller
            .update(
                1,
                order.id,
                OrderUpdate {
                    quantity: Some(Decimal::from(8)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.remaining_quantity, Decimal::from(5));
        assert_eq!(
            updated.filled_quantity + updated.remaining_quantity,
            updated.quantity
        );

        // Shrinking below what has already filled is rejected.
        let err = controller
            .update(
                1,
                order.id,
                OrderUpdate {
                    quantity: Some(Decimal::from(2)),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Validation(_)));
    }

    #[tokio::test]
    async fn update_by_foreign_caller_is_forbidden() {
        let (_store, _hub, controller) = controller();
        let order = controller.create(1, market_order(5)).await.unwrap();
        let err = controller
            .update(2, order.id, OrderUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Forbidden));
    }

    #[tokio::test]
    async fn bulk_create_reports_partial_failures_by_index() {
        let (store, _hub, controller) = controller();
        let foreign_session = seeded_session(&store, 99).await;

        let mut inputs: Vec<NewOrder> = (0..5).map(|_| market_order(1)).collect();
        inputs[2].session_id = Some(foreign_session);

        let report = controller.bulk_create(1, inputs).await;
        assert_eq!(report.requested, 5);
        assert_eq!(report.created.len(), 4);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].index, 2);
        assert!(report.failed[0].error.contains("own"));
        assert_eq!(controller.list(1).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn cancel_open_for_session_skips_settled_orders() {
        let (store, _hub, controller) = controller();
        let session_id = seeded_session(&store, 1).await;

        let mut ids = Vec::new();
        for _ in 0..3 {
            let mut new = market_order(2);
            new.session_id = Some(session_id);
            ids.push(controller.create(1, new).await.unwrap().id);
        }
        // One partial fill, one complete fill.
        controller
            .apply_fill(ids[1], Decimal::ONE, Decimal::from(10))
            .await
            .unwrap();
        let mut filled = market_order(2);
        filled.session_id = Some(session_id);
        let filled = controller.create(1, filled).await.unwrap();
        controller
            .apply_fill(filled.id, Decimal::from(2), Decimal::from(10))
            .await
            .unwrap();

        let cancelled = controller.cancel_open_for_session(session_id).await;
        assert_eq!(cancelled, 3);
        for id in ids {
            assert_eq!(
                controller.get(1, id).await.unwrap().status,
                OrderStatus::Cancelled
            );
        }
        assert_eq!(
            controller.get(1, filled.id).await.unwrap().status,
            OrderStatus::Filled
        );
    }

    #[tokio::test]
    async fn expire_due_touches_only_due_open_orders() {
        let (_store, _hub, controller) = controller();
        let now = OffsetDateTime::now_utc();

        let mut due = market_order(1);
        due.expires_at = Some(now - time::Duration::minutes(1));
        let due = controller.create(1, due).await.unwrap();

        let mut later = market_order(1);
        later.expires_at = Some(now + time::Duration::hours(1));
        let later = controller.create(1, later).await.unwrap();

        let expired = controller.expire_due(now).await;
        assert_eq!(expired, 1);
        assert_eq!(
            controller.get(1, due.id).await.unwrap().status,
            OrderStatus::Expired
        );
        assert_eq!(
            controller.get(1, later.id).await.unwrap().status,
            OrderStatus::Pending
        );
    }

    #[tokio::test]
    async fn lifecycle_events_reach_the_owner_topic() {
        let (_store, hub, controller) = controller();
        let (tx, mut rx) = crate::hub::connection_channel();
        let conn = hub.connect(1, tx).await.unwrap();
        rx.recv().await.unwrap(); // connection ack
        hub.subscribe(conn, &topics::orders(1)).await;
        rx.recv().await.unwrap(); // subscription ack

        let order = controller.create(1, market_order(3)).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::OrderUpdate);
        assert_eq!(event.payload["action"], "created");

        controller.cancel(1, order.id).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::OrderCancelled);
        assert_eq!(event.payload["order"]["id"], order.id.to_string());
    }
}
