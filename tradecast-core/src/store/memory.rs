//! In-process storage backend.
//!
//! Backs simulation runs and the test suite. Every map sits behind its
//! own `RwLock`; records are cloned in and out, so a failed controller
//! operation can never leave a half-written record visible.

use super::{
    SessionEvent, SessionEventLog, SessionStore, SnapshotProvider, StoreError, StoreResult,
    TradeLedger,
};
use crate::entities::{OpenOrder, TradeRecord, TradingSession};
use crate::store::OrderStore;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

/// All collaborator contracts in one in-memory backend.
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<Uuid, TradingSession>>,
    orders: RwLock<HashMap<Uuid, OpenOrder>>,
    trades: RwLock<HashMap<Uuid, Vec<TradeRecord>>>,
    events: RwLock<HashMap<Uuid, Vec<SessionEvent>>>,
    prices: RwLock<HashMap<String, Decimal>>,
    portfolios: RwLock<HashMap<i64, serde_json::Value>>,
    alerts: RwLock<HashMap<i64, Vec<serde_json::Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest price for a symbol.
    pub async fn set_price(&self, symbol: impl Into<String>, price: Decimal) {
        self.prices.write().await.insert(symbol.into(), price);
    }

    /// Replace a user's portfolio snapshot.
    pub async fn put_portfolio(&self, user_id: i64, snapshot: serde_json::Value) {
        self.portfolios.write().await.insert(user_id, snapshot);
    }

    /// Queue an alert for a user.
    pub async fn push_alert(&self, user_id: i64, alert: serde_json::Value) {
        self.alerts.write().await.entry(user_id).or_default().push(alert);
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert(&self, session: TradingSession) -> StoreResult<()> {
        self.sessions.write().await.insert(session.id, session);
        Ok(())
    }

    async fn load(&self, id: Uuid) -> StoreResult<Option<TradingSession>> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn update(&self, session: TradingSession) -> StoreResult<()> {
        let mut sessions = self.sessions.write().await;
        if !sessions.contains_key(&session.id) {
            return Err(StoreError::NotFound);
        }
        sessions.insert(session.id, session);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        match self.sessions.write().await.remove(&id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound),
        }
    }

    async fn list_for_user(&self, user_id: i64) -> StoreResult<Vec<TradingSession>> {
        let mut sessions: Vec<TradingSession> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert(&self, order: OpenOrder) -> StoreResult<()> {
        self.orders.write().await.insert(order.id, order);
        Ok(())
    }

    async fn load(&self, id: Uuid) -> StoreResult<Option<OpenOrder>> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn update(&self, order: OpenOrder) -> StoreResult<()> {
        let mut orders = self.orders.write().await;
        if !orders.contains_key(&order.id) {
            return Err(StoreError::NotFound);
        }
        orders.insert(order.id, order);
        Ok(())
    }

    async fn list_for_user(&self, user_id: i64) -> StoreResult<Vec<OpenOrder>> {
        let mut orders: Vec<OpenOrder> = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    async fn list_for_session(&self, session_id: Uuid) -> StoreResult<Vec<OpenOrder>> {
        let mut orders: Vec<OpenOrder> = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.session_id == Some(session_id))
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    async fn list_open_due(&self, now: OffsetDateTime) -> StoreResult<Vec<OpenOrder>> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .filter(|o| {
                o.status.is_open() && o.expires_at.is_some_and(|expires| expires <= now)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TradeLedger for MemoryStore {
    async fn append(&self, trade: TradeRecord) -> StoreResult<()> {
        self.trades
            .write()
            .await
            .entry(trade.session_id)
            .or_default()
            .push(trade);
        Ok(())
    }

    async fn list_for_session(&self, session_id: Uuid) -> StoreResult<Vec<TradeRecord>> {
        Ok(self
            .trades
            .read()
            .await
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl SessionEventLog for MemoryStore {
    async fn append(&self, event: SessionEvent) -> StoreResult<()> {
        self.events
            .write()
            .await
            .entry(event.session_id)
            .or_default()
            .push(event);
        Ok(())
    }

    async fn list_for_session(&self, session_id: Uuid) -> StoreResult<Vec<SessionEvent>> {
        Ok(self
            .events
            .read()
            .await
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl SnapshotProvider for MemoryStore {
    async fn portfolio(&self, user_id: i64) -> serde_json::Value {
        self.portfolios
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| json!({ "user_id": user_id, "positions": [] }))
    }

    async fn alerts(&self, user_id: i64) -> serde_json::Value {
        let alerts = self
            .alerts
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default();
        json!({ "user_id": user_id, "alerts": alerts })
    }

    async fn price(&self, symbol: &str) -> serde_json::Value {
        let price = self.prices.read().await.get(symbol).copied();
        json!({ "symbol": symbol, "price": price })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{NewOrder, OrderKind, OrderSide};

    fn order(user_id: i64, expires_in: Option<time::Duration>) -> OpenOrder {
        OpenOrder::create(
            user_id,
            NewOrder {
                session_id: None,
                symbol: "BTC".into(),
                kind: OrderKind::Market,
                side: OrderSide::Buy,
                quantity: Decimal::ONE,
                limit_price: None,
                stop_price: None,
                expires_at: expires_in.map(|d| OffsetDateTime::now_utc() + d),
            },
        )
    }

    #[tokio::test]
    async fn update_of_missing_record_is_not_found() {
        let store = MemoryStore::new();
        let o = order(1, None);
        assert!(matches!(
            OrderStore::update(&store, o).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn list_open_due_skips_unexpired_and_expiry_free_orders() {
        let store = MemoryStore::new();
        let due = order(1, Some(time::Duration::seconds(-5)));
        let later = order(1, Some(time::Duration::hours(1)));
        let never = order(1, None);
        let due_id = due.id;
        OrderStore::insert(&store, due).await.unwrap();
        OrderStore::insert(&store, later).await.unwrap();
        OrderStore::insert(&store, never).await.unwrap();

        let found = store.list_open_due(OffsetDateTime::now_utc()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, due_id);
    }

    #[tokio::test]
    async fn snapshots_answer_with_defaults_when_empty() {
        let store = MemoryStore::new();
        let portfolio = store.portfolio(9).await;
        assert_eq!(portfolio["user_id"], 9);
        let price = store.price("BTC").await;
        assert!(price["price"].is_null());

        store.set_price("BTC", Decimal::from(64_000)).await;
        let price = store.price("BTC").await;
        assert_eq!(price["symbol"], "BTC");
        assert!(!price["price"].is_null());
    }
}
