//! Persistence collaborator contracts.
//!
//! The controllers own all domain logic but delegate durable state to
//! these narrow traits. Backends live elsewhere; [`memory::MemoryStore`]
//! is the in-process implementation used for simulation runs and
//! tests.

pub mod memory;

use crate::entities::{OpenOrder, TradeRecord, TradingSession};
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Errors surfaced by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The referenced record does not exist.
    #[error("record not found")]
    NotFound,
    /// Opaque backend failure; detail goes to the server log only.
    #[error("storage backend failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable trading-session records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: TradingSession) -> StoreResult<()>;
    async fn load(&self, id: Uuid) -> StoreResult<Option<TradingSession>>;
    async fn update(&self, session: TradingSession) -> StoreResult<()>;
    async fn delete(&self, id: Uuid) -> StoreResult<()>;
    async fn list_for_user(&self, user_id: i64) -> StoreResult<Vec<TradingSession>>;
}

/// Durable order records.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: OpenOrder) -> StoreResult<()>;
    async fn load(&self, id: Uuid) -> StoreResult<Option<OpenOrder>>;
    async fn update(&self, order: OpenOrder) -> StoreResult<()>;
    async fn list_for_user(&self, user_id: i64) -> StoreResult<Vec<OpenOrder>>;
    async fn list_for_session(&self, session_id: Uuid) -> StoreResult<Vec<OpenOrder>>;
    /// Open orders whose expiry timestamp is at or before `now`.
    async fn list_open_due(&self, now: OffsetDateTime) -> StoreResult<Vec<OpenOrder>>;
}

/// Ordered, append-only trade ledger per session.
#[async_trait]
pub trait TradeLedger: Send + Sync {
    async fn append(&self, trade: TradeRecord) -> StoreResult<()>;
    async fn list_for_session(&self, session_id: Uuid) -> StoreResult<Vec<TradeRecord>>;
}

/// One entry of the append-only session event log.
#[derive(Debug, Clone, Serialize)]
pub struct SessionEvent {
    pub id: Uuid,
    pub session_id: Uuid,
    pub kind: String,
    pub detail: serde_json::Value,
    #[serde(with = "time::serde::timestamp")]
    pub recorded_at: OffsetDateTime,
}

impl SessionEvent {
    pub fn new(session_id: Uuid, kind: impl Into<String>, detail: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            kind: kind.into(),
            detail,
            recorded_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Append-only audit log of session lifecycle events.
#[async_trait]
pub trait SessionEventLog: Send + Sync {
    async fn append(&self, event: SessionEvent) -> StoreResult<()>;
    async fn list_for_session(&self, session_id: Uuid) -> StoreResult<Vec<SessionEvent>>;
}

/// Read-only collaborator answering the `get_portfolio`, `get_alerts`
/// and `get_price` inbound queries.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    async fn portfolio(&self, user_id: i64) -> serde_json::Value;
    async fn alerts(&self, user_id: i64) -> serde_json::Value;
    async fn price(&self, symbol: &str) -> serde_json::Value;
}
