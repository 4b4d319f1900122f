//! The immutable event unit pushed to connections.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// The enumerated kind of an [`Envelope`].
///
/// Serialized as the snake_case `kind` field of the JSON frame, so
/// clients can dispatch without inspecting the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PriceUpdate,
    AlertNotification,
    PortfolioUpdate,
    TradeNotification,
    SystemNotification,
    SessionUpdate,
    SessionStart,
    SessionStop,
    SessionPause,
    SessionResume,
    OrderUpdate,
    OrderExecuted,
    OrderCancelled,
    PerformanceUpdate,
    RiskAlert,
    Heartbeat,
    SubscriptionSuccess,
    SubscriptionError,
    Error,
}

/// A single server-to-client message.
///
/// Immutable once constructed; the hub clones it per subscriber and
/// serializes it as one JSON text frame. `user_id` is set only for
/// user-scoped events (delivered via `send_to_user` rather than a
/// topic broadcast).
///
/// ```json
/// {"id":"...","kind":"price_update","payload":{"symbol":"BTC","price":"64210.5"},"timestamp":1754550000}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique message id, generated at construction.
    pub id: Uuid,
    /// Event kind for client-side dispatch.
    pub kind: EventKind,
    /// Opaque structured data; shape depends on `kind`.
    pub payload: serde_json::Value,
    /// Construction time, serialized as a unix timestamp.
    #[serde(with = "time::serde::timestamp")]
    pub timestamp: OffsetDateTime,
    /// Target user for user-scoped events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
}

impl Envelope {
    /// Construct a new envelope, stamping the id and timestamp.
    pub fn new(kind: EventKind, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            payload,
            timestamp: OffsetDateTime::now_utc(),
            user_id: None,
        }
    }

    /// Mark this envelope as user-scoped.
    pub fn for_user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Shorthand for the `error` envelope sent back on a bad inbound frame.
    pub fn error(description: impl Into<String>) -> Self {
        Self::new(
            EventKind::Error,
            serde_json::json!({ "message": description.into() }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_kind_as_snake_case() {
        let envelope = Envelope::new(
            EventKind::PriceUpdate,
            serde_json::json!({ "symbol": "BTC" }),
        );
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["kind"], "price_update");
        assert_eq!(json["payload"]["symbol"], "BTC");
        assert!(json["timestamp"].is_i64());
        // Not user-scoped, so the field is omitted entirely.
        assert!(json.get("user_id").is_none());
    }

    #[test]
    fn for_user_sets_target() {
        let envelope = Envelope::new(EventKind::AlertNotification, serde_json::json!({}))
            .for_user(42);
        assert_eq!(envelope.user_id, Some(42));
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["user_id"], 42);
    }

    #[test]
    fn error_envelope_carries_description() {
        let envelope = Envelope::error("bad frame");
        assert_eq!(envelope.kind, EventKind::Error);
        assert_eq!(envelope.payload["message"], "bad frame");
    }
}
