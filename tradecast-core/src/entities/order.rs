//! Open order entity.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Order execution style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Market,
    Limit,
    StopLoss,
    TakeProfit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Order lifecycle state.
///
/// `Pending -> {PartiallyFilled, Filled, Cancelled, Rejected, Expired}`,
/// `PartiallyFilled -> {Filled, Cancelled}`. The last four are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// True once the order's outcome is final; no further mutation is
    /// permitted.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::Rejected
                | OrderStatus::Expired
        )
    }

    /// True while the order may still be updated, filled or cancelled.
    pub fn is_open(self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::PartiallyFilled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// An order whose terminal outcome has not yet occurred.
///
/// Invariant: `filled_quantity + remaining_quantity == quantity` after
/// every mutation. The order controller is the sole writer of the
/// status and fill fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub id: Uuid,
    pub user_id: i64,
    pub session_id: Option<Uuid>,
    pub symbol: String,
    pub kind: OrderKind,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub avg_fill_price: Option<Decimal>,
    /// Reference assigned by the external venue, when routed.
    pub venue_order_id: Option<String>,
    #[serde(with = "time::serde::timestamp::option")]
    pub expires_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::timestamp")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::timestamp")]
    pub updated_at: OffsetDateTime,
}

/// Fields supplied when creating an order.
///
/// Serializable so a rejected bulk entry can be echoed back verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub session_id: Option<Uuid>,
    pub symbol: String,
    pub kind: OrderKind,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    #[serde(default, with = "time::serde::timestamp::option")]
    pub expires_at: Option<OffsetDateTime>,
}

/// Fields that may change while the order is still open.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderUpdate {
    pub quantity: Option<Decimal>,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    #[serde(default, with = "time::serde::timestamp::option")]
    pub expires_at: Option<OffsetDateTime>,
}

impl OpenOrder {
    /// Construct a pending order with the full quantity remaining.
    pub fn create(user_id: i64, new: NewOrder) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            user_id,
            session_id: new.session_id,
            symbol: new.symbol,
            kind: new.kind,
            side: new.side,
            quantity: new.quantity,
            limit_price: new.limit_price,
            stop_price: new.stop_price,
            status: OrderStatus::Pending,
            filled_quantity: Decimal::ZERO,
            remaining_quantity: new.quantity,
            avg_fill_price: None,
            venue_order_id: None,
            expires_at: new.expires_at,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_order(quantity: i64) -> NewOrder {
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

    #[test]
    fn create_initializes_remaining_to_quantity() {
        let order = OpenOrder::create(1, new_order(5));
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.filled_quantity, Decimal::ZERO);
        assert_eq!(order.remaining_quantity, Decimal::from(5));
        assert_eq!(
            order.filled_quantity + order.remaining_quantity,
            order.quantity
        );
    }

    #[test]
    fn terminal_and_open_partition_the_states() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::PartiallyFilled,
            OrderStatus::Filled,
            OrderStatus::Cancelled,
            OrderStatus::Rejected,
            OrderStatus::Expired,
        ] {
            assert_ne!(status.is_terminal(), status.is_open(), "{status}");
        }
    }
}
