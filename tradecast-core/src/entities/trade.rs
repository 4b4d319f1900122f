//! Settled trade records attributed to a session.

use crate::entities::order::OrderSide;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// A settlement reported against a session.
///
/// `pnl` is the realized profit (positive) or loss (negative) of the
/// trade, net of price movement but gross of `fees`.
#[derive(Debug, Clone, Deserialize)]
pub struct TradeSettlement {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub pnl: Decimal,
    #[serde(default)]
    pub fees: Decimal,
}

/// One entry in a session's trade ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub pnl: Decimal,
    pub fees: Decimal,
    #[serde(with = "time::serde::timestamp")]
    pub executed_at: OffsetDateTime,
}

impl TradeRecord {
    /// Build a ledger entry from a reported settlement.
    pub fn from_settlement(session_id: Uuid, settlement: TradeSettlement) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            symbol: settlement.symbol,
            side: settlement.side,
            quantity: settlement.quantity,
            price: settlement.price,
            pnl: settlement.pnl,
            fees: settlement.fees,
            executed_at: OffsetDateTime::now_utc(),
        }
    }
}
