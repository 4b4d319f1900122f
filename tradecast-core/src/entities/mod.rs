//! Domain entities owned by the controllers.

pub mod order;
pub mod session;
pub mod trade;

pub use order::{NewOrder, OpenOrder, OrderKind, OrderSide, OrderStatus, OrderUpdate};
pub use session::{
    NewSession, RiskConfig, SessionAction, SessionStatus, SessionUpdate, TradingSession,
};
pub use trade::{TradeRecord, TradeSettlement};
