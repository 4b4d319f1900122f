//! Canonical topic keys.
//!
//! A topic is a plain string key identifying one broadcast channel.
//! Clients may subscribe to any string, but everything the server
//! publishes goes to one of the keys built here, so both sides use
//! these constructors instead of formatting strings by hand.

/// Global system notices, delivered to every subscriber.
pub const SYSTEM_ALL: &str = "system:all";

/// Market data for one asset, e.g. `price:BTC`.
pub fn price(symbol: &str) -> String {
    format!("price:{symbol}")
}

/// One user's alert notifications.
pub fn alerts(user_id: i64) -> String {
    format!("alerts:user:{user_id}")
}

/// One user's portfolio value/composition changes.
pub fn portfolio(user_id: i64) -> String {
    format!("portfolio:user:{user_id}")
}

/// One user's executed trade notifications.
pub fn trades(user_id: i64) -> String {
    format!("trades:user:{user_id}")
}

/// One user's trading-session lifecycle events.
pub fn sessions(user_id: i64) -> String {
    format!("trading_sessions:user:{user_id}")
}

/// One user's order lifecycle events.
pub fn orders(user_id: i64) -> String {
    format!("orders:user:{user_id}")
}

/// User-scoped system notices.
pub fn system_user(user_id: i64) -> String {
    format!("system:user:{user_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_keys_match_the_wire_convention() {
        assert_eq!(price("BTC"), "price:BTC");
        assert_eq!(alerts(42), "alerts:user:42");
        assert_eq!(portfolio(42), "portfolio:user:42");
        assert_eq!(trades(42), "trades:user:42");
        assert_eq!(sessions(42), "trading_sessions:user:42");
        assert_eq!(orders(42), "orders:user:42");
        assert_eq!(system_user(42), "system:user:42");
        assert_eq!(SYSTEM_ALL, "system:all");
    }
}
