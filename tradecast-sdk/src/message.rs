//! Inbound client message decoding.
//!
//! Every inbound text frame is `{"type": string, "data": object}`.
//! Decoding happens in two steps (parse the JSON, then dispatch on
//! `type`) so the two failure modes stay distinguishable: a frame that
//! is not valid JSON is [`DecodeError::Malformed`], while valid JSON
//! with an unrecognized `type` is [`DecodeError::UnknownType`]. Both
//! are answered with an `error` envelope; neither closes the
//! connection.

use serde::Deserialize;
use thiserror::Error;

/// A decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Subscribe this connection to a topic.
    Subscribe { topic: String },
    /// Unsubscribe this connection from a topic.
    Unsubscribe { topic: String },
    /// Request the caller's portfolio snapshot.
    GetPortfolio,
    /// Request the caller's pending alerts.
    GetAlerts,
    /// Request the latest price for one asset.
    GetPrice { symbol: String },
    /// Request the caller's trading sessions.
    GetTradingSessions,
    /// Request the caller's orders.
    GetOrders,
    /// Liveness refresh from the client.
    Heartbeat,
}

/// Why an inbound frame could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame was not valid JSON, or `data` did not match the
    /// shape required by its `type`.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    /// Valid JSON, but a `type` the server does not recognize.
    #[error("unknown message type: {0}")]
    UnknownType(String),
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct TopicData {
    topic: String,
}

#[derive(Deserialize)]
struct SymbolData {
    symbol: String,
}

impl ClientMessage {
    /// Decode one inbound text frame.
    pub fn decode(frame: &str) -> Result<Self, DecodeError> {
        let raw: RawMessage = serde_json::from_str(frame)?;
        match raw.kind.as_str() {
            "subscribe" => {
                let data: TopicData = serde_json::from_value(raw.data)?;
                Ok(Self::Subscribe { topic: data.topic })
            }
            "unsubscribe" => {
                let data: TopicData = serde_json::from_value(raw.data)?;
                Ok(Self::Unsubscribe { topic: data.topic })
            }
            "get_portfolio" => Ok(Self::GetPortfolio),
            "get_alerts" => Ok(Self::GetAlerts),
            "get_price" => {
                let data: SymbolData = serde_json::from_value(raw.data)?;
                Ok(Self::GetPrice {
                    symbol: data.symbol,
                })
            }
            "get_trading_sessions" => Ok(Self::GetTradingSessions),
            "get_orders" => Ok(Self::GetOrders),
            "heartbeat" => Ok(Self::Heartbeat),
            other => Err(DecodeError::UnknownType(other.to_string())),
        }
    }
}

/// Well-known WebSocket close codes used by the event stream.
///
/// Codes in the 4000–4999 range are reserved for application use by
/// [RFC 6455 §7.4.2](https://www.rfc-editor.org/rfc/rfc6455#section-7.4.2).
pub struct WsCloseCode;

impl WsCloseCode {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;

    /// The connection was refused because the user already holds the
    /// maximum number of concurrent connections.
    pub const POLICY_VIOLATION: u16 = 1008;

    /// An unexpected server-side error prevented the connection from
    /// continuing.
    pub const INTERNAL_ERROR: u16 = 1011;
}
