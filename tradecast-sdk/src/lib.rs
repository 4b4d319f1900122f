//! Wire protocol surface shared by the tradecast server and its clients.
//!
//! Everything a client sees on the socket is defined here: the
//! [`Envelope`] pushed by the server, the [`ClientMessage`] shapes the
//! server accepts, the topic-name constructors, and the WebSocket close
//! codes used when a connection is refused or torn down.

pub mod envelope;
pub mod message;
pub mod topics;

pub use envelope::{Envelope, EventKind};
pub use message::{ClientMessage, DecodeError, WsCloseCode};
