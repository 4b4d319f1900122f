//! `GET /ws/{user_id}` — WebSocket event stream.
//!
//! Upgrades the HTTP connection to a WebSocket and registers it with
//! the hub. Outbound envelopes flow through the connection's bounded
//! queue and are written by a dedicated task, so per-connection order
//! is the broadcast order. The reader loop decodes inbound
//! [`ClientMessage`] frames; undecodable frames are answered with an
//! `error` envelope and never close the connection.

use axum::{
    Router,
    extract::{
        Path, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::stream::{SplitSink, SplitStream, StreamExt};
use futures_util::SinkExt;
use serde_json::json;
use tradecast_sdk::{ClientMessage, Envelope, EventKind, WsCloseCode};
use uuid::Uuid;

use crate::state::AppState;
use tradecast_core::hub::{ConnectionReceiver, connection_channel};

pub(super) fn router() -> Router<AppState> {
    Router::new().route("/ws/{user_id}", get(event_stream))
}

async fn event_stream(
    state: State<AppState>,
    Path(user_id): Path<i64>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let app_state = state.0.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, user_id))
}

/// Drive a single WebSocket connection from accept to cleanup.
async fn handle_socket(mut socket: WebSocket, state: AppState, user_id: i64) {
    let (sender, receiver) = connection_channel();
    let connection_id = match state.hub.connect(user_id, sender).await {
        Ok(id) => id,
        Err(err) => {
            // Over the per-user cap: refuse with a policy code rather
            // than silently dropping.
            let _ = send_json(&mut socket, &Envelope::error(err.to_string())).await;
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: WsCloseCode::POLICY_VIOLATION,
                    reason: "connection limit reached".into(),
                })))
                .await;
            return;
        }
    };

    tracing::debug!(%connection_id, user_id, "WS: connection established");

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_outbound(sink, receiver));

    read_inbound(stream, &state, user_id, connection_id).await;

    // Every exit path (client close, transport error) ends here; the
    // hub removes the connection and drops its sender, which lets the
    // writer task drain and finish.
    state.hub.disconnect(connection_id).await;
    let _ = writer.await;
    tracing::debug!(%connection_id, user_id, "WS: connection closed");
}

/// Drain the connection's outbound queue into the socket, in order.
async fn write_outbound(mut sink: SplitSink<WebSocket, Message>, mut receiver: ConnectionReceiver) {
    while let Some(envelope) = receiver.recv().await {
        let Ok(frame) = serde_json::to_string(&envelope) else {
            continue;
        };
        if sink.send(Message::Text(frame.into())).await.is_err() {
            // Transport gone; the hub evicts us on its next delivery.
            return;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}

/// Read inbound frames until the client disconnects or the transport
/// fails.
async fn read_inbound(
    mut stream: SplitStream<WebSocket>,
    state: &AppState,
    user_id: i64,
    connection_id: Uuid,
) {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                dispatch(state, user_id, connection_id, text.as_str()).await;
            }
            Ok(Message::Binary(_)) => {
                state
                    .hub
                    .send_to_connection(
                        connection_id,
                        Envelope::error("binary frames are not supported"),
                    )
                    .await;
            }
            Ok(Message::Close(_)) => return,
            Ok(_) => {} // Ping/Pong are handled by axum.
            Err(_) => return,
        }
    }
}

/// Decode and act on one inbound frame.
async fn dispatch(state: &AppState, user_id: i64, connection_id: Uuid, frame: &str) {
    let message = match ClientMessage::decode(frame) {
        Ok(message) => message,
        Err(err) => {
            tracing::debug!(%connection_id, error = %err, "WS: undecodable frame");
            state
                .hub
                .send_to_connection(connection_id, Envelope::error(err.to_string()))
                .await;
            return;
        }
    };

    match message {
        ClientMessage::Subscribe { topic } => {
            if topic.trim().is_empty() {
                state
                    .hub
                    .send_to_connection(
                        connection_id,
                        Envelope::new(
                            EventKind::SubscriptionError,
                            json!({ "topic": topic, "message": "topic must not be empty" }),
                        ),
                    )
                    .await;
            } else {
                // The hub acknowledges the subscription itself.
                state.hub.subscribe(connection_id, &topic).await;
            }
        }
        ClientMessage::Unsubscribe { topic } => {
            state.hub.unsubscribe(connection_id, &topic).await;
        }
        ClientMessage::Heartbeat => {
            state.hub.touch(connection_id).await;
            state
                .hub
                .send_to_connection(
                    connection_id,
                    Envelope::new(EventKind::Heartbeat, json!({ "ack": true })),
                )
                .await;
        }
        ClientMessage::GetPortfolio => {
            let snapshot = state.snapshots.portfolio(user_id).await;
            reply(state, connection_id, user_id, EventKind::PortfolioUpdate, snapshot).await;
        }
        ClientMessage::GetAlerts => {
            let snapshot = state.snapshots.alerts(user_id).await;
            reply(state, connection_id, user_id, EventKind::AlertNotification, snapshot).await;
        }
        ClientMessage::GetPrice { symbol } => {
            let snapshot = state.snapshots.price(&symbol).await;
            reply(state, connection_id, user_id, EventKind::PriceUpdate, snapshot).await;
        }
        ClientMessage::GetTradingSessions => match state.sessions.list(user_id).await {
            Ok(sessions) => {
                reply(
                    state,
                    connection_id,
                    user_id,
                    EventKind::SessionUpdate,
                    json!({ "sessions": sessions }),
                )
                .await;
            }
            Err(err) => {
                state
                    .hub
                    .send_to_connection(connection_id, Envelope::error(err.to_string()))
                    .await;
            }
        },
        ClientMessage::GetOrders => match state.orders.list(user_id).await {
            Ok(orders) => {
                reply(
                    state,
                    connection_id,
                    user_id,
                    EventKind::OrderUpdate,
                    json!({ "orders": orders }),
                )
                .await;
            }
            Err(err) => {
                state
                    .hub
                    .send_to_connection(connection_id, Envelope::error(err.to_string()))
                    .await;
            }
        },
    }
}

/// Send a query reply to the requesting connection only.
async fn reply(
    state: &AppState,
    connection_id: Uuid,
    user_id: i64,
    kind: EventKind,
    payload: serde_json::Value,
) {
    let envelope = Envelope::new(kind, payload).for_user(user_id);
    state.hub.send_to_connection(connection_id, envelope).await;
}

/// Serialize `value` as JSON and send it as a text WebSocket frame.
///
/// Returns `Err(())` if the send fails (client disconnected).
async fn send_json<T: serde::Serialize>(socket: &mut WebSocket, value: &T) -> Result<(), ()> {
    let json = serde_json::to_string(value).map_err(|_| ())?;
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}
