//! WebSocket handling
//!
//! One task pair per dashboard connection: a read loop that parses client
//! commands and a send task that drains this connection's outbound channel.
//! Two forwarders feed the outbound channel — one from the registry's
//! global broadcast stream, one from the connection's targeted-event
//! channel (stop confirmations, pre-emption notices).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use applywatch_protocol::{ClientMessage, ServerMessage};

use crate::state::SessionRegistry;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Messages that can be sent through the WebSocket
enum OutboundMessage {
    /// JSON-serialized ServerMessage
    Json(ServerMessage),
    /// Raw pong response
    Pong(Bytes),
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<SessionRegistry>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<SessionRegistry>) {
    let conn_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    info!(
        component = "websocket",
        event = "ws.connection.opened",
        connection_id = conn_id,
        "WebSocket connection opened"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Channel for sending messages to this client
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundMessage>(100);

    // Spawn task to forward messages to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let result = match msg {
                OutboundMessage::Json(server_msg) => match serde_json::to_string(&server_msg) {
                    Ok(json) => ws_tx.send(Message::Text(json.into())).await,
                    Err(e) => {
                        warn!(
                            component = "websocket",
                            event = "ws.send.serialize_failed",
                            connection_id = conn_id,
                            error = %e,
                            "Failed to serialize server message"
                        );
                        continue;
                    }
                },
                OutboundMessage::Pong(data) => ws_tx.send(Message::Pong(data)).await,
            };

            if result.is_err() {
                debug!(
                    component = "websocket",
                    event = "ws.send.disconnected",
                    connection_id = conn_id,
                    "WebSocket send failed, client disconnected"
                );
                break;
            }
        }
    });

    // Every observer sees every broadcast event, regardless of which
    // session produced it.
    spawn_broadcast_forwarder(state.subscribe(), outbound_tx.clone(), conn_id);

    // Targeted events addressed to this connection alone.
    let (direct_tx, direct_rx) = mpsc::channel::<ServerMessage>(64);
    state.register_client(conn_id, direct_tx).await;
    spawn_direct_forwarder(direct_rx, outbound_tx.clone());

    let client_tx = outbound_tx.clone();

    // Handle incoming messages
    while let Some(result) = ws_rx.next().await {
        let msg = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Ping(data)) => {
                let _ = outbound_tx.send(OutboundMessage::Pong(data)).await;
                continue;
            }
            Ok(Message::Close(_)) => {
                info!(
                    component = "websocket",
                    event = "ws.connection.close_frame",
                    connection_id = conn_id,
                    "Client sent close frame"
                );
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(
                    component = "websocket",
                    event = "ws.connection.error",
                    connection_id = conn_id,
                    error = %e,
                    "WebSocket error"
                );
                break;
            }
        };

        let client_msg: ClientMessage = match serde_json::from_str(&msg) {
            Ok(m) => m,
            Err(e) => {
                warn!(
                    component = "websocket",
                    event = "ws.message.parse_failed",
                    connection_id = conn_id,
                    error = %e,
                    payload_bytes = msg.len(),
                    "Failed to parse client message"
                );
                send_json(
                    &client_tx,
                    ServerMessage::AgentError {
                        message: e.to_string(),
                    },
                )
                .await;
                continue;
            }
        };

        handle_client_message(client_msg, &client_tx, &state, conn_id).await;
    }

    info!(
        component = "websocket",
        event = "ws.connection.closed",
        connection_id = conn_id,
        "WebSocket connection closed"
    );
    state.disconnect(conn_id).await;
    send_task.abort();
}

/// Send a ServerMessage through the outbound channel
async fn send_json(tx: &mpsc::Sender<OutboundMessage>, msg: ServerMessage) {
    let _ = tx.send(OutboundMessage::Json(msg)).await;
}

/// Drain the global broadcast stream into one connection's outbound channel.
/// When the outbound channel closes (client disconnected), the task exits
/// and the broadcast receiver is dropped — no manual unsubscribe needed.
fn spawn_broadcast_forwarder(
    mut rx: tokio::sync::broadcast::Receiver<ServerMessage>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    conn_id: u64,
) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(msg) => {
                    if outbound_tx.send(OutboundMessage::Json(msg)).await.is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        component = "websocket",
                        event = "ws.broadcast.lagged",
                        connection_id = conn_id,
                        skipped = n,
                        "Broadcast observer lagged"
                    );
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Drain this connection's targeted-event channel into its outbound channel.
fn spawn_direct_forwarder(
    mut rx: mpsc::Receiver<ServerMessage>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
) {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if outbound_tx.send(OutboundMessage::Json(msg)).await.is_err() {
                break;
            }
        }
    });
}

/// Handle a client message
async fn handle_client_message(
    msg: ClientMessage,
    client_tx: &mpsc::Sender<OutboundMessage>,
    state: &Arc<SessionRegistry>,
    conn_id: u64,
) {
    match msg {
        ClientMessage::StartAgent { job_url } => {
            info!(
                component = "websocket",
                event = "ws.command.start_agent",
                connection_id = conn_id,
                job_url = %job_url,
                "Start command received"
            );
            let session_id = state.start_session(conn_id, &job_url).await;
            debug!(
                component = "websocket",
                event = "ws.command.start_agent.accepted",
                connection_id = conn_id,
                session_id = %session_id,
                "Session created"
            );
        }
        ClientMessage::StopAgent => match state.stop_session(conn_id).await {
            Some(status) => send_json(client_tx, status).await,
            None => debug!(
                component = "websocket",
                event = "ws.command.stop_agent.noop",
                connection_id = conn_id,
                "Stop command with no live run"
            ),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverConfig;
    use applywatch_protocol::SessionStatus;

    fn quiet_registry() -> Arc<SessionRegistry> {
        Arc::new(SessionRegistry::new(DriverConfig {
            min_tick_ms: 60_000,
            max_tick_ms: 120_000,
            action_limit: 5,
        }))
    }

    #[tokio::test]
    async fn stop_without_a_run_sends_nothing_to_the_issuer() {
        let registry = quiet_registry();
        let (client_tx, mut client_rx) = mpsc::channel(8);

        handle_client_message(ClientMessage::StopAgent, &client_tx, &registry, 1).await;

        assert!(client_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn start_then_stop_sends_idle_to_the_issuer_only() {
        let registry = quiet_registry();
        let (client_tx, mut client_rx) = mpsc::channel(8);

        handle_client_message(
            ClientMessage::StartAgent {
                job_url: "https://jobs.lever.co/acme/42".to_string(),
            },
            &client_tx,
            &registry,
            1,
        )
        .await;
        handle_client_message(ClientMessage::StopAgent, &client_tx, &registry, 1).await;

        match client_rx.try_recv() {
            Ok(OutboundMessage::Json(ServerMessage::AgentStatus { status, .. })) => {
                assert_eq!(status, SessionStatus::Idle);
            }
            _ => panic!("expected idle status on the issuer's channel"),
        }
        assert!(client_rx.try_recv().is_err());
    }
}
