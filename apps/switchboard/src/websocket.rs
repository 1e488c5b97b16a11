//! WebSocket plumbing for relay connections.
//!
//! A client joins at `/ws/join/{peer_id}`; the identifier stays registered
//! for the lifetime of the transport. Each connection gets a writer task
//! draining its outbound queue, while the read loop decodes envelopes and
//! hands them to the router.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use signaling_proto::Envelope;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::registry::{ClientRegistry, Outbound, RegisteredClient};
use crate::router::Router;

#[derive(Clone)]
pub struct RelayState {
    pub registry: Arc<ClientRegistry>,
    pub router: Arc<Router>,
}

impl RelayState {
    pub fn new(presence_replies: bool) -> Self {
        let registry = Arc::new(ClientRegistry::new());
        let router = Arc::new(Router::new(registry.clone(), presence_replies));
        Self { registry, router }
    }
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Path(peer_id): Path<String>,
    State(state): State<RelayState>,
) -> Response {
    if peer_id.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "participant identifier must not be empty")
            .into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, peer_id, state))
}

async fn handle_socket(socket: WebSocket, peer_id: String, state: RelayState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    let client = RegisteredClient::new(peer_id.clone(), tx);

    let writer_peer = peer_id.clone();
    tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Envelope(envelope) => match envelope.encode() {
                    Ok(text) => {
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(peer = %writer_peer, %err, "failed to encode envelope");
                    }
                },
                Outbound::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        debug!(peer = %writer_peer, "writer task ended");
    });

    if let Some(evicted) = state.registry.register(client.clone()) {
        warn!(peer = %peer_id, "identifier re-registered; closing previous transport");
        let _ = evicted.tx.send(Outbound::Close);
    }
    info!(peer = %peer_id, "client connected");

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match Envelope::decode(&text) {
                Ok(envelope) => state.router.route(&client, envelope),
                Err(err) => {
                    warn!(peer = %peer_id, %err, "dropping malformed envelope");
                }
            },
            Ok(Message::Binary(_)) => {
                debug!(peer = %peer_id, "ignoring binary frame");
            }
            Ok(Message::Close(_)) => {
                debug!(peer = %peer_id, "received close frame");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                debug!(peer = %peer_id, %err, "websocket error");
                break;
            }
        }
    }

    // A stale close must not unbind a newer registration under the same
    // identifier, and must not fire an offline notice for it either.
    if state.registry.unregister(&peer_id, client.conn_token) {
        state.router.disconnected(&peer_id);
        info!(peer = %peer_id, "client disconnected");
    } else {
        debug!(peer = %peer_id, "stale connection closed after re-registration");
    }
}
