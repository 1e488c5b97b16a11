//! Switchboard: a WebRTC signaling relay.
//!
//! Forwards signaling envelopes between participants by identifier,
//! rewriting the addressing field so recipients always see who a message
//! came from. The relay knows nothing about negotiation semantics; it holds
//! only the identifier → transport table.

pub mod cli;
pub mod config;
pub mod registry;
pub mod router;
pub mod websocket;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::websocket::{websocket_handler, RelayState};

pub fn app(state: RelayState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ws/join/:peer_id", get(websocket_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health_check() -> &'static str {
    "ok"
}
