//! WebSocket endpoint.
//!
//! A socket starts anonymous. It receives presence broadcasts right away but
//! only becomes reachable for messages after an `authenticate` event carrying
//! a valid token. Frames are JSON text of the form `{"event", "data"}`.

use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

use mimigram_shared::ConnectionId;

use crate::accounts::authenticate_token;
use crate::api::AppState;
use crate::events::ClientEvent;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

async fn handle_socket(socket: WebSocket, state: AppState, addr: SocketAddr) {
    let connection = ConnectionId::new();
    debug!(conn = %connection, peer = %addr, "WebSocket connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut events = state.dispatcher.attach(connection).await;

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, event = event.name(), "Failed to encode event");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Text(text) => handle_frame(&recv_state, connection, &text).await,
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.dispatcher.detach(&connection).await;
    debug!(conn = %connection, "WebSocket closed");
}

async fn handle_frame(state: &AppState, connection: ConnectionId, text: &str) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            debug!(conn = %connection, error = %e, "Ignoring malformed frame");
            return;
        }
    };

    match event {
        ClientEvent::Authenticate(token) => match authenticate_token(&state.store, &token) {
            Ok(user) => state.dispatcher.authenticate(user.id, connection).await,
            Err(e) => warn!(conn = %connection, error = %e, "Socket authentication failed"),
        },
        ClientEvent::Typing(target) => {
            state
                .dispatcher
                .relay_typing(&connection, &target.chat_id, true)
                .await;
        }
        ClientEvent::StopTyping(target) => {
            state
                .dispatcher
                .relay_typing(&connection, &target.chat_id, false)
                .await;
        }
    }
}
