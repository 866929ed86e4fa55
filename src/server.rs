//! WebSocket transport.
//!
//! One socket per observer. Outbound messages flow through a bounded
//! channel drained by a writer task; inbound text frames are parsed into
//! [`ClientMessage`]s and forwarded to the control loop.

use crate::collaborators::{Authorizer, Identity};
use crate::engine::MirrorHandle;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::types::ObserverId;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Shared state of the HTTP layer
#[derive(Clone)]
pub struct ServerState {
    handle: MirrorHandle,
    authorizer: Arc<dyn Authorizer>,
    channel_capacity: usize,
}

impl ServerState {
    pub fn new(handle: MirrorHandle, authorizer: Arc<dyn Authorizer>, channel_capacity: usize) -> Self {
        Self {
            handle,
            authorizer,
            channel_capacity: channel_capacity.max(1),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConnectParams {
    token: Option<String>,
}

/// Routes: `GET /ws` upgrades to the mirror protocol.
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .with_state(state)
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
) -> Response {
    match state
        .authorizer
        .authorize(&headers, params.token.as_deref())
        .await
    {
        Ok(identity) => ws.on_upgrade(move |socket| handle_socket(socket, state, identity)),
        Err(e) => {
            warn!(error = %e, "Rejected connection");
            (StatusCode::UNAUTHORIZED, e.to_string()).into_response()
        }
    }
}

async fn handle_socket(socket: WebSocket, state: ServerState, identity: Identity) {
    let observer = ObserverId::new();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(state.channel_capacity);

    if let Err(e) = state.handle.connect(observer, tx.clone()) {
        error!(error = %e, "Could not register observer");
        return;
    }
    info!(observer = %observer, identity = %identity.name, "Observer session opened");

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    error!(error = %e, "Failed to encode message");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(message) => {
                    if state.handle.client(observer, message).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(observer = %observer, error = %e, "Unparseable message");
                    let _ = tx.try_send(ServerMessage::error(None, format!("Malformed message: {}", e)));
                }
            },
            Ok(Message::Close(_)) => break,
            Err(e) => {
                warn!(observer = %observer, error = %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }

    let _ = state.handle.disconnect(observer);
    drop(tx);
    writer.abort();
    info!(observer = %observer, "Observer session closed");
}
