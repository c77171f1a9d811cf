//! WebSocket peer hub for remote notebook front-ends.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use notebook_relay_bus::BackchannelProxy;
use notebook_relay_core::{BroadcastFrame, BroadcastTransport};

use crate::protocol::{OutboundFrame, PeerMessage};

/// The set of currently connected WebSocket peers for one kernel.
///
/// Each peer gets its own unbounded FIFO channel drained by a dedicated
/// send task, so broadcast never blocks on a slow socket and every peer
/// sees frames in broadcast order. Delivery is best-effort per peer.
#[derive(Default)]
pub struct WebSocketHub {
    peers: RwLock<HashMap<Uuid, mpsc::UnboundedSender<String>>>,
}

impl WebSocketHub {
    /// Create a hub with no peers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer and return its id plus the outbound text stream.
    #[must_use]
    pub fn attach_peer(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.write().unwrap().insert(id, tx);
        tracing::debug!(peer = %id, "websocket peer attached");
        (id, rx)
    }

    /// Remove a peer; later broadcasts no longer reach it.
    pub fn detach_peer(&self, id: Uuid) {
        if self.peers.write().unwrap().remove(&id).is_some() {
            tracing::debug!(peer = %id, "websocket peer detached");
        }
    }

    /// Number of currently connected peers.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.read().unwrap().len()
    }

    /// Send a frame to one peer only.
    pub fn send_to(&self, id: Uuid, frame: &OutboundFrame) {
        let text = match serde_json::to_string(frame) {
            Ok(text) => text,
            Err(err) => {
                tracing::error!(%err, "failed to serialize outbound frame");
                return;
            }
        };
        if let Some(tx) = self.peers.read().unwrap().get(&id) {
            let _ = tx.send(text);
        }
    }
}

#[async_trait]
impl BroadcastTransport for WebSocketHub {
    async fn broadcast(&self, frame: BroadcastFrame) {
        let outbound = OutboundFrame::from(frame);
        let text = match serde_json::to_string(&outbound) {
            Ok(text) => text,
            Err(err) => {
                tracing::error!(%err, "failed to serialize broadcast frame");
                return;
            }
        };

        let mut dead = Vec::new();
        {
            let peers = self.peers.read().unwrap();
            for (id, tx) in peers.iter() {
                if tx.send(text.clone()).is_err() {
                    dead.push(*id);
                }
            }
        }
        if !dead.is_empty() {
            let mut peers = self.peers.write().unwrap();
            for id in dead {
                peers.remove(&id);
                tracing::debug!(peer = %id, "pruned disconnected websocket peer");
            }
        }
    }
}

/// State shared by the WebSocket route: the peer set plus the inbound
/// path into the owning kernel.
#[derive(Clone)]
pub struct WsState {
    pub hub: Arc<WebSocketHub>,
    pub backchannel: Arc<BackchannelProxy>,
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let (mut sender, mut receiver) = socket.split();
    let (peer_id, mut outbound) = state.hub.attach_peer();

    // Drain this peer's queue onto its socket.
    let send_task = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s.into(),
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                tracing::error!(peer = %peer_id, %err, "websocket error");
                break;
            }
        };

        let peer_msg: PeerMessage = match serde_json::from_str(&text) {
            Ok(msg) => msg,
            Err(err) => {
                tracing::warn!(peer = %peer_id, %err, "invalid peer message");
                state
                    .hub
                    .send_to(peer_id, &OutboundFrame::error(format!("invalid message: {err}")));
                continue;
            }
        };

        match peer_msg {
            PeerMessage::Envelope { body } => {
                if let Err(err) = state.backchannel.handle_inbound(&body).await {
                    tracing::warn!(peer = %peer_id, %err, "rejected inbound envelope");
                    state.hub.send_to(peer_id, &OutboundFrame::error(err.to_string()));
                }
            }
            PeerMessage::Ping => {
                state.hub.send_to(peer_id, &OutboundFrame::pong());
            }
        }
    }

    send_task.abort();
    state.hub.detach_peer(peer_id);
    tracing::debug!(peer = %peer_id, "websocket peer disconnected");
}

/// Create a router exposing the hub at `/ws`.
///
/// # Example
/// ```ignore
/// let app = Router::new().merge(create_ws_router(state));
/// ```
#[must_use]
pub fn create_ws_router(state: WsState) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state)
}
