//! In-process peer set, for tests and embedders without a web front-end.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use notebook_relay_core::{BroadcastFrame, BroadcastTransport};

use crate::protocol::OutboundFrame;

/// An in-process broadcast hub.
///
/// Each attached peer is an unbounded FIFO channel, so one slow peer
/// never delays delivery to the others and each peer observes frames in
/// broadcast order. A peer whose receiver was dropped is pruned on the
/// next broadcast.
#[derive(Default)]
pub struct LocalHub {
    peers: RwLock<HashMap<Uuid, mpsc::UnboundedSender<OutboundFrame>>>,
}

impl LocalHub {
    /// Create a hub with no peers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a peer and return its id plus the frame stream.
    #[must_use]
    pub fn attach_peer(&self) -> (Uuid, mpsc::UnboundedReceiver<OutboundFrame>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.write().unwrap().insert(id, tx);
        tracing::debug!(peer = %id, "peer attached");
        (id, rx)
    }

    /// Detach a peer; later broadcasts no longer reach it.
    pub fn detach_peer(&self, id: Uuid) {
        if self.peers.write().unwrap().remove(&id).is_some() {
            tracing::debug!(peer = %id, "peer detached");
        }
    }

    /// Number of currently attached peers.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.read().unwrap().len()
    }
}

#[async_trait]
impl BroadcastTransport for LocalHub {
    async fn broadcast(&self, frame: BroadcastFrame) {
        let outbound = OutboundFrame::from(frame);
        let mut dead = Vec::new();
        {
            let peers = self.peers.read().unwrap();
            for (id, tx) in peers.iter() {
                if tx.send(outbound.clone()).is_err() {
                    dead.push(*id);
                }
            }
        }
        if !dead.is_empty() {
            let mut peers = self.peers.write().unwrap();
            for id in dead {
                peers.remove(&id);
                tracing::debug!(peer = %id, "pruned disconnected peer");
            }
        }
    }
}
