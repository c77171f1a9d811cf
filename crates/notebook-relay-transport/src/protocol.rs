//! Wire protocol for peer connections.

use serde::{Deserialize, Serialize};

use notebook_relay_core::BroadcastFrame;

/// A named frame sent from the host to a connected peer.
///
/// Kernel events travel under the fixed name
/// [`notebook_relay_core::KERNEL_EVENT_FRAME`] with the encoded envelope
/// as payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundFrame {
    #[serde(rename = "type")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl OutboundFrame {
    /// Keepalive reply.
    #[must_use]
    pub fn pong() -> Self {
        Self {
            name: "pong".into(),
            payload: None,
        }
    }

    /// Report a per-message failure back to the sending peer.
    #[must_use]
    pub fn error<S: Into<String>>(message: S) -> Self {
        Self {
            name: "error".into(),
            payload: Some(message.into()),
        }
    }
}

impl From<BroadcastFrame> for OutboundFrame {
    fn from(frame: BroadcastFrame) -> Self {
        Self {
            name: frame.name.to_owned(),
            payload: Some(frame.body),
        }
    }
}

/// A message a peer sends to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PeerMessage {
    /// An encoded envelope bound for the backchannel.
    Envelope { body: String },
    /// Keepalive.
    Ping,
}
