//! Collaborator traits the messaging core is built against.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::envelope::{CommandEnvelope, EventEnvelope};

/// Frame name under which kernel events are broadcast to peers.
pub const KERNEL_EVENT_FRAME: &str = "kernelEvent";

/// Kernel-side failure.
#[derive(Debug, Clone, Error)]
pub enum KernelError {
    #[error("kernel rejected command: {0}")]
    Rejected(String),
    #[error("kernel disconnected")]
    Disconnected,
}

/// The narrow interface a kernel exposes to the messaging core.
///
/// A kernel is anything that executes commands and reports events: an
/// in-process interpreter, a child process behind a pipe, or a proxy for
/// a kernel hosted elsewhere. The core depends on nothing beyond these
/// three primitives.
#[async_trait]
pub trait Kernel: Send + Sync {
    /// Subscribe to this kernel's events, in emission order, until the
    /// receiver is dropped.
    fn subscribe(&self) -> broadcast::Receiver<EventEnvelope>;

    /// Accept a command for asynchronous handling.
    ///
    /// Completion of this call means the command was accepted into the
    /// kernel's pipeline, not that it finished executing.
    ///
    /// # Errors
    /// Returns [`KernelError`] if the kernel cannot accept the command.
    async fn submit(&self, envelope: CommandEnvelope) -> Result<(), KernelError>;

    /// Inject an event into this kernel's local event stream.
    ///
    /// Used by the backchannel so events reported by a remotely hosted
    /// kernel are observable exactly as if they had been produced
    /// locally.
    fn publish(&self, envelope: EventEnvelope);
}

/// An already-encoded message addressed to every connected peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastFrame {
    /// Fixed frame name; peers dispatch on it.
    pub name: &'static str,
    /// Encoded envelope body.
    pub body: String,
}

impl BroadcastFrame {
    /// Frame a serialized kernel event envelope.
    #[must_use]
    pub const fn kernel_event(body: String) -> Self {
        Self {
            name: KERNEL_EVENT_FRAME,
            body,
        }
    }
}

/// Fan-out capability supplied by an external collaborator (a web hub, a
/// pipe, an in-process channel set).
///
/// Delivery is best-effort per peer: one peer's failure must not affect
/// delivery to the others, and the set of connected peers may change
/// between any two broadcasts.
#[async_trait]
pub trait BroadcastTransport: Send + Sync {
    /// Broadcast `frame` to all currently connected peers.
    async fn broadcast(&self, frame: BroadcastFrame);
}
