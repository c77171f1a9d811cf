//! Inbound path for envelopes originating on remote peers.

use std::sync::{Arc, Mutex};

use thiserror::Error;

use notebook_relay_core::{BroadcastTransport, CodecError, Envelope, Kernel, KernelError, envelope};

/// Failure while handling an inbound envelope.
#[derive(Debug, Error)]
pub enum BusError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Kernel(#[from] KernelError),
}

/// Re-injects envelopes received from remote peers into the owning
/// kernel, preserving correlation tokens.
///
/// Commands are forwarded into the kernel's command path; events are
/// published into the kernel's local event stream, which is how a
/// remotely hosted kernel participates in the same fan-out as a local
/// one.
pub struct BackchannelProxy {
    kernel: Arc<dyn Kernel>,
    outbound: Mutex<Option<Arc<dyn BroadcastTransport>>>,
}

impl BackchannelProxy {
    /// Create a proxy owned by `kernel`.
    #[must_use]
    pub fn new(kernel: Arc<dyn Kernel>) -> Self {
        Self {
            kernel,
            outbound: Mutex::new(None),
        }
    }

    /// Handle one inbound envelope body.
    ///
    /// Resolves once a command has been accepted by the kernel (not once
    /// it has executed), or immediately for an event.
    ///
    /// # Errors
    /// Returns [`BusError::Codec`] if the body does not decode and
    /// [`BusError::Kernel`] if the kernel refuses the command. Both are
    /// contained to this one message.
    pub async fn handle_inbound(&self, body: &str) -> Result<(), BusError> {
        match envelope::decode(body)? {
            Envelope::Command(command) => {
                tracing::debug!(tag = command.command.type_tag(), "forwarding peer command");
                self.kernel.submit(command).await?;
            }
            Envelope::Event(event) => {
                tracing::debug!(tag = event.event.type_tag(), "re-injecting peer event");
                self.kernel.publish(event);
            }
        }
        Ok(())
    }

    /// The transport that context for remote-originated commands flows
    /// back out through, if the owning bus is registered.
    #[must_use]
    pub fn outbound_transport(&self) -> Option<Arc<dyn BroadcastTransport>> {
        self.outbound.lock().unwrap().clone()
    }

    pub(crate) fn set_outbound(&self, transport: Arc<dyn BroadcastTransport>) {
        *self.outbound.lock().unwrap() = Some(transport);
    }

    pub(crate) fn clear_outbound(&self) {
        *self.outbound.lock().unwrap() = None;
    }
}
