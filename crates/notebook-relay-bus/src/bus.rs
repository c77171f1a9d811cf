//! Fan-out of one kernel's events to a transport's peers.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use notebook_relay_core::{
    BroadcastFrame, BroadcastTransport, Envelope, EventEnvelope, Kernel, envelope,
};

use crate::backchannel::BackchannelProxy;

struct Registration {
    forwarder: JoinHandle<()>,
}

/// Distributes one kernel's events to all connected peers of a transport.
///
/// The bus subscribes to its kernel at most once per registration: a
/// second `register_context` call before `dispose` is a no-op, so peers
/// never see duplicate deliveries. A single forwarding task consumes the
/// ordered subscription, which makes the per-peer ordering guarantee
/// structural rather than incidental.
pub struct KernelEventBus {
    kernel: Arc<dyn Kernel>,
    backchannel: Arc<BackchannelProxy>,
    registration: Mutex<Option<Registration>>,
}

impl KernelEventBus {
    /// Create an unregistered bus for `kernel`.
    #[must_use]
    pub fn new(kernel: Arc<dyn Kernel>) -> Self {
        let backchannel = Arc::new(BackchannelProxy::new(Arc::clone(&kernel)));
        Self {
            kernel,
            backchannel,
            registration: Mutex::new(None),
        }
    }

    /// The inbound proxy for envelopes arriving from remote peers.
    #[must_use]
    pub fn backchannel(&self) -> Arc<BackchannelProxy> {
        Arc::clone(&self.backchannel)
    }

    /// Wire this kernel's event stream into `transport`.
    ///
    /// Idempotent: once registered, further calls are ignored until
    /// [`Self::dispose`]. Returns without waiting for any event to be
    /// delivered. Also points the backchannel's outbound side at
    /// `transport` so context produced by remote-originated commands has
    /// somewhere to flow back out.
    pub fn register_context(&self, transport: Arc<dyn BroadcastTransport>) {
        let mut registration = self.registration.lock().unwrap();
        if registration.is_some() {
            tracing::debug!("kernel event bus already registered; ignoring");
            return;
        }

        let events = self.kernel.subscribe();
        self.backchannel.set_outbound(Arc::clone(&transport));
        let forwarder = tokio::spawn(forward_events(events, transport));
        *registration = Some(Registration { forwarder });
    }

    /// Whether the bus currently has a live registration.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.registration.lock().unwrap().is_some()
    }

    /// Unsubscribe from the kernel and return to the unregistered state.
    ///
    /// Safe to call when never registered and safe to call twice; the
    /// bus can be registered again afterward. In-flight deliveries are
    /// not awaited, only future ones are suppressed.
    pub fn dispose(&self) {
        if let Some(registration) = self.registration.lock().unwrap().take() {
            registration.forwarder.abort();
            self.backchannel.clear_outbound();
            tracing::debug!("kernel event bus disposed");
        }
    }
}

impl Drop for KernelEventBus {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn forward_events(
    mut events: broadcast::Receiver<EventEnvelope>,
    transport: Arc<dyn BroadcastTransport>,
) {
    loop {
        match events.recv().await {
            Ok(event) => match envelope::encode(&Envelope::Event(event)) {
                Ok(body) => transport.broadcast(BroadcastFrame::kernel_event(body)).await,
                // One unencodable event must not kill delivery of the rest.
                Err(err) => tracing::warn!(%err, "failed to encode kernel event; skipping"),
            },
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "kernel event subscription lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
