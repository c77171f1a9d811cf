//! Ordered in-process fan-out of kernel events.

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::envelope::EventEnvelope;

/// Buffered events per subscriber before a slow subscriber starts lagging.
const EVENT_BUFFER: usize = 1024;

/// Ordered publish/subscribe channel for one kernel's events.
///
/// Every subscriber observes events in publication order. There is no
/// history: a subscriber sees only events published after it subscribed.
/// Kernel implementations embed one of these to satisfy
/// [`crate::traits::Kernel::subscribe`] and [`crate::traits::Kernel::publish`].
pub struct EventChannel {
    sender: broadcast::Sender<EventEnvelope>,
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl EventChannel {
    /// Create a new event channel.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Publishing with no subscribers is not an error; the event is
    /// simply dropped.
    pub fn publish(&self, envelope: EventEnvelope) {
        let _ = self.sender.send(envelope);
    }

    /// Subscribe to events published from now on, in order.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Subscription as a stream, silently skipping lagged gaps.
    #[must_use]
    pub fn stream(&self) -> futures::stream::BoxStream<'static, EventEnvelope> {
        BroadcastStream::new(self.subscribe())
            .filter_map(|res| async move { res.ok() })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::KernelEvent;

    #[tokio::test]
    async fn subscribers_see_events_in_publication_order() {
        let channel = EventChannel::new();
        let mut first = channel.subscribe();
        let mut second = channel.subscribe();

        channel.publish(EventEnvelope::new(KernelEvent::CommandSucceeded));
        channel.publish(EventEnvelope::new(KernelEvent::CommandFailed {
            message: "later".into(),
        }));

        for receiver in [&mut first, &mut second] {
            assert_eq!(
                receiver.recv().await.unwrap().event,
                KernelEvent::CommandSucceeded
            );
            assert!(matches!(
                receiver.recv().await.unwrap().event,
                KernelEvent::CommandFailed { .. }
            ));
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_silent() {
        let channel = EventChannel::new();
        channel.publish(EventEnvelope::new(KernelEvent::CommandSucceeded));
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn stream_yields_published_events() {
        let channel = EventChannel::new();
        let mut stream = channel.stream();
        channel.publish(EventEnvelope::new(KernelEvent::CommandSucceeded));
        let envelope = stream.next().await.unwrap();
        assert_eq!(envelope.event, KernelEvent::CommandSucceeded);
    }
}
