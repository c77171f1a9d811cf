//! One client per session key, created lazily and exactly once.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;

use crate::address::SessionKey;
use crate::client::{ClientConnector, KernelClient};

/// Client creation failure, observed by every waiter for the key.
#[derive(Debug, Clone, Error)]
#[error("client creation for `{key}` failed: {message}")]
pub struct CreationError {
    key: String,
    message: String,
}

impl CreationError {
    fn new(key: &SessionKey, message: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            message: message.into(),
        }
    }

    /// Why the session could not start.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

type SharedCreation = Shared<BoxFuture<'static, Result<Arc<KernelClient>, CreationError>>>;

type ClientCreatedCallback = Box<dyn FnOnce(Arc<KernelClient>) -> BoxFuture<'static, ()> + Send>;

#[derive(Clone)]
struct Entry {
    creation: SharedCreation,
    generation: u64,
}

/// Maps each session key to a single in-flight-or-ready client handle.
///
/// Concurrent creation for the same key is deduplicated: the first
/// caller installs a shared pending entry under the map lock before
/// construction starts, so racing callers can never observe "absent"
/// twice and double-construct. All map mutations take the one lock;
/// waiting happens outside it.
pub struct SessionMultiplexer {
    connector: Arc<dyn ClientConnector>,
    entries: Arc<Mutex<HashMap<SessionKey, Entry>>>,
    callbacks: Arc<Mutex<HashMap<SessionKey, ClientCreatedCallback>>>,
    generation: AtomicU64,
}

impl SessionMultiplexer {
    /// Create a multiplexer that builds clients with `connector`.
    #[must_use]
    pub fn new(connector: Arc<dyn ClientConnector>) -> Self {
        Self {
            connector,
            entries: Arc::new(Mutex::new(HashMap::new())),
            callbacks: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Return the client for `key`, creating it if no entry exists.
    ///
    /// N concurrent callers trigger exactly one construction and all
    /// resolve to the same handle. The `on_client_create` callback (if
    /// any) runs after construction succeeds and before any caller sees
    /// the handle.
    ///
    /// # Errors
    /// Returns [`CreationError`] if construction fails; the entry is
    /// removed so a later call retries from scratch.
    pub async fn get_or_add_client(
        &self,
        key: &SessionKey,
    ) -> Result<Arc<KernelClient>, CreationError> {
        let entry = self.entry_for(key);
        let generation = entry.generation;
        let result = entry.creation.await;
        if result.is_err() {
            remove_generation(&self.entries, key, generation);
        }
        result
    }

    /// Resolve the client for `key` without creating one.
    ///
    /// Absent keys resolve to `None` immediately and leave no trace; a
    /// pending entry is awaited. A failed creation also resolves to
    /// `None`.
    pub async fn try_get_client(&self, key: &SessionKey) -> Option<Arc<KernelClient>> {
        let entry = self.entries.lock().unwrap().get(key).cloned()?;
        entry.creation.await.ok()
    }

    /// Register a one-shot callback to run right after the next
    /// successful creation for `key`.
    ///
    /// At most one callback is retained per key; registering again
    /// replaces a callback that has not fired yet.
    pub fn on_client_create<F, Fut>(&self, key: &SessionKey, callback: F)
    where
        F: FnOnce(Arc<KernelClient>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.callbacks.lock().unwrap().insert(
            key.clone(),
            Box::new(move |client| callback(client).boxed()),
        );
    }

    /// Move the entry under `old_key` to `new_key` without disturbing
    /// its creation state.
    ///
    /// No-op when the keys are equal or nothing lives under `old_key`.
    /// If `new_key` already had an entry the move wins and the displaced
    /// client is disposed; callers must not reassociate onto a key whose
    /// session they still need.
    pub fn reassociate_client(&self, old_key: &SessionKey, new_key: &SessionKey) {
        if old_key == new_key {
            return;
        }
        let displaced = {
            let mut entries = self.entries.lock().unwrap();
            let Some(entry) = entries.remove(old_key) else {
                return;
            };
            entries.insert(new_key.clone(), entry)
        };
        tracing::debug!(old = %old_key, new = %new_key, "reassociated client");
        if let Some(displaced) = displaced {
            tracing::warn!(key = %new_key, "reassociation displaced a live client; disposing it");
            dispose_when_ready(displaced);
        }
    }

    /// Remove the mapping under `key`.
    ///
    /// Removal is synchronous and immediate. With `dispose_client` set,
    /// the (possibly still pending) handle is disposed best-effort once
    /// it resolves.
    pub fn close_client(&self, key: &SessionKey, dispose_client: bool) {
        let Some(entry) = self.entries.lock().unwrap().remove(key) else {
            return;
        };
        tracing::debug!(key = %key, dispose_client, "closing client");
        if dispose_client {
            dispose_when_ready(entry);
        }
    }

    /// Whether a mapping (ready or pending) currently exists for `key`.
    #[must_use]
    pub fn is_known_client(&self, key: &SessionKey) -> bool {
        self.entries.lock().unwrap().contains_key(key)
    }

    fn entry_for(&self, key: &SessionKey) -> Entry {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get(key) {
            return entry.clone();
        }

        tracing::debug!(key = %key, "creating client");
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        // Construction runs in its own task so its side effects happen
        // exactly once even if every waiter is cancelled mid-flight.
        let connector = Arc::clone(&self.connector);
        let callbacks = Arc::clone(&self.callbacks);
        let construct_key = key.clone();
        let construction = tokio::spawn(async move {
            let client = connector
                .connect(&construct_key)
                .await
                .map(Arc::new)
                .map_err(|err| CreationError::new(&construct_key, err.to_string()))?;
            let callback = callbacks.lock().unwrap().remove(&construct_key);
            if let Some(callback) = callback {
                callback(Arc::clone(&client)).await;
            }
            Ok(client)
        });

        let join_key = key.clone();
        let creation: SharedCreation = async move {
            match construction.await {
                Ok(result) => result,
                Err(err) => Err(CreationError::new(
                    &join_key,
                    format!("construction task failed: {err}"),
                )),
            }
        }
        .boxed()
        .shared();

        // Evict a failed creation even if no waiter is left to do it.
        let watch_entries = Arc::clone(&self.entries);
        let watch_key = key.clone();
        let watched = creation.clone();
        tokio::spawn(async move {
            if watched.await.is_err() {
                remove_generation(&watch_entries, &watch_key, generation);
            }
        });

        let entry = Entry {
            creation,
            generation,
        };
        entries.insert(key.clone(), entry.clone());
        entry
    }
}

fn remove_generation(entries: &Mutex<HashMap<SessionKey, Entry>>, key: &SessionKey, generation: u64) {
    let mut entries = entries.lock().unwrap();
    if entries
        .get(key)
        .is_some_and(|entry| entry.generation == generation)
    {
        entries.remove(key);
    }
}

fn dispose_when_ready(entry: Entry) {
    tokio::spawn(async move {
        if let Ok(client) = entry.creation.await {
            client.dispose();
        }
    });
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::broadcast;

    use notebook_relay_core::{
        CommandEnvelope, EventChannel, EventEnvelope, Kernel, KernelError,
    };

    use super::*;
    use crate::address::DocumentAddress;
    use crate::client::ConnectError;

    #[derive(Default)]
    struct NullKernel {
        channel: EventChannel,
    }

    #[async_trait]
    impl Kernel for NullKernel {
        fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
            self.channel.subscribe()
        }

        async fn submit(&self, _envelope: CommandEnvelope) -> Result<(), KernelError> {
            Ok(())
        }

        fn publish(&self, envelope: EventEnvelope) {
            self.channel.publish(envelope);
        }
    }

    struct TestConnector {
        connects: AtomicUsize,
        disposals: Arc<AtomicUsize>,
        failures_remaining: AtomicUsize,
    }

    impl TestConnector {
        fn new() -> Arc<Self> {
            Self::failing(0)
        }

        fn failing(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                connects: AtomicUsize::new(0),
                disposals: Arc::new(AtomicUsize::new(0)),
                failures_remaining: AtomicUsize::new(failures),
            })
        }

        fn connect_count(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }

        fn disposal_count(&self) -> usize {
            self.disposals.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ClientConnector for TestConnector {
        async fn connect(&self, _key: &SessionKey) -> Result<KernelClient, ConnectError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            let should_fail = self
                .failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if should_fail {
                return Err(ConnectError::ConnectFailed("kernel did not start".into()));
            }
            let disposals = Arc::clone(&self.disposals);
            Ok(KernelClient::with_teardown(
                Arc::new(NullKernel::default()),
                move || {
                    disposals.fetch_add(1, Ordering::SeqCst);
                },
            ))
        }
    }

    fn key(path: &str) -> SessionKey {
        SessionKey::from_address(&DocumentAddress::new("file", path))
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_construction() {
        let connector = TestConnector::new();
        let mux = SessionMultiplexer::new(Arc::clone(&connector) as Arc<dyn ClientConnector>);
        let k = key("/nb/shared.ipynb");

        let (a, b, c) = tokio::join!(
            mux.get_or_add_client(&k),
            mux.get_or_add_client(&k),
            mux.get_or_add_client(&k),
        );
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());

        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&b, &c));
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn try_get_on_unknown_key_has_no_side_effects() {
        let connector = TestConnector::new();
        let mux = SessionMultiplexer::new(Arc::clone(&connector) as Arc<dyn ClientConnector>);
        let k = key("/nb/never.ipynb");

        assert!(mux.try_get_client(&k).await.is_none());
        assert!(!mux.is_known_client(&k));
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn try_get_waits_for_in_flight_creation() {
        let connector = TestConnector::new();
        let mux = SessionMultiplexer::new(Arc::clone(&connector) as Arc<dyn ClientConnector>);
        let k = key("/nb/pending.ipynb");

        let (created, observed) =
            tokio::join!(mux.get_or_add_client(&k), mux.try_get_client(&k));

        let created = created.unwrap();
        let observed = observed.expect("pending creation should resolve for try_get");
        assert!(Arc::ptr_eq(&created, &observed));
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn close_then_recreate_builds_a_fresh_client() {
        let connector = TestConnector::new();
        let mux = SessionMultiplexer::new(Arc::clone(&connector) as Arc<dyn ClientConnector>);
        let k = key("/nb/restart.ipynb");

        let first = mux.get_or_add_client(&k).await.unwrap();
        mux.close_client(&k, true);
        assert!(!mux.is_known_client(&k));

        let connector_ref = Arc::clone(&connector);
        wait_until(move || connector_ref.disposal_count() == 1).await;

        let second = mux.get_or_add_client(&k).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(connector.connect_count(), 2);

        // Dispose ran exactly once for the first client.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(connector.disposal_count(), 1);
    }

    #[tokio::test]
    async fn close_without_dispose_keeps_the_client_alive() {
        let connector = TestConnector::new();
        let mux = SessionMultiplexer::new(Arc::clone(&connector) as Arc<dyn ClientConnector>);
        let k = key("/nb/keep.ipynb");

        let _client = mux.get_or_add_client(&k).await.unwrap();
        mux.close_client(&k, false);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(connector.disposal_count(), 0);
    }

    #[tokio::test]
    async fn closing_an_unknown_key_is_a_noop() {
        let connector = TestConnector::new();
        let mux = SessionMultiplexer::new(Arc::clone(&connector) as Arc<dyn ClientConnector>);
        mux.close_client(&key("/nb/ghost.ipynb"), true);
        assert_eq!(connector.disposal_count(), 0);
    }

    #[tokio::test]
    async fn reassociation_moves_the_handle() {
        let connector = TestConnector::new();
        let mux = SessionMultiplexer::new(Arc::clone(&connector) as Arc<dyn ClientConnector>);
        let old = key("/nb/untitled-1.ipynb");
        let new = key("/nb/saved.ipynb");

        let client = mux.get_or_add_client(&old).await.unwrap();
        mux.reassociate_client(&old, &new);

        assert!(!mux.is_known_client(&old));
        assert!(mux.try_get_client(&old).await.is_none());
        let moved = mux.try_get_client(&new).await.unwrap();
        assert!(Arc::ptr_eq(&client, &moved));
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn reassociation_to_self_or_from_missing_is_a_noop() {
        let connector = TestConnector::new();
        let mux = SessionMultiplexer::new(Arc::clone(&connector) as Arc<dyn ClientConnector>);
        let k = key("/nb/self.ipynb");
        let other = key("/nb/other.ipynb");

        let client = mux.get_or_add_client(&k).await.unwrap();
        mux.reassociate_client(&k, &k);
        assert!(Arc::ptr_eq(
            &client,
            &mux.try_get_client(&k).await.unwrap()
        ));

        mux.reassociate_client(&key("/nb/missing.ipynb"), &other);
        assert!(!mux.is_known_client(&other));
    }

    #[tokio::test]
    async fn reassociation_onto_an_occupied_key_displaces_it() {
        let connector = TestConnector::new();
        let mux = SessionMultiplexer::new(Arc::clone(&connector) as Arc<dyn ClientConnector>);
        let a = key("/nb/a.ipynb");
        let b = key("/nb/b.ipynb");

        let client_a = mux.get_or_add_client(&a).await.unwrap();
        let _client_b = mux.get_or_add_client(&b).await.unwrap();

        mux.reassociate_client(&a, &b);
        let now_at_b = mux.try_get_client(&b).await.unwrap();
        assert!(Arc::ptr_eq(&client_a, &now_at_b));

        // The displaced client is disposed, the moved one is not.
        let connector_ref = Arc::clone(&connector);
        wait_until(move || connector_ref.disposal_count() == 1).await;
    }

    #[tokio::test]
    async fn creation_failure_reaches_every_waiter_then_retries_fresh() {
        let connector = TestConnector::failing(1);
        let mux = SessionMultiplexer::new(Arc::clone(&connector) as Arc<dyn ClientConnector>);
        let k = key("/nb/flaky.ipynb");

        let (a, b, c) = tokio::join!(
            mux.get_or_add_client(&k),
            mux.get_or_add_client(&k),
            mux.get_or_add_client(&k),
        );
        for result in [&a, &b, &c] {
            let err = result.as_ref().unwrap_err();
            assert!(err.message().contains("kernel did not start"));
        }
        // One failed construction was shared by all three waiters.
        assert_eq!(connector.connect_count(), 1);
        assert!(!mux.is_known_client(&k));

        let client = mux.get_or_add_client(&k).await;
        assert!(client.is_ok());
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn on_create_runs_before_any_waiter_sees_the_handle() {
        let connector = TestConnector::new();
        let mux = SessionMultiplexer::new(Arc::clone(&connector) as Arc<dyn ClientConnector>);
        let k = key("/nb/callback.ipynb");

        let order = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&order);
        mux.on_client_create(&k, move |_client| {
            let recorded = Arc::clone(&recorded);
            async move {
                recorded.lock().unwrap().push("callback");
            }
        });

        let _client = mux.get_or_add_client(&k).await.unwrap();
        order.lock().unwrap().push("ready");

        assert_eq!(*order.lock().unwrap(), ["callback", "ready"]);
    }

    #[tokio::test]
    async fn later_callback_registration_replaces_the_earlier_one() {
        let connector = TestConnector::new();
        let mux = SessionMultiplexer::new(Arc::clone(&connector) as Arc<dyn ClientConnector>);
        let k = key("/nb/replace.ipynb");

        let fired = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second"] {
            let fired = Arc::clone(&fired);
            mux.on_client_create(&k, move |_client| {
                let fired = Arc::clone(&fired);
                async move {
                    fired.lock().unwrap().push(name);
                }
            });
        }

        let _client = mux.get_or_add_client(&k).await.unwrap();
        assert_eq!(*fired.lock().unwrap(), ["second"]);
    }

    #[tokio::test]
    async fn callback_survives_a_failed_creation_and_fires_on_retry() {
        let connector = TestConnector::failing(1);
        let mux = SessionMultiplexer::new(Arc::clone(&connector) as Arc<dyn ClientConnector>);
        let k = key("/nb/retry-callback.ipynb");

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        mux.on_client_create(&k, move |_client| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        assert!(mux.get_or_add_client(&k).await.is_err());
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        assert!(mux.get_or_add_client(&k).await.is_ok());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
