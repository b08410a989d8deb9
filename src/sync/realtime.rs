//! Push subscription multiplexing.
//!
//! The server pushes invalidation events scoped by descriptor (entity kind,
//! filter property, filter value). The multiplexer holds one transport
//! subscription per distinct descriptor and fans events out to every
//! resource key registered under it. Events carry no usable payload: the
//! only reaction is to schedule a revalidation fetch, which keeps the store
//! the sole writer of entry values.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use tracing::{debug, trace, warn};

use super::store::SyncStore;
use super::{Fetcher, SyncError};

/// Scope of one push subscription: "events about `model` instances whose
/// `property` equals `value`".
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub model: String,
    pub property: String,
    pub value: Value,
}

impl Descriptor {
    pub fn new(model: impl Into<String>, property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            model: model.into(),
            property: property.into(),
            value: value.into(),
        }
    }

    /// Canonical string form; used as the map key since `Value` is not
    /// hashable. Equality stays structural.
    pub fn canonical(&self) -> String {
        format!("{}:{}:{}", self.model, self.property, self.value)
    }
}

/// Transport-side teardown for one subscription.
pub type Unsubscribe = Box<dyn FnOnce() + Send>;

/// The push transport contract.
///
/// `subscribe` registers interest in a descriptor and returns a teardown
/// closure; the sink is invoked once per matching server event, with no
/// payload - it is a pure invalidation signal. `on_reconnect` callbacks fire
/// after the transport re-establishes a dropped connection, so subscribers
/// can close the gap left by missed events.
pub trait PushChannel: Send + Sync {
    fn subscribe(
        &self,
        descriptor: &Descriptor,
        on_event: Arc<dyn Fn() + Send + Sync>,
    ) -> Result<Unsubscribe, SyncError>;

    fn on_reconnect(&self, callback: Box<dyn Fn() + Send + Sync>);
}

struct DescriptorState {
    descriptor: Descriptor,
    unsubscribe: Option<Unsubscribe>,
    /// Refcount per resource key registered under this descriptor.
    keys: HashMap<String, usize>,
}

/// Fans one transport subscription per descriptor out to all registered keys.
pub struct RealtimeMultiplexer {
    channel: Arc<dyn PushChannel>,
    store: Arc<SyncStore>,
    fetcher: Arc<dyn Fetcher>,
    inner: Mutex<HashMap<String, DescriptorState>>,
}

impl RealtimeMultiplexer {
    pub fn new(
        channel: Arc<dyn PushChannel>,
        store: Arc<SyncStore>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Arc<Self> {
        let mux = Arc::new(Self {
            channel,
            store,
            fetcher,
            inner: Mutex::new(HashMap::new()),
        });

        // Missed events are unrecoverable, so a reconnect refetches every
        // key under every live descriptor once.
        let weak = Arc::downgrade(&mux);
        mux.channel.on_reconnect(Box::new(move || {
            if let Some(mux) = weak.upgrade() {
                mux.resync();
            }
        }));

        mux
    }

    /// Register `key` for revalidation whenever an event matching
    /// `descriptor` arrives. Dropping the returned handle releases the
    /// registration; the transport subscription is torn down when the last
    /// key under the descriptor goes away.
    pub fn register(self: &Arc<Self>, descriptor: Descriptor, key: impl Into<String>) -> RealtimeHandle {
        let key = key.into();
        let canonical = descriptor.canonical();

        let needs_subscribe = {
            let mut inner = self.inner.lock().unwrap();
            match inner.get_mut(&canonical) {
                Some(state) => {
                    *state.keys.entry(key.clone()).or_insert(0) += 1;
                    false
                }
                None => {
                    let mut keys = HashMap::new();
                    keys.insert(key.clone(), 1);
                    inner.insert(
                        canonical.clone(),
                        DescriptorState {
                            descriptor: descriptor.clone(),
                            unsubscribe: None,
                            keys,
                        },
                    );
                    true
                }
            }
        };

        if needs_subscribe {
            let weak = Arc::downgrade(self);
            let event_canonical = canonical.clone();
            let sink: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
                if let Some(mux) = weak.upgrade() {
                    mux.invalidate(&event_canonical);
                }
            });

            match self.channel.subscribe(&descriptor, sink) {
                Ok(unsubscribe) => {
                    debug!(descriptor = %canonical, "push subscription opened");
                    let mut inner = self.inner.lock().unwrap();
                    if let Some(state) = inner.get_mut(&canonical) {
                        state.unsubscribe = Some(unsubscribe);
                    }
                }
                Err(error) => {
                    // Stale descriptor: drop it and let dependent
                    // revalidations fail on their own.
                    warn!(descriptor = %canonical, error = %error, "push subscription refused, descriptor dropped");
                    self.inner.lock().unwrap().remove(&canonical);
                }
            }
        }

        RealtimeHandle {
            mux: Arc::clone(self),
            canonical,
            key,
        }
    }

    /// Number of descriptors with live state.
    pub fn descriptor_count(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    fn invalidate(self: &Arc<Self>, canonical: &str) {
        let keys: Vec<String> = {
            let inner = self.inner.lock().unwrap();
            match inner.get(canonical) {
                Some(state) => state.keys.keys().cloned().collect(),
                None => return,
            }
        };
        trace!(descriptor = %canonical, keys = keys.len(), "push event received");
        for key in keys {
            self.spawn_revalidation(key);
        }
    }

    fn resync(self: &Arc<Self>) {
        let keys: Vec<String> = {
            let inner = self.inner.lock().unwrap();
            inner
                .values()
                .flat_map(|state| state.keys.keys().cloned())
                .collect()
        };
        debug!(keys = keys.len(), "push channel reconnected, refetching live keys");
        for key in keys {
            self.spawn_revalidation(key);
        }
    }

    fn spawn_revalidation(&self, key: String) {
        let store = Arc::clone(&self.store);
        let fetcher = Arc::clone(&self.fetcher);
        tokio::spawn(async move {
            if let Err(error) = store.revalidate(&key, &fetcher).await {
                debug!(key = %key, error = %error, "push-triggered revalidation failed");
            }
        });
    }

    fn unregister(&self, canonical: &str, key: &str) {
        let unsubscribe = {
            let mut inner = self.inner.lock().unwrap();
            let Some(state) = inner.get_mut(canonical) else {
                return;
            };
            if let Some(count) = state.keys.get_mut(key) {
                *count -= 1;
                if *count == 0 {
                    state.keys.remove(key);
                }
            }
            if state.keys.is_empty() {
                let mut state = inner.remove(canonical).unwrap();
                state.unsubscribe.take()
            } else {
                None
            }
        };
        if let Some(unsubscribe) = unsubscribe {
            debug!(descriptor = %canonical, "push subscription closed");
            unsubscribe();
        }
    }
}

/// Registration of one key under one descriptor; releases on drop.
pub struct RealtimeHandle {
    mux: Arc<RealtimeMultiplexer>,
    canonical: String,
    key: String,
}

impl Drop for RealtimeHandle {
    fn drop(&mut self) {
        self.mux.unregister(&self.canonical, &self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::store::EntryState;
    use crate::sync::testing::{MockChannel, MockFetcher};
    use serde_json::json;
    use std::time::Duration;

    fn questions_descriptor() -> Descriptor {
        Descriptor::new("Question", "queue_id", 3)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_event_triggers_revalidation_of_registered_keys() {
        let store = SyncStore::new();
        let mock = MockFetcher::new();
        mock.respond("/queues/3/questions/", json!([{"id": 1}]));
        let channel = MockChannel::new();
        let mux = RealtimeMultiplexer::new(channel.clone(), Arc::clone(&store), mock.clone());

        let _handle = mux.register(questions_descriptor(), "/queues/3/questions/");
        channel.emit(&questions_descriptor());
        settle().await;

        assert_eq!(mock.calls("/queues/3/questions/"), 1);
        assert_eq!(store.get("/queues/3/questions/").state(), EntryState::Fresh);
    }

    #[tokio::test]
    async fn test_event_payload_never_written_directly() {
        let store = SyncStore::new();
        let mock = MockFetcher::new();
        mock.respond("/queues/3/questions/", json!([{"id": 2}]));
        mock.pause();
        let channel = MockChannel::new();
        let mux = RealtimeMultiplexer::new(channel.clone(), Arc::clone(&store), mock.clone());

        store.seed("/queues/3/questions/", json!([{"id": 1}]));
        let _handle = mux.register(questions_descriptor(), "/queues/3/questions/");

        channel.emit(&questions_descriptor());
        settle().await;

        // the fetch is still in flight, so the event must not have touched
        // the cached value
        let entry = store.get("/queues/3/questions/");
        assert_eq!(entry.value.clone().unwrap(), json!([{"id": 1}]));
        assert_eq!(entry.state(), EntryState::Revalidating);

        mock.release();
        settle().await;
        let entry = store.get("/queues/3/questions/");
        assert_eq!(entry.value.unwrap(), json!([{"id": 2}]));
    }

    #[tokio::test]
    async fn test_reconnect_revalidates_each_key_exactly_once() {
        let store = SyncStore::new();
        let mock = MockFetcher::new();
        let channel = MockChannel::new();
        let mux = RealtimeMultiplexer::new(channel.clone(), Arc::clone(&store), mock.clone());

        let _a = mux.register(questions_descriptor(), "/queues/3/questions/");
        let _b = mux.register(questions_descriptor(), "/queues/3/questions/quota_count/");

        // two server-side changes happen while the transport is down; the
        // events themselves are lost
        channel.reconnect();
        settle().await;

        assert_eq!(mock.calls("/queues/3/questions/"), 1);
        assert_eq!(mock.calls("/queues/3/questions/quota_count/"), 1);
    }

    #[tokio::test]
    async fn test_transport_subscription_is_shared_and_refcounted() {
        let store = SyncStore::new();
        let mock = MockFetcher::new();
        let channel = MockChannel::new();
        let mux = RealtimeMultiplexer::new(channel.clone(), Arc::clone(&store), mock.clone());

        let a = mux.register(questions_descriptor(), "/queues/3/questions/");
        let b = mux.register(questions_descriptor(), "/queues/3/questions/");
        assert_eq!(channel.subscribe_count(), 1);
        assert_eq!(channel.active_subscriptions(), 1);

        drop(a);
        assert_eq!(channel.active_subscriptions(), 1);
        drop(b);
        assert_eq!(channel.active_subscriptions(), 0);
        assert_eq!(mux.descriptor_count(), 0);
    }

    #[tokio::test]
    async fn test_refused_subscription_drops_descriptor() {
        let store = SyncStore::new();
        let mock = MockFetcher::new();
        let channel = MockChannel::new();
        channel.refuse(&questions_descriptor());
        let mux = RealtimeMultiplexer::new(channel.clone(), Arc::clone(&store), mock.clone());

        let _handle = mux.register(questions_descriptor(), "/queues/3/questions/");
        assert_eq!(mux.descriptor_count(), 0);

        channel.emit(&questions_descriptor());
        settle().await;
        assert_eq!(mock.total_calls(), 0);
    }

    #[test]
    fn test_descriptor_equality_is_structural() {
        let a = Descriptor::new("Question", "queue_id", 3);
        let b = Descriptor::new("Question", "queue_id", 3);
        let c = Descriptor::new("Question", "queue_id", 4);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.canonical(), b.canonical());
        assert_ne!(a.canonical(), c.canonical());
    }
}
