//! Keyed resource cache with coalesced revalidation.
//!
//! One entry per resource key. Entries are owned by the store; the only
//! writers are `seed`, `revalidate`, and `mutate`/`mutate_local`. Listeners
//! registered with `on_change` are notified synchronously, per key, after
//! the store lock is released - a listener may re-enter the store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::api::FetchError;

use super::Fetcher;

type RevalidationFuture = Shared<BoxFuture<'static, Result<Value, Arc<FetchError>>>>;
type Listener = Arc<dyn Fn(&CacheEntry) + Send + Sync>;

/// How an entry's current value got there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueOrigin {
    /// Installed from server-rendered initial data; not fetched here.
    Seed,
    /// Result of a successful fetch.
    Fetch,
    /// Locally-applied optimistic patch, awaiting reconciliation.
    Optimistic,
}

/// Lifecycle state of an entry, derived from its fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Empty,
    Fresh,
    Revalidating,
    StaleWithError,
}

/// Point-in-time snapshot of one cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: Option<Value>,
    pub last_updated: Option<DateTime<Utc>>,
    pub origin: Option<ValueOrigin>,
    pub revalidating: bool,
    pub error: Option<Arc<FetchError>>,
}

impl CacheEntry {
    pub fn state(&self) -> EntryState {
        if self.revalidating {
            EntryState::Revalidating
        } else if self.error.is_some() {
            EntryState::StaleWithError
        } else if self.value.is_some() {
            EntryState::Fresh
        } else {
            EntryState::Empty
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }
}

/// Options for [`SyncStore::mutate`].
#[derive(Debug, Clone, Copy)]
pub struct MutateOptions {
    /// When false, apply the patch and notify listeners without issuing a
    /// follow-up fetch. Used to ping dependents after an externally-confirmed
    /// change.
    pub send_request: bool,
}

impl Default for MutateOptions {
    fn default() -> Self {
        Self { send_request: true }
    }
}

#[derive(Default)]
struct EntryInner {
    value: Option<Value>,
    origin: Option<ValueOrigin>,
    last_updated: Option<DateTime<Utc>>,
    error: Option<Arc<FetchError>>,
    in_flight: Option<RevalidationFuture>,
    listeners: HashMap<u64, Listener>,
}

impl EntryInner {
    fn snapshot(&self, key: &str) -> CacheEntry {
        CacheEntry {
            key: key.to_string(),
            value: self.value.clone(),
            last_updated: self.last_updated,
            origin: self.origin,
            revalidating: self.in_flight.is_some(),
            error: self.error.clone(),
        }
    }

    fn listeners(&self) -> Vec<Listener> {
        self.listeners.values().cloned().collect()
    }
}

/// Tab-wide map from resource key to cache entry.
///
/// Construct one per process (or per test) with [`SyncStore::new`]; there is
/// no module-level singleton.
pub struct SyncStore {
    inner: Mutex<HashMap<String, EntryInner>>,
    next_listener_id: AtomicU64,
}

impl SyncStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(HashMap::new()),
            next_listener_id: AtomicU64::new(0),
        })
    }

    /// Current entry snapshot for `key` (an empty entry if never touched).
    pub fn get(&self, key: &str) -> CacheEntry {
        let map = self.inner.lock().unwrap();
        match map.get(key) {
            Some(entry) => entry.snapshot(key),
            None => CacheEntry {
                key: key.to_string(),
                value: None,
                last_updated: None,
                origin: None,
                revalidating: false,
                error: None,
            },
        }
    }

    /// Install server-rendered initial data into an empty entry.
    ///
    /// A populated entry is never overwritten; the seed only exists to avoid
    /// a redundant first fetch. Does not mark the entry as fetched.
    pub fn seed(&self, key: &str, value: Value) {
        let (snapshot, listeners) = {
            let mut map = self.inner.lock().unwrap();
            let entry = map.entry(key.to_string()).or_default();
            if entry.value.is_some() {
                trace!(key = %key, "entry already populated, seed ignored");
                return;
            }
            entry.value = Some(value);
            entry.origin = Some(ValueOrigin::Seed);
            (entry.snapshot(key), entry.listeners())
        };
        trace!(key = %key, "entry seeded");
        for listener in listeners {
            listener(&snapshot);
        }
    }

    /// Refresh `key` from the network.
    ///
    /// At most one fetch per key is in flight at any time: a call that finds
    /// a revalidation already running attaches to it and resolves with the
    /// same outcome. The fetch is also spawned onto the runtime so the entry
    /// settles even if every awaiting caller is dropped mid-flight.
    pub async fn revalidate(
        self: &Arc<Self>,
        key: &str,
        fetcher: &Arc<dyn Fetcher>,
    ) -> Result<Value, Arc<FetchError>> {
        let (fut, started) = {
            let mut map = self.inner.lock().unwrap();
            let entry = map.entry(key.to_string()).or_default();
            if let Some(existing) = &entry.in_flight {
                trace!(key = %key, "revalidation in flight, attaching");
                (existing.clone(), false)
            } else {
                let store = Arc::clone(self);
                let fetcher = Arc::clone(fetcher);
                let owned_key = key.to_string();
                let fut: RevalidationFuture = async move {
                    let result = fetcher.fetch(&owned_key).await.map_err(Arc::new);
                    store.settle(&owned_key, result)
                }
                .boxed()
                .shared();
                entry.in_flight = Some(fut.clone());
                (fut, true)
            }
        };

        if started {
            debug!(key = %key, "revalidation started");
            tokio::spawn(fut.clone());
            self.notify(key);
        }

        fut.await
    }

    /// Apply an optimistic patch and notify listeners, without fetching.
    ///
    /// Object patches are shallow-merged into an object value; anything else
    /// replaces the value. The result is provisional (`ValueOrigin::
    /// Optimistic`) until the next successful fetch reconciles it.
    pub fn mutate_local(&self, key: &str, patch: Value) -> CacheEntry {
        let (snapshot, listeners) = {
            let mut map = self.inner.lock().unwrap();
            let entry = map.entry(key.to_string()).or_default();
            match (&mut entry.value, patch) {
                (Some(Value::Object(current)), Value::Object(fields)) => {
                    for (name, value) in fields {
                        current.insert(name, value);
                    }
                }
                (slot, patch) => *slot = Some(patch),
            }
            entry.origin = Some(ValueOrigin::Optimistic);
            (entry.snapshot(key), entry.listeners())
        };
        trace!(key = %key, "optimistic patch applied");
        for listener in &listeners {
            listener(&snapshot);
        }
        snapshot
    }

    /// Optimistically patch `key`, then revalidate unless
    /// `options.send_request` is false.
    ///
    /// Mutate does not roll back automatically: if the follow-up fetch
    /// fails, the optimistic value stays in place (with the error recorded
    /// on the entry) until a later fetch succeeds. Callers that need
    /// rollback capture the prior entry themselves before mutating.
    pub async fn mutate(
        self: &Arc<Self>,
        key: &str,
        patch: Option<Value>,
        options: MutateOptions,
        fetcher: &Arc<dyn Fetcher>,
    ) -> Result<Option<Value>, Arc<FetchError>> {
        if let Some(patch) = patch {
            self.mutate_local(key, patch);
        }
        if options.send_request {
            self.revalidate(key, fetcher).await.map(Some)
        } else {
            Ok(self.get(key).value)
        }
    }

    /// Register a listener for changes to one key.
    ///
    /// The listener fires on every seed, optimistic patch, revalidation
    /// start, and revalidation settle of that key - never for other keys.
    /// Dropping the guard unsubscribes.
    pub fn on_change(
        self: &Arc<Self>,
        key: &str,
        listener: impl Fn(&CacheEntry) + Send + Sync + 'static,
    ) -> ListenerGuard {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut map = self.inner.lock().unwrap();
            map.entry(key.to_string())
                .or_default()
                .listeners
                .insert(id, Arc::new(listener));
        }
        ListenerGuard {
            store: Arc::clone(self),
            key: key.to_string(),
            id,
        }
    }

    /// Number of live listeners on `key`.
    pub fn listener_count(&self, key: &str) -> usize {
        let map = self.inner.lock().unwrap();
        map.get(key).map(|e| e.listeners.len()).unwrap_or(0)
    }

    fn settle(
        &self,
        key: &str,
        result: Result<Value, Arc<FetchError>>,
    ) -> Result<Value, Arc<FetchError>> {
        let (snapshot, listeners) = {
            let mut map = self.inner.lock().unwrap();
            let entry = map.entry(key.to_string()).or_default();
            entry.in_flight = None;
            match &result {
                Ok(value) => {
                    entry.value = Some(value.clone());
                    entry.origin = Some(ValueOrigin::Fetch);
                    entry.error = None;
                    entry.last_updated = Some(Utc::now());
                }
                Err(err) => {
                    entry.error = Some(Arc::clone(err));
                }
            }
            (entry.snapshot(key), entry.listeners())
        };
        match &result {
            Ok(_) => debug!(key = %key, "revalidation succeeded"),
            Err(e) => warn!(key = %key, error = %e, "revalidation failed"),
        }
        for listener in listeners {
            listener(&snapshot);
        }
        result
    }

    fn notify(&self, key: &str) {
        let (snapshot, listeners) = {
            let map = self.inner.lock().unwrap();
            match map.get(key) {
                Some(entry) => (entry.snapshot(key), entry.listeners()),
                None => return,
            }
        };
        for listener in listeners {
            listener(&snapshot);
        }
    }

    fn remove_listener(&self, key: &str, id: u64) {
        let mut map = self.inner.lock().unwrap();
        if let Some(entry) = map.get_mut(key) {
            entry.listeners.remove(&id);
        }
    }
}

/// Handle for a registered listener; unsubscribes on drop.
pub struct ListenerGuard {
    store: Arc<SyncStore>,
    key: String,
    id: u64,
}

impl ListenerGuard {
    pub fn unsubscribe(self) {}
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.store.remove_listener(&self.key, self.id);
    }
}
