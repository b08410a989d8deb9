//! Typed ordered-collection binding.
//!
//! The collection entry is the authority on membership and base order; the
//! per-item entries it names are the authority on item values. Collection
//! fetches that return full objects are distributed into the item entries
//! (as local-only mutations, so the store stays the single writer); bare ids
//! resolve against whatever the item entries already hold. An id whose item
//! entry has not resolved yet is pending and excluded from the emitted
//! sequence - never emitted as a placeholder. An id no longer in the
//! collection is dropped even if its item entry lingers in the store.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::api::FetchError;

use super::poll::PollHandle;
use super::realtime::RealtimeHandle;
use super::store::{CacheEntry, ListenerGuard, MutateOptions, SyncStore};
use super::{Fetcher, SyncClient};

/// Stable comparator applied to the emitted sequence on every recomputation.
pub type OrderBy<T> = Arc<dyn Fn(&T, &T) -> CmpOrdering + Send + Sync>;

/// Derives an item's resource key from its id.
pub type ItemKeyFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Configuration for a [`ResourceList`] binding.
#[derive(Clone)]
pub struct ListConfig<T> {
    pub refresh_interval: Option<Duration>,
    pub refresh_when_hidden: bool,
    /// When omitted, server arrival order is preserved.
    pub order_by: Option<OrderBy<T>>,
}

impl<T> Default for ListConfig<T> {
    fn default() -> Self {
        Self {
            refresh_interval: None,
            refresh_when_hidden: false,
            order_by: None,
        }
    }
}

/// State shared with the store listeners the binding installs.
struct ListShared {
    store: Arc<SyncStore>,
    collection_key: String,
    item_key: ItemKeyFn,
    item_guards: Mutex<HashMap<String, ListenerGuard>>,
    consumers: Mutex<HashMap<u64, Arc<dyn Fn() + Send + Sync>>>,
    next_consumer_id: AtomicU64,
}

impl ListShared {
    /// Re-derive membership from the collection entry: distribute inline
    /// objects into their item entries and align per-item subscriptions.
    fn sync_with_collection(self: &Arc<Self>) {
        let elements = collection_elements(&self.store.get(&self.collection_key));

        let mut ids = Vec::new();
        for element in &elements {
            let Some(id) = element_id(element) else {
                continue;
            };
            if element.is_object() {
                let key = (self.item_key)(&id);
                if self.store.get(&key).value.as_ref() != Some(element) {
                    self.store.mutate_local(&key, element.clone());
                }
            }
            ids.push(id);
        }

        {
            let mut guards = self.item_guards.lock().unwrap();
            let wanted: HashSet<String> = ids.iter().map(|id| (self.item_key)(id)).collect();
            guards.retain(|key, _| wanted.contains(key));
            for id in &ids {
                let key = (self.item_key)(id);
                if !guards.contains_key(&key) {
                    let weak = Arc::downgrade(self);
                    let guard = self.store.on_change(&key, move |_| {
                        if let Some(shared) = weak.upgrade() {
                            shared.notify_consumers();
                        }
                    });
                    guards.insert(key, guard);
                }
            }
        }

        self.notify_consumers();
    }

    fn notify_consumers(&self) {
        let consumers: Vec<_> = self.consumers.lock().unwrap().values().cloned().collect();
        for consumer in consumers {
            consumer();
        }
    }
}

fn collection_elements(entry: &CacheEntry) -> Vec<Value> {
    match &entry.value {
        Some(Value::Array(items)) => items.clone(),
        Some(other) => {
            warn!(key = %entry.key, "collection entry is not an array: {}", other);
            Vec::new()
        }
        None => Vec::new(),
    }
}

/// Canonical string form of an element's id. Elements are either full
/// objects carrying an `id` field or bare ids.
fn element_id(element: &Value) -> Option<String> {
    let id = match element {
        Value::Object(fields) => fields.get("id")?,
        other => other,
    };
    match id {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

/// A consumer's live registration to an ordered collection.
pub struct ResourceList<T> {
    collection_key: String,
    item_key: ItemKeyFn,
    store: Arc<SyncStore>,
    fetcher: Arc<dyn Fetcher>,
    order_by: Option<OrderBy<T>>,
    shared: Arc<ListShared>,
    _collection_guard: ListenerGuard,
    _poll: Option<PollHandle>,
    pub(crate) _realtime: Option<RealtimeHandle>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ResourceList<T>
where
    T: DeserializeOwned + Serialize,
{
    pub(crate) fn new(
        client: &SyncClient,
        collection_key: String,
        item_key: ItemKeyFn,
        initial: Option<Vec<T>>,
        config: ListConfig<T>,
    ) -> Self {
        let store = Arc::clone(client.store());

        let shared = Arc::new(ListShared {
            store: Arc::clone(&store),
            collection_key: collection_key.clone(),
            item_key: Arc::clone(&item_key),
            item_guards: Mutex::new(HashMap::new()),
            consumers: Mutex::new(HashMap::new()),
            next_consumer_id: AtomicU64::new(0),
        });

        let collection_guard = {
            let weak = Arc::downgrade(&shared);
            store.on_change(&collection_key, move |_| {
                if let Some(shared) = weak.upgrade() {
                    shared.sync_with_collection();
                }
            })
        };

        if let Some(initial) = initial {
            match serde_json::to_value(&initial) {
                Ok(value) => store.seed(&collection_key, value),
                Err(error) => {
                    warn!(key = %collection_key, error = %error, "initial data failed to serialize, skipping seed")
                }
            }
        }
        // pick up whatever the store already holds for this collection
        shared.sync_with_collection();

        let poll = config.refresh_interval.map(|interval| {
            client
                .scheduler()
                .register(&collection_key, interval, config.refresh_when_hidden)
        });

        Self {
            collection_key,
            item_key,
            store,
            fetcher: Arc::clone(client.fetcher()),
            order_by: config.order_by,
            shared,
            _collection_guard: collection_guard,
            _poll: poll,
            _realtime: None,
            _marker: PhantomData,
        }
    }

    pub fn collection_key(&self) -> &str {
        &self.collection_key
    }

    /// Collection entry snapshot (membership authority).
    pub fn entry(&self) -> CacheEntry {
        self.store.get(&self.collection_key)
    }

    pub fn error(&self) -> Option<Arc<FetchError>> {
        self.entry().error
    }

    pub fn is_validating(&self) -> bool {
        self.entry().revalidating
    }

    /// The emitted sequence, derived from current cache state on every call.
    pub fn current(&self) -> Vec<T> {
        let elements = collection_elements(&self.entry());

        let mut items: Vec<T> = Vec::new();
        for element in &elements {
            let Some(id) = element_id(element) else {
                continue;
            };
            let key = (self.item_key)(&id);
            let value = match self.store.get(&key).value {
                Some(value) => value,
                // item entry not distributed yet; fall back to the inline
                // object, or treat a bare id as pending
                None if element.is_object() => element.clone(),
                None => continue,
            };
            match serde_json::from_value(value) {
                Ok(item) => items.push(item),
                Err(error) => {
                    warn!(key = %key, error = %error, "list item failed to deserialize, skipping");
                }
            }
        }

        if let Some(order_by) = &self.order_by {
            items.sort_by(|a, b| order_by(a, b));
        }
        items
    }

    /// Refetch the collection now.
    pub async fn revalidate(&self) -> Result<Vec<T>, Arc<FetchError>> {
        self.store
            .revalidate(&self.collection_key, &self.fetcher)
            .await?;
        Ok(self.current())
    }

    /// Optimistically patch one item, then refetch its entry unless
    /// `options.send_request` is false.
    pub async fn mutate_item(
        &self,
        id: &str,
        patch: Option<Value>,
        options: MutateOptions,
    ) -> Result<Option<T>, Arc<FetchError>> {
        let key = (self.item_key)(id);
        let value = self.store.mutate(&key, patch, options, &self.fetcher).await?;
        Ok(value.and_then(|value| match serde_json::from_value(value) {
            Ok(item) => Some(item),
            Err(error) => {
                warn!(key = %key, error = %error, "mutated item failed to deserialize");
                None
            }
        }))
    }

    /// Subscribe to changes of the emitted sequence (collection membership
    /// or any member item). Dropping the subscription unsubscribes.
    pub fn on_change(&self, consumer: impl Fn() + Send + Sync + 'static) -> ListSubscription {
        let id = self.shared.next_consumer_id.fetch_add(1, Ordering::Relaxed);
        self.shared
            .consumers
            .lock()
            .unwrap()
            .insert(id, Arc::new(consumer));
        ListSubscription {
            shared: Arc::downgrade(&self.shared),
            id,
        }
    }
}

/// Consumer registration on a [`ResourceList`]; unsubscribes on drop.
pub struct ListSubscription {
    shared: Weak<ListShared>,
    id: u64,
}

impl Drop for ListSubscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.consumers.lock().unwrap().remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::MockFetcher;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        id: i64,
        t: i64,
    }

    const COLLECTION: &str = "/queues/3/questions/";

    fn item_key(id: &str) -> String {
        format!("/queues/3/questions/{}/", id)
    }

    fn client() -> (SyncClient, Arc<MockFetcher>) {
        let mock = MockFetcher::new();
        (SyncClient::new(mock.clone()), mock)
    }

    fn by_t() -> OrderBy<Item> {
        Arc::new(|a: &Item, b: &Item| a.t.cmp(&b.t))
    }

    #[tokio::test]
    async fn test_comparator_orders_emitted_sequence_deterministically() {
        let base = vec![
            Item { id: 1, t: 5 },
            Item { id: 2, t: 3 },
            Item { id: 3, t: 9 },
        ];
        let mut permutations: Vec<Vec<Item>> = vec![
            base.clone(),
            vec![base[2].clone(), base[0].clone(), base[1].clone()],
            vec![base[1].clone(), base[2].clone(), base[0].clone()],
        ];

        for initial in permutations.drain(..) {
            let (client, _mock) = client();
            let list: ResourceList<Item> = client.resource_list(
                COLLECTION,
                item_key,
                Some(initial),
                ListConfig {
                    order_by: Some(by_t()),
                    ..ListConfig::default()
                },
            );
            let ids: Vec<i64> = list.current().iter().map(|i| i.id).collect();
            assert_eq!(ids, vec![2, 1, 3]);
        }
    }

    #[tokio::test]
    async fn test_arrival_order_preserved_without_comparator() {
        let (client, _mock) = client();
        let list: ResourceList<Item> = client.resource_list(
            COLLECTION,
            item_key,
            Some(vec![
                Item { id: 3, t: 9 },
                Item { id: 1, t: 5 },
                Item { id: 2, t: 3 },
            ]),
            ListConfig::default(),
        );
        let ids: Vec<i64> = list.current().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[tokio::test]
    async fn test_pending_items_are_excluded_until_resolved() {
        let (client, _mock) = client();
        // membership listed as bare ids; only item 1 has resolved
        client.store().seed(COLLECTION, json!([1, 2]));
        client.store().seed(&item_key("1"), json!({"id": 1, "t": 5}));

        let list: ResourceList<Item> =
            client.resource_list(COLLECTION, item_key, None, ListConfig::default());
        let ids: Vec<i64> = list.current().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![1]);

        client.store().seed(&item_key("2"), json!({"id": 2, "t": 3}));
        let ids: Vec<i64> = list.current().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_items_removed_upstream_are_dropped_despite_lingering_entries() {
        let (client, mock) = client();
        let list: ResourceList<Item> = client.resource_list(
            COLLECTION,
            item_key,
            Some(vec![Item { id: 1, t: 5 }, Item { id: 2, t: 3 }]),
            ListConfig::default(),
        );
        assert_eq!(list.current().len(), 2);

        // the server dropped item 2; its item entry stays in the store
        mock.respond(COLLECTION, json!([{"id": 1, "t": 5}]));
        list.revalidate().await.unwrap();

        assert!(client.store().get(&item_key("2")).value.is_some());
        let ids: Vec<i64> = list.current().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[tokio::test]
    async fn test_collection_fetch_distributes_items_into_item_entries() {
        let (client, mock) = client();
        mock.respond(COLLECTION, json!([{"id": 1, "t": 5}, {"id": 2, "t": 3}]));

        let list: ResourceList<Item> =
            client.resource_list(COLLECTION, item_key, None, ListConfig::default());
        list.revalidate().await.unwrap();

        let entry = client.store().get(&item_key("2"));
        assert_eq!(entry.value.unwrap()["t"], 3);
    }

    #[tokio::test]
    async fn test_item_mutation_shows_up_in_emitted_sequence() {
        let (client, _mock) = client();
        let list: ResourceList<Item> = client.resource_list(
            COLLECTION,
            item_key,
            Some(vec![Item { id: 1, t: 5 }, Item { id: 2, t: 3 }]),
            ListConfig {
                order_by: Some(by_t()),
                ..ListConfig::default()
            },
        );

        list.mutate_item("2", Some(json!({"t": 7})), MutateOptions { send_request: false })
            .await
            .unwrap();

        let ts: Vec<i64> = list.current().iter().map(|i| i.t).collect();
        assert_eq!(ts, vec![5, 7]);
    }

    #[tokio::test]
    async fn test_consumers_notified_on_membership_and_item_changes() {
        let (client, mock) = client();
        let list: ResourceList<Item> = client.resource_list(
            COLLECTION,
            item_key,
            Some(vec![Item { id: 1, t: 5 }]),
            ListConfig::default(),
        );

        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        let _sub = list.on_change(move || {
            seen2.fetch_add(1, Ordering::SeqCst);
        });

        client
            .store()
            .mutate_local(&item_key("1"), json!({"t": 6}));
        assert!(seen.load(Ordering::SeqCst) >= 1);

        let before = seen.load(Ordering::SeqCst);
        mock.respond(COLLECTION, json!([{"id": 1, "t": 6}, {"id": 2, "t": 1}]));
        list.revalidate().await.unwrap();
        assert!(seen.load(Ordering::SeqCst) > before);
    }
}
