//! Resource synchronization engine.
//!
//! This module keeps a tab-wide cache of API resources fresh. The pieces:
//!
//! - [`SyncStore`]: keyed cache with coalesced revalidation, optimistic
//!   mutation, and per-key change notification. The single source of truth;
//!   `seed`, `revalidate`, and `mutate`/`mutate_local` are the only writers.
//! - [`Fetcher`]: the transport contract a revalidation calls into.
//! - [`Resource`] / [`ResourceList`]: typed bindings over store entries.
//! - [`PollScheduler`]: refcounted per-key refresh timers, visibility-aware.
//! - [`RealtimeMultiplexer`]: fans one push subscription per descriptor out
//!   to every interested key; events only ever schedule refetches.
//! - [`SyncClient`]: wires the above together for the application layer.

pub mod fetcher;
pub mod list;
pub mod poll;
pub mod realtime;
pub mod resource;
pub mod store;
pub mod visibility;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

pub use fetcher::Fetcher;
pub use list::{ItemKeyFn, ListConfig, ListSubscription, OrderBy, ResourceList};
pub use poll::{PollHandle, PollScheduler};
pub use realtime::{Descriptor, PushChannel, RealtimeHandle, RealtimeMultiplexer, Unsubscribe};
pub use resource::{Resource, ResourceConfig};
pub use store::{CacheEntry, EntryState, ListenerGuard, MutateOptions, SyncStore, ValueOrigin};
pub use visibility::VisibilitySignal;

use tracing::warn;

use thiserror::Error;

/// Errors raised by the synchronization layer itself.
///
/// Fetch failures are not propagated through this enum; they are recorded on
/// the cache entry and surfaced to bindings as data (`CacheEntry::error`).
#[derive(Debug, Error)]
pub enum SyncError {
    /// A push descriptor could not be subscribed (entity gone, channel
    /// refused). The multiplexer drops the descriptor; dependent
    /// revalidations are left to fail on their own.
    #[error("push subscription no longer resolvable: {0}")]
    StaleSubscription(String),

    /// A derived view was asked for a value while its upstream is still
    /// pending. Callers should treat this as "not yet", not as a failure.
    #[error("derived value skipped: upstream {0} is pending")]
    DerivedPending(String),
}

/// Everything a binding needs, bundled.
///
/// Owns the store, the transport, the poll scheduler, and (optionally) the
/// realtime multiplexer. Cheap to clone; all parts are shared. There is no
/// hidden global instance - tests build one client per case.
#[derive(Clone)]
pub struct SyncClient {
    store: Arc<SyncStore>,
    fetcher: Arc<dyn Fetcher>,
    scheduler: Arc<PollScheduler>,
    realtime: Option<Arc<RealtimeMultiplexer>>,
    visibility: VisibilitySignal,
}

impl SyncClient {
    /// Build a client without a push channel (poll-only).
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        let store = SyncStore::new();
        let visibility = VisibilitySignal::new();
        let scheduler = PollScheduler::new(
            Arc::clone(&store),
            Arc::clone(&fetcher),
            visibility.clone(),
        );
        Self {
            store,
            fetcher,
            scheduler,
            realtime: None,
            visibility,
        }
    }

    /// Build a client with a push channel attached.
    pub fn with_channel(fetcher: Arc<dyn Fetcher>, channel: Arc<dyn PushChannel>) -> Self {
        let mut client = Self::new(fetcher);
        client.realtime = Some(RealtimeMultiplexer::new(
            channel,
            Arc::clone(&client.store),
            Arc::clone(&client.fetcher),
        ));
        client
    }

    pub fn store(&self) -> &Arc<SyncStore> {
        &self.store
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    pub fn scheduler(&self) -> &Arc<PollScheduler> {
        &self.scheduler
    }

    pub fn realtime(&self) -> Option<&Arc<RealtimeMultiplexer>> {
        self.realtime.as_ref()
    }

    /// Visibility handle. Feed the UI layer's page-visibility signal into
    /// this; polling bindings with `refresh_when_hidden = false` suspend
    /// while it reads false.
    pub fn visibility(&self) -> &VisibilitySignal {
        &self.visibility
    }

    /// Bind a typed singleton resource.
    pub fn resource<T>(
        &self,
        key: impl Into<String>,
        initial: Option<T>,
        config: ResourceConfig,
    ) -> Resource<T>
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        Resource::new(self, key.into(), initial, config)
    }

    /// Bind a typed ordered collection.
    pub fn resource_list<T>(
        &self,
        collection_key: impl Into<String>,
        item_key: impl Fn(&str) -> String + Send + Sync + 'static,
        initial: Option<Vec<T>>,
        config: ListConfig<T>,
    ) -> ResourceList<T>
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        ResourceList::new(self, collection_key.into(), Arc::new(item_key), initial, config)
    }

    /// Bind a singleton resource that also revalidates on matching push
    /// events. Without a push channel the binding degrades to its polling
    /// configuration.
    pub fn realtime_resource<T>(
        &self,
        key: impl Into<String>,
        descriptor: Descriptor,
        initial: Option<T>,
        config: ResourceConfig,
    ) -> Resource<T>
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let mut resource = self.resource(key, initial, config);
        match &self.realtime {
            Some(mux) => {
                resource._realtime = Some(mux.register(descriptor, resource.key().to_string()));
            }
            None => {
                warn!(key = %resource.key(), "no push channel configured, realtime binding degrades to polling");
            }
        }
        resource
    }

    /// Bind an ordered collection that also revalidates on matching push
    /// events. Without a push channel the binding degrades to its polling
    /// configuration.
    pub fn realtime_resource_list<T>(
        &self,
        collection_key: impl Into<String>,
        item_key: impl Fn(&str) -> String + Send + Sync + 'static,
        descriptor: Descriptor,
        initial: Option<Vec<T>>,
        config: ListConfig<T>,
    ) -> ResourceList<T>
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let mut list = self.resource_list(collection_key, item_key, initial, config);
        match &self.realtime {
            Some(mux) => {
                list._realtime =
                    Some(mux.register(descriptor, list.collection_key().to_string()));
            }
            None => {
                warn!(key = %list.collection_key(), "no push channel configured, realtime binding degrades to polling");
            }
        }
        list
    }
}
