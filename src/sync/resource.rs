//! Typed singleton resource binding.

use std::marker::PhantomData;
use std::sync::Arc;
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

/// Configuration for a [`Resource`] binding.
#[derive(Clone, Default)]
pub struct ResourceConfig {
    /// Poll the key at this interval while the binding is alive.
    pub refresh_interval: Option<Duration>,
    /// Keep polling while the view is hidden.
    pub refresh_when_hidden: bool,
}

/// A consumer's live registration to one resource key.
///
/// Holds the binding's poll registration (and realtime registration, if
/// any); dropping the binding releases both. Values are read from the store
/// on every access, so a binding never serves a stale closure-captured copy.
pub struct Resource<T> {
    key: String,
    store: Arc<SyncStore>,
    fetcher: Arc<dyn Fetcher>,
    _poll: Option<PollHandle>,
    pub(crate) _realtime: Option<RealtimeHandle>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Resource<T>
where
    T: DeserializeOwned + Serialize,
{
    pub(crate) fn new(
        client: &SyncClient,
        key: String,
        initial: Option<T>,
        config: ResourceConfig,
    ) -> Self {
        if let Some(initial) = initial {
            match serde_json::to_value(&initial) {
                Ok(value) => client.store().seed(&key, value),
                Err(error) => warn!(key = %key, error = %error, "initial data failed to serialize, skipping seed"),
            }
        }

        let poll = config
            .refresh_interval
            .map(|interval| client.scheduler().register(&key, interval, config.refresh_when_hidden));

        Self {
            key,
            store: Arc::clone(client.store()),
            fetcher: Arc::clone(client.fetcher()),
            _poll: poll,
            _realtime: None,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Raw entry snapshot.
    pub fn entry(&self) -> CacheEntry {
        self.store.get(&self.key)
    }

    /// The cached value, deserialized. `None` before the first seed or
    /// fetch, or if the cached value does not match `T`.
    pub fn data(&self) -> Option<T> {
        let value = self.entry().value?;
        match serde_json::from_value(value) {
            Ok(data) => Some(data),
            Err(error) => {
                warn!(key = %self.key, error = %error, "cached value failed to deserialize");
                None
            }
        }
    }

    pub fn error(&self) -> Option<Arc<FetchError>> {
        self.entry().error
    }

    pub fn is_validating(&self) -> bool {
        self.entry().revalidating
    }

    /// Fetch the key now (coalescing with any in-flight revalidation).
    pub async fn revalidate(&self) -> Result<T, Arc<FetchError>> {
        let value = self.store.revalidate(&self.key, &self.fetcher).await?;
        serde_json::from_value(value).map_err(|error| Arc::new(FetchError::Decode(error.to_string())))
    }

    /// Optimistically patch the cached value, then refetch unless
    /// `options.send_request` is false. Does not roll back on failure.
    pub async fn mutate(
        &self,
        patch: Option<Value>,
        options: MutateOptions,
    ) -> Result<Option<T>, Arc<FetchError>> {
        let value = self
            .store
            .mutate(&self.key, patch, options, &self.fetcher)
            .await?;
        Ok(value.and_then(|value| match serde_json::from_value(value) {
            Ok(data) => Some(data),
            Err(error) => {
                warn!(key = %self.key, error = %error, "mutated value failed to deserialize");
                None
            }
        }))
    }

    /// Listen for changes to this key. Dropping the guard unsubscribes.
    pub fn on_change(
        &self,
        listener: impl Fn(&CacheEntry) + Send + Sync + 'static,
    ) -> ListenerGuard {
        self.store.on_change(&self.key, listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::store::{EntryState, ValueOrigin};
    use crate::sync::testing::MockFetcher;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Course {
        id: i64,
        name: String,
    }

    fn client() -> (SyncClient, Arc<MockFetcher>) {
        let mock = MockFetcher::new();
        (SyncClient::new(mock.clone()), mock)
    }

    #[tokio::test]
    async fn test_initial_data_seeds_empty_entry_without_fetching() {
        let (client, mock) = client();
        let resource: Resource<Course> = client.resource(
            "/courses/1/",
            Some(Course {
                id: 1,
                name: "CIS 120".into(),
            }),
            ResourceConfig::default(),
        );

        assert_eq!(resource.data().unwrap().name, "CIS 120");
        assert_eq!(resource.entry().origin, Some(ValueOrigin::Seed));
        assert_eq!(mock.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_initial_data_does_not_overwrite_fresh_entry() {
        let (client, mock) = client();
        mock.respond("/courses/1/", json!({"id": 1, "name": "from network"}));

        let first: Resource<Course> = client.resource("/courses/1/", None, ResourceConfig::default());
        first.revalidate().await.unwrap();

        let second: Resource<Course> = client.resource(
            "/courses/1/",
            Some(Course {
                id: 1,
                name: "stale server render".into(),
            }),
            ResourceConfig::default(),
        );
        assert_eq!(second.data().unwrap().name, "from network");
    }

    #[tokio::test]
    async fn test_error_surfaces_as_data_not_panic() {
        let (client, mock) = client();
        mock.fail("/courses/1/");
        let resource: Resource<Course> = client.resource("/courses/1/", None, ResourceConfig::default());

        assert!(resource.revalidate().await.is_err());
        assert!(resource.error().is_some());
        assert_eq!(resource.entry().state(), EntryState::StaleWithError);
        assert!(resource.data().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_binding_releases_poll_registration() {
        let (client, mock) = client();
        mock.respond("/courses/1/", json!({"id": 1, "name": "CIS 120"}));

        let resource: Resource<Course> = client.resource(
            "/courses/1/",
            None,
            ResourceConfig {
                refresh_interval: Some(Duration::from_millis(1000)),
                refresh_when_hidden: true,
            },
        );
        assert_eq!(client.scheduler().active_timer_count(), 1);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(mock.calls("/courses/1/") >= 1);

        drop(resource);
        assert_eq!(client.scheduler().active_timer_count(), 0);
    }

    #[tokio::test]
    async fn test_mutate_returns_typed_value() {
        let (client, mock) = client();
        mock.respond("/courses/1/", json!({"id": 1, "name": "renamed"}));
        let resource: Resource<Course> = client.resource(
            "/courses/1/",
            Some(Course {
                id: 1,
                name: "original".into(),
            }),
            ResourceConfig::default(),
        );

        let updated = resource
            .mutate(Some(json!({"name": "renamed"})), MutateOptions::default())
            .await
            .unwrap();
        assert_eq!(updated.unwrap().name, "renamed");
    }
}
