//! Transport contract consumed by the store.

use async_trait::async_trait;
use serde_json::Value;

use crate::api::FetchError;

/// Performs a network read for a resource key.
///
/// Implementations reject on non-success HTTP status or malformed payloads
/// and do not retry; a rejected fetch leaves the requesting entry
/// stale-with-error. The store calls this from `revalidate` only - a fetcher
/// never writes cache entries itself.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, key: &str) -> Result<Value, FetchError>;
}
