//! Queueline - client-side data synchronization for an office-hours queue.
//!
//! This crate is the data layer of the Queueline client. It keeps typed
//! single resources and ordered resource collections fresh against the
//! Queueline REST API using three ingredients:
//!
//! - periodic polling on a per-binding interval,
//! - server-pushed invalidation events delivered over a push channel,
//! - locally-issued optimistic mutations.
//!
//! The central piece is [`sync::SyncStore`], a keyed cache with coalesced
//! revalidation and per-key change notification. [`sync::Resource`] and
//! [`sync::ResourceList`] bind consumers to store entries, while
//! [`sync::PollScheduler`] and [`sync::RealtimeMultiplexer`] drive refreshes.
//! The [`course`] module exposes the typed bindings the application consumes
//! (questions, queues, announcements, and the derived queue views).
//!
//! Rendering, routing, and session handling live in the UI layer, not here.

pub mod api;
pub mod config;
pub mod course;
pub mod models;
pub mod sync;

pub use api::{ApiClient, FetchError};
pub use sync::{
    CacheEntry, Descriptor, EntryState, Fetcher, ListConfig, MutateOptions, PollScheduler,
    PushChannel, RealtimeMultiplexer, Resource, ResourceConfig, ResourceList, SyncClient,
    SyncError, SyncStore, ValueOrigin, VisibilitySignal,
};
