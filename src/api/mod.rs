//! REST API client module for the Queueline server.
//!
//! This module provides the `ApiClient` for communicating with the
//! Queueline API. Reads go through the [`crate::sync::Fetcher`] contract
//! (the synchronization engine is the only caller); writes are explicit
//! helpers for the operations the application performs (asking, answering,
//! and clearing questions, managing queues and announcements).
//!
//! Requests authenticate with a bearer token when one is configured.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::FetchError;
