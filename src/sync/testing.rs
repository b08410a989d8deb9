//! Test doubles for the synchronization engine.
//!
//! Compiled for tests only. `MockFetcher` stands in for the HTTP transport
//! (scripted responses, call counting, pausable in-flight fetches);
//! `MockChannel` stands in for the push transport (manual event and
//! reconnect delivery).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use crate::api::FetchError;

use super::realtime::{Descriptor, Unsubscribe};
use super::{Fetcher, PushChannel, SyncError};

#[derive(Default)]
struct MockFetcherState {
    responses: HashMap<String, Value>,
    failures: HashSet<String>,
    calls: HashMap<String, usize>,
    paused: bool,
}

pub(crate) struct MockFetcher {
    state: Mutex<MockFetcherState>,
    release: Notify,
}

impl MockFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockFetcherState::default()),
            release: Notify::new(),
        })
    }

    /// Script the value returned for `key` (also clears a scripted failure).
    pub fn respond(&self, key: &str, value: Value) {
        let mut state = self.state.lock().unwrap();
        state.failures.remove(key);
        state.responses.insert(key.to_string(), value);
    }

    /// Make fetches for `key` fail until `respond` is called again.
    pub fn fail(&self, key: &str) {
        self.state.lock().unwrap().failures.insert(key.to_string());
    }

    /// Hold every fetch in flight until `release` is called.
    pub fn pause(&self) {
        self.state.lock().unwrap().paused = true;
    }

    pub fn release(&self) {
        self.state.lock().unwrap().paused = false;
        self.release.notify_waiters();
    }

    pub fn calls(&self, key: &str) -> usize {
        self.state.lock().unwrap().calls.get(key).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().unwrap().calls.values().sum()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, key: &str) -> Result<Value, FetchError> {
        {
            let mut state = self.state.lock().unwrap();
            *state.calls.entry(key.to_string()).or_insert(0) += 1;
        }
        loop {
            let notified = self.release.notified();
            if !self.state.lock().unwrap().paused {
                break;
            }
            notified.await;
        }
        let state = self.state.lock().unwrap();
        if state.failures.contains(key) {
            Err(FetchError::ServerError(format!("scripted failure for {key}")))
        } else {
            Ok(state.responses.get(key).cloned().unwrap_or(Value::Null))
        }
    }
}

type EventSink = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct MockChannelState {
    sinks: HashMap<String, EventSink>,
    reconnect_callbacks: Vec<Arc<dyn Fn() + Send + Sync>>,
    refused: HashSet<String>,
    subscribes: usize,
}

pub(crate) struct MockChannel {
    state: Arc<Mutex<MockChannelState>>,
}

impl MockChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(Mutex::new(MockChannelState::default())),
        })
    }

    /// Refuse future subscriptions for `descriptor`.
    pub fn refuse(&self, descriptor: &Descriptor) {
        self.state
            .lock()
            .unwrap()
            .refused
            .insert(descriptor.canonical());
    }

    /// Deliver one invalidation event for `descriptor`.
    pub fn emit(&self, descriptor: &Descriptor) {
        let sink = self
            .state
            .lock()
            .unwrap()
            .sinks
            .get(&descriptor.canonical())
            .cloned();
        if let Some(sink) = sink {
            sink();
        }
    }

    /// Simulate the transport reconnecting.
    pub fn reconnect(&self) {
        let callbacks = self.state.lock().unwrap().reconnect_callbacks.clone();
        for callback in callbacks {
            callback();
        }
    }

    pub fn active_subscriptions(&self) -> usize {
        self.state.lock().unwrap().sinks.len()
    }

    pub fn subscribe_count(&self) -> usize {
        self.state.lock().unwrap().subscribes
    }
}

impl PushChannel for MockChannel {
    fn subscribe(&self, descriptor: &Descriptor, on_event: EventSink) -> Result<Unsubscribe, SyncError> {
        let mut state = self.state.lock().unwrap();
        let canonical = descriptor.canonical();
        if state.refused.contains(&canonical) {
            return Err(SyncError::StaleSubscription(canonical));
        }
        state.subscribes += 1;
        state.sinks.insert(canonical.clone(), on_event);

        let shared = Arc::clone(&self.state);
        Ok(Box::new(move || {
            shared.lock().unwrap().sinks.remove(&canonical);
        }))
    }

    fn on_reconnect(&self, callback: Box<dyn Fn() + Send + Sync>) {
        self.state
            .lock()
            .unwrap()
            .reconnect_callbacks
            .push(Arc::from(callback));
    }
}
