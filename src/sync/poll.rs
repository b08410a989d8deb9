//! Periodic revalidation timers.
//!
//! One timer task per resource key. Multiple bindings may poll the same key
//! with different intervals; the shortest one governs. Registrations are
//! refcounted through [`PollHandle`] guards - the task is torn down when the
//! last registration drops, so no timer outlives its consumers.
//!
//! Visibility: registrations with `refresh_when_hidden = false` stop
//! counting while the view is hidden. A key whose timer was paused that way
//! fires one immediate revalidation when the view becomes visible again, so
//! a long background stretch does not present arbitrarily stale data.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use super::store::SyncStore;
use super::visibility::VisibilitySignal;
use super::Fetcher;

struct PollEntry {
    interval: Duration,
    refresh_when_hidden: bool,
}

struct KeyPollState {
    registrations: HashMap<u64, PollEntry>,
    /// `None` pauses the timer; `Some(d)` re-arms it at `d`.
    control: watch::Sender<Option<Duration>>,
    task: JoinHandle<()>,
}

pub struct PollScheduler {
    store: Arc<SyncStore>,
    fetcher: Arc<dyn Fetcher>,
    visibility: VisibilitySignal,
    inner: Mutex<HashMap<String, KeyPollState>>,
    next_registration_id: AtomicU64,
}

impl PollScheduler {
    pub fn new(
        store: Arc<SyncStore>,
        fetcher: Arc<dyn Fetcher>,
        visibility: VisibilitySignal,
    ) -> Arc<Self> {
        let scheduler = Arc::new(Self {
            store,
            fetcher,
            visibility: visibility.clone(),
            inner: Mutex::new(HashMap::new()),
            next_registration_id: AtomicU64::new(0),
        });

        let weak = Arc::downgrade(&scheduler);
        let mut rx = visibility.subscribe();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let visible = *rx.borrow();
                match weak.upgrade() {
                    Some(scheduler) => scheduler.apply_visibility(visible),
                    None => break,
                }
            }
        });

        scheduler
    }

    /// Start (or join) polling of `key`. Dropping the handle releases the
    /// registration.
    pub fn register(
        self: &Arc<Self>,
        key: &str,
        interval: Duration,
        refresh_when_hidden: bool,
    ) -> PollHandle {
        let id = self.next_registration_id.fetch_add(1, Ordering::Relaxed);
        let visible = self.visibility.is_visible();

        let mut inner = self.inner.lock().unwrap();
        let state = inner.entry(key.to_string()).or_insert_with(|| {
            let (control, rx) = watch::channel(None);
            let task = Self::spawn_timer(
                Arc::clone(&self.store),
                Arc::clone(&self.fetcher),
                key.to_string(),
                rx,
            );
            debug!(key = %key, "poll timer started");
            KeyPollState {
                registrations: HashMap::new(),
                control,
                task,
            }
        });
        state.registrations.insert(
            id,
            PollEntry {
                interval,
                refresh_when_hidden,
            },
        );
        Self::push_control(state, visible);

        PollHandle {
            scheduler: Arc::clone(self),
            key: key.to_string(),
            id,
        }
    }

    /// Number of keys with a live timer task.
    pub fn active_timer_count(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// The interval currently governing `key`, if its timer is running.
    pub fn effective_interval(&self, key: &str) -> Option<Duration> {
        let inner = self.inner.lock().unwrap();
        inner.get(key).and_then(|state| *state.control.borrow())
    }

    fn effective(registrations: &HashMap<u64, PollEntry>, visible: bool) -> Option<Duration> {
        registrations
            .values()
            .filter(|entry| visible || entry.refresh_when_hidden)
            .map(|entry| entry.interval)
            .min()
    }

    fn push_control(state: &mut KeyPollState, visible: bool) {
        let effective = Self::effective(&state.registrations, visible);
        if *state.control.borrow() != effective {
            let _ = state.control.send(effective);
        }
    }

    fn apply_visibility(self: &Arc<Self>, visible: bool) {
        let resumed: Vec<String> = {
            let mut inner = self.inner.lock().unwrap();
            let mut resumed = Vec::new();
            for (key, state) in inner.iter_mut() {
                let effective = Self::effective(&state.registrations, visible);
                let previous = *state.control.borrow();
                if previous != effective {
                    if previous.is_none() && effective.is_some() && visible {
                        resumed.push(key.clone());
                    }
                    let _ = state.control.send(effective);
                }
            }
            resumed
        };

        // catch up on anything that went stale while hidden
        for key in resumed {
            debug!(key = %key, "view visible again, revalidating");
            let store = Arc::clone(&self.store);
            let fetcher = Arc::clone(&self.fetcher);
            tokio::spawn(async move {
                if let Err(error) = store.revalidate(&key, &fetcher).await {
                    debug!(key = %key, error = %error, "resume revalidation failed");
                }
            });
        }
    }

    fn spawn_timer(
        store: Arc<SyncStore>,
        fetcher: Arc<dyn Fetcher>,
        key: String,
        mut control: watch::Receiver<Option<Duration>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let interval = *control.borrow_and_update();
                match interval {
                    None => {
                        if control.changed().await.is_err() {
                            break;
                        }
                    }
                    Some(period) => {
                        tokio::select! {
                            _ = tokio::time::sleep(period) => {
                                if let Err(error) = store.revalidate(&key, &fetcher).await {
                                    debug!(key = %key, error = %error, "scheduled revalidation failed");
                                }
                            }
                            changed = control.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    fn unregister(&self, key: &str, id: u64) {
        let visible = self.visibility.is_visible();
        let mut inner = self.inner.lock().unwrap();
        let Some(state) = inner.get_mut(key) else {
            return;
        };
        state.registrations.remove(&id);
        if state.registrations.is_empty() {
            let state = inner.remove(key).expect("state present");
            state.task.abort();
            debug!(key = %key, "poll timer stopped");
        } else {
            Self::push_control(state, visible);
        }
    }
}

/// One binding's polling registration; releases on drop.
pub struct PollHandle {
    scheduler: Arc<PollScheduler>,
    key: String,
    id: u64,
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.scheduler.unregister(&self.key, self.id);
    }
}
