//! Page/view visibility signal.
//!
//! The UI layer feeds its visibility state in through [`VisibilitySignal::
//! set_visible`]; the poll scheduler watches it to suspend timers whose
//! bindings opted out of hidden refreshes. With no signal wired up the
//! default is always-visible.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Clone)]
pub struct VisibilitySignal {
    tx: Arc<watch::Sender<bool>>,
}

impl VisibilitySignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_visible(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn set_visible(&self, visible: bool) {
        self.tx.send_if_modified(|current| {
            if *current != visible {
                *current = visible;
                true
            } else {
                false
            }
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for VisibilitySignal {
    fn default() -> Self {
        Self::new()
    }
}
