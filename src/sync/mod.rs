//! One-shot completion signals.
//!
//! A [`Latch`] starts closed and opens exactly once. Any number of tasks can
//! wait on it, before or after it opens; waiters that arrive late return
//! immediately.

use std::sync::Arc;

use tokio::sync::watch;

/// A one-shot, many-waiter completion signal.
#[derive(Clone)]
pub struct Latch {
    state: Arc<watch::Sender<bool>>,
}

impl Latch {
    /// Creates a closed latch.
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state: Arc::new(state),
        }
    }

    /// Opens the latch, waking every waiter.
    ///
    /// Returns `true` only for the call that actually opened it.
    pub fn open(&self) -> bool {
        self.state.send_if_modified(|open| {
            if *open {
                false
            } else {
                *open = true;
                true
            }
        })
    }

    /// Returns `true` once the latch has been opened.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.state.borrow()
    }

    /// Waits until the latch is open.
    pub async fn wait(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this cannot observe a close.
        let _ = rx.wait_for(|open| *open).await;
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Latch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Latch").field("open", &self.is_open()).finish()
    }
}
