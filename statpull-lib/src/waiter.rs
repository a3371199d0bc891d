//! Facility to wait until every piece of queued work has been marked done.
//!
//! A [`DrainBarrier`] hands out one [`WorkGuard`] per enqueued item. The item
//! counts as outstanding for as long as its guard is alive; dropping the guard
//! marks it done. [`DrainBarrier::wait`] returns once no guards are left.
//!
//! Tying completion to `Drop` means an item is marked done on every exit
//! path, including handler panics and task cancellation, so a waiter can
//! never hang on an item that was silently lost.
//!
//! Unlike a one-shot wait group, the barrier is reusable: new guards can be
//! issued after a wait returned, and several tasks may wait at once.

use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    outstanding: AtomicUsize,
    drained: Notify,
}

/// Counts outstanding work and lets tasks wait for it to drain
#[derive(Debug, Clone, Default)]
pub struct DrainBarrier {
    inner: Arc<Inner>,
}

/// RAII marker for one outstanding item of a [`DrainBarrier`].
///
/// The existence of a value of this type represents unfinished work.
#[derive(Debug)]
pub struct WorkGuard {
    inner: Arc<Inner>,
}

impl DrainBarrier {
    /// Create a barrier with no outstanding work
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one more outstanding item
    #[must_use]
    pub fn guard(&self) -> WorkGuard {
        self.inner.outstanding.fetch_add(1, Ordering::SeqCst);
        WorkGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Number of items not yet marked done
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::SeqCst)
    }

    /// Wait, asynchronously, until every issued [`WorkGuard`] has been dropped
    pub async fn wait(&self) {
        loop {
            let mut notified = pin!(self.inner.drained.notified());
            // Register before checking, so a drain between the check and the
            // await cannot be missed.
            notified.as_mut().enable();
            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl WorkGuard {
    /// Mark the item as done. Equivalent to dropping the guard.
    pub fn done(self) {}
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        if self.inner.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.drained.notify_waiters();
        }
    }
}
