//! Cancellation tokens
//!
//! A [`CancellationToken`] is the signal half of a [`Context`](crate::Context).
//! Tokens form a tree: cancelling a token cancels every child derived from it,
//! which is how stopping a pool reaches every worker and every blocked queue
//! operation.
//!
//! Waiters can observe cancellation in three ways:
//!
//! - polling [`is_cancelled()`](CancellationToken::is_cancelled)
//! - selecting on [`done()`](CancellationToken::done), a channel that
//!   disconnects when the token is cancelled
//! - registering a callback with [`on_cancel()`](CancellationToken::on_cancel)
//!
//! # Example
//!
//! ```rust
//! use rust_dynamic_pool::CancellationToken;
//!
//! let parent = CancellationToken::new();
//! let child1 = parent.child();
//! let child2 = parent.child();
//!
//! parent.cancel();
//!
//! assert!(parent.is_cancelled());
//! assert!(child1.is_cancelled());
//! assert!(child2.is_cancelled());
//! ```

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

static NEXT_CALLBACK_ID: AtomicUsize = AtomicUsize::new(1);

fn next_callback_id() -> usize {
    NEXT_CALLBACK_ID.fetch_add(1, Ordering::Relaxed)
}

/// Reason for cancellation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CancellationReason {
    /// Explicitly cancelled via `cancel()`
    Manual,
    /// Cancelled because the parent token was cancelled
    ParentCancelled,
    /// The owning pool is stopping
    Shutdown,
    /// The worker was retired by the autoscaler or a bound change
    ScaleDown,
    /// Custom cancellation reason
    Custom(String),
}

impl std::fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancellationReason::Manual => write!(f, "manually cancelled"),
            CancellationReason::ParentCancelled => write!(f, "parent was cancelled"),
            CancellationReason::Shutdown => write!(f, "pool shutdown"),
            CancellationReason::ScaleDown => write!(f, "scaled down"),
            CancellationReason::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

struct StoredCallback {
    id: usize,
    callback: Box<dyn FnOnce() + Send + Sync>,
}

struct CancellationTokenInner {
    cancelled: AtomicBool,
    /// Weak so that short-lived children (one per queue wait) do not keep
    /// themselves alive through the parent
    children: RwLock<Vec<Weak<CancellationTokenInner>>>,
    callbacks: RwLock<Vec<StoredCallback>>,
    reason: RwLock<Option<CancellationReason>>,
    /// Dropped on cancel so that `done_rx` disconnects
    done_tx: Mutex<Option<Sender<()>>>,
    done_rx: Receiver<()>,
}

impl CancellationTokenInner {
    fn new() -> Self {
        let (done_tx, done_rx) = crossbeam_channel::bounded(0);
        Self {
            cancelled: AtomicBool::new(false),
            children: RwLock::new(Vec::new()),
            callbacks: RwLock::new(Vec::new()),
            reason: RwLock::new(None),
            done_tx: Mutex::new(Some(done_tx)),
            done_rx,
        }
    }
}

impl std::fmt::Debug for CancellationTokenInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationTokenInner")
            .field("cancelled", &self.cancelled.load(Ordering::Relaxed))
            .field("children_count", &self.children.read().len())
            .field("callbacks_count", &self.callbacks.read().len())
            .field("reason", &*self.reason.read())
            .finish()
    }
}

/// A thread-safe, hierarchical cancellation token
///
/// Cloning a token yields a handle to the same cancellation state.
/// Use [`child()`](Self::child) to derive a token that can be cancelled
/// independently but is also cancelled together with its parent.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<CancellationTokenInner>,
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

impl CancellationToken {
    /// Create a new cancellation token (not cancelled)
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancellationTokenInner::new()),
        }
    }

    /// Creates a child token linked to this parent
    ///
    /// If the parent is already cancelled the child starts cancelled.
    pub fn child(&self) -> Self {
        let child = CancellationToken::new();

        {
            let mut children = self.inner.children.write();
            children.retain(|weak| weak.strong_count() > 0);
            children.push(Arc::downgrade(&child.inner));
        }

        if self.is_cancelled() {
            child.cancel_with_reason(CancellationReason::ParentCancelled);
        }

        child
    }

    /// Cancel this token with the default reason (Manual)
    ///
    /// Idempotent: only the first call has an effect.
    pub fn cancel(&self) {
        self.cancel_with_reason(CancellationReason::Manual);
    }

    /// Cancel this token with a specific reason
    ///
    /// Cancels the token, wakes `done()` selectors, runs registered callbacks
    /// and then cancels all children.
    pub fn cancel_with_reason(&self, reason: CancellationReason) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        *self.inner.reason.write() = Some(reason);
        self.inner.done_tx.lock().take();

        // Run callbacks outside the lock; they may take other locks.
        let callbacks: Vec<_> = self.inner.callbacks.write().drain(..).collect();
        for stored in callbacks {
            (stored.callback)();
        }

        let children: Vec<_> = self
            .inner
            .children
            .read()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for child_inner in children {
            CancellationToken { inner: child_inner }
                .cancel_with_reason(CancellationReason::ParentCancelled);
        }
    }

    /// Check if this token has been cancelled
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Returns the cancellation reason (if cancelled)
    pub fn reason(&self) -> Option<CancellationReason> {
        self.inner.reason.read().clone()
    }

    /// A receiver that never yields a value and disconnects once the token
    /// is cancelled, for use in `select!`
    pub fn done(&self) -> &Receiver<()> {
        &self.inner.done_rx
    }

    /// Registers a callback to run when cancelled
    ///
    /// Returns a guard that unregisters the callback when dropped. If the
    /// token is already cancelled the callback runs immediately.
    ///
    /// # Example
    ///
    /// ```rust
    /// use rust_dynamic_pool::CancellationToken;
    /// use std::sync::atomic::{AtomicBool, Ordering};
    /// use std::sync::Arc;
    ///
    /// let token = CancellationToken::new();
    /// let called = Arc::new(AtomicBool::new(false));
    /// let called_clone = Arc::clone(&called);
    ///
    /// let _guard = token.on_cancel(move || {
    ///     called_clone.store(true, Ordering::SeqCst);
    /// });
    ///
    /// token.cancel();
    /// assert!(called.load(Ordering::SeqCst));
    /// ```
    pub fn on_cancel<F>(&self, callback: F) -> CancellationCallbackGuard
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        let id = next_callback_id();

        // The flag is checked under the callbacks lock so a concurrent
        // cancel either drains this callback or is observed here.
        let run_now = {
            let mut callbacks = self.inner.callbacks.write();
            if self.is_cancelled() {
                Some(callback)
            } else {
                callbacks.push(StoredCallback {
                    id,
                    callback: Box::new(callback),
                });
                None
            }
        };

        if let Some(callback) = run_now {
            callback();
        }

        CancellationCallbackGuard {
            token: Some(self.clone()),
            callback_id: id,
        }
    }

    fn remove_callback(&self, callback_id: usize) {
        self.inner.callbacks.write().retain(|c| c.id != callback_id);
    }

    #[cfg(test)]
    fn children_len(&self) -> usize {
        self.inner.children.read().len()
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that unregisters a callback when dropped
///
/// Returned by [`CancellationToken::on_cancel()`].
pub struct CancellationCallbackGuard {
    token: Option<CancellationToken>,
    callback_id: usize,
}

impl Drop for CancellationCallbackGuard {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            // Once cancelled the callback has already been drained.
            if !token.is_cancelled() {
                token.remove_callback(self.callback_id);
            }
        }
    }
}

impl CancellationCallbackGuard {
    /// Keeps the callback registered after the guard is dropped
    pub fn detach(mut self) {
        self.token = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::TryRecvError;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_cancellation_token_cancel() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert_eq!(token.reason(), None);

        token.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some(CancellationReason::Manual));

        // Idempotent, first reason wins
        token.cancel_with_reason(CancellationReason::Shutdown);
        assert_eq!(token.reason(), Some(CancellationReason::Manual));
    }

    #[test]
    fn test_child_cancelled_with_parent() {
        let parent = CancellationToken::new();
        let child = parent.child();
        let grandchild = child.child();

        parent.cancel_with_reason(CancellationReason::Shutdown);

        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
        assert_eq!(child.reason(), Some(CancellationReason::ParentCancelled));
    }

    #[test]
    fn test_child_cancel_does_not_affect_parent() {
        let parent = CancellationToken::new();
        let child = parent.child();

        child.cancel_with_reason(CancellationReason::ScaleDown);

        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn test_child_of_cancelled_parent_starts_cancelled() {
        let parent = CancellationToken::new();
        parent.cancel();

        let child = parent.child();
        assert!(child.is_cancelled());
        assert_eq!(child.reason(), Some(CancellationReason::ParentCancelled));
    }

    #[test]
    fn test_dead_children_are_pruned() {
        let parent = CancellationToken::new();
        for _ in 0..100 {
            let _short_lived = parent.child();
        }
        let _kept = parent.child();
        assert_eq!(parent.children_len(), 1);
    }

    #[test]
    fn test_done_channel_disconnects_on_cancel() {
        let token = CancellationToken::new();
        assert_eq!(token.done().try_recv(), Err(TryRecvError::Empty));

        token.cancel();
        assert_eq!(token.done().try_recv(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn test_done_wakes_blocked_selector() {
        let token = CancellationToken::new();
        let waiter = token.clone();

        let handle = thread::spawn(move || {
            crossbeam_channel::select! {
                recv(waiter.done()) -> _ => true,
                default(Duration::from_secs(5)) => false,
            }
        });

        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_on_cancel_runs_once() {
        let token = CancellationToken::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        let _guard = token.on_cancel(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        token.cancel();
        token.cancel();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_on_cancel_after_cancel_runs_immediately() {
        let token = CancellationToken::new();
        token.cancel();

        let called = Arc::new(AtomicBool::new(false));
        let called_clone = Arc::clone(&called);
        let _guard = token.on_cancel(move || called_clone.store(true, Ordering::SeqCst));

        assert!(called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_dropped_guard_unregisters_callback() {
        let token = CancellationToken::new();
        let called = Arc::new(AtomicBool::new(false));

        {
            let called_clone = Arc::clone(&called);
            let _guard = token.on_cancel(move || called_clone.store(true, Ordering::SeqCst));
        }

        token.cancel();
        assert!(!called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_detached_callback_survives_guard() {
        let token = CancellationToken::new();
        let called = Arc::new(AtomicBool::new(false));
        let called_clone = Arc::clone(&called);

        token
            .on_cancel(move || called_clone.store(true, Ordering::SeqCst))
            .detach();

        token.cancel();
        assert!(called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_parent_cancel_runs_child_callbacks() {
        let parent = CancellationToken::new();
        let child = parent.child();
        let called = Arc::new(AtomicBool::new(false));
        let called_clone = Arc::clone(&called);

        let _guard = child.on_cancel(move || called_clone.store(true, Ordering::SeqCst));

        parent.cancel();
        assert!(called.load(Ordering::SeqCst));
    }
}
