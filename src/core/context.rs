//! Cancellable contexts with optional deadlines
//!
//! A [`Context`] bundles a [`CancellationToken`] with an optional deadline.
//! Every blocking queue operation takes a context and returns as soon as the
//! context is cancelled or its deadline passes.
//!
//! The pool owns one governing context; each worker derives a child from it,
//! and each queue wait derives a child with the idle timeout as deadline.
//! Cancelling the governing context therefore unblocks everything below it.
//!
//! # Example
//!
//! ```rust
//! use rust_dynamic_pool::{Context, ContextError};
//! use std::time::Duration;
//!
//! let root = Context::background();
//! let child = root.with_timeout(Duration::from_secs(30));
//! assert!(child.err().is_none());
//!
//! root.cancel();
//! assert_eq!(child.err(), Some(ContextError::Cancelled));
//! ```

use crate::core::cancellation::{CancellationReason, CancellationToken};
use crossbeam_channel::Receiver;
use std::time::{Duration, Instant};

/// Why a context is done
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// The context (or one of its ancestors) was cancelled
    #[error("context cancelled")]
    Cancelled,
    /// The context deadline passed
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// A cancellation scope with an optional deadline
#[derive(Clone, Debug)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A root context that is never cancelled unless [`cancel`](Self::cancel) is called
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Derives a child context that can be cancelled on its own
    pub fn with_cancel(&self) -> Self {
        Self {
            token: self.token.child(),
            deadline: self.deadline,
        }
    }

    /// Derives a child context that expires after `timeout`
    ///
    /// The child keeps the parent's deadline if that one is earlier.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derives a child context that expires at `deadline`
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        Self {
            token: self.token.child(),
            deadline: Some(deadline),
        }
    }

    /// Cancels this context and every context derived from it
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancels this context, recording why
    pub fn cancel_with_reason(&self, reason: CancellationReason) {
        self.token.cancel_with_reason(reason);
    }

    /// The underlying cancellation token
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// The deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when there is no deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Returns why the context is done, or `None` while it is still live
    ///
    /// Cancellation takes precedence over an expired deadline.
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            Some(ContextError::Cancelled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(ContextError::DeadlineExceeded)
        } else {
            None
        }
    }

    /// True once the context is cancelled or past its deadline
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Disconnects when the context is cancelled
    pub(crate) fn done(&self) -> &Receiver<()> {
        self.token.done()
    }

    /// Fires once at the deadline; never fires without one
    pub(crate) fn deadline_channel(&self) -> Receiver<Instant> {
        match self.deadline {
            Some(deadline) => crossbeam_channel::at(deadline),
            None => crossbeam_channel::never(),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}
