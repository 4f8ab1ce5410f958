//! Queue abstractions for pluggable task queue implementations.
//!
//! This module provides the [`TaskQueue`] trait that abstracts FIFO queue
//! behavior, so that [`WorkerPool`] can run on either built-in
//! implementation or a custom one.
//!
//! # Built-in Implementations
//!
//! - [`ChannelQueue`]: fixed-capacity queue backed by a crossbeam channel (default)
//! - [`BoundedQueue`]: mutex and condition-variable queue, also usable
//!   standalone as a backpressure buffer
//!
//! # Outcomes
//!
//! Every blocking operation takes a [`Context`] and ends in exactly one of:
//!
//! - success
//! - [`QueueError::Cancelled`]: the context was cancelled
//! - [`QueueError::DeadlineExceeded`]: the context deadline passed
//! - [`QueueError::Closed`]: the queue was closed (and, for `get`, drained)
//!
//! # Example
//!
//! ```rust
//! use rust_dynamic_pool::queue::{BoundedQueue, QueueError, TaskQueue};
//! use rust_dynamic_pool::Context;
//! use std::time::Duration;
//!
//! let queue = BoundedQueue::new(1);
//! let ctx = Context::background();
//! queue.put(&ctx, "first").unwrap();
//!
//! // Full: a short deadline turns the wait into an error
//! let short = ctx.with_timeout(Duration::from_millis(10));
//! assert_eq!(queue.put(&short, "second"), Err(QueueError::DeadlineExceeded));
//!
//! assert_eq!(queue.get(&ctx), Ok("first"));
//! ```
//!
//! [`WorkerPool`]: crate::pool::WorkerPool

mod bounded;
mod channel;

pub use bounded::BoundedQueue;
pub use channel::ChannelQueue;

use crate::core::{Context, ContextError};

/// Default capacity of the queue a pool creates when none is supplied
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Result type for queue operations.
pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Errors that can occur during queue operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// Queue is closed
    #[error("queue is closed")]
    Closed,
    /// The context governing the operation was cancelled
    #[error("queue operation cancelled")]
    Cancelled,
    /// The context deadline passed before the operation could complete
    #[error("queue operation deadline exceeded")]
    DeadlineExceeded,
}

/// An item a queue refused, handed back to the producer with the reason
#[derive(Debug, PartialEq, Eq)]
pub struct Rejected<T> {
    error: QueueError,
    item: T,
}

impl<T> Rejected<T> {
    /// Pairs a refused item with the reason
    pub fn new(error: QueueError, item: T) -> Self {
        Self { error, item }
    }

    /// Why the item was refused
    pub fn error(&self) -> QueueError {
        self.error
    }

    /// Takes the item back
    pub fn into_item(self) -> T {
        self.item
    }
}

impl From<ContextError> for QueueError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => QueueError::Cancelled,
            ContextError::DeadlineExceeded => QueueError::DeadlineExceeded,
        }
    }
}

/// A FIFO queue shared between producers and worker threads.
///
/// Implementations must be safe for concurrent producers and consumers and
/// must deliver items in the order they were put.
pub trait TaskQueue<T: Send>: Send + Sync {
    /// Adds an item, blocking while the queue is full.
    ///
    /// # Errors
    ///
    /// - [`QueueError::Closed`] if the queue has been closed
    /// - [`QueueError::Cancelled`] / [`QueueError::DeadlineExceeded`] if
    ///   `ctx` ends before space becomes available
    fn put(&self, ctx: &Context, item: T) -> QueueResult<()> {
        self.offer(ctx, item).map_err(|rejected| rejected.error())
    }

    /// Like [`put`](Self::put), but a refused item is handed back.
    ///
    /// # Errors
    ///
    /// Returns the item together with the [`QueueError`] `put` would report.
    fn offer(&self, ctx: &Context, item: T) -> std::result::Result<(), Rejected<T>>;

    /// Removes the oldest item, blocking while the queue is empty.
    ///
    /// # Errors
    ///
    /// - [`QueueError::Closed`] if the queue has been closed and is empty
    /// - [`QueueError::Cancelled`] / [`QueueError::DeadlineExceeded`] if
    ///   `ctx` ends before an item arrives
    fn get(&self, ctx: &Context) -> QueueResult<T>;

    /// Returns the current number of queued items.
    fn len(&self) -> usize;

    /// Returns `true` if the queue is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes the queue; later puts fail and gets drain what is left.
    ///
    /// A put already blocked when the queue closes may still complete,
    /// depending on the implementation.
    fn close(&self);

    /// Returns `true` if the queue has been closed.
    fn is_closed(&self) -> bool;

    /// Maximum number of queued items, if bounded.
    fn capacity(&self) -> Option<usize>;
}
