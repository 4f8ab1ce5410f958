//! Free list of recycled task envelopes
//!
//! Checkout pops a reset envelope (or allocates a fresh one when the free
//! list is empty); release resets the envelope and pushes it back. Envelopes
//! are moved in and out by value, so each one has exactly one owner at a time.

use crate::core::error::{PoolError, Result};
use crate::core::task::Task;
use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default number of idle envelopes kept for reuse
pub const DEFAULT_TASK_POOL_CAPACITY: usize = 1024;

/// Object pool for [`Task`] envelopes
pub struct TaskPool<P> {
    free: ArrayQueue<Task<P>>,
    next_id: AtomicU64,
    allocated: AtomicU64,
}

impl<P> TaskPool<P> {
    /// Creates a pool that keeps at most `capacity` idle envelopes
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "task pool capacity must be greater than 0");
        Self {
            free: ArrayQueue::new(capacity),
            next_id: AtomicU64::new(1),
            allocated: AtomicU64::new(0),
        }
    }

    /// Takes an empty envelope out of the pool
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::TaskPool`] if a recycled envelope still carries
    /// state from its previous use. Release always resets envelopes, so this
    /// indicates a bug rather than a runtime condition.
    pub fn checkout(&self) -> Result<Task<P>> {
        match self.free.pop() {
            Some(task) if task.is_reset() => Ok(task),
            Some(task) => Err(PoolError::task_pool(format!(
                "recycled task {} was not reset",
                task.id()
            ))),
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                Ok(Task::empty(self.next_id.fetch_add(1, Ordering::Relaxed)))
            }
        }
    }

    /// Resets an envelope and returns it to the pool
    ///
    /// The envelope is dropped if the pool is already full.
    pub fn release(&self, mut task: Task<P>) {
        task.reset();
        let _ = self.free.push(task);
    }

    /// Number of idle envelopes ready for checkout
    pub fn idle(&self) -> usize {
        self.free.len()
    }

    /// Total envelopes ever allocated by this pool
    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }
}

impl<P> Default for TaskPool<P> {
    fn default() -> Self {
        Self::new(DEFAULT_TASK_POOL_CAPACITY)
    }
}

impl<P> std::fmt::Debug for TaskPool<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPool")
            .field("idle", &self.idle())
            .field("allocated", &self.allocated())
            .finish()
    }
}
