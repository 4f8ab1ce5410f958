//! Bounded FIFO queue built on a mutex and two condition variables.

use super::{QueueError, QueueResult, Rejected, TaskQueue};
use crate::core::{CancellationCallbackGuard, Context};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::Arc;

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> Shared<T> {
    fn wake_all(&self) {
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

/// A bounded blocking FIFO queue.
///
/// Producers wait on `not_full`, consumers on `not_empty`. Condition
/// variable waits release the mutex while parked. A context deadline bounds
/// the wait directly; cancellation is delivered by a callback registered on
/// the context's token which takes the mutex and wakes every waiter, so a
/// cancelled context interrupts a wait without ever being observed while
/// the lock is held.
///
/// Usable on its own wherever a blocking buffer with backpressure is needed.
///
/// # Example
///
/// ```rust
/// use rust_dynamic_pool::queue::{BoundedQueue, TaskQueue};
/// use rust_dynamic_pool::Context;
///
/// let queue = BoundedQueue::new(2);
/// let ctx = Context::background();
/// queue.put(&ctx, 'a').unwrap();
/// queue.put(&ctx, 'b').unwrap();
/// assert_eq!(queue.len(), 2);
/// assert_eq!(queue.get(&ctx), Ok('a'));
/// ```
pub struct BoundedQueue<T> {
    shared: Arc<Shared<T>>,
    capacity: usize,
}

impl<T: Send + 'static> BoundedQueue<T> {
    /// Creates a new bounded queue with the specified capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be greater than 0");
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    items: VecDeque::with_capacity(capacity),
                    closed: false,
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
            }),
            capacity,
        }
    }

    /// Returns the maximum capacity of this queue.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Must be called before the state lock is taken: the callback runs
    /// inline if the token is already cancelled and takes the lock itself.
    fn wake_on_cancel(&self, ctx: &Context) -> CancellationCallbackGuard {
        let shared = Arc::clone(&self.shared);
        ctx.token().on_cancel(move || {
            // Taking the lock orders the wake-up after any in-progress
            // check-then-wait, so no waiter misses it.
            let _state = shared.state.lock();
            shared.wake_all();
        })
    }

    fn wait(condvar: &Condvar, state: &mut MutexGuard<'_, State<T>>, ctx: &Context) {
        match ctx.deadline() {
            Some(deadline) => {
                condvar.wait_until(state, deadline);
            }
            None => condvar.wait(state),
        }
    }
}

impl<T: Send + 'static> TaskQueue<T> for BoundedQueue<T> {
    fn offer(&self, ctx: &Context, item: T) -> Result<(), Rejected<T>> {
        if let Some(err) = ctx.err() {
            return Err(Rejected::new(err.into(), item));
        }
        let _wake = self.wake_on_cancel(ctx);
        let mut state = self.shared.state.lock();

        loop {
            if state.closed {
                return Err(Rejected::new(QueueError::Closed, item));
            }
            if let Some(err) = ctx.err() {
                return Err(Rejected::new(err.into(), item));
            }
            if state.items.len() < self.capacity {
                state.items.push_back(item);
                drop(state);
                self.shared.not_empty.notify_one();
                return Ok(());
            }
            Self::wait(&self.shared.not_full, &mut state, ctx);
        }
    }

    fn get(&self, ctx: &Context) -> QueueResult<T> {
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }
        let _wake = self.wake_on_cancel(ctx);
        let mut state = self.shared.state.lock();

        loop {
            if let Some(err) = ctx.err() {
                return Err(err.into());
            }
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.shared.not_full.notify_one();
                return Ok(item);
            }
            if state.closed {
                return Err(QueueError::Closed);
            }
            Self::wait(&self.shared.not_empty, &mut state, ctx);
        }
    }

    fn len(&self) -> usize {
        self.shared.state.lock().items.len()
    }

    fn close(&self) {
        let mut state = self.shared.state.lock();
        state.closed = true;
        self.shared.wake_all();
    }

    fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.capacity)
    }
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("BoundedQueue")
            .field("len", &state.items.len())
            .field("capacity", &self.capacity)
            .field("closed", &state.closed)
            .finish()
    }
}
