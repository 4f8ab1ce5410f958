//! Fixed-capacity FIFO queue using crossbeam channels.

use super::{QueueError, QueueResult, Rejected, TaskQueue};
use crate::core::Context;
use crossbeam_channel::{self as channel, select, Receiver, Select, SendError, Sender};
use parking_lot::RwLock;

/// A fixed-capacity FIFO queue backed by a crossbeam channel.
///
/// This is the default queue of a [`WorkerPool`](crate::WorkerPool).
/// Waits are implemented with `select!` over the channel, the context's
/// cancellation channel and its deadline, so no thread ever sleeps holding
/// a lock.
///
/// Closing drops the queue's sender: items already buffered can still be
/// received, after which `get` reports [`QueueError::Closed`]. A producer
/// already blocked in `put` holds its own clone of the sender, so its item
/// can still land after `close`.
///
/// # Example
///
/// ```rust
/// use rust_dynamic_pool::queue::{ChannelQueue, TaskQueue};
/// use rust_dynamic_pool::Context;
///
/// let queue = ChannelQueue::new(8);
/// let ctx = Context::background();
/// queue.put(&ctx, 42).unwrap();
/// assert_eq!(queue.get(&ctx), Ok(42));
/// ```
pub struct ChannelQueue<T> {
    sender: RwLock<Option<Sender<T>>>,
    receiver: Receiver<T>,
    capacity: usize,
}

impl<T> ChannelQueue<T> {
    /// Creates a new queue holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be greater than 0");
        let (sender, receiver) = channel::bounded(capacity);
        Self {
            sender: RwLock::new(Some(sender)),
            receiver,
            capacity,
        }
    }
}

impl<T: Send> TaskQueue<T> for ChannelQueue<T> {
    fn offer(&self, ctx: &Context, item: T) -> Result<(), Rejected<T>> {
        if let Some(err) = ctx.err() {
            return Err(Rejected::new(err.into(), item));
        }
        // Clone out of the lock so close() never waits on a blocked producer.
        let sender = match self.sender.read().clone() {
            Some(sender) => sender,
            None => return Err(Rejected::new(QueueError::Closed, item)),
        };
        let deadline = ctx.deadline_channel();

        // `Select` rather than `select!` so the item is only moved when the
        // send operation is the one chosen.
        let mut sel = Select::new();
        let send_op = sel.send(&sender);
        let done_op = sel.recv(ctx.done());
        let deadline_op = sel.recv(&deadline);

        let oper = sel.select();
        let index = oper.index();
        if index == send_op {
            oper.send(&sender, item)
                .map_err(|SendError(item)| Rejected::new(QueueError::Closed, item))
        } else if index == done_op {
            let _ = oper.recv(ctx.done());
            Err(Rejected::new(QueueError::Cancelled, item))
        } else {
            debug_assert_eq!(index, deadline_op);
            let _ = oper.recv(&deadline);
            Err(Rejected::new(QueueError::DeadlineExceeded, item))
        }
    }

    fn get(&self, ctx: &Context) -> QueueResult<T> {
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }
        let deadline = ctx.deadline_channel();

        select! {
            recv(self.receiver) -> msg => msg.map_err(|_| QueueError::Closed),
            recv(ctx.done()) -> _ => Err(QueueError::Cancelled),
            recv(deadline) -> _ => Err(QueueError::DeadlineExceeded),
        }
    }

    fn len(&self) -> usize {
        self.receiver.len()
    }

    fn close(&self) {
        self.sender.write().take();
    }

    fn is_closed(&self) -> bool {
        self.sender.read().is_none()
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.capacity)
    }
}

impl<T> std::fmt::Debug for ChannelQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelQueue")
            .field("len", &self.receiver.len())
            .field("capacity", &self.capacity)
            .field("closed", &self.sender.read().is_none())
            .finish()
    }
}
