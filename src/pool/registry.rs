//! Slot registry of live workers
//!
//! Each slot maps an index to the worker's cancellation context and thread
//! handle. Scale-down picks live slots and cancels their contexts directly.
//! The registry has its own lock, separate from the scaling decision state,
//! and the worker count is only changed while that lock is held.

use crate::core::{CancellationReason, Context};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

struct Slot {
    ctx: Context,
    handle: Option<JoinHandle<()>>,
    /// Cancelled by scale-down or stop and already subtracted from the count
    retired: bool,
}

#[derive(Default)]
struct Inner {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    exited: Vec<JoinHandle<()>>,
}

impl Inner {
    fn vacant_slot(&mut self) -> usize {
        match self.free.pop() {
            Some(id) => id,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        }
    }

    fn remove(&mut self, id: usize) -> Option<Slot> {
        let mut slot = self.slots.get_mut(id)?.take()?;
        if let Some(handle) = slot.handle.take() {
            self.exited.push(handle);
        }
        self.free.push(id);
        Some(slot)
    }
}

/// Why a spawn batch stopped early
#[derive(Debug)]
pub(crate) struct SpawnFailure {
    pub(crate) worker_id: usize,
    pub(crate) spawned: usize,
    pub(crate) source: io::Error,
}

pub(crate) struct WorkerRegistry {
    inner: Mutex<Inner>,
    count: AtomicUsize,
    alive: AtomicUsize,
}

impl WorkerRegistry {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            count: AtomicUsize::new(0),
            alive: AtomicUsize::new(0),
        }
    }

    /// Workers counted towards the pool size
    pub(crate) fn worker_count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Threads that have been spawned and not yet finished
    pub(crate) fn live_threads(&self) -> usize {
        self.alive.load(Ordering::Acquire)
    }

    /// Occupied slots, including retired workers still finishing a task
    pub(crate) fn registered(&self) -> usize {
        self.inner.lock().slots.iter().filter(|s| s.is_some()).count()
    }

    /// Called by a worker thread right before it returns
    pub(crate) fn thread_finished(&self) {
        self.alive.fetch_sub(1, Ordering::AcqRel);
    }

    /// Spawns up to `n` workers without exceeding `max`
    ///
    /// `spawn` receives the slot id and the worker's context (a child of
    /// `parent`). The lock is held across the spawn so a new thread cannot
    /// release its slot before it is registered.
    pub(crate) fn spawn<F>(
        &self,
        n: usize,
        max: usize,
        parent: &Context,
        mut spawn: F,
    ) -> Result<usize, SpawnFailure>
    where
        F: FnMut(usize, Context) -> io::Result<JoinHandle<()>>,
    {
        let mut inner = self.inner.lock();
        let room = max.saturating_sub(self.count.load(Ordering::Acquire));
        let mut spawned = 0;

        for _ in 0..n.min(room) {
            let id = inner.vacant_slot();
            let ctx = parent.with_cancel();
            // Counted before the thread starts so a failed spawn is balanced below
            self.alive.fetch_add(1, Ordering::AcqRel);
            match spawn(id, ctx.clone()) {
                Ok(handle) => {
                    inner.slots[id] = Some(Slot {
                        ctx,
                        handle: Some(handle),
                        retired: false,
                    });
                    self.count.fetch_add(1, Ordering::AcqRel);
                    spawned += 1;
                }
                Err(source) => {
                    self.alive.fetch_sub(1, Ordering::AcqRel);
                    inner.free.push(id);
                    return Err(SpawnFailure {
                        worker_id: id,
                        spawned,
                        source,
                    });
                }
            }
        }
        Ok(spawned)
    }

    /// Removes a worker that is exiting for any reason
    pub(crate) fn release(&self, id: usize) {
        let mut inner = self.inner.lock();
        if let Some(slot) = inner.remove(id) {
            if !slot.retired {
                self.count.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }

    /// Removes an idle worker if the pool stays at or above `min` without it
    ///
    /// A worker that was already retired may always leave.
    pub(crate) fn release_if_idle(&self, id: usize, min: usize) -> bool {
        let mut inner = self.inner.lock();
        let retired = match inner.slots.get(id) {
            Some(Some(slot)) => slot.retired,
            _ => return true,
        };
        if !retired && self.count.load(Ordering::Acquire) <= min {
            return false;
        }
        inner.remove(id);
        if !retired {
            self.count.fetch_sub(1, Ordering::AcqRel);
        }
        true
    }

    /// Cancels up to `n` live workers, never going below `floor`
    ///
    /// Retired workers finish their current task and then exit; they stop
    /// counting towards the pool size immediately.
    pub(crate) fn retire(&self, n: usize, floor: usize) -> usize {
        let victims: Vec<Context> = {
            let mut inner = self.inner.lock();
            let surplus = self.count.load(Ordering::Acquire).saturating_sub(floor);
            // Highest slots first, keeping low ids stable
            let victims: Vec<Context> = inner
                .slots
                .iter_mut()
                .rev()
                .flatten()
                .filter(|slot| !slot.retired)
                .take(n.min(surplus))
                .map(|slot| {
                    slot.retired = true;
                    slot.ctx.clone()
                })
                .collect();
            self.count.fetch_sub(victims.len(), Ordering::AcqRel);
            victims
        };
        // Outside the lock: cancel callbacks may take queue locks
        for ctx in &victims {
            ctx.cancel_with_reason(CancellationReason::ScaleDown);
        }
        victims.len()
    }

    /// Cancels every registered worker; returns how many were cancelled
    pub(crate) fn cancel_all(&self) -> usize {
        let contexts: Vec<Context> = {
            let mut inner = self.inner.lock();
            let mut contexts = Vec::new();
            for slot in inner.slots.iter_mut().flatten() {
                if !slot.retired {
                    slot.retired = true;
                    self.count.fetch_sub(1, Ordering::AcqRel);
                }
                contexts.push(slot.ctx.clone());
            }
            contexts
        };
        for ctx in &contexts {
            ctx.cancel_with_reason(CancellationReason::Shutdown);
        }
        contexts.len()
    }

    /// Takes every thread handle, live or exited, for joining
    pub(crate) fn drain_handles(&self) -> Vec<(usize, JoinHandle<()>)> {
        let mut inner = self.inner.lock();
        let mut handles: Vec<_> = inner
            .slots
            .iter_mut()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_mut()?.handle.take().map(|h| (id, h)))
            .collect();
        handles.extend(inner.exited.drain(..).map(|h| (usize::MAX, h)));
        handles
    }

    /// Drops slots left behind by threads that are gone
    pub(crate) fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.slots.clear();
        inner.free.clear();
        inner.exited.clear();
        self.count.store(0, Ordering::Release);
    }

    /// Joins exited threads that have already finished
    pub(crate) fn reap(&self) -> usize {
        let finished: Vec<JoinHandle<()>> = {
            let mut inner = self.inner.lock();
            let (done, pending): (Vec<_>, Vec<_>) =
                inner.exited.drain(..).partition(JoinHandle::is_finished);
            inner.exited = pending;
            done
        };
        let reaped = finished.len();
        for handle in finished {
            if handle.join().is_err() {
                log::error!("worker thread panicked outside task execution");
            }
        }
        reaped
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("count", &self.worker_count())
            .field("alive", &self.live_threads())
            .finish_non_exhaustive()
    }
}
