//! Worker thread loop and pool statistics

use super::worker_pool::Shared;
use crate::core::{Context, Task};
use crate::queue::QueueError;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[cfg(feature = "tracing")]
use tracing::{span, Level};

/// Statistics for a worker pool
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Tasks accepted by `submit`
    pub tasks_submitted: AtomicU64,
    /// Tasks executed, whatever their outcome
    pub tasks_processed: AtomicU64,
    /// Tasks whose handler returned an error
    pub tasks_failed: AtomicU64,
    /// Tasks whose handler panicked
    pub tasks_panicked: AtomicU64,
    /// Scale-up actions taken by the controller
    pub scale_ups: AtomicU64,
    /// Scale-down actions taken by the controller
    pub scale_downs: AtomicU64,
    /// Total time spent executing tasks (microseconds)
    pub total_processing_time_us: AtomicU64,
}

/// Point-in-time copy of [`PoolStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStatsSnapshot {
    /// Tasks accepted by `submit`
    pub tasks_submitted: u64,
    /// Tasks executed, whatever their outcome
    pub tasks_processed: u64,
    /// Tasks whose handler returned an error
    pub tasks_failed: u64,
    /// Tasks whose handler panicked
    pub tasks_panicked: u64,
    /// Scale-up actions taken by the controller
    pub scale_ups: u64,
    /// Scale-down actions taken by the controller
    pub scale_downs: u64,
    /// Total time spent executing tasks (microseconds)
    pub total_processing_time_us: u64,
}

impl PoolStats {
    /// Create new pool statistics
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn increment_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_processed(&self, elapsed_us: u64) {
        self.tasks_processed.fetch_add(1, Ordering::Relaxed);
        self.total_processing_time_us
            .fetch_add(elapsed_us, Ordering::Relaxed);
    }

    pub(crate) fn increment_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_panicked(&self) {
        self.tasks_panicked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_scale_ups(&self) {
        self.scale_ups.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_scale_downs(&self) {
        self.scale_downs.fetch_add(1, Ordering::Relaxed);
    }

    /// Get average processing time per task in microseconds
    pub fn average_processing_time_us(&self) -> f64 {
        let total = self.total_processing_time_us.load(Ordering::Relaxed);
        let count = self.tasks_processed.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    /// Copies every counter
    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_processed: self.tasks_processed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_panicked: self.tasks_panicked.load(Ordering::Relaxed),
            scale_ups: self.scale_ups.load(Ordering::Relaxed),
            scale_downs: self.scale_downs.load(Ordering::Relaxed),
            total_processing_time_us: self.total_processing_time_us.load(Ordering::Relaxed),
        }
    }
}

/// Releases the worker's slot and liveness count however the loop ends
struct ExitGuard<'a, P: Send + 'static> {
    id: usize,
    shared: &'a Shared<P>,
    released: bool,
}

impl<P: Send + 'static> Drop for ExitGuard<'_, P> {
    fn drop(&mut self) {
        if !self.released {
            self.shared.registry.release(self.id);
        }
        self.shared.registry.thread_finished();
    }
}

/// Main worker loop
///
/// Each iteration waits for a task under a child of the worker context
/// whose deadline is the idle timeout:
///
/// - a task is executed and the loop continues
/// - an idle timeout ends the worker only if the pool is above its minimum
/// - cancellation of the worker context or a closed queue ends the worker
pub(crate) fn run<P: Send + 'static>(id: usize, ctx: Context, shared: &Shared<P>) {
    #[cfg(feature = "tracing")]
    let worker_span = span!(Level::DEBUG, "worker", pool = %shared.name, id = id);
    #[cfg(feature = "tracing")]
    let _span_guard = worker_span.enter();

    let mut guard = ExitGuard {
        id,
        shared,
        released: false,
    };
    log::debug!("[{}] worker {} started", shared.name, id);

    loop {
        if ctx.is_done() {
            log::debug!(
                "[{}] worker {} stopping: {}",
                shared.name,
                id,
                ctx.token()
                    .reason()
                    .map_or_else(|| "cancelled".to_string(), |r| r.to_string())
            );
            break;
        }

        let wait = ctx.with_timeout(shared.idle_timeout);
        match shared.queue.get(&wait) {
            Ok(task) => execute(shared, task),
            Err(QueueError::DeadlineExceeded) => {
                if ctx.is_done() {
                    continue;
                }
                if shared.registry.release_if_idle(id, shared.min_workers()) {
                    guard.released = true;
                    log::debug!("[{}] worker {} exiting after idle timeout", shared.name, id);
                    break;
                }
            }
            Err(QueueError::Closed) => {
                log::debug!("[{}] worker {} stopping: queue closed", shared.name, id);
                break;
            }
            Err(QueueError::Cancelled) => continue,
        }
    }
}

/// Execute a single task with panic protection
fn execute<P: Send + 'static>(shared: &Shared<P>, mut task: Task<P>) {
    #[cfg(feature = "tracing")]
    let task_span = span!(Level::DEBUG, "task_execution", task_id = task.id());
    #[cfg(feature = "tracing")]
    let _task_guard = task_span.enter();

    // Tasks queued before a restart still carry the cancelled context of
    // the previous run
    if let Some(ctx) = shared.context() {
        task.rebind(ctx);
    }

    let handler = shared.handler();
    let start = Instant::now();
    let outcome = catch_unwind(AssertUnwindSafe(|| handler.execute(&mut task)));
    let elapsed = start.elapsed();

    shared.metrics.task_completed(elapsed);
    shared.autoscaler.record_duration(elapsed);
    shared.stats.increment_processed(elapsed.as_micros() as u64);

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            log::warn!(
                "[{}] task {} failed after {:?} in {}: {}",
                shared.name,
                task.id(),
                elapsed,
                handler.name(),
                e
            );
            shared.metrics.task_failed();
            shared.stats.increment_failed();
        }
        Err(panic_info) => {
            let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_info.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };
            log::error!(
                "[{}] task {} panicked in {}: {}",
                shared.name,
                task.id(),
                handler.name(),
                panic_msg
            );
            shared.metrics.task_panicked();
            shared.stats.increment_panicked();
        }
    }

    shared.tasks.release(task);
}
