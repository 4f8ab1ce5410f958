//! Self-scaling worker pool

use super::config::{PoolConfig, ScalingPolicy};
use super::registry::WorkerRegistry;
use super::scaler::{Autoscaler, LoadSample, ScaleDecision};
use super::worker::{self, PoolStats, PoolStatsSnapshot};
use crate::core::{
    CancellationReason, Context, PoolError, Result, Scaler, Task, TaskHandler, TaskLogger,
    TaskPool, DEFAULT_TASK_POOL_CAPACITY,
};
use crate::metrics::PoolMetrics;
use crate::queue::{ChannelQueue, TaskQueue};
use crossbeam_channel::select;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// State shared by the pool handle, its workers and the scaler thread
pub(crate) struct Shared<P: Send + 'static> {
    pub(crate) name: Arc<str>,
    pub(crate) queue: Arc<dyn TaskQueue<Task<P>>>,
    handler: RwLock<Arc<dyn TaskHandler<P>>>,
    scaler: RwLock<Option<Arc<dyn Scaler>>>,
    pub(crate) tasks: TaskPool<P>,
    pub(crate) registry: WorkerRegistry,
    pub(crate) autoscaler: Autoscaler,
    pub(crate) metrics: PoolMetrics,
    pub(crate) stats: PoolStats,
    pub(crate) idle_timeout: Duration,
    min_workers: AtomicUsize,
    max_workers: AtomicUsize,
    context: RwLock<Option<Context>>,
    running: AtomicBool,
}

impl<P: Send + 'static> Shared<P> {
    pub(crate) fn handler(&self) -> Arc<dyn TaskHandler<P>> {
        Arc::clone(&self.handler.read())
    }

    pub(crate) fn min_workers(&self) -> usize {
        self.min_workers.load(Ordering::Acquire)
    }

    fn max_workers(&self) -> usize {
        self.max_workers.load(Ordering::Acquire)
    }

    pub(crate) fn context(&self) -> Option<Context> {
        self.context.read().clone()
    }

    /// Spawns up to `n` workers under the pool context, never exceeding the maximum
    fn spawn_workers(self: &Arc<Self>, n: usize) -> Result<usize> {
        let ctx = match self.context() {
            Some(ctx) => ctx,
            None => return Ok(0),
        };

        self.registry
            .spawn(n, self.max_workers(), &ctx, |id, worker_ctx| {
                let shared = Arc::clone(self);
                thread::Builder::new()
                    .name(format!("{}-worker-{}", self.name, id))
                    .spawn(move || worker::run(id, worker_ctx, &shared))
            })
            .map_err(|failure| {
                log::error!(
                    "[{}] failed to spawn worker {} after {} succeeded: {}",
                    self.name,
                    failure.worker_id,
                    failure.spawned,
                    failure.source
                );
                PoolError::spawn_with_source(
                    failure.worker_id,
                    "failed to spawn worker thread",
                    failure.source,
                )
            })
    }

    /// One pass of the control loop
    fn scale_tick(self: &Arc<Self>, now: Instant) {
        self.registry.reap();

        let current = self.registry.worker_count();
        let queue_len = self.queue.len();
        self.metrics.workers(current);
        self.metrics.queue_depth(queue_len);

        let sample = LoadSample {
            queue_len,
            current,
            min: self.min_workers(),
            max: self.max_workers(),
            requested: self
                .scaler
                .read()
                .as_ref()
                .map(|scaler| scaler.required_workers()),
        };

        match self.autoscaler.evaluate(now, &sample) {
            ScaleDecision::Hold(reason) => {
                log::trace!("[{}] holding at {} workers: {:?}", self.name, current, reason);
            }
            ScaleDecision::Up(n) => match self.spawn_workers(n) {
                Ok(0) => {}
                Ok(spawned) => {
                    log::info!(
                        "[{}] scaled up {} -> {} workers (queue {}, estimate {:.2})",
                        self.name,
                        current,
                        current + spawned,
                        queue_len,
                        self.autoscaler.smoothed_estimate().unwrap_or_default()
                    );
                    self.stats.increment_scale_ups();
                    self.metrics.scaled_up();
                    self.autoscaler.mark_scaled(now);
                }
                Err(e) => log::error!("[{}] scale up failed: {}", self.name, e),
            },
            ScaleDecision::Down(n) => {
                let retired = self.registry.retire(n, sample.min);
                if retired > 0 {
                    log::info!(
                        "[{}] scaled down {} -> {} workers (queue {}, estimate {:.2})",
                        self.name,
                        current,
                        current - retired,
                        queue_len,
                        self.autoscaler.smoothed_estimate().unwrap_or_default()
                    );
                    self.stats.increment_scale_downs();
                    self.metrics.scaled_down();
                    self.autoscaler.mark_scaled(now);
                }
            }
        }
    }
}

fn scaler_loop<P: Send + 'static>(shared: &Arc<Shared<P>>, ctx: &Context) {
    let ticker = crossbeam_channel::tick(shared.autoscaler.policy().tick_interval);
    loop {
        select! {
            recv(ctx.done()) -> _ => break,
            recv(ticker) -> _ => shared.scale_tick(Instant::now()),
        }
    }
    log::debug!("[{}] scaler stopped", shared.name);
}

/// A pool of worker threads that grows and shrinks with load
///
/// Workers pull [`Task`]s from a pluggable [`TaskQueue`] and run them
/// through the configured [`TaskHandler`]. A scaler thread estimates the
/// number of workers needed to drain the backlog within the drain target
/// and adjusts the pool under the configured [`ScalingPolicy`]. Workers
/// above the minimum also leave on their own after the idle timeout.
///
/// # Restart Support
///
/// The pool can be started again after [`stop`](Self::stop). Tasks still
/// queued at stop are kept and run after the restart.
///
/// # Example
///
/// ```rust
/// use rust_dynamic_pool::prelude::*;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// # fn main() -> Result<()> {
/// let done = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&done);
///
/// let pool = WorkerPool::new(
///     PoolConfig::new("example", 2, 4).with_task_handler(move |task: &mut Task<u64>| -> Result<()> {
///         if let Some(n) = task.take_payload() {
///             counter.fetch_add(n as usize, Ordering::Relaxed);
///         }
///         Ok(())
///     }),
/// )?;
///
/// pool.start()?;
/// assert_eq!(pool.worker_count(), 2);
/// for n in 1..=3 {
///     pool.submit(n)?;
/// }
/// # while done.load(Ordering::Relaxed) < 6 { std::thread::yield_now(); }
/// pool.stop()?;
/// assert_eq!(done.load(Ordering::Relaxed), 6);
/// assert_eq!(pool.worker_count(), 0);
/// # Ok(())
/// # }
/// ```
pub struct WorkerPool<P: Send + 'static> {
    shared: Arc<Shared<P>>,
    /// Serializes start, stop and bound changes; holds the scaler thread
    lifecycle: Mutex<Option<JoinHandle<()>>>,
}

impl<P: Send + 'static> WorkerPool<P> {
    /// Create a pool from `config`
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidConfig`] if no task handler is configured.
    pub fn new(mut config: PoolConfig<P>) -> Result<Self> {
        config.validate()?;
        let handler = config
            .take_handler()
            .ok_or_else(|| PoolError::invalid_config("task_handler", "A task handler is required"))?;
        let queue = config
            .take_queue()
            .unwrap_or_else(|| Arc::new(ChannelQueue::new(config.queue_capacity)));
        let name: Arc<str> = Arc::from(config.name.as_str());

        let shared = Shared {
            metrics: PoolMetrics::new(config.metrics(), Arc::clone(&name)),
            name,
            queue,
            handler: RwLock::new(handler),
            scaler: RwLock::new(config.take_scaler()),
            tasks: TaskPool::new(DEFAULT_TASK_POOL_CAPACITY),
            registry: WorkerRegistry::new(),
            autoscaler: Autoscaler::new(config.scaling_policy.clone(), config.drain_target),
            stats: PoolStats::new(),
            idle_timeout: config.idle_timeout,
            min_workers: AtomicUsize::new(config.min_workers),
            max_workers: AtomicUsize::new(config.max_workers),
            context: RwLock::new(None),
            running: AtomicBool::new(false),
        };

        Ok(Self {
            shared: Arc::new(shared),
            lifecycle: Mutex::new(None),
        })
    }

    /// Start the pool
    ///
    /// Spawns `min_workers` workers and the scaler thread.
    ///
    /// # Errors
    ///
    /// - [`PoolError::AlreadyRunning`] if the pool is running
    /// - [`PoolError::SpawnError`] if a thread could not be spawned; the
    ///   pool is left stopped
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PoolError::already_running(
                &*self.shared.name,
                self.worker_count(),
            ));
        }

        let ctx = Context::background();
        *self.shared.context.write() = Some(ctx.clone());
        self.shared.autoscaler.reset();

        let started = self.shared.spawn_workers(self.shared.min_workers()).and_then(|_| {
            let shared = Arc::clone(&self.shared);
            thread::Builder::new()
                .name(format!("{}-scaler", self.shared.name))
                .spawn(move || scaler_loop(&shared, &ctx))
                .map_err(|e| PoolError::other(format!("failed to spawn scaler thread: {}", e)))
        });

        match started {
            Ok(handle) => {
                *lifecycle = Some(handle);
                log::info!(
                    "[{}] started with {} workers (min {}, max {})",
                    self.shared.name,
                    self.worker_count(),
                    self.min_workers(),
                    self.max_workers()
                );
                Ok(())
            }
            Err(e) => {
                self.shutdown(&mut lifecycle)?;
                Err(e)
            }
        }
    }

    /// Stop the pool
    ///
    /// Cancels the pool context, signals every worker to exit and blocks
    /// until all of them have. Tasks being executed run to completion;
    /// tasks still queued stay in the queue. Calling `stop` on a stopped
    /// pool does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::JoinError`] if a worker thread panicked outside
    /// task execution. All other threads are still joined.
    pub fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if !self.shared.running.load(Ordering::Acquire) {
            return Ok(());
        }
        self.shutdown(&mut lifecycle)
    }

    fn shutdown(&self, scaler: &mut Option<JoinHandle<()>>) -> Result<()> {
        self.shared.running.store(false, Ordering::Release);
        let ctx = self.shared.context.write().take();
        if let Some(ctx) = ctx {
            ctx.cancel_with_reason(CancellationReason::Shutdown);
        }

        let mut first_error = None;
        if let Some(handle) = scaler.take() {
            if handle.join().is_err() {
                first_error = Some(PoolError::other("scaler thread panicked"));
            }
        }

        let signalled = self.shared.registry.cancel_all();
        let mut joined = 0;
        for (id, handle) in self.shared.registry.drain_handles() {
            joined += 1;
            if handle.join().is_err() && first_error.is_none() {
                first_error = Some(PoolError::join(id, "worker thread panicked"));
            }
        }
        self.shared.registry.clear();
        self.shared.metrics.workers(0);

        log::info!(
            "[{}] stopped: signalled {} workers, joined {} threads",
            self.shared.name,
            signalled,
            joined
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Submit a payload, blocking while the queue is full
    ///
    /// # Errors
    ///
    /// - [`PoolError::NotRunning`] if the pool is stopped
    /// - [`PoolError::Queue`] if the queue is closed or the pool stops
    ///   while waiting for space
    pub fn submit(&self, payload: P) -> Result<()> {
        self.submit_with(payload, None)
    }

    /// Submit a payload, waiting at most `timeout` for queue space
    ///
    /// # Errors
    ///
    /// As [`submit`](Self::submit), plus `PoolError::Queue(QueueError::DeadlineExceeded)`
    /// if no space became available in time.
    pub fn submit_timeout(&self, payload: P, timeout: Duration) -> Result<()> {
        self.submit_with(payload, Some(timeout))
    }

    fn submit_with(&self, payload: P, timeout: Option<Duration>) -> Result<()> {
        let ctx = match self.shared.context() {
            Some(ctx) if self.shared.running.load(Ordering::Acquire) => ctx,
            _ => return Err(PoolError::not_running(&*self.shared.name)),
        };

        let mut task = self.shared.tasks.checkout()?;
        let logger = TaskLogger::new(Arc::clone(&self.shared.name), task.id());
        let put_ctx = match timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx.clone(),
        };
        task.populate(ctx, logger, payload);

        match self.shared.queue.offer(&put_ctx, task) {
            Ok(()) => {
                self.shared.stats.increment_submitted();
                Ok(())
            }
            Err(rejected) => {
                let error = rejected.error();
                self.shared.tasks.release(rejected.into_item());
                Err(error.into())
            }
        }
    }

    /// Workers currently counted towards the pool size
    pub fn worker_count(&self) -> usize {
        self.shared.registry.worker_count()
    }

    /// Lower worker bound
    pub fn min_workers(&self) -> usize {
        self.shared.min_workers()
    }

    /// Upper worker bound
    pub fn max_workers(&self) -> usize {
        self.shared.max_workers()
    }

    /// Change the lower worker bound
    ///
    /// When running, missing workers are spawned right away.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidConfig`] if `min` is 0 or above the
    /// current maximum.
    pub fn set_min_workers(&self, min: usize) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        let max = self.max_workers();
        if min == 0 || min > max {
            return Err(PoolError::invalid_config(
                "min_workers",
                format!("must be between 1 and max_workers ({}), got {}", max, min),
            ));
        }
        self.shared.min_workers.store(min, Ordering::Release);

        let current = self.worker_count();
        if self.is_running() && current < min {
            let spawned = self.shared.spawn_workers(min - current)?;
            log::info!(
                "[{}] min_workers raised to {}: spawned {} workers",
                self.shared.name,
                min,
                spawned
            );
        }
        Ok(())
    }

    /// Change the upper worker bound
    ///
    /// When running, surplus workers are retired right away; they finish
    /// their current task first.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidConfig`] if `max` is below the current minimum.
    pub fn set_max_workers(&self, max: usize) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        let min = self.min_workers();
        if max < min {
            return Err(PoolError::invalid_config(
                "max_workers",
                format!("must be at least min_workers ({}), got {}", min, max),
            ));
        }
        self.shared.max_workers.store(max, Ordering::Release);

        let current = self.worker_count();
        if self.is_running() && current > max {
            let retired = self.shared.registry.retire(current - max, max);
            log::info!(
                "[{}] max_workers lowered to {}: retired {} workers",
                self.shared.name,
                max,
                retired
            );
        }
        Ok(())
    }

    /// Replace the task handler; tasks already running keep the old one
    pub fn set_task_handler<H>(&self, handler: H)
    where
        H: TaskHandler<P> + 'static,
    {
        *self.shared.handler.write() = Arc::new(handler);
    }

    /// Install or remove the required-workers override
    pub fn set_scaler(&self, scaler: Option<Arc<dyn Scaler>>) {
        *self.shared.scaler.write() = scaler;
    }

    /// Pool name
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Check if the pool is running
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Tasks waiting in the queue
    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    /// Counters since the pool was created
    pub fn stats(&self) -> PoolStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// The control loop tunables in effect
    pub fn scaling_policy(&self) -> &ScalingPolicy {
        self.shared.autoscaler.policy()
    }

    /// Smoothed estimate of required workers, once the controller has ticked
    pub fn smoothed_estimate(&self) -> Option<f64> {
        self.shared.autoscaler.smoothed_estimate()
    }

    /// Moving average of task execution time
    pub fn average_task_duration(&self) -> Duration {
        self.shared.autoscaler.average_task_duration()
    }

    /// Worker threads that have not finished yet, including retired ones
    pub fn live_threads(&self) -> usize {
        self.shared.registry.live_threads()
    }

    /// Registry slots in use, including retired workers still finishing a task
    pub fn registered_workers(&self) -> usize {
        self.shared.registry.registered()
    }
}

impl<P: Send + 'static> std::fmt::Debug for WorkerPool<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.shared.name)
            .field("running", &self.is_running())
            .field("workers", &self.worker_count())
            .field("min_workers", &self.min_workers())
            .field("max_workers", &self.max_workers())
            .field("queue_len", &self.queue_len())
            .finish()
    }
}

impl<P: Send + 'static> Drop for WorkerPool<P> {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(e) = self.stop() {
                log::error!(
                    "[{}] failed to stop worker pool during drop: {}",
                    self.shared.name,
                    e
                );
            }
        }
    }
}
