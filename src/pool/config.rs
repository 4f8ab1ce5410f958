//! Pool configuration and autoscaling policy

use crate::core::{PoolError, Result, Scaler, Task, TaskHandler};
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::queue::{TaskQueue, DEFAULT_QUEUE_CAPACITY};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Minimum worker count used when 0 is requested
pub const DEFAULT_MIN_WORKERS: usize = 1;
/// Maximum worker count used when 0 is requested
pub const DEFAULT_MAX_WORKERS: usize = 10;
/// How long an idle worker waits for work before it may exit
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
/// Desired time to drain the current backlog
pub const DEFAULT_DRAIN_TARGET: Duration = Duration::from_millis(500);

/// Tunables of the autoscaling control loop
///
/// Every field has a sensible default; [`normalized`](Self::normalized)
/// replaces out-of-range values with those defaults. The struct derives
/// `serde` traits so applications can keep it in their own config files.
///
/// # Example
///
/// ```rust
/// use rust_dynamic_pool::ScalingPolicy;
/// use std::time::Duration;
///
/// let policy = ScalingPolicy {
///     cooldown: Duration::from_millis(500),
///     smoothing_factor: 0.5,
///     ..Default::default()
/// };
/// assert_eq!(policy.hysteresis_threshold, 2);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingPolicy {
    /// Period of the control loop. Default: 1s
    pub tick_interval: Duration,
    /// Minimum time between two scaling actions. Default: 3s
    pub cooldown: Duration,
    /// Weight of the newest raw estimate in the smoothed estimate. Default: 0.2
    pub smoothing_factor: f64,
    /// Minimum distance between smoothed estimate and worker count before
    /// the loop acts. Default: 2
    pub hysteresis_threshold: usize,
    /// Most workers retired in a single tick. Default: 4
    pub max_scale_down: usize,
    /// Weight of the newest sample in the average task duration. Default: 0.2
    pub duration_alpha: f64,
    /// Average task duration assumed before any task has completed. Default: 100ms
    pub default_task_duration: Duration,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            cooldown: Duration::from_secs(3),
            smoothing_factor: 0.2,
            hysteresis_threshold: 2,
            max_scale_down: 4,
            duration_alpha: 0.2,
            default_task_duration: Duration::from_millis(100),
        }
    }
}

impl ScalingPolicy {
    /// Replaces values the control loop cannot work with by their defaults
    #[must_use]
    pub fn normalized(self) -> Self {
        let defaults = Self::default();
        let weight = |w: f64, fallback: f64| if w > 0.0 && w <= 1.0 { w } else { fallback };
        Self {
            tick_interval: if self.tick_interval.is_zero() {
                defaults.tick_interval
            } else {
                self.tick_interval
            },
            cooldown: self.cooldown,
            smoothing_factor: weight(self.smoothing_factor, defaults.smoothing_factor),
            hysteresis_threshold: self.hysteresis_threshold,
            max_scale_down: if self.max_scale_down == 0 {
                defaults.max_scale_down
            } else {
                self.max_scale_down
            },
            duration_alpha: weight(self.duration_alpha, defaults.duration_alpha),
            default_task_duration: if self.default_task_duration.is_zero() {
                defaults.default_task_duration
            } else {
                self.default_task_duration
            },
        }
    }
}

/// Configuration for a [`WorkerPool`](crate::WorkerPool)
///
/// Bounds are normalized by [`new`](Self::new); the task handler is the only
/// mandatory setting and its absence is reported by [`validate`](Self::validate)
/// and by `WorkerPool::new`.
///
/// # Example
///
/// ```rust
/// use rust_dynamic_pool::prelude::*;
/// use std::time::Duration;
///
/// let config = PoolConfig::new("ingest", 2, 8)
///     .with_idle_timeout(Duration::from_secs(10))
///     .with_task_handler(|task: &mut Task<String>| -> Result<()> {
///         if let Some(line) = task.take_payload() {
///             println!("{}", line);
///         }
///         Ok(())
///     });
/// assert!(config.validate().is_ok());
/// ```
pub struct PoolConfig<P: Send + 'static> {
    /// Pool name, used in logs, metrics and thread names
    pub name: String,
    /// Lower worker bound
    pub min_workers: usize,
    /// Upper worker bound
    pub max_workers: usize,
    /// How long an idle worker waits before it may exit
    pub idle_timeout: Duration,
    /// Desired time to drain the backlog, used to size the pool
    pub drain_target: Duration,
    /// Capacity of the default queue (ignored with a custom queue)
    pub queue_capacity: usize,
    /// Control loop tunables
    pub scaling_policy: ScalingPolicy,
    queue: Option<Arc<dyn TaskQueue<Task<P>>>>,
    handler: Option<Arc<dyn TaskHandler<P>>>,
    scaler: Option<Arc<dyn Scaler>>,
    metrics: Arc<dyn MetricsSink>,
}

impl<P: Send + 'static> PoolConfig<P> {
    /// Creates a configuration with normalized bounds
    ///
    /// `min_workers == 0` becomes 1 and `max_workers == 0` becomes 10. If
    /// `max_workers < min_workers`, `max_workers` is set to `min_workers * 4`.
    #[must_use]
    pub fn new(name: impl Into<String>, min_workers: usize, max_workers: usize) -> Self {
        let min_workers = if min_workers == 0 {
            DEFAULT_MIN_WORKERS
        } else {
            min_workers
        };
        let mut max_workers = if max_workers == 0 {
            DEFAULT_MAX_WORKERS
        } else {
            max_workers
        };
        if max_workers < min_workers {
            max_workers = min_workers.saturating_mul(4);
        }

        Self {
            name: name.into(),
            min_workers,
            max_workers,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            drain_target: DEFAULT_DRAIN_TARGET,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            scaling_policy: ScalingPolicy::default(),
            queue: None,
            handler: None,
            scaler: None,
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Set the idle timeout (zero restores the 30s default)
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = if timeout.is_zero() {
            DEFAULT_IDLE_TIMEOUT
        } else {
            timeout
        };
        self
    }

    /// Set the drain target (zero restores the 500ms default)
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_drain_target(mut self, target: Duration) -> Self {
        self.drain_target = if target.is_zero() {
            DEFAULT_DRAIN_TARGET
        } else {
            target
        };
        self
    }

    /// Use a custom queue implementation instead of the default [`ChannelQueue`](crate::queue::ChannelQueue)
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_queue(mut self, queue: Arc<dyn TaskQueue<Task<P>>>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Set the capacity of the default queue (zero restores 1000)
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = if capacity == 0 {
            DEFAULT_QUEUE_CAPACITY
        } else {
            capacity
        };
        self
    }

    /// Set the handler that executes every task
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_task_handler<H>(mut self, handler: H) -> Self
    where
        H: TaskHandler<P> + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Override the queue-based estimate of required workers
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_scaler<S>(mut self, scaler: S) -> Self
    where
        S: Scaler + 'static,
    {
        self.scaler = Some(Arc::new(scaler));
        self
    }

    /// Report metrics to `sink`
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = sink;
        self
    }

    /// Replace the control loop tunables
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_scaling_policy(mut self, policy: ScalingPolicy) -> Self {
        self.scaling_policy = policy.normalized();
        self
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidConfig`] if no task handler is set.
    pub fn validate(&self) -> Result<()> {
        if self.handler.is_none() {
            return Err(PoolError::invalid_config(
                "task_handler",
                "A task handler is required",
            ));
        }
        Ok(())
    }

    pub(crate) fn take_queue(&mut self) -> Option<Arc<dyn TaskQueue<Task<P>>>> {
        self.queue.take()
    }

    pub(crate) fn take_handler(&mut self) -> Option<Arc<dyn TaskHandler<P>>> {
        self.handler.take()
    }

    pub(crate) fn take_scaler(&mut self) -> Option<Arc<dyn Scaler>> {
        self.scaler.take()
    }

    pub(crate) fn metrics(&self) -> Arc<dyn MetricsSink> {
        Arc::clone(&self.metrics)
    }
}

impl<P: Send + 'static> Clone for PoolConfig<P> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            min_workers: self.min_workers,
            max_workers: self.max_workers,
            idle_timeout: self.idle_timeout,
            drain_target: self.drain_target,
            queue_capacity: self.queue_capacity,
            scaling_policy: self.scaling_policy.clone(),
            queue: self.queue.clone(),
            handler: self.handler.clone(),
            scaler: self.scaler.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<P: Send + 'static> std::fmt::Debug for PoolConfig<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolConfig")
            .field("name", &self.name)
            .field("min_workers", &self.min_workers)
            .field("max_workers", &self.max_workers)
            .field("idle_timeout", &self.idle_timeout)
            .field("drain_target", &self.drain_target)
            .field("queue_capacity", &self.queue_capacity)
            .field("scaling_policy", &self.scaling_policy)
            .field("queue", &self.queue.as_ref().map(|_| "<custom queue>"))
            .field("handler", &self.handler.as_ref().map(|h| h.name().to_string()))
            .field("scaler", &self.scaler.as_ref().map(|_| "<scaler>"))
            .finish()
    }
}
