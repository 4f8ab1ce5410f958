//! # Rust Dynamic Pool
//!
//! A self-scaling worker pool: worker threads pull tasks from a pluggable
//! queue and the pool grows and shrinks with load within configured bounds.
//!
//! ## Features
//!
//! - **Worker Pool**: OS-thread workers with `min`/`max` bounds and an idle timeout
//! - **Autoscaling**: a control loop sizing the pool from queue depth and average
//!   task duration, with smoothing, hysteresis and cooldown
//! - **Pluggable Queues**: a crossbeam channel queue and a condition-variable
//!   bounded queue behind one [`TaskQueue`] trait
//! - **Contexts**: hierarchical cancellation with deadlines for every blocking wait
//! - **Task Recycling**: task envelopes are reused through a lock-free free list
//! - **Metrics**: counters, histograms and gauges reported to any [`MetricsSink`]
//! - **Graceful Shutdown**: `stop` waits for every worker thread to exit
//!
//! ## Quick Start
//!
//! ```rust
//! use rust_dynamic_pool::prelude::*;
//!
//! # fn main() -> Result<()> {
//! let config = PoolConfig::new("quick-start", 2, 8).with_task_handler(
//!     |task: &mut Task<String>| -> Result<()> {
//!         if let (Some(logger), Some(line)) = (task.logger(), task.payload()) {
//!             logger.info(format_args!("processing {}", line));
//!         }
//!         Ok(())
//!     },
//! );
//!
//! let pool = WorkerPool::new(config)?;
//! pool.start()?;
//!
//! for i in 0..10 {
//!     pool.submit(format!("line {}", i))?;
//! }
//!
//! pool.stop()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Tuning the Control Loop
//!
//! ```rust
//! use rust_dynamic_pool::prelude::*;
//! use std::time::Duration;
//!
//! # fn main() -> Result<()> {
//! let policy = ScalingPolicy {
//!     tick_interval: Duration::from_millis(250),
//!     cooldown: Duration::from_secs(1),
//!     max_scale_down: 2,
//!     ..Default::default()
//! };
//!
//! let pool = WorkerPool::new(
//!     PoolConfig::new("tuned", 1, 16)
//!         .with_drain_target(Duration::from_millis(200))
//!         .with_idle_timeout(Duration::from_secs(5))
//!         .with_scaling_policy(policy)
//!         .with_task_handler(|_: &mut Task<u32>| -> Result<()> { Ok(()) }),
//! )?;
//! # pool.start()?;
//! # pool.stop()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Metrics
//!
//! ```rust
//! # #[cfg(feature = "metrics")]
//! # fn main() -> rust_dynamic_pool::Result<()> {
//! use rust_dynamic_pool::metrics::{InMemoryMetrics, TASKS_PROCESSED};
//! use rust_dynamic_pool::prelude::*;
//! use std::sync::Arc;
//!
//! let sink = Arc::new(InMemoryMetrics::new());
//! let pool = WorkerPool::new(
//!     PoolConfig::new("metered", 1, 2)
//!         .with_metrics(sink.clone())
//!         .with_task_handler(|_: &mut Task<()>| -> Result<()> { Ok(()) }),
//! )?;
//! pool.start()?;
//! pool.submit(())?;
//! # while sink.counter(TASKS_PROCESSED, "metered") == 0 { std::thread::yield_now(); }
//! pool.stop()?;
//!
//! assert_eq!(sink.counter(TASKS_PROCESSED, "metered"), 1);
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "metrics"))]
//! # fn main() {}
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod core;
pub mod metrics;
pub mod pool;
pub mod prelude;
pub mod queue;

pub use crate::core::{
    CancellationReason, CancellationToken, Context, ContextError, PoolError, Result, Scaler, Task,
    TaskHandler, TaskLogger, TaskPool,
};
pub use crate::metrics::{MetricsSink, NoopMetrics, PoolMetrics};
pub use crate::pool::{PoolConfig, PoolStats, PoolStatsSnapshot, ScalingPolicy, WorkerPool};
pub use crate::queue::{BoundedQueue, ChannelQueue, QueueError, Rejected, TaskQueue};
