//! Convenient re-exports for common types and traits

pub use crate::core::{
    CancellationReason, CancellationToken, Context, PoolError, Result, Scaler, Task, TaskHandler,
    TaskLogger,
};
pub use crate::metrics::{MetricsSink, NoopMetrics};
pub use crate::pool::{PoolConfig, PoolStatsSnapshot, ScalingPolicy, WorkerPool};
pub use crate::queue::{BoundedQueue, ChannelQueue, QueueError, TaskQueue};
