//! Worker pool, its configuration and the autoscaling controller

pub mod config;
mod registry;
pub mod scaler;
pub mod worker;
pub mod worker_pool;

pub use config::{PoolConfig, ScalingPolicy};
pub use scaler::{Autoscaler, HoldReason, LoadSample, ScaleDecision};
pub use worker::{PoolStats, PoolStatsSnapshot};
pub use worker_pool::WorkerPool;
