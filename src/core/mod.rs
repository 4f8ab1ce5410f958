//! Core types: errors, cancellation, contexts and task envelopes

pub mod cancellation;
pub mod context;
pub mod error;
pub mod task;
pub mod task_pool;

pub use cancellation::{CancellationCallbackGuard, CancellationReason, CancellationToken};
pub use context::{Context, ContextError};
pub use error::{PoolError, Result};
pub use task::{Scaler, Task, TaskHandler, TaskLogger};
pub use task_pool::{TaskPool, DEFAULT_TASK_POOL_CAPACITY};
