//! Error types for the worker pool

use crate::queue::QueueError;

/// Result type for worker pool operations
pub type Result<T> = std::result::Result<T, PoolError>;

/// Errors that can occur in the worker pool
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PoolError {
    /// Invalid configuration with parameter
    #[error("Invalid configuration for '{parameter}': {message}")]
    InvalidConfig {
        /// Configuration parameter name
        parameter: String,
        /// Error message
        message: String,
    },

    /// Worker pool is already running
    #[error("Worker pool '{pool_name}' is already running with {worker_count} workers")]
    AlreadyRunning {
        /// Name of the pool
        pool_name: String,
        /// Number of live workers
        worker_count: usize,
    },

    /// Worker pool is not running
    #[error("Worker pool '{pool_name}' is not running")]
    NotRunning {
        /// Name of the pool
        pool_name: String,
    },

    /// Failed to spawn a worker thread
    #[error("Failed to spawn worker #{worker_id}: {message}")]
    SpawnError {
        /// Registry slot of the worker that failed to spawn
        worker_id: usize,
        /// Error message
        message: String,
        /// Source IO error
        #[source]
        source: Option<std::io::Error>,
    },

    /// Failed to join a worker thread
    #[error("Failed to join worker #{worker_id}: {message}")]
    JoinError {
        /// Registry slot of the worker
        worker_id: usize,
        /// Error message
        message: String,
    },

    /// Task execution failed
    #[error("Task execution failed (task_id: {task_id}): {message}")]
    ExecutionError {
        /// ID of the failed task
        task_id: u64,
        /// Error message
        message: String,
    },

    /// The queue rejected a put or get
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// A recycled task came back out of the task pool in an unexpected state
    #[error("Task pool returned an unusable object: {message}")]
    TaskPool {
        /// Error message
        message: String,
    },

    /// General error
    #[error("{0}")]
    Other(String),
}

impl PoolError {
    /// Create an invalid config error
    pub fn invalid_config(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        PoolError::InvalidConfig {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create an already running error
    pub fn already_running(pool_name: impl Into<String>, worker_count: usize) -> Self {
        PoolError::AlreadyRunning {
            pool_name: pool_name.into(),
            worker_count,
        }
    }

    /// Create a not running error
    pub fn not_running(pool_name: impl Into<String>) -> Self {
        PoolError::NotRunning {
            pool_name: pool_name.into(),
        }
    }

    /// Create a spawn error with source
    pub fn spawn_with_source(
        worker_id: usize,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        PoolError::SpawnError {
            worker_id,
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a join error
    pub fn join(worker_id: usize, message: impl Into<String>) -> Self {
        PoolError::JoinError {
            worker_id,
            message: message.into(),
        }
    }

    /// Create an execution error
    pub fn execution(task_id: u64, message: impl Into<String>) -> Self {
        PoolError::ExecutionError {
            task_id,
            message: message.into(),
        }
    }

    /// Create a task pool error
    pub fn task_pool(message: impl Into<String>) -> Self {
        PoolError::TaskPool {
            message: message.into(),
        }
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        PoolError::Other(msg.into())
    }

    /// Returns true if the error came from a cancelled or expired context
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            PoolError::Queue(QueueError::Cancelled) | PoolError::Queue(QueueError::DeadlineExceeded)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = PoolError::already_running("ingest", 8);
        assert!(matches!(err, PoolError::AlreadyRunning { .. }));

        let err = PoolError::invalid_config("task_handler", "missing");
        assert!(matches!(err, PoolError::InvalidConfig { .. }));

        let err = PoolError::execution(42, "boom");
        assert!(matches!(err, PoolError::ExecutionError { task_id: 42, .. }));
    }

    #[test]
    fn test_error_display() {
        let err = PoolError::already_running("ingest", 4);
        assert_eq!(
            err.to_string(),
            "Worker pool 'ingest' is already running with 4 workers"
        );

        let err = PoolError::not_running("ingest");
        assert_eq!(err.to_string(), "Worker pool 'ingest' is not running");

        let err = PoolError::from(QueueError::Closed);
        assert_eq!(err.to_string(), "queue is closed");
    }

    #[test]
    fn test_spawn_error_with_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::WouldBlock, "no threads left");
        let err = PoolError::spawn_with_source(5, "Cannot create thread", io_err);

        assert!(matches!(err, PoolError::SpawnError { .. }));
        assert!(err.to_string().contains("worker #5"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_is_cancellation() {
        assert!(PoolError::from(QueueError::Cancelled).is_cancellation());
        assert!(PoolError::from(QueueError::DeadlineExceeded).is_cancellation());
        assert!(!PoolError::from(QueueError::Closed).is_cancellation());
        assert!(!PoolError::other("x").is_cancellation());
    }
}
