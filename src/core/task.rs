//! Task envelope and the strategy traits the pool is parameterized by

use crate::core::context::Context;
use crate::core::error::Result;
use std::fmt;
use std::sync::Arc;

/// Per-task logger handle
///
/// Emits `log` records tagged with the pool name and task id so that output
/// from concurrently running tasks can be told apart.
#[derive(Clone, Debug)]
pub struct TaskLogger {
    pool: Arc<str>,
    task_id: u64,
}

impl TaskLogger {
    /// Creates a logger for one task of the given pool
    pub fn new(pool: Arc<str>, task_id: u64) -> Self {
        Self { pool, task_id }
    }

    /// Name of the pool the task belongs to
    pub fn pool(&self) -> &str {
        &self.pool
    }

    /// Id of the task this logger reports for
    pub fn task_id(&self) -> u64 {
        self.task_id
    }

    /// Emits a record at the given level
    pub fn log(&self, level: log::Level, args: fmt::Arguments<'_>) {
        log::log!(level, "[{}#{}] {}", self.pool, self.task_id, args);
    }

    /// Emits a debug record
    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(log::Level::Debug, args);
    }

    /// Emits an info record
    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(log::Level::Info, args);
    }

    /// Emits a warning record
    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(log::Level::Warn, args);
    }

    /// Emits an error record
    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log(log::Level::Error, args);
    }
}

/// One unit of submitted work: the governing context, a logger and the payload
///
/// Tasks are recycled through a [`TaskPool`](crate::TaskPool). Ownership
/// moves from the submitter to the queue to exactly one worker and back to
/// the pool, so a task is never reachable from two workers at once.
pub struct Task<P> {
    id: u64,
    context: Option<Context>,
    logger: Option<TaskLogger>,
    payload: Option<P>,
}

impl<P> Task<P> {
    pub(crate) fn empty(id: u64) -> Self {
        Self {
            id,
            context: None,
            logger: None,
            payload: None,
        }
    }

    /// Builds a populated task outside of a pool, mostly for driving queues directly
    pub fn new(id: u64, context: Context, logger: TaskLogger, payload: P) -> Self {
        Self {
            id,
            context: Some(context),
            logger: Some(logger),
            payload: Some(payload),
        }
    }

    pub(crate) fn populate(&mut self, context: Context, logger: TaskLogger, payload: P) {
        self.context = Some(context);
        self.logger = Some(logger);
        self.payload = Some(payload);
    }

    /// Moves the task under `context`, e.g. the current run of a restarted pool
    pub(crate) fn rebind(&mut self, context: Context) {
        self.context = Some(context);
    }

    /// Clears context, logger and payload before the task returns to the pool
    pub(crate) fn reset(&mut self) {
        self.context = None;
        self.logger = None;
        self.payload = None;
    }

    pub(crate) fn is_reset(&self) -> bool {
        self.context.is_none() && self.logger.is_none() && self.payload.is_none()
    }

    /// Pool-unique id of this envelope
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The context the task was submitted under
    pub fn context(&self) -> Option<&Context> {
        self.context.as_ref()
    }

    /// Logger tagged with this task's pool and id
    pub fn logger(&self) -> Option<&TaskLogger> {
        self.logger.as_ref()
    }

    /// The submitted payload
    pub fn payload(&self) -> Option<&P> {
        self.payload.as_ref()
    }

    /// Takes the payload out, leaving the task empty
    pub fn take_payload(&mut self) -> Option<P> {
        self.payload.take()
    }

    /// True if the submitting context has been cancelled (e.g. the pool is stopping)
    pub fn is_cancelled(&self) -> bool {
        self.context.as_ref().is_some_and(Context::is_done)
    }
}

impl<P> fmt::Debug for Task<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("has_context", &self.context.is_some())
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

/// Executes tasks on behalf of the pool
///
/// Errors are recorded by the pool and never retried. Closures of the form
/// `Fn(&mut Task<P>) -> Result<()>` implement this trait.
pub trait TaskHandler<P>: Send + Sync {
    /// Execute one task
    ///
    /// # Errors
    ///
    /// Returns an error if the task failed; the pool logs and counts it.
    fn execute(&self, task: &mut Task<P>) -> Result<()>;

    /// Name used in logs
    fn name(&self) -> &str {
        "TaskHandler"
    }
}

impl<P, F> TaskHandler<P> for F
where
    F: Fn(&mut Task<P>) -> Result<()> + Send + Sync,
{
    fn execute(&self, task: &mut Task<P>) -> Result<()> {
        self(task)
    }
}

/// Overrides the autoscaler's queue-based estimate of required workers
///
/// Closures of the form `Fn() -> usize` implement this trait.
pub trait Scaler: Send + Sync {
    /// Number of workers the pool should run right now
    fn required_workers(&self) -> usize;
}

impl<F> Scaler for F
where
    F: Fn() -> usize + Send + Sync,
{
    fn required_workers(&self) -> usize {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::PoolError;

    fn logger(id: u64) -> TaskLogger {
        TaskLogger::new(Arc::from("test-pool"), id)
    }

    #[test]
    fn test_task_accessors() {
        let task = Task::new(7, Context::background(), logger(7), "payload".to_string());

        assert_eq!(task.id(), 7);
        assert_eq!(task.payload().map(String::as_str), Some("payload"));
        assert_eq!(task.logger().map(TaskLogger::task_id), Some(7));
        assert_eq!(task.logger().map(TaskLogger::pool), Some("test-pool"));
        assert!(task.context().is_some());
        assert!(!task.is_cancelled());
    }

    #[test]
    fn test_task_reset_clears_fields() {
        let mut task = Task::new(1, Context::background(), logger(1), 5u32);
        assert!(!task.is_reset());

        task.reset();
        assert!(task.is_reset());
        assert!(task.payload().is_none());
        assert!(task.context().is_none());
        assert_eq!(task.id(), 1);
    }

    #[test]
    fn test_task_observes_cancelled_context() {
        let ctx = Context::background();
        let task = Task::new(1, ctx.clone(), logger(1), ());
        ctx.cancel();
        assert!(task.is_cancelled());
    }

    #[test]
    fn test_rebind_replaces_cancelled_context() {
        let old_run = Context::background();
        let mut task = Task::new(3, old_run.clone(), logger(3), ());
        old_run.cancel();
        assert!(task.is_cancelled());

        task.rebind(Context::background());
        assert!(!task.is_cancelled());
        assert_eq!(task.payload(), Some(&()));
    }

    #[test]
    fn test_closure_handler() {
        let handler = |task: &mut Task<u32>| match task.take_payload() {
            Some(n) if n > 0 => Ok(()),
            _ => Err(PoolError::execution(task.id(), "empty payload")),
        };

        let mut ok = Task::new(1, Context::background(), logger(1), 3u32);
        assert!(handler.execute(&mut ok).is_ok());
        assert!(ok.payload().is_none());

        let mut bad = Task::new(2, Context::background(), logger(2), 0u32);
        assert!(matches!(
            handler.execute(&mut bad),
            Err(PoolError::ExecutionError { task_id: 2, .. })
        ));
        assert_eq!(TaskHandler::<u32>::name(&handler), "TaskHandler");
    }

    #[test]
    fn test_closure_scaler() {
        let scaler = || 6usize;
        assert_eq!(scaler.required_workers(), 6);
    }
}
