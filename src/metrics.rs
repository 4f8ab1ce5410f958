//! Metrics sink abstraction
//!
//! The pool reports counters, histograms and gauges keyed by metric name and
//! pool name through a [`MetricsSink`] handed to it at construction. Any
//! backend that implements the trait can be plugged in; the crate ships a
//! no-op sink and, with the `metrics` feature, an in-memory sink.

use std::sync::Arc;
use std::time::Duration;

/// Tasks completed, whatever their outcome (counter)
pub const TASKS_PROCESSED: &str = "worker_pool_tasks_processed_total";
/// Tasks whose handler returned an error (counter)
pub const TASK_FAILURES: &str = "worker_pool_task_failures_total";
/// Tasks whose handler panicked (counter)
pub const TASK_PANICS: &str = "worker_pool_task_panics_total";
/// Task execution time in seconds (histogram)
pub const TASK_DURATION_SECONDS: &str = "worker_pool_task_duration_seconds";
/// Current worker count (gauge)
pub const WORKERS: &str = "worker_pool_workers";
/// Current queue depth (gauge)
pub const QUEUE_DEPTH: &str = "worker_pool_queue_depth";
/// Scale-up actions (counter)
pub const SCALE_UPS: &str = "worker_pool_scale_up_total";
/// Scale-down actions (counter)
pub const SCALE_DOWNS: &str = "worker_pool_scale_down_total";

/// Backend receiving pool metrics
///
/// Implementations are called concurrently from every worker thread and
/// must be safe for that.
pub trait MetricsSink: Send + Sync {
    /// Adds `value` to a counter
    fn increment_counter(&self, name: &'static str, pool: &str, value: u64);

    /// Records one observation in a histogram
    fn observe_histogram(&self, name: &'static str, pool: &str, value: f64);

    /// Sets a gauge
    fn set_gauge(&self, name: &'static str, pool: &str, value: f64);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment_counter(&self, _name: &'static str, _pool: &str, _value: u64) {}
    fn observe_histogram(&self, _name: &'static str, _pool: &str, _value: f64) {}
    fn set_gauge(&self, _name: &'static str, _pool: &str, _value: f64) {}
}

/// The metrics handle a pool owns: a sink bound to the pool's name
#[derive(Clone)]
pub struct PoolMetrics {
    sink: Arc<dyn MetricsSink>,
    pool: Arc<str>,
}

impl PoolMetrics {
    /// Binds `sink` to `pool`
    pub fn new(sink: Arc<dyn MetricsSink>, pool: Arc<str>) -> Self {
        Self { sink, pool }
    }

    pub(crate) fn task_completed(&self, elapsed: Duration) {
        self.sink.increment_counter(TASKS_PROCESSED, &self.pool, 1);
        self.sink
            .observe_histogram(TASK_DURATION_SECONDS, &self.pool, elapsed.as_secs_f64());
    }

    pub(crate) fn task_failed(&self) {
        self.sink.increment_counter(TASK_FAILURES, &self.pool, 1);
    }

    pub(crate) fn task_panicked(&self) {
        self.sink.increment_counter(TASK_PANICS, &self.pool, 1);
    }

    pub(crate) fn scaled_up(&self) {
        self.sink.increment_counter(SCALE_UPS, &self.pool, 1);
    }

    pub(crate) fn scaled_down(&self) {
        self.sink.increment_counter(SCALE_DOWNS, &self.pool, 1);
    }

    pub(crate) fn workers(&self, count: usize) {
        self.sink.set_gauge(WORKERS, &self.pool, count as f64);
    }

    pub(crate) fn queue_depth(&self, depth: usize) {
        self.sink.set_gauge(QUEUE_DEPTH, &self.pool, depth as f64);
    }
}

impl std::fmt::Debug for PoolMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolMetrics")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "metrics")]
pub use self::memory::{HistogramSummary, InMemoryMetrics};

#[cfg(feature = "metrics")]
mod memory {
    use super::MetricsSink;
    use dashmap::DashMap;

    type Key = (&'static str, String);

    /// Count, sum and extremes of a histogram
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct HistogramSummary {
        /// Number of observations
        pub count: u64,
        /// Sum of observations
        pub sum: f64,
        /// Smallest observation
        pub min: f64,
        /// Largest observation
        pub max: f64,
    }

    impl HistogramSummary {
        fn first(value: f64) -> Self {
            Self {
                count: 1,
                sum: value,
                min: value,
                max: value,
            }
        }

        fn record(&mut self, value: f64) {
            self.count += 1;
            self.sum += value;
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }

        /// Mean observation
        pub fn mean(&self) -> f64 {
            if self.count > 0 {
                self.sum / self.count as f64
            } else {
                0.0
            }
        }
    }

    /// Keeps every metric in process memory
    ///
    /// Useful for tests and for exposing pool state through an application's
    /// own status endpoint.
    #[derive(Debug, Default)]
    pub struct InMemoryMetrics {
        counters: DashMap<Key, u64>,
        gauges: DashMap<Key, f64>,
        histograms: DashMap<Key, HistogramSummary>,
    }

    impl InMemoryMetrics {
        /// Creates an empty sink
        pub fn new() -> Self {
            Self::default()
        }

        /// Current counter value (0 if never incremented)
        pub fn counter(&self, name: &'static str, pool: &str) -> u64 {
            self.counters
                .get(&(name, pool.to_string()))
                .map(|v| *v)
                .unwrap_or(0)
        }

        /// Last gauge value
        pub fn gauge(&self, name: &'static str, pool: &str) -> Option<f64> {
            self.gauges.get(&(name, pool.to_string())).map(|v| *v)
        }

        /// Histogram summary, if anything was observed
        pub fn histogram(&self, name: &'static str, pool: &str) -> Option<HistogramSummary> {
            self.histograms.get(&(name, pool.to_string())).map(|v| *v)
        }
    }

    impl MetricsSink for InMemoryMetrics {
        fn increment_counter(&self, name: &'static str, pool: &str, value: u64) {
            *self.counters.entry((name, pool.to_string())).or_insert(0) += value;
        }

        fn observe_histogram(&self, name: &'static str, pool: &str, value: f64) {
            self.histograms
                .entry((name, pool.to_string()))
                .and_modify(|h| h.record(value))
                .or_insert_with(|| HistogramSummary::first(value));
        }

        fn set_gauge(&self, name: &'static str, pool: &str, value: f64) {
            self.gauges.insert((name, pool.to_string()), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_accepts_everything() {
        let metrics = PoolMetrics::new(Arc::new(NoopMetrics), Arc::from("noop"));
        metrics.task_completed(Duration::from_millis(5));
        metrics.task_failed();
        metrics.workers(3);
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_in_memory_keys_by_pool() {
        let sink = Arc::new(InMemoryMetrics::new());
        let a = PoolMetrics::new(sink.clone(), Arc::from("a"));
        let b = PoolMetrics::new(sink.clone(), Arc::from("b"));

        a.task_completed(Duration::from_millis(10));
        a.task_completed(Duration::from_millis(30));
        b.task_failed();
        a.workers(4);
        a.queue_depth(9);

        assert_eq!(sink.counter(TASKS_PROCESSED, "a"), 2);
        assert_eq!(sink.counter(TASKS_PROCESSED, "b"), 0);
        assert_eq!(sink.counter(TASK_FAILURES, "b"), 1);
        assert_eq!(sink.gauge(WORKERS, "a"), Some(4.0));
        assert_eq!(sink.gauge(QUEUE_DEPTH, "a"), Some(9.0));

        let hist = sink.histogram(TASK_DURATION_SECONDS, "a").unwrap();
        assert_eq!(hist.count, 2);
        assert!((hist.mean() - 0.02).abs() < 1e-9);
        assert!((hist.min - 0.01).abs() < 1e-9);
        assert!((hist.max - 0.03).abs() < 1e-9);
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_in_memory_concurrent_increments() {
        let sink = Arc::new(InMemoryMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        sink.increment_counter(TASKS_PROCESSED, "p", 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(sink.counter(TASKS_PROCESSED, "p"), 8000);
    }
}
