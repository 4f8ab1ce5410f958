//! Autoscaling scenarios driven through the public pool API

#[cfg(feature = "metrics")]
use rust_dynamic_pool::metrics::{
    InMemoryMetrics, QUEUE_DEPTH, SCALE_DOWNS, SCALE_UPS, TASKS_PROCESSED, TASK_DURATION_SECONDS,
    TASK_FAILURES, WORKERS,
};
use rust_dynamic_pool::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn fast_policy() -> ScalingPolicy {
    ScalingPolicy {
        tick_interval: Duration::from_millis(20),
        cooldown: Duration::from_millis(60),
        ..Default::default()
    }
}

#[test]
fn test_burst_scales_within_bounds_then_converges_to_min() {
    let _ = env_logger::builder().is_test(true).try_init();

    let pool = WorkerPool::new(
        PoolConfig::new("burst", 2, 5)
            .with_idle_timeout(Duration::from_millis(150))
            .with_drain_target(Duration::from_millis(100))
            .with_scaling_policy(fast_policy())
            .with_task_handler(|_: &mut Task<u32>| -> Result<()> {
                thread::sleep(Duration::from_millis(50));
                Ok(())
            }),
    )
    .expect("Failed to create pool");

    pool.start().expect("Failed to start pool");
    assert_eq!(pool.worker_count(), 2);

    for i in 0..10 {
        pool.submit(i).expect("Failed to submit");
    }

    thread::sleep(Duration::from_millis(200));
    let count = pool.worker_count();
    assert!((2..=5).contains(&count), "worker count {} out of bounds", count);

    // Idle for longer than the idle timeout: back to the minimum
    assert!(wait_until(Duration::from_secs(5), || pool.stats().tasks_processed == 10
        && pool.worker_count() == 2));
    thread::sleep(Duration::from_millis(300));
    assert_eq!(pool.worker_count(), 2);

    pool.stop().expect("Failed to stop pool");
    assert_eq!(pool.live_threads(), 0);
}

#[test]
fn test_backlog_scales_up_to_max() {
    let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
    let pool = WorkerPool::new(
        PoolConfig::new("backlog", 1, 6)
            .with_scaling_policy(fast_policy())
            .with_task_handler(move |_: &mut Task<u32>| -> Result<()> {
                let _ = gate_rx.recv();
                Ok(())
            }),
    )
    .expect("Failed to create pool");
    pool.start().expect("Failed to start pool");

    // 100 tasks * 100ms default duration / 500ms drain target = 20, clamped to 6
    for i in 0..100 {
        pool.submit(i).expect("Failed to submit");
    }
    assert!(wait_until(Duration::from_secs(2), || pool.worker_count() == 6));
    assert!(pool.stats().scale_ups >= 1);
    assert!(pool.worker_count() <= pool.max_workers());

    drop(gate_tx);
    pool.stop().expect("Failed to stop pool");
}

#[test]
fn test_hysteresis_holds_small_deviation() {
    let pool = WorkerPool::new(
        PoolConfig::new("hysteresis", 2, 5)
            .with_scaling_policy(fast_policy())
            .with_scaler(|| 3usize)
            .with_task_handler(|_: &mut Task<()>| -> Result<()> { Ok(()) }),
    )
    .expect("Failed to create pool");
    pool.start().expect("Failed to start pool");

    // Many ticks pass; |3 - 2| stays below the threshold of 2
    thread::sleep(Duration::from_millis(200));
    assert_eq!(pool.worker_count(), 2);
    assert_eq!(pool.stats().scale_ups, 0);
    let estimate = pool.smoothed_estimate().expect("Controller never ticked");
    assert!((estimate - 3.0).abs() < 1e-9, "estimate {}", estimate);

    pool.stop().expect("Failed to stop pool");
}

#[test]
fn test_scaler_override_drives_both_directions() {
    let required = Arc::new(AtomicUsize::new(8));
    let wanted = Arc::clone(&required);

    let policy = ScalingPolicy {
        smoothing_factor: 1.0,
        max_scale_down: 4,
        ..fast_policy()
    };
    let pool = WorkerPool::new(
        PoolConfig::new("override", 1, 8)
            .with_scaling_policy(policy)
            .with_scaler(move || wanted.load(Ordering::SeqCst))
            .with_task_handler(|_: &mut Task<()>| -> Result<()> { Ok(()) }),
    )
    .expect("Failed to create pool");
    pool.start().expect("Failed to start pool");

    assert!(wait_until(Duration::from_secs(2), || pool.worker_count() == 8));
    assert!(wait_until(Duration::from_secs(1), || pool.stats().scale_ups == 1));

    // 8 -> 1 takes two ticks at no more than 4 per tick
    required.store(1, Ordering::SeqCst);
    assert!(wait_until(Duration::from_secs(2), || pool.worker_count() == 1));
    assert!(wait_until(Duration::from_secs(1), || pool.stats().scale_downs == 2));
    assert_eq!(pool.stats().scale_ups, 1);
    // Retired workers leave their slots once they notice
    assert!(wait_until(Duration::from_secs(1), || pool.registered_workers() == 1));

    pool.stop().expect("Failed to stop pool");
}

#[test]
fn test_scaler_can_be_swapped_at_runtime() {
    let pool = WorkerPool::new(
        PoolConfig::new("swap-scaler", 1, 4)
            .with_scaling_policy(ScalingPolicy {
                smoothing_factor: 1.0,
                ..fast_policy()
            })
            .with_task_handler(|_: &mut Task<()>| -> Result<()> { Ok(()) }),
    )
    .expect("Failed to create pool");
    pool.start().expect("Failed to start pool");
    thread::sleep(Duration::from_millis(60));
    assert_eq!(pool.worker_count(), 1);

    pool.set_scaler(Some(Arc::new(|| 4usize)));
    assert!(wait_until(Duration::from_secs(2), || pool.worker_count() == 4));

    pool.stop().expect("Failed to stop pool");
}

#[test]
fn test_average_task_duration_tracks_samples() {
    let pool = WorkerPool::new(
        PoolConfig::new("durations", 1, 1)
            .with_scaling_policy(fast_policy())
            .with_task_handler(|_: &mut Task<()>| -> Result<()> {
                thread::sleep(Duration::from_millis(20));
                Ok(())
            }),
    )
    .expect("Failed to create pool");

    assert_eq!(pool.average_task_duration(), Duration::from_millis(100));
    pool.start().expect("Failed to start pool");
    for _ in 0..5 {
        pool.submit(()).expect("Failed to submit");
    }
    assert!(wait_until(Duration::from_secs(2), || pool.stats().tasks_processed == 5));

    let avg = pool.average_task_duration();
    assert!(avg >= Duration::from_millis(20), "average {:?}", avg);
    assert!(avg < Duration::from_millis(100), "average {:?}", avg);
    pool.stop().expect("Failed to stop pool");
}

#[cfg(feature = "metrics")]
#[test]
fn test_metrics_are_reported_to_sink() {
    let sink = Arc::new(InMemoryMetrics::new());
    let pool = WorkerPool::new(
        PoolConfig::new("metered", 1, 4)
            .with_metrics(sink.clone())
            .with_scaling_policy(fast_policy())
            .with_scaler(|| 4usize)
            .with_task_handler(|task: &mut Task<u32>| -> Result<()> {
                match task.take_payload() {
                    Some(n) if n % 5 == 0 => Err(PoolError::execution(task.id(), "multiple of five")),
                    _ => Ok(()),
                }
            }),
    )
    .expect("Failed to create pool");
    pool.start().expect("Failed to start pool");

    for i in 0..20 {
        pool.submit(i).expect("Failed to submit");
    }
    assert!(wait_until(Duration::from_secs(2), || sink
        .counter(TASKS_PROCESSED, "metered")
        == 20));
    assert!(wait_until(Duration::from_secs(2), || sink.counter(SCALE_UPS, "metered") == 1));

    // Every worker has been joined once stop returns
    pool.stop().expect("Failed to stop pool");

    assert_eq!(sink.counter(TASK_FAILURES, "metered"), 4);
    assert_eq!(sink.counter(SCALE_DOWNS, "metered"), 0);
    let durations = sink
        .histogram(TASK_DURATION_SECONDS, "metered")
        .expect("No duration histogram");
    assert_eq!(durations.count, 20);
    assert!(sink.gauge(QUEUE_DEPTH, "metered").is_some());
    assert_eq!(sink.gauge(WORKERS, "metered"), Some(0.0));
}
