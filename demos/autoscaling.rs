//! Autoscaling demonstration
//!
//! This example shows the pool reacting to load:
//! - A burst of slow tasks makes the controller add workers
//! - Idle workers above the minimum leave after the idle timeout
//! - Metrics are collected in memory and printed at the end
//!
//! Run with `RUST_LOG=info cargo run --example autoscaling` to see the
//! scaling transitions logged.

use rust_dynamic_pool::metrics::{
    InMemoryMetrics, SCALE_DOWNS, SCALE_UPS, TASKS_PROCESSED, TASK_DURATION_SECONDS,
};
use rust_dynamic_pool::prelude::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("=== Autoscaling Worker Pool Demo ===\n");

    let metrics = Arc::new(InMemoryMetrics::new());
    let policy = ScalingPolicy {
        tick_interval: Duration::from_millis(200),
        cooldown: Duration::from_millis(600),
        ..Default::default()
    };

    let pool = WorkerPool::new(
        PoolConfig::new("demo", 2, 12)
            .with_idle_timeout(Duration::from_secs(1))
            .with_drain_target(Duration::from_millis(300))
            .with_scaling_policy(policy)
            .with_metrics(metrics.clone())
            .with_task_handler(|task: &mut Task<u64>| -> Result<()> {
                let millis = task.take_payload().unwrap_or(0);
                thread::sleep(Duration::from_millis(millis));
                if let Some(logger) = task.logger() {
                    logger.debug(format_args!("slept {}ms", millis));
                }
                Ok(())
            }),
    )?;

    pool.start()?;
    println!("1. Started with {} workers\n", pool.worker_count());

    println!("2. Submitting a burst of 200 tasks (20-60ms each):");
    for i in 0..200u64 {
        pool.submit(20 + (i * 7) % 41)?;
    }

    for _ in 0..10 {
        thread::sleep(Duration::from_millis(300));
        println!(
            "   workers: {:>2}  queued: {:>3}  estimate: {:>5.2}  avg task: {:?}",
            pool.worker_count(),
            pool.queue_len(),
            pool.smoothed_estimate().unwrap_or_default(),
            pool.average_task_duration()
        );
    }

    println!("\n3. Idling so surplus workers retire:");
    for _ in 0..5 {
        thread::sleep(Duration::from_millis(600));
        println!("   workers: {:>2}", pool.worker_count());
    }

    pool.stop()?;

    let stats = pool.stats();
    println!("\n4. Final statistics:");
    println!("   submitted:   {}", stats.tasks_submitted);
    println!("   processed:   {}", stats.tasks_processed);
    println!("   scale ups:   {}", metrics.counter(SCALE_UPS, "demo"));
    println!("   scale downs: {}", metrics.counter(SCALE_DOWNS, "demo"));
    println!("   processed (metrics): {}", metrics.counter(TASKS_PROCESSED, "demo"));
    if let Some(durations) = metrics.histogram(TASK_DURATION_SECONDS, "demo") {
        println!(
            "   task duration: mean {:.1}ms, max {:.1}ms",
            durations.mean() * 1000.0,
            durations.max * 1000.0
        );
    }

    println!("\n=== Demo completed successfully ===");
    Ok(())
}
