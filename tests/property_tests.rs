//! Property-based tests for rust_dynamic_pool using proptest

use proptest::prelude::*;
use rust_dynamic_pool::pool::{Autoscaler, HoldReason, LoadSample, ScaleDecision};
use rust_dynamic_pool::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// PoolConfig Tests
// ============================================================================

proptest! {
    /// Normalized bounds always satisfy 1 <= min <= max
    #[test]
    fn test_config_bounds_normalized(min in 0usize..64, max in 0usize..64) {
        let config = PoolConfig::<()>::new("prop", min, max);

        prop_assert!(config.min_workers >= 1);
        prop_assert!(config.min_workers <= config.max_workers);
        if min >= 1 {
            prop_assert_eq!(config.min_workers, min);
        }
        if min >= 1 && max >= min {
            prop_assert_eq!(config.max_workers, max);
        }
        if min >= 1 && max >= 1 && max < min {
            prop_assert_eq!(config.max_workers, min * 4);
        }
    }

    /// Out-of-range policy values never survive normalization
    #[test]
    fn test_policy_normalized(
        smoothing in -2.0f64..3.0,
        alpha in -2.0f64..3.0,
        max_scale_down in 0usize..10,
        tick_ms in 0u64..2000,
    ) {
        let policy = ScalingPolicy {
            tick_interval: Duration::from_millis(tick_ms),
            smoothing_factor: smoothing,
            duration_alpha: alpha,
            max_scale_down,
            ..Default::default()
        }
        .normalized();

        prop_assert!(policy.smoothing_factor > 0.0 && policy.smoothing_factor <= 1.0);
        prop_assert!(policy.duration_alpha > 0.0 && policy.duration_alpha <= 1.0);
        prop_assert!(policy.max_scale_down >= 1);
        prop_assert!(!policy.tick_interval.is_zero());
    }
}

// ============================================================================
// Autoscaler Tests
// ============================================================================

fn bounds() -> impl Strategy<Value = (usize, usize)> {
    (1usize..16).prop_flat_map(|min| (Just(min), min..32))
}

proptest! {
    /// raw = clamp(max(1, ceil(N * D / T)), min, max), exactly
    #[test]
    fn test_raw_estimate_formula(
        queue_len in 0usize..10_000,
        task_ms in 1u64..2_000,
        drain_ms in 1u64..2_000,
        (min, max) in bounds(),
    ) {
        let scaler = Autoscaler::new(ScalingPolicy::default(), Duration::from_millis(drain_ms));
        // The first sample seeds the average exactly
        scaler.record_duration(Duration::from_millis(task_ms));

        let sample = LoadSample { queue_len, current: min, min, max, requested: None };
        let work = queue_len as u64 * task_ms;
        let expected = ((work + drain_ms - 1) / drain_ms).max(1) as usize;
        prop_assert_eq!(scaler.raw_estimate(&sample), expected.clamp(min, max));
    }

    /// The override is clamped the same way
    #[test]
    fn test_override_is_clamped(requested in 0usize..100, (min, max) in bounds()) {
        let scaler = Autoscaler::new(ScalingPolicy::default(), Duration::from_millis(500));
        let sample = LoadSample { queue_len: 0, current: min, min, max, requested: Some(requested) };
        prop_assert_eq!(scaler.raw_estimate(&sample), requested.clamp(min, max));
    }

    /// Decisions never leave the bounds and never retire more than the cap
    #[test]
    fn test_decisions_respect_bounds(
        queue_len in 0usize..5_000,
        (min, max) in bounds(),
        current_offset in 0usize..32,
        max_scale_down in 1usize..8,
    ) {
        let current = (min + current_offset).min(max);
        let policy = ScalingPolicy { max_scale_down, ..Default::default() };
        let scaler = Autoscaler::new(policy, Duration::from_millis(500));
        let sample = LoadSample { queue_len, current, min, max, requested: None };

        match scaler.evaluate(Instant::now(), &sample) {
            ScaleDecision::Up(n) => {
                prop_assert!(n > 0);
                prop_assert!(current + n <= max);
            }
            ScaleDecision::Down(n) => {
                prop_assert!(n > 0 && n <= max_scale_down);
                prop_assert!(current - n >= min);
            }
            ScaleDecision::Hold(_) => {}
        }
    }

    /// Inside the hysteresis band two consecutive ticks both hold
    #[test]
    fn test_hysteresis_band_holds(current in 2usize..20, delta in 0usize..2, above in any::<bool>()) {
        let requested = if above { current + delta } else { current - delta };
        let scaler = Autoscaler::new(ScalingPolicy::default(), Duration::from_millis(500));
        let sample = LoadSample { queue_len: 0, current, min: 1, max: 40, requested: Some(requested) };
        let now = Instant::now();

        for _ in 0..2 {
            let decision = scaler.evaluate(now, &sample);
            prop_assert!(matches!(
                decision,
                ScaleDecision::Hold(HoldReason::Hysteresis) | ScaleDecision::Hold(HoldReason::AtTarget)
            ));
        }
    }
}

// ============================================================================
// Queue Tests
// ============================================================================

proptest! {
    /// Both queues deliver in FIFO order without altering payloads
    #[test]
    fn test_queue_fifo(values in prop::collection::vec(any::<i64>(), 1..64)) {
        let queues: Vec<Arc<dyn TaskQueue<i64>>> = vec![
            Arc::new(ChannelQueue::new(values.len())),
            Arc::new(BoundedQueue::new(values.len())),
        ];
        let ctx = Context::background();
        for queue in queues {
            for v in &values {
                queue.put(&ctx, *v).unwrap();
            }
            prop_assert_eq!(queue.len(), values.len());
            let drained: Vec<i64> = (0..values.len()).map(|_| queue.get(&ctx).unwrap()).collect();
            prop_assert_eq!(&drained, &values);
        }
    }
}

// ============================================================================
// WorkerPool Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// After start and before any submission, worker_count == min
    #[test]
    fn test_start_spawns_min((min, max) in (1usize..6).prop_flat_map(|min| (Just(min), min..8))) {
        let pool = WorkerPool::new(
            PoolConfig::new("prop-start", min, max)
                .with_scaling_policy(ScalingPolicy {
                    tick_interval: Duration::from_secs(60),
                    ..Default::default()
                })
                .with_task_handler(|_: &mut Task<()>| -> Result<()> { Ok(()) }),
        )
        .unwrap();
        pool.start().unwrap();
        prop_assert_eq!(pool.worker_count(), min);
        pool.stop().unwrap();
        prop_assert_eq!(pool.worker_count(), 0);
        prop_assert_eq!(pool.live_threads(), 0);
    }

    /// Setters accept exactly the values that keep 1 <= min <= max
    #[test]
    fn test_bound_setters(new_min in 0usize..12, new_max in 0usize..12) {
        let pool = WorkerPool::new(
            PoolConfig::new("prop-setters", 2, 6)
                .with_task_handler(|_: &mut Task<()>| -> Result<()> { Ok(()) }),
        )
        .unwrap();

        let min_ok = pool.set_min_workers(new_min).is_ok();
        prop_assert_eq!(min_ok, new_min >= 1 && new_min <= 6);
        let current_min = pool.min_workers();

        let max_ok = pool.set_max_workers(new_max).is_ok();
        prop_assert_eq!(max_ok, new_max >= current_min);
        prop_assert!(pool.min_workers() <= pool.max_workers());
    }
}
