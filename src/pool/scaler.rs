//! Autoscaling controller
//!
//! Each tick the controller turns a [`LoadSample`] into a [`ScaleDecision`]:
//!
//! 1. Inside the cooldown window nothing happens.
//! 2. A raw estimate is taken from the scaler override, or from
//!    `ceil(queue_len * avg_task_duration / drain_target)` floored at 1,
//!    and clamped to `[min, max]`.
//! 3. The raw estimate is folded into an exponentially smoothed estimate.
//! 4. If the smoothed estimate is within the hysteresis threshold of the
//!    current worker count, the pool holds.
//! 5. Otherwise the pool scales towards the rounded smoothed estimate,
//!    retiring at most `max_scale_down` workers per tick.
//!
//! The controller only decides; [`WorkerPool`](crate::WorkerPool) applies
//! the decision and calls [`Autoscaler::mark_scaled`] once it has acted.

use super::config::ScalingPolicy;
use crossbeam_utils::atomic::AtomicCell;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Inputs of one controller tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSample {
    /// Tasks waiting in the queue
    pub queue_len: usize,
    /// Workers currently counted towards the pool size
    pub current: usize,
    /// Lower worker bound
    pub min: usize,
    /// Upper worker bound
    pub max: usize,
    /// Value returned by the scaler override, if one is configured
    pub requested: Option<usize>,
}

/// Why a tick did not scale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldReason {
    /// The previous scaling action was too recent
    Cooldown,
    /// The smoothed estimate is too close to the current count
    Hysteresis,
    /// The rounded target equals the current count
    AtTarget,
}

/// Outcome of one controller tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Leave the pool alone
    Hold(HoldReason),
    /// Spawn this many workers
    Up(usize),
    /// Retire this many workers
    Down(usize),
}

/// Load estimator and scaling policy
///
/// The smoothed estimate and last-scale timestamp are lock-free cells; the
/// average task duration, updated by every worker, sits behind a mutex so
/// that the read-modify-write of the moving average is not torn.
#[derive(Debug)]
pub struct Autoscaler {
    policy: ScalingPolicy,
    drain_target: Duration,
    smoothed: AtomicCell<Option<f64>>,
    last_scale: AtomicCell<Option<Instant>>,
    avg_duration_nanos: Mutex<Option<f64>>,
}

impl Autoscaler {
    /// Creates a controller with no history
    pub fn new(policy: ScalingPolicy, drain_target: Duration) -> Self {
        Self {
            policy: policy.normalized(),
            drain_target: if drain_target.is_zero() {
                super::config::DEFAULT_DRAIN_TARGET
            } else {
                drain_target
            },
            smoothed: AtomicCell::new(None),
            last_scale: AtomicCell::new(None),
            avg_duration_nanos: Mutex::new(None),
        }
    }

    /// The policy in effect
    pub fn policy(&self) -> &ScalingPolicy {
        &self.policy
    }

    /// Folds one task execution time into the average
    pub fn record_duration(&self, elapsed: Duration) {
        let sample = elapsed.as_nanos() as f64;
        let alpha = self.policy.duration_alpha;
        let mut avg = self.avg_duration_nanos.lock();
        *avg = Some(match *avg {
            Some(prev) => sample * alpha + prev * (1.0 - alpha),
            None => sample,
        });
    }

    /// Average task duration, or the policy default before any sample
    pub fn average_task_duration(&self) -> Duration {
        match *self.avg_duration_nanos.lock() {
            Some(nanos) => Duration::from_nanos(nanos.round() as u64),
            None => self.policy.default_task_duration,
        }
    }

    /// Current smoothed estimate of required workers
    pub fn smoothed_estimate(&self) -> Option<f64> {
        self.smoothed.load()
    }

    /// Time of the last scaling action
    pub fn last_scale(&self) -> Option<Instant> {
        self.last_scale.load()
    }

    /// Starts the cooldown window
    pub fn mark_scaled(&self, now: Instant) {
        self.last_scale.store(Some(now));
    }

    /// Forgets smoothing and cooldown history, keeping the duration average
    pub fn reset(&self) {
        self.smoothed.store(None);
        self.last_scale.store(None);
    }

    /// Workers needed to drain `sample.queue_len` tasks within the drain target
    ///
    /// Uses the scaler override when present. Always within `[min, max]`.
    pub fn raw_estimate(&self, sample: &LoadSample) -> usize {
        let wanted = match sample.requested {
            Some(requested) => requested,
            None => {
                let avg = self.average_task_duration().as_nanos().max(1);
                let drain = self.drain_target.as_nanos().max(1);
                let work = sample.queue_len as u128 * avg;
                let workers = (work + drain - 1) / drain;
                usize::try_from(workers).unwrap_or(usize::MAX).max(1)
            }
        };
        clamp(wanted, sample.min, sample.max)
    }

    /// Runs one controller tick
    pub fn evaluate(&self, now: Instant, sample: &LoadSample) -> ScaleDecision {
        if let Some(last) = self.last_scale.load() {
            if now.saturating_duration_since(last) < self.policy.cooldown {
                return ScaleDecision::Hold(HoldReason::Cooldown);
            }
        }

        let raw = self.raw_estimate(sample) as f64;
        let alpha = self.policy.smoothing_factor;
        let smoothed = match self.smoothed.load() {
            Some(prev) => raw * alpha + prev * (1.0 - alpha),
            None => raw,
        };
        self.smoothed.store(Some(smoothed));

        let current = sample.current;
        if (smoothed - current as f64).abs() < self.policy.hysteresis_threshold as f64 {
            return ScaleDecision::Hold(HoldReason::Hysteresis);
        }

        let target = clamp(smoothed.round() as usize, sample.min, sample.max);
        if target > current {
            ScaleDecision::Up(target - current)
        } else if target < current {
            ScaleDecision::Down((current - target).min(self.policy.max_scale_down))
        } else {
            ScaleDecision::Hold(HoldReason::AtTarget)
        }
    }
}

fn clamp(value: usize, min: usize, max: usize) -> usize {
    value.max(min).min(max.max(min))
}
