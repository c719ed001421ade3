/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Synthetic execution-time model.
//!
//! A stage does no real work; it holds the processor for a duration drawn
//! from a three-point (best / average / worst) distribution:
//!
//! | Draw `x ∈ [0,1)` | Result |
//! |---|---|
//! | `x < (max − avg) / (max − min)` | uniform in `[min, avg]` |
//! | `x < 1 − OVERRUN_PROBABILITY` | uniform in `[avg, max]` |
//! | otherwise | `max + avg · u² / 10`, `u ∈ [0,1)` (WCET overrun tail) |
//!
//! Overruns are an expected outcome, not a fault: the runner reports them
//! but never prevents them.

pub mod profile;

use std::time::Duration;

use rand::Rng;
use thiserror::Error;

pub use profile::{ExecutionProfile, Phase, PhaseKind};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Probability that a draw lands in the overrun tail beyond the worst case.
pub const OVERRUN_PROBABILITY: f64 = 0.001;

// ── Error type ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WcetError {
    #[error("execution-time bounds must be strictly positive (min = {min_ns} ns)")]
    NonPositive { min_ns: f64 },

    #[error(
        "execution-time bounds out of order: min = {min_ns} ns, avg = {avg_ns} ns, max = {max_ns} ns \
         (need min <= avg <= max and min < max)"
    )]
    Unordered { min_ns: f64, avg_ns: f64, max_ns: f64 },

    #[error("clock frequency must be positive, got {0} GHz")]
    InvalidFrequency(f64),

    #[error("execution profile has no phases")]
    EmptyProfile,
}

// ── Sampler ───────────────────────────────────────────────────────────────────

/// Draw one execution time (in the same unit as the inputs).
///
/// Callers must guarantee `min < max`; [`WcetBounds::new`] enforces it.
pub fn sample<R: Rng + ?Sized>(min: f64, avg: f64, max: f64, rng: &mut R) -> f64 {
    let p_low = (max - avg) / (max - min);
    let x: f64 = rng.gen();
    if x < p_low {
        min + rng.gen::<f64>() * (avg - min)
    } else if x < 1.0 - OVERRUN_PROBABILITY {
        avg + rng.gen::<f64>() * (max - avg)
    } else {
        let u: f64 = rng.gen();
        max + avg * u * u / 10.0
    }
}

// ── WcetBounds ────────────────────────────────────────────────────────────────

/// Validated best / average / worst execution time for one phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WcetBounds {
    min_ns: f64,
    avg_ns: f64,
    max_ns: f64,
}

impl WcetBounds {
    pub fn new(min: Duration, avg: Duration, max: Duration) -> Result<Self, WcetError> {
        Self::from_nanos(
            min.as_nanos() as f64,
            avg.as_nanos() as f64,
            max.as_nanos() as f64,
        )
    }

    /// Convert processor tick counts to time: `ns = ticks / ghz`.
    ///
    /// ```rust
    /// use chainbench::wcet::WcetBounds;
    ///
    /// let b = WcetBounds::from_ticks(3_400, 6_800, 10_200, 3.4).unwrap();
    /// assert_eq!(b.min().as_nanos(), 1_000);
    /// assert_eq!(b.max().as_nanos(), 3_000);
    /// ```
    pub fn from_ticks(best: u64, avg: u64, worst: u64, ghz: f64) -> Result<Self, WcetError> {
        if !(ghz > 0.0) {
            return Err(WcetError::InvalidFrequency(ghz));
        }
        Self::from_nanos(best as f64 / ghz, avg as f64 / ghz, worst as f64 / ghz)
    }

    fn from_nanos(min_ns: f64, avg_ns: f64, max_ns: f64) -> Result<Self, WcetError> {
        if !(min_ns > 0.0) {
            return Err(WcetError::NonPositive { min_ns });
        }
        if !(min_ns <= avg_ns && avg_ns <= max_ns && min_ns < max_ns) {
            return Err(WcetError::Unordered {
                min_ns,
                avg_ns,
                max_ns,
            });
        }
        Ok(Self {
            min_ns,
            avg_ns,
            max_ns,
        })
    }

    pub fn min(&self) -> Duration {
        Duration::from_nanos(self.min_ns.round() as u64)
    }

    pub fn avg(&self) -> Duration {
        Duration::from_nanos(self.avg_ns.round() as u64)
    }

    pub fn max(&self) -> Duration {
        Duration::from_nanos(self.max_ns.round() as u64)
    }

    /// Draw one execution time from these bounds.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let ns = sample(self.min_ns, self.avg_ns, self.max_ns, rng);
        Duration::from_nanos(ns.round() as u64)
    }

    /// `true` if `d` lies beyond the configured worst case.
    pub fn is_overrun(&self, d: Duration) -> bool {
        d.as_nanos() as f64 > self.max_ns.round()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn bounds_ms(min: u64, avg: u64, max: u64) -> WcetBounds {
        WcetBounds::new(
            Duration::from_millis(min),
            Duration::from_millis(avg),
            Duration::from_millis(max),
        )
        .unwrap()
    }

    // ── sample ────────────────────────────────────────────────────────────────

    #[test]
    fn draws_never_fall_below_min() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50_000 {
            assert!(sample(2.0, 5.0, 9.0, &mut rng) >= 2.0);
        }
    }

    #[test]
    fn draws_stay_within_bounds_except_rare_overruns() {
        let mut rng = StdRng::seed_from_u64(42);
        let n = 100_000;
        let in_bounds = (0..n)
            .map(|_| sample(2.0, 5.0, 9.0, &mut rng))
            .filter(|v| *v >= 2.0 && *v <= 9.0)
            .count();
        // Expected overrun count is 100; allow generous statistical slack.
        let min_expected = ((1.0 - OVERRUN_PROBABILITY) * n as f64) as usize - 100;
        assert!(in_bounds >= min_expected, "in_bounds = {in_bounds}");
    }

    #[test]
    fn overrun_tail_is_bounded_by_a_tenth_of_avg() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100_000 {
            let v = sample(2.0, 5.0, 9.0, &mut rng);
            assert!(v < 9.0 + 5.0 / 10.0);
        }
    }

    #[test]
    fn low_half_probability_matches_ratio() {
        // p_low = (9 - 5) / (9 - 1) = 0.5
        let mut rng = StdRng::seed_from_u64(11);
        let n = 100_000;
        let low = (0..n)
            .map(|_| sample(1.0, 5.0, 9.0, &mut rng))
            .filter(|v| *v < 5.0)
            .count();
        let ratio = low as f64 / n as f64;
        assert!((ratio - 0.5).abs() < 0.02, "ratio = {ratio}");
    }

    // ── WcetBounds ────────────────────────────────────────────────────────────

    #[test]
    fn from_ticks_divides_by_frequency() {
        // Planner tick counts at 3.4 GHz
        let b = WcetBounds::from_ticks(19_243_822, 22_743_822, 26_483_822, 3.4).unwrap();
        assert_eq!(b.min().as_micros(), 5_659);
        assert_eq!(b.max().as_micros(), 7_789);
    }

    #[test]
    fn rejects_equal_min_and_max() {
        let err = WcetBounds::new(
            Duration::from_millis(1),
            Duration::from_millis(1),
            Duration::from_millis(1),
        )
        .unwrap_err();
        assert!(matches!(err, WcetError::Unordered { .. }));
    }

    #[test]
    fn rejects_avg_outside_range() {
        let err = WcetBounds::new(
            Duration::from_millis(2),
            Duration::from_millis(10),
            Duration::from_millis(5),
        )
        .unwrap_err();
        assert!(matches!(err, WcetError::Unordered { .. }));
    }

    #[test]
    fn rejects_zero_min() {
        let err = WcetBounds::new(Duration::ZERO, Duration::from_millis(1), Duration::from_millis(2))
            .unwrap_err();
        assert!(matches!(err, WcetError::NonPositive { .. }));
    }

    #[test]
    fn rejects_non_positive_frequency() {
        assert_eq!(
            WcetBounds::from_ticks(1, 2, 3, 0.0).unwrap_err(),
            WcetError::InvalidFrequency(0.0)
        );
    }

    #[test]
    fn bounds_sample_respects_min_and_flags_overruns() {
        let b = bounds_ms(1, 2, 3);
        let mut rng = StdRng::seed_from_u64(99);
        let mut overruns = 0;
        for _ in 0..20_000 {
            let d = b.sample(&mut rng);
            assert!(d >= b.min());
            if b.is_overrun(d) {
                overruns += 1;
            }
        }
        assert!(overruns < 100, "overruns = {overruns}");
    }
}
