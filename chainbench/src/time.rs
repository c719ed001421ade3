/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Monotonic timestamps and the clock seam used by the task runner.
//!
//! Every instant that ends up on the wire is a [`Timespec`]: a signed
//! seconds + nanoseconds pair read from `CLOCK_MONOTONIC`.  The pair form is
//! kept (instead of `std::time::Instant`) because the stage records carry the
//! raw fields and every process on the host must agree on the epoch.
//!
//! The [`Clock`] trait is the only way the runner observes or waits on time,
//! so tests can substitute [`ManualClock`] and run thousands of cycles
//! without sleeping.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Nanoseconds in one second.
pub const NANOS_PER_SEC: i64 = 1_000_000_000;

// ── Timespec ──────────────────────────────────────────────────────────────────

/// A monotonic instant as a `(seconds, nanoseconds)` pair.
///
/// Values built through [`Timespec::new`] are normalised so that
/// `0 <= nsec < 1_000_000_000`; the derived ordering relies on that.
/// Records decoded from the wire keep whatever the producer wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i64,
}

impl Timespec {
    /// Build a normalised timestamp, carrying nanosecond overflow (or
    /// underflow) into the seconds field.
    pub fn new(sec: i64, nsec: i64) -> Self {
        let carry = nsec.div_euclid(NANOS_PER_SEC);
        Self {
            sec: sec.saturating_add(carry),
            nsec: nsec.rem_euclid(NANOS_PER_SEC),
        }
    }

    pub fn from_nanos(nanos: i128) -> Self {
        let sec = nanos.div_euclid(NANOS_PER_SEC as i128) as i64;
        let nsec = nanos.rem_euclid(NANOS_PER_SEC as i128) as i64;
        Self { sec, nsec }
    }

    pub fn from_millis(ms: i64) -> Self {
        Self::from_nanos(ms as i128 * 1_000_000)
    }

    pub fn from_micros(us: i64) -> Self {
        Self::from_nanos(us as i128 * 1_000)
    }

    pub fn as_nanos(&self) -> i128 {
        self.sec as i128 * NANOS_PER_SEC as i128 + self.nsec as i128
    }

    /// Microseconds as a float, the unit used in the latency trace files.
    pub fn as_micros_f64(&self) -> f64 {
        self.sec as f64 * 1_000_000.0 + self.nsec as f64 / 1.0e3
    }

    pub fn as_millis_f64(&self) -> f64 {
        self.sec as f64 * 1_000.0 + self.nsec as f64 / 1.0e6
    }

    /// `self + d`, carrying into the seconds field.  Saturates at the
    /// largest representable second.
    pub fn add_duration(self, d: Duration) -> Self {
        let secs = i64::try_from(d.as_secs()).unwrap_or(i64::MAX);
        Self::new(
            self.sec.saturating_add(secs),
            self.nsec + d.subsec_nanos() as i64,
        )
    }

    /// Elapsed time from `earlier` to `self`; zero if `earlier` is later.
    pub fn saturating_duration_since(&self, earlier: Timespec) -> Duration {
        let diff = self.as_nanos() - earlier.as_nanos();
        if diff <= 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(diff.min(u64::MAX as i128) as u64)
        }
    }
}

// ── Clock ─────────────────────────────────────────────────────────────────────

/// Source of monotonic time plus an absolute-deadline wait.
pub trait Clock: Send + Sync {
    /// Current monotonic instant.
    fn now(&self) -> Timespec;

    /// Block until `deadline` (absolute).  Returns immediately if the
    /// deadline has already passed.
    fn sleep_until(&self, deadline: Timespec);
}

/// `CLOCK_MONOTONIC` with `clock_nanosleep(TIMER_ABSTIME)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Timespec {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
        Timespec::new(ts.tv_sec as i64, ts.tv_nsec as i64)
    }

    fn sleep_until(&self, deadline: Timespec) {
        let ts = libc::timespec {
            tv_sec: deadline.sec as libc::time_t,
            tv_nsec: deadline.nsec as libc::c_long,
        };
        loop {
            // clock_nanosleep returns the error number directly.
            let rc = unsafe {
                libc::clock_nanosleep(
                    libc::CLOCK_MONOTONIC,
                    libc::TIMER_ABSTIME,
                    &ts,
                    std::ptr::null_mut(),
                )
            };
            if rc != libc::EINTR {
                break;
            }
        }
    }
}

/// Simulated clock for tests and dry runs.
///
/// `sleep_until` jumps the clock forward instead of blocking.  An optional
/// per-read step makes every `now()` call advance time, which models
/// processing cost between observations.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicI64,
    step_ns: i64,
}

impl ManualClock {
    pub fn new(start: Timespec) -> Self {
        Self {
            nanos: AtomicI64::new(start.as_nanos() as i64),
            step_ns: 0,
        }
    }

    /// Clock that advances by `step` on every `now()` read.
    pub fn with_step(start: Timespec, step: Duration) -> Self {
        Self {
            nanos: AtomicI64::new(start.as_nanos() as i64),
            step_ns: step.as_nanos() as i64,
        }
    }

    pub fn advance(&self, d: Duration) {
        self.nanos.fetch_add(d.as_nanos() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, t: Timespec) {
        self.nanos.store(t.as_nanos() as i64, Ordering::SeqCst);
    }

    /// Current simulated time without applying the read step.
    pub fn current(&self) -> Timespec {
        Timespec::from_nanos(self.nanos.load(Ordering::SeqCst) as i128)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timespec {
        let prev = self.nanos.fetch_add(self.step_ns, Ordering::SeqCst);
        Timespec::from_nanos(prev as i128)
    }

    fn sleep_until(&self, deadline: Timespec) {
        self.nanos
            .fetch_max(deadline.as_nanos() as i64, Ordering::SeqCst);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
