/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Drift-free periodic schedule.
//!
//! The next wake instant advances by exactly one period per cycle,
//! independent of when the task actually woke or how long it ran.

use std::time::Duration;

use crate::time::Timespec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    period: Duration,
    next_wake: Timespec,
    cycle: u64,
}

impl Schedule {
    /// Start the schedule with the first wake at `start` (normally "now").
    pub fn new(period: Duration, start: Timespec) -> Self {
        Self {
            period,
            next_wake: start,
            cycle: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Absolute instant of the upcoming wake.
    pub fn next_wake(&self) -> Timespec {
        self.next_wake
    }

    /// Completed cycles.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// `next_wake += period`, carrying nanoseconds into seconds.
    pub fn advance(&mut self) {
        self.next_wake = self.next_wake.add_duration(self.period);
        self.cycle += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_adds_exactly_one_period() {
        let mut s = Schedule::new(Duration::from_millis(15), Timespec::new(10, 0));
        s.advance();
        assert_eq!(s.next_wake(), Timespec::new(10, 15_000_000));
        assert_eq!(s.cycle(), 1);
    }

    #[test]
    fn many_cycles_accumulate_no_drift() {
        let start = Timespec::new(5, 999_999_999);
        let period = Duration::from_millis(33);
        let mut s = Schedule::new(period, start);
        for _ in 0..10_000 {
            s.advance();
        }
        let expected = start.as_nanos() + 10_000 * period.as_nanos() as i128;
        assert_eq!(s.next_wake().as_nanos(), expected);
        assert!(s.next_wake().nsec < 1_000_000_000);
    }
}
