/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! "Hold for duration" primitives used by the EXECUTE state.

use crate::time::{Clock, Timespec};

/// Occupy the calling thread until `deadline` on `clock`.
pub trait Hold: Send + Sync {
    fn hold_until(&self, clock: &dyn Clock, deadline: Timespec);
}

/// Spin on the clock.  Emulates CPU-bound work; the core stays busy.
#[derive(Debug, Clone, Copy, Default)]
pub struct BusyHold;

impl Hold for BusyHold {
    fn hold_until(&self, clock: &dyn Clock, deadline: Timespec) {
        while clock.now() < deadline {
            std::hint::spin_loop();
        }
    }
}

/// Block on the clock.  Emulates work offloaded to another device.
#[derive(Debug, Clone, Copy, Default)]
pub struct SleepHold;

impl Hold for SleepHold {
    fn hold_until(&self, clock: &dyn Clock, deadline: Timespec) {
        clock.sleep_until(deadline);
    }
}

/// Return immediately.  For fast test runs where only ordering matters.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHold;

impl Hold for NoHold {
    fn hold_until(&self, _clock: &dyn Clock, _deadline: Timespec) {}
}
