/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Multi-phase execution profiles.
//!
//! Most stages execute a single CPU-bound phase.  Perception stages that
//! hand work to an accelerator are modelled as `cpu → offload → cpu`: the
//! offload phase sleeps (the core is free) while the CPU phases busy-hold.

use std::time::Duration;

use serde::Deserialize;

use super::{WcetBounds, WcetError};

/// How a phase occupies the core while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseKind {
    /// Busy-hold the core.
    #[default]
    Cpu,
    /// Sleep; work is notionally running elsewhere.
    Offload,
}

/// One sampled segment of a stage's EXECUTE state.
#[derive(Debug, Clone, PartialEq)]
pub struct Phase {
    pub name: String,
    pub kind: PhaseKind,
    pub bounds: WcetBounds,
}

impl Phase {
    pub fn cpu(name: impl Into<String>, bounds: WcetBounds) -> Self {
        Self {
            name: name.into(),
            kind: PhaseKind::Cpu,
            bounds,
        }
    }

    pub fn offload(name: impl Into<String>, bounds: WcetBounds) -> Self {
        Self {
            name: name.into(),
            kind: PhaseKind::Offload,
            bounds,
        }
    }
}

/// Ordered, non-empty list of execution phases.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionProfile {
    phases: Vec<Phase>,
}

impl ExecutionProfile {
    pub fn new(phases: Vec<Phase>) -> Result<Self, WcetError> {
        if phases.is_empty() {
            return Err(WcetError::EmptyProfile);
        }
        Ok(Self { phases })
    }

    /// Single busy phase named `execute`.
    pub fn single(bounds: WcetBounds) -> Self {
        Self {
            phases: vec![Phase::cpu("execute", bounds)],
        }
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Sum of the configured worst cases (overruns excluded).
    pub fn worst_case_total(&self) -> Duration {
        self.phases.iter().map(|p| p.bounds.max()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(min: u64, avg: u64, max: u64) -> WcetBounds {
        WcetBounds::new(
            Duration::from_micros(min),
            Duration::from_micros(avg),
            Duration::from_micros(max),
        )
        .unwrap()
    }

    #[test]
    fn empty_profile_is_rejected() {
        assert_eq!(
            ExecutionProfile::new(vec![]).unwrap_err(),
            WcetError::EmptyProfile
        );
    }

    #[test]
    fn worst_case_total_sums_phases() {
        let p = ExecutionProfile::new(vec![
            Phase::cpu("pre", b(1, 2, 3)),
            Phase::offload("gpu", b(10, 20, 30)),
            Phase::cpu("post", b(4, 5, 6)),
        ])
        .unwrap();
        assert_eq!(p.worst_case_total(), Duration::from_micros(39));
        assert_eq!(p.phases()[1].kind, PhaseKind::Offload);
    }

    #[test]
    fn single_profile_is_one_cpu_phase() {
        let p = ExecutionProfile::single(b(1, 2, 3));
        assert_eq!(p.phases().len(), 1);
        assert_eq!(p.phases()[0].kind, PhaseKind::Cpu);
    }
}
