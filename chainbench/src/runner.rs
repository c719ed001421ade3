/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Periodic Task Runner.
//!
//! One [`PeriodicTask`] per process.  Each call to [`PeriodicTask::step`]
//! runs one full cycle:
//!
//! ```text
//! WAKE ──► ACQUIRE ──► EXECUTE ──► PRODUCE ──► TRACE ──► ADVANCE ─┐
//!  ▲                                                              │
//!  └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! * WAKE    – absolute wait on the schedule's next-wake instant
//! * ACQUIRE – snapshot every input channel; completion is `received`
//! * EXECUTE – hold for each sampled phase; completion is `sent`
//! * PRODUCE – build the output message and publish it (skipped by sinks)
//! * TRACE   – latency tracer, failures logged but not fatal
//! * ADVANCE – `next_wake += period`
//!
//! Channel failures end the task.  WCET overruns are reported in the
//! [`CycleReport`] and logged; they are never prevented.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::channel::{ChannelError, ExchangeReader, ExchangeWriter};
use crate::hold::{BusyHold, Hold, SleepHold};
use crate::schedule::Schedule;
use crate::stage::{CycleTimes, StageError, StageLogic};
use crate::time::{Clock, MonotonicClock, Timespec};
use crate::tracer::{LatencyTracer, LocalTimes};
use crate::wcet::{ExecutionProfile, PhaseKind};

// ── Error type ────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("task '{task}': {source}")]
    Channel {
        task: String,
        #[source]
        source: ChannelError,
    },

    #[error("task '{task}': {source}")]
    Stage {
        task: String,
        #[source]
        source: StageError,
    },
}

// ── CycleReport ───────────────────────────────────────────────────────────────

/// Sampled duration of one execution phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseSample {
    pub name: String,
    pub kind: PhaseKind,
    pub sampled: Duration,
    pub overrun: bool,
}

/// What happened in one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Zero-based cycle number.
    pub cycle: u64,
    /// Scheduled wake instant.
    pub wake: Timespec,
    pub started: Timespec,
    pub received: Timespec,
    pub sent: Timespec,
    pub finished: Timespec,
    /// `sent - received`.
    pub execution: Duration,
    /// `finished - wake`.
    pub response: Duration,
    /// Any phase sampled beyond its worst case.
    pub overrun: bool,
    pub phases: Vec<PhaseSample>,
    /// Trace blocks written this cycle.
    pub traced: usize,
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// Assembles a [`PeriodicTask`].  Defaults: monotonic clock, busy-hold for
/// CPU phases, sleep-hold for offload phases, entropy-seeded RNG, no
/// inputs, no output, no tracer.
pub struct PeriodicTaskBuilder {
    name: String,
    period: Duration,
    profile: ExecutionProfile,
    logic: Box<dyn StageLogic>,
    clock: Arc<dyn Clock>,
    cpu_hold: Arc<dyn Hold>,
    offload_hold: Arc<dyn Hold>,
    inputs: Vec<Box<dyn ExchangeReader>>,
    output: Option<Box<dyn ExchangeWriter>>,
    tracer: Option<LatencyTracer>,
    seed: Option<u64>,
}

impl PeriodicTaskBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Hold used for [`PhaseKind::Cpu`] phases.
    pub fn cpu_hold(mut self, hold: Arc<dyn Hold>) -> Self {
        self.cpu_hold = hold;
        self
    }

    /// Hold used for [`PhaseKind::Offload`] phases.
    pub fn offload_hold(mut self, hold: Arc<dyn Hold>) -> Self {
        self.offload_hold = hold;
        self
    }

    pub fn input(mut self, reader: Box<dyn ExchangeReader>) -> Self {
        self.inputs.push(reader);
        self
    }

    pub fn output(mut self, writer: Box<dyn ExchangeWriter>) -> Self {
        self.output = Some(writer);
        self
    }

    pub fn tracer(mut self, tracer: LatencyTracer) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Fix the sampler seed (reproducible runs).
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> PeriodicTask {
        let input_bufs = self
            .inputs
            .iter()
            .map(|r| vec![0u8; r.message_size()])
            .collect();
        let out_buf = self
            .output
            .as_ref()
            .map(|w| vec![0u8; w.message_size()])
            .unwrap_or_default();
        let rng = match self.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        PeriodicTask {
            name: self.name,
            period: self.period,
            profile: self.profile,
            logic: self.logic,
            clock: self.clock,
            cpu_hold: self.cpu_hold,
            offload_hold: self.offload_hold,
            inputs: self.inputs,
            input_bufs,
            output: self.output,
            out_buf,
            tracer: self.tracer,
            rng,
            schedule: None,
        }
    }
}

// ── PeriodicTask ──────────────────────────────────────────────────────────────

pub struct PeriodicTask {
    name: String,
    period: Duration,
    profile: ExecutionProfile,
    logic: Box<dyn StageLogic>,
    clock: Arc<dyn Clock>,
    cpu_hold: Arc<dyn Hold>,
    offload_hold: Arc<dyn Hold>,
    inputs: Vec<Box<dyn ExchangeReader>>,
    input_bufs: Vec<Vec<u8>>,
    output: Option<Box<dyn ExchangeWriter>>,
    out_buf: Vec<u8>,
    tracer: Option<LatencyTracer>,
    rng: StdRng,
    /// Created on the first step, never reset.
    schedule: Option<Schedule>,
}

impl PeriodicTask {
    pub fn builder(
        name: impl Into<String>,
        period: Duration,
        profile: ExecutionProfile,
        logic: Box<dyn StageLogic>,
    ) -> PeriodicTaskBuilder {
        PeriodicTaskBuilder {
            name: name.into(),
            period,
            profile,
            logic,
            clock: Arc::new(MonotonicClock),
            cpu_hold: Arc::new(BusyHold),
            offload_hold: Arc::new(SleepHold),
            inputs: Vec::new(),
            output: None,
            tracer: None,
            seed: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Next scheduled wake, once the first cycle has started.
    pub fn next_wake(&self) -> Option<Timespec> {
        self.schedule.map(|s| s.next_wake())
    }

    /// Most recently published output message.
    pub fn last_output(&self) -> &[u8] {
        &self.out_buf
    }

    fn channel_err(&self, source: ChannelError) -> RunnerError {
        RunnerError::Channel {
            task: self.name.clone(),
            source,
        }
    }

    /// Run one cycle.
    pub fn step(&mut self) -> Result<CycleReport, RunnerError> {
        let clock = Arc::clone(&self.clock);
        let period = self.period;
        let schedule = *self
            .schedule
            .get_or_insert_with(|| Schedule::new(period, clock.now()));

        // WAKE
        let wake = schedule.next_wake();
        clock.sleep_until(wake);
        let started = clock.now();

        // ACQUIRE
        for i in 0..self.inputs.len() {
            if let Err(e) = self.inputs[i].snapshot_into(&mut self.input_bufs[i]) {
                return Err(self.channel_err(e));
            }
        }
        let received = clock.now();

        // EXECUTE
        let mut phases = Vec::with_capacity(self.profile.phases().len());
        let mut phase_start = received;
        for phase in self.profile.phases() {
            let sampled = phase.bounds.sample(&mut self.rng);
            let hold = match phase.kind {
                PhaseKind::Cpu => &self.cpu_hold,
                PhaseKind::Offload => &self.offload_hold,
            };
            hold.hold_until(&*clock, phase_start.add_duration(sampled));
            let overrun = phase.bounds.is_overrun(sampled);
            if overrun {
                info!(
                    task = %self.name,
                    phase = %phase.name,
                    sampled_us = sampled.as_micros() as u64,
                    worst_us = phase.bounds.max().as_micros() as u64,
                    "WCET overrun sampled"
                );
            }
            phases.push(PhaseSample {
                name: phase.name.clone(),
                kind: phase.kind,
                sampled,
                overrun,
            });
            phase_start = clock.now();
        }
        let sent = phase_start;

        // PRODUCE
        if let Some(output) = self.output.as_mut() {
            let times = CycleTimes {
                wake,
                started,
                received,
                sent,
            };
            self.logic
                .produce(&self.input_bufs, &times, &mut self.out_buf)
                .map_err(|source| RunnerError::Stage {
                    task: self.name.clone(),
                    source,
                })?;
            if let Err(e) = output.publish(&self.out_buf) {
                return Err(self.channel_err(e));
            }
        }
        let finished = clock.now();

        // TRACE
        let mut traced = 0;
        if let Some(tracer) = self.tracer.as_mut() {
            let local = LocalTimes {
                wake,
                recv: received,
                end: finished,
            };
            match tracer.trace_cycle(&self.input_bufs, &local) {
                Ok(n) => traced = n,
                Err(e) => warn!(task = %self.name, "latency trace failed: {e}"),
            }
        }

        // ADVANCE
        let cycle = schedule.cycle();
        if let Some(s) = self.schedule.as_mut() {
            s.advance();
        }

        let report = CycleReport {
            cycle,
            wake,
            started,
            received,
            sent,
            finished,
            execution: sent.saturating_duration_since(received),
            response: finished.saturating_duration_since(wake),
            overrun: phases.iter().any(|p| p.overrun),
            phases,
            traced,
        };
        debug!(
            task = %self.name,
            cycle,
            wake_ms = format_args!("{:.3}", wake.as_millis_f64()),
            started_ms = format_args!("{:.3}", started.as_millis_f64()),
            received_ms = format_args!("{:.3}", received.as_millis_f64()),
            sent_ms = format_args!("{:.3}", sent.as_millis_f64()),
            execution_ms = format_args!("{:.3}", report.execution.as_secs_f64() * 1e3),
            response_ms = format_args!("{:.3}", report.response.as_secs_f64() * 1e3),
            "cycle complete"
        );
        Ok(report)
    }

    /// Run `n` cycles and collect their reports.
    pub fn run_cycles(&mut self, n: u64) -> Result<Vec<CycleReport>, RunnerError> {
        (0..n).map(|_| self.step()).collect()
    }

    /// Run until a channel fails.  Never returns `Ok`.
    pub fn run(&mut self) -> Result<Infallible, RunnerError> {
        info!(
            task = %self.name,
            kind = self.logic.kind(),
            period_ms = self.period.as_millis() as u64,
            inputs = self.inputs.len(),
            output = self.output.as_ref().map(|o| o.name()).unwrap_or("-"),
            "periodic task started"
        );
        loop {
            self.step()?;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
