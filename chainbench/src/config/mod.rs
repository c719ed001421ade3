/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Deployment configuration.
//!
//! A deployment names every stage of the pipeline and every channel between
//! two stages.  Built-in constants are available through
//! [`DeploymentConfig::reference`]; a YAML file with the same shape can
//! replace them:
//!
//! ```yaml
//! host: 127.0.0.1
//! channels:
//!   - { name: sfm_planner, size: 24576, port: 5556 }
//!   - { name: planner_dasm, size: 2048, port: 5555 }
//! stages:
//!   - name: sfm
//!     role: source
//!     level: 3
//!     period_ms: 33
//!     core: 3
//!     chains: [3]
//!     output: sfm_planner
//!     phases:
//!       - { name: preprocess, kind: cpu, best: 5878560, avg: 6977531, worst: 7459318 }
//!       - { name: function, kind: offload, best: 10575000, avg: 10800000, worst: 11850000, frequency_ghz: 1.3 }
//!   - name: planner
//!     role: relay
//!     level: 2
//!     period_ms: 15
//!     inputs: [sfm_planner]
//!     splices:
//!       - { input: sfm_planner, chains: [3] }
//!     output: planner_dasm
//!     phases:
//!       - { name: plan, best: 19243822, avg: 22743822, worst: 26483822 }
//!   - name: dasm
//!     role: sink
//!     level: 1
//!     period_ms: 5
//!     inputs: [planner_dasm]
//!     trace:
//!       - { name: "Chain 3", chain: 3, origin: 3 }
//!     phases:
//!       - { name: actuate, best: 2599990, avg: 3219990, worst: 3719990 }
//! ```
//!
//! Execution bounds are processor tick counts; they are converted to time
//! with the phase's `frequency_ghz`, falling back to the stage's.

mod reference;

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, ensure, Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::layout::{self, ChainId, Level, RECORD_SIZE};
use crate::wcet::{ExecutionProfile, Phase, PhaseKind, WcetBounds, WcetError};

/// Clock frequency assumed when a stage does not give one.
pub const DEFAULT_FREQUENCY_GHZ: f64 = 3.4;

/// Longest accepted stage period: one hour.
pub const MAX_PERIOD_MS: u64 = 3_600_000;

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_frequency() -> f64 {
    DEFAULT_FREQUENCY_GHZ
}

// ── Channels ──────────────────────────────────────────────────────────────────

/// Which side of a stream channel binds the port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerSide {
    #[default]
    Consumer,
    Producer,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChannelConfig {
    /// Conventionally `<producer>_<consumer>`.
    pub name: String,
    /// Full message size in bytes.
    pub size: usize,
    /// TCP port used by the stream transport.
    pub port: u16,
    #[serde(default)]
    pub listener: ListenerSide,
}

impl ChannelConfig {
    /// Shared-memory object name, e.g. `/sfm_planner_shm`.
    pub fn shm_name(&self) -> String {
        format!("/{}_shm", self.name)
    }

    /// Semaphore name, e.g. `/sfm_planner_sem`.
    pub fn sem_name(&self) -> String {
        format!("/{}_sem", self.name)
    }

    pub fn socket_addr(&self, host: IpAddr) -> SocketAddr {
        SocketAddr::new(host, self.port)
    }
}

// ── Stages ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageRole {
    /// Originates chains; has no inputs.
    Source,
    /// Forwards upstream slots and stamps its own level.
    Relay,
    /// Terminal stage; traces latency, publishes nothing.
    Sink,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PhaseConfig {
    pub name: String,
    #[serde(default)]
    pub kind: PhaseKind,
    pub best: u64,
    pub avg: u64,
    pub worst: u64,
    /// Overrides the stage frequency for this phase (e.g. an accelerator).
    #[serde(default)]
    pub frequency_ghz: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpliceConfig {
    /// Input channel the slots are copied from.
    pub input: String,
    pub chains: Vec<ChainId>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TraceConfig {
    /// Log name, e.g. `"Chain 3"`.
    pub name: String,
    pub chain: ChainId,
    pub origin: Level,
    /// Input channel carrying the chain; defaults to the first input.
    #[serde(default)]
    pub input: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StageConfig {
    pub name: String,
    pub role: StageRole,
    pub level: Level,
    pub period_ms: u64,
    /// CPU core to pin the process to.
    #[serde(default)]
    pub core: Option<usize>,
    #[serde(default = "default_frequency")]
    pub frequency_ghz: f64,
    pub phases: Vec<PhaseConfig>,
    /// Chains a source originates.
    #[serde(default)]
    pub chains: Vec<ChainId>,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub splices: Vec<SpliceConfig>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub trace: Vec<TraceConfig>,
}

impl StageConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    /// Convert the tick bounds of every phase to an [`ExecutionProfile`].
    pub fn profile(&self) -> Result<ExecutionProfile, WcetError> {
        let phases = self
            .phases
            .iter()
            .map(|p| {
                let ghz = p.frequency_ghz.unwrap_or(self.frequency_ghz);
                let bounds = WcetBounds::from_ticks(p.best, p.avg, p.worst, ghz)?;
                Ok(Phase {
                    name: p.name.clone(),
                    kind: p.kind,
                    bounds,
                })
            })
            .collect::<Result<Vec<_>, WcetError>>()?;
        ExecutionProfile::new(phases)
    }

    /// Position of `channel` in this stage's input list.
    pub fn input_index(&self, channel: &str) -> Option<usize> {
        self.inputs.iter().position(|c| c == channel)
    }
}

// ── DeploymentConfig ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeploymentConfig {
    /// Address every stream endpoint binds or connects to.
    #[serde(default = "default_host")]
    pub host: IpAddr,
    pub channels: Vec<ChannelConfig>,
    pub stages: Vec<StageConfig>,
}

impl DeploymentConfig {
    /// Parse a YAML document.  Does not validate.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("Failed to parse deployment YAML")
    }

    /// Parse and validate `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, the YAML is malformed,
    /// or [`validate`](Self::validate) rejects it.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading deployment configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;
        let cfg: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;
        cfg.validate()
            .with_context(|| format!("Invalid deployment in {}", path.display()))?;

        info!(
            "Loaded deployment: {} stage(s), {} channel(s)",
            cfg.stages.len(),
            cfg.channels.len()
        );
        for s in &cfg.stages {
            debug!(
                "  Stage: {} | role: {:?} | level: {} | period: {}ms | core: {:?}",
                s.name,
                s.role,
                s.level.get(),
                s.period_ms,
                s.core
            );
        }
        Ok(cfg)
    }

    pub fn stage(&self, name: &str) -> Option<&StageConfig> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| c.name == name)
    }

    /// Stage whose output is `channel`.
    pub fn producer_of(&self, channel: &str) -> Option<&StageConfig> {
        self.stages
            .iter()
            .find(|s| s.output.as_deref() == Some(channel))
    }

    /// Stage that reads `channel`.
    pub fn consumer_of(&self, channel: &str) -> Option<&StageConfig> {
        self.stages
            .iter()
            .find(|s| s.inputs.iter().any(|i| i == channel))
    }

    /// Check internal consistency and layout fit.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.stages.is_empty(), "deployment has no stages");

        let mut seen = HashSet::new();
        for c in &self.channels {
            ensure!(seen.insert(c.name.as_str()), "duplicate channel '{}'", c.name);
            ensure!(c.size > 0, "channel '{}' has zero size", c.name);
        }
        let mut seen = HashSet::new();
        for s in &self.stages {
            ensure!(seen.insert(s.name.as_str()), "duplicate stage '{}'", s.name);
        }

        for c in &self.channels {
            let producers = self
                .stages
                .iter()
                .filter(|s| s.output.as_deref() == Some(c.name.as_str()))
                .count();
            let consumers = self
                .stages
                .iter()
                .filter(|s| s.inputs.contains(&c.name))
                .count();
            ensure!(
                producers <= 1 && consumers <= 1,
                "channel '{}' must have at most one producer and one consumer",
                c.name
            );
            ensure!(
                consumers == 0 || producers == 1,
                "channel '{}' is read but never written",
                c.name
            );
        }

        for s in &self.stages {
            self.validate_stage(s)
                .with_context(|| format!("stage '{}'", s.name))?;
        }
        Ok(())
    }

    fn channel_size(&self, name: &str) -> Result<usize> {
        self.channel(name)
            .map(|c| c.size)
            .with_context(|| format!("unknown channel '{name}'"))
    }

    fn validate_stage(&self, s: &StageConfig) -> Result<()> {
        ensure!(s.period_ms > 0, "period must be positive");
        ensure!(
            s.period_ms <= MAX_PERIOD_MS,
            "period of {} ms exceeds the {MAX_PERIOD_MS} ms limit",
            s.period_ms
        );
        s.profile().context("invalid execution phases")?;

        let mut input_sizes = Vec::with_capacity(s.inputs.len());
        for name in &s.inputs {
            input_sizes.push(self.channel_size(name)?);
        }
        let output_size = s.output.as_deref().map(|o| self.channel_size(o)).transpose()?;

        match s.role {
            StageRole::Source => {
                ensure!(s.inputs.is_empty(), "a source has no inputs");
                ensure!(!s.chains.is_empty(), "a source must originate at least one chain");
                ensure!(!s.level.is_sink(), "a source cannot sit at the sink level");
                let Some(out) = output_size else {
                    bail!("a source needs an output channel");
                };
                for chain in &s.chains {
                    let off = layout::record_offset(*chain, s.level)?;
                    ensure!(
                        off + RECORD_SIZE <= out,
                        "{chain} level {} does not fit output of {out} bytes",
                        s.level.get()
                    );
                }
            }
            StageRole::Relay => {
                ensure!(!s.inputs.is_empty(), "a relay needs inputs");
                ensure!(!s.splices.is_empty(), "a relay needs at least one splice");
                ensure!(!s.level.is_sink(), "a relay cannot sit at the sink level");
                let Some(out) = output_size else {
                    bail!("a relay needs an output channel");
                };
                for sp in &s.splices {
                    let idx = s
                        .input_index(&sp.input)
                        .with_context(|| format!("splice input '{}' is not a stage input", sp.input))?;
                    for chain in &sp.chains {
                        let end = layout::slot_range(*chain).end;
                        ensure!(
                            end <= input_sizes[idx] && end <= out,
                            "{chain} slot does not fit '{}' or the output",
                            sp.input
                        );
                    }
                }
            }
            StageRole::Sink => {
                ensure!(s.output.is_none(), "a sink publishes nothing");
            }
        }

        for t in &s.trace {
            let idx = match &t.input {
                Some(name) => s
                    .input_index(name)
                    .with_context(|| format!("trace input '{name}' is not a stage input"))?,
                None => {
                    ensure!(!s.inputs.is_empty(), "tracing needs an input");
                    0
                }
            };
            ensure!(
                t.origin > s.level,
                "trace '{}' origin level {} must be upstream of level {}",
                t.name,
                t.origin.get(),
                s.level.get()
            );
            let end = layout::record_offset(t.chain, t.origin)? + RECORD_SIZE;
            ensure!(
                end <= input_sizes[idx],
                "trace '{}' reads past the end of its input",
                t.name
            );
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
