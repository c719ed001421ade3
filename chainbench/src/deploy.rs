/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Turn one [`StageConfig`] into a runnable [`PeriodicTask`].
//!
//! Channel open order matters for start-up:
//!
//! * shm – the output region is created first, then inputs are opened.
//!   Readers fail fast if their producer has not created the region yet,
//!   so stages must be started upstream first.
//! * tcp – inputs are set up before the output.  With the reference
//!   deployment every consumer listens, so a stage's listeners are bound
//!   before it blocks connecting downstream.

use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::ValueEnum;
use tracing::info;

use crate::channel::{
    Endpoint, ExchangeReader, ExchangeWriter, ShmReader, ShmWriter, StreamPublisher, StreamReceiver,
};
use crate::config::{ChannelConfig, DeploymentConfig, ListenerSide, StageConfig, StageRole};
use crate::runner::{PeriodicTask, PeriodicTaskBuilder};
use crate::stage::{RelayStage, SinkStage, SourceStage, Splice, StageLogic};
use crate::tracer::{FileTraceSink, LatencyTracer, TraceSink, TracedChain};

// ── Transport ─────────────────────────────────────────────────────────────────

/// How exchange channels are realized between processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Transport {
    /// POSIX shared memory plus a named semaphore.
    Shm,
    /// One TCP connection per channel.
    Tcp,
}

impl Transport {
    /// Suffix used in trace log file names.
    pub fn suffix(self) -> &'static str {
        match self {
            Transport::Shm => "shm",
            Transport::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

// ── Options ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub transport: Transport,
    /// Directory the per-chain trace logs are appended to.
    pub log_dir: PathBuf,
    /// Fixed sampler seed.
    pub seed: Option<u64>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            transport: Transport::Shm,
            log_dir: PathBuf::from("."),
            seed: None,
        }
    }
}

/// Opened channel ends of one stage, inputs in configuration order.
pub struct StageChannels {
    pub inputs: Vec<Box<dyn ExchangeReader>>,
    pub output: Option<Box<dyn ExchangeWriter>>,
}

// ── Channels ──────────────────────────────────────────────────────────────────

fn channel_config<'a>(cfg: &'a DeploymentConfig, name: &str) -> Result<&'a ChannelConfig> {
    cfg.channel(name)
        .with_context(|| format!("unknown channel '{name}'"))
}

fn endpoint(ch: &ChannelConfig, host: IpAddr, side: ListenerSide) -> Endpoint {
    let addr = ch.socket_addr(host);
    if ch.listener == side {
        Endpoint::Listen(addr)
    } else {
        Endpoint::Connect(addr)
    }
}

fn open_reader(ch: &ChannelConfig, host: IpAddr, transport: Transport) -> Result<Box<dyn ExchangeReader>> {
    let reader: Box<dyn ExchangeReader> = match transport {
        Transport::Shm => Box::new(
            ShmReader::open(&ch.shm_name(), &ch.sem_name(), ch.size)
                .with_context(|| format!("opening input '{}' (is its producer running?)", ch.name))?,
        ),
        Transport::Tcp => {
            let ep = endpoint(ch, host, ListenerSide::Consumer);
            info!(channel = %ch.name, %ep, "opening stream input");
            Box::new(
                StreamReceiver::open(&ch.name, ep, ch.size)
                    .with_context(|| format!("opening input '{}'", ch.name))?,
            )
        }
    };
    Ok(reader)
}

fn open_writer(ch: &ChannelConfig, host: IpAddr, transport: Transport) -> Result<Box<dyn ExchangeWriter>> {
    let writer: Box<dyn ExchangeWriter> = match transport {
        Transport::Shm => Box::new(
            ShmWriter::create(&ch.shm_name(), &ch.sem_name(), ch.size)
                .with_context(|| format!("creating output '{}'", ch.name))?,
        ),
        Transport::Tcp => {
            let ep = endpoint(ch, host, ListenerSide::Producer);
            info!(channel = %ch.name, %ep, "opening stream output");
            Box::new(
                StreamPublisher::open(&ch.name, ep, ch.size)
                    .with_context(|| format!("opening output '{}'", ch.name))?,
            )
        }
    };
    Ok(writer)
}

/// Open every channel `stage` touches over `transport`.
pub fn open_channels(cfg: &DeploymentConfig, stage: &StageConfig, transport: Transport) -> Result<StageChannels> {
    let output_cfg = stage
        .output
        .as_deref()
        .map(|name| channel_config(cfg, name))
        .transpose()?;
    let input_cfgs = stage
        .inputs
        .iter()
        .map(|name| channel_config(cfg, name))
        .collect::<Result<Vec<_>>>()?;

    let open_inputs = || {
        input_cfgs
            .iter()
            .map(|ch| open_reader(ch, cfg.host, transport))
            .collect::<Result<Vec<_>>>()
    };
    let open_output = || {
        output_cfg
            .map(|ch| open_writer(ch, cfg.host, transport))
            .transpose()
    };

    let (inputs, output) = match transport {
        Transport::Shm => {
            let output = open_output()?;
            (open_inputs()?, output)
        }
        Transport::Tcp => {
            let inputs = open_inputs()?;
            (inputs, open_output()?)
        }
    };
    info!(
        stage = %stage.name,
        %transport,
        inputs = inputs.len(),
        output = output.is_some(),
        "channels open"
    );
    Ok(StageChannels { inputs, output })
}

// ── Stage wiring ──────────────────────────────────────────────────────────────

/// Per-cycle behaviour for `stage`'s role.
pub fn build_logic(stage: &StageConfig) -> Result<Box<dyn StageLogic>> {
    let logic: Box<dyn StageLogic> = match stage.role {
        StageRole::Source => Box::new(SourceStage::new(stage.level, stage.chains.clone())),
        StageRole::Relay => {
            let mut splices = Vec::new();
            for sp in &stage.splices {
                let input = stage
                    .input_index(&sp.input)
                    .with_context(|| format!("splice input '{}' is not a stage input", sp.input))?;
                splices.extend(sp.chains.iter().map(|chain| Splice {
                    input,
                    chain: *chain,
                }));
            }
            Box::new(RelayStage::new(stage.level, splices))
        }
        StageRole::Sink => Box::new(SinkStage),
    };
    Ok(logic)
}

/// Latency tracer for `stage`, or `None` when it traces nothing.
pub fn build_tracer(stage: &StageConfig, sink: Arc<dyn TraceSink>) -> Result<Option<LatencyTracer>> {
    if stage.trace.is_empty() {
        return Ok(None);
    }
    let chains = stage
        .trace
        .iter()
        .map(|t| {
            let input = match &t.input {
                Some(name) => stage
                    .input_index(name)
                    .with_context(|| format!("trace input '{name}' is not a stage input"))?,
                None => 0,
            };
            Ok(TracedChain {
                name: t.name.clone(),
                chain: t.chain,
                origin: t.origin,
                input,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(LatencyTracer::new(stage.level, chains, sink)))
}

/// Builder for `stage` over already-opened channels.  Clock, holds and
/// seed are left for the caller.
pub fn assemble(
    stage: &StageConfig,
    channels: StageChannels,
    trace_sink: Arc<dyn TraceSink>,
) -> Result<PeriodicTaskBuilder> {
    let profile = stage
        .profile()
        .with_context(|| format!("stage '{}': invalid execution phases", stage.name))?;
    let logic = build_logic(stage)?;

    let mut builder = PeriodicTask::builder(&stage.name, stage.period(), profile, logic);
    for input in channels.inputs {
        builder = builder.input(input);
    }
    if let Some(output) = channels.output {
        builder = builder.output(output);
    }
    if let Some(tracer) = build_tracer(stage, trace_sink)? {
        builder = builder.tracer(tracer);
    }
    Ok(builder)
}

/// Open the channels of `stage_name` and build its task.
pub fn build_task(cfg: &DeploymentConfig, stage_name: &str, opts: &RunOptions) -> Result<PeriodicTask> {
    let stage = cfg
        .stage(stage_name)
        .with_context(|| format!("no stage named '{stage_name}' in the deployment"))?;
    info!(
        stage = %stage.name,
        role = ?stage.role,
        level = stage.level.get(),
        period_ms = stage.period_ms,
        "building task"
    );

    let channels = open_channels(cfg, stage, opts.transport)?;
    let sink = Arc::new(FileTraceSink::new(&opts.log_dir, opts.transport.suffix()));
    let mut builder = assemble(stage, channels, sink)?;
    if let Some(seed) = opts.seed {
        builder = builder.seed(seed);
    }
    Ok(builder.build())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::local_channel;
    use crate::hold::NoHold;
    use crate::layout::{ChainId, Level};
    use crate::record::StageRecord;
    use crate::time::{ManualClock, Timespec};
    use crate::tracer::MemoryTraceSink;

    fn reference_stage(name: &str) -> StageConfig {
        DeploymentConfig::reference().stage(name).unwrap().clone()
    }

    #[test]
    fn transport_suffix_names_log_files() {
        assert_eq!(Transport::Shm.to_string(), "shm");
        assert_eq!(Transport::Tcp.to_string(), "tcp");
    }

    #[test]
    fn endpoint_side_follows_listener() {
        let cfg = DeploymentConfig::reference();
        let ch = cfg.channel("sfm_planner").unwrap();
        let host = cfg.host;
        assert!(matches!(endpoint(ch, host, ListenerSide::Consumer), Endpoint::Listen(_)));
        assert!(matches!(endpoint(ch, host, ListenerSide::Producer), Endpoint::Connect(_)));
    }

    #[test]
    fn relay_splices_map_to_input_indexes() {
        let planner = reference_stage("planner");
        let logic = build_logic(&planner).unwrap();
        assert_eq!(logic.kind(), "relay");
    }

    #[test]
    fn sink_tracer_defaults_to_first_input() {
        let dasm = reference_stage("dasm");
        let tracer = build_tracer(&dasm, Arc::new(MemoryTraceSink::new()))
            .unwrap()
            .unwrap();
        let chains: Vec<_> = tracer.chains().collect();
        assert_eq!(chains.len(), 5);
        assert!(chains.iter().all(|c| c.input == 0));
        assert_eq!(chains[2].chain, ChainId::new(3).unwrap());
    }

    #[test]
    fn source_has_no_tracer() {
        let sfm = reference_stage("sfm");
        assert!(build_tracer(&sfm, Arc::new(MemoryTraceSink::new())).unwrap().is_none());
    }

    #[test]
    fn unknown_stage_is_an_error() {
        let err = build_task(&DeploymentConfig::reference(), "nope", &RunOptions::default())
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("nope"));
    }

    #[test]
    fn assembled_source_publishes_its_record() {
        let sfm = reference_stage("sfm");
        let size = DeploymentConfig::reference().channel("sfm_planner").unwrap().size;
        let (tx, mut rx) = local_channel("sfm_planner", size);
        let channels = StageChannels {
            inputs: Vec::new(),
            output: Some(Box::new(tx)),
        };

        let clock = Arc::new(ManualClock::new(Timespec::from_millis(1_000)));
        let mut task = assemble(&sfm, channels, Arc::new(MemoryTraceSink::new()))
            .unwrap()
            .clock(clock)
            .cpu_hold(Arc::new(NoHold))
            .offload_hold(Arc::new(NoHold))
            .seed(1)
            .build();
        task.step().unwrap();

        let snap = rx.snapshot().unwrap();
        let rec = StageRecord::read_at(&snap, ChainId::new(3).unwrap(), Level::new(3).unwrap()).unwrap();
        assert_eq!(rec.id, 1);
        assert_eq!(rec.wake, Timespec::from_millis(1_000));
    }
}
