/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! pipeline-sim – runs a whole deployment inside one process.
//!
//! Every stage gets its own thread and every channel becomes an in-process
//! slot, so the chain can be exercised without shared memory, sockets or
//! core pinning.  After `--seconds` the stages are stopped and the sink's
//! trace logs are analysed.
//!
//! Usage:
//!   pipeline-sim [--config deploy.yaml] [--seconds 5] [--busy] [--log-dir DIR]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use chainbench::analysis;
use chainbench::channel::{local_channel, ExchangeReader, ExchangeWriter, LocalReader, LocalWriter};
use chainbench::config::{DeploymentConfig, StageConfig};
use chainbench::deploy::{self, StageChannels};
use chainbench::hold::{BusyHold, Hold, SleepHold};
use chainbench::tracer::FileTraceSink;

/// Log file suffix for simulated runs.
const LOG_SUFFIX: &str = "sim";

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "pipeline-sim", about = "In-process chainbench pipeline simulator")]
struct Cli {
    /// YAML deployment file (built-in reference deployment when omitted).
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Wall-clock run time in seconds.
    #[arg(short = 's', long = "seconds", default_value_t = 5)]
    seconds: u64,

    /// Busy-spin CPU phases instead of sleeping through them.
    #[arg(long = "busy", default_value_t = false)]
    busy: bool,

    /// Keep trace logs here instead of a temporary directory.
    #[arg(short = 'l', long = "log-dir")]
    log_dir: Option<PathBuf>,

    /// Histogram bin width in microseconds.
    #[arg(short = 'w', long = "bin-width-us", default_value_t = 1000.0)]
    bin_width_us: f64,
}

// ── Channels ──────────────────────────────────────────────────────────────────

struct LocalChannels {
    writers: HashMap<String, LocalWriter>,
    readers: HashMap<String, LocalReader>,
}

impl LocalChannels {
    fn new(cfg: &DeploymentConfig) -> Self {
        let mut writers = HashMap::new();
        let mut readers = HashMap::new();
        for ch in &cfg.channels {
            let (w, r) = local_channel(&ch.name, ch.size);
            writers.insert(ch.name.clone(), w);
            readers.insert(ch.name.clone(), r);
        }
        Self { writers, readers }
    }

    fn take_for(&mut self, stage: &StageConfig) -> Result<StageChannels> {
        let inputs = stage
            .inputs
            .iter()
            .map(|name| {
                self.readers
                    .remove(name)
                    .map(|r| Box::new(r) as Box<dyn ExchangeReader>)
                    .with_context(|| format!("channel '{name}' has no free reader"))
            })
            .collect::<Result<Vec<_>>>()?;
        let output = stage
            .output
            .as_ref()
            .map(|name| {
                self.writers
                    .remove(name)
                    .map(|w| Box::new(w) as Box<dyn ExchangeWriter>)
                    .with_context(|| format!("channel '{name}' has no free writer"))
            })
            .transpose()?;
        Ok(StageChannels { inputs, output })
    }
}

// ── Simulation ────────────────────────────────────────────────────────────────

fn simulate(cli: &Cli, cfg: &DeploymentConfig, log_dir: &Path) -> Result<()> {
    let mut channels = LocalChannels::new(cfg);
    let sink = Arc::new(FileTraceSink::new(log_dir, LOG_SUFFIX));
    let cpu_hold: Arc<dyn Hold> = if cli.busy {
        Arc::new(BusyHold)
    } else {
        Arc::new(SleepHold)
    };
    let stop = Arc::new(AtomicBool::new(false));

    let mut handles = Vec::new();
    for stage in &cfg.stages {
        let mut task = deploy::assemble(stage, channels.take_for(stage)?, sink.clone())?
            .cpu_hold(cpu_hold.clone())
            .build();
        let stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(format!("stage-{}", stage.name))
            .spawn(move || {
                let mut cycles = 0u64;
                let mut overruns = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    match task.step() {
                        Ok(report) => {
                            cycles += 1;
                            overruns += u64::from(report.overrun);
                        }
                        Err(e) => {
                            // Upstream threads exiting close their channels.
                            if !stop.load(Ordering::Relaxed) {
                                error!("{e}");
                            }
                            break;
                        }
                    }
                }
                info!(stage = task.name(), cycles, overruns, "stage stopped");
            })
            .with_context(|| format!("spawning stage '{}'", stage.name))?;
        handles.push(handle);
    }

    info!(
        stages = handles.len(),
        seconds = cli.seconds,
        busy = cli.busy,
        log_dir = %log_dir.display(),
        "simulation running"
    );
    thread::sleep(Duration::from_secs(cli.seconds));
    stop.store(true, Ordering::Relaxed);

    for h in handles {
        if h.join().is_err() {
            warn!("a stage thread panicked");
        }
    }
    Ok(())
}

fn report(cfg: &DeploymentConfig, log_dir: &Path, bin_width_us: f64) {
    let sink = FileTraceSink::new(log_dir, LOG_SUFFIX);
    for stage in cfg.stages.iter().filter(|s| !s.trace.is_empty()) {
        for t in &stage.trace {
            let path = sink.path_for(&t.name);
            match analysis::analyze_file(&path, stage.period_ms as f64, bin_width_us) {
                Ok(r) => {
                    println!("== {} ({}) ==", t.name, stage.name);
                    println!("{r}");
                }
                Err(e) => warn!(chain = %t.name, "no analysis: {e}"),
            }
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let cfg = match &cli.config {
        Some(path) => DeploymentConfig::load_from_file(path)?,
        None => {
            let cfg = DeploymentConfig::reference();
            cfg.validate().context("built-in reference deployment")?;
            cfg
        }
    };

    // Keep the temporary directory alive until the report is printed.
    let tmp;
    let log_dir = match &cli.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create log directory: {}", dir.display()))?;
            dir.clone()
        }
        None => {
            tmp = tempfile::tempdir().context("Cannot create temporary log directory")?;
            tmp.path().to_path_buf()
        }
    };

    simulate(&cli, &cfg, &log_dir)?;
    report(&cfg, &log_dir, cli.bin_width_us);
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(Cli::parse()) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
