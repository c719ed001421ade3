/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use chainbench::affinity;
use chainbench::analysis;
use chainbench::config::DeploymentConfig;
use chainbench::deploy::{self, RunOptions, Transport};

// ── CLI argument definition ───────────────────────────────────────────────────

/// Periodic task-chain emulator.
///
/// Example (one process per stage, upstream first):
///   chainbench run sfm --transport shm &
///   chainbench run planner --transport shm &
///   chainbench run dasm --transport shm --log-dir logs
///   chainbench analyze "logs/log_Chain 3_shm.txt" --period-ms 5
#[derive(Debug, Parser)]
#[command(
    name = "chainbench",
    about = "Periodic task-chain emulator – end-to-end latency benchmark",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one stage of the deployment until its channels fail.
    Run {
        /// Stage name, e.g. sfm, planner, dasm.
        stage: String,

        /// YAML deployment file.  The built-in reference deployment is used
        /// when omitted.
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,

        /// Exchange channel realization.
        #[arg(short = 't', long = "transport", value_enum, default_value_t = Transport::Shm)]
        transport: Transport,

        /// Directory for the per-chain trace logs.
        #[arg(short = 'l', long = "log-dir", default_value = ".")]
        log_dir: PathBuf,

        /// Do not pin the process to the stage's CPU core.
        #[arg(long = "no-pin", default_value_t = false)]
        no_pin: bool,

        /// Fixed seed for execution-time sampling.
        #[arg(long = "seed")]
        seed: Option<u64>,
    },

    /// Summarise one or more trace logs.
    Analyze {
        /// Trace log files written by a tracing stage.
        #[arg(required = true)]
        logs: Vec<PathBuf>,

        /// Period of the tracing stage, in milliseconds.
        #[arg(short = 'p', long = "period-ms")]
        period_ms: f64,

        /// Histogram bin width, in microseconds.
        #[arg(short = 'w', long = "bin-width-us", default_value_t = 1000.0)]
        bin_width_us: f64,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run {
            stage,
            config,
            transport,
            log_dir,
            no_pin,
            seed,
        } => run_stage(
            &stage,
            config,
            no_pin,
            RunOptions {
                transport,
                log_dir,
                seed,
            },
        ),
        Command::Analyze {
            logs,
            period_ms,
            bin_width_us,
        } => analyze(&logs, period_ms, bin_width_us),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        process::exit(1);
    }
}

fn load_deployment(config: Option<PathBuf>) -> Result<DeploymentConfig> {
    match config {
        Some(path) => DeploymentConfig::load_from_file(&path),
        None => {
            info!("No deployment file provided, using the built-in reference deployment");
            let cfg = DeploymentConfig::reference();
            cfg.validate().context("built-in reference deployment")?;
            Ok(cfg)
        }
    }
}

fn run_stage(stage: &str, config: Option<PathBuf>, no_pin: bool, opts: RunOptions) -> Result<()> {
    let cfg = load_deployment(config)?;
    let stage_cfg = cfg
        .stage(stage)
        .with_context(|| format!("no stage named '{stage}' in the deployment"))?;

    info!(
        stage,
        transport = %opts.transport,
        log_dir   = %opts.log_dir.display(),
        core      = ?stage_cfg.core,
        seed      = ?opts.seed,
        "Configuration"
    );

    match (stage_cfg.core, no_pin) {
        (Some(core), false) => affinity::pin_to_core(core)
            .with_context(|| format!("Failed to pin stage '{stage}' to core {core}"))?,
        (Some(_), true) => warn!("CPU pinning disabled by --no-pin"),
        (None, _) => {}
    }

    std::fs::create_dir_all(&opts.log_dir)
        .with_context(|| format!("Cannot create log directory: {}", opts.log_dir.display()))?;

    let mut task = deploy::build_task(&cfg, stage, &opts)?;
    match task.run() {
        Ok(never) => match never {},
        Err(e) => Err(e.into()),
    }
}

fn analyze(logs: &[PathBuf], period_ms: f64, bin_width_us: f64) -> Result<()> {
    for path in logs {
        let report = analysis::analyze_file(path, period_ms, bin_width_us)
            .with_context(|| format!("Failed to analyse {}", path.display()))?;
        println!("== {} ==", path.display());
        println!("{report}");
    }
    Ok(())
}
