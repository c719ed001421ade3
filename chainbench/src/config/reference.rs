/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Built-in reference deployment.
//!
//! ```text
//!  ekf (10 ms) ──┐ chains 1,2
//!  sfm (33 ms) ──┤ chain 3
//!  lane (66 ms) ─┼──► planner (15 ms) ──► dasm (5 ms)
//!  detection ────┘ chain 5          level 2          level 1
//!  (200 ms)        level 3
//! ```

use super::{
    default_host, ChannelConfig, DeploymentConfig, ListenerSide, PhaseConfig, SpliceConfig,
    StageConfig, StageRole, TraceConfig, DEFAULT_FREQUENCY_GHZ,
};
use crate::layout::{ChainId, Level};
use crate::wcet::PhaseKind;

/// Accelerator clock used by offloaded phases.
pub const OFFLOAD_FREQUENCY_GHZ: f64 = 1.3;

fn chain(i: u8) -> ChainId {
    ChainId::known(i)
}

fn level(l: u8) -> Level {
    Level::known(l)
}

fn channel(name: &str, size: usize, port: u16) -> ChannelConfig {
    ChannelConfig {
        name: name.to_string(),
        size,
        port,
        listener: ListenerSide::Consumer,
    }
}

fn cpu(name: &str, best: u64, avg: u64, worst: u64) -> PhaseConfig {
    PhaseConfig {
        name: name.to_string(),
        kind: PhaseKind::Cpu,
        best,
        avg,
        worst,
        frequency_ghz: None,
    }
}

fn offload(name: &str, best: u64, avg: u64, worst: u64) -> PhaseConfig {
    PhaseConfig {
        name: name.to_string(),
        kind: PhaseKind::Offload,
        best,
        avg,
        worst,
        frequency_ghz: Some(OFFLOAD_FREQUENCY_GHZ),
    }
}

fn source(
    name: &str,
    period_ms: u64,
    core: usize,
    chains: &[u8],
    output: &str,
    phases: Vec<PhaseConfig>,
) -> StageConfig {
    StageConfig {
        name: name.to_string(),
        role: StageRole::Source,
        level: level(3),
        period_ms,
        core: Some(core),
        frequency_ghz: DEFAULT_FREQUENCY_GHZ,
        phases,
        chains: chains.iter().map(|c| chain(*c)).collect(),
        inputs: Vec::new(),
        splices: Vec::new(),
        output: Some(output.to_string()),
        trace: Vec::new(),
    }
}

fn trace(i: u8) -> TraceConfig {
    TraceConfig {
        name: format!("Chain {i}"),
        chain: chain(i),
        origin: level(3),
        input: None,
    }
}

impl DeploymentConfig {
    /// Five-stage pipeline with the measured execution bounds.
    pub fn reference() -> Self {
        let channels = vec![
            channel("planner_dasm", 2048, 5555),
            channel("sfm_planner", 24 * 1024, 5556),
            channel("lane_planner", 32 * 1024, 5557),
            channel("detection_planner", 750 * 1024, 5558),
            channel("ekf_planner", 5 * 1024, 5559),
        ];

        let splice = |input: &str, chains: &[u8]| SpliceConfig {
            input: input.to_string(),
            chains: chains.iter().map(|c| chain(*c)).collect(),
        };

        let stages = vec![
            source(
                "ekf",
                10,
                2,
                &[1, 2],
                "ekf_planner",
                vec![cpu("estimate", 3_400_000, 5_100_000, 6_800_000)],
            ),
            source(
                "sfm",
                33,
                3,
                &[3],
                "sfm_planner",
                vec![
                    cpu("preprocess", 5_878_560, 6_977_531, 7_459_318),
                    offload("function", 10_575_000, 10_800_000, 11_850_000),
                    cpu("postprocess", 6_773_920, 7_213_436, 8_347_392),
                ],
            ),
            source(
                "lane",
                66,
                2,
                &[4],
                "lane_planner",
                vec![cpu("detect", 17_000_000, 20_400_000, 23_800_000)],
            ),
            source(
                "detection",
                200,
                2,
                &[5],
                "detection_planner",
                vec![cpu("detect", 34_000_000, 40_800_000, 47_600_000)],
            ),
            StageConfig {
                name: "planner".to_string(),
                role: StageRole::Relay,
                level: Level::PLANNING,
                period_ms: 15,
                core: Some(1),
                frequency_ghz: DEFAULT_FREQUENCY_GHZ,
                phases: vec![cpu("plan", 19_243_822, 22_743_822, 26_483_822)],
                chains: Vec::new(),
                inputs: vec![
                    "ekf_planner".to_string(),
                    "sfm_planner".to_string(),
                    "lane_planner".to_string(),
                    "detection_planner".to_string(),
                ],
                splices: vec![
                    splice("ekf_planner", &[1, 2]),
                    splice("sfm_planner", &[3]),
                    splice("lane_planner", &[4]),
                    splice("detection_planner", &[5]),
                ],
                output: Some("planner_dasm".to_string()),
                trace: Vec::new(),
            },
            StageConfig {
                name: "dasm".to_string(),
                role: StageRole::Sink,
                level: Level::SINK,
                period_ms: 5,
                core: Some(0),
                frequency_ghz: DEFAULT_FREQUENCY_GHZ,
                phases: vec![cpu("actuate", 2_599_990, 3_219_990, 3_719_990)],
                chains: Vec::new(),
                inputs: vec!["planner_dasm".to_string()],
                splices: Vec::new(),
                output: None,
                trace: (1..=5).map(trace).collect(),
            },
        ];

        Self {
            host: default_host(),
            channels,
            stages,
        }
    }
}
