/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! chainbench – periodic task-chain emulator for end-to-end latency studies
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── time          – Timespec, Clock seam, CLOCK_MONOTONIC clock
//! ├── wcet/         – WCET bounds, three-point sampler, execution profiles
//! ├── layout        – chain slot / record offsets
//! ├── record        – stage record codec, identifier sequence
//! ├── channel/      – exchange channels (in-process, shm, tcp)
//! ├── hold          – busy / sleep / no-op execution holds
//! ├── schedule      – drift-free absolute wake schedule
//! ├── stage         – source, relay and sink cycle logic
//! ├── tracer        – latency tracer and trace log sinks
//! ├── runner        – periodic task state machine
//! ├── analysis      – offline trace log analyser
//! ├── config/       – YAML deployment + built-in reference deployment
//! ├── deploy        – stage config → runnable task
//! └── affinity      – CPU core pinning
//! ```

pub mod affinity;
pub mod analysis;
pub mod channel;
pub mod config;
pub mod deploy;
pub mod hold;
pub mod layout;
pub mod record;
pub mod runner;
pub mod schedule;
pub mod stage;
pub mod time;
pub mod tracer;
pub mod wcet;
