/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Latency Tracer.
//!
//! Once per cycle the tracing stage looks at each traced chain's origin
//! record.  When its identifier differs from the one seen last cycle, one
//! block is appended to that chain's trace log:
//!
//! ```text
//! ID = 7, chain_l3_wake_us = 100000.00 us
//! ID = 7, chain_l3_start_us = 105000.00 us
//! ID = 7, chain_l3_send_us = 110000.00 us
//! ID = 7, chain_l2_wake_us = 111000.00 us
//! ID = 7, chain_l2_recv_us = 111500.00 us
//! ID = 7, chain_l2_send_us = 111900.00 us
//! ID = 7, chain_l1_wake_us = 112000.00 us
//! ID = 7, chain_l1_recv_us = 112000.00 us
//! ID = 7, chain_l1_end_us = 120000.00 us
//!
//! ```
//!
//! The origin level's receive field is named `start`, and the tracing
//! stage's own last field is `end`.  Identifier 0 means "nothing produced
//! yet" and is never traced.

use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::debug;

use crate::layout::{ChainId, Level};
use crate::record::{CodecError, StageRecord, NO_DATA_ID};
use crate::time::Timespec;

// ── Error type ────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("cannot append to trace log {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("traced chain '{name}' reads input #{index} but the stage has {count} input(s)")]
    MissingInput {
        name: String,
        index: usize,
        count: usize,
    },

    #[error("traced chain '{name}': {source}")]
    Codec {
        name: String,
        #[source]
        source: CodecError,
    },
}

// ── Sinks ─────────────────────────────────────────────────────────────────────

/// Destination for trace blocks.  One block is appended atomically.
pub trait TraceSink: Send + Sync {
    fn append(&self, chain_name: &str, block: &str) -> Result<(), TraceError>;
}

/// One append-only file per chain: `<dir>/log_<chain name>_<suffix>.txt`.
#[derive(Debug)]
pub struct FileTraceSink {
    dir: PathBuf,
    suffix: String,
    lock: Mutex<()>,
}

impl FileTraceSink {
    pub fn new(dir: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            suffix: suffix.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path_for(&self, chain_name: &str) -> PathBuf {
        self.dir
            .join(format!("log_{}_{}.txt", chain_name, self.suffix))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl TraceSink for FileTraceSink {
    fn append(&self, chain_name: &str, block: &str) -> Result<(), TraceError> {
        let path = self.path_for(chain_name);
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| f.write_all(block.as_bytes()))
            .map_err(|source| TraceError::Io { path, source })
    }
}

/// Keeps blocks in memory.  Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryTraceSink {
    blocks: Arc<Mutex<Vec<(String, String)>>>,
}

impl MemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(chain name, block text)` in append order.
    pub fn blocks(&self) -> Vec<(String, String)> {
        self.blocks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Blocks for one chain.
    pub fn blocks_for(&self, chain_name: &str) -> Vec<String> {
        self.blocks()
            .into_iter()
            .filter(|(n, _)| n == chain_name)
            .map(|(_, b)| b)
            .collect()
    }
}

impl TraceSink for MemoryTraceSink {
    fn append(&self, chain_name: &str, block: &str) -> Result<(), TraceError> {
        self.blocks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((chain_name.to_string(), block.to_string()));
        Ok(())
    }
}

// ── Block formatting ──────────────────────────────────────────────────────────

/// The tracing stage's own instants for this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalTimes {
    pub wake: Timespec,
    pub recv: Timespec,
    pub end: Timespec,
}

fn push_line(out: &mut String, id: u8, level: u8, field: &str, t: Timespec) {
    // Writing into a String cannot fail.
    let _ = writeln!(
        out,
        "ID = {id}, chain_l{level}_{field}_us = {:.2} us",
        t.as_micros_f64()
    );
}

/// Render one block.  `upstream` is ordered origin first; the first entry
/// is the origin record.
pub fn format_block(id: u8, upstream: &[(Level, StageRecord)], local_level: Level, local: &LocalTimes) -> String {
    let mut out = String::new();
    for (i, (level, rec)) in upstream.iter().enumerate() {
        let recv_field = if i == 0 { "start" } else { "recv" };
        push_line(&mut out, id, level.get(), "wake", rec.wake);
        push_line(&mut out, id, level.get(), recv_field, rec.recv);
        push_line(&mut out, id, level.get(), "send", rec.send);
    }
    push_line(&mut out, id, local_level.get(), "wake", local.wake);
    push_line(&mut out, id, local_level.get(), "recv", local.recv);
    push_line(&mut out, id, local_level.get(), "end", local.end);
    out.push('\n');
    out
}

// ── Tracer ────────────────────────────────────────────────────────────────────

/// One chain followed by the tracer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracedChain {
    /// Log name, e.g. `"Chain 3"`.
    pub name: String,
    pub chain: ChainId,
    /// Level whose identifier defines a generation.
    pub origin: Level,
    /// Index of the input snapshot carrying this chain.
    pub input: usize,
}

#[derive(Debug)]
struct Entry {
    traced: TracedChain,
    /// `None` until an identifier has been seen.
    last_seen: Option<u8>,
}

/// Last-seen table plus the sink the blocks go to.
pub struct LatencyTracer {
    local_level: Level,
    entries: Vec<Entry>,
    sink: Arc<dyn TraceSink>,
}

impl LatencyTracer {
    /// `local_level` is the pipeline level of the stage doing the tracing.
    pub fn new(local_level: Level, chains: Vec<TracedChain>, sink: Arc<dyn TraceSink>) -> Self {
        Self {
            local_level,
            entries: chains
                .into_iter()
                .map(|traced| Entry {
                    traced,
                    last_seen: None,
                })
                .collect(),
            sink,
        }
    }

    pub fn chains(&self) -> impl Iterator<Item = &TracedChain> {
        self.entries.iter().map(|e| &e.traced)
    }

    /// Identifier last traced for chain `name`.
    pub fn last_seen(&self, name: &str) -> Option<u8> {
        self.entries
            .iter()
            .find(|e| e.traced.name == name)
            .and_then(|e| e.last_seen)
    }

    /// Trace every configured chain.  Returns the number of blocks written.
    ///
    /// A failure on one chain does not stop the others; the first error is
    /// returned after all chains were visited.
    pub fn trace_cycle(&mut self, inputs: &[Vec<u8>], local: &LocalTimes) -> Result<usize, TraceError> {
        let mut written = 0;
        let mut first_err = None;
        for idx in 0..self.entries.len() {
            match self.trace_entry(idx, inputs, local) {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    fn trace_entry(&mut self, idx: usize, inputs: &[Vec<u8>], local: &LocalTimes) -> Result<bool, TraceError> {
        let local_level = self.local_level;
        let entry = &mut self.entries[idx];
        let traced = &entry.traced;

        let snapshot = inputs.get(traced.input).ok_or_else(|| TraceError::MissingInput {
            name: traced.name.clone(),
            index: traced.input,
            count: inputs.len(),
        })?;
        let codec = |source| TraceError::Codec {
            name: traced.name.clone(),
            source,
        };

        let origin = StageRecord::read_at(snapshot, traced.chain, traced.origin).map_err(codec)?;
        let id = origin.id;
        if id == NO_DATA_ID || entry.last_seen == Some(id) {
            return Ok(false);
        }

        let mut upstream = Vec::with_capacity(traced.origin.get() as usize);
        for level in traced.origin.down_to_planning().filter(|l| *l > local_level) {
            upstream.push((level, StageRecord::read_at(snapshot, traced.chain, level).map_err(codec)?));
        }

        let block = format_block(id, &upstream, local_level, local);
        self.sink.append(&traced.name, &block)?;
        entry.last_seen = Some(id);
        debug!(chain = %traced.name, id, "trace block written");
        Ok(true)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
