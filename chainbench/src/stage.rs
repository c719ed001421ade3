/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Per-stage PRODUCE callbacks.
//!
//! The runner is identical for every stage; what differs is how the output
//! message is assembled from the input snapshots:
//!
//! ```text
//! SourceStage  – no inputs; stamps a fresh identifier into its own records
//! RelayStage   – copies upstream chain slots verbatim, then stamps id 0
//!                into its own level of every chain it forwards
//! SinkStage    – produces nothing (terminal stage)
//! ```

use thiserror::Error;

use crate::layout::{self, ChainId, LayoutError, Level};
use crate::record::{CodecError, IdSequence, StageRecord, NO_DATA_ID};
use crate::time::Timespec;

// ── Error type ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    #[error("splice refers to input #{index} but the stage has {count} input(s)")]
    MissingInput { index: usize, count: usize },

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

// ── CycleTimes ────────────────────────────────────────────────────────────────

/// Instants of the current cycle, known by the time PRODUCE runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleTimes {
    /// Scheduled wake instant (not the observed one).
    pub wake: Timespec,
    /// Observed start of work after the wait returned.
    pub started: Timespec,
    /// End of ACQUIRE.
    pub received: Timespec,
    /// End of EXECUTE.
    pub sent: Timespec,
}

// ── StageLogic ────────────────────────────────────────────────────────────────

/// Builds the output message for one cycle.
pub trait StageLogic: Send {
    /// Short label for logs ("source", "relay", "sink").
    fn kind(&self) -> &'static str;

    /// Write this cycle's output into `out`.  `out` keeps its contents from
    /// the previous cycle; only owned records and spliced slots change.
    fn produce(
        &mut self,
        inputs: &[Vec<u8>],
        times: &CycleTimes,
        out: &mut [u8],
    ) -> Result<(), StageError>;
}

/// Origin of a chain: advances an [`IdSequence`] once per cycle.
#[derive(Debug, Clone)]
pub struct SourceStage {
    level: Level,
    chains: Vec<ChainId>,
    ids: IdSequence,
}

impl SourceStage {
    pub fn new(level: Level, chains: Vec<ChainId>) -> Self {
        Self {
            level,
            chains,
            ids: IdSequence::new(),
        }
    }

    /// Identifier stamped in the most recent cycle.
    pub fn last_id(&self) -> u8 {
        self.ids.current()
    }
}

impl StageLogic for SourceStage {
    fn kind(&self) -> &'static str {
        "source"
    }

    fn produce(
        &mut self,
        _inputs: &[Vec<u8>],
        times: &CycleTimes,
        out: &mut [u8],
    ) -> Result<(), StageError> {
        let id = self.ids.next().unwrap_or(1);
        // A source has nothing to receive: its receive instant is when work
        // actually started.
        let rec = StageRecord::new(id, times.wake, times.received, times.sent);
        for chain in &self.chains {
            rec.write_at(out, *chain, self.level)?;
        }
        Ok(())
    }
}

/// One chain slot copied from an input snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Splice {
    pub input: usize,
    pub chain: ChainId,
}

/// Intermediate stage: forwards upstream slots and stamps its own level.
#[derive(Debug, Clone)]
pub struct RelayStage {
    level: Level,
    splices: Vec<Splice>,
}

impl RelayStage {
    pub fn new(level: Level, splices: Vec<Splice>) -> Self {
        Self { level, splices }
    }

    pub fn splices(&self) -> &[Splice] {
        &self.splices
    }
}

impl StageLogic for RelayStage {
    fn kind(&self) -> &'static str {
        "relay"
    }

    fn produce(
        &mut self,
        inputs: &[Vec<u8>],
        times: &CycleTimes,
        out: &mut [u8],
    ) -> Result<(), StageError> {
        for s in &self.splices {
            let src = inputs.get(s.input).ok_or(StageError::MissingInput {
                index: s.input,
                count: inputs.len(),
            })?;
            layout::copy_slot(out, src, s.chain)?;
        }

        // The relay does not originate generations.
        let rec = StageRecord::new(NO_DATA_ID, times.wake, times.received, times.sent);
        for s in &self.splices {
            rec.write_at(out, s.chain, self.level)?;
        }
        Ok(())
    }
}

/// Terminal stage; its PRODUCE state is empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct SinkStage;

impl StageLogic for SinkStage {
    fn kind(&self) -> &'static str {
        "sink"
    }

    fn produce(
        &mut self,
        _inputs: &[Vec<u8>],
        _times: &CycleTimes,
        _out: &mut [u8],
    ) -> Result<(), StageError> {
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
