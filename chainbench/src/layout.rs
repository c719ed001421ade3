/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Authoritative chain layout shared by every producer and consumer.
//!
//! A message is a sequence of fixed-size chain slots; each slot holds one
//! 64-byte stage record per wire level:
//!
//! ```text
//! message   ┌──────── chain 1 ────────┬──────── chain 2 ────────┬ … ┬─ chain 5 ─┐
//!           0                        256                      512    1024     1280
//! slot      ┌─ level 2 ─┬─ level 3 ─┬─ level 4 ─┬─ level 5 ─┐
//!           0           64          128         192        256
//! ```
//!
//! Levels count upstream from the sink: level 1 is the terminal actuation
//! stage and never occupies a record; level 2 (planning) is the first record
//! of every slot.
//!
//! Nothing here detects a producer/consumer mismatch at runtime.  Every task
//! must link against these constants instead of re-deriving offsets.

use std::fmt;
use std::ops::Range;

use serde::Deserialize;
use thiserror::Error;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Bumped whenever any offset below changes.
pub const LAYOUT_VERSION: u32 = 1;

/// Bytes per stage record.
pub const RECORD_SIZE: usize = 64;

/// Bytes per chain slot.
pub const CHAIN_SLOT_SIZE: usize = 256;

/// Number of chains in a full message.
pub const CHAIN_COUNT: u8 = 5;

/// Bytes covered by all chain slots.
pub const MESSAGE_SIZE: usize = CHAIN_SLOT_SIZE * CHAIN_COUNT as usize;

/// The sink's level; it is traced locally and never written to the wire.
pub const SINK_LEVEL: u8 = 1;

/// Lowest level that owns a record inside a slot.
pub const FIRST_WIRE_LEVEL: u8 = 2;

/// Highest level a slot can hold.
pub const MAX_LEVEL: u8 = FIRST_WIRE_LEVEL + (CHAIN_SLOT_SIZE / RECORD_SIZE) as u8 - 1;

// ── Error type ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("chain index {0} is outside 1..={CHAIN_COUNT}")]
    UnknownChain(u8),

    #[error("pipeline level {0} is outside {SINK_LEVEL}..={MAX_LEVEL}")]
    UnknownLevel(u8),

    #[error("level {SINK_LEVEL} is the sink and has no record on the wire")]
    SinkLevel,

    #[error("byte range {start}..{end} does not fit a {len}-byte buffer")]
    OutOfBounds { start: usize, end: usize, len: usize },
}

// ── ChainId / Level ───────────────────────────────────────────────────────────

/// 1-based chain index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(try_from = "u8")]
pub struct ChainId(u8);

impl ChainId {
    pub fn new(index: u8) -> Result<Self, LayoutError> {
        if (1..=CHAIN_COUNT).contains(&index) {
            Ok(Self(index))
        } else {
            Err(LayoutError::UnknownChain(index))
        }
    }

    /// Chain from a literal index.  Panics if the index is out of range.
    pub(crate) const fn known(index: u8) -> Self {
        assert!(index >= 1 && index <= CHAIN_COUNT);
        Self(index)
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// All chains in index order.
    pub fn all() -> impl Iterator<Item = ChainId> {
        (1..=CHAIN_COUNT).map(ChainId)
    }
}

impl TryFrom<u8> for ChainId {
    type Error = LayoutError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        Self::new(v)
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Chain {}", self.0)
    }
}

/// Pipeline level, counted upstream from the sink (level 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(try_from = "u8")]
pub struct Level(u8);

impl Level {
    pub const SINK: Level = Level(SINK_LEVEL);
    pub const PLANNING: Level = Level(FIRST_WIRE_LEVEL);

    pub fn new(level: u8) -> Result<Self, LayoutError> {
        if (SINK_LEVEL..=MAX_LEVEL).contains(&level) {
            Ok(Self(level))
        } else {
            Err(LayoutError::UnknownLevel(level))
        }
    }

    /// Level from a literal.  Panics if the level is out of range.
    pub(crate) const fn known(level: u8) -> Self {
        assert!(level >= SINK_LEVEL && level <= MAX_LEVEL);
        Self(level)
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn is_sink(self) -> bool {
        self.0 == SINK_LEVEL
    }

    /// Wire levels from `self` down to planning, upstream first.
    pub fn down_to_planning(self) -> impl Iterator<Item = Level> {
        (FIRST_WIRE_LEVEL..=self.0).rev().map(Level)
    }
}

impl TryFrom<u8> for Level {
    type Error = LayoutError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        Self::new(v)
    }
}

// ── Offsets ───────────────────────────────────────────────────────────────────

/// Byte offset of `chain`'s slot inside a message.
pub fn chain_offset(chain: ChainId) -> usize {
    (chain.0 as usize - 1) * CHAIN_SLOT_SIZE
}

/// Byte range of `chain`'s slot inside a message.
pub fn slot_range(chain: ChainId) -> Range<usize> {
    let start = chain_offset(chain);
    start..start + CHAIN_SLOT_SIZE
}

/// Byte offset of the record for (`chain`, `level`).
///
/// ```rust
/// use chainbench::layout::{record_offset, ChainId, Level};
///
/// // SFM: chain 3, level 3
/// let off = record_offset(ChainId::new(3).unwrap(), Level::new(3).unwrap()).unwrap();
/// assert_eq!(off, 2 * 256 + 64);
/// ```
pub fn record_offset(chain: ChainId, level: Level) -> Result<usize, LayoutError> {
    if level.is_sink() {
        return Err(LayoutError::SinkLevel);
    }
    Ok(chain_offset(chain) + (level.0 - FIRST_WIRE_LEVEL) as usize * RECORD_SIZE)
}

/// Fail if `range` does not fit inside a buffer of `len` bytes.
pub fn ensure_fits(range: &Range<usize>, len: usize) -> Result<(), LayoutError> {
    if range.start <= range.end && range.end <= len {
        Ok(())
    } else {
        Err(LayoutError::OutOfBounds {
            start: range.start,
            end: range.end,
            len,
        })
    }
}

/// Copy `chain`'s whole slot verbatim from `src` into `dst`.
pub fn copy_slot(dst: &mut [u8], src: &[u8], chain: ChainId) -> Result<(), LayoutError> {
    let range = slot_range(chain);
    ensure_fits(&range, src.len())?;
    ensure_fits(&range, dst.len())?;
    dst[range.clone()].copy_from_slice(&src[range]);
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(i: u8) -> ChainId {
        ChainId::new(i).unwrap()
    }

    fn level(l: u8) -> Level {
        Level::new(l).unwrap()
    }

    #[test]
    fn message_covers_five_slots() {
        assert_eq!(MESSAGE_SIZE, 1280);
        assert_eq!(MAX_LEVEL, 5);
    }

    #[test]
    fn planning_record_starts_each_slot() {
        for c in ChainId::all() {
            assert_eq!(
                record_offset(c, Level::PLANNING).unwrap(),
                chain_offset(c)
            );
        }
    }

    #[test]
    fn record_offsets_match_reference_programs() {
        assert_eq!(record_offset(chain(3), level(3)).unwrap(), 576);
        assert_eq!(record_offset(chain(1), level(5)).unwrap(), 192);
        assert_eq!(record_offset(chain(5), level(2)).unwrap(), 1024);
    }

    #[test]
    fn records_never_overlap_within_a_message() {
        let mut seen = Vec::new();
        for c in ChainId::all() {
            for l in level(MAX_LEVEL).down_to_planning() {
                let off = record_offset(c, l).unwrap();
                assert!(off + RECORD_SIZE <= MESSAGE_SIZE);
                seen.push(off);
            }
        }
        seen.sort_unstable();
        for w in seen.windows(2) {
            assert!(w[1] - w[0] >= RECORD_SIZE);
        }
    }

    #[test]
    fn sink_level_has_no_offset() {
        assert_eq!(
            record_offset(chain(1), Level::SINK).unwrap_err(),
            LayoutError::SinkLevel
        );
    }

    #[test]
    fn out_of_range_indices_are_rejected() {
        assert_eq!(ChainId::new(0).unwrap_err(), LayoutError::UnknownChain(0));
        assert_eq!(ChainId::new(6).unwrap_err(), LayoutError::UnknownChain(6));
        assert_eq!(Level::new(0).unwrap_err(), LayoutError::UnknownLevel(0));
        assert_eq!(Level::new(6).unwrap_err(), LayoutError::UnknownLevel(6));
    }

    #[test]
    fn down_to_planning_lists_levels_upstream_first() {
        let levels: Vec<u8> = level(4).down_to_planning().map(Level::get).collect();
        assert_eq!(levels, vec![4, 3, 2]);
    }

    #[test]
    fn copy_slot_copies_only_that_chain() {
        let src: Vec<u8> = (0..MESSAGE_SIZE).map(|i| (i % 251) as u8 + 1).collect();
        let mut dst = vec![0u8; MESSAGE_SIZE];
        copy_slot(&mut dst, &src, chain(4)).unwrap();

        let r = slot_range(chain(4));
        assert_eq!(&dst[r.clone()], &src[r.clone()]);
        assert!(dst[..r.start].iter().all(|b| *b == 0));
        assert!(dst[r.end..].iter().all(|b| *b == 0));
    }

    #[test]
    fn copy_slot_rejects_short_source() {
        let src = vec![0u8; 512];
        let mut dst = vec![0u8; MESSAGE_SIZE];
        let err = copy_slot(&mut dst, &src, chain(3)).unwrap_err();
        assert_eq!(
            err,
            LayoutError::OutOfBounds {
                start: 512,
                end: 768,
                len: 512
            }
        );
    }
}
