/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Stage Record codec.
//!
//! Wire layout of one 64-byte record, offsets relative to the record start:
//!
//! | Field | Offset | Size | Type |
//! |---|---|---|---|
//! | id | 0 | 1 | `u8` |
//! | reserved | 1..16 | 15 | untouched |
//! | wake sec / nsec | 16 / 24 | 8 + 8 | `i64` LE |
//! | recv sec / nsec | 32 / 40 | 8 + 8 | `i64` LE |
//! | send sec / nsec | 48 / 56 | 8 + 8 | `i64` LE |
//!
//! The reserved bytes are neither written nor interpreted; whatever the
//! buffer held there survives an encode.

use thiserror::Error;

use crate::layout::{self, ChainId, LayoutError, Level, RECORD_SIZE};
use crate::time::Timespec;

const ID_OFFSET: usize = 0;
const WAKE_OFFSET: usize = 16;
const RECV_OFFSET: usize = 32;
const SEND_OFFSET: usize = 48;

/// Identifier meaning "no data produced yet".
pub const NO_DATA_ID: u8 = 0;

// ── Error type ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("record at offset {offset} needs {RECORD_SIZE} bytes but the buffer holds {len}")]
    OutOfBounds { offset: usize, len: usize },

    #[error(transparent)]
    Layout(#[from] LayoutError),
}

// ── StageRecord ───────────────────────────────────────────────────────────────

/// Timestamps one stage stamps for one chain in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageRecord {
    pub id: u8,
    pub wake: Timespec,
    pub recv: Timespec,
    pub send: Timespec,
}

impl StageRecord {
    pub fn new(id: u8, wake: Timespec, recv: Timespec, send: Timespec) -> Self {
        Self {
            id,
            wake,
            recv,
            send,
        }
    }

    pub fn has_data(&self) -> bool {
        self.id != NO_DATA_ID
    }

    /// Write this record into `buf` at `offset`.
    pub fn encode(&self, buf: &mut [u8], offset: usize) -> Result<(), CodecError> {
        let rec = record_slice_mut(buf, offset)?;
        rec[ID_OFFSET] = self.id;
        put_timespec(&mut rec[WAKE_OFFSET..RECV_OFFSET], self.wake);
        put_timespec(&mut rec[RECV_OFFSET..SEND_OFFSET], self.recv);
        put_timespec(&mut rec[SEND_OFFSET..RECORD_SIZE], self.send);
        Ok(())
    }

    /// Read the record stored in `buf` at `offset`.
    pub fn decode(buf: &[u8], offset: usize) -> Result<Self, CodecError> {
        let rec = record_slice(buf, offset)?;
        Ok(Self {
            id: rec[ID_OFFSET],
            wake: get_timespec(&rec[WAKE_OFFSET..RECV_OFFSET]),
            recv: get_timespec(&rec[RECV_OFFSET..SEND_OFFSET]),
            send: get_timespec(&rec[SEND_OFFSET..RECORD_SIZE]),
        })
    }

    /// Read the record for (`chain`, `level`) from a message buffer.
    pub fn read_at(buf: &[u8], chain: ChainId, level: Level) -> Result<Self, CodecError> {
        Self::decode(buf, layout::record_offset(chain, level)?)
    }

    /// Write this record as (`chain`, `level`) into a message buffer.
    pub fn write_at(&self, buf: &mut [u8], chain: ChainId, level: Level) -> Result<(), CodecError> {
        self.encode(buf, layout::record_offset(chain, level)?)
    }
}

fn record_slice(buf: &[u8], offset: usize) -> Result<&[u8], CodecError> {
    match offset.checked_add(RECORD_SIZE) {
        Some(end) if end <= buf.len() => Ok(&buf[offset..end]),
        _ => Err(CodecError::OutOfBounds {
            offset,
            len: buf.len(),
        }),
    }
}

fn record_slice_mut(buf: &mut [u8], offset: usize) -> Result<&mut [u8], CodecError> {
    let len = buf.len();
    match offset.checked_add(RECORD_SIZE) {
        Some(end) if end <= len => Ok(&mut buf[offset..end]),
        _ => Err(CodecError::OutOfBounds { offset, len }),
    }
}

fn put_timespec(dst: &mut [u8], t: Timespec) {
    dst[..8].copy_from_slice(&t.sec.to_le_bytes());
    dst[8..16].copy_from_slice(&t.nsec.to_le_bytes());
}

fn get_timespec(src: &[u8]) -> Timespec {
    let mut sec = [0u8; 8];
    let mut nsec = [0u8; 8];
    sec.copy_from_slice(&src[..8]);
    nsec.copy_from_slice(&src[8..16]);
    // Raw fields; a producer may have written a non-normalised pair.
    Timespec {
        sec: i64::from_le_bytes(sec),
        nsec: i64::from_le_bytes(nsec),
    }
}

// ── IdSequence ────────────────────────────────────────────────────────────────

/// Logical identifiers for successive generations: 1, 2, …, 255, 1, …
///
/// Never yields [`NO_DATA_ID`].
#[derive(Debug, Clone, Default)]
pub struct IdSequence {
    last: u8,
}

impl IdSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifier most recently handed out, or 0 before the first call.
    pub fn current(&self) -> u8 {
        self.last
    }
}

impl Iterator for IdSequence {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        self.last = match self.last {
            u8::MAX => 1,
            n => n + 1,
        };
        Some(self.last)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::MESSAGE_SIZE;

    fn sample_record() -> StageRecord {
        StageRecord::new(
            7,
            Timespec::from_millis(100),
            Timespec::from_millis(105),
            Timespec::new(0, 110_000_123),
        )
    }

    // ── encode / decode ───────────────────────────────────────────────────────

    #[test]
    fn encode_places_fields_at_fixed_offsets() {
        let mut buf = vec![0u8; RECORD_SIZE];
        let rec = StageRecord::new(
            9,
            Timespec { sec: 1, nsec: 2 },
            Timespec { sec: 3, nsec: 4 },
            Timespec { sec: 5, nsec: 6 },
        );
        rec.encode(&mut buf, 0).unwrap();

        assert_eq!(buf[0], 9);
        assert_eq!(buf[16..24], 1i64.to_le_bytes());
        assert_eq!(buf[24..32], 2i64.to_le_bytes());
        assert_eq!(buf[32..40], 3i64.to_le_bytes());
        assert_eq!(buf[40..48], 4i64.to_le_bytes());
        assert_eq!(buf[48..56], 5i64.to_le_bytes());
        assert_eq!(buf[56..64], 6i64.to_le_bytes());
    }

    #[test]
    fn encode_leaves_reserved_gap_untouched() {
        let mut buf = vec![0xAAu8; RECORD_SIZE];
        sample_record().encode(&mut buf, 0).unwrap();
        assert!(buf[1..16].iter().all(|b| *b == 0xAA));
    }

    #[test]
    fn decode_inverts_encode_at_interior_offset() {
        let mut buf = vec![0u8; MESSAGE_SIZE];
        let rec = sample_record();
        rec.encode(&mut buf, 576).unwrap();
        assert_eq!(StageRecord::decode(&buf, 576).unwrap(), rec);
        // Neighbouring records are not disturbed.
        assert!(buf[512..576].iter().all(|b| *b == 0));
        assert!(buf[640..704].iter().all(|b| *b == 0));
    }

    #[test]
    fn decode_keeps_negative_fields() {
        let mut buf = vec![0u8; RECORD_SIZE];
        let rec = StageRecord::new(
            1,
            Timespec { sec: -1, nsec: -5 },
            Timespec::default(),
            Timespec::default(),
        );
        rec.encode(&mut buf, 0).unwrap();
        assert_eq!(StageRecord::decode(&buf, 0).unwrap().wake, rec.wake);
    }

    #[test]
    fn out_of_range_access_fails_loudly() {
        let mut buf = vec![0u8; 100];
        assert_eq!(
            sample_record().encode(&mut buf, 40).unwrap_err(),
            CodecError::OutOfBounds { offset: 40, len: 100 }
        );
        assert_eq!(
            StageRecord::decode(&buf, usize::MAX).unwrap_err(),
            CodecError::OutOfBounds {
                offset: usize::MAX,
                len: 100
            }
        );
    }

    // ── read_at / write_at ────────────────────────────────────────────────────

    #[test]
    fn write_at_uses_layout_offset() {
        let mut buf = vec![0u8; MESSAGE_SIZE];
        let chain = ChainId::new(3).unwrap();
        let level = Level::new(3).unwrap();
        sample_record().write_at(&mut buf, chain, level).unwrap();

        assert_eq!(buf[576], 7);
        assert_eq!(StageRecord::read_at(&buf, chain, level).unwrap(), sample_record());
    }

    #[test]
    fn read_at_rejects_sink_level() {
        let buf = vec![0u8; MESSAGE_SIZE];
        let err = StageRecord::read_at(&buf, ChainId::new(1).unwrap(), Level::SINK).unwrap_err();
        assert_eq!(err, CodecError::Layout(LayoutError::SinkLevel));
    }

    #[test]
    fn zeroed_buffer_decodes_as_no_data() {
        let buf = vec![0u8; MESSAGE_SIZE];
        let rec = StageRecord::read_at(&buf, ChainId::new(5).unwrap(), Level::new(3).unwrap()).unwrap();
        assert!(!rec.has_data());
    }

    // ── IdSequence ────────────────────────────────────────────────────────────

    #[test]
    fn id_sequence_starts_at_one() {
        let mut ids = IdSequence::new();
        assert_eq!(ids.current(), 0);
        assert_eq!(ids.next(), Some(1));
        assert_eq!(ids.next(), Some(2));
    }

    #[test]
    fn id_sequence_wraps_to_one_never_zero() {
        let ids: Vec<u8> = IdSequence::new().take(257).collect();
        assert_eq!(ids[254], 255);
        assert_eq!(ids[255], 1);
        assert_eq!(ids[256], 2);
        assert!(!ids.contains(&NO_DATA_ID));
    }
}
