/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! In-process latest-value slot.
//!
//! [`LatestSlot`] is the mutex-guarded buffer the TCP receiver thread fills;
//! [`local_channel`] wraps one in a writer/reader pair so whole pipelines can
//! run inside a single process.

use std::sync::{Arc, Mutex, MutexGuard};

use super::{check_len, ChannelError, ExchangeReader, ExchangeWriter};

#[derive(Debug)]
struct SlotState {
    buf: Vec<u8>,
    generation: u64,
    disconnected: bool,
}

/// Shared single-slot buffer.  Clones refer to the same slot.
#[derive(Debug, Clone)]
pub struct LatestSlot {
    name: Arc<str>,
    size: usize,
    state: Arc<Mutex<SlotState>>,
}

impl LatestSlot {
    /// Zero-filled slot of `size` bytes.
    pub fn new(name: &str, size: usize) -> Self {
        Self {
            name: Arc::from(name),
            size,
            state: Arc::new(Mutex::new(SlotState {
                buf: vec![0u8; size],
                generation: 0,
                disconnected: false,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    // A panic while holding the lock can only happen between two whole-buffer
    // copies, so the data is still consistent.
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Replace the contents and bump the generation.
    pub fn store(&self, data: &[u8]) -> Result<(), ChannelError> {
        check_len(&self.name, self.size, data.len())?;
        let mut st = self.lock();
        st.buf.copy_from_slice(data);
        st.generation += 1;
        Ok(())
    }

    /// Copy the contents out.  Fails once the slot is marked disconnected.
    pub fn load_into(&self, out: &mut [u8]) -> Result<(), ChannelError> {
        check_len(&self.name, self.size, out.len())?;
        let st = self.lock();
        if st.disconnected {
            return Err(ChannelError::Disconnected(self.name.to_string()));
        }
        out.copy_from_slice(&st.buf);
        Ok(())
    }

    /// Number of stores so far.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn mark_disconnected(&self) {
        self.lock().disconnected = true;
    }

    pub fn is_disconnected(&self) -> bool {
        self.lock().disconnected
    }
}

/// Writer half of an in-process channel.
#[derive(Debug)]
pub struct LocalWriter {
    slot: LatestSlot,
}

/// Reader half of an in-process channel.  Cloning adds another reader.
#[derive(Debug, Clone)]
pub struct LocalReader {
    slot: LatestSlot,
}

impl LocalReader {
    pub fn generation(&self) -> u64 {
        self.slot.generation()
    }
}

/// Create a connected writer/reader pair over a fresh zeroed slot.
pub fn local_channel(name: &str, size: usize) -> (LocalWriter, LocalReader) {
    let slot = LatestSlot::new(name, size);
    (LocalWriter { slot: slot.clone() }, LocalReader { slot })
}

impl Drop for LocalWriter {
    fn drop(&mut self) {
        // Readers see the same fatal condition a closed stream produces.
        self.slot.mark_disconnected();
    }
}

impl ExchangeWriter for LocalWriter {
    fn name(&self) -> &str {
        self.slot.name()
    }

    fn message_size(&self) -> usize {
        self.slot.size()
    }

    fn publish(&mut self, buf: &[u8]) -> Result<(), ChannelError> {
        self.slot.store(buf)
    }
}

impl ExchangeReader for LocalReader {
    fn name(&self) -> &str {
        self.slot.name()
    }

    fn message_size(&self) -> usize {
        self.slot.size()
    }

    fn snapshot_into(&mut self, out: &mut [u8]) -> Result<(), ChannelError> {
        self.slot.load_into(out)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fresh_channel_reads_zeroes() {
        let (_w, mut r) = local_channel("t", 32);
        assert_eq!(r.snapshot().unwrap(), vec![0u8; 32]);
        assert_eq!(r.generation(), 0);
    }

    #[test]
    fn snapshot_returns_last_publish() {
        let (mut w, mut r) = local_channel("t", 4);
        w.publish(&[1, 2, 3, 4]).unwrap();
        w.publish(&[5, 6, 7, 8]).unwrap();
        assert_eq!(r.snapshot().unwrap(), vec![5, 6, 7, 8]);
        assert_eq!(r.generation(), 2);
    }

    #[test]
    fn publish_rejects_wrong_size() {
        let (mut w, _r) = local_channel("t", 4);
        let err = w.publish(&[1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            ChannelError::SizeMismatch { expected: 4, actual: 3, .. }
        ));
    }

    #[test]
    fn dropping_writer_disconnects_readers() {
        let (w, mut r) = local_channel("planner_dasm", 4);
        drop(w);
        let err = r.snapshot().unwrap_err();
        assert!(matches!(err, ChannelError::Disconnected(ref n) if n == "planner_dasm"));
    }

    #[test]
    fn concurrent_readers_never_see_torn_messages() {
        const SIZE: usize = 4096;
        let (mut w, r) = local_channel("stress", SIZE);

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let mut r = r.clone();
                thread::spawn(move || {
                    let mut buf = vec![0u8; SIZE];
                    for _ in 0..2_000 {
                        r.snapshot_into(&mut buf).unwrap();
                        let first = buf[0];
                        assert!(buf.iter().all(|b| *b == first), "torn snapshot");
                    }
                })
            })
            .collect();

        for i in 0..2_000u32 {
            let fill = (i % 251) as u8;
            w.publish(&vec![fill; SIZE]).unwrap();
        }
        for h in readers {
            h.join().unwrap();
        }
    }
}
