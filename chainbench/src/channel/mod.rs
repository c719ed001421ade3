/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Exchange Channel: single-slot, latest-value hand-off between one writer
//! and its readers.
//!
//! Three realizations share the [`ExchangeReader`] / [`ExchangeWriter`]
//! contract:
//!
//! * [`local`]  – in-process slot, used by the simulator and tests
//! * [`shm`]    – POSIX shared memory guarded by a named semaphore
//! * [`stream`] – TCP, with a background receive thread per input
//!
//! None of them queue.  A reader that falls behind skips generations, but
//! every snapshot is a whole message from exactly one publish.

pub mod local;
pub mod shm;
pub mod stream;

use std::io;

use thiserror::Error;

pub use local::{local_channel, LatestSlot, LocalReader, LocalWriter};
pub use shm::{ShmReader, ShmWriter};
pub use stream::{Endpoint, StreamPublisher, StreamReceiver};

// ── Error type ────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ChannelError {
    /// Creating or opening a region, semaphore, or socket failed.
    #[error("channel '{channel}': {op} failed: {source}")]
    Setup {
        channel: String,
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// Peer closed the stream or a read failed after establishment.
    #[error("channel '{0}': peer disconnected")]
    Disconnected(String),

    /// A write to the peer failed after establishment.
    #[error("channel '{channel}': publish failed: {source}")]
    Publish {
        channel: String,
        #[source]
        source: io::Error,
    },

    /// Waiting on the channel's lock failed; no access was made.
    #[error("channel '{channel}': lock failed: {source}")]
    Lock {
        channel: String,
        #[source]
        source: io::Error,
    },

    #[error("channel '{channel}': buffer is {actual} bytes, expected {expected}")]
    SizeMismatch {
        channel: String,
        expected: usize,
        actual: usize,
    },

    #[error("channel name '{0}' is not a valid POSIX object name")]
    InvalidName(String),
}

impl ChannelError {
    pub(crate) fn setup(channel: &str, op: &'static str, source: io::Error) -> Self {
        Self::Setup {
            channel: channel.to_string(),
            op,
            source,
        }
    }
}

pub(crate) fn check_len(channel: &str, expected: usize, actual: usize) -> Result<(), ChannelError> {
    if expected == actual {
        Ok(())
    } else {
        Err(ChannelError::SizeMismatch {
            channel: channel.to_string(),
            expected,
            actual,
        })
    }
}

// ── Traits ────────────────────────────────────────────────────────────────────

/// Reader side: copy out the most recently published message.
pub trait ExchangeReader: Send {
    fn name(&self) -> &str;

    /// Full message size in bytes.
    fn message_size(&self) -> usize;

    /// Copy the current message into `out`, which must be exactly
    /// [`message_size`](Self::message_size) bytes.
    fn snapshot_into(&mut self, out: &mut [u8]) -> Result<(), ChannelError>;

    fn snapshot(&mut self) -> Result<Vec<u8>, ChannelError> {
        let mut out = vec![0u8; self.message_size()];
        self.snapshot_into(&mut out)?;
        Ok(out)
    }
}

/// Writer side: replace the current message as a whole.
pub trait ExchangeWriter: Send {
    fn name(&self) -> &str;

    fn message_size(&self) -> usize;

    /// Publish `buf`, which must be exactly
    /// [`message_size`](Self::message_size) bytes.
    fn publish(&mut self, buf: &[u8]) -> Result<(), ChannelError>;
}

impl<T: ExchangeReader + ?Sized> ExchangeReader for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn message_size(&self) -> usize {
        (**self).message_size()
    }

    fn snapshot_into(&mut self, out: &mut [u8]) -> Result<(), ChannelError> {
        (**self).snapshot_into(out)
    }
}

impl<T: ExchangeWriter + ?Sized> ExchangeWriter for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn message_size(&self) -> usize {
        (**self).message_size()
    }

    fn publish(&mut self, buf: &[u8]) -> Result<(), ChannelError> {
        (**self).publish(buf)
    }
}
