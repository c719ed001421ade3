/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Streaming Exchange Channel over TCP.
//!
//! The receiving side runs one background thread per channel that reads
//! whole messages with `read_exact` and overwrites a [`LatestSlot`]; the
//! runner only ever copies out of that slot.  The publishing side writes
//! each message directly on the socket.
//!
//! Which end listens is configured per endpoint.  Connecting ends retry
//! every [`CONNECT_BACKOFF`] until the peer accepts; once established, any
//! read or write failure is final.

use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use super::{check_len, ChannelError, ExchangeReader, ExchangeWriter, LatestSlot};

/// Delay between connection attempts to a peer that is not listening yet.
pub const CONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Role and address of one end of a stream channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Bind `addr` and accept a single peer.
    Listen(SocketAddr),
    /// Connect to a peer listening on `addr`.
    Connect(SocketAddr),
}

impl Endpoint {
    pub fn addr(&self) -> SocketAddr {
        match self {
            Endpoint::Listen(a) | Endpoint::Connect(a) => *a,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Listen(a) => write!(f, "listen {a}"),
            Endpoint::Connect(a) => write!(f, "connect {a}"),
        }
    }
}

fn bind(name: &str, addr: SocketAddr) -> Result<TcpListener, ChannelError> {
    TcpListener::bind(addr).map_err(|e| ChannelError::setup(name, "bind", e))
}

fn accept(name: &str, listener: &TcpListener) -> io::Result<TcpStream> {
    let addr = listener.local_addr()?;
    info!(channel = name, %addr, "waiting for peer connection");
    let (stream, peer) = listener.accept()?;
    info!(channel = name, %peer, "peer connected");
    Ok(stream)
}

/// Connect to `addr`, retrying every `backoff` until the peer accepts.
pub fn connect_with_retry(name: &str, addr: SocketAddr, backoff: Duration) -> TcpStream {
    let mut attempts = 0u64;
    loop {
        match TcpStream::connect(addr) {
            Ok(stream) => {
                info!(channel = name, %addr, attempts, "connected to peer");
                return stream;
            }
            Err(e) => {
                attempts += 1;
                info!(channel = name, %addr, "waiting for peer ({e})");
                thread::sleep(backoff);
            }
        }
    }
}

// ── Receiver ──────────────────────────────────────────────────────────────────

/// Reader end fed by a background receive thread.
#[derive(Debug)]
pub struct StreamReceiver {
    slot: LatestSlot,
    local_addr: Option<SocketAddr>,
}

impl StreamReceiver {
    /// Set up the socket and start the receive thread.
    ///
    /// A listening endpoint is bound before this returns, so bind failures
    /// surface here.  A connecting endpoint blocks until the peer accepts.
    /// Until the first message arrives, snapshots read zeroes.
    pub fn open(name: &str, endpoint: Endpoint, size: usize) -> Result<Self, ChannelError> {
        let slot = LatestSlot::new(name, size);
        let thread_slot = slot.clone();
        let thread_name = format!("rx-{name}");

        let local_addr = match endpoint {
            Endpoint::Listen(addr) => {
                let listener = bind(name, addr)?;
                let local = listener
                    .local_addr()
                    .map_err(|e| ChannelError::setup(name, "local_addr", e))?;
                thread::Builder::new()
                    .name(thread_name)
                    .spawn(move || match accept(thread_slot.name(), &listener) {
                        Ok(stream) => receive_loop(stream, &thread_slot),
                        Err(e) => {
                            warn!(channel = thread_slot.name(), "accept failed: {e}");
                            thread_slot.mark_disconnected();
                        }
                    })
                    .map_err(|e| ChannelError::setup(name, "spawn", e))?;
                Some(local)
            }
            Endpoint::Connect(addr) => {
                let stream = connect_with_retry(name, addr, CONNECT_BACKOFF);
                thread::Builder::new()
                    .name(thread_name)
                    .spawn(move || receive_loop(stream, &thread_slot))
                    .map_err(|e| ChannelError::setup(name, "spawn", e))?;
                None
            }
        };

        Ok(Self { slot, local_addr })
    }

    /// Bound address when listening (useful with port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Number of complete messages received so far.
    pub fn generation(&self) -> u64 {
        self.slot.generation()
    }
}

fn receive_loop(mut stream: TcpStream, slot: &LatestSlot) {
    let mut buf = vec![0u8; slot.size()];
    loop {
        match stream.read_exact(&mut buf) {
            Ok(()) => {
                // Sizes always match: both come from the slot.
                if let Err(e) = slot.store(&buf) {
                    warn!(channel = slot.name(), "{e}");
                }
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                warn!(channel = slot.name(), "peer closed the connection");
                break;
            }
            Err(e) => {
                warn!(channel = slot.name(), "receive failed: {e}");
                break;
            }
        }
    }
    slot.mark_disconnected();
}

impl ExchangeReader for StreamReceiver {
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

// ── Publisher ─────────────────────────────────────────────────────────────────

/// Writer end; each publish is one blocking full-message write.
#[derive(Debug)]
pub struct StreamPublisher {
    name: String,
    size: usize,
    stream: TcpStream,
}

impl StreamPublisher {
    /// Establish the connection.  Blocks until the peer is reachable
    /// (connecting) or has connected (listening).
    pub fn open(name: &str, endpoint: Endpoint, size: usize) -> Result<Self, ChannelError> {
        let stream = match endpoint {
            Endpoint::Connect(addr) => connect_with_retry(name, addr, CONNECT_BACKOFF),
            Endpoint::Listen(addr) => {
                let listener = bind(name, addr)?;
                accept(name, &listener).map_err(|e| ChannelError::setup(name, "accept", e))?
            }
        };
        Self::from_stream(name, stream, size)
    }

    /// Wrap an already-connected stream.
    pub fn from_stream(name: &str, stream: TcpStream, size: usize) -> Result<Self, ChannelError> {
        stream
            .set_nodelay(true)
            .map_err(|e| ChannelError::setup(name, "set_nodelay", e))?;
        Ok(Self {
            name: name.to_string(),
            size,
            stream,
        })
    }
}

impl ExchangeWriter for StreamPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    fn message_size(&self) -> usize {
        self.size
    }

    fn publish(&mut self, buf: &[u8]) -> Result<(), ChannelError> {
        check_len(&self.name, self.size, buf.len())?;
        self.stream
            .write_all(buf)
            .map_err(|source| ChannelError::Publish {
                channel: self.name.clone(),
                source,
            })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_display_names_role() {
        let addr: SocketAddr = "127.0.0.1:5555".parse().unwrap();
        assert_eq!(Endpoint::Listen(addr).to_string(), "listen 127.0.0.1:5555");
        assert_eq!(Endpoint::Connect(addr).addr(), addr);
    }

    #[test]
    fn bind_failure_is_reported_at_open() {
        let first = StreamReceiver::open(
            "a",
            Endpoint::Listen("127.0.0.1:0".parse().unwrap()),
            16,
        )
        .unwrap();
        let taken = first.local_addr().unwrap();
        let err = StreamReceiver::open("b", Endpoint::Listen(taken), 16).unwrap_err();
        assert!(matches!(err, ChannelError::Setup { op: "bind", .. }));
    }

    #[test]
    fn receiver_reads_zeroes_before_first_message() {
        let mut rx = StreamReceiver::open(
            "idle",
            Endpoint::Listen("127.0.0.1:0".parse().unwrap()),
            8,
        )
        .unwrap();
        assert_eq!(rx.snapshot().unwrap(), vec![0u8; 8]);
        assert_eq!(rx.generation(), 0);
    }
}
