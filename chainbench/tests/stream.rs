/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! TCP exchange over loopback.

use std::net::{SocketAddr, TcpListener};
use std::thread;
use std::time::{Duration, Instant};

use chainbench::channel::{
    ChannelError, Endpoint, ExchangeReader, ExchangeWriter, StreamPublisher, StreamReceiver,
};
use chainbench::layout::{ChainId, Level, MESSAGE_SIZE};
use chainbench::record::StageRecord;
use chainbench::time::Timespec;

const TIMEOUT: Duration = Duration::from_secs(5);

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn wait_for(mut done: impl FnMut() -> bool) {
    let start = Instant::now();
    while !done() {
        assert!(start.elapsed() < TIMEOUT, "timed out");
        thread::sleep(Duration::from_millis(5));
    }
}

fn message(id: u8) -> Vec<u8> {
    let mut buf = vec![0u8; MESSAGE_SIZE];
    StageRecord::new(
        id,
        Timespec::from_millis(1),
        Timespec::from_millis(2),
        Timespec::from_millis(3),
    )
    .write_at(&mut buf, ChainId::new(3).unwrap(), Level::new(3).unwrap())
    .unwrap();
    buf
}

/// Listening receiver plus a publisher connected to it.
fn connected_pair() -> (StreamReceiver, StreamPublisher) {
    let rx = StreamReceiver::open("sfm_planner", Endpoint::Listen(loopback()), MESSAGE_SIZE).unwrap();
    let addr = rx.local_addr().unwrap();
    let tx = StreamPublisher::open("sfm_planner", Endpoint::Connect(addr), MESSAGE_SIZE).unwrap();
    (rx, tx)
}

#[test]
fn snapshot_reads_zeroes_before_first_message() {
    let (mut rx, _tx) = connected_pair();
    assert!(rx.snapshot().unwrap().iter().all(|b| *b == 0));
}

#[test]
fn latest_message_replaces_previous() {
    let (mut rx, mut tx) = connected_pair();

    tx.publish(&message(1)).unwrap();
    tx.publish(&message(2)).unwrap();
    wait_for(|| rx.generation() >= 2);

    let snap = rx.snapshot().unwrap();
    assert_eq!(snap, message(2));
    // Repeated snapshots without a new publish return the same message.
    assert_eq!(rx.snapshot().unwrap(), snap);
}

#[test]
fn publisher_close_disconnects_receiver() {
    let (mut rx, mut tx) = connected_pair();
    tx.publish(&message(1)).unwrap();
    wait_for(|| rx.generation() >= 1);

    drop(tx);
    wait_for(|| matches!(rx.snapshot(), Err(ChannelError::Disconnected(_))));
}

#[test]
fn wrong_size_publish_is_rejected() {
    let (_rx, mut tx) = connected_pair();
    let err = tx.publish(&[0u8; 10]).unwrap_err();
    assert!(matches!(
        err,
        ChannelError::SizeMismatch {
            expected: MESSAGE_SIZE,
            actual: 10,
            ..
        }
    ));
}

#[test]
fn connecting_receiver_reads_from_accepted_publisher() {
    let listener = TcpListener::bind(loopback()).unwrap();
    let addr = listener.local_addr().unwrap();
    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut tx = StreamPublisher::from_stream("planner_dasm", stream, MESSAGE_SIZE).unwrap();
        tx.publish(&message(9)).unwrap();
        tx
    });

    let mut rx = StreamReceiver::open("planner_dasm", Endpoint::Connect(addr), MESSAGE_SIZE).unwrap();
    assert_eq!(rx.local_addr(), None);
    let _tx = server.join().unwrap();
    wait_for(|| rx.generation() >= 1);

    let snap = rx.snapshot().unwrap();
    let rec = StageRecord::read_at(&snap, ChainId::new(3).unwrap(), Level::new(3).unwrap()).unwrap();
    assert_eq!(rec.id, 9);
}
