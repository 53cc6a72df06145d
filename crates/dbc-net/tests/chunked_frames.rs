// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test code readability over pedantic

//! A hand-driven peer writes frames in random-sized pieces; the node must
//! reassemble them exactly as if they had arrived whole.

mod common;

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel;
use dbc_net::protocol::{
    Decoded, NetworkAddress, VerReq, CORE_VERSION, PROTOCOL_VERSION, VER_REQ, VER_RESP,
};
use dbc_net::{ByteBuf, Message, MessageBody, MessageCodec};

use common::{test_config, wait_until, Node, WAIT};

/// Write `bytes` in pieces of 1..=max_piece bytes with short pauses.
fn write_chunked(stream: &mut TcpStream, bytes: &[u8], rng: &mut fastrand::Rng, max_piece: usize) {
    let mut rest = bytes;
    while !rest.is_empty() {
        let n = rng.usize(1..=max_piece).min(rest.len());
        stream.write_all(&rest[..n]).unwrap();
        stream.flush().unwrap();
        rest = &rest[n..];
        if rng.bool() {
            thread::sleep(Duration::from_millis(1));
        }
    }
}

/// Block until one full message has been read.
fn read_message(stream: &mut TcpStream, codec: &MessageCodec, buf: &mut ByteBuf) -> Message {
    let mut chunk = [0u8; 4096];
    loop {
        match codec.decode(buf).unwrap() {
            Decoded::Message(msg) => return msg,
            Decoded::Unknown(name) => panic!("unexpected message {}", name),
            Decoded::NeedMore => {}
        }
        match stream.read(&mut chunk) {
            Ok(0) => panic!("node closed the connection"),
            Ok(n) => buf.put_slice(&chunk[..n]).unwrap(),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => panic!("read failed: {}", e),
        }
    }
}

fn ver_req(magic: i32) -> Message {
    let req = VerReq {
        node_id: "raw-peer".into(),
        core_version: CORE_VERSION,
        protocol_version: PROTOCOL_VERSION,
        time_stamp: 0,
        addr_me: NetworkAddress::default(),
        addr_you: NetworkAddress::default(),
        start_height: 0,
    };
    Message::new(VER_REQ, MessageBody::VerReq(req))
        .with_magic(magic)
        .with_new_nonce()
}

#[test]
fn test_random_chunking_preserves_frames() {
    let node = Node::start(test_config("node-a"));
    let addr = node.listen();
    let codec = MessageCodec::with_defaults();
    let mut rng = fastrand::Rng::with_seed(0x00db_c0de);

    let (tx, rx) = channel::unbounded();
    node.bus
        .subscribe::<Arc<Message>, _>("show_req", move |m: &Arc<Message>| {
            let _ = tx.send(Arc::clone(m));
        });

    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(WAIT)).unwrap();
    stream.set_nodelay(true).unwrap();

    // handshake, one byte at a time at worst
    let hello = codec.encode_to_vec(&ver_req(node.magic())).unwrap();
    write_chunked(&mut stream, &hello, &mut rng, 5);

    let mut inbound = ByteBuf::new(4096);
    let resp = read_message(&mut stream, &codec, &mut inbound);
    assert_eq!(resp.name(), VER_RESP);
    match resp.body {
        MessageBody::VerResp(ref body) => assert_eq!(body.node_id, "node-a"),
        ref other => panic!("unexpected body {:?}", other),
    }
    assert!(wait_until(WAIT, || node
        .manager
        .registry()
        .snapshot()
        .iter()
        .all(|c| c.is_ready())));

    // a burst of frames of varied sizes, split at arbitrary points
    let payloads: Vec<Vec<u8>> = (0..64)
        .map(|i| (0..rng.usize(0..2048)).map(|j| (i + j) as u8).collect())
        .collect();
    let mut burst = Vec::new();
    for payload in &payloads {
        let msg = node.app_message("show_req", payload.clone());
        burst.extend(codec.encode_to_vec(&msg).unwrap());
    }
    write_chunked(&mut stream, &burst, &mut rng, 300);

    for (i, expected) in payloads.iter().enumerate() {
        let got = rx
            .recv_timeout(WAIT)
            .unwrap_or_else(|_| panic!("message {} never arrived", i));
        assert_eq!(got.body, MessageBody::Opaque(expected.clone()), "message {}", i);
    }
    assert_eq!(node.manager.metrics().snapshot().framing_errors, 0);
}

#[test]
fn test_garbage_length_closes_channel() {
    let node = Node::start(test_config("node-a"));
    let addr = node.listen();

    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(WAIT)).unwrap();
    assert!(wait_until(WAIT, || node.manager.channel_count() == 1));

    // a length prefix far beyond the frame limit
    stream.write_all(&[0xff, 0xff, 0xff, 0xf0, 0, 0, 0, 0]).unwrap();

    let mut buf = [0u8; 64];
    let closed = matches!(stream.read(&mut buf), Ok(0) | Err(_));
    assert!(closed);
    assert!(wait_until(WAIT, || node.manager.channel_count() == 0));
    assert_eq!(node.manager.metrics().snapshot().framing_errors, 1);
}
