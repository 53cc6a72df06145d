// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message codec.
//!
//! Turns [`Message`]s into frames and back. Decoding is split in two stages
//! with very different failure semantics:
//!
//! 1. **Framing** ([`peek_frame_header`]): a bad declared length is a
//!    protocol error and the caller must close the channel.
//! 2. **Body** (header fields + body decoder looked up by message name):
//!    any failure inside a well-framed buffer yields [`Decoded::Unknown`].
//!    The frame is consumed and the stream stays in sync, so message types
//!    added by newer peers never kill a connection.
//!
//! Body decoders live in a [`CodecTable`] keyed by message name. The table
//! comes pre-populated with the handshake, peer-exchange and application
//! names; services register extra names with
//! [`CodecTable::register_opaque`].

use std::collections::HashMap;
use std::sync::Arc;

use super::frame::{
    peek_frame_header, FrameHeader, ParseResult, COMPRESS_FLAG, FRAME_HEADER_SIZE,
    MAX_FRAME_LEN, MIN_FRAME_LEN, PROTOCOL_BINARY,
};
use super::message::*;
use crate::buffer::ByteBuf;
use crate::error::{Error, Result};

/// Payloads above this size are candidates for compression.
pub const COMPRESS_THRESHOLD: usize = 1024;

/// Outcome of one decode attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete, recognized message.
    Message(Message),
    /// Partial frame; keep the bytes and read more.
    NeedMore,
    /// Well-framed but not decodable; the frame was skipped.
    Unknown(String),
}

/// Body decoder function.
pub type BodyDecoder = fn(&mut ByteBuf) -> Result<MessageBody>;

// ============================================================================
// Codec table
// ============================================================================

/// Message name to body decoder lookup table.
#[derive(Clone)]
pub struct CodecTable {
    decoders: HashMap<String, BodyDecoder>,
}

impl CodecTable {
    /// Empty table (nothing decodes).
    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Table with the built-in handshake, peer and application messages.
    pub fn with_defaults() -> Self {
        let mut table = Self::empty();
        table.register(VER_REQ, decode_ver_req);
        table.register(VER_RESP, decode_ver_resp);
        table.register(SHAKE_HAND_REQ, |_| Ok(MessageBody::ShakeHandReq));
        table.register(SHAKE_HAND_RESP, |_| Ok(MessageBody::ShakeHandResp));
        table.register(GET_PEER_NODES_REQ, |_| Ok(MessageBody::GetPeerNodesReq));
        table.register(GET_PEER_NODES_RESP, decode_peer_nodes);
        table.register(PEER_NODES_BROADCAST_REQ, decode_peer_nodes);
        for name in APPLICATION_MESSAGES {
            table.register_opaque(name);
        }
        table
    }

    pub fn register(&mut self, name: &str, decoder: BodyDecoder) {
        self.decoders.insert(name.to_string(), decoder);
    }

    /// Accept `name` and hand its body through as raw bytes.
    pub fn register_opaque(&mut self, name: &str) {
        self.register(name, decode_opaque);
    }

    pub fn get(&self, name: &str) -> Option<BodyDecoder> {
        self.decoders.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.decoders.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}

impl Default for CodecTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for CodecTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.decoders.keys().collect();
        names.sort();
        f.debug_struct("CodecTable").field("names", &names).finish()
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Stateless frame encoder / decoder.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    table: Arc<CodecTable>,
    max_frame_len: usize,
    compress: bool,
}

impl MessageCodec {
    pub fn new(table: Arc<CodecTable>, max_frame_len: usize) -> Self {
        Self {
            table,
            max_frame_len,
            compress: false,
        }
    }

    /// Codec over the default table and frame limit.
    pub fn with_defaults() -> Self {
        Self::new(Arc::new(CodecTable::with_defaults()), MAX_FRAME_LEN)
    }

    /// Builder: compress payloads above [`COMPRESS_THRESHOLD`] when it helps.
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compress = enabled;
        self
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    pub fn table(&self) -> &CodecTable {
        &self.table
    }

    /// Append the frame for `msg` to `out`; returns the frame length.
    pub fn encode(&self, msg: &Message, out: &mut ByteBuf) -> Result<usize> {
        let mut payload = ByteBuf::new(256);
        write_header(&msg.header, &mut payload)?;
        write_body(&msg.body, &mut payload)?;

        let (bytes, packet_type) = self.maybe_compress(payload.readable());
        let total = FRAME_HEADER_SIZE + bytes.len();
        if total > self.max_frame_len {
            return Err(Error::Encode(format!(
                "{} frame of {} bytes exceeds {}",
                msg.name(),
                total,
                self.max_frame_len
            )));
        }
        if total < MIN_FRAME_LEN {
            return Err(Error::Encode(format!(
                "{} frame of {} bytes below minimum {}",
                msg.name(),
                total,
                MIN_FRAME_LEN
            )));
        }

        let header = FrameHeader {
            packet_len: total as u32,
            packet_type,
        };
        out.put_slice(&header.to_bytes())?;
        out.put_slice(&bytes)?;
        Ok(total)
    }

    /// Encode into a fresh vector.
    pub fn encode_to_vec(&self, msg: &Message) -> Result<Vec<u8>> {
        let mut out = ByteBuf::new(256);
        self.encode(msg, &mut out)?;
        Ok(out.readable().to_vec())
    }

    /// Try to take one frame off the front of `input`.
    ///
    /// Returns an error only for framing violations; those leave `input`
    /// untouched and the channel must be closed.
    pub fn decode(&self, input: &mut ByteBuf) -> Result<Decoded> {
        match peek_frame_header(input.readable(), self.max_frame_len) {
            ParseResult::Incomplete(_) => Ok(Decoded::NeedMore),
            ParseResult::TooLarge(len) => Err(Error::FrameTooLarge {
                len,
                max: self.max_frame_len,
            }),
            ParseResult::TooSmall(len) => Err(Error::FrameTooSmall {
                len,
                min: MIN_FRAME_LEN,
            }),
            ParseResult::Complete(len) => {
                let frame = input.take(len)?;
                Ok(self.decode_frame(&frame))
            }
        }
    }

    fn decode_frame(&self, frame: &[u8]) -> Decoded {
        let header = match FrameHeader::from_bytes(frame) {
            Some(h) => h,
            None => return Decoded::Unknown(String::new()),
        };
        if header.protocol() != PROTOCOL_BINARY {
            log::warn!("[CODEC] unsupported body protocol {}", header.protocol());
            return Decoded::Unknown(format!("protocol:{}", header.protocol()));
        }

        let raw = &frame[FRAME_HEADER_SIZE..];
        let payload = if header.is_compressed() {
            match self.decompress(raw) {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("[CODEC] decompress failed: {}", e);
                    return Decoded::Unknown(String::new());
                }
            }
        } else {
            raw.to_vec()
        };

        let mut buf = ByteBuf::from_slice(&payload);
        let base = match read_header(&mut buf) {
            Ok(h) => h,
            Err(e) => {
                log::warn!("[CODEC] bad message header: {}", e);
                return Decoded::Unknown(String::new());
            }
        };

        let decoder = match self.table.get(&base.msg_name) {
            Some(d) => d,
            None => {
                log::debug!("[CODEC] unknown message: {}", base.msg_name);
                return Decoded::Unknown(base.msg_name);
            }
        };

        let body = match decoder(&mut buf) {
            Ok(b) => b,
            Err(e) => {
                log::warn!("[CODEC] bad {} body: {}", base.msg_name, e);
                return Decoded::Unknown(base.msg_name);
            }
        };
        if !buf.is_empty() {
            log::warn!(
                "[CODEC] {} has {} trailing bytes",
                base.msg_name,
                buf.valid_read_len()
            );
            return Decoded::Unknown(base.msg_name);
        }

        Decoded::Message(Message {
            src_sid: Default::default(),
            dst_sid: Default::default(),
            header: base,
            body,
        })
    }

    #[cfg(feature = "compression")]
    fn maybe_compress(&self, payload: &[u8]) -> (Vec<u8>, u32) {
        use flate2::write::DeflateEncoder;
        use flate2::Compression;
        use std::io::Write;

        if !self.compress || payload.len() <= COMPRESS_THRESHOLD {
            return (payload.to_vec(), PROTOCOL_BINARY);
        }
        let mut encoder = DeflateEncoder::new(Vec::with_capacity(payload.len() / 2), Compression::fast());
        let compressed = encoder.write_all(payload).and_then(|_| encoder.finish());
        match compressed {
            Ok(c) if c.len() < payload.len() => (c, PROTOCOL_BINARY | COMPRESS_FLAG),
            _ => (payload.to_vec(), PROTOCOL_BINARY),
        }
    }

    #[cfg(not(feature = "compression"))]
    fn maybe_compress(&self, payload: &[u8]) -> (Vec<u8>, u32) {
        (payload.to_vec(), PROTOCOL_BINARY)
    }

    #[cfg(feature = "compression")]
    fn decompress(&self, raw: &[u8]) -> Result<Vec<u8>> {
        use flate2::read::DeflateDecoder;
        use std::io::Read;

        let limit = self.max_frame_len as u64;
        let mut out = Vec::new();
        DeflateDecoder::new(raw)
            .take(limit + 1)
            .read_to_end(&mut out)?;
        if out.len() as u64 > limit {
            return Err(Error::Decode(format!("inflated payload exceeds {} bytes", limit)));
        }
        Ok(out)
    }

    #[cfg(not(feature = "compression"))]
    fn decompress(&self, _raw: &[u8]) -> Result<Vec<u8>> {
        Err(Error::Decode("compression support not built in".into()))
    }
}

// ============================================================================
// Field encoding
// ============================================================================

fn write_header(h: &BaseHeader, out: &mut ByteBuf) -> Result<()> {
    out.put_i32(h.magic)?;
    out.put_string(&h.msg_name)?;
    out.put_string(&h.nonce)?;
    out.put_string(&h.session_id)?;
    put_string_list(&h.path, out)?;
    out.put_u32(h.exten_info.len() as u32)?;
    for (k, v) in &h.exten_info {
        out.put_string(k)?;
        out.put_string(v)?;
    }
    Ok(())
}

fn read_header(buf: &mut ByteBuf) -> Result<BaseHeader> {
    let magic = buf.get_i32()?;
    let msg_name = buf.get_string()?;
    let nonce = buf.get_string()?;
    let session_id = buf.get_string()?;
    let path = get_string_list(buf)?;
    let count = buf.get_u32()?;
    let mut exten_info = std::collections::BTreeMap::new();
    for _ in 0..count {
        let k = buf.get_string()?;
        let v = buf.get_string()?;
        exten_info.insert(k, v);
    }
    Ok(BaseHeader {
        magic,
        msg_name,
        nonce,
        session_id,
        path,
        exten_info,
    })
}

fn write_body(body: &MessageBody, out: &mut ByteBuf) -> Result<()> {
    match body {
        MessageBody::VerReq(v) => {
            out.put_string(&v.node_id)?;
            out.put_i32(v.core_version)?;
            out.put_i32(v.protocol_version)?;
            out.put_i64(v.time_stamp)?;
            put_address(&v.addr_me, out)?;
            put_address(&v.addr_you, out)?;
            out.put_u64(v.start_height)
        }
        MessageBody::VerResp(v) => {
            out.put_string(&v.node_id)?;
            out.put_i32(v.core_version)?;
            out.put_i32(v.protocol_version)
        }
        MessageBody::ShakeHandReq | MessageBody::ShakeHandResp | MessageBody::GetPeerNodesReq => {
            Ok(())
        }
        MessageBody::PeerNodes(nodes) => {
            out.put_u32(nodes.len() as u32)?;
            for n in nodes {
                out.put_string(&n.node_id)?;
                out.put_i64(n.live_time_stamp)?;
                put_address(&n.addr, out)?;
                put_string_list(&n.service_list, out)?;
            }
            Ok(())
        }
        MessageBody::Opaque(bytes) => out.put_slice(bytes),
    }
}

fn decode_ver_req(buf: &mut ByteBuf) -> Result<MessageBody> {
    Ok(MessageBody::VerReq(VerReq {
        node_id: buf.get_string()?,
        core_version: buf.get_i32()?,
        protocol_version: buf.get_i32()?,
        time_stamp: buf.get_i64()?,
        addr_me: get_address(buf)?,
        addr_you: get_address(buf)?,
        start_height: buf.get_u64()?,
    }))
}

fn decode_ver_resp(buf: &mut ByteBuf) -> Result<MessageBody> {
    Ok(MessageBody::VerResp(VerResp {
        node_id: buf.get_string()?,
        core_version: buf.get_i32()?,
        protocol_version: buf.get_i32()?,
    }))
}

fn decode_peer_nodes(buf: &mut ByteBuf) -> Result<MessageBody> {
    let count = buf.get_u32()?;
    let mut nodes = Vec::new();
    for _ in 0..count {
        nodes.push(PeerNodeInfo {
            node_id: buf.get_string()?,
            live_time_stamp: buf.get_i64()?,
            addr: get_address(buf)?,
            service_list: get_string_list(buf)?,
        });
    }
    Ok(MessageBody::PeerNodes(nodes))
}

fn decode_opaque(buf: &mut ByteBuf) -> Result<MessageBody> {
    let len = buf.valid_read_len();
    Ok(MessageBody::Opaque(buf.take(len)?))
}

fn put_address(a: &NetworkAddress, out: &mut ByteBuf) -> Result<()> {
    out.put_string(&a.ip)?;
    out.put_u16(a.port)
}

fn get_address(buf: &mut ByteBuf) -> Result<NetworkAddress> {
    Ok(NetworkAddress {
        ip: buf.get_string()?,
        port: buf.get_u16()?,
    })
}

fn put_string_list(list: &[String], out: &mut ByteBuf) -> Result<()> {
    out.put_u32(list.len() as u32)?;
    for s in list {
        out.put_string(s)?;
    }
    Ok(())
}

fn get_string_list(buf: &mut ByteBuf) -> Result<Vec<String>> {
    let count = buf.get_u32()?;
    let mut list = Vec::new();
    for _ in 0..count {
        list.push(buf.get_string()?);
    }
    Ok(list)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ver_req() -> Message {
        let mut msg = Message::new(
            VER_REQ,
            MessageBody::VerReq(VerReq {
                node_id: "node.1.abc".into(),
                core_version: CORE_VERSION,
                protocol_version: PROTOCOL_VERSION,
                time_stamp: 1_700_000_000,
                addr_me: NetworkAddress {
                    ip: "10.0.0.1".into(),
                    port: 11107,
                },
                addr_you: NetworkAddress {
                    ip: "10.0.0.2".into(),
                    port: 11107,
                },
                start_height: 0,
            }),
        )
        .with_magic(TEST_NET_MAGIC)
        .with_nonce("n-1");
        msg.header.path = vec!["a".into(), "b".into()];
        msg.header
            .exten_info
            .insert("origin_id".into(), "node.1.abc".into());
        msg
    }

    #[test]
    fn test_roundtrip_ver_req() {
        let codec = MessageCodec::with_defaults();
        let msg = ver_req();
        let mut buf = ByteBuf::default();
        let len = codec.encode(&msg, &mut buf).unwrap();
        assert_eq!(buf.valid_read_len(), len);
        assert_eq!(buf.peek_u32(0), Some(len as u32));

        match codec.decode(&mut buf).unwrap() {
            Decoded::Message(decoded) => assert_eq!(decoded, msg),
            other => panic!("unexpected {:?}", other),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_roundtrip_peer_nodes_and_opaque() {
        let codec = MessageCodec::with_defaults();
        let peers = Message::new(
            PEER_NODES_BROADCAST_REQ,
            MessageBody::PeerNodes(vec![PeerNodeInfo {
                node_id: "n2".into(),
                live_time_stamp: 12,
                addr: NetworkAddress {
                    ip: "1.2.3.4".into(),
                    port: 21107,
                },
                service_list: vec!["ai_training".into()],
            }]),
        )
        .with_nonce("p");
        let task = Message::new("node_list_task_req", MessageBody::Opaque(b"{\"task\":1}".to_vec()))
            .with_nonce("t");

        let mut buf = ByteBuf::default();
        codec.encode(&peers, &mut buf).unwrap();
        codec.encode(&task, &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap(), Decoded::Message(peers));
        assert_eq!(codec.decode(&mut buf).unwrap(), Decoded::Message(task));
        assert_eq!(codec.decode(&mut buf).unwrap(), Decoded::NeedMore);
    }

    #[test]
    fn test_partial_frame_is_need_more() {
        let codec = MessageCodec::with_defaults();
        let bytes = codec.encode_to_vec(&ver_req()).unwrap();

        let mut buf = ByteBuf::default();
        buf.put_slice(&bytes[..bytes.len() - 1]).unwrap();
        assert_eq!(codec.decode(&mut buf).unwrap(), Decoded::NeedMore);
        // nothing consumed while incomplete
        assert_eq!(buf.valid_read_len(), bytes.len() - 1);

        buf.put_slice(&bytes[bytes.len() - 1..]).unwrap();
        assert!(matches!(codec.decode(&mut buf).unwrap(), Decoded::Message(_)));
    }

    #[test]
    fn test_length_violations_are_errors() {
        let codec = MessageCodec::new(Arc::new(CodecTable::with_defaults()), 64);

        let mut big = ByteBuf::default();
        big.put_u32(65).unwrap();
        big.put_u32(0).unwrap();
        assert!(matches!(
            codec.decode(&mut big),
            Err(Error::FrameTooLarge { len: 65, max: 64 })
        ));

        let mut small = ByteBuf::default();
        small.put_u32(12).unwrap();
        small.put_u32(0).unwrap();
        small.put_slice(&[0u8; 4]).unwrap();
        assert!(matches!(
            codec.decode(&mut small),
            Err(Error::FrameTooSmall { len: 12, .. })
        ));
    }

    #[test]
    fn test_unknown_message_is_skipped() {
        let codec = MessageCodec::with_defaults();
        let unknown = Message::new("future_feature_req", MessageBody::Opaque(vec![9; 8]));
        let known = Message::new(GET_PEER_NODES_REQ, MessageBody::GetPeerNodesReq).with_nonce("k");

        let mut buf = ByteBuf::default();
        codec.encode(&unknown, &mut buf).unwrap();
        codec.encode(&known, &mut buf).unwrap();

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Decoded::Unknown("future_feature_req".into())
        );
        // stream stays in sync after the skipped frame
        assert_eq!(codec.decode(&mut buf).unwrap(), Decoded::Message(known));
    }

    #[test]
    fn test_registered_opaque_name_decodes() {
        let mut table = CodecTable::with_defaults();
        table.register_opaque("future_feature_req");
        let codec = MessageCodec::new(Arc::new(table), MAX_FRAME_LEN);
        let msg = Message::new("future_feature_req", MessageBody::Opaque(vec![1, 2, 3]));

        let mut buf = ByteBuf::default();
        codec.encode(&msg, &mut buf).unwrap();
        assert_eq!(codec.decode(&mut buf).unwrap(), Decoded::Message(msg));
    }

    #[test]
    fn test_truncated_body_is_unknown() {
        let codec = MessageCodec::with_defaults();
        let mut bytes = codec.encode_to_vec(&ver_req()).unwrap();
        // chop the body and patch the declared length to match
        bytes.truncate(bytes.len() - 6);
        let len = bytes.len() as u32;
        bytes[..4].copy_from_slice(&len.to_be_bytes());

        let mut buf = ByteBuf::from_slice(&bytes);
        assert_eq!(codec.decode(&mut buf).unwrap(), Decoded::Unknown(VER_REQ.into()));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_encode_rejects_oversized() {
        let codec = MessageCodec::new(Arc::new(CodecTable::with_defaults()), 128);
        let msg = Message::new("show_req", MessageBody::Opaque(vec![0; 512]));
        let mut buf = ByteBuf::default();
        assert!(matches!(codec.encode(&msg, &mut buf), Err(Error::Encode(_))));
        assert!(buf.is_empty());
    }

    #[cfg(feature = "compression")]
    #[test]
    fn test_compressed_roundtrip() {
        let codec = MessageCodec::with_defaults().with_compression(true);
        let msg = Message::new("node_task_logs_rsp", MessageBody::Opaque(vec![b'x'; 8192]))
            .with_nonce("z");

        let mut buf = ByteBuf::default();
        let len = codec.encode(&msg, &mut buf).unwrap();
        assert!(len < 8192);
        let header = FrameHeader::from_bytes(buf.readable()).unwrap();
        assert!(header.is_compressed());

        assert_eq!(codec.decode(&mut buf).unwrap(), Decoded::Message(msg));
    }

    #[test]
    fn test_default_table_contents() {
        let table = CodecTable::with_defaults();
        for name in [VER_REQ, VER_RESP, SHAKE_HAND_REQ, SHAKE_HAND_RESP, "show_resp"] {
            assert!(table.contains(name), "{} missing", name);
        }
        assert!(!table.contains("nope"));
        assert!(CodecTable::empty().is_empty());
    }
}
