// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message model.
//!
//! A [`Message`] is what travels through channels and the topic bus: routing
//! information (`src_sid`/`dst_sid`, local only), the wire [`BaseHeader`] and a
//! [`MessageBody`]. Bodies form a closed set of variants; application payloads
//! the core does not interpret travel as [`MessageBody::Opaque`].

use std::collections::BTreeMap;
use std::net::SocketAddr;

use crate::socket_id::SocketId;

// ============================================================================
// Message names
// ============================================================================

pub const VER_REQ: &str = "ver_req";
pub const VER_RESP: &str = "ver_resp";
pub const SHAKE_HAND_REQ: &str = "shake_hand_req";
pub const SHAKE_HAND_RESP: &str = "shake_hand_resp";
pub const GET_PEER_NODES_REQ: &str = "get_peer_nodes_req";
pub const GET_PEER_NODES_RESP: &str = "get_peer_nodes_resp";
pub const PEER_NODES_BROADCAST_REQ: &str = "peer_nodes_broadcast_req";
pub const SERVICE_BROADCAST_REQ: &str = "service_broadcast_req";

/// Application messages carried as opaque payloads.
pub const APPLICATION_MESSAGES: &[&str] = &[
    SERVICE_BROADCAST_REQ,
    "node_create_task_req",
    "node_create_task_rsp",
    "node_start_task_req",
    "node_start_task_rsp",
    "node_stop_task_req",
    "node_stop_task_rsp",
    "node_restart_task_req",
    "node_restart_task_rsp",
    "node_reset_task_req",
    "node_reset_task_rsp",
    "node_destroy_task_req",
    "node_destroy_task_rsp",
    "node_list_task_req",
    "node_list_task_rsp",
    "node_task_logs_req",
    "node_task_logs_rsp",
    "show_req",
    "show_resp",
];

// ============================================================================
// Local notification topics
// ============================================================================

/// Topic carrying [`ConnectNotification`].
pub const CLIENT_CONNECT_NOTIFICATION: &str = "client_tcp_connect_notification";
/// Topic carrying [`ChannelErrorNotification`].
pub const TCP_CHANNEL_ERROR: &str = "tcp_socket_channel_error";
/// Topic carrying [`TimeTick`].
pub const TIME_TICK_NOTIFICATION: &str = "time_tick_notification";

// ============================================================================
// Network identity
// ============================================================================

/// Magic value of the main network.
pub const MAIN_NET_MAGIC: i32 = 0xF1E1_D1E1_u32 as i32;
/// Magic value of the test network.
pub const TEST_NET_MAGIC: i32 = 0xE1D1_A097_u32 as i32;

/// Node software version advertised in the handshake.
pub const CORE_VERSION: i32 = 0x0001_0101;
/// Wire protocol version advertised in the handshake.
pub const PROTOCOL_VERSION: i32 = 0x0000_0001;

/// Random 128-bit nonce rendered as 32 lowercase hex digits.
pub fn create_nonce() -> String {
    format!("{:016x}{:016x}", fastrand::u64(..), fastrand::u64(..))
}

// ============================================================================
// Header
// ============================================================================

/// Header serialized in front of every body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BaseHeader {
    /// Network discriminator (main / test net).
    pub magic: i32,
    /// Message name, used as the bus topic.
    pub msg_name: String,
    /// Dedup nonce; empty for keepalives.
    pub nonce: String,
    pub session_id: String,
    /// Node ids the request travelled through; responses walk it backwards.
    pub path: Vec<String>,
    pub exten_info: BTreeMap<String, String>,
}

// ============================================================================
// Bodies
// ============================================================================

/// Address advertised inside the version handshake.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NetworkAddress {
    pub ip: String,
    pub port: u16,
}

impl From<SocketAddr> for NetworkAddress {
    fn from(addr: SocketAddr) -> Self {
        Self {
            ip: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VerReq {
    pub node_id: String,
    pub core_version: i32,
    pub protocol_version: i32,
    pub time_stamp: i64,
    pub addr_me: NetworkAddress,
    pub addr_you: NetworkAddress,
    pub start_height: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VerResp {
    pub node_id: String,
    pub core_version: i32,
    pub protocol_version: i32,
}

/// One entry of a peer list exchange.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PeerNodeInfo {
    pub node_id: String,
    pub live_time_stamp: i64,
    pub addr: NetworkAddress,
    pub service_list: Vec<String>,
}

/// Closed set of body kinds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageBody {
    VerReq(VerReq),
    VerResp(VerResp),
    ShakeHandReq,
    ShakeHandResp,
    GetPeerNodesReq,
    /// `get_peer_nodes_resp` and `peer_nodes_broadcast_req`.
    PeerNodes(Vec<PeerNodeInfo>),
    /// Application payload the core routes without interpreting.
    Opaque(Vec<u8>),
}

/// Discriminator of [`MessageBody`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    VerReq,
    VerResp,
    ShakeHandReq,
    ShakeHandResp,
    GetPeerNodesReq,
    PeerNodes,
    Opaque,
}

impl MessageBody {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageBody::VerReq(_) => MessageKind::VerReq,
            MessageBody::VerResp(_) => MessageKind::VerResp,
            MessageBody::ShakeHandReq => MessageKind::ShakeHandReq,
            MessageBody::ShakeHandResp => MessageKind::ShakeHandResp,
            MessageBody::GetPeerNodesReq => MessageKind::GetPeerNodesReq,
            MessageBody::PeerNodes(_) => MessageKind::PeerNodes,
            MessageBody::Opaque(_) => MessageKind::Opaque,
        }
    }
}

// ============================================================================
// Message
// ============================================================================

/// A routed message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Channel the message arrived on (set by the receiving channel).
    pub src_sid: SocketId,
    /// Channel the message is addressed to, when sent point-to-point.
    pub dst_sid: SocketId,
    pub header: BaseHeader,
    pub body: MessageBody,
}

impl Message {
    /// New message with the given name and body and an empty header otherwise.
    pub fn new(name: impl Into<String>, body: MessageBody) -> Self {
        Self {
            src_sid: SocketId::unset(),
            dst_sid: SocketId::unset(),
            header: BaseHeader {
                msg_name: name.into(),
                ..Default::default()
            },
            body,
        }
    }

    /// Builder: set the network magic.
    pub fn with_magic(mut self, magic: i32) -> Self {
        self.header.magic = magic;
        self
    }

    /// Builder: set the nonce.
    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.header.nonce = nonce.into();
        self
    }

    /// Builder: attach a fresh random nonce.
    pub fn with_new_nonce(self) -> Self {
        self.with_nonce(create_nonce())
    }

    /// Builder: set the session id.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.header.session_id = session_id.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.header.msg_name
    }

    pub fn nonce(&self) -> &str {
        &self.header.nonce
    }

    /// `shake_hand_req` / `shake_hand_resp`.
    pub fn is_keepalive(&self) -> bool {
        matches!(self.name(), SHAKE_HAND_REQ | SHAKE_HAND_RESP)
    }

    /// Version and keepalive messages.
    pub fn is_handshake(&self) -> bool {
        matches!(
            self.name(),
            VER_REQ | VER_RESP | SHAKE_HAND_REQ | SHAKE_HAND_RESP
        )
    }
}

// ============================================================================
// Local notifications
// ============================================================================

/// Outcome of an outbound connector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectStatus {
    /// TCP connection established and channel registered.
    Success,
    /// Retry budget exhausted.
    Failed,
}

/// Published on [`CLIENT_CONNECT_NOTIFICATION`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectNotification {
    pub sid: SocketId,
    pub endpoint: SocketAddr,
    pub status: ConnectStatus,
}

/// Published on [`TCP_CHANNEL_ERROR`] right before a channel is torn down.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelErrorNotification {
    pub sid: SocketId,
    pub endpoint: SocketAddr,
    /// Whether the channel had completed its version handshake.
    pub logged_in: bool,
    pub reason: String,
}

/// Published on [`TIME_TICK_NOTIFICATION`] by the tick source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeTick(pub u64);

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_format() {
        let a = create_nonce();
        let b = create_nonce();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_message_builders() {
        let msg = Message::new(GET_PEER_NODES_REQ, MessageBody::GetPeerNodesReq)
            .with_magic(TEST_NET_MAGIC)
            .with_nonce("abc")
            .with_session("s1");
        assert_eq!(msg.name(), GET_PEER_NODES_REQ);
        assert_eq!(msg.nonce(), "abc");
        assert_eq!(msg.header.magic, TEST_NET_MAGIC);
        assert_eq!(msg.header.session_id, "s1");
        assert!(msg.src_sid.is_unset());
    }

    #[test]
    fn test_handshake_classification() {
        let ka = Message::new(SHAKE_HAND_REQ, MessageBody::ShakeHandReq);
        assert!(ka.is_keepalive());
        assert!(ka.is_handshake());

        let ver = Message::new(VER_REQ, MessageBody::VerReq(VerReq::default()));
        assert!(!ver.is_keepalive());
        assert!(ver.is_handshake());

        let app = Message::new("show_req", MessageBody::Opaque(vec![1]));
        assert!(!app.is_handshake());
        assert_eq!(app.body.kind(), MessageKind::Opaque);
    }

    #[test]
    fn test_network_address_from_socket_addr() {
        let addr: SocketAddr = "10.0.0.7:11107".parse().unwrap();
        let na = NetworkAddress::from(addr);
        assert_eq!(na.ip, "10.0.0.7");
        assert_eq!(na.port, 11107);
    }
}
