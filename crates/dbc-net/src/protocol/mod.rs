// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire protocol: framing, message model and codec.

pub mod codec;
pub mod frame;
pub mod message;

pub use codec::{BodyDecoder, CodecTable, Decoded, MessageCodec, COMPRESS_THRESHOLD};
pub use frame::{
    extract_frame, peek_frame_header, FrameHeader, ParseResult, COMPRESS_FLAG, FRAME_HEADER_SIZE,
    MAX_FRAME_LEN, MIN_FRAME_LEN, PROTOCOL_BINARY,
};
pub use message::*;
