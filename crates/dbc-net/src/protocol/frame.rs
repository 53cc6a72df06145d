// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Length-prefix framing.
//!
//! TCP has no message boundaries, so every message is wrapped in a frame:
//!
//! ```text
//! +------------------+------------------+------------------------+
//! | packet_len (4B)  | packet_type (4B) | header + body          |
//! +------------------+------------------+------------------------+
//! ```
//!
//! - **packet_len**: `u32` big-endian, the length of the *whole* frame,
//!   including both header fields.
//! - **packet_type**: `u32` big-endian; the low byte selects the body
//!   protocol, bit `0x100` marks a deflate-compressed payload.
//!
//! The length is validated before anything else is read. A declared length
//! outside `[MIN_FRAME_LEN, max]` is a protocol violation that tears the
//! channel down; it is never reported as "need more data".

/// Bytes needed before the length can be validated.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Smallest well-formed frame.
pub const MIN_FRAME_LEN: usize = 30;

/// Default largest accepted frame (4 MiB).
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Protocol id of the binary body encoding.
pub const PROTOCOL_BINARY: u32 = 0x00;

/// Payload compressed with deflate.
pub const COMPRESS_FLAG: u32 = 0x100;

/// Result of inspecting a buffer for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseResult {
    /// Whole frame buffered: total frame length.
    Complete(usize),
    /// More bytes needed (count of missing bytes).
    Incomplete(usize),
    /// Declared length exceeds the maximum.
    TooLarge(usize),
    /// Declared length below [`MIN_FRAME_LEN`].
    TooSmall(usize),
}

/// Decoded frame header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub packet_len: u32,
    pub packet_type: u32,
}

impl FrameHeader {
    pub fn protocol(&self) -> u32 {
        self.packet_type & 0xff
    }

    pub fn is_compressed(&self) -> bool {
        self.packet_type & COMPRESS_FLAG != 0
    }

    /// Write both header fields in network order.
    pub fn to_bytes(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut out = [0u8; FRAME_HEADER_SIZE];
        out[..4].copy_from_slice(&self.packet_len.to_be_bytes());
        out[4..].copy_from_slice(&self.packet_type.to_be_bytes());
        out
    }

    /// Read the header from the first eight bytes of `buf`.
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < FRAME_HEADER_SIZE {
            return None;
        }
        Some(Self {
            packet_len: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            packet_type: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }
}

/// Inspect `buf` without consuming it.
///
/// The length is checked as soon as the header is complete, so an oversized
/// or undersized declaration is reported even when the body has not arrived.
pub fn peek_frame_header(buf: &[u8], max_size: usize) -> ParseResult {
    let header = match FrameHeader::from_bytes(buf) {
        Some(h) => h,
        None => return ParseResult::Incomplete(FRAME_HEADER_SIZE - buf.len()),
    };

    let len = header.packet_len as usize;
    if len > max_size {
        return ParseResult::TooLarge(len);
    }
    if len < MIN_FRAME_LEN {
        return ParseResult::TooSmall(len);
    }
    if buf.len() < len {
        return ParseResult::Incomplete(len - buf.len());
    }

    ParseResult::Complete(len)
}

/// Extract the complete frame at the start of `buf`, if any.
pub fn extract_frame(buf: &[u8], max_size: usize) -> Option<&[u8]> {
    match peek_frame_header(buf, max_size) {
        ParseResult::Complete(len) => Some(&buf[..len]),
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_of_len(len: usize) -> Vec<u8> {
        let mut buf = FrameHeader {
            packet_len: len as u32,
            packet_type: PROTOCOL_BINARY,
        }
        .to_bytes()
        .to_vec();
        buf.resize(len.max(FRAME_HEADER_SIZE), 0xAB);
        buf
    }

    #[test]
    fn test_incomplete_header() {
        assert_eq!(peek_frame_header(&[], MAX_FRAME_LEN), ParseResult::Incomplete(8));
        assert_eq!(
            peek_frame_header(&[0, 0, 0], MAX_FRAME_LEN),
            ParseResult::Incomplete(5)
        );
    }

    #[test]
    fn test_complete_frame() {
        let buf = frame_of_len(40);
        assert_eq!(peek_frame_header(&buf, MAX_FRAME_LEN), ParseResult::Complete(40));
        assert_eq!(extract_frame(&buf, MAX_FRAME_LEN).map(<[u8]>::len), Some(40));
    }

    #[test]
    fn test_partial_body() {
        let buf = frame_of_len(40);
        assert_eq!(
            peek_frame_header(&buf[..20], MAX_FRAME_LEN),
            ParseResult::Incomplete(20)
        );
        assert!(extract_frame(&buf[..20], MAX_FRAME_LEN).is_none());
    }

    #[test]
    fn test_too_large_reported_before_body() {
        // only the header is buffered; the length alone is enough to reject
        let header = FrameHeader {
            packet_len: (MAX_FRAME_LEN + 1) as u32,
            packet_type: 0,
        }
        .to_bytes();
        assert_eq!(
            peek_frame_header(&header, MAX_FRAME_LEN),
            ParseResult::TooLarge(MAX_FRAME_LEN + 1)
        );
    }

    #[test]
    fn test_too_small() {
        let buf = frame_of_len(MIN_FRAME_LEN - 1);
        assert_eq!(
            peek_frame_header(&buf, MAX_FRAME_LEN),
            ParseResult::TooSmall(MIN_FRAME_LEN - 1)
        );
        let buf = frame_of_len(0);
        assert_eq!(peek_frame_header(&buf, MAX_FRAME_LEN), ParseResult::TooSmall(0));
    }

    #[test]
    fn test_max_u32_length_rejected() {
        let header = [0xff, 0xff, 0xff, 0xff, 0, 0, 0, 0];
        assert!(matches!(
            peek_frame_header(&header, MAX_FRAME_LEN),
            ParseResult::TooLarge(_)
        ));
    }

    #[test]
    fn test_packet_type_bits() {
        let h = FrameHeader {
            packet_len: 64,
            packet_type: COMPRESS_FLAG | PROTOCOL_BINARY,
        };
        assert!(h.is_compressed());
        assert_eq!(h.protocol(), PROTOCOL_BINARY);
        assert_eq!(FrameHeader::from_bytes(&h.to_bytes()), Some(h));
    }
}
