// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Growable read/write byte cursor.
//!
//! `ByteBuf` owns one contiguous backing array and two cursors into it:
//!
//! ```text
//! 0            read            write                 capacity
//! |  consumed   |   readable    |      writable         |
//! +-------------+---------------+-----------------------+
//! ```
//!
//! `read <= write <= capacity` holds after every operation. When a write does
//! not fit, consumed bytes are compacted away first; if that is not enough the
//! backing array doubles until it fits, up to `max_len`. Growth beyond
//! `max_len` is a [`Error::BufferOverflow`].
//!
//! Multi-byte integers are big-endian. Strings and byte blobs are prefixed
//! with a `u32` length.

use crate::error::{Error, Result};

/// Default initial capacity of a channel buffer.
pub const DEFAULT_BUF_LEN: usize = 10 * 1024;

/// Hard cap on any byte buffer.
pub const MAX_BYTE_BUF_LEN: usize = 16 * 1024 * 1024;

/// Growable byte buffer with independent read and write cursors.
#[derive(Clone)]
pub struct ByteBuf {
    buf: Vec<u8>,
    read: usize,
    write: usize,
    max_len: usize,
}

impl ByteBuf {
    /// Create a buffer with `len` bytes of initial capacity.
    pub fn new(len: usize) -> Self {
        Self::with_max(len, MAX_BYTE_BUF_LEN)
    }

    /// Create a buffer that may grow up to `max_len` bytes.
    pub fn with_max(len: usize, max_len: usize) -> Self {
        let max_len = max_len.max(1);
        let len = len.clamp(1, max_len);
        Self {
            buf: vec![0; len],
            read: 0,
            write: 0,
            max_len,
        }
    }

    /// Wrap existing bytes as readable content.
    pub fn from_slice(data: &[u8]) -> Self {
        let mut buf = Self::with_max(data.len().max(1), MAX_BYTE_BUF_LEN.max(data.len()));
        buf.buf[..data.len()].copy_from_slice(data);
        buf.write = data.len();
        buf
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Bytes available to read.
    pub fn valid_read_len(&self) -> usize {
        self.write - self.read
    }

    /// Bytes writable without growing.
    pub fn valid_write_len(&self) -> usize {
        self.buf.len() - self.write
    }

    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    /// Readable bytes, without consuming them.
    pub fn readable(&self) -> &[u8] {
        &self.buf[self.read..self.write]
    }

    /// Discard all content and rewind both cursors.
    pub fn clear(&mut self) {
        self.read = 0;
        self.write = 0;
    }

    /// Consume `n` readable bytes.
    pub fn advance_read(&mut self, n: usize) -> Result<()> {
        self.check_readable(n)?;
        self.read += n;
        if self.read == self.write {
            self.clear();
        }
        Ok(())
    }

    /// Ensure at least `min` writable bytes, compacting or growing as needed.
    pub fn reserve(&mut self, min: usize) -> Result<()> {
        if self.valid_write_len() >= min {
            return Ok(());
        }

        let readable = self.valid_read_len();
        let needed = readable
            .checked_add(min)
            .ok_or(Error::BufferOverflow {
                requested: usize::MAX,
                max: self.max_len,
            })?;

        if needed > self.max_len {
            return Err(Error::BufferOverflow {
                requested: needed,
                max: self.max_len,
            });
        }

        self.compact();
        if self.buf.len() >= needed {
            return Ok(());
        }

        let mut new_len = self.buf.len().max(1);
        while new_len < needed {
            new_len = new_len.saturating_mul(2);
        }
        self.buf.resize(new_len.min(self.max_len), 0);
        Ok(())
    }

    /// Writable region; pair with [`ByteBuf::advance_write`] after filling it.
    pub fn writable_mut(&mut self) -> &mut [u8] {
        let write = self.write;
        &mut self.buf[write..]
    }

    /// Commit `n` bytes written through [`ByteBuf::writable_mut`].
    pub fn advance_write(&mut self, n: usize) -> Result<()> {
        if n > self.valid_write_len() {
            return Err(Error::BufferOverflow {
                requested: self.write + n,
                max: self.buf.len(),
            });
        }
        self.write += n;
        Ok(())
    }

    /// Append raw bytes.
    pub fn put_slice(&mut self, data: &[u8]) -> Result<()> {
        self.reserve(data.len())?;
        let start = self.write;
        self.buf[start..start + data.len()].copy_from_slice(data);
        self.write += data.len();
        Ok(())
    }

    /// Read exactly `out.len()` bytes.
    pub fn get_slice(&mut self, out: &mut [u8]) -> Result<()> {
        self.check_readable(out.len())?;
        out.copy_from_slice(&self.buf[self.read..self.read + out.len()]);
        self.advance_read(out.len())
    }

    /// Read `n` bytes into a new vector.
    pub fn take(&mut self, n: usize) -> Result<Vec<u8>> {
        self.check_readable(n)?;
        let out = self.buf[self.read..self.read + n].to_vec();
        self.advance_read(n)?;
        Ok(out)
    }

    // ========================================================================
    // Typed accessors
    // ========================================================================

    pub fn put_u8(&mut self, v: u8) -> Result<()> {
        self.put_slice(&[v])
    }

    pub fn put_u16(&mut self, v: u16) -> Result<()> {
        self.put_slice(&v.to_be_bytes())
    }

    pub fn put_u32(&mut self, v: u32) -> Result<()> {
        self.put_slice(&v.to_be_bytes())
    }

    pub fn put_i32(&mut self, v: i32) -> Result<()> {
        self.put_slice(&v.to_be_bytes())
    }

    pub fn put_u64(&mut self, v: u64) -> Result<()> {
        self.put_slice(&v.to_be_bytes())
    }

    pub fn put_i64(&mut self, v: i64) -> Result<()> {
        self.put_slice(&v.to_be_bytes())
    }

    /// Length-prefixed byte blob.
    pub fn put_bytes(&mut self, v: &[u8]) -> Result<()> {
        let len = u32::try_from(v.len())
            .map_err(|_| Error::Encode(format!("blob too long: {} bytes", v.len())))?;
        self.put_u32(len)?;
        self.put_slice(v)
    }

    /// Length-prefixed UTF-8 string.
    pub fn put_string(&mut self, v: &str) -> Result<()> {
        self.put_bytes(v.as_bytes())
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.get_slice(&mut b)?;
        Ok(b[0])
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        self.get_slice(&mut b)?;
        Ok(u16::from_be_bytes(b))
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.get_slice(&mut b)?;
        Ok(u32::from_be_bytes(b))
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        let mut b = [0u8; 4];
        self.get_slice(&mut b)?;
        Ok(i32::from_be_bytes(b))
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        let mut b = [0u8; 8];
        self.get_slice(&mut b)?;
        Ok(u64::from_be_bytes(b))
    }

    pub fn get_i64(&mut self) -> Result<i64> {
        let mut b = [0u8; 8];
        self.get_slice(&mut b)?;
        Ok(i64::from_be_bytes(b))
    }

    pub fn get_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.get_u32()? as usize;
        self.take(len)
    }

    pub fn get_string(&mut self) -> Result<String> {
        let raw = self.get_bytes()?;
        String::from_utf8(raw).map_err(|e| Error::Decode(format!("invalid utf-8: {}", e)))
    }

    /// Peek a big-endian `u32` at `offset` from the read cursor.
    pub fn peek_u32(&self, offset: usize) -> Option<u32> {
        let start = self.read.checked_add(offset)?;
        let end = start.checked_add(4)?;
        if end > self.write {
            return None;
        }
        let mut b = [0u8; 4];
        b.copy_from_slice(&self.buf[start..end]);
        Some(u32::from_be_bytes(b))
    }

    fn check_readable(&self, n: usize) -> Result<()> {
        if n > self.valid_read_len() {
            return Err(Error::BufferUnderflow {
                requested: n,
                available: self.valid_read_len(),
            });
        }
        Ok(())
    }

    fn compact(&mut self) {
        if self.read == 0 {
            return;
        }
        self.buf.copy_within(self.read..self.write, 0);
        self.write -= self.read;
        self.read = 0;
    }
}

impl Default for ByteBuf {
    fn default() -> Self {
        Self::new(DEFAULT_BUF_LEN)
    }
}

impl std::fmt::Debug for ByteBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteBuf")
            .field("read", &self.read)
            .field("write", &self.write)
            .field("capacity", &self.buf.len())
            .field("max_len", &self.max_len)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
