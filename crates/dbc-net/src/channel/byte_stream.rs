// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ByteStream trait: what a channel needs from its socket.
//!
//! The channel driver only reads, writes and (de)registers with the reactor,
//! so it is written against this trait rather than `mio::net::TcpStream`
//! directly. Unit tests drive it with [`mock::MockStream`].

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use socket2::SockRef;

use crate::config::SocketConfig;

/// Non-blocking byte stream registered with a reactor.
pub trait ByteStream: Read + Write + Send {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()>;

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()>;

    fn deregister(&mut self, registry: &Registry) -> io::Result<()>;

    fn shutdown(&mut self, how: Shutdown) -> io::Result<()>;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    fn peer_addr(&self) -> io::Result<SocketAddr>;

    /// Take the pending socket error (connect result).
    fn take_error(&self) -> io::Result<Option<io::Error>>;
}

// ============================================================================
// mio TcpStream implementation
// ============================================================================

impl ByteStream for TcpStream {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        registry.register(self, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        registry.reregister(self, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(self)
    }

    fn shutdown(&mut self, how: Shutdown) -> io::Result<()> {
        TcpStream::shutdown(self, how)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::local_addr(self)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }

    fn take_error(&self) -> io::Result<Option<io::Error>> {
        TcpStream::take_error(self)
    }
}

/// Apply the configured socket options to a connected stream.
pub fn apply_socket_options(stream: &TcpStream, config: &SocketConfig) -> io::Result<()> {
    stream.set_nodelay(config.nodelay)?;
    let sock = SockRef::from(stream);
    sock.set_keepalive(config.keepalive)?;
    if config.send_buffer > 0 {
        sock.set_send_buffer_size(config.send_buffer)?;
    }
    if config.recv_buffer > 0 {
        sock.set_recv_buffer_size(config.recv_buffer)?;
    }
    Ok(())
}

// ============================================================================
// Test mock stream
// ============================================================================

#[cfg(test)]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Mock byte stream for testing.
    ///
    /// Reads come from a shared queue fed by the test, writes are captured.
    /// Both sides are behind `Arc` so the test keeps a [`MockRemote`] after
    /// handing the stream to a driver.
    #[derive(Debug)]
    pub struct MockStream {
        remote: MockRemote,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
    }

    /// Test-side view of a [`MockStream`].
    #[derive(Debug, Clone, Default)]
    pub struct MockRemote {
        read_data: Arc<Mutex<VecDeque<u8>>>,
        write_data: Arc<Mutex<Vec<u8>>>,
        state: Arc<Mutex<MockState>>,
    }

    #[derive(Debug, Default)]
    struct MockState {
        eof: bool,
        read_error: Option<io::ErrorKind>,
        write_error: Option<io::ErrorKind>,
        /// Max bytes accepted per write call (0 = unlimited).
        write_limit: usize,
        shutdown: bool,
    }

    impl MockStream {
        pub fn new() -> (Self, MockRemote) {
            let remote = MockRemote::default();
            let stream = Self {
                remote: remote.clone(),
                local_addr: "127.0.0.1:12345".parse().unwrap(),
                peer_addr: "127.0.0.1:54321".parse().unwrap(),
            };
            (stream, remote)
        }
    }

    impl MockRemote {
        /// Add data to the read buffer.
        pub fn feed(&self, data: &[u8]) {
            self.read_data.lock().extend(data);
        }

        /// All data written so far.
        pub fn written(&self) -> Vec<u8> {
            self.write_data.lock().clone()
        }

        /// Drain written data.
        pub fn take_written(&self) -> Vec<u8> {
            std::mem::take(&mut *self.write_data.lock())
        }

        /// Reads return 0 once the buffer is drained.
        pub fn close(&self) {
            self.state.lock().eof = true;
        }

        pub fn inject_read_error(&self, kind: io::ErrorKind) {
            self.state.lock().read_error = Some(kind);
        }

        pub fn inject_write_error(&self, kind: io::ErrorKind) {
            self.state.lock().write_error = Some(kind);
        }

        /// Simulate a full socket buffer: accept at most `n` bytes per write.
        pub fn limit_writes(&self, n: usize) {
            self.state.lock().write_limit = n;
        }

        pub fn is_shutdown(&self) -> bool {
            self.state.lock().shutdown
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut state = self.remote.state.lock();
            if let Some(kind) = state.read_error.take() {
                return Err(io::Error::new(kind, "injected error"));
            }

            let mut data = self.remote.read_data.lock();
            if data.is_empty() {
                if state.eof {
                    return Ok(0);
                }
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "would block"));
            }

            let to_read = buf.len().min(data.len());
            for (i, byte) in data.drain(..to_read).enumerate() {
                buf[i] = byte;
            }
            Ok(to_read)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut state = self.remote.state.lock();
            if let Some(kind) = state.write_error.take() {
                return Err(io::Error::new(kind, "injected error"));
            }
            if state.shutdown {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "not connected"));
            }

            let n = match state.write_limit {
                0 => buf.len(),
                limit => buf.len().min(limit),
            };
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "would block"));
            }
            self.remote.write_data.lock().extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl ByteStream for MockStream {
        fn register(&mut self, _: &Registry, _: Token, _: Interest) -> io::Result<()> {
            Ok(())
        }

        fn reregister(&mut self, _: &Registry, _: Token, _: Interest) -> io::Result<()> {
            Ok(())
        }

        fn deregister(&mut self, _: &Registry) -> io::Result<()> {
            Ok(())
        }

        fn shutdown(&mut self, _how: Shutdown) -> io::Result<()> {
            self.remote.state.lock().shutdown = true;
            Ok(())
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok(self.local_addr)
        }

        fn peer_addr(&self) -> io::Result<SocketAddr> {
            Ok(self.peer_addr)
        }

        fn take_error(&self) -> io::Result<Option<io::Error>> {
            Ok(None)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::mock::MockStream;
    use super::*;

    #[test]
    fn test_trait_object_safe() {
        let (stream, _remote) = MockStream::new();
        let boxed: Box<dyn ByteStream> = Box::new(stream);
        assert!(boxed.peer_addr().is_ok());
    }

    #[test]
    fn test_mock_read_write() {
        let (mut stream, remote) = MockStream::new();

        stream.write_all(b"hello").unwrap();
        assert_eq!(remote.written(), b"hello");

        let mut buf = [0u8; 10];
        let err = stream.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        remote.feed(b"world");
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"world");

        remote.close();
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_mock_error_injection_and_partial_writes() {
        let (mut stream, remote) = MockStream::new();

        remote.inject_read_error(io::ErrorKind::ConnectionReset);
        let mut buf = [0u8; 4];
        assert_eq!(
            stream.read(&mut buf).unwrap_err().kind(),
            io::ErrorKind::ConnectionReset
        );

        remote.limit_writes(3);
        assert_eq!(stream.write(b"abcdef").unwrap(), 3);
        assert_eq!(remote.take_written(), b"abc");

        remote.inject_write_error(io::ErrorKind::BrokenPipe);
        assert!(stream.write(b"x").is_err());

        stream.shutdown(Shutdown::Both).unwrap();
        assert!(remote.is_shutdown());
        assert!(stream.write(b"x").is_err());
    }

    #[test]
    fn test_socket_options_on_real_stream() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let std_stream = std::net::TcpStream::connect(addr).unwrap();
        std_stream.set_nonblocking(true).unwrap();
        let stream = TcpStream::from_std(std_stream);

        apply_socket_options(&stream, &SocketConfig::default()).unwrap();
        assert!(stream.nodelay().unwrap());
        assert!(SockRef::from(&stream).keepalive().unwrap());
    }
}
