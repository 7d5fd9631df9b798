//! A single-use TCP connection carrying one payload each way.
//!
//! Reads and writes are deliberately one-shot: `receive_once` performs a
//! single bounded read and `send_once` a single write. Payloads larger than
//! the read bound are truncated and a short write is not retried.

use crate::error::{ExchangeError, WaitOp};
use crate::readiness::Waiter;
use bytes::{Bytes, BytesMut};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Read bound applied when none is configured.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Outcome of one completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeReport {
    pub peer: SocketAddr,
    /// Bytes received from the peer (at most the read bound).
    pub received: usize,
    /// Bytes accepted by the single send call.
    pub sent: usize,
}

/// An established connection, exclusively owned by the side that created it.
///
/// Dropping the connection closes the socket, so every early return in an
/// exchange releases it.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
}

impl Connection {
    pub(crate) fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self { stream, peer }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Perform exactly one read of at most `limit` bytes.
    ///
    /// Returns whatever was available, which may be fewer bytes than the peer
    /// sent. An empty result means the peer closed without sending.
    pub fn receive_once(&mut self, limit: usize) -> io::Result<Bytes> {
        let mut buf = BytesMut::zeroed(limit);

        let n = loop {
            match self.stream.read(&mut buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };

        buf.truncate(n);
        trace!(peer = %self.peer, bytes = n, limit, "Received");
        Ok(buf.freeze())
    }

    /// Wait for the peer (bounded by `timeout`, cancellable through
    /// `waiter`), then perform the single bounded read.
    ///
    /// A peer that closes without sending yields an empty payload.
    pub(crate) fn receive_payload(
        &mut self,
        waiter: &mut Waiter,
        limit: usize,
        timeout: Option<Duration>,
    ) -> Result<Bytes, ExchangeError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        waiter
            .wait_readable(self.as_raw_fd(), deadline)
            .map_err(|e| ExchangeError::from_wait(e, WaitOp::Receive))?;

        let payload = self.receive_once(limit).map_err(ExchangeError::Receive)?;
        if payload.is_empty() {
            debug!(peer = %self.peer, "Peer closed without sending");
        }
        Ok(payload)
    }

    /// Wait (cancellable through `waiter`) until the socket accepts data,
    /// then perform the single write.
    pub(crate) fn send_payload(
        &mut self,
        waiter: &mut Waiter,
        payload: &[u8],
    ) -> Result<usize, ExchangeError> {
        waiter
            .wait_writable(self.as_raw_fd(), None)
            .map_err(|e| ExchangeError::from_wait(e, WaitOp::Send))?;

        self.send_once(payload).map_err(ExchangeError::Send)
    }

    /// Perform exactly one write of `payload`, returning the bytes accepted.
    pub fn send_once(&mut self, payload: &[u8]) -> io::Result<usize> {
        let n = loop {
            match self.stream.write(payload) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };

        if n < payload.len() {
            warn!(
                peer = %self.peer,
                written = n,
                total = payload.len(),
                "Short write; remaining bytes dropped"
            );
        }
        trace!(peer = %self.peer, bytes = n, "Sent");
        Ok(n)
    }

    /// Shut down both directions and release the socket.
    pub fn close(self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            // Already reset or closed by the peer.
            trace!(peer = %self.peer, error = %e, "Shutdown failed");
        }
        debug!(peer = %self.peer, "Connection closed");
    }
}

impl AsRawFd for Connection {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn pair() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, peer) = listener.accept().unwrap();
        (Connection::new(stream, peer), client)
    }

    #[test]
    fn test_receive_once_within_bound() {
        let (mut conn, mut client) = pair();
        client.write_all(b"PING").unwrap();

        let payload = conn.receive_once(4096).unwrap();
        assert_eq!(&payload[..], b"PING");
    }

    #[test]
    fn test_receive_once_truncates() {
        let (mut conn, mut client) = pair();
        client.write_all(&[7u8; 100]).unwrap();

        let payload = conn.receive_once(64).unwrap();
        assert_eq!(payload.len(), 64);

        // The rest stays unread in the socket.
        let rest = conn.receive_once(64).unwrap();
        assert_eq!(rest.len(), 36);
    }

    #[test]
    fn test_receive_once_peer_closed() {
        let (mut conn, client) = pair();
        drop(client);

        let payload = conn.receive_once(4096).unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn test_receive_payload_peer_closed_is_empty() {
        let (mut conn, client) = pair();
        drop(client);

        let mut waiter = Waiter::new().unwrap();
        let payload = conn
            .receive_payload(&mut waiter, 4096, Some(Duration::from_secs(5)))
            .unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn test_receive_payload_timeout() {
        let (mut conn, _client) = pair();

        let mut waiter = Waiter::new().unwrap();
        let err = conn
            .receive_payload(&mut waiter, 4096, Some(Duration::from_millis(50)))
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Timeout(WaitOp::Receive)));
    }

    #[test]
    fn test_send_payload_cancelled() {
        let (mut conn, mut client) = pair();

        let mut waiter = Waiter::new().unwrap();
        waiter.cancel_handle().cancel();
        let err = conn.send_payload(&mut waiter, b"PONG").unwrap_err();
        assert!(matches!(err, ExchangeError::Cancelled(WaitOp::Send)));

        // Nothing reached the peer.
        conn.close();
        let mut received = Vec::new();
        client.read_to_end(&mut received).unwrap();
        assert!(received.is_empty());
    }

    #[test]
    fn test_send_once_and_close() {
        let (mut conn, mut client) = pair();
        assert_eq!(conn.send_once(b"PONG").unwrap(), 4);
        conn.close();

        let mut received = Vec::new();
        client.read_to_end(&mut received).unwrap();
        assert_eq!(received, b"PONG");
    }
}
