//! Transport abstraction: a single-client, byte-oriented server socket.
//!
//! Concrete implementations:
//! - TCP ([`TcpTransport`](crate::adapters::tcp_transport::TcpTransport))
//! - [`NullTransport`] when networking is unavailable
//!
//! The connection server is generic over `Transport`, so tests can drive
//! it over loopback and a new link needs zero changes to the protocol code.

use core::fmt;
use std::net::SocketAddr;

/// Errors surfaced by a [`Transport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// Operation requires a connected client but none is present.
    NotConnected,
    /// The peer closed the connection (EOF).
    Closed,
    /// Socket I/O failure; the connection has been dropped.
    Io,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "no client connected"),
            Self::Closed => write!(f, "connection closed by peer"),
            Self::Io => write!(f, "socket I/O error"),
        }
    }
}

/// Listening socket with at most one connected client.
pub trait Transport {
    /// Poll for an incoming client (non-blocking).  Returns the peer
    /// address when a new client was accepted; `None` if nobody is
    /// waiting or a client is already connected.
    fn accept(&mut self) -> Option<SocketAddr>;

    /// Whether a client is currently connected.
    fn is_connected(&self) -> bool;

    /// Read up to `buf.len()` bytes.  Returns `Ok(0)` if no data is
    /// available (non-blocking).  EOF is reported as
    /// [`TransportError::Closed`].
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Write as much of `data` as the link accepts without blocking.
    /// Returns the number of bytes taken; `Ok(0)` means the send buffer
    /// is full and the caller should retry on a later poll.
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Flush any buffered output.
    fn flush(&mut self) -> Result<(), TransportError>;

    /// Drop the current client and return to listening.
    fn disconnect(&mut self);
}

/// A null transport that never accepts a client.
/// Used when the network stack failed to come up.
pub struct NullTransport;

impl Transport for NullTransport {
    fn accept(&mut self) -> Option<SocketAddr> {
        None
    }

    fn is_connected(&self) -> bool {
        false
    }

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, TransportError> {
        Err(TransportError::NotConnected)
    }

    fn write(&mut self, _data: &[u8]) -> Result<usize, TransportError> {
        Err(TransportError::NotConnected)
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn disconnect(&mut self) {}
}
