//! Plain TCP transport adapter.
//!
//! Implements [`Transport`]: a single-client TCP server on a configurable
//! port.  ESP-IDF exposes lwIP through `std::net`, so the same code runs
//! on the board and on the host.
//!
//! ## Connection model
//!
//! 1. `bind()` opens a listener on `0.0.0.0:<port>` in non-blocking mode.
//! 2. `accept()` polls for an incoming connection; on success the state
//!    transitions to `Connected`.  Further clients wait in the backlog.
//! 3. Reads and writes are non-blocking: `read()` returns `Ok(0)` when no
//!    data is available and `write()` returns the partial count (possibly
//!    zero) when the send buffer is full.  The connection server keeps
//!    the unsent remainder.
//! 4. `disconnect()` closes the client and returns to `Listening`.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

use log::{info, warn};

use crate::rpc::transport::{Transport, TransportError};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Bound and listening for incoming connections.
    Listening,
    /// A client is connected.
    Connected,
}

pub struct TcpTransport {
    state: ConnectionState,
    listener: TcpListener,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    /// Bind to `0.0.0.0:<port>`.  Pass port `0` to let the OS pick a free
    /// port (use [`local_addr()`](Self::local_addr) to discover it).
    pub fn bind(port: u16) -> Result<Self, TransportError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).map_err(|e| {
            warn!("TCP: bind on port {} failed: {}", port, e);
            TransportError::Io
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|_| TransportError::Io)?;

        info!("TCP: listening on port {}", port);

        Ok(Self {
            state: ConnectionState::Listening,
            listener,
            stream: None,
        })
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The actual bound address.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.listener.local_addr().map_err(|_| TransportError::Io)
    }

    fn drop_client(&mut self) {
        self.stream = None;
        self.state = ConnectionState::Listening;
    }
}

impl Transport for TcpTransport {
    fn accept(&mut self) -> Option<SocketAddr> {
        if self.state == ConnectionState::Connected {
            return None;
        }
        match self.listener.accept() {
            Ok((stream, addr)) => {
                if stream.set_nonblocking(true).is_err() {
                    warn!("TCP: failed to set non-blocking on client socket");
                    return None;
                }
                let _ = stream.set_nodelay(true);
                info!("TCP: client connected from {}", addr);
                self.stream = Some(stream);
                self.state = ConnectionState::Connected;
                Some(addr)
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => None,
            Err(e) => {
                warn!("TCP: accept error: {}", e);
                None
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        match stream.read(buf) {
            Ok(0) => {
                info!("TCP: client disconnected (EOF)");
                self.drop_client();
                Err(TransportError::Closed)
            }
            Ok(n) => Ok(n),
            Err(ref e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                Ok(0)
            }
            Err(e) => {
                warn!("TCP: read error: {}", e);
                self.drop_client();
                Err(TransportError::Io)
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        match stream.write(data) {
            Ok(0) if !data.is_empty() => {
                info!("TCP: client stopped accepting data");
                self.drop_client();
                Err(TransportError::Closed)
            }
            Ok(n) => Ok(n),
            Err(ref e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                Ok(0)
            }
            Err(e) => {
                warn!("TCP: write error: {}", e);
                self.drop_client();
                Err(TransportError::Io)
            }
        }
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        stream.flush().map_err(|_| TransportError::Io)
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            info!("TCP: client disconnected");
        }
        self.state = ConnectionState::Listening;
    }
}
