//! Connection server: one client session at a time, polled from the
//! main loop.
//!
//! ```text
//!   poll(now)
//!     ├─ no session:  Transport::accept() ──▶ new ConnectionSession
//!     └─ session:     drain outbound ──▶ backlog left? stop here
//!                     read ≤ 1024 B ──▶ LineFramer ──▶ RpcEngine per line
//!                     ──▶ queue responses ──▶ drain ──▶ blank line? close
//! ```
//!
//! Nothing here blocks on the client.  Reads and writes are non-blocking;
//! responses the socket cannot take yet wait in the session's outbound
//! buffer, and no new input is read until that buffer is empty.  A client
//! whose backlog exceeds [`MAX_OUTBOUND`] is dropped.

use std::net::SocketAddr;

use log::{info, warn};

use crate::app::events::AppEvent;
use crate::app::service::{GpioService, Ports};

use super::codec::{Frame, LineFramer, READ_CHUNK_SIZE};
use super::engine::RpcEngine;
use super::transport::{Transport, TransportError};

/// Cap on response bytes waiting for a client that is not reading.
pub const MAX_OUTBOUND: usize = 16 * 1024;

/// State for the connected client.
pub struct ConnectionSession {
    peer: SocketAddr,
    framer: LineFramer,
    outbound: Vec<u8>,
    commands: u32,
    connected_at_ms: u64,
}

impl ConnectionSession {
    fn new(peer: SocketAddr, now_ms: u64) -> Self {
        Self {
            peer,
            framer: LineFramer::new(),
            outbound: Vec::new(),
            commands: 0,
            connected_at_ms: now_ms,
        }
    }

    /// Push queued responses until the transport stops taking bytes.
    fn drain(&mut self, transport: &mut impl Transport) -> Result<(), TransportError> {
        while !self.outbound.is_empty() {
            let n = transport.write(&self.outbound)?;
            if n == 0 {
                break;
            }
            self.outbound.drain(..n);
        }
        Ok(())
    }

    /// Response bytes not yet accepted by the transport.
    pub fn pending(&self) -> usize {
        self.outbound.len()
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Responses sent during this session.
    pub fn commands(&self) -> u32 {
        self.commands
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Client sent the blank-line terminator.
    Terminated,
    /// Peer closed or the socket failed.
    Dropped(TransportError),
    /// Unsent responses outgrew [`MAX_OUTBOUND`].
    Backlogged(usize),
}

pub struct Server<T: Transport> {
    transport: T,
    engine: RpcEngine,
    session: Option<ConnectionSession>,
    read_buf: [u8; READ_CHUNK_SIZE],
}

impl<T: Transport> Server<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            engine: RpcEngine::new(),
            session: None,
            read_buf: [0; READ_CHUNK_SIZE],
        }
    }

    pub fn session(&self) -> Option<&ConnectionSession> {
        self.session.as_ref()
    }

    pub fn engine(&self) -> &RpcEngine {
        &self.engine
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// One server step.  Returns the number of commands answered.
    pub fn poll(&mut self, now_ms: u64, service: &mut GpioService, ports: &mut Ports<'_>) -> usize {
        let Self {
            transport,
            engine,
            session,
            read_buf,
        } = self;

        if session.is_none() {
            let Some(peer) = transport.accept() else {
                return 0;
            };
            *session = Some(ConnectionSession::new(peer, now_ms));
            ports.sink.emit(&AppEvent::ClientConnected);
        }
        let Some(active) = session.as_mut() else {
            return 0;
        };

        if let Err(e) = active.drain(transport) {
            Self::end(session, transport, SessionEnd::Dropped(e), now_ms, ports);
            return 0;
        }
        if !active.outbound.is_empty() {
            return 0;
        }
        if active.framer.is_terminated() {
            Self::close(session, transport, now_ms, ports);
            return 0;
        }

        let n = match transport.read(read_buf) {
            Ok(0) => return 0,
            Ok(n) => n,
            Err(e) => {
                Self::end(session, transport, SessionEnd::Dropped(e), now_ms, ports);
                return 0;
            }
        };

        let mut answered = 0;
        let ConnectionSession {
            framer, outbound, ..
        } = &mut *active;
        framer.feed(&read_buf[..n], |frame| {
            let response = match frame {
                Frame::Command(line) => engine.handle_line(line, now_ms, service, ports),
                Frame::Oversized { len } => engine.handle_oversized(len),
                Frame::Terminate => return,
            };
            outbound.extend_from_slice(&response);
            answered += 1;
        });
        active.commands = active.commands.wrapping_add(answered as u32);

        if let Err(e) = active.drain(transport) {
            Self::end(session, transport, SessionEnd::Dropped(e), now_ms, ports);
            return answered;
        }
        let backlog = active.outbound.len();
        if backlog > MAX_OUTBOUND {
            warn!("CONN: {} is not reading, {} response bytes queued", active.peer, backlog);
            Self::end(session, transport, SessionEnd::Backlogged(backlog), now_ms, ports);
            return answered;
        }
        if backlog == 0 && active.framer.is_terminated() {
            Self::close(session, transport, now_ms, ports);
        }
        answered
    }

    /// Orderly close after the blank-line terminator, once every response
    /// has been handed to the transport.
    fn close(
        session: &mut Option<ConnectionSession>,
        transport: &mut T,
        now_ms: u64,
        ports: &mut Ports<'_>,
    ) {
        if let Err(e) = transport.flush() {
            warn!("CONN: flush before close failed: {}", e);
        }
        Self::end(session, transport, SessionEnd::Terminated, now_ms, ports);
    }

    fn end(
        session: &mut Option<ConnectionSession>,
        transport: &mut T,
        reason: SessionEnd,
        now_ms: u64,
        ports: &mut Ports<'_>,
    ) {
        transport.disconnect();
        let Some(ended) = session.take() else {
            return;
        };
        let lifetime = now_ms.saturating_sub(ended.connected_at_ms);
        match reason {
            SessionEnd::Terminated => info!(
                "CONN: {} closed session after {} commands ({}ms)",
                ended.peer, ended.commands, lifetime
            ),
            SessionEnd::Dropped(e) => info!(
                "CONN: {} dropped ({}) after {} commands ({}ms)",
                ended.peer, e, ended.commands, lifetime
            ),
            SessionEnd::Backlogged(bytes) => info!(
                "CONN: {} dropped with {} unsent bytes after {} commands ({}ms)",
                ended.peer, bytes, ended.commands, lifetime
            ),
        }
        ports.sink.emit(&AppEvent::ClientDisconnected {
            commands: ended.commands,
        });
    }
}
