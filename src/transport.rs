//! The boundary to the event loop that does the actual I/O.
//!
//! The core never touches a socket. It tells the loop what to do with an
//! [`Output`] and is told what happened with an [`Input`]. Every output that
//! starts something (resolve, connect, handshake) must eventually be answered
//! by the corresponding input, or by `Input::Closed`.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

/// Identifies one connection for the lifetime of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Something the event loop must do on behalf of the core.
#[derive(Debug, PartialEq, Eq)]
pub enum Output {
    /// Resolve `host`, answer with `Input::Resolved`.
    Resolve { conn: ConnectionId, host: String },
    /// Open a TCP connection, answer with `Input::Connected`.
    ///
    /// After a failed connect this is repeated with the next resolved address.
    Connect { conn: ConnectionId, addr: SocketAddr },
    /// Wrap the connected stream in TLS, answer with `Input::Handshaked`.
    Handshake {
        conn: ConnectionId,
        server_name: String,
    },
    /// Write bytes to the connection. Failures are reported with `Input::WriteFailed`.
    Transmit { conn: ConnectionId, data: Vec<u8> },
    /// Close the connection. No further input is expected for it.
    Close { conn: ConnectionId },
}

impl Output {
    /// The connection this is about.
    pub fn conn(&self) -> ConnectionId {
        match self {
            Output::Resolve { conn, .. }
            | Output::Connect { conn, .. }
            | Output::Handshake { conn, .. }
            | Output::Transmit { conn, .. }
            | Output::Close { conn } => *conn,
        }
    }
}

/// Something that happened in the event loop.
#[derive(Debug)]
pub enum Input {
    /// Result of `Output::Resolve`.
    Resolved {
        conn: ConnectionId,
        result: io::Result<Vec<IpAddr>>,
    },
    /// Result of `Output::Connect`.
    Connected {
        conn: ConnectionId,
        result: io::Result<()>,
    },
    /// Result of `Output::Handshake`.
    Handshaked {
        conn: ConnectionId,
        result: io::Result<()>,
    },
    /// Bytes read from the connection.
    Received { conn: ConnectionId, data: Vec<u8> },
    /// Writing an `Output::Transmit` failed.
    WriteFailed { conn: ConnectionId, error: io::Error },
    /// The peer closed the connection (EOF) or it broke.
    Closed { conn: ConnectionId },
}

impl Input {
    /// The connection this is about.
    pub fn conn(&self) -> ConnectionId {
        match self {
            Input::Resolved { conn, .. }
            | Input::Connected { conn, .. }
            | Input::Handshaked { conn, .. }
            | Input::Received { conn, .. }
            | Input::WriteFailed { conn, .. }
            | Input::Closed { conn } => *conn,
        }
    }
}

/// Source of the current time for the loop driving the context.
pub trait Clock {
    /// Current time.
    fn now(&self) -> Instant;
}

/// The wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
