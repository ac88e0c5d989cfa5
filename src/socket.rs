//! Socket wrapper: binds a TCP stream to its buffers, lifecycle state
//! and role within a tunnel.

use socket2::SockRef;
use tokio::net::TcpStream;

use crate::buffer::{Buffer, INIT_CAPACITY};

/// Lifecycle state of one side of a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockState {
    Connecting,
    Connected,
    HalfClosed,
    Closed,
}

/// Which side of the tunnel a socket plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Remote,
}

/// One side of a tunnel: an owned stream plus its read/write buffers.
pub struct Socket {
    pub stream: TcpStream,
    pub read_buffer: Buffer,
    pub write_buffer: Buffer,
    pub state: SockState,
    pub role: Role,
}

impl Socket {
    /// Wrap an already-connected (or still-connecting) stream.
    ///
    /// The stream is always nonblocking (every `tokio::net::TcpStream`
    /// is); keepalive is enabled here via `socket2` since tokio has no
    /// direct `set_keepalive`.
    pub fn new(stream: TcpStream, state: SockState, role: Role) -> Self {
        if let Err(e) = SockRef::from(&stream).set_keepalive(true) {
            log::warn!("failed to set SO_KEEPALIVE on fd: {}", e);
        }

        Socket {
            stream,
            read_buffer: Buffer::create(INIT_CAPACITY),
            write_buffer: Buffer::create(INIT_CAPACITY),
            state,
            role,
        }
    }

    pub fn is_client(&self) -> bool {
        matches!(self.role, Role::Client)
    }

    pub fn label(&self) -> &'static str {
        if self.is_client() {
            "client"
        } else {
            "remote"
        }
    }
}
