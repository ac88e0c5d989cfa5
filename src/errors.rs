//! Error types shared across the proxy.

use std::fmt;
use std::io;

/// Errors that can terminate a single session (tunnel, socket or UDP
/// association) without affecting the rest of the process.
#[derive(Debug)]
pub enum Error {
    /// Underlying socket I/O failed in a way that isn't transient.
    SocketError(io::Error),

    /// A SOCKS5 PDU violated the protocol (bad version, unsupported
    /// command, oversized length, unknown address type, auth mismatch).
    Protocol(&'static str),

    /// DNS / address resolution for a CONNECT or UDP target failed.
    Resolve(io::Error),

    /// All resolved candidates failed to connect.
    ConnectFailed,

    /// Binding or listening on the configured address failed; fatal to
    /// the whole process.
    Fatal(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SocketError(e) => write!(f, "socket error: {}", e),
            Error::Protocol(reason) => write!(f, "protocol violation: {}", reason),
            Error::Resolve(e) => write!(f, "resolve failed: {}", e),
            Error::ConnectFailed => write!(f, "connect failed on every candidate"),
            Error::Fatal(e) => write!(f, "fatal init error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::SocketError(e) | Error::Resolve(e) | Error::Fatal(e) => Some(e),
            Error::Protocol(_) | Error::ConnectFailed => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::SocketError(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
