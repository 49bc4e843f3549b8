//! Error types for the permessage-deflate read path

use std::fmt;
use std::io;

/// Result type alias for inflate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Inflate and read-loop error types
#[derive(Debug)]
pub enum Error {
    /// I/O error from the underlying transport
    Io(io::Error),
    /// Protocol violation by the peer
    Protocol(&'static str),
    /// Transport closed before the message was complete
    ConnectionClosed,
    /// Connection reset by peer
    ConnectionReset,
    /// Decompressed message exceeds the configured ceiling
    MessageTooLarge,
    /// Operation not valid in the current session state
    InvalidState(&'static str),
    /// Invalid permessage-deflate extension parameter
    InvalidExtension(&'static str),
    /// Corrupt deflate stream or inflater failure
    Compression(String),
}

/// WebSocket close status codes relevant to the inflate path
#[derive(Debug, Clone, Copy)]
pub struct CloseCode;

impl CloseCode {
    /// Protocol error
    pub const PROTOCOL_ERROR: u16 = 1002;
    /// Abnormal closure
    pub const ABNORMAL: u16 = 1006;
    /// Invalid frame payload
    pub const INVALID_PAYLOAD: u16 = 1007;
    /// Message too big
    pub const TOO_BIG: u16 = 1009;
    /// Internal server error
    pub const INTERNAL: u16 = 1011;
}

impl Error {
    /// Close code the owning connection should send for this error
    pub fn close_code(&self) -> u16 {
        match self {
            Error::MessageTooLarge => CloseCode::TOO_BIG,
            Error::Compression(_) => CloseCode::INVALID_PAYLOAD,
            Error::Protocol(_) | Error::InvalidExtension(_) => CloseCode::PROTOCOL_ERROR,
            Error::Io(_) | Error::ConnectionClosed | Error::ConnectionReset => CloseCode::ABNORMAL,
            Error::InvalidState(_) => CloseCode::INTERNAL,
        }
    }

    /// Returns true if the error came from the transport rather than the payload
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::ConnectionClosed | Error::ConnectionReset
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            Error::ConnectionClosed => write!(f, "Connection closed"),
            Error::ConnectionReset => write!(f, "Connection reset by peer"),
            Error::MessageTooLarge => write!(f, "Message too large"),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::InvalidExtension(msg) => write!(f, "Invalid extension parameter: {}", msg),
            Error::Compression(msg) => write!(f, "Decompression error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::ConnectionReset => Error::ConnectionReset,
            io::ErrorKind::BrokenPipe => Error::ConnectionClosed,
            io::ErrorKind::UnexpectedEof => Error::ConnectionClosed,
            _ => Error::Io(e),
        }
    }
}

impl From<flate2::DecompressError> for Error {
    fn from(e: flate2::DecompressError) -> Self {
        Error::Compression(format!("inflate error: {}", e))
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => e,
            Error::ConnectionReset => {
                io::Error::new(io::ErrorKind::ConnectionReset, "connection reset")
            }
            Error::ConnectionClosed => {
                io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed")
            }
            Error::Compression(msg) => io::Error::new(io::ErrorKind::InvalidData, msg),
            other => io::Error::other(other.to_string()),
        }
    }
}
