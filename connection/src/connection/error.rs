//! What can go wrong while dialing and talking to a peer.

use crate::transport::TransportError;
use std::error::Error;
use std::fmt;
use std::io;

/// Failure to open, handshake with, or exchange messages with a peer.
#[derive(Debug)]
pub enum ConnectionError {
    /// Socket level failure.
    Io(io::Error),
    /// Framing or BIP-324 cipher failure.
    TransportFailed(TransportError),
    /// The peer announced a protocol version older than we support.
    ProtocolFailed,
    /// Only IPv4 and IPv6 peers can be dialed.
    UnsupportedAddressType,
    /// The peer echoed our own version nonce.
    ConnectionLoop,
    /// The peer could not speak v2 and the policy forbids v1.
    V2TransportRequired,
}

impl ConnectionError {
    /// The underlying I/O error kind, if this error came from the socket.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            ConnectionError::Io(err) => Some(err.kind()),
            ConnectionError::TransportFailed(TransportError::Io(err)) => Some(err.kind()),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::Io(err) => write!(f, "socket error: {err}"),
            ConnectionError::TransportFailed(err) => {
                write!(f, "transport error: {err}")
            }
            ConnectionError::ProtocolFailed => {
                write!(f, "peer protocol version is obsolete")
            }
            ConnectionError::UnsupportedAddressType => write!(f, "peer address is not IPv4 or IPv6"),
            ConnectionError::ConnectionLoop => {
                write!(f, "connected to ourselves")
            }
            ConnectionError::V2TransportRequired => {
                write!(f, "peer does not support the v2 transport")
            }
        }
    }
}

impl Error for ConnectionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConnectionError::Io(err) => Some(err),
            ConnectionError::TransportFailed(err) => Some(err),
            ConnectionError::ProtocolFailed
            | ConnectionError::UnsupportedAddressType
            | ConnectionError::ConnectionLoop
            | ConnectionError::V2TransportRequired => None,
        }
    }
}

impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        ConnectionError::Io(err)
    }
}

impl From<TransportError> for ConnectionError {
    fn from(err: TransportError) -> Self {
        ConnectionError::TransportFailed(err)
    }
}
