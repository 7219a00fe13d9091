//! Bitcoin protocol transports.
//!
//! * v1 - Traditional plaintext bitcoin protocol.
//! * v2 - Encrypted protocol specified in BIP-324.
//!
//! [`Transport`] gives callers a single interface over both with static dispatch.

mod v1;
mod v2;

pub use v1::AsyncV1Transport;
pub use v2::AsyncV2Transport;

use bitcoin::consensus::encode;
use bitcoin::p2p::message::NetworkMessage;
use bitcoin::p2p::Magic;
use bitcoin::Network;
use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};

/// Error types specific to the transport layer.
#[derive(Debug)]
pub enum TransportError {
    /// IO error during read/write operations.
    Io(io::Error),
    /// Failed to deserialize a message.
    Deserialize(encode::Error),
    /// Network magic in the message doesn't match the expected value.
    MagicMismatch,
    /// Announced payload is larger than any valid message.
    Oversized(usize),
    /// v2 encryption failed.
    Encryption,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Io(e) => write!(f, "IO error: {e}"),
            TransportError::Deserialize(e) => write!(f, "Message deserialization error: {e}"),
            TransportError::MagicMismatch => write!(f, "Network magic mismatch"),
            TransportError::Oversized(len) => write!(f, "Payload of {len} bytes is too large"),
            TransportError::Encryption => write!(f, "BIP324 encryption/decryption error"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Io(e) => Some(e),
            TransportError::Deserialize(e) => Some(e),
            TransportError::MagicMismatch
            | TransportError::Oversized(_)
            | TransportError::Encryption => None,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        TransportError::Io(e)
    }
}

impl From<encode::Error> for TransportError {
    fn from(e: encode::Error) -> Self {
        TransportError::Deserialize(e)
    }
}

/// A negotiated transport, either plaintext v1 or encrypted v2.
#[derive(Debug)]
pub enum Transport<R, W> {
    V1(AsyncV1Transport<R, W>),
    V2(AsyncV2Transport<R, W>),
}

impl<R, W> Transport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Plaintext transport for the network identified by `magic`.
    pub fn v1(magic: Magic, reader: R, writer: W) -> Self {
        Transport::V1(AsyncV1Transport::new(magic, reader, writer))
    }

    /// Encrypted transport, performing the BIP-324 key exchange as initiator.
    pub async fn v2(network: Network, reader: R, writer: W) -> Result<Self, TransportError> {
        Ok(Transport::V2(
            AsyncV2Transport::initiate(network, reader, writer).await?,
        ))
    }

    /// Receive the next message.
    pub async fn read(&mut self) -> Result<NetworkMessage, TransportError> {
        match self {
            Transport::V1(t) => t.read().await,
            Transport::V2(t) => t.read().await,
        }
    }

    /// Send a message.
    pub async fn write(&mut self, message: NetworkMessage) -> Result<(), TransportError> {
        match self {
            Transport::V1(t) => t.write(message).await,
            Transport::V2(t) => t.write(message).await,
        }
    }

    /// Best-effort shutdown of the write side.
    ///
    /// The v2 halves have no shutdown hook, their sockets close on drop.
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        match self {
            Transport::V1(t) => t.shutdown().await,
            Transport::V2(_) => Ok(()),
        }
    }

    /// Short name of the transport version, for logs.
    pub fn version(&self) -> &'static str {
        match self {
            Transport::V1(_) => "V1",
            Transport::V2(_) => "V2",
        }
    }
}
