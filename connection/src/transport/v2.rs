//! Bitcoin v2 transport implementation.
//!
//! A light wrapper around the BIP-324 encryption and serialization.

use crate::transport::TransportError;
use bip324::io::ProtocolError;
use bip324::Role;
use bitcoin::p2p::message::NetworkMessage;
use bitcoin::Network;
use tokio::io::{AsyncRead, AsyncWrite};

/// Implements the bitcoin v2 protocol transport using BIP-324 encryption.
pub struct AsyncV2Transport<R, W> {
    reader: bip324::futures::ProtocolReader<R>,
    writer: bip324::futures::ProtocolWriter<W>,
}

// bip324's halves don't implement Debug.
impl<R, W> std::fmt::Debug for AsyncV2Transport<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncV2Transport")
            .field("cipher", &"<bip324::futures::Protocol>")
            .finish()
    }
}

impl<R, W> AsyncV2Transport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Perform the BIP-324 key exchange as the initiator.
    ///
    /// The reader and writer are consumed either way. A peer which does not
    /// speak v2 usually hangs up, so a v1 fallback needs a fresh socket.
    pub async fn initiate(network: Network, reader: R, writer: W) -> Result<Self, TransportError> {
        let protocol = bip324::futures::Protocol::new(
            network,
            Role::Initiator,
            None,
            None,
            reader,
            writer,
        )
        .await
        .map_err(transport_error)?;

        let (reader, writer) = protocol.into_split();
        Ok(Self { reader, writer })
    }

    /// Receives a bitcoin network message.
    pub async fn read(&mut self) -> Result<NetworkMessage, TransportError> {
        let payload = self
            .reader
            .read()
            .await
            .map_err(transport_error)?;

        bip324::serde::deserialize(payload.contents()).map_err(|_| TransportError::Encryption)
    }

    /// Sends a bitcoin network message.
    pub async fn write(&mut self, message: NetworkMessage) -> Result<(), TransportError> {
        let data = bip324::serde::serialize(message);

        self.writer
            .write(&data)
            .await
            .map_err(transport_error)
    }
}

/// Socket failures stay I/O errors so callers can tell a hang-up from a
/// broken cipher.
fn transport_error(error: ProtocolError) -> TransportError {
    match error {
        ProtocolError::Io(err, _) => TransportError::Io(err),
        ProtocolError::Internal(_) => TransportError::Encryption,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_io_failures_keep_their_kind() {
        match transport_error(ProtocolError::eof()) {
            TransportError::Io(err) => assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected an io error, got {other:?}"),
        }

        let reset = ProtocolError::from(io::Error::from(io::ErrorKind::ConnectionReset));
        match transport_error(reset) {
            TransportError::Io(err) => assert_eq!(err.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("expected an io error, got {other:?}"),
        }
    }
}
