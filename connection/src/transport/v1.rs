//! Bitcoin v1 protocol transport implementation.
//!
//! Plaintext framing: a 24 byte header (magic, command, payload length,
//! checksum) followed by the payload.

use crate::transport::TransportError;
use bitcoin::consensus::encode;
use bitcoin::p2p::message::{NetworkMessage, RawNetworkMessage};
use bitcoin::p2p::Magic;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of a bitcoin message header in bytes.
const HEADER_SIZE: usize = 24;
/// Offset in the header where the payload length is stored.
const PAYLOAD_LENGTH_OFFSET: usize = 16;
/// Bitcoin Core refuses messages larger than 4MB, so do we.
const MAX_PAYLOAD_SIZE: usize = 4_000_000;

/// Progress of an in-flight read.
///
/// Kept on the transport so a read interrupted by a timeout or `select!`
/// resumes where it left off instead of desynchronizing the stream.
#[derive(Debug)]
enum ReadState {
    Header {
        header: [u8; HEADER_SIZE],
        filled: usize,
    },
    Payload {
        /// Header and payload, since the message is decoded as a whole.
        buffer: Vec<u8>,
        filled: usize,
    },
}

impl ReadState {
    fn header() -> Self {
        ReadState::Header {
            header: [0u8; HEADER_SIZE],
            filled: 0,
        }
    }
}

/// Implements the bitcoin v1 protocol transport over any async reader and writer.
#[derive(Debug)]
pub struct AsyncV1Transport<R, W> {
    /// The bitcoin network magic bytes.
    network_magic: Magic,
    read_state: ReadState,
    reader: R,
    writer: W,
}

impl<R, W> AsyncV1Transport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Create a new transport for the network identified by `network_magic`.
    pub fn new(network_magic: Magic, reader: R, writer: W) -> Self {
        Self {
            network_magic,
            read_state: ReadState::header(),
            reader,
            writer,
        }
    }

    /// Write a bitcoin network message and flush it.
    pub async fn write(&mut self, message: NetworkMessage) -> Result<(), TransportError> {
        let raw_msg = RawNetworkMessage::new(self.network_magic, message);
        let data = encode::serialize(&raw_msg);

        self.writer.write_all(&data).await?;
        self.writer.flush().await?;

        Ok(())
    }

    /// Read a bitcoin network message.
    ///
    /// This method is cancellation safe.
    pub async fn read(&mut self) -> Result<NetworkMessage, TransportError> {
        loop {
            match &mut self.read_state {
                ReadState::Header { header, filled } => {
                    while *filled < HEADER_SIZE {
                        let n = self.reader.read(&mut header[*filled..]).await?;
                        if n == 0 {
                            return Err(TransportError::Io(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "connection closed while reading header",
                            )));
                        }
                        *filled += n;
                    }

                    // Bail before buffering a payload from the wrong network.
                    if header[..4] != self.network_magic.to_bytes() {
                        self.read_state = ReadState::header();
                        return Err(TransportError::MagicMismatch);
                    }

                    let mut length = [0u8; 4];
                    length.copy_from_slice(
                        &header[PAYLOAD_LENGTH_OFFSET..PAYLOAD_LENGTH_OFFSET + 4],
                    );
                    let payload_len = u32::from_le_bytes(length) as usize;
                    if payload_len > MAX_PAYLOAD_SIZE {
                        self.read_state = ReadState::header();
                        return Err(TransportError::Oversized(payload_len));
                    }

                    let mut buffer = Vec::with_capacity(HEADER_SIZE + payload_len);
                    buffer.extend_from_slice(&header[..]);
                    buffer.resize(HEADER_SIZE + payload_len, 0);
                    self.read_state = ReadState::Payload {
                        buffer,
                        filled: HEADER_SIZE,
                    };
                }
                ReadState::Payload { buffer, filled } => {
                    while *filled < buffer.len() {
                        let n = self.reader.read(&mut buffer[*filled..]).await?;
                        if n == 0 {
                            return Err(TransportError::Io(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "connection closed while reading payload",
                            )));
                        }
                        *filled += n;
                    }

                    let raw_msg: RawNetworkMessage = encode::deserialize(buffer)?;
                    self.read_state = ReadState::header();
                    return Ok(raw_msg.payload().clone());
                }
            }
        }
    }

    /// Shut down the write half, signalling EOF to the peer.
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
