//! Bitcoin p2p protocol connection.
//!
//! A [`Connection`] is established over TCP, negotiates a transport, and
//! performs the version handshake before it is handed to the caller.
//!
//! # Examples
//!
//! ```no_run
//! use bitcoin::Network;
//! use bitcoin::p2p::address::AddrV2;
//! use bitcoin::p2p::message::NetworkMessage;
//! use bitcoin_topology_connection::{Connection, ConnectionConfiguration, Peer, PeerProtocolVersion, TransportPolicy};
//! use std::net::Ipv4Addr;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let peer = Peer::new(AddrV2::Ipv4(Ipv4Addr::new(127, 0, 0, 1)), 8333);
//! let config = ConnectionConfiguration::non_listening(
//!     PeerProtocolVersion::Known(70016),
//!     TransportPolicy::V2Preferred,
//!     None,
//! );
//!
//! let mut connection = Connection::tcp(peer, Network::Bitcoin, config).await?;
//! println!("Connected to {}", connection.peer());
//!
//! connection.send(NetworkMessage::GetAddr).await?;
//! let response = connection.receive().await?;
//! println!("Received: {:?}", response);
//!
//! connection.close().await?;
//! # Ok(())
//! # }
//! ```

mod configuration;
mod error;
mod handshake;
mod tcp;

pub use configuration::{
    default_user_agent, ConnectionConfiguration, TransportPolicy, DEFAULT_CONNECTION_TIMEOUT,
};
pub use error::ConnectionError;
pub use handshake::Negotiated;

use crate::peer::Peer;
use bitcoin::p2p::message::NetworkMessage;
use bitcoin::Network;
use log::debug;

/// A handshaked connection to a bitcoin peer.
///
/// `Connection` owns its socket. Dropping it closes the socket, [`Connection::close`]
/// additionally shuts down the write side so the peer sees a clean EOF.
#[derive(Debug)]
pub struct Connection {
    /// The peer, updated with what it announced during the handshake.
    peer: Peer,
    /// Features settled on during the handshake.
    negotiated: Negotiated,
    transport: tcp::TcpTransport,
}

impl Connection {
    /// Establish a TCP connection to a bitcoin peer and perform the handshake.
    ///
    /// # Returns
    ///
    /// * `Ok(Self)` - A successfully established and handshaked connection.
    /// * `Err(ConnectionError)` - If the connection attempt or handshake failed.
    pub async fn tcp(
        mut peer: Peer,
        network: Network,
        configuration: ConnectionConfiguration,
    ) -> Result<Self, ConnectionError> {
        let mut transport = tcp::negotiate_transport(&peer, network, &configuration).await?;
        let negotiated =
            handshake::perform_handshake(&mut transport, &mut peer, &configuration).await?;

        Ok(Connection {
            peer,
            negotiated,
            transport,
        })
    }

    /// The peer this connection is established with.
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// Features negotiated during the handshake.
    pub fn negotiated(&self) -> Negotiated {
        self.negotiated
    }

    /// Send a message to the peer.
    pub async fn send(&mut self, message: NetworkMessage) -> Result<(), ConnectionError> {
        self.transport
            .write(message)
            .await
            .map_err(ConnectionError::TransportFailed)
    }

    /// Receive a message from the peer.
    ///
    /// Cancellation safe for v1 transports, so it can be raced against a timeout.
    pub async fn receive(&mut self) -> Result<NetworkMessage, ConnectionError> {
        self.transport
            .read()
            .await
            .map_err(ConnectionError::TransportFailed)
    }

    /// Close the connection.
    pub async fn close(mut self) -> Result<(), ConnectionError> {
        debug!("Closing connection to {self}");
        self.transport
            .shutdown()
            .await
            .map_err(ConnectionError::TransportFailed)
    }
}

impl std::fmt::Display for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TCP/{} connection to {} (protocol: {}, addrv2: {})",
            self.transport.version(),
            self.peer,
            self.negotiated.effective_version,
            self.negotiated.addr_v2
        )
    }
}
