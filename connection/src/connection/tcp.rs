//! TCP-specific connection establishment.

use super::configuration::{ConnectionConfiguration, TransportPolicy};
use super::error::ConnectionError;
use crate::peer::{Peer, PeerServices};
use crate::transport::Transport;
use bitcoin::p2p::address::AddrV2;
use bitcoin::p2p::ServiceFlags;
use bitcoin::Network;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Transport over the halves of a TCP stream.
pub type TcpTransport = Transport<BufReader<OwnedReadHalf>, OwnedWriteHalf>;

/// Socket address of a peer, if it is reachable over plain TCP.
pub fn socket_addr(peer: &Peer) -> Result<SocketAddr, ConnectionError> {
    let ip_addr = match &peer.address {
        AddrV2::Ipv4(ipv4) => IpAddr::V4(*ipv4),
        AddrV2::Ipv6(ipv6) => IpAddr::V6(*ipv6),
        _ => return Err(ConnectionError::UnsupportedAddressType),
    };
    Ok(SocketAddr::new(ip_addr, peer.port))
}

/// Open a TCP stream with a timeout and nodelay.
async fn establish_tcp_connection(
    socket_addr: SocketAddr,
    connection_timeout: Duration,
) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf), ConnectionError> {
    match tokio::time::timeout(connection_timeout, TcpStream::connect(socket_addr)).await {
        Ok(Ok(stream)) => {
            // No delay is helpful for the small packets of the bitcoin p2p protocol.
            stream.set_nodelay(true)?;
            let (reader, writer) = stream.into_split();
            Ok((BufReader::new(reader), writer))
        }
        Ok(Err(e)) => Err(ConnectionError::Io(e)),
        Err(_) => Err(ConnectionError::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            "Connection attempt timed out",
        ))),
    }
}

/// Negotiate a transport with the peer according to the configured policy.
///
/// A v2 attempt is skipped only if v1 fallback is allowed and the peer is
/// known not to advertise `P2P_V2`.
pub async fn negotiate_transport(
    peer: &Peer,
    network: Network,
    configuration: &ConnectionConfiguration,
) -> Result<TcpTransport, ConnectionError> {
    let socket_addr = socket_addr(peer)?;
    let timeout = configuration.connection_timeout;
    let policy = configuration.transport_policy;

    let peer_supports_v2 = match peer.services {
        PeerServices::Unknown => true,
        PeerServices::Known(flags) => flags.has(ServiceFlags::P2P_V2),
    };

    if !peer_supports_v2 && policy == TransportPolicy::V2Preferred {
        let (reader, writer) = establish_tcp_connection(socket_addr, timeout).await?;
        log::debug!("Using v1 plaintext connection to {socket_addr} (no P2P_V2 flag)");
        return Ok(Transport::v1(network.magic(), reader, writer));
    }

    let (reader, writer) = establish_tcp_connection(socket_addr, timeout).await?;
    match Transport::v2(network, reader, writer).await {
        Ok(transport) => {
            log::debug!("Established v2 encrypted connection to {socket_addr}");
            Ok(transport)
        }
        Err(e) => {
            log::debug!("V2 handshake failed for {socket_addr}: {e}");
            match policy {
                TransportPolicy::V2Required => Err(ConnectionError::V2TransportRequired),
                TransportPolicy::V2Preferred => {
                    // Peer most likely hung up on the v2 key exchange, start over.
                    let (reader, writer) = establish_tcp_connection(socket_addr, timeout).await?;
                    log::debug!("Using v1 plaintext connection to {socket_addr}");
                    Ok(Transport::v1(network.magic(), reader, writer))
                }
            }
        }
    }
}
