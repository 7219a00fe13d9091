//! Bitcoin p2p protocol version handshake.
//!
//! 1. Send local version message.
//! 2. Receive and validate peer's version, answer with `sendaddrv2` and `verack`.
//! 3. Complete once both version and verack have been received.

use super::configuration::ConnectionConfiguration;
use super::error::ConnectionError;
use crate::peer::{
    Peer, PeerProtocolVersion, PeerServices, ADDRV2_MIN_PROTOCOL_VERSION, MIN_PROTOCOL_VERSION,
};
use crate::transport::Transport;
use bitcoin::p2p::address::{AddrV2, Address};
use bitcoin::p2p::message::NetworkMessage;
use bitcoin::p2p::message_network::VersionMessage;
use bitcoin::p2p::ServiceFlags;
use log::{debug, error};
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncWrite};

/// Current Unix timestamp, or zero if the clock is before the epoch.
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Generates a 64-bit nonce for version messages.
///
/// *Not* cryptographically secure, only used for connection loop detection.
pub fn generate_nonce() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    // Mix in the process ID for additional entropy.
    now ^ (process::id() as u64).rotate_left(32)
}

/// State machine for tracking handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Sent version message, but haven't received anything yet.
    VersionSent,
    /// Received the peer's version message (and sent verack), but no verack response yet.
    VersionReceived,
    /// Received a verack, but no version message yet.
    VerackReceived,
    /// Both version and verack received.
    Complete,
}

impl HandshakeState {
    fn on_version(self) -> Self {
        match self {
            HandshakeState::VerackReceived => HandshakeState::Complete,
            _ => HandshakeState::VersionReceived,
        }
    }

    fn on_verack(self) -> Self {
        match self {
            HandshakeState::VersionReceived => HandshakeState::Complete,
            HandshakeState::VersionSent => HandshakeState::VerackReceived,
            _ => {
                debug!("Received duplicate verack message in state {self:?}, ignoring");
                self
            }
        }
    }
}

/// What the handshake settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    /// Minimum of both sides' protocol versions.
    pub effective_version: u32,
    /// Both sides sent `sendaddrv2`.
    pub addr_v2: bool,
}

/// Converts AddrV2 to SocketAddr for version message compatibility.
pub fn address_to_socket(addr: &AddrV2, port: u16) -> SocketAddr {
    match addr {
        AddrV2::Ipv4(ipv4) => SocketAddr::new(IpAddr::V4(*ipv4), port),
        AddrV2::Ipv6(ipv6) => SocketAddr::new(IpAddr::V6(*ipv6), port),
        _ => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port),
    }
}

fn version_message(peer: &Peer, configuration: &ConnectionConfiguration, nonce: u64) -> NetworkMessage {
    let receiver_services = match peer.services {
        PeerServices::Known(flags) => flags,
        PeerServices::Unknown => ServiceFlags::NONE,
    };
    let receiver = address_to_socket(&peer.address, peer.port);
    let sender = address_to_socket(&configuration.sender_address, configuration.sender_port);

    NetworkMessage::Version(VersionMessage {
        version: configuration
            .protocol_version
            .unwrap_or(MIN_PROTOCOL_VERSION),
        services: configuration.services,
        timestamp: unix_timestamp(),
        receiver: Address::new(&receiver, receiver_services),
        sender: Address::new(&sender, configuration.services),
        nonce,
        user_agent: configuration.announced_user_agent().to_string(),
        start_height: configuration.start_height,
        relay: configuration.relay,
    })
}

/// Run the version handshake over an established transport.
///
/// On success `peer` carries what the remote announced: services, protocol
/// version, user agent and best height.
pub async fn perform_handshake<R, W>(
    transport: &mut Transport<R, W>,
    peer: &mut Peer,
    configuration: &ConnectionConfiguration,
) -> Result<Negotiated, ConnectionError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let nonce = generate_nonce();
    transport
        .write(version_message(peer, configuration, nonce))
        .await?;
    debug!("Sent version message to {:?}:{}", peer.address, peer.port);

    let local_version = configuration
        .protocol_version
        .unwrap_or(MIN_PROTOCOL_VERSION);
    let mut negotiated = Negotiated {
        effective_version: local_version,
        addr_v2: false,
    };
    let mut sent_addrv2 = false;
    let mut received_addrv2 = false;
    let mut state = HandshakeState::VersionSent;

    while state != HandshakeState::Complete {
        match transport.read().await? {
            NetworkMessage::Version(version) => {
                if version.nonce == nonce {
                    error!("Connection loop detected - received same nonce");
                    return Err(ConnectionError::ConnectionLoop);
                }
                if version.version < MIN_PROTOCOL_VERSION {
                    debug!(
                        "Peer announced obsolete protocol version {}",
                        version.version
                    );
                    return Err(ConnectionError::ProtocolFailed);
                }
                if matches!(
                    state,
                    HandshakeState::VersionReceived | HandshakeState::Complete
                ) {
                    debug!("Received duplicate version message in state {state:?}, ignoring");
                    continue;
                }

                peer.services = PeerServices::Known(version.services);
                peer.version = PeerProtocolVersion::Known(version.version);
                peer.user_agent = Some(version.user_agent);
                peer.start_height = Some(version.start_height);
                negotiated.effective_version = std::cmp::min(local_version, version.version);

                // BIP-155: sendaddrv2 must go out between version and verack.
                if configuration.enable_addrv2
                    && negotiated.effective_version >= ADDRV2_MIN_PROTOCOL_VERSION
                {
                    transport.write(NetworkMessage::SendAddrV2).await?;
                    sent_addrv2 = true;
                }
                transport.write(NetworkMessage::Verack).await?;
                state = state.on_version();
            }
            NetworkMessage::Verack => {
                state = state.on_verack();
            }
            NetworkMessage::SendAddrV2 => {
                received_addrv2 = true;
            }
            message => {
                debug!("Received unexpected message during handshake: {message:?}, ignoring");
            }
        }
    }

    negotiated.addr_v2 = sent_addrv2 && received_addrv2;
    debug!("Handshake completed: {negotiated:?}");
    Ok(negotiated)
}
