//! Bitcoin peer information gathered before and during a handshake.

use bitcoin::p2p::address::AddrV2;
use bitcoin::p2p::ServiceFlags;
use std::fmt;

/// Oldest protocol version modern nodes still accept.
pub const MIN_PROTOCOL_VERSION: u32 = 70001;
/// First protocol version which understands `sendaddrv2` (BIP-155, Core 0.21).
pub const ADDRV2_MIN_PROTOCOL_VERSION: u32 = 70016;

/// Services of a peer, known once it has sent its version message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerServices {
    Known(ServiceFlags),
    Unknown,
}

/// Protocol version of a peer, or of ourselves when announcing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerProtocolVersion {
    Known(u32),
    Unknown,
}

impl PeerProtocolVersion {
    /// The version, or `default` when unknown.
    pub fn unwrap_or(self, default: u32) -> u32 {
        match self {
            PeerProtocolVersion::Known(v) => v,
            PeerProtocolVersion::Unknown => default,
        }
    }
}

impl fmt::Display for PeerProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerProtocolVersion::Known(v) => write!(f, "{v}"),
            PeerProtocolVersion::Unknown => write!(f, "unknown"),
        }
    }
}

/// A node on the bitcoin network.
///
/// Before a handshake only the address and port are known. A completed
/// handshake fills in what the peer announced in its `version` message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Peer {
    /// Network address, possibly non-IP.
    pub address: AddrV2,
    /// Listening port.
    pub port: u16,
    /// Services from the version message.
    pub services: PeerServices,
    /// Protocol version from the version message.
    pub version: PeerProtocolVersion,
    /// User agent (sub-version) string announced by the peer.
    pub user_agent: Option<String>,
    /// Best block height announced by the peer.
    pub start_height: Option<i32>,
}

impl Peer {
    /// A peer nothing is known about yet besides where it listens.
    pub fn new(address: AddrV2, port: u16) -> Self {
        Peer {
            address,
            port,
            services: PeerServices::Unknown,
            version: PeerProtocolVersion::Unknown,
            user_agent: None,
            start_height: None,
        }
    }

    /// Returns a new Peer with known services.
    pub fn with_known_services(&self, services: ServiceFlags) -> Self {
        Peer {
            services: PeerServices::Known(services),
            ..self.clone()
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}:{} ([peer] services: {}, version: {}, user agent: {})",
            self.address,
            self.port,
            match self.services {
                PeerServices::Known(flags) => flags.to_string(),
                PeerServices::Unknown => "unknown".to_string(),
            },
            self.version,
            self.user_agent.as_deref().unwrap_or("unknown"),
        )
    }
}
