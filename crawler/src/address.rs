//! Addresses and the records a crawl produces about them.

use crate::connection::Handshake;
use bitcoin::p2p::address::AddrV2;
use bitcoin::p2p::ServiceFlags;
use bitcoin_topology_connection::Peer;
use std::fmt;
use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::str::FromStr;

/// A dialable peer endpoint, the unit of deduplication in a crawl.
///
/// IPv4-mapped IPv6 addresses are canonicalized to IPv4 on construction, so
/// `::ffff:10.0.0.1` and `10.0.0.1` on the same port are the same address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkAddress {
    ip: IpAddr,
    port: u16,
}

impl NetworkAddress {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        let ip = match ip {
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => IpAddr::V4(v4),
                None => IpAddr::V6(v6),
            },
            v4 => v4,
        };
        NetworkAddress { ip, port }
    }

    /// Convert a BIP-155 address.
    ///
    /// Only IPv4 and IPv6 are reachable over plain TCP, Tor, I2P and CJDNS
    /// addresses return `None`.
    pub fn from_addr_v2(address: &AddrV2, port: u16) -> Option<Self> {
        match address {
            AddrV2::Ipv4(ipv4) => Some(NetworkAddress::new(IpAddr::V4(*ipv4), port)),
            AddrV2::Ipv6(ipv6) => Some(NetworkAddress::new(IpAddr::V6(*ipv6), port)),
            _ => None,
        }
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// A [`Peer`] at this address with nothing known about it yet.
    pub fn to_peer(&self) -> Peer {
        let address = match self.ip {
            IpAddr::V4(ipv4) => AddrV2::Ipv4(ipv4),
            IpAddr::V6(ipv6) => AddrV2::Ipv6(ipv6),
        };
        Peer::new(address, self.port)
    }
}

impl From<SocketAddr> for NetworkAddress {
    fn from(addr: SocketAddr) -> Self {
        NetworkAddress::new(addr.ip(), addr.port())
    }
}

impl FromStr for NetworkAddress {
    type Err = AddrParseError;

    /// Parse `1.2.3.4:8333` or `[2001:db8::1]:8333`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<SocketAddr>().map(NetworkAddress::from)
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

/// "`source` listed `discovered` as a known peer."
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressEdge {
    pub source: NetworkAddress,
    pub discovered: NetworkAddress,
}

impl AddressEdge {
    pub fn new(source: NetworkAddress, discovered: NetworkAddress) -> Self {
        AddressEdge { source, discovered }
    }
}

/// Metadata a peer announced in its `version` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub address: NetworkAddress,
    /// Best block height the peer claimed at handshake time.
    pub best_height: i32,
    /// Protocol version the peer announced.
    pub client_version: u32,
    /// Sub-version string, e.g. `/Satoshi:27.0.0/`.
    pub user_agent: String,
    pub services: ServiceFlags,
}

impl PeerRecord {
    pub fn new(address: NetworkAddress, handshake: &Handshake) -> Self {
        PeerRecord {
            address,
            best_height: handshake.best_height,
            client_version: handshake.version,
            user_agent: handshake.user_agent.clone(),
            services: handshake.services,
        }
    }
}
