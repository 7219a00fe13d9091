//! Settings for outbound connections.

use crate::peer::PeerProtocolVersion;
use crate::user_agent::UserAgent;
use bitcoin::p2p::address::AddrV2;
use bitcoin::p2p::ServiceFlags;
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Default user agent, following Bitcoin Core's "/$NAME:$VERSION/" convention.
pub fn default_user_agent() -> UserAgent {
    UserAgent::from_name_version("bitcoin-topology", env!("CARGO_PKG_VERSION"))
}

/// Sender address announced in version messages, `0.0.0.0:0`.
///
/// Peers have nothing to gossip about an unroutable address, so the crawler
/// stays out of address books.
pub const NON_LISTENING_ADDRESS: AddrV2 = AddrV2::Ipv4(Ipv4Addr::new(0, 0, 0, 0));
pub const NON_LISTENING_PORT: u16 = 0;

/// How long a TCP connect may take by default.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Which transports a connection may end up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportPolicy {
    /// Only the BIP-324 transport, peers without it fail.
    V2Required,
    /// Try BIP-324 first and redial with plaintext v1 if the peer rejects it.
    V2Preferred,
}

impl fmt::Display for TransportPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportPolicy::V2Required => write!(f, "v2 only"),
            TransportPolicy::V2Preferred => write!(f, "v2 with v1 fallback"),
        }
    }
}

/// Everything a connection announces about us and how it dials.
#[derive(Debug, Clone)]
pub struct ConnectionConfiguration {
    /// Protocol version sent in our version message.
    pub protocol_version: PeerProtocolVersion,
    /// Sub-version to announce, [`default_user_agent`] when unset.
    pub user_agent: Option<UserAgent>,
    /// Services we claim to offer.
    pub services: ServiceFlags,
    /// Our own address as announced to the peer.
    pub sender_address: AddrV2,
    /// Our own port as announced to the peer.
    pub sender_port: u16,
    /// Chain height we claim.
    pub start_height: i32,
    /// Ask the peer to relay transactions to us.
    pub relay: bool,
    /// See [`TransportPolicy`].
    pub transport_policy: TransportPolicy,
    /// Whether to negotiate AddrV2 (BIP-155) so Tor/I2P/CJDNS addresses are shared too.
    pub enable_addrv2: bool,
    /// Upper bound on the TCP connect.
    pub connection_timeout: Duration,
}

impl ConnectionConfiguration {
    /// Settings for a client that never accepts inbound connections.
    ///
    /// No services, the unroutable sender address, no transaction relay and
    /// AddrV2 negotiation switched on. An unknown `protocol_version` is
    /// announced as the minimum supported version.
    pub fn non_listening(
        protocol_version: PeerProtocolVersion,
        transport_policy: TransportPolicy,
        user_agent: Option<UserAgent>,
    ) -> Self {
        Self {
            protocol_version,
            user_agent,
            services: ServiceFlags::NONE,
            sender_address: NON_LISTENING_ADDRESS,
            sender_port: NON_LISTENING_PORT,
            start_height: 0,
            relay: false,
            transport_policy,
            enable_addrv2: true,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
        }
    }

    /// Bound the TCP connect by `timeout`.
    ///
    /// ```
    /// use std::time::Duration;
    /// use bitcoin_topology_connection::{ConnectionConfiguration, PeerProtocolVersion, TransportPolicy};
    ///
    /// let config = ConnectionConfiguration::non_listening(
    ///     PeerProtocolVersion::Known(70016),
    ///     TransportPolicy::V2Preferred,
    ///     None,
    /// ).with_connection_timeout(Duration::from_secs(3));
    /// assert_eq!(config.connection_timeout, Duration::from_secs(3));
    /// ```
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Enable or disable AddrV2 negotiation.
    pub fn with_addrv2(mut self, enable: bool) -> Self {
        self.enable_addrv2 = enable;
        self
    }

    /// The user agent which will be announced, falling back to the default.
    pub fn announced_user_agent(&self) -> UserAgent {
        self.user_agent.clone().unwrap_or_else(default_user_agent)
    }
}

impl fmt::Display for ConnectionConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConnectionConfiguration {{ protocol: {}, user_agent: \"{}\", services: {}, transport: {}, addrv2: {}, relay: {} }}",
            self.protocol_version,
            self.announced_user_agent(),
            self.services,
            self.transport_policy,
            self.enable_addrv2,
            self.relay
        )
    }
}
