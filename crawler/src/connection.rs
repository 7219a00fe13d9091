//! Peer sessions as seen by the crawler.
//!
//! The orchestrator only talks to peers through [`Connector`] and
//! [`PeerSession`], which keeps the traversal logic testable against an
//! in-memory graph. [`PeerConnector`] is the implementation backed by real
//! bitcoin p2p [`Connection`]s.

use crate::address::NetworkAddress;
use bitcoin::p2p::message::NetworkMessage;
use bitcoin::p2p::ServiceFlags;
use bitcoin::Network;
use bitcoin_topology_connection::{
    Connection, ConnectionConfiguration, ConnectionError, Peer, PeerServices,
};
use log::debug;
use std::fmt;
use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::time::{timeout, Instant};

/// Once at least one address batch has arrived, a gap this long ends collection.
const ADDRESS_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a session could not be established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailure {
    /// No handshake within the attempt deadline.
    Timeout,
    /// The peer could not be reached or actively refused the connection.
    Refused,
    /// The peer spoke something other than the bitcoin p2p protocol.
    ProtocolError,
    /// The peer hung up during the handshake.
    Disconnected,
}

impl fmt::Display for ConnectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectFailure::Timeout => write!(f, "handshake timed out"),
            ConnectFailure::Refused => write!(f, "connection refused or unreachable"),
            ConnectFailure::ProtocolError => write!(f, "protocol error during handshake"),
            ConnectFailure::Disconnected => write!(f, "peer disconnected during handshake"),
        }
    }
}

impl std::error::Error for ConnectFailure {}

/// Why an address request on an established session failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestFailure {
    Timeout,
    ProtocolError,
    Disconnected,
}

impl fmt::Display for RequestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestFailure::Timeout => write!(f, "address request timed out"),
            RequestFailure::ProtocolError => write!(f, "protocol error during address request"),
            RequestFailure::Disconnected => write!(f, "peer disconnected during address request"),
        }
    }
}

impl std::error::Error for RequestFailure {}

/// What a peer announced about itself during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub best_height: i32,
    pub version: u32,
    pub user_agent: String,
    pub services: ServiceFlags,
}

impl Handshake {
    /// Missing fields of a peer which never announced them are zero or empty.
    pub fn from_peer(peer: &Peer) -> Self {
        Handshake {
            best_height: peer.start_height.unwrap_or(0),
            version: peer.version.unwrap_or(0),
            user_agent: peer.user_agent.clone().unwrap_or_default(),
            services: match peer.services {
                PeerServices::Known(flags) => flags,
                PeerServices::Unknown => ServiceFlags::NONE,
            },
        }
    }
}

/// A handshaked session with a single peer.
pub trait PeerSession: Send {
    /// Metadata from the completed handshake.
    fn handshake(&self) -> Handshake;

    /// Ask the peer for the addresses it knows, collecting for at most `window`.
    ///
    /// An empty result within the window is `Ok(vec![])`, not an error.
    fn request_known_addresses(
        &mut self,
        window: Duration,
    ) -> impl Future<Output = Result<Vec<NetworkAddress>, RequestFailure>> + Send;

    /// Release the session. Called on every path once a session exists.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Factory for peer sessions.
pub trait Connector: Clone + Send + Sync + 'static {
    type Session: PeerSession + 'static;

    /// Connect to `address` and complete the handshake.
    fn connect(
        &self,
        address: &NetworkAddress,
    ) -> impl Future<Output = Result<Self::Session, ConnectFailure>> + Send;
}

/// Message level access to a connected peer.
///
/// Abstracts [`Connection`] so the address collection loop can be driven by
/// a scripted mock.
pub trait PeerConnection: Send {
    fn send(
        &mut self,
        message: NetworkMessage,
    ) -> impl Future<Output = Result<(), ConnectionError>> + Send;
    fn receive(&mut self) -> impl Future<Output = Result<NetworkMessage, ConnectionError>> + Send;
    fn peer(&self) -> &Peer;

    /// Send `getaddr` and collect `addr`/`addrv2` replies.
    ///
    /// Collection ends when `window` closes, or after five quiet seconds
    /// once the first batch has arrived. Pings are
    /// answered so the peer keeps talking. Addresses which are not reachable
    /// over TCP are dropped.
    fn get_addresses(
        &mut self,
        window: Duration,
    ) -> impl Future<Output = Result<Vec<NetworkAddress>, ConnectionError>> + Send {
        async move {
            self.send(NetworkMessage::GetAddr).await?;
            debug!("Sent getaddr message to peer");

            let deadline = Instant::now() + window;
            let mut addresses = Vec::new();
            let mut batches = 0usize;

            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                let wait = if batches == 0 {
                    remaining
                } else {
                    remaining.min(ADDRESS_IDLE_TIMEOUT)
                };

                let message = match timeout(wait, self.receive()).await {
                    Ok(Ok(message)) => message,
                    Ok(Err(e)) => return Err(e),
                    Err(_) if batches > 0 => break,
                    Err(_) => continue,
                };

                match message {
                    NetworkMessage::Addr(entries) => {
                        debug!("Received {} peer addresses", entries.len());
                        batches += 1;
                        addresses.extend(entries.iter().filter_map(|(_, address)| {
                            address.socket_addr().ok().map(NetworkAddress::from)
                        }));
                    }
                    NetworkMessage::AddrV2(entries) => {
                        debug!("Received {} peer addresses (v2 format)", entries.len());
                        batches += 1;
                        addresses.extend(entries.iter().filter_map(|entry| {
                            NetworkAddress::from_addr_v2(&entry.addr, entry.port)
                        }));
                    }
                    NetworkMessage::Ping(nonce) => {
                        debug!("Received ping during getaddr, responding with pong");
                        self.send(NetworkMessage::Pong(nonce)).await?;
                    }
                    _ => {
                        debug!("Ignoring {} message during getaddr", message.cmd());
                    }
                }
            }

            debug!(
                "Collected {} addresses in {} batches from {}",
                addresses.len(),
                batches,
                self.peer()
            );
            Ok(addresses)
        }
    }
}

impl PeerConnection for Connection {
    fn send(
        &mut self,
        message: NetworkMessage,
    ) -> impl Future<Output = Result<(), ConnectionError>> + Send {
        self.send(message)
    }

    fn receive(&mut self) -> impl Future<Output = Result<NetworkMessage, ConnectionError>> + Send {
        self.receive()
    }

    fn peer(&self) -> &Peer {
        self.peer()
    }
}

impl PeerSession for Connection {
    fn handshake(&self) -> Handshake {
        Handshake::from_peer(self.peer())
    }

    fn request_known_addresses(
        &mut self,
        window: Duration,
    ) -> impl Future<Output = Result<Vec<NetworkAddress>, RequestFailure>> + Send {
        async move {
            self.get_addresses(window).await.map_err(|e| {
                debug!("Address request failed: {e}");
                request_failure(&e)
            })
        }
    }

    fn close(self) -> impl Future<Output = ()> + Send {
        async move {
            if let Err(e) = Connection::close(self).await {
                debug!("Error while closing connection: {e}");
            }
        }
    }
}

/// Classify a failed connection attempt.
pub fn connect_failure(error: &ConnectionError) -> ConnectFailure {
    match error.io_kind() {
        Some(ErrorKind::TimedOut) => ConnectFailure::Timeout,
        Some(
            ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected,
        ) => ConnectFailure::Disconnected,
        // Refused, unreachable networks and hosts, unroutable addresses.
        Some(_) => ConnectFailure::Refused,
        None => ConnectFailure::ProtocolError,
    }
}

/// Classify a failure on an established session.
pub fn request_failure(error: &ConnectionError) -> RequestFailure {
    match error.io_kind() {
        Some(ErrorKind::TimedOut) => RequestFailure::Timeout,
        Some(_) => RequestFailure::Disconnected,
        None => RequestFailure::ProtocolError,
    }
}

/// Connector which dials peers over TCP.
#[derive(Debug, Clone)]
pub struct PeerConnector {
    network: Network,
    configuration: ConnectionConfiguration,
}

impl PeerConnector {
    pub fn new(network: Network, configuration: ConnectionConfiguration) -> Self {
        Self {
            network,
            configuration,
        }
    }
}

impl Connector for PeerConnector {
    type Session = Connection;

    fn connect(
        &self,
        address: &NetworkAddress,
    ) -> impl Future<Output = Result<Self::Session, ConnectFailure>> + Send {
        let address = *address;
        let network = self.network;
        let configuration = self.configuration.clone();
        async move {
            Connection::tcp(address.to_peer(), network, configuration)
                .await
                .map_err(|e| {
                    debug!("Failed to connect to {address}: {e}");
                    connect_failure(&e)
                })
        }
    }
}

#[cfg(test)]
pub mod test_utils {
    //! Mock peers for exercising the crawler without a network.

    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    /// Scripted [`PeerConnection`] for the address collection loop.
    #[derive(Debug)]
    pub struct MockPeerConnection {
        /// Returned by receive() in order, then it waits forever.
        pub incoming_messages: VecDeque<Result<NetworkMessage, ConnectionError>>,
        pub sent_messages: Vec<NetworkMessage>,
        pub peer_info: Peer,
    }

    impl MockPeerConnection {
        pub fn new() -> Self {
            MockPeerConnection {
                incoming_messages: VecDeque::new(),
                sent_messages: Vec::new(),
                peer_info: "127.0.0.1:8333"
                    .parse::<NetworkAddress>()
                    .unwrap()
                    .to_peer(),
            }
        }

        pub fn add_incoming_message(&mut self, message: NetworkMessage) {
            self.incoming_messages.push_back(Ok(message));
        }

        pub fn add_incoming_error(&mut self, error: ConnectionError) {
            self.incoming_messages.push_back(Err(error));
        }
    }

    impl PeerConnection for MockPeerConnection {
        async fn send(&mut self, message: NetworkMessage) -> Result<(), ConnectionError> {
            self.sent_messages.push(message);
            Ok(())
        }

        async fn receive(&mut self) -> Result<NetworkMessage, ConnectionError> {
            match self.incoming_messages.pop_front() {
                Some(result) => result,
                // Let the caller's timeout handle it.
                None => std::future::pending().await,
            }
        }

        fn peer(&self) -> &Peer {
            &self.peer_info
        }
    }

    /// How a node of a [`MockNetwork`] behaves when dialed.
    #[derive(Debug, Clone)]
    pub enum Behaviour {
        /// Handshake, then answer the address request with these addresses.
        Respond(Vec<NetworkAddress>),
        /// Fail the connect.
        Refuse,
        /// Never finish the handshake.
        HangHandshake,
        /// Handshake, then never answer the address request.
        HangRequest,
        /// Handshake, then drop the connection on the address request.
        RequestFails,
        /// Panic inside the connect.
        Panic,
    }

    /// Bookkeeping shared by all clones of a [`MockNetwork`].
    #[derive(Debug, Default)]
    pub struct MockStats {
        pub connects: HashMap<NetworkAddress, usize>,
        pub active: usize,
        pub max_active: usize,
        pub opened: usize,
        pub closed: usize,
    }

    /// Counts a connect or session as active until dropped.
    #[derive(Debug)]
    struct ActiveGuard(Arc<Mutex<MockStats>>);

    impl Drop for ActiveGuard {
        fn drop(&mut self) {
            self.0.lock().unwrap().active -= 1;
        }
    }

    /// An in-memory peer graph implementing [`Connector`].
    ///
    /// Addresses which are not part of the graph refuse connections.
    #[derive(Debug, Clone)]
    pub struct MockNetwork {
        nodes: Arc<HashMap<NetworkAddress, Behaviour>>,
        stats: Arc<Mutex<MockStats>>,
        latency: Duration,
    }

    impl MockNetwork {
        pub fn new<I>(nodes: I) -> Self
        where
            I: IntoIterator<Item = (NetworkAddress, Behaviour)>,
        {
            MockNetwork {
                nodes: Arc::new(nodes.into_iter().collect()),
                stats: Arc::new(Mutex::new(MockStats::default())),
                latency: Duration::ZERO,
            }
        }

        /// Delay applied to every connect and address request.
        pub fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }

        pub fn connects(&self, address: &NetworkAddress) -> usize {
            self.stats
                .lock()
                .unwrap()
                .connects
                .get(address)
                .copied()
                .unwrap_or(0)
        }

        pub fn total_connects(&self) -> usize {
            self.stats.lock().unwrap().connects.values().sum()
        }

        pub fn max_active(&self) -> usize {
            self.stats.lock().unwrap().max_active
        }

        pub fn opened(&self) -> usize {
            self.stats.lock().unwrap().opened
        }

        pub fn closed(&self) -> usize {
            self.stats.lock().unwrap().closed
        }
    }

    /// A session handed out by [`MockNetwork`].
    #[derive(Debug)]
    pub struct MockSession {
        behaviour: Behaviour,
        latency: Duration,
        stats: Arc<Mutex<MockStats>>,
        _active: ActiveGuard,
    }

    impl Connector for MockNetwork {
        type Session = MockSession;

        fn connect(
            &self,
            address: &NetworkAddress,
        ) -> impl Future<Output = Result<Self::Session, ConnectFailure>> + Send {
            let behaviour = self
                .nodes
                .get(address)
                .cloned()
                .unwrap_or(Behaviour::Refuse);
            let stats = self.stats.clone();
            let latency = self.latency;
            let address = *address;

            async move {
                let active = {
                    let mut s = stats.lock().unwrap();
                    *s.connects.entry(address).or_insert(0) += 1;
                    s.active += 1;
                    s.max_active = s.max_active.max(s.active);
                    ActiveGuard(stats.clone())
                };

                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }

                match behaviour {
                    Behaviour::Refuse => Err(ConnectFailure::Refused),
                    Behaviour::HangHandshake => std::future::pending().await,
                    Behaviour::Panic => panic!("mock node {address} panicked"),
                    behaviour => {
                        stats.lock().unwrap().opened += 1;
                        Ok(MockSession {
                            behaviour,
                            latency,
                            stats,
                            _active: active,
                        })
                    }
                }
            }
        }
    }

    impl PeerSession for MockSession {
        fn handshake(&self) -> Handshake {
            Handshake {
                best_height: 840_000,
                version: 70016,
                user_agent: "/Mock:0.1.0/".to_string(),
                services: ServiceFlags::NETWORK | ServiceFlags::WITNESS,
            }
        }

        async fn request_known_addresses(
            &mut self,
            _window: Duration,
        ) -> Result<Vec<NetworkAddress>, RequestFailure> {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            match &self.behaviour {
                Behaviour::Respond(addresses) => Ok(addresses.clone()),
                Behaviour::RequestFails => Err(RequestFailure::Disconnected),
                _ => std::future::pending().await,
            }
        }

        async fn close(self) {
            self.stats.lock().unwrap().closed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::MockPeerConnection;
    use super::*;
    use bitcoin::p2p::address::{AddrV2, AddrV2Message, Address};
    use bitcoin_topology_connection::TransportError;
    use std::net::{Ipv4Addr, SocketAddr};
    use std::time::Duration;

    fn address(s: &str) -> NetworkAddress {
        s.parse().unwrap()
    }

    fn addr_message(ips: &[[u8; 4]]) -> NetworkMessage {
        let entries = ips
            .iter()
            .map(|ip| {
                let socket = SocketAddr::from((Ipv4Addr::from(*ip), 8333));
                (0u32, Address::new(&socket, ServiceFlags::NETWORK))
            })
            .collect();
        NetworkMessage::Addr(entries)
    }

    #[tokio::test]
    async fn test_get_addresses() {
        let mut mock_conn = MockPeerConnection::new();
        mock_conn.add_incoming_message(addr_message(&[[192, 168, 1, 1], [10, 0, 0, 1]]));

        let addresses = mock_conn
            .get_addresses(Duration::from_millis(100))
            .await
            .unwrap();

        assert_eq!(
            addresses,
            vec![address("192.168.1.1:8333"), address("10.0.0.1:8333")]
        );
        assert_eq!(mock_conn.sent_messages.len(), 1);
        assert!(matches!(
            mock_conn.sent_messages[0],
            NetworkMessage::GetAddr
        ));
    }

    #[tokio::test]
    async fn test_get_addresses_v2_skips_unreachable_networks() {
        let mut mock_conn = MockPeerConnection::new();
        mock_conn.add_incoming_message(NetworkMessage::AddrV2(vec![
            AddrV2Message {
                time: 0,
                services: ServiceFlags::NETWORK,
                addr: AddrV2::Ipv4(Ipv4Addr::new(10, 0, 0, 7)),
                port: 8333,
            },
            AddrV2Message {
                time: 0,
                services: ServiceFlags::NETWORK,
                addr: AddrV2::TorV3([9; 32]),
                port: 8333,
            },
        ]));

        let addresses = mock_conn
            .get_addresses(Duration::from_millis(100))
            .await
            .unwrap();

        assert_eq!(addresses, vec![address("10.0.0.7:8333")]);
    }

    #[tokio::test]
    async fn test_get_addresses_answers_ping() {
        let mut mock_conn = MockPeerConnection::new();
        mock_conn.add_incoming_message(NetworkMessage::Ping(7));
        mock_conn.add_incoming_message(addr_message(&[[10, 0, 0, 1]]));

        let addresses = mock_conn
            .get_addresses(Duration::from_millis(100))
            .await
            .unwrap();

        assert_eq!(addresses.len(), 1);
        assert!(matches!(
            mock_conn.sent_messages[..],
            [NetworkMessage::GetAddr, NetworkMessage::Pong(7)]
        ));
    }

    #[tokio::test]
    async fn test_get_addresses_timeout_is_empty() {
        let mut mock_conn = MockPeerConnection::new();

        let addresses = mock_conn
            .get_addresses(Duration::from_millis(50))
            .await
            .unwrap();

        assert!(addresses.is_empty());
        assert_eq!(mock_conn.sent_messages.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_addresses_stops_after_idle_gap() {
        let mut mock_conn = MockPeerConnection::new();
        mock_conn.add_incoming_message(addr_message(&[[10, 0, 0, 1]]));

        let start = Instant::now();
        let addresses = mock_conn
            .get_addresses(Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(addresses.len(), 1);
        assert_eq!(start.elapsed(), ADDRESS_IDLE_TIMEOUT);
    }

    #[tokio::test]
    async fn test_get_addresses_connection_error() {
        let mut mock_conn = MockPeerConnection::new();
        mock_conn.add_incoming_error(ConnectionError::Io(std::io::Error::new(
            ErrorKind::BrokenPipe,
            "Connection lost",
        )));

        let err = mock_conn
            .get_addresses(Duration::from_millis(100))
            .await
            .unwrap_err();

        assert_eq!(request_failure(&err), RequestFailure::Disconnected);
    }

    #[test]
    fn test_failure_classification() {
        let io = |kind| ConnectionError::Io(std::io::Error::new(kind, "test"));

        assert_eq!(
            connect_failure(&io(ErrorKind::ConnectionRefused)),
            ConnectFailure::Refused
        );
        assert_eq!(
            connect_failure(&io(ErrorKind::TimedOut)),
            ConnectFailure::Timeout
        );
        assert_eq!(
            connect_failure(&io(ErrorKind::UnexpectedEof)),
            ConnectFailure::Disconnected
        );
        assert_eq!(
            connect_failure(&ConnectionError::ProtocolFailed),
            ConnectFailure::ProtocolError
        );
        assert_eq!(
            connect_failure(&ConnectionError::ConnectionLoop),
            ConnectFailure::ProtocolError
        );

        assert_eq!(
            request_failure(&io(ErrorKind::ConnectionReset)),
            RequestFailure::Disconnected
        );
        assert_eq!(
            request_failure(&ConnectionError::ProtocolFailed),
            RequestFailure::ProtocolError
        );
    }

    #[test]
    fn test_transport_failure_classification() {
        // What an encrypted session reports when the peer hangs up.
        let eof = ConnectionError::TransportFailed(TransportError::Io(std::io::Error::new(
            ErrorKind::UnexpectedEof,
            "peer closed",
        )));
        assert_eq!(request_failure(&eof), RequestFailure::Disconnected);
        assert_eq!(connect_failure(&eof), ConnectFailure::Disconnected);

        let cipher = ConnectionError::TransportFailed(TransportError::Encryption);
        assert_eq!(request_failure(&cipher), RequestFailure::ProtocolError);
        assert_eq!(connect_failure(&cipher), ConnectFailure::ProtocolError);
    }

    #[test]
    fn test_handshake_from_peer() {
        let mut peer = address("10.0.0.1:8333").to_peer();
        assert_eq!(Handshake::from_peer(&peer).services, ServiceFlags::NONE);

        peer.start_height = Some(42);
        peer.user_agent = Some("/Satoshi:27.0.0/".to_string());
        let peer = peer.with_known_services(ServiceFlags::NETWORK);
        let handshake = Handshake::from_peer(&peer);
        assert_eq!(handshake.best_height, 42);
        assert_eq!(handshake.user_agent, "/Satoshi:27.0.0/");
        assert_eq!(handshake.services, ServiceFlags::NETWORK);
    }
}
