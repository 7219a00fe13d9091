mod connection;
mod peer;
pub mod transport;
pub mod user_agent;

pub use connection::{
    default_user_agent, Connection, ConnectionConfiguration, ConnectionError, Negotiated,
    TransportPolicy, DEFAULT_CONNECTION_TIMEOUT,
};
pub use peer::{
    Peer, PeerProtocolVersion, PeerServices, ADDRV2_MIN_PROTOCOL_VERSION, MIN_PROTOCOL_VERSION,
};
pub use transport::{Transport, TransportError};
pub use user_agent::{UserAgent, UserAgentError};
