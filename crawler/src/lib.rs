//! Crawl the bitcoin peer-to-peer network and record its topology.
//!
//! A crawl starts from seed addresses, connects to every reachable node,
//! asks each for the addresses it knows and follows them breadth first.
//! Every "peer X listed peer Y" edge and every handshake's metadata are
//! written to a [`ResultSink`] as they are learned.
//!
//! ```no_run
//! use bitcoin::Network;
//! use bitcoin_topology_crawler::{CrawlerBuilder, DnsSeeds, FileSink};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let crawler = CrawlerBuilder::new(Network::Bitcoin).build()?;
//! let sink = Arc::new(FileSink::create("edges.csv", "peers.csv").await?);
//!
//! let summary = crawler
//!     .crawl(&DnsSeeds::for_network(Network::Bitcoin), sink)
//!     .await?;
//! println!("{summary}");
//! # Ok(())
//! # }
//! ```

mod address;
mod builder;
mod connection;
mod crawler;
mod error;
mod frontier;
mod seed;
mod sink;

pub use address::{AddressEdge, NetworkAddress, PeerRecord};
pub use builder::{
    CrawlerBuilder, DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_MAX_CONCURRENT_TASKS,
    DEFAULT_PROGRESS_INTERVAL, DEFAULT_SEED_MIN_COUNT, DEFAULT_SEED_TIMEOUT,
};
pub use connection::{
    ConnectFailure, Connector, Handshake, PeerConnection, PeerConnector, PeerSession,
    RequestFailure,
};
pub use crawler::{CrawlSummary, Crawler, Phase, StopHandle};
pub use error::{CrawlError, CrawlerBuilderError};
pub use frontier::{Frontier, FrontierStats, Outcome};
pub use seed::{default_port, DnsSeeds, SeedError, SeedResolver, StaticSeeds};
pub use sink::{edge_line, peer_line, FileSink, MemorySink, ResultSink, SinkError};

// Re-exports.
pub use bitcoin_topology_connection::{
    ConnectionError, Peer, PeerProtocolVersion, PeerServices, TransportPolicy, UserAgent,
};
