//! Builder pattern for configuring and creating crawler instances.

use crate::connection::{Connector, PeerConnector};
use crate::crawler::{CrawlConfig, Crawler};
use crate::error::CrawlerBuilderError;
use bitcoin::Network;
use bitcoin_topology_connection::{
    ConnectionConfiguration, PeerProtocolVersion, TransportPolicy, UserAgent,
    DEFAULT_CONNECTION_TIMEOUT,
};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Default protocol version for crawler connections.
const DEFAULT_PROTOCOL_VERSION: PeerProtocolVersion = PeerProtocolVersion::Known(70016);
/// Default maximum number of concurrent connection attempts.
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 64;
/// Default budget for one attempt, connect through address collection.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(20);
/// Default number of seeds below which a warning is logged.
pub const DEFAULT_SEED_MIN_COUNT: usize = 1;
/// Default timeout for seed resolution.
pub const DEFAULT_SEED_TIMEOUT: Duration = Duration::from_secs(10);
/// Default interval between progress log lines.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(60);

/// Builder for creating a customized [`Crawler`] instance.
///
/// # Example
///
/// ```
/// # fn main() -> Result<(), bitcoin_topology_crawler::CrawlerBuilderError> {
/// use bitcoin::Network;
/// use bitcoin_topology_crawler::{CrawlerBuilder, TransportPolicy};
/// use std::time::Duration;
///
/// // Create a basic crawler for the Bitcoin mainnet
/// let basic_crawler = CrawlerBuilder::new(Network::Bitcoin).build()?;
///
/// // Create a crawler with custom settings
/// let custom_crawler = CrawlerBuilder::new(Network::Bitcoin)
///     .with_user_agent("/my-custom-crawler:1.0/")?
///     .with_transport_policy(TransportPolicy::V2Required)
///     .with_max_concurrent_tasks(16)
///     .with_attempt_timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CrawlerBuilder {
    /// Bitcoin network the crawler will operate on.
    network: Network,
    /// Custom user agent advertised for connection.
    user_agent: Option<UserAgent>,
    /// Transport policy for connections.
    transport_policy: TransportPolicy,
    /// Protocol version to advertise in connections.
    protocol_version: PeerProtocolVersion,
    max_concurrent_tasks: usize,
    attempt_timeout: Duration,
    seed_min_count: usize,
    seed_timeout: Duration,
    progress_interval: Duration,
}

impl CrawlerBuilder {
    /// Create a new crawler builder for the specified network.
    ///
    /// # Arguments
    ///
    /// * `network` - The bitcoin network to crawl.
    pub fn new(network: Network) -> Self {
        CrawlerBuilder {
            network,
            user_agent: None,
            transport_policy: TransportPolicy::V2Preferred,
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            seed_min_count: DEFAULT_SEED_MIN_COUNT,
            seed_timeout: DEFAULT_SEED_TIMEOUT,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Set a custom user agent string for the crawler.
    ///
    /// The user agent identifies the crawler to other peers on the network.
    /// It must follow Bitcoin Core's convention: "/Name:Version/".
    ///
    /// # Returns
    ///
    /// * `Ok(Self)` - The builder for method chaining if validation succeeds.
    /// * `Err(CrawlerBuilderError)` - If the user agent format is invalid.
    pub fn with_user_agent<S: Into<String>>(
        mut self,
        user_agent: S,
    ) -> Result<Self, CrawlerBuilderError> {
        let user_agent =
            UserAgent::new(user_agent.into()).map_err(CrawlerBuilderError::InvalidUserAgent)?;
        self.user_agent = Some(user_agent);
        Ok(self)
    }

    /// Set the transport policy for connections.
    ///
    /// Controls whether to require V2 transport or prefer V2 with V1 fallback.
    pub fn with_transport_policy(mut self, policy: TransportPolicy) -> Self {
        self.transport_policy = policy;
        self
    }

    /// Set the protocol version to advertise in connections.
    pub fn with_protocol_version(mut self, version: u32) -> Self {
        self.protocol_version = PeerProtocolVersion::Known(version);
        self
    }

    /// Set the maximum number of concurrent connection attempts.
    ///
    /// Higher values crawl faster, but hold more sockets open at once and
    /// put more load on the network.
    ///
    /// # Arguments
    ///
    /// * `max_tasks` - Maximum concurrent attempts (defaults to 64).
    pub fn with_max_concurrent_tasks(mut self, max_tasks: usize) -> Self {
        self.max_concurrent_tasks = max_tasks;
        self
    }

    /// Set the time budget of a single peer attempt.
    ///
    /// One deadline covers the TCP connect, the transport and version
    /// handshakes, and collecting the peer's addresses. Whatever the
    /// handshake leaves of it is the address collection window.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Budget per attempt (defaults to 20 seconds).
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Warn if seed resolution finds fewer addresses than this.
    pub fn with_seed_min_count(mut self, min_count: usize) -> Self {
        self.seed_min_count = min_count;
        self
    }

    /// Give up on seed resolution after this long.
    pub fn with_seed_timeout(mut self, timeout: Duration) -> Self {
        self.seed_timeout = timeout;
        self
    }

    /// How often the crawl logs its progress.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    fn connection_configuration(&self) -> ConnectionConfiguration {
        ConnectionConfiguration::non_listening(
            self.protocol_version,
            self.transport_policy,
            self.user_agent.clone(),
        )
        .with_connection_timeout(self.attempt_timeout.min(DEFAULT_CONNECTION_TIMEOUT))
    }

    /// Build a crawler which dials peers over TCP.
    pub fn build(self) -> Result<Crawler<PeerConnector>, CrawlerBuilderError> {
        let connector = PeerConnector::new(self.network, self.connection_configuration());
        self.build_with_connector(connector)
    }

    /// Build a crawler which reaches peers through `connector`.
    pub fn build_with_connector<C: Connector>(
        self,
        connector: C,
    ) -> Result<Crawler<C>, CrawlerBuilderError> {
        if self.max_concurrent_tasks == 0 {
            return Err(CrawlerBuilderError::ZeroConcurrency);
        }
        if self.max_concurrent_tasks > Semaphore::MAX_PERMITS {
            return Err(CrawlerBuilderError::TooManyTasks(self.max_concurrent_tasks));
        }
        if self.attempt_timeout.is_zero() {
            return Err(CrawlerBuilderError::ZeroTimeout);
        }

        let config = CrawlConfig {
            max_concurrent_tasks: self.max_concurrent_tasks,
            attempt_timeout: self.attempt_timeout,
            seed_min_count: self.seed_min_count,
            seed_timeout: self.seed_timeout,
            // A zero period would make the progress timer panic.
            progress_interval: self.progress_interval.max(Duration::from_millis(1)),
        };
        Ok(Crawler::new(connector, config))
    }
}
