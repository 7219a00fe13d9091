//! Bootstrap addresses for a crawl.

use crate::address::NetworkAddress;
use bitcoin::Network;
use log::{debug, warn};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};

/// DNS seeds run by long-standing Bitcoin Core contributors.
const MAINNET_DNS_SEEDS: &[&str] = &[
    "seed.bitcoin.sipa.be",
    "dnsseed.bluematt.me",
    "seed.bitcoinstats.com",
    "seed.bitcoin.jonasschnelli.ch",
    "seed.btc.petertodd.net",
    "seed.bitcoin.sprovoost.nl",
    "dnsseed.emzy.de",
    "seed.bitcoin.wiz.biz",
];

const TESTNET_DNS_SEEDS: &[&str] = &[
    "testnet-seed.bitcoin.jonasschnelli.ch",
    "seed.tbtc.petertodd.net",
    "seed.testnet.bitcoin.sprovoost.nl",
    "testnet-seed.bluematt.me",
];

const SIGNET_DNS_SEEDS: &[&str] = &["seed.signet.bitcoin.sprovoost.nl"];

/// Default p2p port of `network`.
pub fn default_port(network: Network) -> u16 {
    match network {
        Network::Bitcoin => 8333,
        Network::Testnet => 18333,
        Network::Signet => 38333,
        Network::Regtest => 18444,
        _ => 8333,
    }
}

/// Errors resolving the initial frontier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedError {
    /// Not a single seed address could be found in time.
    NoSeedsFound,
}

impl fmt::Display for SeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeedError::NoSeedsFound => write!(f, "No seed addresses found"),
        }
    }
}

impl std::error::Error for SeedError {}

/// Source of the addresses a crawl starts from.
pub trait SeedResolver: Send + Sync {
    /// Resolve seed addresses, giving up after `timeout`.
    ///
    /// Finding fewer than `min_count` addresses is only worth a warning, an
    /// empty result is [`SeedError::NoSeedsFound`].
    fn resolve_seeds(
        &self,
        min_count: usize,
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<NetworkAddress>, SeedError>> + Send;
}

/// Deduplicate while keeping first-seen order, then apply the count rules.
fn finish(
    addresses: Vec<NetworkAddress>,
    min_count: usize,
) -> Result<Vec<NetworkAddress>, SeedError> {
    let mut seen = HashSet::new();
    let addresses: Vec<NetworkAddress> = addresses
        .into_iter()
        .filter(|address| seen.insert(*address))
        .collect();

    if addresses.is_empty() {
        return Err(SeedError::NoSeedsFound);
    }
    if addresses.len() < min_count {
        warn!(
            "Only {} seed addresses found, wanted at least {}",
            addresses.len(),
            min_count
        );
    }
    Ok(addresses)
}

/// A fixed seed list.
#[derive(Debug, Clone, Default)]
pub struct StaticSeeds {
    addresses: Vec<NetworkAddress>,
}

impl StaticSeeds {
    pub fn new<I>(addresses: I) -> Self
    where
        I: IntoIterator<Item = NetworkAddress>,
    {
        StaticSeeds {
            addresses: addresses.into_iter().collect(),
        }
    }
}

impl SeedResolver for StaticSeeds {
    async fn resolve_seeds(
        &self,
        min_count: usize,
        _timeout: Duration,
    ) -> Result<Vec<NetworkAddress>, SeedError> {
        finish(self.addresses.clone(), min_count)
    }
}

/// Resolves DNS seed hosts, all of them concurrently.
///
/// Hosts which fail or don't answer before the timeout are skipped.
#[derive(Debug, Clone)]
pub struct DnsSeeds {
    hosts: Vec<String>,
    port: u16,
}

impl DnsSeeds {
    pub fn new<I, S>(hosts: I, port: u16) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DnsSeeds {
            hosts: hosts.into_iter().map(Into::into).collect(),
            port,
        }
    }

    /// The well-known DNS seeds of `network`, none for regtest.
    pub fn for_network(network: Network) -> Self {
        let hosts: &[&str] = match network {
            Network::Bitcoin => MAINNET_DNS_SEEDS,
            Network::Testnet => TESTNET_DNS_SEEDS,
            Network::Signet => SIGNET_DNS_SEEDS,
            _ => &[],
        };
        DnsSeeds::new(hosts.iter().copied(), default_port(network))
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }
}

impl SeedResolver for DnsSeeds {
    async fn resolve_seeds(
        &self,
        min_count: usize,
        timeout: Duration,
    ) -> Result<Vec<NetworkAddress>, SeedError> {
        let addresses = lookup_all(&self.hosts, self.port, timeout, |host, port| async move {
            tokio::net::lookup_host((host.as_str(), port))
                .await
                .map(|resolved| resolved.collect::<Vec<SocketAddr>>())
        })
        .await;
        finish(addresses, min_count)
    }
}

/// Run `lookup` for every host concurrently and gather what answers within
/// `timeout`.
async fn lookup_all<F, Fut>(
    hosts: &[String],
    port: u16,
    timeout: Duration,
    lookup: F,
) -> Vec<NetworkAddress>
where
    F: Fn(String, u16) -> Fut,
    Fut: Future<Output = io::Result<Vec<SocketAddr>>> + Send + 'static,
{
    let deadline = Instant::now() + timeout;
    let mut lookups = JoinSet::new();
    for host in hosts {
        let pending = lookup(host.clone(), port);
        let host = host.clone();
        lookups.spawn(async move { (host, pending.await) });
    }

    let mut addresses = Vec::new();
    loop {
        match timeout_at(deadline, lookups.join_next()).await {
            Ok(Some(Ok((host, Ok(resolved))))) => {
                debug!("{host} resolved to {} addresses", resolved.len());
                addresses.extend(resolved.into_iter().map(NetworkAddress::from));
            }
            Ok(Some(Ok((host, Err(e))))) => debug!("Failed to resolve {host}: {e}"),
            Ok(Some(Err(e))) => debug!("DNS lookup task failed: {e}"),
            Ok(None) => break,
            Err(_) => {
                debug!(
                    "Seed resolution timed out with {} lookups pending",
                    lookups.len()
                );
                lookups.abort_all();
                break;
            }
        }
    }
    addresses
}
