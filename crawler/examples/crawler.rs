//! Crawl the bitcoin network and write its topology to disk.
//!
//! Seeds come from the network's DNS seeds unless `--seed` addresses are
//! given. Ctrl-C stops dispatching new attempts, the crawl then finishes the
//! in-flight ones and prints its summary.

use bitcoin::Network;
use bitcoin_topology_crawler::{
    CrawlerBuilder, DnsSeeds, FileSink, NetworkAddress, StaticSeeds, TransportPolicy,
};
use clap::Parser;
use log::LevelFilter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Network to crawl: bitcoin, testnet, signet or regtest.
    #[arg(short, long, default_value = "bitcoin")]
    network: Network,

    /// Seed address to start from, e.g. 1.2.3.4:8333. Repeatable, skips DNS seeding.
    #[arg(short, long)]
    seed: Vec<NetworkAddress>,

    /// File receiving one `source_ip;source_port;discovered_ip;discovered_port` line per edge.
    #[arg(long, default_value = "edges.csv")]
    edges: PathBuf,

    /// File receiving one line of handshake metadata per reachable peer.
    #[arg(long, default_value = "peers.csv")]
    peers: PathBuf,

    /// Custom user agent (optional).
    #[arg(short, long)]
    user_agent: Option<String>,

    /// Maximum number of concurrent connection attempts.
    #[arg(short, long, default_value = "64")]
    concurrent_tasks: usize,

    /// Budget per peer attempt in seconds, handshake and address collection included.
    #[arg(short, long, default_value = "20")]
    timeout: u64,

    /// Warn when seed resolution finds fewer addresses than this.
    #[arg(long, default_value = "1")]
    seed_min_count: usize,

    /// Give up on seed resolution after this many seconds.
    #[arg(long, default_value = "10")]
    seed_timeout: u64,

    /// Seconds between progress log lines.
    #[arg(long, default_value = "60")]
    progress_interval: u64,

    /// Require the encrypted v2 transport instead of falling back to v1.
    #[arg(long)]
    v2_only: bool,

    /// Log level.
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] {} - {}",
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log_level)
        .chain(std::io::stderr())
        .apply()?;

    log::info!("CRAWLING THE {} NETWORK", args.network.to_string().to_uppercase());

    let mut builder = CrawlerBuilder::new(args.network)
        .with_max_concurrent_tasks(args.concurrent_tasks)
        .with_attempt_timeout(Duration::from_secs(args.timeout))
        .with_seed_min_count(args.seed_min_count)
        .with_seed_timeout(Duration::from_secs(args.seed_timeout))
        .with_progress_interval(Duration::from_secs(args.progress_interval));
    if let Some(user_agent) = args.user_agent.clone() {
        log::debug!("Using custom user agent: {user_agent}");
        builder = builder.with_user_agent(user_agent)?;
    }
    if args.v2_only {
        builder = builder.with_transport_policy(TransportPolicy::V2Required);
    }
    let crawler = builder.build()?;

    let sink = Arc::new(FileSink::create(&args.edges, &args.peers).await?);
    log::info!(
        "Writing edges to {} and peers to {}",
        args.edges.display(),
        args.peers.display()
    );

    let stop = crawler.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupted, finishing in-flight attempts");
            stop.stop();
        }
    });

    let summary = if args.seed.is_empty() {
        crawler
            .crawl(&DnsSeeds::for_network(args.network), sink)
            .await?
    } else {
        crawler.crawl(&StaticSeeds::new(args.seed), sink).await?
    };

    println!("{summary}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_and_progress_flags() {
        let args = Args::try_parse_from([
            "crawler",
            "--seed-min-count",
            "5",
            "--seed-timeout",
            "3",
            "--progress-interval",
            "15",
        ])
        .unwrap();
        assert_eq!(args.seed_min_count, 5);
        assert_eq!(args.seed_timeout, 3);
        assert_eq!(args.progress_interval, 15);

        let args = Args::try_parse_from(["crawler"]).unwrap();
        assert_eq!(args.seed_min_count, 1);
        assert_eq!(args.seed_timeout, 10);
        assert_eq!(args.progress_interval, 60);
    }
}
