//! Destinations for crawl results.
//!
//! Records are handed to the sink as soon as they exist, so a crawl which is
//! interrupted still leaves everything it learned behind.
//!
//! The line formats written by [`FileSink`] are semicolon separated:
//!
//! * edges: `source_ip;source_port;discovered_ip;discovered_port`
//! * peers: `ip;port;best_height;client_version;subversion;services`

use crate::address::{AddressEdge, PeerRecord};
use std::fmt;
use std::future::Future;
use std::io;
use std::path::Path;
use std::sync::{Mutex as StdMutex, PoisonError};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Errors persisting a record.
#[derive(Debug)]
pub enum SinkError {
    Io(io::Error),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Io(err) => write!(f, "Failed to write record: {err}"),
        }
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SinkError::Io(err) => Some(err),
        }
    }
}

impl From<io::Error> for SinkError {
    fn from(err: io::Error) -> Self {
        SinkError::Io(err)
    }
}

/// Durable storage for edges and peer metadata.
///
/// Shared by all in-flight attempts, implementations serialize their own writes.
pub trait ResultSink: Send + Sync + 'static {
    fn record_edge(&self, edge: &AddressEdge)
        -> impl Future<Output = Result<(), SinkError>> + Send;

    fn record_peer(&self, peer: &PeerRecord)
        -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// One edge record line, newline terminated.
pub fn edge_line(edge: &AddressEdge) -> String {
    format!(
        "{};{};{};{}\n",
        edge.source.ip(),
        edge.source.port(),
        edge.discovered.ip(),
        edge.discovered.port()
    )
}

/// One peer record line, newline terminated.
///
/// The sub-version is chosen by the remote peer, separators and line breaks
/// in it are replaced so every record stays on one line.
pub fn peer_line(peer: &PeerRecord) -> String {
    let subversion: String = peer
        .user_agent
        .chars()
        .map(|c| match c {
            ';' | '\r' | '\n' => '_',
            c => c,
        })
        .collect();
    format!(
        "{};{};{};{};{};{}\n",
        peer.address.ip(),
        peer.address.port(),
        peer.best_height,
        peer.client_version,
        subversion,
        peer.services.to_u64()
    )
}

/// Appends records to two line-oriented files, flushing every line.
#[derive(Debug)]
pub struct FileSink {
    edges: Mutex<File>,
    peers: Mutex<File>,
}

impl FileSink {
    /// Open (or create) the edge and peer files for appending.
    pub async fn create<P, Q>(edges_path: P, peers_path: Q) -> Result<Self, SinkError>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        Ok(FileSink {
            edges: Mutex::new(open_append(edges_path.as_ref()).await?),
            peers: Mutex::new(open_append(peers_path.as_ref()).await?),
        })
    }
}

async fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
}

async fn append_line(file: &Mutex<File>, line: String) -> Result<(), SinkError> {
    let mut file = file.lock().await;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

impl ResultSink for FileSink {
    async fn record_edge(&self, edge: &AddressEdge) -> Result<(), SinkError> {
        append_line(&self.edges, edge_line(edge)).await
    }

    async fn record_peer(&self, peer: &PeerRecord) -> Result<(), SinkError> {
        append_line(&self.peers, peer_line(peer)).await
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    edges: StdMutex<Vec<AddressEdge>>,
    peers: StdMutex<Vec<PeerRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Edges in the order they were recorded.
    pub fn edges(&self) -> Vec<AddressEdge> {
        self.edges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Peer records in the order they were recorded.
    pub fn peers(&self) -> Vec<PeerRecord> {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ResultSink for MemorySink {
    async fn record_edge(&self, edge: &AddressEdge) -> Result<(), SinkError> {
        self.edges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(*edge);
        Ok(())
    }

    async fn record_peer(&self, peer: &PeerRecord) -> Result<(), SinkError> {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(peer.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::NetworkAddress;
    use bitcoin::p2p::ServiceFlags;
    use std::path::PathBuf;

    fn addr(s: &str) -> NetworkAddress {
        s.parse().unwrap()
    }

    fn record(user_agent: &str) -> PeerRecord {
        PeerRecord {
            address: addr("10.0.0.1:8333"),
            best_height: 840_000,
            client_version: 70016,
            user_agent: user_agent.to_string(),
            services: ServiceFlags::NETWORK | ServiceFlags::WITNESS,
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("bitcoin-topology-{}-{name}", std::process::id()))
    }

    #[test]
    fn test_edge_line() {
        let edge = AddressEdge::new(addr("10.0.0.1:8333"), addr("[2001:db8::1]:18333"));
        assert_eq!(edge_line(&edge), "10.0.0.1;8333;2001:db8::1;18333\n");
    }

    #[test]
    fn test_peer_line() {
        // NETWORK (1) | WITNESS (8)
        assert_eq!(
            peer_line(&record("/Satoshi:27.0.0/")),
            "10.0.0.1;8333;840000;70016;/Satoshi:27.0.0/;9\n"
        );
    }

    #[test]
    fn test_peer_line_sanitizes_subversion() {
        assert_eq!(
            peer_line(&record("/evil;agent\r\n/")),
            "10.0.0.1;8333;840000;70016;/evil_agent__/;9\n"
        );
    }

    #[tokio::test]
    async fn test_memory_sink() {
        let sink = MemorySink::new();
        let edge = AddressEdge::new(addr("10.0.0.1:8333"), addr("10.0.0.2:8333"));
        sink.record_edge(&edge).await.unwrap();
        sink.record_peer(&record("/Satoshi:27.0.0/")).await.unwrap();

        assert_eq!(sink.edges(), vec![edge]);
        assert_eq!(sink.peers().len(), 1);
    }

    #[tokio::test]
    async fn test_file_sink_appends_lines() {
        let edges_path = temp_path("edges.csv");
        let peers_path = temp_path("peers.csv");
        let _ = std::fs::remove_file(&edges_path);
        let _ = std::fs::remove_file(&peers_path);

        let sink = FileSink::create(&edges_path, &peers_path).await.unwrap();
        let first = AddressEdge::new(addr("10.0.0.1:8333"), addr("10.0.0.2:8333"));
        let second = AddressEdge::new(addr("10.0.0.1:8333"), addr("10.0.0.3:8333"));
        sink.record_edge(&first).await.unwrap();
        sink.record_edge(&second).await.unwrap();
        sink.record_peer(&record("/Satoshi:27.0.0/")).await.unwrap();
        drop(sink);

        // Reopening appends instead of truncating.
        let sink = FileSink::create(&edges_path, &peers_path).await.unwrap();
        sink.record_edge(&first).await.unwrap();

        let edges = std::fs::read_to_string(&edges_path).unwrap();
        assert_eq!(
            edges,
            "10.0.0.1;8333;10.0.0.2;8333\n10.0.0.1;8333;10.0.0.3;8333\n10.0.0.1;8333;10.0.0.2;8333\n"
        );
        let peers = std::fs::read_to_string(&peers_path).unwrap();
        assert_eq!(peers.lines().count(), 1);

        std::fs::remove_file(&edges_path).unwrap();
        std::fs::remove_file(&peers_path).unwrap();
    }

    #[tokio::test]
    async fn test_file_sink_missing_directory() {
        let dir = temp_path("missing-dir");
        let result = FileSink::create(dir.join("edges.csv"), dir.join("peers.csv")).await;
        assert!(matches!(result, Err(SinkError::Io(_))));
    }
}
