//! Errors surfaced to the caller of a crawl.
//!
//! Failures of individual peers never show up here, they only count towards
//! the run's failed total.

use crate::seed::SeedError;
use bitcoin_topology_connection::UserAgentError;
use std::fmt;

/// Errors that can occur during crawler configuration.
#[derive(Debug, Clone)]
pub enum CrawlerBuilderError {
    /// User agent doesn't follow the required format.
    InvalidUserAgent(UserAgentError),
    /// At least one concurrent connection is required.
    ZeroConcurrency,
    /// More concurrent connections than a semaphore can hand out.
    TooManyTasks(usize),
    /// A zero attempt timeout would fail every peer.
    ZeroTimeout,
}

impl fmt::Display for CrawlerBuilderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrawlerBuilderError::InvalidUserAgent(err) => {
                write!(f, "Invalid user agent: {err}")
            }
            CrawlerBuilderError::ZeroConcurrency => {
                write!(f, "Maximum concurrent tasks must be at least 1")
            }
            CrawlerBuilderError::TooManyTasks(tasks) => {
                write!(f, "Maximum concurrent tasks {tasks} exceeds the supported limit")
            }
            CrawlerBuilderError::ZeroTimeout => write!(f, "Attempt timeout must be non-zero"),
        }
    }
}

impl std::error::Error for CrawlerBuilderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CrawlerBuilderError::InvalidUserAgent(err) => Some(err),
            _ => None,
        }
    }
}

/// Errors which abort a crawl.
#[derive(Debug)]
pub enum CrawlError {
    /// The initial frontier could not be resolved.
    Seed(SeedError),
}

impl fmt::Display for CrawlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrawlError::Seed(err) => write!(f, "Seed resolution failed: {err}"),
        }
    }
}

impl std::error::Error for CrawlError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CrawlError::Seed(err) => Some(err),
        }
    }
}

impl From<SeedError> for CrawlError {
    fn from(err: SeedError) -> Self {
        CrawlError::Seed(err)
    }
}
