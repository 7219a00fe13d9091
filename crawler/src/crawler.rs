//! The crawl orchestrator.
//!
//! A crawl is a breadth-first traversal of the peer graph. Edges only become
//! visible after connecting to a node and asking it for the addresses it
//! knows, so the graph is discovered while it is being walked.
//!
//! # Architecture
//!
//! * **Dispatcher** (`Crawler::crawl`) - takes addresses from the
//!   [`Frontier`] whenever a concurrency slot is free and spawns an attempt.
//! * **Attempts** (`visit`) - connect, record the peer, collect addresses,
//!   record edges, then hand the discoveries back to the frontier.
//!
//! The crawl is done once the frontier is empty and no attempt is in flight.
//! The frontier evaluates that condition under the same lock that admits
//! discoveries, so it can't fire while an attempt is still reporting back.

use crate::address::{AddressEdge, NetworkAddress, PeerRecord};
use crate::connection::{ConnectFailure, Connector, PeerSession, RequestFailure};
use crate::error::CrawlError;
use crate::frontier::{Frontier, FrontierStats, Outcome};
use crate::seed::SeedResolver;
use crate::sink::ResultSink;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{interval_at, timeout_at, Instant, MissedTickBehavior};

/// Part of the attempt budget held back for closing the session, capped at
/// a quarter of the budget.
const CLOSE_RESERVE: Duration = Duration::from_secs(1);
/// Address collection ends this long before the attempt deadline, so what
/// was gathered is returned before the deadline cancels the request.
const COLLECTION_MARGIN: Duration = Duration::from_millis(250);

/// Settings of a crawl, see [`crate::CrawlerBuilder`].
#[derive(Debug, Clone)]
pub(crate) struct CrawlConfig {
    pub max_concurrent_tasks: usize,
    pub attempt_timeout: Duration,
    pub seed_min_count: usize,
    pub seed_timeout: Duration,
    pub progress_interval: Duration,
}

/// Lifecycle of a crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Resolving and admitting seed addresses.
    Seeding,
    /// Dispatching attempts from a non-empty frontier.
    Running,
    /// Frontier is empty, waiting on in-flight attempts.
    Draining,
    /// Frontier is empty and nothing is in flight.
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Seeding => write!(f, "seeding"),
            Phase::Running => write!(f, "running"),
            Phase::Draining => write!(f, "draining"),
            Phase::Done => write!(f, "done"),
        }
    }
}

/// Totals of a finished crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlSummary {
    /// Addresses an attempt was dispatched for.
    pub visited: usize,
    /// Attempts which completed the handshake and the address request.
    pub succeeded: usize,
    pub failed: usize,
    /// Discovered addresses left unattempted because the crawl was stopped.
    pub abandoned: usize,
    pub elapsed: Duration,
}

impl fmt::Display for CrawlSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} visited ({} succeeded, {} failed), {} abandoned in {:.1}s",
            self.visited,
            self.succeeded,
            self.failed,
            self.abandoned,
            self.elapsed.as_secs_f64()
        )
    }
}

/// Stops a running crawl from the outside.
///
/// Stopping ends dispatch of new attempts, the crawl returns once the
/// in-flight ones have finished or timed out.
#[derive(Debug, Clone)]
pub struct StopHandle {
    frontier: Arc<Frontier>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.frontier.stop();
    }

    /// Live counters of the crawl.
    pub fn stats(&self) -> FrontierStats {
        self.frontier.stats()
    }
}

/// A crawler for the bitcoin peer-to-peer network.
///
/// Each crawler runs a single crawl, which consumes it.
#[derive(Debug)]
pub struct Crawler<C> {
    connector: C,
    config: CrawlConfig,
    frontier: Arc<Frontier>,
}

impl<C: Connector> Crawler<C> {
    pub(crate) fn new(connector: C, config: CrawlConfig) -> Self {
        Crawler {
            connector,
            config,
            frontier: Arc::new(Frontier::new()),
        }
    }

    /// A handle to stop the crawl, obtain it before starting.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            frontier: self.frontier.clone(),
        }
    }

    /// Crawl the network from the addresses `seeds` resolves to.
    ///
    /// Records are written to `sink` as they are learned. Only a failure to
    /// find any seed aborts the crawl, failures of individual peers are
    /// counted and skipped.
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlSummary)` - Once the reachable graph is exhausted, or the
    ///   crawl was stopped and its in-flight attempts have finished.
    /// * `Err(CrawlError)` - If no seed address could be resolved.
    pub async fn crawl<R, S>(self, seeds: &R, sink: Arc<S>) -> Result<CrawlSummary, CrawlError>
    where
        R: SeedResolver,
        S: ResultSink,
    {
        let started = Instant::now();
        let mut phase = Phase::Seeding;
        info!("Crawl {phase}");

        let seeds = seeds
            .resolve_seeds(self.config.seed_min_count, self.config.seed_timeout)
            .await?;
        let admitted = seeds
            .iter()
            .filter(|seed| self.frontier.mark_pending_if_new(**seed))
            .count();
        info!("Admitted {admitted} seed addresses");

        let slots = Arc::new(Semaphore::new(self.config.max_concurrent_tasks));
        let mut attempts = JoinSet::new();
        let mut progress = interval_at(
            started + self.config.progress_interval,
            self.config.progress_interval,
        );
        progress.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let slot = tokio::select! {
                slot = slots.clone().acquire_owned() => match slot {
                    Ok(slot) => slot,
                    Err(_) => break,
                },
                Some(joined) = attempts.join_next() => {
                    reap(joined);
                    continue;
                }
                _ = progress.tick() => {
                    self.log_progress(started);
                    continue;
                }
            };

            let stats = self.frontier.stats();
            transition(
                &mut phase,
                if stats.pending == 0 && stats.in_flight > 0 {
                    Phase::Draining
                } else {
                    Phase::Running
                },
            );

            let next = tokio::select! {
                next = self.frontier.take_next() => next,
                Some(joined) = attempts.join_next() => {
                    reap(joined);
                    continue;
                }
                _ = progress.tick() => {
                    self.log_progress(started);
                    continue;
                }
            };
            let Some(target) = next else {
                break;
            };
            transition(&mut phase, Phase::Running);

            let attempt = CrawlAttempt::new(target, self.frontier.clone(), slot);
            attempts.spawn(visit(
                self.connector.clone(),
                sink.clone(),
                attempt,
                self.config.attempt_timeout,
            ));
        }

        if self.frontier.is_stopped() {
            info!(
                "Crawl stopped, waiting on {} in-flight attempts",
                attempts.len()
            );
        }
        if !attempts.is_empty() {
            transition(&mut phase, Phase::Draining);
        }
        loop {
            tokio::select! {
                joined = attempts.join_next() => match joined {
                    Some(joined) => reap(joined),
                    None => break,
                },
                _ = progress.tick() => self.log_progress(started),
            }
        }
        transition(&mut phase, Phase::Done);

        let stats = self.frontier.stats();
        let summary = CrawlSummary {
            visited: stats.visited(),
            succeeded: stats.succeeded,
            failed: stats.failed,
            abandoned: stats.pending,
            elapsed: started.elapsed(),
        };
        info!("Crawl finished: {summary}");
        Ok(summary)
    }

    fn log_progress(&self, started: Instant) {
        let stats = self.frontier.stats();
        info!(
            "{} visited, {} in flight (max: {}), {} pending, {} succeeded, {} failed after {}s",
            stats.visited(),
            stats.in_flight,
            self.config.max_concurrent_tasks,
            stats.pending,
            stats.succeeded,
            stats.failed,
            started.elapsed().as_secs()
        );
    }
}

fn transition(phase: &mut Phase, next: Phase) {
    if *phase != next {
        info!("Crawl {next}");
        *phase = next;
    }
}

fn reap(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        warn!("Crawl attempt did not finish cleanly: {e}");
    }
}

/// An in-flight attempt, holding one concurrency slot.
///
/// Dropping an attempt which was never finished, e.g. because its task
/// panicked, counts it as failed so the crawl can still reach done.
#[derive(Debug)]
struct CrawlAttempt {
    target: NetworkAddress,
    started: Instant,
    frontier: Arc<Frontier>,
    finished: bool,
    // Released after the frontier has been updated.
    _slot: OwnedSemaphorePermit,
}

impl CrawlAttempt {
    fn new(target: NetworkAddress, frontier: Arc<Frontier>, slot: OwnedSemaphorePermit) -> Self {
        CrawlAttempt {
            target,
            started: Instant::now(),
            frontier,
            finished: false,
            _slot: slot,
        }
    }

    fn finish(mut self, discovered: &[NetworkAddress], outcome: Outcome) {
        let admitted = self.frontier.complete(discovered, outcome);
        self.finished = true;
        debug!(
            "Attempt on {} {:?} after {:?}, {} of {} discovered addresses are new",
            self.target,
            outcome,
            self.started.elapsed(),
            admitted,
            discovered.len()
        );
    }
}

impl Drop for CrawlAttempt {
    fn drop(&mut self) {
        if !self.finished {
            self.frontier.complete(&[], Outcome::Failed);
        }
    }
}

async fn visit<C, S>(connector: C, sink: Arc<S>, attempt: CrawlAttempt, budget: Duration)
where
    C: Connector,
    S: ResultSink,
{
    let (discovered, outcome) = explore(&connector, sink.as_ref(), attempt.target, budget).await;
    attempt.finish(&discovered, outcome);
}

/// Connect to `target`, record what it tells us, and return its unique
/// discoveries.
///
/// Nothing here outlives the attempt budget, sink writes included. The
/// exchange ends early enough to leave the close its reserve. The peer
/// record is written as soon as the handshake completes, edges only once the
/// address request succeeded.
async fn explore<C, S>(
    connector: &C,
    sink: &S,
    target: NetworkAddress,
    budget: Duration,
) -> (Vec<NetworkAddress>, Outcome)
where
    C: Connector,
    S: ResultSink,
{
    let deadline = Instant::now() + budget;
    let exchange_deadline = deadline - CLOSE_RESERVE.min(budget / 4);

    let mut session = match timeout_at(exchange_deadline, connector.connect(&target)).await {
        Ok(Ok(session)) => session,
        Ok(Err(failure)) => {
            debug!("Failed to connect to {target}: {failure}");
            return (Vec::new(), Outcome::Failed);
        }
        Err(_) => {
            debug!("Failed to connect to {target}: {}", ConnectFailure::Timeout);
            return (Vec::new(), Outcome::Failed);
        }
    };

    let record = PeerRecord::new(target, &session.handshake());
    match timeout_at(exchange_deadline, sink.record_peer(&record)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Failed to record peer {target}: {e}"),
        Err(_) => warn!("Timed out recording peer {target}"),
    }

    let window = exchange_deadline
        .saturating_duration_since(Instant::now())
        .saturating_sub(COLLECTION_MARGIN);
    let response =
        match timeout_at(exchange_deadline, session.request_known_addresses(window)).await {
            Ok(response) => response,
            Err(_) => Err(RequestFailure::Timeout),
        };

    let result = match response {
        Ok(addresses) => {
            // Peers may repeat an address across batches, keep one edge per address.
            let mut seen = HashSet::new();
            let discovered: Vec<NetworkAddress> = addresses
                .into_iter()
                .filter(|address| seen.insert(*address))
                .collect();

            let edges = async {
                for address in &discovered {
                    if let Err(e) = sink.record_edge(&AddressEdge::new(target, *address)).await {
                        warn!("Failed to record edge {target} -> {address}: {e}");
                    }
                }
            };
            if timeout_at(exchange_deadline, edges).await.is_err() {
                warn!("Timed out recording edges of {target}");
            }
            (discovered, Outcome::Succeeded)
        }
        Err(failure) => {
            debug!("Failed to get addresses from {target}: {failure}");
            (Vec::new(), Outcome::Failed)
        }
    };

    if timeout_at(deadline, session.close()).await.is_err() {
        debug!("Timed out closing session with {target}");
    }

    result
}
