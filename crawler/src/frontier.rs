//! Visited set and frontier queue behind a single lock.
//!
//! Every address enters the crawl through [`Frontier::mark_pending_if_new`],
//! which checks and inserts in one critical section. An address is therefore
//! queued at most once per run, no matter how many peers report it or how
//! many attempts complete at the same time.
//!
//! The lock is a `std::sync::Mutex` and is never held across an await point.
//! The dispatcher sleeps on a [`Notify`] which is signalled whenever the queue
//! grows, an attempt completes, or a stop is requested.

use crate::address::NetworkAddress;
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// How an attempt ended, for the run counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Handshake and address request both completed.
    Succeeded,
    /// Connect, handshake or the address request failed or timed out.
    Failed,
}

/// Point-in-time counters of a crawl.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrontierStats {
    /// Addresses admitted so far, queued ones included.
    pub admitted: usize,
    pub in_flight: usize,
    pub pending: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl FrontierStats {
    /// Addresses an attempt has been dispatched for, finished or not.
    pub fn visited(&self) -> usize {
        self.admitted - self.pending
    }
}

#[derive(Debug, Default)]
struct State {
    admitted: HashSet<NetworkAddress>,
    queue: VecDeque<NetworkAddress>,
    in_flight: usize,
    stopped: bool,
    succeeded: usize,
    failed: usize,
}

impl State {
    fn admit(&mut self, address: NetworkAddress) -> bool {
        if self.stopped || !self.admitted.insert(address) {
            return false;
        }
        self.queue.push_back(address);
        true
    }
}

/// The dedup store shared by the dispatcher and every attempt of a run.
#[derive(Debug, Default)]
pub struct Frontier {
    state: Mutex<State>,
    changed: Notify,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // State is only mutated in short, panic-free sections.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit `address` if it has never been seen in this run.
    ///
    /// Returns `true` if the address was queued. Addresses offered after a
    /// stop request are ignored.
    pub fn mark_pending_if_new(&self, address: NetworkAddress) -> bool {
        let admitted = self.state().admit(address);
        if admitted {
            self.changed.notify_waiters();
        }
        admitted
    }

    /// Next address to attempt, counted as in flight before it is returned.
    ///
    /// Waits while the queue is empty and attempts are still in flight, since
    /// any of them may discover new addresses. Returns `None` once the queue
    /// is empty with nothing in flight, or after [`Frontier::stop`].
    ///
    /// Cancel safe: an address is only removed from the queue by a poll that
    /// also returns it.
    pub async fn take_next(&self) -> Option<NetworkAddress> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // Register interest before checking state so a wakeup between the
            // check and the await is not lost.
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if state.stopped {
                    return None;
                }
                if let Some(address) = state.queue.pop_front() {
                    state.in_flight += 1;
                    return Some(address);
                }
                if state.in_flight == 0 {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Finish an in-flight attempt.
    ///
    /// Admits everything the attempt discovered and releases its in-flight
    /// count in the same critical section, so the dispatcher can never
    /// observe an empty queue with nothing in flight while discoveries are
    /// still on their way in.
    pub fn complete(&self, discovered: &[NetworkAddress], outcome: Outcome) -> usize {
        let admitted = {
            let mut state = self.state();
            let admitted = discovered
                .iter()
                .filter(|address| state.admit(**address))
                .count();
            state.in_flight = state.in_flight.saturating_sub(1);
            match outcome {
                Outcome::Succeeded => state.succeeded += 1,
                Outcome::Failed => state.failed += 1,
            }
            admitted
        };
        self.changed.notify_waiters();
        admitted
    }

    /// Stop handing out addresses.
    ///
    /// In-flight attempts still complete normally, whatever is left in the
    /// queue stays there.
    pub fn stop(&self) {
        self.state().stopped = true;
        self.changed.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.state().stopped
    }

    pub fn admitted_count(&self) -> usize {
        self.state().admitted.len()
    }

    /// Addresses taken for an attempt so far.
    pub fn visited_count(&self) -> usize {
        self.stats().visited()
    }

    pub fn in_flight_count(&self) -> usize {
        self.state().in_flight
    }

    pub fn pending_count(&self) -> usize {
        self.state().queue.len()
    }

    pub fn stats(&self) -> FrontierStats {
        let state = self.state();
        FrontierStats {
            admitted: state.admitted.len(),
            in_flight: state.in_flight,
            pending: state.queue.len(),
            succeeded: state.succeeded,
            failed: state.failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    fn addr(last: u8) -> NetworkAddress {
        format!("10.0.0.{last}:8333").parse().unwrap()
    }

    #[test]
    fn test_mark_pending_if_new_dedups() {
        let frontier = Frontier::new();
        assert!(frontier.mark_pending_if_new(addr(1)));
        assert!(!frontier.mark_pending_if_new(addr(1)));
        assert!(frontier.mark_pending_if_new(addr(2)));

        assert_eq!(frontier.admitted_count(), 2);
        assert_eq!(frontier.pending_count(), 2);
    }

    #[tokio::test]
    async fn test_taken_address_stays_visited() {
        let frontier = Frontier::new();
        frontier.mark_pending_if_new(addr(1));

        assert_eq!(frontier.visited_count(), 0);
        assert_eq!(frontier.take_next().await, Some(addr(1)));
        assert_eq!(frontier.in_flight_count(), 1);
        assert_eq!(frontier.visited_count(), 1);
        // Rediscovered while in flight and after completion.
        assert!(!frontier.mark_pending_if_new(addr(1)));
        assert_eq!(frontier.complete(&[addr(1)], Outcome::Failed), 0);
        assert!(!frontier.mark_pending_if_new(addr(1)));
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let frontier = Frontier::new();
        for last in [3, 1, 2] {
            frontier.mark_pending_if_new(addr(last));
        }
        assert_eq!(frontier.take_next().await, Some(addr(3)));
        assert_eq!(frontier.take_next().await, Some(addr(1)));
        assert_eq!(frontier.take_next().await, Some(addr(2)));
    }

    #[tokio::test]
    async fn test_empty_frontier_is_terminal() {
        let frontier = Frontier::new();
        assert_eq!(frontier.take_next().await, None);
    }

    #[test]
    fn test_take_next_waits_for_in_flight_attempt() {
        let frontier = Frontier::new();
        frontier.mark_pending_if_new(addr(1));

        let mut first = task::spawn(frontier.take_next());
        assert_ready_eq!(first.poll(), Some(addr(1)));

        let mut next = task::spawn(frontier.take_next());
        assert_pending!(next.poll());

        frontier.complete(&[addr(2), addr(1)], Outcome::Succeeded);
        assert!(next.is_woken());
        assert_ready_eq!(next.poll(), Some(addr(2)));
    }

    #[test]
    fn test_take_next_ends_when_last_attempt_finds_nothing() {
        let frontier = Frontier::new();
        frontier.mark_pending_if_new(addr(1));

        let mut first = task::spawn(frontier.take_next());
        assert_ready_eq!(first.poll(), Some(addr(1)));

        let mut next = task::spawn(frontier.take_next());
        assert_pending!(next.poll());

        frontier.complete(&[], Outcome::Failed);
        assert!(next.is_woken());
        assert_ready_eq!(next.poll(), None);
    }

    #[test]
    fn test_stop_wakes_waiter_and_rejects_new_addresses() {
        let frontier = Frontier::new();
        frontier.mark_pending_if_new(addr(1));
        frontier.mark_pending_if_new(addr(2));

        let mut first = task::spawn(frontier.take_next());
        assert_ready_eq!(first.poll(), Some(addr(1)));

        frontier.stop();
        let mut next = task::spawn(frontier.take_next());
        assert_ready_eq!(next.poll(), None);

        assert!(!frontier.mark_pending_if_new(addr(3)));
        assert_eq!(frontier.complete(&[addr(4)], Outcome::Succeeded), 0);
        assert_eq!(frontier.pending_count(), 1);
    }

    #[test]
    fn test_stats() {
        let frontier = Frontier::new();
        for last in 1..=3 {
            frontier.mark_pending_if_new(addr(last));
        }

        let mut take = task::spawn(frontier.take_next());
        assert_ready_eq!(take.poll(), Some(addr(1)));
        let mut take = task::spawn(frontier.take_next());
        assert_ready_eq!(take.poll(), Some(addr(2)));
        frontier.complete(&[], Outcome::Succeeded);

        let stats = frontier.stats();
        assert_eq!(
            stats,
            FrontierStats {
                admitted: 3,
                in_flight: 1,
                pending: 1,
                succeeded: 1,
                failed: 0,
            }
        );
        assert_eq!(stats.visited(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_discoveries_admit_once() {
        let frontier = Arc::new(Frontier::new());
        let candidates: Vec<NetworkAddress> = (1..=200).map(|i| addr((i % 50) as u8)).collect();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let frontier = frontier.clone();
            let candidates = candidates.clone();
            handles.push(tokio::spawn(async move {
                candidates
                    .into_iter()
                    .filter(|a| frontier.mark_pending_if_new(*a))
                    .count()
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            admitted += handle.await.unwrap();
        }
        assert_eq!(admitted, 50);
        assert_eq!(frontier.admitted_count(), 50);
    }
}
