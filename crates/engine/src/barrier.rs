//! Setup barrier shared by the sites of one host.
//!
//! Every local site calls into the same coordinator for each snapshot:
//!
//! 1. [`BarrierCoordinator::try_enter_setup`] elects exactly one leader by
//!    taking the setup permit.
//! 2. The leader builds the task queues, [`publish`](BarrierCoordinator::publish)es
//!    them and [`release`](BarrierCoordinator::release)s one completion
//!    permit per site, whether setup succeeded or not.
//! 3. Every site, leader included, blocks in
//!    [`await_release`](BarrierCoordinator::await_release) for a permit and
//!    pops one queue.
//!
//! The site whose permit acquisition brings the count to zero re-arms the
//! setup permit so the next snapshot can elect a new leader.
//!
//! A site whose bounded wait expires leaves a debt. The next release pays it
//! by discarding one permit and one queue, so the counts still reach zero
//! and the setup permit is re-armed.
//!
//! Lock order: `permits` before `pending`.

use crate::task_table::TaskQueue;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Outcome of trying to take the setup permit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// This site runs setup for the host
    Leader,
    /// Another site is running setup
    Follower,
}

/// Barrier failures
#[derive(Debug, thiserror::Error)]
pub enum BarrierError {
    /// The leader did not release within the configured bound
    #[error("timed out after {0:?} waiting for snapshot setup to finish")]
    TimedOut(Duration),
}

/// Point-in-time view of the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierState {
    /// True if the next caller of `try_enter_setup` becomes leader
    pub setup_available: bool,
    /// Completion permits not yet taken
    pub available_permits: usize,
    /// Permits owed by sites that stopped waiting
    pub owed_permits: usize,
    /// Queues published but not yet taken
    pub pending_queues: usize,
}

impl BarrierState {
    /// True when no snapshot is between election and the last permit
    pub fn is_idle(&self) -> bool {
        self.setup_available
            && self.available_permits == 0
            && self.owed_permits == 0
            && self.pending_queues == 0
    }
}

#[derive(Debug, Default)]
struct Permits {
    available: usize,
    owed: usize,
}

/// Leader election and task hand-off for one host
pub struct BarrierCoordinator {
    setup_permit: AtomicBool,
    permits: Mutex<Permits>,
    released: Condvar,
    pending: Mutex<VecDeque<TaskQueue>>,
}

impl Default for BarrierCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl BarrierCoordinator {
    /// Armed coordinator with no permits
    pub fn new() -> Self {
        BarrierCoordinator {
            setup_permit: AtomicBool::new(true),
            permits: Mutex::new(Permits::default()),
            released: Condvar::new(),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Non-blocking attempt to become the setup leader
    pub fn try_enter_setup(&self) -> Role {
        match self
            .setup_permit
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Role::Leader,
            Err(_) => Role::Follower,
        }
    }

    /// Make `queues` available to sites, replacing anything left over
    pub fn publish(&self, queues: Vec<TaskQueue>) {
        let stale: Vec<TaskQueue> = {
            let mut pending = self.pending.lock();
            let stale = pending.drain(..).collect();
            pending.extend(queues);
            stale
        };
        if !stale.is_empty() {
            warn!(target: "shardsave::barrier", count = stale.len(), "Discarding stale task queues");
        }
    }

    /// Drop every published queue not yet taken
    pub fn clear_pending(&self) {
        let stale: Vec<TaskQueue> = self.pending.lock().drain(..).collect();
        drop(stale);
    }

    /// Add `n` completion permits and wake waiting sites
    ///
    /// Permits owed by sites that stopped waiting are settled first, each
    /// one discarding a queue the absent site will never take.
    pub fn release(&self, n: usize) {
        let discarded = {
            let mut permits = self.permits.lock();
            permits.available += n;

            let mut discarded = Vec::new();
            while permits.owed > 0 && permits.available > 0 {
                permits.owed -= 1;
                permits.available -= 1;
                if let Some(queue) = self.pending.lock().pop_front() {
                    discarded.push(queue);
                }
            }
            if n > 0 && permits.available == 0 {
                self.rearm();
            }
            self.released.notify_all();
            discarded
        };

        debug!(target: "shardsave::barrier", permits = n, "Released completion permits");
        if !discarded.is_empty() {
            warn!(
                target: "shardsave::barrier",
                count = discarded.len(),
                "Discarded task queues of sites that stopped waiting"
            );
        }
    }

    /// Block until a completion permit is available, then take one queue
    ///
    /// `None` waits indefinitely. A site that finds no queue left gets an
    /// empty one.
    pub fn await_release(&self, timeout: Option<Duration>) -> Result<TaskQueue, BarrierError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut permits = self.permits.lock();
        while permits.available == 0 {
            match deadline {
                None => self.released.wait(&mut permits),
                Some(deadline) => {
                    let timed_out = self.released.wait_until(&mut permits, deadline).timed_out();
                    if timed_out && permits.available == 0 {
                        permits.owed += 1;
                        let waited = timeout.unwrap_or_default();
                        warn!(target: "shardsave::barrier", ?waited, "Gave up waiting for snapshot setup");
                        return Err(BarrierError::TimedOut(waited));
                    }
                }
            }
        }

        permits.available -= 1;
        let queue = self.pending.lock().pop_front();
        if permits.available == 0 {
            self.rearm();
        }
        drop(permits);
        Ok(queue.unwrap_or_default())
    }

    /// Current counters
    pub fn state(&self) -> BarrierState {
        let permits = self.permits.lock();
        let pending_queues = self.pending.lock().len();
        BarrierState {
            setup_available: self.setup_permit.load(Ordering::Acquire),
            available_permits: permits.available,
            owed_permits: permits.owed,
            pending_queues,
        }
    }

    /// True when no snapshot is in the barrier
    pub fn is_idle(&self) -> bool {
        self.state().is_idle()
    }

    // Caller holds the permits lock.
    fn rearm(&self) {
        if self
            .setup_permit
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!(target: "shardsave::barrier", "Setup permit re-armed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn queues(n: usize) -> Vec<TaskQueue> {
        (0..n).map(|_| TaskQueue::new()).collect()
    }

    #[test]
    fn test_single_site_round() {
        let barrier = BarrierCoordinator::new();
        assert!(barrier.is_idle());
        assert_eq!(barrier.try_enter_setup(), Role::Leader);
        assert_eq!(barrier.try_enter_setup(), Role::Follower);
        assert!(!barrier.is_idle());

        barrier.publish(queues(1));
        barrier.release(1);
        assert!(barrier.await_release(None).is_ok());
        assert!(barrier.is_idle());
        assert_eq!(barrier.try_enter_setup(), Role::Leader);
    }

    #[test]
    fn test_release_without_queues_hands_out_empty() {
        let barrier = BarrierCoordinator::new();
        assert_eq!(barrier.try_enter_setup(), Role::Leader);
        barrier.release(2);
        assert!(barrier.await_release(None).unwrap().is_empty());
        assert!(!barrier.state().setup_available);
        assert!(barrier.await_release(None).unwrap().is_empty());
        assert!(barrier.is_idle());
    }

    #[test]
    fn test_timeout_leaves_debt_settled_by_release() {
        let barrier = BarrierCoordinator::new();
        assert_eq!(barrier.try_enter_setup(), Role::Leader);

        let err = barrier
            .await_release(Some(Duration::from_millis(20)))
            .unwrap_err();
        assert!(matches!(err, BarrierError::TimedOut(_)));
        assert_eq!(barrier.state().owed_permits, 1);

        barrier.publish(queues(2));
        barrier.release(2);
        let state = barrier.state();
        assert_eq!(state.owed_permits, 0);
        assert_eq!(state.available_permits, 1);
        assert_eq!(state.pending_queues, 1);

        barrier.await_release(None).unwrap();
        assert!(barrier.is_idle());
    }

    #[test]
    fn test_debt_covering_whole_release_rearms() {
        let barrier = BarrierCoordinator::new();
        assert_eq!(barrier.try_enter_setup(), Role::Leader);
        assert!(barrier.await_release(Some(Duration::from_millis(5))).is_err());
        barrier.publish(queues(1));
        barrier.release(1);
        assert!(barrier.is_idle());
    }

    #[test]
    fn test_publish_replaces_stale_queues() {
        let barrier = BarrierCoordinator::new();
        barrier.publish(queues(3));
        barrier.publish(queues(1));
        assert_eq!(barrier.state().pending_queues, 1);
        barrier.clear_pending();
        assert_eq!(barrier.state().pending_queues, 0);
    }

    #[test]
    fn test_exactly_one_leader_per_round() {
        const SITES: usize = 8;
        const ROUNDS: usize = 25;
        let barrier = Arc::new(BarrierCoordinator::new());
        let start = Arc::new(Barrier::new(SITES));
        let leaders = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..SITES)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                let start = Arc::clone(&start);
                let leaders = Arc::clone(&leaders);
                thread::spawn(move || {
                    for _ in 0..ROUNDS {
                        start.wait();
                        if barrier.try_enter_setup() == Role::Leader {
                            leaders.fetch_add(1, Ordering::SeqCst);
                            barrier.publish(queues(SITES));
                            barrier.release(SITES);
                        }
                        barrier.await_release(None).unwrap();
                        // Nobody starts the next round until every site
                        // has taken its permit.
                        start.wait();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(leaders.load(Ordering::SeqCst), ROUNDS);
        assert!(barrier.is_idle());
    }

    #[test]
    fn test_followers_wait_for_slow_leader() {
        const SITES: usize = 4;
        let barrier = Arc::new(BarrierCoordinator::new());
        assert_eq!(barrier.try_enter_setup(), Role::Leader);

        let handles: Vec<_> = (1..SITES)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    assert_eq!(barrier.try_enter_setup(), Role::Follower);
                    barrier.await_release(None).unwrap().len()
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(30));
        barrier.publish(queues(SITES));
        barrier.release(SITES);
        barrier.await_release(None).unwrap();

        for h in handles {
            assert_eq!(h.join().unwrap(), 0);
        }
        assert!(barrier.is_idle());
    }
}
