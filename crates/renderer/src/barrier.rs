//! Counting barrier between the orchestrator and the workers of one pass.
//!
//! The orchestrator arms the barrier with the number of workers taking part
//! in a pass. Every worker calls [`arrive`](PhaseBarrier::arrive) once it is
//! done; the arrival that brings the count to zero fires the completion
//! event, which releases [`wait`](PhaseBarrier::wait).
//!
//! A worker that panics arrives through
//! [`arrive_poisoned`](PhaseBarrier::arrive_poisoned), so the waiter is woken
//! and told instead of blocking forever.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// Returned by [`PhaseBarrier::wait`] when a participant panicked.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("a participant panicked before arriving at the barrier")]
pub struct BarrierPoisoned;

#[derive(Debug, Default)]
struct CycleState {
    fired: bool,
    poisoned: bool,
    fire_count: u64,
}

/// Atomic counter plus completion event.
#[derive(Debug, Default)]
pub struct PhaseBarrier {
    active: AtomicUsize,
    state: Mutex<CycleState>,
    completed: Condvar,
}

impl PhaseBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the barrier for `participants` arrivals.
    ///
    /// # Panics
    ///
    /// Panics if `participants` is zero or the previous cycle has not fired.
    pub fn reset(&self, participants: usize) {
        assert!(participants > 0, "barrier armed with no participants");
        let mut state = self.state.lock();
        assert!(
            self.active.load(Ordering::Acquire) == 0,
            "barrier re-armed with {} arrivals outstanding",
            self.active.load(Ordering::Acquire)
        );
        state.fired = false;
        state.poisoned = false;
        self.active.store(participants, Ordering::Release);
    }

    /// Records one arrival; the last one fires the completion event.
    ///
    /// # Panics
    ///
    /// Panics on more arrivals than participants.
    pub fn arrive(&self) {
        let previous = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or_else(|_| panic!("barrier count would go negative"));
        if previous == 1 {
            let mut state = self.state.lock();
            assert!(!state.fired, "barrier fired twice in one cycle");
            state.fired = true;
            state.fire_count += 1;
            drop(state);
            self.completed.notify_all();
        }
    }

    /// Records an arrival from a participant that panicked.
    pub fn arrive_poisoned(&self) {
        self.state.lock().poisoned = true;
        self.arrive();
    }

    /// Blocks until every participant has arrived.
    ///
    /// # Errors
    ///
    /// Returns [`BarrierPoisoned`] if any participant arrived poisoned.
    pub fn wait(&self) -> Result<(), BarrierPoisoned> {
        let mut state = self.state.lock();
        while !state.fired {
            self.completed.wait(&mut state);
        }
        debug_assert_eq!(self.active.load(Ordering::Acquire), 0);
        if state.poisoned {
            Err(BarrierPoisoned)
        } else {
            Ok(())
        }
    }

    /// Arrivals still outstanding in the current cycle.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// How many cycles have fired since creation.
    pub fn fire_count(&self) -> u64 {
        self.state.lock().fire_count
    }
}
