// SPDX-License-Identifier: MPL-2.0

//! The packed ready/waiting counter of a coupled set.
//!
//! Both phase counts live in one atomic word, so a single load returns a
//! consistent snapshot of the two and every phase transition is a single
//! read-modify-write:
//!
//! ```text
//!  high bits                           low bits
//! +-------------------+-------------------+
//! |    ready count    |   waiting count   |
//! +-------------------+-------------------+
//!                     |<- WAITING_BITS -->|
//! ```
//!
//! All accesses are sequentially consistent. The rendezvous relies on that
//! for the ordering between the counter and `disable_count`.

use core::sync::atomic::Ordering;

cfg_if::cfg_if! {
    if #[cfg(feature = "wide-counter")] {
        type RawCounter = u64;
        type AtomicRawCounter = core::sync::atomic::AtomicU64;
    } else {
        type RawCounter = u32;
        type AtomicRawCounter = core::sync::atomic::AtomicU32;
    }
}

/// The width of each half of the counter.
pub const WAITING_BITS: u32 = RawCounter::BITS / 2;

const WAITING_MASK: RawCounter = (1 << WAITING_BITS) - 1;
const READY_ONE: RawCounter = 1 << WAITING_BITS;

/// The maximum number of CPUs in one coupled set.
pub const MAX_COUPLED_CPUS: usize = WAITING_MASK as usize;

/// A snapshot of both halves of the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseCounts {
    pub waiting: usize,
    pub ready: usize,
}

impl PhaseCounts {
    fn unpack(raw: RawCounter) -> Self {
        Self {
            waiting: (raw & WAITING_MASK) as usize,
            ready: (raw >> WAITING_BITS) as usize,
        }
    }
}

/// The number of CPUs of a coupled set that are waiting and ready.
#[derive(Debug)]
pub(crate) struct ReadyWaitingCounter(AtomicRawCounter);

impl ReadyWaitingCounter {
    pub(crate) const fn new() -> Self {
        Self(AtomicRawCounter::new(0))
    }

    pub(crate) fn load(&self) -> PhaseCounts {
        PhaseCounts::unpack(self.0.load(Ordering::SeqCst))
    }

    /// Adds one waiting CPU, returning the new waiting count.
    pub(crate) fn set_waiting(&self) -> usize {
        let prev = self.0.fetch_add(1, Ordering::SeqCst);
        debug_assert_ne!(prev & WAITING_MASK, WAITING_MASK);
        PhaseCounts::unpack(prev + 1).waiting
    }

    pub(crate) fn set_not_waiting(&self) {
        let prev = self.0.fetch_sub(1, Ordering::SeqCst);
        debug_assert_ne!(prev & WAITING_MASK, 0);
    }

    pub(crate) fn set_ready(&self) {
        self.0.fetch_add(READY_ONE, Ordering::SeqCst);
    }

    /// Removes one ready CPU unless all `online` CPUs are both waiting and
    /// ready.
    ///
    /// Returns false if the counter was full, which means the rendezvous has
    /// completed and the caller has to commit with the others.
    pub(crate) fn set_not_ready(&self, online: usize) -> bool {
        let online = online as RawCounter;
        let all = online | (online << WAITING_BITS);
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |raw| {
                (raw != all).then(|| raw - READY_ONE)
            })
            .is_ok()
    }

    /// Removes one CPU from both the waiting and the ready counts at once.
    pub(crate) fn set_done(&self) {
        let prev = self.0.fetch_sub(READY_ONE + 1, Ordering::SeqCst);
        debug_assert!(prev & WAITING_MASK != 0 && prev >> WAITING_BITS != 0);
    }
}
