// SPDX-License-Identifier: MPL-2.0

//! The shared state of a group of coupled CPUs.

use core::{
    hint::spin_loop,
    sync::atomic::{fence, AtomicBool, AtomicUsize, Ordering},
};

use crate::{
    counter::{PhaseCounts, ReadyWaitingCounter},
    platform::IdlePlatform,
    prelude::*,
};

/// The requested state of a CPU that is not trying to enter coupled idle.
pub const NOT_IDLE: usize = usize::MAX;

/// The CPUs that have to enter and leave coupled idle states together.
///
/// A `CoupledSet` is shared by all registered CPUs with the same coupled
/// mask. It is created by [`CoupledIdle::register`] and lives until the last
/// of its CPUs is deregistered.
///
/// [`CoupledIdle::register`]: crate::CoupledIdle::register
#[derive(Debug)]
pub struct CoupledSet {
    member_mask: CpuSet,
    // Indexed by CPU ID. Only written by the CPU itself.
    requested_state: Vec<AtomicUsize>,
    counter: ReadyWaitingCounter,
    abort_barrier: AtomicUsize,
    online_count: AtomicUsize,
    refcount: AtomicUsize,
    disable_count: AtomicUsize,
    // One of the disables can never be dropped.
    misconfigured: AtomicBool,
}

impl CoupledSet {
    /// Allocates a set for the CPUs in `member_mask`, whose IDs must be
    /// below `num_cpus`.
    pub(crate) fn try_new(member_mask: CpuSet, num_cpus: usize) -> Result<Self> {
        debug_assert!(member_mask.end() <= num_cpus);

        let mut requested_state = Vec::new();
        requested_state
            .try_reserve_exact(num_cpus)
            .map_err(|_| Error::NoMemory)?;
        requested_state.resize_with(num_cpus, || AtomicUsize::new(NOT_IDLE));

        Ok(Self {
            member_mask,
            requested_state,
            counter: ReadyWaitingCounter::new(),
            abort_barrier: AtomicUsize::new(0),
            online_count: AtomicUsize::new(0),
            refcount: AtomicUsize::new(0),
            disable_count: AtomicUsize::new(0),
            misconfigured: AtomicBool::new(false),
        })
    }

    /// Returns the CPUs of this set.
    pub fn member_mask(&self) -> &CpuSet {
        &self.member_mask
    }

    /// Returns the number of online CPUs of this set.
    pub fn online_count(&self) -> usize {
        self.online_count.load(Ordering::Relaxed)
    }

    /// Returns the number of registered CPUs that share this set.
    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Relaxed)
    }

    /// Returns how many disables are in effect.
    pub fn disable_count(&self) -> usize {
        self.disable_count.load(Ordering::SeqCst)
    }

    /// Returns whether coupled idle is currently allowed.
    pub fn is_enabled(&self) -> bool {
        self.disable_count() == 0
    }

    /// Returns the number of CPUs that are waiting and ready.
    pub fn phase_counts(&self) -> PhaseCounts {
        self.counter.load()
    }

    /// Returns the state requested by `cpu`, or `None` if it is not idling.
    pub fn requested_state(&self, cpu: CpuId) -> Option<usize> {
        let state = self
            .requested_state
            .get(cpu.as_usize())?
            .load(Ordering::Relaxed);
        (state != NOT_IDLE).then_some(state)
    }

    pub(crate) fn counter(&self) -> &ReadyWaitingCounter {
        &self.counter
    }

    pub(crate) fn abort_barrier(&self) -> &AtomicUsize {
        &self.abort_barrier
    }

    pub(crate) fn get_ref(&self) {
        self.refcount.fetch_add(1, Ordering::Relaxed);
    }

    /// Drops one reference, returning the number of references left.
    pub(crate) fn put_ref(&self) -> usize {
        self.refcount.fetch_sub(1, Ordering::Relaxed) - 1
    }

    pub(crate) fn inc_disable(&self) {
        self.disable_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Takes a disable that is never dropped. Later calls do nothing.
    pub(crate) fn disable_for_good(&self) {
        if self.misconfigured.load(Ordering::SeqCst) {
            return;
        }
        // The count has to include it before the flag protects it.
        self.inc_disable();
        self.misconfigured.store(true, Ordering::SeqCst);
    }

    /// Drops one disable, returning false if there was none that can be
    /// dropped.
    pub(crate) fn dec_disable(&self) -> bool {
        self.disable_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                let permanent = self.misconfigured.load(Ordering::SeqCst) as usize;
                (count > permanent).then(|| count - 1)
            })
            .is_ok()
    }

    /// Publishes the state requested by `cpu` and marks it as waiting.
    ///
    /// Returns the number of waiting CPUs, including `cpu`.
    pub(crate) fn set_waiting(&self, cpu: CpuId, state: usize) -> usize {
        self.requested_state[cpu.as_usize()].store(state, Ordering::Relaxed);
        // The increment orders the store above before the later `set_ready`.
        self.counter.set_waiting()
    }

    /// Marks `cpu` as no longer waiting.
    ///
    /// This can race with other CPUs becoming ready. The worst case is that
    /// they become ready and then spin until they notice this CPU has left.
    pub(crate) fn set_not_waiting(&self, cpu: CpuId) {
        self.counter.set_not_waiting();
        self.clear_requested_state(cpu);
    }

    pub(crate) fn clear_requested_state(&self, cpu: CpuId) {
        self.requested_state[cpu.as_usize()].store(NOT_IDLE, Ordering::Relaxed);
    }

    /// Returns whether all online CPUs are waiting.
    pub(crate) fn all_waiting(&self) -> bool {
        self.counter.load().waiting == self.online_count()
    }

    /// Returns whether all online CPUs are ready.
    pub(crate) fn all_ready(&self) -> bool {
        self.counter.load().ready == self.online_count()
    }

    pub(crate) fn none_ready(&self) -> bool {
        self.counter.load().ready == 0
    }

    pub(crate) fn none_waiting(&self) -> bool {
        self.counter.load().waiting == 0
    }

    /// Computes the deepest state all online CPUs agreed on.
    ///
    /// Must be called after all CPUs are observed ready.
    pub(crate) fn target_state(&self, platform: &impl IdlePlatform) -> Option<usize> {
        // Pairs with the increments in `set_waiting` of the other CPUs.
        fence(Ordering::SeqCst);

        self.member_mask
            .iter()
            .filter(|&cpu| platform.is_online(cpu))
            .filter_map(|cpu| self.requested_state(cpu))
            .min()
    }

    pub(crate) fn update_online_count(&self, platform: &impl IdlePlatform) -> usize {
        let count = platform.online_in(&self.member_mask).count();
        self.online_count.store(count, Ordering::Relaxed);
        count
    }

    /// Waits until all online CPUs of this set have arrived at `barrier`.
    ///
    /// The barrier counts up to twice the number of online CPUs: once on the
    /// way in and once on the way out. The last CPU out resets it, so it can
    /// be reused as soon as every CPU has returned.
    pub(crate) fn parallel_barrier(&self, barrier: &AtomicUsize) {
        let n = self.online_count();

        barrier.fetch_add(1, Ordering::SeqCst);
        while barrier.load(Ordering::SeqCst) < n {
            spin_loop();
        }

        if barrier.fetch_add(1, Ordering::SeqCst) + 1 == n * 2 {
            barrier.store(0, Ordering::SeqCst);
            return;
        }

        while barrier.load(Ordering::SeqCst) > n {
            spin_loop();
        }
    }
}
