// SPDX-License-Identifier: MPL-2.0

//! Directed wake-ups between the CPUs of a coupled set.
//!
//! A poke is a wake-up that is tracked until its target handles it. Sending
//! a poke marks the target as pending and only then wakes it, so a CPU is
//! never woken twice for the same poke. The target handles the poke at its
//! next interrupt window, which marks it as poked and clears the pending bit.
//!
//! While a CPU is in the ready phase its pokes stay pending. The CPUs of a
//! set decide whether to start over from the pending pokes of all of them,
//! so no pending bit may change until they have all decided.

use core::sync::atomic::Ordering;

use crate::{cpu::AtomicCpuSet, platform::IdlePlatform, prelude::*};

#[derive(Debug)]
pub(crate) struct PokeTracker {
    // Pokes that were sent and not yet handled by their targets.
    pending: AtomicCpuSet,
    // CPUs that handled a poke since their last reset.
    poked: AtomicCpuSet,
    // CPUs in the ready phase. Only written by the CPU itself.
    ready: AtomicCpuSet,
}

impl PokeTracker {
    pub(crate) fn new(num_cpus: usize) -> Self {
        Self {
            pending: AtomicCpuSet::with_capacity(num_cpus),
            poked: AtomicCpuSet::with_capacity(num_cpus),
            ready: AtomicCpuSet::with_capacity(num_cpus),
        }
    }

    /// Pokes `cpu` unless a poke to it is already pending.
    ///
    /// Returns whether a wake-up was sent.
    pub(crate) fn poke(&self, platform: &impl IdlePlatform, cpu: CpuId) -> bool {
        if self.pending.test_and_add(cpu, Ordering::SeqCst) {
            return false;
        }
        platform.wake_cpu(cpu);
        true
    }

    /// Pokes the online CPUs of `mask` other than `this_cpu`.
    pub(crate) fn poke_others(
        &self,
        platform: &impl IdlePlatform,
        this_cpu: CpuId,
        mask: &CpuSet,
    ) {
        for cpu in mask.iter() {
            if cpu != this_cpu && platform.is_online(cpu) {
                self.poke(platform, cpu);
            }
        }
    }

    /// Handles a poke on its target CPU.
    pub(crate) fn handle(&self, cpu: CpuId) {
        self.poked.add(cpu, Ordering::SeqCst);
        self.pending.remove(cpu, Ordering::SeqCst);
    }

    /// Handles a poke from the interrupt handler of its target CPU.
    ///
    /// Does nothing while the CPU is ready. The poke is then handled the next
    /// time the CPU waits.
    pub(crate) fn handle_irq(&self, cpu: CpuId) {
        if self.ready.contains(cpu, Ordering::SeqCst) {
            return;
        }
        self.handle(cpu);
    }

    /// Opens an interrupt window on `cpu` if a poke to it is pending.
    ///
    /// Returns whether a poke was handled.
    pub(crate) fn clear_pokes(&self, cpu: CpuId) -> bool {
        if !self.is_pending(cpu) {
            return false;
        }
        self.handle(cpu);
        true
    }

    pub(crate) fn enter_ready(&self, cpu: CpuId) {
        self.ready.add(cpu, Ordering::SeqCst);
    }

    pub(crate) fn leave_ready(&self, cpu: CpuId) {
        self.ready.remove(cpu, Ordering::SeqCst);
    }

    pub(crate) fn is_pending(&self, cpu: CpuId) -> bool {
        self.pending.contains(cpu, Ordering::SeqCst)
    }

    /// Returns whether a poke to any of `cpus` is pending.
    pub(crate) fn any_pending(&self, cpus: &CpuSet) -> bool {
        self.pending.load(Ordering::SeqCst).intersects(cpus)
    }

    pub(crate) fn is_poked(&self, cpu: CpuId) -> bool {
        self.poked.contains(cpu, Ordering::SeqCst)
    }

    pub(crate) fn set_poked(&self, cpu: CpuId) {
        self.poked.add(cpu, Ordering::SeqCst);
    }

    pub(crate) fn clear_poked(&self, cpu: CpuId) {
        self.poked.remove(cpu, Ordering::SeqCst);
    }
}
