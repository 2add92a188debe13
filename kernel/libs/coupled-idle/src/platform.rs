// SPDX-License-Identifier: MPL-2.0

use crate::prelude::*;

/// The services a platform provides to the coupled idle engine.
///
/// Every method taking a `cpu` is called on that CPU, except for
/// [`wake_cpu`](Self::wake_cpu) and [`is_online`](Self::is_online).
pub trait IdlePlatform: Send + Sync {
    /// Enters the idle state `index` on `cpu` and returns after the CPU has
    /// woken up.
    ///
    /// Returns the index of the state that was actually entered.
    ///
    /// The safe state must return when [`wake_cpu`](Self::wake_cpu) targets
    /// the CPU, and otherwise after a bounded delay. A coupled state is
    /// entered by all CPUs of a coupled set at about the same time.
    fn enter_state(&self, cpu: CpuId, index: usize) -> Result<usize>;

    /// Sends a directed wake-up to `cpu`.
    ///
    /// This is fire-and-forget. A CPU that is not idle may ignore it, but a
    /// CPU in the safe state must leave it.
    fn wake_cpu(&self, cpu: CpuId);

    /// Returns whether `cpu` is online.
    fn is_online(&self, cpu: CpuId) -> bool;

    /// Returns whether `cpu` has work pending that should end idling.
    fn need_resched(&self, cpu: CpuId) -> bool;

    /// Returns the CPU the caller runs on, if it is a CPU at all.
    fn current_cpu(&self) -> Option<CpuId> {
        None
    }

    /// Returns the online CPUs among `mask`.
    fn online_in(&self, mask: &CpuSet) -> CpuSet {
        mask.iter().filter(|&cpu| self.is_online(cpu)).collect()
    }
}
