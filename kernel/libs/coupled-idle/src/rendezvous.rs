// SPDX-License-Identifier: MPL-2.0

//! The rendezvous of the CPUs of a coupled set.
//!
//! A CPU entering a coupled state goes through these phases:
//!
//! ```text
//!            +-----------+   all waiting    +---------+   all ready   +-----------+
//! enter ---> |  waiting  | ---------------> |  ready  | ------------> | committed |
//!            +-----------+  and poked       +---------+               +-----------+
//!              |      ^                         |
//!  resched or  |      |  a CPU left waiting     |
//!  disabled    |      +-------------------------+
//!              v
//!            abort: one safe idle
//! ```
//!
//! While waiting, the CPU repeatedly enters the safe idle state, checking
//! for pokes, pending work and disables each time it wakes up. Once ready,
//! it can no longer abort by itself. It spins until either every online CPU
//! is ready or some CPU left the waiting phase, in which case it takes its
//! ready mark back and waits again.

use core::{
    hint::spin_loop,
    sync::atomic::{fence, AtomicUsize, Ordering},
};

use crate::{coupled::CoupledSet, platform::IdlePlatform, prelude::*, CoupledIdle};

/// How a CPU left the rendezvous.
enum Outcome {
    /// All CPUs entered the coupled state together.
    Committed(Result<usize>),
    /// The CPU left before all CPUs were ready.
    Aborted,
    /// The safe state could not be entered while waiting.
    Failed(Error),
}

impl<P: IdlePlatform> CoupledIdle<P> {
    /// Enters the idle state `index` on `cpu`.
    ///
    /// Coupled states go through [`Self::enter_coupled`] when the CPU is in a
    /// coupled set. Other states are entered directly.
    pub fn enter(&self, cpu: CpuId, index: usize) -> Result<usize> {
        self.check_cpu(cpu)?;
        self.check_state(index)?;
        if self.driver.is_coupled(index) && self.coupled_set(cpu).is_some() {
            return self.enter_coupled(cpu, index);
        }
        self.platform.enter_state(cpu, index)
    }

    /// Enters a coupled idle state on `cpu` together with the other CPUs of
    /// its coupled set.
    ///
    /// `requested_state` is the deepest state this CPU accepts. All CPUs of
    /// the set enter the shallowest of the states they requested.
    ///
    /// Returns the index of the entered state. That is the safe state when
    /// the CPU gave up waiting for the others, because it has work to do or
    /// because coupled idle is disabled on its set. Errors from the platform
    /// are returned after the rendezvous has been unwound.
    pub fn enter_coupled(&self, cpu: CpuId, requested_state: usize) -> Result<usize> {
        self.check_cpu(cpu)?;
        self.check_state(requested_state)?;
        let set = self.coupled_set(cpu).ok_or(Error::NotCoupled)?;
        let safe_state = self.driver.safe_state_index();

        let mut entered = None;
        while !set.is_enabled() {
            self.pokes.clear_pokes(cpu);
            if self.platform.need_resched(cpu) {
                return match entered {
                    Some(entered) => entered,
                    None => self.platform.enter_state(cpu, safe_state),
                };
            }
            entered = Some(self.platform.enter_state(cpu, safe_state));
        }

        // Reads the online count only after the disable is gone.
        fence(Ordering::Acquire);

        let outcome = self.rendezvous(cpu, &set, requested_state);

        // No CPU can become ready again before this one is done waiting here,
        // since it is no longer counted as waiting.
        while !set.none_ready() {
            spin_loop();
        }
        self.pokes.leave_ready(cpu);
        set.clear_requested_state(cpu);

        match outcome {
            Outcome::Committed(Ok(entered)) => Ok(entered),
            Outcome::Committed(Err(err)) => {
                log::warn!("{}: failed to enter coupled idle: {:?}", cpu, err);
                Err(err)
            }
            Outcome::Aborted => self.platform.enter_state(cpu, safe_state),
            Outcome::Failed(err) => {
                log::warn!("{}: failed to enter the safe idle state: {:?}", cpu, err);
                Err(err)
            }
        }
    }

    /// Runs the waiting and ready phases and commits.
    ///
    /// Only the waiting phase idles in the safe state. A ready CPU spins, as
    /// the others may become ready at any moment and then count on it to
    /// commit with them.
    fn rendezvous(&self, cpu: CpuId, set: &CoupledSet, requested_state: usize) -> Outcome {
        'reset: loop {
            self.pokes.clear_poked(cpu);

            // The last CPU to arrive pokes the others out of the safe state.
            // This can race with a CPU leaving the waiting phase, in which
            // case the others just go back to waiting.
            if set.set_waiting(cpu, requested_state) == set.online_count() {
                self.pokes.set_poked(cpu);
                self.pokes
                    .poke_others(&self.platform, cpu, set.member_mask());
            }

            'retry: loop {
                if let Some(outcome) = self.wait_for_all_waiting(cpu, set) {
                    return outcome;
                }

                // All CPUs are probably idle. One of them may have just left,
                // so the ready phase has to be confirmed by every CPU.
                self.pokes.enter_ready(cpu);
                set.counter().set_ready();
                while !set.all_ready() {
                    if !set.all_waiting() && set.counter().set_not_ready(set.online_count()) {
                        self.pokes.leave_ready(cpu);
                        continue 'retry;
                    }
                    spin_loop();
                }
                break;
            }

            // A CPU that left and came back after this one saw all CPUs
            // waiting has poked it again. That poke would be lost in the
            // coupled state, so every CPU starts over.
            let online = self.platform.online_in(set.member_mask());
            if self.pokes.any_pending(&online) {
                log::trace!("{}: coupled idle reset by a pending poke", cpu);
                // All CPUs must see the full counter before any of them takes
                // its marks back, and take them back before any of them waits
                // again.
                set.parallel_barrier(set.abort_barrier());
                set.counter().set_done();
                set.parallel_barrier(set.abort_barrier());
                self.pokes.leave_ready(cpu);
                continue 'reset;
            }

            let target_state = set
                .target_state(&self.platform)
                .unwrap_or(self.driver.safe_state_index());
            let entered = self.platform.enter_state(cpu, target_state);
            set.counter().set_done();
            return Outcome::Committed(entered);
        }
    }

    /// Waits in the safe state until all online CPUs of the set are waiting
    /// and this CPU was poked.
    ///
    /// A handled poke sends the CPU back to the loop condition right away,
    /// without another round in the safe state.
    ///
    /// A poke is required even if all CPUs are already waiting. Otherwise,
    /// when two CPUs arrive at the same time, the first one could skip the
    /// loop without handling the poke from the second one.
    ///
    /// Returns `None` if the CPU may go on to the ready phase.
    fn wait_for_all_waiting(&self, cpu: CpuId, set: &CoupledSet) -> Option<Outcome> {
        let safe_state = self.driver.safe_state_index();

        while !set.all_waiting() || !self.pokes.is_poked(cpu) {
            if self.pokes.clear_pokes(cpu) {
                continue;
            }
            if let Some(outcome) = self.check_abort(cpu, set) {
                return Some(outcome);
            }
            if let Err(err) = self.platform.enter_state(cpu, safe_state) {
                set.set_not_waiting(cpu);
                return Some(Outcome::Failed(err));
            }
        }

        self.pokes.clear_pokes(cpu);
        self.check_abort(cpu, set)
    }

    fn check_abort(&self, cpu: CpuId, set: &CoupledSet) -> Option<Outcome> {
        let reason = if self.platform.need_resched(cpu) {
            "pending work"
        } else if !set.is_enabled() {
            "disabled"
        } else {
            return None;
        };
        log::trace!("{}: coupled idle aborted: {}", cpu, reason);
        set.set_not_waiting(cpu);
        Some(Outcome::Aborted)
    }

    /// Disables coupled idle on `set`.
    ///
    /// Returns only after no CPU of the set is in the rendezvous anymore.
    /// Until the matching [`Self::clear_disabled`], CPUs of the set that try
    /// to enter a coupled state stay in the safe state instead.
    pub fn mark_disabled(&self, set: &CoupledSet) {
        set.inc_disable();
        self.wake_others(set);
        while !set.none_waiting() {
            spin_loop();
        }
    }

    /// Drops a disable taken by [`Self::mark_disabled`].
    ///
    /// Returns [`Error::InvalidState`] if coupled idle is not disabled.
    pub fn clear_disabled(&self, set: &CoupledSet) -> Result<()> {
        // CPUs that see the disable gone must see the new online count.
        fence(Ordering::Release);
        if !set.dec_disable() {
            return Err(Error::InvalidState);
        }
        self.wake_others(set);
        Ok(())
    }

    /// Recounts the online CPUs of `set` and returns the new count.
    ///
    /// The caller must hold a disable on the set, otherwise this fails with
    /// [`Error::InvalidState`].
    pub fn update_online_count(&self, set: &CoupledSet) -> Result<usize> {
        if set.is_enabled() {
            return Err(Error::InvalidState);
        }
        Ok(set.update_online_count(&self.platform))
    }

    /// Waits until all online CPUs of the coupled set of `cpu` have called
    /// this function with the same `barrier`.
    ///
    /// Meant for platform code running inside a coupled state, where all
    /// CPUs of the set are known to arrive. `barrier` must start at zero and
    /// is zero again once every CPU has returned.
    pub fn parallel_barrier(&self, cpu: CpuId, barrier: &AtomicUsize) -> Result<()> {
        let set = self.coupled_set(cpu).ok_or(Error::NotCoupled)?;
        set.parallel_barrier(barrier);
        Ok(())
    }

    // Disables are not pokes. Only CPUs in the rendezvous send pokes, so all
    // ready CPUs see the same pending pokes.
    fn wake_others(&self, set: &CoupledSet) {
        let this_cpu = self.platform.current_cpu();
        for cpu in set.member_mask().iter() {
            if Some(cpu) != this_cpu && self.platform.is_online(cpu) {
                self.platform.wake_cpu(cpu);
            }
        }
    }
}
