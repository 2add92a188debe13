// SPDX-License-Identifier: MPL-2.0

//! The idle state table of a platform.

use bitflags::bitflags;

use crate::prelude::*;

bitflags! {
    /// The properties of an idle state.
    pub struct IdleStateFlags: u32 {
        /// The state powers down resources shared with other CPUs, so all
        /// CPUs of a coupled set must enter it together.
        const COUPLED = 1 << 0;
    }
}

/// An idle state that a CPU can enter.
#[derive(Debug, Clone, Copy)]
pub struct IdleState {
    pub name: &'static str,
    /// The worst-case time to leave the state, in microseconds.
    pub exit_latency_us: u32,
    pub flags: IdleStateFlags,
}

impl IdleState {
    /// Creates a state that a CPU can enter on its own.
    pub const fn new(name: &'static str, exit_latency_us: u32) -> Self {
        Self {
            name,
            exit_latency_us,
            flags: IdleStateFlags::empty(),
        }
    }

    /// Creates a state that has to be entered by a whole coupled set.
    pub const fn new_coupled(name: &'static str, exit_latency_us: u32) -> Self {
        Self {
            name,
            exit_latency_us,
            flags: IdleStateFlags::COUPLED,
        }
    }

    /// Returns whether the state is coupled.
    pub fn is_coupled(&self) -> bool {
        self.flags.contains(IdleStateFlags::COUPLED)
    }
}

/// The idle states of a platform, indexed from the shallowest to the deepest.
#[derive(Debug, Clone)]
pub struct IdleDriver {
    states: Vec<IdleState>,
    safe_state_index: usize,
}

impl IdleDriver {
    /// Creates an idle state table.
    ///
    /// The safe state is the one used as a filler while waiting for the other
    /// CPUs of a coupled set. It must not be coupled itself.
    pub fn new(states: Vec<IdleState>, safe_state_index: usize) -> Result<Self> {
        let driver = Self {
            states,
            safe_state_index,
        };
        driver.verify()?;
        Ok(driver)
    }

    /// Checks that the table can be used for coupled idle.
    pub fn verify(&self) -> Result<()> {
        let Some(safe_state) = self.states.get(self.safe_state_index) else {
            log::warn!(
                "safe idle state {} is out of range ({} states)",
                self.safe_state_index,
                self.states.len()
            );
            return Err(Error::InvalidArgs);
        };
        if safe_state.is_coupled() {
            log::warn!("safe idle state {} is coupled", safe_state.name);
            return Err(Error::InvalidArgs);
        }
        Ok(())
    }

    /// Returns the index of the safe state.
    pub fn safe_state_index(&self) -> usize {
        self.safe_state_index
    }

    /// Returns the number of states.
    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// Returns the state at `index`.
    pub fn state(&self, index: usize) -> Option<&IdleState> {
        self.states.get(index)
    }

    /// Returns whether the state at `index` is coupled.
    pub fn is_coupled(&self, index: usize) -> bool {
        self.states.get(index).is_some_and(IdleState::is_coupled)
    }
}
