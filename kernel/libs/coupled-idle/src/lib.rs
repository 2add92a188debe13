// SPDX-License-Identifier: MPL-2.0

//! Coupled CPU idle states.
//!
//! Some idle states power down resources that several CPUs share, like a
//! cluster cache or an interrupt controller. Such a "coupled" state is only
//! safe when every CPU sharing the resource enters it at the same time, and
//! all of them have to agree on how deep to go.
//!
//! This crate makes the CPUs of a coupled set meet before entering such a
//! state. Each CPU that wants a coupled state announces the depth it can
//! accept and becomes *waiting*. While the others are still busy it keeps
//! entering the platform's safe idle state. The last CPU to arrive pokes the
//! others, and every CPU then becomes *ready*. Once all online CPUs of the
//! set are ready they all enter the deepest state all of them accepted.
//! Any CPU may leave before that point, which sends the others back to
//! waiting.
//!
//! The protocol is lock-free. Both phase counts of a set share one atomic
//! word, see [`counter`]. Registration and CPU hotplug take a coarse lock and
//! fence the rendezvous with [`CoupledIdle::mark_disabled`].
//!
//! The hardware is reached through an [`IdlePlatform`].

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

extern crate alloc;

pub mod counter;
pub mod cpu;
mod coupled;
mod error;
mod hotplug;
mod platform;
mod poke;
mod prelude;
mod registry;
mod rendezvous;
mod state;

use spin::{Mutex, RwLock};

pub use self::{
    counter::{PhaseCounts, MAX_COUPLED_CPUS, WAITING_BITS},
    coupled::{CoupledSet, NOT_IDLE},
    cpu::{AtomicCpuSet, CpuId, CpuSet},
    error::{Error, Result},
    hotplug::{HotplugAction, NotifyResult},
    platform::IdlePlatform,
    state::{IdleDriver, IdleState, IdleStateFlags},
};
use crate::{poke::PokeTracker, prelude::*};

/// The coupled idle engine of one system.
///
/// It owns the registry of coupled sets, the pokes between CPUs, and the
/// platform used to enter idle states.
pub struct CoupledIdle<P> {
    platform: P,
    driver: IdleDriver,
    num_cpus: usize,
    // The coupled set of each CPU.
    slots: Vec<RwLock<Option<Arc<CoupledSet>>>>,
    // Serializes registration and hotplug transitions.
    lock: Mutex<()>,
    pokes: PokeTracker,
}

impl<P: IdlePlatform> CoupledIdle<P> {
    /// Creates the engine for CPUs `0..num_cpus`.
    pub fn new(platform: P, driver: IdleDriver, num_cpus: usize) -> Result<Self> {
        if num_cpus == 0 || num_cpus > MAX_COUPLED_CPUS {
            log::warn!("unsupported number of CPUs for coupled idle: {}", num_cpus);
            return Err(Error::InvalidArgs);
        }
        driver.verify()?;

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(num_cpus)
            .map_err(|_| Error::NoMemory)?;
        slots.resize_with(num_cpus, || RwLock::new(None));

        Ok(Self {
            platform,
            driver,
            num_cpus,
            slots,
            lock: Mutex::new(()),
            pokes: PokeTracker::new(num_cpus),
        })
    }

    /// Returns the platform.
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Returns the idle state table.
    pub fn driver(&self) -> &IdleDriver {
        &self.driver
    }

    /// Returns the number of CPUs.
    pub fn num_cpus(&self) -> usize {
        self.num_cpus
    }

    /// Returns the coupled set of `cpu`, if it is registered.
    pub fn coupled_set(&self, cpu: CpuId) -> Option<Arc<CoupledSet>> {
        self.slots.get(cpu.as_usize())?.read().clone()
    }

    /// Handles a poke on `cpu`.
    ///
    /// Platforms that deliver [`IdlePlatform::wake_cpu`] as an interrupt may
    /// call this from the handler. It must run on `cpu` itself. A poke that
    /// arrives while the CPU is in the ready phase of a rendezvous is left
    /// pending, and so is any poke this is never called for. Pending pokes
    /// are handled the next time the CPU waits for the others.
    pub fn handle_poke(&self, cpu: CpuId) {
        if self.check_cpu(cpu).is_ok() {
            self.pokes.handle_irq(cpu);
        }
    }

    fn check_cpu(&self, cpu: CpuId) -> Result<()> {
        if cpu.as_usize() < self.num_cpus {
            Ok(())
        } else {
            Err(Error::InvalidArgs)
        }
    }

    fn check_state(&self, index: usize) -> Result<()> {
        if index < self.driver.state_count() {
            Ok(())
        } else {
            Err(Error::InvalidArgs)
        }
    }
}
