// SPDX-License-Identifier: MPL-2.0

//! Registration of CPUs to coupled sets.

use crate::{coupled::CoupledSet, platform::IdlePlatform, prelude::*, CoupledIdle};

impl<P: IdlePlatform> CoupledIdle<P> {
    /// Registers `cpu` for coupled idle with the CPUs in `mask`.
    ///
    /// A nonempty mask must contain `cpu` itself.
    ///
    /// CPUs with the same mask share one [`CoupledSet`]. The first CPU to
    /// register with a mask allocates the set, and the others join it. An
    /// empty mask means the CPU never enters coupled states, and nothing is
    /// registered.
    ///
    /// A CPU whose mask differs from the mask of the set it joins is a
    /// configuration error. Coupled idle is then disabled on that set for
    /// good, leaving its CPUs with the safe state only.
    pub fn register(&self, cpu: CpuId, mask: &CpuSet) -> Result<()> {
        self.check_cpu(cpu)?;
        if mask.is_empty() {
            return Ok(());
        }
        if mask.end() > self.num_cpus || !mask.contains(cpu) {
            return Err(Error::InvalidArgs);
        }

        let _guard = self.lock.lock();

        if self.slots[cpu.as_usize()].read().is_some() {
            return Err(Error::Busy);
        }

        let existing = mask
            .iter()
            .find_map(|member| self.slots[member.as_usize()].read().clone());
        let set = match existing {
            Some(set) => set,
            None => Arc::new(CoupledSet::try_new(mask.clone(), self.num_cpus)?),
        };

        if set.member_mask() != mask {
            log::warn!(
                "{}: coupled mask {:?} differs from its set {:?}, disabling coupled idle",
                cpu,
                mask,
                set.member_mask()
            );
            set.disable_for_good();
        }

        let online = set.update_online_count(&self.platform);
        set.get_ref();
        log::debug!(
            "{}: registered for coupled idle, {} users, {} online",
            cpu,
            set.refcount(),
            online
        );

        *self.slots[cpu.as_usize()].write() = Some(set);
        Ok(())
    }

    /// Removes `cpu` from its coupled set.
    ///
    /// The set is dropped from the registry with its last CPU. Does nothing
    /// if the CPU is not registered.
    pub fn deregister(&self, cpu: CpuId) {
        if self.check_cpu(cpu).is_err() {
            return;
        }

        let _guard = self.lock.lock();

        let Some(set) = self.slots[cpu.as_usize()].write().take() else {
            return;
        };
        let left = set.put_ref();
        log::debug!("{}: deregistered from coupled idle, {} users left", cpu, left);
    }
}
