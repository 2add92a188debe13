// SPDX-License-Identifier: MPL-2.0

//! CPU identifiers, CPU sets and atomic CPU sets.

use core::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use smallvec::SmallVec;

/// The ID of a CPU.
///
/// CPU IDs are small integers starting from 0. Whether an ID is in range is
/// decided by the [`CoupledIdle`] instance it is passed to.
///
/// [`CoupledIdle`]: crate::CoupledIdle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CpuId(u32);

impl CpuId {
    /// Creates a CPU ID from its raw number.
    pub const fn new(raw: u32) -> Self {
        CpuId(raw)
    }

    /// Converts the CPU ID to an `usize`.
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for CpuId {
    fn from(raw: u32) -> Self {
        CpuId(raw)
    }
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CPU{}", self.0)
    }
}

/// A subset of the CPUs in the system.
#[derive(Clone, Debug, Default)]
pub struct CpuSet {
    // A bitset representing the CPUs in the system.
    bits: SmallVec<[InnerPart; NR_PARTS_NO_ALLOC]>,
}

type InnerPart = u64;

const BITS_PER_PART: usize = InnerPart::BITS as usize;
const NR_PARTS_NO_ALLOC: usize = 2;

const fn part_idx(cpu_id: CpuId) -> usize {
    cpu_id.as_usize() / BITS_PER_PART
}

const fn bit_idx(cpu_id: CpuId) -> usize {
    cpu_id.as_usize() % BITS_PER_PART
}

const fn parts_for_cpus(num_cpus: usize) -> usize {
    num_cpus.div_ceil(BITS_PER_PART)
}

impl CpuSet {
    /// Creates a new `CpuSet` with CPUs `0..num_cpus`.
    pub fn new_full(num_cpus: usize) -> Self {
        let num_parts = parts_for_cpus(num_cpus);
        let mut bits = SmallVec::with_capacity(num_parts);
        bits.resize(num_parts, !0);
        if num_cpus % BITS_PER_PART != 0 {
            bits[num_parts - 1] &= (1 << (num_cpus % BITS_PER_PART)) - 1;
        }
        Self { bits }
    }

    /// Creates a new `CpuSet` with no CPUs.
    pub fn new_empty() -> Self {
        Self {
            bits: SmallVec::new(),
        }
    }

    /// Adds a CPU to the set.
    pub fn add(&mut self, cpu_id: CpuId) {
        let part_idx = part_idx(cpu_id);
        let bit_idx = bit_idx(cpu_id);
        if part_idx >= self.bits.len() {
            self.bits.resize(part_idx + 1, 0);
        }
        self.bits[part_idx] |= 1 << bit_idx;
    }

    /// Removes a CPU from the set.
    pub fn remove(&mut self, cpu_id: CpuId) {
        let part_idx = part_idx(cpu_id);
        let bit_idx = bit_idx(cpu_id);
        if part_idx < self.bits.len() {
            self.bits[part_idx] &= !(1 << bit_idx);
        }
    }

    /// Returns true if the set contains the specified CPU.
    pub fn contains(&self, cpu_id: CpuId) -> bool {
        let part_idx = part_idx(cpu_id);
        let bit_idx = bit_idx(cpu_id);
        part_idx < self.bits.len() && (self.bits[part_idx] & (1 << bit_idx)) != 0
    }

    /// Returns the number of CPUs in the set.
    pub fn count(&self) -> usize {
        self.bits
            .iter()
            .map(|part| part.count_ones() as usize)
            .sum()
    }

    /// Returns true if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|part| *part == 0)
    }

    /// Returns the CPUs that are in both `self` and `other`.
    pub fn intersection(&self, other: &CpuSet) -> CpuSet {
        let bits = self
            .bits
            .iter()
            .zip(other.bits.iter())
            .map(|(a, b)| a & b)
            .collect();
        CpuSet { bits }
    }

    /// Returns true if `self` and `other` share at least one CPU.
    pub fn intersects(&self, other: &CpuSet) -> bool {
        self.bits
            .iter()
            .zip(other.bits.iter())
            .any(|(a, b)| a & b != 0)
    }

    /// Returns the highest CPU in the set plus one, or zero for an empty set.
    pub fn end(&self) -> usize {
        self.iter().last().map_or(0, |cpu| cpu.as_usize() + 1)
    }

    /// Iterates over the CPUs in the set.
    ///
    /// The order of the iteration is guaranteed to be in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = CpuId> + '_ {
        self.bits.iter().enumerate().flat_map(|(part_idx, &part)| {
            (0..BITS_PER_PART).filter_map(move |bit_idx| {
                if (part & (1 << bit_idx)) != 0 {
                    Some(CpuId((part_idx * BITS_PER_PART + bit_idx) as u32))
                } else {
                    None
                }
            })
        })
    }
}

// Trailing zero parts do not change the membership.
impl PartialEq for CpuSet {
    fn eq(&self, other: &Self) -> bool {
        let len = self.bits.len().max(other.bits.len());
        (0..len).all(|idx| {
            self.bits.get(idx).copied().unwrap_or(0) == other.bits.get(idx).copied().unwrap_or(0)
        })
    }
}

impl Eq for CpuSet {}

impl From<CpuId> for CpuSet {
    fn from(cpu_id: CpuId) -> Self {
        let mut set = Self::new_empty();
        set.add(cpu_id);
        set
    }
}

impl FromIterator<CpuId> for CpuSet {
    fn from_iter<I: IntoIterator<Item = CpuId>>(iter: I) -> Self {
        let mut set = Self::new_empty();
        for cpu_id in iter {
            set.add(cpu_id);
        }
        set
    }
}

/// A subset of the CPUs in the system with atomic operations.
///
/// It provides atomic operations for each CPU. When the operation contains
/// multiple CPUs, the ordering is not guaranteed.
#[derive(Debug)]
pub struct AtomicCpuSet {
    bits: SmallVec<[AtomicInnerPart; NR_PARTS_NO_ALLOC]>,
}

type AtomicInnerPart = AtomicU64;
const _: () = assert!(size_of::<AtomicInnerPart>() * 8 == BITS_PER_PART);

impl AtomicCpuSet {
    /// Creates a new, empty `AtomicCpuSet` able to hold CPUs `0..num_cpus`.
    pub fn with_capacity(num_cpus: usize) -> Self {
        let bits = (0..parts_for_cpus(num_cpus))
            .map(|_| AtomicU64::new(0))
            .collect();
        Self { bits }
    }

    /// Loads the value of the set with the given ordering.
    ///
    /// This operation is not atomic. Load on each specific word is atomic,
    /// and follows the specified ordering.
    pub fn load(&self, ordering: Ordering) -> CpuSet {
        let bits = self.bits.iter().map(|part| part.load(ordering)).collect();
        CpuSet { bits }
    }

    /// Atomically adds a CPU with the given ordering.
    pub fn add(&self, cpu_id: CpuId, ordering: Ordering) {
        let part_idx = part_idx(cpu_id);
        let bit_idx = bit_idx(cpu_id);
        if part_idx < self.bits.len() {
            self.bits[part_idx].fetch_or(1 << bit_idx, ordering);
        }
    }

    /// Atomically adds a CPU, returning whether it was already in the set.
    ///
    /// CPUs that do not fit in the set are reported as already present, so
    /// callers never act on them.
    pub fn test_and_add(&self, cpu_id: CpuId, ordering: Ordering) -> bool {
        let part_idx = part_idx(cpu_id);
        let bit = 1 << bit_idx(cpu_id);
        match self.bits.get(part_idx) {
            Some(part) => part.fetch_or(bit, ordering) & bit != 0,
            None => true,
        }
    }

    /// Atomically removes a CPU with the given ordering.
    pub fn remove(&self, cpu_id: CpuId, ordering: Ordering) {
        let part_idx = part_idx(cpu_id);
        let bit_idx = bit_idx(cpu_id);
        if part_idx < self.bits.len() {
            self.bits[part_idx].fetch_and(!(1 << bit_idx), ordering);
        }
    }

    /// Atomically checks if the set contains the specified CPU.
    pub fn contains(&self, cpu_id: CpuId, ordering: Ordering) -> bool {
        let part_idx = part_idx(cpu_id);
        let bit_idx = bit_idx(cpu_id);
        part_idx < self.bits.len() && (self.bits[part_idx].load(ordering) & (1 << bit_idx)) != 0
    }
}
