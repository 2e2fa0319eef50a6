//! This module contains the allocator that hands out memory objects for every
//! state of a run.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    constant::{ADDRESS_POOL_BASE, ADDRESS_POOL_SIZE, ALLOCATION_ALIGNMENT_BYTES},
    memory::object::{AllocationSite, MemoryObject, MemoryObjectRef, ObjectId},
};

/// A region of the address space from which one execution state reserves the
/// addresses of its allocations.
///
/// Reservations only ever move forward, so a pool never hands out the same
/// address twice. Forked states clone the pool and continue from the same
/// point, which keeps addresses deterministic along every path.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AddressPool {
    next: u64,
    end:  u64,
}

impl AddressPool {
    /// Creates a pool over the addresses `[start, start + size)`.
    #[must_use]
    pub fn new(start: u64, size: u64) -> Self {
        let next = align(start);
        let end = start.saturating_add(size);
        Self { next, end }
    }

    /// Reserves `size` bytes, returning the aligned start address.
    ///
    /// Zero-sized reservations still take up one byte so that no two objects
    /// share an address. Returns `None` once the pool is exhausted.
    pub fn reserve(&mut self, size: u64) -> Option<u64> {
        let start = self.next;
        let end = start.checked_add(size.max(1))?;
        if end > self.end {
            return None;
        }
        self.next = align(end);
        Some(start)
    }

    /// Gets the number of addresses left in the pool.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.end.saturating_sub(self.next)
    }
}

impl Default for AddressPool {
    fn default() -> Self {
        Self::new(ADDRESS_POOL_BASE, ADDRESS_POOL_SIZE)
    }
}

fn align(address: u64) -> u64 {
    address.saturating_add(ALLOCATION_ALIGNMENT_BYTES - 1) & !(ALLOCATION_ALIGNMENT_BYTES - 1)
}

/// The allocator of memory objects for a run of the executor.
///
/// Object identities are unique across every state of the run, while the
/// addresses come from the address pool of the allocating state.
#[derive(Debug)]
pub struct MemoryManager {
    next_id: u64,

    max_allocation_size: u64,

    /// Set once a large allocation has been refused, so that the warning is
    /// only logged once.
    warned_large: bool,
}

impl MemoryManager {
    /// Creates a manager that refuses allocations above `max_allocation_size`
    /// bytes.
    #[must_use]
    pub fn new(max_allocation_size: u64) -> Self {
        let next_id = 1;
        let warned_large = false;
        Self {
            next_id,
            max_allocation_size,
            warned_large,
        }
    }

    /// Allocates a new object of `size` bytes with an address from `pool`.
    ///
    /// Returns `None` if the size exceeds the maximum allocation size or the
    /// pool is exhausted.
    pub fn allocate(
        &mut self,
        pool: &mut AddressPool,
        size: u64,
        is_local: bool,
        is_global: bool,
        site: AllocationSite,
        name: impl Into<String>,
    ) -> Option<MemoryObjectRef> {
        if size > self.max_allocation_size {
            if !self.warned_large {
                self.warned_large = true;
                tracing::warn!(size, "failing large alloc");
            }
            return None;
        }

        let address = pool.reserve(size)?;
        let id = self.fresh_id();
        Some(Arc::new(MemoryObject::new(
            id, address, size, name, is_local, is_global, false, site,
        )))
    }

    /// Allocates a global object at the fixed `address`.
    pub fn allocate_fixed(
        &mut self,
        address: u64,
        size: u64,
        site: AllocationSite,
        name: impl Into<String>,
    ) -> MemoryObjectRef {
        let id = self.fresh_id();
        Arc::new(MemoryObject::new(id, address, size, name, false, true, true, site))
    }

    /// Gets the number of objects allocated so far.
    #[must_use]
    pub fn allocated(&self) -> u64 {
        self.next_id - 1
    }

    fn fresh_id(&mut self) -> ObjectId {
        let id = ObjectId(self.next_id);
        self.next_id += 1;
        id
    }
}

#[cfg(test)]
mod test {
    use crate::memory::{
        manager::{AddressPool, MemoryManager},
        object::AllocationSite,
    };

    #[test]
    fn pools_hand_out_aligned_disjoint_ranges() {
        let mut pool = AddressPool::new(0x1001, 64);
        let a = pool.reserve(3).expect("fits");
        let b = pool.reserve(0).expect("fits");
        let c = pool.reserve(8).expect("fits");
        assert_eq!((a, b, c), (0x1008, 0x1010, 0x1018));
        assert!(pool.reserve(64).is_none());
    }

    #[test]
    fn forked_pools_continue_independently() {
        let mut parent = AddressPool::new(0x1000, 0x1000);
        parent.reserve(16);
        let mut child = parent.clone();
        assert_eq!(parent.reserve(4), child.reserve(4));
    }

    #[test]
    fn manager_refuses_large_allocations() {
        let mut manager = MemoryManager::new(1024);
        let mut pool = AddressPool::default();
        assert!(manager
            .allocate(&mut pool, 2048, false, false, AllocationSite::Unknown, "big")
            .is_none());

        let first = manager
            .allocate(&mut pool, 16, true, false, AllocationSite::Unknown, "a")
            .expect("fits");
        let second = manager.allocate_fixed(0x10, 4, AllocationSite::Unknown, "g");
        assert!(first.id() < second.id());
        assert!(second.is_fixed() && second.is_global());
        assert_eq!(manager.allocated(), 2);
    }
}
