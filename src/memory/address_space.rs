//! This module contains the copy-on-write mapping from memory objects to their
//! contents that each execution state owns.

use std::{
    rc::Rc,
    time::{Duration, Instant},
};

use crate::{
    data::ImmutableMap,
    expr::{Expr, ExprRef},
    external::HostMemory,
    memory::{
        object::{MemoryObject, MemoryObjectRef, ObjectKey},
        object_state::ObjectState,
    },
    solver::{self, TimingSolver},
    vm::state::ExecutionState,
};

/// A memory object together with its contents in one address space.
#[derive(Clone, Debug)]
pub struct ObjectPair {
    pub object: MemoryObjectRef,
    pub state:  Rc<ObjectState>,
}

/// The objects that a symbolic pointer may point into.
#[derive(Clone, Debug, Default)]
pub struct Resolution {
    /// The candidate objects, in the order they were found.
    pub objects: Vec<ObjectPair>,

    /// Set if the search stopped before it could rule out every other object.
    pub incomplete: bool,
}

/// What checking a single candidate object means for the search in
/// [`AddressSpace::resolve`].
enum Candidate {
    Continue,
    Complete,
    Incomplete,
}

/// The memory of an execution state.
///
/// Forking an address space is `O(1)`: both copies share every object state
/// until one of them writes to it, at which point [`Self::get_writeable`]
/// gives the writer its own copy.
#[derive(Clone, Debug)]
pub struct AddressSpace {
    /// The copy-on-write epoch of this address space. Object states tagged
    /// with this epoch are owned exclusively and may be mutated in place.
    cow_key: u64,

    objects: ImmutableMap<ObjectKey, ObjectPair>,
}

impl AddressSpace {
    /// Creates a new, empty, address space.
    #[must_use]
    pub fn new() -> Self {
        let cow_key = 1;
        let objects = ImmutableMap::new();
        Self { cow_key, objects }
    }

    /// Creates a copy of the address space.
    ///
    /// Both the copy and `self` move to a new epoch, so neither may mutate the
    /// object states they currently share.
    #[must_use]
    pub fn fork(&mut self) -> Self {
        self.cow_key += 1;
        self.clone()
    }

    #[must_use]
    pub fn cow_key(&self) -> u64 {
        self.cow_key
    }

    /// Gets the number of bound objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Iterates over the bound objects in address order.
    pub fn objects(&self) -> impl Iterator<Item = &ObjectPair> {
        self.objects.values()
    }

    /// Binds `state` as the contents of `object`.
    ///
    /// # Panics
    ///
    /// If `object` is already bound.
    pub fn bind_object(&mut self, object: MemoryObjectRef, mut state: ObjectState) {
        state.set_copy_on_write_owner(self.cow_key);
        let key = object.key();
        let state = Rc::new(state);
        let previous = self.objects.insert(key, ObjectPair { object, state });
        assert!(previous.is_none(), "object {} bound twice", key.id);
    }

    /// Removes the binding of `object`.
    ///
    /// # Panics
    ///
    /// If `object` is not bound.
    pub fn unbind_object(&mut self, object: &MemoryObject) {
        let removed = self.objects.remove(&object.key());
        assert!(removed.is_some(), "unbinding unbound object {}", object.id());
    }

    /// Gets the contents of `object`, if it is bound.
    #[must_use]
    pub fn find_object(&self, object: &MemoryObject) -> Option<&ObjectState> {
        self.objects.get(&object.key()).map(|pair| pair.state.as_ref())
    }

    /// Gets contents of `object` that are safe to mutate, copying them first
    /// if they are shared with another address space.
    ///
    /// # Panics
    ///
    /// If `object` is not bound.
    pub fn get_writeable(&mut self, object: &MemoryObject) -> &mut ObjectState {
        let cow_key = self.cow_key;
        let pair = self
            .objects
            .get_mut(&object.key())
            .unwrap_or_else(|| panic!("writing to unbound object {}", object.id()));

        if pair.state.copy_on_write_owner() != cow_key {
            let mut copy = ObjectState::clone(&pair.state);
            copy.set_copy_on_write_owner(cow_key);
            pair.state = Rc::new(copy);
        }
        Rc::make_mut(&mut pair.state)
    }

    /// Finds the object containing the concrete `address`.
    #[must_use]
    pub fn resolve_one(&self, address: u64) -> Option<&ObjectPair> {
        let (_, pair) = self.objects.lookup_previous(&ObjectKey::upper_bound(address))?;
        pair.object.contains(address).then_some(pair)
    }

    /// Finds an object that `address` may point into under the constraints of
    /// `state`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the solver fails.
    pub fn resolve_one_symbolic(
        &self,
        state: &ExecutionState,
        solver: &mut TimingSolver,
        address: &ExprRef,
    ) -> solver::Result<Option<ObjectPair>> {
        if let Some(address) = address.as_constant() {
            return Ok(self.resolve_one(address).cloned());
        }

        let example = solver.get_value(state, address)?;
        let example = example.as_constant().unwrap_or_default();
        if let Some(pair) = self.resolve_one(example) {
            return Ok(Some(pair.clone()));
        }

        let start = ObjectKey::upper_bound(example);
        for (_, pair) in self.objects.iter_down_from(&start) {
            if solver.may_be_true(state, &pair.object.bounds_check_pointer(address))? {
                return Ok(Some(pair.clone()));
            }
            if solver.must_be_true(state, &Expr::uge(address.clone(), pair.object.base_expr()))? {
                break;
            }
        }
        for (_, pair) in self.objects.iter_up_after(&start) {
            if solver.may_be_true(state, &pair.object.bounds_check_pointer(address))? {
                return Ok(Some(pair.clone()));
            }
            if solver.must_be_true(state, &Expr::ult(address.clone(), pair.object.base_expr()))? {
                break;
            }
        }
        Ok(None)
    }

    /// Finds every object that `address` may point into under the
    /// constraints of `state`.
    ///
    /// The search visits objects outwards from an example value of the
    /// address, and stops early once it has found `max_resolutions` objects
    /// (when non-zero) or has run for longer than `timeout`. Solver failures
    /// also stop the search. All of these mark the resolution as incomplete.
    pub fn resolve(
        &self,
        state: &ExecutionState,
        solver: &mut TimingSolver,
        address: &ExprRef,
        max_resolutions: usize,
        timeout: Option<Duration>,
    ) -> Resolution {
        let mut resolution = Resolution::default();
        if let Some(address) = address.as_constant() {
            resolution.objects.extend(self.resolve_one(address).cloned());
            return resolution;
        }

        let started = Instant::now();
        let out_of_time = || timeout.map_or(false, |t| started.elapsed() > t);
        let incomplete = |mut resolution: Resolution| {
            resolution.incomplete = true;
            resolution
        };

        let Ok(example) = solver.get_value(state, address) else {
            return incomplete(resolution);
        };
        let start = ObjectKey::upper_bound(example.as_constant().unwrap_or_default());

        for (_, pair) in self.objects.iter_down_from(&start) {
            if out_of_time() {
                return incomplete(resolution);
            }
            match Self::check_candidate(state, solver, address, pair, &mut resolution, max_resolutions) {
                Candidate::Continue => (),
                Candidate::Complete => return resolution,
                Candidate::Incomplete => return incomplete(resolution),
            }
            match solver.must_be_true(state, &Expr::uge(address.clone(), pair.object.base_expr())) {
                Ok(true) => break,
                Ok(false) => (),
                Err(_) => return incomplete(resolution),
            }
        }

        for (_, pair) in self.objects.iter_up_after(&start) {
            if out_of_time() {
                return incomplete(resolution);
            }
            match Self::check_candidate(state, solver, address, pair, &mut resolution, max_resolutions) {
                Candidate::Continue => (),
                Candidate::Complete => return resolution,
                Candidate::Incomplete => return incomplete(resolution),
            }
            match solver.must_be_true(state, &Expr::ult(address.clone(), pair.object.base_expr())) {
                Ok(true) => break,
                Ok(false) => (),
                Err(_) => return incomplete(resolution),
            }
        }

        resolution
    }

    /// Adds `pair` to `resolution` if `address` may point into it.
    fn check_candidate(
        state: &ExecutionState,
        solver: &mut TimingSolver,
        address: &ExprRef,
        pair: &ObjectPair,
        resolution: &mut Resolution,
        max_resolutions: usize,
    ) -> Candidate {
        let in_bounds = pair.object.bounds_check_pointer(address);
        match solver.may_be_true(state, &in_bounds) {
            Ok(true) => (),
            Ok(false) => return Candidate::Continue,
            Err(_) => return Candidate::Incomplete,
        }

        resolution.objects.push(pair.clone());
        if resolution.objects.len() == 1 {
            // The first candidate may be the only one.
            match solver.must_be_true(state, &in_bounds) {
                Ok(true) => return Candidate::Complete,
                Ok(false) => (),
                Err(_) => return Candidate::Incomplete,
            }
        }
        if resolution.objects.len() == max_resolutions {
            Candidate::Incomplete
        } else {
            Candidate::Continue
        }
    }

    /// Writes the concrete contents of every object into `memory`, at the
    /// object's address.
    pub fn copy_out_concretes(&self, memory: &mut HostMemory) {
        for pair in self.objects.values() {
            memory.map(pair.object.address(), pair.state.concrete_bytes().to_vec());
        }
    }

    /// Reads back the contents of every object from `memory`, marking the
    /// bytes that changed as concrete.
    ///
    /// Returns `false` without changing anything if a read-only object was
    /// modified.
    pub fn copy_in_concretes(&mut self, memory: &HostMemory) -> bool {
        let mut changed = Vec::new();
        for pair in self.objects.values() {
            let Some(bytes) = memory.region(pair.object.address()) else {
                continue;
            };
            let current = pair.state.concrete_bytes();
            let differences: Vec<(usize, u8)> = current
                .iter()
                .zip(bytes)
                .enumerate()
                .filter(|(_, (old, new))| old != new)
                .map(|(i, (_, new))| (i, *new))
                .collect();
            if differences.is_empty() {
                continue;
            }
            if pair.state.is_read_only() {
                return false;
            }
            changed.push((pair.object.clone(), differences));
        }

        for (object, differences) in changed {
            let state = self.get_writeable(&object);
            for (index, byte) in differences {
                state.set_concrete_bytes(index, &[byte]);
            }
        }
        true
    }

    /// Estimates the host memory used by the object states that this address
    /// space owns exclusively.
    #[must_use]
    pub fn exclusive_footprint(&self) -> u64 {
        self.objects
            .values()
            .filter(|pair| pair.state.copy_on_write_owner() == self.cow_key)
            .map(|pair| pair.state.footprint())
            .sum()
    }
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use crate::{
        expr::Expr,
        external::HostMemory,
        memory::{
            address_space::AddressSpace,
            object::{AllocationSite, MemoryObject, ObjectId},
            object_state::ObjectState,
        },
    };

    fn object(id: u64, address: u64, size: u64) -> Arc<MemoryObject> {
        Arc::new(MemoryObject::new(
            ObjectId(id),
            address,
            size,
            format!("o{id}"),
            false,
            false,
            false,
            AllocationSite::Unknown,
        ))
    }

    #[test]
    fn writes_after_fork_are_private() {
        let buffer = object(1, 0x100, 8);
        let mut parent = AddressSpace::new();
        parent.bind_object(buffer.clone(), ObjectState::new(buffer.clone()));
        parent
            .get_writeable(&buffer)
            .write(&Expr::pointer(0), &Expr::constant(0x1111_1111, 32));

        let mut child = parent.fork();
        child
            .get_writeable(&buffer)
            .write(&Expr::pointer(0), &Expr::constant(0x2222_2222, 32));

        let read = |space: &AddressSpace| {
            space
                .find_object(&buffer)
                .expect("bound")
                .read(&Expr::pointer(0), 32)
                .as_constant()
        };
        assert_eq!(read(&parent), Some(0x1111_1111));
        assert_eq!(read(&child), Some(0x2222_2222));
    }

    #[test]
    fn resolve_one_finds_containing_object() {
        let mut space = AddressSpace::new();
        for (id, address) in [(1, 0x100), (2, 0x200), (3, 0x300)] {
            let o = object(id, address, 0x10);
            space.bind_object(o.clone(), ObjectState::new(o));
        }

        assert_eq!(space.resolve_one(0x20f).map(|p| p.object.id()), Some(ObjectId(2)));
        assert!(space.resolve_one(0x210).is_none());
        assert!(space.resolve_one(0x50).is_none());
    }

    #[test]
    fn copy_in_refuses_changes_to_read_only_objects() {
        let writable = object(1, 0x100, 2);
        let constant = object(2, 0x200, 2);
        let mut space = AddressSpace::new();
        space.bind_object(writable.clone(), ObjectState::new(writable.clone()));
        let mut state = ObjectState::with_bytes(constant.clone(), vec![1, 2]);
        state.set_read_only(true);
        space.bind_object(constant.clone(), state);

        let mut memory = HostMemory::new();
        space.copy_out_concretes(&mut memory);
        memory.write(0x100, &[9]).expect("mapped");
        memory.write(0x201, &[7]).expect("mapped");
        assert!(!space.copy_in_concretes(&memory));
        assert_eq!(space.find_object(&writable).expect("bound").concrete_bytes(), &[0, 0]);

        memory.write(0x201, &[2]).expect("mapped");
        assert!(space.copy_in_concretes(&memory));
        assert_eq!(space.find_object(&writable).expect("bound").concrete_bytes(), &[9, 0]);
    }

    #[test]
    #[should_panic(expected = "bound twice")]
    fn binding_twice_is_an_invariant_violation() {
        let o = object(1, 0x100, 1);
        let mut space = AddressSpace::new();
        space.bind_object(o.clone(), ObjectState::new(o.clone()));
        space.bind_object(o.clone(), ObjectState::new(o));
    }
}
