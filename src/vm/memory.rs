//! This module contains the memory operations of the executor: loads and
//! stores through possibly symbolic pointers, allocation and deallocation.

use crate::{
    constant::{HUGE_ALLOCATION_BYTES, POINTER_WIDTH_BITS, SMALL_ALLOCATION_PROBE_BYTES},
    error::{
        container::Locatable,
        execution::{Error, Result},
    },
    expr::{Expr, ExprRef, Width},
    memory::{bytes_for_width, AllocationSite, MemoryObjectRef, ObjectPair, ObjectState},
    program::Register,
    vm::{state::ExecutionState, Branch, Executor},
};

impl Executor {
    /// Loads a `width`-bit value from `address` into `destination`, or stores
    /// `value` to `address` if one is given.
    ///
    /// A pointer that provably points into a single object is accessed
    /// directly. Otherwise the state is forked once per object the pointer
    /// may point into, and whatever state is left over once every candidate
    /// has been split off terminates with an out of bounds error.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the access fails for the current state.
    pub(crate) fn execute_memory_operation(
        &mut self,
        state: &mut ExecutionState,
        address: ExprRef,
        value: Option<ExprRef>,
        width: Width,
        destination: Option<Register>,
    ) -> Result<()> {
        let location = self.location;
        let bytes = bytes_for_width(width);
        let (mut address, value) = if self.config.simplify_symbolic_indices {
            let simplify = |e: &ExprRef| state.constraints.simplify_expr(e);
            (simplify(&address), value.as_ref().map(simplify))
        } else {
            (address, value)
        };

        let found = match state
            .address_space
            .resolve_one_symbolic(state, &mut self.solver, &address)
        {
            Ok(found) => found,
            Err(_) => {
                address = self.to_constant(state, &address, "resolveOne failure")?;
                address
                    .as_constant()
                    .and_then(|a| state.address_space.resolve_one(a).cloned())
            }
        };

        if let Some(pair) = found {
            let mut offset = pair.object.offset_expr(&address);
            let limit = self.config.max_symbolic_array_size;
            if limit != 0 && pair.object.size() >= limit && !offset.is_constant() {
                offset = self.to_constant(state, &offset, "max-sym-array-size")?;
            }
            let in_bounds = self
                .solver
                .must_be_true(state, &pair.object.bounds_check_access(&offset, bytes))
                .map_err(|_| self.query_failed())?;
            if in_bounds {
                return Self::access(state, &pair.object, &offset, value, width, destination)
                    .map_err(|e| e.locate(location));
            }
        }

        let timeout = self.solver.timeout();
        let resolution = state.address_space.resolve(
            state,
            &mut self.solver,
            &address,
            self.config.max_resolutions,
            timeout,
        );

        let mut remaining = Some(Branch::Current);
        for pair in resolution.objects {
            let Some(branch) = remaining else { break };
            let condition = pair.object.bounds_check_pointer_access(&address, bytes);
            let (inside, outside) = self.fork_on(state, branch, condition, true)?;
            if let Some(inside) = inside {
                let offset = pair.object.offset_expr(&address);
                let value = value.clone();
                self.with_branch(state, inside, |_, state| {
                    Self::access(state, &pair.object, &offset, value, width, destination)
                        .map_err(|e| e.locate(location))
                })?;
            }
            remaining = outside;
        }

        if let Some(branch) = remaining {
            let incomplete = resolution.incomplete;
            self.with_branch(state, branch, |executor, state| {
                if incomplete {
                    executor.terminate_state_early(state, "query timed out (resolve)");
                } else {
                    let details = executor.address_info(state, &address);
                    let error = Error::OutOfBoundPointer.locate(location);
                    executor.terminate_state_on_error(state, error, Some(details));
                }
                Ok(())
            })?;
        }
        Ok(())
    }

    /// Performs an access that is known to be in bounds of `object`.
    fn access(
        state: &mut ExecutionState,
        object: &MemoryObjectRef,
        offset: &ExprRef,
        value: Option<ExprRef>,
        width: Width,
        destination: Option<Register>,
    ) -> std::result::Result<(), Error> {
        let contents = state
            .address_space
            .find_object(object)
            .ok_or(Error::OutOfBoundPointer)?;
        match value {
            Some(value) => {
                if contents.is_read_only() {
                    return Err(Error::ReadOnly);
                }
                state.address_space.get_writeable(object).write(offset, &value);
            }
            None => {
                let loaded = contents.read(offset, width);
                if let Some(destination) = destination {
                    state.frame_mut().write(destination, loaded);
                }
            }
        }
        Ok(())
    }

    /// Splits `current` by the object whose base address `address` is equal
    /// to, for operations such as `free` that need a pointer to the start of
    /// an object.
    ///
    /// Any state in which `address` is not the base of an object terminates
    /// with an invalid pointer error naming `operation`. The returned branches
    /// are relative to `current`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if forking fails in a way that stops the run.
    pub(crate) fn resolve_exact(
        &mut self,
        current: &mut ExecutionState,
        address: &ExprRef,
        operation: &str,
    ) -> Result<Vec<(Branch, ObjectPair)>> {
        let location = self.location;
        let timeout = self.solver.timeout();
        let resolution = current.address_space.resolve(
            current,
            &mut self.solver,
            address,
            self.config.max_resolutions,
            timeout,
        );

        let mut resolved = Vec::new();
        let mut remaining = Some(Branch::Current);
        for pair in resolution.objects {
            let Some(branch) = remaining else { break };
            let condition = Expr::eq(address.clone(), pair.object.base_expr());
            let (exact, other) = self.fork_on(current, branch, condition, true)?;
            if let Some(exact) = exact {
                resolved.push((exact, pair));
            }
            remaining = other;
        }

        if let Some(branch) = remaining {
            let operation = operation.to_string();
            self.with_branch(current, branch, |executor, state| {
                let details = executor.address_info(state, address);
                let error = Error::InvalidPointer { operation }.locate(location);
                executor.terminate_state_on_error(state, error, Some(details));
                Ok(())
            })?;
        }
        Ok(resolved)
    }

    /// Allocates an object of `size` bytes and writes its address to
    /// `destination`.
    ///
    /// A symbolic size is concretized: the state is forked on a small
    /// feasible value first, and any state left over gets either a unique
    /// value, a null pointer for sizes that may be huge, or an error.
    ///
    /// When `realloc_from` is given, the contents of that object are copied
    /// into the new one and the old object is freed.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the allocation fails for the current state.
    pub(crate) fn execute_alloc(
        &mut self,
        state: &mut ExecutionState,
        size: ExprRef,
        is_local: bool,
        destination: Option<Register>,
        realloc_from: Option<ObjectPair>,
    ) -> Result<()> {
        let location = self.location;
        let size = self.to_unique(state, &Expr::zext(size, POINTER_WIDTH_BITS));
        if let Some(size) = size.as_constant() {
            self.allocate_concrete(state, size, is_local, destination, realloc_from);
            return Ok(());
        }

        let width = size.width();
        let mut example = self
            .solver
            .get_value(state, &size)
            .map_err(|_| self.query_failed())?
            .as_constant()
            .unwrap_or_default();
        while example > SMALL_ALLOCATION_PROBE_BYTES {
            let halved = Expr::constant(example / 2, width);
            let feasible = self
                .solver
                .may_be_true(state, &Expr::eq(halved, size.clone()))
                .map_err(|_| self.query_failed())?;
            if !feasible {
                break;
            }
            example /= 2;
        }

        let condition = Expr::eq(Expr::constant(example, width), size.clone());
        let (fixed, other) = self.fork(state, condition, true)?;
        if let Some(fixed) = fixed {
            let realloc_from = realloc_from.clone();
            self.with_branch(state, fixed, |executor, state| {
                executor.allocate_concrete(state, example, is_local, destination, realloc_from);
                Ok(())
            })?;
        }
        let Some(other) = other else {
            return Ok(());
        };

        self.with_branch(state, other, |executor, state| {
            let value = executor
                .solver
                .get_value(state, &size)
                .map_err(|_| executor.query_failed())?;
            let unique = executor
                .solver
                .must_be_true(state, &Expr::eq(value.clone(), size.clone()))
                .map_err(|_| executor.query_failed())?;
            if unique {
                let value = value.as_constant().unwrap_or_default();
                executor.allocate_concrete(state, value, is_local, destination, realloc_from);
                return Ok(());
            }

            let huge = Expr::ult(Expr::constant(HUGE_ALLOCATION_BYTES, width), size.clone());
            let (huge, small) = executor.fork(state, huge, true)?;
            if let Some(huge) = huge {
                tracing::info!(%location, "found huge malloc, returning 0");
                executor.with_branch(state, huge, |_, state| {
                    if let Some(destination) = destination {
                        state.frame_mut().write(destination, Expr::pointer(0));
                    }
                    Ok(())
                })?;
            }
            if let Some(small) = small {
                executor.with_branch(state, small, |executor, state| {
                    let details = format!("size expression: {size}");
                    let error = Error::ConcretizedSymbolicSize.locate(location);
                    executor.terminate_state_on_error(state, error, Some(details));
                    Ok(())
                })?;
            }
            Ok(())
        })
    }

    /// Allocates an object of the concrete `size`, writing a null pointer to
    /// `destination` if the allocation is refused.
    fn allocate_concrete(
        &mut self,
        state: &mut ExecutionState,
        size: u64,
        is_local: bool,
        destination: Option<Register>,
        realloc_from: Option<ObjectPair>,
    ) {
        let site = AllocationSite::Instruction(self.location);
        let name = if is_local { "alloca" } else { "malloc" };
        let Some(object) =
            self.memory
                .allocate(&mut state.address_pool, size, is_local, false, site, name)
        else {
            if let Some(destination) = destination {
                state.frame_mut().write(destination, Expr::pointer(0));
            }
            return;
        };

        let mut contents = ObjectState::new(object.clone());
        if let Some(old) = realloc_from {
            if let Some(old_contents) = state.address_space.find_object(&old.object) {
                for index in 0..size.min(old.object.size()) {
                    contents.write8(index, &old_contents.read8(index));
                }
            }
            state.address_space.unbind_object(&old.object);
        }
        state.address_space.bind_object(object.clone(), contents);
        if is_local {
            state.frame_mut().allocas.push(object.clone());
        }
        if let Some(destination) = destination {
            state.frame_mut().write(destination, object.base_expr());
        }
    }

    /// Frees the object that `address` points to the start of, writing a null
    /// pointer to `destination` if there is one.
    ///
    /// Freeing a null pointer does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if forking fails in a way that stops the run.
    pub(crate) fn execute_free(
        &mut self,
        state: &mut ExecutionState,
        address: ExprRef,
        destination: Option<Register>,
    ) -> Result<()> {
        let location = self.location;
        let write_null = move |state: &mut ExecutionState| {
            if let Some(destination) = destination {
                state.frame_mut().write(destination, Expr::pointer(0));
            }
        };

        let (null, non_null) = self.fork(state, Expr::is_zero(address.clone()), true)?;
        if let Some(null) = null {
            self.with_branch(state, null, |_, state| {
                write_null(state);
                Ok(())
            })?;
        }
        let Some(non_null) = non_null else {
            return Ok(());
        };

        let resolved = self
            .on_state(state, non_null, |executor, state| {
                executor.resolve_exact(state, &address, "free")
            })?
            .unwrap_or_default();
        for (branch, pair) in resolved {
            let branch = branch.relative_to(non_null);
            self.with_branch(state, branch, |_, state| {
                if pair.object.is_local() {
                    return Err(Error::FreeOfAlloca.locate(location));
                }
                if pair.object.is_global() {
                    return Err(Error::FreeOfGlobal.locate(location));
                }
                state.address_space.unbind_object(&pair.object);
                write_null(state);
                Ok(())
            })?;
        }
        Ok(())
    }
}
