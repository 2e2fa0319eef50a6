//! This module contains the intrinsics: operations that the program under test
//! calls like functions, but that the executor implements itself.

use crate::{
    constant::POINTER_WIDTH_BITS,
    error::{
        container::Locatable,
        execution::{Error, Result},
    },
    expr::{Array, Expr, ExprRef, BOOL, INT32, INT64},
    memory::{ObjectPair, ObjectState},
    program::{Intrinsic, Register},
    vm::{state::ExecutionState, Executor},
};

/// Converts an integer condition to a boolean, treating any non-zero value as
/// true.
pub(crate) fn truthy(value: ExprRef) -> ExprRef {
    if value.width() == BOOL {
        value
    } else {
        let width = value.width();
        Expr::ne(value, Expr::constant(0, width))
    }
}

impl Executor {
    /// Executes `intrinsic` with the evaluated `arguments`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the intrinsic fails for the current state.
    pub(crate) fn execute_intrinsic(
        &mut self,
        state: &mut ExecutionState,
        intrinsic: &Intrinsic,
        arguments: Vec<ExprRef>,
        destination: Option<Register>,
    ) -> Result<()> {
        let location = self.location;
        match (intrinsic, arguments.as_slice()) {
            (Intrinsic::Malloc, [size]) => self.execute_alloc(state, size.clone(), false, destination, None),
            (Intrinsic::Calloc, [count, size]) => {
                let count = Expr::zext(count.clone(), POINTER_WIDTH_BITS);
                let size = Expr::zext(size.clone(), POINTER_WIDTH_BITS);
                self.execute_alloc(state, Expr::mul(count, size), false, destination, None)
            }
            (Intrinsic::Realloc, [pointer, size]) => {
                self.execute_realloc(state, pointer.clone(), size.clone(), destination)
            }
            (Intrinsic::Free, [pointer]) => self.execute_free(state, pointer.clone(), destination),
            (Intrinsic::MakeSymbolic { name }, [pointer, size]) => {
                self.execute_make_symbolic(state, name, pointer, size)
            }
            (Intrinsic::Assume, [condition]) => {
                let condition = truthy(condition.clone());
                let impossible = self
                    .solver
                    .must_be_false(state, &condition)
                    .map_err(|_| self.query_failed())?;
                if impossible {
                    return Err(Error::InvalidAssume.locate(location));
                }
                self.add_constraint(state, condition)
            }
            (Intrinsic::Assert { message }, [condition]) => {
                let (_, failed) = self.fork(state, truthy(condition.clone()), false)?;
                if let Some(failed) = failed {
                    let message = message.clone();
                    self.with_branch(state, failed, |_, _| {
                        Err(Error::AssertionFailed { message }.locate(location))
                    })?;
                }
                Ok(())
            }
            (Intrinsic::Abort, []) => Err(Error::Abort.locate(location)),
            (Intrinsic::Exit, [_]) => {
                self.terminate_state_on_exit(state);
                Ok(())
            }
            (Intrinsic::Fork, []) => {
                let arms = self.branch(state, &[Expr::bool(true), Expr::bool(true)])?;
                for (value, arm) in (0u64..).zip(arms) {
                    let Some(arm) = arm else { continue };
                    self.with_branch(state, arm, |_, state| {
                        if let Some(destination) = destination {
                            state.frame_mut().write(destination, Expr::constant(value, INT32));
                        }
                        Ok(())
                    })?;
                }
                Ok(())
            }
            (Intrinsic::SetForking, [enabled]) => {
                let enabled = self.constant_argument(state, enabled, intrinsic.name())?;
                state.fork_disabled = enabled == 0;
                Ok(())
            }
            (Intrinsic::ThreadCreate, [function, argument]) => {
                self.execute_thread_create(state, function, argument.clone(), destination)
            }
            (Intrinsic::ThreadExit, []) => self.exit_thread(state),
            (Intrinsic::ThreadYield, []) => self.schedule(state, true),
            (Intrinsic::ThreadSleep, [list]) => self.execute_thread_sleep(state, list),
            (Intrinsic::ThreadNotify { all }, [list]) => self.execute_thread_notify(state, list, *all),
            (Intrinsic::GetWaitList, []) => {
                let list = state.new_wait_list();
                if let Some(destination) = destination {
                    state.frame_mut().write(destination, Expr::constant(list.0, INT64));
                }
                Ok(())
            }
            _ => {
                let name = intrinsic.name().into();
                Err(Error::UnsupportedInstruction { name }.locate(location))
            }
        }
    }

    /// Resizes the object `pointer` points to, moving its contents to a new
    /// object.
    ///
    /// A zero size frees the object and a null pointer allocates a fresh one.
    fn execute_realloc(
        &mut self,
        state: &mut ExecutionState,
        pointer: ExprRef,
        size: ExprRef,
        destination: Option<Register>,
    ) -> Result<()> {
        let location = self.location;
        let size = Expr::zext(size, POINTER_WIDTH_BITS);

        let (zero_size, non_zero_size) = self.fork(state, Expr::is_zero(size.clone()), true)?;
        if let Some(zero_size) = zero_size {
            let pointer = pointer.clone();
            self.with_branch(state, zero_size, |executor, state| {
                executor.execute_free(state, pointer, destination)
            })?;
        }
        let Some(non_zero_size) = non_zero_size else {
            return Ok(());
        };

        self.with_branch(state, non_zero_size, |executor, state| {
            let (null, non_null) = executor.fork(state, Expr::is_zero(pointer.clone()), true)?;
            if let Some(null) = null {
                let size = size.clone();
                executor.with_branch(state, null, |executor, state| {
                    executor.execute_alloc(state, size, false, destination, None)
                })?;
            }
            let Some(non_null) = non_null else {
                return Ok(());
            };

            let resolved = executor
                .on_state(state, non_null, |executor, state| {
                    executor.resolve_exact(state, &pointer, "realloc")
                })?
                .unwrap_or_default();
            for (branch, pair) in resolved {
                let branch = branch.relative_to(non_null);
                let size = size.clone();
                executor.with_branch(state, branch, |executor, state| {
                    if pair.object.is_local() {
                        return Err(Error::FreeOfAlloca.locate(location));
                    }
                    if pair.object.is_global() {
                        return Err(Error::FreeOfGlobal.locate(location));
                    }
                    executor.execute_alloc(state, size, false, destination, Some(pair))
                })?;
            }
            Ok(())
        })
    }

    /// Replaces the contents of the object `pointer` points to with a fresh
    /// symbolic array called `name`, or with the next replayed input.
    fn execute_make_symbolic(
        &mut self,
        state: &mut ExecutionState,
        name: &str,
        pointer: &ExprRef,
        size: &ExprRef,
    ) -> Result<()> {
        let resolved = self.resolve_exact(state, pointer, "make_symbolic")?;
        for (branch, pair) in resolved {
            let size = size.clone();
            self.with_branch(state, branch, |executor, state| {
                executor.make_symbolic(state, &pair, name, size)
            })?;
        }
        Ok(())
    }

    fn make_symbolic(
        &mut self,
        state: &mut ExecutionState,
        pair: &ObjectPair,
        name: &str,
        size: ExprRef,
    ) -> Result<()> {
        let location = self.location;
        let object = pair.object.clone();
        let read_only = state
            .address_space
            .find_object(&object)
            .map_or(false, ObjectState::is_read_only);
        if read_only {
            return Err(Error::ReadOnly.locate(location));
        }

        let size = Expr::zext(size, POINTER_WIDTH_BITS);
        let size_matches = self
            .solver
            .must_be_true(state, &Expr::eq(object.size_expr(), size))
            .map_err(|_| self.query_failed())?;
        if !size_matches {
            return Err(Error::MakeSymbolicSize.locate(location));
        }

        if let Some(inputs) = &self.replay_inputs {
            let input = inputs
                .get(self.replay_input_position)
                .cloned()
                .ok_or(Error::ReplayInputsExhausted.locate(location))?;
            self.replay_input_position += 1;
            let actual = input.bytes.len() as u64;
            if actual != object.size() {
                let error = Error::ReplayInputSize {
                    name: input.name,
                    expected: object.size(),
                    actual,
                };
                return Err(error.locate(location));
            }
            state.address_space.unbind_object(&object);
            let contents = ObjectState::with_bytes(object.clone(), input.bytes);
            state.address_space.bind_object(object, contents);
            return Ok(());
        }

        let mut unique_name = name.to_string();
        let mut counter = 0;
        while state.symbolics.iter().any(|s| s.array.name() == unique_name) {
            counter += 1;
            unique_name = format!("{name}_{counter}");
        }

        let array = Array::symbolic(unique_name.clone(), object.size());
        state.address_space.unbind_object(&object);
        let contents = ObjectState::new_symbolic(object.clone(), array.clone());
        state.address_space.bind_object(object.clone(), contents);
        state.add_symbolic(object, array.clone());
        tracing::debug!(state = %state.id(), name = %unique_name, "made symbolic");

        self.bind_seed_inputs(state, &array, &unique_name)
    }
}

#[cfg(test)]
mod test {
    use crate::{
        expr::{Expr, BOOL},
        vm::intrinsics::truthy,
    };

    #[test]
    fn integer_conditions_become_comparisons_with_zero() {
        let flag = Expr::bool(true);
        assert_eq!(truthy(flag.clone()), flag);
        let value = truthy(Expr::constant(3, 32));
        assert_eq!(value.width(), BOOL);
        assert!(value.is_true());
    }
}
