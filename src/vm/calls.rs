//! This module contains calls and returns, including calls through function
//! pointers and calls to functions implemented by the host.

use crate::{
    constant::VARARG_SLOT_BYTES,
    error::{
        container::Locatable,
        execution::{Error, Result},
    },
    expr::{Expr, ExprRef, Width, INT64},
    external::HostMemory,
    memory::{AllocationSite, MemoryObjectRef, ObjectState},
    program::{FunctionBody, FunctionId, InstructionRef, Register},
    vm::{
        state::{stack::CallSite, thread::ThreadId, ExecutionState},
        Branch,
        Executor,
    },
};

impl Executor {
    /// Calls `function` with `arguments`, entering its first block.
    ///
    /// Arguments beyond the parameters of a variadic function are stored in a
    /// varargs object owned by the new frame.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the call cannot be made.
    pub(crate) fn execute_call(
        &mut self,
        state: &mut ExecutionState,
        function: FunctionId,
        arguments: Vec<ExprRef>,
        destination: Option<Register>,
    ) -> Result<()> {
        let location = self.location;
        let program = self.program.clone();
        let callee = program.function(function);
        if let FunctionBody::External { result_width } = callee.body {
            return self.call_external(state, &callee.name, result_width, arguments, destination);
        }

        let parameters = callee.parameters as usize;
        if arguments.len() < parameters {
            return Err(Error::TooFewArguments.locate(location));
        }
        let mut varargs = None;
        if arguments.len() > parameters {
            if callee.variadic {
                varargs = Some(self.allocate_varargs(state, &arguments[parameters..])?);
            } else if self.first_warning(format!("extra arguments: {}", callee.name)) {
                tracing::warn!(function = %callee.name, "calling function with extra arguments");
            }
        }

        let caller = CallSite {
            call: location,
            destination,
        };
        state.push_frame(Some(caller), function, callee.registers);
        let frame = state.frame_mut();
        for (index, argument) in (0..callee.parameters).zip(arguments) {
            frame.write(callee.argument_register(index), argument);
        }
        frame.varargs = varargs;

        let thread = state.thread_mut();
        thread.pc = InstructionRef::entry(function);
        thread.incoming_block = None;
        Ok(())
    }

    /// Stores the variadic `arguments` of a call in consecutive slots of a
    /// fresh object.
    fn allocate_varargs(
        &mut self,
        state: &mut ExecutionState,
        arguments: &[ExprRef],
    ) -> Result<MemoryObjectRef> {
        let location = self.location;
        let size = VARARG_SLOT_BYTES * arguments.len() as u64;
        let object = self
            .memory
            .allocate(
                &mut state.address_pool,
                size,
                true,
                false,
                AllocationSite::Varargs(location),
                "varargs",
            )
            .ok_or(Error::VarargsAllocationFailed.locate(location))?;

        let mut contents = ObjectState::new(object.clone());
        for (slot, argument) in arguments.iter().enumerate() {
            let offset = Expr::pointer(slot as u64 * VARARG_SLOT_BYTES);
            contents.write(&offset, &Expr::zext(argument.clone(), INT64));
        }
        state.address_space.bind_object(object.clone(), contents);
        Ok(object)
    }

    /// Calls the function that `pointer` points to.
    ///
    /// A symbolic pointer is resolved by forking once per function it may
    /// point to, calling each in its own state. At most `max_resolutions`
    /// targets are tried, and the state left over after that is terminated
    /// early.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the call fails in a way that stops the run.
    pub(crate) fn execute_indirect_call(
        &mut self,
        state: &mut ExecutionState,
        pointer: ExprRef,
        arguments: Vec<ExprRef>,
        destination: Option<Register>,
    ) -> Result<()> {
        let location = self.location;
        let mut free = Some(Branch::Current);
        let mut resolutions = 0usize;

        while let Some(branch) = free {
            let cap = self.config.max_resolutions;
            if cap != 0 && resolutions == cap {
                self.with_branch(state, branch, |executor, state| {
                    executor.terminate_state_early(state, "query timed out (resolve)");
                    Ok(())
                })?;
                break;
            }

            let pointer_ref = &pointer;
            let value = self.on_state(state, branch, |executor, state| {
                executor
                    .solver
                    .get_value(state, pointer_ref)
                    .map_err(|_| executor.query_failed())
            })?;
            let Some(value) = value else { break };

            let condition = Expr::eq(pointer.clone(), value.clone());
            let (matched, rest) = self.fork_on(state, branch, condition, true)?;
            resolutions += 1;
            if let Some(matched) = matched {
                let address = value.as_constant().unwrap_or_default();
                let arguments = arguments.clone();
                let unique = resolutions == 1 && rest.is_none();
                self.with_branch(state, matched, |executor, state| {
                    let function = executor
                        .program
                        .function_at_address(address)
                        .ok_or(Error::InvalidFunctionPointer.locate(location))?;
                    if !unique && executor.first_warning(format!("symbolic function pointer at {location}")) {
                        tracing::warn!(%location, "resolved symbolic function pointer");
                    }
                    executor.execute_call(state, function, arguments, destination)
                })?;
            }
            free = rest;
        }
        Ok(())
    }

    /// Returns from the innermost frame of the current thread with `value`.
    ///
    /// Returning from the bottom frame of the main thread exits the program,
    /// while returning from the bottom frame of any other thread exits that
    /// thread.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the caller expected a value and none was returned.
    pub(crate) fn execute_return(
        &mut self,
        state: &mut ExecutionState,
        value: Option<ExprRef>,
    ) -> Result<()> {
        let location = self.location;
        let Some(caller) = state.frame().caller else {
            if state.current_thread_id() == ThreadId(0) {
                self.terminate_state_on_exit(state);
                return Ok(());
            }
            return self.exit_thread(state);
        };

        state.pop_frame();
        state.thread_mut().pc = caller.call.next();
        if let Some(destination) = caller.destination {
            let value = value.ok_or(Error::MissingReturnValue.locate(location))?;
            state.frame_mut().write(destination, value);
        }
        Ok(())
    }

    /// Calls the host function `name` with concrete versions of `arguments`.
    ///
    /// The host sees a concrete image of the memory of the state, and any
    /// bytes it changes are copied back afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if external calls are disallowed, an argument is
    /// symbolic, or the host call fails.
    pub(crate) fn call_external(
        &mut self,
        state: &mut ExecutionState,
        name: &str,
        result_width: Option<Width>,
        arguments: Vec<ExprRef>,
        destination: Option<Register>,
    ) -> Result<()> {
        let location = self.location;
        if !self.config.allow_external_calls {
            return Err(Error::ExternalCallsDisallowed { name: name.into() }.locate(location));
        }

        let mut concrete = Vec::with_capacity(arguments.len());
        for argument in &arguments {
            let argument = self.to_unique(state, argument);
            let value = match argument.as_constant() {
                Some(value) => value,
                None if self.config.allow_symbolic_external_arguments => self
                    .to_constant(state, &argument, "external call")?
                    .as_constant()
                    .unwrap_or_default(),
                None => {
                    let error = Error::SymbolicExternalArgument { name: name.into() };
                    return Err(error.locate(location));
                }
            };
            concrete.push(value);
        }

        let mut memory = HostMemory::new();
        state.address_space.copy_out_concretes(&mut memory);
        if self.first_warning(format!("external call: {name}")) {
            tracing::info!(name, "calling external");
        }
        let result = match self.dispatcher.call(name, &concrete, &mut memory) {
            Ok(result) => result,
            Err(error) => {
                tracing::info!(name, %error, "external call failed");
                return Err(Error::ExternalCallFailed { name: name.into() }.locate(location));
            }
        };
        if !state.address_space.copy_in_concretes(&memory) {
            return Err(Error::ExternalModifiedReadOnly.locate(location));
        }

        if let Some(destination) = destination {
            let width = result_width.ok_or(Error::MissingReturnValue.locate(location))?;
            state
                .frame_mut()
                .write(destination, Expr::constant(result.unwrap_or(0), width));
        }
        Ok(())
    }
}
