//! This module contains the cooperative threads of the program under test and
//! their scheduling.
//!
//! Threads only switch at explicit scheduling points: yields, sleeps and
//! thread exits. When forking on schedules is enabled, each scheduling point
//! with more than one runnable thread forks the state once per candidate.

use crate::{
    error::{
        container::Locatable,
        execution::{Error, Result},
    },
    expr::{Expr, ExprRef, INT64},
    program::Register,
    vm::{
        state::{thread::WaitListId, ExecutionState},
        Executor,
    },
};

impl Executor {
    /// Picks the thread that runs next in `state`.
    ///
    /// The current thread keeps running if it can, unless `yield_current` is
    /// set.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no thread can run.
    pub(crate) fn schedule(&mut self, state: &mut ExecutionState, yield_current: bool) -> Result<()> {
        let location = self.location;
        let enabled = state.enabled_threads();
        if enabled.is_empty() {
            return Err(Error::Deadlock.locate(location));
        }

        let current = state.current_thread_id();
        let current_enabled = state.get_thread(current).map_or(false, |t| t.enabled);
        let max_preemptions = self.config.max_preemptions;
        let may_preempt = max_preemptions == 0 || state.preemptions < max_preemptions;

        if self.config.fork_on_schedule && enabled.len() > 1 && may_preempt {
            let conditions = vec![Expr::bool(true); enabled.len()];
            let arms = self.branch(state, &conditions)?;
            for (arm, thread) in arms.into_iter().zip(enabled) {
                let Some(arm) = arm else { continue };
                self.with_branch(state, arm, |_, state| {
                    if current_enabled && thread != current {
                        state.preemptions += 1;
                    }
                    state.schedule_next(thread);
                    Ok(())
                })?;
            }
            return Ok(());
        }

        let next = if current_enabled && !yield_current {
            current
        } else {
            state
                .next_thread(current)
                .ok_or(Error::Deadlock.locate(location))?
        };
        tracing::trace!(state = %state.id(), from = %current, to = %next, "scheduling");
        state.schedule_next(next);
        Ok(())
    }

    /// Starts a thread running the function that `function` points to, with
    /// `argument` as its only argument.
    pub(crate) fn execute_thread_create(
        &mut self,
        state: &mut ExecutionState,
        function: &ExprRef,
        argument: ExprRef,
        destination: Option<Register>,
    ) -> Result<()> {
        let location = self.location;
        let address = self.constant_argument(state, function, "thread_create")?;
        let program = self.program.clone();
        let function = program
            .function_at_address(address)
            .filter(|f| !program.function(*f).is_external())
            .ok_or(Error::InvalidThreadFunction.locate(location))?;

        let callee = program.function(function);
        let thread = state.create_thread(function, callee.registers);
        if callee.parameters > 0 {
            if let Some(thread) = state.get_thread_mut(thread) {
                thread.frame_mut().write(callee.argument_register(0), argument);
            }
        }
        tracing::debug!(state = %state.id(), %thread, function = %callee.name, "thread created");
        if let Some(destination) = destination {
            state.frame_mut().write(destination, Expr::constant(thread.0, INT64));
        }
        Ok(())
    }

    /// Ends the current thread, exiting the program if it was the last one.
    pub(crate) fn exit_thread(&mut self, state: &mut ExecutionState) -> Result<()> {
        let id = state.current_thread_id();
        state.terminate_thread(id);
        if state.threads().is_empty() {
            self.terminate_state_on_exit(state);
            return Ok(());
        }
        self.schedule(state, false)
    }

    /// Puts the current thread to sleep on the wait list `list`.
    pub(crate) fn execute_thread_sleep(&mut self, state: &mut ExecutionState, list: &ExprRef) -> Result<()> {
        let list = self.constant_argument(state, list, "thread_sleep")?;
        state.sleep(WaitListId(list));
        self.schedule(state, false)
    }

    /// Wakes the first thread asleep on `list`, or all of them.
    pub(crate) fn execute_thread_notify(
        &mut self,
        state: &mut ExecutionState,
        list: &ExprRef,
        all: bool,
    ) -> Result<()> {
        let name = if all {
            "thread_notify_all"
        } else {
            "thread_notify_one"
        };
        let list = WaitListId(self.constant_argument(state, list, name)?);
        if all {
            state.notify_all(list);
        } else if let Some(&thread) = state.sleepers(list).first() {
            state.notify_one(list, thread);
        }
        Ok(())
    }

    /// Gets the unique value of an intrinsic argument that must be constant.
    pub(crate) fn constant_argument(
        &mut self,
        state: &ExecutionState,
        value: &ExprRef,
        intrinsic: &str,
    ) -> Result<u64> {
        self.to_unique(state, value).as_constant().ok_or(
            Error::SymbolicIntrinsicArgument {
                name: intrinsic.into(),
            }
            .locate(self.location),
        )
    }
}
