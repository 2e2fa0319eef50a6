//! This module contains the termination of execution states, and the test
//! cases that record how each state ended.

use crate::{
    error::execution::LocatedError,
    expr::ExprRef,
    sink::{Solution, TestCase, TestInput, Termination},
    vm::{state::ExecutionState, Executor},
};

impl Executor {
    /// Terminates `state` without producing a test case.
    pub fn terminate_state(&mut self, state: &mut ExecutionState) {
        if self.is_terminated(state) {
            return;
        }
        tracing::debug!(state = %state.id(), "terminating state");
        self.removed.push(state.id());
    }

    /// Terminates `state` because the program exited normally.
    pub fn terminate_state_on_exit(&mut self, state: &mut ExecutionState) {
        if self.is_terminated(state) {
            return;
        }
        self.emit_test_case(state, Termination::Exit, None);
        self.terminate_state(state);
    }

    /// Terminates `state` because the executor gave up on it for `reason`.
    pub fn terminate_state_early(&mut self, state: &mut ExecutionState, reason: &str) {
        if self.is_terminated(state) {
            return;
        }
        tracing::debug!(state = %state.id(), reason, "terminating state early");
        let termination = Termination::Early {
            reason: reason.into(),
        };
        self.emit_test_case(state, termination, None);
        self.terminate_state(state);
    }

    /// Terminates `state` because the program did something wrong.
    ///
    /// Only the first error with a given message at a given instruction is
    /// reported, unless the configuration asks for every error. Later ones
    /// terminate their state silently.
    pub fn terminate_state_on_error(
        &mut self,
        state: &mut ExecutionState,
        error: LocatedError,
        details: Option<String>,
    ) {
        if self.is_terminated(state) {
            return;
        }
        let message = error.payload.to_string();
        let key = (error.location, message.clone());
        let first = self.emitted_errors.insert(key);
        if !first && !self.config.emit_all_errors {
            self.terminate_state(state);
            return;
        }

        tracing::info!(
            state = %state.id(),
            location = %error.location,
            kind = %error.payload.kind(),
            %message,
            "state error"
        );
        if !self.config.emit_all_errors {
            tracing::info!(location = %error.location, "now ignoring this error at this location");
        }

        let termination = Termination::Error {
            kind: error.payload.kind(),
            message,
        };
        self.emit_test_case(state, termination, details);
        self.errors.add(error);
        self.terminate_state(state);
    }

    fn emit_test_case(
        &mut self,
        state: &ExecutionState,
        termination: Termination,
        details: Option<String>,
    ) {
        let arrays = state.symbolic_arrays();
        let solution = match self.solver.get_initial_values(state, &arrays) {
            Ok(Some(values)) => Solution::Inputs(
                arrays
                    .iter()
                    .zip(values)
                    .map(|(array, bytes)| TestInput {
                        name: array.name().into(),
                        bytes,
                    })
                    .collect(),
            ),
            Ok(None) => Solution::NoSolution,
            Err(error) => {
                tracing::warn!(state = %state.id(), %error, "unable to get symbolic solution");
                Solution::SolverFailure
            }
        };

        let test_case = TestCase {
            state: state.id(),
            termination,
            constraints: state.constraints.iter().map(ToString::to_string).collect(),
            solution,
            location: state.location(),
            stack_trace: state.stack_trace(&self.program),
            path: state.path.clone(),
            details,
        };
        self.statistics.test_cases += 1;
        self.sink.process_test_case(test_case);
    }

    /// Describes where `address` may point in `state`, for the report of a
    /// pointer error.
    pub(crate) fn address_info(&mut self, state: &ExecutionState, address: &ExprRef) -> String {
        let mut info = format!("address: {address}\n");
        let example = match address.as_constant() {
            Some(value) => value,
            None => {
                let Ok(example) = self.solver.get_value(state, address) else {
                    return info;
                };
                let example = example.as_constant().unwrap_or_default();
                info.push_str(&format!("example: {example:#x}\n"));
                if let Ok((low, high)) = self.solver.get_range(state, address) {
                    info.push_str(&format!("range: [{low:#x}, {high:#x}]\n"));
                }
                example
            }
        };

        let previous = state
            .address_space
            .objects()
            .filter(|pair| pair.object.address() <= example)
            .last();
        let next = state
            .address_space
            .objects()
            .find(|pair| pair.object.address() > example);
        for (label, pair) in [("prev", previous), ("next", next)] {
            match pair {
                Some(pair) => info.push_str(&format!("{label}: {}\n", pair.object.allocation_info())),
                None => info.push_str(&format!("{label}: none\n")),
            }
        }
        info
    }
}
