//! This module contains the solver wrapper that the executor issues all of its
//! queries through.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    expr::{Array, Expr, ExprRef},
    solver::{DynSolver, Error, Query, Result, Solver, Validity},
    vm::state::ExecutionState,
};

/// A wrapper around a [`Solver`] that asks its queries under the constraints
/// of an execution state.
///
/// On top of the backend it provides:
///
/// - Answers for constant expressions without consulting the backend.
/// - Simplification of expressions against the equalities that the path
///   constraints imply, when enabled.
/// - A timeout for every query.
/// - Accounting of the time spent in the backend, both per state and in total.
#[derive(Debug)]
pub struct TimingSolver {
    solver: DynSolver,

    timeout: Option<Duration>,

    simplify_exprs: bool,

    total_time: Duration,

    /// The number of queries that reached the backend.
    queries: u64,
}

impl TimingSolver {
    /// Wraps `solver`, giving each query at most `timeout` to complete.
    #[must_use]
    pub fn new(solver: DynSolver, timeout: Option<Duration>) -> Self {
        let simplify_exprs = true;
        let total_time = Duration::ZERO;
        let queries = 0;
        Self {
            solver,
            timeout,
            simplify_exprs,
            total_time,
            queries,
        }
    }

    /// Sets whether expressions are simplified against the path constraints
    /// before being sent to the backend.
    #[must_use]
    pub fn with_simplification(mut self, simplify_exprs: bool) -> Self {
        self.simplify_exprs = simplify_exprs;
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Gets the total time spent in the backend.
    #[must_use]
    pub fn total_time(&self) -> Duration {
        self.total_time
    }

    /// Gets the number of queries that reached the backend.
    #[must_use]
    pub fn queries(&self) -> u64 {
        self.queries
    }

    /// Gets the backend.
    #[must_use]
    pub fn solver(&self) -> &dyn Solver {
        self.solver.as_ref()
    }

    /// Gets the backend as a concrete solver type, if it is one.
    #[must_use]
    pub fn solver_as<T: Solver>(&self) -> Option<&T> {
        self.solver.downcast_ref::<T>()
    }

    /// Gets the backend as a concrete solver type for modification, if it is
    /// one.
    pub fn solver_as_mut<T: Solver>(&mut self) -> Option<&mut T> {
        self.solver.downcast_mut::<T>()
    }

    fn prepare(&self, state: &ExecutionState, expr: &ExprRef) -> ExprRef {
        if self.simplify_exprs {
            state.constraints.simplify_expr(expr)
        } else {
            expr.clone()
        }
    }

    /// Runs `ask` against the backend, charging the time it takes to `state`.
    fn timed<T>(
        &mut self,
        state: &ExecutionState,
        expr: ExprRef,
        ask: impl FnOnce(&mut dyn Solver, &Query) -> Result<T>,
    ) -> Result<T> {
        let query = Query::new(&state.constraints, expr).with_timeout(self.timeout);
        let started = Instant::now();
        let result = ask(self.solver.as_mut(), &query);
        let elapsed = started.elapsed();

        self.queries += 1;
        self.total_time += elapsed;
        state.charge_query(elapsed);
        if let Err(error) = &result {
            tracing::debug!(solver = self.solver.name(), %error, "solver query failed");
        }
        result
    }

    /// Determines the [`Validity`] of the boolean `expr` under the constraints
    /// of `state`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the backend could not answer the query.
    pub fn evaluate(&mut self, state: &ExecutionState, expr: &ExprRef) -> Result<Validity> {
        if let Some(value) = expr.as_constant() {
            return Ok(if value == 0 { Validity::False } else { Validity::True });
        }
        let expr = self.prepare(state, expr);
        if let Some(value) = expr.as_constant() {
            return Ok(if value == 0 { Validity::False } else { Validity::True });
        }
        self.timed(state, expr, |solver, query| solver.evaluate(query))
    }

    /// Checks if the boolean `expr` holds on every path through `state`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the backend could not answer the query.
    pub fn must_be_true(&mut self, state: &ExecutionState, expr: &ExprRef) -> Result<bool> {
        if let Some(value) = expr.as_constant() {
            return Ok(value != 0);
        }
        let expr = self.prepare(state, expr);
        if let Some(value) = expr.as_constant() {
            return Ok(value != 0);
        }
        self.timed(state, expr, |solver, query| solver.must_be_true(query))
    }

    /// Checks if the boolean `expr` fails on every path through `state`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the backend could not answer the query.
    pub fn must_be_false(&mut self, state: &ExecutionState, expr: &ExprRef) -> Result<bool> {
        self.must_be_true(state, &Expr::is_zero(expr.clone()))
    }

    /// Checks if the boolean `expr` holds on some path through `state`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the backend could not answer the query.
    pub fn may_be_true(&mut self, state: &ExecutionState, expr: &ExprRef) -> Result<bool> {
        Ok(!self.must_be_false(state, expr)?)
    }

    /// Checks if the boolean `expr` fails on some path through `state`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the backend could not answer the query.
    pub fn may_be_false(&mut self, state: &ExecutionState, expr: &ExprRef) -> Result<bool> {
        Ok(!self.must_be_true(state, expr)?)
    }

    /// Gets a value that `expr` can take on some path through `state`, as a
    /// constant of the width of `expr`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the backend could not answer the query.
    pub fn get_value(&mut self, state: &ExecutionState, expr: &ExprRef) -> Result<ExprRef> {
        if expr.is_constant() {
            return Ok(expr.clone());
        }
        let expr = self.prepare(state, expr);
        if expr.is_constant() {
            return Ok(expr);
        }
        let width = expr.width();
        let value = self.timed(state, expr, |solver, query| solver.get_value(query))?;
        Ok(Expr::constant(value, width))
    }

    /// Gets the contents of `arrays` in a solution of the constraints of
    /// `state`.
    ///
    /// Returns [`None`] if the constraints have no solution.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the backend could not answer the query.
    pub fn get_initial_values(
        &mut self,
        state: &ExecutionState,
        arrays: &[Arc<Array>],
    ) -> Result<Option<Vec<Vec<u8>>>> {
        if arrays.is_empty() {
            return Ok(Some(Vec::new()));
        }
        self.timed(state, Expr::bool(false), |solver, query| {
            solver.get_initial_values(query, arrays)
        })
    }

    /// Gets the smallest and largest unsigned values that `expr` can take on
    /// the paths through `state`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the backend could not answer one of the queries.
    pub fn get_range(&mut self, state: &ExecutionState, expr: &ExprRef) -> Result<(u64, u64)> {
        if let Some(value) = expr.as_constant() {
            return Ok((value, value));
        }
        let width = expr.width();
        let example = self
            .get_value(state, expr)?
            .as_constant()
            .ok_or(Error::Unsatisfiable)?;

        // The smallest value is the lowest bound that the expression may not
        // fall below.
        let (mut low, mut high) = (0u64, example);
        while low < high {
            let middle = low + (high - low) / 2;
            let below = Expr::ule(expr.clone(), Expr::constant(middle, width));
            if self.may_be_true(state, &below)? {
                high = middle;
            } else {
                low = middle + 1;
            }
        }
        let min = low;

        let (mut low, mut high) = (example, crate::expr::mask(width));
        while low < high {
            let middle = low + (high - low) / 2 + 1;
            let above = Expr::uge(expr.clone(), Expr::constant(middle, width));
            if self.may_be_true(state, &above)? {
                low = middle;
            } else {
                high = middle - 1;
            }
        }
        let max = low;

        Ok((min, max))
    }
}

#[cfg(test)]
mod test {
    use crate::{
        expr::{Array, Expr, ExprRef, UpdateList},
        program::FunctionId,
        solver::{EnumerationSolver, TimingSolver, Validity},
        vm::state::{ExecutionState, StateId},
    };

    fn x() -> ExprRef {
        Expr::read(UpdateList::new(Array::symbolic("x", 1)), Expr::constant(0, 32))
    }

    fn solver() -> TimingSolver {
        TimingSolver::new(Box::<EnumerationSolver>::default(), None)
    }

    #[test]
    fn constants_never_reach_the_backend() -> anyhow::Result<()> {
        let mut solver = solver();
        let state = ExecutionState::new(StateId(0), FunctionId(0), 0);
        assert_eq!(solver.evaluate(&state, &Expr::bool(true))?, Validity::True);
        assert!(solver.must_be_false(&state, &Expr::bool(false))?);
        assert_eq!(solver.get_value(&state, &Expr::constant(4, 8))?, Expr::constant(4, 8));
        assert_eq!(solver.get_initial_values(&state, &[])?, Some(vec![]));
        assert_eq!(solver.queries(), 0);
        Ok(())
    }

    #[test]
    fn queries_are_asked_under_path_constraints() -> anyhow::Result<()> {
        let mut solver = solver();
        let mut state = ExecutionState::new(StateId(0), FunctionId(0), 0);
        state.add_constraint(Expr::ult(x(), Expr::constant(10, 8)));

        assert!(solver.must_be_true(&state, &Expr::ule(x(), Expr::constant(9, 8)))?);
        assert!(solver.may_be_true(&state, &Expr::eq(Expr::constant(3, 8), x()))?);
        assert!(!solver.may_be_true(&state, &Expr::eq(Expr::constant(12, 8), x()))?);
        assert!(solver.queries() > 0);
        Ok(())
    }

    #[test]
    fn ranges_are_found_by_bisection() -> anyhow::Result<()> {
        let mut solver = solver();
        let mut state = ExecutionState::new(StateId(0), FunctionId(0), 0);
        state.add_constraint(Expr::ugt(x(), Expr::constant(3, 8)));
        state.add_constraint(Expr::ult(x(), Expr::constant(42, 8)));

        assert_eq!(solver.get_range(&state, &x())?, (4, 41));
        Ok(())
    }
}
