//! This module contains the interface between the executor and constraint
//! solvers.
//!
//! A [`Solver`] answers questions about a single [`Query`]: a set of path
//! constraints together with an expression of interest. The executor never
//! talks to a backend directly, but always goes through the
//! [`timing::TimingSolver`], which adds the fast paths, timeouts and cost
//! accounting that the executor relies on.
//!
//! Two backends are provided:
//!
//! - [`enumeration::EnumerationSolver`], a complete and deterministic backend
//!   for queries over few symbolic bits.
//! - [`smtlib::SmtLibSolver`], which drives an external SMT solver process
//!   through SMT-LIB 2.

pub mod enumeration;
pub mod smtlib;
pub mod timing;

use std::{fmt::Debug, sync::Arc, time::Duration};

use downcast_rs::{impl_downcast, Downcast};

pub use crate::error::solver::{Error, Result};
use crate::expr::{Array, ConstraintSet, Expr, ExprRef};
pub use enumeration::{EnumerationConfig, EnumerationSolver};
pub use smtlib::SmtLibSolver;
pub use timing::TimingSolver;

/// A question posed to a solver.
#[derive(Clone, Debug)]
pub struct Query<'a> {
    /// The path constraints under which the question is asked.
    pub constraints: &'a ConstraintSet,

    /// The expression the question is about.
    pub expr: ExprRef,

    /// The wall-clock budget for answering the query, if any.
    pub timeout: Option<Duration>,
}

impl<'a> Query<'a> {
    /// Constructs a query about `expr` under `constraints` with no timeout.
    #[must_use]
    pub fn new(constraints: &'a ConstraintSet, expr: ExprRef) -> Self {
        let timeout = None;
        Self {
            constraints,
            expr,
            timeout,
        }
    }

    /// Sets the timeout of the query to `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Gets the same query about a different `expr`.
    #[must_use]
    pub fn with_expr(&self, expr: ExprRef) -> Self {
        Self {
            expr,
            ..self.clone()
        }
    }

    /// Gets the query about the negation of the boolean expression of this
    /// query.
    #[must_use]
    pub fn negated(&self) -> Self {
        self.with_expr(Expr::is_zero(self.expr.clone()))
    }
}

/// The truth of a boolean expression under a set of constraints.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Validity {
    /// The expression holds for every solution of the constraints.
    True,

    /// The expression fails for every solution of the constraints.
    False,

    /// The expression holds for some solutions but not for others.
    Unknown,
}

/// The interface to a constraint solver backend.
///
/// Every method reports a failure to answer (timeouts, unsupported queries,
/// broken solver processes) as an [`Err`], distinct from the answer itself.
///
/// # Unsatisfiable Constraints
///
/// Queries are only ever asked under satisfiable constraints by the executor.
/// Should the constraints be unsatisfiable anyway, every boolean expression
/// is considered [`Validity::True`].
pub trait Solver
where
    Self: Debug + Downcast,
{
    /// Gets the name of the solver, for use in logs and errors.
    fn name(&self) -> &str;

    /// Determines the [`Validity`] of the boolean `query.expr` under
    /// `query.constraints`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the solver could not answer the query.
    fn evaluate(&mut self, query: &Query) -> Result<Validity>;

    /// Checks if the boolean `query.expr` holds for every solution of
    /// `query.constraints`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the solver could not answer the query.
    fn must_be_true(&mut self, query: &Query) -> Result<bool> {
        Ok(self.evaluate(query)? == Validity::True)
    }

    /// Gets a value that `query.expr` can take under `query.constraints`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the solver could not answer the query, or
    /// [`Error::Unsatisfiable`] if the constraints have no solution.
    fn get_value(&mut self, query: &Query) -> Result<u64>;

    /// Gets the contents of `arrays` in a solution of `query.constraints` under
    /// which the boolean `query.expr` is false.
    ///
    /// Returns [`None`] if there is no such solution.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the solver could not answer the query.
    fn get_initial_values(
        &mut self,
        query: &Query,
        arrays: &[Arc<Array>],
    ) -> Result<Option<Vec<Vec<u8>>>>;
}

impl_downcast!(Solver);

/// A dynamically dispatched [`Solver`] instance.
pub type DynSolver = Box<dyn Solver>;
