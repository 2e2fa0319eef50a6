//! This module contains a solver that decides queries by enumerating the
//! possible values of the symbolic bytes they depend on.
//!
//! This is only feasible for queries over few symbolic bits, but it is
//! complete, deterministic and needs nothing beyond the expression library,
//! which makes it the solver of choice for tests and for small programs.

use std::{
    collections::{BTreeMap, BTreeSet},
    ops::ControlFlow,
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    constant::{DEFAULT_ENUMERATION_MAX_BITS, ENUMERATION_DEADLINE_CHECK_INTERVAL},
    expr::{visit, Array, Assignment, ExprKind, ExprRef},
    solver::{Error, Query, Result, Solver, Validity},
};

/// The configuration of the [`EnumerationSolver`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EnumerationConfig {
    /// The largest number of symbolic bits a query may depend on before the
    /// solver gives up on it.
    ///
    /// Defaults to [`DEFAULT_ENUMERATION_MAX_BITS`].
    pub max_symbolic_bits: u32,
}

impl EnumerationConfig {
    /// Sets the `max_symbolic_bits` config parameter to `value`.
    #[must_use]
    pub fn with_max_symbolic_bits(mut self, value: u32) -> Self {
        self.max_symbolic_bits = value;
        self
    }
}

impl Default for EnumerationConfig {
    fn default() -> Self {
        let max_symbolic_bits = DEFAULT_ENUMERATION_MAX_BITS;
        Self { max_symbolic_bits }
    }
}

/// A solver that tries every assignment of the symbolic bytes a query
/// depends on.
///
/// Before enumerating, the constraints are sliced down to those that share an
/// array with the expression of interest, so unrelated inputs do not count
/// towards the bit budget.
#[derive(Clone, Debug, Default)]
pub struct EnumerationSolver {
    config: EnumerationConfig,

    /// The number of assignments tried over the lifetime of the solver.
    assignments_tried: u64,
}

impl EnumerationSolver {
    /// Constructs a new solver with the provided `config`.
    #[must_use]
    pub fn new(config: EnumerationConfig) -> Self {
        let assignments_tried = 0;
        Self {
            config,
            assignments_tried,
        }
    }

    #[must_use]
    pub fn config(&self) -> &EnumerationConfig {
        &self.config
    }

    /// Gets the number of assignments tried over the lifetime of the solver.
    #[must_use]
    pub fn assignments_tried(&self) -> u64 {
        self.assignments_tried
    }

    /// Calls `visit` with every assignment that satisfies the constraints of
    /// `query` that are relevant to `query.expr` and `arrays`, until it
    /// breaks.
    ///
    /// Returns the assignment at which `visit` broke, if it did.
    fn enumerate(
        &mut self,
        query: &Query,
        arrays: &[Arc<Array>],
        mut visit: impl FnMut(&Assignment) -> ControlFlow<()>,
    ) -> Result<Option<Assignment>> {
        let constraints = relevant_constraints(query, arrays);
        let bytes = symbolic_bytes(constraints.iter().chain(std::iter::once(&query.expr)));

        let bits = bytes.values().map(|(_, indices)| indices.len() as u64 * 8).sum::<u64>();
        if bits > u64::from(self.config.max_symbolic_bits) {
            return Err(Error::Unsupported {
                solver: self.name().to_string(),
                reason: format!(
                    "query depends on {bits} symbolic bits but the limit is {}",
                    self.config.max_symbolic_bits
                ),
            });
        }

        let mut assignment = Assignment::new(true);
        let mut positions: Vec<(String, usize)> = Vec::new();
        for (name, (array, indices)) in &bytes {
            let size = usize::try_from(array.size()).map_err(|_| Error::Unsupported {
                solver: self.name().to_string(),
                reason: format!("array {name} is too large"),
            })?;
            assignment.bind(array, vec![0; size]);
            for index in indices {
                if let Ok(index) = usize::try_from(*index) {
                    positions.push((name.clone(), index));
                }
            }
        }

        let start = Instant::now();
        let mut iterations: u64 = 0;
        loop {
            if iterations % ENUMERATION_DEADLINE_CHECK_INTERVAL == 0 {
                check_deadline(start, query.timeout)?;
            }
            iterations += 1;
            self.assignments_tried += 1;

            if assignment.satisfies(&constraints) == Some(true) && visit(&assignment).is_break() {
                return Ok(Some(assignment));
            }

            if !advance(&mut assignment, &positions) {
                return Ok(None);
            }
        }
    }
}

impl Solver for EnumerationSolver {
    fn name(&self) -> &str {
        "enumeration"
    }

    fn evaluate(&mut self, query: &Query) -> Result<Validity> {
        let mut may_be_true = false;
        let mut may_be_false = false;
        self.enumerate(query, &[], |assignment| {
            match assignment.evaluate_concrete(&query.expr) {
                Some(0) => may_be_false = true,
                Some(_) => may_be_true = true,
                None => (),
            }
            if may_be_true && may_be_false {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;

        let validity = match (may_be_true, may_be_false) {
            (true, true) => Validity::Unknown,
            (false, true) => Validity::False,
            // Unsatisfiable constraints imply everything.
            (_, false) => Validity::True,
        };
        Ok(validity)
    }

    fn get_value(&mut self, query: &Query) -> Result<u64> {
        let solution = self.enumerate(query, &[], |_| ControlFlow::Break(()))?;
        solution
            .and_then(|assignment| assignment.evaluate_concrete(&query.expr))
            .ok_or(Error::Unsatisfiable)
    }

    fn get_initial_values(
        &mut self,
        query: &Query,
        arrays: &[Arc<Array>],
    ) -> Result<Option<Vec<Vec<u8>>>> {
        let solution = self.enumerate(query, arrays, |assignment| {
            if assignment.evaluate_concrete(&query.expr) == Some(0) {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;

        let Some(assignment) = solution else {
            return Ok(None);
        };
        let values = arrays
            .iter()
            .map(|array| match assignment.get(array.name()) {
                Some(bytes) => bytes.to_vec(),
                None => vec![0; usize::try_from(array.size()).unwrap_or(0)],
            })
            .collect();
        Ok(Some(values))
    }
}

/// Fails with a timeout if more than `timeout` has elapsed since `start`.
fn check_deadline(start: Instant, timeout: Option<Duration>) -> Result<()> {
    if let Some(timeout) = timeout {
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(Error::Timeout { elapsed });
        }
    }
    Ok(())
}

/// Moves `assignment` on to the next combination of the bytes at
/// `positions`, returning `false` once every combination has been visited.
fn advance(assignment: &mut Assignment, positions: &[(String, usize)]) -> bool {
    for (name, index) in positions {
        let Some(byte) = assignment.get_mut(name).and_then(|values| values.get_mut(*index)) else {
            continue;
        };
        *byte = byte.wrapping_add(1);
        if *byte != 0 {
            return true;
        }
    }
    false
}

/// Gets the constraints of `query` that transitively share a symbolic array
/// with `query.expr` or `arrays`.
fn relevant_constraints(query: &Query, arrays: &[Arc<Array>]) -> Vec<ExprRef> {
    let mut names: BTreeSet<String> = visit::collect_arrays([&query.expr])
        .iter()
        .chain(arrays)
        .map(|array| array.name().to_string())
        .collect();

    let mut pending: Vec<(ExprRef, BTreeSet<String>)> = query
        .constraints
        .iter()
        .map(|c| {
            let used = visit::collect_arrays([c]).iter().map(|a| a.name().to_string()).collect();
            (c.clone(), used)
        })
        .collect();

    let mut relevant = Vec::new();
    loop {
        let (connected, rest): (Vec<_>, Vec<_>) =
            pending.into_iter().partition(|(_, used)| !used.is_disjoint(&names));
        if connected.is_empty() {
            break;
        }
        for (constraint, used) in connected {
            names.extend(used);
            relevant.push(constraint);
        }
        pending = rest;
    }
    relevant
}

/// Gets the symbolic bytes that `exprs` read, keyed by array name.
///
/// A read at a symbolic index may touch any byte of its array, so it makes the
/// whole array relevant.
fn symbolic_bytes<'a>(
    exprs: impl IntoIterator<Item = &'a ExprRef>,
) -> BTreeMap<String, (Arc<Array>, BTreeSet<u64>)> {
    let mut bytes: BTreeMap<String, (Arc<Array>, BTreeSet<u64>)> = BTreeMap::new();
    visit::walk(exprs, |expr| {
        let ExprKind::Read { updates, index } = expr.kind() else {
            return;
        };
        let root = updates.root();
        if !root.is_symbolic() {
            return;
        }
        let (_, indices) = bytes
            .entry(root.name().to_string())
            .or_insert_with(|| (root.clone(), BTreeSet::new()));
        match index.as_constant() {
            Some(i) if i < root.size() => {
                indices.insert(i);
            }
            Some(_) => (),
            None => indices.extend(0..root.size()),
        }
    });
    bytes
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use crate::{
        expr::{Array, ConstraintSet, Expr, ExprRef, UpdateList},
        solver::{
            enumeration::{EnumerationConfig, EnumerationSolver},
            Error,
            Query,
            Solver,
            Validity,
        },
    };

    fn byte(array: &std::sync::Arc<Array>, index: u64) -> ExprRef {
        Expr::read(UpdateList::new(array.clone()), Expr::constant(index, 32))
    }

    #[test]
    fn evaluates_validity() -> anyhow::Result<()> {
        let x = Array::symbolic("x", 1);
        let mut solver = EnumerationSolver::default();
        let mut constraints = ConstraintSet::new();

        let below_ten = Expr::ult(byte(&x, 0), Expr::constant(10, 8));
        assert_eq!(solver.evaluate(&Query::new(&constraints, below_ten.clone()))?, Validity::Unknown);

        constraints.add(below_ten);
        let below_twenty = Expr::ult(byte(&x, 0), Expr::constant(20, 8));
        assert_eq!(solver.evaluate(&Query::new(&constraints, below_twenty))?, Validity::True);
        let above_fifty = Expr::ugt(byte(&x, 0), Expr::constant(50, 8));
        assert_eq!(solver.evaluate(&Query::new(&constraints, above_fifty))?, Validity::False);

        Ok(())
    }

    #[test]
    fn finds_values_and_initial_values() -> anyhow::Result<()> {
        let x = Array::symbolic("x", 2);
        let unused = Array::symbolic("unused", 3);
        let mut solver = EnumerationSolver::default();
        let mut constraints = ConstraintSet::new();
        constraints.add(Expr::eq(
            Expr::add(byte(&x, 1), Expr::constant(1, 8)),
            Expr::constant(5, 8),
        ));

        let value = solver.get_value(&Query::new(&constraints, byte(&x, 1)))?;
        assert_eq!(value, 4);

        let values = solver
            .get_initial_values(&Query::new(&constraints, Expr::bool(false)), &[x, unused])?
            .expect("constraints are satisfiable");
        assert_eq!(values, vec![vec![0, 4], vec![0, 0, 0]]);

        Ok(())
    }

    #[test]
    fn unrelated_constraints_do_not_count_towards_the_budget() -> anyhow::Result<()> {
        let x = Array::symbolic("x", 1);
        let big = Array::symbolic("big", 8);
        let mut constraints = ConstraintSet::new();
        for i in 0..8 {
            constraints.add(Expr::ne(byte(&big, i), Expr::constant(0, 8)));
        }
        let mut solver = EnumerationSolver::new(EnumerationConfig::default().with_max_symbolic_bits(8));

        let query = Query::new(&constraints, Expr::eq(byte(&x, 0), Expr::constant(3, 8)));
        assert_eq!(solver.evaluate(&query)?, Validity::Unknown);

        let query = Query::new(&constraints, Expr::eq(byte(&big, 0), Expr::constant(3, 8)));
        assert!(matches!(solver.evaluate(&query), Err(Error::Unsupported { .. })));

        Ok(())
    }

    #[test]
    fn reports_timeouts() {
        let x = Array::symbolic("x", 2);
        let mut solver = EnumerationSolver::default();
        let constraints = ConstraintSet::new();
        let query = Query::new(&constraints, Expr::eq(byte(&x, 0), byte(&x, 1)))
            .with_timeout(Some(Duration::ZERO));

        let result = solver.evaluate(&query);
        assert!(matches!(result, Err(e) if e.is_timeout()));
    }

    #[test]
    fn unsatisfiable_constraints_have_no_value() {
        let x = Array::symbolic("x", 1);
        let mut solver = EnumerationSolver::default();
        let mut constraints = ConstraintSet::new();
        constraints.add(Expr::ult(byte(&x, 0), Expr::constant(5, 8)));
        constraints.add(Expr::ugt(byte(&x, 0), Expr::constant(10, 8)));

        let result = solver.get_value(&Query::new(&constraints, byte(&x, 0)));
        assert_eq!(result, Err(Error::Unsatisfiable));
    }
}
