//! This module contains the path constraints accumulated by an execution
//! state.

use rustc_hash::FxHashMap;

use crate::expr::{visit, BinaryKind, CompareKind, Expr, ExprKind, ExprRef, BOOL};

/// An ordered conjunction of boolean constraints.
///
/// The set also maintains a table of known equalities, used to simplify both
/// newly added constraints and queries. A constraint `c == x` for a constant
/// `c` lets every occurrence of `x` be replaced by `c`, while any other
/// constraint `e` lets occurrences of `e` be replaced by `true`.
#[derive(Clone, Debug, Default)]
pub struct ConstraintSet {
    constraints: Vec<ExprRef>,
    equalities:  FxHashMap<ExprRef, ExprRef>,
}

impl ConstraintSet {
    /// Creates an empty set of constraints.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the number of constraints in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Iterates over the constraints in the order they were added.
    pub fn iter(&self) -> impl Iterator<Item = &ExprRef> {
        self.constraints.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[ExprRef] {
        &self.constraints
    }

    /// Simplifies `expr` using the equalities implied by the constraints.
    #[must_use]
    pub fn simplify_expr(&self, expr: &ExprRef) -> ExprRef {
        if expr.is_constant() || self.equalities.is_empty() {
            return expr.clone();
        }
        visit::replace(expr, &self.equalities)
    }

    /// Adds `constraint` to the set.
    ///
    /// Conjunctions are split into their parts and constraints that simplify
    /// to `true` are dropped.
    ///
    /// # Panics
    ///
    /// If `constraint` is not boolean or simplifies to `false`, as adding it
    /// would make the path infeasible. Callers must check feasibility first.
    pub fn add(&mut self, constraint: ExprRef) {
        assert_eq!(constraint.width(), BOOL, "constraints must be boolean");
        let constraint = self.simplify_expr(&constraint);
        self.add_simplified(constraint);
    }

    fn add_simplified(&mut self, constraint: ExprRef) {
        if let Some(value) = constraint.as_constant() {
            assert_ne!(value, 0, "attempt to add an infeasible constraint");
            return;
        }

        match constraint.kind() {
            ExprKind::Binary {
                kind: BinaryKind::And,
                lhs,
                rhs,
            } => {
                let (lhs, rhs) = (lhs.clone(), rhs.clone());
                self.add(lhs);
                self.add(rhs);
                return;
            }
            ExprKind::Compare {
                kind: CompareKind::Eq,
                lhs,
                rhs,
            } if lhs.is_constant() => {
                let (value, target) = (lhs.clone(), rhs.clone());
                self.rewrite(&target, &value);
                self.equalities.insert(target, value);
            }
            _ => {
                self.equalities.insert(constraint.clone(), Expr::bool(true));
            }
        }
        self.constraints.push(constraint);
    }

    /// Substitutes `value` for `target` in every existing constraint.
    fn rewrite(&mut self, target: &ExprRef, value: &ExprRef) {
        let mut substitution = FxHashMap::default();
        substitution.insert(target.clone(), value.clone());

        let old = std::mem::take(&mut self.constraints);
        let mut changed = Vec::new();
        let mut kept = Vec::with_capacity(old.len());
        for constraint in old {
            let rewritten = visit::replace(&constraint, &substitution);
            if rewritten == constraint {
                kept.push(constraint);
            } else {
                self.forget(&constraint);
                changed.push(rewritten);
            }
        }

        self.constraints = kept;
        for constraint in changed {
            self.add(constraint);
        }
    }

    /// Removes the equality recorded for `constraint`.
    fn forget(&mut self, constraint: &ExprRef) {
        match constraint.kind() {
            ExprKind::Compare {
                kind: CompareKind::Eq,
                lhs,
                rhs,
            } if lhs.is_constant() => {
                self.equalities.remove(rhs);
            }
            _ => {
                self.equalities.remove(constraint);
            }
        }
    }
}

impl<'a> IntoIterator for &'a ConstraintSet {
    type IntoIter = std::slice::Iter<'a, ExprRef>;
    type Item = &'a ExprRef;

    fn into_iter(self) -> Self::IntoIter {
        self.constraints.iter()
    }
}

#[cfg(test)]
mod test {
    use crate::expr::{Array, ConstraintSet, Expr, ExprRef, UpdateList};

    fn byte(name: &str) -> ExprRef {
        Expr::read(UpdateList::new(Array::symbolic(name, 1)), Expr::constant(0, 32))
    }

    #[test]
    fn conjunctions_are_split() {
        let (x, y) = (byte("x"), byte("y"));
        let mut set = ConstraintSet::new();
        set.add(Expr::and(
            Expr::ult(x.clone(), Expr::constant(3, 8)),
            Expr::ult(y.clone(), Expr::constant(4, 8)),
        ));
        assert_eq!(set.len(), 2);
        assert!(set.simplify_expr(&Expr::ult(x, Expr::constant(3, 8))).is_true());
    }

    #[test]
    fn equalities_substitute_values() {
        let x = byte("x");
        let mut set = ConstraintSet::new();
        set.add(Expr::ult(x.clone(), Expr::constant(100, 8)));
        set.add(Expr::eq(Expr::constant(7, 8), x.clone()));

        // The earlier constraint is rewritten into a tautology and dropped.
        assert_eq!(set.len(), 1);
        let query = Expr::add(x, Expr::constant(1, 8));
        assert_eq!(set.simplify_expr(&query).as_constant(), Some(8));
    }

    #[test]
    fn true_constraints_are_ignored() {
        let mut set = ConstraintSet::new();
        set.add(Expr::bool(true));
        assert!(set.is_empty());
    }

    #[test]
    #[should_panic(expected = "infeasible")]
    fn false_constraints_are_rejected() {
        let mut set = ConstraintSet::new();
        set.add(Expr::bool(false));
    }
}
