//! This module contains concrete assignments of bytes to symbolic arrays, and
//! the evaluation of expressions under them.

use std::{collections::BTreeMap, sync::Arc};

use rustc_hash::FxHashMap;

use crate::expr::{
    builder::{fold_binary, fold_compare},
    mask,
    to_signed,
    visit,
    Array,
    Expr,
    ExprKind,
    ExprRef,
    UpdateList,
    INT8,
};

/// A binding of symbolic array names to concrete contents.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Assignment {
    bindings:          BTreeMap<String, Vec<u8>>,
    allow_free_values: bool,
}

impl Assignment {
    /// Creates an empty assignment.
    ///
    /// When `allow_free_values` is set, bytes of arrays that are not bound
    /// evaluate to zero instead of leaving the expression undetermined.
    #[must_use]
    pub fn new(allow_free_values: bool) -> Self {
        let bindings = BTreeMap::new();
        Self {
            bindings,
            allow_free_values,
        }
    }

    /// Binds `array` to `values`, replacing any previous binding.
    pub fn bind(&mut self, array: &Array, values: Vec<u8>) {
        self.bindings.insert(array.name().to_string(), values);
    }

    /// Gets the binding for the array named `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.bindings.get(name).map(Vec::as_slice)
    }

    /// Gets a mutable handle to the binding for the array named `name`.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Vec<u8>> {
        self.bindings.get_mut(name)
    }

    /// Iterates over all bindings in name order.
    pub fn bindings(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.bindings.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Gets the value of byte `index` of `array`.
    fn byte(&self, array: &Array, index: u64) -> Option<u8> {
        if let Some(byte) = array.constant_byte(index) {
            return Some(byte);
        }
        let bound = self
            .bindings
            .get(array.name())
            .and_then(|values| usize::try_from(index).ok().and_then(|i| values.get(i)))
            .copied();
        match bound {
            Some(byte) => Some(byte),
            None if self.allow_free_values => Some(0),
            None => None,
        }
    }

    /// Partially evaluates `expr`, replacing every read that the assignment
    /// determines with its value.
    #[must_use]
    pub fn evaluate(&self, expr: &ExprRef) -> ExprRef {
        let mut cache = FxHashMap::default();
        self.evaluate_in(expr, &mut cache)
    }

    fn evaluate_in(&self, expr: &ExprRef, cache: &mut FxHashMap<*const Expr, ExprRef>) -> ExprRef {
        if expr.is_constant() {
            return expr.clone();
        }
        let key = Arc::as_ptr(expr);
        if let Some(done) = cache.get(&key) {
            return done.clone();
        }

        let rebuilt = visit::map_children(expr, &mut |child| self.evaluate_in(child, cache));
        let result = match rebuilt.kind() {
            ExprKind::Read { updates, index } => match index.as_constant() {
                Some(i) => self.read_through(updates, i).unwrap_or_else(|| rebuilt.clone()),
                None => rebuilt.clone(),
            },
            _ => rebuilt.clone(),
        };
        cache.insert(key, result.clone());
        result
    }

    /// Resolves a read at the concrete `index` whose update list has already
    /// been evaluated.
    fn read_through(&self, updates: &UpdateList, index: u64) -> Option<ExprRef> {
        for node in updates.iter() {
            match node.index().as_constant() {
                Some(i) if i == index => return Some(node.value().clone()),
                Some(_) => (),
                None => return None,
            }
        }
        self.byte(updates.root(), index)
            .map(|b| Expr::constant(u64::from(b), INT8))
    }

    /// Fully evaluates `expr` to a concrete value.
    ///
    /// Returns `None` if the value depends on a byte the assignment does not
    /// bind, which never happens when free values are allowed.
    #[must_use]
    pub fn evaluate_concrete(&self, expr: &ExprRef) -> Option<u64> {
        let mut cache = FxHashMap::default();
        self.concrete_in(expr, &mut cache)
    }

    fn concrete_in(&self, expr: &ExprRef, cache: &mut FxHashMap<*const Expr, u64>) -> Option<u64> {
        if let Some(value) = expr.as_constant() {
            return Some(value);
        }
        let key = Arc::as_ptr(expr);
        if let Some(value) = cache.get(&key) {
            return Some(*value);
        }

        let width = expr.width();
        let value = match expr.kind() {
            ExprKind::Constant(value) => *value,
            ExprKind::Read { updates, index } => {
                let index = self.concrete_in(index, cache)?;
                self.read_concrete(updates, index, cache)?
            }
            ExprKind::Select {
                condition,
                if_true,
                if_false,
            } => {
                if self.concrete_in(condition, cache)? == 0 {
                    self.concrete_in(if_false, cache)?
                } else {
                    self.concrete_in(if_true, cache)?
                }
            }
            ExprKind::Concat { msb, lsb } => {
                (self.concrete_in(msb, cache)? << lsb.width()) | self.concrete_in(lsb, cache)?
            }
            ExprKind::Extract { expr: inner, offset } => {
                (self.concrete_in(inner, cache)? >> offset) & mask(width)
            }
            ExprKind::ZExt(inner) => self.concrete_in(inner, cache)?,
            ExprKind::SExt(inner) => {
                to_signed(self.concrete_in(inner, cache)?, inner.width()) as u64 & mask(width)
            }
            ExprKind::Not(inner) => !self.concrete_in(inner, cache)? & mask(width),
            ExprKind::Binary { kind, lhs, rhs } => {
                let l = self.concrete_in(lhs, cache)?;
                let r = self.concrete_in(rhs, cache)?;
                fold_binary(*kind, l, r, width)
            }
            ExprKind::Compare { kind, lhs, rhs } => {
                let l = self.concrete_in(lhs, cache)?;
                let r = self.concrete_in(rhs, cache)?;
                u64::from(fold_compare(*kind, l, r, lhs.width()))
            }
        };

        cache.insert(key, value);
        Some(value)
    }

    fn read_concrete(
        &self,
        updates: &UpdateList,
        index: u64,
        cache: &mut FxHashMap<*const Expr, u64>,
    ) -> Option<u64> {
        for node in updates.iter() {
            if self.concrete_in(node.index(), cache)? == index {
                return self.concrete_in(node.value(), cache);
            }
        }
        self.byte(updates.root(), index).map(u64::from)
    }

    /// Checks whether every one of `constraints` holds under the assignment.
    ///
    /// Returns `None` if any constraint is undetermined.
    #[must_use]
    pub fn satisfies<'a>(&self, constraints: impl IntoIterator<Item = &'a ExprRef>) -> Option<bool> {
        let mut cache = FxHashMap::default();
        for constraint in constraints {
            if self.concrete_in(constraint, &mut cache)? == 0 {
                return Some(false);
            }
        }
        Some(true)
    }
}

#[cfg(test)]
mod test {
    use crate::expr::{Array, Assignment, Expr, UpdateList};

    #[test]
    fn evaluates_reads_through_symbolic_updates() {
        let input = Array::symbolic("input", 2);
        let index = Expr::zext(Expr::read(UpdateList::new(input.clone()), Expr::constant(0, 32)), 32);

        let mut updates = UpdateList::new(Array::constant("mem", vec![10, 20, 30]));
        updates.extend(index, Expr::constant(99, 8));
        let read = Expr::read(updates, Expr::constant(1, 32));

        let mut assignment = Assignment::new(false);
        assignment.bind(&input, vec![1, 0]);
        assert_eq!(assignment.evaluate_concrete(&read), Some(99));
        assert_eq!(assignment.evaluate(&read).as_constant(), Some(99));

        assignment.bind(&input, vec![2, 0]);
        assert_eq!(assignment.evaluate_concrete(&read), Some(20));
    }

    #[test]
    fn unbound_arrays_are_undetermined_unless_free() {
        let x = Expr::read(UpdateList::new(Array::symbolic("x", 1)), Expr::constant(0, 32));
        let strict = Assignment::new(false);
        assert_eq!(strict.evaluate_concrete(&x), None);
        assert_eq!(strict.evaluate(&x), x);

        let free = Assignment::new(true);
        assert_eq!(free.evaluate_concrete(&x), Some(0));
    }

    #[test]
    fn checks_constraints() {
        let array = Array::symbolic("x", 1);
        let x = Expr::read(UpdateList::new(array.clone()), Expr::constant(0, 32));
        let c = Expr::ult(x, Expr::constant(10, 8));

        let mut assignment = Assignment::new(false);
        assignment.bind(&array, vec![3]);
        assert_eq!(assignment.satisfies([&c]), Some(true));
        assignment.bind(&array, vec![30]);
        assert_eq!(assignment.satisfies([&c]), Some(false));
    }
}
