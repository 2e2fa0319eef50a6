//! This module contains the translation of expressions into SMT-LIB 2 terms
//! over the theory of fixed-size bit-vectors and arrays.
//!
//! Every expression, booleans included, is translated into a bit-vector term:
//! comparisons become `(ite .. #b1 #b0)` and conditions are tested against
//! `#b1`. Shared nodes are bound once with `define-fun`, so the size of the
//! emitted script is linear in the number of distinct nodes.

use std::{collections::BTreeMap, fmt::Write, sync::Arc};

use rustc_hash::FxHashMap;

use crate::{
    constant::ARRAY_INDEX_WIDTH_BITS,
    expr::{Array, BinaryKind, CompareKind, ExprKind, ExprRef, UpdateList, UpdateNode, Width},
};

/// The sort of the arrays that back symbolic reads.
pub const ARRAY_SORT: &str = "(Array (_ BitVec 32) (_ BitVec 8))";

/// Accumulates the declarations and definitions needed to refer to a set of
/// expressions in one solver scope.
#[derive(Debug, Default)]
pub struct Serializer {
    /// Declarations of the symbolic arrays.
    declarations: String,

    /// Definitions of the shared nodes, in dependency order.
    definitions: String,

    exprs:   FxHashMap<ExprRef, String>,
    updates: FxHashMap<(String, Arc<UpdateNode>), String>,
    roots:   FxHashMap<Arc<Array>, String>,

    /// The symbolic arrays declared so far, by name.
    symbolic: BTreeMap<String, Arc<Array>>,

    next_id: usize,
}

impl Serializer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the term for the bit-vector `expr`, defining any nodes it needs
    /// first.
    pub fn term(&mut self, expr: &ExprRef) -> String {
        if let Some(value) = expr.as_constant() {
            return literal(value, expr.width());
        }
        if let Some(name) = self.exprs.get(expr) {
            return name.clone();
        }

        let body = self.body(expr);
        let name = self.fresh("e");
        let _ = writeln!(
            self.definitions,
            "(define-fun {name} () (_ BitVec {}) {body})",
            expr.width()
        );
        self.exprs.insert(expr.clone(), name.clone());
        name
    }

    /// Gets a boolean term stating that the bit-vector `expr` is `#b1`.
    pub fn assertion(&mut self, expr: &ExprRef) -> String {
        let term = self.term(expr);
        format!("(= {term} #b1)")
    }

    /// Gets the term for the whole symbolic `array`, declaring it if needed.
    pub fn array(&mut self, array: &Arc<Array>) -> String {
        self.root(array)
    }

    /// Gets the scripts declaring and defining everything referred to so far.
    #[must_use]
    pub fn preamble(&self) -> String {
        format!("{}{}", self.declarations, self.definitions)
    }

    /// Gets the symbolic arrays referred to so far.
    pub fn symbolic_arrays(&self) -> impl Iterator<Item = &Arc<Array>> {
        self.symbolic.values()
    }

    fn fresh(&mut self, prefix: &str) -> String {
        let name = format!("!{prefix}{}", self.next_id);
        self.next_id += 1;
        name
    }

    fn body(&mut self, expr: &ExprRef) -> String {
        let width = expr.width();
        match expr.kind() {
            ExprKind::Constant(value) => literal(*value, width),
            ExprKind::Read { updates, index } => {
                let array = self.updates(updates);
                let index = self.term(index);
                format!("(select {array} {index})")
            }
            ExprKind::Select {
                condition,
                if_true,
                if_false,
            } => {
                let condition = self.term(condition);
                let if_true = self.term(if_true);
                let if_false = self.term(if_false);
                format!("(ite (= {condition} #b1) {if_true} {if_false})")
            }
            ExprKind::Concat { msb, lsb } => {
                let msb = self.term(msb);
                let lsb = self.term(lsb);
                format!("(concat {msb} {lsb})")
            }
            ExprKind::Extract { expr: inner, offset } => {
                let inner = self.term(inner);
                let high = offset + width - 1;
                format!("((_ extract {high} {offset}) {inner})")
            }
            ExprKind::ZExt(inner) => {
                let by = width - inner.width();
                let inner = self.term(inner);
                format!("((_ zero_extend {by}) {inner})")
            }
            ExprKind::SExt(inner) => {
                let by = width - inner.width();
                let inner = self.term(inner);
                format!("((_ sign_extend {by}) {inner})")
            }
            ExprKind::Not(inner) => {
                let inner = self.term(inner);
                format!("(bvnot {inner})")
            }
            ExprKind::Binary { kind, lhs, rhs } => {
                let lhs = self.term(lhs);
                let rhs = self.term(rhs);
                format!("({} {lhs} {rhs})", binary_operator(*kind))
            }
            ExprKind::Compare { kind, lhs, rhs } => {
                let lhs = self.term(lhs);
                let rhs = self.term(rhs);
                format!("(ite ({} {lhs} {rhs}) #b1 #b0)", compare_operator(*kind))
            }
        }
    }

    /// Gets the array term for `updates`, defining one array per write.
    fn updates(&mut self, updates: &UpdateList) -> String {
        let root = self.root(updates.root());

        let mut nodes = Vec::with_capacity(updates.len());
        let mut cursor = updates.head();
        while let Some(node) = cursor {
            if let Some(name) = self.updates.get(&(root.clone(), node.clone())) {
                nodes.push(Err(name.clone()));
                break;
            }
            nodes.push(Ok(node.clone()));
            cursor = node.next();
        }

        let mut current = root.clone();
        for entry in nodes.into_iter().rev() {
            match entry {
                Err(name) => current = name,
                Ok(node) => {
                    let index = self.term(node.index());
                    let value = self.term(node.value());
                    let name = self.fresh("u");
                    let _ = writeln!(
                        self.definitions,
                        "(define-fun {name} () {ARRAY_SORT} (store {current} {index} {value}))"
                    );
                    self.updates.insert((root.clone(), node), name.clone());
                    current = name;
                }
            }
        }
        current
    }

    /// Gets the term for the root array `array`.
    fn root(&mut self, array: &Arc<Array>) -> String {
        if let Some(name) = self.roots.get(array) {
            return name.clone();
        }

        let name = match array.constant_values() {
            None => {
                let name = symbol(array.name());
                let _ = writeln!(self.declarations, "(declare-const {name} {ARRAY_SORT})");
                self.symbolic.insert(array.name().to_string(), array.clone());
                name
            }
            Some(values) => {
                let mut body = format!("((as const {ARRAY_SORT}) #x00)");
                for (index, byte) in values.iter().enumerate().filter(|(_, b)| **b != 0) {
                    body = format!(
                        "(store {body} {} {})",
                        literal(index as u64, ARRAY_INDEX_WIDTH_BITS),
                        literal(u64::from(*byte), 8)
                    );
                }
                let name = self.fresh("c");
                let _ = writeln!(self.definitions, "(define-fun {name} () {ARRAY_SORT} {body})");
                name
            }
        };
        self.roots.insert(array.clone(), name.clone());
        name
    }
}

/// Gets the bit-vector literal of `value` at `width`.
#[must_use]
pub fn literal(value: u64, width: Width) -> String {
    format!("(_ bv{value} {width})")
}

/// Gets the quoted SMT-LIB symbol for the symbolic array named `name`.
///
/// Names are prefixed so they can never clash with the names of definitions.
#[must_use]
pub fn symbol(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c == '|' || c == '\\' { '_' } else { c })
        .collect();
    format!("|in_{cleaned}|")
}

fn binary_operator(kind: BinaryKind) -> &'static str {
    match kind {
        BinaryKind::Add => "bvadd",
        BinaryKind::Sub => "bvsub",
        BinaryKind::Mul => "bvmul",
        BinaryKind::UDiv => "bvudiv",
        BinaryKind::SDiv => "bvsdiv",
        BinaryKind::URem => "bvurem",
        BinaryKind::SRem => "bvsrem",
        BinaryKind::And => "bvand",
        BinaryKind::Or => "bvor",
        BinaryKind::Xor => "bvxor",
        BinaryKind::Shl => "bvshl",
        BinaryKind::LShr => "bvlshr",
        BinaryKind::AShr => "bvashr",
    }
}

fn compare_operator(kind: CompareKind) -> &'static str {
    match kind {
        CompareKind::Eq => "=",
        CompareKind::Ult => "bvult",
        CompareKind::Ule => "bvule",
        CompareKind::Slt => "bvslt",
        CompareKind::Sle => "bvsle",
    }
}

#[cfg(test)]
mod test {
    use crate::{
        expr::{Array, Expr, UpdateList},
        solver::smtlib::serialize::Serializer,
    };

    #[test]
    fn shared_nodes_are_defined_once() {
        let x = Expr::read(UpdateList::new(Array::symbolic("x", 1)), Expr::constant(0, 32));
        let sum = Expr::add(x.clone(), Expr::constant(1, 8));
        let condition = Expr::ult(sum.clone(), Expr::mul(sum, x));

        let mut serializer = Serializer::new();
        let assertion = serializer.assertion(&condition);
        let preamble = serializer.preamble();

        assert_eq!(assertion, "(= !e3 #b1)");
        assert_eq!(
            preamble,
            "(declare-const |in_x| (Array (_ BitVec 32) (_ BitVec 8)))\n(define-fun !e0 () (_ \
             BitVec 8) (select |in_x| (_ bv0 32)))\n(define-fun !e1 () (_ BitVec 8) (bvadd (_ \
             bv1 8) !e0))\n(define-fun !e2 () (_ BitVec 8) (bvmul !e1 !e0))\n(define-fun !e3 () \
             (_ BitVec 1) (ite (bvult !e1 !e2) #b1 #b0))\n"
        );
    }

    #[test]
    fn updates_are_stored_over_constant_roots() {
        let mut updates = UpdateList::new(Array::constant("mem", vec![0, 7]));
        let index = Expr::zext(
            Expr::read(UpdateList::new(Array::symbolic("i", 1)), Expr::constant(0, 32)),
            32,
        );
        updates.extend(index.clone(), Expr::constant(9, 8));
        let read = Expr::read(updates, index);

        let mut serializer = Serializer::new();
        serializer.term(&read);
        let preamble = serializer.preamble();

        assert!(preamble.contains(
            "() (Array (_ BitVec 32) (_ BitVec 8)) (store ((as const (Array (_ BitVec 32) (_ \
             BitVec 8))) #x00) (_ bv1 32) (_ bv7 8)))"
        ));
        assert!(preamble.contains("(store !c"));
        assert_eq!(serializer.symbolic_arrays().count(), 1);
    }
}
