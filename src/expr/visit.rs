//! This module contains traversals over expression DAGs.
//!
//! All traversals visit each shared node once, so their cost is linear in the
//! number of distinct nodes rather than in the size of the expanded tree.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::expr::{Array, Expr, ExprKind, ExprRef, UpdateList, UpdateNode};

/// Calls `visit` on every distinct node reachable from `roots`, including the
/// indices and values of the update lists of reads.
pub fn walk<'a>(roots: impl IntoIterator<Item = &'a ExprRef>, mut visit: impl FnMut(&ExprRef)) {
    let mut seen: FxHashSet<*const Expr> = FxHashSet::default();
    let mut seen_updates: FxHashSet<*const UpdateNode> = FxHashSet::default();
    let mut stack: Vec<ExprRef> = roots.into_iter().cloned().collect();

    while let Some(expr) = stack.pop() {
        if !seen.insert(Arc::as_ptr(&expr)) {
            continue;
        }
        visit(&expr);

        if let ExprKind::Read { updates, .. } = expr.kind() {
            for node in updates.iter() {
                if !seen_updates.insert(node as *const UpdateNode) {
                    break;
                }
                stack.push(node.index().clone());
                stack.push(node.value().clone());
            }
        }
        stack.extend(expr.children().into_iter().cloned());
    }
}

/// Collects the symbolic arrays read by `roots`, in order of discovery.
pub fn collect_arrays<'a>(roots: impl IntoIterator<Item = &'a ExprRef>) -> Vec<Arc<Array>> {
    let mut arrays: Vec<Arc<Array>> = Vec::new();
    walk(roots, |expr| {
        if let ExprKind::Read { updates, .. } = expr.kind() {
            let root = updates.root();
            if root.is_symbolic() && !arrays.iter().any(|a| a == root) {
                arrays.push(root.clone());
            }
        }
    });
    arrays
}

/// Rebuilds `expr` with each of its direct children (and the entries of the
/// update list of a read) replaced by the result of `f`.
///
/// The node itself is returned when no child changes. Rebuilt nodes go through
/// the simplifying constructors.
pub fn map_children(expr: &ExprRef, f: &mut impl FnMut(&ExprRef) -> ExprRef) -> ExprRef {
    let width = expr.width();
    match expr.kind() {
        ExprKind::Constant(_) => expr.clone(),
        ExprKind::Read { updates, index } => {
            let new_index = f(index);
            let new_updates = map_updates(updates, f);
            if Arc::ptr_eq(&new_index, index) && new_updates.is_none() {
                expr.clone()
            } else {
                Expr::read(new_updates.unwrap_or_else(|| updates.clone()), new_index)
            }
        }
        ExprKind::Select {
            condition,
            if_true,
            if_false,
        } => {
            let (c, t, e) = (f(condition), f(if_true), f(if_false));
            if Arc::ptr_eq(&c, condition) && Arc::ptr_eq(&t, if_true) && Arc::ptr_eq(&e, if_false) {
                expr.clone()
            } else {
                Expr::select(c, t, e)
            }
        }
        ExprKind::Concat { msb, lsb } => {
            let (m, l) = (f(msb), f(lsb));
            if Arc::ptr_eq(&m, msb) && Arc::ptr_eq(&l, lsb) {
                expr.clone()
            } else {
                Expr::concat(m, l)
            }
        }
        ExprKind::Extract {
            expr: inner,
            offset,
        } => unary(expr, inner, f, |e| Expr::extract(e, *offset, width)),
        ExprKind::ZExt(inner) => unary(expr, inner, f, |e| Expr::zext(e, width)),
        ExprKind::SExt(inner) => unary(expr, inner, f, |e| Expr::sext(e, width)),
        ExprKind::Not(inner) => unary(expr, inner, f, Expr::not),
        ExprKind::Binary { kind, lhs, rhs } => {
            let (l, r) = (f(lhs), f(rhs));
            if Arc::ptr_eq(&l, lhs) && Arc::ptr_eq(&r, rhs) {
                expr.clone()
            } else {
                Expr::binary(*kind, l, r)
            }
        }
        ExprKind::Compare { kind, lhs, rhs } => {
            let (l, r) = (f(lhs), f(rhs));
            if Arc::ptr_eq(&l, lhs) && Arc::ptr_eq(&r, rhs) {
                expr.clone()
            } else {
                Expr::compare(*kind, l, r)
            }
        }
    }
}

fn unary(
    expr: &ExprRef,
    inner: &ExprRef,
    f: &mut impl FnMut(&ExprRef) -> ExprRef,
    build: impl FnOnce(ExprRef) -> ExprRef,
) -> ExprRef {
    let new = f(inner);
    if Arc::ptr_eq(&new, inner) {
        expr.clone()
    } else {
        build(new)
    }
}

/// Maps the entries of an update list, returning `None` if nothing changed.
fn map_updates(
    updates: &UpdateList,
    f: &mut impl FnMut(&ExprRef) -> ExprRef,
) -> Option<UpdateList> {
    let mut changed = false;
    let mut entries = Vec::with_capacity(updates.len());
    for node in updates.iter() {
        let (index, value) = (f(node.index()), f(node.value()));
        changed |= !Arc::ptr_eq(&index, node.index()) || !Arc::ptr_eq(&value, node.value());
        entries.push((index, value));
    }
    if !changed {
        return None;
    }

    let mut rebuilt = UpdateList::new(updates.root().clone());
    for (index, value) in entries.into_iter().rev() {
        rebuilt.extend(index, value);
    }
    Some(rebuilt)
}

/// Replaces every occurrence of a key of `replacements` in `expr` by its
/// value, simplifying the result.
#[must_use]
pub fn replace(expr: &ExprRef, replacements: &FxHashMap<ExprRef, ExprRef>) -> ExprRef {
    let mut cache = FxHashMap::default();
    replace_in(expr, replacements, &mut cache)
}

fn replace_in(
    expr: &ExprRef,
    replacements: &FxHashMap<ExprRef, ExprRef>,
    cache: &mut FxHashMap<*const Expr, ExprRef>,
) -> ExprRef {
    if let Some(replacement) = replacements.get(expr) {
        return replacement.clone();
    }
    if expr.is_constant() {
        return expr.clone();
    }
    let key = Arc::as_ptr(expr);
    if let Some(done) = cache.get(&key) {
        return done.clone();
    }

    let result = map_children(expr, &mut |child| replace_in(child, replacements, cache));
    cache.insert(key, result.clone());
    result
}
