//! This module contains the arrays that symbolic reads are made from, and the
//! update lists that layer writes on top of them.

use std::{
    hash::{Hash, Hasher},
    sync::Arc,
};

use rustc_hash::FxHasher;

use crate::{
    constant::ARRAY_INDEX_WIDTH_BITS,
    expr::{Expr, ExprRef, INT8},
};

/// A named array of bytes.
///
/// Symbolic arrays stand for program inputs, while arrays with constant
/// contents are the roots that concrete object contents are flushed to.
#[derive(Clone, Debug)]
pub struct Array {
    name:            String,
    size:            u64,
    constant_values: Option<Vec<u8>>,
    hash:            u64,
}

impl Array {
    fn make(name: String, size: u64, constant_values: Option<Vec<u8>>) -> Arc<Self> {
        let mut hasher = FxHasher::default();
        name.hash(&mut hasher);
        size.hash(&mut hasher);
        constant_values.hash(&mut hasher);
        let hash = hasher.finish();
        Arc::new(Self {
            name,
            size,
            constant_values,
            hash,
        })
    }

    /// Creates a new symbolic array of `size` bytes.
    #[must_use]
    pub fn symbolic(name: impl Into<String>, size: u64) -> Arc<Self> {
        Self::make(name.into(), size, None)
    }

    /// Creates a new array whose contents are the provided `values`.
    #[must_use]
    pub fn constant(name: impl Into<String>, values: Vec<u8>) -> Arc<Self> {
        let size = values.len() as u64;
        Self::make(name.into(), size, Some(values))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Checks if the contents of the array are unknown.
    #[must_use]
    pub fn is_symbolic(&self) -> bool {
        self.constant_values.is_none()
    }

    /// Gets the contents of a constant array.
    #[must_use]
    pub fn constant_values(&self) -> Option<&[u8]> {
        self.constant_values.as_deref()
    }

    /// Gets the byte at `index` if the array is constant and the index is in
    /// bounds.
    #[must_use]
    pub fn constant_byte(&self, index: u64) -> Option<u8> {
        let values = self.constant_values.as_ref()?;
        usize::try_from(index).ok().and_then(|i| values.get(i).copied())
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.name == other.name
            && self.size == other.size
            && self.constant_values == other.constant_values
    }
}

impl Eq for Array {}

impl Hash for Array {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

/// A single write in an [`UpdateList`].
#[derive(Debug)]
pub struct UpdateNode {
    index: ExprRef,
    value: ExprRef,
    next:  Option<Arc<UpdateNode>>,
    len:   usize,
    hash:  u64,
}

impl UpdateNode {
    /// Gets the index written to.
    #[must_use]
    pub fn index(&self) -> &ExprRef {
        &self.index
    }

    /// Gets the byte written.
    #[must_use]
    pub fn value(&self) -> &ExprRef {
        &self.value
    }

    /// Gets the write that precedes this one.
    #[must_use]
    pub fn next(&self) -> Option<&Arc<UpdateNode>> {
        self.next.as_ref()
    }
}

impl PartialEq for UpdateNode {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.len == other.len
            && self.index == other.index
            && self.value == other.value
            && self.next == other.next
    }
}

impl Eq for UpdateNode {}

impl Hash for UpdateNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

// Long chains would otherwise be dropped recursively.
impl Drop for UpdateNode {
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(node) = next {
            match Arc::try_unwrap(node) {
                Ok(mut node) => next = node.next.take(),
                Err(_) => break,
            }
        }
    }
}

/// An ordered list of byte writes layered over a root array.
///
/// The list is persistent: extending it never affects other holders of the
/// same list, which share all of the older writes.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct UpdateList {
    root: Arc<Array>,
    head: Option<Arc<UpdateNode>>,
}

impl UpdateList {
    /// Creates an empty update list over `root`.
    #[must_use]
    pub fn new(root: Arc<Array>) -> Self {
        Self { root, head: None }
    }

    #[must_use]
    pub fn root(&self) -> &Arc<Array> {
        &self.root
    }

    /// Gets the most recent write.
    #[must_use]
    pub fn head(&self) -> Option<&Arc<UpdateNode>> {
        self.head.as_ref()
    }

    /// Gets the number of writes in the list.
    #[must_use]
    pub fn len(&self) -> usize {
        self.head.as_ref().map_or(0, |n| n.len)
    }

    /// Checks if the list contains no writes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Records a write of the byte `value` at `index`.
    ///
    /// # Panics
    ///
    /// If `index` is not a 32-bit expression or `value` is not a byte.
    pub fn extend(&mut self, index: ExprRef, value: ExprRef) {
        assert_eq!(index.width(), ARRAY_INDEX_WIDTH_BITS, "update index width");
        assert_eq!(value.width(), INT8, "update value width");

        let next = self.head.take();
        let len = next.as_ref().map_or(0, |n| n.len) + 1;
        let mut hasher = FxHasher::default();
        index.hash(&mut hasher);
        value.hash(&mut hasher);
        next.hash(&mut hasher);
        let hash = hasher.finish();

        self.head = Some(Arc::new(UpdateNode {
            index,
            value,
            next,
            len,
            hash,
        }));
    }

    /// Records a write of `value` at the concrete `index`.
    pub fn extend_concrete(&mut self, index: u64, value: ExprRef) {
        self.extend(Expr::constant(index, ARRAY_INDEX_WIDTH_BITS), value);
    }

    /// Iterates over the writes from newest to oldest.
    pub fn iter(&self) -> impl Iterator<Item = &UpdateNode> {
        std::iter::successors(self.head.as_deref(), |n| n.next.as_deref())
    }
}

#[cfg(test)]
mod test {
    use crate::expr::{array::UpdateList, Array, Expr};

    #[test]
    fn extending_is_persistent() {
        let root = Array::symbolic("input", 4);
        let mut first = UpdateList::new(root);
        first.extend_concrete(0, Expr::constant(1, 8));
        let mut second = first.clone();
        second.extend_concrete(1, Expr::constant(2, 8));

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 2);
        assert_ne!(first, second);
        assert_eq!(
            second.iter().map(|n| n.index().as_constant()).collect::<Vec<_>>(),
            vec![Some(1), Some(0)]
        );
    }

    #[test]
    fn long_lists_drop_without_recursion() {
        let mut updates = UpdateList::new(Array::symbolic("big", 1));
        for _ in 0..200_000 {
            updates.extend_concrete(0, Expr::constant(0, 8));
        }
        drop(updates);
    }

    #[test]
    fn constant_arrays_expose_their_bytes() {
        let array = Array::constant("c", vec![1, 2, 3]);
        assert!(!array.is_symbolic());
        assert_eq!(array.constant_byte(2), Some(3));
        assert_eq!(array.constant_byte(3), None);
        assert!(Array::symbolic("s", 3).constant_byte(0).is_none());
    }
}
