//! This module contains a persistent ordered map with constant-time cloning.
//!
//! The map is an AVL tree whose nodes are shared between clones through
//! reference counting. Any mutation copies only the nodes on the path from the
//! root to the mutated entry, leaving all other clones untouched.

use std::{cmp::Ordering, fmt::Debug, rc::Rc};

use derivative::Derivative;

/// A link to a subtree, which is empty when `None`.
type Link<K, V> = Option<Rc<Node<K, V>>>;

/// A single node in the tree.
#[derive(Clone, Debug)]
struct Node<K, V> {
    key:    K,
    value:  V,
    height: u32,
    left:   Link<K, V>,
    right:  Link<K, V>,
}

impl<K, V> Node<K, V> {
    fn leaf(key: K, value: V) -> Rc<Self> {
        let height = 1;
        Rc::new(Self {
            key,
            value,
            height,
            left:  None,
            right: None,
        })
    }
}

fn height<K, V>(link: &Link<K, V>) -> u32 {
    link.as_ref().map_or(0, |n| n.height)
}

/// A persistent, ordered map.
///
/// Cloning the map is `O(1)`, and lookups, insertions and removals are all
/// `O(log n)`. Mutation of a map never affects any of its clones.
#[derive(Derivative)]
#[derivative(Clone(bound = ""), Default(bound = ""))]
pub struct ImmutableMap<K, V> {
    root: Link<K, V>,
    len:  usize,
}

impl<K, V> ImmutableMap<K, V>
where
    K: Clone + Ord,
    V: Clone,
{
    /// Creates a new, empty, map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the number of entries in the map.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Checks if the map contains no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Gets the value associated with `key`, if present.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        let mut current = self.root.as_deref();
        while let Some(node) = current {
            current = match key.cmp(&node.key) {
                Ordering::Less => node.left.as_deref(),
                Ordering::Greater => node.right.as_deref(),
                Ordering::Equal => return Some(&node.value),
            }
        }
        None
    }

    /// Checks if the map has an entry for `key`.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Gets a mutable reference to the value associated with `key`.
    ///
    /// Every node on the path to the entry that is shared with another clone of
    /// the map is copied first, so the mutation is only visible through `self`.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        Self::get_mut_in(&mut self.root, key)
    }

    fn get_mut_in<'a>(link: &'a mut Link<K, V>, key: &K) -> Option<&'a mut V> {
        let node = Rc::make_mut(link.as_mut()?);
        match key.cmp(&node.key) {
            Ordering::Less => Self::get_mut_in(&mut node.left, key),
            Ordering::Greater => Self::get_mut_in(&mut node.right, key),
            Ordering::Equal => Some(&mut node.value),
        }
    }

    /// Inserts `value` at `key`, returning the previous value if one existed.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let (root, previous) = Self::insert_in(self.root.take(), key, value);
        self.root = Some(root);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    fn insert_in(link: Link<K, V>, key: K, value: V) -> (Rc<Node<K, V>>, Option<V>) {
        let Some(mut node) = link else {
            return (Node::leaf(key, value), None);
        };
        let inner = Rc::make_mut(&mut node);
        let previous = match key.cmp(&inner.key) {
            Ordering::Less => {
                let (child, previous) = Self::insert_in(inner.left.take(), key, value);
                inner.left = Some(child);
                previous
            }
            Ordering::Greater => {
                let (child, previous) = Self::insert_in(inner.right.take(), key, value);
                inner.right = Some(child);
                previous
            }
            Ordering::Equal => Some(std::mem::replace(&mut inner.value, value)),
        };
        (Self::rebalance(node), previous)
    }

    /// Removes the entry at `key`, returning its value if one existed.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let (root, removed) = Self::remove_in(self.root.take(), key);
        self.root = root;
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    fn remove_in(link: Link<K, V>, key: &K) -> (Link<K, V>, Option<V>) {
        let Some(mut node) = link else {
            return (None, None);
        };
        let inner = Rc::make_mut(&mut node);
        match key.cmp(&inner.key) {
            Ordering::Less => {
                let (child, removed) = Self::remove_in(inner.left.take(), key);
                inner.left = child;
                (Some(Self::rebalance(node)), removed)
            }
            Ordering::Greater => {
                let (child, removed) = Self::remove_in(inner.right.take(), key);
                inner.right = child;
                (Some(Self::rebalance(node)), removed)
            }
            Ordering::Equal => {
                let left = inner.left.take();
                let right = inner.right.take();
                let removed = inner.value.clone();
                let replacement = match (left, right) {
                    (None, None) => None,
                    (Some(child), None) | (None, Some(child)) => Some(child),
                    (Some(left), Some(right)) => {
                        let (rest, mut min) = Self::remove_min(right);
                        let min_inner = Rc::make_mut(&mut min);
                        min_inner.left = Some(left);
                        min_inner.right = rest;
                        Some(Self::rebalance(min))
                    }
                };
                (replacement, Some(removed))
            }
        }
    }

    /// Detaches the minimum node of the subtree, returning the remaining
    /// subtree and the detached node.
    fn remove_min(mut node: Rc<Node<K, V>>) -> (Link<K, V>, Rc<Node<K, V>>) {
        let inner = Rc::make_mut(&mut node);
        match inner.left.take() {
            None => {
                let rest = inner.right.take();
                (rest, node)
            }
            Some(left) => {
                let (rest, min) = Self::remove_min(left);
                inner.left = rest;
                (Some(Self::rebalance(node)), min)
            }
        }
    }

    fn rebalance(mut node: Rc<Node<K, V>>) -> Rc<Node<K, V>> {
        let inner = Rc::make_mut(&mut node);
        let left = height(&inner.left);
        let right = height(&inner.right);

        if left > right + 1 {
            let child = inner.left.as_ref().expect("left-heavy node has a left child");
            if height(&child.right) > height(&child.left) {
                let child = inner.left.take().expect("left-heavy node has a left child");
                inner.left = Some(Self::rotate_left(child));
            }
            return Self::rotate_right(node);
        }
        if right > left + 1 {
            let child = inner.right.as_ref().expect("right-heavy node has a right child");
            if height(&child.left) > height(&child.right) {
                let child = inner.right.take().expect("right-heavy node has a right child");
                inner.right = Some(Self::rotate_right(child));
            }
            return Self::rotate_left(node);
        }

        inner.height = 1 + left.max(right);
        node
    }

    fn rotate_right(mut node: Rc<Node<K, V>>) -> Rc<Node<K, V>> {
        let inner = Rc::make_mut(&mut node);
        let mut pivot = inner.left.take().expect("rotation requires a left child");
        let pivot_inner = Rc::make_mut(&mut pivot);
        inner.left = pivot_inner.right.take();
        inner.height = 1 + height(&inner.left).max(height(&inner.right));
        pivot_inner.right = Some(node);
        pivot_inner.height = 1 + height(&pivot_inner.left).max(height(&pivot_inner.right));
        pivot
    }

    fn rotate_left(mut node: Rc<Node<K, V>>) -> Rc<Node<K, V>> {
        let inner = Rc::make_mut(&mut node);
        let mut pivot = inner.right.take().expect("rotation requires a right child");
        let pivot_inner = Rc::make_mut(&mut pivot);
        inner.right = pivot_inner.left.take();
        inner.height = 1 + height(&inner.left).max(height(&inner.right));
        pivot_inner.left = Some(node);
        pivot_inner.height = 1 + height(&pivot_inner.left).max(height(&pivot_inner.right));
        pivot
    }

    /// Gets the entry with the greatest key that is less than or equal to
    /// `key`.
    #[must_use]
    pub fn lookup_previous(&self, key: &K) -> Option<(&K, &V)> {
        let mut current = self.root.as_deref();
        let mut best = None;
        while let Some(node) = current {
            match key.cmp(&node.key) {
                Ordering::Less => current = node.left.as_deref(),
                Ordering::Equal => return Some((&node.key, &node.value)),
                Ordering::Greater => {
                    best = Some((&node.key, &node.value));
                    current = node.right.as_deref();
                }
            }
        }
        best
    }

    /// Iterates over all entries in ascending key order.
    #[must_use]
    pub fn iter(&self) -> Iter<'_, K, V> {
        let mut iter = Iter {
            stack:     Vec::new(),
            ascending: true,
        };
        iter.push_spine(self.root.as_deref());
        iter
    }

    /// Iterates over the entries with keys less than or equal to `key`, in
    /// descending key order.
    #[must_use]
    pub fn iter_down_from(&self, key: &K) -> Iter<'_, K, V> {
        let mut stack = Vec::new();
        let mut current = self.root.as_deref();
        while let Some(node) = current {
            if node.key <= *key {
                stack.push(node);
                current = node.right.as_deref();
            } else {
                current = node.left.as_deref();
            }
        }
        Iter {
            stack,
            ascending: false,
        }
    }

    /// Iterates over the entries with keys strictly greater than `key`, in
    /// ascending key order.
    #[must_use]
    pub fn iter_up_after(&self, key: &K) -> Iter<'_, K, V> {
        let mut stack = Vec::new();
        let mut current = self.root.as_deref();
        while let Some(node) = current {
            if node.key > *key {
                stack.push(node);
                current = node.left.as_deref();
            } else {
                current = node.right.as_deref();
            }
        }
        Iter {
            stack,
            ascending: true,
        }
    }

    /// Iterates over the keys of the map in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(k, _)| k)
    }

    /// Iterates over the values of the map in ascending key order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, v)| v)
    }
}

impl<K, V> Debug for ImmutableMap<K, V>
where
    K: Clone + Ord + Debug,
    V: Clone + Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// An in-order iterator over an [`ImmutableMap`].
#[derive(Debug)]
pub struct Iter<'a, K, V> {
    stack:     Vec<&'a Node<K, V>>,
    ascending: bool,
}

impl<'a, K, V> Iter<'a, K, V> {
    fn push_spine(&mut self, mut current: Option<&'a Node<K, V>>) {
        while let Some(node) = current {
            self.stack.push(node);
            current = if self.ascending {
                node.left.as_deref()
            } else {
                node.right.as_deref()
            };
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        let next = if self.ascending {
            node.right.as_deref()
        } else {
            node.left.as_deref()
        };
        self.push_spine(next);
        Some((&node.key, &node.value))
    }
}

#[cfg(test)]
mod test {
    use itertools::Itertools;
    use proptest::prelude::*;

    use super::ImmutableMap;

    fn balanced<K, V>(link: &super::Link<K, V>) -> bool {
        match link {
            None => true,
            Some(node) => {
                let l = super::height(&node.left);
                let r = super::height(&node.right);
                l.abs_diff(r) <= 1
                    && node.height == 1 + l.max(r)
                    && balanced(&node.left)
                    && balanced(&node.right)
            }
        }
    }

    #[test]
    fn insert_get_and_remove() {
        let mut map = ImmutableMap::new();
        assert!(map.is_empty());

        assert_eq!(map.insert(3, "c"), None);
        assert_eq!(map.insert(1, "a"), None);
        assert_eq!(map.insert(2, "b"), None);
        assert_eq!(map.insert(2, "B"), Some("b"));
        assert_eq!(map.len(), 3);
        assert_eq!(map.get(&2), Some(&"B"));

        assert_eq!(map.remove(&1), Some("a"));
        assert_eq!(map.remove(&1), None);
        assert_eq!(map.len(), 2);
        assert_eq!(map.keys().copied().collect_vec(), vec![2, 3]);
    }

    #[test]
    fn clones_are_independent() {
        let mut original = ImmutableMap::new();
        for i in 0..32 {
            original.insert(i, i * 10);
        }
        let mut copy = original.clone();

        *copy.get_mut(&7).unwrap() = 0;
        copy.remove(&8);
        copy.insert(100, 1);

        assert_eq!(original.get(&7), Some(&70));
        assert_eq!(original.get(&8), Some(&80));
        assert!(!original.contains_key(&100));
        assert_eq!(original.len(), 32);

        assert_eq!(copy.get(&7), Some(&0));
        assert!(!copy.contains_key(&8));
        assert_eq!(copy.len(), 32);
    }

    #[test]
    fn lookup_previous_finds_floor() {
        let mut map = ImmutableMap::new();
        for k in [10, 20, 30] {
            map.insert(k, ());
        }

        assert_eq!(map.lookup_previous(&5), None);
        assert_eq!(map.lookup_previous(&10).map(|(k, _)| *k), Some(10));
        assert_eq!(map.lookup_previous(&25).map(|(k, _)| *k), Some(20));
        assert_eq!(map.lookup_previous(&99).map(|(k, _)| *k), Some(30));
    }

    #[test]
    fn directional_iteration() {
        let mut map = ImmutableMap::new();
        for k in (0..10).map(|k| k * 2) {
            map.insert(k, ());
        }

        let down = map.iter_down_from(&9).map(|(k, _)| *k).collect_vec();
        assert_eq!(down, vec![8, 6, 4, 2, 0]);

        let up = map.iter_up_after(&8).map(|(k, _)| *k).collect_vec();
        assert_eq!(up, vec![10, 12, 14, 16, 18]);

        let down_exact = map.iter_down_from(&8).map(|(k, _)| *k).collect_vec();
        assert_eq!(down_exact, vec![8, 6, 4, 2, 0]);
    }

    proptest! {
        #[test]
        fn behaves_like_btree_map(ops in prop::collection::vec((any::<bool>(), 0u8..64), 0..200)) {
            let mut map = ImmutableMap::new();
            let mut model = std::collections::BTreeMap::new();
            let snapshot = map.clone();

            for (insert, key) in ops {
                if insert {
                    prop_assert_eq!(map.insert(key, u32::from(key)), model.insert(key, u32::from(key)));
                } else {
                    prop_assert_eq!(map.remove(&key), model.remove(&key));
                }
                prop_assert!(balanced(&map.root));
            }

            prop_assert_eq!(map.len(), model.len());
            prop_assert_eq!(map.iter().map(|(k, v)| (*k, *v)).collect_vec(), model.into_iter().collect_vec());
            prop_assert!(snapshot.is_empty());
        }
    }
}
