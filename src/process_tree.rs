//! This module contains the process tree, which records how the execution
//! states of a run descend from one another.
//!
//! Every live state sits at a leaf of the tree. Forking a state turns its leaf
//! into an inner node with one leaf per resulting state, while merging two
//! states creates a leaf below both of their nodes, so that the lineage of the
//! merged state includes both of its origins. Terminated states are removed
//! together with any inner node that no longer leads to a live state.

use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter},
};

use crate::vm::state::StateId;

/// The identifier of a node in the process tree.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NodeId(pub usize);

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "node{}", self.0)
    }
}

/// A node of the process tree.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Node {
    /// The nodes the node descends from: none for the root, one after a fork,
    /// and two after a merge.
    pub parents: Vec<NodeId>,

    pub children: Vec<NodeId>,

    /// The state at this node, which is only set for leaves.
    pub state: Option<StateId>,
}

/// The ancestry of the execution states of a run.
#[derive(Clone, Debug)]
pub struct ProcessTree {
    /// The nodes of the tree, where removed nodes leave a hole.
    nodes: Vec<Option<Node>>,

    root: NodeId,
}

impl ProcessTree {
    /// Creates a tree whose only node holds the initial `state`.
    #[must_use]
    pub fn new(state: StateId) -> Self {
        let root = Node {
            parents:  vec![],
            children: vec![],
            state:    Some(state),
        };
        let nodes = vec![Some(root)];
        Self {
            nodes,
            root: NodeId(0),
        }
    }

    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Gets the node `id`, if it has not been removed.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    /// Gets the number of nodes in the tree.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn add(&mut self, parents: Vec<NodeId>, state: StateId) -> NodeId {
        let id = NodeId(self.nodes.len());
        for parent in &parents {
            if let Some(node) = self.nodes[parent.0].as_mut() {
                node.children.push(id);
                node.state = None;
            }
        }
        self.nodes.push(Some(Node {
            parents,
            children: vec![],
            state:    Some(state),
        }));
        id
    }

    /// Records that the state at `node` forked into `left` and `right`.
    ///
    /// # Panics
    ///
    /// If `node` is not a leaf of the tree.
    pub fn split(&mut self, node: NodeId, left: StateId, right: StateId) -> (NodeId, NodeId) {
        assert!(
            self.node(node).map_or(false, |n| n.children.is_empty()),
            "splitting inner node {node}"
        );
        let left = self.add(vec![node], left);
        let right = self.add(vec![node], right);
        (left, right)
    }

    /// Records that the states at `first` and `second` merged into `state`.
    ///
    /// # Panics
    ///
    /// If either node is not a leaf of the tree.
    pub fn merge(&mut self, first: NodeId, second: NodeId, state: StateId) -> NodeId {
        for node in [first, second] {
            assert!(
                self.node(node).map_or(false, |n| n.children.is_empty()),
                "merging inner node {node}"
            );
        }
        self.add(vec![first, second], state)
    }

    /// Removes the leaf `node` of a terminated state, along with every
    /// ancestor that no longer leads to a live state.
    pub fn terminate(&mut self, node: NodeId) {
        let mut pending = vec![node];
        while let Some(id) = pending.pop() {
            let Some(current) = self.nodes.get(id.0).and_then(Option::as_ref) else {
                continue;
            };
            if !current.children.is_empty() {
                continue;
            }
            let parents = current.parents.clone();
            self.nodes[id.0] = None;
            for parent in parents {
                if let Some(p) = self.nodes[parent.0].as_mut() {
                    p.children.retain(|c| *c != id);
                    if p.children.is_empty() {
                        pending.push(parent);
                    }
                }
            }
        }
    }

    /// Gets every ancestor of `node`, following both lineages of merged
    /// nodes.
    #[must_use]
    pub fn ancestors(&self, node: NodeId) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        let mut pending: Vec<NodeId> = self.node(node).map(|n| n.parents.clone()).unwrap_or_default();
        while let Some(id) = pending.pop() {
            if seen.insert(id) {
                if let Some(n) = self.node(id) {
                    pending.extend(n.parents.iter().copied());
                }
            }
        }
        seen
    }

    /// Gets the path from the root to `node` along the first lineage of every
    /// merged node.
    #[must_use]
    pub fn lineage(&self, node: NodeId) -> Vec<NodeId> {
        let mut path = vec![node];
        let mut current = node;
        while let Some(parent) = self.node(current).and_then(|n| n.parents.first()) {
            path.push(*parent);
            current = *parent;
        }
        path.reverse();
        path
    }

    /// Gets the leaves of the tree and the states they hold.
    #[must_use]
    pub fn live_leaves(&self) -> Vec<(NodeId, StateId)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().and_then(|n| n.state).map(|s| (NodeId(i), s)))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use crate::{
        process_tree::{NodeId, ProcessTree},
        vm::state::StateId,
    };

    #[test]
    fn splits_and_prunes() {
        let mut tree = ProcessTree::new(StateId(0));
        let (left, right) = tree.split(tree.root(), StateId(0), StateId(1));
        let (left_left, left_right) = tree.split(left, StateId(0), StateId(2));
        assert_eq!(tree.live_leaves().len(), 3);
        assert_eq!(tree.lineage(left_right), vec![NodeId(0), left, left_right]);

        tree.terminate(left_left);
        tree.terminate(left_right);
        assert!(tree.node(left).is_none());
        assert_eq!(tree.live_leaves(), vec![(right, StateId(1))]);

        tree.terminate(right);
        assert!(tree.is_empty());
    }

    #[test]
    fn merges_keep_both_lineages() {
        let mut tree = ProcessTree::new(StateId(0));
        let (left, right) = tree.split(tree.root(), StateId(0), StateId(1));
        let merged = tree.merge(left, right, StateId(0));

        let ancestors = tree.ancestors(merged);
        assert!(ancestors.contains(&left) && ancestors.contains(&right));
        assert_eq!(tree.live_leaves(), vec![(merged, StateId(0))]);

        tree.terminate(merged);
        assert!(tree.is_empty());
    }
}
