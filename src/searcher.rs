//! This module contains the strategies that pick which execution state the
//! executor steps next.

use std::{collections::VecDeque, fmt::Debug};

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::vm::state::StateId;

/// A strategy for choosing the next state to execute.
///
/// The executor reports every change to the set of live states through
/// [`Searcher::update`], and only ever asks for a state while the searcher is
/// not empty.
pub trait Searcher: Debug {
    /// Gets the name of the strategy, for use in logs.
    fn name(&self) -> &str;

    /// Chooses the state to execute next.
    fn select_state(&mut self) -> Option<StateId>;

    /// Records that the step of `current` added the states `added` and removed
    /// the states `removed`.
    fn update(&mut self, current: Option<StateId>, added: &[StateId], removed: &[StateId]);

    /// Checks if there are no states left to choose from.
    fn is_empty(&self) -> bool;
}

/// A dynamically dispatched [`Searcher`] instance.
pub type DynSearcher = Box<dyn Searcher>;

/// Depth-first search: always continues with the most recently added state.
#[derive(Clone, Debug, Default)]
pub struct DfsSearcher {
    states: Vec<StateId>,
}

impl DfsSearcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Searcher for DfsSearcher {
    fn name(&self) -> &str {
        "dfs"
    }

    fn select_state(&mut self) -> Option<StateId> {
        self.states.last().copied()
    }

    fn update(&mut self, _current: Option<StateId>, added: &[StateId], removed: &[StateId]) {
        self.states.extend_from_slice(added);
        self.states.retain(|s| !removed.contains(s));
    }

    fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Breadth-first search: a state that forks goes to the back of the queue
/// together with its new siblings.
#[derive(Clone, Debug, Default)]
pub struct BfsSearcher {
    states: VecDeque<StateId>,
}

impl BfsSearcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Searcher for BfsSearcher {
    fn name(&self) -> &str {
        "bfs"
    }

    fn select_state(&mut self) -> Option<StateId> {
        self.states.front().copied()
    }

    fn update(&mut self, current: Option<StateId>, added: &[StateId], removed: &[StateId]) {
        if let Some(current) = current {
            if !added.is_empty() && !removed.contains(&current) {
                if let Some(index) = self.states.iter().position(|s| *s == current) {
                    self.states.remove(index);
                    self.states.push_back(current);
                }
            }
        }
        self.states.extend(added.iter().copied());
        self.states.retain(|s| !removed.contains(s));
    }

    fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Picks a state uniformly at random, reproducibly for a given seed.
#[derive(Clone, Debug)]
pub struct RandomSearcher {
    states: Vec<StateId>,
    rng:    StdRng,
}

impl RandomSearcher {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        let states = Vec::new();
        let rng = StdRng::seed_from_u64(seed);
        Self { states, rng }
    }
}

impl Searcher for RandomSearcher {
    fn name(&self) -> &str {
        "random"
    }

    fn select_state(&mut self) -> Option<StateId> {
        if self.states.is_empty() {
            return None;
        }
        let index = self.rng.gen_range(0..self.states.len());
        Some(self.states[index])
    }

    fn update(&mut self, _current: Option<StateId>, added: &[StateId], removed: &[StateId]) {
        self.states.extend_from_slice(added);
        self.states.retain(|s| !removed.contains(s));
    }

    fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod test {
    use crate::{
        searcher::{BfsSearcher, DfsSearcher, RandomSearcher, Searcher},
        vm::state::StateId,
    };

    #[test]
    fn dfs_prefers_newest_state() {
        let mut searcher = DfsSearcher::new();
        searcher.update(None, &[StateId(0)], &[]);
        searcher.update(Some(StateId(0)), &[StateId(1)], &[]);
        assert_eq!(searcher.select_state(), Some(StateId(1)));
        searcher.update(Some(StateId(1)), &[], &[StateId(1)]);
        assert_eq!(searcher.select_state(), Some(StateId(0)));
    }

    #[test]
    fn bfs_requeues_forking_state() {
        let mut searcher = BfsSearcher::new();
        searcher.update(None, &[StateId(0), StateId(1)], &[]);
        searcher.update(Some(StateId(0)), &[StateId(2)], &[]);
        assert_eq!(searcher.select_state(), Some(StateId(1)));
    }

    #[test]
    fn random_is_reproducible() {
        let picks = |seed| {
            let mut searcher = RandomSearcher::new(seed);
            searcher.update(None, &(0..10).map(StateId).collect::<Vec<_>>(), &[]);
            (0..5).map(|_| searcher.select_state()).collect::<Vec<_>>()
        };
        assert_eq!(picks(7), picks(7));
        assert!(picks(7).iter().all(Option::is_some));
        assert!(RandomSearcher::new(7).select_state().is_none());
    }
}
