//! This module contains the seeds that guide exploration towards the paths of
//! known inputs.

use std::time::Instant;

use crate::{
    error::{
        container::Locatable,
        execution::{Error, Result},
    },
    expr::{Array, Assignment, ExprRef},
    sink::TestInput,
    vm::{
        state::{ExecutionState, StateId},
        Executor,
    },
};

/// A set of concrete inputs carried by a state, together with the values it
/// gives the symbolic arrays the state has created so far.
#[derive(Clone, Debug)]
pub struct SeedInfo {
    pub assignment: Assignment,

    inputs: Vec<TestInput>,

    /// The index of the next unused input.
    position: usize,
}

impl SeedInfo {
    #[must_use]
    pub fn new(inputs: Vec<TestInput>) -> Self {
        let assignment = Assignment::new(true);
        Self {
            assignment,
            inputs,
            position: 0,
        }
    }

    /// Takes the next input, preferring the first unused one called `name`.
    pub fn next_input(&mut self, name: &str) -> Option<&TestInput> {
        let named = self.inputs[self.position.min(self.inputs.len())..]
            .iter()
            .position(|i| i.name == name)
            .map(|offset| self.position + offset);
        let index = named.unwrap_or(self.position);
        if index >= self.inputs.len() {
            return None;
        }
        if index != self.position {
            self.inputs.swap(index, self.position);
        }
        self.position += 1;
        self.inputs.get(self.position - 1)
    }

    /// Checks whether the seed sends `condition` down its true side.
    #[must_use]
    pub fn satisfies(&self, condition: &ExprRef) -> bool {
        self.assignment.evaluate_concrete(condition).map_or(false, |v| v != 0)
    }
}

impl Executor {
    /// Steps only the states that carry seeds, cycling through them, until
    /// none are left or the seeding time runs out.
    pub(crate) fn run_seeding(&mut self) -> Result<()> {
        let started = Instant::now();
        let poll_interval = self.watchdog.poll_every().max(1);
        let mut cursor: Option<StateId> = None;
        let mut counter = 0usize;

        tracing::info!(seeds = self.seed_map.values().map(Vec::len).sum::<usize>(), "seeding");
        while let Some(id) = self.next_seeded_state(cursor) {
            if counter % poll_interval == 0 && self.watchdog.should_stop() {
                break;
            }
            if self.config.seed_time.map_or(false, |limit| started.elapsed() > limit) {
                tracing::warn!("seed time expired, continuing without seeds");
                break;
            }

            self.step_state(id)?;
            cursor = Some(id);
            counter += 1;
        }

        tracing::info!(elapsed = ?started.elapsed(), "seeding done");
        self.seed_map.clear();
        Ok(())
    }

    /// Gets the seeded state after `cursor`, wrapping around.
    fn next_seeded_state(&self, cursor: Option<StateId>) -> Option<StateId> {
        let after = cursor.and_then(|c| self.seed_map.range(c..).map(|(id, _)| *id).find(|id| *id != c));
        after.or_else(|| self.seed_map.keys().next().copied())
    }

    /// Binds the seed bytes of every seed of `state` to the new symbolic
    /// `array`.
    pub(crate) fn bind_seed_inputs(
        &mut self,
        state: &ExecutionState,
        array: &Array,
        object_name: &str,
    ) -> Result<()> {
        let Some(seeds) = self.seed_map.get_mut(&state.id()) else {
            return Ok(());
        };
        let size = array.size();
        let location = self.location;
        for seed in seeds {
            match seed.next_input(object_name).cloned() {
                None if self.config.zero_seed_extension => {
                    seed.assignment.bind(array, vec![0; usize::try_from(size).unwrap_or_default()]);
                }
                None if self.config.allow_seed_extension => (),
                None => return Err(Error::SeedInputsExhausted.locate(location)),
                Some(input) => {
                    let actual = input.bytes.len() as u64;
                    let extend = self.config.zero_seed_extension || self.config.allow_seed_extension;
                    if actual > size || (actual < size && !extend) {
                        return Err(Error::SeedInputSize {
                            name:     input.name,
                            expected: size,
                            actual,
                        }
                        .locate(location));
                    }
                    let mut bytes = input.bytes;
                    if self.config.zero_seed_extension {
                        bytes.resize(usize::try_from(size).unwrap_or_default(), 0);
                    }
                    seed.assignment.bind(array, bytes);
                }
            }
        }
        Ok(())
    }

    /// Brings the seeds of `state` back in line with its path constraints
    /// after `condition` was added to them.
    pub(crate) fn patch_seeds(&mut self, state: &ExecutionState, condition: &ExprRef) -> Result<()> {
        let Some(seeds) = self.seed_map.get(&state.id()) else {
            return Ok(());
        };
        if seeds.iter().all(|s| s.satisfies(condition)) {
            return Ok(());
        }

        let arrays = state.symbolic_arrays();
        let values = self
            .solver
            .get_initial_values(state, &arrays)
            .map_err(|_| self.query_failed())?;
        let Some(values) = values else {
            return Ok(());
        };
        if let Some(seeds) = self.seed_map.get_mut(&state.id()) {
            for seed in seeds.iter_mut().filter(|s| !s.satisfies(condition)) {
                for (array, bytes) in arrays.iter().zip(&values) {
                    seed.assignment.bind(array, bytes.clone());
                }
            }
        }
        tracing::warn!(state = %state.id(), "seeds patched for violating constraint");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::{sink::TestInput, vm::seed::SeedInfo};

    fn input(name: &str, bytes: &[u8]) -> TestInput {
        TestInput {
            name:  name.into(),
            bytes: bytes.to_vec(),
        }
    }

    #[test]
    fn inputs_are_taken_by_name_then_in_order() {
        let mut seed = SeedInfo::new(vec![input("a", &[1]), input("b", &[2]), input("c", &[3])]);
        assert_eq!(seed.next_input("b").map(|i| i.bytes.clone()), Some(vec![2]));
        assert_eq!(seed.next_input("z").map(|i| i.name.clone()), Some("a".into()));
        assert_eq!(seed.next_input("c").map(|i| i.bytes.clone()), Some(vec![3]));
        assert!(seed.next_input("a").is_none());
    }
}
