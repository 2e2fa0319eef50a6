//! This module contains the forking of execution states on symbolic
//! conditions, along with the policies that restrict it.

use rand::Rng;

use crate::{
    error::{
        container::Locatable,
        execution::{Error, Result},
    },
    expr::{Expr, ExprRef},
    solver::Validity,
    vm::{
        seed::SeedInfo,
        state::ExecutionState,
        Branch,
        Executor,
    },
};

/// The states that continue on the true and false side of a condition.
pub type ForkResult = (Option<Branch>, Option<Branch>);

impl Executor {
    /// Splits `current` on `condition`.
    ///
    /// If the condition may be both true and false, `current` continues on
    /// the true side and a new state is created for the false side. Otherwise
    /// `current` continues on the only feasible side. Internal forks are the
    /// ones the executor makes for its own checks; they are not recorded in
    /// the path of the state.
    ///
    /// Either side is [`None`] when no state continues on it, including when
    /// forking hit the depth limit and terminated both.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the solver fails, or if a replayed path does not
    /// match the program.
    pub fn fork(
        &mut self,
        current: &mut ExecutionState,
        condition: ExprRef,
        is_internal: bool,
    ) -> Result<ForkResult> {
        let location = self.location;
        let is_seeding = self.seed_map.contains_key(&current.id());

        let mut validity = self
            .solver
            .evaluate(current, &condition)
            .map_err(|_| self.query_failed())?;

        if !is_internal && !is_seeding && self.replay_path.is_some() {
            let direction = self.next_replay_direction().ok_or(Error::ReplayPathExhausted.locate(location))?;
            match (validity, direction) {
                (Validity::True, false) | (Validity::False, true) => {
                    return Err(Error::ReplayInvalidBranch.locate(location));
                }
                (Validity::Unknown, true) => {
                    self.add_constraint(current, condition.clone())?;
                    validity = Validity::True;
                }
                (Validity::Unknown, false) => {
                    self.add_constraint(current, Expr::is_zero(condition.clone()))?;
                    validity = Validity::False;
                }
                _ => (),
            }
        } else if validity == Validity::Unknown {
            if is_seeding && (current.fork_disabled || self.config.only_replay_seeds) {
                let seeds = &self.seed_map[&current.id()];
                let true_seed = seeds.iter().any(|s| s.satisfies(&condition));
                let false_seed = seeds.iter().any(|s| !s.satisfies(&condition));
                if true_seed != false_seed {
                    let side = if true_seed {
                        condition.clone()
                    } else {
                        Expr::is_zero(condition.clone())
                    };
                    self.add_constraint(current, side)?;
                    validity = if true_seed { Validity::True } else { Validity::False };
                }
            } else if !is_seeding {
                if let Some(reason) = self.fork_inhibitor(current) {
                    self.log_skipped_fork(current, reason);
                    let take_true = self.rng.gen_bool(0.5);
                    let side = if take_true {
                        condition.clone()
                    } else {
                        Expr::is_zero(condition.clone())
                    };
                    self.add_constraint(current, side)?;
                    validity = if take_true { Validity::True } else { Validity::False };
                }
            }
        }

        match validity {
            Validity::True => {
                if !is_internal {
                    current.path.push(true);
                }
                Ok((Some(Branch::Current), None))
            }
            Validity::False => {
                if !is_internal {
                    current.path.push(false);
                }
                Ok((None, Some(Branch::Current)))
            }
            Validity::Unknown => self.split(current, condition, is_internal),
        }
    }

    /// Creates the false side of `current` for a condition that may go
    /// either way.
    fn split(
        &mut self,
        current: &mut ExecutionState,
        condition: ExprRef,
        is_internal: bool,
    ) -> Result<ForkResult> {
        self.statistics.forks += 1;
        let mut child = self.branch_state(current);
        let child_id = child.id();

        if let Some(seeds) = self.seed_map.remove(&current.id()) {
            let (true_seeds, false_seeds): (Vec<SeedInfo>, Vec<SeedInfo>) =
                seeds.into_iter().partition(|s| s.satisfies(&condition));
            if !true_seeds.is_empty() {
                self.seed_map.insert(current.id(), true_seeds);
            }
            if !false_seeds.is_empty() {
                self.seed_map.insert(child_id, false_seeds);
            }
        }

        if !is_internal {
            current.path.push(true);
            child.path.push(false);
        }
        self.add_constraint(current, condition.clone())?;
        self.add_constraint(&mut child, Expr::is_zero(condition))?;

        let max_depth = self.config.max_depth;
        let too_deep = max_depth != 0 && current.depth >= max_depth;
        if too_deep {
            self.terminate_state_early(current, "max-depth exceeded");
            self.terminate_state_early(&mut child, "max-depth exceeded");
        }
        self.states.insert(child_id, child);
        if too_deep {
            return Ok((None, None));
        }

        Ok((Some(Branch::Current), Some(Branch::Forked(child_id))))
    }

    /// Forks the state at `branch`, relative to `current`, and expresses the
    /// result relative to `current` too. A state-local failure terminates the
    /// state at `branch` and yields no sides.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if forking fails in a way that stops the run.
    pub(crate) fn fork_on(
        &mut self,
        current: &mut ExecutionState,
        branch: Branch,
        condition: ExprRef,
        is_internal: bool,
    ) -> Result<ForkResult> {
        let result = self.on_state(current, branch, |executor, state| {
            executor.fork(state, condition, is_internal)
        })?;
        Ok(match result {
            Some((on_true, on_false)) => (
                on_true.map(|b| b.relative_to(branch)),
                on_false.map(|b| b.relative_to(branch)),
            ),
            None => (None, None),
        })
    }

    /// Splits `current` into one state per condition, where the conditions
    /// are feasible and mutually exclusive.
    ///
    /// The entry at each index is where the state for that condition lives,
    /// or [`None`] if no state follows it.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the solver fails in a way that stops the run.
    pub fn branch(
        &mut self,
        current: &mut ExecutionState,
        conditions: &[ExprRef],
    ) -> Result<Vec<Option<Branch>>> {
        let count = conditions.len();
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut result: Vec<Option<Branch>> = Vec::with_capacity(count);
        if let Some(reason) = self.fork_inhibitor(current).filter(|_| count > 1) {
            self.log_skipped_fork(current, reason);
            let chosen = self.rng.gen_range(0..count);
            result.extend((0..count).map(|i| (i == chosen).then_some(Branch::Current)));
        } else {
            self.statistics.forks += count as u64 - 1;
            result.push(Some(Branch::Current));
            for i in 1..count {
                let parent = self.rng.gen_range(0..i);
                let child = match result[parent] {
                    Some(Branch::Forked(id)) => match self.states.remove(&id) {
                        Some(mut state) => {
                            let child = self.branch_state(&mut state);
                            self.states.insert(id, state);
                            child
                        }
                        None => self.branch_state(current),
                    },
                    _ => self.branch_state(current),
                };
                let child_id = child.id();
                self.states.insert(child_id, child);
                result.push(Some(Branch::Forked(child_id)));
            }
        }

        if let Some(seeds) = self.seed_map.remove(&current.id()) {
            let mut per_arm: Vec<Vec<SeedInfo>> = vec![Vec::new(); count];
            for seed in seeds {
                let arm = conditions
                    .iter()
                    .position(|c| seed.satisfies(c))
                    .unwrap_or_else(|| self.rng.gen_range(0..count));
                per_arm[arm].push(seed);
            }
            for (arm, seeds) in per_arm.into_iter().enumerate() {
                let Some(branch) = result[arm] else { continue };
                if seeds.is_empty() {
                    if self.config.only_replay_seeds {
                        self.with_branch(current, branch, |executor, state| {
                            executor.terminate_state_early(state, "Unseeded path during replay");
                            Ok(())
                        })?;
                        result[arm] = None;
                    }
                    continue;
                }
                let id = match branch {
                    Branch::Current => current.id(),
                    Branch::Forked(id) => id,
                };
                self.seed_map.insert(id, seeds);
            }
        }

        for (arm, condition) in conditions.iter().enumerate() {
            let Some(branch) = result[arm] else { continue };
            let condition = condition.clone();
            self.with_branch(current, branch, |executor, state| {
                executor.add_constraint(state, condition)
            })?;
        }

        Ok(result)
    }

    /// Adds `condition` to the path constraints of `state`, patching any seed
    /// of the state that the condition rules out.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the solver fails while patching seeds.
    pub fn add_constraint(&mut self, state: &mut ExecutionState, condition: ExprRef) -> Result<()> {
        state.add_constraint(condition.clone());
        self.patch_seeds(state, &condition)
    }

    /// Creates a copy of `parent` with a fresh identifier, and records the
    /// split in the process tree.
    fn branch_state(&mut self, parent: &mut ExecutionState) -> ExecutionState {
        let id = self.fresh_state_id();
        let mut child = parent.branch(id);
        if let Some(node) = parent.ptree_node {
            let (left, right) = self.process_tree.split(node, parent.id(), id);
            parent.ptree_node = Some(left);
            child.ptree_node = Some(right);
        }
        self.added.push(id);
        child
    }

    /// Gets the reason forking is not allowed for `state` at the moment, if
    /// any.
    fn fork_inhibitor(&self, state: &ExecutionState) -> Option<&'static str> {
        if self.config.max_memory_inhibit && self.at_memory_limit {
            Some("memory cap exceeded")
        } else if state.fork_disabled {
            Some("fork disabled on current path")
        } else if self.config.inhibit_forking {
            Some("fork disabled globally")
        } else if self.config.max_forks.map_or(false, |max| self.statistics.forks >= max) {
            Some("max-forks reached")
        } else {
            None
        }
    }

    fn log_skipped_fork(&mut self, state: &ExecutionState, reason: &'static str) {
        if self.first_warning(format!("skipping fork: {reason}")) {
            tracing::warn!(reason, "skipping fork");
        }
        tracing::debug!(reason, state = %state.id(), location = %self.location, "skipping fork");
    }

    fn next_replay_direction(&mut self) -> Option<bool> {
        let path = self.replay_path.as_ref()?;
        let direction = path.get(self.replay_path_position).copied()?;
        self.replay_path_position += 1;
        Some(direction)
    }

    /// Concretizes `expr` to one of its possible values in `state`, and
    /// constrains it to that value.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the solver fails.
    pub fn to_constant(
        &mut self,
        state: &mut ExecutionState,
        expr: &ExprRef,
        reason: &str,
    ) -> Result<ExprRef> {
        if expr.is_constant() {
            return Ok(expr.clone());
        }
        let value = self
            .solver
            .get_value(state, expr)
            .map_err(|_| self.query_failed())?;
        tracing::warn!(
            reason,
            expression = %expr,
            value = %value,
            location = %self.location,
            "silently concretizing"
        );
        self.add_constraint(state, Expr::eq(expr.clone(), value.clone()))?;
        Ok(value)
    }

    /// Gets the only possible value of `expr` in `state`, or `expr` itself if
    /// it may take several values or the solver cannot tell.
    pub fn to_unique(&mut self, state: &ExecutionState, expr: &ExprRef) -> ExprRef {
        if expr.is_constant() {
            return expr.clone();
        }
        let Ok(value) = self.solver.get_value(state, expr) else {
            return expr.clone();
        };
        match self.solver.must_be_true(state, &Expr::eq(expr.clone(), value.clone())) {
            Ok(true) => value,
            _ => expr.clone(),
        }
    }
}
