//! This module contains the symbolic executor.
//!
//! The executor owns every live [`ExecutionState`] of a run. Each step asks the
//! searcher for a state, executes one instruction of that state, and reports
//! the states the step created and terminated back to the searcher. Branches
//! whose condition depends on symbolic inputs fork the state, so that each
//! resulting state explores one side of the branch under the matching path
//! constraint.
//!
//! # Ownership During a Step
//!
//! The state being stepped is taken out of the state table for the duration
//! of the step, so that the executor and the state can be borrowed mutably at
//! the same time. States forked during the step are inserted into the table
//! straight away. Operations that may fork therefore report where each
//! resulting state lives as a [`Branch`], and [`Executor::with_branch`] runs
//! code against either kind.

pub mod calls;
pub mod float;
pub mod fork;
pub mod instructions;
pub mod intrinsics;
pub mod memory;
pub mod seed;
pub mod state;
pub mod termination;
pub mod threads;

use std::{
    collections::BTreeMap,
    sync::Arc,
    time::Duration,
};

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::{
    constant::{
        DEFAULT_ALLOW_EXTERNAL_CALLS,
        DEFAULT_ALLOW_SEED_EXTENSION,
        DEFAULT_ALLOW_SYMBOLIC_EXTERNAL_ARGUMENTS,
        DEFAULT_CHECK_DIVISION_BY_ZERO,
        DEFAULT_EMIT_ALL_ERRORS,
        DEFAULT_FORK_ON_SCHEDULE,
        DEFAULT_INHIBIT_FORKING,
        DEFAULT_MAX_ALLOCATION_BYTES,
        DEFAULT_MAX_DEPTH,
        DEFAULT_MAX_FORKS,
        DEFAULT_MAX_MEMORY_BYTES,
        DEFAULT_MAX_MEMORY_INHIBIT,
        DEFAULT_MAX_PREEMPTIONS,
        DEFAULT_MAX_RESOLUTIONS,
        DEFAULT_MAX_SYMBOLIC_ARRAY_SIZE,
        DEFAULT_MEMORY_CHECK_INTERVAL,
        DEFAULT_MERGE_AT_JOIN_POINTS,
        DEFAULT_ONLY_REPLAY_SEEDS,
        DEFAULT_ONLY_SEED,
        DEFAULT_RANDOM_SEED,
        DEFAULT_SEED_TIME,
        DEFAULT_SIMPLIFY_SYMBOLIC_INDICES,
        DEFAULT_SOLVER_TIMEOUT,
        DEFAULT_ZERO_SEED_EXTENSION,
        GLOBAL_ALIGNMENT_BYTES,
        GLOBAL_REGION_BASE,
        MEMORY_CAP_KILL_MARGIN_BYTES,
    },
    error::{
        self,
        container::Locatable,
        execution::{Error, ErrorKind, Errors, LocatedError, Result},
    },
    expr::{Expr, ExprRef},
    external::{DynDispatcher, NullDispatcher},
    memory::{AllocationSite, MemoryManager, MemoryObjectRef, ObjectState},
    process_tree::ProcessTree,
    program::{Constant, InstructionRef, Program},
    searcher::{DfsSearcher, DynSearcher},
    sink::{DynSink, MemorySink, TestCaseSink, TestInput},
    solver::{DynSolver, TimingSolver},
    vm::{
        seed::SeedInfo,
        state::{ExecutionState, StateId},
    },
    watchdog::DynWatchdog,
};

/// Where a state produced by a forking operation lives.
///
/// Branches are always relative to the state that the operation was given:
/// [`Branch::Current`] is that state itself, while [`Branch::Forked`] is a new
/// state that has already been added to the state table.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Branch {
    Current,
    Forked(StateId),
}

impl Branch {
    /// Re-expresses a branch relative to a state that itself lives at
    /// `outer`.
    #[must_use]
    pub fn relative_to(self, outer: Branch) -> Branch {
        match self {
            Self::Current => outer,
            forked @ Self::Forked(_) => forked,
        }
    }
}

/// The states added and removed by a single step of the executor.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StepReport {
    /// The state that was stepped, if any.
    pub state: Option<StateId>,

    pub added: Vec<StateId>,

    pub removed: Vec<StateId>,
}

/// The symbolic executor.
///
/// It is constructed over a validated [`Program`], with a root state that is
/// about to execute the entry function, and explores the program until no
/// live states remain or the watchdog asks it to stop.
#[derive(Debug)]
pub struct Executor {
    program: Arc<Program>,

    config: Config,

    solver: TimingSolver,

    searcher: DynSearcher,

    dispatcher: DynDispatcher,

    sink: DynSink,

    /// Polled at intervals to check whether the run needs to stop.
    watchdog: DynWatchdog,

    memory: MemoryManager,

    /// Every live state, except the one being stepped.
    states: BTreeMap<StateId, ExecutionState>,

    next_state_id: u64,

    /// The states created since the searcher was last updated.
    added: Vec<StateId>,

    /// The states terminated since the searcher was last updated.
    removed: Vec<StateId>,

    process_tree: ProcessTree,

    /// The value of every entry in the program's constant table.
    constants: Vec<ExprRef>,

    global_objects: Vec<MemoryObjectRef>,

    rng: StdRng,

    /// Set while the states use more memory than the configured cap.
    at_memory_limit: bool,

    /// The warnings that are only logged once, by key.
    warned: FxHashSet<String>,

    /// The errors that have already been reported, by location and message.
    emitted_errors: FxHashSet<(InstructionRef, String)>,

    /// Every error that was reported for a state, or that stopped the run.
    errors: Errors,

    seed_map: BTreeMap<StateId, Vec<SeedInfo>>,

    replay_path:          Option<Vec<bool>>,
    replay_path_position: usize,

    replay_inputs:         Option<Vec<TestInput>>,
    replay_input_position: usize,

    /// The instruction being executed.
    location: InstructionRef,

    statistics: Statistics,
}

impl Executor {
    /// Constructs an executor for `program` whose root state is about to
    /// execute the program's entry function.
    ///
    /// The executor explores states depth-first, fails every external call and
    /// collects test cases in a [`MemorySink`] unless told otherwise by the
    /// `with_*` methods.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the program is malformed.
    pub fn new(
        program: Program,
        config: Config,
        solver: DynSolver,
        watchdog: DynWatchdog,
    ) -> error::Result<Self> {
        program.validate()?;
        let program = Arc::new(program);

        let solver = TimingSolver::new(solver, config.solver_timeout);
        let mut memory = MemoryManager::new(config.max_allocation_size);
        let rng = StdRng::seed_from_u64(config.random_seed);

        let entry = program.entry();
        let root_id = StateId(0);
        let mut root = ExecutionState::new(root_id, entry, program.function(entry).registers);
        let process_tree = ProcessTree::new(root_id);
        root.ptree_node = Some(process_tree.root());

        let global_objects = bind_globals(&program, &mut memory, &mut root);
        let constants = evaluate_constants(&program, &global_objects);

        let entry_function = program.function(entry);
        for index in 0..entry_function.parameters {
            root.frame_mut()
                .write(entry_function.argument_register(index), Expr::pointer(0));
        }

        let states = BTreeMap::from([(root_id, root)]);
        let searcher: DynSearcher = Box::new(DfsSearcher::new());
        let dispatcher: DynDispatcher = Box::new(NullDispatcher);
        let sink: DynSink = Box::new(MemorySink::new());

        Ok(Self {
            program,
            config,
            solver,
            searcher,
            dispatcher,
            sink,
            watchdog,
            memory,
            states,
            next_state_id: 1,
            added:         vec![root_id],
            removed:       Vec::new(),
            process_tree,
            constants,
            global_objects,
            rng,
            at_memory_limit:       false,
            warned:                FxHashSet::default(),
            emitted_errors:        FxHashSet::default(),
            errors:                Errors::new(),
            seed_map:              BTreeMap::new(),
            replay_path:           None,
            replay_path_position:  0,
            replay_inputs:         None,
            replay_input_position: 0,
            location:              InstructionRef::entry(entry),
            statistics:            Statistics::default(),
        })
    }

    /// Sets the strategy that picks the state to step next.
    ///
    /// It must be called before the executor takes its first step.
    #[must_use]
    pub fn with_searcher(mut self, searcher: DynSearcher) -> Self {
        self.searcher = searcher;
        self
    }

    /// Sets the dispatcher that implements calls to external functions.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: DynDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Sets the sink that receives the test case of every terminated state.
    #[must_use]
    pub fn with_sink(mut self, sink: DynSink) -> Self {
        self.sink = sink;
        self
    }

    /// Binds the parameters of the entry function to `arguments`, in order.
    /// Parameters without a matching argument stay zero.
    #[must_use]
    pub fn with_arguments(mut self, arguments: Vec<ExprRef>) -> Self {
        let entry = self.program.function(self.program.entry());
        if let Some(root) = self.states.get_mut(&StateId(0)) {
            for (index, argument) in (0..entry.parameters).zip(arguments) {
                root.frame_mut().write(entry.argument_register(index), argument);
            }
        }
        self
    }

    /// Seeds the root state with concrete inputs, one vector of inputs per
    /// seed. States that carry seeds are explored first, and the symbolic
    /// inputs they create take their bytes from the seeds in order.
    #[must_use]
    pub fn with_seeds(mut self, seeds: Vec<Vec<TestInput>>) -> Self {
        let seeds: Vec<SeedInfo> = seeds.into_iter().map(SeedInfo::new).collect();
        if !seeds.is_empty() {
            self.seed_map.insert(StateId(0), seeds);
        }
        self
    }

    /// Restricts exploration to the single path described by the branch
    /// directions in `path`, as recorded in [`crate::sink::TestCase::path`].
    #[must_use]
    pub fn with_replay_path(mut self, path: Vec<bool>) -> Self {
        self.replay_path = Some(path);
        self.replay_path_position = 0;
        self
    }

    /// Makes every symbolic input concrete instead, taking its bytes from
    /// `inputs` in order.
    #[must_use]
    pub fn with_replay_inputs(mut self, inputs: Vec<TestInput>) -> Self {
        self.replay_inputs = Some(inputs);
        self.replay_input_position = 0;
        self
    }

    /// Explores the program until no live states remain.
    ///
    /// Errors that only concern a single state terminate that state and are
    /// recorded in [`Self::errors`], while exploration of the others goes on.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if an error occurs that stops the whole run, such as a
    /// replay diverging from the program or the watchdog requesting a stop.
    /// Every state that was still live has been terminated at that point.
    pub fn run(&mut self) -> std::result::Result<(), Errors> {
        self.update_states(None);

        if !self.seed_map.is_empty() {
            self.run_seeding().map_err(|e| self.fail(e))?;
            if self.watchdog.should_stop() {
                return Err(self.halt());
            }
            if self.config.only_seed {
                tracing::info!("seeding done, terminating remaining states");
                self.terminate_all_early("only seeding");
                return Ok(());
            }
        }

        let poll_interval = self.watchdog.poll_every().max(1);
        let memory_interval = self.config.memory_check_interval;
        let mut counter = 0usize;

        while !self.searcher.is_empty() {
            if counter % poll_interval == 0 && self.watchdog.should_stop() {
                return Err(self.halt());
            }
            if memory_interval != 0 && counter as u64 % memory_interval == 0 {
                self.check_memory_usage();
            }

            self.step().map_err(|e| self.fail(e))?;
            counter += 1;
        }

        tracing::info!(
            steps = self.statistics.steps,
            states = self.next_state_id,
            test_cases = self.statistics.test_cases,
            "exploration complete"
        );
        Ok(())
    }

    /// Executes one instruction of the state chosen by the searcher.
    ///
    /// Returns [`None`] if there is no state left to execute.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if an error occurs that stops the whole run.
    pub fn step(&mut self) -> Result<Option<StepReport>> {
        self.update_states(None);
        let Some(id) = self.searcher.select_state() else {
            return Ok(None);
        };
        self.step_state(id).map(Some)
    }

    /// Executes one instruction of the state `id`.
    ///
    /// # Panics
    ///
    /// If the state is not live.
    fn step_state(&mut self, id: StateId) -> Result<StepReport> {
        let mut state = self
            .states
            .remove(&id)
            .unwrap_or_else(|| panic!("stepping {id}, which is not live"));

        let result = self.execute_step(&mut state);
        self.states.insert(id, state);
        let report = self.update_states(Some(id));

        result.map(|()| report)
    }

    fn execute_step(&mut self, state: &mut ExecutionState) -> Result<()> {
        let thread = state.thread_mut();
        let location = thread.pc;
        thread.prev_pc = location;
        thread.pc = location.next();
        state.steps += 1;
        self.location = location;
        self.statistics.steps += 1;

        let program = self.program.clone();
        let instruction = program.instruction(location);
        tracing::trace!(state = %state.id(), %location, instruction = instruction.opcode_name());

        let result = self.execute_instruction(state, instruction);
        self.settle(state, result)
    }

    /// Applies the changes to the set of live states since the last update:
    /// informs the searcher, and drops the terminated states along with their
    /// process tree nodes and seeds.
    pub fn update_states(&mut self, current: Option<StateId>) -> StepReport {
        let mut added = std::mem::take(&mut self.added);
        let mut removed = std::mem::take(&mut self.removed);

        let transient: Vec<StateId> = added.iter().filter(|id| removed.contains(id)).copied().collect();
        for id in &removed {
            if let Some(state) = self.states.remove(id) {
                if let Some(node) = state.ptree_node {
                    self.process_tree.terminate(node);
                }
            }
            self.seed_map.remove(id);
        }
        added.retain(|id| !transient.contains(id));
        removed.retain(|id| !transient.contains(id));

        if current.is_some() || !added.is_empty() || !removed.is_empty() {
            self.searcher.update(current, &added, &removed);
        }

        StepReport {
            state: current,
            added,
            removed,
        }
    }

    /// Terminates every live state early and reports that the run was
    /// stopped.
    pub fn halt(&mut self) -> Errors {
        tracing::info!(live = self.states.len(), "execution halting");
        self.terminate_all_early("execution halting");
        self.fail(Error::StoppedByWatchdog.locate(self.location))
    }

    fn terminate_all_early(&mut self, reason: &str) {
        let ids: Vec<StateId> = self.states.keys().copied().collect();
        for id in ids {
            if let Some(mut state) = self.states.remove(&id) {
                self.terminate_state_early(&mut state, reason);
                self.states.insert(id, state);
            }
        }
        self.update_states(None);
    }

    /// Records an error that stops the run, terminating every state that is
    /// still live.
    fn fail(&mut self, error: LocatedError) -> Errors {
        tracing::error!(%error, "execution stopped");
        self.terminate_all_early("execution aborted");
        self.errors.add(error.clone());
        error.into()
    }

    /// Checks the memory used by all states against the configured cap, and
    /// terminates a random subset of the states if it is exceeded by far.
    pub fn check_memory_usage(&mut self) {
        let Some(max) = self.config.max_memory else {
            return;
        };
        let used: u64 = self.states.values().map(ExecutionState::memory_footprint).sum();
        self.at_memory_limit = used > max;
        if used <= max.saturating_add(MEMORY_CAP_KILL_MARGIN_BYTES) {
            return;
        }

        let mut ids: Vec<StateId> = self.states.keys().copied().collect();
        let live = ids.len() as u64;
        let keep = live.saturating_mul(max) / used.max(1);
        let to_kill = live.saturating_sub(keep).max(1);
        tracing::warn!(used, max, to_kill, "killing states over the memory cap");

        ids.shuffle(&mut self.rng);
        for id in ids.into_iter().take(usize::try_from(to_kill).unwrap_or(usize::MAX)) {
            if let Some(mut state) = self.states.remove(&id) {
                self.terminate_state_early(&mut state, "memory limit");
                self.states.insert(id, state);
            }
        }
        self.update_states(None);
    }

    /// Runs `f` against the state at `branch`, which is relative to
    /// `current`, and terminates that state if `f` fails with an error that
    /// only concerns it.
    ///
    /// Returns [`None`] if the state was not live or `f` failed.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `f` fails with an error that stops the run.
    pub(crate) fn on_state<T>(
        &mut self,
        current: &mut ExecutionState,
        branch: Branch,
        f: impl FnOnce(&mut Self, &mut ExecutionState) -> Result<T>,
    ) -> Result<Option<T>> {
        match branch {
            Branch::Current => self.settle_with(current, f),
            Branch::Forked(id) => {
                let Some(mut state) = self.states.remove(&id) else {
                    return Ok(None);
                };
                let result = self.settle_with(&mut state, f);
                self.states.insert(id, state);
                result
            }
        }
    }

    /// Runs `f` against the state at `branch`, as in [`Self::on_state`].
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `f` fails with an error that stops the run.
    pub(crate) fn with_branch(
        &mut self,
        current: &mut ExecutionState,
        branch: Branch,
        f: impl FnOnce(&mut Self, &mut ExecutionState) -> Result<()>,
    ) -> Result<()> {
        self.on_state(current, branch, f).map(|_| ())
    }

    fn settle_with<T>(
        &mut self,
        state: &mut ExecutionState,
        f: impl FnOnce(&mut Self, &mut ExecutionState) -> Result<T>,
    ) -> Result<Option<T>> {
        if self.is_terminated(state) {
            return Ok(None);
        }
        match f(self, state) {
            Ok(value) => Ok(Some(value)),
            Err(error) => self.settle(state, Err(error)).map(|()| None),
        }
    }

    /// Turns an error that only concerns `state` into the termination of that
    /// state, and passes on errors that stop the run.
    fn settle(&mut self, state: &mut ExecutionState, result: Result<()>) -> Result<()> {
        let Err(error) = result else {
            return Ok(());
        };
        if error.payload.is_fatal() {
            return Err(error);
        }
        if error.payload.kind() == ErrorKind::Early {
            self.terminate_state_early(state, &error.payload.to_string());
        } else {
            self.terminate_state_on_error(state, error, None);
        }
        Ok(())
    }

    /// Checks if `state` has been terminated during the current step.
    #[must_use]
    pub(crate) fn is_terminated(&self, state: &ExecutionState) -> bool {
        self.removed.contains(&state.id())
    }

    fn fresh_state_id(&mut self) -> StateId {
        let id = StateId(self.next_state_id);
        self.next_state_id += 1;
        id
    }

    /// Logs a warning, but only the first time it is raised for `key`.
    pub(crate) fn first_warning(&mut self, key: impl Into<String>) -> bool {
        self.warned.insert(key.into())
    }

    /// The error reported when the solver fails to answer a query.
    pub(crate) fn query_failed(&self) -> LocatedError {
        Error::QueryTimedOut.locate(self.location)
    }

    /// Gets the live state `id`, unless it is being stepped.
    #[must_use]
    pub fn state(&self, id: StateId) -> Option<&ExecutionState> {
        self.states.get(&id)
    }

    /// Gets the live states, unless they are being stepped.
    pub fn states(&self) -> impl Iterator<Item = &ExecutionState> {
        self.states.values()
    }

    #[must_use]
    pub fn program(&self) -> &Program {
        &self.program
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn solver(&self) -> &TimingSolver {
        &self.solver
    }

    #[must_use]
    pub fn process_tree(&self) -> &ProcessTree {
        &self.process_tree
    }

    /// Gets the objects of the program's globals, in the order of the globals.
    #[must_use]
    pub fn global_objects(&self) -> &[MemoryObjectRef] {
        &self.global_objects
    }

    /// Gets the errors reported so far.
    #[must_use]
    pub fn errors(&self) -> &Errors {
        &self.errors
    }

    #[must_use]
    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    /// Gets the sink as its concrete type `T`, if it is one.
    #[must_use]
    pub fn sink_as<T: TestCaseSink>(&self) -> Option<&T> {
        self.sink.downcast_ref::<T>()
    }

    /// Gets a reference to the executor's watchdog, allowing it to be polled
    /// during long-running loops.
    #[must_use]
    pub fn watchdog(&self) -> &DynWatchdog {
        &self.watchdog
    }

    /// Consumes the executor to hand out what the run produced.
    #[must_use]
    pub fn consume(self) -> ExecutionResult {
        let mut statistics = self.statistics;
        statistics.queries = self.solver.queries();
        statistics.solver_time = self.solver.total_time();
        statistics.states = self.next_state_id;
        statistics.allocations = self.memory.allocated();
        ExecutionResult {
            errors: self.errors,
            statistics,
            sink: self.sink,
        }
    }
}

/// Binds every global of `program` into `state` at a fixed address, with its
/// initializer or zeroed.
fn bind_globals(
    program: &Program,
    memory: &mut MemoryManager,
    state: &mut ExecutionState,
) -> Vec<MemoryObjectRef> {
    let mut address = GLOBAL_REGION_BASE;
    let mut objects = Vec::new();
    for (id, global) in program.globals() {
        let object = memory.allocate_fixed(
            address,
            global.size,
            AllocationSite::Global(id),
            global.name.clone(),
        );
        let mut contents = match &global.initializer {
            Some(bytes) => {
                let mut bytes = bytes.clone();
                bytes.resize(usize::try_from(global.size).unwrap_or(usize::MAX), 0);
                ObjectState::with_bytes(object.clone(), bytes)
            }
            None => ObjectState::new(object.clone()),
        };
        contents.set_read_only(global.read_only);
        state.address_space.bind_object(object.clone(), contents);
        objects.push(object);

        let span = global.size.max(1);
        let padded = span + (GLOBAL_ALIGNMENT_BYTES - span % GLOBAL_ALIGNMENT_BYTES) % GLOBAL_ALIGNMENT_BYTES;
        address += padded;
    }
    objects
}

/// Evaluates every entry of the constant table of `program`.
fn evaluate_constants(program: &Program, globals: &[MemoryObjectRef]) -> Vec<ExprRef> {
    program
        .constants()
        .iter()
        .map(|constant| match constant {
            Constant::Int { value, width } => Expr::constant(*value, *width),
            Constant::GlobalAddress { global, offset } => {
                Expr::pointer(globals[global.index()].address().wrapping_add(*offset))
            }
            Constant::FunctionAddress(function) => Expr::pointer(program.function_address(*function)),
            Constant::Null => Expr::pointer(0),
        })
        .collect()
}

/// The counters of a run.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Statistics {
    /// The number of instructions executed across all states.
    pub steps: u64,

    /// The number of times a state was split in two by a branch.
    pub forks: u64,

    /// The number of states created, including the root state.
    pub states: u64,

    pub test_cases: u64,

    pub queries: u64,

    pub solver_time: Duration,

    pub allocations: u64,
}

/// What a run of the executor produced.
#[derive(Debug)]
pub struct ExecutionResult {
    /// Every error that was reported for a state, or that stopped the run.
    pub errors: Errors,

    pub statistics: Statistics,

    /// The sink that received the test cases, which may be downcast to its
    /// concrete type to retrieve them.
    pub sink: DynSink,
}

/// The configuration for the executor.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct Config {
    /// The time limit of a single solver query, if any.
    ///
    /// Defaults to [`DEFAULT_SOLVER_TIMEOUT`].
    pub solver_timeout: Option<Duration>,

    /// The number of forks after which states stop forking, if any.
    ///
    /// Defaults to [`DEFAULT_MAX_FORKS`].
    pub max_forks: Option<u64>,

    /// The depth at which forked states are terminated, or zero for no
    /// limit.
    ///
    /// Defaults to [`DEFAULT_MAX_DEPTH`].
    pub max_depth: u32,

    /// The memory that all states together may use, if limited.
    ///
    /// Defaults to [`DEFAULT_MAX_MEMORY_BYTES`].
    pub max_memory: Option<u64>,

    /// Whether states stop forking while the memory cap is exceeded.
    ///
    /// Defaults to [`DEFAULT_MAX_MEMORY_INHIBIT`].
    pub max_memory_inhibit: bool,

    /// Whether forking is disabled for all states.
    ///
    /// Defaults to [`DEFAULT_INHIBIT_FORKING`].
    pub inhibit_forking: bool,

    /// The number of objects or functions a symbolic pointer is resolved to
    /// at most, or zero for no limit.
    ///
    /// Defaults to [`DEFAULT_MAX_RESOLUTIONS`].
    pub max_resolutions: usize,

    /// Whether every occurrence of an error is reported, rather than only the
    /// first at each instruction.
    ///
    /// Defaults to [`DEFAULT_EMIT_ALL_ERRORS`].
    pub emit_all_errors: bool,

    /// Whether symbolic addresses and values are simplified against the path
    /// constraints before memory accesses.
    ///
    /// Defaults to [`DEFAULT_SIMPLIFY_SYMBOLIC_INDICES`].
    pub simplify_symbolic_indices: bool,

    /// The size from which symbolic offsets into an object are concretized,
    /// or zero to never do so.
    ///
    /// Defaults to [`DEFAULT_MAX_SYMBOLIC_ARRAY_SIZE`].
    pub max_symbolic_array_size: u64,

    /// Defaults to [`DEFAULT_ALLOW_EXTERNAL_CALLS`].
    pub allow_external_calls: bool,

    /// Whether symbolic arguments to external calls are concretized rather
    /// than reported as errors.
    ///
    /// Defaults to [`DEFAULT_ALLOW_SYMBOLIC_EXTERNAL_ARGUMENTS`].
    pub allow_symbolic_external_arguments: bool,

    /// Defaults to [`DEFAULT_CHECK_DIVISION_BY_ZERO`].
    pub check_division_by_zero: bool,

    /// Whether a state forks at every scheduling point, once for each thread
    /// that could run next.
    ///
    /// Defaults to [`DEFAULT_FORK_ON_SCHEDULE`].
    pub fork_on_schedule: bool,

    /// The number of preemptions after which a state stops forking at
    /// scheduling points, or zero for no limit.
    ///
    /// Defaults to [`DEFAULT_MAX_PREEMPTIONS`].
    pub max_preemptions: u32,

    /// Whether seeded states only follow the paths of their seeds.
    ///
    /// Defaults to [`DEFAULT_ONLY_REPLAY_SEEDS`].
    pub only_replay_seeds: bool,

    /// Whether the run stops once the seeds are exhausted.
    ///
    /// Defaults to [`DEFAULT_ONLY_SEED`].
    pub only_seed: bool,

    /// The time budget of the seeding phase, if any.
    ///
    /// Defaults to [`DEFAULT_SEED_TIME`].
    pub seed_time: Option<Duration>,

    /// Whether seeds that run out of inputs are extended with zeroes.
    ///
    /// Defaults to [`DEFAULT_ZERO_SEED_EXTENSION`].
    pub zero_seed_extension: bool,

    /// Whether seed inputs shorter than their object leave the remaining bytes
    /// unconstrained.
    ///
    /// Defaults to [`DEFAULT_ALLOW_SEED_EXTENSION`].
    pub allow_seed_extension: bool,

    /// Whether states that reach the same block are merged.
    ///
    /// Defaults to [`DEFAULT_MERGE_AT_JOIN_POINTS`].
    pub merge_at_join_points: bool,

    /// The seed of the random choices the executor makes.
    ///
    /// Defaults to [`DEFAULT_RANDOM_SEED`].
    pub random_seed: u64,

    /// The number of steps between memory usage checks, or zero to never
    /// check.
    ///
    /// Defaults to [`DEFAULT_MEMORY_CHECK_INTERVAL`].
    pub memory_check_interval: u64,

    /// The largest allocation that can succeed, in bytes.
    ///
    /// Defaults to [`DEFAULT_MAX_ALLOCATION_BYTES`].
    pub max_allocation_size: u64,
}

impl Config {
    /// Sets the `solver_timeout` config parameter to `value`.
    #[must_use]
    pub fn with_solver_timeout(mut self, value: Option<Duration>) -> Self {
        self.solver_timeout = value;
        self
    }

    /// Sets the `max_forks` config parameter to `value`.
    #[must_use]
    pub fn with_max_forks(mut self, value: Option<u64>) -> Self {
        self.max_forks = value;
        self
    }

    /// Sets the `max_depth` config parameter to `value`.
    #[must_use]
    pub fn with_max_depth(mut self, value: u32) -> Self {
        self.max_depth = value;
        self
    }

    /// Sets the `max_memory` config parameter to `value`.
    #[must_use]
    pub fn with_max_memory(mut self, value: Option<u64>) -> Self {
        self.max_memory = value;
        self
    }

    /// Sets the `max_memory_inhibit` config parameter to `value`.
    #[must_use]
    pub fn with_max_memory_inhibit(mut self, value: bool) -> Self {
        self.max_memory_inhibit = value;
        self
    }

    /// Sets the `inhibit_forking` config parameter to `value`.
    #[must_use]
    pub fn with_inhibit_forking(mut self, value: bool) -> Self {
        self.inhibit_forking = value;
        self
    }

    /// Sets the `max_resolutions` config parameter to `value`.
    #[must_use]
    pub fn with_max_resolutions(mut self, value: usize) -> Self {
        self.max_resolutions = value;
        self
    }

    /// Sets the `emit_all_errors` config parameter to `value`.
    #[must_use]
    pub fn with_emit_all_errors(mut self, value: bool) -> Self {
        self.emit_all_errors = value;
        self
    }

    /// Sets the `simplify_symbolic_indices` config parameter to `value`.
    #[must_use]
    pub fn with_simplify_symbolic_indices(mut self, value: bool) -> Self {
        self.simplify_symbolic_indices = value;
        self
    }

    /// Sets the `max_symbolic_array_size` config parameter to `value`.
    #[must_use]
    pub fn with_max_symbolic_array_size(mut self, value: u64) -> Self {
        self.max_symbolic_array_size = value;
        self
    }

    /// Sets the `allow_external_calls` config parameter to `value`.
    #[must_use]
    pub fn with_allow_external_calls(mut self, value: bool) -> Self {
        self.allow_external_calls = value;
        self
    }

    /// Sets the `allow_symbolic_external_arguments` config parameter to
    /// `value`.
    #[must_use]
    pub fn with_allow_symbolic_external_arguments(mut self, value: bool) -> Self {
        self.allow_symbolic_external_arguments = value;
        self
    }

    /// Sets the `check_division_by_zero` config parameter to `value`.
    #[must_use]
    pub fn with_check_division_by_zero(mut self, value: bool) -> Self {
        self.check_division_by_zero = value;
        self
    }

    /// Sets the `fork_on_schedule` config parameter to `value`.
    #[must_use]
    pub fn with_fork_on_schedule(mut self, value: bool) -> Self {
        self.fork_on_schedule = value;
        self
    }

    /// Sets the `max_preemptions` config parameter to `value`.
    #[must_use]
    pub fn with_max_preemptions(mut self, value: u32) -> Self {
        self.max_preemptions = value;
        self
    }

    /// Sets the `only_replay_seeds` config parameter to `value`.
    #[must_use]
    pub fn with_only_replay_seeds(mut self, value: bool) -> Self {
        self.only_replay_seeds = value;
        self
    }

    /// Sets the `only_seed` config parameter to `value`.
    #[must_use]
    pub fn with_only_seed(mut self, value: bool) -> Self {
        self.only_seed = value;
        self
    }

    /// Sets the `seed_time` config parameter to `value`.
    #[must_use]
    pub fn with_seed_time(mut self, value: Option<Duration>) -> Self {
        self.seed_time = value;
        self
    }

    /// Sets the `zero_seed_extension` config parameter to `value`.
    #[must_use]
    pub fn with_zero_seed_extension(mut self, value: bool) -> Self {
        self.zero_seed_extension = value;
        self
    }

    /// Sets the `allow_seed_extension` config parameter to `value`.
    #[must_use]
    pub fn with_allow_seed_extension(mut self, value: bool) -> Self {
        self.allow_seed_extension = value;
        self
    }

    /// Sets the `merge_at_join_points` config parameter to `value`.
    #[must_use]
    pub fn with_merge_at_join_points(mut self, value: bool) -> Self {
        self.merge_at_join_points = value;
        self
    }

    /// Sets the `random_seed` config parameter to `value`.
    #[must_use]
    pub fn with_random_seed(mut self, value: u64) -> Self {
        self.random_seed = value;
        self
    }

    /// Sets the `memory_check_interval` config parameter to `value`.
    #[must_use]
    pub fn with_memory_check_interval(mut self, value: u64) -> Self {
        self.memory_check_interval = value;
        self
    }

    /// Sets the `max_allocation_size` config parameter to `value`.
    #[must_use]
    pub fn with_max_allocation_size(mut self, value: u64) -> Self {
        self.max_allocation_size = value;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        let solver_timeout = Some(DEFAULT_SOLVER_TIMEOUT);
        let max_forks = DEFAULT_MAX_FORKS;
        let max_depth = DEFAULT_MAX_DEPTH;
        let max_memory = DEFAULT_MAX_MEMORY_BYTES;
        let max_memory_inhibit = DEFAULT_MAX_MEMORY_INHIBIT;
        let inhibit_forking = DEFAULT_INHIBIT_FORKING;
        let max_resolutions = DEFAULT_MAX_RESOLUTIONS;
        let emit_all_errors = DEFAULT_EMIT_ALL_ERRORS;
        let simplify_symbolic_indices = DEFAULT_SIMPLIFY_SYMBOLIC_INDICES;
        let max_symbolic_array_size = DEFAULT_MAX_SYMBOLIC_ARRAY_SIZE;
        let allow_external_calls = DEFAULT_ALLOW_EXTERNAL_CALLS;
        let allow_symbolic_external_arguments = DEFAULT_ALLOW_SYMBOLIC_EXTERNAL_ARGUMENTS;
        let check_division_by_zero = DEFAULT_CHECK_DIVISION_BY_ZERO;
        let fork_on_schedule = DEFAULT_FORK_ON_SCHEDULE;
        let max_preemptions = DEFAULT_MAX_PREEMPTIONS;
        let only_replay_seeds = DEFAULT_ONLY_REPLAY_SEEDS;
        let only_seed = DEFAULT_ONLY_SEED;
        let seed_time = DEFAULT_SEED_TIME;
        let zero_seed_extension = DEFAULT_ZERO_SEED_EXTENSION;
        let allow_seed_extension = DEFAULT_ALLOW_SEED_EXTENSION;
        let merge_at_join_points = DEFAULT_MERGE_AT_JOIN_POINTS;
        let random_seed = DEFAULT_RANDOM_SEED;
        let memory_check_interval = DEFAULT_MEMORY_CHECK_INTERVAL;
        let max_allocation_size = DEFAULT_MAX_ALLOCATION_BYTES;

        Self {
            solver_timeout,
            max_forks,
            max_depth,
            max_memory,
            max_memory_inhibit,
            inhibit_forking,
            max_resolutions,
            emit_all_errors,
            simplify_symbolic_indices,
            max_symbolic_array_size,
            allow_external_calls,
            allow_symbolic_external_arguments,
            check_division_by_zero,
            fork_on_schedule,
            max_preemptions,
            only_replay_seeds,
            only_seed,
            seed_time,
            zero_seed_extension,
            allow_seed_extension,
            merge_at_join_points,
            random_seed,
            memory_check_interval,
            max_allocation_size,
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use crate::{constant::DEFAULT_SOLVER_TIMEOUT, vm::Config};

    #[test]
    fn config_defaults_come_from_constants() {
        let config = Config::default();
        assert_eq!(config.solver_timeout, Some(DEFAULT_SOLVER_TIMEOUT));
        assert!(config.check_division_by_zero);
        assert_eq!(config.max_forks, None);
    }

    #[test]
    fn config_loads_partial_documents() -> anyhow::Result<()> {
        let config: Config = serde_json::from_str(r#"{ "max_depth": 3, "inhibit_forking": true }"#)?;
        assert_eq!(config.max_depth, 3);
        assert!(config.inhibit_forking);
        assert_eq!(config.random_seed, Config::default().random_seed);

        let config = Config::default().with_seed_time(Some(Duration::from_secs(1)));
        let back: Config = serde_json::from_value(serde_json::to_value(&config)?)?;
        assert_eq!(back, config);
        Ok(())
    }
}
