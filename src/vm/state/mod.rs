//! This module contains the execution state: one complete snapshot of the
//! program under test along a single path, and the operations that fork and
//! merge such snapshots.

pub mod stack;
pub mod thread;

use std::{
    cell::Cell,
    collections::{BTreeMap, BTreeSet},
    fmt::{Display, Formatter},
    ops::Bound,
    rc::Rc,
    sync::Arc,
    time::Duration,
};

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::{
    expr::{Array, ConstraintSet, Expr, ExprRef},
    memory::{AddressPool, AddressSpace, MemoryObjectRef},
    process_tree::NodeId,
    program::{FunctionId, InstructionRef, Program},
    vm::state::{
        stack::{CallSite, StackFrame},
        thread::{Thread, ThreadId, WaitListId},
    },
};

/// The identifier of an execution state.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct StateId(pub u64);

impl Display for StateId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "state{}", self.0)
    }
}

/// A symbolic input of the program: an object whose contents were replaced by
/// a symbolic array.
#[derive(Clone, Debug)]
pub struct Symbolic {
    pub object: MemoryObjectRef,
    pub array:  Arc<Array>,
}

/// One entry of a stack trace, innermost first.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct StackTraceEntry {
    pub function: String,
    pub location: InstructionRef,
}

/// A snapshot of the program under test along one path.
#[derive(Clone, Debug)]
pub struct ExecutionState {
    id: StateId,

    threads:        BTreeMap<ThreadId, Thread>,
    current_thread: ThreadId,
    next_thread_id: u64,

    /// The threads asleep on each wait list.
    wait_lists:     BTreeMap<WaitListId, BTreeSet<ThreadId>>,
    next_wait_list: u64,

    /// The number of times a thread was preempted by a scheduling fork.
    pub preemptions: u32,

    pub address_space: AddressSpace,
    pub address_pool:  AddressPool,
    pub constraints:   ConstraintSet,

    /// The symbolic inputs, in the order they were created.
    pub symbolics: Vec<Symbolic>,

    /// The number of forks on the path to this state.
    pub depth: u32,

    /// Set when the program asked not to fork on this path.
    pub fork_disabled: bool,

    /// The branch directions taken at each fork along the path.
    pub path: Vec<bool>,

    /// The node of the state in the process tree.
    pub ptree_node: Option<NodeId>,

    /// The number of instructions executed along the path.
    pub steps: u64,

    /// The solver time spent on queries for this state.
    query_cost: Cell<Duration>,

    /// The last instruction of the current thread, once that thread has
    /// exited.
    exited_at: Option<InstructionRef>,
}

impl ExecutionState {
    /// Creates a state whose only thread is about to execute the entry of
    /// `function`, a function with `registers` registers.
    #[must_use]
    pub fn new(id: StateId, function: FunctionId, registers: u32) -> Self {
        let main = ThreadId(0);
        let threads = BTreeMap::from([(main, Thread::new(main, function, registers))]);
        Self {
            id,
            threads,
            current_thread: main,
            next_thread_id: 1,
            wait_lists:     BTreeMap::new(),
            next_wait_list: 0,
            preemptions:    0,
            address_space:  AddressSpace::new(),
            address_pool:   AddressPool::default(),
            constraints:    ConstraintSet::new(),
            symbolics:      Vec::new(),
            depth:          0,
            fork_disabled:  false,
            path:           Vec::new(),
            ptree_node:     None,
            steps:          0,
            query_cost:     Cell::new(Duration::ZERO),
            exited_at:      None,
        }
    }

    #[must_use]
    pub fn id(&self) -> StateId {
        self.id
    }

    /// Creates a copy of the state with the identifier `id`.
    ///
    /// The copy shares every object with `self` until either of them writes
    /// to it, so branching is cheap regardless of the size of memory.
    #[must_use]
    pub fn branch(&mut self, id: StateId) -> Self {
        self.depth += 1;
        let address_space = self.address_space.fork();
        Self {
            id,
            address_space,
            ptree_node: None,
            ..self.clone()
        }
    }

    /// Gets the solver time spent on this state.
    #[must_use]
    pub fn query_cost(&self) -> Duration {
        self.query_cost.get()
    }

    /// Adds `elapsed` to the solver time spent on this state.
    pub fn charge_query(&self, elapsed: Duration) {
        self.query_cost.set(self.query_cost.get() + elapsed);
    }

    /// Adds `constraint` to the path constraints.
    ///
    /// # Panics
    ///
    /// If the constraint is the constant `false`.
    pub fn add_constraint(&mut self, constraint: ExprRef) {
        self.constraints.add(constraint);
    }

    /// Records `array` as the symbolic contents of `object`.
    pub fn add_symbolic(&mut self, object: MemoryObjectRef, array: Arc<Array>) {
        self.symbolics.push(Symbolic { object, array });
    }

    /// Gets the arrays of all symbolic inputs.
    #[must_use]
    pub fn symbolic_arrays(&self) -> Vec<Arc<Array>> {
        self.symbolics.iter().map(|s| s.array.clone()).collect()
    }

    // Threads

    #[must_use]
    pub fn current_thread_id(&self) -> ThreadId {
        self.current_thread
    }

    /// Gets the thread that is currently executing.
    ///
    /// # Panics
    ///
    /// If the current thread was terminated without another being scheduled.
    #[must_use]
    pub fn thread(&self) -> &Thread {
        &self.threads[&self.current_thread]
    }

    /// Gets the thread that is currently executing for modification.
    ///
    /// # Panics
    ///
    /// If the current thread was terminated without another being scheduled.
    pub fn thread_mut(&mut self) -> &mut Thread {
        self.threads
            .get_mut(&self.current_thread)
            .expect("current thread exists")
    }

    #[must_use]
    pub fn threads(&self) -> &BTreeMap<ThreadId, Thread> {
        &self.threads
    }

    #[must_use]
    pub fn get_thread(&self, id: ThreadId) -> Option<&Thread> {
        self.threads.get(&id)
    }

    pub fn get_thread_mut(&mut self, id: ThreadId) -> Option<&mut Thread> {
        self.threads.get_mut(&id)
    }

    /// Gets the next instruction of the current thread.
    #[must_use]
    pub fn pc(&self) -> InstructionRef {
        self.thread().pc
    }

    /// Gets the instruction the current thread executed last.
    #[must_use]
    pub fn prev_pc(&self) -> InstructionRef {
        self.thread().prev_pc
    }

    /// Gets the instruction the state executed last, even if the thread that
    /// executed it has since exited.
    #[must_use]
    pub fn location(&self) -> InstructionRef {
        self.threads
            .get(&self.current_thread)
            .map(|t| t.prev_pc)
            .or(self.exited_at)
            .unwrap_or_default()
    }

    /// Checks if the current thread is still alive.
    #[must_use]
    pub fn has_current_thread(&self) -> bool {
        self.threads.contains_key(&self.current_thread)
    }

    /// Gets the innermost frame of the current thread.
    #[must_use]
    pub fn frame(&self) -> &StackFrame {
        self.thread().frame()
    }

    pub fn frame_mut(&mut self) -> &mut StackFrame {
        self.thread_mut().frame_mut()
    }

    /// Gets the depth of the call stack of the current thread.
    #[must_use]
    pub fn stack_depth(&self) -> usize {
        self.thread().stack.len()
    }

    /// Pushes a frame for a call of `function` onto the current thread.
    pub fn push_frame(&mut self, caller: Option<CallSite>, function: FunctionId, registers: u32) {
        self.thread_mut()
            .stack
            .push(StackFrame::new(function, caller, registers));
    }

    /// Pops the innermost frame of the current thread, freeing its stack
    /// allocations.
    pub fn pop_frame(&mut self) -> Option<StackFrame> {
        let frame = self.thread_mut().stack.pop()?;
        for object in frame.allocas.iter().chain(&frame.varargs) {
            self.address_space.unbind_object(object);
        }
        Some(frame)
    }

    /// Creates a new thread that starts at the entry of `function`.
    pub fn create_thread(&mut self, function: FunctionId, registers: u32) -> ThreadId {
        let id = ThreadId(self.next_thread_id);
        self.next_thread_id += 1;
        self.threads.insert(id, Thread::new(id, function, registers));
        id
    }

    /// Removes the thread `id` and frees the stack allocations of all its
    /// frames.
    pub fn terminate_thread(&mut self, id: ThreadId) {
        let Some(thread) = self.threads.remove(&id) else {
            return;
        };
        if id == self.current_thread {
            self.exited_at = Some(thread.prev_pc);
        }
        for object in thread
            .stack
            .iter()
            .flat_map(|f| f.allocas.iter().chain(&f.varargs))
        {
            self.address_space.unbind_object(object);
        }
        for sleepers in self.wait_lists.values_mut() {
            sleepers.remove(&id);
        }
    }

    /// Creates a new, empty, wait list.
    pub fn new_wait_list(&mut self) -> WaitListId {
        let id = WaitListId(self.next_wait_list);
        self.next_wait_list += 1;
        id
    }

    /// Puts the current thread to sleep on `list`.
    pub fn sleep(&mut self, list: WaitListId) {
        let id = self.current_thread;
        let thread = self.thread_mut();
        thread.enabled = false;
        thread.waiting_on = Some(list);
        self.wait_lists.entry(list).or_default().insert(id);
    }

    /// Wakes the thread `id` from `list`.
    pub fn notify_one(&mut self, list: WaitListId, id: ThreadId) {
        if let Some(sleepers) = self.wait_lists.get_mut(&list) {
            sleepers.remove(&id);
        }
        if let Some(thread) = self.threads.get_mut(&id) {
            thread.enabled = true;
            thread.waiting_on = None;
        }
    }

    /// Wakes every thread on `list`.
    pub fn notify_all(&mut self, list: WaitListId) {
        let sleepers = self.wait_lists.remove(&list).unwrap_or_default();
        for id in sleepers {
            if let Some(thread) = self.threads.get_mut(&id) {
                thread.enabled = true;
                thread.waiting_on = None;
            }
        }
    }

    /// Gets the threads asleep on `list`.
    #[must_use]
    pub fn sleepers(&self, list: WaitListId) -> Vec<ThreadId> {
        self.wait_lists
            .get(&list)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Gets the threads that may be scheduled.
    #[must_use]
    pub fn enabled_threads(&self) -> Vec<ThreadId> {
        self.threads
            .values()
            .filter(|t| t.enabled)
            .map(Thread::id)
            .collect()
    }

    /// Gets the first enabled thread after `after`, wrapping around.
    #[must_use]
    pub fn next_thread(&self, after: ThreadId) -> Option<ThreadId> {
        let later = self.threads.range((Bound::Excluded(after), Bound::Unbounded));
        let earlier = self.threads.range(..=after);
        later
            .chain(earlier)
            .find(|(_, t)| t.enabled)
            .map(|(id, _)| *id)
    }

    /// Makes `id` the current thread.
    ///
    /// # Panics
    ///
    /// If the thread does not exist or is not enabled.
    pub fn schedule_next(&mut self, id: ThreadId) {
        let thread = self.threads.get(&id).expect("scheduled thread exists");
        assert!(thread.enabled, "scheduling disabled {id}");
        self.current_thread = id;
        self.exited_at = None;
    }

    // Reporting

    /// Gets the call stack of the current thread, innermost frame first.
    #[must_use]
    pub fn stack_trace(&self, program: &Program) -> Vec<StackTraceEntry> {
        let Some(thread) = self.threads.get(&self.current_thread) else {
            return Vec::new();
        };
        let mut location = thread.prev_pc;
        let mut trace = Vec::with_capacity(thread.stack.len());
        for frame in thread.stack.iter().rev() {
            let function = program.function(frame.function).name.clone();
            trace.push(StackTraceEntry { function, location });
            if let Some(caller) = frame.caller {
                location = caller.call;
            }
        }
        trace
    }

    /// Estimates the host memory used by this state alone, not counting memory
    /// it shares with other states.
    #[must_use]
    pub fn memory_footprint(&self) -> u64 {
        let locals: usize = self
            .threads
            .values()
            .flat_map(|t| &t.stack)
            .map(|f| f.locals().len() * std::mem::size_of::<Option<ExprRef>>())
            .sum();
        let constraints = self.constraints.len() * std::mem::size_of::<ExprRef>();
        std::mem::size_of::<Self>() as u64
            + locals as u64
            + constraints as u64
            + self.address_space.exclusive_footprint()
    }

    // Merging

    /// Merges `self` and `other` into a single state that stands for both.
    ///
    /// The states must be at the same point of the program, with call stacks
    /// of the same shape and the same objects in memory. The merged state
    /// selects between the values of the two with a condition built from the
    /// constraints only one of them has, and its path constraint is the
    /// disjunction of both.
    ///
    /// Returns `None` if the states cannot be merged.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Option<Self> {
        if !self.mergeable_with(other) {
            return None;
        }

        let theirs: FxHashSet<&ExprRef> = other.constraints.iter().collect();
        let ours: FxHashSet<&ExprRef> = self.constraints.iter().collect();
        let common: Vec<ExprRef> = self
            .constraints
            .iter()
            .filter(|c| theirs.contains(c))
            .cloned()
            .collect();
        let in_self = Expr::and_all(self.constraints.iter().filter(|c| !theirs.contains(c)).cloned());
        let in_other = Expr::and_all(other.constraints.iter().filter(|c| !ours.contains(c)).cloned());

        let mut merged = self.clone();
        merged.constraints = ConstraintSet::new();
        for constraint in common {
            merged.add_constraint(constraint);
        }
        merged.add_constraint(Expr::or(in_self.clone(), in_other));

        for (id, thread) in &mut merged.threads {
            let other_thread = &other.threads[id];
            for (frame, other_frame) in thread.stack.iter_mut().zip(&other_thread.stack) {
                for (value, other_value) in frame.locals_mut().iter_mut().zip(other_frame.locals()) {
                    *value = match (value.take(), other_value) {
                        (Some(a), Some(b)) if &a == b => Some(a),
                        (Some(a), Some(b)) if a.width() == b.width() => {
                            Some(Expr::select(in_self.clone(), a, b.clone()))
                        }
                        _ => None,
                    };
                }
            }
        }

        let differing: Vec<_> = self
            .address_space
            .objects()
            .zip(other.address_space.objects())
            .filter(|(a, b)| !Rc::ptr_eq(&a.state, &b.state))
            .map(|(a, b)| (a.object.clone(), b.state.clone()))
            .collect();
        for (object, other_state) in differing {
            let state = merged.address_space.get_writeable(&object);
            for index in 0..object.size() {
                let a = state.read8(index);
                let b = other_state.read8(index);
                if a != b {
                    state.write8(index, &Expr::select(in_self.clone(), a, b));
                }
            }
        }

        Some(merged)
    }

    fn mergeable_with(&self, other: &Self) -> bool {
        let same_threads = self.current_thread == other.current_thread
            && self.threads.len() == other.threads.len()
            && self.threads.iter().all(|(id, a)| {
                other.threads.get(id).map_or(false, |b| {
                    a.pc == b.pc
                        && a.enabled == b.enabled
                        && a.waiting_on == b.waiting_on
                        && a.stack.len() == b.stack.len()
                        && a.stack.iter().zip(&b.stack).all(|(x, y)| x.same_shape(y))
                })
            });
        let same_symbolics = self.symbolics.len() == other.symbolics.len()
            && self
                .symbolics
                .iter()
                .zip(&other.symbolics)
                .all(|(a, b)| a.object.id() == b.object.id() && a.array == b.array);
        let same_objects = self.address_space.len() == other.address_space.len()
            && self
                .address_space
                .objects()
                .zip(other.address_space.objects())
                .all(|(a, b)| a.object.id() == b.object.id());

        same_threads && same_symbolics && same_objects && self.wait_lists == other.wait_lists
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use crate::{
        expr::{Array, Expr, UpdateList},
        memory::{AllocationSite, MemoryObject, ObjectId, ObjectState},
        program::{FunctionId, Register},
        vm::state::{thread::ThreadId, ExecutionState, StateId},
    };

    fn symbolic_byte(name: &str) -> crate::expr::ExprRef {
        Expr::read(UpdateList::new(Array::symbolic(name, 1)), Expr::constant(0, 32))
    }

    #[test]
    fn branch_shares_memory_until_written() {
        let object = Arc::new(MemoryObject::new(
            ObjectId(1),
            0x100,
            4,
            "o",
            false,
            false,
            false,
            AllocationSite::Unknown,
        ));
        let mut parent = ExecutionState::new(StateId(0), FunctionId(0), 1);
        parent
            .address_space
            .bind_object(object.clone(), ObjectState::new(object.clone()));

        let mut child = parent.branch(StateId(1));
        assert_eq!(parent.depth, 1);
        assert_eq!(child.depth, 1);
        assert_eq!(child.id(), StateId(1));
        assert_eq!(child.address_space.exclusive_footprint(), 0);

        child
            .address_space
            .get_writeable(&object)
            .write8(0, &Expr::constant(5, 8));
        assert_eq!(
            parent.address_space.find_object(&object).expect("bound").read8(0),
            Expr::constant(0, 8)
        );
        assert!(child.address_space.exclusive_footprint() > 0);
    }

    #[test]
    fn threads_sleep_and_wake() {
        let mut state = ExecutionState::new(StateId(0), FunctionId(0), 0);
        let worker = state.create_thread(FunctionId(1), 0);
        let list = state.new_wait_list();

        state.sleep(list);
        assert_eq!(state.enabled_threads(), vec![worker]);
        assert_eq!(state.next_thread(ThreadId(0)), Some(worker));
        assert_eq!(state.next_thread(worker), Some(worker));

        state.notify_all(list);
        assert_eq!(state.next_thread(worker), Some(ThreadId(0)));
        state.schedule_next(worker);
        assert_eq!(state.current_thread_id(), worker);
    }

    #[test]
    fn merge_selects_between_differing_values() {
        let x = symbolic_byte("x");
        let condition = Expr::ult(x.clone(), Expr::constant(10, 8));

        let mut a = ExecutionState::new(StateId(0), FunctionId(0), 1);
        let mut b = a.branch(StateId(1));
        a.add_constraint(condition.clone());
        b.add_constraint(Expr::is_zero(condition.clone()));
        a.frame_mut().write(Register(0), Expr::constant(1, 8));
        b.frame_mut().write(Register(0), Expr::constant(2, 8));

        let merged = a.merge(&b).expect("mergeable");
        assert_eq!(merged.constraints.len(), 1);
        assert_eq!(
            merged.frame().locals()[0],
            Some(Expr::select(condition, Expr::constant(1, 8), Expr::constant(2, 8)))
        );

        b.push_frame(None, FunctionId(0), 1);
        assert!(a.merge(&b).is_none());
    }
}
