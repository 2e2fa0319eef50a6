//! This module contains constants that are needed throughout the codebase.

use std::time::Duration;

/// The width of a pointer in bits.
pub const POINTER_WIDTH_BITS: u32 = 64;

/// The width of a byte in bits.
pub const BYTE_WIDTH_BITS: u32 = 8;

/// The width of the index expressions used to read from and write to arrays.
pub const ARRAY_INDEX_WIDTH_BITS: u32 = 32;

/// The default number of loop iterations the executor waits before polling the
/// watchdog.
pub const DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS: usize = 100;

/// The default amount of time a single solver query may take.
pub const DEFAULT_SOLVER_TIMEOUT: Duration = Duration::from_secs(10);

/// The default cap on the number of forks performed during a run, where
/// `None` means no cap.
pub const DEFAULT_MAX_FORKS: Option<u64> = None;

/// The default depth at which forked states are terminated, where `0`
/// disables the check.
pub const DEFAULT_MAX_DEPTH: u32 = 0;

/// The default memory cap in bytes, where `None` means no cap.
pub const DEFAULT_MAX_MEMORY_BYTES: Option<u64> = None;

/// Whether hitting the memory cap inhibits forking by default.
pub const DEFAULT_MAX_MEMORY_INHIBIT: bool = true;

/// The default bound on the number of objects a symbolic pointer may resolve
/// to, where `0` means no bound.
pub const DEFAULT_MAX_RESOLUTIONS: usize = 0;

/// The default interval, in executed instructions, between checks of the
/// memory cap.
pub const DEFAULT_MEMORY_CHECK_INTERVAL: u64 = 0x10000;

/// The default seed for the random number generator used to pick branches.
pub const DEFAULT_RANDOM_SEED: u64 = 1;

/// The largest single allocation that the memory manager will attempt.
pub const DEFAULT_MAX_ALLOCATION_BYTES: u64 = 10 * 1024 * 1024;

/// Allocation sizes at or above this bound are treated as failed allocations
/// that return a null pointer.
pub const HUGE_ALLOCATION_BYTES: u64 = 1 << 31;

/// The concrete size tried first when concretizing a symbolic allocation size.
pub const SMALL_ALLOCATION_PROBE_BYTES: u64 = 128;

/// The amount by which memory usage must exceed the cap before states are
/// killed, rather than forking merely being inhibited.
pub const MEMORY_CAP_KILL_MARGIN_BYTES: u64 = 100 * 1024 * 1024;

/// The alignment of all addresses handed out by an address pool.
pub const ALLOCATION_ALIGNMENT_BYTES: u64 = 8;

/// The first address used for function pointers.
pub const FUNCTION_REGION_BASE: u64 = 0x1000;

/// The distance between the addresses of consecutive functions.
pub const FUNCTION_ADDRESS_STRIDE: u64 = 0x10;

/// The first address used for global objects.
pub const GLOBAL_REGION_BASE: u64 = 0x0010_0000;

/// The first address of the region from which dynamic allocations are served.
pub const ADDRESS_POOL_BASE: u64 = 0x1000_0000;

/// The size of the dynamic allocation region.
pub const ADDRESS_POOL_SIZE: u64 = 1 << 40;

/// The default number of symbolic bits the enumeration solver is willing to
/// search exhaustively.
pub const DEFAULT_ENUMERATION_MAX_BITS: u32 = 20;

/// The number of candidate assignments the enumeration solver tries between
/// checks of its deadline.
pub const ENUMERATION_DEADLINE_CHECK_INTERVAL: u64 = 4096;

/// Whether every state error produces a test case by default, rather than only
/// the first one at each instruction.
pub const DEFAULT_EMIT_ALL_ERRORS: bool = false;

/// Whether forking is disabled for the whole run by default.
pub const DEFAULT_INHIBIT_FORKING: bool = false;

/// Whether symbolic addresses are simplified against the path constraints
/// before memory accesses by default.
pub const DEFAULT_SIMPLIFY_SYMBOLIC_INDICES: bool = false;

/// The default object size in bytes from which symbolic offsets are
/// concretized, where `0` disables concretization.
pub const DEFAULT_MAX_SYMBOLIC_ARRAY_SIZE: u64 = 0;

/// Whether calls to host functions are allowed by default.
pub const DEFAULT_ALLOW_EXTERNAL_CALLS: bool = true;

/// Whether host functions may be called with symbolic arguments, which are
/// then concretized, by default.
pub const DEFAULT_ALLOW_SYMBOLIC_EXTERNAL_ARGUMENTS: bool = false;

/// Whether divisions are checked for a zero divisor by default.
pub const DEFAULT_CHECK_DIVISION_BY_ZERO: bool = true;

/// Whether scheduling points fork one state per runnable thread by default.
pub const DEFAULT_FORK_ON_SCHEDULE: bool = false;

/// The default bound on the number of preemptions along a path, where `0`
/// means no bound.
pub const DEFAULT_MAX_PREEMPTIONS: u32 = 0;

/// Whether exploration is restricted to the paths of the seeds by default.
pub const DEFAULT_ONLY_REPLAY_SEEDS: bool = false;

/// Whether the run stops once seeding is done by default.
pub const DEFAULT_ONLY_SEED: bool = false;

/// The default wall-clock budget for the seeding phase, where `None` means no
/// budget.
pub const DEFAULT_SEED_TIME: Option<Duration> = None;

/// Whether seed inputs that are too short are padded with zeros by default.
pub const DEFAULT_ZERO_SEED_EXTENSION: bool = false;

/// Whether seed inputs that are too short are left symbolic past their end by
/// default.
pub const DEFAULT_ALLOW_SEED_EXTENSION: bool = false;

/// Whether states are merged when they meet at the start of a block by
/// default.
pub const DEFAULT_MERGE_AT_JOIN_POINTS: bool = false;

/// The padding between the global objects of a program.
pub const GLOBAL_ALIGNMENT_BYTES: u64 = 16;

/// The number of bytes each variadic argument occupies in the varargs object.
pub const VARARG_SLOT_BYTES: u64 = 8;
