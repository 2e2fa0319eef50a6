//! This module contains the memory model of the executor: the objects that
//! a program allocates, their possibly-symbolic contents, and the
//! copy-on-write address spaces that bind the two together in each state.

pub mod address_space;
pub mod manager;
pub mod object;
pub mod object_state;

pub use address_space::{AddressSpace, ObjectPair, Resolution};
pub use manager::{AddressPool, MemoryManager};
pub use object::{AllocationSite, MemoryObject, MemoryObjectRef, ObjectId, ObjectKey};
pub use object_state::{bytes_for_width, ObjectState};
