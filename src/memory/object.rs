//! This module contains the identity of memory allocations.

use std::{
    fmt::{Display, Formatter},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::{
    expr::{Expr, ExprRef},
    program::{GlobalId, InstructionRef},
};

/// A shared reference to a memory object.
pub type MemoryObjectRef = Arc<MemoryObject>;

/// The unique identifier of a memory object within one run of the executor.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct ObjectId(pub u64);

impl Display for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "mo{}", self.0)
    }
}

/// The key under which objects are stored in an address space, ordering them
/// by their base address.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ObjectKey {
    pub address: u64,
    pub id:      ObjectId,
}

impl ObjectKey {
    /// Gets the largest key at `address`, for lookups of the objects that
    /// start at or below it.
    #[must_use]
    pub fn upper_bound(address: u64) -> Self {
        let id = ObjectId(u64::MAX);
        Self { address, id }
    }
}

/// Where in the program a memory object was allocated.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum AllocationSite {
    /// An allocation by an instruction, either on the stack or on the heap.
    Instruction(InstructionRef),

    /// A global of the program.
    Global(GlobalId),

    /// The storage for the variadic arguments of the call at the instruction.
    Varargs(InstructionRef),

    Unknown,
}

impl Display for AllocationSite {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Instruction(location) => write!(f, "{location}"),
            Self::Global(global) => write!(f, "global {global}"),
            Self::Varargs(location) => write!(f, "varargs of {location}"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A single allocation in the memory of the program.
///
/// Memory objects are immutable and shared by every execution state that
/// knows about them; the contents of an object live in the
/// [`super::ObjectState`] bound to it in each state's address space.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MemoryObject {
    id:        ObjectId,
    address:   u64,
    size:      u64,
    name:      String,
    is_local:  bool,
    is_global: bool,
    is_fixed:  bool,
    site:      AllocationSite,
}

impl MemoryObject {
    /// Constructs a new memory object.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        id: ObjectId,
        address: u64,
        size: u64,
        name: impl Into<String>,
        is_local: bool,
        is_global: bool,
        is_fixed: bool,
        site: AllocationSite,
    ) -> Self {
        let name = name.into();
        Self {
            id,
            address,
            size,
            name,
            is_local,
            is_global,
            is_fixed,
            site,
        }
    }

    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Gets the base address of the object.
    #[must_use]
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Gets the size of the object in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Checks if the object lives on the stack, and hence is freed when the
    /// frame that allocated it returns.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.is_local
    }

    #[must_use]
    pub fn is_global(&self) -> bool {
        self.is_global
    }

    /// Checks if the object was placed at an address chosen by the executor
    /// rather than by an address pool.
    #[must_use]
    pub fn is_fixed(&self) -> bool {
        self.is_fixed
    }

    #[must_use]
    pub fn site(&self) -> AllocationSite {
        self.site
    }

    /// Gets the key of the object in an address space.
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            address: self.address,
            id:      self.id,
        }
    }

    /// Gets the base address as a pointer-width expression.
    #[must_use]
    pub fn base_expr(&self) -> ExprRef {
        Expr::pointer(self.address)
    }

    /// Gets the size as a pointer-width expression.
    #[must_use]
    pub fn size_expr(&self) -> ExprRef {
        Expr::pointer(self.size)
    }

    /// Gets the offset of `pointer` into the object.
    #[must_use]
    pub fn offset_expr(&self, pointer: &ExprRef) -> ExprRef {
        Expr::sub(pointer.clone(), self.base_expr())
    }

    /// Checks if the concrete `address` falls within the object.
    ///
    /// Zero-sized objects contain exactly their base address.
    #[must_use]
    pub fn contains(&self, address: u64) -> bool {
        let offset = address.wrapping_sub(self.address);
        offset < self.size || (self.size == 0 && offset == 0)
    }

    /// Gets the condition under which `offset` points into the object.
    ///
    /// Zero-sized objects only contain the offset zero.
    #[must_use]
    pub fn bounds_check_offset(&self, offset: &ExprRef) -> ExprRef {
        if self.size == 0 {
            Expr::eq(Expr::pointer(0), offset.clone())
        } else {
            Expr::ult(offset.clone(), self.size_expr())
        }
    }

    /// Gets the condition under which an access of `bytes` bytes at `offset`
    /// stays within the object.
    #[must_use]
    pub fn bounds_check_access(&self, offset: &ExprRef, bytes: u64) -> ExprRef {
        if bytes > self.size {
            Expr::bool(false)
        } else {
            Expr::ult(offset.clone(), Expr::pointer(self.size - bytes + 1))
        }
    }

    /// Gets the condition under which `pointer` points into the object.
    #[must_use]
    pub fn bounds_check_pointer(&self, pointer: &ExprRef) -> ExprRef {
        self.bounds_check_offset(&self.offset_expr(pointer))
    }

    /// Gets the condition under which an access of `bytes` bytes at `pointer`
    /// stays within the object.
    #[must_use]
    pub fn bounds_check_pointer_access(&self, pointer: &ExprRef, bytes: u64) -> ExprRef {
        self.bounds_check_access(&self.offset_expr(pointer), bytes)
    }

    /// Describes the object for error reports.
    #[must_use]
    pub fn allocation_info(&self) -> String {
        format!(
            "{} ({}) of {} bytes at {:#x}, allocated at {}",
            self.name, self.id, self.size, self.address, self.site
        )
    }
}

#[cfg(test)]
mod test {
    use crate::{
        expr::Expr,
        memory::object::{AllocationSite, MemoryObject, ObjectId},
    };

    fn object(size: u64) -> MemoryObject {
        MemoryObject::new(ObjectId(1), 0x100, size, "buffer", false, false, false, AllocationSite::Unknown)
    }

    #[test]
    fn bounds_checks_fold_for_concrete_offsets() {
        let buffer = object(8);
        assert!(buffer.bounds_check_offset(&Expr::pointer(7)).is_true());
        assert!(buffer.bounds_check_offset(&Expr::pointer(8)).is_false());
        assert!(buffer.bounds_check_access(&Expr::pointer(4), 4).is_true());
        assert!(buffer.bounds_check_access(&Expr::pointer(5), 4).is_false());
        assert!(buffer.bounds_check_access(&Expr::pointer(0), 9).is_false());
        assert!(buffer.bounds_check_pointer(&Expr::pointer(0x104)).is_true());
    }

    #[test]
    fn zero_sized_objects_contain_their_base() {
        let empty = object(0);
        assert!(empty.contains(0x100));
        assert!(!empty.contains(0x101));
        assert!(empty.bounds_check_offset(&Expr::pointer(0)).is_true());
        assert!(empty.bounds_check_access(&Expr::pointer(0), 1).is_false());
    }
}
