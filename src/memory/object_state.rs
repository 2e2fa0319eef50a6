//! This module contains the contents of a memory object as seen by a single
//! address space.
//!
//! Every byte of an object state is in exactly one of three forms:
//!
//! - **Concrete**: the value lives in the concrete store.
//! - **Known symbolic**: the value is a symbolic byte recorded next to the
//!   store.
//! - **Flushed**: the value is whatever a read of the update list at that index
//!   produces.
//!
//! Accesses at concrete offsets work byte by byte on the first two forms. A
//! write at a symbolic offset cannot know which bytes it touches, so it first
//! flushes every byte into the update list and then records itself as one more
//! update. Reads at symbolic offsets read through a flushed view of the state
//! without changing it.

use std::sync::Arc;

use bitvec::prelude::{BitVec, Lsb0};

use crate::{
    constant::{ARRAY_INDEX_WIDTH_BITS, BYTE_WIDTH_BITS},
    expr::{Array, Expr, ExprRef, UpdateList, Width, INT8},
    memory::object::MemoryObjectRef,
};

/// The contents of a memory object within one address space.
#[derive(Clone, Debug)]
pub struct ObjectState {
    /// The copy-on-write epoch of the address space that may mutate this state
    /// in place.
    copy_on_write_owner: u64,

    object: MemoryObjectRef,

    concrete_store: Vec<u8>,

    /// Which bytes are concrete, where `None` means that all of them are.
    concrete_mask: Option<BitVec<usize, Lsb0>>,

    /// Which bytes live in the update list, where `None` means that none of
    /// them do.
    flushed: Option<BitVec<usize, Lsb0>>,

    known_symbolics: Option<Vec<Option<ExprRef>>>,

    /// The update list, which only exists once the state has been flushed.
    updates: Option<UpdateList>,

    read_only: bool,
}

impl ObjectState {
    /// Creates a zero-initialized state for `object`.
    #[must_use]
    pub fn new(object: MemoryObjectRef) -> Self {
        let concrete_store = vec![0; object.size() as usize];
        Self::with_bytes(object, concrete_store)
    }

    /// Creates a state for `object` holding the concrete `bytes`.
    ///
    /// # Panics
    ///
    /// If the number of bytes differs from the size of the object.
    #[must_use]
    pub fn with_bytes(object: MemoryObjectRef, bytes: Vec<u8>) -> Self {
        assert_eq!(bytes.len() as u64, object.size(), "object state size mismatch");
        Self {
            copy_on_write_owner: 0,
            object,
            concrete_store:  bytes,
            concrete_mask:   None,
            flushed:         None,
            known_symbolics: None,
            updates:         None,
            read_only:       false,
        }
    }

    /// Creates a state for `object` whose every byte is read from the symbolic
    /// `array`.
    #[must_use]
    pub fn new_symbolic(object: MemoryObjectRef, array: Arc<Array>) -> Self {
        let size = object.size() as usize;
        let mut state = Self::new(object);
        state.concrete_mask = Some(BitVec::repeat(false, size));
        state.flushed = Some(BitVec::repeat(true, size));
        state.updates = Some(UpdateList::new(array));
        state
    }

    #[must_use]
    pub fn object(&self) -> &MemoryObjectRef {
        &self.object
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.concrete_store.len() as u64
    }

    #[must_use]
    pub fn copy_on_write_owner(&self) -> u64 {
        self.copy_on_write_owner
    }

    pub fn set_copy_on_write_owner(&mut self, owner: u64) {
        self.copy_on_write_owner = owner;
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// Gets the update list if the state has been flushed.
    #[must_use]
    pub fn updates(&self) -> Option<&UpdateList> {
        self.updates.as_ref()
    }

    /// Estimates the number of bytes of host memory the state occupies.
    #[must_use]
    pub fn footprint(&self) -> u64 {
        let size = self.size();
        let masks = u64::from(self.concrete_mask.is_some()) * size / 8
            + u64::from(self.flushed.is_some()) * size / 8;
        let symbolics = self.known_symbolics.as_ref().map_or(0, |s| {
            s.len() as u64 * std::mem::size_of::<Option<ExprRef>>() as u64
        });
        let updates = self.updates.as_ref().map_or(0, |u| u.len() as u64 * 48);
        std::mem::size_of::<Self>() as u64 + size + masks + symbolics + updates
    }

    /// Resets every byte of the state to a concrete zero.
    pub fn initialize_to_zero(&mut self) {
        self.concrete_store.fill(0);
        self.concrete_mask = None;
        self.flushed = None;
        self.known_symbolics = None;
        self.updates = None;
    }

    /// Checks if the byte at `index` is concrete.
    #[must_use]
    pub fn is_byte_concrete(&self, index: usize) -> bool {
        self.concrete_mask.as_ref().map_or(true, |mask| mask[index])
    }

    fn is_byte_flushed(&self, index: usize) -> bool {
        self.flushed.as_ref().map_or(false, |mask| mask[index])
    }

    fn known_symbolic(&self, index: usize) -> Option<&ExprRef> {
        self.known_symbolics.as_ref().and_then(|s| s[index].as_ref())
    }

    /// Checks if every byte of the state is concrete.
    #[must_use]
    pub fn is_all_concrete(&self) -> bool {
        self.concrete_mask.as_ref().map_or(true, |mask| mask.all())
    }

    /// Gets the concrete store.
    ///
    /// Bytes that are not concrete hold stale values.
    #[must_use]
    pub fn concrete_bytes(&self) -> &[u8] {
        &self.concrete_store
    }

    /// Overwrites the state with the concrete `bytes`, starting at `offset`.
    ///
    /// # Panics
    ///
    /// If the bytes do not fit in the object.
    pub fn set_concrete_bytes(&mut self, offset: usize, bytes: &[u8]) {
        for (i, byte) in bytes.iter().enumerate() {
            self.write_byte(offset + i, *byte);
        }
    }

    fn mark_concrete(&mut self, index: usize) {
        if let Some(mask) = &mut self.concrete_mask {
            mask.set(index, true);
        }
        if let Some(flushed) = &mut self.flushed {
            flushed.set(index, false);
        }
        if let Some(symbolics) = &mut self.known_symbolics {
            symbolics[index] = None;
        }
    }

    fn write_byte(&mut self, index: usize, value: u8) {
        self.concrete_store[index] = value;
        self.mark_concrete(index);
    }

    fn write_symbolic_byte(&mut self, index: usize, value: ExprRef) {
        let size = self.concrete_store.len();
        self.concrete_mask
            .get_or_insert_with(|| BitVec::repeat(true, size))
            .set(index, false);
        if let Some(flushed) = &mut self.flushed {
            flushed.set(index, false);
        }
        self.known_symbolics.get_or_insert_with(|| vec![None; size])[index] = Some(value);
    }

    /// Gets the update list that holds the value of every byte, without
    /// changing the state.
    #[must_use]
    pub fn flushed_updates(&self) -> UpdateList {
        let mut updates = match &self.updates {
            Some(updates) => {
                let mut updates = updates.clone();
                for index in 0..self.concrete_store.len() {
                    if !self.is_byte_flushed(index) && self.is_byte_concrete(index) {
                        updates.extend_concrete(
                            index as u64,
                            Expr::constant(u64::from(self.concrete_store[index]), INT8),
                        );
                    }
                }
                updates
            }
            None => {
                let name = format!("{}#{}", self.object.name(), self.object.id().0);
                UpdateList::new(Array::constant(name, self.concrete_store.clone()))
            }
        };

        if let Some(symbolics) = &self.known_symbolics {
            for (index, value) in symbolics.iter().enumerate() {
                if let Some(value) = value {
                    if !self.is_byte_flushed(index) {
                        updates.extend_concrete(index as u64, value.clone());
                    }
                }
            }
        }
        updates
    }

    /// Moves every byte into the update list, as needed before a write at a
    /// symbolic offset.
    fn flush_for_write(&mut self) {
        let size = self.concrete_store.len();
        self.updates = Some(self.flushed_updates());
        self.flushed = Some(BitVec::repeat(true, size));
        self.concrete_mask = Some(BitVec::repeat(false, size));
        self.known_symbolics = None;
    }

    /// Reads the byte at the concrete `index`.
    #[must_use]
    pub fn read8(&self, index: u64) -> ExprRef {
        let i = index as usize;
        if self.is_byte_concrete(i) {
            return Expr::constant(u64::from(self.concrete_store[i]), INT8);
        }
        if !self.is_byte_flushed(i) {
            if let Some(value) = self.known_symbolic(i) {
                return value.clone();
            }
        }
        let updates = self.updates.clone().unwrap_or_else(|| self.flushed_updates());
        Expr::read(updates, Expr::constant(index, ARRAY_INDEX_WIDTH_BITS))
    }

    /// Reads the byte at the symbolic `offset`.
    #[must_use]
    pub fn read8_symbolic(&self, offset: &ExprRef) -> ExprRef {
        let index = Expr::zext(offset.clone(), ARRAY_INDEX_WIDTH_BITS);
        Expr::read(self.flushed_updates(), index)
    }

    /// Writes the byte `value` at the concrete `index`.
    pub fn write8(&mut self, index: u64, value: &ExprRef) {
        let i = index as usize;
        match value.as_constant() {
            Some(byte) => self.write_byte(i, byte as u8),
            None => self.write_symbolic_byte(i, value.clone()),
        }
    }

    /// Writes the byte `value` at the symbolic `offset`.
    pub fn write8_symbolic(&mut self, offset: &ExprRef, value: &ExprRef) {
        self.flush_for_write();
        let index = Expr::zext(offset.clone(), ARRAY_INDEX_WIDTH_BITS);
        if let Some(updates) = &mut self.updates {
            updates.extend(index, value.clone());
        }
    }

    /// Reads a `width`-bit little-endian value at `offset`.
    ///
    /// Reads at a constant offset are served byte by byte, and fold to a
    /// constant when every byte they cover is concrete.
    #[must_use]
    pub fn read(&self, offset: &ExprRef, width: Width) -> ExprRef {
        let bytes = bytes_for_width(width);
        let mut result: Option<ExprRef> = None;
        for i in 0..bytes {
            let byte = match offset.as_constant() {
                Some(base) => self.read8(base + i),
                None => {
                    self.read8_symbolic(&Expr::add(offset.clone(), Expr::constant(i, offset.width())))
                }
            };
            result = Some(match result {
                None => byte,
                Some(low) => Expr::concat(byte, low),
            });
        }
        let value = result.unwrap_or_else(|| Expr::constant(0, INT8));
        Expr::extract(value, 0, width)
    }

    /// Writes `value` little-endian at `offset`.
    ///
    /// Booleans are stored as a single byte holding zero or one.
    pub fn write(&mut self, offset: &ExprRef, value: &ExprRef) {
        let width = value.width();
        let bytes = bytes_for_width(width);
        let value = if width % BYTE_WIDTH_BITS == 0 {
            value.clone()
        } else {
            Expr::zext(value.clone(), (bytes as Width) * BYTE_WIDTH_BITS)
        };

        for i in 0..bytes {
            let byte = Expr::extract(value.clone(), (i as Width) * BYTE_WIDTH_BITS, INT8);
            match offset.as_constant() {
                Some(base) => self.write8(base + i, &byte),
                None => self.write8_symbolic(
                    &Expr::add(offset.clone(), Expr::constant(i, offset.width())),
                    &byte,
                ),
            }
        }
    }
}

/// Gets the number of bytes needed to store a `width`-bit value.
#[must_use]
pub fn bytes_for_width(width: Width) -> u64 {
    u64::from((width + BYTE_WIDTH_BITS - 1) / BYTE_WIDTH_BITS)
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use proptest::prelude::*;

    use crate::{
        expr::{Array, Assignment, Expr, ExprRef},
        memory::{
            object::{AllocationSite, MemoryObject, ObjectId},
            object_state::ObjectState,
        },
    };

    fn state(size: u64) -> ObjectState {
        let object = MemoryObject::new(ObjectId(1), 0x1000, size, "buf", false, false, false, AllocationSite::Unknown);
        ObjectState::new(Arc::new(object))
    }

    fn symbolic_byte(name: &str) -> ExprRef {
        Expr::read(
            crate::expr::UpdateList::new(Array::symbolic(name, 1)),
            Expr::constant(0, 32),
        )
    }

    #[test]
    fn concrete_round_trip_folds_to_constant() {
        let mut buffer = state(8);
        buffer.write(&Expr::pointer(0), &Expr::constant(0xdead_beef, 32));
        assert_eq!(buffer.read(&Expr::pointer(0), 32).as_constant(), Some(0xdead_beef));
        assert_eq!(buffer.read(&Expr::pointer(1), 16).as_constant(), Some(0xadbe));
        assert_eq!(buffer.concrete_bytes()[..4], [0xef, 0xbe, 0xad, 0xde]);
    }

    #[test]
    fn booleans_take_a_whole_byte() {
        let mut buffer = state(2);
        buffer.write(&Expr::pointer(1), &Expr::bool(true));
        assert_eq!(buffer.concrete_bytes(), &[0, 1]);
        assert!(buffer.read(&Expr::pointer(1), 1).is_true());
    }

    #[test]
    fn symbolic_bytes_read_back_as_written() {
        let mut buffer = state(4);
        let x = Expr::concat(symbolic_byte("b"), symbolic_byte("a"));
        buffer.write(&Expr::pointer(2), &x);
        assert!(!buffer.is_all_concrete());
        assert_eq!(buffer.read(&Expr::pointer(2), 16), x);

        buffer.write(&Expr::pointer(2), &Expr::constant(7, 16));
        assert!(buffer.is_all_concrete());
        assert_eq!(buffer.read(&Expr::pointer(2), 16).as_constant(), Some(7));
    }

    #[test]
    fn symbolic_offset_write_layers_over_old_contents() {
        let mut buffer = state(4);
        buffer.write(&Expr::pointer(0), &Expr::constant(0x0403_0201, 32));
        let index = Expr::zext(symbolic_byte("i"), 64);
        buffer.write(&index, &Expr::constant(0xff, 8));

        let read = buffer.read(&Expr::pointer(2), 8);
        assert!(!read.is_constant());

        let mut assignment = Assignment::new(false);
        assignment.bind(&Array::symbolic("i", 1), vec![2]);
        assert_eq!(assignment.evaluate_concrete(&read), Some(0xff));
        assignment.bind(&Array::symbolic("i", 1), vec![1]);
        assert_eq!(assignment.evaluate_concrete(&read), Some(3));

        // A later concrete write wins over the symbolic one.
        buffer.write8(2, &Expr::constant(0x55, 8));
        assert_eq!(buffer.read(&Expr::pointer(2), 8).as_constant(), Some(0x55));
    }

    #[test]
    fn symbolic_offset_reads_leave_the_state_untouched() {
        let mut buffer = state(2);
        buffer.write(&Expr::pointer(0), &Expr::constant(0x2211, 16));
        let index = Expr::zext(symbolic_byte("j"), 64);
        let read = buffer.read(&index, 8);

        let mut assignment = Assignment::new(false);
        assignment.bind(&Array::symbolic("j", 1), vec![1]);
        assert_eq!(assignment.evaluate_concrete(&read), Some(0x22));
        assert!(buffer.updates().is_none());
        assert!(buffer.is_all_concrete());
    }

    #[test]
    fn symbolic_states_read_from_their_array() {
        let object = MemoryObject::new(ObjectId(2), 0x2000, 2, "in", false, false, false, AllocationSite::Unknown);
        let array = Array::symbolic("in", 2);
        let mut buffer = ObjectState::new_symbolic(Arc::new(object), array.clone());

        let mut assignment = Assignment::new(false);
        assignment.bind(&array, vec![0x34, 0x12]);
        let read = buffer.read(&Expr::pointer(0), 16);
        assert_eq!(assignment.evaluate_concrete(&read), Some(0x1234));

        buffer.initialize_to_zero();
        assert_eq!(buffer.read(&Expr::pointer(0), 16).as_constant(), Some(0));
    }

    #[derive(Clone, Debug)]
    enum Op {
        Concrete(u8, u8),
        Symbolic(u8, u8),
        AtSymbolicIndex(u8, u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..8u8, any::<u8>()).prop_map(|(i, v)| Op::Concrete(i, v)),
            (0..8u8, any::<u8>()).prop_map(|(i, v)| Op::Symbolic(i, v)),
            (0..8u8, any::<u8>()).prop_map(|(i, v)| Op::AtSymbolicIndex(i, v)),
        ]
    }

    proptest! {
        #[test]
        fn reads_agree_with_a_byte_array_model(ops in prop::collection::vec(op(), 0..12)) {
            let mut buffer = state(8);
            let mut model = [0u8; 8];
            let mut assignment = Assignment::new(false);

            for (n, op) in ops.iter().enumerate() {
                match *op {
                    Op::Concrete(i, v) => buffer.write8(u64::from(i), &Expr::constant(u64::from(v), 8)),
                    Op::Symbolic(i, v) => {
                        let name = format!("v{n}");
                        assignment.bind(&Array::symbolic(name.as_str(), 1), vec![v]);
                        buffer.write8(u64::from(i), &symbolic_byte(&name));
                    }
                    Op::AtSymbolicIndex(i, v) => {
                        let name = format!("i{n}");
                        assignment.bind(&Array::symbolic(name.as_str(), 1), vec![i]);
                        let index = Expr::zext(symbolic_byte(&name), 64);
                        buffer.write(&index, &Expr::constant(u64::from(v), 8));
                    }
                }
                let (Op::Concrete(i, v) | Op::Symbolic(i, v) | Op::AtSymbolicIndex(i, v)) = *op;
                model[i as usize] = v;
            }

            for (i, expected) in model.iter().enumerate() {
                let read = buffer.read(&Expr::pointer(i as u64), 8);
                prop_assert_eq!(assignment.evaluate_concrete(&read), Some(u64::from(*expected)));
            }
        }
    }
}
