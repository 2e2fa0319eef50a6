//! This module contains the boundary between the executor and functions that
//! are implemented by the host rather than by the program under test.
//!
//! Before an external call the executor copies the concrete contents of every
//! object into a [`HostMemory`] image, hands the image and the concrete
//! arguments to an [`ExternalDispatcher`], and afterwards copies any bytes the
//! call changed back into the state.

use std::{collections::BTreeMap, fmt::Debug};

use rustc_hash::FxHashMap;

use crate::error::external::{Error, Result};

/// A concrete image of the memory of an execution state, made of disjoint
/// regions keyed by their start address.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HostMemory {
    regions: BTreeMap<u64, Vec<u8>>,
}

impl HostMemory {
    /// Creates an image with no mapped regions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `bytes` at `address`, replacing any region that started there.
    pub fn map(&mut self, address: u64, bytes: Vec<u8>) {
        self.regions.insert(address, bytes);
    }

    /// Gets the region that starts exactly at `address`.
    #[must_use]
    pub fn region(&self, address: u64) -> Option<&[u8]> {
        self.regions.get(&address).map(Vec::as_slice)
    }

    /// Iterates over the mapped regions in address order.
    pub fn regions(&self) -> impl Iterator<Item = (u64, &[u8])> {
        self.regions.iter().map(|(a, b)| (*a, b.as_slice()))
    }

    fn locate(&self, address: u64, len: u64) -> Result<(u64, usize)> {
        let invalid = || Error::InvalidMemoryAccess { address, len };
        let (start, bytes) = self.regions.range(..=address).next_back().ok_or_else(invalid)?;
        let offset = address - start;
        let end = offset.checked_add(len).ok_or_else(invalid)?;
        if end > bytes.len() as u64 {
            return Err(invalid());
        }
        let offset = usize::try_from(offset).map_err(|_| invalid())?;
        Ok((*start, offset))
    }

    /// Reads `len` bytes at `address`, which must lie within a single region.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the bytes are not all mapped in the same region.
    pub fn read(&self, address: u64, len: u64) -> Result<&[u8]> {
        let (start, offset) = self.locate(address, len)?;
        let len = usize::try_from(len).map_err(|_| Error::InvalidMemoryAccess { address, len })?;
        Ok(&self.regions[&start][offset..offset + len])
    }

    /// Writes `bytes` at `address`, which must lie within a single region.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the bytes are not all mapped in the same region.
    pub fn write(&mut self, address: u64, bytes: &[u8]) -> Result<()> {
        let (start, offset) = self.locate(address, bytes.len() as u64)?;
        let region = self
            .regions
            .get_mut(&start)
            .ok_or(Error::InvalidMemoryAccess {
                address,
                len: bytes.len() as u64,
            })?;
        region[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

/// The interface through which the executor calls functions implemented by
/// the host.
pub trait ExternalDispatcher: Debug {
    /// Calls the host function `name` with the concrete `args`, giving it
    /// access to the concrete image of the caller's memory.
    ///
    /// Returns the result of the call, or [`None`] for functions that return
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the function is unknown or fails.
    fn call(&mut self, name: &str, args: &[u64], memory: &mut HostMemory) -> Result<Option<u64>>;
}

/// A dynamically dispatched [`ExternalDispatcher`] instance.
pub type DynDispatcher = Box<dyn ExternalDispatcher>;

/// A dispatcher that knows no functions at all.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct NullDispatcher;

impl ExternalDispatcher for NullDispatcher {
    fn call(&mut self, name: &str, _args: &[u64], _memory: &mut HostMemory) -> Result<Option<u64>> {
        Err(Error::Unsupported { name: name.into() })
    }
}

/// The signature of a host function registered with a
/// [`FunctionTableDispatcher`].
pub type HostFunction = Box<dyn FnMut(&[u64], &mut HostMemory) -> Result<Option<u64>>>;

/// A dispatcher that looks functions up by name in a table of closures.
#[derive(Default)]
pub struct FunctionTableDispatcher {
    functions: FxHashMap<String, HostFunction>,
}

impl FunctionTableDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `function` under `name`, replacing any previous entry.
    #[must_use]
    pub fn with_function(
        mut self,
        name: impl Into<String>,
        function: impl FnMut(&[u64], &mut HostMemory) -> Result<Option<u64>> + 'static,
    ) -> Self {
        self.functions.insert(name.into(), Box::new(function));
        self
    }

    /// Checks if a function called `name` is registered.
    #[must_use]
    pub fn knows(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

impl Debug for FunctionTableDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionTableDispatcher")
            .field("functions", &names)
            .finish()
    }
}

impl ExternalDispatcher for FunctionTableDispatcher {
    fn call(&mut self, name: &str, args: &[u64], memory: &mut HostMemory) -> Result<Option<u64>> {
        let function = self
            .functions
            .get_mut(name)
            .ok_or_else(|| Error::Unsupported { name: name.into() })?;
        function(args, memory)
    }
}

#[cfg(test)]
mod test {
    use crate::{
        error::external::Error,
        external::{ExternalDispatcher, FunctionTableDispatcher, HostMemory, NullDispatcher},
    };

    #[test]
    fn accesses_stay_within_regions() -> anyhow::Result<()> {
        let mut memory = HostMemory::new();
        memory.map(0x100, vec![0; 4]);
        memory.write(0x102, &[7, 8])?;
        assert_eq!(memory.read(0x100, 4)?, &[0, 0, 7, 8]);
        assert_eq!(
            memory.read(0x102, 4),
            Err(Error::InvalidMemoryAccess {
                address: 0x102,
                len:     4,
            })
        );
        assert!(memory.write(0x50, &[1]).is_err());
        Ok(())
    }

    #[test]
    fn table_dispatches_by_name() -> anyhow::Result<()> {
        let mut dispatcher = FunctionTableDispatcher::new()
            .with_function("add", |args, _| Ok(Some(args[0] + args[1])))
            .with_function("poke", |args, memory| {
                memory.write(args[0], &[0xff])?;
                Ok(None)
            });
        let mut memory = HostMemory::new();
        memory.map(0x10, vec![0]);

        assert_eq!(dispatcher.call("add", &[2, 3], &mut memory)?, Some(5));
        assert_eq!(dispatcher.call("poke", &[0x10], &mut memory)?, None);
        assert_eq!(memory.region(0x10), Some(&[0xff][..]));
        assert!(matches!(
            dispatcher.call("missing", &[], &mut memory),
            Err(Error::Unsupported { .. })
        ));
        assert!(NullDispatcher.call("add", &[], &mut memory).is_err());
        Ok(())
    }
}
