//! This module contains custom data structures used in the implementation of
//! the executor.

pub mod immutable_map;

pub use immutable_map::ImmutableMap;
