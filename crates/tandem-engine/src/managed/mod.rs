//! Reference managed VM ("Runtime A")
//!
//! A small statically-typed object runtime: a class table with single
//! inheritance and interfaces, a slab heap with mark-sweep collection,
//! per-thread handle scopes and execution modes, and virtual dispatch by
//! name and descriptor.

mod class;
mod heap;
mod vm;

pub use vm::{ManagedGcStats, ManagedVm};
