//! Scoped runtime state guards
//!
//! Both guards restore the runtime on drop, so every exit path of a boundary
//! crossing (including `?` and panics) leaves the worker as it found it.

use tandem_sdk::{ExecutionMode, LocalSlot, ManagedRuntime, ObjectRef, ScopeId};

/// Switches the worker's execution mode for the guard's lifetime
pub struct ModeScope<'a> {
    managed: &'a dyn ManagedRuntime,
    previous: ExecutionMode,
}

impl<'a> ModeScope<'a> {
    /// Enter `mode`
    pub fn enter(managed: &'a dyn ManagedRuntime, mode: ExecutionMode) -> Self {
        let previous = managed.set_execution_mode(mode);
        log::trace!("execution mode {:?} -> {:?}", previous, mode);
        Self { managed, previous }
    }
}

impl Drop for ModeScope<'_> {
    fn drop(&mut self) {
        self.managed.set_execution_mode(self.previous);
    }
}

/// A handle scope: objects rooted through it survive managed collections
/// until the guard drops
pub struct HandleScope<'a> {
    managed: &'a dyn ManagedRuntime,
    id: ScopeId,
}

impl<'a> HandleScope<'a> {
    /// Open a scope on the current worker
    pub fn open(managed: &'a dyn ManagedRuntime) -> Self {
        let id = managed.open_scope();
        Self { managed, id }
    }

    /// Root an object
    pub fn root(&self, obj: ObjectRef) -> LocalSlot {
        self.managed.scope_root(obj)
    }

    /// Re-read a rooted object
    pub fn get(&self, slot: LocalSlot) -> Option<ObjectRef> {
        self.managed.scope_get(slot)
    }
}

impl Drop for HandleScope<'_> {
    fn drop(&mut self) {
        self.managed.close_scope(self.id);
    }
}
