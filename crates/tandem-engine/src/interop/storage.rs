//! Shared reference storage
//!
//! A fixed-capacity slab of [`SharedRef`] records. Lookup is O(1) from both
//! sides: the managed object's header carries the slot index (its interop
//! index) and the script object's internal slot carries the same index.
//! Both lookups verify the slot still points back at the object, so a stale
//! index left on a collected object is a miss, not a false hit.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tandem_sdk::{
    InteropError, InteropResult, ManagedRuntime, ObjectRef, PersistentHandle, ScriptObjectRef,
    ScriptRuntime, ScriptValue,
};

use super::shared_ref::{RefId, RefKind, SharedRef, MARK_BIT};

/// Snapshot of a live reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefView {
    /// Slot
    pub id: RefId,
    /// Managed side
    pub managed: ObjectRef,
    /// Script side
    pub script: ScriptObjectRef,
    /// Persistent handle on the script side
    pub handle: PersistentHandle,
    /// Identity kind
    pub kind: RefKind,
}

/// Phase of the cross-heap mark cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkPhase {
    /// No cycle in progress
    Idle,
    /// Marks are being set
    Marking,
    /// Marking finished; the marks are valid for a sweep
    Marked,
    /// Unmarked references are being released
    Sweeping,
}

impl MarkPhase {
    const fn to_raw(self) -> u8 {
        self as u8
    }

    const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => MarkPhase::Marking,
            2 => MarkPhase::Marked,
            3 => MarkPhase::Sweeping,
            _ => MarkPhase::Idle,
        }
    }
}

struct AllocState {
    /// Head of the free list (0 = empty)
    free_head: u32,
    /// Slots ever handed out
    high_water: u32,
    live: usize,
}

/// The shared reference slab
pub struct RefStorage {
    managed: Arc<dyn ManagedRuntime>,
    script: Arc<dyn ScriptRuntime>,
    /// Slot 0 is reserved
    slots: Box<[SharedRef]>,
    alloc: Mutex<AllocState>,
    phase: AtomicU8,
    /// Held for the whole of one mark pass or one sweep
    pass: Mutex<()>,
    /// Bridge-owned script objects traced as roots by the cross-heap pass
    script_roots: Mutex<Vec<ScriptObjectRef>>,
}

impl RefStorage {
    /// Create a slab holding up to `capacity` references
    pub fn new(
        managed: Arc<dyn ManagedRuntime>,
        script: Arc<dyn ScriptRuntime>,
        capacity: usize,
    ) -> Self {
        let slots = (0..=capacity).map(|_| SharedRef::default()).collect();
        Self {
            managed,
            script,
            slots,
            alloc: Mutex::new(AllocState {
                free_head: 0,
                high_water: 0,
                live: 0,
            }),
            phase: AtomicU8::new(MarkPhase::Idle.to_raw()),
            pass: Mutex::new(()),
            script_roots: Mutex::new(Vec::new()),
        }
    }

    /// Maximum number of live references
    pub fn capacity(&self) -> usize {
        self.slots.len() - 1
    }

    /// Number of live references
    pub fn live_count(&self) -> usize {
        self.alloc.lock().live
    }

    pub(crate) fn managed(&self) -> &dyn ManagedRuntime {
        &*self.managed
    }

    pub(crate) fn script(&self) -> &dyn ScriptRuntime {
        &*self.script
    }

    fn lookup(&self, index: u64) -> Option<(RefId, &SharedRef)> {
        let index = u32::try_from(index).ok()?;
        let id = RefId::new(index)?;
        let slot = self.slots.get(index as usize)?;
        slot.is_live().then_some((id, slot))
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Reference whose managed side is `obj`
    pub fn find_by_managed(&self, obj: ObjectRef) -> Option<RefId> {
        let index = self.managed.interop_index(obj)?;
        let (id, slot) = self.lookup(index as u64)?;
        (slot.managed() == obj).then_some(id)
    }

    /// Reference whose script side is `obj`
    pub fn find_by_script(&self, obj: ScriptObjectRef) -> Option<RefId> {
        let index = self.script.internal_slot(obj)?;
        let (id, slot) = self.lookup(index)?;
        (slot.script() == obj).then_some(id)
    }

    /// Reference for a script value, if it is a mapped object
    pub fn find_by_value(&self, value: &ScriptValue) -> Option<RefId> {
        self.find_by_script(value.as_object()?)
    }

    /// Snapshot of a live reference
    pub fn view(&self, id: RefId) -> Option<RefView> {
        let slot = self.slots.get(id.index() as usize)?;
        Some(RefView {
            id,
            managed: slot.managed(),
            script: slot.script(),
            handle: slot.handle(),
            kind: slot.kind()?,
        })
    }

    /// Snapshot of a live reference whose kind must satisfy `allowed`
    pub fn require(&self, id: RefId, allowed: impl Fn(RefKind) -> bool, what: &str) -> InteropResult<RefView> {
        let view = self
            .view(id)
            .ok_or_else(|| InteropError::identity(format!("shared reference {} is not live", id.index())))?;
        if !allowed(view.kind) {
            return Err(InteropError::identity(format!(
                "{} is not supported by a {:?} reference",
                what, view.kind
            )));
        }
        Ok(view)
    }

    /// Every live reference
    pub fn live_refs(&self) -> Vec<RefId> {
        let high_water = self.alloc.lock().high_water;
        (1..=high_water)
            .filter(|&i| self.slots[i as usize].is_live())
            .filter_map(RefId::new)
            .collect()
    }

    // ========================================================================
    // Creation and release
    // ========================================================================

    /// Link `managed` and `script`
    ///
    /// Fails without mutating anything when either side is already mapped or
    /// the slab is full.
    pub fn create(
        &self,
        managed: ObjectRef,
        script: ScriptObjectRef,
        kind: RefKind,
    ) -> InteropResult<RefId> {
        // check and publish under one lock
        let mut alloc = self.alloc.lock();
        if let Some(existing) = self.find_by_managed(managed) {
            return Err(InteropError::identity(format!(
                "managed object {} is already mapped by reference {}",
                managed.to_raw(),
                existing.index()
            )));
        }
        if let Some(existing) = self.find_by_script(script) {
            return Err(InteropError::identity(format!(
                "script object {} is already mapped by reference {}",
                script.to_raw(),
                existing.index()
            )));
        }

        let index = if alloc.free_head != 0 {
            let index = alloc.free_head;
            alloc.free_head = self.slots[index as usize].next();
            index
        } else if (alloc.high_water as usize) < self.capacity() {
            alloc.high_water += 1;
            alloc.high_water
        } else {
            return Err(InteropError::RefStorageFull(self.capacity()));
        };
        let id = RefId::new(index).ok_or_else(|| InteropError::identity("slot 0 handed out"))?;
        alloc.live += 1;
        let handle = self.script.create_persistent(ScriptValue::Object(script));
        self.slots[index as usize].init(
            managed,
            script,
            handle,
            kind,
            self.phase() != MarkPhase::Idle,
        );
        self.managed.set_interop_index(managed, Some(id.index()));
        self.script.set_internal_slot(script, Some(id.index() as u64));
        Ok(id)
    }

    /// Unlink a reference and return its slot to the free list
    pub fn release(&self, id: RefId) -> bool {
        let Some(slot) = self.slots.get(id.index() as usize) else {
            return false;
        };
        let mut alloc = self.alloc.lock();
        let Some(view) = self.view(id) else {
            return false;
        };
        self.script.delete_persistent(view.handle);
        if self.managed.interop_index(view.managed) == Some(id.index()) {
            self.managed.set_interop_index(view.managed, None);
        }
        if self.script.internal_slot(view.script) == Some(id.index() as u64) {
            self.script.set_internal_slot(view.script, None);
        }
        slot.free(alloc.free_head);
        alloc.free_head = id.index();
        alloc.live -= 1;
        true
    }

    // ========================================================================
    // Marking
    // ========================================================================

    /// Mark a reference; true on the unmarked to marked transition
    pub fn mark(&self, id: RefId) -> bool {
        self.slots
            .get(id.index() as usize)
            .is_some_and(SharedRef::mark)
    }

    /// Whether a reference is marked
    pub fn is_marked(&self, id: RefId) -> bool {
        self.slots
            .get(id.index() as usize)
            .is_some_and(SharedRef::is_marked)
    }

    /// Current phase of the mark cycle
    pub fn phase(&self) -> MarkPhase {
        MarkPhase::from_raw(self.phase.load(Ordering::SeqCst))
    }

    fn transition(&self, from: MarkPhase, to: MarkPhase) -> bool {
        self.phase
            .compare_exchange(from.to_raw(), to.to_raw(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Clear every mark and begin a mark cycle
    ///
    /// References created from now until the cycle is swept are born marked.
    /// Returns false (and changes nothing) while another pass is marking or
    /// a sweep is running.
    pub fn unmark_all(&self) -> bool {
        let started = [MarkPhase::Idle, MarkPhase::Marked]
            .into_iter()
            .any(|from| self.transition(from, MarkPhase::Marking));
        if !started {
            return false;
        }
        let high_water = self.alloc.lock().high_water as usize;
        for slot in &self.slots[1..=high_water] {
            slot.clear_bit(MARK_BIT);
        }
        true
    }

    /// Declare the marks of the current cycle complete
    pub fn finish_marking(&self) -> bool {
        self.transition(MarkPhase::Marking, MarkPhase::Marked)
    }

    /// Trace `objects` as script roots in every later mark pass
    ///
    /// The bridge holds wrapper constructors and prototypes through
    /// persistent handles, which the cross-heap pass does not follow.
    pub fn add_script_roots(&self, objects: impl IntoIterator<Item = ScriptObjectRef>) {
        self.script_roots.lock().extend(objects);
    }

    /// Bridge-owned script roots
    pub fn script_roots(&self) -> Vec<ScriptObjectRef> {
        self.script_roots.lock().clone()
    }

    /// Serialize collector passes; a mark pass never overlaps another pass
    pub(crate) fn lock_pass(&self) -> MutexGuard<'_, ()> {
        self.pass.lock()
    }

    /// Whether a mark pass is in progress
    pub fn is_marking(&self) -> bool {
        self.phase() == MarkPhase::Marking
    }

    /// Release every live reference left unmarked by a completed cycle and
    /// end the cycle; returns the released slots
    pub(crate) fn sweep_unmarked(&self) -> InteropResult<Vec<RefId>> {
        if !self.transition(MarkPhase::Marked, MarkPhase::Sweeping) {
            return Err(InteropError::identity(format!(
                "cannot sweep shared references in phase {:?}",
                self.phase()
            )));
        }
        let released: Vec<RefId> = self
            .live_refs()
            .into_iter()
            .filter(|&id| !self.is_marked(id))
            .filter(|&id| self.release(id))
            .collect();
        self.phase.store(MarkPhase::Idle.to_raw(), Ordering::SeqCst);
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::ManagedVm;
    use crate::script::ScriptEngine;
    use tandem_sdk::WellKnownClass;

    fn storage(capacity: usize) -> (Arc<ManagedVm>, Arc<ScriptEngine>, RefStorage) {
        let vm = ManagedVm::new();
        let engine = ScriptEngine::new();
        let refs = RefStorage::new(vm.clone(), engine.clone(), capacity);
        (vm, engine, refs)
    }

    fn object(vm: &ManagedVm) -> ObjectRef {
        vm.alloc_object(vm.well_known(WellKnownClass::Object)).unwrap()
    }

    #[test]
    fn test_bijection() {
        let (vm, engine, refs) = storage(4);
        let m = object(&vm);
        let s = engine.new_object();
        let id = refs.create(m, s, RefKind::ManagedOwned).unwrap();
        assert_eq!(refs.find_by_managed(m), Some(id));
        assert_eq!(refs.find_by_script(s), Some(id));
        let view = refs.view(id).unwrap();
        assert_eq!(refs.view(refs.find_by_script(view.script).unwrap()).unwrap().managed, m);
        assert_eq!(refs.live_count(), 1);
    }

    #[test]
    fn test_duplicate_create_is_rejected_without_mutation() {
        let (vm, engine, refs) = storage(4);
        let m = object(&vm);
        let s1 = engine.new_object();
        let s2 = engine.new_object();
        let id = refs.create(m, s1, RefKind::ManagedOwned).unwrap();

        let err = refs.create(m, s2, RefKind::ManagedOwned).unwrap_err();
        assert!(matches!(err, InteropError::IdentityInconsistency(_)));
        assert_eq!(refs.find_by_managed(m), Some(id));
        assert_eq!(refs.find_by_script(s2), None);

        let other = object(&vm);
        assert!(refs.create(other, s1, RefKind::Hybrid).is_err());
        assert_eq!(refs.find_by_managed(other), None);
        assert_eq!(refs.live_count(), 1);
    }

    #[test]
    fn test_full_storage_mutates_nothing() {
        let (vm, engine, refs) = storage(1);
        refs.create(object(&vm), engine.new_object(), RefKind::ManagedOwned)
            .unwrap();
        let m = object(&vm);
        let s = engine.new_object();
        let handles = engine.persistent_count();
        let err = refs.create(m, s, RefKind::ManagedOwned).unwrap_err();
        assert!(matches!(err, InteropError::RefStorageFull(1)));
        assert_eq!(vm.interop_index(m), None);
        assert_eq!(engine.internal_slot(s), None);
        assert_eq!(engine.persistent_count(), handles);
    }

    #[test]
    fn test_release_recycles_slot() {
        let (vm, engine, refs) = storage(2);
        let m = object(&vm);
        let s = engine.new_object();
        let id = refs.create(m, s, RefKind::ScriptOwned).unwrap();
        assert!(refs.release(id));
        assert!(!refs.release(id));
        assert_eq!(refs.find_by_managed(m), None);
        assert_eq!(refs.find_by_script(s), None);
        assert_eq!(engine.persistent_count(), 0);

        let again = refs.create(object(&vm), engine.new_object(), RefKind::Hybrid).unwrap();
        assert_eq!(again, id);
    }

    #[test]
    fn test_mark_cycle() {
        let (vm, engine, refs) = storage(4);
        let id = refs.create(object(&vm), engine.new_object(), RefKind::ManagedOwned).unwrap();
        assert!(refs.mark(id));
        assert!(!refs.mark(id));
        assert!(refs.unmark_all());
        assert!(refs.mark(id));

        // born marked until the cycle is swept
        let late = refs.create(object(&vm), engine.new_object(), RefKind::ManagedOwned).unwrap();
        assert!(refs.is_marked(late));
        assert!(refs.finish_marking());
        let after = refs.create(object(&vm), engine.new_object(), RefKind::ManagedOwned).unwrap();
        assert!(refs.is_marked(after));

        assert_eq!(refs.sweep_unmarked().unwrap(), Vec::<RefId>::new());
        assert_eq!(refs.phase(), MarkPhase::Idle);
        let idle = refs.create(object(&vm), engine.new_object(), RefKind::ManagedOwned).unwrap();
        assert!(!refs.is_marked(idle));
    }

    #[test]
    fn test_sweep_releases_unmarked_only() {
        let (vm, engine, refs) = storage(4);
        let kept = refs.create(object(&vm), engine.new_object(), RefKind::ManagedOwned).unwrap();
        let dropped = refs.create(object(&vm), engine.new_object(), RefKind::Hybrid).unwrap();
        assert!(refs.sweep_unmarked().is_err());

        refs.unmark_all();
        refs.mark(kept);
        refs.finish_marking();
        assert_eq!(refs.sweep_unmarked().unwrap(), vec![dropped]);
        assert!(refs.view(kept).is_some());
        assert_eq!(refs.live_count(), 1);
    }

    #[test]
    fn test_require_kind() {
        let (vm, engine, refs) = storage(4);
        let id = refs.create(object(&vm), engine.new_object(), RefKind::ScriptOwned).unwrap();
        assert!(refs.require(id, RefKind::has_script_state, "call").is_ok());
        let err = refs.require(id, RefKind::has_managed_state, "unwrap").unwrap_err();
        assert!(matches!(err, InteropError::IdentityInconsistency(_)));
    }

    #[test]
    fn test_racing_creates_map_once() {
        let (vm, engine, refs) = storage(16);
        let m = object(&vm);
        let won: Vec<RefId> = std::thread::scope(|s| {
            let workers: Vec<_> = (0..8)
                .map(|_| s.spawn(|| refs.create(m, engine.new_object(), RefKind::ManagedOwned).ok()))
                .collect();
            workers.into_iter().filter_map(|w| w.join().unwrap()).collect()
        });
        assert_eq!(won.len(), 1);
        assert_eq!(refs.find_by_managed(m), Some(won[0]));
        assert_eq!(refs.live_count(), 1);
    }

    #[test]
    fn test_release_out_of_range_is_a_miss() {
        let (_vm, _engine, refs) = storage(2);
        assert!(!refs.release(RefId::new(1000).unwrap()));
        assert!(!refs.release(RefId::new(2).unwrap()));
        assert_eq!(refs.live_count(), 0);
    }

    #[test]
    fn test_racing_releases_free_once() {
        let (vm, engine, refs) = storage(4);
        let id = refs.create(object(&vm), engine.new_object(), RefKind::Hybrid).unwrap();
        let freed = std::thread::scope(|s| {
            let workers: Vec<_> = (0..8).map(|_| s.spawn(|| refs.release(id))).collect();
            workers.into_iter().map(|w| w.join().unwrap()).filter(|&f| f).count()
        });
        assert_eq!(freed, 1);
        assert_eq!(refs.live_count(), 0);

        // the slot is on the free list once
        let a = refs.create(object(&vm), engine.new_object(), RefKind::Hybrid).unwrap();
        let b = refs.create(object(&vm), engine.new_object(), RefKind::Hybrid).unwrap();
        assert_ne!(a, b);
        assert_eq!(refs.live_count(), 2);
    }
}
