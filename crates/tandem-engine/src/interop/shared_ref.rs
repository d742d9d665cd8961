//! Shared reference records
//!
//! A [`SharedRef`] links one managed object to one script object. Its flags
//! word packs the identity kind, the cross-heap mark bit and the free-list
//! link:
//!
//! ```text
//!  31                               3   2      1        0
//! +----------------------------------+------+--------+---------+
//! |          next free index         | MARK | SCRIPT | MANAGED |
//! +----------------------------------+------+--------+---------+
//! ```
//!
//! The flags word is only ever changed through compare-and-swap loops so a
//! background marker can run while mutators create and release references.

use std::sync::atomic::{AtomicU32, Ordering};

use tandem_sdk::{ObjectRef, PersistentHandle, ScriptObjectRef};

/// State lives in the managed object
pub const MANAGED_BIT: u32 = 1 << 0;
/// State lives in the script object
pub const SCRIPT_BIT: u32 = 1 << 1;
/// Cross-heap collector mark
pub const MARK_BIT: u32 = 1 << 2;
/// Shift of the free-list index
pub const NEXT_SHIFT: u32 = 3;

const KIND_MASK: u32 = MANAGED_BIT | SCRIPT_BIT;
const LOW_MASK: u32 = (1 << NEXT_SHIFT) - 1;

/// Which side holds the authoritative state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    /// Managed object; the script object is a view (class wrappers)
    ManagedOwned,
    /// Script object; the managed object is a proxy (interface proxies)
    ScriptOwned,
    /// Shared state (records exchanged as object literals)
    Hybrid,
}

impl RefKind {
    /// Flag bits of this kind
    pub const fn bits(self) -> u32 {
        match self {
            RefKind::ManagedOwned => MANAGED_BIT,
            RefKind::ScriptOwned => SCRIPT_BIT,
            RefKind::Hybrid => MANAGED_BIT | SCRIPT_BIT,
        }
    }

    /// Decode the kind bits of a flags word
    pub const fn from_bits(flags: u32) -> Option<Self> {
        match flags & KIND_MASK {
            MANAGED_BIT => Some(RefKind::ManagedOwned),
            SCRIPT_BIT => Some(RefKind::ScriptOwned),
            KIND_MASK => Some(RefKind::Hybrid),
            _ => None,
        }
    }

    /// Whether the managed side is authoritative
    pub const fn has_managed_state(self) -> bool {
        self.bits() & MANAGED_BIT != 0
    }

    /// Whether the script side is authoritative
    pub const fn has_script_state(self) -> bool {
        self.bits() & SCRIPT_BIT != 0
    }
}

/// Index of a shared reference (1-based; 0 means none)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefId(u32);

impl RefId {
    /// Create from a slot index; `None` for the reserved index 0
    pub const fn new(index: u32) -> Option<Self> {
        if index == 0 {
            None
        } else {
            Some(Self(index))
        }
    }

    /// Slot index
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// One identity record
#[derive(Debug, Default)]
pub struct SharedRef {
    flags: AtomicU32,
    managed: AtomicU32,
    script: AtomicU32,
    handle: AtomicU32,
}

impl SharedRef {
    /// Fill a free slot. The identity fields are written before the kind
    /// bits are published.
    pub(crate) fn init(
        &self,
        managed: ObjectRef,
        script: ScriptObjectRef,
        handle: PersistentHandle,
        kind: RefKind,
        marked: bool,
    ) {
        self.managed.store(managed.to_raw(), Ordering::SeqCst);
        self.script.store(script.to_raw(), Ordering::SeqCst);
        self.handle.store(handle.to_raw(), Ordering::SeqCst);
        let mark = if marked { MARK_BIT } else { 0 };
        self.flags.store(kind.bits() | mark, Ordering::SeqCst);
    }

    /// Raw flags word
    pub fn flags(&self) -> u32 {
        self.flags.load(Ordering::SeqCst)
    }

    /// Identity kind, `None` when the slot is free
    pub fn kind(&self) -> Option<RefKind> {
        RefKind::from_bits(self.flags())
    }

    /// Whether the slot holds a live reference
    pub fn is_live(&self) -> bool {
        self.kind().is_some()
    }

    /// Whether the mark bit is set
    pub fn is_marked(&self) -> bool {
        self.flags() & MARK_BIT != 0
    }

    /// Managed side
    pub fn managed(&self) -> ObjectRef {
        ObjectRef::from_raw(self.managed.load(Ordering::SeqCst))
    }

    /// Script side
    pub fn script(&self) -> ScriptObjectRef {
        ScriptObjectRef::from_raw(self.script.load(Ordering::SeqCst))
    }

    /// Persistent handle keeping the script side alive
    pub fn handle(&self) -> PersistentHandle {
        PersistentHandle::from_raw(self.handle.load(Ordering::SeqCst))
    }

    /// Free-list successor
    pub fn next(&self) -> u32 {
        self.flags() >> NEXT_SHIFT
    }

    /// Set `mask` if absent; true when this call made the transition
    pub fn set_bit(&self, mask: u32) -> bool {
        let mut current = self.flags.load(Ordering::SeqCst);
        loop {
            if current & mask == mask {
                return false;
            }
            match self.flags.compare_exchange_weak(
                current,
                current | mask,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Clear `mask` if present; true when this call made the transition
    pub fn clear_bit(&self, mask: u32) -> bool {
        let mut current = self.flags.load(Ordering::SeqCst);
        loop {
            if current & mask == 0 {
                return false;
            }
            match self.flags.compare_exchange_weak(
                current,
                current & !mask,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Overwrite the free-list successor, keeping the low bits
    pub fn set_next(&self, next: u32) {
        let mut current = self.flags.load(Ordering::SeqCst);
        loop {
            let updated = (current & LOW_MASK) | (next << NEXT_SHIFT);
            match self.flags.compare_exchange_weak(
                current,
                updated,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Set the mark bit of a live reference; true on the unmarked to marked
    /// transition
    pub fn mark(&self) -> bool {
        let mut current = self.flags.load(Ordering::SeqCst);
        loop {
            if current & KIND_MASK == 0 || current & MARK_BIT != 0 {
                return false;
            }
            match self.flags.compare_exchange_weak(
                current,
                current | MARK_BIT,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Turn the slot into a free-list entry pointing at `next`
    pub(crate) fn free(&self, next: u32) {
        self.clear_bit(KIND_MASK | MARK_BIT);
        self.set_next(next);
    }
}
