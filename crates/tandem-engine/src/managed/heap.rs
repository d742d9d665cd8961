//! Managed heap
//!
//! A slab of objects addressed by [`ObjectRef`]. Raw index 0 is reserved for
//! `null`, so slot `i` is addressed as `i + 1`.

use std::sync::Arc;

use rustc_hash::FxHashSet;
use tandem_sdk::{ClassId, ManagedValue, ObjectRef};

/// Object payload
#[derive(Debug, Clone)]
pub(crate) enum ObjectBody {
    /// Instance fields, laid out by the class table
    Fields(Vec<ManagedValue>),
    /// Immutable string
    Str(Arc<str>),
    /// Array elements
    Array(Vec<ManagedValue>),
}

/// A heap object
#[derive(Debug, Clone)]
pub(crate) struct HeapObject {
    pub class: ClassId,
    pub body: ObjectBody,
    /// Header word holding the shared reference index
    pub interop_index: Option<u32>,
    pub payload: Option<u64>,
}

impl HeapObject {
    pub(crate) fn new(class: ClassId, body: ObjectBody) -> Self {
        Self {
            class,
            body,
            interop_index: None,
            payload: None,
        }
    }

    /// Objects referenced from this object's fields or elements
    pub(crate) fn references(&self) -> impl Iterator<Item = ObjectRef> + '_ {
        let values: &[ManagedValue] = match &self.body {
            ObjectBody::Fields(values) | ObjectBody::Array(values) => values,
            ObjectBody::Str(_) => &[],
        };
        values.iter().filter_map(ManagedValue::as_object)
    }
}

/// Object slab with a free list
#[derive(Default)]
pub(crate) struct Heap {
    objects: Vec<Option<HeapObject>>,
    free: Vec<usize>,
    live: usize,
}

impl Heap {
    /// Create an empty heap
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Number of live objects
    pub(crate) fn live(&self) -> usize {
        self.live
    }

    pub(crate) fn alloc(&mut self, object: HeapObject) -> ObjectRef {
        self.live += 1;
        let slot = match self.free.pop() {
            Some(slot) => {
                self.objects[slot] = Some(object);
                slot
            }
            None => {
                self.objects.push(Some(object));
                self.objects.len() - 1
            }
        };
        ObjectRef::from_raw(slot as u32 + 1)
    }

    pub(crate) fn get(&self, obj: ObjectRef) -> Option<&HeapObject> {
        let slot = (obj.to_raw() as usize).checked_sub(1)?;
        self.objects.get(slot)?.as_ref()
    }

    pub(crate) fn get_mut(&mut self, obj: ObjectRef) -> Option<&mut HeapObject> {
        let slot = (obj.to_raw() as usize).checked_sub(1)?;
        self.objects.get_mut(slot)?.as_mut()
    }

    /// Objects whose header carries an interop index
    pub(crate) fn indexed_objects(&self) -> impl Iterator<Item = ObjectRef> + '_ {
        self.objects.iter().enumerate().filter_map(|(slot, obj)| {
            obj.as_ref()
                .filter(|o| o.interop_index.is_some())
                .map(|_| ObjectRef::from_raw(slot as u32 + 1))
        })
    }

    /// Mark everything reachable from `roots`
    pub(crate) fn mark(&self, roots: impl IntoIterator<Item = ObjectRef>) -> FxHashSet<ObjectRef> {
        let mut marked = FxHashSet::default();
        let mut worklist: Vec<ObjectRef> = roots.into_iter().collect();
        while let Some(obj) = worklist.pop() {
            if !marked.insert(obj) {
                continue;
            }
            if let Some(object) = self.get(obj) {
                worklist.extend(object.references().filter(|r| !marked.contains(r)));
            }
        }
        marked
    }

    /// Free every unmarked object, returning the freed objects' payloads
    pub(crate) fn sweep(&mut self, marked: &FxHashSet<ObjectRef>) -> (usize, Vec<u64>) {
        let mut freed = 0;
        let mut payloads = Vec::new();
        for slot in 0..self.objects.len() {
            let obj = ObjectRef::from_raw(slot as u32 + 1);
            if self.objects[slot].is_none() || marked.contains(&obj) {
                continue;
            }
            if let Some(object) = self.objects[slot].take() {
                payloads.extend(object.payload);
                self.free.push(slot);
                self.live -= 1;
                freed += 1;
            }
        }
        (freed, payloads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(refs: &[ObjectRef]) -> HeapObject {
        HeapObject::new(
            ClassId::from_raw(0),
            ObjectBody::Fields(refs.iter().map(|r| ManagedValue::object(*r)).collect()),
        )
    }

    #[test]
    fn test_refs_are_one_based() {
        let mut heap = Heap::new();
        let a = heap.alloc(instance(&[]));
        assert_eq!(a.to_raw(), 1);
        assert!(heap.get(ObjectRef::from_raw(0)).is_none());
        assert!(heap.get(a).is_some());
    }

    #[test]
    fn test_mark_sweep_frees_unreachable() {
        let mut heap = Heap::new();
        let leaf = heap.alloc(instance(&[]));
        let root = heap.alloc(instance(&[leaf]));
        let garbage = heap.alloc(instance(&[]));
        heap.get_mut(garbage).unwrap().payload = Some(77);

        let marked = heap.mark([root]);
        let (freed, payloads) = heap.sweep(&marked);
        assert_eq!(freed, 1);
        assert_eq!(payloads, vec![77]);
        assert!(heap.get(garbage).is_none());
        assert!(heap.get(leaf).is_some());
        assert_eq!(heap.live(), 2);

        // freed slot is reused
        let again = heap.alloc(instance(&[]));
        assert_eq!(again, garbage);
    }
}
