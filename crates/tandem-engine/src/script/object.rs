//! Script object model
//!
//! Objects carry an ordered own-property table, an optional prototype, a
//! kind-specific payload and one internal native slot.

use rustc_hash::{FxHashMap, FxHashSet};
use tandem_sdk::{NativeFunction, PropertyDescriptor, PropertyKey, ScriptObjectRef, ScriptValue};

/// Kind-specific object payload
pub(crate) enum ObjectKind {
    Ordinary,
    Array(Vec<ScriptValue>),
    Function(NativeFunction),
    Error,
    Proxy {
        target: ScriptObjectRef,
        handler: ScriptObjectRef,
    },
}

/// A script heap object
pub(crate) struct ScriptObject {
    pub kind: ObjectKind,
    pub proto: Option<ScriptObjectRef>,
    pub internal_slot: Option<u64>,
    props: Vec<(PropertyKey, PropertyDescriptor)>,
    index: FxHashMap<PropertyKey, usize>,
}

impl ScriptObject {
    pub(crate) fn new(kind: ObjectKind, proto: Option<ScriptObjectRef>) -> Self {
        Self {
            kind,
            proto,
            internal_slot: None,
            props: Vec::new(),
            index: FxHashMap::default(),
        }
    }

    pub(crate) fn own(&self, key: &PropertyKey) -> Option<&PropertyDescriptor> {
        self.index.get(key).map(|&i| &self.props[i].1)
    }

    pub(crate) fn own_mut(&mut self, key: &PropertyKey) -> Option<&mut PropertyDescriptor> {
        match self.index.get(key) {
            Some(&i) => Some(&mut self.props[i].1),
            None => None,
        }
    }

    /// Define or replace an own property, keeping its original position
    pub(crate) fn define(&mut self, key: PropertyKey, desc: PropertyDescriptor) {
        match self.index.get(&key) {
            Some(&i) => self.props[i].1 = desc,
            None => {
                self.index.insert(key.clone(), self.props.len());
                self.props.push((key, desc));
            }
        }
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = &PropertyKey> {
        self.props.iter().map(|(k, _)| k)
    }

    pub(crate) fn is_callable(&self) -> bool {
        matches!(self.kind, ObjectKind::Function(_))
    }

    /// Objects directly referenced by this one
    pub(crate) fn references(&self) -> Vec<ScriptObjectRef> {
        let mut out = Vec::new();
        out.extend(self.proto);
        let mut push_value = |v: &ScriptValue| out.extend(v.as_object());
        for (_, desc) in &self.props {
            match desc {
                PropertyDescriptor::Data { value, .. } => push_value(value),
                PropertyDescriptor::Accessor { get, set, .. } => {
                    get.iter().chain(set.iter()).for_each(&mut push_value)
                }
            }
        }
        match &self.kind {
            ObjectKind::Array(elements) => elements.iter().for_each(&mut push_value),
            ObjectKind::Proxy { target, handler } => {
                out.push(*target);
                out.push(*handler);
            }
            _ => {}
        }
        out
    }
}

/// Object slab with a free list
#[derive(Default)]
pub(crate) struct ObjectHeap {
    objects: Vec<Option<ScriptObject>>,
    free: Vec<usize>,
    live: usize,
}

impl ObjectHeap {
    pub(crate) fn alloc(&mut self, object: ScriptObject) -> ScriptObjectRef {
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
        ScriptObjectRef::from_raw(slot as u32)
    }

    pub(crate) fn get(&self, obj: ScriptObjectRef) -> Option<&ScriptObject> {
        self.objects.get(obj.to_raw() as usize)?.as_ref()
    }

    pub(crate) fn get_mut(&mut self, obj: ScriptObjectRef) -> Option<&mut ScriptObject> {
        self.objects.get_mut(obj.to_raw() as usize)?.as_mut()
    }

    pub(crate) fn live(&self) -> usize {
        self.live
    }

    pub(crate) fn mark(&self, roots: impl IntoIterator<Item = ScriptObjectRef>) -> FxHashSet<ScriptObjectRef> {
        let mut marked = FxHashSet::default();
        let mut worklist: Vec<ScriptObjectRef> = roots.into_iter().collect();
        while let Some(obj) = worklist.pop() {
            if !marked.insert(obj) {
                continue;
            }
            if let Some(object) = self.get(obj) {
                worklist.extend(object.references().into_iter().filter(|r| !marked.contains(r)));
            }
        }
        marked
    }

    pub(crate) fn sweep(&mut self, marked: &FxHashSet<ScriptObjectRef>) -> usize {
        let mut freed = 0;
        for slot in 0..self.objects.len() {
            if self.objects[slot].is_some() && !marked.contains(&ScriptObjectRef::from_raw(slot as u32)) {
                self.objects[slot] = None;
                self.free.push(slot);
                self.live -= 1;
                freed += 1;
            }
        }
        freed
    }
}
