//! The script engine
//!
//! [`ScriptEngine`] is the in-process reference implementation of
//! [`ScriptRuntime`]. There is no interpreter: every function is a native
//! Rust closure. Locks are never held while a closure, getter, setter or
//! proxy trap runs, so script code may re-enter the engine freely.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tandem_sdk::{
    BuiltinShape, CallArgs, NativeFunction, PersistentHandle, PropertyDescriptor, PropertyKey,
    ScriptErrorKind, ScriptObjectRef, ScriptResult, ScriptRuntime, ScriptValue,
};

use super::builtins::{self, Realm};
use super::object::{ObjectHeap, ObjectKind, ScriptObject};

/// Statistics of one script collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptGcStats {
    /// Objects reclaimed
    pub freed: usize,
    /// Objects alive afterwards
    pub live: usize,
}

/// Persistent handle slab
#[derive(Default)]
struct HandleTable {
    slots: Vec<Option<ScriptValue>>,
    free: Vec<u32>,
}

impl HandleTable {
    fn create(&mut self, value: ScriptValue) -> PersistentHandle {
        match self.free.pop() {
            Some(raw) => {
                self.slots[raw as usize] = Some(value);
                PersistentHandle::from_raw(raw)
            }
            None => {
                self.slots.push(Some(value));
                PersistentHandle::from_raw(self.slots.len() as u32 - 1)
            }
        }
    }

    fn get(&self, handle: PersistentHandle) -> Option<ScriptValue> {
        self.slots.get(handle.to_raw() as usize)?.clone()
    }

    fn delete(&mut self, handle: PersistentHandle) {
        if let Some(slot) = self.slots.get_mut(handle.to_raw() as usize) {
            if slot.take().is_some() {
                self.free.push(handle.to_raw());
            }
        }
    }

    fn live(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    fn objects(&self) -> impl Iterator<Item = ScriptObjectRef> + '_ {
        self.slots.iter().flatten().filter_map(ScriptValue::as_object)
    }
}

/// Result of one step of a property lookup, computed under the heap lock
enum GetStep {
    Value(ScriptValue),
    Getter(ScriptValue),
    Proxy(ScriptObjectRef, ScriptObjectRef),
    Next(ScriptObjectRef),
    Dead,
}

enum SetStep {
    Done,
    Setter(ScriptValue),
    ReadOnly,
    Proxy(ScriptObjectRef, ScriptObjectRef),
    Next(ScriptObjectRef),
    DefineOnReceiver,
    Dead,
}

/// Reference script engine
pub struct ScriptEngine {
    heap: Mutex<ObjectHeap>,
    handles: Mutex<HandleTable>,
    modules: RwLock<FxHashMap<Arc<str>, ScriptValue>>,
    realm: Realm,
}

impl ScriptEngine {
    /// Create an engine with a fresh realm
    pub fn new() -> Arc<Self> {
        let mut heap = ObjectHeap::default();
        let realm = builtins::create_realm(&mut heap);
        Arc::new(Self {
            heap: Mutex::new(heap),
            handles: Mutex::new(HandleTable::default()),
            modules: RwLock::new(FxHashMap::default()),
            realm,
        })
    }

    /// Register a module namespace for [`load_module`](ScriptRuntime::load_module)
    pub fn register_module(&self, name: &str, namespace: ScriptValue) {
        self.modules.write().insert(Arc::from(name), namespace);
    }

    /// Number of live heap objects
    pub fn object_count(&self) -> usize {
        self.heap.lock().live()
    }

    /// Number of live persistent handles
    pub fn persistent_count(&self) -> usize {
        self.handles.lock().live()
    }

    /// Whether an object is still allocated
    pub fn is_live(&self, obj: ScriptObjectRef) -> bool {
        self.heap.lock().get(obj).is_some()
    }

    /// Mark-sweep collection rooted at the realm, modules and persistent handles
    pub fn collect(&self) -> ScriptGcStats {
        let mut roots = Vec::new();
        self.visit_roots(&mut |obj| roots.push(obj));
        roots.extend(self.handles.lock().objects());
        let mut heap = self.heap.lock();
        let marked = heap.mark(roots);
        let freed = heap.sweep(&marked);
        let live = heap.live();
        log::debug!("script gc: freed {} objects, {} live", freed, live);
        ScriptGcStats { freed, live }
    }

    /// Create a `TypeError` value
    pub fn type_error(&self, message: &str) -> ScriptValue {
        ScriptValue::Object(self.new_error(ScriptErrorKind::TypeError, message))
    }

    fn alloc(&self, kind: ObjectKind, proto: Option<ScriptObjectRef>) -> ScriptObjectRef {
        self.heap.lock().alloc(ScriptObject::new(kind, proto))
    }

    fn dead(&self) -> ScriptValue {
        self.type_error("object has been collected")
    }

    /// Define an own property on `receiver`, looking through proxies
    fn define_on_receiver(&self, receiver: ScriptObjectRef, key: &PropertyKey, value: ScriptValue) -> ScriptResult<()> {
        let existing = self.own_property(receiver, key);
        let desc = match existing {
            Some(PropertyDescriptor::Data {
                writable: false, ..
            }) => {
                return Err(self.type_error(&format!("Cannot assign to read only property '{}'", key)));
            }
            Some(PropertyDescriptor::Data { enumerable, .. }) => PropertyDescriptor::Data {
                value,
                writable: true,
                enumerable,
            },
            Some(PropertyDescriptor::Accessor { .. }) => {
                return Err(self.type_error(&format!("Cannot redefine accessor '{}'", key)));
            }
            None => PropertyDescriptor::value(value),
        };
        self.define_property(receiver, key.clone(), desc)
    }

    fn key_value(key: &PropertyKey) -> ScriptValue {
        key.to_value().unwrap_or(ScriptValue::Undefined)
    }

    fn trap(&self, handler: ScriptObjectRef, name: &str) -> ScriptResult<Option<ScriptValue>> {
        let trap = self.get(handler, &PropertyKey::name(name))?;
        Ok(if self.is_callable(&trap) { Some(trap) } else { None })
    }
}

/// JavaScript truthiness
pub fn truthy(value: &ScriptValue) -> bool {
    match value {
        ScriptValue::Undefined | ScriptValue::Null => false,
        ScriptValue::Bool(b) => *b,
        ScriptValue::Number(n) => *n != 0.0 && !n.is_nan(),
        ScriptValue::String(s) => !s.is_empty(),
        ScriptValue::Object(_) => true,
    }
}

impl ScriptRuntime for ScriptEngine {
    // ========================================================================
    // Creation
    // ========================================================================

    fn new_object(&self) -> ScriptObjectRef {
        self.alloc(ObjectKind::Ordinary, Some(self.realm.object_proto))
    }

    fn new_object_with_proto(&self, proto: Option<ScriptObjectRef>) -> ScriptObjectRef {
        self.alloc(ObjectKind::Ordinary, proto)
    }

    fn new_array(&self, elements: &[ScriptValue]) -> ScriptObjectRef {
        self.alloc(ObjectKind::Array(elements.to_vec()), Some(self.realm.array_proto))
    }

    fn new_function(&self, name: &str, f: NativeFunction) -> ScriptObjectRef {
        let mut heap = self.heap.lock();
        builtins::function(&mut heap, &self.realm, name, f)
    }

    fn new_error(&self, kind: ScriptErrorKind, message: &str) -> ScriptObjectRef {
        let proto = match kind {
            ScriptErrorKind::Error => self.realm.error_proto,
            ScriptErrorKind::TypeError => self.realm.type_error_proto,
        };
        let mut object = ScriptObject::new(ObjectKind::Error, Some(proto));
        object.define(
            PropertyKey::name("message"),
            PropertyDescriptor::hidden(ScriptValue::from(message)),
        );
        self.heap.lock().alloc(object)
    }

    fn new_proxy(&self, target: ScriptObjectRef, handler: ScriptObjectRef) -> ScriptObjectRef {
        self.alloc(ObjectKind::Proxy { target, handler }, None)
    }

    fn builtin_prototype(&self, shape: BuiltinShape) -> ScriptObjectRef {
        match shape {
            BuiltinShape::Object => self.realm.object_proto,
            BuiltinShape::Function => self.realm.function_proto,
            BuiltinShape::Array => self.realm.array_proto,
            BuiltinShape::Error => self.realm.error_proto,
            BuiltinShape::Map => self.realm.map_proto,
        }
    }

    fn global(&self) -> ScriptObjectRef {
        self.realm.global
    }

    // ========================================================================
    // Properties
    // ========================================================================

    fn get_with_receiver(
        &self,
        obj: ScriptObjectRef,
        key: &PropertyKey,
        receiver: &ScriptValue,
    ) -> ScriptResult<ScriptValue> {
        let mut current = obj;
        loop {
            let step = {
                let heap = self.heap.lock();
                match heap.get(current) {
                    None => GetStep::Dead,
                    Some(object) => match (&object.kind, key) {
                        (ObjectKind::Proxy { target, handler }, _) => GetStep::Proxy(*target, *handler),
                        (ObjectKind::Array(elements), PropertyKey::Index(i)) => GetStep::Value(
                            elements
                                .get(*i as usize)
                                .cloned()
                                .unwrap_or(ScriptValue::Undefined),
                        ),
                        (ObjectKind::Array(elements), PropertyKey::Name(n)) if &**n == "length" => {
                            GetStep::Value(ScriptValue::Number(elements.len() as f64))
                        }
                        _ => match object.own(key) {
                            Some(PropertyDescriptor::Data { value, .. }) => GetStep::Value(value.clone()),
                            Some(PropertyDescriptor::Accessor { get: Some(g), .. }) => GetStep::Getter(g.clone()),
                            Some(PropertyDescriptor::Accessor { get: None, .. }) => {
                                GetStep::Value(ScriptValue::Undefined)
                            }
                            None => match object.proto {
                                Some(proto) => GetStep::Next(proto),
                                None => GetStep::Value(ScriptValue::Undefined),
                            },
                        },
                    },
                }
            };
            match step {
                GetStep::Value(v) => return Ok(v),
                GetStep::Getter(g) => return self.call(&g, receiver, &[]),
                GetStep::Next(proto) => current = proto,
                GetStep::Dead => return Err(self.dead()),
                GetStep::Proxy(target, handler) => {
                    if matches!(key, PropertyKey::Symbol(_)) {
                        current = target;
                        continue;
                    }
                    match self.trap(handler, "get")? {
                        Some(trap) => {
                            return self.call(
                                &trap,
                                &ScriptValue::Object(handler),
                                &[ScriptValue::Object(target), Self::key_value(key), receiver.clone()],
                            )
                        }
                        None => current = target,
                    }
                }
            }
        }
    }

    fn set_with_receiver(
        &self,
        obj: ScriptObjectRef,
        key: &PropertyKey,
        value: ScriptValue,
        receiver: &ScriptValue,
    ) -> ScriptResult<()> {
        let mut current = obj;
        loop {
            let step = {
                let mut heap = self.heap.lock();
                let is_receiver = *receiver == ScriptValue::Object(current);
                match heap.get_mut(current) {
                    None => SetStep::Dead,
                    Some(object) => match (&mut object.kind, key) {
                        (ObjectKind::Proxy { target, handler }, _) => SetStep::Proxy(*target, *handler),
                        (ObjectKind::Array(elements), PropertyKey::Index(i)) if is_receiver => {
                            let i = *i as usize;
                            if i >= elements.len() {
                                elements.resize(i + 1, ScriptValue::Undefined);
                            }
                            elements[i] = value.clone();
                            SetStep::Done
                        }
                        (ObjectKind::Array(elements), PropertyKey::Name(n))
                            if is_receiver && &**n == "length" =>
                        {
                            match value.as_number() {
                                Some(len) if len >= 0.0 && len.fract() == 0.0 => {
                                    elements.resize(len as usize, ScriptValue::Undefined);
                                    SetStep::Done
                                }
                                _ => SetStep::ReadOnly,
                            }
                        }
                        _ => match object.own_mut(key) {
                            Some(PropertyDescriptor::Data {
                                writable: false, ..
                            }) => SetStep::ReadOnly,
                            Some(PropertyDescriptor::Data { value: slot, .. }) if is_receiver => {
                                *slot = value.clone();
                                SetStep::Done
                            }
                            Some(PropertyDescriptor::Data { .. }) => SetStep::DefineOnReceiver,
                            Some(PropertyDescriptor::Accessor { set: Some(s), .. }) => SetStep::Setter(s.clone()),
                            Some(PropertyDescriptor::Accessor { set: None, .. }) => SetStep::ReadOnly,
                            None => match object.proto {
                                Some(proto) => SetStep::Next(proto),
                                None => SetStep::DefineOnReceiver,
                            },
                        },
                    },
                }
            };
            match step {
                SetStep::Done => return Ok(()),
                SetStep::Setter(s) => return self.call(&s, receiver, &[value]).map(|_| ()),
                SetStep::ReadOnly => {
                    return Err(self.type_error(&format!(
                        "Cannot assign to read only property '{}'",
                        key
                    )))
                }
                SetStep::Next(proto) => current = proto,
                SetStep::Dead => return Err(self.dead()),
                SetStep::DefineOnReceiver => {
                    return match receiver {
                        ScriptValue::Object(r) => self.define_on_receiver(*r, key, value),
                        _ => Ok(()),
                    }
                }
                SetStep::Proxy(target, handler) => {
                    if matches!(key, PropertyKey::Symbol(_)) {
                        current = target;
                        continue;
                    }
                    match self.trap(handler, "set")? {
                        Some(trap) => {
                            return self
                                .call(
                                    &trap,
                                    &ScriptValue::Object(handler),
                                    &[
                                        ScriptValue::Object(target),
                                        Self::key_value(key),
                                        value,
                                        receiver.clone(),
                                    ],
                                )
                                .map(|_| ())
                        }
                        None => current = target,
                    }
                }
            }
        }
    }

    fn has(&self, obj: ScriptObjectRef, key: &PropertyKey) -> ScriptResult<bool> {
        let mut current = obj;
        loop {
            let step = {
                let heap = self.heap.lock();
                match heap.get(current) {
                    None => GetStep::Dead,
                    Some(object) => match (&object.kind, key) {
                        (ObjectKind::Proxy { target, handler }, _) => GetStep::Proxy(*target, *handler),
                        (ObjectKind::Array(elements), PropertyKey::Index(i)) => {
                            GetStep::Value(ScriptValue::Bool((*i as usize) < elements.len()))
                        }
                        (ObjectKind::Array(_), PropertyKey::Name(n)) if &**n == "length" => {
                            GetStep::Value(ScriptValue::Bool(true))
                        }
                        _ if object.own(key).is_some() => GetStep::Value(ScriptValue::Bool(true)),
                        _ => match object.proto {
                            Some(proto) => GetStep::Next(proto),
                            None => GetStep::Value(ScriptValue::Bool(false)),
                        },
                    },
                }
            };
            match step {
                GetStep::Value(v) => return Ok(truthy(&v)),
                GetStep::Getter(_) => return Ok(true),
                GetStep::Next(proto) => current = proto,
                GetStep::Dead => return Err(self.dead()),
                GetStep::Proxy(target, handler) => {
                    if matches!(key, PropertyKey::Symbol(_)) {
                        current = target;
                        continue;
                    }
                    match self.trap(handler, "has")? {
                        Some(trap) => {
                            let result = self.call(
                                &trap,
                                &ScriptValue::Object(handler),
                                &[ScriptValue::Object(target), Self::key_value(key)],
                            )?;
                            return Ok(truthy(&result));
                        }
                        None => current = target,
                    }
                }
            }
        }
    }

    fn define_property(
        &self,
        obj: ScriptObjectRef,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> ScriptResult<()> {
        let mut current = obj;
        loop {
            let mut heap = self.heap.lock();
            let Some(object) = heap.get_mut(current) else {
                drop(heap);
                return Err(self.dead());
            };
            match (&mut object.kind, &key, &desc) {
                (ObjectKind::Proxy { target, .. }, _, _) => {
                    current = *target;
                    continue;
                }
                (ObjectKind::Array(elements), PropertyKey::Index(i), PropertyDescriptor::Data { value, .. }) => {
                    let i = *i as usize;
                    if i >= elements.len() {
                        elements.resize(i + 1, ScriptValue::Undefined);
                    }
                    elements[i] = value.clone();
                }
                _ => object.define(key, desc),
            }
            return Ok(());
        }
    }

    fn own_property(&self, obj: ScriptObjectRef, key: &PropertyKey) -> Option<PropertyDescriptor> {
        let mut current = obj;
        loop {
            let heap = self.heap.lock();
            let object = heap.get(current)?;
            return match (&object.kind, key) {
                (ObjectKind::Proxy { target, .. }, _) => {
                    current = *target;
                    continue;
                }
                (ObjectKind::Array(elements), PropertyKey::Index(i)) => {
                    elements.get(*i as usize).map(|v| PropertyDescriptor::value(v.clone()))
                }
                (ObjectKind::Array(elements), PropertyKey::Name(n)) if &**n == "length" => {
                    Some(PropertyDescriptor::Data {
                        value: ScriptValue::Number(elements.len() as f64),
                        writable: true,
                        enumerable: false,
                    })
                }
                _ => object.own(key).cloned(),
            };
        }
    }

    fn own_keys(&self, obj: ScriptObjectRef) -> Vec<PropertyKey> {
        let mut current = obj;
        loop {
            let heap = self.heap.lock();
            let Some(object) = heap.get(current) else {
                return Vec::new();
            };
            let mut keys = Vec::new();
            match &object.kind {
                ObjectKind::Proxy { target, .. } => {
                    current = *target;
                    continue;
                }
                ObjectKind::Array(elements) => {
                    keys.extend((0..elements.len() as u32).map(PropertyKey::Index));
                }
                _ => {}
            }
            keys.extend(object.keys().cloned());
            return keys;
        }
    }

    fn prototype_of(&self, obj: ScriptObjectRef) -> Option<ScriptObjectRef> {
        let mut current = obj;
        loop {
            let heap = self.heap.lock();
            let object = heap.get(current)?;
            match object.kind {
                ObjectKind::Proxy { target, .. } => current = target,
                _ => return object.proto,
            }
        }
    }

    fn set_prototype(&self, obj: ScriptObjectRef, proto: Option<ScriptObjectRef>) {
        let mut current = obj;
        loop {
            let mut heap = self.heap.lock();
            let Some(object) = heap.get_mut(current) else {
                return;
            };
            match object.kind {
                ObjectKind::Proxy { target, .. } => current = target,
                _ => {
                    object.proto = proto;
                    return;
                }
            }
        }
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    fn array_len(&self, obj: ScriptObjectRef) -> Option<usize> {
        match &self.heap.lock().get(obj)?.kind {
            ObjectKind::Array(elements) => Some(elements.len()),
            _ => None,
        }
    }

    fn is_callable(&self, value: &ScriptValue) -> bool {
        let Some(mut current) = value.as_object() else {
            return false;
        };
        let heap = self.heap.lock();
        loop {
            match heap.get(current).map(|o| &o.kind) {
                Some(ObjectKind::Function(_)) => return true,
                Some(ObjectKind::Proxy { target, .. }) => current = *target,
                _ => return false,
            }
        }
    }

    fn is_error(&self, obj: ScriptObjectRef) -> bool {
        matches!(
            self.heap.lock().get(obj).map(|o| &o.kind),
            Some(ObjectKind::Error)
        )
    }

    fn instance_of(&self, value: &ScriptValue, ctor: &ScriptValue) -> ScriptResult<bool> {
        let Some(ctor_obj) = ctor.as_object().filter(|_| self.is_callable(ctor)) else {
            return Err(self.type_error("Right-hand side of 'instanceof' is not callable"));
        };
        let Some(proto) = self.get(ctor_obj, &PropertyKey::name("prototype"))?.as_object() else {
            return Err(self.type_error("Function has non-object prototype in instanceof check"));
        };
        let Some(obj) = value.as_object() else {
            return Ok(false);
        };
        let mut current = self.prototype_of(obj);
        while let Some(p) = current {
            if p == proto {
                return Ok(true);
            }
            current = self.prototype_of(p);
        }
        Ok(false)
    }

    // ========================================================================
    // Calls
    // ========================================================================

    fn call(
        &self,
        callee: &ScriptValue,
        this: &ScriptValue,
        args: &[ScriptValue],
    ) -> ScriptResult<ScriptValue> {
        let resolved = callee.as_object().and_then(|mut current| {
            let heap = self.heap.lock();
            loop {
                match &heap.get(current)?.kind {
                    ObjectKind::Function(f) => return Some((current, f.clone())),
                    ObjectKind::Proxy { target, .. } => current = *target,
                    _ => return None,
                }
            }
        });
        let Some((function, body)) = resolved else {
            return Err(self.type_error(&format!("{} is not a function", self.type_of(callee))));
        };
        let call = CallArgs {
            this: this.clone(),
            args: args.to_vec(),
            new_target: None,
            callee: function,
        };
        body(self, &call)
    }

    fn construct(&self, callee: &ScriptValue, args: &[ScriptValue]) -> ScriptResult<ScriptValue> {
        let Some((function, body)) = callee.as_object().and_then(|obj| {
            match &self.heap.lock().get(obj)?.kind {
                ObjectKind::Function(f) => Some((obj, f.clone())),
                _ => None,
            }
        }) else {
            return Err(self.type_error(&format!("{} is not a constructor", self.type_of(callee))));
        };
        let proto = self
            .get(function, &PropertyKey::name("prototype"))?
            .as_object()
            .unwrap_or(self.realm.object_proto);
        let this = self.new_object_with_proto(Some(proto));
        let call = CallArgs {
            this: ScriptValue::Object(this),
            args: args.to_vec(),
            new_target: Some(function),
            callee: function,
        };
        match body(self, &call)? {
            result @ ScriptValue::Object(_) => Ok(result),
            _ => Ok(ScriptValue::Object(this)),
        }
    }

    fn load_module(&self, name: &str) -> ScriptResult<ScriptValue> {
        match self.modules.read().get(name) {
            Some(namespace) => Ok(namespace.clone()),
            None => Err(ScriptValue::Object(self.new_error(
                ScriptErrorKind::Error,
                &format!("Cannot find module '{}'", name),
            ))),
        }
    }

    // ========================================================================
    // Handles and native slots
    // ========================================================================

    fn create_persistent(&self, value: ScriptValue) -> PersistentHandle {
        self.handles.lock().create(value)
    }

    fn persistent_value(&self, handle: PersistentHandle) -> Option<ScriptValue> {
        self.handles.lock().get(handle)
    }

    fn delete_persistent(&self, handle: PersistentHandle) {
        self.handles.lock().delete(handle);
    }

    fn internal_slot(&self, obj: ScriptObjectRef) -> Option<u64> {
        self.heap.lock().get(obj)?.internal_slot
    }

    fn set_internal_slot(&self, obj: ScriptObjectRef, value: Option<u64>) {
        if let Some(object) = self.heap.lock().get_mut(obj) {
            object.internal_slot = value;
        }
    }

    // ========================================================================
    // Tracing
    // ========================================================================

    fn visit_roots(&self, visitor: &mut dyn FnMut(ScriptObjectRef)) {
        for root in self.realm.roots() {
            visitor(root);
        }
        let modules: Vec<ScriptObjectRef> = self
            .modules
            .read()
            .values()
            .filter_map(ScriptValue::as_object)
            .collect();
        for obj in modules {
            visitor(obj);
        }
    }

    fn visit_references(&self, obj: ScriptObjectRef, visitor: &mut dyn FnMut(ScriptObjectRef)) {
        let refs = match self.heap.lock().get(obj) {
            Some(object) => object.references(),
            None => return,
        };
        for r in refs {
            visitor(r);
        }
    }
}
