//! The managed VM
//!
//! [`ManagedVm`] is the in-process reference implementation of
//! [`ManagedRuntime`]. Native method bodies are Rust closures; bridge method
//! bodies are forwarded to the installed [`BridgeHooks`].

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use tandem_sdk::{
    ArgWriter, BridgeHooks, ClassDef, ClassId, ClassInfo, ClassKind, ExecutionMode, FieldDef,
    FieldId, FieldInfo, InteropError, InteropResult, LocalSlot, ManagedRuntime, ManagedValue,
    MethodBody, MethodDef, MethodId, MethodInfo, ObjectRef, ScopeId, TypeTag, Visibility,
    WellKnownClass, WorkerId,
};

use super::class::{ClassTable, SlotKind};
use super::heap::{Heap, HeapObject, ObjectBody};

/// Per-thread VM state
struct ThreadState {
    worker: WorkerId,
    mode: ExecutionMode,
    /// Handle scopes; scope 0 is the thread's base scope and is never popped
    scopes: Vec<Vec<Option<ObjectRef>>>,
}

/// Statistics of one managed collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagedGcStats {
    /// Objects reclaimed
    pub freed: usize,
    /// Objects alive afterwards
    pub live: usize,
}

/// Reference managed VM
pub struct ManagedVm {
    classes: RwLock<ClassTable>,
    heap: Mutex<Heap>,
    threads: Mutex<FxHashMap<ThreadId, ThreadState>>,
    global_roots: Mutex<FxHashMap<ObjectRef, usize>>,
    initialized: Mutex<FxHashSet<ClassId>>,
    bridge: RwLock<Option<Arc<dyn BridgeHooks>>>,
    well_known: Vec<ClassId>,
    next_worker: AtomicU32,
}

impl ManagedVm {
    /// Create a VM with the well-known classes defined
    pub fn new() -> Arc<Self> {
        let mut table = ClassTable::new();
        let well_known = bootstrap(&mut table);
        Arc::new(Self {
            classes: RwLock::new(table),
            heap: Mutex::new(Heap::new()),
            threads: Mutex::new(FxHashMap::default()),
            global_roots: Mutex::new(FxHashMap::default()),
            initialized: Mutex::new(FxHashSet::default()),
            bridge: RwLock::new(None),
            well_known,
            next_worker: AtomicU32::new(0),
        })
    }

    /// Number of live heap objects
    pub fn object_count(&self) -> usize {
        self.heap.lock().live()
    }

    /// Number of defined classes
    pub fn class_count(&self) -> usize {
        self.classes.read().class_count()
    }

    /// Keep `obj` alive until a matching [`remove_global_root`](Self::remove_global_root)
    pub fn add_global_root(&self, obj: ObjectRef) {
        *self.global_roots.lock().entry(obj).or_insert(0) += 1;
    }

    /// Drop one global root registration of `obj`
    pub fn remove_global_root(&self, obj: ObjectRef) {
        let mut roots = self.global_roots.lock();
        if let Some(count) = roots.get_mut(&obj) {
            *count -= 1;
            if *count == 0 {
                roots.remove(&obj);
            }
        }
    }

    /// Find a method declared by `class` (not inherited) by name
    pub fn method_by_name(&self, class: ClassId, name: &str) -> Option<MethodId> {
        self.classes.read().method_by_name(class, name)
    }

    /// Whether an object is still allocated
    pub fn is_live(&self, obj: ObjectRef) -> bool {
        self.heap.lock().get(obj).is_some()
    }

    /// Mark-sweep collection
    ///
    /// Roots are handle scopes, global roots, static fields and every object
    /// carrying an interop index. Payloads of freed objects are handed to the
    /// bridge for finalization after the heap is unlocked.
    pub fn collect(&self) -> ManagedGcStats {
        let mut roots = Vec::new();
        self.visit_roots(&mut |obj| roots.push(obj));
        let (freed, payloads, live) = {
            let mut heap = self.heap.lock();
            roots.extend(heap.indexed_objects());
            let marked = heap.mark(roots);
            let (freed, payloads) = heap.sweep(&marked);
            (freed, payloads, heap.live())
        };
        if !payloads.is_empty() {
            if let Some(bridge) = self.bridge.read().clone() {
                for payload in payloads {
                    bridge.finalize_payload(payload);
                }
            }
        }
        log::debug!("managed gc: freed {} objects, {} live", freed, live);
        ManagedGcStats { freed, live }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn with_thread<R>(&self, f: impl FnOnce(&mut ThreadState) -> R) -> R {
        let mut threads = self.threads.lock();
        let state = threads
            .entry(std::thread::current().id())
            .or_insert_with(|| ThreadState {
                worker: WorkerId::from_raw(self.next_worker.fetch_add(1, Ordering::Relaxed)),
                mode: ExecutionMode::Managed,
                scopes: vec![Vec::new()],
            });
        f(state)
    }

    /// Build a `TypeError` exception object
    fn raise(&self, message: &str) -> ObjectRef {
        let class = self.well_known(WellKnownClass::TypeError);
        match self.new_error(class, message) {
            Ok(obj) => obj,
            Err(err) => {
                log::error!("cannot allocate TypeError: {}", err);
                panic!("cannot allocate TypeError: {}", err)
            }
        }
    }

    /// Resolve the method actually executed, dispatching virtually on the receiver
    fn resolve_target(
        &self,
        method: MethodId,
        receiver: Option<ObjectRef>,
    ) -> Result<(Arc<MethodInfo>, MethodBody, Arc<[SlotKind]>), String> {
        let classes = self.classes.read();
        let record = classes.method(method).map_err(|e| e.to_string())?;
        let info = &record.info;
        if info.is_static {
            return Ok((info.clone(), record.body.clone(), record.params.clone()));
        }
        let recv = receiver.ok_or_else(|| format!("cannot call {} on null", info.name))?;
        let recv_class = self
            .heap
            .lock()
            .get(recv)
            .map(|o| o.class)
            .ok_or_else(|| "receiver is not a live object".to_string())?;
        if !classes.is_assignable(recv_class, info.declaring) {
            return Err(format!(
                "receiver is not an instance of the class declaring {}",
                info.name
            ));
        }
        let mut target = record;
        if !info.is_constructor && info.visibility != Visibility::Private {
            if let Some(found) = classes.find_virtual(recv_class, &info.name, &info.descriptor) {
                target = classes.method(found).map_err(|e| e.to_string())?;
            }
        }
        Ok((target.info.clone(), target.body.clone(), target.params.clone()))
    }

    fn ensure_initialized(&self, class: ClassId) -> Result<(), ObjectRef> {
        if !self.initialized.lock().insert(class) {
            return Ok(());
        }
        let Some(bridge) = self.bridge.read().clone() else {
            self.initialized.lock().remove(&class);
            return Err(self.raise("no bridge installed"));
        };
        if let Err(exc) = bridge.initialize_class(class) {
            self.initialized.lock().remove(&class);
            return Err(exc);
        }
        Ok(())
    }

    fn element_tag(&self, obj: ObjectRef) -> InteropResult<TypeTag> {
        let class = self.class_of(obj)?;
        self.class_info(class)?
            .component()
            .ok_or_else(|| InteropError::type_mismatch("array", "object"))
    }
}

impl ManagedRuntime for ManagedVm {
    // ========================================================================
    // Reflection
    // ========================================================================

    fn well_known(&self, class: WellKnownClass) -> ClassId {
        self.well_known[class as usize]
    }

    fn class_info(&self, class: ClassId) -> InteropResult<Arc<ClassInfo>> {
        Ok(self.classes.read().class(class)?.info.clone())
    }

    fn class_by_name(&self, name: &str) -> Option<ClassId> {
        self.classes.read().by_name(name)
    }

    fn array_class(&self, component: TypeTag) -> InteropResult<ClassId> {
        let object = self.well_known(WellKnownClass::Object);
        self.classes.write().array_class(component, object)
    }

    fn class_fields(&self, class: ClassId) -> InteropResult<Vec<Arc<FieldInfo>>> {
        let classes = self.classes.read();
        let record = classes.class(class)?;
        record
            .fields
            .iter()
            .map(|fid| Ok(classes.field(*fid)?.info.clone()))
            .collect()
    }

    fn class_methods(&self, class: ClassId) -> InteropResult<Vec<Arc<MethodInfo>>> {
        let classes = self.classes.read();
        let record = classes.class(class)?;
        record
            .methods
            .iter()
            .map(|mid| Ok(classes.method(*mid)?.info.clone()))
            .collect()
    }

    fn method_info(&self, method: MethodId) -> InteropResult<Arc<MethodInfo>> {
        Ok(self.classes.read().method(method)?.info.clone())
    }

    fn field_info(&self, field: FieldId) -> InteropResult<Arc<FieldInfo>> {
        Ok(self.classes.read().field(field)?.info.clone())
    }

    fn find_field(&self, class: ClassId, name: &str) -> Option<Arc<FieldInfo>> {
        self.classes
            .read()
            .find_field(class, name)
            .map(|f| f.info.clone())
    }

    fn is_assignable(&self, class: ClassId, target: ClassId) -> bool {
        self.classes.read().is_assignable(class, target)
    }

    fn define_class(&self, def: ClassDef) -> InteropResult<ClassId> {
        let object = self.well_known(WellKnownClass::Object);
        let name = def.name.clone();
        let id = self.classes.write().define(def, Some(object))?;
        log::debug!("defined class {} as {}", name, id.to_raw());
        Ok(id)
    }

    // ========================================================================
    // Objects
    // ========================================================================

    fn class_of(&self, obj: ObjectRef) -> InteropResult<ClassId> {
        self.heap
            .lock()
            .get(obj)
            .map(|o| o.class)
            .ok_or_else(|| InteropError::identity(format!("stale object {}", obj.to_raw())))
    }

    fn alloc_object(&self, class: ClassId) -> InteropResult<ObjectRef> {
        let layout = {
            let classes = self.classes.read();
            let record = classes.class(class)?;
            if record.info.is_abstract {
                return Err(InteropError::resolution(format!(
                    "cannot instantiate abstract class {}",
                    record.info.name
                )));
            }
            if matches!(record.info.kind, ClassKind::Array(_))
                || class == self.well_known(WellKnownClass::String)
            {
                return Err(InteropError::type_mismatch("instance class", &*record.info.name));
            }
            record
                .layout
                .iter()
                .map(|slot| slot.default_value())
                .collect()
        };
        Ok(self
            .heap
            .lock()
            .alloc(HeapObject::new(class, ObjectBody::Fields(layout))))
    }

    fn alloc_string(&self, s: &str) -> ObjectRef {
        let class = self.well_known(WellKnownClass::String);
        self.heap
            .lock()
            .alloc(HeapObject::new(class, ObjectBody::Str(Arc::from(s))))
    }

    fn read_string(&self, obj: ObjectRef) -> InteropResult<Arc<str>> {
        match self.heap.lock().get(obj).map(|o| &o.body) {
            Some(ObjectBody::Str(s)) => Ok(s.clone()),
            Some(_) => Err(InteropError::type_mismatch("string", "object")),
            None => Err(InteropError::identity(format!("stale object {}", obj.to_raw()))),
        }
    }

    fn alloc_array(&self, class: ClassId, len: usize) -> InteropResult<ObjectRef> {
        let component = self
            .class_info(class)?
            .component()
            .ok_or_else(|| InteropError::type_mismatch("array class", "class"))?;
        let elements = vec![component.default_value(); len];
        Ok(self
            .heap
            .lock()
            .alloc(HeapObject::new(class, ObjectBody::Array(elements))))
    }

    fn array_len(&self, obj: ObjectRef) -> InteropResult<usize> {
        match self.heap.lock().get(obj).map(|o| &o.body) {
            Some(ObjectBody::Array(elements)) => Ok(elements.len()),
            Some(_) => Err(InteropError::type_mismatch("array", "object")),
            None => Err(InteropError::identity(format!("stale object {}", obj.to_raw()))),
        }
    }

    fn array_get(&self, obj: ObjectRef, index: usize) -> InteropResult<ManagedValue> {
        match self.heap.lock().get(obj).map(|o| &o.body) {
            Some(ObjectBody::Array(elements)) => elements.get(index).copied().ok_or_else(|| {
                InteropError::resolution(format!("array index {} out of bounds", index))
            }),
            Some(_) => Err(InteropError::type_mismatch("array", "object")),
            None => Err(InteropError::identity(format!("stale object {}", obj.to_raw()))),
        }
    }

    fn array_set(&self, obj: ObjectRef, index: usize, value: ManagedValue) -> InteropResult<()> {
        let tag = self.element_tag(obj)?;
        if !value.fits(tag) {
            return Err(InteropError::type_mismatch(
                format!("{:?}", tag),
                value.type_name(),
            ));
        }
        match self.heap.lock().get_mut(obj).map(|o| &mut o.body) {
            Some(ObjectBody::Array(elements)) => match elements.get_mut(index) {
                Some(slot) => {
                    *slot = value;
                    Ok(())
                }
                None => Err(InteropError::resolution(format!(
                    "array index {} out of bounds",
                    index
                ))),
            },
            Some(_) => Err(InteropError::type_mismatch("array", "object")),
            None => Err(InteropError::identity(format!("stale object {}", obj.to_raw()))),
        }
    }

    fn get_field(&self, obj: Option<ObjectRef>, field: FieldId) -> InteropResult<ManagedValue> {
        let classes = self.classes.read();
        let record = classes.field(field)?;
        if record.info.is_static {
            return Ok(classes.static_value(record.index));
        }
        let obj = obj.ok_or_else(|| InteropError::type_mismatch("receiver", "null"))?;
        let heap = self.heap.lock();
        let object = heap
            .get(obj)
            .ok_or_else(|| InteropError::identity(format!("stale object {}", obj.to_raw())))?;
        if !classes.is_assignable(object.class, record.info.declaring) {
            return Err(InteropError::type_mismatch(
                &*classes.class(record.info.declaring)?.info.name,
                &*classes.class(object.class)?.info.name,
            ));
        }
        match &object.body {
            ObjectBody::Fields(values) => Ok(values[record.index]),
            _ => Err(InteropError::type_mismatch("instance", "object")),
        }
    }

    fn set_field(&self, obj: Option<ObjectRef>, field: FieldId, value: ManagedValue) -> InteropResult<()> {
        let mut classes = self.classes.write();
        let (kind, index, is_static, declaring) = {
            let record = classes.field(field)?;
            (record.kind, record.index, record.info.is_static, record.info.declaring)
        };
        if !kind.accepts(&value) {
            return Err(InteropError::type_mismatch(
                match kind {
                    SlotKind::Primitive(p) => p.name(),
                    SlotKind::Reference => "reference",
                },
                value.type_name(),
            ));
        }
        if is_static {
            classes.set_static(index, value);
            return Ok(());
        }
        let obj = obj.ok_or_else(|| InteropError::type_mismatch("receiver", "null"))?;
        let mut heap = self.heap.lock();
        let object = heap
            .get_mut(obj)
            .ok_or_else(|| InteropError::identity(format!("stale object {}", obj.to_raw())))?;
        if !classes.is_assignable(object.class, declaring) {
            return Err(InteropError::type_mismatch("declaring class", "object"));
        }
        match &mut object.body {
            ObjectBody::Fields(values) => {
                values[index] = value;
                Ok(())
            }
            _ => Err(InteropError::type_mismatch("instance", "object")),
        }
    }

    fn opaque_payload(&self, obj: ObjectRef) -> InteropResult<Option<u64>> {
        self.heap
            .lock()
            .get(obj)
            .map(|o| o.payload)
            .ok_or_else(|| InteropError::identity(format!("stale object {}", obj.to_raw())))
    }

    fn set_opaque_payload(&self, obj: ObjectRef, payload: u64) -> InteropResult<()> {
        let mut heap = self.heap.lock();
        let object = heap
            .get_mut(obj)
            .ok_or_else(|| InteropError::identity(format!("stale object {}", obj.to_raw())))?;
        object.payload = Some(payload);
        Ok(())
    }

    fn interop_index(&self, obj: ObjectRef) -> Option<u32> {
        self.heap.lock().get(obj).and_then(|o| o.interop_index)
    }

    fn set_interop_index(&self, obj: ObjectRef, index: Option<u32>) {
        if let Some(object) = self.heap.lock().get_mut(obj) {
            object.interop_index = index;
        }
    }

    fn new_error(&self, class: ClassId, message: &str) -> InteropResult<ObjectRef> {
        let error = self.well_known(WellKnownClass::Error);
        if !self.is_assignable(class, error) {
            return Err(InteropError::type_mismatch(WellKnownClass::Error.name(), "class"));
        }
        let obj = self.alloc_object(class)?;
        let text = self.alloc_string(message);
        let field = self
            .find_field(class, "message")
            .ok_or_else(|| InteropError::resolution("error class without message field"))?;
        self.set_field(Some(obj), field.id, ManagedValue::object(text))?;
        Ok(obj)
    }

    // ========================================================================
    // Execution
    // ========================================================================

    fn invoke(
        &self,
        method: MethodId,
        receiver: Option<ObjectRef>,
        args: &[ManagedValue],
    ) -> Result<ManagedValue, ObjectRef> {
        if self.execution_mode() != ExecutionMode::Managed {
            log::error!("invoke of method {} in native mode", method.to_raw());
            panic!("invoke of method {} in native mode", method.to_raw());
        }

        let (info, body, params) = self
            .resolve_target(method, receiver)
            .map_err(|msg| self.raise(&msg))?;

        if args.len() != params.len() {
            return Err(self.raise(&format!(
                "{} expects {} arguments, got {}",
                info.name,
                params.len(),
                args.len()
            )));
        }
        if let Some((i, value)) = params
            .iter()
            .zip(args)
            .enumerate()
            .find_map(|(i, (slot, value))| (!slot.accepts(value)).then_some((i, value)))
        {
            return Err(self.raise(&format!(
                "argument {} of {} has type {}",
                i,
                info.name,
                value.type_name()
            )));
        }

        let recv = if info.is_static { None } else { receiver };
        match body {
            MethodBody::Native(f) => f(self, recv, args),
            MethodBody::Bridge => {
                self.ensure_initialized(info.declaring)?;
                let Some(bridge) = self.bridge.read().clone() else {
                    return Err(self.raise("no bridge installed"));
                };
                let mut writer = ArgWriter::new();
                if let Some(recv) = recv {
                    writer.push(false, recv.to_raw() as u64);
                }
                for (slot, value) in params.iter().zip(args) {
                    writer.push(slot.is_float(), value.to_bits());
                }
                bridge.call_script(info.id, &writer.finish())
            }
            MethodBody::Abstract => Err(self.raise(&format!("{} is abstract", info.name))),
        }
    }

    fn execution_mode(&self) -> ExecutionMode {
        self.with_thread(|t| t.mode)
    }

    fn set_execution_mode(&self, mode: ExecutionMode) -> ExecutionMode {
        self.with_thread(|t| std::mem::replace(&mut t.mode, mode))
    }

    fn current_worker(&self) -> WorkerId {
        self.with_thread(|t| t.worker)
    }

    fn open_scope(&self) -> ScopeId {
        self.with_thread(|t| {
            t.scopes.push(Vec::new());
            ScopeId::from_raw(t.scopes.len() as u32 - 1)
        })
    }

    fn close_scope(&self, scope: ScopeId) {
        self.with_thread(|t| {
            let depth = scope.to_raw() as usize;
            if depth == 0 {
                t.scopes[0].clear();
            } else {
                t.scopes.truncate(depth);
            }
        })
    }

    fn scope_root(&self, obj: ObjectRef) -> LocalSlot {
        self.with_thread(|t| {
            let depth = t.scopes.len() - 1;
            let scope = &mut t.scopes[depth];
            scope.push(Some(obj));
            LocalSlot {
                scope: ScopeId::from_raw(depth as u32),
                index: scope.len() - 1,
            }
        })
    }

    fn scope_get(&self, slot: LocalSlot) -> Option<ObjectRef> {
        self.with_thread(|t| {
            t.scopes
                .get(slot.scope.to_raw() as usize)
                .and_then(|s| s.get(slot.index).copied().flatten())
        })
    }

    // ========================================================================
    // Tracing
    // ========================================================================

    fn visit_roots(&self, visitor: &mut dyn FnMut(ObjectRef)) {
        {
            let threads = self.threads.lock();
            for state in threads.values() {
                for obj in state.scopes.iter().flatten().flatten() {
                    visitor(*obj);
                }
            }
        }
        let globals: Vec<ObjectRef> = self.global_roots.lock().keys().copied().collect();
        for obj in globals {
            visitor(obj);
        }
        let statics: Vec<ObjectRef> = self
            .classes
            .read()
            .statics()
            .iter()
            .filter_map(ManagedValue::as_object)
            .collect();
        for obj in statics {
            visitor(obj);
        }
    }

    fn visit_references(&self, obj: ObjectRef, visitor: &mut dyn FnMut(ObjectRef)) {
        let refs: Vec<ObjectRef> = match self.heap.lock().get(obj) {
            Some(object) => object.references().collect(),
            None => return,
        };
        for r in refs {
            visitor(r);
        }
    }

    fn install_bridge(&self, hooks: Arc<dyn BridgeHooks>) {
        *self.bridge.write() = Some(hooks);
        self.initialized.lock().clear();
    }
}

// ============================================================================
// Bootstrap
// ============================================================================

fn define_or_die(table: &mut ClassTable, def: ClassDef, object: Option<ClassId>) -> ClassId {
    let name = def.name.clone();
    match table.define(def, object) {
        Ok(id) => id,
        Err(err) => {
            log::error!("cannot define well-known class {}: {}", name, err);
            panic!("cannot define well-known class {}: {}", name, err)
        }
    }
}

/// Define the well-known classes, returning their ids in [`WellKnownClass::ALL`] order
fn bootstrap(table: &mut ClassTable) -> Vec<ClassId> {
    let object = define_or_die(
        table,
        ClassDef::new(WellKnownClass::Object.name())
            .method(MethodDef::constructor("V", |_, _, _| Ok(ManagedValue::Void))),
        None,
    );
    let some = Some(object);
    let string = define_or_die(table, ClassDef::new(WellKnownClass::String.name()), some);
    let script_value = define_or_die(table, ClassDef::new(WellKnownClass::ScriptValue.name()), some);
    let error = define_or_die(
        table,
        ClassDef::new(WellKnownClass::Error.name())
            .mimics(tandem_sdk::BuiltinShape::Error)
            .field(FieldDef::instance("message", "Lstd.core.String;"))
            .method(MethodDef::constructor(
                "VLstd.core.String;",
                |vm, this, args| {
                    if let Some(this) = this {
                        let field = vm
                            .class_of(this)
                            .ok()
                            .and_then(|class| vm.find_field(class, "message"));
                        if let Some(field) = field {
                            let _ = vm.set_field(Some(this), field.id, args[0]);
                        }
                    }
                    Ok(ManagedValue::Void)
                },
            )),
        some,
    );
    let type_error = define_or_die(
        table,
        ClassDef::new(WellKnownClass::TypeError.name()).extends(error),
        some,
    );
    let script_error = define_or_die(
        table,
        ClassDef::new(WellKnownClass::ScriptError.name())
            .extends(error)
            .field(FieldDef::instance("value", "Lstd.interop.ScriptValue;")),
        some,
    );

    let mut ids = vec![object, string, script_value, error, type_error, script_error];
    for class in &WellKnownClass::ALL[ids.len()..] {
        let Some(kind) = class.boxed_kind() else {
            continue;
        };
        ids.push(define_or_die(
            table,
            ClassDef::new(class.name())
                .field(FieldDef::instance("value", kind.descriptor_char().to_string())),
            some,
        ));
    }
    ids
}
