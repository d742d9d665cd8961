//! Interop context
//!
//! One [`InteropContext`] binds a managed runtime to a script runtime. It
//! owns the shared reference slab and every per-class cache (wrappers,
//! converters, bindings, interned strings, interface proxies), installs the
//! bridge entry points into the managed runtime and the intrinsics into
//! both runtimes.

use std::sync::{Arc, Weak};
use std::thread::ThreadId;

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use tandem_sdk::{
    AccessorKind, ArgBuffer, BodyKind, BridgeHooks, ClassDef, ClassId, ClassKind, FieldInfo,
    InteropError, InteropResult, LocalSlot, ManagedRuntime, ManagedValue, MethodDef, MethodId,
    ObjectRef, PersistentHandle, PropertyKey, ScriptErrorKind, ScriptObjectRef, ScriptResult,
    ScriptRuntime, ScriptValue, TypeTag, Visibility, WellKnownClass,
};

use super::call::{self, BindingTable, ProxyFlavor};
use super::convert::{self, ConverterCache, RefConverter};
use super::exceptions::throw_into_managed;
use super::fatal;
use super::intrinsics;
use super::options::{InteropOptions, OptionsError};
use super::scope::HandleScope;
use super::shared_ref::{RefId, RefKind};
use super::storage::RefStorage;
use super::strings::ConstStringStorage;
use super::wrapper::{ClassWrapper, WrapperCache};
use super::xgc::{self, XgcStats};

/// Failure to set up a context
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// Options rejected by validation
    #[error(transparent)]
    Options(#[from] OptionsError),

    /// Intrinsics could not be installed
    #[error("cannot install interop intrinsics: {0}")]
    Interop(#[from] InteropError),
}

/// The bridge between one managed runtime and one script runtime
pub struct InteropContext {
    managed: Arc<dyn ManagedRuntime>,
    script: Arc<dyn ScriptRuntime>,
    options: InteropOptions,
    refs: Arc<RefStorage>,
    wrappers: WrapperCache,
    converters: ConverterCache,
    strings: ConstStringStorage,
    bindings: BindingTable,
    /// Interface to synthesized proxy class
    proxies: RwLock<FxHashMap<ClassId, ClassId>>,
    /// Proxy class to dispatch flavor
    proxy_flavors: RwLock<FxHashMap<ClassId, ProxyFlavor>>,
    owner: ThreadId,
    this: Weak<InteropContext>,
}

impl InteropContext {
    /// Bridge `managed` and `script`
    ///
    /// Installs the bridge hooks into the managed runtime, defines
    /// `std.interop.ScriptRuntime` and publishes the script namespace object.
    pub fn new(
        managed: Arc<dyn ManagedRuntime>,
        script: Arc<dyn ScriptRuntime>,
        options: InteropOptions,
    ) -> Result<Arc<Self>, SetupError> {
        options.validate()?;
        let refs = Arc::new(RefStorage::new(
            managed.clone(),
            script.clone(),
            options.ref_capacity,
        ));
        let ctx = Arc::new_cyclic(|this| Self {
            managed: managed.clone(),
            script: script.clone(),
            options,
            refs,
            wrappers: WrapperCache::new(),
            converters: ConverterCache::new(),
            strings: ConstStringStorage::new(),
            bindings: BindingTable::new(),
            proxies: RwLock::new(FxHashMap::default()),
            proxy_flavors: RwLock::new(FxHashMap::default()),
            owner: std::thread::current().id(),
            this: this.clone(),
        });
        intrinsics::install(&ctx)?;
        managed.install_bridge(Arc::new(BridgeEntry {
            ctx: ctx.weak(),
            script,
        }));
        log::debug!(
            "interop context ready: {} shared references, namespace '{}'{}{}",
            ctx.options.ref_capacity,
            ctx.options.namespace,
            if ctx.options.squash_prototypes { ", squashed prototypes" } else { "" },
            if ctx.options.hardened { ", hardened" } else { "" },
        );
        Ok(ctx)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Managed runtime
    pub fn managed(&self) -> &dyn ManagedRuntime {
        &*self.managed
    }

    /// Script runtime
    pub fn script(&self) -> &dyn ScriptRuntime {
        &*self.script
    }

    /// Options the context was built with
    pub fn options(&self) -> &InteropOptions {
        &self.options
    }

    /// Shared reference slab
    pub fn refs(&self) -> &Arc<RefStorage> {
        &self.refs
    }

    /// Bridge method bindings
    pub fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    /// Interned constant strings
    pub fn strings(&self) -> &ConstStringStorage {
        &self.strings
    }

    /// Wrapper arena
    pub fn wrappers(&self) -> &WrapperCache {
        &self.wrappers
    }

    /// Weak handle for closures stored in either runtime
    pub fn weak(&self) -> Weak<InteropContext> {
        self.this.clone()
    }

    /// Thread that created the context
    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    /// Whether the calling thread created the context
    pub fn is_owner_thread(&self) -> bool {
        std::thread::current().id() == self.owner
    }

    // ========================================================================
    // Conversion and wrappers
    // ========================================================================

    /// Converter for references of `class`
    pub fn converter(&self, class: ClassId) -> InteropResult<Arc<dyn RefConverter>> {
        self.converters.get(self, class)
    }

    /// Convert a managed value of static type `tag`
    pub fn to_script(&self, value: ManagedValue, tag: TypeTag) -> InteropResult<ScriptValue> {
        convert::managed_to_script(self, value, tag)
    }

    /// Convert a script value to static type `tag`
    pub fn to_managed(&self, value: &ScriptValue, tag: TypeTag) -> InteropResult<ManagedValue> {
        convert::script_to_managed(self, value, tag)
    }

    /// Wrapper of `class`, built on first request
    pub fn wrapper(&self, class: ClassId) -> InteropResult<Arc<ClassWrapper>> {
        self.wrappers.get_or_create(self, class)
    }

    /// Script constructor of the class named `name`
    pub fn class_constructor(&self, name: &str) -> InteropResult<ScriptObjectRef> {
        let class = self
            .managed
            .class_by_name(name)
            .ok_or_else(|| InteropError::resolution(format!("no managed class {}", name)))?;
        Ok(self.wrapper(class)?.constructor())
    }

    /// Call the instance method `name` on the managed object behind `this`
    pub fn call_method(
        &self,
        this: &ScriptValue,
        name: &str,
        args: &[ScriptValue],
    ) -> InteropResult<ScriptValue> {
        let id = self
            .refs
            .find_by_value(this)
            .ok_or_else(|| InteropError::type_mismatch("managed object", self.script.type_of(this)))?;
        let view = self.refs.require(id, RefKind::has_managed_state, "method call")?;
        let wrapper = self.wrapper(self.managed.class_of(view.managed)?)?;
        let set = wrapper.method(name).ok_or_else(|| {
            InteropError::resolution(format!("{} has no method {}", wrapper.info().name, name))
        })?;
        let method = set.resolve(args.len())?.info(self.managed())?.clone();
        call::call_instance(self, &method, this, args)
    }

    /// Call the static method `name` of `class`
    pub fn call_static(
        &self,
        class: ClassId,
        name: &str,
        args: &[ScriptValue],
    ) -> InteropResult<ScriptValue> {
        let wrapper = self.wrapper(class)?;
        let set = wrapper.static_method(name).ok_or_else(|| {
            InteropError::resolution(format!("{} has no static method {}", wrapper.info().name, name))
        })?;
        let method = set.resolve(args.len())?.info(self.managed())?.clone();
        call::call_static(self, &method, args)
    }

    // ========================================================================
    // Identity
    // ========================================================================

    /// Link the managed object rooted in `slot` with `script`
    ///
    /// The object is read back from its root, never taken from before an
    /// allocation. Callers check both sides first, so a collision is a
    /// broken invariant: fatal, or an error in hardened mode.
    pub fn register(
        &self,
        scope: &HandleScope<'_>,
        slot: LocalSlot,
        script: ScriptObjectRef,
        kind: RefKind,
    ) -> InteropResult<RefId> {
        let obj = scope
            .get(slot)
            .ok_or_else(|| InteropError::identity("registration through an empty handle-scope slot"))?;
        match self.refs.create(obj, script, kind) {
            Ok(id) => {
                log::trace!(
                    "shared reference {}: managed {} <-> script {} ({:?})",
                    id.index(),
                    obj.to_raw(),
                    script.to_raw(),
                    kind
                );
                Ok(id)
            }
            Err(err @ (InteropError::IdentityInconsistency(_) | InteropError::RefStorageFull(_))) => {
                if !self.options.hardened {
                    fatal(&err.to_string());
                }
                log::warn!("{}", err);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Run a full cross-heap collection
    pub fn collect_cross_heap(&self) -> InteropResult<XgcStats> {
        xgc::collect(self)
    }

    // ========================================================================
    // Scripting-value boxes and errors
    // ========================================================================

    /// Box a script value in a new `std.interop.ScriptValue`
    ///
    /// The box holds a persistent handle in its opaque payload; the handle
    /// is deleted when the managed collector frees the box.
    pub fn box_value(&self, value: ScriptValue) -> InteropResult<ObjectRef> {
        let managed = self.managed();
        let obj = managed.alloc_object(managed.well_known(WellKnownClass::ScriptValue))?;
        let handle = self.script.create_persistent(value);
        if let Err(err) = managed.set_opaque_payload(obj, handle.to_raw() as u64) {
            self.script.delete_persistent(handle);
            return Err(err);
        }
        Ok(obj)
    }

    /// Script value held by a `std.interop.ScriptValue`
    pub fn unbox_value(&self, obj: ObjectRef) -> InteropResult<ScriptValue> {
        match self.managed.opaque_payload(obj)? {
            None => Ok(ScriptValue::Undefined),
            Some(raw) => {
                let handle = u32::try_from(raw)
                    .map(PersistentHandle::from_raw)
                    .map_err(|_| InteropError::identity("corrupt scripting-value payload"))?;
                self.script
                    .persistent_value(handle)
                    .ok_or_else(|| InteropError::identity("scripting-value box outlived its handle"))
            }
        }
    }

    /// Script handle object standing for a new box of `value`
    ///
    /// Unlike a box produced by conversion, the handle keeps the box's
    /// identity: it crosses to the managed side as the same box and the box
    /// crosses back as the handle.
    pub fn box_handle(&self, value: ScriptValue) -> InteropResult<ScriptObjectRef> {
        let scope = HandleScope::open(self.managed());
        let slot = scope.root(self.box_value(value)?);
        let handle = self.script.new_object_with_proto(None);
        self.register(&scope, slot, handle, RefKind::ManagedOwned)?;
        Ok(handle)
    }

    /// Box behind a handle from [`InteropContext::box_handle`]
    pub fn handle_box(&self, value: &ScriptValue) -> InteropResult<Option<ObjectRef>> {
        let Some(view) = self.refs.find_by_value(value).and_then(|id| self.refs.view(id)) else {
            return Ok(None);
        };
        let managed = self.managed();
        if managed.class_of(view.managed)? == managed.well_known(WellKnownClass::ScriptValue) {
            Ok(Some(view.managed))
        } else {
            Ok(None)
        }
    }

    /// Managed `std.interop.ScriptError` carrying a thrown script value
    pub fn new_script_error(&self, value: &ScriptValue) -> InteropResult<ObjectRef> {
        let managed = self.managed();
        let class = managed.well_known(WellKnownClass::ScriptError);
        let message = value
            .as_object()
            .and_then(|obj| self.script.get(obj, &PropertyKey::name("message")).ok())
            .and_then(|m| m.as_str().map(str::to_string))
            .unwrap_or_else(|| describe(value));

        let scope = HandleScope::open(managed);
        let slot = scope.root(managed.new_error(class, &message)?);
        let boxed = self.box_value(value.clone())?;
        let error = scope
            .get(slot)
            .ok_or_else(|| InteropError::identity("script error lost its handle-scope root"))?;
        let field = managed
            .find_field(class, "value")
            .ok_or_else(|| InteropError::resolution("ScriptError without value field"))?;
        managed.set_field(Some(error), field.id, ManagedValue::object(boxed))?;
        Ok(error)
    }

    // ========================================================================
    // Reflection helpers
    // ========================================================================

    /// Public instance fields of `class` and its superclasses, base first
    pub fn instance_fields(&self, class: ClassId) -> InteropResult<Vec<Arc<FieldInfo>>> {
        let mut chain = Vec::new();
        let mut current = Some(class);
        while let Some(class) = current {
            chain.push(class);
            current = self.managed.class_info(class)?.super_class;
        }
        let mut fields = Vec::new();
        for class in chain.into_iter().rev() {
            fields.extend(
                self.managed
                    .class_fields(class)?
                    .into_iter()
                    .filter(|f| !f.is_static && f.visibility == Visibility::Public),
            );
        }
        Ok(fields)
    }

    // ========================================================================
    // Interface proxies
    // ========================================================================

    /// Dispatch flavor of a synthesized proxy class
    pub fn proxy_flavor(&self, class: ClassId) -> Option<ProxyFlavor> {
        self.proxy_flavors.read().get(&class).copied()
    }

    /// Managed class implementing `iface` by calling into a script object
    ///
    /// Every abstract method of the interface and its super-interfaces gets
    /// a bridge body. Defined once per interface.
    pub fn proxy_class(&self, iface: ClassId) -> InteropResult<ClassId> {
        if let Some(&class) = self.proxies.read().get(&iface) {
            return Ok(class);
        }
        let managed = self.managed();
        let info = managed.class_info(iface)?;
        if !info.is_interface() {
            return Err(InteropError::type_mismatch("interface", &*info.name));
        }
        let name = format!("{}$Proxy", info.name);
        let mut def = ClassDef::new(name.as_str()).implements(iface);
        let mut seen = FxHashSet::default();
        let mut pending = vec![iface];
        while let Some(current) = pending.pop() {
            pending.extend(managed.class_info(current)?.interfaces.iter().copied());
            for method in managed.class_methods(current)? {
                if method.is_static || method.body != BodyKind::Abstract {
                    continue;
                }
                if !seen.insert((method.name.clone(), method.descriptor.clone())) {
                    continue;
                }
                let mut bridge = MethodDef::bridge(&*method.name, &*method.descriptor)
                    .optional_from(method.mandatory);
                bridge = match method.accessor {
                    Some(AccessorKind::Getter) => bridge.getter(),
                    Some(AccessorKind::Setter) => bridge.setter(),
                    None => bridge,
                };
                if method.has_rest {
                    bridge = bridge.rest();
                }
                def = def.method(bridge);
            }
        }

        let class = match managed.define_class(def) {
            Ok(class) => class,
            Err(err) => managed.class_by_name(&name).ok_or(err)?,
        };
        let flavor = match info.kind {
            ClassKind::FunctionalInterface => ProxyFlavor::Callee,
            _ => ProxyFlavor::Member,
        };
        self.proxy_flavors.write().insert(class, flavor);
        let class = *self.proxies.write().entry(iface).or_insert(class);
        log::debug!("proxy class {} ({:?})", name, flavor);
        Ok(class)
    }

    /// Managed proxy of `iface` delegating to the script object `obj`
    pub fn proxy_instance(&self, iface: ClassId, obj: ScriptObjectRef) -> InteropResult<ManagedValue> {
        let class = self.proxy_class(iface)?;
        let managed = self.managed();
        let scope = HandleScope::open(managed);
        let slot = scope.root(managed.alloc_object(class)?);
        self.register(&scope, slot, obj, RefKind::ScriptOwned)?;
        scope
            .get(slot)
            .map(ManagedValue::object)
            .ok_or_else(|| InteropError::identity("proxy lost its handle-scope root"))
    }
}

/// Message text for a thrown script value that has no `message`
fn describe(value: &ScriptValue) -> String {
    match value {
        ScriptValue::String(s) => s.to_string(),
        ScriptValue::Number(n) => n.to_string(),
        ScriptValue::Bool(b) => b.to_string(),
        other => other.kind_name().to_string(),
    }
}

/// Context behind a closure stored in the script runtime
pub(crate) fn upgrade(
    weak: &Weak<InteropContext>,
    rt: &dyn ScriptRuntime,
) -> ScriptResult<Arc<InteropContext>> {
    weak.upgrade().ok_or_else(|| {
        ScriptValue::Object(rt.new_error(ScriptErrorKind::TypeError, "interop context was dropped"))
    })
}

// ============================================================================
// Bridge entry points
// ============================================================================

/// [`BridgeHooks`] installed into the managed runtime
struct BridgeEntry {
    ctx: Weak<InteropContext>,
    /// Payload finalization must work after the context is gone
    script: Arc<dyn ScriptRuntime>,
}

impl BridgeEntry {
    fn context(&self) -> Arc<InteropContext> {
        match self.ctx.upgrade() {
            Some(ctx) => ctx,
            None => fatal("managed runtime called into a dropped interop context"),
        }
    }
}

impl BridgeHooks for BridgeEntry {
    fn initialize_class(&self, class: ClassId) -> Result<(), ObjectRef> {
        let ctx = self.context();
        ctx.bindings
            .bind_class(&ctx, class)
            .map(|_| ())
            .map_err(|err| throw_into_managed(&ctx, err))
    }

    fn call_script(&self, method: MethodId, args: &ArgBuffer) -> Result<ManagedValue, ObjectRef> {
        let ctx = self.context();
        call::call_script(&ctx, method, args)
    }

    fn finalize_payload(&self, payload: u64) {
        match u32::try_from(payload) {
            Ok(raw) => self.script.delete_persistent(PersistentHandle::from_raw(raw)),
            Err(_) => log::warn!("ignoring out-of-range payload {:#x}", payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::ManagedVm;
    use crate::script::ScriptEngine;

    fn context() -> (Arc<ManagedVm>, Arc<ScriptEngine>, Arc<InteropContext>) {
        let vm = ManagedVm::new();
        let engine = ScriptEngine::new();
        let ctx = InteropContext::new(vm.clone(), engine.clone(), InteropOptions::default()).unwrap();
        (vm, engine, ctx)
    }

    #[test]
    fn test_rejects_invalid_options() {
        let options = InteropOptions {
            ref_capacity: 0,
            ..InteropOptions::default()
        };
        let err = InteropContext::new(ManagedVm::new(), ScriptEngine::new(), options).err();
        assert!(matches!(err, Some(SetupError::Options(OptionsError::RefCapacity { .. }))));
    }

    #[test]
    fn test_second_context_on_same_vm_fails() {
        let (vm, engine, _ctx) = context();
        let err = InteropContext::new(vm, engine, InteropOptions::default()).err();
        assert!(matches!(err, Some(SetupError::Interop(_))));
    }

    #[test]
    fn test_box_roundtrip_and_finalize() {
        let (vm, engine, ctx) = context();
        let before = engine.persistent_count();
        let obj = engine.new_object();
        let boxed = ctx.box_value(ScriptValue::Object(obj)).unwrap();
        assert_eq!(engine.persistent_count(), before + 1);
        assert_eq!(ctx.unbox_value(boxed).unwrap(), ScriptValue::Object(obj));

        vm.collect();
        assert!(!vm.is_live(boxed));
        assert_eq!(engine.persistent_count(), before);
    }

    #[test]
    fn test_empty_box_is_undefined() {
        let (vm, _engine, ctx) = context();
        let obj = vm.alloc_object(vm.well_known(WellKnownClass::ScriptValue)).unwrap();
        assert_eq!(ctx.unbox_value(obj).unwrap(), ScriptValue::Undefined);
    }

    #[test]
    fn test_script_error_carries_value() {
        let (vm, engine, ctx) = context();
        let thrown = engine.type_error("bad input");
        let error = ctx.new_script_error(&thrown).unwrap();
        let class = vm.class_of(error).unwrap();
        assert_eq!(class, vm.well_known(WellKnownClass::ScriptError));

        let message = vm.find_field(class, "message").unwrap();
        let text = vm.get_field(Some(error), message.id).unwrap().as_object().unwrap();
        assert_eq!(&*vm.read_string(text).unwrap(), "bad input");

        let value = vm.find_field(class, "value").unwrap();
        let boxed = vm.get_field(Some(error), value.id).unwrap().as_object().unwrap();
        assert_eq!(ctx.unbox_value(boxed).unwrap(), thrown);
    }

    #[test]
    fn test_duplicate_registration_is_an_error_when_hardened() {
        let options = InteropOptions {
            hardened: true,
            ..InteropOptions::default()
        };
        let vm = ManagedVm::new();
        let engine = ScriptEngine::new();
        let ctx = InteropContext::new(vm.clone(), engine.clone(), options).unwrap();
        let scope = HandleScope::open(&*vm);
        let slot = scope.root(vm.alloc_object(vm.well_known(WellKnownClass::Object)).unwrap());
        ctx.register(&scope, slot, engine.new_object(), RefKind::ManagedOwned).unwrap();
        let err = ctx
            .register(&scope, slot, engine.new_object(), RefKind::ManagedOwned)
            .unwrap_err();
        assert!(matches!(err, InteropError::IdentityInconsistency(_)));
        assert_eq!(ctx.refs().live_count(), 1);
    }

    #[test]
    #[should_panic(expected = "already mapped")]
    fn test_duplicate_registration_is_fatal() {
        let (vm, engine, ctx) = context();
        let scope = HandleScope::open(&*vm);
        let slot = scope.root(vm.alloc_object(vm.well_known(WellKnownClass::Object)).unwrap());
        ctx.register(&scope, slot, engine.new_object(), RefKind::ManagedOwned).unwrap();
        let _ = ctx.register(&scope, slot, engine.new_object(), RefKind::ManagedOwned);
    }

    #[test]
    fn test_instance_fields_base_first() {
        let (vm, _engine, ctx) = context();
        let error = vm.well_known(WellKnownClass::ScriptError);
        let names: Vec<_> = ctx
            .instance_fields(error)
            .unwrap()
            .iter()
            .map(|f| f.name.to_string())
            .collect();
        assert_eq!(names, ["message", "value"]);
    }
}
