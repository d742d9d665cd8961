//! Reference converters

use std::sync::Arc;
use std::thread::ThreadId;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tandem_sdk::descriptor::class_fragment;
use tandem_sdk::{
    CallArgs, ClassId, FieldInfo, InteropError, InteropResult, LocalSlot, ManagedValue, MethodInfo,
    NativeFunction, ObjectRef, PrimitiveKind, PropertyKey, ScriptObjectRef, ScriptRuntime,
    ScriptValue, TypeTag, WellKnownClass,
};

use super::{managed_to_script, primitive, script_to_managed, RefConverter};
use crate::interop::call::forward;
use crate::interop::context::{upgrade, InteropContext};
use crate::interop::exceptions::throw_into_script;
use crate::interop::proto_reader::{managed_name, resolve_fragment};
use crate::interop::scope::HandleScope;
use crate::interop::shared_ref::{RefId, RefKind};
use crate::interop::storage::RefView;

fn class_name(ctx: &InteropContext, class: ClassId) -> String {
    managed_name(ctx.managed(), TypeTag::Ref(class))
}

fn field_value(ctx: &InteropContext, obj: ObjectRef, name: &str) -> InteropResult<ManagedValue> {
    let managed = ctx.managed();
    let class = managed.class_of(obj)?;
    let field = managed.find_field(class, name).ok_or_else(|| {
        InteropError::resolution(format!("{} has no field {}", class_name(ctx, class), name))
    })?;
    managed.get_field(Some(obj), field.id)
}

/// Give `obj` a script instance of its class wrapper
fn wrap_instance(ctx: &InteropContext, obj: ObjectRef) -> InteropResult<ScriptValue> {
    let class = ctx.managed().class_of(obj)?;
    let wrapper = ctx.wrapper(class)?;
    let scope = HandleScope::open(ctx.managed());
    let slot = scope.root(obj);
    wrapper
        .instantiate(ctx, &scope, slot, None)
        .map(ScriptValue::Object)
}

/// Allocate a box of `kind` holding `value`
pub(crate) fn box_primitive(
    ctx: &InteropContext,
    kind: PrimitiveKind,
    value: ManagedValue,
) -> InteropResult<ObjectRef> {
    let managed = ctx.managed();
    let class = managed.well_known(WellKnownClass::box_for(kind));
    let obj = managed.alloc_object(class)?;
    let field = managed
        .find_field(class, "value")
        .ok_or_else(|| InteropError::resolution("box class without value field"))?;
    managed.set_field(Some(obj), field.id, value)?;
    Ok(obj)
}

// ============================================================================
// Well-known classes
// ============================================================================

/// `std.interop.ScriptValue`: the box holds a persistent handle
pub struct ScriptValueConverter;

impl RefConverter for ScriptValueConverter {
    fn name(&self) -> &'static str {
        "script-value"
    }

    fn wrap(&self, ctx: &InteropContext, obj: ObjectRef) -> InteropResult<ScriptValue> {
        ctx.unbox_value(obj)
    }

    fn unwrap(&self, ctx: &InteropContext, value: &ScriptValue) -> InteropResult<ManagedValue> {
        ctx.box_value(value.clone()).map(ManagedValue::object)
    }
}

/// `std.core.String`
pub struct StringConverter;

impl RefConverter for StringConverter {
    fn name(&self) -> &'static str {
        "string"
    }

    fn wrap(&self, ctx: &InteropContext, obj: ObjectRef) -> InteropResult<ScriptValue> {
        Ok(ScriptValue::String(ctx.managed().read_string(obj)?))
    }

    fn unwrap(&self, ctx: &InteropContext, value: &ScriptValue) -> InteropResult<ManagedValue> {
        match value {
            ScriptValue::String(s) => Ok(ManagedValue::object(ctx.managed().alloc_string(s))),
            other => Err(InteropError::type_mismatch(
                WellKnownClass::String.name(),
                other.kind_name(),
            )),
        }
    }
}

/// `std.core.Object`: script primitives become boxes or strings, any other
/// script value becomes a scripting-value box
pub struct UniversalConverter;

impl RefConverter for UniversalConverter {
    fn name(&self) -> &'static str {
        "universal"
    }

    fn wrap(&self, ctx: &InteropContext, obj: ObjectRef) -> InteropResult<ScriptValue> {
        wrap_instance(ctx, obj)
    }

    fn unwrap(&self, ctx: &InteropContext, value: &ScriptValue) -> InteropResult<ManagedValue> {
        let obj = match value {
            ScriptValue::Bool(b) => box_primitive(ctx, PrimitiveKind::Bool, ManagedValue::Bool(*b))?,
            ScriptValue::Number(n) => box_primitive(ctx, PrimitiveKind::F64, ManagedValue::F64(*n))?,
            ScriptValue::String(s) => ctx.managed().alloc_string(s),
            other => ctx.box_value(other.clone())?,
        };
        Ok(ManagedValue::object(obj))
    }
}

/// Numeric and boolean boxes
pub struct NumericBoxConverter {
    kind: PrimitiveKind,
}

impl NumericBoxConverter {
    /// Converter for the box of `kind`
    pub fn new(kind: PrimitiveKind) -> Self {
        Self { kind }
    }
}

impl RefConverter for NumericBoxConverter {
    fn name(&self) -> &'static str {
        "numeric-box"
    }

    fn wrap(&self, ctx: &InteropContext, obj: ObjectRef) -> InteropResult<ScriptValue> {
        primitive::to_script(field_value(ctx, obj, "value")?)
    }

    fn unwrap(&self, ctx: &InteropContext, value: &ScriptValue) -> InteropResult<ManagedValue> {
        let unboxed = primitive::to_managed(self.kind, value)?;
        box_primitive(ctx, self.kind, unboxed).map(ManagedValue::object)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Error classes
///
/// A `std.interop.ScriptError` converts back to the script value it carries;
/// other errors get a wrapper instance whose prototype inherits
/// `Error.prototype`. Script error objects become `ScriptError`s.
pub struct ErrorConverter {
    class: ClassId,
}

impl ErrorConverter {
    /// Converter for an error class
    pub fn new(class: ClassId) -> Self {
        Self { class }
    }
}

impl RefConverter for ErrorConverter {
    fn name(&self) -> &'static str {
        "error"
    }

    fn wrap(&self, ctx: &InteropContext, obj: ObjectRef) -> InteropResult<ScriptValue> {
        let managed = ctx.managed();
        let script_error = managed.well_known(WellKnownClass::ScriptError);
        if managed.is_assignable(managed.class_of(obj)?, script_error) {
            return match field_value(ctx, obj, "value")?.as_object() {
                Some(boxed) => ctx.unbox_value(boxed),
                None => Ok(ScriptValue::Undefined),
            };
        }
        wrap_instance(ctx, obj)
    }

    fn unwrap(&self, ctx: &InteropContext, value: &ScriptValue) -> InteropResult<ManagedValue> {
        match value.as_object() {
            Some(obj) if ctx.script().is_error(obj) => {
                ctx.new_script_error(value).map(ManagedValue::object)
            }
            _ => Err(InteropError::type_mismatch(
                class_name(ctx, self.class),
                ctx.script().type_of(value),
            )),
        }
    }
}

// ============================================================================
// Interfaces
// ============================================================================

/// Functional interfaces: managed implementations become script functions,
/// script functions become managed proxies
pub struct FunctionConverter {
    iface: ClassId,
    invoke: Arc<MethodInfo>,
}

impl FunctionConverter {
    /// Converter for a functional interface with a single abstract method
    pub fn new(ctx: &InteropContext, iface: ClassId) -> InteropResult<Self> {
        let mut methods = ctx
            .managed()
            .class_methods(iface)?
            .into_iter()
            .filter(|m| !m.is_static && !m.is_constructor);
        let invoke = match (methods.next(), methods.next()) {
            (Some(method), None) => method,
            _ => {
                return Err(InteropError::resolution(format!(
                    "functional interface {} must declare exactly one method",
                    class_name(ctx, iface)
                )))
            }
        };
        Ok(Self { iface, invoke })
    }
}

impl RefConverter for FunctionConverter {
    fn name(&self) -> &'static str {
        "function"
    }

    fn wrap(&self, ctx: &InteropContext, obj: ObjectRef) -> InteropResult<ScriptValue> {
        let weak = ctx.weak();
        let method = self.invoke.clone();
        let body: NativeFunction = Arc::new(move |rt: &dyn ScriptRuntime, call: &CallArgs| {
            let ctx = upgrade(&weak, rt)?;
            let receiver = ctx
                .refs()
                .find_by_script(call.callee)
                .ok_or_else(|| InteropError::identity("function is not linked to a managed object"))
                .and_then(|id| ctx.refs().require(id, RefKind::has_managed_state, "call"));
            receiver
                .and_then(|view| forward::call_managed(&ctx, &method, Some(view.managed), &call.args))
                .map_err(|err| throw_into_script(&ctx, err))
        });
        let function = ctx.script().new_function(&self.invoke.name, body);
        let scope = HandleScope::open(ctx.managed());
        let slot = scope.root(obj);
        ctx.register(&scope, slot, function, RefKind::ManagedOwned)?;
        Ok(ScriptValue::Object(function))
    }

    fn unwrap(&self, ctx: &InteropContext, value: &ScriptValue) -> InteropResult<ManagedValue> {
        match value.as_object() {
            Some(obj) if ctx.script().is_callable(value) => ctx.proxy_instance(self.iface, obj),
            _ => Err(InteropError::type_mismatch("function", ctx.script().type_of(value))),
        }
    }
}

/// Interfaces: script objects become managed proxies whose methods call the
/// object's properties
pub struct InterfaceConverter {
    iface: ClassId,
}

impl InterfaceConverter {
    /// Converter for an interface
    pub fn new(iface: ClassId) -> Self {
        Self { iface }
    }
}

impl RefConverter for InterfaceConverter {
    fn name(&self) -> &'static str {
        "interface"
    }

    fn wrap(&self, ctx: &InteropContext, obj: ObjectRef) -> InteropResult<ScriptValue> {
        wrap_instance(ctx, obj)
    }

    fn unwrap(&self, ctx: &InteropContext, value: &ScriptValue) -> InteropResult<ManagedValue> {
        match value.as_object() {
            Some(obj) => ctx.proxy_instance(self.iface, obj),
            None => Err(InteropError::type_mismatch(
                class_name(ctx, self.iface),
                value.kind_name(),
            )),
        }
    }
}

// ============================================================================
// Value classes
// ============================================================================

/// Enumerations: a member converts to its `value` field, and back by
/// searching the class's constants
pub struct EnumConverter {
    class: ClassId,
}

impl EnumConverter {
    /// Converter for an enum class
    pub fn new(class: ClassId) -> Self {
        Self { class }
    }

    fn member_value(&self, ctx: &InteropContext, member: ObjectRef) -> InteropResult<ScriptValue> {
        let managed = ctx.managed();
        let field = managed.find_field(self.class, "value").ok_or_else(|| {
            InteropError::resolution(format!("enum {} has no value field", class_name(ctx, self.class)))
        })?;
        let tag = resolve_fragment(managed, &field.descriptor)?;
        managed_to_script(ctx, managed.get_field(Some(member), field.id)?, tag)
    }
}

impl RefConverter for EnumConverter {
    fn name(&self) -> &'static str {
        "enum"
    }

    fn wrap(&self, ctx: &InteropContext, obj: ObjectRef) -> InteropResult<ScriptValue> {
        self.member_value(ctx, obj)
    }

    fn unwrap(&self, ctx: &InteropContext, value: &ScriptValue) -> InteropResult<ManagedValue> {
        let managed = ctx.managed();
        let info = managed.class_info(self.class)?;
        let fragment = class_fragment(&info.name);
        for field in managed.class_fields(self.class)? {
            if !field.is_static || *field.descriptor != *fragment {
                continue;
            }
            let Some(member) = managed.get_field(None, field.id)?.as_object() else {
                continue;
            };
            if self.member_value(ctx, member)? == *value {
                return Ok(ManagedValue::object(member));
            }
        }
        Err(InteropError::type_mismatch(
            format!("member of {}", info.name),
            ctx.script().type_of(value),
        ))
    }
}

/// Record classes: exchanged as plain script objects under a hybrid
/// reference, with fields copied at every crossing
///
/// A record reached again while its own fields are being copied (a cycle)
/// is linked, not copied a second time.
pub struct RecordConverter {
    class: ClassId,
    fields: OnceCell<Vec<(Arc<FieldInfo>, TypeTag)>>,
    /// Records whose fields a thread is copying right now
    copying: Mutex<FxHashSet<(ThreadId, RefId)>>,
}

/// Holds a record's entry in [`RecordConverter::copying`]
struct Copying<'a> {
    set: &'a Mutex<FxHashSet<(ThreadId, RefId)>>,
    key: (ThreadId, RefId),
}

impl Drop for Copying<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
    }
}

impl RecordConverter {
    /// Converter for a record class
    pub fn new(class: ClassId) -> Self {
        Self {
            class,
            fields: OnceCell::new(),
            copying: Mutex::new(FxHashSet::default()),
        }
    }

    /// Claim `id` for copying; `None` when this thread is already copying it
    fn enter(&self, id: RefId) -> Option<Copying<'_>> {
        let key = (std::thread::current().id(), id);
        let fresh = self.copying.lock().insert(key);
        fresh.then(|| Copying {
            set: &self.copying,
            key,
        })
    }

    fn fields(&self, ctx: &InteropContext) -> InteropResult<&[(Arc<FieldInfo>, TypeTag)]> {
        self.fields
            .get_or_try_init(|| {
                ctx.instance_fields(self.class)?
                    .into_iter()
                    .map(|field| {
                        let tag = resolve_fragment(ctx.managed(), &field.descriptor)?;
                        Ok((field, tag))
                    })
                    .collect()
            })
            .map(Vec::as_slice)
    }

    fn copy_to_script(&self, ctx: &InteropContext, view: &RefView) -> InteropResult<()> {
        let Some(_copying) = self.enter(view.id) else {
            return Ok(());
        };
        for (field, tag) in self.fields(ctx)? {
            let value = ctx.managed().get_field(Some(view.managed), field.id)?;
            let converted = managed_to_script(ctx, value, *tag)?;
            ctx.script()
                .set(view.script, &PropertyKey::name(&field.name), converted)
                .map_err(InteropError::ScriptException)?;
        }
        Ok(())
    }

    fn copy_to_managed(
        &self,
        ctx: &InteropContext,
        scope: &HandleScope<'_>,
        slot: LocalSlot,
        id: RefId,
        source: ScriptObjectRef,
    ) -> InteropResult<()> {
        let Some(_copying) = self.enter(id) else {
            return Ok(());
        };
        for (field, tag) in self.fields(ctx)? {
            let value = ctx
                .script()
                .get(source, &PropertyKey::name(&field.name))
                .map_err(InteropError::ScriptException)?;
            let converted = if value.is_undefined() {
                tag.default_value()
            } else {
                script_to_managed(ctx, &value, *tag)?
            };
            let target = scope
                .get(slot)
                .ok_or_else(|| InteropError::identity("record lost its handle-scope root"))?;
            ctx.managed().set_field(Some(target), field.id, converted)?;
        }
        Ok(())
    }
}

impl RefConverter for RecordConverter {
    fn name(&self) -> &'static str {
        "record"
    }

    fn wrap(&self, ctx: &InteropContext, obj: ObjectRef) -> InteropResult<ScriptValue> {
        let script = ctx.script().new_object();
        let scope = HandleScope::open(ctx.managed());
        let slot = scope.root(obj);
        let id = ctx.register(&scope, slot, script, RefKind::Hybrid)?;
        if let Some(view) = ctx.refs().view(id) {
            self.copy_to_script(ctx, &view)?;
        }
        Ok(ScriptValue::Object(script))
    }

    fn unwrap(&self, ctx: &InteropContext, value: &ScriptValue) -> InteropResult<ManagedValue> {
        let Some(source) = value.as_object() else {
            return Err(InteropError::type_mismatch(
                class_name(ctx, self.class),
                value.kind_name(),
            ));
        };
        let scope = HandleScope::open(ctx.managed());
        let slot = scope.root(ctx.managed().alloc_object(self.class)?);
        // linked before the copy so fields leading back to `source` find it
        let id = ctx.register(&scope, slot, source, RefKind::Hybrid)?;
        self.copy_to_managed(ctx, &scope, slot, id, source)?;
        Ok(ManagedValue::Ref(scope.get(slot)))
    }

    fn refresh_script(&self, ctx: &InteropContext, view: &RefView) -> InteropResult<()> {
        self.copy_to_script(ctx, view)
    }

    fn refresh_managed(&self, ctx: &InteropContext, view: &RefView) -> InteropResult<()> {
        let scope = HandleScope::open(ctx.managed());
        let slot = scope.root(view.managed);
        self.copy_to_managed(ctx, &scope, slot, view.id, view.script)
    }
}

/// Arrays, copied element by element in both directions
pub struct ArrayConverter {
    class: ClassId,
    component: TypeTag,
}

impl ArrayConverter {
    /// Converter for an array class
    pub fn new(class: ClassId, component: TypeTag) -> Self {
        Self { class, component }
    }
}

impl RefConverter for ArrayConverter {
    fn name(&self) -> &'static str {
        "array"
    }

    fn wrap(&self, ctx: &InteropContext, obj: ObjectRef) -> InteropResult<ScriptValue> {
        let managed = ctx.managed();
        let elements = (0..managed.array_len(obj)?)
            .map(|i| managed_to_script(ctx, managed.array_get(obj, i)?, self.component))
            .collect::<InteropResult<Vec<_>>>()?;
        Ok(ScriptValue::Object(ctx.script().new_array(&elements)))
    }

    fn unwrap(&self, ctx: &InteropContext, value: &ScriptValue) -> InteropResult<ManagedValue> {
        let script = ctx.script();
        let (source, len) = match value.as_object().and_then(|obj| Some((obj, script.array_len(obj)?))) {
            Some(found) => found,
            None => {
                return Err(InteropError::type_mismatch(
                    class_name(ctx, self.class),
                    script.type_of(value),
                ))
            }
        };
        let managed = ctx.managed();
        let scope = HandleScope::open(managed);
        let slot = scope.root(managed.alloc_array(self.class, len)?);
        for i in 0..len {
            let element = script
                .get(source, &PropertyKey::Index(i as u32))
                .map_err(InteropError::ScriptException)?;
            let converted = script_to_managed(ctx, &element, self.component)?;
            let array = scope
                .get(slot)
                .ok_or_else(|| InteropError::identity("array lost its handle-scope root"))?;
            managed.array_set(array, i, converted)?;
        }
        Ok(ManagedValue::Ref(scope.get(slot)))
    }
}

/// Ordinary classes, exposed through their class wrapper
pub struct ClassConverter {
    class: ClassId,
}

impl ClassConverter {
    /// Converter for a user class
    pub fn new(class: ClassId) -> Self {
        Self { class }
    }
}

impl RefConverter for ClassConverter {
    fn name(&self) -> &'static str {
        "class"
    }

    fn wrap(&self, ctx: &InteropContext, obj: ObjectRef) -> InteropResult<ScriptValue> {
        wrap_instance(ctx, obj)
    }

    fn unwrap(&self, ctx: &InteropContext, value: &ScriptValue) -> InteropResult<ManagedValue> {
        // mapped objects never get here
        Err(InteropError::type_mismatch(
            class_name(ctx, self.class),
            ctx.script().type_of(value),
        ))
    }
}
