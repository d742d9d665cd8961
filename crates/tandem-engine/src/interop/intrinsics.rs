//! Intrinsics
//!
//! The surface each runtime sees of the other beyond wrapped classes:
//!
//! - managed: `std.interop.ScriptRuntime`, static helpers for reaching
//!   script globals and modules, reading and writing properties, comparing
//!   script values, and boxing primitives as `std.interop.ScriptValue`
//! - script: a namespace object on the global (`managed` by default) with
//!   `getClass(name)`, `isInstance(value, className)`, `box(value)`,
//!   `unbox(value)`, `loadModule(name)` and `strictEqual(a, b)`

use std::sync::{Arc, Weak};

use tandem_sdk::{
    CallArgs, ClassDef, ExecutionMode, InteropError, InteropResult, ManagedRuntime, ManagedValue,
    MethodDef, NativeFunction, ObjectRef, PropertyDescriptor, PropertyKey, ScriptObjectRef,
    ScriptRuntime, ScriptValue, WellKnownClass,
};

use super::context::{upgrade, InteropContext};
use super::exceptions::{throw_into_managed, throw_into_script};
use super::fatal;
use super::scope::ModeScope;

/// Name of the managed intrinsics class
pub const RUNTIME_CLASS: &str = "std.interop.ScriptRuntime";

const VALUE: &str = "Lstd.interop.ScriptValue;";
const STRING: &str = "Lstd.core.String;";

type Body = fn(&InteropContext, &[ManagedValue]) -> InteropResult<ManagedValue>;

/// Define the managed class and publish the script namespace
pub fn install(ctx: &Arc<InteropContext>) -> InteropResult<()> {
    install_managed(ctx)?;
    install_script(ctx)
}

// ============================================================================
// std.interop.ScriptRuntime
// ============================================================================

fn install_managed(ctx: &InteropContext) -> InteropResult<()> {
    let methods: [(&str, String, Body); 12] = [
        ("getGlobal", VALUE.to_string(), get_global),
        ("loadModule", format!("{VALUE}{STRING}"), load_module),
        ("getProperty", format!("{VALUE}{VALUE}{STRING}"), get_property),
        ("setProperty", format!("V{VALUE}{STRING}{VALUE}"), set_property),
        ("strictEqual", format!("Z{VALUE}{VALUE}"), strict_equal),
        ("instanceOf", format!("Z{VALUE}{VALUE}"), instance_of),
        ("boxNumber", format!("{VALUE}D"), box_number),
        ("unboxNumber", format!("D{VALUE}"), unbox_number),
        ("boxString", format!("{VALUE}{STRING}"), box_string),
        ("unboxString", format!("{STRING}{VALUE}"), unbox_string),
        ("boxBoolean", format!("{VALUE}Z"), box_boolean),
        ("unboxBoolean", format!("Z{VALUE}"), unbox_boolean),
    ];
    let mut def = ClassDef::new(RUNTIME_CLASS).abstract_class();
    for (name, descriptor, body) in methods {
        def = def.method(MethodDef::native(name, descriptor, managed_native(ctx.weak(), body)).static_method());
    }
    let class = ctx.managed().define_class(def)?;
    log::debug!("defined {} as class {}", RUNTIME_CLASS, class.to_raw());
    Ok(())
}

/// Managed method body running `body` against the live context in native mode
fn managed_native(
    weak: Weak<InteropContext>,
    body: Body,
) -> impl Fn(&dyn ManagedRuntime, Option<ObjectRef>, &[ManagedValue]) -> Result<ManagedValue, ObjectRef>
       + Send
       + Sync
       + 'static {
    move |managed: &dyn ManagedRuntime, _: Option<ObjectRef>, args: &[ManagedValue]| {
        let Some(ctx) = weak.upgrade() else {
            let class = managed.well_known(WellKnownClass::TypeError);
            return match managed.new_error(class, "interop context was dropped") {
                Ok(obj) => Err(obj),
                Err(err) => fatal(&format!("cannot allocate a managed exception: {}", err)),
            };
        };
        let result = {
            let _native = ModeScope::enter(managed, ExecutionMode::Native);
            body(&ctx, args)
        };
        result.map_err(|err| throw_into_managed(&ctx, err))
    }
}

fn arg(args: &[ManagedValue], i: usize) -> ManagedValue {
    args.get(i).copied().unwrap_or(ManagedValue::NULL)
}

fn unbox(ctx: &InteropContext, value: ManagedValue) -> InteropResult<ScriptValue> {
    match value.as_object() {
        Some(obj) => ctx.unbox_value(obj),
        None => Ok(ScriptValue::Undefined),
    }
}

fn boxed(ctx: &InteropContext, value: ScriptValue) -> InteropResult<ManagedValue> {
    ctx.box_value(value).map(ManagedValue::object)
}

fn string(ctx: &InteropContext, value: ManagedValue) -> InteropResult<Arc<str>> {
    match value.as_object() {
        Some(obj) => ctx.managed().read_string(obj),
        None => Err(InteropError::type_mismatch(WellKnownClass::String.name(), "null")),
    }
}

fn object(value: &ScriptValue) -> InteropResult<ScriptObjectRef> {
    value
        .as_object()
        .ok_or_else(|| InteropError::type_mismatch("object", value.kind_name()))
}

fn script_err(value: ScriptValue) -> InteropError {
    InteropError::ScriptException(value)
}

fn get_global(ctx: &InteropContext, _: &[ManagedValue]) -> InteropResult<ManagedValue> {
    boxed(ctx, ScriptValue::Object(ctx.script().global()))
}

fn load_module(ctx: &InteropContext, args: &[ManagedValue]) -> InteropResult<ManagedValue> {
    let name = string(ctx, arg(args, 0))?;
    let module = ctx.script().load_module(&name).map_err(script_err)?;
    boxed(ctx, module)
}

fn get_property(ctx: &InteropContext, args: &[ManagedValue]) -> InteropResult<ManagedValue> {
    let target = object(&unbox(ctx, arg(args, 0))?)?;
    let name = string(ctx, arg(args, 1))?;
    let value = ctx
        .script()
        .get(target, &PropertyKey::name(&name))
        .map_err(script_err)?;
    boxed(ctx, value)
}

fn set_property(ctx: &InteropContext, args: &[ManagedValue]) -> InteropResult<ManagedValue> {
    let target = object(&unbox(ctx, arg(args, 0))?)?;
    let name = string(ctx, arg(args, 1))?;
    let value = unbox(ctx, arg(args, 2))?;
    ctx.script()
        .set(target, &PropertyKey::name(&name), value)
        .map_err(script_err)?;
    Ok(ManagedValue::Void)
}

fn strict_equal(ctx: &InteropContext, args: &[ManagedValue]) -> InteropResult<ManagedValue> {
    let (a, b) = (unbox(ctx, arg(args, 0))?, unbox(ctx, arg(args, 1))?);
    Ok(ManagedValue::Bool(a == b))
}

fn instance_of(ctx: &InteropContext, args: &[ManagedValue]) -> InteropResult<ManagedValue> {
    let (value, ctor) = (unbox(ctx, arg(args, 0))?, unbox(ctx, arg(args, 1))?);
    let result = ctx.script().instance_of(&value, &ctor).map_err(script_err)?;
    Ok(ManagedValue::Bool(result))
}

fn box_number(ctx: &InteropContext, args: &[ManagedValue]) -> InteropResult<ManagedValue> {
    let n = arg(args, 0)
        .as_f64()
        .ok_or_else(|| InteropError::type_mismatch("double", arg(args, 0).type_name()))?;
    boxed(ctx, ScriptValue::Number(n))
}

fn unbox_number(ctx: &InteropContext, args: &[ManagedValue]) -> InteropResult<ManagedValue> {
    let value = unbox(ctx, arg(args, 0))?;
    value
        .as_number()
        .map(ManagedValue::F64)
        .ok_or_else(|| InteropError::type_mismatch("number", value.kind_name()))
}

fn box_string(ctx: &InteropContext, args: &[ManagedValue]) -> InteropResult<ManagedValue> {
    let s = string(ctx, arg(args, 0))?;
    boxed(ctx, ScriptValue::String(s))
}

fn unbox_string(ctx: &InteropContext, args: &[ManagedValue]) -> InteropResult<ManagedValue> {
    let value = unbox(ctx, arg(args, 0))?;
    match value.as_str() {
        Some(s) => Ok(ManagedValue::object(ctx.managed().alloc_string(s))),
        None => Err(InteropError::type_mismatch("string", value.kind_name())),
    }
}

fn box_boolean(ctx: &InteropContext, args: &[ManagedValue]) -> InteropResult<ManagedValue> {
    let b = arg(args, 0)
        .as_bool()
        .ok_or_else(|| InteropError::type_mismatch("boolean", arg(args, 0).type_name()))?;
    boxed(ctx, ScriptValue::Bool(b))
}

fn unbox_boolean(ctx: &InteropContext, args: &[ManagedValue]) -> InteropResult<ManagedValue> {
    let value = unbox(ctx, arg(args, 0))?;
    value
        .as_bool()
        .map(ManagedValue::Bool)
        .ok_or_else(|| InteropError::type_mismatch("boolean", value.kind_name()))
}

// ============================================================================
// Script namespace
// ============================================================================

fn script_native<F>(weak: &Weak<InteropContext>, body: F) -> NativeFunction
where
    F: Fn(&InteropContext, &CallArgs) -> InteropResult<ScriptValue> + Send + Sync + 'static,
{
    let weak = weak.clone();
    Arc::new(move |rt: &dyn ScriptRuntime, call: &CallArgs| {
        let ctx = upgrade(&weak, rt)?;
        body(&ctx, call).map_err(|err| throw_into_script(&ctx, err))
    })
}

fn class_name(value: &ScriptValue) -> InteropResult<&str> {
    value
        .as_str()
        .ok_or_else(|| InteropError::type_mismatch("class name", value.kind_name()))
}

/// What `strictEqual` compares: the managed object behind a shared
/// reference, the boxed value behind a box handle, otherwise the value
#[derive(PartialEq)]
enum Identity {
    Managed(ObjectRef),
    Script(ScriptValue),
}

fn identity(ctx: &InteropContext, value: &ScriptValue) -> InteropResult<Identity> {
    let value = match ctx.handle_box(value)? {
        Some(boxed) => ctx.unbox_value(boxed)?,
        None => value.clone(),
    };
    let managed = ctx
        .refs()
        .find_by_value(&value)
        .and_then(|id| ctx.refs().view(id))
        .map(|view| view.managed);
    Ok(match managed {
        Some(obj) => Identity::Managed(obj),
        None => Identity::Script(value),
    })
}

fn install_script(ctx: &InteropContext) -> InteropResult<()> {
    let script = ctx.script();
    let namespace = script.new_object();

    let get_class = script_native(&ctx.weak(), |ctx, call| {
        let name = call.arg(0);
        ctx.class_constructor(class_name(&name)?)
            .map(ScriptValue::Object)
    });
    let is_instance = script_native(&ctx.weak(), |ctx, call| {
        let (value, name) = (call.arg(0), call.arg(1));
        let managed = ctx.managed();
        let class = managed.class_by_name(class_name(&name)?).ok_or_else(|| {
            InteropError::resolution(format!("no managed class {}", class_name(&name).unwrap_or("")))
        })?;
        let actual = ctx
            .refs()
            .find_by_value(&value)
            .and_then(|id| ctx.refs().view(id))
            .filter(|view| view.kind.has_managed_state())
            .map(|view| managed.class_of(view.managed))
            .transpose()?;
        Ok(ScriptValue::Bool(
            actual.is_some_and(|actual| managed.is_assignable(actual, class)),
        ))
    });

    let box_fn = script_native(&ctx.weak(), |ctx, call| {
        ctx.box_handle(call.arg(0)).map(ScriptValue::Object)
    });
    let unbox_fn = script_native(&ctx.weak(), |ctx, call| {
        let value = call.arg(0);
        match ctx.handle_box(&value)? {
            Some(boxed) => ctx.unbox_value(boxed),
            None => Ok(value),
        }
    });
    let load_module_fn = script_native(&ctx.weak(), |ctx, call| {
        let name = call.arg(0);
        let name = name
            .as_str()
            .ok_or_else(|| InteropError::type_mismatch("module name", name.kind_name()))?;
        ctx.script().load_module(name).map_err(script_err)
    });
    let strict_equal_fn = script_native(&ctx.weak(), |ctx, call| {
        let (a, b) = (call.arg(0), call.arg(1));
        Ok(ScriptValue::Bool(identity(ctx, &a)? == identity(ctx, &b)?))
    });

    for (name, body) in [
        ("getClass", get_class),
        ("isInstance", is_instance),
        ("box", box_fn),
        ("unbox", unbox_fn),
        ("loadModule", load_module_fn),
        ("strictEqual", strict_equal_fn),
    ] {
        let function = script.new_function(name, body);
        script
            .define_property(namespace, PropertyKey::name(name), PropertyDescriptor::hidden(ScriptValue::Object(function)))
            .map_err(script_err)?;
    }
    script
        .define_property(
            script.global(),
            PropertyKey::name(&ctx.options().namespace),
            PropertyDescriptor::hidden(ScriptValue::Object(namespace)),
        )
        .map_err(script_err)?;
    log::debug!("published script namespace '{}'", ctx.options().namespace);
    Ok(())
}
