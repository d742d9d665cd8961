//! Managed-to-script calls
//!
//! Bridge method bodies land here with their raw argument buffer. The
//! signature reader and the argument reader advance together; the rest
//! array, if any, is flattened after the fixed arguments.

use std::sync::Arc;

use tandem_sdk::{
    ArgBuffer, ExecutionMode, InteropError, InteropResult, ManagedValue, MethodId, ObjectRef,
    PropertyKey, ScriptObjectRef, ScriptValue, TypeTag, WellKnownSymbol,
};

use super::binding::{Binding, CallTarget};
use crate::interop::arg_reader::ArgReader;
use crate::interop::context::InteropContext;
use crate::interop::convert::{managed_to_script, script_to_managed};
use crate::interop::exceptions::throw_into_managed;
use crate::interop::proto_reader::{component_of, ProtoReader};
use crate::interop::scope::{HandleScope, ModeScope};
use crate::interop::shared_ref::RefKind;

/// Execute a bridge method; errors come back as managed exception objects
pub fn call_script(
    ctx: &InteropContext,
    method: MethodId,
    args: &ArgBuffer,
) -> Result<ManagedValue, ObjectRef> {
    let _native = ModeScope::enter(ctx.managed(), ExecutionMode::Native);
    run(ctx, method, args).map_err(|err| throw_into_managed(ctx, err))
}

fn binding(ctx: &InteropContext, method: MethodId) -> InteropResult<Arc<Binding>> {
    if let Some(binding) = ctx.bindings().get(method) {
        return Ok(binding);
    }
    let info = ctx.managed().method_info(method)?;
    ctx.bindings().bind_class(ctx, info.declaring)?;
    ctx.bindings().get(method).ok_or_else(|| {
        InteropError::resolution(format!("{} is not a bridge method", info.name))
    })
}

fn run(ctx: &InteropContext, method: MethodId, buf: &ArgBuffer) -> InteropResult<ManagedValue> {
    let binding = binding(ctx, method)?;
    let info = &binding.method;
    let managed = ctx.managed();
    log::trace!("{}: setup (script call)", info.name);

    let scope = HandleScope::open(managed);
    let mut reader = ArgReader::new(buf);
    let mut proto = ProtoReader::new(managed, &info.descriptor);
    let ret = proto.expect_tag()?;
    let receiver = if info.is_static {
        None
    } else {
        Some(scope.root(reader.receiver()?))
    };

    log::trace!("{}: convert args", info.name);
    let mut args = Vec::with_capacity(info.descriptor_params());
    for _ in 0..info.param_count {
        let tag = proto.expect_tag()?;
        let value = reader.read(tag)?;
        args.push(managed_to_script(ctx, value, tag)?);
    }
    if info.has_rest {
        log::trace!("{}: convert rest param", info.name);
        let tag = proto.expect_tag()?;
        if let Some(array) = reader.read(tag)?.as_object() {
            let component = component_of(managed, tag)?;
            for i in 0..managed.array_len(array)? {
                args.push(managed_to_script(ctx, managed.array_get(array, i)?, component)?);
            }
        }
    }

    let this = match receiver {
        Some(slot) => {
            let obj = scope
                .get(slot)
                .ok_or_else(|| InteropError::identity("receiver lost its handle-scope root"))?;
            Some(script_receiver(ctx, obj)?)
        }
        None => None,
    };

    log::trace!("{}: invoke {:?}", info.name, binding.target);
    let result = dispatch(ctx, &binding.target, this, &args)?;

    log::trace!("{}: convert result", info.name);
    if ret == TypeTag::Void {
        return Ok(ManagedValue::Void);
    }
    script_to_managed(ctx, &result, ret)
}

/// Script object standing behind a managed receiver
fn script_receiver(ctx: &InteropContext, obj: ObjectRef) -> InteropResult<ScriptObjectRef> {
    let id = ctx
        .refs()
        .find_by_managed(obj)
        .ok_or_else(|| InteropError::identity("receiver is not linked to a script object"))?;
    Ok(ctx
        .refs()
        .require(id, RefKind::has_script_state, "call into script")?
        .script)
}

fn script_err(value: ScriptValue) -> InteropError {
    InteropError::ScriptException(value)
}

fn property(ctx: &InteropContext, holder: &ScriptValue, segment: &str) -> InteropResult<ScriptValue> {
    let obj = holder.as_object().ok_or_else(|| {
        InteropError::resolution(format!("cannot read '{}' of {}", segment, holder.kind_name()))
    })?;
    let value = ctx
        .script()
        .get(obj, &PropertyKey::name(segment))
        .map_err(script_err)?;
    if value.is_undefined() {
        return Err(InteropError::resolution(format!("'{}' is not defined", segment)));
    }
    Ok(value)
}

/// Walk a dotted name from `base`, returning the final holder and the function
fn walk(
    ctx: &InteropContext,
    base: ScriptValue,
    path: &[Arc<str>],
) -> InteropResult<(ScriptValue, ScriptValue)> {
    let (last, parents) = path
        .split_last()
        .ok_or_else(|| InteropError::resolution("empty qualified name"))?;
    let mut holder = base;
    for segment in parents {
        holder = property(ctx, &holder, segment)?;
    }
    let function = property(ctx, &holder, last)?;
    if !ctx.script().is_callable(&function) {
        return Err(InteropError::resolution(format!(
            "'{}' is not a function",
            path.join(".")
        )));
    }
    Ok((holder, function))
}

fn index_key(value: &ScriptValue) -> InteropResult<PropertyKey> {
    PropertyKey::from_value(value)
        .ok_or_else(|| InteropError::type_mismatch("property key", value.kind_name()))
}

fn dispatch(
    ctx: &InteropContext,
    target: &CallTarget,
    this: Option<ScriptObjectRef>,
    args: &[ScriptValue],
) -> InteropResult<ScriptValue> {
    let script = ctx.script();
    let receiver = || this.ok_or_else(|| InteropError::identity("script call needs a receiver"));
    let arg = |i: usize| args.get(i).cloned().unwrap_or(ScriptValue::Undefined);

    let result = match target {
        CallTarget::Member { name } => {
            let obj = receiver()?;
            let function = script.get(obj, &PropertyKey::name(name)).map_err(script_err)?;
            if !script.is_callable(&function) {
                return Err(InteropError::resolution(format!("'{}' is not a function", name)));
            }
            script.call(&function, &ScriptValue::Object(obj), args)
        }
        CallTarget::Callee => {
            script.call(&ScriptValue::Object(receiver()?), &ScriptValue::Undefined, args)
        }
        CallTarget::ByValue => script.call(&arg(0), &arg(1), args.get(2..).unwrap_or(&[])),
        CallTarget::Qualified { path } => {
            let (holder, function) = walk(ctx, arg(0), path)?;
            script.call(&function, &holder, args.get(1..).unwrap_or(&[]))
        }
        CallTarget::Namespaced { module, path } => {
            let base = match module {
                Some(module) => script.load_module(module).map_err(script_err)?,
                None => ScriptValue::Object(script.global()),
            };
            let (holder, function) = walk(ctx, base, path)?;
            script.call(&function, &holder, args)
        }
        CallTarget::IndexGet => script.get(receiver()?, &index_key(&arg(0))?),
        CallTarget::IndexSet => script
            .set(receiver()?, &index_key(&arg(0))?, arg(1))
            .map(|()| ScriptValue::Undefined),
        CallTarget::Iterator => {
            let obj = receiver()?;
            let function = script
                .get(obj, &PropertyKey::Symbol(WellKnownSymbol::Iterator))
                .map_err(script_err)?;
            script.call(&function, &ScriptValue::Object(obj), &[])
        }
        CallTarget::Getter { name } => script.get(receiver()?, &PropertyKey::name(name)),
        CallTarget::Setter { name } => script
            .set(receiver()?, &PropertyKey::name(name), arg(0))
            .map(|()| ScriptValue::Undefined),
    };
    result.map_err(script_err)
}
