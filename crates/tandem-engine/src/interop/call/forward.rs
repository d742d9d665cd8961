//! Script-to-managed calls
//!
//! One call walks `SETUP -> SKIP-RETURN-TAG -> CONVERT-ARGS -> [REST] ->
//! INVOKE -> CHECK-EXCEPTION -> CONVERT-RESULT`. Any failure leaves the
//! state machine with an error and nothing is invoked after it.

use tandem_sdk::{
    ExecutionMode, InteropError, InteropResult, LocalSlot, ManagedValue, MethodInfo, ObjectRef,
    ScriptValue, TypeTag,
};

use crate::interop::context::InteropContext;
use crate::interop::convert::{managed_to_script, script_to_managed};
use crate::interop::proto_reader::{component_of, managed_name, ProtoReader};
use crate::interop::scope::{HandleScope, ModeScope};
use crate::interop::shared_ref::RefKind;

/// A converted argument waiting for the invocation
///
/// References stay rooted in the call's handle scope and are read back
/// right before the invocation.
#[derive(Debug, Clone, Copy)]
enum Staged {
    Value(ManagedValue),
    Rooted(LocalSlot),
}

impl Staged {
    fn stage(scope: &HandleScope<'_>, value: ManagedValue) -> Self {
        match value.as_object() {
            Some(obj) => Staged::Rooted(scope.root(obj)),
            None => Staged::Value(value),
        }
    }

    fn load(self, scope: &HandleScope<'_>) -> InteropResult<ManagedValue> {
        match self {
            Staged::Value(value) => Ok(value),
            Staged::Rooted(slot) => rooted(scope, slot).map(ManagedValue::object),
        }
    }
}

fn rooted(scope: &HandleScope<'_>, slot: LocalSlot) -> InteropResult<ObjectRef> {
    scope
        .get(slot)
        .ok_or_else(|| InteropError::identity("argument lost its handle-scope root"))
}

/// Pack the variadic tail into a fresh array of the rest parameter's type
fn pack_rest(
    ctx: &InteropContext,
    scope: &HandleScope<'_>,
    tag: TypeTag,
    rest: &[ScriptValue],
) -> InteropResult<LocalSlot> {
    let managed = ctx.managed();
    let TypeTag::Ref(class) = tag else {
        return Err(InteropError::type_mismatch("array type", managed_name(managed, tag)));
    };
    let component = component_of(managed, tag)?;
    let slot = scope.root(managed.alloc_array(class, rest.len())?);
    for (i, value) in rest.iter().enumerate() {
        let element = script_to_managed(ctx, value, component)?;
        managed.array_set(rooted(scope, slot)?, i, element)?;
    }
    Ok(slot)
}

/// Call `method` with script arguments
///
/// Fewer arguments than mandatory parameters fail before anything is
/// converted. Missing optional arguments get the parameter type's default;
/// arguments past the fixed parameters of a method without a rest
/// parameter are ignored.
pub fn call_managed(
    ctx: &InteropContext,
    method: &MethodInfo,
    receiver: Option<ObjectRef>,
    args: &[ScriptValue],
) -> InteropResult<ScriptValue> {
    log::trace!("{}: setup ({} args)", method.name, args.len());
    if args.len() < method.mandatory {
        return Err(InteropError::ArgumentCount {
            expected: method.mandatory,
            got: args.len(),
        });
    }
    let managed = ctx.managed();
    let scope = HandleScope::open(managed);
    let receiver = receiver.map(|obj| scope.root(obj));

    let mut proto = ProtoReader::new(managed, &method.descriptor);
    proto.expect_tag()?;

    log::trace!("{}: convert args", method.name);
    let mut staged = Vec::with_capacity(method.descriptor_params());
    for i in 0..method.param_count {
        let tag = proto.expect_tag()?;
        let value = match args.get(i) {
            Some(arg) => script_to_managed(ctx, arg, tag)?,
            None => tag.default_value(),
        };
        staged.push(Staged::stage(&scope, value));
    }
    if method.has_rest {
        log::trace!("{}: convert rest param", method.name);
        let tag = proto.expect_tag()?;
        let tail = args.get(method.param_count..).unwrap_or(&[]);
        staged.push(Staged::Rooted(pack_rest(ctx, &scope, tag, tail)?));
    }

    let receiver = receiver.map(|slot| rooted(&scope, slot)).transpose()?;
    let values = staged
        .into_iter()
        .map(|s| s.load(&scope))
        .collect::<InteropResult<Vec<_>>>()?;

    log::trace!("{}: invoke", method.name);
    let outcome = {
        let _managed_mode = ModeScope::enter(managed, ExecutionMode::Managed);
        managed.invoke(method.id, receiver, &values)
    };

    log::trace!("{}: check exception", method.name);
    let result = outcome.map_err(InteropError::ManagedException)?;

    log::trace!("{}: convert result", method.name);
    let ret = proto.return_tag()?;
    if ret == TypeTag::Void {
        return Ok(ScriptValue::Undefined);
    }
    // keep the result reachable while its conversion allocates
    let _result_root = result.as_object().map(|obj| scope.root(obj));
    managed_to_script(ctx, result, ret)
}

/// Call an instance method on the managed object behind `this`
pub fn call_instance(
    ctx: &InteropContext,
    method: &MethodInfo,
    this: &ScriptValue,
    args: &[ScriptValue],
) -> InteropResult<ScriptValue> {
    let managed = ctx.managed();
    let declaring = TypeTag::Ref(method.declaring);
    let id = ctx.refs().find_by_value(this).ok_or_else(|| {
        InteropError::type_mismatch(managed_name(managed, declaring), ctx.script().type_of(this))
    })?;
    let view = ctx.refs().require(id, RefKind::has_managed_state, "instance call")?;
    let class = managed.class_of(view.managed)?;
    if !managed.is_assignable(class, method.declaring) {
        return Err(InteropError::type_mismatch(
            managed_name(managed, declaring),
            managed_name(managed, TypeTag::Ref(class)),
        ));
    }
    call_managed(ctx, method, Some(view.managed), args)
}

/// Call a static method
pub fn call_static(
    ctx: &InteropContext,
    method: &MethodInfo,
    args: &[ScriptValue],
) -> InteropResult<ScriptValue> {
    call_managed(ctx, method, None, args)
}
