//! Wrapper synthesis
//!
//! Reflection data is read once and turned into script objects: fields
//! become accessors, methods become functions grouped into overload sets,
//! getter/setter pairs merge into one accessor, and statics land on the
//! constructor. When the prototype chain is cut short (a builtin-shaped
//! class, or `squash_prototypes`) the ancestors' members are copied forward.

use std::sync::{Arc, Weak};

use tandem_sdk::{
    AccessorKind, BuiltinShape, CallArgs, ClassId, ClassInfo, FieldInfo, InteropError,
    InteropResult, MethodInfo, NativeFunction, ObjectRef, PropertyDescriptor, PropertyKey,
    ScriptErrorKind, ScriptObjectRef, ScriptRuntime, ScriptValue, TypeTag, Visibility,
    WellKnownClass, WellKnownSymbol, CONSTRUCTOR_NAME,
};

use super::overload::OverloadSet;
use super::{ClassWrapper, WrapperId};
use crate::interop::call::binding::{INDEX_GET, INDEX_SET, ITERATOR};
use crate::interop::call::forward;
use crate::interop::context::{upgrade, InteropContext};
use crate::interop::convert::{managed_to_script, script_to_managed};
use crate::interop::exceptions::throw_into_script;
use crate::interop::fatal;
use crate::interop::proto_reader::{managed_name, resolve_fragment};
use crate::interop::scope::HandleScope;
use crate::interop::shared_ref::RefKind;

type Groups = Vec<(Arc<str>, Vec<Arc<MethodInfo>>)>;

struct Accessor {
    name: Arc<str>,
    get: Option<Arc<MethodInfo>>,
    set: Option<Arc<MethodInfo>>,
}

fn simple_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

fn group(groups: &mut Groups, method: Arc<MethodInfo>) {
    match groups.iter_mut().find(|(name, _)| *name == method.name) {
        Some((_, methods)) => methods.push(method),
        None => groups.push((method.name.clone(), vec![method])),
    }
}

/// Script `TypeError` raised for misuse of a wrapper
fn type_error(ctx: &InteropContext, message: &str) -> InteropError {
    InteropError::ScriptException(ScriptValue::Object(
        ctx.script().new_error(ScriptErrorKind::TypeError, message),
    ))
}

/// Native function running `body` against the live context
fn native<F>(weak: &Weak<InteropContext>, body: F) -> NativeFunction
where
    F: Fn(&InteropContext, &CallArgs) -> InteropResult<ScriptValue> + Send + Sync + 'static,
{
    let weak = weak.clone();
    Arc::new(move |rt: &dyn ScriptRuntime, call: &CallArgs| {
        let ctx = upgrade(&weak, rt)?;
        body(&ctx, call).map_err(|err| throw_into_script(&ctx, err))
    })
}

/// Managed object behind a script receiver
fn receiver(ctx: &InteropContext, this: &ScriptValue, class: ClassId) -> InteropResult<ObjectRef> {
    let managed = ctx.managed();
    let expected = || managed_name(managed, TypeTag::Ref(class));
    let id = ctx
        .refs()
        .find_by_value(this)
        .ok_or_else(|| InteropError::type_mismatch(expected(), ctx.script().type_of(this)))?;
    let view = ctx.refs().require(id, RefKind::has_managed_state, "member access")?;
    let actual = managed.class_of(view.managed)?;
    if !managed.is_assignable(actual, class) {
        return Err(InteropError::type_mismatch(
            expected(),
            managed_name(managed, TypeTag::Ref(actual)),
        ));
    }
    Ok(view.managed)
}

fn invoke_set(
    ctx: &InteropContext,
    set: &OverloadSet,
    this: Option<&ScriptValue>,
    args: &[ScriptValue],
) -> InteropResult<ScriptValue> {
    let method = set.resolve(args.len())?.info(ctx.managed())?.clone();
    match this {
        Some(this) => forward::call_instance(ctx, &method, this, args),
        None => forward::call_static(ctx, &method, args),
    }
}

fn method_function(ctx: &InteropContext, set: Arc<OverloadSet>, is_static: bool) -> ScriptValue {
    let name = set.name().clone();
    let body = native(&ctx.weak(), move |ctx, call| {
        invoke_set(ctx, &set, (!is_static).then_some(&call.this), &call.args)
    });
    ScriptValue::Object(ctx.script().new_function(&name, body))
}

fn field_accessor(ctx: &InteropContext, field: &FieldInfo, tag: TypeTag) -> PropertyDescriptor {
    let script = ctx.script();
    let (id, declaring, is_static) = (field.id, field.declaring, field.is_static);
    let get = native(&ctx.weak(), move |ctx, call| {
        let obj = if is_static {
            None
        } else {
            Some(receiver(ctx, &call.this, declaring)?)
        };
        managed_to_script(ctx, ctx.managed().get_field(obj, id)?, tag)
    });
    let set = native(&ctx.weak(), move |ctx, call| {
        let value = script_to_managed(ctx, &call.arg(0), tag)?;
        let obj = if is_static {
            None
        } else {
            Some(receiver(ctx, &call.this, declaring)?)
        };
        ctx.managed().set_field(obj, id, value)?;
        Ok(ScriptValue::Undefined)
    });
    PropertyDescriptor::accessor(
        Some(ScriptValue::Object(script.new_function(&field.name, get))),
        Some(ScriptValue::Object(script.new_function(&field.name, set))),
    )
}

fn merged_accessor(ctx: &InteropContext, accessor: &Accessor) -> PropertyDescriptor {
    let script = ctx.script();
    let get = accessor.get.clone().map(|method| {
        let body = native(&ctx.weak(), move |ctx, call| {
            forward::call_instance(ctx, &method, &call.this, &[])
        });
        ScriptValue::Object(script.new_function(&accessor.name, body))
    });
    let set = accessor.set.clone().map(|method| {
        let body = native(&ctx.weak(), move |ctx, call| {
            forward::call_instance(ctx, &method, &call.this, &[call.arg(0)])?;
            Ok(ScriptValue::Undefined)
        });
        ScriptValue::Object(script.new_function(&accessor.name, body))
    });
    PropertyDescriptor::accessor(get, set)
}

fn define(ctx: &InteropContext, obj: ScriptObjectRef, key: PropertyKey, desc: PropertyDescriptor) -> InteropResult<()> {
    ctx.script()
        .define_property(obj, key, desc)
        .map_err(InteropError::ScriptException)
}

/// Copy own properties of `from` that `to` lacks
fn copy_missing(
    ctx: &InteropContext,
    from: ScriptObjectRef,
    to: ScriptObjectRef,
    skip: &[&str],
) -> InteropResult<()> {
    let script = ctx.script();
    for key in script.own_keys(from) {
        if matches!(&key, PropertyKey::Name(name) if skip.contains(&&**name)) {
            continue;
        }
        if script.own_property(to, &key).is_some() {
            continue;
        }
        if let Some(desc) = script.own_property(from, &key) {
            define(ctx, to, key, desc)?;
        }
    }
    Ok(())
}

// ============================================================================
// Constructor and shaped instances
// ============================================================================

fn construct(ctx: &InteropContext, class: ClassId, call: &CallArgs) -> InteropResult<ScriptValue> {
    let wrapper = ctx.wrapper(class)?;
    let name = &wrapper.info.name;
    if !call.is_construct() {
        return Err(type_error(
            ctx,
            &format!("Class constructor {} cannot be invoked without 'new'", name),
        ));
    }
    if wrapper.info.is_abstract {
        return Err(type_error(ctx, &format!("Cannot instantiate abstract class {}", name)));
    }
    let method = wrapper.ctor.resolve(call.len())?.info(ctx.managed())?.clone();

    let managed = ctx.managed();
    let scope = HandleScope::open(managed);
    let slot = scope.root(managed.alloc_object(class)?);
    let obj = scope
        .get(slot)
        .ok_or_else(|| InteropError::identity("new object lost its handle-scope root"))?;
    forward::call_managed(ctx, &method, Some(obj), &call.args)?;
    let instance = wrapper.instantiate(ctx, &scope, slot, call.this.as_object())?;
    Ok(ScriptValue::Object(instance))
}

/// Function object for an instance of a `Function`-shaped class
pub(super) fn callable_instance(
    ctx: &InteropContext,
    wrapper: &ClassWrapper,
) -> InteropResult<ScriptObjectRef> {
    let set = wrapper.method("invoke").cloned().ok_or_else(|| {
        InteropError::resolution(format!(
            "{} resembles Function but has no invoke method",
            wrapper.info.name
        ))
    })?;
    let body = native(&ctx.weak(), move |ctx, call| {
        invoke_set(ctx, &set, Some(&ScriptValue::Object(call.callee)), &call.args)
    });
    Ok(ctx
        .script()
        .new_function(simple_name(&wrapper.info.name), body))
}

/// Proxy handler whose traps send index keys to `$_get` / `$_set`
fn index_handler(
    ctx: &InteropContext,
    get: Option<Arc<OverloadSet>>,
    set: Option<Arc<OverloadSet>>,
) -> InteropResult<ScriptObjectRef> {
    let script = ctx.script();
    let handler = script.new_object();

    let get_trap = native(&ctx.weak(), move |ctx, call| {
        let target = trap_target(&call.arg(0))?;
        let (key_value, receiver) = (call.arg(1), call.arg(2));
        match (PropertyKey::from_value(&key_value), &get) {
            (Some(PropertyKey::Index(_)), Some(get)) => {
                invoke_set(ctx, get, Some(&receiver), &[key_value])
            }
            (Some(key), _) => ctx
                .script()
                .get_with_receiver(target, &key, &receiver)
                .map_err(InteropError::ScriptException),
            (None, _) => Ok(ScriptValue::Undefined),
        }
    });
    let set_trap = native(&ctx.weak(), move |ctx, call| {
        let target = trap_target(&call.arg(0))?;
        let (key_value, value, receiver) = (call.arg(1), call.arg(2), call.arg(3));
        match (PropertyKey::from_value(&key_value), &set) {
            (Some(PropertyKey::Index(_)), Some(set)) => {
                invoke_set(ctx, set, Some(&receiver), &[key_value, value])?;
            }
            (Some(key), _) => ctx
                .script()
                .set_with_receiver(target, &key, value, &receiver)
                .map_err(InteropError::ScriptException)?,
            (None, _) => {}
        }
        Ok(ScriptValue::Bool(true))
    });

    define(ctx, handler, PropertyKey::name("get"), PropertyDescriptor::hidden(ScriptValue::Object(script.new_function("get", get_trap))))?;
    define(ctx, handler, PropertyKey::name("set"), PropertyDescriptor::hidden(ScriptValue::Object(script.new_function("set", set_trap))))?;
    Ok(handler)
}

fn trap_target(value: &ScriptValue) -> InteropResult<ScriptObjectRef> {
    value
        .as_object()
        .ok_or_else(|| InteropError::type_mismatch("proxy target", value.kind_name()))
}

// ============================================================================
// Build
// ============================================================================

/// Build the wrapper of `info`'s class on top of its base wrapper
pub fn build(
    ctx: &InteropContext,
    info: Arc<ClassInfo>,
    base: Option<Arc<ClassWrapper>>,
) -> InteropResult<ClassWrapper> {
    let managed = ctx.managed();
    let script = ctx.script();
    let options = ctx.options();
    let class = info.id;

    let shape = info.builtin_shape.or_else(|| base.as_ref().and_then(|b| b.shape));
    let flattened = base.is_some() && (options.squash_prototypes || shape.is_some());

    // partition the reflection data
    let mut ctors = Vec::new();
    let mut instance = Groups::new();
    let mut statics = Groups::new();
    let mut accessors: Vec<Accessor> = Vec::new();
    for method in managed.class_methods(class)? {
        if method.visibility == Visibility::Private {
            continue;
        }
        if method.is_constructor {
            ctors.push(method);
            continue;
        }
        match (method.accessor, method.is_static) {
            (Some(kind), false) => {
                let pos = match accessors.iter().position(|a| a.name == method.name) {
                    Some(pos) => pos,
                    None => {
                        accessors.push(Accessor {
                            name: method.name.clone(),
                            get: None,
                            set: None,
                        });
                        accessors.len() - 1
                    }
                };
                let slot = match kind {
                    AccessorKind::Getter => &mut accessors[pos].get,
                    AccessorKind::Setter => &mut accessors[pos].set,
                };
                *slot = Some(method);
            }
            (_, true) => group(&mut statics, method),
            (_, false) => group(&mut instance, method),
        }
    }
    let fields: Vec<Arc<FieldInfo>> = managed
        .class_fields(class)?
        .into_iter()
        .filter(|f| f.visibility == Visibility::Public)
        .collect();

    if class == managed.well_known(WellKnownClass::Object) && ctors.len() != 1 {
        fatal(&format!(
            "{} must declare exactly one constructor, found {}",
            info.name,
            ctors.len()
        ));
    }

    let preferred = |name: &str| options.preferred(&info.name, name);
    // constructors are not inherited once the class declares its own
    let inherited_ctor = if ctors.is_empty() {
        base.as_ref().map(|b| b.ctor.clone())
    } else {
        None
    };
    let ctor = Arc::new(OverloadSet::build(
        &info.name,
        Arc::from(CONSTRUCTOR_NAME),
        &ctors,
        preferred(CONSTRUCTOR_NAME),
        inherited_ctor,
    ));
    let methods = instance
        .into_iter()
        .map(|(name, group)| {
            let inherited = base.as_ref().and_then(|b| b.method(&name).cloned());
            let set = OverloadSet::build(&info.name, name.clone(), &group, preferred(&*name), inherited);
            (name, Arc::new(set))
        })
        .collect::<rustc_hash::FxHashMap<_, _>>();
    let static_methods = statics
        .into_iter()
        .map(|(name, group)| {
            let set = OverloadSet::build(&info.name, name.clone(), &group, preferred(&*name), None);
            (name, Arc::new(set))
        })
        .collect::<rustc_hash::FxHashMap<_, _>>();

    let lookup = |name: &str| {
        methods
            .get(name)
            .cloned()
            .or_else(|| base.as_ref().and_then(|b| b.method(name).cloned()))
    };
    let (index_get, index_set) = (lookup(INDEX_GET), lookup(INDEX_SET));

    // script objects
    let parent = match (&base, flattened) {
        (Some(base), false) => base.prototype,
        _ => script.builtin_prototype(shape.unwrap_or(BuiltinShape::Object)),
    };
    let prototype = script.new_object_with_proto(Some(parent));
    let constructor = script.new_function(
        simple_name(&info.name),
        native(&ctx.weak(), move |ctx, call| construct(ctx, class, call)),
    );
    define(
        ctx,
        constructor,
        PropertyKey::name("prototype"),
        PropertyDescriptor::Data {
            value: ScriptValue::Object(prototype),
            writable: false,
            enumerable: false,
        },
    )?;
    define(ctx, prototype, PropertyKey::name("constructor"), PropertyDescriptor::hidden(ScriptValue::Object(constructor)))?;
    if let (Some(base), false) = (&base, flattened) {
        script.set_prototype(constructor, Some(base.constructor));
    }

    for field in &fields {
        let tag = resolve_fragment(managed, &field.descriptor)?;
        let holder = if field.is_static { constructor } else { prototype };
        define(ctx, holder, PropertyKey::name(&field.name), field_accessor(ctx, field, tag))?;
    }
    for (name, set) in &methods {
        let key = match &**name {
            ITERATOR => PropertyKey::Symbol(WellKnownSymbol::Iterator),
            INDEX_GET | INDEX_SET => continue,
            _ => PropertyKey::name(name),
        };
        define(ctx, prototype, key, PropertyDescriptor::hidden(method_function(ctx, set.clone(), false)))?;
    }
    for accessor in &accessors {
        define(ctx, prototype, PropertyKey::name(&accessor.name), merged_accessor(ctx, accessor))?;
    }
    for (name, set) in &static_methods {
        define(ctx, constructor, PropertyKey::name(name), PropertyDescriptor::hidden(method_function(ctx, set.clone(), true)))?;
    }

    if flattened {
        let mut ancestor = base.as_deref();
        while let Some(wrapper) = ancestor {
            copy_missing(ctx, wrapper.prototype, prototype, &["constructor"])?;
            copy_missing(ctx, wrapper.constructor, constructor, &["prototype", "name", "length"])?;
            ancestor = wrapper.base.as_deref();
        }
    }

    let index_handler = if index_get.is_some() || index_set.is_some() {
        Some(index_handler(ctx, index_get, index_set)?)
    } else {
        None
    };

    let mut handles = vec![
        script.create_persistent(ScriptValue::Object(constructor)),
        script.create_persistent(ScriptValue::Object(prototype)),
    ];
    if let Some(handler) = index_handler {
        handles.push(script.create_persistent(ScriptValue::Object(handler)));
    }

    log::debug!(
        "wrapper {}: {} fields, {} methods, {} accessors, {} statics, shape {:?}{}{}",
        info.name,
        fields.len(),
        methods.len(),
        accessors.len(),
        static_methods.len(),
        shape,
        if flattened { ", flattened" } else { "" },
        if index_handler.is_some() { ", indexer" } else { "" },
    );

    Ok(ClassWrapper {
        id: WrapperId(0),
        class,
        base,
        constructor,
        prototype,
        handles,
        shape,
        flattened,
        index_handler,
        ctor,
        methods,
        statics: static_methods,
        field_names: fields.iter().filter(|f| !f.is_static).map(|f| f.name.clone()).collect(),
        info,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_name() {
        assert_eq!(simple_name("demo.geometry.Point"), "Point");
        assert_eq!(simple_name("Point"), "Point");
    }
}
