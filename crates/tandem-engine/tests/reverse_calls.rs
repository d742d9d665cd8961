//! Integration tests for calls from managed code into script code
//!
//! Bridge methods resolve their target by qualified name (in a module or on
//! the global object), by value, or through a script object standing behind
//! a managed proxy. Exceptions cross back with their identity intact.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p tandem-engine --test reverse_calls
//! ```

mod common;

use common::*;
use tandem_sdk::{
    ManagedRuntime, ManagedValue, ObjectRef, PrimitiveKind, ScriptErrorKind, ScriptRuntime,
    ScriptValue, TypeTag,
};

/// Register module `lib` with `math.add`, `sum` and `fail`; returns the
/// module object and the error `fail` throws
fn install_lib(h: &Harness) -> (ScriptValue, ScriptValue) {
    let add = h.function("add", |_, call| {
        let a = call.arg(0).as_number().unwrap_or(f64::NAN);
        let b = call.arg(1).as_number().unwrap_or(f64::NAN);
        Ok(num(a + b))
    });
    let sum = h.function("sum", |_, call| {
        Ok(num(call.args.iter().filter_map(ScriptValue::as_number).sum()))
    });
    let error = ScriptValue::Object(h.engine.new_error(ScriptErrorKind::Error, "script failure"));
    let thrown = error.clone();
    let fail = h.function("fail", move |_, _| Err(thrown.clone()));

    let math = h.object(&[("add", add)]);
    let lib = h.object(&[("math", math), ("sum", sum), ("fail", fail)]);
    h.engine.register_module("lib", lib.clone());
    (lib, error)
}

fn read_text(h: &Harness, value: ManagedValue) -> String {
    h.vm.read_string(value.as_object().unwrap()).unwrap().to_string()
}

fn exception_message(h: &Harness, exc: ObjectRef) -> String {
    read_text(h, read(&*h.vm, exc, "message"))
}

fn class_name(h: &Harness, obj: ObjectRef) -> String {
    h.vm.class_info(h.vm.class_of(obj).unwrap()).unwrap().name.to_string()
}

// ===== Named targets =====

#[test]
fn test_module_function_called_from_managed_code() {
    let h = setup();
    install_lib(&h);
    let add = method_id(&*h.vm, SCRIPT_LIB, "add");

    let result = h.vm.invoke(add, None, &[ManagedValue::F64(1.5), ManagedValue::F64(2.0)]);
    assert_eq!(result.unwrap(), ManagedValue::F64(3.5));

    // the same bridge method is a static of the class wrapper
    assert_eq!(
        h.invoke_static(SCRIPT_LIB, "add", &[num(4.0), num(5.0)]).unwrap(),
        num(9.0)
    );
}

#[test]
fn test_global_function_called_from_managed_code() {
    let h = setup();
    let version = h.function("version", |_, _| Ok(text("1.2")));
    let host = h.object(&[("version", version)]);
    h.set(&ScriptValue::Object(h.engine.global()), "host", host).unwrap();

    let method = method_id(&*h.vm, GLOBAL_LIB, "version");
    let result = h.vm.invoke(method, None, &[]).unwrap();
    assert_eq!(read_text(&h, result), "1.2");
}

#[test]
fn test_rest_array_is_flattened() {
    let h = setup();
    install_lib(&h);
    assert_eq!(
        h.invoke_static(SCRIPT_LIB, "sum", &[num(1.0), num(2.0), num(3.0)]).unwrap(),
        num(6.0)
    );
    assert_eq!(h.invoke_static(SCRIPT_LIB, "sum", &[]).unwrap(), num(0.0));

    let class = h.vm.array_class(TypeTag::Primitive(PrimitiveKind::F64)).unwrap();
    let values = h.vm.alloc_array(class, 2).unwrap();
    h.vm.array_set(values, 0, ManagedValue::F64(0.5)).unwrap();
    h.vm.array_set(values, 1, ManagedValue::F64(0.25)).unwrap();
    let sum = method_id(&*h.vm, SCRIPT_LIB, "sum");
    let result = h.vm.invoke(sum, None, &[ManagedValue::object(values)]).unwrap();
    assert_eq!(result, ManagedValue::F64(0.75));
}

#[test]
fn test_call_by_value() {
    let h = setup();
    let scale = h.function("scale", |rt, call| {
        let this = call.this.as_object().unwrap();
        let factor = rt.get(this, &"factor".into())?.as_number().unwrap_or(0.0);
        Ok(num(factor * call.arg(0).as_number().unwrap_or(0.0)))
    });
    let receiver = h.object(&[("factor", num(3.0))]);
    let result = h
        .invoke_static(SCRIPT_LIB, "callValue", &[scale, receiver, num(2.0)])
        .unwrap();
    assert_eq!(result, num(6.0));
}

#[test]
fn test_qualified_call_on_first_argument() {
    let h = setup();
    let describe = h.function("describe", |rt, call| {
        let this = call.this.as_object().unwrap();
        let name = rt.get(this, &"name".into())?;
        Ok(text(&format!("I am {}", name.as_str().unwrap_or("?"))))
    });
    let target = h.object(&[("name", text("box")), ("describe", describe)]);
    assert_eq!(
        h.invoke_static(SCRIPT_LIB, "describe", &[target]).unwrap(),
        text("I am box")
    );

    let thrown = h
        .invoke_static(SCRIPT_LIB, "describe", &[h.object(&[])])
        .unwrap_err();
    assert_eq!(h.message(&thrown), "Resolution failure: 'describe' is not defined");
}

// ===== Resolution failures =====

#[test]
fn test_missing_function_raises_managed_type_error() {
    let h = setup();
    install_lib(&h);
    let missing = method_id(&*h.vm, SCRIPT_LIB, "missing");
    let exc = h.vm.invoke(missing, None, &[]).unwrap_err();
    assert_eq!(class_name(&h, exc), "std.core.TypeError");
    assert_eq!(exception_message(&h, exc), "Resolution failure: 'missing' is not defined");
}

#[test]
fn test_non_function_target() {
    let h = setup();
    let lib = h.object(&[("math", h.object(&[("add", num(5.0))]))]);
    h.engine.register_module("lib", lib);
    let thrown = h
        .invoke_static(SCRIPT_LIB, "add", &[num(1.0), num(2.0)])
        .unwrap_err();
    assert_eq!(h.message(&thrown), "Resolution failure: 'math.add' is not a function");
}

#[test]
fn test_missing_module_error_crosses_unchanged() {
    let h = setup();
    let add = method_id(&*h.vm, SCRIPT_LIB, "add");
    let exc = h
        .vm
        .invoke(add, None, &[ManagedValue::F64(1.0), ManagedValue::F64(2.0)])
        .unwrap_err();
    assert_eq!(class_name(&h, exc), "std.interop.ScriptError");
    assert_eq!(exception_message(&h, exc), "Cannot find module 'lib'");

    let thrown = h.invoke_static(SCRIPT_LIB, "add", &[num(1.0), num(2.0)]).unwrap_err();
    assert_eq!(h.message(&thrown), "Cannot find module 'lib'");
}

// ===== Exceptions =====

#[test]
fn test_script_exception_round_trips_by_identity() {
    let h = setup();
    let (_, error) = install_lib(&h);

    let thrown = h.invoke_static(SCRIPT_LIB, "fail", &[]).unwrap_err();
    assert_eq!(thrown, error);

    let fail = method_id(&*h.vm, SCRIPT_LIB, "fail");
    let exc = h.vm.invoke(fail, None, &[]).unwrap_err();
    assert_eq!(class_name(&h, exc), "std.interop.ScriptError");
    assert_eq!(exception_message(&h, exc), "script failure");
    let boxed = read(&*h.vm, exc, "value").as_object().unwrap();
    assert_eq!(h.ctx.unbox_value(boxed).unwrap(), error);
}

#[test]
fn test_managed_code_catches_script_exceptions() {
    let h = setup();
    let thrower = h.function("thrower", |_, _| Err(text("plain string")));
    let quiet = h.function("quiet", |_, _| Ok(ScriptValue::Undefined));

    assert_eq!(
        h.invoke_static(FAILS, "attempt", &[thrower]).unwrap(),
        text("std.interop.ScriptError")
    );
    assert_eq!(h.invoke_static(FAILS, "attempt", &[quiet]).unwrap(), ScriptValue::Null);
}

#[test]
fn test_managed_exception_keeps_identity_through_script() {
    let h = setup();
    // the static function itself serves as the thunk
    let boom = h.get(&h.constructor(FAILS), "boom");
    assert_eq!(
        h.invoke_static(FAILS, "attempt", &[boom.clone()]).unwrap(),
        text("std.core.TypeError")
    );

    let thrown = h.invoke_static(FAILS, "propagate", &[boom]).unwrap_err();
    assert_eq!(h.message(&thrown), "boom");
    let exc = h.managed_of(&thrown);
    assert_eq!(class_name(&h, exc), "std.core.TypeError");
}

#[test]
fn test_rethrown_script_value_is_the_original() {
    let h = setup();
    let marker = h.object(&[("code", num(42.0))]);
    let thrown_marker = marker.clone();
    let thrower = h.function("thrower", move |_, _| Err(thrown_marker.clone()));
    let thrown = h.invoke_static(FAILS, "propagate", &[thrower]).unwrap_err();
    assert_eq!(thrown, marker);
}

// ===== Interfaces =====

#[test]
fn test_member_proxy_calls_object_methods() {
    let h = setup();
    let greet = h.function("greet", |_, call| {
        Ok(text(&format!("hi {}", call.arg(0).as_str().unwrap_or(""))))
    });
    let greeter = h.object(&[("greet", greet)]);
    let result = h
        .invoke_static(GREETINGS, "greetAll", &[greeter.clone(), text("bob")])
        .unwrap();
    assert_eq!(result, text("hi bob"));

    let live = h.ctx.refs().live_count();
    h.invoke_static(GREETINGS, "greetAll", &[greeter.clone(), text("amy")]).unwrap();
    assert_eq!(h.ctx.refs().live_count(), live);

    let proxy = h.managed_of(&greeter);
    assert!(h.vm.is_assignable(h.vm.class_of(proxy).unwrap(), h.class(GREETER)));
}

#[test]
fn test_member_proxy_requires_the_method() {
    let h = setup();
    let thrown = h
        .invoke_static(GREETINGS, "greetAll", &[h.object(&[]), text("bob")])
        .unwrap_err();
    assert!(h.message(&thrown).contains("'greet' is not a function"));
}

#[test]
fn test_callee_proxy_calls_the_function() {
    let h = setup();
    let inc = h.function("inc", |_, call| {
        assert!(call.this.is_undefined());
        Ok(num(call.arg(0).as_number().unwrap_or(0.0) + 1.0))
    });
    assert_eq!(h.invoke_static(OPS, "applyTwice", &[inc, num(1.0)]).unwrap(), num(3.0));
}

#[test]
fn test_functional_implementation_becomes_a_function() {
    let h = setup();
    let add5 = h.invoke_static(OPS, "adder", &[num(5.0)]).unwrap();
    assert_eq!(h.engine.type_of(&add5), "function");
    assert_eq!(h.engine.call(&add5, &ScriptValue::Undefined, &[num(1.0)]).unwrap(), num(6.0));

    // back on the managed side it is the original Adder
    assert_eq!(
        h.invoke_static(OPS, "applyTwice", &[add5.clone(), num(1.0)]).unwrap(),
        num(11.0)
    );
    let adder = h.managed_of(&add5);
    assert_eq!(class_name(&h, adder), ADDER);
    assert_eq!(read(&*h.vm, adder, "n"), ManagedValue::I32(5));
}

#[test]
fn test_proxy_of_another_interface_is_a_mismatch() {
    let h = setup();
    let double = h.function("double", |_, call| Ok(num(call.arg(0).as_number().unwrap_or(0.0) * 2.0)));
    h.invoke_static(OPS, "applyTwice", &[double.clone(), num(1.0)]).unwrap();

    let thrown = h
        .invoke_static(GREETINGS, "greetAll", &[double, text("x")])
        .unwrap_err();
    assert!(h
        .message(&thrown)
        .starts_with("Type mismatch: expected demo.Greeter, got "));
}

#[test]
fn test_non_callable_is_not_a_function() {
    let h = setup();
    let thrown = h
        .invoke_static(OPS, "applyTwice", &[h.object(&[]), num(1.0)])
        .unwrap_err();
    assert_eq!(h.message(&thrown), "Type mismatch: expected function, got object");
}

// ===== Intrinsics =====

#[test]
fn test_script_runtime_intrinsics() {
    let h = setup();
    let (lib, _) = install_lib(&h);
    let rt = h.class("std.interop.ScriptRuntime");
    let global = ScriptValue::Object(h.engine.global());

    assert_eq!(h.ctx.call_static(rt, "getGlobal", &[]).unwrap(), global);
    assert_eq!(h.ctx.call_static(rt, "loadModule", &[text("lib")]).unwrap(), lib);

    let math = h.ctx.call_static(rt, "getProperty", &[lib.clone(), text("math")]).unwrap();
    assert_eq!(math, h.get(&lib, "math"));

    h.ctx
        .call_static(rt, "setProperty", &[lib.clone(), text("tag"), num(7.0)])
        .unwrap();
    assert_eq!(h.get(&lib, "tag"), num(7.0));

    let same = h.ctx.call_static(rt, "strictEqual", &[lib.clone(), lib.clone()]).unwrap();
    assert_eq!(same, ScriptValue::Bool(true));
    let different = h.ctx.call_static(rt, "strictEqual", &[lib, global]).unwrap();
    assert_eq!(different, ScriptValue::Bool(false));

    assert_eq!(h.ctx.call_static(rt, "boxNumber", &[num(2.5)]).unwrap(), num(2.5));
    assert_eq!(h.ctx.call_static(rt, "unboxString", &[text("s")]).unwrap(), text("s"));
}

#[test]
fn test_intrinsic_type_errors_reach_managed_code() {
    let h = setup();
    let rt = h.class("std.interop.ScriptRuntime");
    let err = h.ctx.call_static(rt, "unboxNumber", &[text("nope")]).unwrap_err();
    let tandem_sdk::InteropError::ManagedException(exc) = err else {
        panic!("expected a managed exception, got {:?}", err);
    };
    assert_eq!(class_name(&h, exc), "std.core.TypeError");
}
