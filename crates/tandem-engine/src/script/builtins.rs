//! Realm setup
//!
//! Builds the intrinsic prototypes and global constructors the bridge relies
//! on: `Object`, `Function`, `Array` (with `push` and `@@iterator`), `Error`,
//! `TypeError` and `Map`.

use std::sync::Arc;

use tandem_sdk::{
    CallArgs, NativeFunction, PropertyDescriptor, PropertyKey, ScriptErrorKind, ScriptObjectRef, ScriptRuntime, ScriptValue,
    WellKnownSymbol,
};

use super::object::{ObjectHeap, ObjectKind, ScriptObject};

const ITER_TARGET: &str = "__target";
const ITER_INDEX: &str = "__index";

/// Intrinsic objects of one realm
#[derive(Debug, Clone, Copy)]
pub(crate) struct Realm {
    pub object_proto: ScriptObjectRef,
    pub function_proto: ScriptObjectRef,
    pub array_proto: ScriptObjectRef,
    pub error_proto: ScriptObjectRef,
    pub type_error_proto: ScriptObjectRef,
    pub map_proto: ScriptObjectRef,
    pub array_iterator_proto: ScriptObjectRef,
    pub global: ScriptObjectRef,
}

impl Realm {
    pub(crate) fn roots(&self) -> [ScriptObjectRef; 8] {
        [
            self.object_proto,
            self.function_proto,
            self.array_proto,
            self.error_proto,
            self.type_error_proto,
            self.map_proto,
            self.array_iterator_proto,
            self.global,
        ]
    }
}

fn hidden(heap: &mut ObjectHeap, obj: ScriptObjectRef, name: &str, value: ScriptValue) {
    if let Some(object) = heap.get_mut(obj) {
        object.define(PropertyKey::name(name), PropertyDescriptor::hidden(value));
    }
}

/// Allocate a function object with `name` and a fresh `prototype`
pub(crate) fn function(heap: &mut ObjectHeap, realm: &Realm, name: &str, f: NativeFunction) -> ScriptObjectRef {
    let func = heap.alloc(ScriptObject::new(ObjectKind::Function(f), Some(realm.function_proto)));
    let proto = heap.alloc(ScriptObject::new(ObjectKind::Ordinary, Some(realm.object_proto)));
    hidden(heap, proto, "constructor", ScriptValue::Object(func));
    hidden(heap, func, "name", ScriptValue::from(name));
    hidden(heap, func, "prototype", ScriptValue::Object(proto));
    func
}

/// Allocate a constructor whose `prototype` is an existing intrinsic
fn constructor(
    heap: &mut ObjectHeap,
    realm: &Realm,
    name: &str,
    proto: ScriptObjectRef,
    f: NativeFunction,
) -> ScriptObjectRef {
    let func = function(heap, realm, name, f);
    hidden(heap, func, "prototype", ScriptValue::Object(proto));
    hidden(heap, proto, "constructor", ScriptValue::Object(func));
    hidden(heap, realm.global, name, ScriptValue::Object(func));
    func
}

fn method(heap: &mut ObjectHeap, realm: &Realm, target: ScriptObjectRef, key: PropertyKey, f: NativeFunction) {
    let name = key.to_string();
    let func = function(heap, realm, &name, f);
    if let Some(object) = heap.get_mut(target) {
        object.define(key, PropertyDescriptor::hidden(ScriptValue::Object(func)));
    }
}

fn error_constructor(kind: ScriptErrorKind) -> NativeFunction {
    Arc::new(move |rt: &dyn ScriptRuntime, args: &CallArgs| {
        let message = match args.arg(0) {
            ScriptValue::Undefined => String::new(),
            ScriptValue::String(s) => s.to_string(),
            ScriptValue::Number(n) => n.to_string(),
            ScriptValue::Bool(b) => b.to_string(),
            other => other.kind_name().to_string(),
        };
        Ok(ScriptValue::Object(rt.new_error(kind, &message)))
    })
}

/// Build the intrinsics into `heap`
pub(crate) fn create_realm(heap: &mut ObjectHeap) -> Realm {
    let object_proto = heap.alloc(ScriptObject::new(ObjectKind::Ordinary, None));
    let proto = |heap: &mut ObjectHeap, parent: ScriptObjectRef| {
        heap.alloc(ScriptObject::new(ObjectKind::Ordinary, Some(parent)))
    };
    let function_proto = proto(heap, object_proto);
    let array_proto = proto(heap, object_proto);
    let error_proto = proto(heap, object_proto);
    let type_error_proto = proto(heap, error_proto);
    let map_proto = proto(heap, object_proto);
    let array_iterator_proto = proto(heap, object_proto);
    let global = proto(heap, object_proto);
    let realm = Realm {
        object_proto,
        function_proto,
        array_proto,
        error_proto,
        type_error_proto,
        map_proto,
        array_iterator_proto,
        global,
    };

    hidden(heap, global, "globalThis", ScriptValue::Object(global));
    hidden(heap, error_proto, "name", ScriptValue::from("Error"));
    hidden(heap, error_proto, "message", ScriptValue::from(""));
    hidden(heap, type_error_proto, "name", ScriptValue::from("TypeError"));

    constructor(
        heap,
        &realm,
        "Object",
        object_proto,
        Arc::new(|rt: &dyn ScriptRuntime, args: &CallArgs| match args.arg(0) {
            value @ ScriptValue::Object(_) => Ok(value),
            _ => Ok(ScriptValue::Object(rt.new_object())),
        }),
    );
    constructor(
        heap,
        &realm,
        "Function",
        function_proto,
        Arc::new(|rt: &dyn ScriptRuntime, _: &CallArgs| Err(ScriptValue::Object(rt.new_error(ScriptErrorKind::Error, "dynamic functions are not supported")))),
    );
    constructor(
        heap,
        &realm,
        "Array",
        array_proto,
        Arc::new(|rt: &dyn ScriptRuntime, args: &CallArgs| Ok(ScriptValue::Object(rt.new_array(&args.args)))),
    );
    constructor(heap, &realm, "Error", error_proto, error_constructor(ScriptErrorKind::Error));
    constructor(
        heap,
        &realm,
        "TypeError",
        type_error_proto,
        error_constructor(ScriptErrorKind::TypeError),
    );
    constructor(heap, &realm, "Map", map_proto, Arc::new(|_: &dyn ScriptRuntime, args: &CallArgs| Ok(args.this.clone())));

    method(
        heap,
        &realm,
        array_proto,
        PropertyKey::name("push"),
        Arc::new(|rt: &dyn ScriptRuntime, args: &CallArgs| {
            let Some(arr) = args.this.as_object() else {
                return Err(ScriptValue::Object(rt.new_error(ScriptErrorKind::TypeError, "push called on non-object")));
            };
            let mut len = rt.array_len(arr).unwrap_or(0) as u32;
            for value in &args.args {
                rt.set(arr, &PropertyKey::Index(len), value.clone())?;
                len += 1;
            }
            Ok(ScriptValue::Number(len as f64))
        }),
    );
    method(
        heap,
        &realm,
        array_proto,
        PropertyKey::Symbol(WellKnownSymbol::Iterator),
        Arc::new(move |rt: &dyn ScriptRuntime, args: &CallArgs| {
            let iter = rt.new_object_with_proto(Some(array_iterator_proto));
            rt.define_property(iter, PropertyKey::name(ITER_TARGET), PropertyDescriptor::hidden(args.this.clone()))?;
            rt.define_property(
                iter,
                PropertyKey::name(ITER_INDEX),
                PropertyDescriptor::hidden(ScriptValue::Number(0.0)),
            )?;
            Ok(ScriptValue::Object(iter))
        }),
    );
    method(
        heap,
        &realm,
        array_iterator_proto,
        PropertyKey::name("next"),
        Arc::new(|rt: &dyn ScriptRuntime, args: &CallArgs| {
            let Some(iter) = args.this.as_object() else {
                return Err(ScriptValue::Object(rt.new_error(ScriptErrorKind::TypeError, "next called on non-object")));
            };
            let target = rt.get(iter, &PropertyKey::name(ITER_TARGET))?;
            let index = rt.get(iter, &PropertyKey::name(ITER_INDEX))?.as_number().unwrap_or(0.0) as u32;
            let len = match target.as_object() {
                Some(arr) => rt.get(arr, &PropertyKey::name("length"))?.as_number().unwrap_or(0.0) as u32,
                None => 0,
            };
            let result = rt.new_object();
            match target.as_object() {
                Some(arr) if index < len => {
                    let value = rt.get(arr, &PropertyKey::Index(index))?;
                    rt.define_property(
                        iter,
                        PropertyKey::name(ITER_INDEX),
                        PropertyDescriptor::hidden(ScriptValue::Number((index + 1) as f64)),
                    )?;
                    rt.set(result, &PropertyKey::name("value"), value)?;
                    rt.set(result, &PropertyKey::name("done"), ScriptValue::Bool(false))?;
                }
                _ => {
                    rt.set(result, &PropertyKey::name("value"), ScriptValue::Undefined)?;
                    rt.set(result, &PropertyKey::name("done"), ScriptValue::Bool(true))?;
                }
            }
            Ok(ScriptValue::Object(result))
        }),
    );

    realm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_has_prototype_with_constructor() {
        let mut heap = ObjectHeap::default();
        let realm = create_realm(&mut heap);
        let f = function(&mut heap, &realm, "f", Arc::new(|_: &dyn ScriptRuntime, _: &CallArgs| Ok(ScriptValue::Undefined)));
        let proto = match heap.get(f).unwrap().own(&"prototype".into()) {
            Some(PropertyDescriptor::Data { value, .. }) => value.as_object().unwrap(),
            other => panic!("unexpected prototype {:?}", other),
        };
        assert_eq!(
            heap.get(proto).unwrap().own(&"constructor".into()),
            Some(&PropertyDescriptor::hidden(ScriptValue::Object(f)))
        );
    }

    #[test]
    fn test_global_constructors_are_installed() {
        let mut heap = ObjectHeap::default();
        let realm = create_realm(&mut heap);
        let global = heap.get(realm.global).unwrap();
        for name in ["Object", "Array", "Error", "TypeError", "Map", "globalThis"] {
            assert!(global.own(&name.into()).is_some(), "missing {}", name);
        }
        assert_eq!(heap.get(realm.type_error_proto).unwrap().proto, Some(realm.error_proto));
    }
}
