//! Shared test harness
//!
//! Builds a managed VM, a script engine and an interop context, and defines
//! a small class library on the VM that the integration tests drive from
//! both sides.

#![allow(dead_code)]

use std::sync::Arc;

use tandem_engine::{InteropContext, InteropOptions, ManagedVm, ScriptEngine};
use tandem_sdk::{
    BuiltinShape, CallArgs, ClassDef, ClassId, ClassKind, FieldDef, ManagedRuntime, ManagedValue,
    MethodDef, MethodId, ObjectRef, PrimitiveKind, PropertyKey, ScriptResult, ScriptRuntime,
    ScriptValue, TypeTag, WellKnownClass,
};

// ===== Fixture class names =====

pub const POINT: &str = "demo.geometry.Point";
pub const POINT3: &str = "demo.geometry.Point3";
pub const INT_LIST: &str = "demo.collections.IntList";
pub const COUNTER: &str = "demo.fn.Counter";
pub const INT_OP: &str = "demo.fn.IntOp";
pub const ADDER: &str = "demo.fn.Adder";
pub const OPS: &str = "demo.fn.Ops";
pub const THUNK: &str = "demo.fn.Thunk";
pub const GREETER: &str = "demo.Greeter";
pub const GREETINGS: &str = "demo.Greetings";
pub const COLOR: &str = "demo.Color";
pub const PALETTE: &str = "demo.Palette";
pub const SIZE: &str = "demo.Size";
pub const LAYOUT: &str = "demo.Layout";
pub const NODE: &str = "demo.Node";
pub const CHAIN: &str = "demo.Chain";
pub const SCRIPT_LIB: &str = "demo.ScriptLib";
pub const GLOBAL_LIB: &str = "demo.GlobalLib";
pub const CALLS: &str = "demo.Calls";
pub const FAILS: &str = "demo.Fails";

const STRING: &str = "Lstd.core.String;";
const OBJECT: &str = "Lstd.core.Object;";
const VALUE: &str = "Lstd.interop.ScriptValue;";

// ===== Harness =====

pub struct Harness {
    pub vm: Arc<ManagedVm>,
    pub engine: Arc<ScriptEngine>,
    pub ctx: Arc<InteropContext>,
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn setup() -> Harness {
    setup_with(InteropOptions::default())
}

pub fn setup_with(options: InteropOptions) -> Harness {
    init_logging();
    let vm = ManagedVm::new();
    let engine = ScriptEngine::new();
    let ctx = InteropContext::new(vm.clone(), engine.clone(), options).expect("context setup");
    define_fixtures(&vm);
    Harness { vm, engine, ctx }
}

pub fn key(name: &str) -> PropertyKey {
    PropertyKey::name(name)
}

pub fn num(n: f64) -> ScriptValue {
    ScriptValue::Number(n)
}

pub fn text(s: &str) -> ScriptValue {
    ScriptValue::from(s)
}

impl Harness {
    pub fn class(&self, name: &str) -> ClassId {
        self.vm.class_by_name(name).expect("fixture class")
    }

    pub fn constructor(&self, name: &str) -> ScriptValue {
        ScriptValue::Object(self.ctx.class_constructor(name).expect("class constructor"))
    }

    pub fn construct(&self, name: &str, args: &[ScriptValue]) -> ScriptResult<ScriptValue> {
        self.engine.construct(&self.constructor(name), args)
    }

    pub fn try_get(&self, target: &ScriptValue, name: &str) -> ScriptResult<ScriptValue> {
        let obj = target.as_object().expect("property read on a non-object");
        self.engine.get(obj, &key(name))
    }

    pub fn get(&self, target: &ScriptValue, name: &str) -> ScriptValue {
        self.try_get(target, name).expect("property read")
    }

    pub fn set(&self, target: &ScriptValue, name: &str, value: ScriptValue) -> ScriptResult<()> {
        let obj = target.as_object().expect("property write on a non-object");
        self.engine.set(obj, &key(name), value)
    }

    /// `target.name(...args)`
    pub fn invoke(&self, target: &ScriptValue, name: &str, args: &[ScriptValue]) -> ScriptResult<ScriptValue> {
        let function = self.try_get(target, name)?;
        self.engine.call(&function, target, args)
    }

    /// `Class.name(...args)` through the class wrapper
    pub fn invoke_static(&self, class: &str, name: &str, args: &[ScriptValue]) -> ScriptResult<ScriptValue> {
        self.invoke(&self.constructor(class), name, args)
    }

    pub fn function<F>(&self, name: &str, f: F) -> ScriptValue
    where
        F: Fn(&dyn ScriptRuntime, &CallArgs) -> ScriptResult<ScriptValue> + Send + Sync + 'static,
    {
        ScriptValue::Object(self.engine.new_function(name, Arc::new(f)))
    }

    pub fn object(&self, props: &[(&str, ScriptValue)]) -> ScriptValue {
        let obj = self.engine.new_object();
        for (name, value) in props {
            self.engine.set(obj, &key(name), value.clone()).expect("literal property");
        }
        ScriptValue::Object(obj)
    }

    pub fn array(&self, elements: &[ScriptValue]) -> ScriptValue {
        ScriptValue::Object(self.engine.new_array(elements))
    }

    /// `message` of a thrown script value
    pub fn message(&self, thrown: &ScriptValue) -> String {
        match self.try_get(thrown, "message") {
            Ok(ScriptValue::String(s)) => s.to_string(),
            other => panic!("thrown value has no message: {:?}", other),
        }
    }

    pub fn is_type_error(&self, thrown: &ScriptValue) -> bool {
        let ctor = self.get(&ScriptValue::Object(self.engine.global()), "TypeError");
        self.engine.instance_of(thrown, &ctor).unwrap_or(false)
    }

    /// Managed object behind a script value
    pub fn managed_of(&self, value: &ScriptValue) -> ObjectRef {
        let id = self.ctx.refs().find_by_value(value).expect("value is mapped");
        self.ctx.refs().view(id).expect("live reference").managed
    }
}

// ===== Managed-side helpers for native bodies =====

pub fn read(rt: &dyn ManagedRuntime, obj: ObjectRef, name: &str) -> ManagedValue {
    let class = rt.class_of(obj).unwrap();
    let field = rt.find_field(class, name).unwrap();
    rt.get_field(Some(obj), field.id).unwrap()
}

pub fn write(rt: &dyn ManagedRuntime, obj: ObjectRef, name: &str, value: ManagedValue) {
    let class = rt.class_of(obj).unwrap();
    let field = rt.find_field(class, name).unwrap();
    rt.set_field(Some(obj), field.id, value).unwrap();
}

pub fn read_static(rt: &dyn ManagedRuntime, class: &str, name: &str) -> ManagedValue {
    let class = rt.class_by_name(class).unwrap();
    let field = rt.find_field(class, name).unwrap();
    rt.get_field(None, field.id).unwrap()
}

pub fn write_static(rt: &dyn ManagedRuntime, class: &str, name: &str, value: ManagedValue) {
    let class = rt.class_by_name(class).unwrap();
    let field = rt.find_field(class, name).unwrap();
    rt.set_field(None, field.id, value).unwrap();
}

pub fn method_id(rt: &dyn ManagedRuntime, class: &str, name: &str) -> MethodId {
    let class = rt.class_by_name(class).unwrap();
    rt.class_methods(class)
        .unwrap()
        .into_iter()
        .find(|m| &*m.name == name)
        .unwrap()
        .id
}

pub fn throw(rt: &dyn ManagedRuntime, message: &str) -> ObjectRef {
    rt.new_error(rt.well_known(WellKnownClass::TypeError), message).unwrap()
}

pub fn string(rt: &dyn ManagedRuntime, s: &str) -> ManagedValue {
    ManagedValue::object(rt.alloc_string(s))
}

fn f64_of(value: ManagedValue) -> f64 {
    value.as_f64().unwrap()
}

fn i32_of(value: ManagedValue) -> i32 {
    value.as_i32().unwrap()
}

fn bump_created(rt: &dyn ManagedRuntime) {
    let created = i32_of(read_static(rt, POINT, "created"));
    write_static(rt, POINT, "created", ManagedValue::I32(created + 1));
}

fn identity(_: &dyn ManagedRuntime, _: Option<ObjectRef>, args: &[ManagedValue]) -> Result<ManagedValue, ObjectRef> {
    Ok(args[0])
}

// ===== Fixture library =====

pub fn define_fixtures(vm: &ManagedVm) {
    define_geometry(vm);
    define_collections(vm);
    define_functions(vm);
    define_values(vm);
    define_script_libs(vm);
    define_calls(vm);
}

fn define_geometry(vm: &ManagedVm) {
    let point_ref = format!("L{};", POINT);
    let point = vm
        .define_class(
            ClassDef::new(POINT)
                .field(FieldDef::instance("x", "D"))
                .field(FieldDef::instance("y", "D"))
                .field(FieldDef::instance("tag", STRING).private())
                .field(FieldDef::static_field("created", "I"))
                .method(MethodDef::constructor("V", |rt, _, _| {
                    bump_created(rt);
                    Ok(ManagedValue::Void)
                }))
                .method(MethodDef::constructor("VDD", |rt, this, args| {
                    let this = this.unwrap();
                    write(rt, this, "x", args[0]);
                    write(rt, this, "y", args[1]);
                    bump_created(rt);
                    Ok(ManagedValue::Void)
                }))
                .method(MethodDef::native("norm", "D", |rt, this, _| {
                    let this = this.unwrap();
                    let (x, y) = (f64_of(read(rt, this, "x")), f64_of(read(rt, this, "y")));
                    Ok(ManagedValue::F64((x * x + y * y).sqrt()))
                }))
                .method(MethodDef::native("translate", "VD", |rt, this, args| {
                    let this = this.unwrap();
                    let d = f64_of(args[0]);
                    write(rt, this, "x", ManagedValue::F64(f64_of(read(rt, this, "x")) + d));
                    write(rt, this, "y", ManagedValue::F64(f64_of(read(rt, this, "y")) + d));
                    Ok(ManagedValue::Void)
                }))
                .method(MethodDef::native("translate", "VDD", |rt, this, args| {
                    let this = this.unwrap();
                    write(rt, this, "x", ManagedValue::F64(f64_of(read(rt, this, "x")) + f64_of(args[0])));
                    write(rt, this, "y", ManagedValue::F64(f64_of(read(rt, this, "y")) + f64_of(args[1])));
                    Ok(ManagedValue::Void)
                }))
                .method(
                    MethodDef::native("label", STRING, |rt, this, _| Ok(read(rt, this.unwrap(), "tag")))
                        .getter(),
                )
                .method(
                    MethodDef::native("label", format!("V{}", STRING), |rt, this, args| {
                        write(rt, this.unwrap(), "tag", args[0]);
                        Ok(ManagedValue::Void)
                    })
                    .setter(),
                )
                .method(MethodDef::native("secret", "I", |_, _, _| Ok(ManagedValue::I32(42))).private())
                .method(
                    MethodDef::native("origin", point_ref.clone(), |rt, _, _| {
                        let point = rt.alloc_object(rt.class_by_name(POINT).unwrap()).unwrap();
                        Ok(ManagedValue::object(point))
                    })
                    .static_method(),
                )
                .method(
                    MethodDef::native("distance", format!("D{0}{0}", point_ref), |rt, _, args| {
                        let (a, b) = match (args[0].as_object(), args[1].as_object()) {
                            (Some(a), Some(b)) => (a, b),
                            _ => return Err(throw(rt, "distance of null")),
                        };
                        let dx = f64_of(read(rt, a, "x")) - f64_of(read(rt, b, "x"));
                        let dy = f64_of(read(rt, a, "y")) - f64_of(read(rt, b, "y"));
                        Ok(ManagedValue::F64((dx * dx + dy * dy).sqrt()))
                    })
                    .static_method(),
                ),
        )
        .unwrap();

    vm.define_class(
        ClassDef::new(POINT3)
            .extends(point)
            .field(FieldDef::instance("z", "D"))
            .method(MethodDef::constructor("VDDD", |rt, this, args| {
                let this = this.unwrap();
                write(rt, this, "x", args[0]);
                write(rt, this, "y", args[1]);
                write(rt, this, "z", args[2]);
                Ok(ManagedValue::Void)
            }))
            .method(MethodDef::native("norm", "D", |rt, this, _| {
                let this = this.unwrap();
                let x = f64_of(read(rt, this, "x"));
                let y = f64_of(read(rt, this, "y"));
                let z = f64_of(read(rt, this, "z"));
                Ok(ManagedValue::F64((x * x + y * y + z * z).sqrt()))
            }))
            .method(MethodDef::native("translate", "VDDD", |rt, this, args| {
                let this = this.unwrap();
                for (field, delta) in ["x", "y", "z"].into_iter().zip(args) {
                    let moved = f64_of(read(rt, this, field)) + f64_of(*delta);
                    write(rt, this, field, ManagedValue::F64(moved));
                }
                Ok(ManagedValue::Void)
            })),
    )
    .unwrap();
}

fn define_collections(vm: &ManagedVm) {
    vm.define_class(
        ClassDef::new(INT_LIST)
            .mimics(BuiltinShape::Array)
            .field(FieldDef::instance("items", "[I"))
            .field(FieldDef::instance("size", "I"))
            .method(MethodDef::constructor("V", |rt, this, _| {
                let class = rt.array_class(TypeTag::Primitive(PrimitiveKind::I32)).unwrap();
                let items = rt.alloc_array(class, 8).unwrap();
                write(rt, this.unwrap(), "items", ManagedValue::object(items));
                Ok(ManagedValue::Void)
            }))
            .method(MethodDef::native("$_get", "II", |rt, this, args| {
                let this = this.unwrap();
                let items = read(rt, this, "items").as_object().unwrap();
                let index = i32_of(args[0]);
                if index < 0 || index >= i32_of(read(rt, this, "size")) {
                    return Err(throw(rt, &format!("index {} out of range", index)));
                }
                Ok(rt.array_get(items, index as usize).unwrap())
            }))
            .method(MethodDef::native("$_set", "VII", |rt, this, args| {
                let this = this.unwrap();
                let items = read(rt, this, "items").as_object().unwrap();
                let index = i32_of(args[0]);
                if index < 0 || index as usize >= rt.array_len(items).unwrap() {
                    return Err(throw(rt, &format!("index {} out of range", index)));
                }
                rt.array_set(items, index as usize, args[1]).unwrap();
                let size = i32_of(read(rt, this, "size"));
                write(rt, this, "size", ManagedValue::I32(size.max(index + 1)));
                Ok(ManagedValue::Void)
            }))
            .method(MethodDef::native("add", "VI", |rt, this, args| {
                let this = this.unwrap();
                let items = read(rt, this, "items").as_object().unwrap();
                let size = i32_of(read(rt, this, "size"));
                rt.array_set(items, size as usize, args[0]).unwrap();
                write(rt, this, "size", ManagedValue::I32(size + 1));
                Ok(ManagedValue::Void)
            }))
            .method(MethodDef::native("length", "I", |rt, this, _| Ok(read(rt, this.unwrap(), "size"))).getter())
            .method(MethodDef::native("$_iterator", OBJECT, |_, this, _| Ok(ManagedValue::Ref(this)))),
    )
    .unwrap();
}

fn define_functions(vm: &ManagedVm) {
    vm.define_class(
        ClassDef::new(COUNTER)
            .mimics(BuiltinShape::Function)
            .field(FieldDef::instance("total", "I"))
            .method(MethodDef::constructor("V", |_, _, _| Ok(ManagedValue::Void)))
            .method(MethodDef::native("invoke", "II", |rt, this, args| {
                let this = this.unwrap();
                let total = i32_of(read(rt, this, "total")) + i32_of(args[0]);
                write(rt, this, "total", ManagedValue::I32(total));
                Ok(ManagedValue::I32(total))
            })),
    )
    .unwrap();

    let int_op = vm
        .define_class(
            ClassDef::new(INT_OP)
                .kind(ClassKind::FunctionalInterface)
                .method(MethodDef::abstract_method("apply", "II")),
        )
        .unwrap();
    vm.define_class(
        ClassDef::new(ADDER)
            .implements(int_op)
            .field(FieldDef::instance("n", "I"))
            .method(MethodDef::native("apply", "II", |rt, this, args| {
                Ok(ManagedValue::I32(i32_of(read(rt, this.unwrap(), "n")) + i32_of(args[0])))
            })),
    )
    .unwrap();
    let int_op_ref = format!("L{};", INT_OP);
    vm.define_class(
        ClassDef::new(OPS)
            .method(
                MethodDef::native("applyTwice", format!("I{}I", int_op_ref), |rt, _, args| {
                    let Some(op) = args[0].as_object() else {
                        return Err(throw(rt, "null operation"));
                    };
                    let apply = method_id(rt, INT_OP, "apply");
                    let once = rt.invoke(apply, Some(op), &[args[1]])?;
                    rt.invoke(apply, Some(op), &[once])
                })
                .static_method(),
            )
            .method(
                MethodDef::native("adder", format!("{}I", int_op_ref), |rt, _, args| {
                    let adder = rt.alloc_object(rt.class_by_name(ADDER).unwrap()).unwrap();
                    write(rt, adder, "n", args[0]);
                    Ok(ManagedValue::object(adder))
                })
                .static_method(),
            ),
    )
    .unwrap();

    vm.define_class(
        ClassDef::new(THUNK)
            .kind(ClassKind::FunctionalInterface)
            .method(MethodDef::abstract_method("run", "V")),
    )
    .unwrap();
    let thunk_ref = format!("L{};", THUNK);
    vm.define_class(
        ClassDef::new(FAILS)
            .method(MethodDef::native("boom", "V", |rt, _, _| Err(throw(rt, "boom"))).static_method())
            .method(
                // runs the thunk and reports the class of what it threw
                MethodDef::native("attempt", format!("{}{}", STRING, thunk_ref), |rt, _, args| {
                    let run = method_id(rt, THUNK, "run");
                    match rt.invoke(run, args[0].as_object(), &[]) {
                        Ok(_) => Ok(ManagedValue::NULL),
                        Err(exc) => {
                            let class = rt.class_info(rt.class_of(exc).unwrap()).unwrap();
                            Ok(string(rt, &class.name))
                        }
                    }
                })
                .static_method(),
            )
            .method(
                MethodDef::native("propagate", format!("V{}", thunk_ref), |rt, _, args| {
                    let run = method_id(rt, THUNK, "run");
                    rt.invoke(run, args[0].as_object(), &[])
                })
                .static_method(),
            ),
    )
    .unwrap();

    let greeter = vm
        .define_class(
            ClassDef::new(GREETER)
                .kind(ClassKind::Interface)
                .method(MethodDef::abstract_method("greet", format!("{0}{0}", STRING))),
        )
        .unwrap();
    vm.define_class(
        ClassDef::new(GREETINGS).method(
            MethodDef::native(
                "greetAll",
                format!("{0}L{1};{0}", STRING, GREETER),
                move |rt, _, args| {
                    let Some(target) = args[0].as_object() else {
                        return Err(throw(rt, "null greeter"));
                    };
                    let greet = rt
                        .class_methods(greeter)
                        .unwrap()
                        .into_iter()
                        .find(|m| &*m.name == "greet")
                        .unwrap();
                    rt.invoke(greet.id, Some(target), &[args[1]])
                },
            )
            .static_method(),
        ),
    )
    .unwrap();
}

fn define_values(vm: &ManagedVm) {
    let color_ref = format!("L{};", COLOR);
    let color = vm
        .define_class(
            ClassDef::new(COLOR)
                .kind(ClassKind::Enum)
                .field(FieldDef::instance("value", STRING))
                .field(FieldDef::static_field("RED", color_ref.clone()))
                .field(FieldDef::static_field("GREEN", color_ref.clone())),
        )
        .unwrap();
    for (name, value) in [("RED", "red"), ("GREEN", "green")] {
        let member = vm.alloc_object(color).unwrap();
        write(vm, member, "value", string(vm, value));
        write_static(vm, COLOR, name, ManagedValue::object(member));
    }
    vm.define_class(
        ClassDef::new(PALETTE).method(
            MethodDef::native("next", format!("{0}{0}", color_ref), |rt, _, args| {
                let red = read_static(rt, COLOR, "RED");
                let green = read_static(rt, COLOR, "GREEN");
                Ok(if args[0] == red { green } else { red })
            })
            .static_method(),
        ),
    )
    .unwrap();

    let size_ref = format!("L{};", SIZE);
    vm.define_class(
        ClassDef::new(SIZE)
            .kind(ClassKind::Record)
            .field(FieldDef::instance("width", "I"))
            .field(FieldDef::instance("height", "I")),
    )
    .unwrap();
    vm.define_class(
        ClassDef::new(LAYOUT)
            .method(
                MethodDef::native("area", format!("I{}", size_ref), |rt, _, args| {
                    let size = args[0].as_object().unwrap();
                    Ok(ManagedValue::I32(
                        i32_of(read(rt, size, "width")) * i32_of(read(rt, size, "height")),
                    ))
                })
                .static_method(),
            )
            .method(
                MethodDef::native("grow", format!("{0}{0}", size_ref), |rt, _, args| {
                    let size = args[0].as_object().unwrap();
                    let width = i32_of(read(rt, size, "width"));
                    write(rt, size, "width", ManagedValue::I32(width * 2));
                    Ok(args[0])
                })
                .static_method(),
            ),
    )
    .unwrap();

    let node_ref = format!("L{};", NODE);
    vm.define_class(
        ClassDef::new(NODE)
            .kind(ClassKind::Record)
            .field(FieldDef::instance("label", "I"))
            .field(FieldDef::instance("next", node_ref.clone())),
    )
    .unwrap();
    vm.define_class(
        ClassDef::new(CHAIN)
            .method(
                // a node whose `next` is itself
                MethodDef::native("loop", node_ref.clone(), |rt, _, _| {
                    let node = rt.alloc_object(rt.class_by_name(NODE).unwrap()).unwrap();
                    write(rt, node, "label", ManagedValue::I32(7));
                    write(rt, node, "next", ManagedValue::object(node));
                    Ok(ManagedValue::object(node))
                })
                .static_method(),
            )
            .method(
                MethodDef::native("closes", format!("Z{}", node_ref), |rt, _, args| {
                    let Some(node) = args[0].as_object() else {
                        return Ok(ManagedValue::Bool(false));
                    };
                    Ok(ManagedValue::Bool(read(rt, node, "next") == ManagedValue::object(node)))
                })
                .static_method(),
            ),
    )
    .unwrap();
}

fn define_script_libs(vm: &ManagedVm) {
    vm.define_class(
        ClassDef::new(SCRIPT_LIB)
            .script_module("lib")
            .script_strings(["math", "add", "sum", "fail", "describe", "missing"])
            .method(MethodDef::bridge("add", "DDD").static_method().script_name(0, 2))
            .method(MethodDef::bridge("sum", "D[D").static_method().rest().script_name(2, 1))
            .method(MethodDef::bridge("fail", "V").static_method().script_name(3, 1))
            .method(
                MethodDef::bridge("describe", format!("{}{}", STRING, VALUE))
                    .static_method()
                    .script_name(4, 1),
            )
            .method(MethodDef::bridge("missing", "V").static_method().script_name(5, 1))
            .method(MethodDef::bridge("callValue", format!("{0}{0}{0}D", VALUE)).static_method()),
    )
    .unwrap();

    vm.define_class(
        ClassDef::new(GLOBAL_LIB)
            .script_strings(["host", "version"])
            .method(MethodDef::bridge("version", STRING).static_method().script_name(0, 2)),
    )
    .unwrap();
}

fn define_calls(vm: &ManagedVm) {
    let mut calls = ClassDef::new(CALLS)
        .method(
            // three parameters, one mandatory
            MethodDef::native("opt", format!("{0}I{0}D", STRING), |rt, _, args| {
                let label = match args[1].as_object() {
                    Some(s) => rt.read_string(s).unwrap().to_string(),
                    None => "null".to_string(),
                };
                let summary = format!("{}|{}|{}", i32_of(args[0]), label, f64_of(args[2]));
                Ok(string(rt, &summary))
            })
            .static_method()
            .optional_from(1),
        )
        .method(
            MethodDef::native("count", "I[I", |rt, _, args| {
                let items = args[0].as_object().unwrap();
                Ok(ManagedValue::I32(rt.array_len(items).unwrap() as i32))
            })
            .static_method()
            .rest(),
        )
        .method(
            MethodDef::native("join", format!("{0}[{0}", STRING), |rt, _, args| {
                let items = args[0].as_object().unwrap();
                let parts: Vec<String> = (0..rt.array_len(items).unwrap())
                    .map(|i| match rt.array_get(items, i).unwrap().as_object() {
                        Some(s) => rt.read_string(s).unwrap().to_string(),
                        None => "null".to_string(),
                    })
                    .collect();
                Ok(string(rt, &parts.join(",")))
            })
            .static_method()
            .rest(),
        )
        .method(
            MethodDef::native("reverse", "[I[I", |rt, _, args| {
                let Some(items) = args[0].as_object() else {
                    return Ok(ManagedValue::NULL);
                };
                let class = rt.class_of(items).unwrap();
                let len = rt.array_len(items).unwrap();
                let reversed = rt.alloc_array(class, len).unwrap();
                for i in 0..len {
                    rt.array_set(reversed, len - 1 - i, rt.array_get(items, i).unwrap()).unwrap();
                }
                Ok(ManagedValue::object(reversed))
            })
            .static_method(),
        );
    for (name, descriptor) in [
        ("double", "DD"),
        ("float", "FF"),
        ("int", "II"),
        ("long", "JJ"),
        ("short", "SS"),
        ("byte", "BB"),
        ("char", "CC"),
        ("bool", "ZZ"),
    ] {
        calls = calls.method(MethodDef::native(name, descriptor, identity).static_method());
    }
    calls = calls
        .method(MethodDef::native("text", format!("{0}{0}", STRING), identity).static_method())
        .method(MethodDef::native("echo", format!("{0}{0}", OBJECT), identity).static_method())
        .method(MethodDef::native("keep", format!("{0}{0}", VALUE), identity).static_method());
    vm.define_class(calls).unwrap();
}
