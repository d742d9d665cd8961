//! Call-into-script bindings
//!
//! Every bridge method of a class is bound once, when the class is first
//! initialized, to the strategy that finds its script target. The strategy
//! depends only on the method's signature shape, so an unbindable shape is
//! a configuration error rather than a call error.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tandem_sdk::{
    AccessorKind, ClassId, ClassInfo, InteropResult, MethodId, MethodInfo, TypeTag, WellKnownClass,
};

use crate::interop::context::InteropContext;
use crate::interop::fatal;
use crate::interop::proto_reader::ProtoReader;

/// Indexed read (`obj[i]`)
pub const INDEX_GET: &str = "$_get";
/// Indexed write (`obj[i] = v`)
pub const INDEX_SET: &str = "$_set";
/// Iteration protocol (`obj[Symbol.iterator]()`)
pub const ITERATOR: &str = "$_iterator";

/// Whether `name` is one of the special protocol methods
pub fn is_special(name: &str) -> bool {
    matches!(name, INDEX_GET | INDEX_SET | ITERATOR)
}

/// How a proxy class reaches its script object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyFlavor {
    /// The script object is a function and is called directly
    Callee,
    /// Methods are properties of the script object
    Member,
}

/// Resolution strategy of a bridge method
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    /// `receiver.name(...args)`
    Member {
        /// Script name of the method
        name: Arc<str>,
    },
    /// `receiver(...args)`
    Callee,
    /// `callee.call(this, ...args)` with both leading parameters as script values
    ByValue,
    /// `first.a.b.c(...rest)` walked from the leading script-value parameter
    Qualified {
        /// Property names walked in order; the last one is called
        path: Vec<Arc<str>>,
    },
    /// `module.a.b(...args)`, or from the global object without a module
    Namespaced {
        /// Module to load first, or `None` for the global object
        module: Option<Arc<str>>,
        /// Property names walked from the module; the last one is called
        path: Vec<Arc<str>>,
    },
    /// `receiver[key]`
    IndexGet,
    /// `receiver[key] = value`
    IndexSet,
    /// `receiver[Symbol.iterator]()`
    Iterator,
    /// `receiver.name`
    Getter {
        /// Property read
        name: Arc<str>,
    },
    /// `receiver.name = value`
    Setter {
        /// Property written
        name: Arc<str>,
    },
}

/// A bound bridge method
#[derive(Debug, Clone)]
pub struct Binding {
    /// Reflection record of the method
    pub method: Arc<MethodInfo>,
    /// Resolution strategy
    pub target: CallTarget,
}

/// Bridge method id to binding
#[derive(Default)]
pub struct BindingTable {
    bindings: RwLock<FxHashMap<MethodId, Arc<Binding>>>,
}

impl BindingTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Binding of a method, if its class was initialized
    pub fn get(&self, method: MethodId) -> Option<Arc<Binding>> {
        self.bindings.read().get(&method).cloned()
    }

    /// Number of bound methods
    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    /// Whether nothing was bound yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bind every bridge method declared by `class`, returning how many were bound
    pub fn bind_class(&self, ctx: &InteropContext, class: ClassId) -> InteropResult<usize> {
        let managed = ctx.managed();
        let info = managed.class_info(class)?;
        let mut bound = Vec::new();
        for method in managed.class_methods(class)? {
            if !method.is_bridge() {
                continue;
            }
            let target = target_for(ctx, &info, &method)?;
            log::trace!("bind {}.{} -> {:?}", info.name, method.name, target);
            bound.push(Arc::new(Binding { method, target }));
        }
        let count = bound.len();
        let mut bindings = self.bindings.write();
        for binding in bound {
            bindings.entry(binding.method.id).or_insert(binding);
        }
        log::debug!("bound {} bridge methods of {}", count, info.name);
        Ok(count)
    }
}

fn segments(
    ctx: &InteropContext,
    class: &ClassInfo,
    method: &MethodInfo,
) -> InteropResult<Option<Vec<Arc<str>>>> {
    method
        .script_decl
        .map(|decl| ctx.strings().segments(ctx.managed(), class.id, decl))
        .transpose()
}

fn member_name(
    ctx: &InteropContext,
    class: &ClassInfo,
    method: &MethodInfo,
) -> InteropResult<Arc<str>> {
    Ok(match segments(ctx, class, method)? {
        Some(path) if path.len() == 1 => path[0].clone(),
        Some(path) => fatal(&format!(
            "{}.{}: instance bridge methods name a single property, got {}",
            class.name,
            method.name,
            path.join(".")
        )),
        None => method.name.clone(),
    })
}

fn target_for(
    ctx: &InteropContext,
    class: &ClassInfo,
    method: &MethodInfo,
) -> InteropResult<CallTarget> {
    if !method.is_static {
        return Ok(match (&*method.name, method.accessor) {
            (INDEX_GET, _) => CallTarget::IndexGet,
            (INDEX_SET, _) => CallTarget::IndexSet,
            (ITERATOR, _) => CallTarget::Iterator,
            (_, Some(AccessorKind::Getter)) => CallTarget::Getter {
                name: member_name(ctx, class, method)?,
            },
            (_, Some(AccessorKind::Setter)) => CallTarget::Setter {
                name: member_name(ctx, class, method)?,
            },
            _ if ctx.proxy_flavor(class.id) == Some(ProxyFlavor::Callee) => CallTarget::Callee,
            _ => CallTarget::Member {
                name: member_name(ctx, class, method)?,
            },
        });
    }

    let managed = ctx.managed();
    let script_value = TypeTag::Ref(managed.well_known(WellKnownClass::ScriptValue));
    let mut proto = ProtoReader::new(managed, &method.descriptor);
    proto.expect_tag()?;
    let mut leading = [None, None];
    for slot in leading.iter_mut().take(method.descriptor_params()) {
        *slot = proto.next_tag()?;
    }
    let is_value = |tag: Option<TypeTag>| tag == Some(script_value);

    match segments(ctx, class, method)? {
        Some(path) if path.is_empty() => fatal(&format!(
            "{}.{}: empty script name",
            class.name, method.name
        )),
        Some(path) if is_value(leading[0]) => Ok(CallTarget::Qualified { path }),
        Some(path) => Ok(CallTarget::Namespaced {
            module: class.script_module.clone(),
            path,
        }),
        None if is_value(leading[0]) && is_value(leading[1]) => Ok(CallTarget::ByValue),
        None => fatal(&format!(
            "{}.{} ({}): static bridge method without a script name must take (callee, this) script values",
            class.name, method.name, method.descriptor
        )),
    }
}
