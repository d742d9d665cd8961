//! Class wrappers
//!
//! A [`ClassWrapper`] is the script-visible shape of one managed class: a
//! constructor function, a prototype carrying the instance members, and
//! the overload sets those members dispatch through. Wrappers are built
//! once per class, base class first, and live in an arena owned by the
//! interop context.

mod builder;
pub mod overload;

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tandem_sdk::{
    BuiltinShape, ClassId, ClassInfo, InteropError, InteropResult, LocalSlot, PersistentHandle,
    ScriptObjectRef,
};

use super::context::InteropContext;
use super::scope::HandleScope;
use super::shared_ref::RefKind;
use overload::OverloadSet;

pub use builder::build;

/// Stable index of a wrapper in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WrapperId(usize);

impl WrapperId {
    /// Arena index
    pub fn index(self) -> usize {
        self.0
    }
}

/// Script shape of one managed class
pub struct ClassWrapper {
    pub(crate) id: WrapperId,
    pub(crate) class: ClassId,
    pub(crate) info: Arc<ClassInfo>,
    pub(crate) base: Option<Arc<ClassWrapper>>,
    pub(crate) constructor: ScriptObjectRef,
    pub(crate) prototype: ScriptObjectRef,
    pub(crate) handles: Vec<PersistentHandle>,
    /// Own or inherited builtin shape
    pub(crate) shape: Option<BuiltinShape>,
    pub(crate) flattened: bool,
    /// Proxy handler routing indexed access to `$_get`/`$_set`
    pub(crate) index_handler: Option<ScriptObjectRef>,
    pub(crate) ctor: Arc<OverloadSet>,
    pub(crate) methods: FxHashMap<Arc<str>, Arc<OverloadSet>>,
    pub(crate) statics: FxHashMap<Arc<str>, Arc<OverloadSet>>,
    pub(crate) field_names: Vec<Arc<str>>,
}

impl ClassWrapper {
    /// Arena index
    pub fn id(&self) -> WrapperId {
        self.id
    }

    /// Wrapped class
    pub fn class(&self) -> ClassId {
        self.class
    }

    /// Reflection record of the wrapped class
    pub fn info(&self) -> &Arc<ClassInfo> {
        &self.info
    }

    /// Wrapper of the superclass
    pub fn base(&self) -> Option<&Arc<ClassWrapper>> {
        self.base.as_ref()
    }

    /// Script constructor
    pub fn constructor(&self) -> ScriptObjectRef {
        self.constructor
    }

    /// Prototype of instances
    pub fn prototype(&self) -> ScriptObjectRef {
        self.prototype
    }

    /// Builtin shape the class resembles, own or inherited
    pub fn shape(&self) -> Option<BuiltinShape> {
        self.shape
    }

    /// Whether ancestor members were copied onto this prototype
    pub fn is_flattened(&self) -> bool {
        self.flattened
    }

    /// Script objects the wrapper keeps alive
    pub(crate) fn script_roots(&self) -> impl Iterator<Item = ScriptObjectRef> {
        [Some(self.constructor), Some(self.prototype), self.index_handler]
            .into_iter()
            .flatten()
    }

    /// Whether instances are proxies routing indexed access
    pub fn has_indexer(&self) -> bool {
        self.index_handler.is_some()
    }

    /// Constructor overload set
    pub fn constructors(&self) -> &Arc<OverloadSet> {
        &self.ctor
    }

    /// Instance overload set named `name`, searching base wrappers
    pub fn method(&self, name: &str) -> Option<&Arc<OverloadSet>> {
        self.methods
            .get(name)
            .or_else(|| self.base.as_ref().and_then(|b| b.method(name)))
    }

    /// Static overload set named `name` declared by this class
    pub fn static_method(&self, name: &str) -> Option<&Arc<OverloadSet>> {
        self.statics.get(name)
    }

    /// Public instance fields declared by this class
    pub fn field_names(&self) -> &[Arc<str>] {
        &self.field_names
    }

    /// Create the script instance for the managed object rooted in `slot`
    /// and link the two
    ///
    /// `this` is the object a script `new` already allocated, if any.
    pub fn instantiate(
        &self,
        ctx: &InteropContext,
        scope: &HandleScope<'_>,
        slot: LocalSlot,
        this: Option<ScriptObjectRef>,
    ) -> InteropResult<ScriptObjectRef> {
        let script = ctx.script();
        let instance = match self.shape {
            Some(BuiltinShape::Function) => {
                let function = builder::callable_instance(ctx, self)?;
                script.set_prototype(function, Some(self.prototype));
                function
            }
            _ => this.unwrap_or_else(|| script.new_object_with_proto(Some(self.prototype))),
        };
        let instance = match self.index_handler {
            Some(handler) => script.new_proxy(instance, handler),
            None => instance,
        };
        ctx.register(scope, slot, instance, RefKind::ManagedOwned)?;
        Ok(instance)
    }
}

// ============================================================================
// Wrapper cache
// ============================================================================

/// Arena of wrappers keyed by class
#[derive(Default)]
pub struct WrapperCache {
    by_class: RwLock<FxHashMap<ClassId, WrapperId>>,
    arena: RwLock<Vec<Arc<ClassWrapper>>>,
}

impl WrapperCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrapper of `class`, if already built
    pub fn get(&self, class: ClassId) -> Option<Arc<ClassWrapper>> {
        let id = *self.by_class.read().get(&class)?;
        self.by_id(id)
    }

    /// Wrapper by arena index
    pub fn by_id(&self, id: WrapperId) -> Option<Arc<ClassWrapper>> {
        self.arena.read().get(id.0).cloned()
    }

    /// Number of built wrappers
    pub fn len(&self) -> usize {
        self.arena.read().len()
    }

    /// Whether nothing was built yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wrapper of `class`, building it (and its base wrappers) on first request
    pub fn get_or_create(&self, ctx: &InteropContext, class: ClassId) -> InteropResult<Arc<ClassWrapper>> {
        if let Some(wrapper) = self.get(class) {
            return Ok(wrapper);
        }
        let info = ctx.managed().class_info(class)?;
        if info.component().is_some() {
            return Err(InteropError::type_mismatch("class", format!("array {}", info.name)));
        }
        let base = info
            .super_class
            .map(|sup| self.get_or_create(ctx, sup))
            .transpose()?;
        let mut wrapper = build(ctx, info, base)?;

        let mut by_class = self.by_class.write();
        if let Some(&existing) = by_class.get(&class) {
            log::debug!("wrapper for {} built twice, keeping the first", wrapper.info.name);
            for handle in wrapper.handles.drain(..) {
                ctx.script().delete_persistent(handle);
            }
            drop(by_class);
            return self
                .by_id(existing)
                .ok_or_else(|| InteropError::identity("wrapper arena lost an entry"));
        }
        let mut arena = self.arena.write();
        wrapper.id = WrapperId(arena.len());
        let wrapper = Arc::new(wrapper);
        arena.push(wrapper.clone());
        by_class.insert(class, wrapper.id);
        ctx.refs().add_script_roots(wrapper.script_roots());
        Ok(wrapper)
    }
}
