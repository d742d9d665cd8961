//! Value converters
//!
//! Primitives go through the [`primitive`] codecs. References go through a
//! [`RefConverter`] chosen once per class by the [`ConverterCache`]; the
//! scripting-value box and strings take a fast path that skips the cache.
//!
//! Identity is checked before any converter runs: a managed object that
//! already has a shared reference converts to its script side (and back),
//! so the same logical object never gets two script representations.

pub mod primitive;
mod reference;

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tandem_sdk::{
    ClassId, ClassKind, InteropError, InteropResult, ManagedValue, ObjectRef, ScriptValue, TypeTag,
    WellKnownClass,
};

use super::context::InteropContext;
use super::proto_reader::managed_name;
use super::storage::RefView;

pub use reference::{
    ArrayConverter, ClassConverter, EnumConverter, ErrorConverter, FunctionConverter,
    InterfaceConverter, NumericBoxConverter, RecordConverter, ScriptValueConverter,
    StringConverter, UniversalConverter,
};

/// Per-class reference conversion
pub trait RefConverter: Send + Sync {
    /// Short name for diagnostics
    fn name(&self) -> &'static str;

    /// Convert an unmapped managed object to a script value
    fn wrap(&self, ctx: &InteropContext, obj: ObjectRef) -> InteropResult<ScriptValue>;

    /// Convert a non-nullish, unmapped script value to a managed value
    fn unwrap(&self, ctx: &InteropContext, value: &ScriptValue) -> InteropResult<ManagedValue>;

    /// Called when a value crosses through an existing shared reference
    fn refresh_script(&self, _ctx: &InteropContext, _view: &RefView) -> InteropResult<()> {
        Ok(())
    }

    /// Called when a script value crosses back through an existing shared reference
    fn refresh_managed(&self, _ctx: &InteropContext, _view: &RefView) -> InteropResult<()> {
        Ok(())
    }
}

// ============================================================================
// Converter cache
// ============================================================================

/// Class id to converter map
#[derive(Default)]
pub struct ConverterCache {
    converters: RwLock<FxHashMap<ClassId, Arc<dyn RefConverter>>>,
}

impl ConverterCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Converter for `class`, selected on first request
    pub fn get(&self, ctx: &InteropContext, class: ClassId) -> InteropResult<Arc<dyn RefConverter>> {
        if let Some(converter) = self.converters.read().get(&class) {
            return Ok(converter.clone());
        }
        let converter = select(ctx, class)?;
        log::debug!(
            "converter for {}: {}",
            managed_name(ctx.managed(), TypeTag::Ref(class)),
            converter.name()
        );
        Ok(self
            .converters
            .write()
            .entry(class)
            .or_insert(converter)
            .clone())
    }

    /// Number of classes with a selected converter
    pub fn len(&self) -> usize {
        self.converters.read().len()
    }

    /// Whether no converter was selected yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn select(ctx: &InteropContext, class: ClassId) -> InteropResult<Arc<dyn RefConverter>> {
    let managed = ctx.managed();
    let well_known = |w| managed.well_known(w) == class;
    if well_known(WellKnownClass::ScriptValue) {
        return Ok(Arc::new(ScriptValueConverter));
    }
    if well_known(WellKnownClass::String) {
        return Ok(Arc::new(StringConverter));
    }
    if well_known(WellKnownClass::Object) {
        return Ok(Arc::new(UniversalConverter));
    }
    if let Some(kind) = WellKnownClass::ALL
        .into_iter()
        .find(|w| well_known(*w))
        .and_then(WellKnownClass::boxed_kind)
    {
        return Ok(Arc::new(NumericBoxConverter::new(kind)));
    }

    let info = managed.class_info(class)?;
    let converter: Arc<dyn RefConverter> = match info.kind {
        ClassKind::Array(component) => Arc::new(ArrayConverter::new(class, component)),
        ClassKind::FunctionalInterface => Arc::new(FunctionConverter::new(ctx, class)?),
        ClassKind::Interface => Arc::new(InterfaceConverter::new(class)),
        ClassKind::Enum => Arc::new(EnumConverter::new(class)),
        ClassKind::Record => Arc::new(RecordConverter::new(class)),
        ClassKind::Class if managed.is_assignable(class, managed.well_known(WellKnownClass::Error)) => {
            Arc::new(ErrorConverter::new(class))
        }
        ClassKind::Class => Arc::new(ClassConverter::new(class)),
    };
    Ok(converter)
}

// ============================================================================
// Entry points
// ============================================================================

/// Convert a managed value of static type `tag` to a script value
///
/// Objects convert according to their runtime class, except that a static
/// functional-interface type converts to a script function.
pub fn managed_to_script(
    ctx: &InteropContext,
    value: ManagedValue,
    tag: TypeTag,
) -> InteropResult<ScriptValue> {
    let obj = match value {
        ManagedValue::Ref(None) => return Ok(ScriptValue::Null),
        ManagedValue::Ref(Some(obj)) => obj,
        other => return primitive::to_script(other),
    };
    let managed = ctx.managed();
    let runtime_class = managed.class_of(obj)?;
    if runtime_class == managed.well_known(WellKnownClass::ScriptValue) {
        // boxes made by `box` in script come back as their handle
        return match ctx.refs().find_by_managed(obj).and_then(|id| ctx.refs().view(id)) {
            Some(view) => Ok(ScriptValue::Object(view.script)),
            None => ctx.unbox_value(obj),
        };
    }
    if runtime_class == managed.well_known(WellKnownClass::String) {
        return Ok(ScriptValue::String(managed.read_string(obj)?));
    }

    let class = match tag {
        TypeTag::Ref(static_class)
            if managed.class_info(static_class)?.kind == ClassKind::FunctionalInterface =>
        {
            static_class
        }
        _ => runtime_class,
    };
    let converter = ctx.converter(class)?;
    if let Some(id) = ctx.refs().find_by_managed(obj) {
        if let Some(view) = ctx.refs().view(id) {
            converter.refresh_script(ctx, &view)?;
            return Ok(ScriptValue::Object(view.script));
        }
    }
    converter.wrap(ctx, obj)
}

/// Convert a script value to a managed value of type `tag`
///
/// `undefined` and `null` become the null reference for reference types
/// (except the scripting-value box, which boxes them) and are a type
/// mismatch for primitives.
pub fn script_to_managed(
    ctx: &InteropContext,
    value: &ScriptValue,
    tag: TypeTag,
) -> InteropResult<ManagedValue> {
    let class = match tag {
        TypeTag::Void => return Ok(ManagedValue::Void),
        TypeTag::Primitive(kind) => return primitive::to_managed(kind, value),
        TypeTag::Ref(class) => class,
    };
    let managed = ctx.managed();
    if class == managed.well_known(WellKnownClass::ScriptValue) {
        return match ctx.handle_box(value)? {
            Some(boxed) => Ok(ManagedValue::object(boxed)),
            None => ctx.box_value(value.clone()).map(ManagedValue::object),
        };
    }
    if value.is_nullish() {
        return Ok(ManagedValue::NULL);
    }
    if class == managed.well_known(WellKnownClass::String) {
        return match value {
            ScriptValue::String(s) => Ok(ManagedValue::object(managed.alloc_string(s))),
            other => Err(InteropError::type_mismatch(
                WellKnownClass::String.name(),
                other.kind_name(),
            )),
        };
    }

    let result = match ctx.refs().find_by_value(value).and_then(|id| ctx.refs().view(id)) {
        Some(view) => {
            ctx.converter(managed.class_of(view.managed)?)?
                .refresh_managed(ctx, &view)?;
            ManagedValue::object(view.managed)
        }
        None => ctx.converter(class)?.unwrap(ctx, value)?,
    };
    if let Some(obj) = result.as_object() {
        let actual = managed.class_of(obj)?;
        if !managed.is_assignable(actual, class) {
            return Err(InteropError::type_mismatch(
                managed_name(managed, tag),
                managed_name(managed, TypeTag::Ref(actual)),
            ));
        }
    }
    Ok(result)
}
