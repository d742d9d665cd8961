//! Class table
//!
//! Holds every class, method and field record of the managed VM together with
//! the static field storage. Descriptors are validated at definition time but
//! reference fragments are not resolved: the VM only needs to know whether a
//! slot holds a primitive or a reference, so classes may name classes that
//! are defined later.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tandem_sdk::descriptor::{self, DescriptorCursor, Fragment};
use tandem_sdk::{
    AccessorKind, ClassDef, ClassId, ClassInfo, ClassKind, FieldId, FieldInfo, InteropError,
    InteropResult, ManagedValue, MethodBody, MethodId, MethodInfo, PrimitiveKind, TypeTag,
    Visibility,
};

/// Storage shape of a field, parameter or array element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotKind {
    Primitive(PrimitiveKind),
    Reference,
}

impl SlotKind {
    /// Shape of a non-void type fragment
    pub(crate) fn from_fragment(fragment: &str) -> Option<Self> {
        match Fragment::classify(fragment) {
            Fragment::Void => None,
            Fragment::Primitive(kind) => Some(SlotKind::Primitive(kind)),
            Fragment::Class(_) | Fragment::Array(_) => Some(SlotKind::Reference),
        }
    }

    pub(crate) fn default_value(self) -> ManagedValue {
        match self {
            SlotKind::Primitive(kind) => kind.default_value(),
            SlotKind::Reference => ManagedValue::NULL,
        }
    }

    pub(crate) fn accepts(self, value: &ManagedValue) -> bool {
        match self {
            SlotKind::Primitive(kind) => value.primitive_kind() == Some(kind),
            SlotKind::Reference => matches!(value, ManagedValue::Ref(_)),
        }
    }

    pub(crate) fn is_float(self) -> bool {
        matches!(self, SlotKind::Primitive(kind) if kind.is_float())
    }
}

pub(crate) struct ClassRecord {
    pub info: Arc<ClassInfo>,
    pub fields: Vec<FieldId>,
    pub methods: Vec<MethodId>,
    /// Instance layout, superclass slots first
    pub layout: Vec<SlotKind>,
}

pub(crate) struct MethodRecord {
    pub info: Arc<MethodInfo>,
    pub body: MethodBody,
    /// One entry per descriptor parameter, rest array included
    pub params: Arc<[SlotKind]>,
}

pub(crate) struct FieldRecord {
    pub info: Arc<FieldInfo>,
    pub kind: SlotKind,
    /// Instance layout slot, or index into the static storage
    pub index: usize,
}

/// All classes known to the VM
#[derive(Default)]
pub(crate) struct ClassTable {
    classes: Vec<ClassRecord>,
    methods: Vec<MethodRecord>,
    fields: Vec<FieldRecord>,
    by_name: FxHashMap<Arc<str>, ClassId>,
    arrays: FxHashMap<TypeTag, ClassId>,
    statics: Vec<ManagedValue>,
}

impl ClassTable {
    /// Create an empty table
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn class(&self, id: ClassId) -> InteropResult<&ClassRecord> {
        self.classes
            .get(id.to_raw() as usize)
            .ok_or_else(|| InteropError::resolution(format!("unknown class id {}", id.to_raw())))
    }

    pub(crate) fn method(&self, id: MethodId) -> InteropResult<&MethodRecord> {
        self.methods
            .get(id.to_raw() as usize)
            .ok_or_else(|| InteropError::resolution(format!("unknown method id {}", id.to_raw())))
    }

    pub(crate) fn field(&self, id: FieldId) -> InteropResult<&FieldRecord> {
        self.fields
            .get(id.to_raw() as usize)
            .ok_or_else(|| InteropError::resolution(format!("unknown field id {}", id.to_raw())))
    }

    pub(crate) fn by_name(&self, name: &str) -> Option<ClassId> {
        self.by_name.get(name).copied()
    }

    pub(crate) fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub(crate) fn statics(&self) -> &[ManagedValue] {
        &self.statics
    }

    pub(crate) fn static_value(&self, index: usize) -> ManagedValue {
        self.statics[index]
    }

    pub(crate) fn set_static(&mut self, index: usize, value: ManagedValue) {
        self.statics[index] = value;
    }

    // ========================================================================
    // Definition
    // ========================================================================

    /// Define a class; `object` is the universal base (absent while bootstrapping it)
    pub(crate) fn define(&mut self, def: ClassDef, object: Option<ClassId>) -> InteropResult<ClassId> {
        if self.by_name.contains_key(def.name.as_str()) {
            return Err(InteropError::resolution(format!(
                "class {} is already defined",
                def.name
            )));
        }
        let super_class = def.super_class.or(object);
        let mut layout = match super_class {
            Some(sup) => {
                let record = self.class(sup)?;
                if record.info.is_interface() {
                    return Err(InteropError::resolution(format!(
                        "class {} cannot extend interface {}",
                        def.name, record.info.name
                    )));
                }
                record.layout.clone()
            }
            None => Vec::new(),
        };
        for iface in &def.interfaces {
            if !self.class(*iface)?.info.is_interface() {
                return Err(InteropError::resolution(format!(
                    "class {} implements non-interface {}",
                    def.name,
                    iface.to_raw()
                )));
            }
        }

        let id = ClassId::from_raw(self.classes.len() as u32);
        let strings: Arc<[Arc<str>]> = def.script_strings.into();

        let mut field_ids = Vec::with_capacity(def.fields.len());
        for field in def.fields {
            let kind = single_fragment(&field.descriptor)?;
            let index = if field.is_static {
                self.statics.push(kind.default_value());
                self.statics.len() - 1
            } else {
                layout.push(kind);
                layout.len() - 1
            };
            let fid = FieldId::from_raw(self.fields.len() as u32);
            self.fields.push(FieldRecord {
                info: Arc::new(FieldInfo {
                    id: fid,
                    name: field.name.into(),
                    descriptor: field.descriptor.into(),
                    declaring: id,
                    is_static: field.is_static,
                    visibility: field.visibility,
                }),
                kind,
                index,
            });
            field_ids.push(fid);
        }

        let mut method_ids = Vec::with_capacity(def.methods.len());
        for method in def.methods {
            let params = param_slots(&method.descriptor)?;
            if method.has_rest && !last_param_is_array(&method.descriptor)? {
                return Err(InteropError::resolution(format!(
                    "rest parameter of {}.{} must be an array",
                    def.name, method.name
                )));
            }
            let fixed = params.len() - method.has_rest as usize;
            let mandatory = method.mandatory.unwrap_or(fixed);
            if mandatory > fixed {
                return Err(InteropError::resolution(format!(
                    "{}.{} declares {} mandatory of {} parameters",
                    def.name, method.name, mandatory, fixed
                )));
            }
            if method.is_constructor && !method.descriptor.starts_with('V') {
                return Err(InteropError::resolution(format!(
                    "constructor of {} must return void",
                    def.name
                )));
            }
            match method.accessor {
                Some(AccessorKind::Getter) if fixed != 0 || method.descriptor.starts_with('V') => {
                    return Err(InteropError::resolution(format!(
                        "getter {}.{} must take no parameters and return a value",
                        def.name, method.name
                    )));
                }
                Some(AccessorKind::Setter) if fixed != 1 => {
                    return Err(InteropError::resolution(format!(
                        "setter {}.{} must take one parameter",
                        def.name, method.name
                    )));
                }
                _ => {}
            }
            if let Some(decl) = method.script_decl {
                if decl.len == 0 || (decl.offset + decl.len) as usize > strings.len() {
                    return Err(InteropError::resolution(format!(
                        "script name of {}.{} is outside the constant-string table",
                        def.name, method.name
                    )));
                }
            }
            let mid = MethodId::from_raw(self.methods.len() as u32);
            self.methods.push(MethodRecord {
                info: Arc::new(MethodInfo {
                    id: mid,
                    name: method.name.into(),
                    descriptor: method.descriptor.into(),
                    declaring: id,
                    is_static: method.is_static,
                    is_constructor: method.is_constructor,
                    visibility: method.visibility,
                    accessor: method.accessor,
                    param_count: fixed,
                    mandatory,
                    has_rest: method.has_rest,
                    body: method.body.kind(),
                    script_decl: method.script_decl,
                }),
                body: method.body,
                params: params.into(),
            });
            method_ids.push(mid);
        }

        let info = Arc::new(ClassInfo {
            id,
            name: def.name.into(),
            kind: def.kind,
            super_class,
            interfaces: def.interfaces,
            is_abstract: def.is_abstract,
            builtin_shape: def.builtin_shape,
            script_module: def.script_module,
            script_strings: strings,
        });
        self.by_name.insert(info.name.clone(), id);
        self.classes.push(ClassRecord {
            info,
            fields: field_ids,
            methods: method_ids,
            layout,
        });
        Ok(id)
    }

    /// Array class for a component type, defined on first request
    pub(crate) fn array_class(&mut self, component: TypeTag, object: ClassId) -> InteropResult<ClassId> {
        if let Some(id) = self.arrays.get(&component) {
            return Ok(*id);
        }
        let name = format!("[{}", self.fragment_of(component)?);
        let id = self.define(ClassDef::new(name).kind(ClassKind::Array(component)), Some(object))?;
        self.arrays.insert(component, id);
        Ok(id)
    }

    fn fragment_of(&self, tag: TypeTag) -> InteropResult<String> {
        match tag {
            TypeTag::Void => Err(InteropError::type_mismatch("array component", "void")),
            TypeTag::Primitive(kind) => Ok(kind.descriptor_char().to_string()),
            TypeTag::Ref(class) => {
                let info = &self.class(class)?.info;
                Ok(match info.kind {
                    ClassKind::Array(_) => info.name.to_string(),
                    _ => descriptor::class_fragment(&info.name),
                })
            }
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub(crate) fn is_assignable(&self, class: ClassId, target: ClassId) -> bool {
        if class == target {
            return true;
        }
        let (Ok(record), Ok(target_record)) = (self.class(class), self.class(target)) else {
            return false;
        };
        if let (ClassKind::Array(TypeTag::Ref(c)), ClassKind::Array(TypeTag::Ref(t))) =
            (record.info.kind, target_record.info.kind)
        {
            return self.is_assignable(c, t);
        }
        if record
            .info
            .interfaces
            .iter()
            .any(|iface| self.is_assignable(*iface, target))
        {
            return true;
        }
        match record.info.super_class {
            Some(sup) => self.is_assignable(sup, target),
            None => false,
        }
    }

    pub(crate) fn find_field(&self, class: ClassId, name: &str) -> Option<&FieldRecord> {
        let mut current = Some(class);
        while let Some(id) = current {
            let record = self.class(id).ok()?;
            for fid in &record.fields {
                let field = &self.fields[fid.to_raw() as usize];
                if &*field.info.name == name {
                    return Some(field);
                }
            }
            current = record.info.super_class;
        }
        None
    }

    /// Most derived concrete implementation of `name` + `descriptor` visible from `class`
    pub(crate) fn find_virtual(&self, class: ClassId, name: &str, descriptor: &str) -> Option<MethodId> {
        let mut current = Some(class);
        while let Some(id) = current {
            let record = self.class(id).ok()?;
            for mid in &record.methods {
                let info = &self.methods[mid.to_raw() as usize].info;
                if !info.is_static
                    && !info.is_constructor
                    && info.visibility != Visibility::Private
                    && info.body != tandem_sdk::BodyKind::Abstract
                    && &*info.name == name
                    && &*info.descriptor == descriptor
                {
                    return Some(*mid);
                }
            }
            current = record.info.super_class;
        }
        None
    }

    pub(crate) fn method_by_name(&self, class: ClassId, name: &str) -> Option<MethodId> {
        let record = self.class(class).ok()?;
        record
            .methods
            .iter()
            .copied()
            .find(|mid| &*self.methods[mid.to_raw() as usize].info.name == name)
    }
}

fn single_fragment(descriptor: &str) -> InteropResult<SlotKind> {
    let mut cursor = DescriptorCursor::new(descriptor);
    let fragment = cursor.next_fragment()?;
    match (fragment.and_then(SlotKind::from_fragment), cursor.is_exhausted()) {
        (Some(kind), true) => Ok(kind),
        _ => Err(InteropError::resolution(format!(
            "invalid field descriptor '{}'",
            descriptor
        ))),
    }
}

fn param_slots(descriptor: &str) -> InteropResult<Vec<SlotKind>> {
    descriptor::param_count(descriptor)?;
    let mut cursor = DescriptorCursor::new(descriptor);
    cursor.next_fragment()?;
    let mut slots = Vec::new();
    while let Some(fragment) = cursor.next_fragment()? {
        slots.extend(SlotKind::from_fragment(fragment));
    }
    Ok(slots)
}

fn last_param_is_array(descriptor: &str) -> InteropResult<bool> {
    let mut cursor = DescriptorCursor::new(descriptor);
    cursor.next_fragment()?;
    let mut last = None;
    while let Some(fragment) = cursor.next_fragment()? {
        last = Some(fragment);
    }
    Ok(matches!(last.map(Fragment::classify), Some(Fragment::Array(_))))
}
