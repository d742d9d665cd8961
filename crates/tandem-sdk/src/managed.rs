//! Managed runtime vocabulary ("Runtime A")
//!
//! Defines the statically-typed side of the boundary: object and class
//! identities, typed values, reflection records, class definitions and the
//! [`ManagedRuntime`] trait the bridge programs against.

use std::fmt;
use std::sync::Arc;

use crate::abi::ArgBuffer;
use crate::error::InteropResult;
use crate::script::BuiltinShape;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            /// Create from the raw index
            #[inline]
            pub const fn from_raw(raw: u32) -> Self {
                Self(raw)
            }

            /// Get the raw index
            #[inline]
            pub const fn to_raw(self) -> u32 {
                self.0
            }
        }
    };
}

id_type!(
    /// Identity of a managed heap object (never 0; 0 encodes `null` in raw slots)
    ObjectRef
);
id_type!(
    /// Identity of a managed class
    ClassId
);
id_type!(
    /// Identity of a managed method
    MethodId
);
id_type!(
    /// Identity of a managed field
    FieldId
);
id_type!(
    /// Identity of a managed worker thread
    WorkerId
);
id_type!(
    /// Identity of an open handle scope (its depth on the worker's scope stack)
    ScopeId
);

/// A rooted local inside a handle scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalSlot {
    /// Scope owning the slot
    pub scope: ScopeId,
    /// Position inside the scope
    pub index: usize,
}

// ============================================================================
// Primitive kinds and type tags
// ============================================================================

/// Primitive parameter/field kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    /// `Z`
    Bool,
    /// `B`
    I8,
    /// `C` (UTF-16 code unit)
    Char,
    /// `S`
    I16,
    /// `I`
    I32,
    /// `J`
    I64,
    /// `F`
    F32,
    /// `D`
    F64,
}

impl PrimitiveKind {
    /// Descriptor character of this kind
    pub const fn descriptor_char(self) -> char {
        match self {
            PrimitiveKind::Bool => 'Z',
            PrimitiveKind::I8 => 'B',
            PrimitiveKind::Char => 'C',
            PrimitiveKind::I16 => 'S',
            PrimitiveKind::I32 => 'I',
            PrimitiveKind::I64 => 'J',
            PrimitiveKind::F32 => 'F',
            PrimitiveKind::F64 => 'D',
        }
    }

    /// Parse a descriptor character
    pub const fn from_descriptor_char(c: char) -> Option<Self> {
        match c {
            'Z' => Some(PrimitiveKind::Bool),
            'B' => Some(PrimitiveKind::I8),
            'C' => Some(PrimitiveKind::Char),
            'S' => Some(PrimitiveKind::I16),
            'I' => Some(PrimitiveKind::I32),
            'J' => Some(PrimitiveKind::I64),
            'F' => Some(PrimitiveKind::F32),
            'D' => Some(PrimitiveKind::F64),
            _ => None,
        }
    }

    /// Whether values of this kind travel in floating-point registers
    pub const fn is_float(self) -> bool {
        matches!(self, PrimitiveKind::F32 | PrimitiveKind::F64)
    }

    /// Human-readable name
    pub const fn name(self) -> &'static str {
        match self {
            PrimitiveKind::Bool => "boolean",
            PrimitiveKind::I8 => "byte",
            PrimitiveKind::Char => "char",
            PrimitiveKind::I16 => "short",
            PrimitiveKind::I32 => "int",
            PrimitiveKind::I64 => "long",
            PrimitiveKind::F32 => "float",
            PrimitiveKind::F64 => "double",
        }
    }

    /// Zero value of this kind
    pub const fn default_value(self) -> ManagedValue {
        match self {
            PrimitiveKind::Bool => ManagedValue::Bool(false),
            PrimitiveKind::I8 => ManagedValue::I8(0),
            PrimitiveKind::Char => ManagedValue::Char(0),
            PrimitiveKind::I16 => ManagedValue::I16(0),
            PrimitiveKind::I32 => ManagedValue::I32(0),
            PrimitiveKind::I64 => ManagedValue::I64(0),
            PrimitiveKind::F32 => ManagedValue::F32(0.0),
            PrimitiveKind::F64 => ManagedValue::F64(0.0),
        }
    }
}

/// Resolved type of a parameter, return value, field or array component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    /// No value (return position only)
    Void,
    /// A primitive
    Primitive(PrimitiveKind),
    /// A reference to an instance of the class (or a subclass)
    Ref(ClassId),
}

impl TypeTag {
    /// Default value for a slot of this type (zero, `false` or `null`)
    pub const fn default_value(self) -> ManagedValue {
        match self {
            TypeTag::Void => ManagedValue::Void,
            TypeTag::Primitive(kind) => kind.default_value(),
            TypeTag::Ref(_) => ManagedValue::Ref(None),
        }
    }

    /// Whether this is a reference type
    pub const fn is_ref(self) -> bool {
        matches!(self, TypeTag::Ref(_))
    }

    /// Whether values of this type travel in floating-point registers
    pub const fn is_float(self) -> bool {
        match self {
            TypeTag::Primitive(kind) => kind.is_float(),
            _ => false,
        }
    }
}

// ============================================================================
// Managed Value
// ============================================================================

/// A typed managed value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ManagedValue {
    /// Result of a `void` method
    Void,
    /// `boolean`
    Bool(bool),
    /// `byte`
    I8(i8),
    /// `char`
    Char(u16),
    /// `short`
    I16(i16),
    /// `int`
    I32(i32),
    /// `long`
    I64(i64),
    /// `float`
    F32(f32),
    /// `double`
    F64(f64),
    /// Object reference, `None` is `null`
    Ref(Option<ObjectRef>),
}

impl ManagedValue {
    /// The `null` reference
    pub const NULL: ManagedValue = ManagedValue::Ref(None);

    /// Wrap an object reference
    pub const fn object(obj: ObjectRef) -> Self {
        ManagedValue::Ref(Some(obj))
    }

    /// Primitive kind, if this is a primitive
    pub const fn primitive_kind(&self) -> Option<PrimitiveKind> {
        match self {
            ManagedValue::Bool(_) => Some(PrimitiveKind::Bool),
            ManagedValue::I8(_) => Some(PrimitiveKind::I8),
            ManagedValue::Char(_) => Some(PrimitiveKind::Char),
            ManagedValue::I16(_) => Some(PrimitiveKind::I16),
            ManagedValue::I32(_) => Some(PrimitiveKind::I32),
            ManagedValue::I64(_) => Some(PrimitiveKind::I64),
            ManagedValue::F32(_) => Some(PrimitiveKind::F32),
            ManagedValue::F64(_) => Some(PrimitiveKind::F64),
            ManagedValue::Void | ManagedValue::Ref(_) => None,
        }
    }

    /// Referenced object, if this is a non-null reference
    pub const fn as_object(&self) -> Option<ObjectRef> {
        match self {
            ManagedValue::Ref(obj) => *obj,
            _ => None,
        }
    }

    /// Whether this is the `null` reference
    pub const fn is_null(&self) -> bool {
        matches!(self, ManagedValue::Ref(None))
    }

    /// Extract a `boolean`
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            ManagedValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Extract an `int`
    pub const fn as_i32(&self) -> Option<i32> {
        match self {
            ManagedValue::I32(v) => Some(*v),
            _ => None,
        }
    }

    /// Extract a `long`
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            ManagedValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Extract a `double`
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            ManagedValue::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// Whether the value may be stored in a slot of type `tag`
    ///
    /// Reference compatibility with the class is not checked here.
    pub fn fits(&self, tag: TypeTag) -> bool {
        match (self, tag) {
            (ManagedValue::Void, TypeTag::Void) => true,
            (ManagedValue::Ref(_), TypeTag::Ref(_)) => true,
            (value, TypeTag::Primitive(kind)) => value.primitive_kind() == Some(kind),
            _ => false,
        }
    }

    /// Name of the value's type
    pub const fn type_name(&self) -> &'static str {
        match self {
            ManagedValue::Void => "void",
            ManagedValue::Ref(None) => "null",
            ManagedValue::Ref(Some(_)) => "object",
            ManagedValue::Bool(_) => PrimitiveKind::Bool.name(),
            ManagedValue::I8(_) => PrimitiveKind::I8.name(),
            ManagedValue::Char(_) => PrimitiveKind::Char.name(),
            ManagedValue::I16(_) => PrimitiveKind::I16.name(),
            ManagedValue::I32(_) => PrimitiveKind::I32.name(),
            ManagedValue::I64(_) => PrimitiveKind::I64.name(),
            ManagedValue::F32(_) => PrimitiveKind::F32.name(),
            ManagedValue::F64(_) => PrimitiveKind::F64.name(),
        }
    }

    /// Raw 64-bit slot encoding used by the calling convention
    pub fn to_bits(self) -> u64 {
        match self {
            ManagedValue::Void => 0,
            ManagedValue::Bool(b) => b as u64,
            ManagedValue::I8(v) => v as i64 as u64,
            ManagedValue::Char(v) => v as u64,
            ManagedValue::I16(v) => v as i64 as u64,
            ManagedValue::I32(v) => v as i64 as u64,
            ManagedValue::I64(v) => v as u64,
            ManagedValue::F32(v) => v.to_bits() as u64,
            ManagedValue::F64(v) => v.to_bits(),
            ManagedValue::Ref(None) => 0,
            ManagedValue::Ref(Some(obj)) => obj.to_raw() as u64,
        }
    }

    /// Decode a raw slot according to `tag`
    pub fn from_bits(tag: TypeTag, bits: u64) -> Self {
        match tag {
            TypeTag::Void => ManagedValue::Void,
            TypeTag::Ref(_) => {
                if bits == 0 {
                    ManagedValue::Ref(None)
                } else {
                    ManagedValue::Ref(Some(ObjectRef::from_raw(bits as u32)))
                }
            }
            TypeTag::Primitive(kind) => match kind {
                PrimitiveKind::Bool => ManagedValue::Bool(bits != 0),
                PrimitiveKind::I8 => ManagedValue::I8(bits as i8),
                PrimitiveKind::Char => ManagedValue::Char(bits as u16),
                PrimitiveKind::I16 => ManagedValue::I16(bits as i16),
                PrimitiveKind::I32 => ManagedValue::I32(bits as i32),
                PrimitiveKind::I64 => ManagedValue::I64(bits as i64),
                PrimitiveKind::F32 => ManagedValue::F32(f32::from_bits(bits as u32)),
                PrimitiveKind::F64 => ManagedValue::F64(f64::from_bits(bits)),
            },
        }
    }
}

// ============================================================================
// Reflection records
// ============================================================================

/// Member visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    /// Visible everywhere
    Public,
    /// Visible to subclasses
    Protected,
    /// Visible to the declaring class only
    Private,
}

/// Accessor role of a method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessorKind {
    /// `get name(): T`
    Getter,
    /// `set name(v: T)`
    Setter,
}

/// Shape of a class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassKind {
    /// Ordinary class
    Class,
    /// Interface with any number of abstract methods
    Interface,
    /// Interface with a single `invoke` method, converted to script functions
    FunctionalInterface,
    /// Enumeration: a `value` field and one static constant per member
    Enum,
    /// Plain data class exchanged as a script object literal
    Record,
    /// Array with the given component type
    Array(TypeTag),
}

/// Execution mode of the current worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionMode {
    /// Running managed code; the managed collector must treat the thread as a mutator
    Managed,
    /// Running foreign code; managed invariants are suspended
    Native,
}

/// Slice of a class's constant-string table naming a script target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScriptDecl {
    /// First segment
    pub offset: u32,
    /// Number of segments
    pub len: u32,
}

/// Reflection view of a class
#[derive(Debug, Clone)]
pub struct ClassInfo {
    /// Class identity
    pub id: ClassId,
    /// Fully qualified dotted name
    pub name: Arc<str>,
    /// Shape of the class
    pub kind: ClassKind,
    /// Direct superclass (`None` only for the universal base class)
    pub super_class: Option<ClassId>,
    /// Directly implemented interfaces
    pub interfaces: Vec<ClassId>,
    /// Whether instances cannot be created directly
    pub is_abstract: bool,
    /// Script built-in type this class is made to resemble
    pub builtin_shape: Option<BuiltinShape>,
    /// Script module that hosts the class's namespaced call targets
    pub script_module: Option<Arc<str>>,
    /// Constant strings used by call-into-script targets
    pub script_strings: Arc<[Arc<str>]>,
}

impl ClassInfo {
    /// Whether the class is an interface of any kind
    pub fn is_interface(&self) -> bool {
        matches!(
            self.kind,
            ClassKind::Interface | ClassKind::FunctionalInterface
        )
    }

    /// Component type, for array classes
    pub fn component(&self) -> Option<TypeTag> {
        match self.kind {
            ClassKind::Array(tag) => Some(tag),
            _ => None,
        }
    }
}

/// Reflection view of a field
#[derive(Debug, Clone)]
pub struct FieldInfo {
    /// Field identity
    pub id: FieldId,
    /// Field name
    pub name: Arc<str>,
    /// Type descriptor fragment
    pub descriptor: Arc<str>,
    /// Declaring class
    pub declaring: ClassId,
    /// Whether the field is static
    pub is_static: bool,
    /// Visibility
    pub visibility: Visibility,
}

/// How a method body is implemented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyKind {
    /// Rust closure executed by the managed runtime
    Native,
    /// Stub that calls into the script runtime through the bridge
    Bridge,
    /// No body
    Abstract,
}

/// Reflection view of a method
#[derive(Debug, Clone)]
pub struct MethodInfo {
    /// Method identity
    pub id: MethodId,
    /// Method name (`<ctor>` for constructors)
    pub name: Arc<str>,
    /// Descriptor, return type first
    pub descriptor: Arc<str>,
    /// Declaring class
    pub declaring: ClassId,
    /// Whether the method is static
    pub is_static: bool,
    /// Whether the method is a constructor
    pub is_constructor: bool,
    /// Visibility
    pub visibility: Visibility,
    /// Getter/setter role
    pub accessor: Option<AccessorKind>,
    /// Parameters excluding a trailing rest parameter
    pub param_count: usize,
    /// Parameters that must be supplied
    pub mandatory: usize,
    /// Whether the last descriptor parameter is a rest array
    pub has_rest: bool,
    /// Body implementation
    pub body: BodyKind,
    /// Qualified script name for bridge methods
    pub script_decl: Option<ScriptDecl>,
}

impl MethodInfo {
    /// Whether a call with `argc` arguments satisfies this method's arity
    pub fn accepts(&self, argc: usize) -> bool {
        argc >= self.mandatory && (self.has_rest || argc <= self.param_count)
    }

    /// Number of descriptor parameters, rest array included
    pub fn descriptor_params(&self) -> usize {
        self.param_count + self.has_rest as usize
    }

    /// Whether the body calls into the script runtime
    pub fn is_bridge(&self) -> bool {
        self.body == BodyKind::Bridge
    }
}

// ============================================================================
// Class definitions
// ============================================================================

/// Native method body
///
/// Receives the runtime, the receiver (absent for static methods) and the
/// converted arguments. `Err` carries a thrown exception object.
pub type NativeMethod = Arc<
    dyn Fn(&dyn ManagedRuntime, Option<ObjectRef>, &[ManagedValue]) -> Result<ManagedValue, ObjectRef>
        + Send
        + Sync,
>;

/// Method body supplied at class definition
#[derive(Clone)]
pub enum MethodBody {
    /// Rust closure
    Native(NativeMethod),
    /// Call into the script runtime through the installed bridge
    Bridge,
    /// No body
    Abstract,
}

impl MethodBody {
    /// Reflection view of this body
    pub fn kind(&self) -> BodyKind {
        match self {
            MethodBody::Native(_) => BodyKind::Native,
            MethodBody::Bridge => BodyKind::Bridge,
            MethodBody::Abstract => BodyKind::Abstract,
        }
    }
}

impl fmt::Debug for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MethodBody::{:?}", self.kind())
    }
}

/// Name used for constructors
pub const CONSTRUCTOR_NAME: &str = "<ctor>";

/// Field declaration
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Type descriptor fragment
    pub descriptor: String,
    /// Whether the field is static
    pub is_static: bool,
    /// Visibility
    pub visibility: Visibility,
}

impl FieldDef {
    /// Public instance field
    pub fn instance(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            is_static: false,
            visibility: Visibility::Public,
        }
    }

    /// Public static field
    pub fn static_field(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            is_static: true,
            ..Self::instance(name, descriptor)
        }
    }

    /// Make the field private
    pub fn private(mut self) -> Self {
        self.visibility = Visibility::Private;
        self
    }
}

/// Method declaration
#[derive(Debug, Clone)]
pub struct MethodDef {
    /// Method name
    pub name: String,
    /// Descriptor, return type first
    pub descriptor: String,
    /// Whether the method is static
    pub is_static: bool,
    /// Whether the method is a constructor
    pub is_constructor: bool,
    /// Visibility
    pub visibility: Visibility,
    /// Getter/setter role
    pub accessor: Option<AccessorKind>,
    /// Mandatory parameter count (`None` = every fixed parameter)
    pub mandatory: Option<usize>,
    /// Whether the last parameter is a rest array
    pub has_rest: bool,
    /// Body
    pub body: MethodBody,
    /// Qualified script name for bridge methods
    pub script_decl: Option<ScriptDecl>,
}

impl MethodDef {
    fn with_body(name: impl Into<String>, descriptor: impl Into<String>, body: MethodBody) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            is_static: false,
            is_constructor: false,
            visibility: Visibility::Public,
            accessor: None,
            mandatory: None,
            has_rest: false,
            body,
            script_decl: None,
        }
    }

    /// Instance method implemented by a Rust closure
    pub fn native<F>(name: impl Into<String>, descriptor: impl Into<String>, f: F) -> Self
    where
        F: Fn(&dyn ManagedRuntime, Option<ObjectRef>, &[ManagedValue]) -> Result<ManagedValue, ObjectRef>
            + Send
            + Sync
            + 'static,
    {
        Self::with_body(name, descriptor, MethodBody::Native(Arc::new(f)))
    }

    /// Constructor implemented by a Rust closure (descriptor returns `V`)
    pub fn constructor<F>(descriptor: impl Into<String>, f: F) -> Self
    where
        F: Fn(&dyn ManagedRuntime, Option<ObjectRef>, &[ManagedValue]) -> Result<ManagedValue, ObjectRef>
            + Send
            + Sync
            + 'static,
    {
        let mut def = Self::native(CONSTRUCTOR_NAME, descriptor, f);
        def.is_constructor = true;
        def
    }

    /// Method whose body calls into the script runtime
    pub fn bridge(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self::with_body(name, descriptor, MethodBody::Bridge)
    }

    /// Abstract method
    pub fn abstract_method(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self::with_body(name, descriptor, MethodBody::Abstract)
    }

    /// Make the method static
    pub fn static_method(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Make the method private
    pub fn private(mut self) -> Self {
        self.visibility = Visibility::Private;
        self
    }

    /// Make the method protected
    pub fn protected(mut self) -> Self {
        self.visibility = Visibility::Protected;
        self
    }

    /// Mark the method as the getter of the property named after it
    pub fn getter(mut self) -> Self {
        self.accessor = Some(AccessorKind::Getter);
        self
    }

    /// Mark the method as the setter of the property named after it
    pub fn setter(mut self) -> Self {
        self.accessor = Some(AccessorKind::Setter);
        self
    }

    /// Parameters from `mandatory` on may be omitted
    pub fn optional_from(mut self, mandatory: usize) -> Self {
        self.mandatory = Some(mandatory);
        self
    }

    /// The last descriptor parameter is a rest array
    pub fn rest(mut self) -> Self {
        self.has_rest = true;
        self
    }

    /// Name the script target through the class's constant-string table
    pub fn script_name(mut self, offset: u32, len: u32) -> Self {
        self.script_decl = Some(ScriptDecl { offset, len });
        self
    }
}

/// Class declaration passed to [`ManagedRuntime::define_class`]
#[derive(Debug, Clone)]
pub struct ClassDef {
    /// Fully qualified dotted name
    pub name: String,
    /// Shape of the class
    pub kind: ClassKind,
    /// Superclass (`None` means the universal base class)
    pub super_class: Option<ClassId>,
    /// Implemented interfaces
    pub interfaces: Vec<ClassId>,
    /// Whether instances cannot be created directly
    pub is_abstract: bool,
    /// Script built-in type this class resembles
    pub builtin_shape: Option<BuiltinShape>,
    /// Script module hosting namespaced targets
    pub script_module: Option<Arc<str>>,
    /// Constant-string table
    pub script_strings: Vec<Arc<str>>,
    /// Declared fields
    pub fields: Vec<FieldDef>,
    /// Declared methods
    pub methods: Vec<MethodDef>,
}

impl ClassDef {
    /// Start an ordinary class definition
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ClassKind::Class,
            super_class: None,
            interfaces: Vec::new(),
            is_abstract: false,
            builtin_shape: None,
            script_module: None,
            script_strings: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Set the class kind
    pub fn kind(mut self, kind: ClassKind) -> Self {
        self.kind = kind;
        if matches!(kind, ClassKind::Interface | ClassKind::FunctionalInterface) {
            self.is_abstract = true;
        }
        self
    }

    /// Set the superclass
    pub fn extends(mut self, super_class: ClassId) -> Self {
        self.super_class = Some(super_class);
        self
    }

    /// Add an implemented interface
    pub fn implements(mut self, interface: ClassId) -> Self {
        self.interfaces.push(interface);
        self
    }

    /// Make the class abstract
    pub fn abstract_class(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Make the class resemble a script built-in
    pub fn mimics(mut self, shape: BuiltinShape) -> Self {
        self.builtin_shape = Some(shape);
        self
    }

    /// Host namespaced targets in a script module
    pub fn script_module(mut self, module: impl Into<Arc<str>>) -> Self {
        self.script_module = Some(module.into());
        self
    }

    /// Append constant strings
    pub fn script_strings<I, S>(mut self, strings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        self.script_strings.extend(strings.into_iter().map(Into::into));
        self
    }

    /// Add a field
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Add a method
    pub fn method(mut self, method: MethodDef) -> Self {
        self.methods.push(method);
        self
    }
}

// ============================================================================
// Well-known classes
// ============================================================================

/// Classes every managed runtime provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WellKnownClass {
    /// Universal base class
    Object,
    /// Immutable string
    String,
    /// Opaque box around a script value
    ScriptValue,
    /// Base error class with a `message` field
    Error,
    /// Raised for bridge conversion and resolution failures
    TypeError,
    /// Managed error carrying a foreign script exception in its `value` field
    ScriptError,
    /// Boxed `boolean`
    Boolean,
    /// Boxed `byte`
    Byte,
    /// Boxed `char`
    Char,
    /// Boxed `short`
    Short,
    /// Boxed `int`
    Int,
    /// Boxed `long`
    Long,
    /// Boxed `float`
    Float,
    /// Boxed `double`
    Double,
}

impl WellKnownClass {
    /// Every well-known class, in bootstrap order
    pub const ALL: [WellKnownClass; 14] = [
        WellKnownClass::Object,
        WellKnownClass::String,
        WellKnownClass::ScriptValue,
        WellKnownClass::Error,
        WellKnownClass::TypeError,
        WellKnownClass::ScriptError,
        WellKnownClass::Boolean,
        WellKnownClass::Byte,
        WellKnownClass::Char,
        WellKnownClass::Short,
        WellKnownClass::Int,
        WellKnownClass::Long,
        WellKnownClass::Float,
        WellKnownClass::Double,
    ];

    /// Fully qualified class name
    pub const fn name(self) -> &'static str {
        match self {
            WellKnownClass::Object => "std.core.Object",
            WellKnownClass::String => "std.core.String",
            WellKnownClass::ScriptValue => "std.interop.ScriptValue",
            WellKnownClass::Error => "std.core.Error",
            WellKnownClass::TypeError => "std.core.TypeError",
            WellKnownClass::ScriptError => "std.interop.ScriptError",
            WellKnownClass::Boolean => "std.core.Boolean",
            WellKnownClass::Byte => "std.core.Byte",
            WellKnownClass::Char => "std.core.Char",
            WellKnownClass::Short => "std.core.Short",
            WellKnownClass::Int => "std.core.Int",
            WellKnownClass::Long => "std.core.Long",
            WellKnownClass::Float => "std.core.Float",
            WellKnownClass::Double => "std.core.Double",
        }
    }

    /// Primitive kind held by a numeric box class
    pub const fn boxed_kind(self) -> Option<PrimitiveKind> {
        match self {
            WellKnownClass::Boolean => Some(PrimitiveKind::Bool),
            WellKnownClass::Byte => Some(PrimitiveKind::I8),
            WellKnownClass::Char => Some(PrimitiveKind::Char),
            WellKnownClass::Short => Some(PrimitiveKind::I16),
            WellKnownClass::Int => Some(PrimitiveKind::I32),
            WellKnownClass::Long => Some(PrimitiveKind::I64),
            WellKnownClass::Float => Some(PrimitiveKind::F32),
            WellKnownClass::Double => Some(PrimitiveKind::F64),
            _ => None,
        }
    }

    /// Box class for a primitive kind
    pub const fn box_for(kind: PrimitiveKind) -> Self {
        match kind {
            PrimitiveKind::Bool => WellKnownClass::Boolean,
            PrimitiveKind::I8 => WellKnownClass::Byte,
            PrimitiveKind::Char => WellKnownClass::Char,
            PrimitiveKind::I16 => WellKnownClass::Short,
            PrimitiveKind::I32 => WellKnownClass::Int,
            PrimitiveKind::I64 => WellKnownClass::Long,
            PrimitiveKind::F32 => WellKnownClass::Float,
            PrimitiveKind::F64 => WellKnownClass::Double,
        }
    }
}

// ============================================================================
// Bridge hooks
// ============================================================================

/// Entry points the managed runtime calls into the bridge
pub trait BridgeHooks: Send + Sync {
    /// One-time initializer for a class declaring bridge methods, run before
    /// the first bridge method of the class executes
    fn initialize_class(&self, class: ClassId) -> Result<(), ObjectRef>;

    /// Execute a bridge method; `args` follows the bridge calling convention
    fn call_script(&self, method: MethodId, args: &ArgBuffer) -> Result<ManagedValue, ObjectRef>;

    /// An object carrying an opaque payload was collected
    fn finalize_payload(&self, payload: u64);
}

// ============================================================================
// Managed runtime interface
// ============================================================================

/// Operations the bridge consumes from the managed runtime.
///
/// Exceptions are `Err(ObjectRef)` results of [`invoke`](Self::invoke);
/// every other failure is an [`InteropError`](crate::InteropError).
pub trait ManagedRuntime: Send + Sync {
    // ========================================================================
    // Reflection
    // ========================================================================

    /// Class id of a well-known class
    fn well_known(&self, class: WellKnownClass) -> ClassId;

    /// Reflection view of a class
    fn class_info(&self, class: ClassId) -> InteropResult<Arc<ClassInfo>>;

    /// Look a class up by its qualified name
    fn class_by_name(&self, name: &str) -> Option<ClassId>;

    /// Array class for a component type, created on first request
    fn array_class(&self, component: TypeTag) -> InteropResult<ClassId>;

    /// Fields declared by the class itself
    fn class_fields(&self, class: ClassId) -> InteropResult<Vec<Arc<FieldInfo>>>;

    /// Methods declared by the class itself
    fn class_methods(&self, class: ClassId) -> InteropResult<Vec<Arc<MethodInfo>>>;

    /// Reflection view of a method
    fn method_info(&self, method: MethodId) -> InteropResult<Arc<MethodInfo>>;

    /// Reflection view of a field
    fn field_info(&self, field: FieldId) -> InteropResult<Arc<FieldInfo>>;

    /// Find a field by name on the class or its superclasses
    fn find_field(&self, class: ClassId, name: &str) -> Option<Arc<FieldInfo>>;

    /// Whether instances of `class` may be stored where `target` is expected
    fn is_assignable(&self, class: ClassId, target: ClassId) -> bool;

    /// Define a class at run time
    fn define_class(&self, def: ClassDef) -> InteropResult<ClassId>;

    // ========================================================================
    // Objects
    // ========================================================================

    /// Runtime class of an object
    fn class_of(&self, obj: ObjectRef) -> InteropResult<ClassId>;

    /// Allocate an instance with default field values (constructor not run)
    fn alloc_object(&self, class: ClassId) -> InteropResult<ObjectRef>;

    /// Allocate a string
    fn alloc_string(&self, s: &str) -> ObjectRef;

    /// Read a string's contents
    fn read_string(&self, obj: ObjectRef) -> InteropResult<Arc<str>>;

    /// Allocate an array of an array class, filled with default values
    fn alloc_array(&self, class: ClassId, len: usize) -> InteropResult<ObjectRef>;

    /// Array length
    fn array_len(&self, obj: ObjectRef) -> InteropResult<usize>;

    /// Array element
    fn array_get(&self, obj: ObjectRef, index: usize) -> InteropResult<ManagedValue>;

    /// Store an array element
    fn array_set(&self, obj: ObjectRef, index: usize, value: ManagedValue) -> InteropResult<()>;

    /// Read a field (`obj` is `None` for static fields)
    fn get_field(&self, obj: Option<ObjectRef>, field: FieldId) -> InteropResult<ManagedValue>;

    /// Write a field (`obj` is `None` for static fields)
    fn set_field(&self, obj: Option<ObjectRef>, field: FieldId, value: ManagedValue) -> InteropResult<()>;

    /// Opaque 64-bit payload of an object
    fn opaque_payload(&self, obj: ObjectRef) -> InteropResult<Option<u64>>;

    /// Attach an opaque payload, finalized through [`BridgeHooks::finalize_payload`]
    fn set_opaque_payload(&self, obj: ObjectRef, payload: u64) -> InteropResult<()>;

    /// Interop index stored in the object header
    fn interop_index(&self, obj: ObjectRef) -> Option<u32>;

    /// Store or clear the interop index in the object header
    fn set_interop_index(&self, obj: ObjectRef, index: Option<u32>);

    /// Allocate an error of `class` with its `message` field set
    fn new_error(&self, class: ClassId, message: &str) -> InteropResult<ObjectRef>;

    // ========================================================================
    // Execution
    // ========================================================================

    /// Invoke a method; instance methods dispatch on the receiver's class
    fn invoke(
        &self,
        method: MethodId,
        receiver: Option<ObjectRef>,
        args: &[ManagedValue],
    ) -> Result<ManagedValue, ObjectRef>;

    /// Current worker's execution mode
    fn execution_mode(&self) -> ExecutionMode;

    /// Switch the current worker's execution mode, returning the previous one
    fn set_execution_mode(&self, mode: ExecutionMode) -> ExecutionMode;

    /// Identity of the calling worker
    fn current_worker(&self) -> WorkerId;

    /// Open a handle scope on the current worker
    fn open_scope(&self) -> ScopeId;

    /// Close the handle scope (and every scope opened after it)
    fn close_scope(&self, scope: ScopeId);

    /// Root an object in the innermost open scope
    fn scope_root(&self, obj: ObjectRef) -> LocalSlot;

    /// Re-read a rooted local
    fn scope_get(&self, slot: LocalSlot) -> Option<ObjectRef>;

    // ========================================================================
    // Tracing
    // ========================================================================

    /// Visit the runtime's own roots (objects held only through an interop
    /// index are not roots here)
    fn visit_roots(&self, visitor: &mut dyn FnMut(ObjectRef));

    /// Visit objects directly referenced by `obj`
    fn visit_references(&self, obj: ObjectRef, visitor: &mut dyn FnMut(ObjectRef));

    /// Install the bridge entry points
    fn install_bridge(&self, hooks: Arc<dyn BridgeHooks>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_roundtrip_per_kind() {
        let samples = [
            (TypeTag::Primitive(PrimitiveKind::Bool), ManagedValue::Bool(true)),
            (TypeTag::Primitive(PrimitiveKind::I8), ManagedValue::I8(-128)),
            (TypeTag::Primitive(PrimitiveKind::Char), ManagedValue::Char(0xFFFF)),
            (TypeTag::Primitive(PrimitiveKind::I16), ManagedValue::I16(-2)),
            (TypeTag::Primitive(PrimitiveKind::I32), ManagedValue::I32(i32::MIN)),
            (TypeTag::Primitive(PrimitiveKind::I64), ManagedValue::I64(i64::MAX)),
            (TypeTag::Primitive(PrimitiveKind::F32), ManagedValue::F32(-1.5)),
            (TypeTag::Primitive(PrimitiveKind::F64), ManagedValue::F64(3.25)),
            (TypeTag::Ref(ClassId::from_raw(1)), ManagedValue::Ref(None)),
            (
                TypeTag::Ref(ClassId::from_raw(1)),
                ManagedValue::object(ObjectRef::from_raw(7)),
            ),
        ];
        for (tag, value) in samples {
            assert_eq!(ManagedValue::from_bits(tag, value.to_bits()), value);
        }
    }

    #[test]
    fn test_defaults() {
        assert_eq!(TypeTag::Primitive(PrimitiveKind::I32).default_value(), ManagedValue::I32(0));
        assert_eq!(TypeTag::Ref(ClassId::from_raw(3)).default_value(), ManagedValue::NULL);
        assert!(TypeTag::Primitive(PrimitiveKind::F32).is_float());
        assert!(!TypeTag::Primitive(PrimitiveKind::I64).is_float());
    }

    #[test]
    fn test_method_accepts() {
        let info = MethodInfo {
            id: MethodId::from_raw(0),
            name: "f".into(),
            descriptor: "VIII".into(),
            declaring: ClassId::from_raw(0),
            is_static: true,
            is_constructor: false,
            visibility: Visibility::Public,
            accessor: None,
            param_count: 3,
            mandatory: 1,
            has_rest: false,
            body: BodyKind::Native,
            script_decl: None,
        };
        assert!(!info.accepts(0));
        assert!(info.accepts(1));
        assert!(info.accepts(3));
        assert!(!info.accepts(4));
    }

    #[test]
    fn test_box_mapping() {
        for class in WellKnownClass::ALL {
            if let Some(kind) = class.boxed_kind() {
                assert_eq!(WellKnownClass::box_for(kind), class);
            }
        }
    }
}
