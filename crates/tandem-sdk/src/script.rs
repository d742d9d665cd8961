//! Script runtime vocabulary ("Runtime B")
//!
//! Values, property keys, descriptors and the [`ScriptRuntime`] trait the
//! bridge programs against. Exceptions raised by script code travel as the
//! `Err` side of a [`ScriptResult`].

use std::fmt;
use std::sync::Arc;

/// Result of a script operation; `Err` carries the thrown value
pub type ScriptResult<T> = Result<T, ScriptValue>;

/// Identity of a script heap object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScriptObjectRef(u32);

impl ScriptObjectRef {
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

/// A persistent (ref-count-1 style) root into the script heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PersistentHandle(u32);

impl PersistentHandle {
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

// ============================================================================
// Script Value
// ============================================================================

/// A script value
///
/// Equality is strict equality: `NaN` differs from itself, `+0` equals `-0`,
/// objects compare by identity.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    /// `undefined`
    Undefined,
    /// `null`
    Null,
    /// Boolean
    Bool(bool),
    /// IEEE-754 number
    Number(f64),
    /// Immutable string
    String(Arc<str>),
    /// Heap object (plain, array, function, error or proxy)
    Object(ScriptObjectRef),
}

impl ScriptValue {
    /// Whether the value is `undefined`
    pub fn is_undefined(&self) -> bool {
        matches!(self, ScriptValue::Undefined)
    }

    /// Whether the value is `undefined` or `null`
    pub fn is_nullish(&self) -> bool {
        matches!(self, ScriptValue::Undefined | ScriptValue::Null)
    }

    /// Heap object, if any
    pub fn as_object(&self) -> Option<ScriptObjectRef> {
        match self {
            ScriptValue::Object(obj) => Some(*obj),
            _ => None,
        }
    }

    /// Number, if any
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ScriptValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Boolean, if any
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScriptValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// String contents, if any
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// `typeof`-style kind name; functions report as `object` here
    pub fn kind_name(&self) -> &'static str {
        match self {
            ScriptValue::Undefined => "undefined",
            ScriptValue::Null => "null",
            ScriptValue::Bool(_) => "boolean",
            ScriptValue::Number(_) => "number",
            ScriptValue::String(_) => "string",
            ScriptValue::Object(_) => "object",
        }
    }
}

impl From<bool> for ScriptValue {
    fn from(b: bool) -> Self {
        ScriptValue::Bool(b)
    }
}

impl From<f64> for ScriptValue {
    fn from(n: f64) -> Self {
        ScriptValue::Number(n)
    }
}

impl From<i32> for ScriptValue {
    fn from(n: i32) -> Self {
        ScriptValue::Number(n as f64)
    }
}

impl From<&str> for ScriptValue {
    fn from(s: &str) -> Self {
        ScriptValue::String(Arc::from(s))
    }
}

impl From<Arc<str>> for ScriptValue {
    fn from(s: Arc<str>) -> Self {
        ScriptValue::String(s)
    }
}

impl From<ScriptObjectRef> for ScriptValue {
    fn from(obj: ScriptObjectRef) -> Self {
        ScriptValue::Object(obj)
    }
}

// ============================================================================
// Property keys
// ============================================================================

/// Well-known symbols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WellKnownSymbol {
    /// `@@iterator`
    Iterator,
}

/// A property key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    /// String-named property
    Name(Arc<str>),
    /// Array index
    Index(u32),
    /// Well-known symbol
    Symbol(WellKnownSymbol),
}

impl PropertyKey {
    /// Key for a string name
    pub fn name(name: &str) -> Self {
        match canonical_index(name) {
            Some(index) => PropertyKey::Index(index),
            None => PropertyKey::Name(Arc::from(name)),
        }
    }

    /// Convert a value used as a key (`obj[value]`)
    pub fn from_value(value: &ScriptValue) -> Option<Self> {
        match value {
            ScriptValue::Number(n) if *n >= 0.0 && n.fract() == 0.0 && *n < u32::MAX as f64 => {
                Some(PropertyKey::Index(*n as u32))
            }
            ScriptValue::Number(n) => Some(PropertyKey::Name(Arc::from(n.to_string()))),
            ScriptValue::String(s) => Some(PropertyKey::name(s)),
            ScriptValue::Bool(b) => Some(PropertyKey::Name(Arc::from(b.to_string()))),
            _ => None,
        }
    }

    /// Value form of the key (symbols have none)
    pub fn to_value(&self) -> Option<ScriptValue> {
        match self {
            PropertyKey::Name(s) => Some(ScriptValue::String(s.clone())),
            PropertyKey::Index(i) => Some(ScriptValue::Number(*i as f64)),
            PropertyKey::Symbol(_) => None,
        }
    }

    /// Index, if this is an index key
    pub fn as_index(&self) -> Option<u32> {
        match self {
            PropertyKey::Index(i) => Some(*i),
            _ => None,
        }
    }
}

fn canonical_index(s: &str) -> Option<u32> {
    if s.is_empty() || (s.len() > 1 && s.starts_with('0')) {
        return None;
    }
    let index: u32 = s.parse().ok()?;
    (index != u32::MAX).then_some(index)
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        PropertyKey::name(s)
    }
}

impl From<u32> for PropertyKey {
    fn from(i: u32) -> Self {
        PropertyKey::Index(i)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKey::Name(s) => write!(f, "{}", s),
            PropertyKey::Index(i) => write!(f, "{}", i),
            PropertyKey::Symbol(WellKnownSymbol::Iterator) => write!(f, "[Symbol.iterator]"),
        }
    }
}

// ============================================================================
// Objects and calls
// ============================================================================

/// Script built-in types a managed class may be made to resemble
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinShape {
    /// `Object`
    Object,
    /// `Function`
    Function,
    /// `Array`
    Array,
    /// `Error`
    Error,
    /// `Map`
    Map,
}

/// Error constructors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptErrorKind {
    /// `Error`
    Error,
    /// `TypeError`
    TypeError,
}

/// Own property descriptor
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyDescriptor {
    /// Value property
    Data {
        /// Stored value
        value: ScriptValue,
        /// Whether assignment is allowed
        writable: bool,
        /// Whether the key is listed by enumeration
        enumerable: bool,
    },
    /// Getter/setter property
    Accessor {
        /// Getter function
        get: Option<ScriptValue>,
        /// Setter function
        set: Option<ScriptValue>,
        /// Whether the key is listed by enumeration
        enumerable: bool,
    },
}

impl PropertyDescriptor {
    /// Writable, enumerable data property
    pub fn value(value: ScriptValue) -> Self {
        PropertyDescriptor::Data {
            value,
            writable: true,
            enumerable: true,
        }
    }

    /// Writable, non-enumerable data property (methods)
    pub fn hidden(value: ScriptValue) -> Self {
        PropertyDescriptor::Data {
            value,
            writable: true,
            enumerable: false,
        }
    }

    /// Accessor property
    pub fn accessor(get: Option<ScriptValue>, set: Option<ScriptValue>) -> Self {
        PropertyDescriptor::Accessor {
            get,
            set,
            enumerable: false,
        }
    }
}

/// Arguments of a native function call
#[derive(Debug, Clone)]
pub struct CallArgs {
    /// Receiver
    pub this: ScriptValue,
    /// Positional arguments
    pub args: Vec<ScriptValue>,
    /// Constructor being invoked, for `new` calls
    pub new_target: Option<ScriptObjectRef>,
    /// The function object being called
    pub callee: ScriptObjectRef,
}

impl CallArgs {
    /// Argument `i`, `undefined` when absent
    pub fn arg(&self, i: usize) -> ScriptValue {
        self.args.get(i).cloned().unwrap_or(ScriptValue::Undefined)
    }

    /// Number of supplied arguments
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Whether no arguments were supplied
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Whether this is a `new` call
    pub fn is_construct(&self) -> bool {
        self.new_target.is_some()
    }
}

/// Native function body
pub type NativeFunction =
    Arc<dyn Fn(&dyn ScriptRuntime, &CallArgs) -> ScriptResult<ScriptValue> + Send + Sync>;

// ============================================================================
// Script runtime interface
// ============================================================================

/// Operations the bridge consumes from the script runtime
pub trait ScriptRuntime: Send + Sync {
    // ========================================================================
    // Creation
    // ========================================================================

    /// New plain object inheriting `Object.prototype`
    fn new_object(&self) -> ScriptObjectRef;

    /// New plain object with an explicit prototype
    fn new_object_with_proto(&self, proto: Option<ScriptObjectRef>) -> ScriptObjectRef;

    /// New array holding `elements`
    fn new_array(&self, elements: &[ScriptValue]) -> ScriptObjectRef;

    /// New native function with a fresh `prototype` object
    fn new_function(&self, name: &str, f: NativeFunction) -> ScriptObjectRef;

    /// New error object
    fn new_error(&self, kind: ScriptErrorKind, message: &str) -> ScriptObjectRef;

    /// New proxy routing `get`/`set`/`has` through traps on `handler`
    fn new_proxy(&self, target: ScriptObjectRef, handler: ScriptObjectRef) -> ScriptObjectRef;

    /// Prototype object of a built-in type
    fn builtin_prototype(&self, shape: BuiltinShape) -> ScriptObjectRef;

    /// Global object
    fn global(&self) -> ScriptObjectRef;

    // ========================================================================
    // Properties
    // ========================================================================

    /// `Reflect.get(obj, key, receiver)`
    fn get_with_receiver(
        &self,
        obj: ScriptObjectRef,
        key: &PropertyKey,
        receiver: &ScriptValue,
    ) -> ScriptResult<ScriptValue>;

    /// `obj[key]`
    fn get(&self, obj: ScriptObjectRef, key: &PropertyKey) -> ScriptResult<ScriptValue> {
        self.get_with_receiver(obj, key, &ScriptValue::Object(obj))
    }

    /// `Reflect.set(obj, key, value, receiver)`
    fn set_with_receiver(
        &self,
        obj: ScriptObjectRef,
        key: &PropertyKey,
        value: ScriptValue,
        receiver: &ScriptValue,
    ) -> ScriptResult<()>;

    /// `obj[key] = value`
    fn set(&self, obj: ScriptObjectRef, key: &PropertyKey, value: ScriptValue) -> ScriptResult<()> {
        self.set_with_receiver(obj, key, value, &ScriptValue::Object(obj))
    }

    /// `key in obj`
    fn has(&self, obj: ScriptObjectRef, key: &PropertyKey) -> ScriptResult<bool>;

    /// Define or replace an own property
    fn define_property(
        &self,
        obj: ScriptObjectRef,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> ScriptResult<()>;

    /// Own property descriptor
    fn own_property(&self, obj: ScriptObjectRef, key: &PropertyKey) -> Option<PropertyDescriptor>;

    /// Own keys in insertion order (array indices first)
    fn own_keys(&self, obj: ScriptObjectRef) -> Vec<PropertyKey>;

    /// `Object.getPrototypeOf(obj)`
    fn prototype_of(&self, obj: ScriptObjectRef) -> Option<ScriptObjectRef>;

    /// `Object.setPrototypeOf(obj, proto)`
    fn set_prototype(&self, obj: ScriptObjectRef, proto: Option<ScriptObjectRef>);

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Length, if `obj` is an array
    fn array_len(&self, obj: ScriptObjectRef) -> Option<usize>;

    /// Whether the value can be called
    fn is_callable(&self, value: &ScriptValue) -> bool;

    /// Whether the object is an error object
    fn is_error(&self, obj: ScriptObjectRef) -> bool;

    /// `typeof value`
    fn type_of(&self, value: &ScriptValue) -> &'static str {
        if self.is_callable(value) {
            "function"
        } else {
            value.kind_name()
        }
    }

    /// `value instanceof ctor`
    fn instance_of(&self, value: &ScriptValue, ctor: &ScriptValue) -> ScriptResult<bool>;

    // ========================================================================
    // Calls
    // ========================================================================

    /// `callee.call(this, ...args)`
    fn call(
        &self,
        callee: &ScriptValue,
        this: &ScriptValue,
        args: &[ScriptValue],
    ) -> ScriptResult<ScriptValue>;

    /// `new callee(...args)`
    fn construct(&self, callee: &ScriptValue, args: &[ScriptValue]) -> ScriptResult<ScriptValue>;

    /// Resolve a registered module's namespace object
    fn load_module(&self, name: &str) -> ScriptResult<ScriptValue>;

    // ========================================================================
    // Handles and native slots
    // ========================================================================

    /// Create a persistent root
    fn create_persistent(&self, value: ScriptValue) -> PersistentHandle;

    /// Read a persistent root
    fn persistent_value(&self, handle: PersistentHandle) -> Option<ScriptValue>;

    /// Delete a persistent root
    fn delete_persistent(&self, handle: PersistentHandle);

    /// Native word stored in the object's internal slot
    fn internal_slot(&self, obj: ScriptObjectRef) -> Option<u64>;

    /// Store or clear the object's internal slot
    fn set_internal_slot(&self, obj: ScriptObjectRef, value: Option<u64>);

    // ========================================================================
    // Tracing
    // ========================================================================

    /// Visit the engine's roots, excluding persistent handles
    fn visit_roots(&self, visitor: &mut dyn FnMut(ScriptObjectRef));

    /// Visit objects directly referenced by `obj`
    fn visit_references(&self, obj: ScriptObjectRef, visitor: &mut dyn FnMut(ScriptObjectRef));
}
