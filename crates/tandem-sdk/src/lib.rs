//! Tandem SDK - Boundary vocabulary for the tandem interop bridge
//!
//! This crate defines the types and traits shared by the bridge and by the
//! two runtimes it connects, without depending on any of them:
//!
//! - [`managed`]: the statically-typed managed runtime ("Runtime A")
//! - [`script`]: the dynamically-typed script runtime ("Runtime B")
//! - [`descriptor`]: the method descriptor grammar
//! - [`abi`]: the raw argument buffer of the bridge calling convention
//! - [`error`]: the boundary error taxonomy
//!
//! # Example
//!
//! ```ignore
//! use tandem_sdk::{ClassDef, FieldDef, MethodDef, ManagedValue};
//!
//! let point = ClassDef::new("demo.Point")
//!     .field(FieldDef::instance("x", "D"))
//!     .field(FieldDef::instance("y", "D"))
//!     .method(MethodDef::native("norm", "D", |_, _, _| Ok(ManagedValue::F64(0.0))));
//! ```

#![warn(missing_docs)]

pub mod abi;
pub mod descriptor;
pub mod error;
pub mod managed;
pub mod script;

pub use abi::{ArgBuffer, ArgWriter, FPR_SLOTS, GPR_SLOTS};
pub use descriptor::{DescriptorCursor, DescriptorError, Fragment};
pub use error::{ErrorCategory, InteropError, InteropResult};
pub use managed::{
    AccessorKind, BodyKind, BridgeHooks, ClassDef, ClassId, ClassInfo, ClassKind, ExecutionMode,
    FieldDef, FieldId, FieldInfo, LocalSlot, ManagedRuntime, ManagedValue, MethodBody, MethodDef,
    MethodId, MethodInfo, NativeMethod, ObjectRef, PrimitiveKind, ScopeId, ScriptDecl, TypeTag,
    Visibility, WellKnownClass, WorkerId, CONSTRUCTOR_NAME,
};
pub use script::{
    BuiltinShape, CallArgs, NativeFunction, PersistentHandle, PropertyDescriptor, PropertyKey,
    ScriptErrorKind, ScriptObjectRef, ScriptResult, ScriptRuntime, ScriptValue, WellKnownSymbol,
};
