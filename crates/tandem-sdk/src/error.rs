//! Error types for the tandem boundary
//!
//! Every failure that crosses the bridge is one of four categories:
//!
//! 1. **type mismatch**: a value could not be converted to the expected shape
//! 2. **identity inconsistency**: a shared reference already exists, is stale,
//!    or does not support the requested operation
//! 3. **resolution failure**: no overload, property or qualified-name segment
//!    matches the request
//! 4. **cross-runtime exception**: an ordinary exception raised by the callee
//!
//! Categories 1 to 3 are synthesized by the bridge as a type error in the caller's
//! runtime; category 4 is forwarded unchanged.

use crate::descriptor::DescriptorError;
use crate::managed::ObjectRef;
use crate::script::ScriptValue;

/// Result type for boundary operations
pub type InteropResult<T> = Result<T, InteropError>;

/// Coarse classification of an [`InteropError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// A value could not be converted to the expected shape
    TypeMismatch,
    /// The identity mapping between the heaps was violated or misused
    IdentityInconsistency,
    /// A callable or property could not be found
    ResolutionFailure,
    /// A normal exception raised by the callee runtime
    CrossRuntimeException,
}

/// Boundary error
#[derive(Debug, Clone, thiserror::Error)]
pub enum InteropError {
    /// Value conversion failed
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Expected type name
        expected: String,
        /// Actual type name
        got: String,
    },

    /// Fewer arguments than mandatory parameters
    #[error("Expected at least {expected} arguments, got {got}")]
    ArgumentCount {
        /// Number of mandatory parameters
        expected: usize,
        /// Number of supplied arguments
        got: usize,
    },

    /// Shared reference misuse (duplicate mapping, wrong kind, stale slot)
    #[error("Identity inconsistency: {0}")]
    IdentityInconsistency(String),

    /// The shared reference slab has no free slot
    #[error("Shared reference storage exhausted (capacity {0})")]
    RefStorageFull(usize),

    /// Overload, property or qualified name could not be resolved
    #[error("Resolution failure: {0}")]
    ResolutionFailure(String),

    /// Exception thrown by managed code
    #[error("Managed exception {0:?}")]
    ManagedException(ObjectRef),

    /// Exception thrown by script code
    #[error("Script exception {0:?}")]
    ScriptException(ScriptValue),
}

impl InteropError {
    /// Shorthand for a [`InteropError::TypeMismatch`]
    pub fn type_mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        InteropError::TypeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// Shorthand for an [`InteropError::IdentityInconsistency`]
    pub fn identity(msg: impl Into<String>) -> Self {
        InteropError::IdentityInconsistency(msg.into())
    }

    /// Shorthand for a [`InteropError::ResolutionFailure`]
    pub fn resolution(msg: impl Into<String>) -> Self {
        InteropError::ResolutionFailure(msg.into())
    }

    /// Which of the four error categories this error belongs to
    pub fn category(&self) -> ErrorCategory {
        match self {
            InteropError::TypeMismatch { .. } | InteropError::ArgumentCount { .. } => {
                ErrorCategory::TypeMismatch
            }
            InteropError::IdentityInconsistency(_) | InteropError::RefStorageFull(_) => {
                ErrorCategory::IdentityInconsistency
            }
            InteropError::ResolutionFailure(_) => ErrorCategory::ResolutionFailure,
            InteropError::ManagedException(_) | InteropError::ScriptException(_) => {
                ErrorCategory::CrossRuntimeException
            }
        }
    }

    /// Whether the error signals a broken invariant rather than a caller mistake
    pub fn is_fatal(&self) -> bool {
        matches!(self, InteropError::RefStorageFull(_))
    }
}

impl From<DescriptorError> for InteropError {
    fn from(err: DescriptorError) -> Self {
        InteropError::ResolutionFailure(err.to_string())
    }
}
