//! The interop bridge
//!
//! - [`storage`] / [`shared_ref`]: the shared reference slab linking one
//!   managed object to one script object
//! - [`xgc`]: cross-heap mark and sweep over that slab
//! - [`proto_reader`] / [`arg_reader`]: signature and argument buffer walkers
//! - [`convert`]: primitive codecs and per-class reference converters
//! - [`call`]: call marshaling in both directions
//! - [`wrapper`]: script constructors and prototypes synthesized per class
//! - [`exceptions`]: forwarding errors into the caller's runtime
//! - [`intrinsics`]: helper surfaces installed into both runtimes
//! - [`context`]: the [`InteropContext`] tying it all together

pub mod arg_reader;
pub mod call;
pub mod context;
pub mod convert;
pub mod exceptions;
pub mod intrinsics;
pub mod options;
pub mod proto_reader;
pub mod scope;
pub mod shared_ref;
pub mod storage;
pub mod strings;
pub mod wrapper;
pub mod xgc;

pub use context::{InteropContext, SetupError};
pub use convert::{managed_to_script, script_to_managed, RefConverter};
pub use options::{InteropOptions, OptionsError, PreferredOverload};
pub use shared_ref::{RefId, RefKind};
pub use storage::{MarkPhase, RefStorage, RefView};
pub use wrapper::overload::OverloadSet;
pub use wrapper::{ClassWrapper, WrapperCache, WrapperId};
pub use xgc::{BackgroundMarker, XgcStats};

/// Abort on a broken bridge invariant
///
/// Logged first so the reason survives a release build's abort.
pub(crate) fn fatal(msg: &str) -> ! {
    log::error!("fatal interop error: {}", msg);
    panic!("fatal interop error: {}", msg)
}
