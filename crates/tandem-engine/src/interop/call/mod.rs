//! Call marshaling engine
//!
//! - [`forward`]: script code calling managed methods
//! - [`reverse`]: managed bridge methods calling script code
//! - [`binding`]: per-class resolution of call-into-script targets

pub mod binding;
pub mod forward;
pub mod reverse;

pub use binding::{Binding, BindingTable, CallTarget, ProxyFlavor};
pub use forward::{call_instance, call_managed, call_static};
pub use reverse::call_script;
