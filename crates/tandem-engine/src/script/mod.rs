//! Reference script engine ("Runtime B")
//!
//! A prototype-based object model with accessors, arrays, error objects,
//! proxies with `get`/`set`/`has` traps, native functions, persistent
//! handles, one internal slot per object and a module registry. Functions
//! are Rust closures; there is no source-level interpreter.

mod builtins;
mod engine;
mod object;

pub use engine::{truthy, ScriptEngine, ScriptGcStats};
