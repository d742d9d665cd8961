//! Tandem Engine - Interop bridge between a managed VM and a script engine
//!
//! This crate provides:
//! - **Bridge**: shared references, cross-heap collection, call marshaling
//!   and class wrappers (`interop` module)
//! - **Runtime A**: a reference managed VM (`managed` module)
//! - **Runtime B**: a reference script engine (`script` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use tandem_engine::{InteropContext, InteropOptions, ManagedVm, ScriptEngine};
//!
//! let vm = ManagedVm::new();
//! let engine = ScriptEngine::new();
//! let ctx = InteropContext::new(vm.clone(), engine.clone(), InteropOptions::default())?;
//!
//! // Script code reaches managed classes through the namespace object
//! let point = ctx.class_constructor("demo.Point")?;
//! let p = engine.construct(&point.into(), &[1.0.into(), 2.0.into()])?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// ============================================================================
// Core Modules
// ============================================================================

/// Interop bridge
pub mod interop;

/// Reference managed VM
pub mod managed;

/// Reference script engine
pub mod script;

// ============================================================================
// Re-exports
// ============================================================================

pub use interop::{
    BackgroundMarker, ClassWrapper, InteropContext, InteropOptions, OptionsError, RefId, RefKind,
    RefStorage, SetupError, XgcStats,
};
pub use managed::{ManagedGcStats, ManagedVm};
pub use script::{ScriptEngine, ScriptGcStats};
