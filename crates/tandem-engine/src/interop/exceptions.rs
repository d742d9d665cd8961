//! Exception forwarding
//!
//! Bridge errors become a type error in the caller's runtime. Exceptions
//! raised by the callee cross unchanged: a managed exception object keeps
//! its identity through its class converter, and a script exception that
//! was itself a converted managed exception turns back into that object.

use tandem_sdk::{
    InteropError, ManagedValue, ObjectRef, ScriptErrorKind, ScriptValue, TypeTag, WellKnownClass,
};

use super::context::InteropContext;
use super::convert::managed_to_script;
use super::fatal;

fn script_type_error(ctx: &InteropContext, message: &str) -> ScriptValue {
    ScriptValue::Object(ctx.script().new_error(ScriptErrorKind::TypeError, message))
}

/// Script value to throw for `err`
pub fn throw_into_script(ctx: &InteropContext, err: InteropError) -> ScriptValue {
    match err {
        InteropError::ScriptException(value) => value,
        InteropError::ManagedException(obj) => {
            let tag = TypeTag::Ref(ctx.managed().well_known(WellKnownClass::Error));
            match managed_to_script(ctx, ManagedValue::object(obj), tag) {
                Ok(value) => value,
                Err(err) => {
                    log::debug!("managed exception could not be converted: {}", err);
                    script_type_error(ctx, &err.to_string())
                }
            }
        }
        other => script_type_error(ctx, &other.to_string()),
    }
}

/// Managed exception object to throw for `err`
pub fn throw_into_managed(ctx: &InteropContext, err: InteropError) -> ObjectRef {
    let managed = ctx.managed();
    let converted = match err {
        InteropError::ManagedException(obj) => return obj,
        InteropError::ScriptException(value) => {
            let mapped = ctx
                .refs()
                .find_by_value(&value)
                .and_then(|id| ctx.refs().view(id))
                .filter(|view| view.kind.has_managed_state());
            match mapped {
                Some(view) => return view.managed,
                None => ctx.new_script_error(&value),
            }
        }
        other => managed.new_error(managed.well_known(WellKnownClass::TypeError), &other.to_string()),
    };
    match converted {
        Ok(obj) => obj,
        Err(err) => match managed.new_error(managed.well_known(WellKnownClass::TypeError), &err.to_string()) {
            Ok(obj) => obj,
            Err(err) => fatal(&format!("cannot allocate a managed exception: {}", err)),
        },
    }
}
