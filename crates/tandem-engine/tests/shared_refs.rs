//! Integration tests for shared reference identity
//!
//! Every managed object crossing into script code must come back as the same
//! script object, and the other way round, for as long as the link lives.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p tandem-engine --test shared_refs
//! ```

mod common;

use common::*;
use tandem_engine::{InteropOptions, RefKind};
use tandem_sdk::{ManagedRuntime, ScriptRuntime};

// ===== Identity =====

#[test]
fn test_same_managed_object_maps_to_same_script_object() {
    let h = setup();
    let p = h.construct(POINT, &[num(3.0), num(4.0)]).unwrap();

    // echo takes std.core.Object: mapped objects pass through unchanged
    let echoed = h.invoke_static(CALLS, "echo", &[p.clone()]).unwrap();
    assert_eq!(echoed, p);

    let managed = h.managed_of(&p);
    let id = h.ctx.refs().find_by_managed(managed).unwrap();
    assert_eq!(h.ctx.refs().find_by_value(&p), Some(id));
    assert_eq!(h.ctx.refs().view(id).unwrap().kind, RefKind::ManagedOwned);
}

#[test]
fn test_returned_object_keeps_its_wrapper_instance() {
    let h = setup();
    let a = h.invoke_static(POINT, "origin", &[]).unwrap();
    let b = h.invoke_static(POINT, "origin", &[]).unwrap();
    // two managed objects, two script objects
    assert_ne!(a, b);

    let d1 = h.invoke_static(POINT, "distance", &[a.clone(), b.clone()]).unwrap();
    assert_eq!(d1, num(0.0));
    assert_eq!(h.ctx.refs().live_count(), 2);
}

#[test]
fn test_plain_script_object_is_boxed_not_mapped() {
    let h = setup();
    let obj = h.object(&[("k", num(1.0))]);
    let echoed = h.invoke_static(CALLS, "echo", &[obj.clone()]).unwrap();
    assert_eq!(echoed, obj);
    assert_eq!(h.ctx.refs().find_by_value(&obj), None);
}

#[test]
fn test_script_function_becomes_script_owned_proxy() {
    let h = setup();
    let double = h.function("double", |_, call| {
        Ok(num(call.arg(0).as_number().unwrap_or(0.0) * 2.0))
    });
    let result = h.invoke_static(OPS, "applyTwice", &[double.clone(), num(3.0)]).unwrap();
    assert_eq!(result, num(12.0));

    let id = h.ctx.refs().find_by_value(&double).unwrap();
    assert_eq!(h.ctx.refs().view(id).unwrap().kind, RefKind::ScriptOwned);

    // the second crossing reuses the proxy
    let live = h.ctx.refs().live_count();
    h.invoke_static(OPS, "applyTwice", &[double.clone(), num(1.0)]).unwrap();
    assert_eq!(h.ctx.refs().live_count(), live);
    assert_eq!(h.ctx.refs().find_by_value(&double), Some(id));
}

#[test]
fn test_record_is_hybrid() {
    let h = setup();
    let size = h.object(&[("width", num(3.0)), ("height", num(4.0))]);
    let area = h.invoke_static(LAYOUT, "area", &[size.clone()]).unwrap();
    assert_eq!(area, num(12.0));

    let id = h.ctx.refs().find_by_value(&size).unwrap();
    assert_eq!(h.ctx.refs().view(id).unwrap().kind, RefKind::Hybrid);
}

// ===== Capacity =====

#[test]
fn test_hardened_full_storage_is_a_type_error() {
    let h = setup_with(InteropOptions {
        ref_capacity: 2,
        hardened: true,
        ..InteropOptions::default()
    });
    h.construct(POINT, &[num(1.0), num(1.0)]).unwrap();
    h.construct(POINT, &[num(2.0), num(2.0)]).unwrap();

    let thrown = h.construct(POINT, &[num(3.0), num(3.0)]).unwrap_err();
    assert!(h.is_type_error(&thrown));
    assert_eq!(
        h.message(&thrown),
        "Shared reference storage exhausted (capacity 2)"
    );
    assert_eq!(h.ctx.refs().live_count(), 2);
}

#[test]
#[should_panic(expected = "fatal interop error")]
fn test_full_storage_is_fatal_by_default() {
    let h = setup_with(InteropOptions {
        ref_capacity: 1,
        ..InteropOptions::default()
    });
    h.construct(POINT, &[]).unwrap();
    let _ = h.construct(POINT, &[]);
}

#[test]
fn test_collection_frees_slots_for_reuse() {
    let h = setup_with(InteropOptions {
        ref_capacity: 2,
        hardened: true,
        ..InteropOptions::default()
    });
    h.construct(POINT, &[]).unwrap();
    h.construct(POINT, &[]).unwrap();
    assert!(h.construct(POINT, &[]).is_err());

    let stats = h.ctx.collect_cross_heap().unwrap();
    assert_eq!(stats.released, 2);
    assert_eq!(stats.live, 0);

    let p = h.construct(POINT, &[num(5.0), num(12.0)]).unwrap();
    assert_eq!(h.invoke(&p, "norm", &[]).unwrap(), num(13.0));
}

// ===== Marking =====

#[test]
fn test_mark_is_idempotent_within_a_cycle() {
    let h = setup();
    let p = h.construct(POINT, &[]).unwrap();
    let refs = h.ctx.refs();
    let id = refs.find_by_value(&p).unwrap();

    assert!(refs.unmark_all());
    assert!(refs.mark(id));
    assert!(!refs.mark(id));
    assert!(refs.is_marked(id));
    assert!(refs.finish_marking());

    assert!(refs.unmark_all());
    assert!(!refs.is_marked(id));
    assert!(refs.mark(id));
}

#[test]
fn test_released_link_clears_both_sides() {
    let h = setup();
    let p = h.construct(POINT, &[]).unwrap();
    let managed = h.managed_of(&p);
    let script = p.as_object().unwrap();

    h.ctx.collect_cross_heap().unwrap();

    assert_eq!(h.vm.interop_index(managed), None);
    assert_eq!(h.engine.internal_slot(script), None);
    assert_eq!(h.ctx.refs().find_by_value(&p), None);
}
