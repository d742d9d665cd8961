//! Integration tests for cross-heap collection
//!
//! A managed object and its script counterpart keep each other alive until
//! XGC proves neither heap reaches the pair; then both collectors can free
//! their half.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p tandem-engine --test xgc
//! ```

mod common;

use std::time::Duration;

use common::*;
use tandem_engine::interop::xgc;
use tandem_engine::BackgroundMarker;
use tandem_sdk::{ScriptRuntime, ScriptValue};

// ===== Reclamation =====

#[test]
fn test_unreachable_pair_is_reclaimed() {
    let h = setup();
    let p = h.construct(POINT, &[num(1.0), num(2.0)]).unwrap();
    let managed = h.managed_of(&p);
    let script = p.as_object().unwrap();

    // the link keeps both halves alive through each runtime's own collector
    h.vm.collect();
    h.engine.collect();
    assert!(h.vm.is_live(managed));
    assert!(h.engine.is_live(script));

    let stats = h.ctx.collect_cross_heap().unwrap();
    assert_eq!(stats.released, 1);
    assert_eq!(stats.live, 0);

    h.vm.collect();
    h.engine.collect();
    assert!(!h.vm.is_live(managed));
    assert!(!h.engine.is_live(script));
}

#[test]
fn test_pair_reachable_from_script_survives() {
    let h = setup();
    let p = h.construct(POINT, &[]).unwrap();
    let global = ScriptValue::Object(h.engine.global());
    h.set(&global, "kept", p.clone()).unwrap();

    let stats = h.ctx.collect_cross_heap().unwrap();
    assert_eq!(stats.released, 0);
    assert!(stats.marked >= 1);
    assert!(h.ctx.refs().find_by_value(&p).is_some());

    // dropping the script reference lets the next cycle release it
    h.set(&global, "kept", ScriptValue::Undefined).unwrap();
    assert_eq!(h.ctx.collect_cross_heap().unwrap().released, 1);
}

#[test]
fn test_pair_reachable_from_managed_survives() {
    let h = setup();
    let p = h.invoke_static(POINT, "origin", &[]).unwrap();
    let managed = h.managed_of(&p);
    h.vm.add_global_root(managed);

    h.ctx.collect_cross_heap().unwrap();
    h.engine.collect();
    assert_eq!(h.ctx.refs().find_by_managed(managed), h.ctx.refs().find_by_value(&p));
    assert!(h.ctx.refs().find_by_value(&p).is_some());
    assert!(h.engine.is_live(p.as_object().unwrap()));

    h.vm.remove_global_root(managed);
    assert_eq!(h.ctx.collect_cross_heap().unwrap().released, 1);
}

#[test]
fn test_marking_crosses_script_value_boxes() {
    let h = setup();
    let p = h.construct(POINT, &[]).unwrap();
    let holder = h.object(&[("point", p.clone())]);

    // managed root -> box -> script object -> mapped instance
    let boxed = h.ctx.box_value(holder).unwrap();
    h.vm.add_global_root(boxed);

    let stats = h.ctx.collect_cross_heap().unwrap();
    assert_eq!(stats.released, 0);
    assert!(h.ctx.refs().find_by_value(&p).is_some());
}

#[test]
fn test_cycle_through_both_heaps_is_reclaimed() {
    let h = setup();
    let size = h.object(&[("width", num(1.0)), ("height", num(1.0))]);
    let p = h.construct(POINT, &[]).unwrap();
    // script object points at the wrapper instance; the record maps back
    h.set(&size, "owner", p.clone()).unwrap();
    h.invoke_static(LAYOUT, "area", &[size.clone()]).unwrap();
    assert_eq!(h.ctx.refs().live_count(), 2);

    let stats = h.ctx.collect_cross_heap().unwrap();
    assert_eq!(stats.released, 2);
    assert_eq!(h.ctx.refs().live_count(), 0);
}

#[test]
fn test_script_owned_proxy_is_released() {
    let h = setup();
    let double = h.function("double", |_, call| {
        Ok(num(call.arg(0).as_number().unwrap_or(0.0) * 2.0))
    });
    h.invoke_static(OPS, "applyTwice", &[double.clone(), num(1.0)]).unwrap();
    let proxy = h.managed_of(&double);

    h.ctx.collect_cross_heap().unwrap();
    h.vm.collect();
    assert!(h.ctx.refs().find_by_value(&double).is_none());
    assert!(!h.vm.is_live(proxy));
}

#[test]
fn test_instances_held_by_wrapper_objects_survive() {
    let h = setup();
    let ctor = h.constructor(POINT);
    let proto = h.get(&ctor, "prototype");
    let last = h.construct(POINT, &[num(1.0), num(2.0)]).unwrap();
    let sample = h.construct(POINT, &[num(3.0), num(4.0)]).unwrap();
    h.set(&ctor, "last", last).unwrap();
    h.set(&proto, "sample", sample).unwrap();

    let stats = h.ctx.collect_cross_heap().unwrap();
    assert_eq!(stats.released, 0);
    assert_eq!(stats.live, 2);

    // both still behave as Points
    let last = h.get(&ctor, "last");
    assert_eq!(h.invoke(&last, "norm", &[]).unwrap(), num(5.0f64.sqrt()));
    let sample = h.get(&proto, "sample");
    assert_eq!(h.invoke(&sample, "norm", &[]).unwrap(), num(5.0));
}

// ===== Phases and threads =====

#[test]
fn test_sweep_requires_a_completed_mark() {
    let h = setup();
    assert!(xgc::sweep(&h.ctx).is_err());

    xgc::mark(h.ctx.refs());
    assert_eq!(xgc::sweep(&h.ctx).unwrap(), 0);
    // the cycle ended with the sweep
    assert!(xgc::sweep(&h.ctx).is_err());
}

#[test]
fn test_sweep_is_confined_to_the_owner_thread() {
    let h = setup();
    h.construct(POINT, &[]).unwrap();
    xgc::mark(h.ctx.refs());

    let ctx = &h.ctx;
    let result = std::thread::scope(|s| s.spawn(|| xgc::sweep(ctx)).join().unwrap());
    let err = result.unwrap_err();
    assert!(err.to_string().contains("owning the context"));

    // still sweepable from the owner
    assert_eq!(xgc::sweep(&h.ctx).unwrap(), 1);
}

#[test]
fn test_background_marking_then_owner_sweep() {
    let h = setup();
    h.construct(POINT, &[]).unwrap();
    let kept = h.construct(POINT, &[]).unwrap();
    h.set(&ScriptValue::Object(h.engine.global()), "kept", kept.clone())
        .unwrap();

    let marker = BackgroundMarker::spawn(h.ctx.refs().clone(), Duration::from_millis(1)).unwrap();
    std::thread::sleep(Duration::from_millis(30));
    let passes = marker.stop();
    assert!(passes > 0);

    assert_eq!(xgc::sweep(&h.ctx).unwrap(), 1);
    assert!(h.ctx.refs().find_by_value(&kept).is_some());
}

#[test]
fn test_collection_alongside_background_marking_keeps_reachable_pairs() {
    let h = setup();
    let kept: Vec<ScriptValue> = (0..200)
        .map(|i| h.construct(POINT, &[num(i as f64), num(0.0)]).unwrap())
        .collect();
    let global = ScriptValue::Object(h.engine.global());
    h.set(&global, "kept", h.array(&kept)).unwrap();

    let marker = BackgroundMarker::spawn(h.ctx.refs().clone(), Duration::from_micros(1)).unwrap();
    for round in 0..50 {
        h.construct(POINT, &[]).unwrap();
        h.ctx.collect_cross_heap().unwrap();
        let lost = kept
            .iter()
            .filter(|p| h.ctx.refs().find_by_value(p).is_none())
            .count();
        assert_eq!(lost, 0, "round {} released reachable references", round);
    }
    marker.stop();

    // garbage from the last rounds is still collectable
    h.ctx.collect_cross_heap().unwrap();
    assert_eq!(h.ctx.refs().live_count(), kept.len());
}

#[test]
fn test_references_created_mid_cycle_survive_the_sweep() {
    let h = setup();
    assert!(h.ctx.refs().unmark_all());
    // born marked: created after marking started
    let p = h.construct(POINT, &[]).unwrap();
    assert!(h.ctx.refs().finish_marking());

    assert_eq!(xgc::sweep(&h.ctx).unwrap(), 0);
    assert!(h.ctx.refs().find_by_value(&p).is_some());
}
