//! Cross-heap collection (XGC)
//!
//! Neither collector can see through the bridge: the managed VM roots every
//! object with an interop index and the script engine roots every persistent
//! handle, so a pair linked by a shared reference keeps itself alive. XGC
//! breaks such cycles by tracing both heaps together from their own roots.
//! A shared reference reached from either side is marked and tracing
//! continues on the other side; scripting-value boxes continue into the
//! script heap through their persistent handle. Unmarked references are
//! released, after which each runtime's collector reclaims its half.
//!
//! Marking touches the shared reference slab only through the flags word
//! and can run on any thread. Sweeping runs on the context's owner thread.
//! Passes are serialized: a mark pass never overlaps another mark pass or a
//! sweep, so the marks a sweep reads come from one complete pass.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use rustc_hash::FxHashSet;
use tandem_sdk::{
    InteropError, InteropResult, ObjectRef, PersistentHandle, ScriptObjectRef, WellKnownClass,
};

use super::context::InteropContext;
use super::storage::RefStorage;

/// Result of one collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XgcStats {
    /// References marked by the mark pass
    pub marked: usize,
    /// References released by the sweep
    pub released: usize,
    /// References alive afterwards
    pub live: usize,
}

/// Mark every shared reference reachable from either heap
///
/// Returns the number of references this pass marked. Waits for a pass
/// already running on another thread.
pub fn mark(refs: &RefStorage) -> usize {
    let _pass = refs.lock_pass();
    mark_pass(refs)
}

fn mark_pass(refs: &RefStorage) -> usize {
    if !refs.unmark_all() {
        log::debug!("xgc: mark skipped, cycle in phase {:?}", refs.phase());
        return 0;
    }
    let managed = refs.managed();
    let script = refs.script();
    let script_value = managed.well_known(WellKnownClass::ScriptValue);

    let mut managed_work: Vec<ObjectRef> = Vec::new();
    let mut script_work: Vec<ScriptObjectRef> = Vec::new();
    managed.visit_roots(&mut |obj| managed_work.push(obj));
    script.visit_roots(&mut |obj| script_work.push(obj));
    script_work.extend(refs.script_roots());

    let mut managed_seen = FxHashSet::default();
    let mut script_seen = FxHashSet::default();
    let mut marked = 0;
    loop {
        if let Some(obj) = managed_work.pop() {
            if !managed_seen.insert(obj) {
                continue;
            }
            if let Some(id) = refs.find_by_managed(obj) {
                marked += refs.mark(id) as usize;
                if let Some(view) = refs.view(id) {
                    script_work.push(view.script);
                }
            }
            if matches!(managed.class_of(obj), Ok(class) if class == script_value) {
                let held = managed
                    .opaque_payload(obj)
                    .ok()
                    .flatten()
                    .and_then(|raw| u32::try_from(raw).ok())
                    .and_then(|raw| script.persistent_value(PersistentHandle::from_raw(raw)))
                    .and_then(|value| value.as_object());
                script_work.extend(held);
            }
            managed.visit_references(obj, &mut |r| managed_work.push(r));
        } else if let Some(obj) = script_work.pop() {
            if !script_seen.insert(obj) {
                continue;
            }
            if let Some(id) = refs.find_by_script(obj) {
                marked += refs.mark(id) as usize;
                if let Some(view) = refs.view(id) {
                    managed_work.push(view.managed);
                }
            }
            script.visit_references(obj, &mut |r| script_work.push(r));
        } else {
            break;
        }
    }
    refs.finish_marking();
    log::debug!(
        "xgc: marked {} references ({} managed, {} script objects traced)",
        marked,
        managed_seen.len(),
        script_seen.len()
    );
    marked
}

/// Release every reference the last completed mark pass left unmarked
pub fn sweep(ctx: &InteropContext) -> InteropResult<usize> {
    let _pass = ctx.refs().lock_pass();
    sweep_pass(ctx)
}

fn sweep_pass(ctx: &InteropContext) -> InteropResult<usize> {
    if !ctx.is_owner_thread() {
        return Err(InteropError::identity(
            "shared references can only be swept on the thread owning the context",
        ));
    }
    let released = ctx.refs().sweep_unmarked()?;
    for id in &released {
        log::trace!("xgc: released shared reference {}", id.index());
    }
    Ok(released.len())
}

/// Mark, then sweep
pub fn collect(ctx: &InteropContext) -> InteropResult<XgcStats> {
    let (marked, released) = {
        let _pass = ctx.refs().lock_pass();
        (mark_pass(ctx.refs()), sweep_pass(ctx)?)
    };
    let stats = XgcStats {
        marked,
        released,
        live: ctx.refs().live_count(),
    };
    log::debug!(
        "xgc: {} marked, {} released, {} live",
        stats.marked,
        stats.released,
        stats.live
    );
    Ok(stats)
}

// ============================================================================
// Background marking
// ============================================================================

/// Runs mark passes periodically on a dedicated thread
///
/// The owner thread still sweeps: after a pass finishes, [`sweep`] releases
/// what it left unmarked.
pub struct BackgroundMarker {
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<usize>>,
}

impl BackgroundMarker {
    /// Start marking `refs` every `interval`
    pub fn spawn(refs: Arc<RefStorage>, interval: Duration) -> std::io::Result<Self> {
        let (tx, rx) = channel::bounded::<()>(1);
        let thread = std::thread::Builder::new()
            .name("tandem-xgc-marker".to_string())
            .spawn(move || {
                let mut passes = 0;
                loop {
                    match rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            mark(&refs);
                            passes += 1;
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                log::debug!("xgc marker stopped after {} passes", passes);
                passes
            })?;
        Ok(Self {
            shutdown: Some(tx),
            thread: Some(thread),
        })
    }

    /// Stop the thread and return how many passes it ran
    pub fn stop(mut self) -> usize {
        self.shutdown()
    }

    fn shutdown(&mut self) -> usize {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.thread.take().map(JoinHandle::join) {
            Some(Ok(passes)) => passes,
            Some(Err(_)) => {
                log::error!("xgc marker thread panicked");
                0
            }
            None => 0,
        }
    }
}

impl Drop for BackgroundMarker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
