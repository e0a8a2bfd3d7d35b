//! A failing apply handler aborts the tick, rolls back its partial work,
//! and the batch is retried on the next advance.

use std::cell::RefCell;
use std::rc::Rc;

use plait::log::memory::{MemoryNamespace, MemoryStore};
use plait::{
    AppliedEntry, ApplyScope, BaseError, CoreId, Handler, HandlerError, Options, Plait, ViewStore,
    WriterKey,
};

struct FlakyView {
    events: CoreId,
}

/// Appends every payload, then fails the whole call while `failures` is
/// still positive. The partial appends must not survive the failure.
struct FlakyHandler {
    failures: Rc<RefCell<u32>>,
    calls: Rc<RefCell<u32>>,
}

impl Handler for FlakyHandler {
    type View = FlakyView;

    fn open(&mut self, store: &mut ViewStore) -> Result<FlakyView, HandlerError> {
        Ok(FlakyView {
            events: store.get("events")?,
        })
    }

    fn apply(
        &mut self,
        batch: &[AppliedEntry],
        view: &mut FlakyView,
        scope: &mut ApplyScope<'_>,
    ) -> Result<(), HandlerError> {
        *self.calls.borrow_mut() += 1;
        for entry in batch {
            if entry.value.starts_with(b"grow:") {
                scope.add_writer(WriterKey::from_seed(&entry.value))?;
            }
            scope.append(view.events, entry.value.clone())?;
        }
        let mut failures = self.failures.borrow_mut();
        if *failures > 0 {
            *failures -= 1;
            return Err("handler rejected the batch".into());
        }
        Ok(())
    }
}

struct Flaky {
    base: Plait<MemoryStore, FlakyHandler>,
    failures: Rc<RefCell<u32>>,
    calls: Rc<RefCell<u32>>,
}

fn flaky(ns: &MemoryNamespace, seed: &[u8], failures: u32) -> Flaky {
    let failures = Rc::new(RefCell::new(failures));
    let calls = Rc::new(RefCell::new(0));
    let base = Plait::open(
        MemoryStore::writer(ns.clone(), seed),
        FlakyHandler {
            failures: failures.clone(),
            calls: calls.clone(),
        },
        Options::default(),
    )
    .expect("open flaky participant");
    Flaky {
        base,
        failures,
        calls,
    }
}

#[test]
fn failed_apply_rolls_back_partial_appends_and_staged_membership() {
    let ns = MemoryNamespace::new();
    let mut p = flaky(&ns, b"flaky", 1);

    let err = p.base.append("grow:peer").unwrap_err();
    assert!(matches!(err, BaseError::Handler { .. }));
    assert_eq!(*p.calls.borrow(), 1);

    // The partial view append and the staged membership change (including
    // the bootstrap seeding that rode in this call) are gone.
    let events = p.base.view().events;
    assert_eq!(p.base.view_length(events), 0);
    let stats = p.base.stats();
    assert_eq!(stats.pending_updates, 0);
    assert_eq!(stats.system_length, 0);
}

#[test]
fn failed_batch_is_retried_on_the_next_advance() {
    let ns = MemoryNamespace::new();
    let mut p = flaky(&ns, b"retry", 1);

    p.base.append("value").unwrap_err();
    assert_eq!(*p.calls.borrow(), 1);

    // Nothing new arrived; the bump left by the failure re-runs the batch.
    p.base.update().unwrap();
    assert_eq!(*p.calls.borrow(), 2);
    assert_eq!(*p.failures.borrow(), 0);

    let events = p.base.view().events;
    assert_eq!(p.base.view_indexed_length(events), 1);
    assert_eq!(
        p.base.view_get(events, 0).unwrap().unwrap(),
        bytes::Bytes::from_static(b"value")
    );

    // The retried batch committed and flushed like any other.
    let stats = p.base.stats();
    assert_eq!(stats.pending_updates, 0);
    assert!(stats.system_length > 0);
}

#[test]
fn later_appends_stay_queued_behind_a_failing_batch() {
    let ns = MemoryNamespace::new();
    let mut p = flaky(&ns, b"ordered", 2);

    p.base.append("first").unwrap_err();
    // The retry fails once more; "second" is published but cannot be
    // applied before "first".
    p.base.append("second").unwrap_err();
    assert_eq!(*p.calls.borrow(), 2);

    p.base.update().unwrap();
    let events = p.base.view().events;
    assert_eq!(p.base.view_indexed_length(events), 2);
    assert_eq!(
        p.base.view_get(events, 0).unwrap().unwrap(),
        bytes::Bytes::from_static(b"first")
    );
    assert_eq!(
        p.base.view_get(events, 1).unwrap().unwrap(),
        bytes::Bytes::from_static(b"second")
    );
}
