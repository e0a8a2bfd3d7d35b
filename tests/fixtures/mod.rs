//! Shared fixtures: an events handler over the in-memory transport.
#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;

use plait::log::memory::{MemoryLog, MemoryNamespace, MemoryStore};
use plait::log::LogStore;
use plait::{
    AppliedEntry, ApplyScope, CoreId, Handler, HandlerError, Options, Plait, ViewStore, WriterKey,
};

/// What the handler observed, for assertions.
#[derive(Default)]
pub struct Probe {
    /// The payloads of every apply call, in call order.
    pub calls: Vec<Vec<Vec<u8>>>,
}

impl Probe {
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.calls.iter().map(Vec::len).collect()
    }
}

pub struct EventsView {
    pub events: CoreId,
}

/// Materializes every payload into the `events` view. Payloads of the form
/// `add:<hex>` / `remove:<hex>` also change membership.
pub struct EventsHandler {
    probe: Rc<RefCell<Probe>>,
}

impl Handler for EventsHandler {
    type View = EventsView;

    fn open(&mut self, store: &mut ViewStore) -> Result<EventsView, HandlerError> {
        Ok(EventsView {
            events: store.get("events")?,
        })
    }

    fn apply(
        &mut self,
        batch: &[AppliedEntry],
        view: &mut EventsView,
        scope: &mut ApplyScope<'_>,
    ) -> Result<(), HandlerError> {
        self.probe
            .borrow_mut()
            .calls
            .push(batch.iter().map(|e| e.value.to_vec()).collect());
        for entry in batch {
            if let Some(hex) = strip(&entry.value, b"add:") {
                scope.add_writer(WriterKey::parse(&hex)?)?;
            } else if let Some(hex) = strip(&entry.value, b"remove:") {
                scope.remove_writer(WriterKey::parse(&hex)?)?;
            }
            scope.append(view.events, entry.value.clone())?;
        }
        Ok(())
    }
}

fn strip(value: &Bytes, prefix: &[u8]) -> Option<String> {
    value
        .strip_prefix(prefix)
        .map(|rest| String::from_utf8_lossy(rest).into_owned())
}

pub type TestBase = Plait<MemoryStore, EventsHandler>;

pub struct Participant {
    pub base: TestBase,
    pub probe: Rc<RefCell<Probe>>,
}

/// A writable participant on the shared namespace.
pub fn participant(ns: &MemoryNamespace, seed: &[u8], bootstraps: &[WriterKey]) -> Participant {
    let probe = Rc::new(RefCell::new(Probe::default()));
    let store = MemoryStore::writer(ns.clone(), seed);
    let base = Plait::open(
        store,
        EventsHandler {
            probe: probe.clone(),
        },
        Options {
            bootstraps: bootstraps.to_vec(),
            ..Options::default()
        },
    )
    .expect("open participant");
    Participant { base, probe }
}

/// A read-only observer.
pub fn observer(ns: &MemoryNamespace, device: &str, bootstraps: &[WriterKey]) -> Participant {
    let probe = Rc::new(RefCell::new(Probe::default()));
    let store = MemoryStore::reader(ns.clone(), device);
    let base = Plait::open(
        store,
        EventsHandler {
            probe: probe.clone(),
        },
        Options {
            bootstraps: bootstraps.to_vec(),
            ..Options::default()
        },
    )
    .expect("open observer");
    Participant { base, probe }
}

pub fn key(seed: &[u8]) -> WriterKey {
    WriterKey::from_seed(seed)
}

/// Sort seeds by their derived key so tests control tie-break order.
pub fn by_key_order<'a>(mut seeds: Vec<&'a [u8]>) -> Vec<&'a [u8]> {
    seeds.sort_by_key(|s| key(s));
    seeds
}

/// Full events contents: indexed prefix plus speculative tip.
pub fn events(p: &Participant) -> Vec<Vec<u8>> {
    let core = p.base.view().events;
    (0..p.base.view_length(core))
        .map(|seq| {
            p.base
                .view_get(core, seq)
                .expect("view read")
                .expect("contiguous view")
                .to_vec()
        })
        .collect()
}

/// Only the committed events prefix.
pub fn indexed_events(p: &Participant) -> Vec<Vec<u8>> {
    let core = p.base.view().events;
    (0..p.base.view_indexed_length(core))
        .map(|seq| {
            p.base
                .view_get(core, seq)
                .expect("view read")
                .expect("contiguous view")
                .to_vec()
        })
        .collect()
}

/// Open a participant's backing log directly, bypassing the engine.
pub fn raw_writer_log(ns: &MemoryNamespace, writer: &WriterKey) -> MemoryLog {
    let mut store = MemoryStore::reader(ns.clone(), "raw-inspect");
    store.open_writer(writer).expect("open writer log")
}

/// Open a participant's view backing log directly.
pub fn raw_view_log(ns: &MemoryNamespace, seed: &[u8], view: &str) -> MemoryLog {
    let mut store = MemoryStore::writer(ns.clone(), seed);
    store
        .open_named(&format!("view/{view}"))
        .expect("open view log")
}

pub fn bytes_of(values: &[&str]) -> Vec<Vec<u8>> {
    values.iter().map(|v| v.as_bytes().to_vec()).collect()
}
