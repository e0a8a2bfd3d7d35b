//! Named materialized views.
//!
//! Each view is a log with three length regions: the indexed prefix lives in
//! the backing log, the tip is speculative apply output that may still be
//! truncated, and `appending` counts blocks produced inside the in-flight
//! apply call. Cores are created lazily by name and attached to their
//! backing log at the end of the advance tick that created them.

use std::collections::HashMap;

use bytes::Bytes;
use tracing::debug;

use super::error::BaseError;
use crate::core::ViewName;
use crate::log::AppendLog;

/// Stable handle to a named view core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CoreId(pub(crate) usize);

pub(crate) struct ViewCore {
    name: ViewName,
    /// Backing log; `None` until the core is readied.
    log: Option<Box<dyn AppendLog>>,
    /// Speculative blocks above the indexed prefix.
    tip: Vec<Bytes>,
    /// Blocks appended within the in-flight apply call.
    appending: u64,
}

impl ViewCore {
    pub fn indexed_length(&self) -> u64 {
        self.log.as_ref().map(|l| l.length()).unwrap_or(0)
    }

    pub fn tip_length(&self) -> u64 {
        self.tip.len() as u64
    }

    pub fn length(&self) -> u64 {
        self.indexed_length() + self.tip_length()
    }

    pub fn push(&mut self, block: Bytes) {
        self.tip.push(block);
        self.appending += 1;
    }

    /// Close the in-flight apply: the appended blocks stay in the tip and
    /// the counter is handed to the update record.
    pub fn take_appending(&mut self) -> u64 {
        std::mem::take(&mut self.appending)
    }

    /// Linearizer popped the batch that produced the last `count` blocks.
    pub fn on_undo(&mut self, count: u64) {
        debug_assert!(count <= self.tip_length());
        let keep = self.tip.len().saturating_sub(count as usize);
        self.tip.truncate(keep);
    }

    /// Promote the oldest `count` tip blocks into the backing log.
    /// Indexed blocks cannot be undone.
    pub fn on_index(&mut self, count: u64) -> Result<(), BaseError> {
        debug_assert!(count <= self.tip_length());
        if count == 0 {
            return Ok(());
        }
        let log = self
            .log
            .as_mut()
            .expect("core must be ready before indexing");
        let drained: Vec<Bytes> = self.tip.drain(..count as usize).collect();
        log.append(&drained)?;
        Ok(())
    }

    /// Read across both regions: the indexed prefix, then the tip.
    pub fn get(&self, seq: u64) -> Result<Option<Bytes>, BaseError> {
        let indexed = self.indexed_length();
        if seq < indexed {
            let log = self.log.as_ref().expect("indexed region implies a log");
            return Ok(log.get(seq)?);
        }
        Ok(self.tip.get((seq - indexed) as usize).cloned())
    }

    fn attach(&mut self, log: Box<dyn AppendLog>) {
        debug_assert!(self.log.is_none());
        self.log = Some(log);
    }

    pub fn close(&mut self) -> Result<(), BaseError> {
        if let Some(log) = self.log.as_mut() {
            log.close()?;
        }
        Ok(())
    }
}

/// The set of named cores. `get` creates lazily; the engine readies pending
/// cores at the end of each advance tick.
pub struct ViewStore {
    cores: Vec<ViewCore>,
    by_name: HashMap<ViewName, CoreId>,
    /// Nonzero while an apply call is active; append handles check it.
    applying: u32,
}

impl ViewStore {
    pub(crate) fn new() -> Self {
        Self {
            cores: Vec::new(),
            by_name: HashMap::new(),
            applying: 0,
        }
    }

    /// Session on the named core, creating it lazily.
    pub fn get(&mut self, name: &str) -> Result<CoreId, BaseError> {
        let name = ViewName::parse(name).map_err(BaseError::handler)?;
        if let Some(&id) = self.by_name.get(&name) {
            return Ok(id);
        }
        let id = CoreId(self.cores.len());
        debug!(view = %name, "creating view core");
        self.cores.push(ViewCore {
            name: name.clone(),
            log: None,
            tip: Vec::new(),
            appending: 0,
        });
        self.by_name.insert(name, id);
        Ok(id)
    }

    pub fn contains(&self, name: &str) -> bool {
        ViewName::parse(name)
            .map(|n| self.by_name.contains_key(&n))
            .unwrap_or(false)
    }

    pub(crate) fn core(&self, id: CoreId) -> &ViewCore {
        &self.cores[id.0]
    }

    pub(crate) fn core_mut(&mut self, id: CoreId) -> &mut ViewCore {
        &mut self.cores[id.0]
    }

    pub(crate) fn cores(&self) -> impl Iterator<Item = (CoreId, &ViewCore)> {
        self.cores.iter().enumerate().map(|(i, c)| (CoreId(i), c))
    }

    pub(crate) fn cores_mut(&mut self) -> impl Iterator<Item = (CoreId, &mut ViewCore)> {
        self.cores
            .iter_mut()
            .enumerate()
            .map(|(i, c)| (CoreId(i), c))
    }

    pub(crate) fn begin_apply(&mut self) {
        self.applying += 1;
    }

    pub(crate) fn end_apply(&mut self) {
        debug_assert!(self.applying > 0);
        self.applying -= 1;
    }

    pub(crate) fn in_apply(&self) -> bool {
        self.applying > 0
    }

    /// Attach backing logs to cores created since the last tick.
    pub(crate) fn ready_pending(
        &mut self,
        mut open: impl FnMut(&ViewName) -> Result<Box<dyn AppendLog>, BaseError>,
    ) -> Result<(), BaseError> {
        for core in &mut self.cores {
            if core.log.is_none() {
                let log = open(&core.name)?;
                core.attach(log);
            }
        }
        Ok(())
    }

    pub(crate) fn close(&mut self) -> Result<(), BaseError> {
        for core in &mut self.cores {
            core.close()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::memory::{MemoryNamespace, MemoryStore};
    use crate::log::LogStore;

    fn readied_store(ns: &MemoryNamespace) -> (ViewStore, CoreId) {
        let mut views = ViewStore::new();
        let id = views.get("events").unwrap();
        let mut store = MemoryStore::writer(ns.clone(), b"local");
        views
            .ready_pending(|name| {
                let log = store.open_named(&name.storage_name())?;
                Ok(Box::new(log) as Box<dyn AppendLog>)
            })
            .unwrap();
        (views, id)
    }

    #[test]
    fn get_is_idempotent_per_name() {
        let mut views = ViewStore::new();
        let a = views.get("events").unwrap();
        let b = views.get("events").unwrap();
        assert_eq!(a, b);
        assert_ne!(views.get("other").unwrap(), a);
    }

    #[test]
    fn get_rejects_reserved_names() {
        let mut views = ViewStore::new();
        assert!(views.get("_system").is_err());
    }

    #[test]
    fn three_regions_track_lengths() {
        let ns = MemoryNamespace::new();
        let (mut views, id) = readied_store(&ns);
        let core = views.core_mut(id);
        core.push(Bytes::from_static(b"a"));
        core.push(Bytes::from_static(b"b"));
        assert_eq!(core.take_appending(), 2);
        assert_eq!(core.take_appending(), 0);
        assert_eq!(core.tip_length(), 2);
        assert_eq!(core.indexed_length(), 0);

        core.on_index(1).unwrap();
        assert_eq!(core.indexed_length(), 1);
        assert_eq!(core.tip_length(), 1);
        assert_eq!(core.length(), 2);
    }

    #[test]
    fn undo_truncates_only_the_tip() {
        let ns = MemoryNamespace::new();
        let (mut views, id) = readied_store(&ns);
        let core = views.core_mut(id);
        for b in [b"a" as &[u8], b"b", b"c"] {
            core.push(Bytes::copy_from_slice(b));
        }
        core.take_appending();
        core.on_index(1).unwrap();
        core.on_undo(2);
        assert_eq!(core.indexed_length(), 1);
        assert_eq!(core.tip_length(), 0);
        assert_eq!(core.get(0).unwrap().unwrap(), Bytes::from_static(b"a"));
    }

    #[test]
    fn reads_span_both_regions() {
        let ns = MemoryNamespace::new();
        let (mut views, id) = readied_store(&ns);
        let core = views.core_mut(id);
        core.push(Bytes::from_static(b"a"));
        core.push(Bytes::from_static(b"b"));
        core.take_appending();
        core.on_index(1).unwrap();
        assert_eq!(core.get(0).unwrap().unwrap(), Bytes::from_static(b"a"));
        assert_eq!(core.get(1).unwrap().unwrap(), Bytes::from_static(b"b"));
        assert!(core.get(2).unwrap().is_none());
    }

    #[test]
    fn indexed_blocks_survive_in_backing_log() {
        let ns = MemoryNamespace::new();
        {
            let (mut views, id) = readied_store(&ns);
            let core = views.core_mut(id);
            core.push(Bytes::from_static(b"a"));
            core.take_appending();
            core.on_index(1).unwrap();
        }
        let mut store = MemoryStore::writer(ns.clone(), b"local");
        let log = store.open_named("view/events").unwrap();
        assert_eq!(log.length(), 1);
    }
}
