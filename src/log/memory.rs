//! In-process reference transport.
//!
//! A [`MemoryNamespace`] is a shared map of named block vectors. Every
//! participant opened on the same namespace sees appends from every other
//! participant immediately, which stands in for replication in tests and
//! single-process demos. Writability is still enforced per participant: a
//! `MemoryLog` only accepts appends from the side that owns it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use bytes::Bytes;

use super::{AppendLog, LogError, LogStore};
use crate::core::WriterKey;

type Blocks = Rc<RefCell<Vec<Bytes>>>;

/// Shared storage; clone handles freely.
#[derive(Clone, Default)]
pub struct MemoryNamespace {
    logs: Rc<RefCell<HashMap<String, Blocks>>>,
}

impl MemoryNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    fn blocks(&self, name: &str) -> Blocks {
        self.logs
            .borrow_mut()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Number of distinct logs created so far.
    pub fn log_count(&self) -> usize {
        self.logs.borrow().len()
    }
}

/// One participant's view of a [`MemoryNamespace`].
///
/// Writer oplogs are shared across the namespace (that is the replication
/// stand-in); named logs (views, the system digest) are scoped to this
/// participant's `device`, the way each peer materializes its own views.
pub struct MemoryStore {
    namespace: MemoryNamespace,
    local: Option<WriterKey>,
    device: String,
}

impl MemoryStore {
    pub fn new(
        namespace: MemoryNamespace,
        local: Option<WriterKey>,
        device: impl Into<String>,
    ) -> Self {
        Self {
            namespace,
            local,
            device: device.into(),
        }
    }

    /// A writable participant with a seed-derived local key. Reopening with
    /// the same seed finds the same local state.
    pub fn writer(namespace: MemoryNamespace, seed: &[u8]) -> Self {
        let key = WriterKey::from_seed(seed);
        Self::new(namespace, Some(key), key.short())
    }

    /// A read-only participant.
    pub fn reader(namespace: MemoryNamespace, device: &str) -> Self {
        Self::new(namespace, None, device)
    }
}

impl LogStore for MemoryStore {
    type Log = MemoryLog;

    fn open_writer(&mut self, key: &WriterKey) -> Result<Self::Log, LogError> {
        let name = format!("writer/{key}");
        Ok(MemoryLog {
            key: *key,
            name: name.clone(),
            blocks: self.namespace.blocks(&name),
            writable: self.local == Some(*key),
            closed: false,
        })
    }

    fn open_named(&mut self, name: &str) -> Result<Self::Log, LogError> {
        let scoped = format!("device/{}/{}", self.device, name);
        Ok(MemoryLog {
            key: WriterKey::from_seed(scoped.as_bytes()),
            name: scoped.clone(),
            blocks: self.namespace.blocks(&scoped),
            writable: true,
            closed: false,
        })
    }

    fn local_key(&self) -> Option<WriterKey> {
        self.local
    }
}

pub struct MemoryLog {
    key: WriterKey,
    name: String,
    blocks: Blocks,
    writable: bool,
    closed: bool,
}

impl MemoryLog {
    fn ensure_open(&self) -> Result<(), LogError> {
        if self.closed {
            return Err(LogError::Closed {
                name: self.name.clone(),
            });
        }
        Ok(())
    }
}

impl AppendLog for MemoryLog {
    fn key(&self) -> WriterKey {
        self.key
    }

    fn length(&self) -> u64 {
        self.blocks.borrow().len() as u64
    }

    fn has(&self, seq: u64) -> bool {
        seq < self.length()
    }

    fn get(&self, seq: u64) -> Result<Option<Bytes>, LogError> {
        self.ensure_open()?;
        Ok(self.blocks.borrow().get(seq as usize).cloned())
    }

    fn append(&mut self, blocks: &[Bytes]) -> Result<u64, LogError> {
        self.ensure_open()?;
        if !self.writable {
            return Err(LogError::NotWritable {
                name: self.name.clone(),
            });
        }
        let mut stored = self.blocks.borrow_mut();
        stored.extend(blocks.iter().cloned());
        Ok(stored.len() as u64)
    }

    fn close(&mut self) -> Result<(), LogError> {
        self.closed = true;
        Ok(())
    }
}
