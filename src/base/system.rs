//! The system view: authoritative membership and committed heads.
//!
//! Membership changes made during apply are staged in the view's tip and
//! only take effect when the change commits, at which point the engine
//! flushes a fresh digest and restarts. The digest at the tail of the
//! backing log is the source of truth on startup.

use tracing::{debug, info};

use super::error::BaseError;
use super::writer::IndexedLookup;
use crate::core::{
    sha256_block, Checkpoint, Head, Limits, SystemDigest, SystemOp, ViewName, WriterKey,
};
use crate::log::AppendLog;

use std::collections::BTreeMap;

/// Backing log name; reserved, so user views can never collide with it.
pub(crate) fn system_view_name() -> ViewName {
    ViewName::internal("_system")
}

pub(crate) struct SystemView {
    log: Box<dyn AppendLog>,
    /// Committed membership: key to committed length (0 = member with no
    /// committed entries yet).
    writers: BTreeMap<WriterKey, u64>,
    /// Heads in force at the last committed point.
    heads: Vec<Head>,
    /// Checkpoint of the latest flushed digest.
    checkpoint: Option<Checkpoint>,
    /// Speculative membership ops above the committed digest.
    staged: Vec<SystemOp>,
    bootstrapped: bool,
}

impl std::fmt::Debug for SystemView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemView")
            .field("log", &format_args!("<dyn AppendLog key={:?}>", self.log.key()))
            .field("writers", &self.writers)
            .field("heads", &self.heads)
            .field("checkpoint", &self.checkpoint)
            .field("staged", &self.staged)
            .field("bootstrapped", &self.bootstrapped)
            .finish()
    }
}

impl SystemView {
    /// Open the system view, rehydrating from the digest at the log's tail.
    /// A digest that fails to decode is fatal; there is no recovery path.
    pub fn open(log: Box<dyn AppendLog>, limits: &Limits) -> Result<Self, BaseError> {
        let length = log.length();
        if length == 0 {
            return Ok(Self {
                log,
                writers: BTreeMap::new(),
                heads: Vec::new(),
                checkpoint: None,
                staged: Vec::new(),
                bootstrapped: false,
            });
        }

        let raw = log
            .get(length - 1)?
            .ok_or_else(|| BaseError::CorruptDigest {
                reason: format!("tail block {} missing", length - 1),
            })?;
        let digest = SystemDigest::decode(&raw, limits).map_err(|e| BaseError::CorruptDigest {
            reason: e.to_string(),
        })?;
        let checkpoint = Checkpoint {
            length,
            digest: sha256_block(&raw),
        };
        info!(
            writers = digest.writers.len(),
            digest_length = length,
            "system view rehydrated"
        );
        Ok(Self {
            log,
            writers: digest.writers.iter().map(|h| (h.key, h.length)).collect(),
            heads: digest.heads,
            checkpoint: Some(checkpoint),
            staged: Vec::new(),
            bootstrapped: true,
        })
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    /// Committed membership, sorted by key.
    pub fn members(&self) -> impl Iterator<Item = (&WriterKey, u64)> {
        self.writers.iter().map(|(k, &l)| (k, l))
    }

    pub fn is_member(&self, key: &WriterKey) -> bool {
        self.writers.contains_key(key)
    }

    pub fn committed_heads(&self) -> &[Head] {
        &self.heads
    }

    pub fn checkpoint(&self) -> Option<Checkpoint> {
        self.checkpoint
    }

    /// The committed digest, as it would be persisted right now.
    pub fn digest(&self) -> SystemDigest {
        SystemDigest {
            writers: self
                .writers
                .iter()
                .map(|(&key, &length)| Head { key, length })
                .collect(),
            heads: self.heads.clone(),
            checkpoint: self.checkpoint,
        }
    }

    /// Stage a membership addition. Idempotent additions still count as
    /// system activity so bootstrap commits force the initial digest.
    pub fn add_writer(&mut self, key: WriterKey) {
        debug!(writer = %key.short(), "staging add_writer");
        self.staged.push(SystemOp::AddWriter(key));
    }

    pub fn remove_writer(&mut self, key: WriterKey) {
        debug!(writer = %key.short(), "staging remove_writer");
        self.staged.push(SystemOp::RemoveWriter(key));
    }

    /// Number of speculative ops above the committed digest.
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Undo the most recent `count` staged ops (linearizer popped them).
    pub fn undo(&mut self, count: usize) {
        debug_assert!(count <= self.staged.len());
        self.staged.truncate(self.staged.len().saturating_sub(count));
    }

    /// Commit `count` staged ops (their batch is now indexed) and persist a
    /// new digest carrying `heads`. Returns the new checkpoint.
    ///
    /// The engine persists view blocks before calling this, so a digest
    /// never references unpersisted view data.
    pub fn flush(&mut self, count: usize, heads: Vec<Head>) -> Result<Checkpoint, BaseError> {
        debug_assert!(count <= self.staged.len());
        for op in self.staged.drain(..count) {
            match op {
                SystemOp::AddWriter(key) => {
                    self.writers.entry(key).or_insert(0);
                }
                SystemOp::RemoveWriter(key) => {
                    self.writers.remove(&key);
                }
            }
        }
        for head in &heads {
            if let Some(length) = self.writers.get_mut(&head.key) {
                if *length < head.length {
                    *length = head.length;
                }
            }
        }
        self.heads = heads;

        let digest = self.digest();
        let block = digest.encode()?;
        let length = self.log.append(&[block.clone()])?;
        let checkpoint = Checkpoint {
            length,
            digest: sha256_block(&block),
        };
        self.checkpoint = Some(checkpoint);
        self.bootstrapped = true;
        debug!(
            members = self.writers.len(),
            digest_length = length,
            "system digest flushed"
        );
        Ok(checkpoint)
    }

    /// Raw blocks of the backing log, for introspection.
    pub fn log_length(&self) -> u64 {
        self.log.length()
    }

    pub fn close(&mut self) -> Result<(), BaseError> {
        self.log.close()?;
        Ok(())
    }
}

impl IndexedLookup for SystemView {
    fn is_indexed(&self, key: &WriterKey, length: u64) -> bool {
        if self
            .writers
            .get(key)
            .map(|&committed| length <= committed)
            .unwrap_or(false)
        {
            return true;
        }
        // Writers removed from membership keep their committed frontier in
        // `heads`; references to it still count as indexed.
        self.heads
            .iter()
            .any(|h| h.key == *key && length <= h.length)
    }
}
