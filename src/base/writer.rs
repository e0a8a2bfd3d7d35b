//! Per-writer log state: the cached tail of unindexed entries and the
//! resolution of the next causally-ready node.

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use bytes::Bytes;
use tracing::trace;

use super::error::BaseError;
use crate::core::{Checkpoint, Head, Limits, Node, NodeDraft, OplogMessage, WriterKey};
use crate::log::AppendLog;

/// Answers whether `(key, length)` is already part of the committed prefix.
/// Implemented by the system view; tests stub it.
pub(crate) trait IndexedLookup {
    fn is_indexed(&self, key: &WriterKey, length: u64) -> bool;
}

pub(crate) struct Writer<L: AppendLog> {
    log: L,
    key: WriterKey,
    local: bool,
    /// Highest ingested length; the backing log may be longer.
    length: u64,
    /// Last linearized length.
    indexed: u64,
    /// Oldest length still retained in `nodes`.
    offset: u64,
    nodes: VecDeque<Rc<Node>>,
    /// Fully resolved next node, ready to enter the linearizer.
    next: Option<Rc<Node>>,
    /// Decoded but dependency-pending next node.
    next_cache: Option<NodeDraft>,
}

impl<L: AppendLog> Writer<L> {
    pub fn new(log: L, key: WriterKey, local: bool, indexed: u64) -> Self {
        Self {
            log,
            key,
            local,
            length: indexed,
            indexed,
            offset: indexed,
            nodes: VecDeque::new(),
            next: None,
            next_cache: None,
        }
    }

    pub fn key(&self) -> WriterKey {
        self.key
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn indexed(&self) -> u64 {
        self.indexed
    }

    pub fn set_indexed(&mut self, length: u64) {
        if self.indexed < length {
            self.indexed = length;
        }
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut L {
        &mut self.log
    }

    /// Newest cached node.
    pub fn head(&self) -> Option<&Rc<Node>> {
        self.nodes.back()
    }

    /// Drop and return the oldest cached node.
    pub fn shift(&mut self) -> Option<Rc<Node>> {
        let node = self.nodes.pop_front()?;
        self.offset += 1;
        Some(node)
    }

    /// Node at absolute length `seq`, if still cached.
    pub fn get_cached(&self, seq: u64) -> Option<Rc<Node>> {
        if seq <= self.offset || seq > self.length {
            return None;
        }
        self.nodes.get((seq - self.offset - 1) as usize).cloned()
    }

    /// Truncate the cache to the digest length `len` after a restart: the
    /// committed prefix is exactly what the digest says, everything above it
    /// will be re-ingested.
    pub fn reset(&mut self, len: u64) {
        if len < self.offset {
            self.nodes.clear();
            self.offset = len;
        } else {
            self.nodes.truncate((len - self.offset) as usize);
        }
        self.length = len;
        self.indexed = len;
        self.next = None;
        self.next_cache = None;
    }

    /// Build and cache a node for a local value. Heads are in-memory node
    /// references; the clock is the union of their clocks capped at each
    /// head's length, plus the self entry.
    pub fn append(&mut self, value: Option<Bytes>, heads: &[Rc<Node>], batch: u32) -> Rc<Node> {
        debug_assert!(self.local, "append is only valid on the local writer");
        let mut draft = NodeDraft::new(
            self.key,
            self.length + 1,
            value,
            heads
                .iter()
                .map(|h| Head::new(h.writer(), h.length()))
                .collect(),
            batch,
        );
        for head in heads {
            if let Some(clock) = &*head.clock() {
                draft.clock.merge(clock);
            }
            draft.clock.observe(head.writer(), head.length());
            draft.dependencies.push(head.clone());
        }
        let node = draft.publish();
        self.nodes.push_back(node.clone());
        self.length += 1;
        node
    }

    /// Number of ingested nodes not yet persisted to the backing log.
    pub fn unflushed(&self) -> u64 {
        self.length.saturating_sub(self.log.length())
    }

    /// Cached nodes in `(from, to]`, oldest first.
    pub fn cached_range(&self, from: u64, to: u64) -> impl Iterator<Item = &Rc<Node>> {
        let start = from.saturating_sub(self.offset) as usize;
        let end = (to.saturating_sub(self.offset) as usize).min(self.nodes.len());
        self.nodes.range(start..end)
    }

    /// Decode the block at the ingest frontier into `next_cache` if the
    /// backing log has it. Partial progress is kept across ticks.
    fn fetch_next(&mut self, limits: &Limits) -> Result<(), BaseError> {
        if self.next_cache.is_some() || self.length >= self.log.length() {
            return Ok(());
        }
        let seq = self.length;
        let Some(raw) = self.log.get(seq)? else {
            return Ok(());
        };
        let msg = OplogMessage::decode(&raw, limits).map_err(|source| BaseError::BlockDecode {
            writer: self.key.short(),
            seq,
            source,
        })?;
        self.next_cache = Some(NodeDraft::new(
            self.key,
            seq + 1,
            msg.value,
            msg.heads,
            msg.batch,
        ));
        Ok(())
    }

    /// Move the resolved `next` into the cache and return it.
    fn advance_next(&mut self) -> Option<Rc<Node>> {
        let node = self.next.take()?;
        self.nodes.push_back(node.clone());
        self.length += 1;
        Some(node)
    }

    /// Drop cached nodes that are indexed and no longer referenced by any
    /// non-indexed clock (clocks referencing them were pruned on resolve).
    pub fn trim(&mut self) {
        while let Some(front) = self.nodes.front() {
            if !front.is_indexed() || front.length() > self.indexed {
                break;
            }
            self.shift();
        }
    }

    /// Read the best checkpoint this writer's log carries: follow the tail's
    /// `checkpointer` back-pointer to the carrying entry.
    pub fn get_checkpoint(&self, limits: &Limits) -> Result<Option<Checkpoint>, BaseError> {
        let length = self.log.length();
        if length == 0 {
            return Ok(None);
        }
        let tail_seq = length - 1;
        let Some(raw) = self.log.get(tail_seq)? else {
            return Ok(None);
        };
        let tail = OplogMessage::decode(&raw, limits).map_err(|source| BaseError::BlockDecode {
            writer: self.key.short(),
            seq: tail_seq,
            source,
        })?;
        if tail.checkpointer == 0 {
            return Ok(tail.checkpoint);
        }
        let seq = tail_seq.saturating_sub(u64::from(tail.checkpointer));
        let Some(raw) = self.log.get(seq)? else {
            return Ok(None);
        };
        let carrier = OplogMessage::decode(&raw, limits).map_err(|source| {
            BaseError::BlockDecode {
                writer: self.key.short(),
                seq,
                source,
            }
        })?;
        Ok(carrier.checkpoint)
    }

    pub fn close(&mut self) -> Result<(), BaseError> {
        self.log.close()?;
        Ok(())
    }
}

/// The live writer table, indexed by key.
pub(crate) struct WriterSet<L: AppendLog> {
    all: Vec<Writer<L>>,
    by_key: HashMap<WriterKey, usize>,
}

impl<L: AppendLog> WriterSet<L> {
    pub fn new() -> Self {
        Self {
            all: Vec::new(),
            by_key: HashMap::new(),
        }
    }

    pub fn insert(&mut self, writer: Writer<L>) -> usize {
        let index = self.all.len();
        self.by_key.insert(writer.key(), index);
        self.all.push(writer);
        index
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn index_of(&self, key: &WriterKey) -> Option<usize> {
        self.by_key.get(key).copied()
    }

    pub fn by_index_mut(&mut self, index: usize) -> &mut Writer<L> {
        &mut self.all[index]
    }

    pub fn get(&self, key: &WriterKey) -> Option<&Writer<L>> {
        self.index_of(key).map(|i| &self.all[i])
    }

    pub fn get_mut(&mut self, key: &WriterKey) -> Option<&mut Writer<L>> {
        let index = self.index_of(key)?;
        Some(&mut self.all[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Writer<L>> {
        self.all.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Writer<L>> {
        self.all.iter_mut()
    }

    /// Empty the table, returning every writer (restart teardown).
    pub fn drain_all(&mut self) -> Vec<Writer<L>> {
        self.by_key.clear();
        std::mem::take(&mut self.all)
    }
}

/// Try to advance writer `index` one step: decode the block at its ingest
/// frontier and resolve its head dependencies against the rest of the set.
///
/// Idempotent across ticks. Returns the resolved node once every head either
/// resolves to a cached peer node or is dropped as already consumed; returns
/// `None` (keeping partial progress) while a dependency is missing.
pub(crate) fn ensure_next<L: AppendLog>(
    writers: &mut WriterSet<L>,
    index: usize,
    system: &impl IndexedLookup,
    limits: &Limits,
) -> Result<Option<Rc<Node>>, BaseError> {
    {
        let writer = writers.by_index_mut(index);
        if writer.next.is_some() {
            return Ok(writer.advance_next());
        }
        writer.fetch_next(limits)?;
        if writer.next_cache.is_none() {
            return Ok(None);
        }
    }

    // Resolution borrows the rest of the set immutably, so take the draft
    // out and put it back if a dependency is still missing.
    let mut draft = writers.by_index_mut(index).next_cache.take().expect("fetched above");

    // Heads resolved on an earlier tick occupy the front of `heads`, one per
    // entry of `dependencies`; resume after them.
    let mut h = draft.dependencies.len();
    while h < draft.heads.len() {
        let head = draft.heads[h];
        let Some(peer) = writers.get(&head.key) else {
            trace!(
                writer = %draft.writer.short(),
                head = %head.key.short(),
                "dependency writer unknown, waiting"
            );
            writers.by_index_mut(index).next_cache = Some(draft);
            return Ok(None);
        };
        if peer.indexed() >= head.length || system.is_indexed(&head.key, head.length) {
            // Dependency already consumed by the committed prefix.
            draft.heads.swap_remove(h);
            continue;
        }
        let Some(dep) = peer.get_cached(head.length) else {
            writers.by_index_mut(index).next_cache = Some(draft);
            return Ok(None);
        };
        if let Some(clock) = &*dep.clock() {
            draft
                .clock
                .merge_pruned(clock, |key, length| system.is_indexed(key, length));
        }
        draft.clock.observe(head.key, head.length);
        draft.dependencies.push(dep);
        h += 1;
    }

    let node = draft.publish();
    let writer = writers.by_index_mut(index);
    writer.next = Some(node);
    Ok(writer.advance_next())
}
