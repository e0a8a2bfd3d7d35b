//! Causal-DAG vertices.
//!
//! A `Node` is one entry of one writer's log after ingest: payload, observed
//! heads, resolved dependencies, and the causal clock derived from them.
//! Nodes are shared between a writer's cache and the linearizer; the engine
//! runs on a single logical task, so sharing is `Rc` and the two fields that
//! mutate after publication (`indexed`, the GC'd clock) use cell types.

use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::rc::Rc;

use bytes::Bytes;
use serde::Serialize;

use super::clock::Clock;
use super::identity::WriterKey;

/// Observed tip of a writer, as recorded inside another writer's entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Head {
    pub key: WriterKey,
    pub length: u64,
}

impl Head {
    pub fn new(key: WriterKey, length: u64) -> Self {
        debug_assert!(length >= 1, "head length is 1-based");
        Self { key, length }
    }
}

/// One vertex of the causal DAG.
pub struct Node {
    writer: WriterKey,
    length: u64,
    value: Option<Bytes>,
    heads: Vec<Head>,
    batch: u32,
    dependencies: Vec<Rc<Node>>,
    clock: RefCell<Option<Clock>>,
    indexed: Cell<bool>,
}

impl Node {
    pub fn writer(&self) -> WriterKey {
        self.writer
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn value(&self) -> Option<&Bytes> {
        self.value.as_ref()
    }

    pub fn heads(&self) -> &[Head] {
        &self.heads
    }

    pub fn batch(&self) -> u32 {
        self.batch
    }

    /// Last member of an atomic group.
    pub fn is_batch_end(&self) -> bool {
        self.batch == 1
    }

    pub fn dependencies(&self) -> &[Rc<Node>] {
        &self.dependencies
    }

    /// The causal frontier, or `None` once the node has been indexed and the
    /// clock absorbed into the committed prefix.
    pub fn clock(&self) -> Ref<'_, Option<Clock>> {
        self.clock.borrow()
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed.get()
    }

    /// Commit the node: sets the monotonic indexed flag and drops the clock.
    pub(crate) fn mark_indexed(&self) {
        self.indexed.set(true);
        self.clock.borrow_mut().take();
    }

    /// Whether this node's causal past contains `(key, length)`.
    ///
    /// Falls back to writer/length for the node's own chain so the check
    /// stays answerable after the clock is GC'd.
    pub fn causally_includes(&self, key: &WriterKey, length: u64) -> bool {
        if self.writer == *key && self.length >= length {
            return true;
        }
        match &*self.clock.borrow() {
            Some(clock) => clock.includes(key, length),
            None => false,
        }
    }

    /// A synthetic head used to reseed the linearizer from a digest: no
    /// value, batch 1, clock covering only its own chain, already indexed.
    pub(crate) fn seed(key: WriterKey, length: u64) -> Rc<Node> {
        let mut clock = Clock::new();
        clock.observe(key, length);
        Rc::new(Node {
            writer: key,
            length,
            value: None,
            heads: Vec::new(),
            batch: 1,
            dependencies: Vec::new(),
            clock: RefCell::new(Some(clock)),
            indexed: Cell::new(true),
        })
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("writer", &self.writer.short())
            .field("length", &self.length)
            .field("batch", &self.batch)
            .field("indexed", &self.indexed.get())
            .finish_non_exhaustive()
    }
}

/// A decoded-but-unpublished node: the writer's `next_cache`.
///
/// Dependency resolution mutates it freely across advance ticks; once every
/// head resolves it is published as an immutable shared `Node`.
#[derive(Debug)]
pub struct NodeDraft {
    pub writer: WriterKey,
    pub length: u64,
    pub value: Option<Bytes>,
    pub heads: Vec<Head>,
    pub batch: u32,
    pub dependencies: Vec<Rc<Node>>,
    pub clock: Clock,
}

impl NodeDraft {
    pub fn new(
        writer: WriterKey,
        length: u64,
        value: Option<Bytes>,
        heads: Vec<Head>,
        batch: u32,
    ) -> Self {
        Self {
            writer,
            length,
            value,
            heads,
            batch,
            dependencies: Vec::new(),
            clock: Clock::new(),
        }
    }

    /// Finalize: stamp the self entry and freeze into a shared node.
    pub fn publish(mut self) -> Rc<Node> {
        self.clock.observe(self.writer, self.length);
        Rc::new(Node {
            writer: self.writer,
            length: self.length,
            value: self.value,
            heads: self.heads,
            batch: self.batch,
            dependencies: self.dependencies,
            clock: RefCell::new(Some(self.clock)),
            indexed: Cell::new(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: &str) -> WriterKey {
        WriterKey::from_seed(seed.as_bytes())
    }

    #[test]
    fn publish_stamps_self_clock() {
        let node = NodeDraft::new(key("a"), 4, Some(Bytes::from_static(b"x")), Vec::new(), 1)
            .publish();
        assert!(node.causally_includes(&key("a"), 4));
        assert!(!node.causally_includes(&key("a"), 5));
        assert!(!node.is_indexed());
    }

    #[test]
    fn mark_indexed_drops_clock_but_keeps_own_chain_answerable() {
        let node = NodeDraft::new(key("a"), 2, None, Vec::new(), 1).publish();
        node.mark_indexed();
        assert!(node.is_indexed());
        assert!(node.clock().is_none());
        assert!(node.causally_includes(&key("a"), 2));
        assert!(!node.causally_includes(&key("b"), 1));
    }

    #[test]
    fn seed_nodes_are_indexed_heads() {
        let seed = Node::seed(key("a"), 7);
        assert!(seed.is_indexed());
        assert_eq!(seed.batch(), 1);
        assert!(seed.value().is_none());
        assert!(seed.causally_includes(&key("a"), 7));
    }
}
