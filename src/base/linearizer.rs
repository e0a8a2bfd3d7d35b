//! Deterministic linearization of the causal DAG.
//!
//! Candidate nodes are pushed in per-writer order via `add_head`; `update`
//! recomputes the total order and reports how it moved: newly committed
//! nodes, the provisional tip above them, how much of the previous tip
//! survived (`shared`), and how much must be undone (`popped`).
//!
//! Both the order and the committed prefix are pure functions of the current
//! head set, so participants holding the same heads agree on both:
//!
//! - the order is the linear extension that emits, among the nodes whose
//!   causal frontier is fully emitted, the one with the smallest writer key
//!   (lengths within a writer are already chained);
//! - a prefix node is committed once the current head of every indexer
//!   causally includes it. Any later node of any indexer also includes it,
//!   so its position can never change again.

use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::core::{Head, Node, WriterKey};

/// One recomputation of the order.
pub struct LinearizerUpdate {
    /// Nodes newly committed to the total order, in order.
    pub indexed: Vec<Rc<Node>>,
    /// Provisional order above the committed prefix.
    pub tip: Vec<Rc<Node>>,
    /// Leading entries of `indexed ++ tip` equal to the previously returned
    /// sequence; callers skip reapplying them.
    pub shared: usize,
    /// Previously returned tip entries that must be undone first.
    pub popped: usize,
}

impl LinearizerUpdate {
    pub fn length(&self) -> usize {
        self.indexed.len() + self.tip.len()
    }
}

pub(crate) struct Linearizer {
    /// Writers whose heads decide commitment, sorted by key.
    indexers: Vec<WriterKey>,
    /// Un-committed nodes per writer, in chain order.
    pending: BTreeMap<WriterKey, Vec<Rc<Node>>>,
    /// Current DAG sinks: latest added node per writer, or the digest seed.
    heads: Vec<Rc<Node>>,
    /// Committed length per writer.
    indexed: BTreeMap<WriterKey, u64>,
    /// Provisional order returned by the previous update.
    tip: Vec<Rc<Node>>,
    dirty: bool,
}

impl Linearizer {
    /// Seed a fresh linearizer from the authoritative digest: the indexer
    /// set, their committed lengths, and the committed heads as synthetic
    /// nodes so local appends have something to reference.
    pub fn new(mut indexers: Vec<WriterKey>, committed: &[Head]) -> Self {
        indexers.sort();
        indexers.dedup();
        let indexed: BTreeMap<WriterKey, u64> =
            committed.iter().map(|h| (h.key, h.length)).collect();
        let heads = committed
            .iter()
            .map(|h| Node::seed(h.key, h.length))
            .collect();
        Self {
            indexers,
            pending: BTreeMap::new(),
            heads,
            indexed,
            tip: Vec::new(),
            dirty: false,
        }
    }

    pub fn indexers(&self) -> &[WriterKey] {
        &self.indexers
    }

    /// Committed length of `key` as this linearizer has decided it.
    pub fn indexed_length(&self, key: &WriterKey) -> u64 {
        self.indexed.get(key).copied().unwrap_or(0)
    }

    /// Current DAG sinks; a local append snapshots these as its heads.
    pub fn heads(&self) -> &[Rc<Node>] {
        &self.heads
    }

    /// Push the next node of a writer. Nodes of one writer must arrive in
    /// chain order.
    pub fn add_head(&mut self, node: Rc<Node>) {
        let expected_first = self.indexed_length(&node.writer()) + 1;
        let chain = self.pending.entry(node.writer()).or_default();
        debug_assert!(
            chain
                .last()
                .map(|prev| prev.length() + 1 == node.length())
                .unwrap_or(node.length() == expected_first),
            "nodes must be added in chain order"
        );
        chain.push(node.clone());

        // The new node supersedes every sink it causally includes.
        // Order of `heads` does not matter, so pop-and-swap.
        let mut i = 0;
        while i < self.heads.len() {
            let head = &self.heads[i];
            if node.causally_includes(&head.writer(), head.length()) {
                self.heads.swap_remove(i);
            } else {
                i += 1;
            }
        }
        self.heads.push(node);
        self.dirty = true;
    }

    /// Recompute the order. Returns `None` when nothing changed.
    pub fn update(&mut self) -> Option<LinearizerUpdate> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;

        let order = self.linear_extension();
        let committed = self.committed_prefix(&order);

        let shared = self
            .tip
            .iter()
            .zip(order.iter())
            .take_while(|(a, b)| Rc::ptr_eq(a, b))
            .count();
        let popped = self.tip.len() - shared;

        if popped == 0 && committed == 0 && order.len() == self.tip.len() {
            return None;
        }

        let mut order = order;
        let tip = order.split_off(committed);
        let indexed = order;

        for node in &indexed {
            node.mark_indexed();
            self.indexed.insert(node.writer(), node.length());
            let chain = self
                .pending
                .get_mut(&node.writer())
                .expect("committed node is pending");
            // Committed nodes are the oldest of their chain.
            debug_assert!(Rc::ptr_eq(&chain[0], node));
            chain.remove(0);
        }
        self.pending.retain(|_, chain| !chain.is_empty());

        if !indexed.is_empty() {
            debug!(
                count = indexed.len(),
                tip = tip.len(),
                "linearizer committed prefix"
            );
        }
        if popped > 0 {
            debug!(popped, shared, "linearizer reordered tip");
        }

        self.tip = tip.clone();
        Some(LinearizerUpdate {
            indexed,
            tip,
            shared,
            popped,
        })
    }

    /// The deterministic linear extension of all pending nodes. Atomic
    /// groups enter whole or not at all, and stay contiguous: once a group's
    /// first member is emitted the rest follows immediately (each member's
    /// causal frontier is its predecessor plus the group's shared snapshot,
    /// so it is ready by construction).
    fn linear_extension(&self) -> Vec<Rc<Node>> {
        let mut emitted: BTreeMap<WriterKey, u64> = self.indexed.clone();
        let mut cursor: BTreeMap<WriterKey, usize> =
            self.pending.keys().map(|&k| (k, 0)).collect();
        let total: usize = self.pending.values().map(Vec::len).sum();
        let mut order = Vec::with_capacity(total);

        loop {
            // Smallest-keyed writer whose next pending node has its whole
            // causal frontier emitted. Writer sets are small; a linear scan
            // over the candidates matches the access pattern.
            let mut picked: Option<WriterKey> = None;
            for (key, chain) in &self.pending {
                let at = cursor[key];
                if at >= chain.len() {
                    continue;
                }
                if !self.is_ready(&chain[at], &emitted) {
                    continue;
                }
                if !Self::group_complete(chain, at) {
                    // The group's tail has not been ingested yet.
                    continue;
                }
                picked = Some(*key);
                break;
            }
            let Some(key) = picked else {
                break;
            };
            let chain = &self.pending[&key];
            let at = cursor.get_mut(&key).expect("cursor exists");
            loop {
                let node = chain.get(*at).expect("group verified complete");
                emitted.insert(key, node.length());
                *at += 1;
                let batch_end = node.is_batch_end();
                order.push(node.clone());
                if batch_end {
                    break;
                }
            }
        }

        if order.len() < total {
            trace!(
                blocked = total - order.len(),
                "pending nodes await an unresolved causal past or group tail"
            );
        }
        order
    }

    fn group_complete(chain: &[Rc<Node>], from: usize) -> bool {
        chain[from..].iter().any(|n| n.is_batch_end())
    }

    fn is_ready(&self, node: &Rc<Node>, emitted: &BTreeMap<WriterKey, u64>) -> bool {
        let clock = node.clock();
        let Some(clock) = &*clock else {
            // Already indexed; cannot be pending.
            return true;
        };
        for (key, length) in clock.iter() {
            if *key == node.writer() {
                // Own chain: predecessor ordering is the pending queue.
                continue;
            }
            if emitted.get(key).copied().unwrap_or(0) < length {
                return false;
            }
        }
        true
    }

    /// Longest prefix of `order` in which every node is causally included by
    /// the current head of every indexer, cut back to the last atomic-group
    /// boundary so commitment never splits a batch.
    fn committed_prefix(&self, order: &[Rc<Node>]) -> usize {
        if self.indexers.is_empty() {
            return 0;
        }
        let mut indexer_heads = Vec::with_capacity(self.indexers.len());
        for key in &self.indexers {
            let head = self
                .pending
                .get(key)
                .and_then(|chain| chain.last().cloned());
            match head {
                Some(head) => indexer_heads.push(head),
                // An indexer that has not spoken commits nothing.
                None => return 0,
            }
        }

        let mut committed = 0;
        let mut covered = 0;
        'scan: for node in order {
            for head in &indexer_heads {
                if !head.causally_includes(&node.writer(), node.length()) {
                    break 'scan;
                }
            }
            covered += 1;
            if node.is_batch_end() {
                committed = covered;
            }
        }
        committed
    }
}
