//! Causal clocks: the frontier of writer lengths reachable from a node.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use super::identity::WriterKey;

/// Mapping from writer to the highest observed length reachable from the
/// owning node. Entries already absorbed into the indexed prefix are pruned;
/// an entirely absorbed node carries no clock at all (see `Node::clock`).
#[derive(Clone, Default, PartialEq, Eq, Serialize)]
pub struct Clock(BTreeMap<WriterKey, u64>);

impl Clock {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, key: &WriterKey) -> u64 {
        self.0.get(key).copied().unwrap_or(0)
    }

    /// Raise the entry for `key` to at least `length`.
    pub fn observe(&mut self, key: WriterKey, length: u64) {
        let entry = self.0.entry(key).or_insert(0);
        if *entry < length {
            *entry = length;
        }
    }

    /// Pointwise maximum with `other`.
    pub fn merge(&mut self, other: &Clock) {
        for (key, &length) in &other.0 {
            self.observe(*key, length);
        }
    }

    /// Pointwise maximum with `other`, skipping entries for which
    /// `absorbed` reports the length as already indexed.
    pub fn merge_pruned(&mut self, other: &Clock, absorbed: impl Fn(&WriterKey, u64) -> bool) {
        for (key, &length) in &other.0 {
            if absorbed(key, length) {
                continue;
            }
            self.observe(*key, length);
        }
    }

    pub fn includes(&self, key: &WriterKey, length: u64) -> bool {
        self.get(key) >= length
    }

    pub fn remove(&mut self, key: &WriterKey) -> Option<u64> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&WriterKey, u64)> {
        self.0.iter().map(|(k, &v)| (k, v))
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, length) in self.iter() {
            map.entry(&key.short(), &length);
        }
        map.finish()
    }
}

impl FromIterator<(WriterKey, u64)> for Clock {
    fn from_iter<I: IntoIterator<Item = (WriterKey, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
