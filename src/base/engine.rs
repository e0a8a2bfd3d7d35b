//! The orchestrator: publish local appends, absorb remote progress,
//! linearize, apply, flush, checkpoint, and restart on membership changes.
//!
//! Everything runs on one logical task. Events mark the engine dirty and the
//! debounced advance loop drains all pending work in one pass; a bump that
//! lands during an active pass collapses into exactly one re-run.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, trace, warn};

use super::bump::{Bump, Waker};
use super::error::BaseError;
use super::linearizer::Linearizer;
use super::system::{system_view_name, SystemView};
use super::views::{CoreId, ViewStore};
use super::writer::{ensure_next, Writer, WriterSet};
use crate::core::{Checkpoint, Head, Limits, Node, OplogMessage, WriterKey};
use crate::log::{AppendLog, LogStore};

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// One totally-ordered entry as the apply handler sees it. Heartbeats
/// (null-value blocks) advance heads but never reach apply.
#[derive(Clone, Debug)]
pub struct AppliedEntry {
    /// Whether this entry is already part of the committed prefix.
    pub indexed: bool,
    pub from: WriterKey,
    pub length: u64,
    pub value: Bytes,
    pub heads: Vec<Head>,
}

/// User-supplied view semantics.
///
/// `open` runs once and builds the handler's view object (typically a bundle
/// of [`CoreId`]s); `apply` runs once per atomic batch of the total order
/// and may append view blocks and change membership through the scope.
pub trait Handler {
    type View;

    fn open(&mut self, store: &mut ViewStore) -> Result<Self::View, HandlerError>;

    fn apply(
        &mut self,
        batch: &[AppliedEntry],
        view: &mut Self::View,
        scope: &mut ApplyScope<'_>,
    ) -> Result<(), HandlerError>;
}

/// Capabilities handed to the apply handler. Appends and membership changes
/// are only legal while the owning apply call is active.
pub struct ApplyScope<'a> {
    views: &'a mut ViewStore,
    system: &'a mut SystemView,
}

impl ApplyScope<'_> {
    pub fn append(&mut self, core: CoreId, block: impl Into<Bytes>) -> Result<(), BaseError> {
        if !self.views.in_apply() {
            return Err(BaseError::ApplyViolation);
        }
        self.views.core_mut(core).push(block.into());
        Ok(())
    }

    /// Session on a named core, creating it lazily; it is readied at the
    /// end of the current advance tick.
    pub fn view(&mut self, name: &str) -> Result<CoreId, BaseError> {
        if !self.views.in_apply() {
            return Err(BaseError::ApplyViolation);
        }
        self.views.get(name)
    }

    pub fn view_length(&self, core: CoreId) -> u64 {
        self.views.core(core).length()
    }

    /// Reads during apply see the indexed prefix plus the current tip.
    pub fn view_get(&self, core: CoreId, seq: u64) -> Result<Option<Bytes>, BaseError> {
        self.views.core(core).get(seq)
    }

    pub fn add_writer(&mut self, key: WriterKey) -> Result<(), BaseError> {
        if !self.views.in_apply() {
            return Err(BaseError::ApplyViolation);
        }
        self.system.add_writer(key);
        Ok(())
    }

    pub fn remove_writer(&mut self, key: WriterKey) -> Result<(), BaseError> {
        if !self.views.in_apply() {
            return Err(BaseError::ApplyViolation);
        }
        self.system.remove_writer(key);
        Ok(())
    }

    pub fn is_member(&self, key: &WriterKey) -> bool {
        self.system.is_member(key)
    }
}

/// Constructor options.
pub struct Options {
    /// Writer keys that form the initial membership. Empty means "the local
    /// writer bootstraps alone". Sorted by key so every participant agrees
    /// on the primary bootstrap.
    pub bootstraps: Vec<WriterKey>,
    /// When false, `update` requests a dense download of every writer log.
    pub sparse: bool,
    pub limits: Limits,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            bootstraps: Vec::new(),
            sparse: true,
            limits: Limits::default(),
        }
    }
}

/// One applied batch: how many nodes it covered, how many membership ops it
/// staged, which cores it appended to, and the head frontier after it.
struct UpdateRecord {
    batch: u64,
    system: u64,
    user: Vec<(CoreId, u64)>,
    frontier: Vec<Head>,
}

/// Introspection counters.
#[derive(Clone, Debug, Serialize)]
pub struct Stats {
    pub writers: usize,
    pub indexers: usize,
    pub views: usize,
    pub pending_updates: usize,
    pub applied_nodes: u64,
    pub indexed_unflushed: u64,
    pub tip_length: u64,
    pub system_length: u64,
    pub writable: bool,
}

pub struct Plait<S: LogStore, H: Handler>
where
    S::Log: 'static,
{
    store: S,
    handler: H,
    view: Option<H::View>,
    views: ViewStore,
    system: SystemView,
    linearizer: Linearizer,
    writers: WriterSet<S::Log>,
    removed: Vec<Writer<S::Log>>,
    /// Local writer key, present iff it is in the current writer set.
    local: Option<WriterKey>,
    /// Queued local append groups; `None` values are heartbeats.
    queued: VecDeque<Vec<Option<Bytes>>>,
    /// Ordered nodes above the applied region, awaiting a complete atomic
    /// group (or an apply retry after a handler error).
    pending_apply: VecDeque<Rc<Node>>,
    /// Applied-but-unflushed batches, FIFO in sequence order.
    updates: VecDeque<UpdateRecord>,
    /// Nodes covered by `updates`.
    applied_nodes: u64,
    /// Nodes committed by the linearizer but not yet flushed.
    indexed_unflushed: u64,
    /// Length of the provisional tip as of the last linearizer update.
    tip_len: u64,
    /// Head frontier at the last flush (the digest's heads).
    base_frontier: Vec<Head>,
    /// Checkpoint produced by the last flush, awaiting embedding into the
    /// next local block.
    pending_checkpoint: Option<Checkpoint>,
    /// Hop distance from the local log's tail to its nearest checkpoint
    /// carrier; `None` before any checkpoint was embedded.
    since_checkpoint: Option<u32>,
    bootstraps: Vec<WriterKey>,
    sparse: bool,
    limits: Limits,
    bump: Bump,
    closed: bool,
}

impl<S: LogStore, H: Handler> Plait<S, H>
where
    S::Log: 'static,
{
    pub fn open(mut store: S, mut handler: H, options: Options) -> Result<Self, BaseError> {
        let system_log = store.open_named(&system_view_name().storage_name())?;
        let system = SystemView::open(Box::new(system_log), &options.limits)?;

        let mut bootstraps = options.bootstraps;
        if bootstraps.is_empty() {
            if let Some(key) = store.local_key() {
                bootstraps.push(key);
            }
        }
        bootstraps.sort();
        bootstraps.dedup();

        let mut views = ViewStore::new();
        let view = handler
            .open(&mut views)
            .map_err(|source| BaseError::Handler { source })?;

        let mut base = Self {
            store,
            handler,
            view: Some(view),
            views,
            system,
            linearizer: Linearizer::new(Vec::new(), &[]),
            writers: WriterSet::new(),
            removed: Vec::new(),
            local: None,
            queued: VecDeque::new(),
            pending_apply: VecDeque::new(),
            updates: VecDeque::new(),
            applied_nodes: 0,
            indexed_unflushed: 0,
            tip_len: 0,
            base_frontier: Vec::new(),
            pending_checkpoint: None,
            since_checkpoint: None,
            bootstraps,
            sparse: options.sparse,
            limits: options.limits,
            bump: Bump::new(),
            closed: false,
        };
        base.init_writers()?;
        base.init_since_checkpoint()?;
        base.ready_views()?;
        Ok(base)
    }

    /// Is there a local writer in the current writer set?
    pub fn writable(&self) -> bool {
        self.local.is_some()
    }

    pub fn local_key(&self) -> Option<WriterKey> {
        self.store.local_key()
    }

    /// Handle for transport threads to request an advance.
    pub fn waker(&self) -> Waker {
        self.bump.waker()
    }

    /// The user view object built by the handler's `open`.
    pub fn view(&self) -> &H::View {
        self.view.as_ref().expect("view outlives the engine")
    }

    /// Total view length (indexed prefix plus speculative tip).
    pub fn view_length(&self, core: CoreId) -> u64 {
        self.views.core(core).length()
    }

    pub fn view_indexed_length(&self, core: CoreId) -> u64 {
        self.views.core(core).indexed_length()
    }

    pub fn view_get(&self, core: CoreId, seq: u64) -> Result<Option<Bytes>, BaseError> {
        self.views.core(core).get(seq)
    }

    pub fn stats(&self) -> Stats {
        Stats {
            writers: self.writers.len(),
            indexers: self.linearizer.indexers().len(),
            views: self.views.cores().count(),
            pending_updates: self.updates.len(),
            applied_nodes: self.applied_nodes,
            indexed_unflushed: self.indexed_unflushed,
            tip_length: self.tip_len,
            system_length: self.system.log_length(),
            writable: self.writable(),
        }
    }

    /// Queue one value as its own atomic batch and advance.
    pub fn append(&mut self, value: impl Into<Bytes>) -> Result<(), BaseError> {
        self.append_all(vec![value.into()])
    }

    /// Queue a group of values applied as one atomic batch and advance.
    pub fn append_all(&mut self, values: Vec<Bytes>) -> Result<(), BaseError> {
        if !self.writable() {
            return Err(BaseError::NotWritable);
        }
        if values.is_empty() {
            return Ok(());
        }
        self.queued.push_back(values.into_iter().map(Some).collect());
        self.bump.request();
        self.advance()
    }

    /// Publish a heartbeat: a null block that advances this writer's head
    /// so concurrent entries can commit.
    pub fn ack(&mut self) -> Result<(), BaseError> {
        if !self.writable() {
            return Err(BaseError::NotWritable);
        }
        self.queued.push_back(vec![None]);
        self.bump.request();
        self.advance()
    }

    /// Pull remote transport state and advance.
    pub fn update(&mut self) -> Result<(), BaseError> {
        for writer in self.writers.iter_mut() {
            writer.log_mut().update()?;
            if !self.sparse {
                let length = writer.log().length();
                writer.log_mut().download(0, length)?;
            }
        }
        self.bump.request();
        self.advance()
    }

    /// Best available checkpoint across the current writer set, by greatest
    /// system length.
    pub fn checkpoint(&self) -> Result<Option<Checkpoint>, BaseError> {
        let mut best = self.system.checkpoint();
        for writer in self.writers.iter() {
            if let Some(found) = writer.get_checkpoint(&self.limits)? {
                if best.map(|b| found.length > b.length).unwrap_or(true) {
                    best = Some(found);
                }
            }
        }
        Ok(best)
    }

    pub fn close(&mut self) -> Result<(), BaseError> {
        if self.closed {
            return Ok(());
        }
        for mut writer in self.writers.drain_all() {
            writer.close()?;
        }
        for writer in &mut self.removed {
            writer.close()?;
        }
        self.removed.clear();
        self.views.close()?;
        self.system.close()?;
        self.store.close()?;
        self.closed = true;
        Ok(())
    }

    /// Run the debounced advance loop until the dirty flag stays clear.
    ///
    /// Errors are logged and leave the flag set so the next event retries;
    /// they are also returned so explicit callers see them.
    pub fn advance(&mut self) -> Result<(), BaseError> {
        if !self.bump.try_begin() {
            return Ok(());
        }
        let result = loop {
            if !self.bump.is_dirty() {
                break Ok(());
            }
            self.bump.clear();
            if let Err(e) = self.advance_inner() {
                break Err(e);
            }
        };
        self.bump.end();
        if let Err(e) = &result {
            warn!(error = %e, "advance failed; retrying on next event");
            self.bump.request();
        }
        result
    }

    fn advance_inner(&mut self) -> Result<(), BaseError> {
        loop {
            self.publish_local();
            self.absorb_remote()?;
            let restart = self.linearize_and_apply()?;
            self.flush_local()?;
            if restart {
                debug!("committed membership change; restarting");
                self.restart()?;
                continue;
            }
            self.ready_views()?;
            self.drain_removed()?;
            for writer in self.writers.iter_mut() {
                writer.trim();
            }
            return Ok(());
        }
    }

    /// Step 1: drain queued local values into writer nodes. The first node
    /// of a group snapshots the current linearizer heads; later members
    /// chain on their predecessor.
    fn publish_local(&mut self) {
        let Some(local_key) = self.local else {
            return;
        };
        while let Some(group) = self.queued.pop_front() {
            let heads: Vec<Rc<Node>> = self.linearizer.heads().to_vec();
            let len = group.len();
            for (i, value) in group.into_iter().enumerate() {
                let batch = (len - i) as u32;
                let writer = self.writers.get_mut(&local_key).expect("local writer exists");
                let node = if i == 0 {
                    writer.append(value, &heads, batch)
                } else {
                    let prev = writer.head().cloned().expect("previous group member");
                    writer.append(value, &[prev], batch)
                };
                trace!(length = node.length(), batch, "published local node");
                self.linearizer.add_head(node);
            }
        }
    }

    /// Step 2: loop `ensure_next` across all writers until none advances.
    fn absorb_remote(&mut self) -> Result<(), BaseError> {
        loop {
            let mut progress = false;
            for index in 0..self.writers.len() {
                while let Some(node) =
                    ensure_next(&mut self.writers, index, &self.system, &self.limits)?
                {
                    trace!(
                        writer = %node.writer().short(),
                        length = node.length(),
                        "absorbed remote node"
                    );
                    self.linearizer.add_head(node);
                    progress = true;
                }
            }
            if !progress {
                return Ok(());
            }
        }
    }

    /// Step 3: recompute the order, undo popped speculation, apply new
    /// batches, and flush whatever prefix is now confirmed. Returns whether
    /// a committed membership change demands a restart.
    fn linearize_and_apply(&mut self) -> Result<bool, BaseError> {
        if let Some(update) = self.linearizer.update() {
            if update.popped > 0 {
                let applied_above_commit =
                    self.applied_nodes.saturating_sub(self.indexed_unflushed);
                let unapplied_tail = self.tip_len - applied_above_commit;
                let mut undo_nodes = (update.popped as u64).saturating_sub(unapplied_tail);
                while undo_nodes > 0 {
                    let record = self
                        .updates
                        .pop_back()
                        .expect("popped region is covered by records");
                    undo_nodes = undo_nodes
                        .checked_sub(record.batch)
                        .expect("pops align to apply batches");
                    self.applied_nodes -= record.batch;
                    self.undo_record(&record);
                }
            }

            for node in &update.indexed {
                if let Some(writer) = self.writers.get_mut(&node.writer()) {
                    writer.set_indexed(node.length());
                }
            }

            // Committed nodes still awaiting apply (a handler error backlog)
            // are no longer returned by the linearizer; keep them queued and
            // splice the freshly ordered region after them. Everything the
            // undo loop reverted is below `start` again and gets reapplied.
            let backlog = self.indexed_unflushed.saturating_sub(self.applied_nodes) as usize;
            let start = self.applied_nodes.saturating_sub(self.indexed_unflushed) as usize;
            self.indexed_unflushed += update.indexed.len() as u64;
            self.tip_len = update.tip.len() as u64;

            let mut rebuilt: VecDeque<Rc<Node>> =
                self.pending_apply.iter().take(backlog).cloned().collect();
            rebuilt.extend(
                update
                    .indexed
                    .iter()
                    .chain(update.tip.iter())
                    .skip(start)
                    .cloned(),
            );
            self.pending_apply = rebuilt;
        }

        // Apply every complete atomic group. On handler error the group
        // stays queued and the next tick retries it.
        while let Some(end) = self.pending_apply.iter().position(|n| n.is_batch_end()) {
            let nodes: Vec<Rc<Node>> = self.pending_apply.iter().take(end + 1).cloned().collect();
            self.apply_batch(&nodes)?;
            self.pending_apply.drain(..=end);
        }

        self.flush_confirmed()
    }

    /// Run the user apply over one atomic batch and record its effects.
    fn apply_batch(&mut self, nodes: &[Rc<Node>]) -> Result<(), BaseError> {
        let staged_before = self.system.staged_len();

        // First apply ever: seed membership with every bootstrap key. The
        // staged adds ride in this batch's record, so the bootstrap digest
        // commits (and restarts) with it.
        if !self.system.is_bootstrapped() && self.system.staged_len() == 0 {
            let bootstraps = self.bootstraps.clone();
            for key in bootstraps {
                self.system.add_writer(key);
            }
        }

        let entries: Vec<AppliedEntry> = nodes
            .iter()
            .filter(|n| n.value().is_some())
            .map(|n| AppliedEntry {
                indexed: n.is_indexed(),
                from: n.writer(),
                length: n.length(),
                value: n.value().cloned().expect("filtered on value"),
                heads: n.heads().to_vec(),
            })
            .collect();

        if !entries.is_empty() {
            self.views.begin_apply();
            let mut scope = ApplyScope {
                views: &mut self.views,
                system: &mut self.system,
            };
            let result = self.handler.apply(
                &entries,
                self.view.as_mut().expect("view outlives the engine"),
                &mut scope,
            );
            self.views.end_apply();
            if let Err(source) = result {
                // Roll back the failed call's partial work before surfacing.
                for (_, core) in self.views.cores_mut() {
                    let partial = core.take_appending();
                    core.on_undo(partial);
                }
                let staged_now = self.system.staged_len();
                self.system.undo(staged_now - staged_before);
                return Err(BaseError::Handler { source });
            }
        }

        let mut record = UpdateRecord {
            batch: nodes.len() as u64,
            system: (self.system.staged_len() - staged_before) as u64,
            user: Vec::new(),
            frontier: self.frontier_after(nodes),
        };
        for (id, core) in self.views.cores_mut() {
            let appended = core.take_appending();
            if appended > 0 {
                record.user.push((id, appended));
            }
        }
        self.applied_nodes += record.batch;
        self.updates.push_back(record);
        Ok(())
    }

    /// Step 3b: pop confirmed update records FIFO, persist their view
    /// blocks, and flush a fresh system digest. Stops at (and signals) the
    /// first record that changed membership.
    fn flush_confirmed(&mut self) -> Result<bool, BaseError> {
        // Cores created during this tick's apply need their logs before
        // their blocks can be promoted.
        self.ready_views()?;

        let mut restart = false;
        let mut flushed = false;
        let mut system_ops = 0usize;
        let mut frontier: Option<Vec<Head>> = None;

        while let Some(front) = self.updates.front() {
            if front.batch > self.indexed_unflushed {
                break;
            }
            let record = self.updates.pop_front().expect("checked front");
            for (id, count) in &record.user {
                self.views.core_mut(*id).on_index(*count)?;
            }
            system_ops += record.system as usize;
            self.indexed_unflushed -= record.batch;
            self.applied_nodes -= record.batch;
            frontier = Some(record.frontier);
            flushed = true;
            if system_ops > 0 {
                restart = true;
                break;
            }
        }

        if flushed {
            let heads = frontier.expect("flushed at least one record");
            self.base_frontier = heads.clone();
            let checkpoint = self.system.flush(system_ops, heads)?;
            self.pending_checkpoint = Some(checkpoint);
            debug!(
                system_length = checkpoint.length,
                restart, "flushed confirmed prefix"
            );
        }
        Ok(restart)
    }

    /// Step 4: persist local nodes produced since the last flush, embedding
    /// the freshest checkpoint into the first block after it became
    /// available and back-pointers into the rest.
    fn flush_local(&mut self) -> Result<(), BaseError> {
        let Some(local_key) = self.local else {
            return Ok(());
        };
        let writer = self.writers.get_mut(&local_key).expect("local writer exists");
        if writer.unflushed() == 0 {
            return Ok(());
        }

        let start = writer.log().length();
        let end = writer.length();
        let mut blocks = Vec::with_capacity((end - start) as usize);
        let mut pending_checkpoint = self.pending_checkpoint.take();
        let mut since = self.since_checkpoint;
        for node in writer.cached_range(start, end) {
            let (checkpointer, checkpoint) = match pending_checkpoint.take() {
                Some(found) => {
                    since = Some(0);
                    (0, Some(found))
                }
                None => match since.as_mut() {
                    Some(distance) => {
                        *distance += 1;
                        (*distance, None)
                    }
                    None => (0, None),
                },
            };
            let message = OplogMessage {
                value: node.value().cloned(),
                heads: node.heads().to_vec(),
                batch: node.batch(),
                checkpointer,
                checkpoint,
            };
            blocks.push(message.encode()?);
        }
        self.since_checkpoint = since;
        let length = writer.log_mut().append(&blocks)?;
        debug!(blocks = blocks.len(), length, "flushed local oplog");
        Ok(())
    }

    /// Step 5: teardown and rebuild after a committed membership change.
    /// Undoes all speculative state, re-derives the writer set from the
    /// digest, and reseeds the linearizer from the committed heads.
    fn restart(&mut self) -> Result<(), BaseError> {
        while let Some(record) = self.updates.pop_back() {
            self.undo_record(&record);
        }
        self.pending_apply.clear();
        self.applied_nodes = 0;
        self.indexed_unflushed = 0;
        self.tip_len = 0;

        debug_assert_eq!(
            self.system.staged_len(),
            0,
            "undoing every record drains staged membership ops"
        );

        // Writers surviving the membership change are reset to the digest
        // and reused; the rest drain and close.
        let mut survivors: HashMap<WriterKey, Writer<S::Log>> = self
            .writers
            .drain_all()
            .into_iter()
            .map(|w| (w.key(), w))
            .collect();
        self.local = None;
        self.init_writers_with(&mut survivors)?;
        self.removed.extend(survivors.into_values());
        self.bump.request();
        Ok(())
    }

    /// Step 6a: attach backing logs to view cores created this tick.
    fn ready_views(&mut self) -> Result<(), BaseError> {
        let Self { store, views, .. } = self;
        views.ready_pending(|name| {
            let log = store.open_named(&name.storage_name())?;
            Ok(Box::new(log) as Box<dyn AppendLog>)
        })
    }

    /// Step 6b: close writers dropped by a restart once nothing speculative
    /// references them.
    fn drain_removed(&mut self) -> Result<(), BaseError> {
        if !self.updates.is_empty() {
            return Ok(());
        }
        for mut writer in self.removed.drain(..) {
            trace!(writer = %writer.key().short(), "closing drained writer");
            writer.close()?;
        }
        Ok(())
    }

    fn undo_record(&mut self, record: &UpdateRecord) {
        for (id, count) in record.user.iter().rev() {
            self.views.core_mut(*id).on_undo(*count);
        }
        self.system.undo(record.system as usize);
    }

    /// Head frontier after applying `nodes` on top of the newest record (or
    /// the last flushed digest).
    fn frontier_after(&self, nodes: &[Rc<Node>]) -> Vec<Head> {
        let base = self
            .updates
            .back()
            .map(|r| r.frontier.as_slice())
            .unwrap_or(&self.base_frontier);
        let mut frontier: BTreeMap<WriterKey, u64> =
            base.iter().map(|h| (h.key, h.length)).collect();
        for node in nodes {
            let entry = frontier.entry(node.writer()).or_insert(0);
            if *entry < node.length() {
                *entry = node.length();
            }
        }
        frontier
            .into_iter()
            .filter(|(_, length)| *length > 0)
            .map(|(key, length)| Head { key, length })
            .collect()
    }

    /// (Re)build the writer set and linearizer from the system digest, or
    /// from the bootstrap list while still bootstrapping.
    fn init_writers(&mut self) -> Result<(), BaseError> {
        self.init_writers_with(&mut HashMap::new())
    }

    fn init_writers_with(
        &mut self,
        survivors: &mut HashMap<WriterKey, Writer<S::Log>>,
    ) -> Result<(), BaseError> {
        let members: Vec<(WriterKey, u64)> = if self.system.is_bootstrapped() {
            self.system.members().map(|(k, l)| (*k, l)).collect()
        } else {
            self.bootstraps.iter().map(|k| (*k, 0)).collect()
        };
        let committed: Vec<Head> = self.system.committed_heads().to_vec();

        self.linearizer =
            Linearizer::new(members.iter().map(|(k, _)| *k).collect(), &committed);
        self.base_frontier = committed;

        let local_key = self.store.local_key();
        for (key, indexed) in members {
            let writer = match survivors.remove(&key) {
                Some(mut writer) => {
                    writer.reset(indexed);
                    writer
                }
                None => {
                    let log = self.store.open_writer(&key)?;
                    Writer::new(log, key, local_key == Some(key), indexed)
                }
            };
            if local_key == Some(key) {
                self.local = Some(key);
            }
            self.writers.insert(writer);
        }
        debug!(
            writers = self.writers.len(),
            writable = self.local.is_some(),
            bootstrapped = self.system.is_bootstrapped(),
            "writer set initialized"
        );
        Ok(())
    }

    /// Derive the checkpoint hop distance from the local log's tail so
    /// back-pointers stay contiguous across reopen.
    fn init_since_checkpoint(&mut self) -> Result<(), BaseError> {
        let Some(local_key) = self.local else {
            return Ok(());
        };
        let writer = self.writers.get(&local_key).expect("local writer exists");
        let length = writer.log().length();
        if length == 0 {
            return Ok(());
        }
        let Some(raw) = writer.log().get(length - 1)? else {
            return Ok(());
        };
        let tail = OplogMessage::decode(&raw, &self.limits).map_err(|source| {
            BaseError::BlockDecode {
                writer: local_key.short(),
                seq: length - 1,
                source,
            }
        })?;
        self.since_checkpoint = if tail.checkpoint.is_some() {
            Some(0)
        } else if tail.checkpointer > 0 {
            Some(tail.checkpointer)
        } else {
            None
        };
        Ok(())
    }
}
