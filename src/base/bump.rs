//! Debounced advance trigger.
//!
//! Every event (local append, remote block, transport notification) bumps
//! the engine; any number of bumps during an active advance collapse into
//! exactly one re-run. The wake channel has a single slot so transport
//! threads can signal without ever blocking or queueing more than one wake.

use std::cell::Cell;

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};

/// Cross-thread handle that marks the engine dirty.
#[derive(Clone)]
pub struct Waker {
    tx: Sender<()>,
}

impl Waker {
    /// Signal a wake; a wake already in flight absorbs this one.
    pub fn wake(&self) {
        match self.tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => {}
        }
    }
}

/// The engine-side dirty flag plus its one-slot wake channel.
pub(crate) struct Bump {
    dirty: Cell<bool>,
    running: Cell<bool>,
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Bump {
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self {
            dirty: Cell::new(false),
            running: Cell::new(false),
            tx,
            rx,
        }
    }

    pub fn waker(&self) -> Waker {
        Waker {
            tx: self.tx.clone(),
        }
    }

    pub fn request(&self) {
        self.dirty.set(true);
    }

    /// Fold any external wakes into the dirty flag and read it.
    pub fn is_dirty(&self) -> bool {
        while self.rx.try_recv().is_ok() {
            self.dirty.set(true);
        }
        self.dirty.get()
    }

    pub fn clear(&self) {
        self.dirty.set(false);
    }

    /// Guard against re-entrant advance runs. Returns false if one is
    /// already active; the active run re-checks the dirty flag at its end.
    pub fn try_begin(&self) -> bool {
        if self.running.get() {
            return false;
        }
        self.running.set(true);
        true
    }

    pub fn end(&self) {
        self.running.set(false);
    }
}
