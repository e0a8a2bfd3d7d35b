//! Transport seams: the append-only logs the engine reads and writes.
//!
//! The engine never persists anything itself. Each writer's oplog and each
//! view's backing log is an [`AppendLog`] opened through a [`LogStore`];
//! replication, hashing, and durability live behind these traits.

pub mod memory;

use bytes::Bytes;
use thiserror::Error;

use crate::core::WriterKey;
use crate::error::Transience;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LogError {
    #[error("log `{name}` is not writable")]
    NotWritable { name: String },
    #[error("log `{name}` is closed")]
    Closed { name: String },
    #[error("log backend: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl LogError {
    pub fn backend<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            source: Box::new(source),
        }
    }

    pub fn transience(&self) -> Transience {
        match self {
            LogError::NotWritable { .. } | LogError::Closed { .. } => Transience::Permanent,
            LogError::Backend { .. } => Transience::Retryable,
        }
    }
}

/// One append-only log.
///
/// Sequence numbers are 0-based block offsets; `length` is the number of
/// blocks. Remote logs grow underneath the engine as the transport
/// replicates; local logs grow only through `append`.
pub trait AppendLog {
    /// Stable identity of this log.
    fn key(&self) -> WriterKey;

    fn length(&self) -> u64;

    fn has(&self, seq: u64) -> bool;

    /// Block at `seq`, or `None` if it has not been replicated yet.
    fn get(&self, seq: u64) -> Result<Option<Bytes>, LogError>;

    /// Append blocks; returns the new length. Only the local writer's oplog
    /// and view logs are writable.
    fn append(&mut self, blocks: &[Bytes]) -> Result<u64, LogError>;

    /// Pull remote state; returns whether the length advanced. In-process
    /// transports observe appends immediately and may no-op.
    fn update(&mut self) -> Result<bool, LogError> {
        Ok(false)
    }

    /// Request replication of a block range (dense mode). Advisory.
    fn download(&mut self, _from: u64, _to: u64) -> Result<(), LogError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), LogError> {
        Ok(())
    }
}

/// Factory for the logs of one participant.
pub trait LogStore {
    type Log: AppendLog;

    /// Open a writer's oplog by key. Writable iff `key` is the local key.
    fn open_writer(&mut self, key: &WriterKey) -> Result<Self::Log, LogError>;

    /// Open a named log (`view/<name>`, `_system`). Always locally writable;
    /// view logs are only ever written by the flush path.
    fn open_named(&mut self, name: &str) -> Result<Self::Log, LogError>;

    /// The local writer identity, or `None` for a read-only participant.
    fn local_key(&self) -> Option<WriterKey>;

    fn close(&mut self) -> Result<(), LogError> {
        Ok(())
    }
}
