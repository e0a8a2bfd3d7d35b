#![forbid(unsafe_code)]

//! Multi-writer append-only logs braided into one deterministic sequence.
//!
//! Each writer owns a causally-ordered log; every entry records the heads of
//! other writers it observed. The engine linearizes the resulting causal DAG
//! into a single committed order, drives a user apply handler over it to
//! materialize named views, and embeds checkpoints into the local log so any
//! participant can resume from the authoritative system digest.
//!
//! The engine runs on one logical task and never touches storage directly:
//! persistence and replication live behind the [`log`] traits.

pub mod base;
pub mod core;
pub mod error;
pub mod log;
pub mod telemetry;

pub use error::{Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the working set at the crate root for convenience.
pub use crate::base::{
    AppliedEntry, ApplyScope, BaseError, CoreId, Handler, HandlerError, Options, Plait, Stats,
    ViewStore, Waker,
};
pub use crate::core::{
    Checkpoint, Clock, CoreError, DecodeError, EncodeError, Head, Limits, Node, OplogMessage,
    SystemDigest, SystemOp, ViewName, WriterKey,
};
pub use crate::log::{AppendLog, LogError, LogStore};
