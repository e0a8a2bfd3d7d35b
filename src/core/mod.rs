//! Core data model: identity atoms, causal clocks, DAG nodes, and the wire
//! encodings shared by every participant.

mod clock;
mod error;
mod identity;
mod message;
mod node;

pub use clock::Clock;
pub use error::{CoreError, InvalidId};
pub use identity::{ViewName, WriterKey, KEY_LEN};
pub use message::{
    sha256_block, Checkpoint, DecodeError, EncodeError, Limits, OplogMessage, SystemDigest,
    SystemOp,
};
pub use node::{Head, Node, NodeDraft};
