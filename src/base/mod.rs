//! The engine: per-writer state, the linearizer, the system view, named
//! materialized views, and the orchestrator that drives them.

mod bump;
mod engine;
mod error;
mod linearizer;
mod system;
mod views;
mod writer;

pub use bump::Waker;
pub use engine::{AppliedEntry, ApplyScope, Handler, HandlerError, Options, Plait, Stats};
pub use error::BaseError;
pub use linearizer::LinearizerUpdate;
pub use views::{CoreId, ViewStore};
