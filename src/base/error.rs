//! Engine errors.

use thiserror::Error;

use crate::core::{DecodeError, EncodeError};
use crate::error::Transience;
use crate::log::LogError;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BaseError {
    #[error("no local writer; base is not writable")]
    NotWritable,

    #[error("view append outside an active apply")]
    ApplyViolation,

    #[error("view `{0}` is not open")]
    UnknownView(String),

    #[error("writer {writer} block {seq} failed to decode: {source}")]
    BlockDecode {
        writer: String,
        seq: u64,
        #[source]
        source: DecodeError,
    },

    #[error("system digest corrupt: {reason}")]
    CorruptDigest { reason: String },

    #[error("apply handler: {source}")]
    Handler {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Log(#[from] LogError),
}

impl BaseError {
    pub fn handler<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Handler {
            source: Box::new(source),
        }
    }

    pub fn transience(&self) -> Transience {
        match self {
            BaseError::NotWritable
            | BaseError::ApplyViolation
            | BaseError::UnknownView(_)
            | BaseError::BlockDecode { .. }
            | BaseError::CorruptDigest { .. } => Transience::Permanent,
            BaseError::Handler { .. } | BaseError::Encode(_) => Transience::Unknown,
            BaseError::Log(e) => e.transience(),
        }
    }
}
