//! Wire encoding for oplog blocks, system membership ops, and digests.
//!
//! Everything on the wire is canonical CBOR: definite lengths only, map keys
//! sorted and unique, unknown keys rejected where the schema is closed. Two
//! writers encoding the same message must produce identical bytes, because
//! digest hashes are computed over encoded blocks.

use std::collections::BTreeSet;

use bytes::Bytes;
use minicbor::data::Type;
use minicbor::{Decoder, Encoder};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::identity::{WriterKey, KEY_LEN};
use super::node::Head;

/// Decode-side resource bounds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Limits {
    pub max_block_bytes: usize,
    pub max_heads: usize,
    pub max_writers: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_block_bytes: 1 << 20,
            max_heads: 256,
            max_writers: 1024,
        }
    }
}

/// Snapshot pointer embedded in local oplog blocks for resume.
///
/// `length` is the system view's log length at flush time; `digest` is the
/// SHA-256 of the digest block at `length - 1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    pub length: u64,
    pub digest: [u8; 32],
}

/// One block of a writer's oplog.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OplogMessage {
    /// User payload; `None` is a heartbeat (`ack`).
    pub value: Option<Bytes>,
    pub heads: Vec<Head>,
    pub batch: u32,
    /// Hop count back to the nearest preceding block carrying a checkpoint;
    /// `0` when this block carries one itself (or none exists yet).
    pub checkpointer: u32,
    pub checkpoint: Option<Checkpoint>,
}

/// A membership change staged in the system view's tip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SystemOp {
    AddWriter(WriterKey),
    RemoveWriter(WriterKey),
}

/// The persisted tail of the system view: authoritative membership and the
/// heads in force at the last committed point.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SystemDigest {
    pub writers: Vec<Head>,
    pub heads: Vec<Head>,
    /// Checkpoint of the previous flush, chaining digests.
    pub checkpoint: Option<Checkpoint>,
}

pub fn sha256_block(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let out = hasher.finalize();
    let mut buf = [0u8; 32];
    buf.copy_from_slice(&out);
    buf
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("cbor encode: {0}")]
    Cbor(#[from] minicbor::encode::Error<std::convert::Infallible>),
    #[error("checkpointer must be 0 when a checkpoint is embedded")]
    CheckpointerNonZero,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("decode limit exceeded: {0}")]
    DecodeLimit(&'static str),
    #[error("indefinite-length CBOR not allowed")]
    IndefiniteLength,
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("duplicate map key: {0}")]
    DuplicateKey(String),
    #[error("trailing bytes after block")]
    TrailingBytes,
    #[error("cbor decode: {0}")]
    Cbor(#[from] minicbor::decode::Error),
}

impl OplogMessage {
    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        if self.checkpoint.is_some() && self.checkpointer != 0 {
            return Err(EncodeError::CheckpointerNonZero);
        }
        let mut buf = Vec::new();
        let mut enc = Encoder::new(&mut buf);

        let mut len = 3;
        if self.checkpoint.is_some() {
            len += 1;
        }
        if self.value.is_some() {
            len += 1;
        }
        enc.map(len as u64)?;

        enc.str("batch")?;
        enc.u32(self.batch)?;

        if let Some(checkpoint) = &self.checkpoint {
            enc.str("checkpoint")?;
            encode_checkpoint(&mut enc, checkpoint)?;
        }

        enc.str("checkpointer")?;
        enc.u32(self.checkpointer)?;

        enc.str("heads")?;
        encode_heads(&mut enc, &self.heads)?;

        if let Some(value) = &self.value {
            enc.str("value")?;
            enc.bytes(value)?;
        }

        Ok(Bytes::from(buf))
    }

    pub fn decode(bytes: &[u8], limits: &Limits) -> Result<Self, DecodeError> {
        if bytes.len() > limits.max_block_bytes {
            return Err(DecodeError::DecodeLimit("max_block_bytes"));
        }
        let mut dec = Decoder::new(bytes);
        let map_len = decode_map_len(&mut dec)?;

        let mut seen_keys = BTreeSet::new();
        let mut value = None;
        let mut heads = None;
        let mut batch = None;
        let mut checkpointer = None;
        let mut checkpoint = None;

        for _ in 0..map_len {
            let key = decode_text(&mut dec)?;
            ensure_unique_key(&mut seen_keys, key)?;
            match key {
                "batch" => {
                    batch = Some(decode_u32(&mut dec, "batch")?);
                }
                "checkpoint" => {
                    checkpoint = Some(decode_checkpoint(&mut dec)?);
                }
                "checkpointer" => {
                    checkpointer = Some(decode_u32(&mut dec, "checkpointer")?);
                }
                "heads" => {
                    heads = Some(decode_heads(&mut dec, limits.max_heads, false)?);
                }
                "value" => {
                    value = Some(Bytes::copy_from_slice(decode_bytes(&mut dec)?));
                }
                other => {
                    return Err(DecodeError::InvalidField {
                        field: "oplog",
                        reason: format!("unknown key {other}"),
                    });
                }
            }
        }
        if dec.datatype().is_ok() {
            return Err(DecodeError::TrailingBytes);
        }

        let batch = batch.ok_or(DecodeError::MissingField("batch"))?;
        if batch == 0 {
            return Err(DecodeError::InvalidField {
                field: "batch",
                reason: "must be positive".into(),
            });
        }
        let checkpointer = checkpointer.ok_or(DecodeError::MissingField("checkpointer"))?;
        if checkpoint.is_some() && checkpointer != 0 {
            return Err(DecodeError::InvalidField {
                field: "checkpointer",
                reason: "must be 0 when a checkpoint is embedded".into(),
            });
        }

        Ok(Self {
            value,
            heads: heads.ok_or(DecodeError::MissingField("heads"))?,
            batch,
            checkpointer,
            checkpoint,
        })
    }
}

impl SystemDigest {
    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        let mut buf = Vec::new();
        let mut enc = Encoder::new(&mut buf);

        let mut len = 2;
        if self.checkpoint.is_some() {
            len += 1;
        }
        enc.map(len as u64)?;

        if let Some(checkpoint) = &self.checkpoint {
            enc.str("checkpoint")?;
            encode_checkpoint(&mut enc, checkpoint)?;
        }

        enc.str("heads")?;
        encode_heads(&mut enc, &self.heads)?;

        enc.str("writers")?;
        encode_heads(&mut enc, &self.writers)?;

        Ok(Bytes::from(buf))
    }

    pub fn decode(bytes: &[u8], limits: &Limits) -> Result<Self, DecodeError> {
        if bytes.len() > limits.max_block_bytes {
            return Err(DecodeError::DecodeLimit("max_block_bytes"));
        }
        let mut dec = Decoder::new(bytes);
        let map_len = decode_map_len(&mut dec)?;

        let mut seen_keys = BTreeSet::new();
        let mut writers = None;
        let mut heads = None;
        let mut checkpoint = None;
        for _ in 0..map_len {
            let key = decode_text(&mut dec)?;
            ensure_unique_key(&mut seen_keys, key)?;
            match key {
                "checkpoint" => {
                    checkpoint = Some(decode_checkpoint(&mut dec)?);
                }
                "heads" => {
                    heads = Some(decode_heads(&mut dec, limits.max_writers, false)?);
                }
                "writers" => {
                    // Members with nothing committed yet carry length 0.
                    writers = Some(decode_heads(&mut dec, limits.max_writers, true)?);
                }
                other => {
                    return Err(DecodeError::InvalidField {
                        field: "digest",
                        reason: format!("unknown key {other}"),
                    });
                }
            }
        }
        if dec.datatype().is_ok() {
            return Err(DecodeError::TrailingBytes);
        }

        Ok(Self {
            writers: writers.ok_or(DecodeError::MissingField("writers"))?,
            heads: heads.ok_or(DecodeError::MissingField("heads"))?,
            checkpoint,
        })
    }
}

fn encode_heads(
    enc: &mut Encoder<&mut Vec<u8>>,
    heads: &[Head],
) -> Result<(), minicbor::encode::Error<std::convert::Infallible>> {
    enc.array(heads.len() as u64)?;
    for head in heads {
        enc.map(2)?;
        enc.str("key")?;
        enc.bytes(head.key.as_bytes())?;
        enc.str("length")?;
        enc.u64(head.length)?;
    }
    Ok(())
}

fn decode_heads(dec: &mut Decoder, max: usize, allow_zero: bool) -> Result<Vec<Head>, DecodeError> {
    let arr_len = decode_array_len(dec)?;
    if arr_len > max {
        return Err(DecodeError::DecodeLimit("max_heads"));
    }
    let mut heads = Vec::with_capacity(arr_len);
    for _ in 0..arr_len {
        let map_len = decode_map_len(dec)?;
        let mut seen_keys = BTreeSet::new();
        let mut key = None;
        let mut length = None;
        for _ in 0..map_len {
            let field = decode_text(dec)?;
            ensure_unique_key(&mut seen_keys, field)?;
            match field {
                "key" => {
                    key = Some(decode_writer_key(dec)?);
                }
                "length" => {
                    length = Some(decode_u64(dec, "length")?);
                }
                other => {
                    return Err(DecodeError::InvalidField {
                        field: "head",
                        reason: format!("unknown key {other}"),
                    });
                }
            }
        }
        let length = length.ok_or(DecodeError::MissingField("length"))?;
        if length == 0 && !allow_zero {
            return Err(DecodeError::InvalidField {
                field: "head.length",
                reason: "must be nonzero".into(),
            });
        }
        heads.push(Head {
            key: key.ok_or(DecodeError::MissingField("key"))?,
            length,
        });
    }
    Ok(heads)
}

fn encode_checkpoint(
    enc: &mut Encoder<&mut Vec<u8>>,
    checkpoint: &Checkpoint,
) -> Result<(), minicbor::encode::Error<std::convert::Infallible>> {
    enc.map(2)?;
    enc.str("digest")?;
    enc.bytes(&checkpoint.digest)?;
    enc.str("length")?;
    enc.u64(checkpoint.length)?;
    Ok(())
}

fn decode_checkpoint(dec: &mut Decoder) -> Result<Checkpoint, DecodeError> {
    let map_len = decode_map_len(dec)?;
    let mut seen_keys = BTreeSet::new();
    let mut length = None;
    let mut digest = None;
    for _ in 0..map_len {
        let field = decode_text(dec)?;
        ensure_unique_key(&mut seen_keys, field)?;
        match field {
            "digest" => {
                let raw = decode_bytes(dec)?;
                let buf: [u8; 32] = raw.try_into().map_err(|_| DecodeError::InvalidField {
                    field: "checkpoint.digest",
                    reason: "must be 32 bytes".into(),
                })?;
                digest = Some(buf);
            }
            "length" => {
                length = Some(decode_u64(dec, "checkpoint.length")?);
            }
            other => {
                return Err(DecodeError::InvalidField {
                    field: "checkpoint",
                    reason: format!("unknown key {other}"),
                });
            }
        }
    }
    Ok(Checkpoint {
        length: length.ok_or(DecodeError::MissingField("checkpoint.length"))?,
        digest: digest.ok_or(DecodeError::MissingField("checkpoint.digest"))?,
    })
}

fn decode_map_len(dec: &mut Decoder) -> Result<usize, DecodeError> {
    match dec.map()? {
        Some(len) => Ok(len as usize),
        None => Err(DecodeError::IndefiniteLength),
    }
}

fn decode_array_len(dec: &mut Decoder) -> Result<usize, DecodeError> {
    match dec.array()? {
        Some(len) => Ok(len as usize),
        None => Err(DecodeError::IndefiniteLength),
    }
}

fn decode_text<'a>(dec: &mut Decoder<'a>) -> Result<&'a str, DecodeError> {
    if matches!(dec.datatype()?, Type::StringIndef) {
        return Err(DecodeError::IndefiniteLength);
    }
    Ok(dec.str()?)
}

fn decode_bytes<'a>(dec: &mut Decoder<'a>) -> Result<&'a [u8], DecodeError> {
    if matches!(dec.datatype()?, Type::BytesIndef) {
        return Err(DecodeError::IndefiniteLength);
    }
    Ok(dec.bytes()?)
}

fn decode_writer_key(dec: &mut Decoder) -> Result<WriterKey, DecodeError> {
    let raw = decode_bytes(dec)?;
    let buf: [u8; KEY_LEN] = raw.try_into().map_err(|_| DecodeError::InvalidField {
        field: "key",
        reason: format!("must be {KEY_LEN} bytes"),
    })?;
    Ok(WriterKey::new(buf))
}

fn decode_u64(dec: &mut Decoder, field: &'static str) -> Result<u64, DecodeError> {
    dec.u64().map_err(|e| DecodeError::InvalidField {
        field,
        reason: e.to_string(),
    })
}

fn decode_u32(dec: &mut Decoder, field: &'static str) -> Result<u32, DecodeError> {
    dec.u32().map_err(|e| DecodeError::InvalidField {
        field,
        reason: e.to_string(),
    })
}

fn ensure_unique_key(seen: &mut BTreeSet<String>, key: &str) -> Result<(), DecodeError> {
    if !seen.insert(key.to_string()) {
        return Err(DecodeError::DuplicateKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: &str) -> WriterKey {
        WriterKey::from_seed(seed.as_bytes())
    }

    fn sample_message() -> OplogMessage {
        OplogMessage {
            value: Some(Bytes::from_static(b"payload")),
            heads: vec![Head::new(key("a"), 3), Head::new(key("b"), 1)],
            batch: 2,
            checkpointer: 4,
            checkpoint: None,
        }
    }

    #[test]
    fn oplog_round_trip() {
        let msg = sample_message();
        let bytes = msg.encode().unwrap();
        let back = OplogMessage::decode(&bytes, &Limits::default()).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn oplog_heartbeat_has_no_value() {
        let msg = OplogMessage {
            value: None,
            heads: Vec::new(),
            batch: 1,
            checkpointer: 0,
            checkpoint: None,
        };
        let bytes = msg.encode().unwrap();
        let back = OplogMessage::decode(&bytes, &Limits::default()).unwrap();
        assert!(back.value.is_none());
    }

    #[test]
    fn oplog_encoding_is_deterministic() {
        let msg = sample_message();
        assert_eq!(msg.encode().unwrap(), msg.encode().unwrap());
    }

    #[test]
    fn oplog_checkpoint_requires_zero_checkpointer() {
        let mut msg = sample_message();
        msg.checkpoint = Some(Checkpoint {
            length: 9,
            digest: [7u8; 32],
        });
        assert!(matches!(
            msg.encode(),
            Err(EncodeError::CheckpointerNonZero)
        ));
        msg.checkpointer = 0;
        let bytes = msg.encode().unwrap();
        let back = OplogMessage::decode(&bytes, &Limits::default()).unwrap();
        assert_eq!(back.checkpoint.unwrap().length, 9);
    }

    #[test]
    fn oplog_rejects_zero_batch() {
        let mut msg = sample_message();
        msg.batch = 0;
        let bytes = msg.encode().unwrap();
        let err = OplogMessage::decode(&bytes, &Limits::default()).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidField { field: "batch", .. }));
    }

    #[test]
    fn oplog_rejects_trailing_bytes() {
        let msg = sample_message();
        let mut bytes = msg.encode().unwrap().to_vec();
        bytes.push(0x00);
        let err = OplogMessage::decode(&bytes, &Limits::default()).unwrap_err();
        assert!(matches!(err, DecodeError::TrailingBytes));
    }

    #[test]
    fn oplog_enforces_block_limit() {
        let limits = Limits {
            max_block_bytes: 8,
            ..Limits::default()
        };
        let bytes = sample_message().encode().unwrap();
        let err = OplogMessage::decode(&bytes, &limits).unwrap_err();
        assert!(matches!(err, DecodeError::DecodeLimit("max_block_bytes")));
    }

    #[test]
    fn digest_round_trip_with_chained_checkpoint() {
        let digest = SystemDigest {
            writers: vec![Head::new(key("a"), 5)],
            heads: vec![Head::new(key("a"), 5), Head::new(key("b"), 2)],
            checkpoint: Some(Checkpoint {
                length: 1,
                digest: sha256_block(b"previous"),
            }),
        };
        let bytes = digest.encode().unwrap();
        let back = SystemDigest::decode(&bytes, &Limits::default()).unwrap();
        assert_eq!(digest, back);
    }

    #[test]
    fn digest_admits_zero_length_members() {
        let digest = SystemDigest {
            writers: vec![Head { key: key("new"), length: 0 }],
            heads: Vec::new(),
            checkpoint: None,
        };
        let bytes = digest.encode().unwrap();
        let back = SystemDigest::decode(&bytes, &Limits::default()).unwrap();
        assert_eq!(back.writers[0].length, 0);
    }

    #[test]
    fn digest_rejects_zero_length_heads() {
        // A head with length 0 cannot be encoded through Head::new (debug
        // assert), so splice raw bytes instead.
        let mut buf = Vec::new();
        let mut enc = Encoder::new(&mut buf);
        enc.map(2).unwrap();
        enc.str("heads").unwrap();
        enc.array(1).unwrap();
        enc.map(2).unwrap();
        enc.str("key").unwrap();
        enc.bytes(key("a").as_bytes()).unwrap();
        enc.str("length").unwrap();
        enc.u64(0).unwrap();
        enc.str("writers").unwrap();
        enc.array(0).unwrap();
        let err = SystemDigest::decode(&buf, &Limits::default()).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::InvalidField {
                field: "head.length",
                ..
            }
        ));
    }
}
