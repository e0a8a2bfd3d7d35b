//! Identity atoms.
//!
//! WriterKey: stable public key of one append-only log
//! ViewName: external identifier of a materialized view

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use super::error::{CoreError, InvalidId};

pub const KEY_LEN: usize = 32;

/// Writer identifier - a 32-byte public key.
///
/// Keys compare lexicographically by byte; that order is the universal
/// tie-break for linearization and for picking the primary bootstrap.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WriterKey([u8; KEY_LEN]);

impl WriterKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Derive a key deterministically from a seed.
    ///
    /// Tests and single-process demos use this instead of a signing keypair;
    /// the transport layer owns real key generation.
    pub fn from_seed(seed: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"plait/writer/");
        hasher.update(seed);
        let out = hasher.finalize();
        let mut buf = [0u8; KEY_LEN];
        buf.copy_from_slice(&out);
        Self(buf)
    }

    /// A fresh random key for a new local writer.
    pub fn random() -> Self {
        use rand::Rng;
        let mut buf = [0u8; KEY_LEN];
        rand::rng().fill(&mut buf[..]);
        Self(buf)
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let s = s.trim();
        if s.len() != KEY_LEN * 2 {
            return Err(InvalidId::WriterKey {
                raw: s.to_string(),
                reason: format!("expected {} hex chars, got {}", KEY_LEN * 2, s.len()),
            }
            .into());
        }
        let mut buf = [0u8; KEY_LEN];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hi = hex_val(chunk[0]);
            let lo = hex_val(chunk[1]);
            match (hi, lo) {
                (Some(hi), Some(lo)) => buf[i] = (hi << 4) | lo,
                _ => {
                    return Err(InvalidId::WriterKey {
                        raw: s.to_string(),
                        reason: "contains non-hex character".into(),
                    }
                    .into())
                }
            }
        }
        Ok(Self(buf))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(KEY_LEN * 2);
        for b in self.0 {
            out.push_str(&format!("{b:02x}"));
        }
        out
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

fn hex_val(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

impl fmt::Debug for WriterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WriterKey({})", self.short())
    }
}

impl fmt::Display for WriterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for WriterKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for WriterKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let raw = String::deserialize(deserializer)?;
            WriterKey::parse(&raw).map_err(D::Error::custom)
        } else {
            let raw: Vec<u8> = Vec::deserialize(deserializer)?;
            let buf: [u8; KEY_LEN] = raw
                .as_slice()
                .try_into()
                .map_err(|_| D::Error::custom("writer key must be 32 bytes"))?;
            Ok(WriterKey(buf))
        }
    }
}

/// Materialized view name.
///
/// Lowercase `[a-z0-9_-]`, 1..=64 chars. Names starting with `_` are
/// reserved for internal views (the system view lives at `_system`).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewName(String);

impl ViewName {
    const ALPHABET: &'static [u8] = b"abcdefghijklmnopqrstuvwxyz0123456789_-";
    const MAX_LEN: usize = 64;

    pub fn parse(s: impl Into<String>) -> Result<Self, CoreError> {
        let s = s.into();
        let name = Self::validate(s)?;
        if name.0.starts_with('_') {
            return Err(InvalidId::ViewName {
                raw: name.0,
                reason: "leading underscore is reserved".into(),
            }
            .into());
        }
        Ok(name)
    }

    /// Internal constructor that admits reserved names.
    pub(crate) fn internal(s: &str) -> Self {
        Self::validate(s.to_string()).expect("internal view name must be valid")
    }

    fn validate(s: String) -> Result<Self, CoreError> {
        if s.is_empty() {
            return Err(InvalidId::ViewName {
                raw: s,
                reason: "empty".into(),
            }
            .into());
        }
        if s.len() > Self::MAX_LEN {
            return Err(InvalidId::ViewName {
                raw: s,
                reason: format!("longer than {} chars", Self::MAX_LEN),
            }
            .into());
        }
        for c in s.bytes() {
            if !Self::ALPHABET.contains(&c) {
                return Err(InvalidId::ViewName {
                    raw: s,
                    reason: "contains character outside [a-z0-9_-]".into(),
                }
                .into());
            }
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Address of the backing log: `view/<name>`.
    pub fn storage_name(&self) -> String {
        format!("view/{}", self.0)
    }
}

impl fmt::Debug for ViewName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ViewName({:?})", self.0)
    }
}

impl fmt::Display for ViewName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
