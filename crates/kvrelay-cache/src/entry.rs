//! Cache entries and payload encoding.

use std::fmt;
use std::io::{Read, Write};
use std::mem;
use std::time::Instant;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Fixed per-entry bookkeeping counted on top of key and payload bytes.
const ENTRY_OVERHEAD: usize = mem::size_of::<CacheEntry>();

/// Which tier currently holds an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    L1,
    L2,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::L1 => f.write_str("L1"),
            Self::L2 => f.write_str("L2"),
        }
    }
}

/// A cached payload plus its expiry and accounting data.
///
/// Recency is not stored here; it is the entry's position in its tier's LRU
/// list.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    payload: Vec<u8>,
    compressed: bool,
    expires_at: Option<Instant>,
    size: usize,
    tier: Tier,
}

impl CacheEntry {
    pub(crate) fn new(
        key: &str,
        payload: Vec<u8>,
        compressed: bool,
        expires_at: Option<Instant>,
    ) -> Self {
        let size = key.len() + payload.len() + ENTRY_OVERHEAD;
        Self {
            payload,
            compressed,
            expires_at,
            size,
            tier: Tier::L1,
        }
    }

    /// True once `now` has reached the deadline.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }

    pub const fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// Estimated bytes held by this entry, key included.
    pub const fn size(&self) -> usize {
        self.size
    }

    pub const fn tier(&self) -> Tier {
        self.tier
    }

    pub const fn is_compressed(&self) -> bool {
        self.compressed
    }

    pub(crate) fn set_tier(&mut self, tier: Tier) {
        self.tier = tier;
    }

    /// Stored bytes, still gzip-compressed when `is_compressed()`.
    pub(crate) fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Gzip `data`.
pub(crate) fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Inflate a gzip payload.
pub(crate) fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 2);
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
