//! Read-only keyed index store.
//!
//! Two kinds of keys exist, both raw ASCII bytes:
//! - a 32-hex MD5 digest, whose value is the 48-hex trunc512 digest it
//!   aliases;
//! - a 48-hex trunc512 digest, whose value is a serialized [`IndexRecord`].
//!
//! The on-disk form is line oriented: the first tab-separated field of each
//! line is the key, the remainder of the line is the value. The whole store
//! is loaded into memory at startup; lookups never touch the disk.

use std::fs;
use std::io;
use std::path::Path;

use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The value under a trunc512 key does not parse as a record. The
    /// store is corrupt; this maps to a 500, not a 404.
    #[error("invalid record in index store")]
    InvalidRecord,
}

/// One entry of the index store, keyed by a trunc512 digest.
///
/// Serialized as `path \t seq_start \t seq_length \t name \t md5`, where
/// `seq_start` is the absolute uncompressed byte offset of the sequence
/// within the container file at `path` and `seq_length` its length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    pub path: String,
    pub seq_start: u64,
    pub seq_length: u64,
    pub name: String,
    pub md5: String,
}

impl IndexRecord {
    pub fn parse(raw: &[u8]) -> Result<Self, StoreError> {
        let text = std::str::from_utf8(raw).map_err(|_| StoreError::InvalidRecord)?;
        let fields: Vec<&str> = text.split('\t').collect();
        if fields.len() != 5 {
            return Err(StoreError::InvalidRecord);
        }
        Ok(IndexRecord {
            path: fields[0].to_string(),
            seq_start: fields[1].parse().map_err(|_| StoreError::InvalidRecord)?,
            seq_length: fields[2].parse().map_err(|_| StoreError::InvalidRecord)?,
            name: fields[3].to_string(),
            md5: fields[4].to_string(),
        })
    }
}

pub struct IndexStore {
    map: FxHashMap<Box<[u8]>, Box<[u8]>>,
}

impl IndexStore {
    /// Load the store from disk. Missing file or read failure is fatal for
    /// the service; the caller exits non-zero.
    pub fn open(path: &Path) -> io::Result<Self> {
        let data = fs::read(path)?;
        let mut map = FxHashMap::default();
        for line in data.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.is_empty() {
                continue;
            }
            let Some(tab) = line.iter().position(|&b| b == b'\t') else {
                warn!("Skipping index line without a value field");
                continue;
            };
            map.insert(
                line[..tab].to_vec().into_boxed_slice(),
                line[tab + 1..].to_vec().into_boxed_slice(),
            );
        }
        Ok(IndexStore { map })
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Constant-time keyed read.
    pub fn lookup(&self, key: &[u8]) -> Option<&[u8]> {
        self.map.get(key).map(|v| v.as_ref())
    }

    /// Combined lookup and parse for a trunc512 hex digest. `Ok(None)` is
    /// an unknown digest; `Err` means the stored value is corrupt.
    pub fn lookup_record(&self, digest: &str) -> Result<Option<IndexRecord>, StoreError> {
        match self.lookup(digest.as_bytes()) {
            Some(raw) => IndexRecord::parse(raw).map(Some),
            None => Ok(None),
        }
    }
}
