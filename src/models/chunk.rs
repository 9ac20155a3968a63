// src/models/chunk.rs

//! Chunk data structures.
//!
//! A chunk is the provider's unit of list evolution: an ADD chunk inserts
//! hash prefixes or full hashes, a SUB chunk removes them. Entries are
//! bucketed by the 4-byte hash of the host key they were listed under.

use std::collections::BTreeMap;
use std::fmt;

/// Chunk number, monotonically assigned by the server per (list, kind).
pub type ChunkNum = u32;

/// The 4-byte hash bucket of a canonical host key.
pub type HostHash = [u8; 4];

/// A hash prefix (4 bytes) or full hash (32 bytes).
pub type LookupHash = Vec<u8>;

/// Whether a chunk inserts or removes entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChunkKind {
    Add,
    Sub,
}

impl ChunkKind {
    /// Wire letter used in chunk headers and the downloads body.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Add => "a",
            ChunkKind::Sub => "s",
        }
    }

    /// Parse the wire letter.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "a" => Some(ChunkKind::Add),
            "s" => Some(ChunkKind::Sub),
            _ => None,
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for ChunkKind {
    fn default() -> Self {
        ChunkKind::Add
    }
}

/// A decoded add or sub chunk.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Chunk {
    /// Server-assigned chunk number.
    pub number: ChunkNum,

    /// Insert or remove.
    pub kind: ChunkKind,

    /// Entry length in bytes for this chunk, 4 or 32.
    pub hash_len: usize,

    /// Entries bucketed by host hash, in wire order.
    pub hashes: BTreeMap<HostHash, Vec<LookupHash>>,

    /// For SUB chunks, the origin ADD chunk number carried alongside each
    /// entry. Parsed and retained, but removal is keyed by prefix alone.
    pub add_chunk_nums: BTreeMap<HostHash, Vec<ChunkNum>>,
}

impl Chunk {
    /// Total number of entries across all host buckets.
    pub fn entry_count(&self) -> usize {
        self.hashes.values().map(Vec::len).sum()
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "chunk {} type: {}, hash length (bytes): {}, num hashes: {}",
            self.number,
            self.kind,
            self.hash_len,
            self.entry_count()
        )
    }
}
