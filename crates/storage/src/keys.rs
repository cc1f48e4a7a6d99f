//! Key layouts shared by index backends.
//!
//! - [`HashKey`]: `[kind][hash]`, maps a hash to its list position
//! - [`SeqKey`]: `[kind][seq: u64 BE]`, orders the list by insertion

use strata_primitives::{ChunkKind, ContentHash, HASH_LENGTH};

use crate::Encode;

/// Encoded length of a [`HashKey`].
pub const HASH_KEY_LEN: usize = 1 + HASH_LENGTH;

/// Encoded length of a [`SeqKey`].
pub const SEQ_KEY_LEN: usize = 1 + 8;

/// Position lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HashKey {
    /// Chunk kind.
    pub kind: ChunkKind,
    /// Chunk hash.
    pub hash: ContentHash,
}

impl Encode for HashKey {
    type Encoded = [u8; HASH_KEY_LEN];

    fn encode(self) -> Self::Encoded {
        let mut out = [0u8; HASH_KEY_LEN];
        out[0] = self.kind.as_u8();
        out[1..].copy_from_slice(self.hash.as_bytes());
        out
    }
}

/// Insertion-order key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeqKey {
    /// Chunk kind.
    pub kind: ChunkKind,
    /// Insertion sequence number within the kind.
    pub seq: u64,
}

impl SeqKey {
    /// First key of a kind's list.
    pub const fn first(kind: ChunkKind) -> Self {
        Self { kind, seq: 0 }
    }

    /// Last possible key of a kind's list.
    pub const fn last(kind: ChunkKind) -> Self {
        Self {
            kind,
            seq: u64::MAX,
        }
    }
}

impl Encode for SeqKey {
    type Encoded = [u8; SEQ_KEY_LEN];

    fn encode(self) -> Self::Encoded {
        let mut out = [0u8; SEQ_KEY_LEN];
        out[0] = self.kind.as_u8();
        out[1..].copy_from_slice(&self.seq.to_be_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_keys_sort_by_kind_then_seq() {
        let a = SeqKey {
            kind: ChunkKind::Data,
            seq: 300,
        }
        .encode();
        let b = SeqKey {
            kind: ChunkKind::Data,
            seq: 2,
        }
        .encode();
        let c = SeqKey::first(ChunkKind::MetaData).encode();
        assert!(b < a);
        assert!(a < c);
        assert!(SeqKey::last(ChunkKind::Data).encode() < c);
    }

    #[test]
    fn test_hash_key_layout() {
        let hash = ContentHash::digest(b"x");
        let key = HashKey {
            kind: ChunkKind::MetaData,
            hash,
        }
        .encode();
        assert_eq!(key[0], ChunkKind::MetaData.as_u8());
        assert_eq!(&key[1..], hash.as_bytes());
        assert!(HashKey { kind: ChunkKind::Data, hash }.encode() < key);
    }
}
