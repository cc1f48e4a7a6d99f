//! In-memory hash index.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use strata_primitives::{ChunkKind, ContentHash};

use crate::{
    DatabaseResult, HashIndex,
    keys::{HashKey, SeqKey},
};

/// Volatile [`HashIndex`], for tests and for stores that rebuild their index
/// on every open.
#[derive(Debug, Default)]
pub struct MemoryHashIndex {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    next_seq: HashMap<ChunkKind, u64>,
    positions: HashMap<HashKey, u64>,
    entries: BTreeMap<SeqKey, ContentHash>,
}

impl MemoryHashIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }
}

impl HashIndex for MemoryHashIndex {
    fn add(&self, kind: ChunkKind, hash: &ContentHash) -> DatabaseResult<bool> {
        let mut inner = self.inner.write();
        let key = HashKey { kind, hash: *hash };
        if inner.positions.contains_key(&key) {
            return Ok(false);
        }
        let next = inner.next_seq.entry(kind).or_insert(0);
        let seq = *next;
        *next += 1;
        inner.positions.insert(key, seq);
        inner.entries.insert(SeqKey { kind, seq }, *hash);
        Ok(true)
    }

    fn remove(&self, kind: ChunkKind, hash: &ContentHash) -> DatabaseResult<bool> {
        let mut inner = self.inner.write();
        match inner.positions.remove(&HashKey { kind, hash: *hash }) {
            Some(seq) => {
                inner.entries.remove(&SeqKey { kind, seq });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn contains(&self, kind: ChunkKind, hash: &ContentHash) -> DatabaseResult<bool> {
        Ok(self
            .inner
            .read()
            .positions
            .contains_key(&HashKey { kind, hash: *hash }))
    }

    fn enumerate(
        &self,
        kind: ChunkKind,
        offset: u64,
        limit: usize,
    ) -> DatabaseResult<Vec<ContentHash>> {
        let inner = self.inner.read();
        Ok(inner
            .entries
            .range(SeqKey::first(kind)..=SeqKey::last(kind))
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(limit)
            .map(|(_, hash)| *hash)
            .collect())
    }

    fn count(&self, kind: ChunkKind) -> DatabaseResult<u64> {
        let inner = self.inner.read();
        Ok(inner
            .entries
            .range(SeqKey::first(kind)..=SeqKey::last(kind))
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_hash(n: u8) -> ContentHash {
        let mut bytes = [0u8; 32];
        bytes[0] = n;
        bytes[31] = 1;
        ContentHash::new(bytes)
    }

    #[test]
    fn test_add_is_idempotent() {
        let index = MemoryHashIndex::new();
        assert!(index.add(ChunkKind::Data, &test_hash(1)).unwrap());
        assert!(!index.add(ChunkKind::Data, &test_hash(1)).unwrap());
        assert_eq!(index.count(ChunkKind::Data).unwrap(), 1);
    }

    #[test]
    fn test_kinds_are_separate() {
        let index = MemoryHashIndex::new();
        index.add(ChunkKind::Data, &test_hash(1)).unwrap();
        index.add(ChunkKind::MetaData, &test_hash(2)).unwrap();

        assert!(index.contains(ChunkKind::Data, &test_hash(1)).unwrap());
        assert!(!index.contains(ChunkKind::MetaData, &test_hash(1)).unwrap());
        assert_eq!(
            index.enumerate(ChunkKind::MetaData, 0, 10).unwrap(),
            vec![test_hash(2)]
        );
    }

    #[test]
    fn test_paging_follows_insertion_order() {
        let index = MemoryHashIndex::new();
        for n in [5u8, 3, 9, 1] {
            index.add(ChunkKind::Data, &test_hash(n)).unwrap();
        }

        assert_eq!(
            index.enumerate(ChunkKind::Data, 0, 2).unwrap(),
            vec![test_hash(5), test_hash(3)]
        );
        assert_eq!(
            index.enumerate(ChunkKind::Data, 2, 10).unwrap(),
            vec![test_hash(9), test_hash(1)]
        );
        assert!(index.enumerate(ChunkKind::Data, 4, 10).unwrap().is_empty());

        assert!(index.remove(ChunkKind::Data, &test_hash(3)).unwrap());
        assert!(!index.remove(ChunkKind::Data, &test_hash(3)).unwrap());
        assert_eq!(
            index.enumerate(ChunkKind::Data, 0, 10).unwrap(),
            vec![test_hash(5), test_hash(9), test_hash(1)]
        );
    }
}
