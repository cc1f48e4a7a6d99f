//! redb-based hash index.
//!
//! This crate provides [`RedbHashIndex`], a persistent [`HashIndex`] backed by
//! the redb embedded database. Three tables keep the per-kind lists:
//!
//! - `positions`: `[kind][hash]` -> insertion sequence number
//! - `entries`: `[kind][seq BE]` -> hash, iterated in order for paging
//! - `next_seq`: kind -> next sequence number to hand out

use std::{fmt::Display, path::Path};

use redb::{Database, ReadableTable, TableDefinition};
use strata_primitives::{ChunkKind, ContentHash};
use strata_storage::{
    DatabaseError, DatabaseResult, Encode, HashIndex,
    keys::{HASH_KEY_LEN, HashKey, SEQ_KEY_LEN, SeqKey},
};
use tracing::debug;

const POSITIONS_TABLE: TableDefinition<&[u8; HASH_KEY_LEN], u64> =
    TableDefinition::new("positions");

const ENTRIES_TABLE: TableDefinition<&[u8; SEQ_KEY_LEN], &[u8; 32]> =
    TableDefinition::new("entries");

const NEXT_SEQ_TABLE: TableDefinition<u8, u64> = TableDefinition::new("next_seq");

fn open_err(err: impl Display) -> DatabaseError {
    DatabaseError::Open(err.to_string())
}

fn tx_err(err: impl Display) -> DatabaseError {
    DatabaseError::InitTx(err.to_string())
}

fn table_err(err: impl Display) -> DatabaseError {
    DatabaseError::Table(err.to_string())
}

fn read_err(err: impl Display) -> DatabaseError {
    DatabaseError::Read(err.to_string())
}

fn write_err(err: impl Display) -> DatabaseError {
    DatabaseError::Write(err.to_string())
}

fn commit_err(err: impl Display) -> DatabaseError {
    DatabaseError::Commit(err.to_string())
}

/// redb-based hash index.
///
/// Every mutation is its own committed write transaction, so an acknowledged
/// `add` or `remove` survives a crash.
pub struct RedbHashIndex {
    db: Database,
}

impl RedbHashIndex {
    /// Open or create an index at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> DatabaseResult<Self> {
        let db = Database::create(path.as_ref()).map_err(open_err)?;

        // Ensure all tables exist so read transactions can open them.
        let write_txn = db.begin_write().map_err(tx_err)?;
        {
            write_txn.open_table(POSITIONS_TABLE).map_err(table_err)?;
            write_txn.open_table(ENTRIES_TABLE).map_err(table_err)?;
            write_txn.open_table(NEXT_SEQ_TABLE).map_err(table_err)?;
        }
        write_txn.commit().map_err(commit_err)?;

        debug!(path = %path.as_ref().display(), "Opened redb hash index");
        Ok(Self { db })
    }
}

impl HashIndex for RedbHashIndex {
    fn add(&self, kind: ChunkKind, hash: &ContentHash) -> DatabaseResult<bool> {
        let key = HashKey { kind, hash: *hash }.encode();

        let write_txn = self.db.begin_write().map_err(tx_err)?;
        let added = {
            let mut positions = write_txn.open_table(POSITIONS_TABLE).map_err(table_err)?;
            if positions.get(&key).map_err(read_err)?.is_some() {
                false
            } else {
                let mut next_seq = write_txn.open_table(NEXT_SEQ_TABLE).map_err(table_err)?;
                let seq = next_seq
                    .get(kind.as_u8())
                    .map_err(read_err)?
                    .map(|guard| guard.value())
                    .unwrap_or(0);
                next_seq
                    .insert(kind.as_u8(), seq + 1)
                    .map_err(write_err)?;

                let mut entries = write_txn.open_table(ENTRIES_TABLE).map_err(table_err)?;
                entries
                    .insert(&SeqKey { kind, seq }.encode(), hash.as_bytes())
                    .map_err(write_err)?;
                positions.insert(&key, seq).map_err(write_err)?;
                true
            }
        };
        write_txn.commit().map_err(commit_err)?;
        Ok(added)
    }

    fn remove(&self, kind: ChunkKind, hash: &ContentHash) -> DatabaseResult<bool> {
        let key = HashKey { kind, hash: *hash }.encode();

        let write_txn = self.db.begin_write().map_err(tx_err)?;
        let removed = {
            let mut positions = write_txn.open_table(POSITIONS_TABLE).map_err(table_err)?;
            let seq = positions
                .remove(&key)
                .map_err(write_err)?
                .map(|guard| guard.value());
            match seq {
                Some(seq) => {
                    let mut entries = write_txn.open_table(ENTRIES_TABLE).map_err(table_err)?;
                    entries
                        .remove(&SeqKey { kind, seq }.encode())
                        .map_err(write_err)?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit().map_err(commit_err)?;
        Ok(removed)
    }

    fn contains(&self, kind: ChunkKind, hash: &ContentHash) -> DatabaseResult<bool> {
        let read_txn = self.db.begin_read().map_err(tx_err)?;
        let positions = read_txn.open_table(POSITIONS_TABLE).map_err(table_err)?;
        let key = HashKey { kind, hash: *hash }.encode();
        Ok(positions.get(&key).map_err(read_err)?.is_some())
    }

    fn enumerate(
        &self,
        kind: ChunkKind,
        offset: u64,
        limit: usize,
    ) -> DatabaseResult<Vec<ContentHash>> {
        let read_txn = self.db.begin_read().map_err(tx_err)?;
        let entries = read_txn.open_table(ENTRIES_TABLE).map_err(table_err)?;

        let start = SeqKey::first(kind).encode();
        let end = SeqKey::last(kind).encode();
        let skip = usize::try_from(offset).unwrap_or(usize::MAX);

        let mut hashes = Vec::with_capacity(limit.min(1024));
        for entry in entries
            .range::<&[u8; SEQ_KEY_LEN]>(&start..=&end)
            .map_err(read_err)?
            .skip(skip)
            .take(limit)
        {
            let (_, value) = entry.map_err(read_err)?;
            hashes.push(ContentHash::new(*value.value()));
        }
        Ok(hashes)
    }

    fn count(&self, kind: ChunkKind) -> DatabaseResult<u64> {
        let read_txn = self.db.begin_read().map_err(tx_err)?;
        let entries = read_txn.open_table(ENTRIES_TABLE).map_err(table_err)?;

        let start = SeqKey::first(kind).encode();
        let end = SeqKey::last(kind).encode();

        // Count by iterating
        let mut count = 0u64;
        for entry in entries.range::<&[u8; SEQ_KEY_LEN]>(&start..=&end).map_err(read_err)? {
            entry.map_err(read_err)?;
            count += 1;
        }
        Ok(count)
    }
}
