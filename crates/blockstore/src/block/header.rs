//! Fixed-width header slots.

use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom},
    path::Path,
};

use bytes::{Buf, BufMut};
use strata_primitives::{ChunkKind, ContentHash, HASH_LENGTH};

use crate::{
    constants::{HEADER_TABLE_SIZE, SLOT_SIZE, SLOTS_PER_BLOCK},
    error::{StoreError, StoreResult},
};

/// Byte offset of the status field inside a slot.
pub(crate) const STATUS_OFFSET: usize = HASH_LENGTH + 1;

pub(crate) const STATUS_OK: u8 = 0;
pub(crate) const STATUS_DELETED: u8 = 1;

/// One decoded header slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotEntry {
    pub(crate) hash: ContentHash,
    pub(crate) kind: u8,
    pub(crate) status: u8,
    pub(crate) offset: u32,
    pub(crate) size: u32,
}

impl SlotEntry {
    pub(crate) fn new(hash: ContentHash, kind: ChunkKind, offset: u32, size: u32) -> Self {
        Self {
            hash,
            kind: kind.as_u8(),
            status: STATUS_OK,
            offset,
            size,
        }
    }

    /// Unused slot; marks the end of the used region.
    pub(crate) fn is_free(&self) -> bool {
        self.offset == 0 && self.size == 0
    }

    pub(crate) fn is_live(&self) -> bool {
        !self.is_free() && self.status == STATUS_OK
    }

    pub(crate) fn chunk_kind(&self) -> Option<ChunkKind> {
        ChunkKind::from_u8(self.kind)
    }

    pub(crate) fn matches(&self, hash: &ContentHash, kind: ChunkKind) -> bool {
        self.hash == *hash && self.kind == kind.as_u8()
    }

    pub(crate) fn end(&self) -> u64 {
        u64::from(self.offset) + u64::from(self.size)
    }

    pub(crate) fn encode(&self) -> [u8; SLOT_SIZE] {
        let mut out = [0u8; SLOT_SIZE];
        let mut buf = &mut out[..];
        buf.put_slice(self.hash.as_bytes());
        buf.put_u8(self.kind);
        buf.put_u8(self.status);
        buf.put_u32(self.offset);
        buf.put_u32(self.size);
        out
    }

    pub(crate) fn decode(raw: &[u8; SLOT_SIZE]) -> Self {
        let mut buf = &raw[..];
        let mut hash = [0u8; HASH_LENGTH];
        buf.copy_to_slice(&mut hash);
        Self {
            hash: ContentHash::new(hash),
            kind: buf.get_u8(),
            status: buf.get_u8(),
            offset: buf.get_u32(),
            size: buf.get_u32(),
        }
    }
}

/// File position of a slot.
pub(crate) fn slot_position(slot: usize) -> u64 {
    (slot * SLOT_SIZE) as u64
}

/// Read until `buf` is full or EOF, returning the bytes read.
pub(crate) fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let Some(rest) = buf.get_mut(filled..) else {
            break;
        };
        match reader.read(rest) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// Read one slot. A short read is a header corruption.
pub(crate) fn read_slot(file: &mut File, path: &Path, slot: usize) -> StoreResult<SlotEntry> {
    let mut raw = [0u8; SLOT_SIZE];
    file.seek(SeekFrom::Start(slot_position(slot)))?;
    if read_full(file, &mut raw)? < SLOT_SIZE {
        return Err(StoreError::CorruptedHeader {
            path: path.to_path_buf(),
            slot,
        });
    }
    Ok(SlotEntry::decode(&raw))
}

/// Read a slot's payload. A short read is a body corruption.
pub(crate) fn read_payload(
    file: &mut File,
    path: &Path,
    slot: usize,
    entry: &SlotEntry,
) -> StoreResult<Vec<u8>> {
    let mut data = vec![0u8; entry.size as usize];
    file.seek(SeekFrom::Start(u64::from(entry.offset)))?;
    if read_full(file, &mut data)? < data.len() {
        return Err(StoreError::CorruptedBody {
            path: path.to_path_buf(),
            slot,
        });
    }
    Ok(data)
}

/// A container's whole header table, read in one go.
pub(crate) struct HeaderTable {
    raw: Vec<u8>,
}

impl HeaderTable {
    pub(crate) fn read(file: &mut File, path: &Path) -> StoreResult<Self> {
        let mut raw = vec![0u8; HEADER_TABLE_SIZE];
        file.seek(SeekFrom::Start(0))?;
        let filled = read_full(file, &mut raw)?;
        if filled < HEADER_TABLE_SIZE {
            return Err(StoreError::CorruptedHeader {
                path: path.to_path_buf(),
                slot: filled / SLOT_SIZE,
            });
        }
        Ok(Self { raw })
    }

    pub(crate) fn entry(&self, slot: usize) -> Option<SlotEntry> {
        let start = slot.checked_mul(SLOT_SIZE)?;
        let raw: &[u8; SLOT_SIZE] = self.raw.get(start..start + SLOT_SIZE)?.try_into().ok()?;
        Some(SlotEntry::decode(raw))
    }

    /// Used slots in order, stopping at the first free one.
    pub(crate) fn used(&self) -> impl Iterator<Item = (usize, SlotEntry)> + '_ {
        (0..SLOTS_PER_BLOCK)
            .map_while(|slot| self.entry(slot).map(|entry| (slot, entry)))
            .take_while(|(_, entry)| !entry.is_free())
    }

    /// First free slot, if the table is not exhausted.
    pub(crate) fn first_free(&self) -> Option<usize> {
        (0..SLOTS_PER_BLOCK).find(|slot| self.entry(*slot).is_some_and(|entry| entry.is_free()))
    }
}
