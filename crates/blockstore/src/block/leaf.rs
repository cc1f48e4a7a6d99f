//! Leaf containers.
//!
//! A leaf is a single file: a table of [`SLOTS_PER_BLOCK`] fixed-width
//! header slots followed by the payload region. Every read and write of the
//! file happens through [`LeafState`], which callers reach only by locking the
//! [`Leaf`].

use std::{
    cmp,
    fs::{self, File, OpenOptions},
    io::{self, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use strata_primitives::{ChunkKind, ContentHash};
use tracing::{debug, info, warn};

use super::{
    BlockPrefix,
    header::{
        HeaderTable, STATUS_DELETED, STATUS_OFFSET, SlotEntry, read_payload, read_slot,
        slot_position,
    },
    scan::{self, Salvaged},
    sibling,
};
use crate::{
    config::BlockLimits,
    constants::{BACKUP_SUFFIX, HEADER_TABLE_SIZE, MERGE_SUFFIX, SLOTS_PER_BLOCK},
    error::StoreResult,
    volume::{Volume, container_payload},
};

/// Physical position of a live entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotLocation {
    pub(crate) slot: usize,
    pub(crate) offset: u32,
    pub(crate) size: u32,
}

impl SlotLocation {
    fn of(slot: usize, entry: &SlotEntry) -> Self {
        Self {
            slot,
            offset: entry.offset,
            size: entry.size,
        }
    }
}

/// How a write treats the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PutMode {
    /// Caller write: an existing copy is overwritten. The payload bytes are
    /// reserved on the volume by the caller, see [`Volume::reserve`].
    Client,
    /// Drain, compaction, salvage or fold: stored only if no live copy exists.
    Reinsert,
}

/// Restructuring a write asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Cleanup {
    Compact,
    Split,
}

/// Result of [`LeafState::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PutOutcome {
    /// Whether the chunk now has a live copy in this container.
    pub(crate) stored: bool,
    pub(crate) cleanup: Option<Cleanup>,
}

/// Result of a compaction.
#[derive(Debug, Default)]
pub(crate) struct CompactReport {
    pub(crate) kept: usize,
    pub(crate) reclaimed: u64,
    /// Entries whose payload could not be read back.
    pub(crate) lost: Vec<(ContentHash, ChunkKind)>,
}

/// A leaf node of the block trie.
#[derive(Debug)]
pub(crate) struct Leaf {
    prefix: BlockPrefix,
    state: Mutex<LeafState>,
}

impl Leaf {
    pub(crate) fn new(prefix: BlockPrefix, volume: Arc<Volume>, file: PathBuf) -> Self {
        Self {
            prefix,
            state: Mutex::new(LeafState {
                volume,
                file,
                retired: false,
            }),
        }
    }

    /// A split shadow: readable and drainable, never written.
    pub(crate) fn shadow(prefix: BlockPrefix, volume: Arc<Volume>, file: PathBuf) -> Self {
        let leaf = Self::new(prefix, volume, file);
        leaf.state.lock().retired = true;
        leaf
    }

    pub(crate) fn prefix(&self) -> &BlockPrefix {
        &self.prefix
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, LeafState> {
        self.state.lock()
    }
}

/// Lock-protected state of a [`Leaf`].
#[derive(Debug)]
pub(crate) struct LeafState {
    volume: Arc<Volume>,
    file: PathBuf,
    retired: bool,
}

impl LeafState {
    pub(crate) fn volume(&self) -> &Arc<Volume> {
        &self.volume
    }

    pub(crate) fn file(&self) -> &Path {
        &self.file
    }

    /// Set once the container has been split; writes must re-resolve.
    pub(crate) fn is_retired(&self) -> bool {
        self.retired
    }

    /// Point the leaf at a relocated copy of its container.
    pub(crate) fn rehome(&mut self, volume: Arc<Volume>, file: PathBuf) {
        self.volume = volume;
        self.file = file;
    }

    pub(crate) fn payload_len(&self) -> u64 {
        container_payload(&self.file)
    }

    fn open_read(&self) -> StoreResult<Option<File>> {
        match File::open(&self.file) {
            Ok(file) => Ok(Some(file)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn open_write(&self) -> StoreResult<Option<File>> {
        match OpenOptions::new().read(true).write(true).open(&self.file) {
            Ok(file) => Ok(Some(file)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Open the container for writing, creating it with a zeroed header
    /// table if it is absent or empty.
    fn ensure_container(&self) -> StoreResult<File> {
        if let Some(parent) = self.file.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.file)?;
        if file.metadata()?.len() == 0 {
            file.set_len(HEADER_TABLE_SIZE as u64)?;
            debug!(file = %self.file.display(), "Created container");
        }
        Ok(file)
    }

    /// Live hashes of `kind`.
    #[cfg(test)]
    pub(crate) fn enumerate(&self, kind: ChunkKind) -> StoreResult<Vec<ContentHash>> {
        let Some(mut file) = self.open_read()? else {
            return Ok(Vec::new());
        };
        let table = HeaderTable::read(&mut file, &self.file)?;
        Ok(table
            .used()
            .filter(|(_, entry)| entry.is_live() && entry.kind == kind.as_u8())
            .map(|(_, entry)| entry.hash)
            .collect())
    }

    /// Locate the live copy without reading its payload.
    pub(crate) fn find(&self, hash: &ContentHash, kind: ChunkKind) -> StoreResult<Option<SlotLocation>> {
        let Some(mut file) = self.open_read()? else {
            return Ok(None);
        };
        let table = HeaderTable::read(&mut file, &self.file)?;
        Ok(table
            .used()
            .find(|(_, entry)| entry.is_live() && entry.matches(hash, kind))
            .map(|(slot, entry)| SlotLocation::of(slot, &entry)))
    }

    pub(crate) fn get(
        &self,
        hash: &ContentHash,
        kind: ChunkKind,
    ) -> StoreResult<Option<(SlotLocation, Bytes)>> {
        let Some(mut file) = self.open_read()? else {
            return Ok(None);
        };
        let table = HeaderTable::read(&mut file, &self.file)?;
        let Some((slot, entry)) = table
            .used()
            .find(|(_, entry)| entry.is_live() && entry.matches(hash, kind))
        else {
            return Ok(None);
        };
        let data = read_payload(&mut file, &self.file, slot, &entry)?;
        Ok(Some((SlotLocation::of(slot, &entry), Bytes::from(data))))
    }

    /// Read from a cached location. The slot header is re-read and must
    /// still describe the same live entry.
    pub(crate) fn get_at(
        &self,
        location: &SlotLocation,
        hash: &ContentHash,
        kind: ChunkKind,
    ) -> StoreResult<Option<Bytes>> {
        if location.slot >= SLOTS_PER_BLOCK {
            return Ok(None);
        }
        let Some(mut file) = self.open_read()? else {
            return Ok(None);
        };
        let entry = read_slot(&mut file, &self.file, location.slot)?;
        if !entry.is_live() || !entry.matches(hash, kind) || SlotLocation::of(location.slot, &entry) != *location {
            return Ok(None);
        }
        let data = read_payload(&mut file, &self.file, location.slot, &entry)?;
        Ok(Some(Bytes::from(data)))
    }

    /// Flip every live copy to DELETED. Returns whether one existed.
    pub(crate) fn delete(&self, hash: &ContentHash, kind: ChunkKind) -> StoreResult<bool> {
        let Some(mut file) = self.open_write()? else {
            return Ok(false);
        };
        let table = HeaderTable::read(&mut file, &self.file)?;
        let matches: Vec<usize> = table
            .used()
            .filter(|(_, entry)| entry.is_live() && entry.matches(hash, kind))
            .map(|(slot, _)| slot)
            .collect();
        for slot in &matches {
            mark_deleted(&mut file, *slot)?;
        }
        Ok(!matches.is_empty())
    }

    /// Store a chunk.
    ///
    /// Overwritten copies are flipped to DELETED only once a free slot is
    /// known, right before the payload is written. The payload is written
    /// before its header so a crash leaves a slot pointing at nothing.
    pub(crate) fn put(
        &self,
        hash: &ContentHash,
        kind: ChunkKind,
        data: &[u8],
        mode: PutMode,
        limits: &BlockLimits,
        can_split: bool,
    ) -> StoreResult<PutOutcome> {
        let len = data.len() as u64;
        let mut file = self.ensure_container()?;
        let table = HeaderTable::read(&mut file, &self.file)?;

        let mut wasted = 0u64;
        let mut next_offset = HEADER_TABLE_SIZE as u64;
        let mut matches = Vec::new();
        for (slot, entry) in table.used() {
            next_offset = cmp::max(next_offset, entry.end());
            if !entry.is_live() {
                wasted += u64::from(entry.size);
            } else if entry.matches(hash, kind) {
                matches.push((slot, entry.size));
            }
        }

        if mode == PutMode::Reinsert && !matches.is_empty() {
            return Ok(PutOutcome {
                stored: true,
                cleanup: None,
            });
        }

        let file_len = file.metadata()?.len();
        let Some(slot) = table.first_free() else {
            let cleanup = self.cleanup_for(limits, can_split, file_len, wasted, true);
            return Ok(PutOutcome {
                stored: false,
                cleanup,
            });
        };

        let offset = u32::try_from(next_offset)
            .map_err(|_| io::Error::other("container offset exceeds u32"))?;
        let size = u32::try_from(data.len()).map_err(|_| io::Error::other("chunk exceeds u32"))?;

        for (matched, size) in &matches {
            mark_deleted(&mut file, *matched)?;
            wasted += u64::from(*size);
        }

        file.seek(SeekFrom::Start(next_offset))?;
        file.write_all(data)?;
        file.seek(SeekFrom::Start(slot_position(slot)))?;
        file.write_all(&SlotEntry::new(*hash, kind, offset, size).encode())?;
        if mode == PutMode::Reinsert {
            self.volume.charge(len);
        }

        let file_len = cmp::max(file_len, next_offset + len);
        let too_many_headers = slot + 1 >= SLOTS_PER_BLOCK;
        let cleanup = self.cleanup_for(limits, can_split, file_len, wasted, too_many_headers);
        Ok(PutOutcome {
            stored: true,
            cleanup,
        })
    }

    fn cleanup_for(
        &self,
        limits: &BlockLimits,
        can_split: bool,
        file_len: u64,
        wasted: u64,
        too_many_headers: bool,
    ) -> Option<Cleanup> {
        let too_many_bytes = file_len > limits.max_block_size;
        let too_much_waste = wasted > limits.max_wasted_space;
        if !(too_many_bytes || too_many_headers || too_much_waste) {
            return None;
        }

        let dont_split = too_much_waste
            && !too_many_headers
            && file_len.saturating_sub(wasted) <= limits.max_block_size;
        if dont_split || !can_split {
            // At full depth compaction is the only option and pointless without waste.
            (wasted > 0).then_some(Cleanup::Compact)
        } else {
            Some(Cleanup::Split)
        }
    }

    /// Rewrite the container without its DELETED entries.
    ///
    /// The old file is renamed to `.backup`, live entries are appended to a
    /// fresh container, and the backup is removed. A failed rewrite puts the
    /// backup back in place. A leftover backup from an earlier crash is left
    /// for recovery to fold; compaction refuses to run over it.
    pub(crate) fn compact(&self) -> StoreResult<CompactReport> {
        self.compact_with(Self::ensure_container)
    }

    fn compact_with<W, F>(&self, create: F) -> StoreResult<CompactReport>
    where
        W: Write + Seek,
        F: FnOnce(&Self) -> StoreResult<W>,
    {
        let backup = sibling(&self.file, BACKUP_SUFFIX);
        if backup.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("unfolded backup {}", backup.display()),
            )
            .into());
        }
        fs::rename(&self.file, &backup)?;
        let before = container_payload(&backup);

        let mut charged = 0u64;
        let rewritten = self.rewrite_from(&backup, create, &mut charged);
        let (mut report, summary, next_offset) = match rewritten {
            Ok(done) => done,
            Err(err) => {
                self.volume.release(charged);
                self.restore_backup(&backup);
                return Err(err);
            }
        };

        fs::remove_file(&backup)?;
        self.volume.release(before);

        report.reclaimed = before.saturating_sub(next_offset - HEADER_TABLE_SIZE as u64);
        info!(
            file = %self.file.display(),
            kept = report.kept,
            reclaimed = report.reclaimed,
            lost = report.lost.len(),
            header_corrupted = summary.header_corrupted,
            "Compacted container"
        );
        Ok(report)
    }

    fn rewrite_from<W, F>(
        &self,
        backup: &Path,
        create: F,
        charged: &mut u64,
    ) -> StoreResult<(CompactReport, scan::ScanSummary, u64)>
    where
        W: Write + Seek,
        F: FnOnce(&Self) -> StoreResult<W>,
    {
        let mut report = CompactReport::default();
        let mut target = create(self)?;
        let mut next_offset = HEADER_TABLE_SIZE as u64;
        let mut next_slot = 0usize;

        let summary = scan::salvage(backup, |entry, kind, payload| {
            let Salvaged::Intact(data) = payload else {
                report.lost.push((entry.hash, kind));
                return Ok(());
            };
            let offset = u32::try_from(next_offset)
                .map_err(|_| io::Error::other("container offset exceeds u32"))?;
            target.seek(SeekFrom::Start(next_offset))?;
            target.write_all(&data)?;
            target.seek(SeekFrom::Start(slot_position(next_slot)))?;
            target.write_all(&SlotEntry::new(entry.hash, kind, offset, entry.size).encode())?;
            self.volume.charge(data.len() as u64);
            *charged += data.len() as u64;
            next_offset += data.len() as u64;
            next_slot += 1;
            report.kept += 1;
            Ok(())
        })?;
        target.flush()?;
        Ok((report, summary, next_offset))
    }

    /// Drop a partial rewrite and move the backup back over it.
    fn restore_backup(&self, backup: &Path) {
        if let Err(err) = fs::remove_file(&self.file)
            && err.kind() != io::ErrorKind::NotFound
        {
            warn!(file = %self.file.display(), %err, "Failed to remove partial container");
        }
        match fs::rename(backup, &self.file) {
            Ok(()) => warn!(file = %self.file.display(), "Compaction failed, restored container"),
            Err(err) => {
                warn!(backup = %backup.display(), %err, "Failed to restore container, left for recovery")
            }
        }
    }

    /// Turn this leaf into a split shadow.
    ///
    /// The container is renamed to `.merge` and an empty directory takes its
    /// place. The leaf keeps serving reads from the shadow until drained.
    pub(crate) fn begin_split(&mut self) -> StoreResult<()> {
        let merge = sibling(&self.file, MERGE_SUFFIX);
        fs::rename(&self.file, &merge)?;
        if let Err(err) = fs::create_dir(&self.file)
            && err.kind() != io::ErrorKind::AlreadyExists
        {
            fs::rename(&merge, &self.file)?;
            return Err(err.into());
        }
        info!(file = %self.file.display(), "Split container");
        self.file = merge;
        self.retired = true;
        Ok(())
    }

    /// Read one slot for draining. `None` once the file is gone.
    pub(crate) fn read_slot(&self, slot: usize) -> StoreResult<Option<SlotEntry>> {
        let Some(mut file) = self.open_read()? else {
            return Ok(None);
        };
        read_slot(&mut file, &self.file, slot).map(Some)
    }

    pub(crate) fn read_entry(&self, slot: usize, entry: &SlotEntry) -> StoreResult<Bytes> {
        let Some(mut file) = self.open_read()? else {
            return Err(io::Error::from(io::ErrorKind::NotFound).into());
        };
        read_payload(&mut file, &self.file, slot, entry).map(Bytes::from)
    }

    pub(crate) fn mark_deleted(&self, slot: usize) -> StoreResult<()> {
        if let Some(mut file) = self.open_write()? {
            mark_deleted(&mut file, slot)?;
        }
        Ok(())
    }

    /// Delete the container file and release its payload from the volume.
    pub(crate) fn remove_container(&self) -> StoreResult<()> {
        let payload = self.payload_len();
        match fs::remove_file(&self.file) {
            Ok(()) => {
                self.volume.release(payload);
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn mark_deleted(file: &mut File, slot: usize) -> io::Result<()> {
    file.seek(SeekFrom::Start(slot_position(slot) + STATUS_OFFSET as u64))?;
    file.write_all(&[STATUS_DELETED])
}
