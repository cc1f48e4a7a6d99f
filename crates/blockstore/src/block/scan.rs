//! Tolerant container scans.
//!
//! Unlike the strict leaf operations these never fail on a short read: a
//! short header ends the scan, a short payload is reported for that slot and
//! the scan continues.

use std::{fs::File, io, path::Path};

use bytes::Bytes;
use strata_primitives::{ChunkKind, ContentHash};

use super::header::{SlotEntry, read_payload, read_slot};
use crate::{
    constants::SLOTS_PER_BLOCK,
    error::{StoreError, StoreResult},
};

/// Outcome of reading one live slot's payload.
pub(crate) enum Salvaged {
    Intact(Bytes),
    BodyCorrupted,
}

/// Summary of a tolerant scan.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScanSummary {
    pub(crate) header_corrupted: bool,
    pub(crate) live: usize,
    pub(crate) body_corrupted: usize,
}

fn open(path: &Path) -> io::Result<Option<File>> {
    match File::open(path) {
        Ok(file) => Ok(Some(file)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Visit every live slot of a container with its payload.
pub(crate) fn salvage<F>(path: &Path, mut visit: F) -> StoreResult<ScanSummary>
where
    F: FnMut(&SlotEntry, ChunkKind, Salvaged) -> StoreResult<()>,
{
    let mut summary = ScanSummary::default();
    let Some(mut file) = open(path)? else {
        return Ok(summary);
    };

    for slot in 0..SLOTS_PER_BLOCK {
        let entry = match read_slot(&mut file, path, slot) {
            Ok(entry) => entry,
            Err(StoreError::CorruptedHeader { .. }) => {
                summary.header_corrupted = true;
                break;
            }
            Err(err) => return Err(err),
        };
        if entry.is_free() {
            break;
        }
        let Some(kind) = entry.chunk_kind().filter(|_| entry.is_live()) else {
            continue;
        };

        summary.live += 1;
        let payload = match read_payload(&mut file, path, slot, &entry) {
            Ok(data) => Salvaged::Intact(Bytes::from(data)),
            Err(StoreError::CorruptedBody { .. }) => {
                summary.body_corrupted += 1;
                Salvaged::BodyCorrupted
            }
            Err(err) => return Err(err),
        };
        visit(&entry, kind, payload)?;
    }

    Ok(summary)
}

/// Live `(hash, kind)` pairs readable from the header table.
pub(crate) fn live_entries(path: &Path) -> StoreResult<(Vec<(ContentHash, ChunkKind)>, bool)> {
    let mut live = Vec::new();
    let Some(mut file) = open(path)? else {
        return Ok((live, false));
    };

    for slot in 0..SLOTS_PER_BLOCK {
        let entry = match read_slot(&mut file, path, slot) {
            Ok(entry) => entry,
            Err(StoreError::CorruptedHeader { .. }) => return Ok((live, true)),
            Err(err) => return Err(err),
        };
        if entry.is_free() {
            break;
        }
        if let Some(kind) = entry.chunk_kind().filter(|_| entry.is_live()) {
            live.push((entry.hash, kind));
        }
    }

    Ok((live, false))
}
