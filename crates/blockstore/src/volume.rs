//! Storage roots and their space accounting.

use std::{
    fs, io, mem,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error};
use walkdir::WalkDir;

use crate::{
    block::parse_container_name,
    constants::HEADER_TABLE_SIZE,
    error::{StoreError, StoreResult},
};

/// A storage root with a capacity budget.
///
/// Only payload bytes are charged; header tables are not counted.
#[derive(Debug)]
pub(crate) struct Volume {
    root: PathBuf,
    capacity: u64,
    used: Mutex<u64>,
    overflowed: AtomicBool,
}

impl Volume {
    /// Open a root, creating it if needed, and bootstrap its usage from the
    /// containers already on disk.
    pub(crate) fn open(root: impl Into<PathBuf>, capacity: u64) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let used = payload_on_disk(&root)?;
        debug!(root = %root.display(), capacity, used, "Opened volume");
        Ok(Self {
            root,
            capacity,
            used: Mutex::new(used),
            overflowed: AtomicBool::new(false),
        })
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn used(&self) -> u64 {
        *self.used.lock()
    }

    pub(crate) fn remaining(&self) -> u64 {
        self.capacity.saturating_sub(self.used())
    }

    pub(crate) fn used_percent(&self) -> f64 {
        if self.capacity == 0 {
            return 100.0;
        }
        self.used() as f64 * 100.0 / self.capacity as f64
    }

    /// Charge `bytes` if they fit. The charge is undone when the returned
    /// reservation drops without [`Reservation::commit`].
    pub(crate) fn reserve(&self, bytes: u64) -> StoreResult<Reservation<'_>> {
        let mut used = self.used.lock();
        let remaining = self.capacity.saturating_sub(*used);
        if remaining < bytes {
            return Err(StoreError::CapacityExceeded {
                volume: self.root.clone(),
                requested: bytes,
                remaining,
            });
        }
        *used += bytes;
        Ok(Reservation {
            volume: self,
            bytes,
        })
    }

    pub(crate) fn charge(&self, bytes: u64) {
        self.adjust(i64::try_from(bytes).unwrap_or(i64::MAX));
    }

    pub(crate) fn release(&self, bytes: u64) {
        self.adjust(-i64::try_from(bytes).unwrap_or(i64::MAX));
    }

    /// Add `delta` to usage. Growth wraps on overflow and the condition is
    /// latched and logged once; shrinking saturates at zero.
    pub(crate) fn adjust(&self, delta: i64) {
        let mut used = self.used.lock();
        if delta >= 0 {
            let (next, wrapped) = used.overflowing_add(delta.unsigned_abs());
            if wrapped && !self.overflowed.swap(true, Ordering::Relaxed) {
                error!(root = %self.root.display(), "volume usage counter overflowed");
            }
            *used = next;
        } else {
            *used = used.saturating_sub(delta.unsigned_abs());
        }
    }

    pub(crate) fn overflowed(&self) -> bool {
        self.overflowed.load(Ordering::Relaxed)
    }

    pub(crate) fn info(&self) -> VolumeInfo {
        let used = self.used();
        VolumeInfo {
            path: self.root.clone(),
            capacity: self.capacity,
            used,
            remaining: self.capacity.saturating_sub(used),
            overflowed: self.overflowed(),
        }
    }
}

/// Payload bytes held on a volume ahead of a write.
#[must_use]
#[derive(Debug)]
pub(crate) struct Reservation<'a> {
    volume: &'a Volume,
    bytes: u64,
}

impl Reservation<'_> {
    /// Keep the charge: the bytes have been written.
    pub(crate) fn commit(self) {
        mem::forget(self);
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.volume.release(self.bytes);
    }
}

/// Point-in-time view of a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeInfo {
    /// Root directory.
    pub path: PathBuf,
    /// Payload budget in bytes.
    pub capacity: u64,
    /// Payload bytes in use.
    pub used: u64,
    /// `capacity - used`, floored at zero.
    pub remaining: u64,
    /// Whether the usage counter ever overflowed.
    pub overflowed: bool,
}

/// Payload bytes of a container file: everything past the header table.
pub(crate) fn container_payload(path: &Path) -> u64 {
    fs::metadata(path)
        .map(|meta| meta.len().saturating_sub(HEADER_TABLE_SIZE as u64))
        .unwrap_or(0)
}

fn payload_on_disk(root: &Path) -> io::Result<u64> {
    let mut total = 0u64;
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_container = entry
            .file_name()
            .to_str()
            .and_then(parse_container_name)
            .is_some();
        if is_container {
            total = total.saturating_add(container_payload(entry.path()));
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accounting_saturates() {
        let dir = tempfile::tempdir().unwrap();
        let volume = Volume::open(dir.path(), 100).unwrap();
        assert_eq!(volume.used(), 0);

        volume.charge(60);
        assert_eq!(volume.remaining(), 40);
        volume.charge(60);
        assert_eq!(volume.remaining(), 0);
        assert_eq!(volume.used(), 120);

        volume.release(500);
        assert_eq!(volume.used(), 0);
        assert!(!volume.overflowed());
    }

    #[test]
    fn test_reservation_is_released_unless_committed() {
        let dir = tempfile::tempdir().unwrap();
        let volume = Volume::open(dir.path(), 100).unwrap();

        let held = volume.reserve(70).unwrap();
        assert_eq!(volume.remaining(), 30);
        let err = volume.reserve(31).unwrap_err();
        assert!(matches!(err, StoreError::CapacityExceeded { requested: 31, remaining: 30, .. }));
        drop(held);
        assert_eq!(volume.used(), 0);

        volume.reserve(40).unwrap().commit();
        assert_eq!(volume.used(), 40);
        assert_eq!(volume.remaining(), 60);
    }

    #[test]
    fn test_overflow_is_latched() {
        let dir = tempfile::tempdir().unwrap();
        let volume = Volume::open(dir.path(), 100).unwrap();
        volume.adjust(i64::MAX);
        volume.adjust(i64::MAX);
        volume.adjust(i64::MAX);
        assert!(volume.overflowed());
    }

    #[test]
    fn test_bootstrap_counts_payload_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("ab")).unwrap();
        let table = HEADER_TABLE_SIZE as u64;
        fs::File::create(dir.path().join("ab").join("cd"))
            .unwrap()
            .set_len(table + 300)
            .unwrap();
        fs::File::create(dir.path().join("ef.merge"))
            .unwrap()
            .set_len(table + 20)
            .unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let volume = Volume::open(dir.path(), 10_000).unwrap();
        assert_eq!(volume.used(), 320);
    }
}
