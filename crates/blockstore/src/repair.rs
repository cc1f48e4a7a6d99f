//! Corruption repair and chunk redownload.
//!
//! A short read anywhere in a container marks it corrupted. The container is
//! moved aside, every intact entry is written back through the normal put
//! path, and entries whose payload is gone are queued for the redownload
//! worker, which asks the [`PeerFetcher`](crate::PeerFetcher) for them.

use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use serde::Serialize;
use strata_primitives::{ChunkKind, ContentHash};
use tracing::{debug, error, info, warn};

use crate::{
    block::{Leaf, PutMode, scan, unique_sibling},
    constants::REPAIR_SUFFIX,
    error::{StoreError, StoreResult},
    metrics::RepairMetrics,
    relocate::copy_verified,
    store::StoreInner,
    volume::container_payload,
};

/// What to repair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairTarget {
    /// The container the hash routes to.
    Hash(ContentHash),
    /// A container path, absolute or relative to a volume root.
    Container(PathBuf),
}

/// Aggregate repair counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairStats {
    /// Corruption events handled.
    pub corrupted_blocks: u64,
    /// Corruption events ignored within the cool-down window.
    pub skipped: u64,
    /// Containers whose header table was cut short.
    pub header_corrupted: u64,
    /// Entries whose payload was cut short.
    pub body_corrupted: u64,
    /// Entries re-inserted from corrupted containers.
    pub salvaged: u64,
    /// Entries handed to the redownload worker.
    pub queued_for_download: u64,
    /// Entries recovered from peers.
    pub downloaded: u64,
    /// Entries neither salvaged nor downloaded.
    pub lost: u64,
}

/// A chunk to fetch from peers.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RedownloadJob {
    hash: ContentHash,
    kind: ChunkKind,
}

#[derive(Default)]
struct Counters {
    corrupted_blocks: AtomicU64,
    skipped: AtomicU64,
    header_corrupted: AtomicU64,
    body_corrupted: AtomicU64,
    salvaged: AtomicU64,
    queued: AtomicU64,
    downloaded: AtomicU64,
    lost: AtomicU64,
}

/// Cool-down bookkeeping and counters.
#[derive(Default)]
pub(crate) struct RepairLedger {
    recent: Mutex<HashMap<PathBuf, Instant>>,
    counters: Counters,
    metrics: RepairMetrics,
}

fn bump(counter: &AtomicU64, metric: &metrics::Counter, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
    metric.increment(n);
}

impl RepairLedger {
    /// Whether `path` may be repaired now. Admitting it starts its cool-down.
    fn admit(&self, path: &Path, cooldown: Duration) -> bool {
        let mut recent = self.recent.lock();
        let now = Instant::now();
        recent.retain(|_, at| now.duration_since(*at) < cooldown);
        if recent.contains_key(path) {
            return false;
        }
        recent.insert(path.to_path_buf(), now);
        true
    }

    pub(crate) fn record_body_corrupted(&self, n: u64) {
        bump(&self.counters.body_corrupted, &self.metrics.body_corrupted_total, n);
    }

    pub(crate) fn snapshot(&self) -> RepairStats {
        let c = &self.counters;
        RepairStats {
            corrupted_blocks: c.corrupted_blocks.load(Ordering::Relaxed),
            skipped: c.skipped.load(Ordering::Relaxed),
            header_corrupted: c.header_corrupted.load(Ordering::Relaxed),
            body_corrupted: c.body_corrupted.load(Ordering::Relaxed),
            salvaged: c.salvaged.load(Ordering::Relaxed),
            queued_for_download: c.queued.load(Ordering::Relaxed),
            downloaded: c.downloaded.load(Ordering::Relaxed),
            lost: c.lost.load(Ordering::Relaxed),
        }
    }
}

/// What a tolerant re-insertion of a container achieved.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SalvageReport {
    pub(crate) salvaged: u64,
    pub(crate) queued: u64,
    pub(crate) header_corrupted: bool,
    pub(crate) body_corrupted: u64,
}

/// Outcome of [`StoreInner::repair_leaf`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RepairOutcome {
    /// Repaired within the cool-down window already.
    Skipped,
    /// The container no longer exists.
    Absent,
    Repaired(SalvageReport),
}

impl StoreInner {
    /// React to a short read from `leaf`.
    pub(crate) fn handle_corruption(&self, leaf: &Arc<Leaf>, cause: &StoreError) -> StoreResult<()> {
        warn!(prefix = %leaf.prefix(), %cause, "Corrupted container");
        self.repair_leaf(leaf).map(|_| ())
    }

    /// Move a leaf's container aside and salvage it.
    pub(crate) fn repair_leaf(&self, leaf: &Arc<Leaf>) -> StoreResult<RepairOutcome> {
        let file = leaf.lock().file().to_path_buf();
        let ledger = &self.repairs;
        if !ledger.admit(&file, self.config.repair_cooldown()) {
            bump(&ledger.counters.skipped, &ledger.metrics.skipped_total, 1);
            debug!(file = %file.display(), "Repair skipped within cool-down");
            return Ok(RepairOutcome::Skipped);
        }

        let (aside, volume) = {
            let state = leaf.lock();
            let file = state.file();
            match fs::metadata(file) {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    return Ok(RepairOutcome::Absent);
                }
                Err(err) => return Err(err.into()),
            }
            let aside = unique_sibling(file, REPAIR_SUFFIX);
            move_aside(file, &aside)?;
            (aside, Arc::clone(state.volume()))
        };
        bump(&ledger.counters.corrupted_blocks, &ledger.metrics.corrupted_blocks_total, 1);

        let report = self.salvage_file(&aside, false)?;
        let payload = container_payload(&aside);
        fs::remove_file(&aside)?;
        volume.release(payload);

        bump(&ledger.counters.salvaged, &ledger.metrics.salvaged_total, report.salvaged);
        ledger.record_body_corrupted(report.body_corrupted);
        if report.header_corrupted {
            bump(&ledger.counters.header_corrupted, &ledger.metrics.header_corrupted_total, 1);
        }
        info!(
            file = %file.display(),
            salvaged = report.salvaged,
            queued = report.queued,
            header_corrupted = report.header_corrupted,
            "Repaired container"
        );
        Ok(RepairOutcome::Repaired(report))
    }

    /// Re-insert every intact live entry of `path` and queue the rest for
    /// redownload. With `reindex` the salvaged hashes are also added to the
    /// index.
    pub(crate) fn salvage_file(&self, path: &Path, reindex: bool) -> StoreResult<SalvageReport> {
        let mut report = SalvageReport::default();
        let mut missing = Vec::new();

        let summary = scan::salvage(path, |entry, kind, payload| {
            match payload {
                scan::Salvaged::Intact(data) => {
                    match self.store_chunk(&entry.hash, kind, &data, PutMode::Reinsert) {
                        Ok(()) => {
                            report.salvaged += 1;
                            if reindex {
                                self.index.add(kind, &entry.hash)?;
                            }
                        }
                        Err(err) => {
                            warn!(hash = %entry.hash, %kind, %err, "Could not re-home salvaged chunk");
                            missing.push((entry.hash, kind));
                        }
                    }
                }
                scan::Salvaged::BodyCorrupted => missing.push((entry.hash, kind)),
            }
            Ok(())
        })?;

        report.header_corrupted = summary.header_corrupted;
        report.body_corrupted = summary.body_corrupted as u64;
        report.queued = missing.len() as u64;
        for (hash, kind) in missing {
            self.queue_redownload(hash, kind);
        }
        Ok(report)
    }

    pub(crate) fn queue_redownload(&self, hash: ContentHash, kind: ChunkKind) {
        let ledger = &self.repairs;
        bump(&ledger.counters.queued, &ledger.metrics.queued_total, 1);
        debug!(%hash, %kind, "Queued chunk for redownload");
        self.repair_queue.submit(RedownloadJob { hash, kind });
    }

    /// Fetch a lost chunk from peers. A chunk no peer can supply is dropped
    /// from the index.
    pub(crate) fn redownload(&self, job: RedownloadJob) {
        let RedownloadJob { hash, kind } = job;
        let ledger = &self.repairs;

        let fetched = self
            .fetcher
            .fetch(&hash, kind)
            .filter(|data| self.verify(&hash, kind, data));
        let recovered = match fetched {
            Some(data) => match self.store_chunk(&hash, kind, &data, PutMode::Reinsert) {
                Ok(()) => true,
                Err(err) => {
                    warn!(%hash, %kind, %err, "Failed to store redownloaded chunk");
                    false
                }
            },
            None => false,
        };

        if recovered {
            bump(&ledger.counters.downloaded, &ledger.metrics.downloaded_total, 1);
            debug!(%hash, %kind, "Redownloaded chunk");
            return;
        }
        bump(&ledger.counters.lost, &ledger.metrics.lost_total, 1);
        warn!(%hash, %kind, "Chunk lost");
        if let Err(err) = self.index.remove(kind, &hash) {
            warn!(%hash, %kind, %err, "Failed to drop lost chunk from index");
        }
    }
}

/// Move a corrupted container out of the way.
///
/// If a copy had to be made and the original cannot be removed, the original
/// is restored and the repair is abandoned.
fn move_aside(file: &Path, aside: &Path) -> StoreResult<()> {
    move_aside_with(file, aside, |from, to| fs::rename(from, to), |path| fs::remove_file(path))
}

fn move_aside_with<R, D>(file: &Path, aside: &Path, rename: R, remove: D) -> StoreResult<()>
where
    R: FnOnce(&Path, &Path) -> io::Result<()>,
    D: FnOnce(&Path) -> io::Result<()>,
{
    match rename(file, aside) {
        Ok(()) => return Ok(()),
        Err(err) => debug!(file = %file.display(), %err, "Rename failed, copying instead"),
    }
    copy_verified(file, aside)?;

    let Err(err) = remove(file) else {
        return Ok(());
    };
    let remaining = fs::metadata(file).map(|meta| meta.len()).unwrap_or(0);
    if remaining == 0 {
        return Ok(());
    }
    let restored = fs::copy(aside, file).is_ok();
    let _ = fs::remove_file(aside);
    error!(file = %file.display(), %err, restored, "Corrupted container could not be moved aside");
    Err(StoreError::RepairFatal {
        path: file.to_path_buf(),
        reason: format!("cannot remove original: {err}"),
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn cross_device(_: &Path, _: &Path) -> io::Result<()> {
        Err(io::Error::other("cross-device link"))
    }

    #[test]
    fn test_cooldown_debounce() {
        let ledger = RepairLedger::default();
        let path = Path::new("/v/ab");
        assert!(ledger.admit(path, Duration::from_secs(60)));
        assert!(!ledger.admit(path, Duration::from_secs(60)));
        assert!(ledger.admit(Path::new("/v/cd"), Duration::from_secs(60)));
        // A zero window never debounces.
        assert!(ledger.admit(path, Duration::ZERO));
        assert!(ledger.admit(path, Duration::ZERO));
    }

    #[test]
    fn test_move_aside_renames() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("ab");
        fs::write(&file, b"bad").unwrap();
        let aside = unique_sibling(&file, REPAIR_SUFFIX);

        move_aside(&file, &aside).unwrap();
        assert!(!file.exists());
        assert_eq!(fs::read(&aside).unwrap(), b"bad");
    }

    #[test]
    fn test_move_aside_copies_when_rename_fails() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("ab");
        fs::write(&file, b"corrupted container").unwrap();
        let aside = unique_sibling(&file, REPAIR_SUFFIX);

        move_aside_with(&file, &aside, cross_device, |path| fs::remove_file(path)).unwrap();
        assert!(!file.exists());
        assert_eq!(fs::read(&aside).unwrap(), b"corrupted container");
    }

    #[test]
    fn test_move_aside_restores_an_unremovable_original() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("ab");
        fs::write(&file, b"corrupted container").unwrap();
        let aside = unique_sibling(&file, REPAIR_SUFFIX);

        let err = move_aside_with(&file, &aside, cross_device, |_| {
            Err(io::Error::from(io::ErrorKind::PermissionDenied))
        })
        .unwrap_err();
        assert_matches!(err, StoreError::RepairFatal { ref path, .. } if *path == file);
        assert_eq!(fs::read(&file).unwrap(), b"corrupted container");
        assert!(!aside.exists());
    }

    #[test]
    fn test_move_aside_tolerates_a_vanished_original() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("ab");
        fs::write(&file, b"corrupted container").unwrap();
        let aside = unique_sibling(&file, REPAIR_SUFFIX);

        move_aside_with(&file, &aside, cross_device, |path| {
            fs::remove_file(path)?;
            Err(io::Error::from(io::ErrorKind::NotFound))
        })
        .unwrap();
        assert_eq!(fs::read(&aside).unwrap(), b"corrupted container");
    }
}
