//! The block store.
//!
//! [`BlockStore`] routes every chunk through a trie of [`Block`]s keyed by
//! successive hash bytes. It owns the trie, the volumes, one location cache
//! per chunk kind, the hash index, and the two background workers that drain
//! split shadows and redownload lost chunks.

use std::{
    fmt, io,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use strata_primitives::{ChunkKind, ContentHash};
use strata_storage::HashIndex;
use tracing::{debug, error, info, warn};

use crate::{
    block::{Block, BlockPrefix, Cleanup, Directory, Leaf, LeafState, PutMode},
    cache::{CacheStats, Location, LocationCache},
    config::{BlockLimits, BlockStoreConfig},
    constants::{BUSY_RETRY_LIMIT, MAX_HANDOFFS},
    error::{StoreError, StoreResult},
    merge::MergeTask,
    metrics::BlockStoreMetrics,
    queue::WorkQueue,
    repair::{RedownloadJob, RepairLedger, RepairStats, RepairTarget},
    traits::{MetaValidator, NoPeers, NonEmptyMeta, PeerFetcher},
    volume::{Volume, VolumeInfo},
    worker,
};

const MERGE_WORKER: &str = "strata-merge";
const REPAIR_WORKER: &str = "strata-repair";

/// Where the live copy of a chunk sits on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkLocation {
    /// Container file.
    pub container: PathBuf,
    /// Root of the volume holding the container.
    pub volume: PathBuf,
    /// Header slot index.
    pub slot: usize,
    /// Payload offset within the container.
    pub offset: u32,
    /// Payload length.
    pub size: u32,
}

/// Builder for a [`BlockStore`] with non-default collaborators.
pub struct BlockStoreBuilder {
    config: BlockStoreConfig,
    index: Arc<dyn HashIndex>,
    validator: Arc<dyn MetaValidator>,
    fetcher: Arc<dyn PeerFetcher>,
}

impl BlockStoreBuilder {
    /// Start from a configuration and an index.
    pub fn new(config: BlockStoreConfig, index: Arc<dyn HashIndex>) -> Self {
        Self {
            config,
            index,
            validator: Arc::new(NonEmptyMeta),
            fetcher: Arc::new(NoPeers),
        }
    }

    /// Meta-data validator used when revalidating cached reads.
    pub fn validator(mut self, validator: impl MetaValidator + 'static) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    /// Source for chunks lost to corruption.
    pub fn fetcher(mut self, fetcher: impl PeerFetcher + 'static) -> Self {
        self.fetcher = Arc::new(fetcher);
        self
    }

    /// Open the volumes, start the workers and recover leftovers.
    pub fn open(self) -> StoreResult<BlockStore> {
        let Self {
            config,
            index,
            validator,
            fetcher,
        } = self;

        if config.volumes.is_empty() {
            return Err(StoreError::NoVolumes);
        }
        config.validate()?;
        let volumes = config
            .volumes
            .iter()
            .map(|volume| Volume::open(&volume.path, volume.capacity_bytes).map(Arc::new))
            .collect::<io::Result<Vec<_>>>()?;

        let inner = Arc::new(StoreInner {
            limits: config.limits(),
            root: Arc::new(Directory::new(BlockPrefix::root())),
            structure: Mutex::new(()),
            volumes: RwLock::new(volumes),
            data_cache: LocationCache::new(config.cache_capacity),
            meta_cache: LocationCache::new(config.cache_capacity),
            index,
            validator,
            fetcher,
            merge_queue: WorkQueue::new("merge", config.merge_queue_capacity),
            repair_queue: WorkQueue::new("repair", config.repair_queue_capacity),
            repairs: RepairLedger::default(),
            metrics: BlockStoreMetrics::default(),
            stop: AtomicBool::new(false),
            config,
        });

        let workers = vec![
            worker::spawn(MERGE_WORKER, &inner, StoreInner::merge_queue, StoreInner::drain)?,
            worker::spawn(REPAIR_WORKER, &inner, StoreInner::repair_queue, StoreInner::redownload)?,
        ];
        let store = BlockStore {
            inner,
            workers: Mutex::new(workers),
        };

        if store.inner.config.recover_on_open {
            store.inner.recover()?;
        }
        info!(
            volumes = store.inner.config.volumes.len(),
            "Opened block store"
        );
        Ok(store)
    }
}

/// Content-addressable chunk store over packed block containers.
pub struct BlockStore {
    inner: Arc<StoreInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for BlockStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockStore")
            .field("volumes", &self.volumes())
            .finish_non_exhaustive()
    }
}

impl BlockStore {
    /// Open a store with the default collaborators.
    pub fn open(config: BlockStoreConfig, index: Arc<dyn HashIndex>) -> StoreResult<Self> {
        BlockStoreBuilder::new(config, index).open()
    }

    /// Builder for custom collaborators.
    pub fn builder(config: BlockStoreConfig, index: Arc<dyn HashIndex>) -> BlockStoreBuilder {
        BlockStoreBuilder::new(config, index)
    }

    /// Store a chunk, replacing any previous copy.
    pub fn put(&self, hash: &ContentHash, kind: ChunkKind, data: &[u8]) -> StoreResult<()> {
        if hash.is_zero() {
            return Err(StoreError::ReservedHash);
        }
        let max = self.inner.config.max_chunk_size;
        if data.len() > max {
            return Err(StoreError::ChunkTooLarge {
                size: data.len(),
                max,
            });
        }

        self.inner.store_chunk(hash, kind, data, PutMode::Client)?;
        self.inner.cache(kind).remove(hash);
        self.inner.index.add(kind, hash)?;
        self.inner.metrics.puts_total.increment(1);
        debug!(%hash, %kind, size = data.len(), "Stored chunk");
        Ok(())
    }

    /// Read a chunk.
    pub fn get(&self, hash: &ContentHash, kind: ChunkKind) -> StoreResult<Bytes> {
        self.inner.metrics.gets_total.increment(1);
        if hash.is_zero() {
            return Err(StoreError::NotFound { hash: *hash, kind });
        }
        self.inner.get(hash, kind)
    }

    /// Whether a live copy exists. A cached location is trusted as is.
    pub fn has(&self, hash: &ContentHash, kind: ChunkKind) -> bool {
        !hash.is_zero() && self.inner.has(hash, kind)
    }

    /// Remove a chunk. Deleting an absent chunk succeeds.
    pub fn delete(&self, hash: &ContentHash, kind: ChunkKind) -> StoreResult<()> {
        if hash.is_zero() {
            return Ok(());
        }
        self.inner.delete(hash, kind)?;
        self.inner.metrics.deletes_total.increment(1);
        debug!(%hash, %kind, "Deleted chunk");
        Ok(())
    }

    /// Page through the known hashes of `kind` in insertion order.
    pub fn enumerate(
        &self,
        kind: ChunkKind,
        offset: u64,
        limit: usize,
    ) -> StoreResult<Vec<ContentHash>> {
        Ok(self.inner.index.enumerate(kind, offset, limit)?)
    }

    /// Number of indexed hashes of `kind`.
    pub fn count(&self, kind: ChunkKind) -> StoreResult<u64> {
        Ok(self.inner.index.count(kind)?)
    }

    /// Where the live copy of a chunk is stored.
    pub fn locate(&self, hash: &ContentHash, kind: ChunkKind) -> StoreResult<Option<ChunkLocation>> {
        if hash.is_zero() {
            return Ok(None);
        }
        let found = self
            .inner
            .read_with_repair(hash, |state| state.find(hash, kind))?;
        Ok(found.map(|(slot, leaf)| {
            let state = leaf.lock();
            ChunkLocation {
                container: state.file().to_path_buf(),
                volume: state.volume().root().to_path_buf(),
                slot: slot.slot,
                offset: slot.offset,
                size: slot.size,
            }
        }))
    }

    /// Salvage a container and wait up to `max_wait` for the redownloads it
    /// queued. Returns `false` if the wait timed out.
    pub fn repair(&self, target: RepairTarget, max_wait: Duration) -> StoreResult<bool> {
        self.inner.repair_target(target)?;
        Ok(self.inner.repair_queue.wait_idle(max_wait))
    }

    /// Add a storage root. New containers may be placed on it immediately.
    pub fn add_volume(&self, path: impl Into<PathBuf>, capacity_bytes: u64) -> StoreResult<()> {
        let path = path.into();
        let mut volumes = self.inner.volumes.write();
        if volumes.iter().any(|volume| volume.root() == path) {
            debug!(path = %path.display(), "Volume already attached");
            return Ok(());
        }
        let volume = Volume::open(&path, capacity_bytes)?;
        info!(
            path = %path.display(),
            capacity = capacity_bytes,
            used = volume.used(),
            "Added volume"
        );
        volumes.push(Arc::new(volume));
        Ok(())
    }

    /// Snapshot of every volume.
    pub fn volumes(&self) -> Vec<VolumeInfo> {
        self.inner
            .volumes
            .read()
            .iter()
            .map(|volume| volume.info())
            .collect()
    }

    /// Move at most one container from the fullest volume to the emptiest.
    /// Returns whether a container moved.
    pub fn balance_once(&self) -> bool {
        match self.inner.balance_once() {
            Ok(moved) => moved,
            Err(err) => {
                warn!(%err, "Balancing pass failed");
                false
            }
        }
    }

    /// Wait until every queued split shadow is drained.
    pub fn wait_for_merges(&self, max_wait: Duration) -> bool {
        self.inner.merge_queue.wait_idle(max_wait)
    }

    /// Split shadows queued or being drained.
    pub fn pending_merges(&self) -> usize {
        self.inner.merge_queue.pending()
    }

    /// Location cache statistics for `kind`.
    pub fn cache_stats(&self, kind: ChunkKind) -> CacheStats {
        self.inner.cache(kind).stats()
    }

    /// Aggregate corruption repair counters.
    pub fn repair_stats(&self) -> RepairStats {
        self.inner.repairs.snapshot()
    }

    /// Re-add every live entry on every volume to the hash index.
    pub fn reindex(&self) -> StoreResult<u64> {
        self.inner.reindex()
    }

    /// Stop the workers. Undrained shadows are resumed by the next open.
    pub fn shutdown(&self) {
        self.inner.stop.store(true, Ordering::Relaxed);
        let workers = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return;
        }
        for handle in workers {
            let name = handle.thread().name().map(str::to_owned);
            if handle.join().is_err() {
                warn!(worker = ?name, "Worker panicked");
            }
        }
        info!("Block store stopped");
    }
}

impl Drop for BlockStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The trie path to a leaf, plus the split shadows above it.
pub(crate) struct Route {
    pub(crate) leaf: Arc<Leaf>,
    /// Shadows from the root downwards.
    pub(crate) shadows: Vec<Arc<Leaf>>,
}

impl Route {
    /// The shadows from the root down, then the leaf.
    ///
    /// Entries only ever move from a shadow into the leaf, and both writes
    /// and drains clear the shadow copy first, so visiting shadows before the
    /// leaf never misses an entry that is in flight.
    fn oldest_first(&self) -> impl Iterator<Item = &Arc<Leaf>> {
        self.shadows.iter().chain(std::iter::once(&self.leaf))
    }

    /// Path of the leaf if it was split after this route was resolved.
    fn retired(&self) -> Option<PathBuf> {
        let state = self.leaf.lock();
        state.is_retired().then(|| state.file().to_path_buf())
    }
}

/// A failure tied to the container that produced it.
pub(crate) struct LeafError {
    pub(crate) err: StoreError,
    pub(crate) leaf: Arc<Leaf>,
}

impl LeafError {
    fn new(err: StoreError, leaf: &Arc<Leaf>) -> Self {
        Self {
            err,
            leaf: Arc::clone(leaf),
        }
    }
}

enum Probe<T> {
    Found(T, Arc<Leaf>),
    Missing,
    Busy(PathBuf),
}

enum Attempt {
    Stored,
    Full,
    Busy(PathBuf),
}

/// Restructuring work to hand off once the leaf lock is released.
#[derive(Default)]
struct Followup {
    merge: Option<MergeTask>,
    redownload: Vec<(ContentHash, ChunkKind)>,
}

/// Shared state behind a [`BlockStore`] handle.
pub(crate) struct StoreInner {
    pub(crate) config: BlockStoreConfig,
    pub(crate) limits: BlockLimits,
    pub(crate) root: Arc<Directory>,
    /// Serializes trie structure changes only.
    pub(crate) structure: Mutex<()>,
    pub(crate) volumes: RwLock<Vec<Arc<Volume>>>,
    data_cache: LocationCache,
    meta_cache: LocationCache,
    pub(crate) index: Arc<dyn HashIndex>,
    pub(crate) validator: Arc<dyn MetaValidator>,
    pub(crate) fetcher: Arc<dyn PeerFetcher>,
    pub(crate) merge_queue: WorkQueue<MergeTask>,
    pub(crate) repair_queue: WorkQueue<RedownloadJob>,
    pub(crate) repairs: RepairLedger,
    pub(crate) metrics: BlockStoreMetrics,
    stop: AtomicBool,
}

impl StoreInner {
    pub(crate) fn cache(&self, kind: ChunkKind) -> &LocationCache {
        match kind {
            ChunkKind::Data => &self.data_cache,
            ChunkKind::MetaData => &self.meta_cache,
        }
    }

    fn merge_queue(&self) -> &WorkQueue<MergeTask> {
        &self.merge_queue
    }

    fn repair_queue(&self) -> &WorkQueue<RedownloadJob> {
        &self.repair_queue
    }

    pub(crate) fn stopping(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Whether `data` is genuinely the chunk `(hash, kind)`.
    pub(crate) fn verify(&self, hash: &ContentHash, kind: ChunkKind, data: &[u8]) -> bool {
        match kind {
            ChunkKind::Data => ContentHash::digest(data) == *hash,
            ChunkKind::MetaData => self.validator.validate(data),
        }
    }

    fn get(&self, hash: &ContentHash, kind: ChunkKind) -> StoreResult<Bytes> {
        if let Some(data) = self.cached_get(hash, kind) {
            return Ok(data);
        }
        match self.read_with_repair(hash, |state| state.get(hash, kind))? {
            Some(((slot, data), leaf)) => {
                self.cache(kind).insert(*hash, Location { leaf, slot });
                Ok(data)
            }
            None => Err(StoreError::NotFound { hash: *hash, kind }),
        }
    }

    /// Serve from a cached location after re-reading its slot header and
    /// checking the bytes. Anything off drops the entry.
    fn cached_get(&self, hash: &ContentHash, kind: ChunkKind) -> Option<Bytes> {
        let cache = self.cache(kind);
        let location = cache.get(hash)?;
        let read = location.leaf.lock().get_at(&location.slot, hash, kind);
        match read {
            Ok(Some(data)) if self.verify(hash, kind, &data) => {
                self.metrics.cache_served_total.increment(1);
                Some(data)
            }
            Ok(_) => {
                debug!(%hash, %kind, "Stale cached location");
                cache.invalidate(hash);
                self.metrics.cache_stale_total.increment(1);
                None
            }
            Err(err) => {
                debug!(%hash, %kind, %err, "Cached location unreadable");
                cache.invalidate(hash);
                self.metrics.cache_stale_total.increment(1);
                None
            }
        }
    }

    fn has(&self, hash: &ContentHash, kind: ChunkKind) -> bool {
        if self.cache(kind).contains(hash) {
            return true;
        }
        match self.read_with_repair(hash, |state| state.find(hash, kind)) {
            Ok(Some((slot, leaf))) => {
                self.cache(kind).insert(*hash, Location { leaf, slot });
                true
            }
            Ok(None) => false,
            Err(err) => {
                warn!(%hash, %kind, %err, "Presence check failed");
                false
            }
        }
    }

    /// Run a read against the route of `hash`.
    ///
    /// A corrupted container is repaired once and the read retried. If the
    /// chunk is still missing afterwards the corruption is reported instead
    /// of `None`.
    pub(crate) fn read_with_repair<T>(
        &self,
        hash: &ContentHash,
        op: impl Fn(&LeafState) -> StoreResult<Option<T>>,
    ) -> StoreResult<Option<(T, Arc<Leaf>)>> {
        let mut busy = 0;
        let mut corruption = None;
        loop {
            let route = self.resolve(hash)?;
            match self.probe(&route, &op) {
                Ok(Probe::Found(value, leaf)) => return Ok(Some((value, leaf))),
                Ok(Probe::Missing) => {
                    return match corruption {
                        Some(err) => Err(err),
                        None => Ok(None),
                    };
                }
                Ok(Probe::Busy(path)) => {
                    busy += 1;
                    if busy >= BUSY_RETRY_LIMIT {
                        return Err(StoreError::BlockBusy { path });
                    }
                    thread::sleep(self.config.busy_retry_backoff());
                }
                Err(LeafError { err, leaf }) if err.is_corruption() && corruption.is_none() => {
                    self.handle_corruption(&leaf, &err)?;
                    corruption = Some(err);
                }
                Err(LeafError { err, .. }) => return Err(err),
            }
        }
    }

    fn probe<T>(
        &self,
        route: &Route,
        op: &impl Fn(&LeafState) -> StoreResult<Option<T>>,
    ) -> Result<Probe<T>, LeafError> {
        if let Some(path) = route.retired() {
            return Ok(Probe::Busy(path));
        }
        for leaf in route.oldest_first() {
            let state = leaf.lock();
            if Arc::ptr_eq(leaf, &route.leaf) && state.is_retired() {
                return Ok(Probe::Busy(state.file().to_path_buf()));
            }
            match op(&state) {
                Ok(Some(value)) => return Ok(Probe::Found(value, Arc::clone(leaf))),
                Ok(None) => {}
                Err(err) => return Err(LeafError::new(err, leaf)),
            }
        }
        Ok(Probe::Missing)
    }

    fn delete(&self, hash: &ContentHash, kind: ChunkKind) -> StoreResult<()> {
        self.cache(kind).remove(hash);

        let mut busy = 0;
        let mut repaired = false;
        loop {
            let route = self.resolve(hash)?;
            match self.delete_on_route(&route, hash, kind) {
                Ok(None) => break,
                Ok(Some(path)) => {
                    busy += 1;
                    if busy >= BUSY_RETRY_LIMIT {
                        return Err(StoreError::BlockBusy { path });
                    }
                    thread::sleep(self.config.busy_retry_backoff());
                }
                Err(LeafError { err, leaf }) if err.is_corruption() && !repaired => {
                    repaired = true;
                    self.handle_corruption(&leaf, &err)?;
                }
                Err(LeafError { err, .. }) => return Err(err),
            }
        }

        self.cache(kind).remove(hash);
        self.index.remove(kind, hash)?;
        Ok(())
    }

    /// Flip every live copy on the route, shadows first. Returns the
    /// container path if the leaf turned out to be mid-split.
    fn delete_on_route(
        &self,
        route: &Route,
        hash: &ContentHash,
        kind: ChunkKind,
    ) -> Result<Option<PathBuf>, LeafError> {
        if let Some(path) = route.retired() {
            return Ok(Some(path));
        }
        for leaf in route.oldest_first() {
            let state = leaf.lock();
            if Arc::ptr_eq(leaf, &route.leaf) && state.is_retired() {
                return Ok(Some(state.file().to_path_buf()));
            }
            state
                .delete(hash, kind)
                .map_err(|err| LeafError::new(err, leaf))?;
        }
        Ok(None)
    }

    /// Write a chunk through the trie.
    ///
    /// Retries while the target leaf is mid-split, hands the write to the
    /// restructured tree when the leaf had no free slot, and repairs a
    /// corrupted target once.
    pub(crate) fn store_chunk(
        &self,
        hash: &ContentHash,
        kind: ChunkKind,
        data: &[u8],
        mode: PutMode,
    ) -> StoreResult<()> {
        let mut busy = 0;
        let mut handoffs = 0;
        let mut repaired = false;
        loop {
            let route = self.resolve(hash)?;
            match self.try_put(&route, hash, kind, data, mode) {
                Ok(Attempt::Stored) => return Ok(()),
                Ok(Attempt::Busy(path)) => {
                    busy += 1;
                    if busy >= BUSY_RETRY_LIMIT {
                        return Err(StoreError::BlockBusy { path });
                    }
                    thread::sleep(self.config.busy_retry_backoff());
                }
                Ok(Attempt::Full) => {
                    handoffs += 1;
                    if handoffs > MAX_HANDOFFS {
                        return Err(StoreError::BlockFull { hash: *hash });
                    }
                    debug!(%hash, handoffs, "Container full, retrying on restructured tree");
                }
                Err(LeafError { err, leaf }) if err.is_corruption() && !repaired => {
                    repaired = true;
                    self.handle_corruption(&leaf, &err)?;
                }
                Err(LeafError { err, .. }) => return Err(err),
            }
        }
    }

    fn try_put(
        &self,
        route: &Route,
        hash: &ContentHash,
        kind: ChunkKind,
        data: &[u8],
        mode: PutMode,
    ) -> Result<Attempt, LeafError> {
        let leaf = &route.leaf;
        let volume = {
            let state = leaf.lock();
            if state.is_retired() {
                return Ok(Attempt::Busy(state.file().to_path_buf()));
            }
            Arc::clone(state.volume())
        };

        // Client bytes are held before anything is mutated, so the write
        // below cannot be refused for capacity after the shadow flips.
        let reservation = match mode {
            PutMode::Client => {
                Some(volume.reserve(data.len() as u64).map_err(|err| LeafError::new(err, leaf))?)
            }
            PutMode::Reinsert => None,
        };
        if reservation.is_some() {
            // Older copies in split shadows must be gone before the new one
            // lands, or a drain could resurrect them.
            for shadow in route.shadows.iter().rev() {
                shadow
                    .lock()
                    .delete(hash, kind)
                    .map_err(|err| LeafError::new(err, shadow))?;
            }
        }

        let mut state = leaf.lock();
        if state.is_retired() || !Arc::ptr_eq(state.volume(), &volume) {
            return Ok(Attempt::Busy(state.file().to_path_buf()));
        }
        let outcome = state
            .put(hash, kind, data, mode, &self.limits, leaf.prefix().can_split())
            .map_err(|err| LeafError::new(err, leaf))?;
        match reservation {
            Some(reservation) if outcome.stored => reservation.commit(),
            unused => drop(unused),
        }
        let followup = self.restructure(leaf, &mut state, outcome.cleanup);
        drop(state);

        self.dispatch(followup);
        Ok(if outcome.stored {
            Attempt::Stored
        } else {
            Attempt::Full
        })
    }

    /// Compact or split a leaf whose last write overflowed. Failures are
    /// logged and left for the next write to retry.
    fn restructure(
        &self,
        leaf: &Arc<Leaf>,
        state: &mut LeafState,
        cleanup: Option<Cleanup>,
    ) -> Followup {
        let mut followup = Followup::default();
        match cleanup {
            None => {}
            Some(Cleanup::Compact) => match state.compact() {
                Ok(report) => {
                    self.metrics.compactions_total.increment(1);
                    if !report.lost.is_empty() {
                        self.repairs.record_body_corrupted(report.lost.len() as u64);
                    }
                    followup.redownload = report.lost;
                }
                Err(err) => warn!(prefix = %leaf.prefix(), %err, "Compaction failed"),
            },
            Some(Cleanup::Split) => match state.begin_split() {
                Ok(()) => match self.install_split(leaf) {
                    Ok(directory) => {
                        self.metrics.splits_total.increment(1);
                        followup.merge = Some(MergeTask {
                            shadow: Arc::clone(leaf),
                            directory,
                        });
                    }
                    Err(err) => {
                        error!(prefix = %leaf.prefix(), %err, "Failed to install split directory")
                    }
                },
                Err(err) => warn!(prefix = %leaf.prefix(), %err, "Split failed"),
            },
        }
        followup
    }

    fn dispatch(&self, followup: Followup) {
        if let Some(task) = followup.merge {
            self.merge_queue.submit(task);
        }
        for (hash, kind) in followup.redownload {
            self.queue_redownload(hash, kind);
        }
    }

    fn repair_target(&self, target: RepairTarget) -> StoreResult<()> {
        let leaf = match target {
            RepairTarget::Hash(hash) => self.resolve(&hash)?.leaf,
            RepairTarget::Container(path) => {
                let prefix = self.prefix_for_path(&path)?;
                match self.node_at(&prefix)? {
                    Block::Leaf(leaf) if *leaf.prefix() == prefix => leaf,
                    Block::Directory(directory) if *directory.prefix() == prefix => {
                        match directory.shadow() {
                            Some(shadow) => shadow,
                            None => {
                                debug!(%prefix, "Nothing to repair at directory");
                                return Ok(());
                            }
                        }
                    }
                    _ => {
                        debug!(%prefix, "No container at path");
                        return Ok(());
                    }
                }
            }
        };
        self.repair_leaf(&leaf)?;
        Ok(())
    }

    /// Trie prefix of a container path, absolute or relative to a volume.
    fn prefix_for_path(&self, path: &Path) -> StoreResult<BlockPrefix> {
        let relative = if path.is_absolute() {
            self.volumes
                .read()
                .iter()
                .find_map(|volume| path.strip_prefix(volume.root()).ok().map(Path::to_path_buf))
        } else {
            Some(path.to_path_buf())
        };
        relative
            .as_deref()
            .and_then(BlockPrefix::from_relative)
            .map(|(prefix, _)| prefix)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("not a container path: {}", path.display()),
                )
                .into()
            })
    }
}
