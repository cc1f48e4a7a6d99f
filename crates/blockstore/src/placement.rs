//! Trie routing and physical placement of containers across volumes.

use std::{
    cmp::Reverse,
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use strata_primitives::{ContentHash, HASH_LENGTH};
use tracing::{debug, info, warn};

use crate::{
    block::{Block, BlockPrefix, Directory, Leaf, sibling, unique_sibling},
    constants::{BACKUP_SUFFIX, DUPLICATE_SUFFIX, MERGE_SUFFIX},
    error::{StoreError, StoreResult},
    merge::MergeTask,
    store::{Route, StoreInner},
    volume::{Volume, container_payload},
};

/// What one volume holds at a logical path.
#[derive(Default)]
struct Artifacts {
    directories: Vec<Arc<Volume>>,
    files: Vec<(Arc<Volume>, PathBuf, u64)>,
    merges: Vec<(Arc<Volume>, PathBuf)>,
    backups: Vec<(Arc<Volume>, PathBuf)>,
}

impl Artifacts {
    fn probe(volumes: &[Arc<Volume>], relative: &Path) -> io::Result<Self> {
        let mut found = Self::default();
        for volume in volumes {
            let path = volume.root().join(relative);
            match fs::symlink_metadata(&path) {
                Ok(meta) if meta.is_dir() => found.directories.push(Arc::clone(volume)),
                Ok(meta) if meta.is_file() => {
                    found.files.push((Arc::clone(volume), path.clone(), meta.len()))
                }
                Ok(_) => warn!(path = %path.display(), "Ignoring non-regular container path"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
            let merge = sibling(&path, MERGE_SUFFIX);
            if merge.is_file() {
                found.merges.push((Arc::clone(volume), merge));
            }
            let backup = sibling(&path, BACKUP_SUFFIX);
            if backup.is_file() {
                found.backups.push((Arc::clone(volume), backup));
            }
        }
        Ok(found)
    }
}

impl StoreInner {
    /// Walk the trie to the leaf `hash` belongs to, materializing nodes on
    /// the way, and collect the split shadows passed.
    pub(crate) fn resolve(&self, hash: &ContentHash) -> StoreResult<Route> {
        let mut directory = Arc::clone(&self.root);
        let mut shadows = Vec::new();
        for depth in 0..HASH_LENGTH {
            if let Some(shadow) = directory.shadow() {
                shadows.push(shadow);
            }
            let byte = hash.byte_at(depth).unwrap_or_default();
            let child = match directory.child(byte) {
                Some(child) => child,
                None => self.materialize(&directory, byte)?,
            };
            match child {
                Block::Leaf(leaf) => return Ok(Route { leaf, shadows }),
                Block::Directory(next) => directory = next,
            }
        }
        Err(io::Error::other("block trie deeper than the hash").into())
    }

    /// The deepest node on the way to `prefix`.
    pub(crate) fn node_at(&self, prefix: &BlockPrefix) -> StoreResult<Block> {
        let mut block = Block::Directory(Arc::clone(&self.root));
        for &byte in prefix.bytes() {
            let directory = match &block {
                Block::Directory(directory) => Arc::clone(directory),
                Block::Leaf(_) => break,
            };
            block = match directory.child(byte) {
                Some(child) => child,
                None => self.materialize(&directory, byte)?,
            };
        }
        Ok(block)
    }

    /// Create the node for `parent/byte` from whatever the volumes hold.
    ///
    /// A directory on any volume, or a `.merge` shadow, makes a directory.
    /// Otherwise the largest file wins and any other copy is renamed aside
    /// and folded back in. With nothing on disk a fresh leaf is placed on the
    /// volume with the most room.
    pub(crate) fn materialize(&self, parent: &Arc<Directory>, byte: u8) -> StoreResult<Block> {
        let mut folds = Vec::new();
        let mut merge = None;

        let block = {
            let _structure = self.structure.lock();
            if let Some(existing) = parent.child(byte) {
                return Ok(existing);
            }

            let prefix = parent.prefix().child(byte);
            let relative = prefix.relative_path();
            let volumes = self.volumes.read().clone();
            let Artifacts {
                directories,
                mut files,
                merges,
                backups,
            } = Artifacts::probe(&volumes, &relative)?;
            folds.extend(backups);

            let block = if prefix.can_split() && !(directories.is_empty() && merges.is_empty()) {
                let directory = Arc::new(Directory::new(prefix.clone()));
                for (volume, path, _) in files {
                    warn!(path = %path.display(), "Container file shadowed by a directory");
                    let aside = set_aside(&path)?;
                    folds.push((volume, aside));
                }
                let mut merges = merges.into_iter();
                if let Some((volume, file)) = merges.next() {
                    if directories.is_empty() {
                        fs::create_dir_all(volume.root().join(&relative))?;
                    }
                    let shadow = Arc::new(Leaf::shadow(prefix.clone(), volume, file));
                    directory.set_shadow(Arc::clone(&shadow));
                    merge = Some(MergeTask {
                        shadow,
                        directory: Arc::clone(&directory),
                    });
                }
                for (volume, file) in merges {
                    let aside = set_aside(&file)?;
                    folds.push((volume, aside));
                }
                Block::Directory(directory)
            } else {
                files.sort_by_key(|(_, _, len)| Reverse(*len));
                let mut files = files.into_iter();
                let leaf = match files.next() {
                    Some((volume, path, _)) => Leaf::new(prefix.clone(), volume, path),
                    None => {
                        let volume = volumes
                            .iter()
                            .max_by_key(|volume| volume.remaining())
                            .ok_or(StoreError::NoVolumes)?;
                        Leaf::new(prefix.clone(), Arc::clone(volume), volume.root().join(&relative))
                    }
                };
                for (volume, path, _) in files {
                    warn!(path = %path.display(), "Duplicate container on another volume");
                    let aside = set_aside(&path)?;
                    folds.push((volume, aside));
                }
                folds.extend(merges);
                Block::Leaf(Arc::new(leaf))
            };

            debug!(%prefix, "Materialized block");
            parent.insert_child(byte, block.clone());
            block
        };

        if let Some(task) = merge {
            info!(prefix = %task.directory.prefix(), "Resuming split drain");
            self.merge_queue.submit(task);
        }
        for (volume, path) in folds {
            self.fold(&volume, &path)?;
        }
        Ok(block)
    }

    /// Replace a just-split leaf with its directory in the trie.
    pub(crate) fn install_split(&self, leaf: &Arc<Leaf>) -> StoreResult<Arc<Directory>> {
        let prefix = leaf.prefix();
        let Some((&byte, parent)) = prefix.bytes().split_last() else {
            return Err(io::Error::other("the trie root cannot split").into());
        };
        let parent = self.directory_at(parent)?;

        let directory = Arc::new(Directory::new(prefix.clone()));
        directory.set_shadow(Arc::clone(leaf));

        let _structure = self.structure.lock();
        parent.insert_child(byte, Block::Directory(Arc::clone(&directory)));
        info!(%prefix, "Installed split directory");
        Ok(directory)
    }

    fn directory_at(&self, bytes: &[u8]) -> StoreResult<Arc<Directory>> {
        let mut directory = Arc::clone(&self.root);
        for &byte in bytes {
            directory = match directory.child(byte) {
                Some(Block::Directory(next)) => next,
                _ => {
                    let prefix = BlockPrefix::from_bytes(bytes);
                    return Err(io::Error::other(format!("no directory at {prefix}")).into());
                }
            };
        }
        Ok(directory)
    }

    /// Re-insert a stray container's entries and delete it.
    pub(crate) fn fold(&self, volume: &Arc<Volume>, path: &Path) -> StoreResult<()> {
        let report = self.salvage_file(path, true)?;
        let payload = container_payload(path);
        match fs::remove_file(path) {
            Ok(()) => volume.release(payload),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        info!(
            file = %path.display(),
            salvaged = report.salvaged,
            queued = report.queued,
            "Folded stray container"
        );
        Ok(())
    }
}

fn set_aside(path: &Path) -> io::Result<PathBuf> {
    let aside = unique_sibling(path, DUPLICATE_SUFFIX);
    fs::rename(path, &aside)?;
    Ok(aside)
}
