//! Startup recovery and index rebuild.

use std::{io, path::PathBuf};

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::{
    block::{BlockPrefix, scan},
    constants::MERGE_SUFFIX,
    error::StoreResult,
    store::StoreInner,
};

impl StoreInner {
    /// Pick up what an interrupted run left behind.
    ///
    /// `.merge` shadows are reattached to their directory and queued for
    /// drain; `.backup`, duplicate and repair leftovers are folded back in.
    pub(crate) fn recover(&self) -> StoreResult<()> {
        let volumes = self.volumes.read().clone();
        for volume in volumes {
            let mut strays: Vec<(BlockPrefix, String, PathBuf)> = Vec::new();
            for entry in WalkDir::new(volume.root()).min_depth(1).sort_by_file_name() {
                let entry = entry.map_err(io::Error::other)?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(relative) = entry.path().strip_prefix(volume.root()) else {
                    continue;
                };
                if let Some((prefix, Some(suffix))) = BlockPrefix::from_relative(relative) {
                    strays.push((prefix, suffix, entry.path().to_path_buf()));
                }
            }

            for (prefix, suffix, path) in strays {
                if let Err(err) = self.node_at(&prefix) {
                    warn!(%prefix, %err, "Failed to materialize recovered container");
                    continue;
                }
                // Materializing may already have consumed the file.
                if suffix == MERGE_SUFFIX || !path.exists() {
                    continue;
                }
                if let Err(err) = self.fold(&volume, &path) {
                    warn!(file = %path.display(), %err, "Failed to fold leftover container");
                }
            }
        }
        Ok(())
    }

    /// Add every live entry found on disk to the index.
    pub(crate) fn reindex(&self) -> StoreResult<u64> {
        let volumes = self.volumes.read().clone();
        let mut added = 0u64;
        let mut containers = 0u64;
        for volume in volumes {
            for entry in WalkDir::new(volume.root()).min_depth(1).sort_by_file_name() {
                let entry = entry.map_err(io::Error::other)?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(relative) = entry.path().strip_prefix(volume.root()) else {
                    continue;
                };
                if BlockPrefix::from_relative(relative).is_none() {
                    continue;
                }

                let (live, header_corrupted) = scan::live_entries(entry.path())?;
                if header_corrupted {
                    warn!(file = %entry.path().display(), "Header table cut short, indexing readable part");
                }
                containers += 1;
                for (hash, kind) in live {
                    if self.index.add(kind, &hash)? {
                        added += 1;
                    }
                }
            }
        }
        info!(containers, added, "Rebuilt hash index");
        Ok(added)
    }
}
