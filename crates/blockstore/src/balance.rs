//! Moving containers between volumes.

use std::{fs, io, sync::Arc};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::{
    block::{Block, BlockPrefix, Leaf},
    error::StoreResult,
    relocate::relocate,
    store::StoreInner,
    volume::Volume,
};

impl StoreInner {
    /// Move one leaf container from the fullest eligible volume to the
    /// emptiest one when their usage differs by more than the configured
    /// delta.
    pub(crate) fn balance_once(&self) -> StoreResult<bool> {
        let volumes = self.volumes.read().clone();
        let policy = &self.config.balance;

        let Some(source) = volumes
            .iter()
            .filter(|volume| volume.used_percent() >= policy.source_min_used_percent)
            .min_by_key(|volume| volume.remaining())
        else {
            debug!("No volume above the balancing source threshold");
            return Ok(false);
        };
        let Some(destination) = volumes
            .iter()
            .filter(|volume| !Arc::ptr_eq(volume, source))
            .filter(|volume| volume.remaining() >= policy.destination_min_headroom_bytes)
            .max_by_key(|volume| volume.remaining())
        else {
            debug!("No volume with enough headroom to receive a container");
            return Ok(false);
        };

        let delta = source.used_percent() - destination.used_percent();
        if delta <= policy.max_used_delta_percent {
            debug!(delta, "Volumes within balancing delta");
            return Ok(false);
        }

        let Some(leaf) = self.find_leaf_on(source)? else {
            debug!(source = %source.root().display(), "No movable container on source volume");
            return Ok(false);
        };
        self.move_leaf(&leaf, source, destination)
    }

    /// First leaf container stored on `volume`, in depth-first order.
    fn find_leaf_on(&self, volume: &Arc<Volume>) -> StoreResult<Option<Arc<Leaf>>> {
        for entry in WalkDir::new(volume.root()).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(io::Error::other)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(volume.root()) else {
                continue;
            };
            let Some((prefix, None)) = BlockPrefix::from_relative(relative) else {
                continue;
            };
            let Block::Leaf(leaf) = self.node_at(&prefix)? else {
                continue;
            };
            if *leaf.prefix() != prefix {
                continue;
            }
            let state = leaf.lock();
            let movable = !state.is_retired()
                && Arc::ptr_eq(state.volume(), volume)
                && state.file() == entry.path();
            drop(state);
            if movable {
                return Ok(Some(leaf));
            }
        }
        Ok(None)
    }

    /// Relocate a leaf's container while holding its lock. Counters change
    /// only after the file has moved.
    fn move_leaf(
        &self,
        leaf: &Arc<Leaf>,
        source: &Arc<Volume>,
        destination: &Arc<Volume>,
    ) -> StoreResult<bool> {
        let mut state = leaf.lock();
        if state.is_retired() || !Arc::ptr_eq(state.volume(), source) {
            return Ok(false);
        }
        let bytes = state.payload_len();
        let Ok(reservation) = destination.reserve(bytes) else {
            return Ok(false);
        };

        let target = destination.root().join(leaf.prefix().relative_path());
        if target.exists() {
            warn!(target = %target.display(), "Balancing target already exists");
            return Ok(false);
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let from = state.file().to_path_buf();
        relocate(&from, &target)?;
        state.rehome(Arc::clone(destination), target.clone());
        source.release(bytes);
        reservation.commit();
        drop(state);

        self.metrics.balance_moves_total.increment(1);
        info!(
            prefix = %leaf.prefix(),
            from = %from.display(),
            to = %target.display(),
            bytes,
            "Moved container between volumes"
        );
        Ok(true)
    }
}
