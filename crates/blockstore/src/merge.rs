//! Draining split shadows.
//!
//! When a leaf splits, its container is renamed to `.merge` and hangs off the
//! new directory as a shadow. The merge worker moves every live entry into the
//! children and then deletes the shadow.

use std::sync::Arc;

use strata_primitives::{ChunkKind, ContentHash};
use tracing::{info, warn};

use crate::{
    block::{Directory, Leaf, PutMode},
    constants::SLOTS_PER_BLOCK,
    error::{StoreError, StoreResult},
    store::StoreInner,
};

/// A split shadow awaiting drain.
pub(crate) struct MergeTask {
    pub(crate) shadow: Arc<Leaf>,
    pub(crate) directory: Arc<Directory>,
}

enum DrainStep {
    Moved,
    Skipped,
    End,
    Lost(ContentHash, ChunkKind),
}

impl StoreInner {
    /// Move every live entry of a shadow into the trie below it.
    ///
    /// Stops early when the store is shutting down; the `.merge` file stays
    /// on disk and is picked up again on the next open.
    pub(crate) fn drain(&self, task: MergeTask) {
        let MergeTask { shadow, directory } = task;
        let mut moved = 0usize;
        let mut failed = 0usize;

        for slot in 0..SLOTS_PER_BLOCK {
            if self.stopping() {
                info!(prefix = %shadow.prefix(), slot, "Merge interrupted");
                return;
            }
            match self.drain_slot(&shadow, slot) {
                Ok(DrainStep::Moved) => moved += 1,
                Ok(DrainStep::Skipped) => {}
                Ok(DrainStep::End) => break,
                Ok(DrainStep::Lost(hash, kind)) => {
                    self.repairs.record_body_corrupted(1);
                    self.queue_redownload(hash, kind);
                }
                Err(err) if err.is_corruption() => {
                    if let Err(err) = self.handle_corruption(&shadow, &err) {
                        warn!(prefix = %shadow.prefix(), %err, "Repair of split shadow failed");
                    }
                    break;
                }
                Err(err) => {
                    failed += 1;
                    warn!(prefix = %shadow.prefix(), slot, %err, "Failed to move entry out of split shadow");
                }
            }
        }

        if failed > 0 {
            warn!(prefix = %shadow.prefix(), failed, "Split shadow kept until next open");
            return;
        }
        if let Err(err) = shadow.lock().remove_container() {
            warn!(prefix = %shadow.prefix(), %err, "Failed to remove drained split shadow");
            return;
        }
        directory.clear_shadow(&shadow);
        self.metrics.merges_drained_total.increment(1);
        info!(prefix = %directory.prefix(), moved, "Drained split shadow");
    }

    /// Move one entry. The shadow stays locked while the entry is copied and
    /// flipped, so a concurrent overwrite cannot be clobbered by it.
    fn drain_slot(&self, shadow: &Arc<Leaf>, slot: usize) -> StoreResult<DrainStep> {
        let state = shadow.lock();
        let Some(entry) = state.read_slot(slot)? else {
            return Ok(DrainStep::End);
        };
        if entry.is_free() {
            return Ok(DrainStep::End);
        }
        let Some(kind) = entry.chunk_kind().filter(|_| entry.is_live()) else {
            return Ok(DrainStep::Skipped);
        };

        let data = match state.read_entry(slot, &entry) {
            Ok(data) => data,
            Err(StoreError::CorruptedBody { .. }) => {
                state.mark_deleted(slot)?;
                return Ok(DrainStep::Lost(entry.hash, kind));
            }
            Err(err) => return Err(err),
        };
        self.store_chunk(&entry.hash, kind, &data, PutMode::Reinsert)?;
        state.mark_deleted(slot)?;
        Ok(DrainStep::Moved)
    }
}
