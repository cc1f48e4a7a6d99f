//! Block store error types.

use std::path::PathBuf;

use strata_primitives::{ChunkKind, ContentHash};
use strata_storage::DatabaseError;

/// Errors from block store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No live copy of the chunk exists.
    #[error("chunk not found: {kind} {hash}")]
    NotFound {
        /// Requested hash.
        hash: ContentHash,
        /// Requested kind.
        kind: ChunkKind,
    },

    /// A header slot could not be read in full.
    #[error("corrupted header in {} at slot {slot}", .path.display())]
    CorruptedHeader {
        /// Container file.
        path: PathBuf,
        /// First slot that could not be read.
        slot: usize,
    },

    /// A payload could not be read in full.
    #[error("corrupted body in {} at slot {slot}", .path.display())]
    CorruptedBody {
        /// Container file.
        path: PathBuf,
        /// Slot whose payload is short.
        slot: usize,
    },

    /// The target volume has no room; nothing was written.
    #[error(
        "capacity exceeded on {}: requested {requested} bytes, {remaining} remaining",
        .volume.display()
    )]
    CapacityExceeded {
        /// Volume root.
        volume: PathBuf,
        /// Bytes the write needed.
        requested: u64,
        /// Bytes the volume had left.
        remaining: u64,
    },

    /// The container is mid-split and stayed so for every retry.
    #[error("block busy: {}", .path.display())]
    BlockBusy {
        /// Container file.
        path: PathBuf,
    },

    /// The write was handed to restructured containers too many times.
    #[error("block full: no slot for {hash}")]
    BlockFull {
        /// Hash of the rejected write.
        hash: ContentHash,
    },

    /// The chunk exceeds the configured maximum.
    #[error("chunk too large: {size} bytes, max {max}")]
    ChunkTooLarge {
        /// Chunk length.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// The all-zero hash never names a chunk.
    #[error("the zero hash is reserved")]
    ReservedHash,

    /// The store was opened without volumes.
    #[error("no volumes configured")]
    NoVolumes,

    /// The configured limits contradict each other.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong.
        reason: String,
    },

    /// A corrupted container could be neither repaired nor restored.
    #[error("repair of {} failed, container left for operator: {reason}", .path.display())]
    RepairFatal {
        /// Container file.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// Hash index failure.
    #[error("index error: {0}")]
    Index(#[from] DatabaseError),

    /// Rename, copy, delete or plain read/write failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether this is a short-read classification that triggers repair.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            StoreError::CorruptedHeader { .. } | StoreError::CorruptedBody { .. }
        )
    }

    /// Whether retrying later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::BlockBusy { .. })
    }
}

/// Result type for block store operations.
pub type StoreResult<T> = Result<T, StoreError>;
