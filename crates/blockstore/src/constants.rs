//! Container format constants and engine defaults.

use std::time::Duration;

use strata_primitives::HASH_LENGTH;

/// Header slots per container.
pub const SLOTS_PER_BLOCK: usize = 1000;

/// Width of one header slot: `[hash][type: u8][status: u8][offset: u32 BE][size: u32 BE]`.
pub const SLOT_SIZE: usize = HASH_LENGTH + 1 + 1 + 4 + 4;

/// Size of the header table; the payload region starts here.
pub const HEADER_TABLE_SIZE: usize = SLOTS_PER_BLOCK * SLOT_SIZE;

/// A container longer than this is split.
pub const MAX_BLOCK_SIZE: u64 = 100 * 1024 * 1024;

/// Deleted payload bytes above this trigger a compaction.
pub const MAX_WASTED_SPACE: u64 = 5 * 1024 * 1024;

/// Default largest accepted chunk.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Location cache entries per chunk kind.
pub const LOCATION_CACHE_CAPACITY: usize = 250;

/// Bound of the split drain queue.
pub const MERGE_QUEUE_CAPACITY: usize = 10_000;

/// Bound of the redownload queue.
pub const REPAIR_QUEUE_CAPACITY: usize = 10_000;

/// A container is not repaired twice within this window.
pub const REPAIR_COOLDOWN: Duration = Duration::from_secs(24 * 60 * 60);

/// Attempts a write makes against a container that is mid-split.
pub const BUSY_RETRY_LIMIT: usize = 100;

/// Sleep between attempts against a container that is mid-split.
pub const BUSY_RETRY_BACKOFF: Duration = Duration::from_millis(20);

/// Times a write is handed to a restructured tree before it fails.
pub const MAX_HANDOFFS: usize = 3;

/// How long idle workers block before re-checking the stop flag.
pub const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shadow of a split container awaiting asynchronous drain.
pub const MERGE_SUFFIX: &str = "merge";

/// Shadow of a container being compacted.
pub const BACKUP_SUFFIX: &str = "backup";

/// Corrupted container moved aside for salvage.
pub const REPAIR_SUFFIX: &str = "repair";

/// Extra physical copy of a logical container found on another volume.
pub const DUPLICATE_SUFFIX: &str = "dup";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        assert_eq!(SLOT_SIZE, 42);
        assert_eq!(HEADER_TABLE_SIZE, 42_000);
    }
}
