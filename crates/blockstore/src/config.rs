//! Block store configuration.

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    constants::*,
    error::{StoreError, StoreResult},
};

/// One storage root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Root directory.
    pub path: PathBuf,
    /// Payload bytes the volume may hold.
    pub capacity_bytes: u64,
}

/// Thresholds for moving containers between volumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceConfig {
    /// Only volumes at least this full (percent) give up containers.
    pub source_min_used_percent: f64,
    /// Only volumes with at least this much room receive containers.
    pub destination_min_headroom_bytes: u64,
    /// Move only when source and destination usage differ by more than this (percent).
    pub max_used_delta_percent: f64,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            source_min_used_percent: 50.0,
            destination_min_headroom_bytes: MAX_BLOCK_SIZE,
            max_used_delta_percent: 10.0,
        }
    }
}

/// Block store configuration (TOML-serializable).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockStoreConfig {
    /// Storage roots.
    pub volumes: Vec<VolumeConfig>,
    /// Largest accepted chunk in bytes.
    pub max_chunk_size: usize,
    /// Container length that triggers a split.
    pub max_block_size: u64,
    /// Deleted bytes that trigger a compaction.
    pub max_wasted_space: u64,
    /// Location cache entries per chunk kind.
    pub cache_capacity: usize,
    /// Bound of the split drain queue.
    pub merge_queue_capacity: usize,
    /// Bound of the redownload queue.
    pub repair_queue_capacity: usize,
    /// Seconds before the same container may be repaired again.
    pub repair_cooldown_secs: u64,
    /// Milliseconds between attempts against a container that is mid-split.
    pub busy_retry_backoff_ms: u64,
    /// Balancing thresholds.
    pub balance: BalanceConfig,
    /// Resume interrupted splits and fold leftover shadow files on open.
    pub recover_on_open: bool,
}

impl Default for BlockStoreConfig {
    fn default() -> Self {
        Self {
            volumes: Vec::new(),
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            max_block_size: MAX_BLOCK_SIZE,
            max_wasted_space: MAX_WASTED_SPACE,
            cache_capacity: LOCATION_CACHE_CAPACITY,
            merge_queue_capacity: MERGE_QUEUE_CAPACITY,
            repair_queue_capacity: REPAIR_QUEUE_CAPACITY,
            repair_cooldown_secs: REPAIR_COOLDOWN.as_secs(),
            busy_retry_backoff_ms: BUSY_RETRY_BACKOFF.as_millis() as u64,
            balance: BalanceConfig::default(),
            recover_on_open: true,
        }
    }
}

impl BlockStoreConfig {
    /// Add a volume.
    pub fn with_volume(mut self, path: impl Into<PathBuf>, capacity_bytes: u64) -> Self {
        self.volumes.push(VolumeConfig {
            path: path.into(),
            capacity_bytes,
        });
        self
    }

    /// Set the largest accepted chunk.
    pub fn with_max_chunk_size(mut self, max_chunk_size: usize) -> Self {
        self.max_chunk_size = max_chunk_size;
        self
    }

    /// Set the deleted-bytes compaction threshold.
    pub fn with_max_wasted_space(mut self, max_wasted_space: u64) -> Self {
        self.max_wasted_space = max_wasted_space;
        self
    }

    /// Set the container split length.
    pub fn with_max_block_size(mut self, max_block_size: u64) -> Self {
        self.max_block_size = max_block_size;
        self
    }

    /// Set the balancing thresholds.
    pub fn with_balance(mut self, balance: BalanceConfig) -> Self {
        self.balance = balance;
        self
    }

    /// Reject limits a store cannot honor. A container must fit its header
    /// table plus the largest chunk without splitting.
    pub fn validate(&self) -> StoreResult<()> {
        let smallest_block = (self.max_chunk_size as u64).saturating_add(HEADER_TABLE_SIZE as u64);
        if smallest_block > self.max_block_size {
            return Err(StoreError::InvalidConfig {
                reason: format!(
                    "max_block_size {} is below max_chunk_size {} plus the {HEADER_TABLE_SIZE} byte header table",
                    self.max_block_size, self.max_chunk_size
                ),
            });
        }
        Ok(())
    }

    pub(crate) fn repair_cooldown(&self) -> Duration {
        Duration::from_secs(self.repair_cooldown_secs)
    }

    pub(crate) fn busy_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.busy_retry_backoff_ms)
    }

    pub(crate) fn limits(&self) -> BlockLimits {
        BlockLimits {
            max_block_size: self.max_block_size,
            max_wasted_space: self.max_wasted_space,
        }
    }
}

/// Overflow thresholds a container is checked against after each write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockLimits {
    pub(crate) max_block_size: u64,
    pub(crate) max_wasted_space: u64,
}

impl Default for BlockLimits {
    fn default() -> Self {
        BlockStoreConfig::default().limits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BlockStoreConfig::default();
        assert_eq!(config.max_chunk_size, 1024 * 1024);
        assert_eq!(config.max_block_size, 100 * 1024 * 1024);
        assert_eq!(config.max_wasted_space, 5 * 1024 * 1024);
        assert_eq!(config.cache_capacity, 250);
        assert_eq!(config.repair_cooldown(), Duration::from_secs(86_400));
        assert!(config.recover_on_open);
    }

    #[test]
    fn test_block_must_hold_the_largest_chunk() {
        assert!(BlockStoreConfig::default().validate().is_ok());

        let exact = BlockStoreConfig::default()
            .with_max_chunk_size(1000)
            .with_max_block_size(HEADER_TABLE_SIZE as u64 + 1000);
        assert!(exact.validate().is_ok());

        let err = exact.with_max_block_size(HEADER_TABLE_SIZE as u64 + 999).validate().unwrap_err();
        assert!(matches!(err, StoreError::InvalidConfig { .. }));
        assert!(err.to_string().contains("max_chunk_size 1000"));
    }

    #[test]
    fn test_builder() {
        let config = BlockStoreConfig::default()
            .with_volume("/a", 10)
            .with_volume("/b", 20)
            .with_max_chunk_size(64);
        assert_eq!(config.volumes.len(), 2);
        assert_eq!(config.volumes[1].capacity_bytes, 20);
        assert_eq!(config.max_chunk_size, 64);
    }
}
