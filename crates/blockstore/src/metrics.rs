//! Block store metrics.

use metrics::Counter;

/// Block Store Metrics
#[derive(Clone, Debug)]
pub(crate) struct BlockStoreMetrics {
    /// Number of accepted writes
    pub(crate) puts_total: Counter,
    /// Number of reads
    pub(crate) gets_total: Counter,
    /// Number of deletes
    pub(crate) deletes_total: Counter,
    /// Number of reads served from a revalidated cached location
    pub(crate) cache_served_total: Counter,
    /// Number of cached locations that failed revalidation
    pub(crate) cache_stale_total: Counter,
    /// Number of containers converted into directories
    pub(crate) splits_total: Counter,
    /// Number of containers rewritten without their deleted entries
    pub(crate) compactions_total: Counter,
    /// Number of split shadows fully drained
    pub(crate) merges_drained_total: Counter,
    /// Number of containers moved between volumes
    pub(crate) balance_moves_total: Counter,
}

impl Default for BlockStoreMetrics {
    fn default() -> Self {
        Self {
            puts_total: metrics::counter!("blockstore.puts_total"),
            gets_total: metrics::counter!("blockstore.gets_total"),
            deletes_total: metrics::counter!("blockstore.deletes_total"),
            cache_served_total: metrics::counter!("blockstore.cache.served_total"),
            cache_stale_total: metrics::counter!("blockstore.cache.stale_total"),
            splits_total: metrics::counter!("blockstore.splits_total"),
            compactions_total: metrics::counter!("blockstore.compactions_total"),
            merges_drained_total: metrics::counter!("blockstore.merges_drained_total"),
            balance_moves_total: metrics::counter!("blockstore.balance.moves_total"),
        }
    }
}

/// Repair Metrics
#[derive(Clone, Debug)]
pub(crate) struct RepairMetrics {
    /// Number of corruption events handled
    pub(crate) corrupted_blocks_total: Counter,
    /// Number of corruption events ignored within the cool-down window
    pub(crate) skipped_total: Counter,
    /// Number of containers whose header table was short
    pub(crate) header_corrupted_total: Counter,
    /// Number of entries whose payload was short
    pub(crate) body_corrupted_total: Counter,
    /// Number of entries re-inserted from corrupted containers
    pub(crate) salvaged_total: Counter,
    /// Number of entries handed to the redownload worker
    pub(crate) queued_total: Counter,
    /// Number of entries recovered from peers
    pub(crate) downloaded_total: Counter,
    /// Number of entries neither salvaged nor downloaded
    pub(crate) lost_total: Counter,
}

impl Default for RepairMetrics {
    fn default() -> Self {
        Self {
            corrupted_blocks_total: metrics::counter!("blockstore.repair.corrupted_blocks_total"),
            skipped_total: metrics::counter!("blockstore.repair.skipped_total"),
            header_corrupted_total: metrics::counter!("blockstore.repair.header_corrupted_total"),
            body_corrupted_total: metrics::counter!("blockstore.repair.body_corrupted_total"),
            salvaged_total: metrics::counter!("blockstore.repair.salvaged_total"),
            queued_total: metrics::counter!("blockstore.repair.queued_total"),
            downloaded_total: metrics::counter!("blockstore.repair.downloaded_total"),
            lost_total: metrics::counter!("blockstore.repair.lost_total"),
        }
    }
}
