//! Hash index trait.

use strata_primitives::{ChunkKind, ContentHash};

use crate::DatabaseResult;

/// Durable set of known hashes, one logical list per chunk kind.
///
/// Entries are listed in the order they were first added, so
/// [`enumerate`](HashIndex::enumerate) pages are stable while nothing is
/// removed. Listings may race with concurrent adds and removes; callers must
/// tolerate eventually-consistent pages.
///
/// # Thread Safety
///
/// Implementations must be thread-safe (Send + Sync).
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait HashIndex: Send + Sync {
    /// Add a hash. Returns `true` if it was not present before.
    fn add(&self, kind: ChunkKind, hash: &ContentHash) -> DatabaseResult<bool>;

    /// Remove a hash. Returns `true` if it was present.
    fn remove(&self, kind: ChunkKind, hash: &ContentHash) -> DatabaseResult<bool>;

    /// Whether a hash is present.
    fn contains(&self, kind: ChunkKind, hash: &ContentHash) -> DatabaseResult<bool>;

    /// Up to `limit` hashes starting at position `offset` in insertion order.
    fn enumerate(
        &self,
        kind: ChunkKind,
        offset: u64,
        limit: usize,
    ) -> DatabaseResult<Vec<ContentHash>>;

    /// Number of hashes of `kind`.
    fn count(&self, kind: ChunkKind) -> DatabaseResult<u64>;
}
