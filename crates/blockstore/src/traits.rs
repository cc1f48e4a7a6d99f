//! Collaborator interfaces consumed by the block store.

use bytes::Bytes;
use strata_primitives::{ChunkKind, ContentHash};

/// Structural check for meta-data chunks.
///
/// Meta-data chunks are not addressed by the hash of their bytes, so a cached
/// location is trusted only if the bytes found there still parse.
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait MetaValidator: Send + Sync {
    /// Whether `data` is a well-formed meta-data record.
    fn validate(&self, data: &[u8]) -> bool;
}

/// Validator that accepts every non-empty blob.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonEmptyMeta;

impl MetaValidator for NonEmptyMeta {
    fn validate(&self, data: &[u8]) -> bool {
        !data.is_empty()
    }
}

/// Out-of-band source for chunks lost to body corruption.
///
/// Only the redownload worker calls this. Returning `None` marks the chunk
/// as lost.
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait PeerFetcher: Send + Sync {
    /// Fetch a chunk from peers.
    fn fetch(&self, hash: &ContentHash, kind: ChunkKind) -> Option<Bytes>;
}

/// Fetcher for a node without peers.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPeers;

impl PeerFetcher for NoPeers {
    fn fetch(&self, _hash: &ContentHash, _kind: ChunkKind) -> Option<Bytes> {
        None
    }
}
