//! Content-addressable chunk storage over packed block containers.
//!
//! Chunks are addressed by a [`ContentHash`] and a [`ChunkKind`]. Each chunk
//! lives in a *leaf* container: a file holding a fixed table of
//! [`SLOTS_PER_BLOCK`](constants::SLOTS_PER_BLOCK) header slots followed by
//! the payloads. Containers are found by walking a trie over the hash bytes,
//! one directory level per byte.
//!
//! # Lifecycle
//!
//! - A leaf is created lazily on the first write that routes to it.
//! - When a leaf fills up it *splits*: the file is renamed to `.merge`, a
//!   directory takes its place, and a background worker drains the shadow into
//!   the new children. Reads and deletes keep consulting the shadow until then.
//! - When a leaf accumulates too many deleted bytes it is *compacted* in place.
//! - A short read anywhere marks the container corrupted. It is moved aside,
//!   intact entries are salvaged, and lost entries are redownloaded through a
//!   [`PeerFetcher`].
//!
//! # Volumes
//!
//! Containers may be spread over several storage roots, each with its own
//! payload budget. New containers go to the volume with the most room and
//! [`BlockStore::balance_once`] moves existing ones off full volumes.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use strata_blockstore::{BlockStore, BlockStoreConfig};
//! use strata_primitives::{ChunkKind, ContentHash};
//! use strata_storage::MemoryHashIndex;
//!
//! let config = BlockStoreConfig::default().with_volume("/var/lib/strata", 1 << 30);
//! let store = BlockStore::open(config, Arc::new(MemoryHashIndex::new()))?;
//!
//! let data = b"hello";
//! let hash = ContentHash::digest(data);
//! store.put(&hash, ChunkKind::Data, data)?;
//! assert_eq!(&store.get(&hash, ChunkKind::Data)?[..], data);
//! # Ok::<(), strata_blockstore::StoreError>(())
//! ```

mod balance;
mod block;
mod cache;
mod config;
pub mod constants;
mod error;
mod merge;
mod metrics;
mod placement;
mod queue;
mod recovery;
mod relocate;
mod repair;
mod store;
mod traits;
mod volume;
mod worker;

pub use cache::CacheStats;
pub use config::{BalanceConfig, BlockStoreConfig, VolumeConfig};
pub use error::{StoreError, StoreResult};
pub use repair::{RepairStats, RepairTarget};
pub use store::{BlockStore, BlockStoreBuilder, ChunkLocation};
pub use traits::{MetaValidator, NoPeers, NonEmptyMeta, PeerFetcher};
pub use volume::VolumeInfo;

pub use strata_primitives::{ChunkKind, ContentHash};
