#![allow(dead_code)]

use std::{path::Path, sync::Arc};

use strata_blockstore::{BlockStore, BlockStoreConfig, ContentHash};
use strata_storage::MemoryHashIndex;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("strata_blockstore=debug")
        .with_test_writer()
        .try_init();
}

/// A hash whose first byte is `first`, distinct for every `n`.
pub fn hash_under(first: u8, n: u32) -> ContentHash {
    let mut bytes = ContentHash::digest(&n.to_be_bytes()).as_bytes().to_owned();
    bytes[0] = first;
    ContentHash::new(bytes)
}

/// Data chunks whose content hash starts with `first`.
pub fn data_under(first: u8, count: usize, len: usize) -> Vec<(ContentHash, Vec<u8>)> {
    let mut chunks = Vec::with_capacity(count);
    let mut seed = 0u64;
    while chunks.len() < count {
        let mut data = vec![0u8; len];
        let tag = seed.to_be_bytes();
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = tag[i % tag.len()] ^ (i as u8);
        }
        seed += 1;
        let hash = ContentHash::digest(&data);
        if hash.as_bytes()[0] == first {
            chunks.push((hash, data));
        }
    }
    chunks
}

pub fn config(volume: &Path, capacity: u64) -> BlockStoreConfig {
    BlockStoreConfig::default().with_volume(volume, capacity)
}

pub fn open(config: BlockStoreConfig, index: &Arc<MemoryHashIndex>) -> BlockStore {
    BlockStore::open(config, Arc::clone(index) as _).unwrap()
}
