mod common;

use std::sync::Arc;

use common::{data_under, open};
use strata_blockstore::{BlockStoreConfig, ChunkKind};
use strata_storage::MemoryHashIndex;

#[test]
fn test_stale_location_after_compaction() {
    let dir = tempfile::tempdir().unwrap();
    let index = Arc::new(MemoryHashIndex::new());
    let config = BlockStoreConfig::default()
        .with_volume(dir.path(), 1 << 30)
        .with_max_wasted_space(1000);
    let store = open(config, &index);

    let (wide_hash, wide) = data_under(0xc4, 1, 600).remove(0);
    let (hash, data) = data_under(0xc4, 3, 40).remove(2);

    store.put(&wide_hash, ChunkKind::Data, &wide).unwrap();
    store.put(&hash, ChunkKind::Data, &data).unwrap();
    assert_eq!(store.locate(&hash, ChunkKind::Data).unwrap().unwrap().slot, 1);

    // Warm the cache, then a cached hit is served.
    assert_eq!(&store.get(&hash, ChunkKind::Data).unwrap()[..], &data[..]);
    assert_eq!(&store.get(&hash, ChunkKind::Data).unwrap()[..], &data[..]);
    assert_eq!(store.cache_stats(ChunkKind::Data).hits, 1);

    // Two rewrites waste 1200 bytes and trigger a compaction that moves
    // `hash` from slot 1 to slot 0.
    store.put(&wide_hash, ChunkKind::Data, &wide).unwrap();
    store.put(&wide_hash, ChunkKind::Data, &wide).unwrap();
    let moved = store.locate(&hash, ChunkKind::Data).unwrap().unwrap();
    assert_eq!(moved.slot, 0);
    assert_eq!(moved.offset, 42_000);
    assert!(!dir.path().join("c4.backup").exists());

    assert_eq!(&store.get(&hash, ChunkKind::Data).unwrap()[..], &data[..]);
    let stats = store.cache_stats(ChunkKind::Data);
    assert_eq!(stats.stale, 1);
    assert_eq!(&store.get(&wide_hash, ChunkKind::Data).unwrap()[..], &wide[..]);
    assert_eq!(store.volumes()[0].used, 640);
}

#[test]
fn test_fifo_bound() {
    let dir = tempfile::tempdir().unwrap();
    let index = Arc::new(MemoryHashIndex::new());
    let mut config = BlockStoreConfig::default().with_volume(dir.path(), 1 << 30);
    config.cache_capacity = 4;
    let store = open(config, &index);

    for (hash, data) in data_under(0x01, 10, 8) {
        store.put(&hash, ChunkKind::Data, &data).unwrap();
        store.get(&hash, ChunkKind::Data).unwrap();
    }
    let stats = store.cache_stats(ChunkKind::Data);
    assert_eq!(stats.capacity, 4);
    assert_eq!(stats.size, 4);
}
