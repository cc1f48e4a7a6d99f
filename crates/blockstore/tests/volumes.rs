mod common;

use std::{fs, path::Path, sync::Arc};

use common::{config, data_under, init_tracing, open};
use strata_blockstore::{BalanceConfig, ChunkKind};
use strata_storage::MemoryHashIndex;

const MIB: u64 = 1024 * 1024;

fn leftovers(root: &Path, marker: &str) -> Vec<String> {
    fs::read_dir(root)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.contains(marker))
        .collect()
}

#[test]
fn test_duplicate_containers_are_folded() {
    init_tracing();
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    let index = Arc::new(MemoryHashIndex::new());
    let mut chunks = data_under(0x10, 2, 64);
    let (hash_b, data_b) = chunks.remove(1);
    let (hash_a, data_a) = chunks.remove(0);

    // The same container name ends up on two volumes that were never
    // attached together.
    let store = open(config(first.path(), MIB), &index);
    store.put(&hash_a, ChunkKind::Data, &data_a).unwrap();
    drop(store);
    let store = open(config(second.path(), MIB), &index);
    store.put(&hash_b, ChunkKind::Data, &data_b).unwrap();
    drop(store);
    assert!(first.path().join("10").is_file());
    assert!(second.path().join("10").is_file());

    let store = open(
        config(first.path(), MIB).with_volume(second.path(), MIB),
        &index,
    );
    assert_eq!(&store.get(&hash_a, ChunkKind::Data).unwrap()[..], &data_a[..]);
    assert_eq!(&store.get(&hash_b, ChunkKind::Data).unwrap()[..], &data_b[..]);
    assert_eq!(store.count(ChunkKind::Data).unwrap(), 2);

    let copies = [first.path(), second.path()]
        .iter()
        .filter(|root| root.join("10").is_file())
        .count();
    assert_eq!(copies, 1);
    assert!(leftovers(first.path(), "dup").is_empty());
    assert!(leftovers(second.path(), "dup").is_empty());

    let used: u64 = store.volumes().iter().map(|volume| volume.used).sum();
    assert_eq!(used, 128);
    drop(store);

    // Both chunks survive another restart.
    let store = open(
        config(first.path(), MIB).with_volume(second.path(), MIB),
        &index,
    );
    assert!(store.has(&hash_a, ChunkKind::Data));
    assert!(store.has(&hash_b, ChunkKind::Data));
}

#[test]
fn test_balance_moves_a_container() {
    init_tracing();
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    let index = Arc::new(MemoryHashIndex::new());
    let policy = BalanceConfig {
        source_min_used_percent: 50.0,
        destination_min_headroom_bytes: 1024,
        max_used_delta_percent: 10.0,
    };
    let store = open(config(first.path(), 4000).with_balance(policy), &index);

    let chunks: Vec<_> = [0x10, 0x20, 0x30]
        .into_iter()
        .map(|first| data_under(first, 1, 1000).remove(0))
        .collect();
    for (hash, data) in &chunks {
        store.put(hash, ChunkKind::Data, data).unwrap();
        store.get(hash, ChunkKind::Data).unwrap();
    }

    // A single volume has nowhere to move anything.
    assert!(!store.balance_once());

    store.add_volume(second.path(), MIB).unwrap();
    store.add_volume(second.path(), MIB).unwrap();
    assert_eq!(store.volumes().len(), 2);

    assert!(store.balance_once());
    let volumes = store.volumes();
    assert_eq!(volumes[0].used, 2000);
    assert_eq!(volumes[1].used, 1000);
    assert_eq!(volumes[1].path, second.path());

    // The first container in walk order moved; cached locations follow it.
    let (moved, data) = &chunks[0];
    assert_eq!(&store.get(moved, ChunkKind::Data).unwrap()[..], &data[..]);
    let location = store.locate(moved, ChunkKind::Data).unwrap().unwrap();
    assert_eq!(location.volume, second.path());
    assert_eq!(location.container, second.path().join("10"));
    assert!(!first.path().join("10").exists());

    for (hash, data) in &chunks[1..] {
        assert_eq!(&store.get(hash, ChunkKind::Data).unwrap()[..], &data[..]);
        let location = store.locate(hash, ChunkKind::Data).unwrap().unwrap();
        assert_eq!(location.volume, first.path());
    }

    // New writes under a moved prefix land beside the moved container.
    let (extra, extra_data) = data_under(0x10, 2, 32).remove(1);
    store.put(&extra, ChunkKind::Data, &extra_data).unwrap();
    let location = store.locate(&extra, ChunkKind::Data).unwrap().unwrap();
    assert_eq!(location.container, second.path().join("10"));
}

#[test]
fn test_volume_usage_is_bootstrapped_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let index = Arc::new(MemoryHashIndex::new());
    let store = open(config(dir.path(), MIB), &index);
    for (hash, data) in data_under(0x42, 3, 100) {
        store.put(&hash, ChunkKind::Data, &data).unwrap();
    }
    assert_eq!(store.volumes()[0].used, 300);
    drop(store);

    let store = open(config(dir.path(), MIB), &index);
    let info = &store.volumes()[0];
    assert_eq!(info.used, 300);
    assert_eq!(info.remaining, MIB - 300);
    assert!(!info.overflowed);
}
