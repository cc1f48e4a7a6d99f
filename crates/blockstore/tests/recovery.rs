mod common;

use std::{fs, sync::Arc, time::Duration};

use common::{config, data_under, hash_under, init_tracing, open};
use strata_blockstore::ChunkKind;
use strata_storage::MemoryHashIndex;

const MIB: u64 = 1024 * 1024;

fn meta(n: u32) -> Vec<u8> {
    format!("meta-{n}").into_bytes()
}

#[test]
fn test_interrupted_split_is_drained_on_open() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let index = Arc::new(MemoryHashIndex::new());
    let store = open(config(dir.path(), MIB), &index);
    for n in 0..10 {
        store.put(&hash_under(0xab, n), ChunkKind::MetaData, &meta(n)).unwrap();
    }
    drop(store);

    // Crash right after the container was renamed and its directory created.
    fs::rename(dir.path().join("ab"), dir.path().join("ab.merge")).unwrap();
    fs::create_dir(dir.path().join("ab")).unwrap();

    let store = open(config(dir.path(), MIB), &index);
    assert!(store.wait_for_merges(Duration::from_secs(30)));
    assert!(!dir.path().join("ab.merge").exists());
    assert!(dir.path().join("ab").is_dir());

    for n in 0..10 {
        let hash = hash_under(0xab, n);
        assert_eq!(&store.get(&hash, ChunkKind::MetaData).unwrap()[..], &meta(n)[..]);
        let location = store.locate(&hash, ChunkKind::MetaData).unwrap().unwrap();
        assert!(location.container.starts_with(dir.path().join("ab")));
        assert_ne!(location.container, dir.path().join("ab"));
    }
    assert_eq!(store.volumes()[0].used, (0..10).map(|n| meta(n).len() as u64).sum::<u64>());
}

#[test]
fn test_orphaned_backup_is_folded_on_open() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let index = Arc::new(MemoryHashIndex::new());
    let chunks = data_under(0xcd, 3, 50);
    let store = open(config(dir.path(), MIB), &index);
    for (hash, data) in &chunks {
        store.put(hash, ChunkKind::Data, data).unwrap();
    }
    drop(store);

    // Crash mid-compaction: the backup exists, the fresh container does not.
    fs::rename(dir.path().join("cd"), dir.path().join("cd.backup")).unwrap();

    let store = open(config(dir.path(), MIB), &index);
    assert!(!dir.path().join("cd.backup").exists());
    assert!(dir.path().join("cd").is_file());
    for (hash, data) in &chunks {
        assert_eq!(&store.get(hash, ChunkKind::Data).unwrap()[..], &data[..]);
    }
    assert_eq!(store.volumes()[0].used, 150);
    assert_eq!(store.count(ChunkKind::Data).unwrap(), 3);
}

#[test]
fn test_reindex_rebuilds_a_lost_index() {
    let dir = tempfile::tempdir().unwrap();
    let index = Arc::new(MemoryHashIndex::new());
    let store = open(config(dir.path(), MIB), &index);
    let chunks = data_under(0x21, 5, 80);
    for (hash, data) in &chunks {
        store.put(hash, ChunkKind::Data, data).unwrap();
    }
    for n in 0..3 {
        store.put(&hash_under(0x22, n), ChunkKind::MetaData, &meta(n)).unwrap();
    }
    store.delete(&chunks[0].0, ChunkKind::Data).unwrap();
    drop(store);

    let fresh = Arc::new(MemoryHashIndex::new());
    let store = open(config(dir.path(), MIB), &fresh);
    assert_eq!(store.count(ChunkKind::Data).unwrap(), 0);

    assert_eq!(store.reindex().unwrap(), 7);
    assert_eq!(store.count(ChunkKind::Data).unwrap(), 4);
    assert_eq!(store.count(ChunkKind::MetaData).unwrap(), 3);

    // Nothing new the second time around.
    assert_eq!(store.reindex().unwrap(), 0);
}

#[test]
fn test_recovery_can_be_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let index = Arc::new(MemoryHashIndex::new());
    let store = open(config(dir.path(), MIB), &index);
    store.put(&hash_under(0x0f, 1), ChunkKind::MetaData, &meta(1)).unwrap();
    drop(store);
    fs::rename(dir.path().join("0f"), dir.path().join("0f.backup")).unwrap();

    let mut lazy = config(dir.path(), MIB);
    lazy.recover_on_open = false;
    let store = open(lazy, &index);
    assert!(dir.path().join("0f.backup").exists());

    // First touch of the prefix still folds the backup in.
    assert_eq!(
        &store.get(&hash_under(0x0f, 1), ChunkKind::MetaData).unwrap()[..],
        &meta(1)[..]
    );
    assert!(!dir.path().join("0f.backup").exists());
}
