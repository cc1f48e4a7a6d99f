mod common;

use std::{
    collections::HashMap,
    fs::OpenOptions,
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use common::{config, hash_under, init_tracing};
use strata_blockstore::{
    BlockStore, ChunkKind, ContentHash, PeerFetcher, RepairStats, RepairTarget,
};
use strata_storage::MemoryHashIndex;

/// Peers that hold a fixed set of chunks.
struct FixedPeers(HashMap<ContentHash, Bytes>);

impl PeerFetcher for FixedPeers {
    fn fetch(&self, hash: &ContentHash, _kind: ChunkKind) -> Option<Bytes> {
        self.0.get(hash).cloned()
    }
}

fn payload(n: u32) -> Vec<u8> {
    let mut data = format!("payload-{n:03}-").into_bytes();
    data.resize(100, b'.');
    data
}

#[test]
fn test_truncated_body_is_salvaged() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let index = Arc::new(MemoryHashIndex::new());
    let hashes: Vec<_> = (0..10).map(|n| hash_under(0x5c, n)).collect();

    let peers: HashMap<_, _> = [6, 7]
        .into_iter()
        .map(|n| (hashes[n as usize], Bytes::from(payload(n))))
        .collect();
    let store = BlockStore::builder(config(dir.path(), 1 << 30), Arc::clone(&index) as _)
        .fetcher(FixedPeers(peers))
        .open()
        .unwrap();

    for (n, hash) in hashes.iter().enumerate() {
        store.put(hash, ChunkKind::MetaData, &payload(n as u32)).unwrap();
    }

    // Cut the file 30 bytes into chunk 6: chunks 0..=5 end before the cut.
    let cut = 42_000 + 6 * 100 + 30;
    let container = dir.path().join("5c");
    OpenOptions::new()
        .write(true)
        .open(&container)
        .unwrap()
        .set_len(cut)
        .unwrap();
    for (n, hash) in hashes.iter().enumerate() {
        let location = store.locate(hash, ChunkKind::MetaData).unwrap().unwrap();
        let end = u64::from(location.offset) + u64::from(location.size);
        assert_eq!(end <= cut, n < 6);
    }

    let err = store.get(&hashes[8], ChunkKind::MetaData).unwrap_err();
    assert!(err.is_corruption());

    // Within the cool-down this only waits for the redownloads.
    assert!(store
        .repair(RepairTarget::Hash(hashes[8]), Duration::from_secs(10))
        .unwrap());

    assert_eq!(
        store.repair_stats(),
        RepairStats {
            corrupted_blocks: 1,
            skipped: 1,
            header_corrupted: 0,
            body_corrupted: 4,
            salvaged: 6,
            queued_for_download: 4,
            downloaded: 2,
            lost: 2,
        }
    );

    for (n, hash) in hashes.iter().enumerate().take(8) {
        assert_eq!(
            &store.get(hash, ChunkKind::MetaData).unwrap()[..],
            &payload(n as u32)[..]
        );
    }
    for hash in &hashes[8..] {
        assert!(!store.has(hash, ChunkKind::MetaData));
    }
    assert_eq!(store.count(ChunkKind::MetaData).unwrap(), 8);
    assert!(!dir
        .path()
        .read_dir()
        .unwrap()
        .any(|entry| entry.unwrap().file_name().to_string_lossy().contains(".repair-")));
}

#[test]
fn test_truncated_header_is_salvaged() {
    let dir = tempfile::tempdir().unwrap();
    let index = Arc::new(MemoryHashIndex::new());
    let store = common::open(config(dir.path(), 1 << 30), &index);

    let hashes: Vec<_> = (0..5).map(|n| hash_under(0x71, n)).collect();
    for (n, hash) in hashes.iter().enumerate() {
        store.put(hash, ChunkKind::MetaData, &payload(n as u32)).unwrap();
    }

    // Three whole slots and part of a fourth survive; no payload does.
    OpenOptions::new()
        .write(true)
        .open(dir.path().join("71"))
        .unwrap()
        .set_len(42 * 3 + 10)
        .unwrap();

    assert!(store.get(&hashes[0], ChunkKind::MetaData).unwrap_err().is_corruption());
    assert!(store
        .repair(RepairTarget::Container("71".into()), Duration::from_secs(10))
        .unwrap());

    let stats = store.repair_stats();
    assert_eq!(stats.corrupted_blocks, 1);
    assert_eq!(stats.header_corrupted, 1);
    assert_eq!(stats.body_corrupted, 3);
    assert_eq!(stats.queued_for_download, 3);
    assert_eq!(stats.lost, 3);
    assert_eq!(stats.salvaged, 0);

    for hash in &hashes {
        assert!(!store.has(hash, ChunkKind::MetaData));
    }

    // The path is usable again.
    store.put(&hashes[0], ChunkKind::MetaData, b"fresh").unwrap();
    assert_eq!(&store.get(&hashes[0], ChunkKind::MetaData).unwrap()[..], b"fresh");
}
