//! End-to-end ingestion and reconstruction through the in-memory store.

use bytes::Bytes;
use goofy_dedup::{
    ChunkLink, ChunkLinkStore, ChunkRecord, ChunkStore, Chunker, ChunkerConfig, Codec,
    DedupConfig, DedupError, DedupOrchestrator, DedupStores, FileId, FileManifest,
    HashingAlgorithm, ManifestStore, MemoryStore, MetricsHandle, ReconstructionEngine,
};
use std::collections::HashSet;
use std::sync::Arc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn pseudo_random(len: usize, mut seed: u64) -> Vec<u8> {
    (0..len)
        .map(|_| {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            (seed >> 24) as u8
        })
        .collect()
}

fn setup(config: &DedupConfig) -> (Arc<MemoryStore>, DedupOrchestrator, ReconstructionEngine) {
    let store = Arc::new(MemoryStore::new());
    let stores = DedupStores::from_memory(store.clone());
    let orchestrator = DedupOrchestrator::new(config, stores.clone()).unwrap();
    (store, orchestrator, ReconstructionEngine::new(stores))
}

fn eight_kib_config(compression: Option<Codec>) -> DedupConfig {
    DedupConfig {
        chunker: ChunkerConfig {
            min_size: 4096,
            max_size: 8192,
            ..Default::default()
        },
        compression,
        ..Default::default()
    }
}

/// An 8 KiB block the chunker keeps whole: no content-defined cut after min_size.
fn whole_block(config: &DedupConfig) -> Vec<u8> {
    let chunker = config.chunker().unwrap();
    (1..)
        .map(|seed| pseudo_random(8192, seed))
        .find(|block| chunker.chunk(block).len() == 1)
        .unwrap()
}

#[test]
fn two_identical_blocks_share_one_record() {
    init_tracing();
    let config = eight_kib_config(None);
    let block = whole_block(&config);
    let mut data = block.clone();
    data.extend_from_slice(&block);

    let (store, orchestrator, engine) = setup(&config);
    let stats = orchestrator.ingest_bytes(&data, "twice.bin").unwrap();
    assert_eq!(stats.total_chunks, 2);
    assert_eq!(stats.unique_chunks, 1);
    assert_eq!(stats.duplicated_chunks, 1);
    assert_eq!(stats.saved_storage, 8192);
    assert_eq!(store.record_count(), 1);

    assert_eq!(engine.reconstruct(stats.file_id).unwrap(), data);
}

#[test]
fn ordered_links_rebuild_greeting() {
    let store = Arc::new(MemoryStore::new());
    let file = ManifestStore::save(store.as_ref(), FileManifest::new("hello", "txt", 12)).unwrap();
    let file_id = file.require_id().unwrap();
    let parts: [&[u8]; 3] = [b"Hello ", b"World", b"!"];
    for (position, part) in parts.iter().enumerate() {
        let hash = HashingAlgorithm::Sha256.digest(part);
        store
            .insert_if_absent(ChunkRecord::new(
                hash.clone(),
                Bytes::copy_from_slice(part),
                None,
                part.len() as u64,
            ))
            .unwrap();
        ChunkLinkStore::save(
            store.as_ref(),
            ChunkLink {
                file_id,
                chunk: hash,
                position: position as u32,
            },
        )
        .unwrap();
    }

    let engine = ReconstructionEngine::new(DedupStores::from_memory(store));
    let download = engine.download(file_id).unwrap();
    assert_eq!(download.content, b"Hello World!");
    assert_eq!(download.file_name, "hello.txt");
}

#[test]
fn lz4_record_decompresses_to_original() {
    let store = Arc::new(MemoryStore::new());
    let content = b"Hello World!";
    let file_id = ManifestStore::save(store.as_ref(), FileManifest::new("c", "", 12))
        .unwrap()
        .require_id()
        .unwrap();
    let hash = HashingAlgorithm::Sha256.digest(content);
    store
        .insert_if_absent(ChunkRecord::new(
            hash.clone(),
            Bytes::from(Codec::Lz4.compress(content).unwrap()),
            Some(Codec::Lz4),
            12,
        ))
        .unwrap();
    ChunkLinkStore::save(
        store.as_ref(),
        ChunkLink {
            file_id,
            chunk: hash,
            position: 0,
        },
    )
    .unwrap();

    let engine = ReconstructionEngine::new(DedupStores::from_memory(store));
    assert_eq!(engine.reconstruct(file_id).unwrap(), content);
}

#[test]
fn unknown_file_is_not_found() {
    let (_, _, engine) = setup(&DedupConfig::default());
    assert!(matches!(
        engine.reconstruct(FileId(999_999)),
        Err(DedupError::NotFound(_))
    ));
}

#[test]
fn manifest_without_links_is_empty() {
    let (store, _, engine) = setup(&DedupConfig::default());
    let file_id = ManifestStore::save(store.as_ref(), FileManifest::new("nothing", "", 0))
        .unwrap()
        .require_id()
        .unwrap();
    assert!(matches!(
        engine.reconstruct(file_id),
        Err(DedupError::EmptyManifest(_))
    ));
}

#[test]
fn every_codec_and_algorithm_round_trips() {
    init_tracing();
    let data = {
        let mut d = pseudo_random(150_000, 11);
        let copy = d[10_000..60_000].to_vec();
        d.extend_from_slice(&copy);
        d
    };
    for algorithm in HashingAlgorithm::ALL {
        for compression in [None, Some(Codec::Lz4), Some(Codec::Zstd), Some(Codec::Snappy)] {
            let config = DedupConfig {
                algorithm,
                compression,
                ..Default::default()
            };
            let (_, orchestrator, engine) = setup(&config);
            let stats = orchestrator.ingest_bytes(&data, "mixed.dat").unwrap();
            assert_eq!(stats.algorithm, algorithm);
            assert_eq!(stats.file_size, data.len() as u64);
            assert_eq!(
                engine.reconstruct(stats.file_id).unwrap(),
                data,
                "{algorithm} / {compression:?}"
            );
        }
    }
}

#[test]
fn reingest_adds_no_records() {
    let config = DedupConfig::default();
    let (store, orchestrator, engine) = setup(&config);
    let data = pseudo_random(300_000, 5);
    let first = orchestrator.ingest_bytes(&data, "a").unwrap();
    let before = store.record_count();
    let second = orchestrator.ingest_bytes(&data, "a").unwrap();
    assert_eq!(store.record_count(), before);
    assert_eq!(second.new_records, 0);
    assert_eq!(second.duplicated_chunks, second.unique_chunks);
    assert_eq!(second.unique_chunks, first.unique_chunks);
    assert_eq!(engine.reconstruct(second.file_id).unwrap(), data);
}

#[test]
fn shifted_copy_reuses_most_chunks() {
    let (_, orchestrator, _) = setup(&DedupConfig::default());
    let data = pseudo_random(512 * 1024, 8);
    orchestrator.ingest_bytes(&data, "original").unwrap();
    let mut shifted = b"prefix inserted before the content".to_vec();
    shifted.extend_from_slice(&data);
    let stats = orchestrator.ingest_bytes(&shifted, "shifted").unwrap();
    assert!(
        stats.reused_chunks * 10 >= stats.total_chunks * 8,
        "reused {} of {}",
        stats.reused_chunks,
        stats.total_chunks
    );
}

#[test]
fn concurrent_ingestion_keeps_one_record_per_hash() {
    init_tracing();
    let config = DedupConfig {
        compression: Some(Codec::Zstd),
        ..Default::default()
    };
    let store = Arc::new(MemoryStore::new());
    let metrics = MetricsHandle::new();
    let orchestrator = Arc::new(
        DedupOrchestrator::new(&config, DedupStores::from_memory(store.clone()))
            .unwrap()
            .with_metrics(metrics.clone()),
    );
    let data = Arc::new(pseudo_random(400_000, 21));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let orchestrator = Arc::clone(&orchestrator);
            let data = Arc::clone(&data);
            std::thread::spawn(move || {
                orchestrator
                    .ingest_bytes(&data, &format!("copy-{i}.bin"))
                    .unwrap()
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let distinct: HashSet<_> = Chunker::with_config(config.chunker, config.algorithm)
        .unwrap()
        .chunk(&data)
        .into_iter()
        .map(|c| c.hash)
        .collect();
    assert_eq!(store.record_count(), distinct.len());
    let inserted: usize = results.iter().map(|s| s.new_records).sum();
    assert_eq!(inserted, distinct.len());

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.files_ingested, 8);
    assert_eq!(snapshot.dedup_misses as usize, distinct.len());

    let engine = ReconstructionEngine::new(DedupStores::from_memory(store));
    for stats in &results {
        assert_eq!(engine.reconstruct(stats.file_id).unwrap(), *data);
    }
}

#[test]
fn snapshot_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.bin");
    let config = DedupConfig {
        compression: Some(Codec::Snappy),
        ..Default::default()
    };
    let data = pseudo_random(100_000, 77);
    let file_id = {
        let (store, orchestrator, _) = setup(&config);
        let stats = orchestrator.ingest_bytes(&data, "kept.txt").unwrap();
        store.save_snapshot(&path).unwrap();
        stats.file_id
    };

    let store = Arc::new(MemoryStore::load_snapshot(&path).unwrap());
    let engine = ReconstructionEngine::new(DedupStores::from_memory(store));
    let download = engine.download(file_id).unwrap();
    assert_eq!(download.content, data);
    assert_eq!(download.file_name, "kept.txt");
}
