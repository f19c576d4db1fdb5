//! Ingestion: chunk a stream, resolve each chunk against the chunk store and
//! record the file manifest with its ordered chunk links.

use crate::chunker::{Chunk, Chunker};
use crate::compression::Codec;
use crate::config::DedupConfig;
use crate::error::{DedupError, DedupResult};
use crate::fingerprint::{ContentHash, HashingAlgorithm};
use crate::metrics::MetricsHandle;
use crate::store::{
    ChunkLink, ChunkLinkStore, ChunkRecord, ChunkStore, FileId, FileManifest, ManifestStore,
    MemoryStore,
};
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Persistence collaborators used by ingestion and reconstruction.
#[derive(Clone)]
pub struct DedupStores {
    /// Content-addressed chunk records
    pub chunks: Arc<dyn ChunkStore>,
    /// File manifests
    pub manifests: Arc<dyn ManifestStore>,
    /// Ordered manifest to chunk links
    pub links: Arc<dyn ChunkLinkStore>,
}

impl DedupStores {
    /// Bundle three independent collaborators.
    pub fn new(
        chunks: Arc<dyn ChunkStore>,
        manifests: Arc<dyn ManifestStore>,
        links: Arc<dyn ChunkLinkStore>,
    ) -> Self {
        Self {
            chunks,
            manifests,
            links,
        }
    }

    /// Use one [`MemoryStore`] for all three roles.
    pub fn from_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            chunks: store.clone(),
            manifests: store.clone(),
            links: store,
        }
    }
}

/// Outcome of ingesting one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DedupStats {
    /// Identifier assigned to the manifest
    pub file_id: FileId,
    /// Logical name without extension
    pub file_name: String,
    /// Extension without the dot
    pub extension: String,
    /// Bytes read from the source
    pub file_size: u64,
    /// Hash algorithm used for chunk identity
    pub algorithm: HashingAlgorithm,
    /// Codec applied to new records
    pub compression: Option<Codec>,
    /// Chunks in the file
    pub total_chunks: usize,
    /// Distinct hashes in the file
    pub unique_chunks: usize,
    /// Distinct hashes that matched stored content, either from an earlier
    /// file or from an earlier position in this one
    pub duplicated_chunks: usize,
    /// Chunk occurrences satisfied by an existing record
    pub reused_chunks: usize,
    /// Records this file added to the store
    pub new_records: usize,
    /// Original bytes of reused occurrences
    pub saved_storage: u64,
    /// `duplicated_chunks / total_chunks`, 0 for an empty file
    pub dedup_ratio: f64,
    /// Stored bytes of the records this file added; only with compression
    pub total_compressed_size: Option<u64>,
}

/// Per-hash bookkeeping while a file is being ingested.
#[derive(Default)]
struct Tally {
    groups: HashMap<ContentHash, bool>,
    total: usize,
    reused: usize,
    inserted: usize,
    saved: u64,
    stored: u64,
}

impl Tally {
    fn record(&mut self, hash: &ContentHash, len: u64, hit: bool, stored: u64) {
        self.total += 1;
        if hit {
            self.reused += 1;
            self.saved += len;
        } else {
            self.inserted += 1;
            self.stored += stored;
        }
        let seen_hit = self.groups.entry(hash.clone()).or_insert(false);
        *seen_hit |= hit;
    }

    fn duplicated(&self) -> usize {
        self.groups.values().filter(|hit| **hit).count()
    }
}

/// Maps chunks to stored records and builds file manifests.
pub struct DedupOrchestrator {
    chunker: Chunker,
    compression: Option<Codec>,
    zstd_level: i32,
    stores: Option<DedupStores>,
    metrics: MetricsHandle,
}

impl DedupOrchestrator {
    /// Orchestrator writing to `stores`.
    pub fn new(config: &DedupConfig, stores: DedupStores) -> DedupResult<Self> {
        let mut orchestrator = Self::analysis_only(config)?;
        orchestrator.stores = Some(stores);
        Ok(orchestrator)
    }

    /// Orchestrator without persistence; [`DedupOrchestrator::ingest`] fails
    /// with [`DedupError::StoreUnavailable`].
    pub fn analysis_only(config: &DedupConfig) -> DedupResult<Self> {
        config.validate()?;
        Ok(Self {
            chunker: config.chunker()?,
            compression: config.compression,
            zstd_level: config.zstd_level,
            stores: None,
            metrics: MetricsHandle::new(),
        })
    }

    /// Report into a shared metrics handle.
    pub fn with_metrics(mut self, metrics: MetricsHandle) -> Self {
        self.metrics = metrics;
        self
    }

    /// Counters updated by this orchestrator.
    pub fn metrics(&self) -> &MetricsHandle {
        &self.metrics
    }

    /// The chunker in use.
    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    /// Persistence collaborators, if any.
    pub fn stores(&self) -> Option<&DedupStores> {
        self.stores.as_ref()
    }

    /// Ingest one file read from `reader`.
    ///
    /// Chunks are resolved in order; new content is compressed (when a codec
    /// is configured) and inserted, known content is referenced. The manifest
    /// and its links are written only after every chunk resolved, so a failed
    /// pass leaves no manifest behind.
    #[instrument(skip(self, reader), fields(algorithm = %self.chunker.algorithm()))]
    pub fn ingest<R: Read>(&self, reader: R, file_name: &str) -> DedupResult<DedupStats> {
        let stores = self.stores.as_ref().ok_or(DedupError::StoreUnavailable)?;
        let mut tally = Tally::default();
        let mut order: Vec<ContentHash> = Vec::new();
        let mut size = 0u64;

        for chunk in self.chunker.stream(reader) {
            let chunk = chunk?;
            let len = chunk.len() as u64;
            size += len;
            let (hit, stored) = self.resolve(stores.chunks.as_ref(), &chunk)?;
            tally.record(&chunk.hash, len, hit, stored);
            order.push(chunk.hash);
        }

        let manifest = stores
            .manifests
            .save(FileManifest::from_file_name(file_name, size))?;
        let file_id = manifest.require_id()?;
        for (position, hash) in order.into_iter().enumerate() {
            let position = u32::try_from(position).map_err(|_| {
                DedupError::InvalidInput(format!("file {file_name} has too many chunks"))
            })?;
            stores.links.save(ChunkLink {
                file_id,
                chunk: hash,
                position,
            })?;
        }
        self.metrics.metrics().record_file(size);

        let duplicated = tally.duplicated();
        let stats = DedupStats {
            file_id,
            file_name: manifest.name,
            extension: manifest.extension,
            file_size: size,
            algorithm: self.chunker.algorithm(),
            compression: self.compression,
            total_chunks: tally.total,
            unique_chunks: tally.groups.len(),
            duplicated_chunks: duplicated,
            reused_chunks: tally.reused,
            new_records: tally.inserted,
            saved_storage: tally.saved,
            dedup_ratio: if tally.total == 0 {
                0.0
            } else {
                duplicated as f64 / tally.total as f64
            },
            total_compressed_size: self.compression.map(|_| tally.stored),
        };
        info!(
            file_id = %file_id,
            total = stats.total_chunks,
            unique = stats.unique_chunks,
            duplicated = stats.duplicated_chunks,
            saved = stats.saved_storage,
            "file ingested"
        );
        Ok(stats)
    }

    /// Ingest an in-memory buffer.
    pub fn ingest_bytes(&self, data: &[u8], file_name: &str) -> DedupResult<DedupStats> {
        self.ingest(data, file_name)
    }

    /// Find or insert the record for `chunk`. Returns whether it was a hit and
    /// the stored size of the record.
    fn resolve(&self, chunks: &dyn ChunkStore, chunk: &Chunk) -> DedupResult<(bool, u64)> {
        let algorithm = chunk.hash.algorithm;
        if let Some(existing) = chunks.find_by_hash(algorithm, chunk.hash.as_str())? {
            debug!(hash = chunk.hash.short(), len = chunk.len(), "duplicate chunk");
            self.metrics.metrics().record_hit(chunk.len() as u64);
            return Ok((true, existing.stored_size()));
        }

        let (data, codec) = match self.compression {
            Some(codec) => {
                let compressed = codec.compress_with_level(&chunk.data, self.zstd_level)?;
                self.metrics
                    .metrics()
                    .record_compress(chunk.len() as u64, compressed.len() as u64);
                (Bytes::from(compressed), Some(codec))
            }
            None => (chunk.data.clone(), None),
        };
        let record = ChunkRecord::new(chunk.hash.clone(), data, codec, chunk.len() as u64);
        let outcome = chunks.insert_if_absent(record)?;
        if outcome.inserted {
            debug!(hash = chunk.hash.short(), len = chunk.len(), "new chunk stored");
            self.metrics.metrics().record_miss();
        } else {
            // Lost the insert race to a concurrent ingestion.
            debug!(hash = chunk.hash.short(), "chunk inserted concurrently");
            self.metrics.metrics().record_hit(chunk.len() as u64);
        }
        Ok((!outcome.inserted, outcome.record.stored_size()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::ChunkerConfig;

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

    fn small_config(compression: Option<Codec>) -> DedupConfig {
        DedupConfig {
            chunker: ChunkerConfig {
                min_size: 256,
                max_size: 4096,
                mask_bits: 10,
            },
            compression,
            ..Default::default()
        }
    }

    fn setup(compression: Option<Codec>) -> (Arc<MemoryStore>, DedupOrchestrator) {
        let store = Arc::new(MemoryStore::new());
        let orchestrator =
            DedupOrchestrator::new(&small_config(compression), DedupStores::from_memory(store.clone()))
                .unwrap();
        (store, orchestrator)
    }

    #[test]
    fn test_first_ingest_all_new() {
        let (store, orch) = setup(None);
        let data = pseudo_random(50_000, 1);
        let stats = orch.ingest_bytes(&data, "data.bin").unwrap();
        assert_eq!(stats.file_size, 50_000);
        assert_eq!(stats.file_name, "data");
        assert_eq!(stats.extension, "bin");
        assert!(stats.total_chunks > 1);
        assert_eq!(stats.unique_chunks, stats.total_chunks);
        assert_eq!(stats.duplicated_chunks, 0);
        assert_eq!(stats.saved_storage, 0);
        assert_eq!(stats.new_records, stats.total_chunks);
        assert_eq!(stats.total_compressed_size, None);
        assert_eq!(store.record_count(), stats.total_chunks);
    }

    #[test]
    fn test_second_ingest_inserts_nothing() {
        let (store, orch) = setup(Some(Codec::Lz4));
        let data = pseudo_random(40_000, 2);
        let first = orch.ingest_bytes(&data, "a.bin").unwrap();
        let records = store.record_count();
        let second = orch.ingest_bytes(&data, "b.bin").unwrap();
        assert_eq!(store.record_count(), records);
        assert_eq!(second.new_records, 0);
        assert_eq!(second.duplicated_chunks, second.unique_chunks);
        assert_eq!(second.saved_storage, 40_000);
        assert_eq!(second.total_compressed_size, Some(0));
        assert!(first.total_compressed_size.unwrap() > 0);
        assert_ne!(first.file_id, second.file_id);
    }

    #[test]
    fn test_repeat_within_file_counts_once() {
        let (_store, orch) = setup(None);
        // Zero runs cut at exactly min_size, giving identical chunks.
        let data = vec![0u8; 256 * 4];
        let stats = orch.ingest_bytes(&data, "zeros").unwrap();
        assert_eq!(stats.total_chunks, 4);
        assert_eq!(stats.unique_chunks, 1);
        assert_eq!(stats.duplicated_chunks, 1);
        assert_eq!(stats.reused_chunks, 3);
        assert_eq!(stats.new_records, 1);
        assert_eq!(stats.saved_storage, 256 * 3);
        assert!((stats.dedup_ratio - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_links_are_ordinal() {
        let (store, orch) = setup(None);
        let data = pseudo_random(20_000, 3);
        let stats = orch.ingest_bytes(&data, "f").unwrap();
        let links = store.find_by_file_ordered(stats.file_id).unwrap();
        let positions: Vec<u32> = links.iter().map(|l| l.position).collect();
        let expected: Vec<u32> = (0..stats.total_chunks as u32).collect();
        assert_eq!(positions, expected);
    }

    #[test]
    fn test_empty_file() {
        let (store, orch) = setup(None);
        let stats = orch.ingest_bytes(&[], "empty.txt").unwrap();
        assert_eq!(stats.total_chunks, 0);
        assert_eq!(stats.dedup_ratio, 0.0);
        assert!(store.find_by_file_ordered(stats.file_id).unwrap().is_empty());
    }

    #[test]
    fn test_analysis_only_rejects_ingest() {
        let orch = DedupOrchestrator::analysis_only(&DedupConfig::default()).unwrap();
        assert!(orch.stores().is_none());
        assert!(matches!(
            orch.ingest_bytes(b"data", "x"),
            Err(DedupError::StoreUnavailable)
        ));
    }

    #[test]
    fn test_metrics_follow_ingest() {
        let (_store, orch) = setup(Some(Codec::Zstd));
        let data = vec![0u8; 256 * 4];
        orch.ingest_bytes(&data, "zeros").unwrap();
        let s = orch.metrics().snapshot();
        assert_eq!(s.files_ingested, 1);
        assert_eq!(s.dedup_hits, 3);
        assert_eq!(s.dedup_misses, 1);
        assert_eq!(s.compress_bytes_in, 256);
    }

    #[test]
    fn test_read_failure_writes_no_manifest() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("disk gone"))
            }
        }
        let (store, orch) = setup(None);
        assert!(matches!(orch.ingest(Broken, "x"), Err(DedupError::Io(_))));
        assert!(store.list().unwrap().is_empty());
    }
}
