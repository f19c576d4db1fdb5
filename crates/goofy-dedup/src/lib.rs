#![warn(missing_docs)]

//! GoofyFiles dedup core: content-defined chunking (Rabin), fingerprinting
//! (SHA-1/SHA-256/BLAKE3), compression (LZ4/Zstd/Snappy) and exact reconstruction
//!
//! Ingest path: Data → Chunk (Rabin CDC) → Fingerprint → Find-or-insert → Compress → Store
//! Read path:   Manifest → Ordered links → Decompress → Data

pub mod analysis;
pub mod chunker;
pub mod compression;
pub mod config;
pub mod dedupe;
pub mod error;
pub mod fingerprint;
pub mod metrics;
pub mod reconstruct;
pub mod rolling;
pub mod store;

pub use analysis::{analyze_chunking, analyze_duplicates, ChunkingReport, DuplicationReport};
pub use chunker::{Chunk, ChunkStream, Chunker, ChunkerConfig};
pub use compression::{parse_compression, Codec};
pub use config::DedupConfig;
pub use dedupe::{DedupOrchestrator, DedupStats, DedupStores};
pub use error::{DedupError, DedupResult};
pub use fingerprint::{ContentHash, HashingAlgorithm};
pub use metrics::{DedupMetrics, MetricsHandle, MetricsSnapshot};
pub use reconstruct::{Download, ReconstructionEngine};
pub use rolling::{RollingHashSplitter, SplitterState};
pub use store::{
    ChunkLink, ChunkLinkStore, ChunkRecord, ChunkStore, FileId, FileManifest, InsertOutcome,
    ManifestStore, MemoryStore, StoreUsage,
};
