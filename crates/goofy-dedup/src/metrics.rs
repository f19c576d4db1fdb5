//! Counters for ingestion and reconstruction.
//!
//! Every counter is an `AtomicU64` so concurrent ingestion passes can share a
//! single [`DedupMetrics`] through a [`MetricsHandle`]. [`DedupMetrics::collect`]
//! renders the values as named metrics with help text.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// The type of metric: counter or gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A gauge that can go up or down.
    Gauge,
}

/// The value of a metric.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    /// A counter value.
    Counter(u64),
    /// A gauge value.
    Gauge(f64),
}

/// A single metric with metadata and value.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupMetric {
    /// The metric name.
    pub name: String,
    /// Help text describing the metric.
    pub help: String,
    /// The kind of metric.
    pub kind: MetricKind,
    /// The metric value.
    pub value: MetricValue,
}

impl DedupMetric {
    fn counter(name: &str, help: &str, value: u64) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            kind: MetricKind::Counter,
            value: MetricValue::Counter(value),
        }
    }

    fn gauge(name: &str, help: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            kind: MetricKind::Gauge,
            value: MetricValue::Gauge(value),
        }
    }
}

/// Thread-safe counters for the dedup pipeline.
#[derive(Debug, Default)]
pub struct DedupMetrics {
    files_ingested: AtomicU64,
    chunks_processed: AtomicU64,
    bytes_in: AtomicU64,
    dedup_hits: AtomicU64,
    dedup_misses: AtomicU64,
    bytes_saved: AtomicU64,
    compress_bytes_in: AtomicU64,
    compress_bytes_out: AtomicU64,
    files_reconstructed: AtomicU64,
    bytes_reconstructed: AtomicU64,
}

impl DedupMetrics {
    /// All counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed file ingestion.
    #[inline]
    pub fn record_file(&self, size: u64) {
        self.files_ingested.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(size, Ordering::Relaxed);
    }

    /// Record a chunk matched against an existing record.
    #[inline]
    pub fn record_hit(&self, len: u64) {
        self.chunks_processed.fetch_add(1, Ordering::Relaxed);
        self.dedup_hits.fetch_add(1, Ordering::Relaxed);
        self.bytes_saved.fetch_add(len, Ordering::Relaxed);
    }

    /// Record a chunk stored as a new record.
    #[inline]
    pub fn record_miss(&self) {
        self.chunks_processed.fetch_add(1, Ordering::Relaxed);
        self.dedup_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one compression call.
    #[inline]
    pub fn record_compress(&self, bytes_in: u64, bytes_out: u64) {
        self.compress_bytes_in.fetch_add(bytes_in, Ordering::Relaxed);
        self.compress_bytes_out.fetch_add(bytes_out, Ordering::Relaxed);
    }

    /// Record a completed reconstruction.
    #[inline]
    pub fn record_reconstruct(&self, bytes: u64) {
        self.files_reconstructed.fetch_add(1, Ordering::Relaxed);
        self.bytes_reconstructed.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Fraction of processed chunks that were hits; 0.0 before any chunk.
    pub fn dedup_ratio(&self) -> f64 {
        let hits = self.dedup_hits.load(Ordering::Relaxed);
        let total = hits + self.dedup_misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// `bytes_in / bytes_out` over compressed records; 1.0 before any compression.
    pub fn compression_ratio(&self) -> f64 {
        let bytes_in = self.compress_bytes_in.load(Ordering::Relaxed);
        let bytes_out = self.compress_bytes_out.load(Ordering::Relaxed);
        if bytes_out == 0 {
            1.0
        } else {
            bytes_in as f64 / bytes_out as f64
        }
    }

    /// Render every counter as a named metric.
    pub fn collect(&self) -> Vec<DedupMetric> {
        let s = MetricsSnapshot::from_metrics(self);
        vec![
            DedupMetric::counter(
                "goofy_dedup_files_ingested_total",
                "Files ingested into the chunk store",
                s.files_ingested,
            ),
            DedupMetric::counter(
                "goofy_dedup_chunks_processed_total",
                "Chunks resolved against the chunk store",
                s.chunks_processed,
            ),
            DedupMetric::counter(
                "goofy_dedup_bytes_in_total",
                "Bytes read from ingested files",
                s.bytes_in,
            ),
            DedupMetric::counter(
                "goofy_dedup_hits_total",
                "Chunks satisfied by an existing record",
                s.dedup_hits,
            ),
            DedupMetric::counter(
                "goofy_dedup_misses_total",
                "Chunks stored as new records",
                s.dedup_misses,
            ),
            DedupMetric::counter(
                "goofy_dedup_bytes_saved_total",
                "Original bytes not stored thanks to deduplication",
                s.bytes_saved,
            ),
            DedupMetric::gauge(
                "goofy_dedup_ratio",
                "Deduplication hit ratio (hits / chunks)",
                s.dedup_ratio,
            ),
            DedupMetric::counter(
                "goofy_dedup_compress_bytes_in_total",
                "Bytes fed to the compressor",
                s.compress_bytes_in,
            ),
            DedupMetric::counter(
                "goofy_dedup_compress_bytes_out_total",
                "Bytes produced by the compressor",
                s.compress_bytes_out,
            ),
            DedupMetric::gauge(
                "goofy_dedup_compression_ratio",
                "Compression ratio (bytes_in / bytes_out)",
                s.compression_ratio,
            ),
            DedupMetric::counter(
                "goofy_dedup_files_reconstructed_total",
                "Files rebuilt from their chunk references",
                s.files_reconstructed,
            ),
            DedupMetric::counter(
                "goofy_dedup_bytes_reconstructed_total",
                "Bytes produced by reconstruction",
                s.bytes_reconstructed,
            ),
        ]
    }
}

/// Shareable reference to one [`DedupMetrics`].
#[derive(Debug, Clone, Default)]
pub struct MetricsHandle {
    inner: Arc<DedupMetrics>,
}

impl MetricsHandle {
    /// Handle over fresh counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// The underlying counters.
    #[inline]
    pub fn metrics(&self) -> &DedupMetrics {
        &self.inner
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot::from_metrics(&self.inner)
    }
}

/// Point-in-time copy of [`DedupMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Files ingested.
    pub files_ingested: u64,
    /// Chunks resolved.
    pub chunks_processed: u64,
    /// Bytes read from ingested files.
    pub bytes_in: u64,
    /// Chunk hits.
    pub dedup_hits: u64,
    /// Chunk misses.
    pub dedup_misses: u64,
    /// Original bytes of hit chunks.
    pub bytes_saved: u64,
    /// Bytes fed to the compressor.
    pub compress_bytes_in: u64,
    /// Bytes after compression.
    pub compress_bytes_out: u64,
    /// Files reconstructed.
    pub files_reconstructed: u64,
    /// Bytes reconstructed.
    pub bytes_reconstructed: u64,
    /// Hit ratio.
    pub dedup_ratio: f64,
    /// Compression ratio.
    pub compression_ratio: f64,
}

impl MetricsSnapshot {
    fn from_metrics(m: &DedupMetrics) -> Self {
        Self {
            files_ingested: m.files_ingested.load(Ordering::Relaxed),
            chunks_processed: m.chunks_processed.load(Ordering::Relaxed),
            bytes_in: m.bytes_in.load(Ordering::Relaxed),
            dedup_hits: m.dedup_hits.load(Ordering::Relaxed),
            dedup_misses: m.dedup_misses.load(Ordering::Relaxed),
            bytes_saved: m.bytes_saved.load(Ordering::Relaxed),
            compress_bytes_in: m.compress_bytes_in.load(Ordering::Relaxed),
            compress_bytes_out: m.compress_bytes_out.load(Ordering::Relaxed),
            files_reconstructed: m.files_reconstructed.load(Ordering::Relaxed),
            bytes_reconstructed: m.bytes_reconstructed.load(Ordering::Relaxed),
            dedup_ratio: m.dedup_ratio(),
            compression_ratio: m.compression_ratio(),
        }
    }
}
