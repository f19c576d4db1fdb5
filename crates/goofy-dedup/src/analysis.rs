//! Store-free reports about how a file chunks and how much it repeats itself.

use crate::chunker::Chunker;
use crate::error::DedupResult;
use crate::fingerprint::HashingAlgorithm;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use tracing::{debug, instrument};

/// Chunk size distribution of one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkingReport {
    /// Name the file was analysed under
    pub file_name: String,
    /// Bytes read
    pub original_size: u64,
    /// Chunks produced
    pub chunk_count: usize,
    /// Mean chunk length; 0 for an empty file
    pub average_chunk_size: f64,
    /// Distinct chunk digests
    pub unique_chunks: usize,
}

/// Repetition of chunks within one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicationReport {
    /// Name the file was analysed under
    pub file_name: String,
    /// Hash algorithm used
    pub algorithm: HashingAlgorithm,
    /// Chunks produced
    pub total_chunks: usize,
    /// Distinct chunk digests
    pub unique_chunks: usize,
    /// Distinct digests occurring more than once
    pub duplicated_chunks: usize,
    /// Occurrence count per repeated digest
    pub duplicate_details: BTreeMap<String, usize>,
}

/// Chunk `reader` and summarise chunk sizes.
#[instrument(skip(reader, chunker))]
pub fn analyze_chunking<R: Read>(
    reader: R,
    file_name: &str,
    chunker: &Chunker,
) -> DedupResult<ChunkingReport> {
    let mut size = 0u64;
    let mut count = 0usize;
    let mut seen = HashSet::new();
    for chunk in chunker.stream(reader) {
        let chunk = chunk?;
        size += chunk.len() as u64;
        count += 1;
        seen.insert(chunk.hash);
    }
    Ok(ChunkingReport {
        file_name: file_name.to_string(),
        original_size: size,
        chunk_count: count,
        average_chunk_size: if count == 0 {
            0.0
        } else {
            size as f64 / count as f64
        },
        unique_chunks: seen.len(),
    })
}

/// Chunk `reader` and count repeated chunk digests.
#[instrument(skip(reader, chunker), fields(algorithm = %chunker.algorithm()))]
pub fn analyze_duplicates<R: Read>(
    reader: R,
    file_name: &str,
    chunker: &Chunker,
) -> DedupResult<DuplicationReport> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut total = 0usize;
    for chunk in chunker.stream(reader) {
        let chunk = chunk?;
        debug!(offset = chunk.offset, len = chunk.len(), hash = chunk.hash.short(), "chunk");
        total += 1;
        *counts.entry(chunk.hash.hex).or_insert(0) += 1;
    }
    let unique = counts.len();
    let duplicate_details: BTreeMap<String, usize> =
        counts.into_iter().filter(|(_, n)| *n > 1).collect();
    Ok(DuplicationReport {
        file_name: file_name.to_string(),
        algorithm: chunker.algorithm(),
        total_chunks: total,
        unique_chunks: unique,
        duplicated_chunks: duplicate_details.len(),
        duplicate_details,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::ChunkerConfig;

    fn chunker(algorithm: HashingAlgorithm) -> Chunker {
        Chunker::with_config(
            ChunkerConfig {
                min_size: 128,
                max_size: 1024,
                mask_bits: 8,
            },
            algorithm,
        )
        .unwrap()
    }

    #[test]
    fn chunking_report_of_zeros() {
        let data = vec![0u8; 128 * 5 + 10];
        let report = analyze_chunking(&data[..], "zeros.bin", &chunker(HashingAlgorithm::Sha256)).unwrap();
        assert_eq!(report.original_size, 650);
        assert_eq!(report.chunk_count, 6);
        assert_eq!(report.unique_chunks, 2);
        assert!((report.average_chunk_size - 650.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn empty_input_reports_zero() {
        let report = analyze_chunking(&[][..], "e", &chunker(HashingAlgorithm::Sha1)).unwrap();
        assert_eq!(report.chunk_count, 0);
        assert_eq!(report.average_chunk_size, 0.0);
        let dup = analyze_duplicates(&[][..], "e", &chunker(HashingAlgorithm::Sha1)).unwrap();
        assert_eq!(dup.total_chunks, 0);
        assert!(dup.duplicate_details.is_empty());
    }

    #[test]
    fn duplicate_details_only_repeats() {
        let data = vec![0u8; 128 * 5 + 10];
        for algo in HashingAlgorithm::ALL {
            let report = analyze_duplicates(&data[..], "zeros.bin", &chunker(algo)).unwrap();
            assert_eq!(report.algorithm, algo);
            assert_eq!(report.total_chunks, 6);
            assert_eq!(report.unique_chunks, 2);
            assert_eq!(report.duplicated_chunks, 1);
            let zero_block = algo.digest(&[0u8; 128]);
            assert_eq!(report.duplicate_details.get(zero_block.as_str()), Some(&5));
        }
    }
}
