//! Content-defined chunking driven by the Rabin rolling splitter

use crate::error::{DedupError, DedupResult};
use crate::fingerprint::{ContentHash, HashingAlgorithm};
use crate::rolling::{RollingHashSplitter, DEFAULT_MASK_BITS};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, ErrorKind, Read};

/// A content-defined chunk produced by the [`Chunker`]
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Chunk content
    pub data: Bytes,
    /// Digest of the chunk content (store identity)
    pub hash: ContentHash,
    /// Byte offset of this chunk in the source stream
    pub offset: u64,
}

impl Chunk {
    fn new(data: Bytes, offset: u64, algorithm: HashingAlgorithm) -> Self {
        let hash = algorithm.digest(&data);
        Self { data, hash, offset }
    }

    /// Original (uncompressed) length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True for a zero-length chunk (never produced by the chunker)
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Chunk size bounds and splitter mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Minimum chunk size in bytes; only the final chunk may be smaller
    pub min_size: usize,
    /// Maximum chunk size in bytes; reaching it forces a cut
    pub max_size: usize,
    /// Low fingerprint bits that must be zero for a content-defined cut
    pub mask_bits: u32,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_size: 4 * 1024,
            max_size: 64 * 1024,
            mask_bits: DEFAULT_MASK_BITS,
        }
    }
}

impl ChunkerConfig {
    /// Reject bounds the chunker cannot honour.
    pub fn validate(&self) -> DedupResult<()> {
        if self.min_size == 0 {
            return Err(DedupError::InvalidInput("min_size must be at least 1".into()));
        }
        if self.min_size > self.max_size {
            return Err(DedupError::InvalidInput(format!(
                "min_size {} exceeds max_size {}",
                self.min_size, self.max_size
            )));
        }
        Ok(())
    }
}

/// Feed `input` to the splitter until the current chunk must end.
/// Returns the number of bytes consumed and whether a cut was reached.
fn scan(
    splitter: &mut RollingHashSplitter,
    config: &ChunkerConfig,
    current_len: usize,
    input: &[u8],
) -> (usize, bool) {
    for (i, &b) in input.iter().enumerate() {
        let len = current_len + i + 1;
        let boundary = splitter.push_byte(b);
        if (len >= config.min_size && boundary) || len >= config.max_size {
            return (i + 1, true);
        }
    }
    (input.len(), false)
}

/// Content-defined chunker.
///
/// Concatenating the data of every emitted chunk, in order, reproduces the
/// input exactly.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
    algorithm: HashingAlgorithm,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new()
    }
}

impl Chunker {
    /// Chunker with default bounds, hashing with SHA-256
    pub fn new() -> Self {
        Self {
            config: ChunkerConfig::default(),
            algorithm: HashingAlgorithm::default(),
        }
    }

    /// Chunker with custom bounds and hash algorithm
    pub fn with_config(config: ChunkerConfig, algorithm: HashingAlgorithm) -> DedupResult<Self> {
        config.validate()?;
        Ok(Self { config, algorithm })
    }

    /// Size bounds in use
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Hash algorithm stamped on every chunk
    pub fn algorithm(&self) -> HashingAlgorithm {
        self.algorithm
    }

    fn splitter(&self) -> RollingHashSplitter {
        RollingHashSplitter::with_mask_bits(self.config.mask_bits)
    }

    /// Chunk an in-memory buffer.
    pub fn chunk(&self, data: &[u8]) -> Vec<Chunk> {
        let mut splitter = self.splitter();
        let mut chunks = Vec::new();
        let mut start = 0usize;
        while start < data.len() {
            let (consumed, cut) = scan(&mut splitter, &self.config, 0, &data[start..]);
            let end = start + consumed;
            chunks.push(Chunk::new(
                Bytes::copy_from_slice(&data[start..end]),
                start as u64,
                self.algorithm,
            ));
            if cut {
                splitter.reset();
            }
            start = end;
        }
        chunks
    }

    /// Chunk a reader lazily. Only the chunk being assembled is held in memory;
    /// dropping the iterator between chunks stops the pass.
    pub fn stream<R: Read>(&self, reader: R) -> ChunkStream<R> {
        ChunkStream {
            reader: BufReader::with_capacity(64 * 1024, reader),
            splitter: self.splitter(),
            config: self.config,
            algorithm: self.algorithm,
            buf: Vec::with_capacity(self.config.min_size),
            offset: 0,
            done: false,
        }
    }
}

/// Iterator of chunks over a reader, see [`Chunker::stream`]
pub struct ChunkStream<R: Read> {
    reader: BufReader<R>,
    splitter: RollingHashSplitter,
    config: ChunkerConfig,
    algorithm: HashingAlgorithm,
    buf: Vec<u8>,
    offset: u64,
    done: bool,
}

impl<R: Read> ChunkStream<R> {
    fn emit(&mut self) -> Chunk {
        let data = Bytes::from(std::mem::replace(
            &mut self.buf,
            Vec::with_capacity(self.config.min_size),
        ));
        let len = data.len() as u64;
        let chunk = Chunk::new(data, self.offset, self.algorithm);
        self.offset += len;
        chunk
    }

    /// Bytes consumed from the reader so far
    pub fn bytes_read(&self) -> u64 {
        self.offset + self.buf.len() as u64
    }
}

impl<R: Read> Iterator for ChunkStream<R> {
    type Item = DedupResult<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let available = match self.reader.fill_buf() {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            };
            if available.is_empty() {
                self.done = true;
                if self.buf.is_empty() {
                    return None;
                }
                return Some(Ok(self.emit()));
            }
            let (consumed, cut) = scan(&mut self.splitter, &self.config, self.buf.len(), available);
            self.buf.extend_from_slice(&available[..consumed]);
            self.reader.consume(consumed);
            if cut {
                self.splitter.reset();
                return Some(Ok(self.emit()));
            }
        }
    }
}
