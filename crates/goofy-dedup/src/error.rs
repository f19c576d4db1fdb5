//! Error types for the goofy-dedup subsystem

use crate::store::FileId;

/// Result type alias for dedup operations.
pub type DedupResult<T> = Result<T, DedupError>;

/// All errors that can occur while chunking, storing or reconstructing data
#[derive(Debug, thiserror::Error)]
pub enum DedupError {
    /// Stream read or write failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed payload or header, length mismatch, or invalid parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// Unknown hashing or compression selector
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    /// Missing file identifier or dangling chunk reference
    #[error("Not found: {0}")]
    NotFound(String),
    /// The file exists but has no chunk references
    #[error("File {0} has no chunk references")]
    EmptyManifest(FileId),
    /// Codec-level compression failure
    #[error("Compression failed ({codec}): {reason}")]
    Compression {
        /// Codec tag
        codec: &'static str,
        /// Description of the failure
        reason: String,
    },
    /// Codec-level decompression failure
    #[error("Decompression failed ({codec}): {source}")]
    Decompression {
        /// Codec tag
        codec: &'static str,
        /// Underlying codec error
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Operation needs persistence collaborators that were not supplied
    #[error("Operation unsupported without a chunk store")]
    StoreUnavailable,
    /// Configuration file could not be parsed
    #[error("Configuration error: {0}")]
    Config(String),
    /// Store snapshot could not be encoded or decoded
    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

impl DedupError {
    /// Wrap a codec error as a decompression failure.
    pub(crate) fn decompression<E>(codec: &'static str, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        DedupError::Decompression {
            codec,
            source: Box::new(err),
        }
    }
}
