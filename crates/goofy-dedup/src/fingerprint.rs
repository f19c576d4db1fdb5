//! Content fingerprinting: SHA-1, SHA-256 and BLAKE3 digests used as chunk identity

use crate::error::DedupError;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Hash function selecting chunk identity.
///
/// A chunk store is keyed by `(algorithm, digest)`; one ingestion session must
/// stick to one algorithm or lookups against earlier records will miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashingAlgorithm {
    /// SHA-1, 20-byte digest. Fast, not collision resistant.
    Sha1,
    /// SHA-256, 32-byte digest.
    #[default]
    Sha256,
    /// BLAKE3, 32-byte digest. Highest throughput.
    Blake3,
}

impl HashingAlgorithm {
    /// Every supported algorithm.
    pub const ALL: [HashingAlgorithm; 3] = [
        HashingAlgorithm::Sha1,
        HashingAlgorithm::Sha256,
        HashingAlgorithm::Blake3,
    ];

    /// Canonical selector name.
    pub fn name(&self) -> &'static str {
        match self {
            HashingAlgorithm::Sha1 => "SHA1",
            HashingAlgorithm::Sha256 => "SHA256",
            HashingAlgorithm::Blake3 => "BLAKE3",
        }
    }

    /// Digest length in bytes.
    pub fn digest_len(&self) -> usize {
        match self {
            HashingAlgorithm::Sha1 => 20,
            HashingAlgorithm::Sha256 | HashingAlgorithm::Blake3 => 32,
        }
    }

    /// Hash `data`. Pure: no hasher state outlives the call.
    pub fn digest(&self, data: &[u8]) -> ContentHash {
        let raw = match self {
            HashingAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
            HashingAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            HashingAlgorithm::Blake3 => blake3::hash(data).as_bytes().to_vec(),
        };
        ContentHash {
            algorithm: *self,
            hex: hex::encode(raw),
        }
    }
}

impl fmt::Display for HashingAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashingAlgorithm {
    type Err = DedupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha1" | "sha-1" => Ok(HashingAlgorithm::Sha1),
            "sha256" | "sha-256" => Ok(HashingAlgorithm::Sha256),
            "blake3" => Ok(HashingAlgorithm::Blake3),
            other => Err(DedupError::UnsupportedAlgorithm(format!(
                "hashing algorithm '{other}'"
            ))),
        }
    }
}

/// Identity of a chunk: lowercase hex digest under a given algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash {
    /// Algorithm that produced the digest
    pub algorithm: HashingAlgorithm,
    /// Lowercase hex digest
    pub hex: String,
}

impl ContentHash {
    /// Build a hash from an existing hex digest, validating its shape.
    pub fn from_hex(algorithm: HashingAlgorithm, hex: &str) -> Result<Self, DedupError> {
        let hex = hex.trim().to_ascii_lowercase();
        let raw = hex::decode(&hex)
            .map_err(|e| DedupError::InvalidInput(format!("invalid hex digest: {e}")))?;
        if raw.len() != algorithm.digest_len() {
            return Err(DedupError::InvalidInput(format!(
                "{} digest must be {} bytes, got {}",
                algorithm,
                algorithm.digest_len(),
                raw.len()
            )));
        }
        Ok(Self { algorithm, hex })
    }

    /// The hex digest.
    pub fn as_str(&self) -> &str {
        &self.hex
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        &self.hex[..self.hex.len().min(12)]
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex)
    }
}
