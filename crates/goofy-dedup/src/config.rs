//! Dedup configuration, loadable from TOML or JSON.

use crate::chunker::{Chunker, ChunkerConfig};
use crate::compression::{Codec, DEFAULT_ZSTD_LEVEL};
use crate::error::{DedupError, DedupResult};
use crate::fingerprint::HashingAlgorithm;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings shared by ingestion, analysis and the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Chunk size bounds and cut mask
    pub chunker: ChunkerConfig,
    /// Hash algorithm for chunk identity
    pub algorithm: HashingAlgorithm,
    /// Codec for new records; `None` stores chunks uncompressed.
    /// Written as `"none"`, `"lz4"`, `"zstd"` or `"snappy"`.
    #[serde(with = "compression_selector")]
    pub compression: Option<Codec>,
    /// Level used when `compression` is Zstd
    pub zstd_level: i32,
    /// Snapshot file backing the store
    pub store_path: PathBuf,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            algorithm: HashingAlgorithm::default(),
            compression: Some(Codec::Lz4),
            zstd_level: DEFAULT_ZSTD_LEVEL,
            store_path: PathBuf::from("goofy-store.bin"),
        }
    }
}

impl DedupConfig {
    /// Load from `path`, choosing the format by extension (`.toml` or `.json`).
    pub fn from_file(path: &Path) -> DedupResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: DedupConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents).map_err(|e| DedupError::Config(e.to_string()))?,
            "json" => {
                serde_json::from_str(&contents).map_err(|e| DedupError::Config(e.to_string()))?
            }
            _ => {
                return Err(DedupError::Config(format!(
                    "Unsupported config file extension: {ext}"
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Check chunk bounds and the Zstd level.
    pub fn validate(&self) -> DedupResult<()> {
        self.chunker.validate()?;
        if !(1..=22).contains(&self.zstd_level) {
            return Err(DedupError::InvalidInput(format!(
                "zstd level {} outside 1..=22",
                self.zstd_level
            )));
        }
        Ok(())
    }

    /// Chunker for these settings.
    pub fn chunker(&self) -> DedupResult<Chunker> {
        Chunker::with_config(self.chunker, self.algorithm)
    }
}

mod compression_selector {
    use crate::compression::{parse_compression, Codec};
    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Codec>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(codec) => codec.serialize(s),
            None => s.serialize_str("none"),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Codec>, D::Error> {
        match Option::<String>::deserialize(d)? {
            Some(selector) => parse_compression(&selector).map_err(de::Error::custom),
            None => Ok(None),
        }
    }
}
