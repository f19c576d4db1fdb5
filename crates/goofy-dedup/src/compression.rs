//! LZ4, Zstd and Snappy compression for stored chunk records
//!
//! Framing is fixed per codec and must never change for an existing store:
//!
//! | Codec    | Stored layout                                                      |
//! |----------|--------------------------------------------------------------------|
//! | `Lz4`    | `[u32 BE original_len][u32 BE compressed_len]` + LZ4 block          |
//! | `Zstd`   | standard zstd frame, decoded up to `original_len + 1` bytes        |
//! | `Snappy` | snappy raw format (varint length preamble + body)                  |
//!
//! Every decoder is handed the original length persisted with the record and
//! rejects payloads that disagree with it.

use crate::error::DedupError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::str::FromStr;
use tracing::debug;

/// Default Zstd level (1=fastest, 19=best ratio).
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Size of the explicit LZ4 header.
pub const LZ4_HEADER_LEN: usize = 8;

/// Codec tag persisted with a compressed chunk record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// LZ4 block with explicit length header; fast, lower ratio
    Lz4,
    /// Zstandard frame; higher ratio, self-describing
    Zstd,
    /// Snappy raw format; byte-oriented and fast
    Snappy,
}

impl Codec {
    /// Every supported codec.
    pub const ALL: [Codec; 3] = [Codec::Lz4, Codec::Zstd, Codec::Snappy];

    /// Canonical tag.
    pub fn tag(&self) -> &'static str {
        match self {
            Codec::Lz4 => "LZ4",
            Codec::Zstd => "ZSTD",
            Codec::Snappy => "SNAPPY",
        }
    }

    /// Compress with the default level.
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>, DedupError> {
        self.compress_with_level(data, DEFAULT_ZSTD_LEVEL)
    }

    /// Compress `data`. `level` only applies to Zstd.
    pub fn compress_with_level(&self, data: &[u8], level: i32) -> Result<Vec<u8>, DedupError> {
        match self {
            Codec::Lz4 => lz4_compress(data),
            Codec::Zstd => zstd::encode_all(data, level).map_err(|e| DedupError::Compression {
                codec: self.tag(),
                reason: e.to_string(),
            }),
            Codec::Snappy => snap::raw::Encoder::new()
                .compress_vec(data)
                .map_err(|e| DedupError::Compression {
                    codec: self.tag(),
                    reason: e.to_string(),
                }),
        }
    }

    /// Decompress `data`, which must expand to exactly `original_len` bytes.
    pub fn decompress(&self, data: &[u8], original_len: usize) -> Result<Vec<u8>, DedupError> {
        let out = match self {
            Codec::Lz4 => lz4_decompress(data, original_len)?,
            Codec::Zstd => zstd_decompress(data, original_len)?,
            Codec::Snappy => snappy_decompress(data, original_len)?,
        };
        if out.len() != original_len {
            return Err(DedupError::InvalidInput(format!(
                "{} payload expanded to {} bytes, expected {}",
                self.tag(),
                out.len(),
                original_len
            )));
        }
        debug!(codec = self.tag(), compressed = data.len(), original = original_len, "chunk decompressed");
        Ok(out)
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Codec {
    type Err = DedupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match parse_compression(s)? {
            Some(codec) => Ok(codec),
            None => Err(DedupError::UnsupportedAlgorithm(
                "'none' is not a codec".to_string(),
            )),
        }
    }
}

/// Parse a compression selector: `none`, `lz4`, `zstd` or `snappy`.
pub fn parse_compression(s: &str) -> Result<Option<Codec>, DedupError> {
    match s.trim().to_ascii_lowercase().as_str() {
        "none" | "" => Ok(None),
        "lz4" => Ok(Some(Codec::Lz4)),
        "zstd" => Ok(Some(Codec::Zstd)),
        "snappy" => Ok(Some(Codec::Snappy)),
        other => Err(DedupError::UnsupportedAlgorithm(format!(
            "compression type '{other}'"
        ))),
    }
}

fn lz4_compress(data: &[u8]) -> Result<Vec<u8>, DedupError> {
    let original_len = u32::try_from(data.len()).map_err(|_| DedupError::Compression {
        codec: Codec::Lz4.tag(),
        reason: format!("chunk of {} bytes exceeds the LZ4 header range", data.len()),
    })?;
    let block = lz4_flex::block::compress(data);
    let mut out = Vec::with_capacity(LZ4_HEADER_LEN + block.len());
    out.extend_from_slice(&original_len.to_be_bytes());
    out.extend_from_slice(&(block.len() as u32).to_be_bytes());
    out.extend_from_slice(&block);
    Ok(out)
}

fn lz4_decompress(data: &[u8], original_len: usize) -> Result<Vec<u8>, DedupError> {
    if data.len() < LZ4_HEADER_LEN {
        return Err(DedupError::InvalidInput(format!(
            "LZ4 payload of {} bytes is shorter than its header",
            data.len()
        )));
    }
    let header_original = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let header_compressed = u32::from_be_bytes([data[4], data[5], data[6], data[7]]) as usize;
    let body = &data[LZ4_HEADER_LEN..];

    if header_original != original_len {
        return Err(DedupError::InvalidInput(format!(
            "LZ4 header records {header_original} original bytes, record says {original_len}"
        )));
    }
    if header_compressed != body.len() {
        return Err(DedupError::InvalidInput(format!(
            "LZ4 header records {header_compressed} compressed bytes, payload has {}",
            body.len()
        )));
    }
    if original_len == 0 && body.is_empty() {
        return Ok(Vec::new());
    }
    lz4_flex::block::decompress(body, original_len)
        .map_err(|e| DedupError::decompression(Codec::Lz4.tag(), e))
}

fn zstd_decompress(data: &[u8], original_len: usize) -> Result<Vec<u8>, DedupError> {
    let decoder =
        zstd::stream::Decoder::new(data).map_err(|e| DedupError::decompression(Codec::Zstd.tag(), e))?;
    let mut out = Vec::with_capacity(original_len);
    // One byte of headroom exposes frames longer than the record claims.
    decoder
        .take(original_len as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| DedupError::decompression(Codec::Zstd.tag(), e))?;
    Ok(out)
}

fn snappy_decompress(data: &[u8], original_len: usize) -> Result<Vec<u8>, DedupError> {
    let declared = snap::raw::decompress_len(data)
        .map_err(|e| DedupError::decompression(Codec::Snappy.tag(), e))?;
    if declared != original_len {
        return Err(DedupError::InvalidInput(format!(
            "snappy preamble records {declared} bytes, record says {original_len}"
        )));
    }
    snap::raw::Decoder::new()
        .decompress_vec(data)
        .map_err(|e| DedupError::decompression(Codec::Snappy.tag(), e))
}
