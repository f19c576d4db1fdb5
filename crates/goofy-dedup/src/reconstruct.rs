//! Rebuild a file's bytes from its manifest and ordered chunk links.

use crate::dedupe::DedupStores;
use crate::error::{DedupError, DedupResult};
use crate::metrics::MetricsHandle;
use crate::store::{ChunkLink, ChunkRecord, FileId, FileManifest};
use bytes::Bytes;
use std::io::Write;
use tracing::{debug, info, instrument};

/// A reconstructed file with the name it should be saved under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    /// `name.extension`, or `name` when the extension is empty
    pub file_name: String,
    /// Original bytes
    pub content: Vec<u8>,
}

/// Read-only inverse of ingestion.
pub struct ReconstructionEngine {
    stores: DedupStores,
    metrics: MetricsHandle,
}

impl ReconstructionEngine {
    /// Engine reading from `stores`.
    pub fn new(stores: DedupStores) -> Self {
        Self {
            stores,
            metrics: MetricsHandle::new(),
        }
    }

    /// Report into a shared metrics handle.
    pub fn with_metrics(mut self, metrics: MetricsHandle) -> Self {
        self.metrics = metrics;
        self
    }

    /// Original bytes of `file_id`.
    ///
    /// Fails with `NotFound` for an unknown id or a dangling chunk reference,
    /// `EmptyManifest` when the file has no links, and `InvalidInput` when the
    /// rebuilt length disagrees with the manifest. Nothing partial is returned.
    pub fn reconstruct(&self, file_id: FileId) -> DedupResult<Vec<u8>> {
        Ok(self.rebuild(file_id)?.1)
    }

    /// Reconstruct and pair the bytes with the download file name.
    pub fn download(&self, file_id: FileId) -> DedupResult<Download> {
        let (file_name, content) = self.rebuild(file_id)?;
        Ok(Download { file_name, content })
    }

    /// Write the original bytes of `file_id` to `writer`. Every chunk is
    /// decoded and checked before the first byte is written.
    pub fn reconstruct_to<W: Write>(&self, file_id: FileId, mut writer: W) -> DedupResult<u64> {
        let (manifest, links) = self.resolve(file_id)?;
        let mut parts = Vec::with_capacity(links.len());
        self.decode_links(file_id, &manifest, &links, |part| parts.push(part))?;
        let mut written = 0u64;
        for part in &parts {
            writer.write_all(part)?;
            written += part.len() as u64;
        }
        writer.flush()?;
        Ok(written)
    }

    /// Decode straight into one buffer sized from the manifest.
    fn rebuild(&self, file_id: FileId) -> DedupResult<(String, Vec<u8>)> {
        let (manifest, links) = self.resolve(file_id)?;
        let mut out = Vec::with_capacity(usize::try_from(manifest.size).unwrap_or(0));
        self.decode_links(file_id, &manifest, &links, |part| out.extend_from_slice(&part))?;
        Ok((manifest.download_name(), out))
    }

    fn resolve(&self, file_id: FileId) -> DedupResult<(FileManifest, Vec<ChunkLink>)> {
        let manifest = self
            .stores
            .manifests
            .find_by_id(file_id)?
            .ok_or_else(|| DedupError::NotFound(format!("file {file_id}")))?;

        let links = self.stores.links.find_by_file_ordered(file_id)?;
        if links.is_empty() {
            return Err(DedupError::EmptyManifest(file_id));
        }
        Ok((manifest, links))
    }

    /// Hands each decoded chunk to `emit` in link order, then checks the
    /// total against the manifest size.
    #[instrument(skip(self, manifest, links, emit))]
    fn decode_links<F: FnMut(Bytes)>(
        &self,
        file_id: FileId,
        manifest: &FileManifest,
        links: &[ChunkLink],
        mut emit: F,
    ) -> DedupResult<()> {
        let mut total = 0u64;
        for link in links {
            let record = self
                .stores
                .chunks
                .find_by_hash(link.chunk.algorithm, link.chunk.as_str())?
                .ok_or_else(|| {
                    DedupError::NotFound(format!(
                        "chunk {} at position {} of file {file_id}",
                        link.chunk, link.position
                    ))
                })?;
            let data = decode_record(&record)?;
            debug!(position = link.position, len = data.len(), "chunk decoded");
            total += data.len() as u64;
            emit(data);
        }

        if total != manifest.size {
            return Err(DedupError::InvalidInput(format!(
                "file {file_id} rebuilt to {total} bytes, manifest declares {}",
                manifest.size
            )));
        }
        self.metrics.metrics().record_reconstruct(total);
        info!(name = %manifest.name, size = total, "file reconstructed");
        Ok(())
    }
}

fn decode_record(record: &ChunkRecord) -> DedupResult<Bytes> {
    let original_len = usize::try_from(record.original_size).map_err(|_| {
        DedupError::InvalidInput(format!("chunk {} is too large", record.hash))
    })?;
    match record.codec {
        Some(codec) => Ok(Bytes::from(codec.decompress(&record.data, original_len)?)),
        None if record.data.len() == original_len => Ok(record.data.clone()),
        None => Err(DedupError::InvalidInput(format!(
            "chunk {} holds {} bytes, record says {}",
            record.hash,
            record.data.len(),
            original_len
        ))),
    }
}
