//! Persistence collaborators: content-addressed chunk records, file manifests
//! and the ordered links between them.
//!
//! The traits mirror what a relational backend would offer. [`MemoryStore`]
//! implements all three in memory and can be saved to / loaded from a bincode
//! snapshot file.

use crate::compression::Codec;
use crate::error::{DedupError, DedupResult};
use crate::fingerprint::{ContentHash, HashingAlgorithm};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Identifier assigned to a file manifest by the [`ManifestStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub u64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored, content-addressed chunk. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Identity of the record
    pub hash: ContentHash,
    /// Stored payload, compressed when `codec` is set
    pub data: Bytes,
    /// Codec used for `data`; `None` means stored as-is
    pub codec: Option<Codec>,
    /// Uncompressed length; always persisted so decoding never guesses
    pub original_size: u64,
    /// Insertion time
    pub created_at: DateTime<Utc>,
}

impl ChunkRecord {
    /// Create a record for freshly stored content.
    pub fn new(hash: ContentHash, data: Bytes, codec: Option<Codec>, original_size: u64) -> Self {
        Self {
            hash,
            data,
            codec,
            original_size,
            created_at: Utc::now(),
        }
    }

    /// Bytes occupied by the stored payload
    pub fn stored_size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Metadata of one ingested file. Its chunk references live in the
/// [`ChunkLinkStore`], ordered by position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileManifest {
    /// Assigned by [`ManifestStore::save`]
    pub id: Option<FileId>,
    /// Logical name without extension
    pub name: String,
    /// Extension without the dot; may be empty
    pub extension: String,
    /// Declared total size in bytes
    pub size: u64,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl FileManifest {
    /// New, not yet persisted manifest.
    pub fn new(name: impl Into<String>, extension: impl Into<String>, size: u64) -> Self {
        Self {
            id: None,
            name: name.into(),
            extension: extension.into(),
            size,
            created_at: Utc::now(),
        }
    }

    /// Split an uploaded file name into name and extension. The extension is
    /// whatever follows the last dot, unless that dot starts the name.
    pub fn from_file_name(file_name: &str, size: u64) -> Self {
        match file_name.rfind('.') {
            Some(idx) if idx > 0 => Self::new(&file_name[..idx], &file_name[idx + 1..], size),
            _ => Self::new(file_name, "", size),
        }
    }

    /// Name offered for download: `name.extension`, or `name` alone.
    pub fn download_name(&self) -> String {
        if self.extension.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.name, self.extension)
        }
    }

    /// The assigned id, or `NotFound` for an unsaved manifest.
    pub fn require_id(&self) -> DedupResult<FileId> {
        self.id
            .ok_or_else(|| DedupError::NotFound(format!("manifest '{}' has no id", self.name)))
    }
}

/// One ordered reference from a file to a chunk record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLink {
    /// Owning file
    pub file_id: FileId,
    /// Referenced record
    pub chunk: ContentHash,
    /// Ordinal of the chunk within the file, starting at 0
    pub position: u32,
}

/// Result of an atomic find-or-insert.
#[derive(Debug, Clone)]
pub struct InsertOutcome {
    /// The record now stored under the hash
    pub record: ChunkRecord,
    /// True if this call created it; false if a record already existed
    pub inserted: bool,
}

/// Content-addressed chunk records, at most one per hash.
pub trait ChunkStore: Send + Sync {
    /// Look up a record by algorithm and hex digest.
    fn find_by_hash(&self, algorithm: HashingAlgorithm, hash: &str)
        -> DedupResult<Option<ChunkRecord>>;

    /// Insert `record` unless one with the same hash exists. Atomic per hash:
    /// concurrent callers with equal hashes observe a single winner.
    fn insert_if_absent(&self, record: ChunkRecord) -> DedupResult<InsertOutcome>;
}

/// File manifests.
pub trait ManifestStore: Send + Sync {
    /// Persist a manifest, assigning its id.
    fn save(&self, manifest: FileManifest) -> DedupResult<FileManifest>;

    /// Look up a manifest.
    fn find_by_id(&self, id: FileId) -> DedupResult<Option<FileManifest>>;

    /// All manifests, ordered by id.
    fn list(&self) -> DedupResult<Vec<FileManifest>>;
}

/// Ordered links from manifests to chunk records.
pub trait ChunkLinkStore: Send + Sync {
    /// Persist one link.
    fn save(&self, link: ChunkLink) -> DedupResult<()>;

    /// Links of a file sorted by ascending position.
    fn find_by_file_ordered(&self, file_id: FileId) -> DedupResult<Vec<ChunkLink>>;
}

/// Thread-safe in-memory implementation of every store trait.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<ContentHash, ChunkRecord>,
    manifests: DashMap<FileId, FileManifest>,
    links: DashMap<FileId, Vec<ChunkLink>>,
    next_id: AtomicU64,
}

#[derive(Serialize, Deserialize)]
struct StoreSnapshot {
    next_id: u64,
    records: Vec<ChunkRecord>,
    manifests: Vec<FileManifest>,
    links: Vec<ChunkLink>,
}

/// Aggregate figures over a [`MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreUsage {
    /// Number of chunk records
    pub records: usize,
    /// Number of manifests
    pub files: usize,
    /// Sum of stored payload sizes
    pub stored_bytes: u64,
    /// Sum of original sizes of stored records
    pub unique_bytes: u64,
    /// Sum of declared file sizes
    pub logical_bytes: u64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chunk records.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Size figures across the whole store.
    pub fn usage(&self) -> StoreUsage {
        let mut usage = StoreUsage {
            records: self.records.len(),
            files: self.manifests.len(),
            ..Default::default()
        };
        for r in self.records.iter() {
            usage.stored_bytes += r.stored_size();
            usage.unique_bytes += r.original_size;
        }
        for m in self.manifests.iter() {
            usage.logical_bytes += m.size;
        }
        usage
    }

    /// Write the whole store to `path` (bincode), replacing it atomically.
    pub fn save_snapshot(&self, path: &Path) -> DedupResult<()> {
        let mut links: Vec<ChunkLink> = self
            .links
            .iter()
            .flat_map(|e| e.value().clone())
            .collect();
        links.sort_by_key(|l| (l.file_id, l.position));
        let mut manifests: Vec<FileManifest> =
            self.manifests.iter().map(|e| e.value().clone()).collect();
        manifests.sort_by_key(|m| m.id);
        let snapshot = StoreSnapshot {
            next_id: self.next_id.load(Ordering::SeqCst),
            records: self.records.iter().map(|e| e.value().clone()).collect(),
            manifests,
            links,
        };
        let encoded =
            bincode::serialize(&snapshot).map_err(|e| DedupError::Snapshot(e.to_string()))?;
        let tmp = temp_path(path);
        std::fs::write(&tmp, &encoded)?;
        std::fs::rename(&tmp, path)?;
        info!(
            path = %path.display(),
            records = snapshot.records.len(),
            files = snapshot.manifests.len(),
            bytes = encoded.len(),
            "store snapshot saved"
        );
        Ok(())
    }

    /// Load a store previously written by [`MemoryStore::save_snapshot`].
    pub fn load_snapshot(path: &Path) -> DedupResult<Self> {
        let encoded = std::fs::read(path)?;
        let snapshot: StoreSnapshot =
            bincode::deserialize(&encoded).map_err(|e| DedupError::Snapshot(e.to_string()))?;
        let store = Self {
            next_id: AtomicU64::new(snapshot.next_id),
            ..Default::default()
        };
        for r in snapshot.records {
            store.records.insert(r.hash.clone(), r);
        }
        for m in snapshot.manifests {
            let id = m.require_id()?;
            store.manifests.insert(id, m);
        }
        for l in snapshot.links {
            store.links.entry(l.file_id).or_default().push(l);
        }
        debug!(path = %path.display(), records = store.records.len(), "store snapshot loaded");
        Ok(store)
    }

    /// Load `path` if it exists, otherwise start empty.
    pub fn open(path: &Path) -> DedupResult<Self> {
        if path.exists() {
            Self::load_snapshot(path)
        } else {
            Ok(Self::new())
        }
    }
}

/// Sibling of `path` with `.tmp` appended to the full file name.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

impl ChunkStore for MemoryStore {
    fn find_by_hash(
        &self,
        algorithm: HashingAlgorithm,
        hash: &str,
    ) -> DedupResult<Option<ChunkRecord>> {
        let key = ContentHash {
            algorithm,
            hex: hash.to_ascii_lowercase(),
        };
        Ok(self.records.get(&key).map(|r| r.value().clone()))
    }

    fn insert_if_absent(&self, record: ChunkRecord) -> DedupResult<InsertOutcome> {
        // The entry guard holds the shard lock, so check and insert are one step.
        match self.records.entry(record.hash.clone()) {
            Entry::Occupied(existing) => Ok(InsertOutcome {
                record: existing.get().clone(),
                inserted: false,
            }),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(InsertOutcome {
                    record,
                    inserted: true,
                })
            }
        }
    }
}

impl ManifestStore for MemoryStore {
    fn save(&self, mut manifest: FileManifest) -> DedupResult<FileManifest> {
        let id = match manifest.id {
            Some(id) => id,
            None => FileId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
        };
        manifest.id = Some(id);
        self.manifests.insert(id, manifest.clone());
        Ok(manifest)
    }

    fn find_by_id(&self, id: FileId) -> DedupResult<Option<FileManifest>> {
        Ok(self.manifests.get(&id).map(|m| m.value().clone()))
    }

    fn list(&self) -> DedupResult<Vec<FileManifest>> {
        let mut all: Vec<FileManifest> = self.manifests.iter().map(|m| m.value().clone()).collect();
        all.sort_by_key(|m| m.id);
        Ok(all)
    }
}

impl ChunkLinkStore for MemoryStore {
    fn save(&self, link: ChunkLink) -> DedupResult<()> {
        self.links.entry(link.file_id).or_default().push(link);
        Ok(())
    }

    fn find_by_file_ordered(&self, file_id: FileId) -> DedupResult<Vec<ChunkLink>> {
        let mut links = self
            .links
            .get(&file_id)
            .map(|l| l.value().clone())
            .unwrap_or_default();
        links.sort_by_key(|l| l.position);
        Ok(links)
    }
}
