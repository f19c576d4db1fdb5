use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use goofy_dedup::{
    analyze_chunking, analyze_duplicates, parse_compression, DedupConfig, DedupOrchestrator,
    DedupStats, DedupStores, FileId, HashingAlgorithm, ManifestStore, MemoryStore,
    ReconstructionEngine, StoreUsage,
};
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "goofy")]
#[command(about = "GoofyFiles deduplicating file store", long_about = None)]
pub struct Cli {
    /// TOML or JSON configuration file
    #[arg(short, long, global = true, env = "GOOFY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Store snapshot file (overrides the configuration)
    #[arg(short, long, global = true)]
    pub store: Option<PathBuf>,

    /// Hash algorithm: sha1, sha256 or blake3
    #[arg(short, long, global = true)]
    pub algorithm: Option<HashingAlgorithm>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Report how a file splits into chunks
    Chunk { file: PathBuf },
    /// Report repeated chunks inside a file
    Analyze { file: PathBuf },
    /// Deduplicate files into the store. Files that fail are reported and
    /// skipped; the rest are still saved.
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// none, lz4, zstd or snappy
        #[arg(long)]
        compression: Option<String>,
    },
    /// Rebuild a stored file
    Download {
        id: u64,
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// List stored files
    List,
    /// Show store-wide space figures
    Metrics,
}

#[derive(Serialize)]
struct StoreReport {
    #[serde(flatten)]
    usage: StoreUsage,
    saved_bytes: u64,
    dedup_ratio: f64,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let config = self.load_config()?;
        match self.command {
            Command::Chunk { ref file } => chunk(&config, file),
            Command::Analyze { ref file } => analyze(&config, file),
            Command::Ingest {
                ref files,
                ref compression,
            } => ingest(config, files, compression.as_deref()).await,
            Command::Download { id, ref out_dir } => download(&config, id, out_dir),
            Command::List => list(&config),
            Command::Metrics => metrics(&config),
        }
    }

    fn load_config(&self) -> Result<DedupConfig> {
        let mut config = match &self.config {
            Some(path) => DedupConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => DedupConfig::default(),
        };
        if let Some(algorithm) = self.algorithm {
            config.algorithm = algorithm;
        }
        if let Some(store) = &self.store {
            config.store_path = store.clone();
        }
        Ok(config)
    }
}

fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("invalid file name: {}", path.display()))
}

fn open(path: &Path) -> Result<File> {
    File::open(path).with_context(|| format!("opening {}", path.display()))
}

fn chunk(config: &DedupConfig, path: &Path) -> Result<()> {
    let report = analyze_chunking(open(path)?, &file_name_of(path)?, &config.chunker()?)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn analyze(config: &DedupConfig, path: &Path) -> Result<()> {
    let report = analyze_duplicates(open(path)?, &file_name_of(path)?, &config.chunker()?)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn ingest(
    mut config: DedupConfig,
    files: &[PathBuf],
    compression: Option<&str>,
) -> Result<()> {
    if let Some(selector) = compression {
        config.compression = parse_compression(selector)?;
    }
    let store = Arc::new(MemoryStore::open(&config.store_path)?);
    let orchestrator = Arc::new(DedupOrchestrator::new(
        &config,
        DedupStores::from_memory(store.clone()),
    )?);

    let handles: Vec<_> = files
        .iter()
        .cloned()
        .map(|path| {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::task::spawn_blocking(move || -> Result<DedupStats> {
                let name = file_name_of(&path)?;
                Ok(orchestrator.ingest(open(&path)?, &name)?)
            })
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    let mut failed = Vec::new();
    for (path, handle) in files.iter().zip(handles) {
        match handle.await? {
            Ok(stats) => results.push(stats),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "ingest failed");
                failed.push(path.display().to_string());
            }
        }
    }

    store.save_snapshot(&config.store_path)?;
    for metric in orchestrator.metrics().metrics().collect() {
        tracing::debug!(name = %metric.name, value = ?metric.value, "{}", metric.help);
    }
    println!("{}", serde_json::to_string_pretty(&results)?);
    if !failed.is_empty() {
        return Err(anyhow!(
            "{} of {} files failed to ingest: {}",
            failed.len(),
            files.len(),
            failed.join(", ")
        ));
    }
    Ok(())
}

fn download(config: &DedupConfig, id: u64, out_dir: &Path) -> Result<()> {
    let store = Arc::new(MemoryStore::load_snapshot(&config.store_path).with_context(|| {
        format!("loading store {}", config.store_path.display())
    })?);
    let engine = ReconstructionEngine::new(DedupStores::from_memory(store));
    let download = engine.download(FileId(id))?;
    let target = out_dir.join(&download.file_name);
    std::fs::write(&target, &download.content)
        .with_context(|| format!("writing {}", target.display()))?;
    println!(
        "{} ({})",
        target.display(),
        format_bytes(download.content.len() as u64)
    );
    Ok(())
}

fn list(config: &DedupConfig) -> Result<()> {
    let store = MemoryStore::open(&config.store_path)?;
    let manifests = store.list()?;

    println!("{:<8} {:<40} {:>12} {:<25}", "ID", "NAME", "SIZE", "CREATED");
    println!("{}", "-".repeat(88));
    for m in manifests {
        let id = m.id.map(|id| id.to_string()).unwrap_or_default();
        println!(
            "{:<8} {:<40} {:>12} {:<25}",
            id,
            m.download_name(),
            format_bytes(m.size),
            m.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    Ok(())
}

fn metrics(config: &DedupConfig) -> Result<()> {
    let store = MemoryStore::open(&config.store_path)?;
    let usage = store.usage();
    let saved_bytes = usage.logical_bytes.saturating_sub(usage.unique_bytes);
    let dedup_ratio = if usage.logical_bytes == 0 {
        0.0
    } else {
        saved_bytes as f64 / usage.logical_bytes as f64
    };
    let report = StoreReport {
        usage,
        saved_bytes,
        dedup_ratio,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
