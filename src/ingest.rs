//! Ingest pipeline: walk files, chunk, embed, upsert.
//!
//! Indexing is two-phase by design. Chunks land in the store first; vectors
//! follow per batch. With the provider disabled, chunks are stored without
//! vectors and `docdex embed` backfills them later, so a corpus can be
//! chunked offline and embedded when credentials or models are available.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::chunk::{chunk_document, ChunkOptions};
use crate::config::Config;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::models::{Chunk, Document, IndexRecord};
use crate::store::IndexStore;

const INDEXABLE_EXTENSIONS: &[&str] = &["md", "markdown", "txt"];

#[derive(Debug, Default)]
pub struct IndexOptions {
    /// Drop all existing records before indexing.
    pub reset: bool,
    /// Chunk and report without writing anything.
    pub dry_run: bool,
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub batch_size: Option<usize>,
}

/// Index the given files and directories into the store.
pub async fn run_index(
    config: &Config,
    store: &IndexStore,
    provider: &dyn EmbeddingProvider,
    paths: &[PathBuf],
    opts: &IndexOptions,
) -> Result<()> {
    let mut chunk_opts = ChunkOptions::from(&config.chunking);
    if let Some(size) = opts.chunk_size {
        chunk_opts.max_chars = size;
    }
    if let Some(overlap) = opts.chunk_overlap {
        chunk_opts.overlap_chars = overlap;
    }
    if chunk_opts.max_chars == 0 || chunk_opts.overlap_chars >= chunk_opts.max_chars {
        return Err(Error::Configuration(format!(
            "chunk overlap ({}) must be < chunk size ({})",
            chunk_opts.overlap_chars, chunk_opts.max_chars
        )));
    }
    let batch_size = opts.batch_size.unwrap_or(config.embedding.batch_size);

    if opts.reset && !opts.dry_run {
        store.reset().await?;
        println!("Index reset.");
    }

    let files = collect_files(paths)?;
    if files.is_empty() {
        println!(
            "No indexable files found (extensions: {:?}).",
            INDEXABLE_EXTENSIONS
        );
        return Ok(());
    }

    if !config.embedding.is_enabled() && !opts.dry_run {
        eprintln!(
            "Warning: embedding provider is disabled; chunks will be stored without vectors. \
             Run 'docdex embed' after enabling a provider."
        );
    }

    let mut total_chunks = 0usize;
    let mut total_docs = 0usize;

    for path in &files {
        let text = std::fs::read_to_string(path)?;
        let document_id = path.to_string_lossy().to_string();
        let doc = Document::new(&document_id, &text);

        let chunks = chunk_document(&doc, &chunk_opts)?;
        print_document_stats(&document_id, &chunks);

        if opts.dry_run {
            total_chunks += chunks.len();
            total_docs += 1;
            continue;
        }

        let chunk_count = chunks.len();
        let records: Vec<IndexRecord> = chunks
            .into_iter()
            .map(|chunk| IndexRecord {
                chunk,
                embedding: None,
            })
            .collect();
        store.upsert(&records, provider.model_name()).await?;

        if config.embedding.is_enabled() {
            let chunks: Vec<Chunk> = records.into_iter().map(|r| r.chunk).collect();
            // An embedding failure leaves the document's chunks pending for a
            // later `docdex embed` run instead of aborting the whole index.
            if let Err(e) = embed_chunks(config, store, provider, &chunks, batch_size).await {
                match e {
                    Error::Configuration(_) => return Err(e),
                    other => eprintln!(
                        "Warning: embedding failed for {} ({}); chunks left pending",
                        document_id, other
                    ),
                }
            }
        }

        store
            .upsert_document(&document_id, text.len(), chunk_count)
            .await?;
        store.prune_document(&document_id, chunk_count).await?;

        total_chunks += chunk_count;
        total_docs += 1;
    }

    if opts.dry_run {
        println!(
            "Dry run: {} chunks across {} documents (nothing written).",
            total_chunks, total_docs
        );
    } else {
        println!(
            "Indexed {} chunks across {} documents.",
            total_chunks, total_docs
        );
    }
    Ok(())
}

/// Embed chunks that are still missing vectors.
pub async fn run_embed_pending(
    config: &Config,
    store: &IndexStore,
    provider: &dyn EmbeddingProvider,
    batch_size: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        return Err(Error::Configuration(
            "embedding provider is disabled; set embedding.provider or EMBEDDING_MODEL_TYPE"
                .to_string(),
        ));
    }

    let pending = store.pending_chunks(None).await?;
    if pending.is_empty() {
        println!("Nothing to embed; every chunk has a vector.");
        return Ok(());
    }
    println!("{} chunks pending embedding.", pending.len());

    if dry_run {
        return Ok(());
    }

    let batch_size = batch_size.unwrap_or(config.embedding.batch_size);
    embed_chunks(config, store, provider, &pending, batch_size).await?;
    println!("Embedded {} chunks.", pending.len());
    Ok(())
}

/// Embed in submission order, one store write per batch. A provider failure
/// aborts here; already-written batches stay and the next run resumes from
/// the pending set.
async fn embed_chunks(
    config: &Config,
    store: &IndexStore,
    provider: &dyn EmbeddingProvider,
    chunks: &[Chunk],
    batch_size: usize,
) -> Result<()> {
    let batch_size = batch_size.max(1);
    store
        .ensure_dims(provider.model_name(), provider.dims())
        .await?;

    for batch in chunks.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedding::embed_texts(&config.embedding, &texts).await?;

        for (chunk, vector) in batch.iter().zip(vectors.iter()) {
            store
                .upsert_embedding(&chunk.id, provider.model_name(), vector)
                .await?;
        }
    }
    Ok(())
}

/// Expand paths into a sorted, deduplicated list of indexable files.
fn collect_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = BTreeSet::new();

    for path in paths {
        if path.is_file() {
            // Explicitly named files are indexed regardless of extension.
            files.insert(path.clone());
        } else if path.is_dir() {
            for entry in WalkDir::new(path).follow_links(true) {
                let entry = entry.map_err(|e| {
                    Error::Configuration(format!("walking {}: {}", path.display(), e))
                })?;
                if entry.file_type().is_file() && has_indexable_extension(entry.path()) {
                    files.insert(entry.path().to_path_buf());
                }
            }
        } else {
            return Err(Error::Configuration(format!(
                "path does not exist: {}",
                path.display()
            )));
        }
    }

    Ok(files.into_iter().collect())
}

fn has_indexable_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| INDEXABLE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn print_document_stats(document_id: &str, chunks: &[Chunk]) {
    if chunks.is_empty() {
        println!("{}: 0 chunks (empty document)", document_id);
        return;
    }
    let sizes: Vec<usize> = chunks.iter().map(|c| c.text.chars().count()).collect();
    let total: usize = sizes.iter().sum();
    let min = sizes.iter().min().copied().unwrap_or(0);
    let max = sizes.iter().max().copied().unwrap_or(0);
    println!(
        "{}: {} chunks, {} chars (avg {}, min {}, max {})",
        document_id,
        chunks.len(),
        total,
        total / chunks.len(),
        min,
        max
    );
}
