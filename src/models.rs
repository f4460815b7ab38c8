//! Core data models for the chunking and retrieval pipeline.
//!
//! These types flow from the chunker through the index store to the query
//! engine and tool server. Chunks are immutable once created; they are
//! destroyed only by a full re-index or reset.

use serde::{Deserialize, Serialize};

/// A source document: raw text plus its source identifier (path or name).
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub text: String,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// One entry in a chunk's header lineage, e.g. `(2, "Configuration")`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderSegment {
    pub level: u8,
    pub title: String,
}

/// A bounded span of document body text tagged with its header lineage.
///
/// `id` is a content-derived hash of `(document_id, text)`, stable across
/// re-indexing runs so re-insertion is idempotent. `text` is always the exact
/// byte slice `[start_offset, end_offset)` of the source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub sequence_index: i64,
    pub text: String,
    /// Snapshot of the header stack at emission time, outermost first.
    pub header_path: Vec<HeaderSegment>,
    pub start_offset: i64,
    pub end_offset: i64,
    /// Set when an unbroken token forced the chunk past `max_chars`.
    #[serde(default)]
    pub oversized: bool,
}

impl Chunk {
    /// Human-readable header lineage, `"Setup > Configuration"`.
    pub fn header_trail(&self) -> String {
        self.header_path
            .iter()
            .map(|h| h.title.as_str())
            .collect::<Vec<_>>()
            .join(" > ")
    }
}

/// The unit of storage: a chunk plus its embedding vector, if computed yet.
#[derive(Debug, Clone)]
pub struct IndexRecord {
    pub chunk: Chunk,
    pub embedding: Option<Vec<f32>>,
}

/// A ranked hit from nearest-neighbor search. Results are ordered by strictly
/// decreasing score; ties break by ascending `sequence_index`.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub chunk: Chunk,
    pub score: f32,
}

/// Neighboring chunks around a target, by `sequence_index` within one document.
#[derive(Debug, Clone, Serialize)]
pub struct ContextWindow {
    pub before: Vec<Chunk>,
    pub target: Chunk,
    pub after: Vec<Chunk>,
}

/// Read-only snapshot of the index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub total_chunks: u64,
    pub total_documents: u64,
    pub dimension: usize,
    pub model: String,
}
