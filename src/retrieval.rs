//! Retrieval engine: ranked semantic search plus the structural lookups
//! (header filter, context window, stats) that need no query vector.
//!
//! The engine borrows the store and provider for the duration of one
//! operation; it holds no state of its own, so the CLI and the tool server
//! construct it per call.

use crate::config::Config;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::models::{Chunk, ContextWindow, IndexStats, QueryResult};
use crate::store::IndexStore;

pub struct RetrievalEngine<'a> {
    store: &'a IndexStore,
    provider: &'a dyn EmbeddingProvider,
    config: &'a Config,
}

impl<'a> RetrievalEngine<'a> {
    pub fn new(
        store: &'a IndexStore,
        provider: &'a dyn EmbeddingProvider,
        config: &'a Config,
    ) -> Self {
        Self {
            store,
            provider,
            config,
        }
    }

    /// Semantic search: embed the query, rank stored chunks by cosine
    /// similarity, return the top `k` at or above `score_threshold`.
    ///
    /// An empty index is reported before any embedding work happens, so the
    /// caller gets a clear "index something first" instead of a provider
    /// round trip that can only return nothing.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<QueryResult>> {
        if query.trim().is_empty() {
            return Err(Error::Configuration("query must not be empty".to_string()));
        }
        if self.store.count().await? == 0 {
            return Err(Error::EmptyIndex);
        }

        // Read path: verify only, never stamp metadata. Stamping happens on
        // the write path (upsert_embedding), so a failed search cannot pin
        // the index to a model that never produced a vector.
        if self.config.embedding.is_enabled() {
            self.store
                .verify_dims(self.provider.model_name(), self.provider.dims())
                .await?;
        }

        let query_vec = embedding::embed_query(&self.config.embedding, query).await?;
        self.store.nearest(&query_vec, k, score_threshold).await
    }

    /// Structural lookup by header lineage. Case-insensitive substring match
    /// against every segment of every chunk's header path, in document order.
    pub async fn search_by_headers(&self, pattern: &str, limit: usize) -> Result<Vec<Chunk>> {
        if pattern.trim().is_empty() {
            return Err(Error::Configuration(
                "header pattern must not be empty".to_string(),
            ));
        }
        let mut matches = self.store.filter_by_header(pattern).await?;
        matches.truncate(limit);
        Ok(matches)
    }

    /// The target chunk plus up to `size` neighbors on each side, never
    /// crossing a document boundary.
    pub async fn get_context(&self, chunk_id: &str, size: usize) -> Result<ContextWindow> {
        let target = self.store.get_by_id(chunk_id).await?;
        let (before, after) = self
            .store
            .window(&target.document_id, target.sequence_index, size)
            .await?;
        Ok(ContextWindow {
            before,
            target,
            after,
        })
    }

    /// Index snapshot. The model name favors what the index actually holds
    /// over the currently configured provider, since they can differ until
    /// the next re-embed.
    pub async fn get_stats(&self) -> Result<IndexStats> {
        let total_chunks = self.store.count().await?;
        let total_documents = self.store.document_count().await?;
        let model = match self.store.recorded_model().await? {
            Some(m) => m,
            None => self.provider.model_name().to_string(),
        };
        Ok(IndexStats {
            total_chunks,
            total_documents,
            dimension: self.provider.dims(),
            model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DisabledProvider;
    use crate::models::{HeaderSegment, IndexRecord};
    use tempfile::TempDir;

    async fn seeded_store() -> (TempDir, IndexStore) {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::open(&tmp.path().join("test.sqlite"))
            .await
            .unwrap();

        let chunks = [
            (0, "intro text", vec![(1u8, "Guide")]),
            (1, "install steps", vec![(1, "Guide"), (2, "Install")]),
            (2, "config keys", vec![(1, "Guide"), (2, "Configure")]),
        ];
        let records: Vec<IndexRecord> = chunks
            .iter()
            .map(|(seq, text, headers)| IndexRecord {
                chunk: Chunk {
                    id: crate::chunk::chunk_id("guide.md", text),
                    document_id: "guide.md".to_string(),
                    sequence_index: *seq,
                    text: text.to_string(),
                    header_path: headers
                        .iter()
                        .map(|(level, title)| HeaderSegment {
                            level: *level,
                            title: title.to_string(),
                        })
                        .collect(),
                    start_offset: 0,
                    end_offset: text.len() as i64,
                    oversized: false,
                },
                embedding: None,
            })
            .collect();
        store.upsert(&records, "disabled").await.unwrap();
        store.upsert_document("guide.md", 100, 3).await.unwrap();
        (tmp, store)
    }

    #[tokio::test]
    async fn test_search_empty_index_is_typed_error() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::open(&tmp.path().join("test.sqlite"))
            .await
            .unwrap();
        let config = Config::default();
        let provider = DisabledProvider;
        let engine = RetrievalEngine::new(&store, &provider, &config);

        assert!(matches!(
            engine.search("anything", 5, None).await,
            Err(Error::EmptyIndex)
        ));
    }

    #[tokio::test]
    async fn test_failed_search_leaves_no_meta_behind() {
        let (_tmp, store) = seeded_store().await;
        let config = Config::default();
        let provider = DisabledProvider;
        let engine = RetrievalEngine::new(&store, &provider, &config);

        // Chunks exist but no provider is configured; the search fails at
        // the embedding step.
        assert!(engine.search("hello", 5, None).await.is_err());

        // The query must not have recorded any model metadata, so a real
        // provider can still claim the index afterwards.
        assert_eq!(store.recorded_model().await.unwrap(), None);
        assert!(store.ensure_dims("all-minilm-l6-v2", 384).await.is_ok());
    }

    #[tokio::test]
    async fn test_search_rejects_empty_query() {
        let (_tmp, store) = seeded_store().await;
        let config = Config::default();
        let provider = DisabledProvider;
        let engine = RetrievalEngine::new(&store, &provider, &config);

        assert!(matches!(
            engine.search("   ", 5, None).await,
            Err(Error::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_header_search_matches_any_segment() {
        let (_tmp, store) = seeded_store().await;
        let config = Config::default();
        let provider = DisabledProvider;
        let engine = RetrievalEngine::new(&store, &provider, &config);

        let hits = engine.search_by_headers("guide", 10).await.unwrap();
        assert_eq!(hits.len(), 3);

        let hits = engine.search_by_headers("install", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "install steps");

        let hits = engine.search_by_headers("guide", 2).await.unwrap();
        assert_eq!(hits.len(), 2);

        assert!(matches!(
            engine.search_by_headers("", 10).await,
            Err(Error::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_context_window_around_target() {
        let (_tmp, store) = seeded_store().await;
        let config = Config::default();
        let provider = DisabledProvider;
        let engine = RetrievalEngine::new(&store, &provider, &config);

        let id = crate::chunk::chunk_id("guide.md", "install steps");
        let window = engine.get_context(&id, 1).await.unwrap();
        assert_eq!(window.target.text, "install steps");
        assert_eq!(window.before.len(), 1);
        assert_eq!(window.before[0].text, "intro text");
        assert_eq!(window.after.len(), 1);
        assert_eq!(window.after[0].text, "config keys");

        assert!(matches!(
            engine.get_context("missing-id", 1).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stats_reflect_store_contents() {
        let (_tmp, store) = seeded_store().await;
        let config = Config::default();
        let provider = DisabledProvider;
        let engine = RetrievalEngine::new(&store, &provider, &config);

        let stats = engine.get_stats().await.unwrap();
        assert_eq!(stats.total_chunks, 3);
        assert_eq!(stats.total_documents, 1);
        assert_eq!(stats.model, "disabled");
        assert_eq!(stats.dimension, 0);
    }
}
