//! Index store: the durable mapping from chunk id to (vector, text, metadata).
//!
//! Wraps SQLite as an opaque nearest-neighbor store. Chunks and their vectors
//! live in separate tables keyed by the content-derived chunk id, so a chunk
//! can exist before its vector does (the backfill path) and every upsert is
//! atomic per record — an aborted indexing run never leaves a half-written
//! chunk behind.
//!
//! Nearest-neighbor search follows the teacher pattern of scanning stored
//! vectors and ranking by cosine similarity in Rust; the index sizes this
//! tool targets (one corpus, one process) stay comfortably in that regime.

use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{Error, Result};
use crate::migrate;
use crate::models::{Chunk, HeaderSegment, IndexRecord, QueryResult};

const META_MODEL: &str = "embedding_model";
const META_DIMS: &str = "embedding_dims";

/// Handle to the persistent index. Constructed once at the process entry
/// point and shared by the indexing and query paths.
#[derive(Clone)]
pub struct IndexStore {
    pool: SqlitePool,
}

impl IndexStore {
    /// Open (and migrate) the store at the given path.
    pub async fn open(db_path: &Path) -> Result<Self> {
        let pool = db::connect(db_path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ============ Writes ============

    /// Upsert records, idempotent by chunk id. Each record's write is
    /// independently complete, so a pipeline abort between chunks leaves
    /// nothing inconsistent.
    pub async fn upsert(&self, records: &[IndexRecord], model: &str) -> Result<()> {
        for record in records {
            self.upsert_chunk(&record.chunk).await?;
            if let Some(vector) = &record.embedding {
                self.upsert_embedding(&record.chunk.id, model, vector)
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn upsert_chunk(&self, chunk: &Chunk) -> Result<()> {
        let header_json = serde_json::to_string(&chunk.header_path)
            .map_err(|e| Error::Configuration(format!("header_path serialization: {}", e)))?;

        // OR REPLACE also resolves (document_id, sequence_index) collisions
        // when a re-index produced different text at the same position.
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO chunks
                (id, document_id, sequence_index, text, header_path, start_offset, end_offset, oversized)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.sequence_index)
        .bind(&chunk.text)
        .bind(header_json)
        .bind(chunk.start_offset)
        .bind(chunk.end_offset)
        .bind(chunk.oversized as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn upsert_embedding(&self, chunk_id: &str, model: &str, vector: &[f32]) -> Result<()> {
        self.ensure_dims(model, vector.len()).await?;

        let blob = vec_to_blob(vector);
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO embeddings (chunk_id, model, dims, vector, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                model = excluded.model,
                dims = excluded.dims,
                vector = excluded.vector,
                created_at = excluded.created_at
            "#,
        )
        .bind(chunk_id)
        .bind(model)
        .bind(vector.len() as i64)
        .bind(blob)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record bookkeeping for an indexed document.
    pub async fn upsert_document(
        &self,
        document_id: &str,
        byte_len: usize,
        chunk_count: usize,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO documents (id, indexed_at, byte_len, chunk_count)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                indexed_at = excluded.indexed_at,
                byte_len = excluded.byte_len,
                chunk_count = excluded.chunk_count
            "#,
        )
        .bind(document_id)
        .bind(now)
        .bind(byte_len as i64)
        .bind(chunk_count as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Drop stale tail chunks after a re-index shrank a document, plus any
    /// embeddings orphaned by the removal.
    pub async fn prune_document(&self, document_id: &str, new_len: usize) -> Result<()> {
        sqlx::query("DELETE FROM chunks WHERE document_id = ? AND sequence_index >= ?")
            .bind(document_id)
            .bind(new_len as i64)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM embeddings WHERE chunk_id NOT IN (SELECT id FROM chunks)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Irreversibly drop all records for the collection.
    pub async fn reset(&self) -> Result<()> {
        for table in ["embeddings", "chunks", "documents", "index_meta"] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    // ============ Reads ============

    pub async fn count(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }

    pub async fn document_count(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }

    pub async fn get_by_id(&self, chunk_id: &str) -> Result<Chunk> {
        let row = sqlx::query(
            "SELECT id, document_id, sequence_index, text, header_path, start_offset, end_offset, oversized
             FROM chunks WHERE id = ?",
        )
        .bind(chunk_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_chunk(&row),
            None => Err(Error::NotFound(chunk_id.to_string())),
        }
    }

    /// Nearest neighbors of `query_vec` by cosine similarity.
    ///
    /// Results come back in strictly decreasing score order, ties broken by
    /// ascending `sequence_index`; fewer than `k` (possibly zero) results is
    /// not an error.
    pub async fn nearest(
        &self,
        query_vec: &[f32],
        k: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<QueryResult>> {
        if k < 1 {
            return Err(Error::Configuration("k must be >= 1".to_string()));
        }

        let rows = sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.sequence_index, c.text, c.header_path,
                   c.start_offset, c.end_offset, c.oversized, e.vector
            FROM chunks c
            JOIN embeddings e ON e.chunk_id = c.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("vector");
            let vec = blob_to_vec(&blob);
            let score = cosine_similarity(query_vec, &vec);
            if let Some(t) = score_threshold {
                if score < t {
                    continue;
                }
            }
            results.push(QueryResult {
                chunk: row_to_chunk(row)?,
                score,
            });
        }

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.chunk.sequence_index.cmp(&b.chunk.sequence_index))
        });
        results.truncate(k);

        Ok(results)
    }

    /// Chunks whose header lineage matches `pattern` (case-insensitive
    /// substring), in document order — no vector similarity involved.
    pub async fn filter_by_header(&self, pattern: &str) -> Result<Vec<Chunk>> {
        let needle = pattern.to_lowercase();
        let rows = sqlx::query(
            "SELECT id, document_id, sequence_index, text, header_path, start_offset, end_offset, oversized
             FROM chunks ORDER BY document_id, sequence_index",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut matches = Vec::new();
        for row in &rows {
            let chunk = row_to_chunk(row)?;
            if chunk
                .header_path
                .iter()
                .any(|h| h.title.to_lowercase().contains(&needle))
            {
                matches.push(chunk);
            }
        }
        Ok(matches)
    }

    /// The `size` chunks on each side of `sequence_index` within one document.
    pub async fn window(
        &self,
        document_id: &str,
        sequence_index: i64,
        size: usize,
    ) -> Result<(Vec<Chunk>, Vec<Chunk>)> {
        let size = size as i64;

        let before_rows = sqlx::query(
            "SELECT id, document_id, sequence_index, text, header_path, start_offset, end_offset, oversized
             FROM chunks
             WHERE document_id = ? AND sequence_index >= ? AND sequence_index < ?
             ORDER BY sequence_index",
        )
        .bind(document_id)
        .bind(sequence_index - size)
        .bind(sequence_index)
        .fetch_all(&self.pool)
        .await?;

        let after_rows = sqlx::query(
            "SELECT id, document_id, sequence_index, text, header_path, start_offset, end_offset, oversized
             FROM chunks
             WHERE document_id = ? AND sequence_index > ? AND sequence_index <= ?
             ORDER BY sequence_index",
        )
        .bind(document_id)
        .bind(sequence_index)
        .bind(sequence_index + size)
        .fetch_all(&self.pool)
        .await?;

        let before = before_rows
            .iter()
            .map(row_to_chunk)
            .collect::<Result<Vec<_>>>()?;
        let after = after_rows
            .iter()
            .map(row_to_chunk)
            .collect::<Result<Vec<_>>>()?;
        Ok((before, after))
    }

    /// Chunks that do not yet have a vector, in document order.
    pub async fn pending_chunks(&self, limit: Option<usize>) -> Result<Vec<Chunk>> {
        let limit_val = limit.unwrap_or(usize::MAX).min(i64::MAX as usize) as i64;
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.sequence_index, c.text, c.header_path,
                   c.start_offset, c.end_offset, c.oversized
            FROM chunks c
            LEFT JOIN embeddings e ON e.chunk_id = c.id
            WHERE e.chunk_id IS NULL
            ORDER BY c.document_id, c.sequence_index
            LIMIT ?
            "#,
        )
        .bind(limit_val)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_chunk).collect()
    }

    // ============ Dimension discipline ============

    /// Reject a provider whose dimension does not match vectors already in
    /// the index. Called on the write path before embedding; first use stamps
    /// the model and dimension into `index_meta`.
    pub async fn ensure_dims(&self, model: &str, dims: usize) -> Result<()> {
        if self.meta(META_DIMS).await?.is_some() {
            return self.verify_dims(model, dims).await;
        }
        self.set_meta(META_MODEL, model).await?;
        self.set_meta(META_DIMS, &dims.to_string()).await?;
        Ok(())
    }

    /// Read-path variant of [`ensure_dims`]: rejects a mismatch against
    /// recorded metadata but never records anything itself, so queries stay
    /// side-effect-free.
    pub async fn verify_dims(&self, model: &str, dims: usize) -> Result<()> {
        if let Some(existing) = self.meta(META_DIMS).await? {
            let existing_dims: usize = existing.parse().unwrap_or(0);
            if existing_dims != dims {
                let existing_model = self.meta(META_MODEL).await?.unwrap_or_default();
                return Err(Error::Configuration(format!(
                    "embedding dimension mismatch: index holds {}-dim vectors from '{}', provider produces {}-dim ('{}'). Re-index with --reset to switch models.",
                    existing_dims, existing_model, dims, model
                )));
            }
        }
        Ok(())
    }

    /// Model name recorded at first vector upsert, if any.
    pub async fn recorded_model(&self) -> Result<Option<String>> {
        self.meta(META_MODEL).await
    }

    async fn meta(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO index_meta (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Result<Chunk> {
    let header_json: String = row.get("header_path");
    let header_path: Vec<HeaderSegment> = serde_json::from_str(&header_json).unwrap_or_default();
    let oversized: i64 = row.get("oversized");

    Ok(Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        sequence_index: row.get("sequence_index"),
        text: row.get("text"),
        header_path,
        start_offset: row.get("start_offset"),
        end_offset: row.get("end_offset"),
        oversized: oversized != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_store() -> (TempDir, IndexStore) {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::open(&tmp.path().join("test.sqlite"))
            .await
            .unwrap();
        (tmp, store)
    }

    fn make_chunk(doc: &str, seq: i64, text: &str, headers: &[(u8, &str)]) -> Chunk {
        Chunk {
            id: crate::chunk::chunk_id(doc, text),
            document_id: doc.to_string(),
            sequence_index: seq,
            text: text.to_string(),
            header_path: headers
                .iter()
                .map(|(level, title)| HeaderSegment {
                    level: *level,
                    title: title.to_string(),
                })
                .collect(),
            start_offset: seq * 100,
            end_offset: seq * 100 + text.len() as i64,
            oversized: false,
        }
    }

    fn record(chunk: Chunk, embedding: Option<Vec<f32>>) -> IndexRecord {
        IndexRecord { chunk, embedding }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let (_tmp, store) = open_store().await;
        let records = vec![
            record(make_chunk("d", 0, "alpha", &[]), Some(vec![1.0, 0.0])),
            record(make_chunk("d", 1, "beta", &[]), Some(vec![0.0, 1.0])),
        ];

        store.upsert(&records, "test-model").await.unwrap();
        store.upsert(&records, "test-model").await.unwrap();

        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reset_drops_everything() {
        let (_tmp, store) = open_store().await;
        let records = vec![record(make_chunk("d", 0, "alpha", &[]), Some(vec![1.0, 0.0]))];
        store.upsert(&records, "m").await.unwrap();
        store.upsert_document("d", 5, 1).await.unwrap();

        store.reset().await.unwrap();

        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(store.document_count().await.unwrap(), 0);
        assert!(store.recorded_model().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_nearest_orders_by_score_then_sequence() {
        let (_tmp, store) = open_store().await;
        let records = vec![
            record(make_chunk("d", 0, "exact", &[]), Some(vec![1.0, 0.0])),
            record(make_chunk("d", 1, "close", &[]), Some(vec![0.9, 0.1])),
            record(make_chunk("d", 2, "far", &[]), Some(vec![0.0, 1.0])),
            // Tied with sequence 0 on score — must come after it.
            record(make_chunk("d", 3, "exact too", &[]), Some(vec![2.0, 0.0])),
        ];
        store.upsert(&records, "m").await.unwrap();

        let hits = store.nearest(&[1.0, 0.0], 10, None).await.unwrap();
        assert_eq!(hits.len(), 4);
        assert_eq!(hits[0].chunk.sequence_index, 0);
        assert_eq!(hits[1].chunk.sequence_index, 3);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!((hits[1].score - 1.0).abs() < 1e-6);
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_nearest_respects_threshold_and_k() {
        let (_tmp, store) = open_store().await;
        let records = vec![
            record(make_chunk("d", 0, "a", &[]), Some(vec![1.0, 0.0])),
            record(make_chunk("d", 1, "b", &[]), Some(vec![0.7, 0.7])),
            record(make_chunk("d", 2, "c", &[]), Some(vec![0.0, 1.0])),
        ];
        store.upsert(&records, "m").await.unwrap();

        let hits = store.nearest(&[1.0, 0.0], 10, Some(0.5)).await.unwrap();
        assert_eq!(hits.len(), 2);
        for h in &hits {
            assert!(h.score >= 0.5);
        }

        let hits = store.nearest(&[1.0, 0.0], 1, None).await.unwrap();
        assert_eq!(hits.len(), 1);

        // Nothing clears an impossible threshold — empty, not an error.
        let hits = store.nearest(&[1.0, 0.0], 10, Some(2.0)).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_nearest_rejects_zero_k() {
        let (_tmp, store) = open_store().await;
        assert!(matches!(
            store.nearest(&[1.0], 0, None).await,
            Err(Error::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_filter_by_header_case_insensitive() {
        let (_tmp, store) = open_store().await;
        let records = vec![
            record(
                make_chunk("d", 0, "setup text", &[(1, "Setup"), (2, "Install")]),
                None,
            ),
            record(make_chunk("d", 1, "usage text", &[(1, "Usage")]), None),
            record(make_chunk("d", 2, "bare text", &[]), None),
        ];
        store.upsert(&records, "m").await.unwrap();

        let hits = store.filter_by_header("INSTALL").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "setup text");

        let hits = store.filter_by_header("us").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "usage text");

        assert!(store.filter_by_header("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_by_id_not_found() {
        let (_tmp, store) = open_store().await;
        assert!(matches!(
            store.get_by_id("nope").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_window_at_document_start() {
        let (_tmp, store) = open_store().await;
        let records: Vec<IndexRecord> = (0..4)
            .map(|i| record(make_chunk("d", i, &format!("chunk {}", i), &[]), None))
            .collect();
        store.upsert(&records, "m").await.unwrap();

        let (before, after) = store.window("d", 0, 1).await.unwrap();
        assert!(before.is_empty());
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].sequence_index, 1);

        let (before, after) = store.window("d", 2, 2).await.unwrap();
        assert_eq!(before.len(), 2);
        assert_eq!(before[0].sequence_index, 0);
        assert_eq!(after.len(), 1);
    }

    #[tokio::test]
    async fn test_window_stays_within_document() {
        let (_tmp, store) = open_store().await;
        store
            .upsert(
                &[
                    record(make_chunk("a", 0, "a0", &[]), None),
                    record(make_chunk("b", 0, "b0", &[]), None),
                    record(make_chunk("b", 1, "b1", &[]), None),
                ],
                "m",
            )
            .await
            .unwrap();

        let (before, after) = store.window("b", 0, 2).await.unwrap();
        assert!(before.is_empty());
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].document_id, "b");
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected_eagerly() {
        let (_tmp, store) = open_store().await;
        store
            .upsert(
                &[record(make_chunk("d", 0, "a", &[]), Some(vec![1.0, 0.0]))],
                "small",
            )
            .await
            .unwrap();

        let err = store.ensure_dims("big", 3).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        // Same dims from another model name is allowed through.
        assert!(store.ensure_dims("other", 2).await.is_ok());
    }

    #[tokio::test]
    async fn test_verify_dims_never_stamps() {
        let (_tmp, store) = open_store().await;

        // On a fresh index the check passes and records nothing.
        store.verify_dims("m", 384).await.unwrap();
        assert!(store.recorded_model().await.unwrap().is_none());

        store
            .upsert(
                &[record(make_chunk("d", 0, "a", &[]), Some(vec![1.0, 0.0]))],
                "small",
            )
            .await
            .unwrap();

        assert!(store.verify_dims("small", 2).await.is_ok());
        assert!(matches!(
            store.verify_dims("big", 3).await,
            Err(Error::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_pending_chunks_and_prune() {
        let (_tmp, store) = open_store().await;
        store
            .upsert(
                &[
                    record(make_chunk("d", 0, "has vector", &[]), Some(vec![1.0])),
                    record(make_chunk("d", 1, "no vector", &[]), None),
                    record(make_chunk("d", 2, "stale tail", &[]), None),
                ],
                "m",
            )
            .await
            .unwrap();

        let pending = store.pending_chunks(None).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].sequence_index, 1);

        store.prune_document("d", 2).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
        let pending = store.pending_chunks(None).await.unwrap();
        assert_eq!(pending.len(), 1);
    }
}
