//! SQLite-backed `VectorStore` reference engine.
//!
//! Vectors and metadata are stored as JSON text; similarity is brute-force
//! cosine, parallelized with `rayon` once the scanned set is large enough to
//! benefit. Fine up to roughly 10k documents; swapping in an ANN index or a
//! dedicated vector database means implementing `VectorStore`, not touching
//! any caller.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use rayon::prelude::*;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::{EmbeddingKind, SearchResult, VectorStore};
use crate::embeddings::Embedding;
use crate::error::{Error, Result};

/// SQLite-backed vector store. The connection is mutex-guarded so the store
/// can be shared behind an `Arc` across the async runtime despite
/// `rusqlite::Connection` not being `Sync`.
pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS vectors (
    id TEXT NOT NULL,
    kind TEXT NOT NULL,
    embedding TEXT NOT NULL,
    metadata TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (id, kind)
)";

impl SqliteVectorStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        conn.execute(SCHEMA, [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, for tests.
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute(SCHEMA, [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::LockError("vector store connection lock poisoned".into()))
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn put(
        &self,
        id: Uuid,
        kind: EmbeddingKind,
        embedding: &Embedding,
        metadata: JsonValue,
    ) -> Result<()> {
        let embedding_json = serde_json::to_string(embedding)?;
        let metadata_json = serde_json::to_string(&metadata)?;
        let timestamp = chrono::Utc::now().timestamp();

        self.lock()?.execute(
            "INSERT OR REPLACE INTO vectors (id, kind, embedding, metadata, created_at) VALUES (?, ?, ?, ?, ?)",
            params![id.to_string(), kind, embedding_json, metadata_json, timestamp],
        )?;
        Ok(())
    }

    async fn search(
        &self,
        query: &Embedding,
        limit: usize,
        kind: Option<EmbeddingKind>,
    ) -> Result<Vec<SearchResult>> {
        let rows: Vec<(String, String, String, String)> = {
            let conn = self.lock()?;
            let (sql, bind_kind) = match kind {
                Some(kind) => (
                    "SELECT id, kind, embedding, metadata FROM vectors WHERE kind = ?",
                    Some(kind),
                ),
                None => (
                    "SELECT id, kind, embedding, metadata FROM vectors",
                    None,
                ),
            };
            let mut stmt = conn.prepare(sql)?;
            let map_row = |row: &rusqlite::Row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            };
            let rows = match bind_kind {
                Some(kind) => stmt
                    .query_map(params![kind], map_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?,
                None => stmt
                    .query_map([], map_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?,
            };
            rows
        };

        let mut results = rows
            .into_par_iter()
            .map(|(id, kind, embedding_json, metadata_json)| {
                let embedding: Embedding = serde_json::from_str(&embedding_json)?;
                let metadata: JsonValue = serde_json::from_str(&metadata_json)?;
                let score = cosine_similarity(query, &embedding);
                let id = Uuid::parse_str(&id)
                    .map_err(|e| Error::Internal(format!("stored id is not a uuid: {e}")))?;
                Ok::<_, Error>(SearchResult {
                    id,
                    kind,
                    score,
                    metadata,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        results.truncate(limit);
        Ok(results)
    }

    async fn get(&self, id: Uuid, kind: EmbeddingKind) -> Result<Option<Embedding>> {
        let conn = self.lock()?;
        let embedding_json: Option<String> = conn
            .query_row(
                "SELECT embedding FROM vectors WHERE id = ? AND kind = ?",
                params![id.to_string(), kind],
                |row| row.get(0),
            )
            .optional()?;
        embedding_json
            .map(|json| serde_json::from_str(&json).map_err(Error::from))
            .transpose()
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.lock()?
            .execute("DELETE FROM vectors WHERE id = ?", params![id.to_string()])?;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = self
            .lock()?
            .query_row("SELECT COUNT(*) FROM vectors", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    async fn all_ids(&self) -> Result<Vec<Uuid>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT DISTINCT id FROM vectors")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .filter_map(|id| Uuid::parse_str(&id).ok())
            .collect();
        Ok(ids)
    }
}

/// Cosine similarity. Embeddings produced by `EmbeddingPipeline` are assumed
/// L2-normalized, so this is a plain dot product; kept as a named function
/// (rather than inlined) so the normalized-input assumption is visible and
/// testable on its own.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::KIND_SUMMARY;
    use serde_json::json;

    #[test]
    fn identical_and_orthogonal_vectors() {
        let identical = cosine_similarity(&[0.5, 0.5, 0.5, 0.5], &[0.5, 0.5, 0.5, 0.5]);
        assert!((identical - 1.0).abs() < 0.01);

        let orthogonal = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]);
        assert!((orthogonal - 0.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn insert_and_search_orders_by_similarity() {
        let store = SqliteVectorStore::new_in_memory().unwrap();
        let (id1, id2, id3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        store
            .put(id1, KIND_SUMMARY, &vec![1.0, 0.0, 0.0, 0.0], json!({"name": "a"}))
            .await
            .unwrap();
        store
            .put(id2, KIND_SUMMARY, &vec![0.8, 0.6, 0.0, 0.0], json!({"name": "b"}))
            .await
            .unwrap();
        store
            .put(id3, KIND_SUMMARY, &vec![0.5, 0.5, 0.5, 0.5], json!({"name": "c"}))
            .await
            .unwrap();

        let query = vec![0.5, 0.5, 0.5, 0.5];
        let results = store.search(&query, 2, None).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, id3);
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn count_delete_and_all_ids() {
        let store = SqliteVectorStore::new_in_memory().unwrap();
        let (id1, id2) = (Uuid::new_v4(), Uuid::new_v4());

        assert_eq!(store.count().await.unwrap(), 0);
        store.put(id1, KIND_SUMMARY, &vec![0.1, 0.2], json!({})).await.unwrap();
        store.put(id2, KIND_SUMMARY, &vec![0.3, 0.4], json!({})).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(store.all_ids().await.unwrap().len(), 2);

        store.delete(id1).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn get_fetches_exact_document() {
        let store = SqliteVectorStore::new_in_memory().unwrap();
        let id = Uuid::new_v4();
        store.put(id, KIND_SUMMARY, &vec![0.1, 0.2], json!({})).await.unwrap();

        assert_eq!(store.get(id, KIND_SUMMARY).await.unwrap(), Some(vec![0.1, 0.2]));
        assert_eq!(store.get(id, crate::vector_store::KIND_CONTEXT).await.unwrap(), None);
        assert_eq!(store.get(Uuid::new_v4(), KIND_SUMMARY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_is_upsert_per_id_and_kind() {
        let store = SqliteVectorStore::new_in_memory().unwrap();
        let id = Uuid::new_v4();

        store.put(id, KIND_SUMMARY, &vec![0.1], json!({"version": 1})).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        store.put(id, KIND_SUMMARY, &vec![0.2], json!({"version": 2})).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        let results = store.search(&vec![0.2], 1, None).await.unwrap();
        assert_eq!(results[0].metadata["version"], 2);
    }

    #[tokio::test]
    async fn search_can_filter_by_kind() {
        let store = SqliteVectorStore::new_in_memory().unwrap();
        let id = Uuid::new_v4();
        store.put(id, KIND_SUMMARY, &vec![1.0, 0.0], json!({})).await.unwrap();
        store
            .put(id, crate::vector_store::KIND_CONTEXT, &vec![0.0, 1.0], json!({}))
            .await
            .unwrap();

        let results = store.search(&vec![1.0, 0.0], 10, Some(KIND_SUMMARY)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].kind, KIND_SUMMARY);
    }
}
