//! Vector store for chunk embeddings.
//!
//! Embeddings are stored as little-endian f32 blobs in a SQLite file under
//! the data directory's `vectors/` folder, keyed by chunk id. Nearest
//! neighbors are found by brute-force cosine similarity, which is ample for
//! a per-repository index.

use std::path::Path;

use async_trait::async_trait;
use rusqlite::params;

use crate::error::CoderagErr;
use crate::error::Result;
use crate::storage::sqlite::OptionalExt;
use crate::storage::sqlite::SqliteStore;

/// Persisted chunk-embedding store.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace embeddings, keyed by chunk id.
    async fn upsert(&self, items: Vec<(i64, Vec<f32>)>) -> Result<()>;

    /// Delete embeddings for the given chunk ids.
    async fn delete(&self, chunk_ids: Vec<i64>) -> Result<()>;

    /// Nearest chunks by cosine similarity, best first.
    async fn query(&self, embedding: Vec<f32>, limit: usize) -> Result<Vec<(i64, f32)>>;

    /// Number of stored embeddings.
    async fn count(&self) -> Result<i64>;

    /// Remove every stored embedding.
    async fn clear(&self) -> Result<()>;
}

/// SQLite-backed brute-force vector store.
pub struct SqliteVectorStore {
    db: SqliteStore,
    dimension: i32,
}

impl SqliteVectorStore {
    /// Open or create the store under `<data_dir>/vectors/`.
    ///
    /// If the store already exists with a different dimension, the stored
    /// vectors are cleared and the dimension is reset; embeddings from one
    /// model are meaningless against another.
    pub async fn open(data_dir: &Path, dimension: i32) -> Result<Self> {
        let dir = data_dir.join("vectors");
        std::fs::create_dir_all(&dir).map_err(|e| CoderagErr::io(&dir, e))?;
        let db = SqliteStore::open(&dir.join("embeddings.db"))?;

        db.write(move |conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS embeddings (
                     chunk_id INTEGER PRIMARY KEY,
                     embedding BLOB NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS vector_meta (
                     key TEXT NOT NULL UNIQUE,
                     value TEXT NOT NULL
                 );",
            )?;

            let stored: Option<String> = conn
                .query_row(
                    "SELECT value FROM vector_meta WHERE key = 'dimension'",
                    [],
                    |row| row.get(0),
                )
                .optional()?;
            match stored.and_then(|s| s.parse::<i32>().ok()) {
                Some(dim) if dim == dimension => {}
                Some(dim) => {
                    tracing::warn!(
                        stored = dim,
                        configured = dimension,
                        "embedding dimension changed, clearing vector store"
                    );
                    conn.execute("DELETE FROM embeddings", [])?;
                    conn.execute(
                        "UPDATE vector_meta SET value = ? WHERE key = 'dimension'",
                        [dimension.to_string()],
                    )?;
                }
                None => {
                    conn.execute(
                        "INSERT INTO vector_meta (key, value) VALUES ('dimension', ?)",
                        [dimension.to_string()],
                    )?;
                }
            }
            Ok(())
        })
        .await?;

        Ok(Self { db, dimension })
    }

    /// Configured embedding dimension.
    pub fn dimension(&self) -> i32 {
        self.dimension
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, items: Vec<(i64, Vec<f32>)>) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        self.db
            .transaction(move |conn| {
                let mut stmt = conn.prepare(
                    "INSERT INTO embeddings (chunk_id, embedding) VALUES (?, ?)
                     ON CONFLICT(chunk_id) DO UPDATE SET embedding = excluded.embedding",
                )?;
                for (chunk_id, embedding) in &items {
                    stmt.execute(params![chunk_id, encode(embedding)])?;
                }
                Ok(())
            })
            .await
    }

    async fn delete(&self, chunk_ids: Vec<i64>) -> Result<()> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        self.db
            .transaction(move |conn| {
                let mut stmt = conn.prepare("DELETE FROM embeddings WHERE chunk_id = ?")?;
                for chunk_id in &chunk_ids {
                    stmt.execute([chunk_id])?;
                }
                Ok(())
            })
            .await
    }

    async fn query(&self, embedding: Vec<f32>, limit: usize) -> Result<Vec<(i64, f32)>> {
        self.db
            .read(move |conn| {
                let mut stmt = conn.prepare("SELECT chunk_id, embedding FROM embeddings")?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
                })?;

                let mut scored: Vec<(i64, f32)> = Vec::new();
                for row in rows {
                    let (chunk_id, blob) = row?;
                    let stored = decode(&blob);
                    scored.push((chunk_id, cosine(&embedding, &stored)));
                }

                scored.sort_by(|a, b| {
                    b.1.partial_cmp(&a.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.0.cmp(&b.0))
                });
                scored.truncate(limit);
                Ok(scored)
            })
            .await
    }

    async fn count(&self) -> Result<i64> {
        self.db
            .read(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?)
            })
            .await
    }

    async fn clear(&self) -> Result<()> {
        self.db
            .write(|conn| {
                conn.execute("DELETE FROM embeddings", [])?;
                Ok(())
            })
            .await
    }
}

fn encode(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity; 0 when either vector is empty or zero.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_upsert_query_delete() {
        let dir = TempDir::new().unwrap();
        let store = SqliteVectorStore::open(dir.path(), 3).await.unwrap();

        store
            .upsert(vec![
                (1, vec![1.0, 0.0, 0.0]),
                (2, vec![0.0, 1.0, 0.0]),
                (3, vec![0.9, 0.1, 0.0]),
            ])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 3);

        let hits = store.query(vec![1.0, 0.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, 1);
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].0, 3);

        store.delete(vec![1]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let dir = TempDir::new().unwrap();
        let store = SqliteVectorStore::open(dir.path(), 2).await.unwrap();

        store.upsert(vec![(7, vec![1.0, 0.0])]).await.unwrap();
        store.upsert(vec![(7, vec![0.0, 1.0])]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        let hits = store.query(vec![0.0, 1.0], 1).await.unwrap();
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_dimension_change_clears() {
        let dir = TempDir::new().unwrap();
        {
            let store = SqliteVectorStore::open(dir.path(), 2).await.unwrap();
            store.upsert(vec![(1, vec![1.0, 0.0])]).await.unwrap();
        }
        let store = SqliteVectorStore::open(dir.path(), 4).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[test]
    fn test_cosine() {
        assert!((cosine(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine(&[], &[]), 0.0);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_blob_roundtrip() {
        let v = vec![0.25f32, -1.5, 3.75];
        assert_eq!(decode(&encode(&v)), v);
    }
}
