//! Vector store implementations.
//!
//! [`SqliteVectorStore`] persists chunks and their embeddings in
//! `<persist_dir>/index.sqlite`, partitioned by logical collection name.
//! Similarity is brute-force cosine over every vector in the collection,
//! computed in Rust. [`InMemoryVectorStore`] keeps the same contract without
//! touching disk and backs tests and throwaway sessions.
//!
//! Both report cosine *distance* (`1 - similarity`) and refuse to store a
//! chunk id twice.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::db;
use crate::embedding::{
    blob_to_vec, cosine_similarity, embed_batched, embed_query, vec_to_blob, EmbeddingProvider,
};
use crate::error::{Error, Result};
use crate::migrate::{self, index_err};
use crate::models::IndexChunk;
use crate::traits::{ChunkHit, VectorStore};

pub const INDEX_FILE: &str = "index.sqlite";

fn embed_err(e: anyhow::Error) -> Error {
    Error::Index(format!("embedding failed: {}", e))
}

/// First id that appears twice in `chunks`.
fn duplicate_in_batch(chunks: &[IndexChunk]) -> Option<&str> {
    let mut seen = HashSet::new();
    chunks
        .iter()
        .find(|c| !seen.insert(c.id.as_str()))
        .map(|c| c.id.as_str())
}

/// Rank `(chunk, vector)` pairs against `query`, closest first.
fn rank<'a>(
    query: &[f32],
    candidates: impl Iterator<Item = (&'a IndexChunk, &'a [f32])>,
    n: usize,
) -> Vec<ChunkHit> {
    let mut scored: Vec<(f32, &IndexChunk)> = candidates
        .map(|(chunk, vector)| (cosine_similarity(query, vector), chunk))
        .collect();
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.id.cmp(&b.1.id))
    });
    scored
        .into_iter()
        .take(n)
        .map(|(sim, chunk)| ChunkHit {
            chunk: chunk.clone(),
            distance: 1.0 - sim,
        })
        .collect()
}

// ============ SQLite ============

pub struct SqliteVectorStore {
    pool: SqlitePool,
    path: PathBuf,
    collection: String,
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl SqliteVectorStore {
    pub async fn open(
        persist_dir: &Path,
        collection: &str,
        provider: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
    ) -> Result<Self> {
        let path = persist_dir.join(INDEX_FILE);
        let pool = db::open_index(&path).await?;
        migrate::run_migrations(&pool).await?;
        let store = Self {
            pool,
            path,
            collection: collection.to_string(),
            provider,
            batch_size,
        };
        store.ensure_collection().await?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure_collection(&self) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO index_collections (name, metric, created_at) VALUES (?, 'cosine', ?)",
        )
        .bind(&self.collection)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(index_err)?;
        Ok(())
    }

    async fn existing_id(&self, chunks: &[IndexChunk]) -> Result<Option<String>> {
        for batch in chunks.chunks(400) {
            let placeholders = vec!["?"; batch.len()].join(", ");
            let sql = format!(
                "SELECT id FROM index_chunks WHERE collection = ? AND id IN ({}) LIMIT 1",
                placeholders
            );
            let mut query = sqlx::query_scalar::<_, String>(&sql).bind(&self.collection);
            for chunk in batch {
                query = query.bind(&chunk.id);
            }
            if let Some(id) = query.fetch_optional(&self.pool).await.map_err(index_err)? {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    fn row_to_chunk(row: &SqliteRow) -> Result<IndexChunk> {
        Ok(IndexChunk {
            id: row.try_get("id").map_err(index_err)?,
            doc_id: row.try_get("doc_id").map_err(index_err)?,
            ordinal: row.try_get::<i64, _>("ordinal").map_err(index_err)? as u32,
            total_chunks: row.try_get::<i64, _>("total_chunks").map_err(index_err)? as u32,
            text: row.try_get("text").map_err(index_err)?,
            title: row.try_get("title").map_err(index_err)?,
            authors: row.try_get("authors").map_err(index_err)?,
        })
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn collection_name(&self) -> &str {
        &self.collection
    }

    async fn add(&self, chunks: &[IndexChunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        if let Some(id) = duplicate_in_batch(chunks) {
            return Err(Error::DuplicateChunk(id.to_string()));
        }
        if let Some(id) = self.existing_id(chunks).await? {
            return Err(Error::DuplicateChunk(id));
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_batched(self.provider.as_ref(), &texts, self.batch_size)
            .await
            .map_err(embed_err)?;

        let mut tx = self.pool.begin().await.map_err(index_err)?;
        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            let result = sqlx::query(
                r#"
                INSERT INTO index_chunks
                    (collection, id, doc_id, ordinal, total_chunks, title, authors, text, dims, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&self.collection)
            .bind(&chunk.id)
            .bind(&chunk.doc_id)
            .bind(chunk.ordinal as i64)
            .bind(chunk.total_chunks as i64)
            .bind(&chunk.title)
            .bind(&chunk.authors)
            .bind(&chunk.text)
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await;

            if let Err(e) = result {
                let unique = e
                    .as_database_error()
                    .map(|d| d.is_unique_violation())
                    .unwrap_or(false);
                return Err(if unique {
                    Error::DuplicateChunk(chunk.id.clone())
                } else {
                    index_err(e)
                });
            }
        }
        tx.commit().await.map_err(index_err)?;
        Ok(())
    }

    async fn query(&self, text: &str, n: usize) -> Result<Vec<ChunkHit>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let query_vec = embed_query(self.provider.as_ref(), text)
            .await
            .map_err(embed_err)?;

        let rows = sqlx::query(
            r#"
            SELECT id, doc_id, ordinal, total_chunks, title, authors, text, embedding
            FROM index_chunks
            WHERE collection = ?
            "#,
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await
        .map_err(index_err)?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding").map_err(index_err)?;
            candidates.push((Self::row_to_chunk(row)?, blob_to_vec(&blob)));
        }
        Ok(rank(
            &query_vec,
            candidates.iter().map(|(c, v)| (c, v.as_slice())),
            n,
        ))
    }

    async fn chunks_for_document(&self, doc_id: &str) -> Result<Vec<IndexChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, doc_id, ordinal, total_chunks, title, authors, text
            FROM index_chunks
            WHERE collection = ? AND doc_id = ?
            ORDER BY rowid
            "#,
        )
        .bind(&self.collection)
        .bind(doc_id)
        .fetch_all(&self.pool)
        .await
        .map_err(index_err)?;
        rows.iter().map(Self::row_to_chunk).collect()
    }

    async fn delete_document(&self, doc_id: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM index_chunks WHERE collection = ? AND doc_id = ?")
            .bind(&self.collection)
            .bind(doc_id)
            .execute(&self.pool)
            .await
            .map_err(index_err)?;
        Ok(result.rows_affected() as usize)
    }

    async fn reset(&self) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(index_err)?;
        sqlx::query("DELETE FROM index_chunks WHERE collection = ?")
            .bind(&self.collection)
            .execute(&mut *tx)
            .await
            .map_err(index_err)?;
        sqlx::query("DELETE FROM index_collections WHERE name = ?")
            .bind(&self.collection)
            .execute(&mut *tx)
            .await
            .map_err(index_err)?;
        tx.commit().await.map_err(index_err)?;
        self.ensure_collection().await
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_chunks WHERE collection = ?")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await
            .map_err(index_err)?;
        Ok(n as usize)
    }
}

// ============ In-memory ============

pub struct InMemoryVectorStore {
    collection: String,
    provider: Arc<dyn EmbeddingProvider>,
    entries: RwLock<Vec<(IndexChunk, Vec<f32>)>>,
}

impl InMemoryVectorStore {
    pub fn new(collection: &str, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            collection: collection.to_string(),
            provider,
            entries: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn collection_name(&self) -> &str {
        &self.collection
    }

    async fn add(&self, chunks: &[IndexChunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        if let Some(id) = duplicate_in_batch(chunks) {
            return Err(Error::DuplicateChunk(id.to_string()));
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.provider.embed(&texts).await.map_err(embed_err)?;

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let existing: HashSet<&str> = entries.iter().map(|(c, _)| c.id.as_str()).collect();
        if let Some(dup) = chunks.iter().find(|c| existing.contains(c.id.as_str())) {
            return Err(Error::DuplicateChunk(dup.id.clone()));
        }
        drop(existing);
        entries.extend(chunks.iter().cloned().zip(vectors));
        Ok(())
    }

    async fn query(&self, text: &str, n: usize) -> Result<Vec<ChunkHit>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let query_vec = embed_query(self.provider.as_ref(), text)
            .await
            .map_err(embed_err)?;
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(rank(
            &query_vec,
            entries.iter().map(|(c, v)| (c, v.as_slice())),
            n,
        ))
    }

    async fn chunks_for_document(&self, doc_id: &str) -> Result<Vec<IndexChunk>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .iter()
            .filter(|(c, _)| c.doc_id == doc_id)
            .map(|(c, _)| c.clone())
            .collect())
    }

    async fn delete_document(&self, doc_id: &str) -> Result<usize> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|(c, _)| c.doc_id != doc_id);
        Ok(before - entries.len())
    }

    async fn reset(&self) -> Result<()> {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len())
    }
}
