use sqlx::SqlitePool;

use crate::error::{Error, Result};

/// Create the vector index schema. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Logical collections
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_collections (
            name TEXT PRIMARY KEY,
            metric TEXT NOT NULL DEFAULT 'cosine',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(index_err)?;

    // Chunks with their embeddings
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_chunks (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            doc_id TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            total_chunks INTEGER NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            authors TEXT NOT NULL DEFAULT '',
            text TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            PRIMARY KEY (collection, id)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(index_err)?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_index_chunks_doc ON index_chunks(collection, doc_id)",
    )
    .execute(pool)
    .await
    .map_err(index_err)?;

    Ok(())
}

pub(crate) fn index_err(e: sqlx::Error) -> Error {
    Error::Index(e.to_string())
}
