//! Semantic index over scanned documents.
//!
//! The backing [`VectorStore`] is opened lazily on first use. A missing
//! dependency (embedding provider disabled or not compiled in, store that
//! cannot be opened) moves the manager into a failed state and every later
//! call returns the same [`Error::IndexUnavailable`] without retrying.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::chunk::{chunk_document, Chunker};
use crate::config::{EmbeddingConfig, IndexConfig};
use crate::embedding::create_provider;
use crate::error::{Error, Result};
use crate::models::{DocumentInfo, IndexChunk, SearchResult};
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter};
use crate::traits::VectorStore;
use crate::vector_store::SqliteVectorStore;

enum IndexState {
    Uninitialized,
    Ready(Arc<dyn VectorStore>),
    Failed { reason: String, remediation: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    /// Chunks stored in the configured collection.
    pub total_chunks: usize,
    /// Vector-store collection name (`[index].collection_name`).
    pub collection_name: String,
    /// Directory holding the index database.
    pub persist_dir: PathBuf,
}

/// Outcome of [`IndexManager::add_documents`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddReport {
    /// Documents whose chunks were stored.
    pub added: usize,
    /// Ids the store rejected for a reason other than duplication.
    pub failed: Vec<String>,
}

/// Chunking, embedding, and similarity search over [`DocumentInfo`]s.
///
/// The store is opened on the first call that needs it. Construction never
/// fails, so a session can start without a working embedding provider.
pub struct IndexManager {
    config: IndexConfig,
    embedding: EmbeddingConfig,
    chunker: Chunker,
    state: Mutex<IndexState>,
    progress: Arc<dyn ProgressReporter>,
}

impl IndexManager {
    /// Manager that opens a [`SqliteVectorStore`] under
    /// `config.persist_dir` on first use.
    ///
    /// # Arguments
    ///
    /// * `config` - Collection name, location, and chunking parameters.
    /// * `embedding` - Provider settings. A disabled provider makes every
    ///   later call fail with [`Error::IndexUnavailable`].
    pub fn new(config: IndexConfig, embedding: EmbeddingConfig) -> Self {
        Self {
            chunker: Chunker::from_config(&config),
            config,
            embedding,
            state: Mutex::new(IndexState::Uninitialized),
            progress: Arc::new(NoProgress),
        }
    }

    /// Manager over an already-open store.
    pub fn with_store(store: Arc<dyn VectorStore>, config: IndexConfig) -> Self {
        let mut config = config;
        config.collection_name = store.collection_name().to_string();
        Self {
            chunker: Chunker::from_config(&config),
            config,
            embedding: EmbeddingConfig::default(),
            state: Mutex::new(IndexState::Ready(store)),
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn collection_name(&self) -> &str {
        &self.config.collection_name
    }

    pub fn persist_dir(&self) -> &std::path::Path {
        &self.config.persist_dir
    }

    /// The store, opening it on first call.
    async fn store(&self) -> Result<Arc<dyn VectorStore>> {
        let mut state = self.state.lock().await;
        match &*state {
            IndexState::Ready(store) => return Ok(store.clone()),
            IndexState::Failed {
                reason,
                remediation,
            } => {
                return Err(Error::IndexUnavailable {
                    reason: reason.clone(),
                    remediation: remediation.clone(),
                })
            }
            IndexState::Uninitialized => {}
        }

        match self.open_store().await {
            Ok(store) => {
                info!(
                    collection = %self.config.collection_name,
                    persist_dir = %self.config.persist_dir.display(),
                    provider = %self.embedding.provider,
                    "vector index ready"
                );
                *state = IndexState::Ready(store.clone());
                Ok(store)
            }
            Err((reason, remediation)) => {
                warn!(reason = %reason, "vector index unavailable");
                *state = IndexState::Failed {
                    reason: reason.clone(),
                    remediation: remediation.clone(),
                };
                Err(Error::IndexUnavailable {
                    reason,
                    remediation,
                })
            }
        }
    }

    async fn open_store(&self) -> std::result::Result<Arc<dyn VectorStore>, (String, String)> {
        if !self.embedding.is_enabled() {
            return Err((
                "embedding provider is disabled".to_string(),
                "set [embedding].provider to \"openai\", \"ollama\" or \"local\"".to_string(),
            ));
        }
        let provider = create_provider(&self.embedding).map_err(|e| {
            (
                e.to_string(),
                "check the [embedding] section (model, dims, API key) and enabled features"
                    .to_string(),
            )
        })?;
        let store = SqliteVectorStore::open(
            &self.config.persist_dir,
            &self.config.collection_name,
            provider,
            self.embedding.batch_size,
        )
        .await
        .map_err(|e| {
            (
                e.to_string(),
                format!(
                    "make sure {} is writable",
                    self.config.persist_dir.display()
                ),
            )
        })?;
        Ok(Arc::new(store))
    }

    /// Chunk and insert documents.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexUnavailable`] when the store cannot be opened.
    /// Per-document store failures are not errors: they are logged and the
    /// document id is listed in [`AddReport::failed`] so callers can retry it.
    /// Documents with no text and documents whose chunks are already stored
    /// count as neither added nor failed.
    pub async fn add_documents(&self, docs: &[DocumentInfo]) -> Result<AddReport> {
        let store = self.store().await?;
        let total = docs.len() as u64;
        let mut report = AddReport::default();

        for (i, doc) in docs.iter().enumerate() {
            let chunks = chunk_document(doc, &self.chunker, self.config.content_prefix_chars);
            if chunks.is_empty() {
                debug!(id = %doc.id, "no text to index");
            } else {
                match store.add(&chunks).await {
                    Ok(()) => {
                        report.added += 1;
                        debug!(id = %doc.id, chunks = chunks.len(), "document indexed");
                    }
                    Err(Error::DuplicateChunk(chunk)) => {
                        debug!(id = %doc.id, chunk = %chunk, "document already indexed");
                    }
                    Err(e) => {
                        warn!(id = %doc.id, error = %e, "document not indexed");
                        report.failed.push(doc.id.clone());
                    }
                }
            }
            self.progress.report(ProgressEvent::Indexing {
                n: (i + 1) as u64,
                total,
            });
        }

        info!(
            requested = docs.len(),
            added = report.added,
            failed = report.failed.len(),
            "documents indexed"
        );
        Ok(report)
    }

    /// Top `n` chunks for `query`, most similar first. `score` is
    /// `1 - distance`.
    ///
    /// # Errors
    ///
    /// [`Error::IndexUnavailable`] when the store cannot be opened. Failures
    /// of the query itself are logged and yield an empty list.
    pub async fn search(&self, query: &str, n: usize) -> Result<Vec<SearchResult>> {
        let store = self.store().await?;
        let hits = match store.query(query, n).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(query, error = %e, "index query failed");
                return Ok(Vec::new());
            }
        };
        Ok(hits
            .into_iter()
            .map(|hit| SearchResult {
                doc_id: hit.chunk.doc_id.clone(),
                title: hit.chunk.title.clone(),
                score: 1.0 - hit.distance,
                snippet: snippet(&hit.chunk.text, self.config.snippet_chars),
                metadata: hit.chunk.metadata(),
            })
            .collect())
    }

    /// A document's chunks ordered by ordinal.
    pub async fn get_document_chunks(&self, doc_id: &str) -> Result<Vec<IndexChunk>> {
        let mut chunks = self.store().await?.chunks_for_document(doc_id).await?;
        chunks.sort_by_key(|c| c.ordinal);
        Ok(chunks)
    }

    /// Remove a document's chunks. True if anything was removed.
    pub async fn delete_document(&self, doc_id: &str) -> Result<bool> {
        Ok(self.store().await?.delete_document(doc_id).await? > 0)
    }

    /// Drop and recreate the logical collection.
    pub async fn clear(&self) -> Result<()> {
        self.store().await?.reset().await?;
        info!(collection = %self.config.collection_name, "index cleared");
        Ok(())
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let total_chunks = self.store().await?.count().await?;
        Ok(IndexStats {
            total_chunks,
            collection_name: self.config.collection_name.clone(),
            persist_dir: self.config.persist_dir.clone(),
        })
    }
}

fn snippet(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
