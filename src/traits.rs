//! Trait seams between the session and its collaborators.
//!
//! - [`LibrarySource`] is implemented by the local replica reader
//!   ([`crate::connector_local::LocalLibrary`]) and the web API reader
//!   ([`crate::connector_remote::RemoteLibrary`]).
//! - [`TextExtractor`] turns a file into plain text and a page count.
//! - [`VectorStore`] stores chunk records and answers similarity queries.
//!
//! All three are object safe and used behind `Arc<dyn ...>` so tests can
//! inject fakes.

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;
use crate::models::{Attachment, Collection, IndexChunk, Item};

/// A read-only view of a reference library.
///
/// Implementations report infrastructure failures as
/// [`crate::Error::SourceUnavailable`]; an empty result is `Ok(vec![])`.
#[async_trait]
pub trait LibrarySource: Send + Sync {
    /// Short name used in logs and `zidx sources` (e.g. `"local"`).
    fn name(&self) -> &str;

    async fn list_collections(&self) -> Result<Vec<Collection>>;

    /// Top-level items directly in a collection, attachments included.
    async fn collection_items(&self, collection_key: &str) -> Result<Vec<Item>>;

    /// Keyword search over titles and abstracts, paged after ranking.
    async fn search_items(&self, query: &str, limit: usize, offset: usize) -> Result<Vec<Item>>;

    async fn item_attachments(&self, item_key: &str) -> Result<Vec<Attachment>>;

    /// Cheap query used for health reporting.
    async fn health_check(&self) -> Result<()> {
        self.list_collections().await.map(|_| ())
    }
}

/// Extracted text and page count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub text: String,
    pub pages: u32,
}

/// Text extraction for attachment files.
///
/// Fails with [`crate::Error::Extraction`] on unreadable or unsupported files.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<ExtractedText>;
}

/// A stored chunk together with its cosine distance to a query.
#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub chunk: IndexChunk,
    pub distance: f32,
}

/// A named logical collection of embedded chunks.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn collection_name(&self) -> &str;

    /// Embed and insert chunks. Fails with [`crate::Error::DuplicateChunk`]
    /// if any id is already stored; nothing is inserted in that case.
    async fn add(&self, chunks: &[IndexChunk]) -> Result<()>;

    /// Nearest chunks to `text`, closest first.
    async fn query(&self, text: &str, n: usize) -> Result<Vec<ChunkHit>>;

    /// Chunks belonging to one document, in storage order.
    async fn chunks_for_document(&self, doc_id: &str) -> Result<Vec<IndexChunk>>;

    /// Remove a document's chunks. Returns the number removed.
    async fn delete_document(&self, doc_id: &str) -> Result<usize>;

    /// Drop and recreate the logical collection.
    async fn reset(&self) -> Result<()>;

    async fn count(&self) -> Result<usize>;
}
