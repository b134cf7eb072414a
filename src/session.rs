//! Session coordinator.
//!
//! A [`Session`] owns the collection manager, document scanner, and index
//! manager for one process, plus the small amount of mutable state that ties
//! them together:
//!
//! - the current collection and its document ids (replaced by every scan),
//! - the set of document ids already in the index and the collection they
//!   were indexed for,
//! - a short-lived cache of search results, guarded by a generation counter
//!   so a query that overlaps indexing or a scan never caches what it saw.
//!
//! All of it sits behind one `tokio::sync::Mutex`. Searches plan incremental
//! indexing under the lock, reserve the ids, and then embed outside it, so two
//! concurrent searches never index the same document twice.
//!
//! State survives restarts through a JSON snapshot written on
//! [`Session::shutdown`] and restored by [`Session::open`]. Extracted PDF
//! text travels with the snapshot, so a `load` in one process is visible to a
//! `search` in the next.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::LibraryClient;
use crate::collection::CollectionManager;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::extract::PdfExtractor;
use crate::index::IndexManager;
use crate::models::{Collection, DocumentInfo, SearchResult};
use crate::progress::{NoProgress, ProgressReporter};
use crate::scanner::DocumentScanner;
use crate::traits::TextExtractor;

/// Collaborators a session is assembled from. Tests swap in fakes.
pub struct Components {
    /// Library access with local-first fallback.
    pub client: LibraryClient,
    /// PDF text extraction used by the scanner.
    pub extractor: Arc<dyn TextExtractor>,
    /// Lazily opened vector index.
    pub index: IndexManager,
    /// Receives scan, load, and indexing progress.
    pub progress: Arc<dyn ProgressReporter>,
}

impl Components {
    /// Production collaborators for `config`.
    ///
    /// # Errors
    ///
    /// Fails when the remote source is enabled but misconfigured (see
    /// [`LibraryClient::from_config`]).
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            client: LibraryClient::from_config(config)?,
            extractor: Arc::new(PdfExtractor),
            index: IndexManager::new(config.index.clone(), config.embedding.clone()),
            progress: Arc::new(NoProgress),
        })
    }
}

/// On-disk session state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// Current library collection.
    pub collection_name: Option<String>,
    /// Library collection the vector index was built for. Differs from
    /// `collection_name` after a scan that was never searched.
    #[serde(default)]
    pub indexed_collection_name: Option<String>,
    /// Vector-store collection the indexed ids belong to.
    pub index_collection_name: String,
    #[serde(default)]
    pub indexed_doc_ids: Vec<String>,
    /// The current collection's documents, extracted text included.
    #[serde(default)]
    pub documents: Vec<DocumentInfo>,
    /// Documents registered by keyword search that are not in the current
    /// collection.
    #[serde(default)]
    pub library_documents: Vec<DocumentInfo>,
}

type CacheKey = (Option<String>, usize, String);

#[derive(Default)]
struct SessionState {
    collection_name: Option<String>,
    indexed_collection: Option<String>,
    indexed_ids: HashSet<String>,
    current_ids: Vec<String>,
    library_ids: HashSet<String>,
    cache: HashMap<CacheKey, (Instant, Vec<SearchResult>)>,
    /// Bumped whenever cached results may be stale: after indexing, reset,
    /// and every scan.
    generation: u64,
}

impl SessionState {
    fn invalidate_results(&mut self) {
        self.generation += 1;
        self.cache.clear();
    }
}

/// Indexing work decided under the state lock.
enum IndexPlan {
    Nothing,
    Rebuild { ids: Vec<String> },
    Add { ids: Vec<String> },
}

/// Shared state for one process: the current collection, its documents,
/// and the incremental index built over them.
///
/// Every method takes `&self`; share a session across tasks with `Arc`.
pub struct Session {
    collections: Arc<CollectionManager>,
    scanner: DocumentScanner,
    index: IndexManager,
    state: Mutex<SessionState>,
    snapshot_path: PathBuf,
    cache_ttl: Duration,
}

impl Session {
    /// Build a session from config and restore the last snapshot.
    ///
    /// # Errors
    ///
    /// Only collaborator construction can fail. A missing or corrupt
    /// snapshot is logged and the session starts empty.
    pub async fn open(config: &Config) -> Result<Self> {
        let components = Components::from_config(config)?;
        Ok(Self::open_with(config, components).await)
    }

    /// Like [`Session::open`] with caller-supplied collaborators.
    pub async fn open_with(config: &Config, components: Components) -> Self {
        let collections = Arc::new(CollectionManager::new(components.client));
        let scanner = DocumentScanner::new(collections.clone(), components.extractor)
            .with_progress(components.progress.clone());
        let index = components.index.with_progress(components.progress);

        let session = Self {
            collections,
            scanner,
            index,
            state: Mutex::new(SessionState::default()),
            snapshot_path: config.session.snapshot_path.clone(),
            cache_ttl: Duration::from_secs(config.session.cache_ttl_secs),
        };

        match load_snapshot(&session.snapshot_path).await {
            Ok(Some(snapshot)) => session.restore(snapshot).await,
            Ok(None) => debug!(path = %session.snapshot_path.display(), "no session snapshot"),
            Err(e) => warn!(
                path = %session.snapshot_path.display(),
                error = %e,
                "session snapshot unreadable, starting empty"
            ),
        }
        session
    }

    async fn restore(&self, snapshot: Snapshot) {
        let ids: Vec<String> = snapshot.documents.iter().map(|d| d.id.clone()).collect();
        let library_ids: HashSet<String> = snapshot
            .library_documents
            .iter()
            .map(|d| d.id.clone())
            .collect();
        self.scanner.add_documents(snapshot.documents);
        self.scanner.add_documents(snapshot.library_documents);

        let mut state = self.state.lock().await;
        state.current_ids = ids;
        state.library_ids = library_ids;
        state.collection_name = snapshot.collection_name;
        if snapshot.index_collection_name == self.index.collection_name() {
            state.indexed_collection = snapshot.indexed_collection_name;
            state.indexed_ids = snapshot.indexed_doc_ids.into_iter().collect();
        } else {
            info!(
                previous = %snapshot.index_collection_name,
                current = %self.index.collection_name(),
                "index collection changed, indexed ids discarded"
            );
        }
        info!(
            collection = state.collection_name.as_deref().unwrap_or("-"),
            documents = state.current_ids.len(),
            indexed = state.indexed_ids.len(),
            "session restored"
        );
    }

    /// Save the snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] or [`Error::Snapshot`] when the file cannot be
    /// written. The previous snapshot is left intact in that case.
    pub async fn shutdown(&self) -> Result<()> {
        let snapshot = {
            let state = self.state.lock().await;
            let mut indexed: Vec<String> = state.indexed_ids.iter().cloned().collect();
            indexed.sort();
            let current: HashSet<&String> = state.current_ids.iter().collect();
            let mut library_ids: Vec<String> = state
                .library_ids
                .iter()
                .filter(|id| !current.contains(id))
                .cloned()
                .collect();
            library_ids.sort();
            Snapshot {
                collection_name: state.collection_name.clone(),
                indexed_collection_name: state.indexed_collection.clone(),
                index_collection_name: self.index.collection_name().to_string(),
                indexed_doc_ids: indexed,
                documents: self.scanner.get_documents(&state.current_ids),
                library_documents: self.scanner.get_documents(&library_ids),
            }
        };
        save_snapshot(&self.snapshot_path, &snapshot).await?;
        debug!(path = %self.snapshot_path.display(), documents = snapshot.documents.len(), "session saved");
        Ok(())
    }

    pub fn collections(&self) -> &CollectionManager {
        &self.collections
    }

    pub fn scanner(&self) -> &DocumentScanner {
        &self.scanner
    }

    pub fn index(&self) -> &IndexManager {
        &self.index
    }

    pub async fn current_collection(&self) -> Option<String> {
        self.state.lock().await.collection_name.clone()
    }

    pub async fn indexed_ids(&self) -> HashSet<String> {
        self.state.lock().await.indexed_ids.clone()
    }

    /// Scan a collection and make it the current document set.
    ///
    /// # Arguments
    ///
    /// * `collection_name` - Resolved exactly, then case-insensitively, then
    ///   as a substring.
    /// * `recursive` - Include items filed in subcollections.
    /// * `load_pdf` - Extract PDF text during the scan instead of on demand.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown collection name, or
    /// [`Error::SourceUnavailable`] when no library source answers.
    pub async fn scan(
        &self,
        collection_name: &str,
        recursive: bool,
        load_pdf: bool,
    ) -> Result<Vec<DocumentInfo>> {
        let scan = self
            .scanner
            .scan_collection(collection_name, recursive, load_pdf)
            .await?;
        let mut state = self.state.lock().await;
        state.collection_name = Some(scan.collection.name.clone());
        state.current_ids = scan.documents.iter().map(|d| d.id.clone()).collect();
        state.invalidate_results();
        Ok(scan.documents)
    }

    pub fn get_document(&self, id: &str) -> Option<DocumentInfo> {
        self.scanner.get_document(id)
    }

    /// Extract a document's PDF text unless it is already loaded. `Ok(false)`
    /// when no PDF resolves or extraction fails.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when `id` was never scanned or registered.
    pub async fn ensure_pdf_loaded(&self, id: &str) -> Result<bool> {
        self.scanner.load_pdf_content(id).await
    }

    pub async fn current_documents(&self) -> Vec<DocumentInfo> {
        let state = self.state.lock().await;
        self.scanner.get_documents(&state.current_ids)
    }

    /// Semantic search over the current collection, indexing whatever it
    /// is missing first.
    ///
    /// # Arguments
    ///
    /// * `query` - Free text, embedded with the configured provider.
    /// * `n` - Maximum number of chunk hits.
    ///
    /// # Errors
    ///
    /// [`Error::IndexUnavailable`] when the index cannot be opened. Ids
    /// reserved for indexing are released so the next search retries them.
    pub async fn search(&self, query: &str, n: usize) -> Result<Vec<SearchResult>> {
        let (key, plan) = {
            let mut state = self.state.lock().await;
            let key: CacheKey = (state.collection_name.clone(), n, query.to_string());
            if let Some(results) = self.cached(&mut state, &key) {
                debug!(query, "search served from cache");
                return Ok(results);
            }
            (key, plan_indexing(&mut state))
        };

        if !matches!(plan, IndexPlan::Nothing) {
            let outcome = self.run_plan(&plan).await;
            let mut state = self.state.lock().await;
            state.invalidate_results();
            match outcome {
                Ok(failed) => {
                    for id in &failed {
                        state.indexed_ids.remove(id);
                    }
                }
                Err(e) => {
                    match &plan {
                        IndexPlan::Rebuild { .. } => {
                            state.indexed_collection = None;
                            state.indexed_ids.clear();
                        }
                        IndexPlan::Add { ids } => {
                            for id in ids {
                                state.indexed_ids.remove(id);
                            }
                        }
                        IndexPlan::Nothing => {}
                    }
                    return Err(e);
                }
            }
        }

        let generation = self.state.lock().await.generation;
        let results = self.index.search(query, n).await?;
        let mut state = self.state.lock().await;
        if !self.cache_ttl.is_zero() && state.generation == generation {
            state.cache.insert(key, (Instant::now(), results.clone()));
        }
        Ok(results)
    }

    fn cached(&self, state: &mut SessionState, key: &CacheKey) -> Option<Vec<SearchResult>> {
        let ttl = self.cache_ttl;
        state.cache.retain(|_, (at, _)| at.elapsed() < ttl);
        state.cache.get(key).map(|(_, results)| results.clone())
    }

    /// Index the planned documents. Returns the ids the store rejected.
    async fn run_plan(&self, plan: &IndexPlan) -> Result<Vec<String>> {
        match plan {
            IndexPlan::Nothing => Ok(Vec::new()),
            IndexPlan::Rebuild { ids } => {
                self.index.clear().await?;
                let docs = self.scanner.get_documents(ids);
                let report = self.index.add_documents(&docs).await?;
                info!(documents = docs.len(), added = report.added, "index rebuilt");
                Ok(report.failed)
            }
            IndexPlan::Add { ids } => {
                let docs = self.scanner.get_documents(ids);
                let report = self.index.add_documents(&docs).await?;
                info!(new = docs.len(), added = report.added, "index updated");
                Ok(report.failed)
            }
        }
    }

    /// Keyword search over the whole library. Hits are registered with the
    /// scanner so they can be fetched and loaded by id.
    pub async fn search_library(
        &self,
        query: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DocumentInfo>> {
        let items = self.collections.search_items(query, limit, offset).await?;
        let docs = self.scanner.documents_from_items(&items);
        self.scanner.add_documents(docs.clone());
        let mut state = self.state.lock().await;
        state.library_ids.extend(docs.iter().map(|d| d.id.clone()));
        Ok(docs)
    }

    pub async fn list_collections(&self, refresh: bool) -> Result<Vec<Collection>> {
        if refresh {
            self.collections.refresh_cache();
        }
        self.collections.get_all_collections(!refresh).await
    }

    /// Empty the index and forget which documents it held.
    pub async fn reset_index(&self) -> Result<()> {
        self.index.clear().await?;
        let mut state = self.state.lock().await;
        state.indexed_ids.clear();
        state.indexed_collection = None;
        state.invalidate_results();
        Ok(())
    }
}

/// Decide what to index and reserve the ids. Called with the lock held.
fn plan_indexing(state: &mut SessionState) -> IndexPlan {
    let Some(current) = state.collection_name.clone() else {
        return IndexPlan::Nothing;
    };

    if state.indexed_collection.as_deref() != Some(current.as_str()) {
        let ids = state.current_ids.clone();
        state.indexed_ids = ids.iter().cloned().collect();
        state.indexed_collection = Some(current);
        return IndexPlan::Rebuild { ids };
    }

    let new_ids: Vec<String> = state
        .current_ids
        .iter()
        .filter(|id| !state.indexed_ids.contains(*id))
        .cloned()
        .collect();
    if new_ids.is_empty() {
        return IndexPlan::Nothing;
    }
    state.indexed_ids.extend(new_ids.iter().cloned());
    IndexPlan::Add { ids: new_ids }
}

/// Read a snapshot. `Ok(None)` when the file does not exist.
pub async fn load_snapshot(path: &Path) -> Result<Option<Snapshot>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| Error::Snapshot(format!("{}: {}", path.display(), e)))
}

/// Write a snapshot through a temp file and rename.
pub async fn save_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec_pretty(snapshot)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::Snapshot(format!("rename to {}: {}", path.display(), e)))
}
