//! Document scanner.
//!
//! Turns collection items into [`DocumentInfo`] records and keeps them in a
//! session-wide cache keyed by document id. The cache grows additively
//! across scans and ad-hoc searches; only [`DocumentScanner::clear`] empties it.
//!
//! PDF text is loaded lazily. [`DocumentScanner::load_pdf_content`] is
//! idempotent and serialized per document, so a file is extracted at most
//! once no matter how many callers race on it.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::collection::CollectionManager;
use crate::error::{Error, Result};
use crate::models::{Collection, DocumentInfo, Item};
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter};
use crate::traits::TextExtractor;

/// Result of scanning one collection.
#[derive(Debug, Clone)]
pub struct CollectionScan {
    pub collection: Collection,
    pub documents: Vec<DocumentInfo>,
}

/// Criteria for [`DocumentScanner::filter_documents`]. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    pub has_pdf: Option<bool>,
    pub pdf_loaded: Option<bool>,
    /// Any tag matches (case-insensitive).
    pub tags: Vec<String>,
    /// Every keyword must appear in title, abstract, or authors.
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanStatistics {
    pub total_documents: usize,
    pub with_pdf: usize,
    pub pdf_loaded: usize,
    pub total_pages: u64,
    pub unique_tags: usize,
}

pub struct DocumentScanner {
    collections: Arc<CollectionManager>,
    extractor: Arc<dyn TextExtractor>,
    progress: Arc<dyn ProgressReporter>,
    documents: RwLock<HashMap<String, DocumentInfo>>,
    load_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DocumentScanner {
    pub fn new(collections: Arc<CollectionManager>, extractor: Arc<dyn TextExtractor>) -> Self {
        Self {
            collections,
            extractor,
            progress: Arc::new(NoProgress),
            documents: RwLock::new(HashMap::new()),
            load_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn collections(&self) -> &CollectionManager {
        &self.collections
    }

    /// Scan a collection by name, register its documents, and optionally
    /// extract their PDF text before returning.
    pub async fn scan_collection(
        &self,
        name: &str,
        recursive: bool,
        load_pdf: bool,
    ) -> Result<CollectionScan> {
        let collection = self
            .collections
            .resolve_by_name(name)
            .await?
            .ok_or_else(|| Error::not_found("collection", name))?;
        let items = self
            .collections
            .get_collection_items(&collection.name, recursive, false)
            .await?;

        let docs = self.documents_from_items(&items);
        self.progress.report(ProgressEvent::Scanning {
            collection: collection.name.clone(),
            n: docs.len() as u64,
            total: items.len() as u64,
        });

        let ids: Vec<String> = docs.iter().map(|d| d.id.clone()).collect();
        self.add_documents(docs);

        if load_pdf {
            let pending: Vec<String> = self
                .get_documents(&ids)
                .into_iter()
                .filter(|d| d.pdf_path.is_some() && !d.pdf_loaded)
                .map(|d| d.id)
                .collect();
            self.load_many(&pending).await;
        }

        let documents = self.get_documents(&ids);
        info!(
            collection = %collection.name,
            recursive,
            documents = documents.len(),
            with_pdf = documents.iter().filter(|d| d.has_pdf).count(),
            loaded = documents.iter().filter(|d| d.pdf_loaded).count(),
            "collection scanned"
        );
        Ok(CollectionScan {
            collection,
            documents,
        })
    }

    /// Build documents for items. The representative PDF is the first PDF
    /// attachment, in listed order, whose path resolved to an existing file.
    pub fn documents_from_items(&self, items: &[Item]) -> Vec<DocumentInfo> {
        items
            .iter()
            .map(|item| {
                let representative = item
                    .pdf_attachments()
                    .find(|a| a.resolved_path.is_some());
                DocumentInfo::from_item(item, representative)
            })
            .collect()
    }

    /// Merge documents into the cache. Text already extracted for an id is
    /// kept when the incoming record has none.
    pub fn add_documents(&self, docs: Vec<DocumentInfo>) {
        let mut cache = self.documents.write().unwrap_or_else(|e| e.into_inner());
        for mut doc in docs {
            if let Some(existing) = cache.get(&doc.id) {
                if existing.pdf_loaded && !doc.pdf_loaded {
                    doc.pdf_content = existing.pdf_content.clone();
                    doc.pdf_pages = existing.pdf_pages;
                    doc.pdf_loaded = true;
                    doc.has_pdf = true;
                    if doc.pdf_path.is_none() {
                        doc.pdf_path = existing.pdf_path.clone();
                    }
                }
            }
            cache.insert(doc.id.clone(), doc);
        }
    }

    pub fn get_document(&self, id: &str) -> Option<DocumentInfo> {
        self.documents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    /// Documents for `ids` in the given order; unknown ids are skipped.
    pub fn get_documents(&self, ids: &[String]) -> Vec<DocumentInfo> {
        let cache = self.documents.read().unwrap_or_else(|e| e.into_inner());
        ids.iter().filter_map(|id| cache.get(id).cloned()).collect()
    }

    /// Every cached document, ordered by title then id.
    pub fn documents(&self) -> Vec<DocumentInfo> {
        let mut docs: Vec<DocumentInfo> = self
            .documents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        docs.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.id.cmp(&b.id)));
        docs
    }

    pub fn len(&self) -> usize {
        self.documents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn load_lock(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.load_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(id.to_string())
            .or_default()
            .clone()
    }

    /// Extract PDF text for a cached document.
    ///
    /// Returns `Ok(true)` once the text is loaded (now or earlier) and
    /// `Ok(false)` when no PDF could be found or extraction failed. When the
    /// document has no usable path, attachments are re-queried and re-resolved
    /// first. Unknown ids are [`Error::NotFound`].
    pub async fn load_pdf_content(&self, id: &str) -> Result<bool> {
        let lock = self.load_lock(id);
        let _guard = lock.lock().await;

        let doc = self
            .get_document(id)
            .ok_or_else(|| Error::not_found("document", id))?;
        if doc.pdf_loaded {
            return Ok(true);
        }

        let path = match doc.pdf_path.clone().filter(|p| p.is_file()) {
            Some(path) => path,
            None => match self.recover_pdf_path(&doc).await {
                Some(path) => path,
                None => {
                    debug!(id, "no resolvable PDF");
                    return Ok(false);
                }
            },
        };

        match self.extractor.extract(&path).await {
            Ok(extracted) => {
                self.update(id, |d| {
                    d.pdf_path = Some(path.clone());
                    d.pdf_content = Some(extracted.text);
                    d.pdf_pages = extracted.pages;
                    d.pdf_loaded = true;
                    d.has_pdf = true;
                });
                debug!(id, pages = extracted.pages, "PDF loaded");
                Ok(true)
            }
            Err(e) => {
                warn!(id, path = %path.display(), error = %e, "PDF extraction failed");
                Ok(false)
            }
        }
    }

    /// Re-query the item's attachments and record the first resolvable PDF.
    async fn recover_pdf_path(&self, doc: &DocumentInfo) -> Option<PathBuf> {
        let attachments = match self
            .collections
            .client()
            .item_attachments(&doc.item_key)
            .await
        {
            Ok(attachments) => attachments,
            Err(e) => {
                warn!(item = %doc.item_key, error = %e, "attachment lookup failed");
                return None;
            }
        };
        let path = attachments
            .into_iter()
            .filter(|a| a.is_pdf())
            .find_map(|a| a.resolved_path)?;
        self.update(&doc.id, |d| {
            d.pdf_path = Some(path.clone());
            d.has_pdf = true;
        });
        Some(path)
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut DocumentInfo)) {
        let mut cache = self.documents.write().unwrap_or_else(|e| e.into_inner());
        if let Some(doc) = cache.get_mut(id) {
            f(doc);
        }
    }

    async fn load_many(&self, ids: &[String]) -> usize {
        let total = ids.len() as u64;
        let mut loaded = 0;
        for (i, id) in ids.iter().enumerate() {
            match self.load_pdf_content(id).await {
                Ok(true) => loaded += 1,
                Ok(false) => {}
                Err(e) => warn!(id = %id, error = %e, "PDF load skipped"),
            }
            self.progress.report(ProgressEvent::Loading {
                n: (i + 1) as u64,
                total,
            });
        }
        loaded
    }

    /// Load every cached document that has a PDF but no text yet.
    /// Returns the number loaded by this call.
    pub async fn load_all_pdf_contents(&self) -> usize {
        let pending: Vec<String> = self
            .documents()
            .into_iter()
            .filter(|d| d.has_pdf && !d.pdf_loaded)
            .map(|d| d.id)
            .collect();
        self.load_many(&pending).await
    }

    pub fn filter_documents(&self, filter: &DocumentFilter) -> Vec<DocumentInfo> {
        let tags: Vec<String> = filter.tags.iter().map(|t| t.to_lowercase()).collect();
        let keywords: Vec<String> = filter.keywords.iter().map(|k| k.to_lowercase()).collect();
        self.documents()
            .into_iter()
            .filter(|d| filter.has_pdf.map_or(true, |v| d.has_pdf == v))
            .filter(|d| filter.pdf_loaded.map_or(true, |v| d.pdf_loaded == v))
            .filter(|d| {
                tags.is_empty()
                    || d.tags
                        .iter()
                        .any(|t| tags.contains(&t.to_lowercase()))
            })
            .filter(|d| {
                if keywords.is_empty() {
                    return true;
                }
                let haystack = searchable_text(d);
                keywords.iter().all(|k| haystack.contains(k.as_str()))
            })
            .collect()
    }

    /// Cached documents whose title, abstract, or authors contain `query`.
    pub fn search_cached(&self, query: &str) -> Vec<DocumentInfo> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.documents()
            .into_iter()
            .filter(|d| searchable_text(d).contains(&needle))
            .collect()
    }

    pub fn statistics(&self) -> ScanStatistics {
        let cache = self.documents.read().unwrap_or_else(|e| e.into_inner());
        let mut tags = HashSet::new();
        let mut stats = ScanStatistics {
            total_documents: cache.len(),
            ..Default::default()
        };
        for doc in cache.values() {
            if doc.has_pdf {
                stats.with_pdf += 1;
            }
            if doc.pdf_loaded {
                stats.pdf_loaded += 1;
                stats.total_pages += u64::from(doc.pdf_pages);
            }
            tags.extend(doc.tags.iter().cloned());
        }
        stats.unique_tags = tags.len();
        stats
    }

    pub fn clear(&self) {
        self.documents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.load_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

fn searchable_text(doc: &DocumentInfo) -> String {
    format!(
        "{} {} {}",
        doc.title,
        doc.abstract_note.as_deref().unwrap_or(""),
        doc.authors
    )
    .to_lowercase()
}
