//! Collection tree cache, name resolution, and recursive item expansion.
//!
//! The collection list and per-(collection, recursive) item lists are cached
//! for the life of the manager and only dropped by [`CollectionManager::refresh_cache`].
//! Staleness against the underlying library is accepted.

use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::RwLock;
use tracing::debug;

use crate::client::LibraryClient;
use crate::error::{Error, Result};
use crate::models::{Collection, Item};

/// A collection with its children, for display.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionNode {
    pub collection: Collection,
    pub children: Vec<CollectionNode>,
}

pub struct CollectionManager {
    client: LibraryClient,
    collections: RwLock<Option<Vec<Collection>>>,
    items: RwLock<HashMap<(String, bool), Vec<Item>>>,
}

/// Three-tier name match: exact, then case-insensitive exact, then
/// case-insensitive substring. The first collection in listing order wins
/// within a tier.
pub fn match_collection_name<'a>(collections: &'a [Collection], name: &str) -> Option<&'a Collection> {
    if let Some(c) = collections.iter().find(|c| c.name == name) {
        return Some(c);
    }
    let needle = name.to_lowercase();
    if let Some(c) = collections.iter().find(|c| c.name.to_lowercase() == needle) {
        return Some(c);
    }
    collections
        .iter()
        .find(|c| c.name.to_lowercase().contains(&needle))
}

impl CollectionManager {
    pub fn new(client: LibraryClient) -> Self {
        Self {
            client,
            collections: RwLock::new(None),
            items: RwLock::new(HashMap::new()),
        }
    }

    pub fn client(&self) -> &LibraryClient {
        &self.client
    }

    pub fn refresh_cache(&self) {
        *self.collections.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.items
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub async fn get_all_collections(&self, use_cache: bool) -> Result<Vec<Collection>> {
        if use_cache {
            let cached = self.collections.read().unwrap_or_else(|e| e.into_inner());
            if let Some(list) = cached.as_ref() {
                return Ok(list.clone());
            }
        }
        let list = self.client.list_collections().await?;
        *self.collections.write().unwrap_or_else(|e| e.into_inner()) = Some(list.clone());
        Ok(list)
    }

    pub async fn resolve_by_name(&self, name: &str) -> Result<Option<Collection>> {
        let collections = self.get_all_collections(true).await?;
        Ok(match_collection_name(&collections, name).cloned())
    }

    /// All descendants of `key`, breadth first.
    pub async fn descendants(&self, key: &str) -> Result<Vec<Collection>> {
        let collections = self.get_all_collections(true).await?;
        let mut children: HashMap<&str, Vec<&Collection>> = HashMap::new();
        for c in &collections {
            if let Some(parent) = c.parent_key.as_deref() {
                children.entry(parent).or_default().push(c);
            }
        }

        let mut out = Vec::new();
        let mut visited: HashSet<&str> = HashSet::from([key]);
        let mut queue: VecDeque<&str> = VecDeque::from([key]);
        while let Some(current) = queue.pop_front() {
            for child in children.get(current).into_iter().flatten() {
                if visited.insert(child.key.as_str()) {
                    queue.push_back(child.key.as_str());
                    out.push((*child).clone());
                }
            }
        }
        Ok(out)
    }

    /// Items of the named collection, optionally including every descendant
    /// collection, deduplicated by item key (first occurrence kept).
    /// `pdf_only` keeps items with at least one resolvable PDF.
    pub async fn get_collection_items(
        &self,
        name: &str,
        recursive: bool,
        pdf_only: bool,
    ) -> Result<Vec<Item>> {
        let collection = self
            .resolve_by_name(name)
            .await?
            .ok_or_else(|| Error::not_found("collection", name))?;

        let cache_key = (collection.key.clone(), recursive);
        let cached = self
            .items
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&cache_key)
            .cloned();

        let items = match cached {
            Some(items) => items,
            None => {
                let mut items = self.client.collection_items(&collection.key).await?;
                if recursive {
                    for sub in self.descendants(&collection.key).await? {
                        items.extend(self.client.collection_items(&sub.key).await?);
                    }
                    let mut seen = HashSet::new();
                    items.retain(|item| seen.insert(item.key.clone()));
                }
                debug!(collection = %collection.name, recursive, items = items.len(), "collection items fetched");
                self.items
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(cache_key, items.clone());
                items
            }
        };

        if pdf_only {
            Ok(items
                .into_iter()
                .filter(|item| item.pdf_attachments().any(|a| a.resolved_path.is_some()))
                .collect())
        } else {
            Ok(items)
        }
    }

    pub async fn list_collection_names(&self) -> Result<Vec<String>> {
        Ok(self
            .get_all_collections(true)
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect())
    }

    /// Nested view of the collection tree; roots are collections without a
    /// (known) parent. Siblings are sorted by name.
    pub async fn collection_tree(&self) -> Result<Vec<CollectionNode>> {
        let collections = self.get_all_collections(true).await?;
        let keys: HashSet<&str> = collections.iter().map(|c| c.key.as_str()).collect();
        let mut children: HashMap<&str, Vec<&Collection>> = HashMap::new();
        let mut roots = Vec::new();
        for c in &collections {
            match c.parent_key.as_deref().filter(|p| keys.contains(p)) {
                Some(parent) => children.entry(parent).or_default().push(c),
                None => roots.push(c),
            }
        }

        fn build(
            c: &Collection,
            children: &HashMap<&str, Vec<&Collection>>,
            visited: &mut HashSet<String>,
        ) -> CollectionNode {
            visited.insert(c.key.clone());
            let mut kids: Vec<&Collection> = children
                .get(c.key.as_str())
                .cloned()
                .unwrap_or_default();
            kids.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
            let mut nodes = Vec::with_capacity(kids.len());
            for k in kids {
                if !visited.contains(&k.key) {
                    nodes.push(build(k, children, visited));
                }
            }
            CollectionNode {
                collection: c.clone(),
                children: nodes,
            }
        }

        roots.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        let mut visited = HashSet::new();
        Ok(roots
            .into_iter()
            .map(|r| build(r, &children, &mut visited))
            .collect())
    }

    pub async fn search_items(&self, query: &str, limit: usize, offset: usize) -> Result<Vec<Item>> {
        self.client.search_items(query, limit, offset).await
    }
}
