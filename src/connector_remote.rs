//! Zotero Web API (v3) reader.
//!
//! Used when the local replica is missing or unreadable. Responses are paged
//! with `start`/`limit` until the `Total-Results` header is reached. Item
//! listings from the API do not include child attachments, so every batch is
//! enriched with one `/items/{key}/children` request per item, fanned out
//! through a bounded pool of `max_concurrent_fetches` tasks. A failed fetch
//! leaves that single item without attachments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::RemoteConfig;
use crate::connector_local::{keyword_score, query_terms};
use crate::error::{Error, Result};
use crate::models::{Attachment, Collection, Creator, Item, LinkMode};
use crate::traits::LibrarySource;

#[derive(Clone)]
pub struct RemoteLibrary {
    http: reqwest::Client,
    api_base: String,
    prefix: String,
    api_key: Option<String>,
    page_size: usize,
    max_concurrent: usize,
}

impl RemoteLibrary {
    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        let library_id = config
            .library_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| Error::remote("remote.library_id is not set"))?;
        let prefix = match config.library_type.as_str() {
            "group" => format!("groups/{}", library_id),
            _ => format!("users/{}", library_id),
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(Error::remote)?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            prefix,
            api_key: config.resolved_api_key(),
            page_size: config.page_size.clamp(1, 100),
            max_concurrent: config.max_concurrent_fetches.max(1),
        })
    }

    async fn get(
        &self,
        path: &str,
        params: &[(&str, String)],
        missing: Option<(&'static str, &str)>,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/{}/{}", self.api_base, self.prefix, path);
        let mut request = self
            .http
            .get(&url)
            .header("Zotero-API-Version", "3")
            .query(params);
        if let Some(key) = &self.api_key {
            request = request.header("Zotero-API-Key", key);
        }

        let response = request.send().await.map_err(Error::remote)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            if let Some((kind, name)) = missing {
                return Err(Error::not_found(kind, name));
            }
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::remote(format!("HTTP {} from {}: {}", status, path, body.trim())))
    }

    /// Fetch pages from `start` until `max` entries, an empty page, or `Total-Results`.
    async fn get_paged<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
        start: usize,
        max: Option<usize>,
        missing: Option<(&'static str, &str)>,
    ) -> Result<Vec<T>> {
        let mut out: Vec<T> = Vec::new();
        let mut start = start;
        loop {
            let want = match max {
                Some(m) => m.saturating_sub(out.len()).min(self.page_size),
                None => self.page_size,
            };
            if want == 0 {
                break;
            }

            let mut page_params = params.to_vec();
            page_params.push(("start", start.to_string()));
            page_params.push(("limit", want.to_string()));

            let response = self.get(path, &page_params, missing).await?;
            let total = response
                .headers()
                .get("Total-Results")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<usize>().ok());
            let page: Vec<T> = response.json().await.map_err(Error::remote)?;

            let n = page.len();
            out.extend(page);
            start += n;

            let done = match total {
                Some(total) => start >= total,
                None => n < want,
            };
            if n == 0 || done {
                break;
            }
        }
        Ok(out)
    }

    async fn fetch_children(&self, item_key: &str) -> Result<Vec<Attachment>> {
        let raw: Vec<RawItem> = self
            .get_paged(
                &format!("items/{}/children", item_key),
                &[],
                0,
                None,
                Some(("item", item_key)),
            )
            .await?;
        Ok(raw
            .into_iter()
            .filter(|r| r.data.item_type == "attachment")
            .map(RawItem::into_attachment)
            .collect())
    }

    /// Attach child attachments to every item through a bounded pool.
    async fn enrich(&self, items: &mut [Item]) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();

        for (idx, item) in items.iter().enumerate() {
            let this = self.clone();
            let semaphore = semaphore.clone();
            let key = item.key.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (idx, this.fetch_children(&key).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, Ok(attachments))) => items[idx].attachments = attachments,
                Ok((idx, Err(e))) => {
                    let failure = Error::PartialBatchFailure {
                        item: items[idx].key.clone(),
                        reason: e.to_string(),
                    };
                    warn!(error = %failure, "continuing without attachments");
                    items[idx].attachments.clear();
                }
                Err(e) => warn!(error = %e, "attachment fetch task failed"),
            }
        }
    }
}

#[async_trait]
impl LibrarySource for RemoteLibrary {
    fn name(&self) -> &str {
        "remote"
    }

    async fn list_collections(&self) -> Result<Vec<Collection>> {
        let raw: Vec<RawCollection> = self.get_paged("collections", &[], 0, None, None).await?;
        Ok(raw.into_iter().map(RawCollection::into_collection).collect())
    }

    async fn collection_items(&self, collection_key: &str) -> Result<Vec<Item>> {
        let raw: Vec<RawItem> = self
            .get_paged(
                &format!("collections/{}/items/top", collection_key),
                &[],
                0,
                None,
                Some(("collection", collection_key)),
            )
            .await?;
        let mut items: Vec<Item> = raw.into_iter().filter_map(RawItem::into_item).collect();
        debug!(collection = collection_key, items = items.len(), "remote collection items");
        self.enrich(&mut items).await;
        Ok(items)
    }

    async fn search_items(&self, query: &str, limit: usize, offset: usize) -> Result<Vec<Item>> {
        let terms = query_terms(query);
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        // The API's `q` matches other fields and pages in its own order, so
        // the top-level listing is scored here with the local ranking.
        let params = [("itemType", "-attachment".to_string())];
        let raw: Vec<RawItem> = self.get_paged("items/top", &params, 0, None, None).await?;
        let candidates = raw.len();
        let items: Vec<Item> = raw.into_iter().filter_map(RawItem::into_item).collect();
        let mut page = rank_by_keywords(items, &terms, limit, offset);
        debug!(query, candidates, page = page.len(), "remote search");
        self.enrich(&mut page).await;
        Ok(page)
    }

    async fn item_attachments(&self, item_key: &str) -> Result<Vec<Attachment>> {
        self.fetch_children(item_key).await
    }

    async fn health_check(&self) -> Result<()> {
        self.get("collections", &[("limit", "1".to_string())], None)
            .await
            .map(|_| ())
    }
}

/// Keep items that score on title or abstract, best first, newest first on
/// ties, then by key. Returns the `offset..offset + limit` page.
fn rank_by_keywords(items: Vec<Item>, terms: &[String], limit: usize, offset: usize) -> Vec<Item> {
    let mut scored: Vec<(u64, Item)> = items
        .into_iter()
        .filter_map(|item| {
            let score = keyword_score(
                terms,
                &item.title,
                item.abstract_note.as_deref().unwrap_or(""),
            );
            (score > 0).then_some((score, item))
        })
        .collect();
    scored.sort_by(|(sa, a), (sb, b)| {
        sb.cmp(sa)
            .then_with(|| b.date_added.cmp(&a.date_added))
            .then_with(|| a.key.cmp(&b.key))
    });
    scored
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|(_, item)| item)
        .collect()
}

// ============ Wire types ============

#[derive(Debug, Deserialize)]
struct RawCollection {
    key: String,
    data: RawCollectionData,
    #[serde(default)]
    meta: RawCollectionMeta,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCollectionData {
    name: String,
    /// Either a collection key or `false`.
    #[serde(default)]
    parent_collection: serde_json::Value,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawCollectionMeta {
    #[serde(default)]
    num_collections: u32,
    #[serde(default)]
    num_items: u32,
}

impl RawCollection {
    fn into_collection(self) -> Collection {
        let parent_key = match self.data.parent_collection {
            serde_json::Value::String(key) if !key.is_empty() => Some(key),
            _ => None,
        };
        Collection {
            key: self.key,
            name: self.data.name,
            parent_key,
            item_count: self.meta.num_items,
            subcollection_count: self.meta.num_collections,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawItem {
    key: String,
    data: RawItemData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawItemData {
    item_type: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    creators: Vec<RawCreator>,
    abstract_note: Option<String>,
    date: Option<String>,
    publication_title: Option<String>,
    proceedings_title: Option<String>,
    book_title: Option<String>,
    website_title: Option<String>,
    journal_abbreviation: Option<String>,
    #[serde(rename = "DOI")]
    doi: Option<String>,
    url: Option<String>,
    #[serde(default)]
    tags: Vec<RawTag>,
    #[serde(default)]
    collections: Vec<String>,
    date_added: Option<String>,
    date_modified: Option<String>,
    content_type: Option<String>,
    filename: Option<String>,
    link_mode: Option<String>,
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCreator {
    creator_type: String,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTag {
    tag: String,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_api_time(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|d| d.with_timezone(&Utc))
}

impl RawItem {
    fn into_item(self) -> Option<Item> {
        let d = self.data;
        if matches!(d.item_type.as_str(), "attachment" | "note" | "annotation") {
            return None;
        }
        let publication = non_empty(d.publication_title)
            .or_else(|| non_empty(d.proceedings_title))
            .or_else(|| non_empty(d.book_title))
            .or_else(|| non_empty(d.website_title))
            .or_else(|| non_empty(d.journal_abbreviation));

        Some(Item {
            key: self.key,
            item_type: d.item_type,
            title: d.title,
            creators: d
                .creators
                .into_iter()
                .map(|c| Creator {
                    creator_type: c.creator_type,
                    first_name: c.first_name,
                    last_name: c.last_name,
                    name: c.name,
                })
                .collect(),
            abstract_note: non_empty(d.abstract_note),
            date: non_empty(d.date),
            publication,
            doi: non_empty(d.doi),
            url: non_empty(d.url),
            tags: d.tags.into_iter().map(|t| t.tag).collect(),
            collections: d.collections,
            attachments: Vec::new(),
            date_added: parse_api_time(d.date_added.as_deref()),
            date_modified: parse_api_time(d.date_modified.as_deref()),
        })
    }

    fn into_attachment(self) -> Attachment {
        let d = self.data;
        Attachment {
            key: self.key,
            title: d.title,
            filename: non_empty(d.filename),
            content_type: non_empty(d.content_type),
            path: non_empty(d.path),
            resolved_path: None,
            link_mode: d
                .link_mode
                .as_deref()
                .map(LinkMode::from_api)
                .unwrap_or_default(),
        }
    }
}
