//! Local replica reader.
//!
//! Reads collections, items, creators, tags, and attachments straight out of
//! Zotero's `zotero.sqlite`. The file is opened read-only for each call and
//! closed afterwards; this reader never writes.
//!
//! Item metadata lives in Zotero's entity-attribute-value tables
//! (`itemData` → `fields` / `itemDataValues`). Related rows for a batch of
//! items are fetched with `IN (...)` clauses of at most
//! [`IN_CLAUSE_BATCH`] ids per round trip.
//!
//! Soft-deleted rows (`deletedItems`, `deletedCollections`) and
//! non-bibliographic item types (attachments, notes, annotations) are
//! excluded everywhere.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{Sqlite, SqlitePool, SqliteRow};
use sqlx::Row;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::attachment::filename_from_recorded;
use crate::db;
use crate::error::{Error, Result};
use crate::models::{Attachment, Collection, Creator, Item, LinkMode};
use crate::traits::LibrarySource;

/// Maximum ids bound into a single `IN (...)` clause.
pub const IN_CLAUSE_BATCH: usize = 400;

/// Fields checked, in order, for an item's publication name.
const PUBLICATION_FIELDS: [&str; 5] = [
    "publicationTitle",
    "proceedingsTitle",
    "bookTitle",
    "websiteTitle",
    "journalAbbreviation",
];

const EXCLUDED_TYPES: &str = "('attachment', 'note', 'annotation')";

pub struct LocalLibrary {
    path: PathBuf,
}

impl LocalLibrary {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(&self) -> Result<SqlitePool> {
        db::open_library(&self.path).await
    }
}

#[async_trait]
impl LibrarySource for LocalLibrary {
    fn name(&self) -> &str {
        "local"
    }

    async fn list_collections(&self) -> Result<Vec<Collection>> {
        let pool = self.open().await?;
        let result = list_collections(&pool).await;
        pool.close().await;
        result
    }

    async fn collection_items(&self, collection_key: &str) -> Result<Vec<Item>> {
        let pool = self.open().await?;
        let result = collection_items(&pool, collection_key).await;
        pool.close().await;
        result
    }

    async fn search_items(&self, query: &str, limit: usize, offset: usize) -> Result<Vec<Item>> {
        let pool = self.open().await?;
        let result = search_items(&pool, query, limit, offset).await;
        pool.close().await;
        result
    }

    async fn item_attachments(&self, item_key: &str) -> Result<Vec<Attachment>> {
        let pool = self.open().await?;
        let result = item_attachments(&pool, item_key).await;
        pool.close().await;
        result
    }

    async fn health_check(&self) -> Result<()> {
        let pool = self.open().await?;
        let result = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM items")
            .fetch_one(&pool)
            .await
            .map(|_| ())
            .map_err(Error::local);
        pool.close().await;
        result
    }
}

async fn list_collections(pool: &SqlitePool) -> Result<Vec<Collection>> {
    let rows = sqlx::query(
        r#"
        SELECT
            c.key AS key,
            CAST(c.collectionName AS TEXT) AS name,
            p.key AS parent_key,
            (SELECT COUNT(*) FROM collectionItems ci
                WHERE ci.collectionID = c.collectionID
                AND ci.itemID NOT IN (SELECT itemID FROM deletedItems)) AS item_count,
            (SELECT COUNT(*) FROM collections s
                WHERE s.parentCollectionID = c.collectionID
                AND s.collectionID NOT IN (SELECT collectionID FROM deletedCollections)) AS sub_count
        FROM collections c
        LEFT JOIN collections p ON p.collectionID = c.parentCollectionID
        WHERE c.collectionID NOT IN (SELECT collectionID FROM deletedCollections)
        ORDER BY c.collectionID
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(Error::local)?;

    rows.iter()
        .map(|row| {
            Ok(Collection {
                key: col(row, "key")?,
                name: col(row, "name")?,
                parent_key: col(row, "parent_key")?,
                item_count: col::<i64>(row, "item_count")? as u32,
                subcollection_count: col::<i64>(row, "sub_count")? as u32,
            })
        })
        .collect()
}

async fn collection_items(pool: &SqlitePool, collection_key: &str) -> Result<Vec<Item>> {
    let exists: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT collectionID FROM collections
        WHERE key = ? AND collectionID NOT IN (SELECT collectionID FROM deletedCollections)
        "#,
    )
    .bind(collection_key)
    .fetch_optional(pool)
    .await
    .map_err(Error::local)?;

    let Some(collection_id) = exists else {
        return Err(Error::not_found("collection", collection_key));
    };

    let sql = format!(
        r#"
        SELECT i.itemID
        FROM collectionItems ci
        JOIN items i ON i.itemID = ci.itemID
        JOIN itemTypes t ON t.itemTypeID = i.itemTypeID
        WHERE ci.collectionID = ?
          AND t.typeName NOT IN {EXCLUDED_TYPES}
          AND i.itemID NOT IN (SELECT itemID FROM deletedItems)
        ORDER BY ci.orderIndex, i.itemID
        "#
    );
    let ids: Vec<i64> = sqlx::query_scalar(&sql)
        .bind(collection_id)
        .fetch_all(pool)
        .await
        .map_err(Error::local)?;

    debug!(collection = collection_key, items = ids.len(), "local collection items");
    hydrate_items(pool, &ids).await
}

/// Ranked keyword search.
///
/// Each whitespace-separated term scores 2 per occurrence in the title and 1
/// per occurrence in the abstract, case-insensitively. Items scoring zero
/// are dropped; the rest are ordered by score, then most recently added, and
/// paged only after the full sort. Only the requested page is hydrated.
async fn search_items(
    pool: &SqlitePool,
    query: &str,
    limit: usize,
    offset: usize,
) -> Result<Vec<Item>> {
    let terms = query_terms(query);
    if terms.is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    let sql = format!(
        r#"
        SELECT
            i.itemID AS item_id,
            i.key AS key,
            CAST(i.dateAdded AS TEXT) AS date_added,
            (SELECT CAST(v.value AS TEXT) FROM itemData d
                JOIN fields f ON f.fieldID = d.fieldID
                JOIN itemDataValues v ON v.valueID = d.valueID
                WHERE d.itemID = i.itemID AND f.fieldName = 'title') AS title,
            (SELECT CAST(v.value AS TEXT) FROM itemData d
                JOIN fields f ON f.fieldID = d.fieldID
                JOIN itemDataValues v ON v.valueID = d.valueID
                WHERE d.itemID = i.itemID AND f.fieldName = 'abstractNote') AS abstract
        FROM items i
        JOIN itemTypes t ON t.itemTypeID = i.itemTypeID
        WHERE t.typeName NOT IN {EXCLUDED_TYPES}
          AND i.itemID NOT IN (SELECT itemID FROM deletedItems)
        "#
    );
    let rows = sqlx::query(&sql)
        .fetch_all(pool)
        .await
        .map_err(Error::local)?;

    let mut scored: Vec<(u64, String, String, i64)> = Vec::new();
    for row in &rows {
        let title: Option<String> = col(row, "title")?;
        let abstract_note: Option<String> = col(row, "abstract")?;
        let score = keyword_score(
            &terms,
            title.as_deref().unwrap_or(""),
            abstract_note.as_deref().unwrap_or(""),
        );
        if score > 0 {
            let date_added: Option<String> = col(row, "date_added")?;
            scored.push((
                score,
                date_added.unwrap_or_default(),
                col(row, "key")?,
                col(row, "item_id")?,
            ));
        }
    }

    scored.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then_with(|| b.1.cmp(&a.1))
            .then_with(|| a.2.cmp(&b.2))
    });

    let page: Vec<i64> = scored
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|(_, _, _, id)| id)
        .collect();

    debug!(query, matched = rows.len(), page = page.len(), "local search");
    hydrate_items(pool, &page).await
}

/// Lowercased whitespace-separated terms of a keyword query.
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split_whitespace()
        .map(String::from)
        .collect()
}

/// `2 × title occurrences + abstract occurrences`, summed over terms.
pub fn keyword_score(terms: &[String], title: &str, abstract_note: &str) -> u64 {
    let title = title.to_lowercase();
    let abstract_note = abstract_note.to_lowercase();
    terms
        .iter()
        .map(|t| {
            let in_title = title.matches(t.as_str()).count() as u64;
            let in_abstract = abstract_note.matches(t.as_str()).count() as u64;
            2 * in_title + in_abstract
        })
        .sum()
}

async fn item_attachments(pool: &SqlitePool, item_key: &str) -> Result<Vec<Attachment>> {
    let item_id: Option<i64> = sqlx::query_scalar(
        "SELECT itemID FROM items WHERE key = ? AND itemID NOT IN (SELECT itemID FROM deletedItems)",
    )
    .bind(item_key)
    .fetch_optional(pool)
    .await
    .map_err(Error::local)?;

    let Some(item_id) = item_id else {
        return Err(Error::not_found("item", item_key));
    };

    let mut by_parent = fetch_attachments(pool, &[item_id]).await?;
    Ok(by_parent.remove(&item_id).unwrap_or_default())
}

/// Build full [`Item`]s for `ids`, preserving their order.
async fn hydrate_items(pool: &SqlitePool, ids: &[i64]) -> Result<Vec<Item>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut items: HashMap<i64, Item> = HashMap::with_capacity(ids.len());
    let base_rows = fetch_in(
        pool,
        r#"
        SELECT i.itemID AS item_id, i.key AS key, t.typeName AS type_name,
               CAST(i.dateAdded AS TEXT) AS date_added,
               CAST(i.dateModified AS TEXT) AS date_modified
        FROM items i
        JOIN itemTypes t ON t.itemTypeID = i.itemTypeID
        WHERE i.itemID IN ({ids})
        "#,
        ids,
    )
    .await?;
    for row in &base_rows {
        let id: i64 = col(row, "item_id")?;
        let key: String = col(row, "key")?;
        let type_name: String = col(row, "type_name")?;
        let mut item = Item::new(&key, &type_name, "");
        item.date_added = col::<Option<String>>(row, "date_added")?
            .as_deref()
            .and_then(parse_timestamp);
        item.date_modified = col::<Option<String>>(row, "date_modified")?
            .as_deref()
            .and_then(parse_timestamp);
        items.insert(id, item);
    }

    // Field values
    let field_rows = fetch_in(
        pool,
        r#"
        SELECT d.itemID AS item_id, f.fieldName AS field, CAST(v.value AS TEXT) AS value
        FROM itemData d
        JOIN fields f ON f.fieldID = d.fieldID
        JOIN itemDataValues v ON v.valueID = d.valueID
        WHERE d.itemID IN ({ids})
        "#,
        ids,
    )
    .await?;
    let mut fields: HashMap<i64, HashMap<String, String>> = HashMap::new();
    for row in &field_rows {
        let value: Option<String> = col(row, "value")?;
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            fields
                .entry(col(row, "item_id")?)
                .or_default()
                .insert(col(row, "field")?, value);
        }
    }
    for (id, item) in items.iter_mut() {
        if let Some(f) = fields.remove(id) {
            apply_fields(item, f);
        }
    }

    // Creators
    let creator_rows = fetch_in(
        pool,
        r#"
        SELECT ic.itemID AS item_id, ct.creatorType AS creator_type,
               CAST(c.firstName AS TEXT) AS first_name,
               CAST(c.lastName AS TEXT) AS last_name,
               c.fieldMode AS field_mode
        FROM itemCreators ic
        JOIN creators c ON c.creatorID = ic.creatorID
        JOIN creatorTypes ct ON ct.creatorTypeID = ic.creatorTypeID
        WHERE ic.itemID IN ({ids})
        ORDER BY ic.itemID, ic.orderIndex
        "#,
        ids,
    )
    .await?;
    for row in &creator_rows {
        let id: i64 = col(row, "item_id")?;
        let first: String = col::<Option<String>>(row, "first_name")?.unwrap_or_default();
        let last: String = col::<Option<String>>(row, "last_name")?.unwrap_or_default();
        let single_field = col::<Option<i64>>(row, "field_mode")?.unwrap_or(0) == 1;
        let creator = Creator {
            creator_type: col(row, "creator_type")?,
            first_name: if single_field { String::new() } else { first },
            last_name: if single_field { String::new() } else { last.clone() },
            name: if single_field { Some(last) } else { None },
        };
        if let Some(item) = items.get_mut(&id) {
            item.creators.push(creator);
        }
    }

    // Tags
    let tag_rows = fetch_in(
        pool,
        r#"
        SELECT it.itemID AS item_id, CAST(t.name AS TEXT) AS name
        FROM itemTags it
        JOIN tags t ON t.tagID = it.tagID
        WHERE it.itemID IN ({ids})
        ORDER BY it.itemID, t.name
        "#,
        ids,
    )
    .await?;
    for row in &tag_rows {
        let id: i64 = col(row, "item_id")?;
        if let Some(item) = items.get_mut(&id) {
            item.tags.push(col(row, "name")?);
        }
    }

    // Owning collections
    let collection_rows = fetch_in(
        pool,
        r#"
        SELECT ci.itemID AS item_id, c.key AS key
        FROM collectionItems ci
        JOIN collections c ON c.collectionID = ci.collectionID
        WHERE ci.itemID IN ({ids})
          AND c.collectionID NOT IN (SELECT collectionID FROM deletedCollections)
        ORDER BY ci.itemID, c.collectionID
        "#,
        ids,
    )
    .await?;
    for row in &collection_rows {
        let id: i64 = col(row, "item_id")?;
        if let Some(item) = items.get_mut(&id) {
            item.collections.push(col(row, "key")?);
        }
    }

    let mut attachments = fetch_attachments(pool, ids).await?;
    for (id, item) in items.iter_mut() {
        if let Some(atts) = attachments.remove(id) {
            item.attachments = atts;
        }
    }

    Ok(ids.iter().filter_map(|id| items.remove(id)).collect())
}

/// Child attachments grouped by parent item id.
async fn fetch_attachments(
    pool: &SqlitePool,
    parent_ids: &[i64],
) -> Result<HashMap<i64, Vec<Attachment>>> {
    let rows = fetch_in(
        pool,
        r#"
        SELECT ia.parentItemID AS parent_id, i.key AS key,
               ia.linkMode AS link_mode,
               CAST(ia.contentType AS TEXT) AS content_type,
               CAST(ia.path AS TEXT) AS path,
               (SELECT CAST(v.value AS TEXT) FROM itemData d
                   JOIN fields f ON f.fieldID = d.fieldID
                   JOIN itemDataValues v ON v.valueID = d.valueID
                   WHERE d.itemID = ia.itemID AND f.fieldName = 'title') AS title
        FROM itemAttachments ia
        JOIN items i ON i.itemID = ia.itemID
        WHERE ia.parentItemID IN ({ids})
          AND ia.itemID NOT IN (SELECT itemID FROM deletedItems)
        ORDER BY ia.parentItemID, ia.itemID
        "#,
        parent_ids,
    )
    .await?;

    let mut grouped: HashMap<i64, Vec<Attachment>> = HashMap::new();
    for row in &rows {
        let path: Option<String> = col::<Option<String>>(row, "path")?.filter(|p| !p.is_empty());
        let link_mode = LinkMode::from_code(col::<Option<i64>>(row, "link_mode")?.unwrap_or(-1));
        let filename = match link_mode {
            LinkMode::LinkedUrl => None,
            _ => path.as_deref().and_then(filename_from_recorded),
        };
        let attachment = Attachment {
            key: col(row, "key")?,
            title: col::<Option<String>>(row, "title")?.unwrap_or_default(),
            filename,
            content_type: col::<Option<String>>(row, "content_type")?.filter(|c| !c.is_empty()),
            path,
            resolved_path: None,
            link_mode,
        };
        grouped
            .entry(col(row, "parent_id")?)
            .or_default()
            .push(attachment);
    }
    Ok(grouped)
}

/// Run `template` once per batch of ids, substituting `{ids}` with placeholders.
async fn fetch_in(pool: &SqlitePool, template: &str, ids: &[i64]) -> Result<Vec<SqliteRow>> {
    let mut rows = Vec::new();
    for batch in ids.chunks(IN_CLAUSE_BATCH) {
        let placeholders = vec!["?"; batch.len()].join(", ");
        let sql = template.replace("{ids}", &placeholders);
        let mut query = sqlx::query(&sql);
        for id in batch {
            query = query.bind(*id);
        }
        rows.extend(query.fetch_all(pool).await.map_err(Error::local)?);
    }
    Ok(rows)
}

fn apply_fields(item: &mut Item, mut fields: HashMap<String, String>) {
    item.title = fields.remove("title").unwrap_or_default();
    item.abstract_note = fields.remove("abstractNote");
    item.date = fields.remove("date").map(|d| display_date(&d));
    item.doi = fields.remove("DOI");
    item.url = fields.remove("url");
    item.publication = PUBLICATION_FIELDS
        .iter()
        .find_map(|f| fields.remove(*f));
}

/// Zotero stores dates as `"YYYY-MM-DD original"`; keep the original text.
fn display_date(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let multipart = raw.len() > 11
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes[10] == b' '
        && raw[..4].chars().all(|c| c.is_ascii_digit());
    if multipart {
        let rest = raw[11..].trim();
        if !rest.is_empty() {
            return rest.to_string();
        }
    }
    raw.to_string()
}

/// Parse Zotero's `YYYY-MM-DD HH:MM:SS` UTC timestamps.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|n| n.and_utc())
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|d| d.with_timezone(&Utc))
        })
}

fn col<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name).map_err(Error::local)
}
