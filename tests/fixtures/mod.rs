//! Shared test fixtures: a Zotero-shaped SQLite library, a minimal Web API
//! responder, and fake extractor / embedding collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Notify;

use zotero_index::embedding::EmbeddingProvider;
use zotero_index::models::IndexChunk;
use zotero_index::traits::{ChunkHit, ExtractedText, TextExtractor, VectorStore};
use zotero_index::vector_store::InMemoryVectorStore;

// ============ Zotero database ============

const SCHEMA: &[&str] = &[
    "CREATE TABLE itemTypes (itemTypeID INTEGER PRIMARY KEY, typeName TEXT)",
    "CREATE TABLE items (itemID INTEGER PRIMARY KEY, itemTypeID INT, key TEXT UNIQUE, dateAdded TEXT, dateModified TEXT)",
    "CREATE TABLE fields (fieldID INTEGER PRIMARY KEY, fieldName TEXT)",
    "CREATE TABLE itemDataValues (valueID INTEGER PRIMARY KEY, value)",
    "CREATE TABLE itemData (itemID INT, fieldID INT, valueID INT, PRIMARY KEY (itemID, fieldID))",
    "CREATE TABLE creators (creatorID INTEGER PRIMARY KEY, firstName TEXT, lastName TEXT, fieldMode INT)",
    "CREATE TABLE creatorTypes (creatorTypeID INTEGER PRIMARY KEY, creatorType TEXT)",
    "CREATE TABLE itemCreators (itemID INT, creatorID INT, creatorTypeID INT, orderIndex INT)",
    "CREATE TABLE tags (tagID INTEGER PRIMARY KEY, name TEXT)",
    "CREATE TABLE itemTags (itemID INT, tagID INT, type INT)",
    "CREATE TABLE collections (collectionID INTEGER PRIMARY KEY, collectionName TEXT, parentCollectionID INT, key TEXT UNIQUE)",
    "CREATE TABLE collectionItems (collectionID INT, itemID INT, orderIndex INT)",
    "CREATE TABLE itemAttachments (itemID INTEGER PRIMARY KEY, parentItemID INT, linkMode INT, contentType TEXT, path TEXT)",
    "CREATE TABLE deletedItems (itemID INTEGER PRIMARY KEY, dateDeleted TEXT)",
    "CREATE TABLE deletedCollections (collectionID INTEGER PRIMARY KEY, dateDeleted TEXT)",
    "INSERT INTO itemTypes VALUES (1, 'journalArticle'), (2, 'attachment'), (3, 'note'), (4, 'conferencePaper')",
    "INSERT INTO fields VALUES (1, 'title'), (2, 'abstractNote'), (3, 'date'), (4, 'publicationTitle'), (5, 'DOI')",
    "INSERT INTO creatorTypes VALUES (1, 'author'), (2, 'editor')",
];

/// Bibliographic item to insert.
#[derive(Clone)]
pub struct ItemSpec {
    pub key: String,
    pub title: String,
    pub abstract_note: Option<String>,
    pub date: Option<String>,
    pub date_added: String,
    pub authors: Vec<(String, String)>,
    pub tags: Vec<String>,
}

impl ItemSpec {
    pub fn new(key: &str, title: &str) -> Self {
        Self {
            key: key.to_string(),
            title: title.to_string(),
            abstract_note: None,
            date: None,
            date_added: "2024-01-01 00:00:00".to_string(),
            authors: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn abstract_note(mut self, text: &str) -> Self {
        self.abstract_note = Some(text.to_string());
        self
    }

    pub fn added(mut self, ts: &str) -> Self {
        self.date_added = ts.to_string();
        self
    }

    pub fn author(mut self, first: &str, last: &str) -> Self {
        self.authors.push((first.to_string(), last.to_string()));
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }
}

/// A throwaway Zotero data directory with `zotero.sqlite` and `storage/`.
pub struct FixtureLibrary {
    pub dir: TempDir,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pool: SqlitePool,
    ids: HashMap<String, i64>,
    collections: HashMap<String, i64>,
    next_id: i64,
}

impl FixtureLibrary {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let data_dir = dir.path().join("Zotero");
        std::fs::create_dir_all(data_dir.join("storage")).unwrap();
        let db_path = data_dir.join("zotero.sqlite");

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
            .unwrap()
            .create_if_missing(true)
            // Readers open the file immutable; keep every commit in the main file.
            .journal_mode(SqliteJournalMode::Delete);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&pool).await.unwrap();
        }

        Self {
            dir,
            data_dir,
            db_path,
            pool,
            ids: HashMap::new(),
            collections: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn id(&self, key: &str) -> i64 {
        self.ids[key]
    }

    pub async fn add_collection(&mut self, key: &str, name: &str, parent: Option<&str>) {
        let id = self.collections.len() as i64 + 1;
        let parent_id = parent.map(|p| self.collections[p]);
        sqlx::query("INSERT INTO collections VALUES (?, ?, ?, ?)")
            .bind(id)
            .bind(name)
            .bind(parent_id)
            .bind(key)
            .execute(&self.pool)
            .await
            .unwrap();
        self.collections.insert(key.to_string(), id);
    }

    async fn insert_item(&mut self, key: &str, type_id: i64, date_added: &str) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        sqlx::query("INSERT INTO items VALUES (?, ?, ?, ?, ?)")
            .bind(id)
            .bind(type_id)
            .bind(key)
            .bind(date_added)
            .bind(date_added)
            .execute(&self.pool)
            .await
            .unwrap();
        self.ids.insert(key.to_string(), id);
        id
    }

    async fn set_field(&self, item_id: i64, field_id: i64, value: &str) {
        let value_id: i64 = sqlx::query_scalar(
            "INSERT INTO itemDataValues (value) VALUES (?) RETURNING valueID",
        )
        .bind(value)
        .fetch_one(&self.pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO itemData VALUES (?, ?, ?)")
            .bind(item_id)
            .bind(field_id)
            .bind(value_id)
            .execute(&self.pool)
            .await
            .unwrap();
    }

    pub async fn add_item(&mut self, item: ItemSpec) -> i64 {
        let id = self.insert_item(&item.key, 1, &item.date_added).await;
        self.set_field(id, 1, &item.title).await;
        if let Some(abs) = &item.abstract_note {
            self.set_field(id, 2, abs).await;
        }
        if let Some(date) = &item.date {
            self.set_field(id, 3, date).await;
        }
        for (i, (first, last)) in item.authors.iter().enumerate() {
            let creator_id: i64 = sqlx::query_scalar(
                "INSERT INTO creators (firstName, lastName, fieldMode) VALUES (?, ?, 0) RETURNING creatorID",
            )
            .bind(first)
            .bind(last)
            .fetch_one(&self.pool)
            .await
            .unwrap();
            sqlx::query("INSERT INTO itemCreators VALUES (?, ?, 1, ?)")
                .bind(id)
                .bind(creator_id)
                .bind(i as i64)
                .execute(&self.pool)
                .await
                .unwrap();
        }
        for tag in &item.tags {
            let tag_id: i64 = sqlx::query_scalar("INSERT INTO tags (name) VALUES (?) RETURNING tagID")
                .bind(tag)
                .fetch_one(&self.pool)
                .await
                .unwrap();
            sqlx::query("INSERT INTO itemTags VALUES (?, ?, 0)")
                .bind(id)
                .bind(tag_id)
                .execute(&self.pool)
                .await
                .unwrap();
        }
        id
    }

    pub async fn add_to_collection(&self, collection_key: &str, item_key: &str) {
        let collection_id = self.collections[collection_key];
        let order: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM collectionItems WHERE collectionID = ?",
        )
        .bind(collection_id)
        .fetch_one(&self.pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO collectionItems VALUES (?, ?, ?)")
            .bind(collection_id)
            .bind(self.id(item_key))
            .bind(order)
            .execute(&self.pool)
            .await
            .unwrap();
    }

    /// Stored PDF attachment recorded as `storage:<filename>`. When
    /// `contents` is given the file is written under `storage/<key>/`.
    pub async fn add_pdf(
        &mut self,
        parent_key: &str,
        key: &str,
        filename: &str,
        contents: Option<&[u8]>,
    ) -> Option<PathBuf> {
        let parent_id = self.id(parent_key);
        let id = self.insert_item(key, 2, "2024-01-01 00:00:00").await;
        self.set_field(id, 1, "Full Text PDF").await;
        sqlx::query("INSERT INTO itemAttachments VALUES (?, ?, 0, 'application/pdf', ?)")
            .bind(id)
            .bind(parent_id)
            .bind(format!("storage:{}", filename))
            .execute(&self.pool)
            .await
            .unwrap();

        contents.map(|bytes| {
            let dir = self.data_dir.join("storage").join(key);
            std::fs::create_dir_all(&dir).unwrap();
            let path = dir.join(filename);
            std::fs::write(&path, bytes).unwrap();
            path
        })
    }

    pub async fn delete_item(&self, key: &str) {
        sqlx::query("INSERT INTO deletedItems VALUES (?, '2024-02-01 00:00:00')")
            .bind(self.id(key))
            .execute(&self.pool)
            .await
            .unwrap();
    }

    pub async fn delete_collection(&self, key: &str) {
        sqlx::query("INSERT INTO deletedCollections VALUES (?, '2024-02-01 00:00:00')")
            .bind(self.collections[key])
            .execute(&self.pool)
            .await
            .unwrap();
    }

    /// Flush and release the writer connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// "ML Papers": one item without attachments, one whose PDF is missing on
/// disk, one with a stored PDF.
pub async fn ml_papers() -> FixtureLibrary {
    let mut lib = FixtureLibrary::new().await;
    lib.add_collection("MLCOLL01", "ML Papers", None).await;
    lib.add_collection("VISION01", "Vision", Some("MLCOLL01")).await;
    lib.add_collection("PHYS0001", "Physics", None).await;

    lib.add_item(
        ItemSpec::new("NOATT001", "Deep Residual Learning")
            .author("Kaiming", "He")
            .abstract_note("Residual networks ease the training of deep networks.")
            .added("2024-01-01 10:00:00")
            .tag("vision"),
    )
    .await;
    lib.add_item(
        ItemSpec::new("MISSING1", "Attention Is All You Need")
            .author("Ashish", "Vaswani")
            .abstract_note("The transformer relies entirely on attention.")
            .added("2024-01-02 10:00:00")
            .tag("nlp"),
    )
    .await;
    lib.add_item(
        ItemSpec::new("HASPDF01", "BERT")
            .author("Jacob", "Devlin")
            .abstract_note("Bidirectional transformer pre-training.")
            .added("2024-01-03 10:00:00")
            .tag("nlp"),
    )
    .await;
    lib.add_pdf("MISSING1", "ATTMISS1", "attention.pdf", None).await;
    lib.add_pdf("HASPDF01", "ATTBERT1", "bert.pdf", Some(&b"%PDF-1.4 fake"[..]))
        .await;
    for key in ["NOATT001", "MISSING1", "HASPDF01"] {
        lib.add_to_collection("MLCOLL01", key).await;
    }

    lib.add_item(ItemSpec::new("VIT00001", "Vision Transformer").added("2024-01-04 10:00:00"))
        .await;
    lib.add_to_collection("VISION01", "VIT00001").await;
    // Also filed directly under the parent; recursive listing must not repeat it.
    lib.add_to_collection("VISION01", "HASPDF01").await;

    lib.add_item(ItemSpec::new("QUANTUM1", "Quantum Field Theory").added("2024-01-05 10:00:00"))
        .await;
    lib.add_to_collection("PHYS0001", "QUANTUM1").await;
    lib
}

// ============ Web API responder ============

/// Routes by request path (e.g. `/users/1/collections`). A `Value::Null`
/// body answers 500.
pub type Routes = HashMap<String, Value>;

/// Serve `routes` on a random local port. Honors `start` and `limit` on
/// array bodies and reports `Total-Results`. Returns the base URL.
pub async fn serve_api(routes: Routes) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let routes = Arc::new(routes);

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let routes = routes.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                loop {
                    let n = socket.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let request = String::from_utf8_lossy(&buf);
                let target = request
                    .lines()
                    .next()
                    .and_then(|line| line.split_whitespace().nth(1))
                    .unwrap_or("/")
                    .to_string();
                let response = respond(&routes, &target);
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{}", addr)
}

fn respond(routes: &Routes, target: &str) -> String {
    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    let params: HashMap<&str, &str> = query
        .split('&')
        .filter_map(|kv| kv.split_once('='))
        .collect();

    let (status, body, total) = match routes.get(path) {
        None => ("404 Not Found", json!({"error": "not found"}), None),
        Some(Value::Null) => ("500 Internal Server Error", json!({"error": "boom"}), None),
        Some(Value::Array(all)) => {
            let start: usize = params.get("start").and_then(|s| s.parse().ok()).unwrap_or(0);
            let limit: usize = params.get("limit").and_then(|s| s.parse().ok()).unwrap_or(all.len());
            let page: Vec<Value> = all.iter().skip(start).take(limit).cloned().collect();
            ("200 OK", Value::Array(page), Some(all.len()))
        }
        Some(other) => ("200 OK", other.clone(), None),
    };

    let body = body.to_string();
    let total_header = total
        .map(|t| format!("Total-Results: {}\r\n", t))
        .unwrap_or_default();
    format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        total_header,
        body.len(),
        body
    )
}

pub fn api_collection(key: &str, name: &str, parent: Option<&str>) -> Value {
    json!({
        "key": key,
        "data": {
            "key": key,
            "name": name,
            "parentCollection": parent.map(Value::from).unwrap_or(Value::Bool(false)),
        },
        "meta": {"numCollections": 0, "numItems": 0},
    })
}

pub fn api_item(key: &str, title: &str, author: (&str, &str)) -> Value {
    json!({
        "key": key,
        "data": {
            "key": key,
            "itemType": "journalArticle",
            "title": title,
            "creators": [{"creatorType": "author", "firstName": author.0, "lastName": author.1}],
            "tags": [],
            "collections": [],
            "dateAdded": "2024-01-01T00:00:00Z",
        },
    })
}

pub fn api_pdf(key: &str, filename: &str) -> Value {
    json!({
        "key": key,
        "data": {
            "key": key,
            "itemType": "attachment",
            "title": "Full Text PDF",
            "linkMode": "imported_file",
            "contentType": "application/pdf",
            "filename": filename,
        },
    })
}

// ============ Fake collaborators ============

/// Returns fixed text for any path and counts calls.
#[derive(Default)]
pub struct CountingExtractor {
    pub calls: AtomicUsize,
}

impl CountingExtractor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextExtractor for CountingExtractor {
    async fn extract(&self, path: &Path) -> zotero_index::Result<ExtractedText> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        Ok(ExtractedText {
            text: format!("Extracted text of {}", path.display()),
            pages: 3,
        })
    }
}

/// Bag-of-letters embedding: deterministic, no network.
pub struct LetterEmbedder;

#[async_trait]
impl EmbeddingProvider for LetterEmbedder {
    fn model_name(&self) -> &str {
        "letters"
    }
    fn dims(&self) -> usize {
        26
    }
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 26];
                for c in t.to_ascii_lowercase().bytes() {
                    if c.is_ascii_lowercase() {
                        v[(c - b'a') as usize] += 1.0;
                    }
                }
                v
            })
            .collect())
    }
}

/// In-memory store that records which documents were added and how often
/// it was queried. Documents listed in `rejected` fail to add, and a query
/// can be held open with [`CountingStore::hold_next_query`].
pub struct CountingStore {
    inner: InMemoryVectorStore,
    pub added_docs: Mutex<Vec<String>>,
    pub queries: AtomicUsize,
    pub rejected: Mutex<HashSet<String>>,
    hold: Mutex<Option<QueryHold>>,
}

/// Signals sent by a held query: `entered` fires when the query starts, and
/// the query completes once `release` is notified.
#[derive(Clone)]
pub struct QueryHold {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl CountingStore {
    pub fn new(collection: &str) -> Self {
        Self {
            inner: InMemoryVectorStore::new(collection, Arc::new(LetterEmbedder)),
            added_docs: Mutex::new(Vec::new()),
            queries: AtomicUsize::new(0),
            rejected: Mutex::new(HashSet::new()),
            hold: Mutex::new(None),
        }
    }

    pub fn reject(&self, doc_id: &str) {
        self.rejected.lock().unwrap().insert(doc_id.to_string());
    }

    pub fn accept_all(&self) {
        self.rejected.lock().unwrap().clear();
    }

    /// Make the next query wait until the returned hold is released.
    pub fn hold_next_query(&self) -> QueryHold {
        let hold = QueryHold {
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        };
        *self.hold.lock().unwrap() = Some(hold.clone());
        hold
    }

    pub fn added(&self) -> Vec<String> {
        self.added_docs.lock().unwrap().clone()
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorStore for CountingStore {
    fn collection_name(&self) -> &str {
        self.inner.collection_name()
    }

    async fn add(&self, chunks: &[IndexChunk]) -> zotero_index::Result<()> {
        if let Some(first) = chunks.first() {
            if self.rejected.lock().unwrap().contains(&first.doc_id) {
                return Err(zotero_index::Error::Index(format!("rejected {}", first.doc_id)));
            }
        }
        self.inner.add(chunks).await?;
        if let Some(first) = chunks.first() {
            self.added_docs.lock().unwrap().push(first.doc_id.clone());
        }
        Ok(())
    }

    async fn query(&self, text: &str, n: usize) -> zotero_index::Result<Vec<ChunkHit>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let hold = self.hold.lock().unwrap().take();
        if let Some(hold) = hold {
            hold.entered.notify_one();
            hold.release.notified().await;
        }
        self.inner.query(text, n).await
    }

    async fn chunks_for_document(&self, doc_id: &str) -> zotero_index::Result<Vec<IndexChunk>> {
        self.inner.chunks_for_document(doc_id).await
    }

    async fn delete_document(&self, doc_id: &str) -> zotero_index::Result<usize> {
        self.inner.delete_document(doc_id).await
    }

    async fn reset(&self) -> zotero_index::Result<()> {
        self.inner.reset().await
    }

    async fn count(&self) -> zotero_index::Result<usize> {
        self.inner.count().await
    }
}
