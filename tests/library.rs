//! Library access: local replica reader, web API reader, fallback client,
//! and collection manager, against a fixture Zotero database and an
//! in-process API responder.

mod fixtures;

use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

use fixtures::{api_collection, api_item, api_pdf, ml_papers, serve_api, FixtureLibrary, ItemSpec, Routes};
use zotero_index::attachment::AttachmentResolver;
use zotero_index::client::LibraryClient;
use zotero_index::collection::CollectionManager;
use zotero_index::config::RemoteConfig;
use zotero_index::connector_local::LocalLibrary;
use zotero_index::connector_remote::RemoteLibrary;
use zotero_index::models::Item;
use zotero_index::traits::LibrarySource;
use zotero_index::Error;

fn local(lib: &FixtureLibrary) -> Arc<dyn LibrarySource> {
    Arc::new(LocalLibrary::new(lib.db_path.clone()))
}

fn remote(base: &str) -> Arc<dyn LibrarySource> {
    let config = RemoteConfig {
        library_id: Some("1".to_string()),
        api_base: base.to_string(),
        timeout_secs: 5,
        max_concurrent_fetches: 2,
        ..Default::default()
    };
    Arc::new(RemoteLibrary::from_config(&config).unwrap())
}

fn keys(items: &[Item]) -> Vec<String> {
    items.iter().map(|i| i.key.clone()).collect()
}

/// Web API view of the "ML Papers" collection in [`ml_papers`].
fn ml_routes() -> Routes {
    let mut routes = Routes::new();
    routes.insert(
        "/users/1/collections".into(),
        json!([
            api_collection("MLCOLL01", "ML Papers", None),
            api_collection("VISION01", "Vision", Some("MLCOLL01")),
            api_collection("PHYS0001", "Physics", None),
        ]),
    );
    routes.insert(
        "/users/1/collections/MLCOLL01/items/top".into(),
        json!([
            api_item("NOATT001", "Deep Residual Learning", ("Kaiming", "He")),
            api_item("MISSING1", "Attention Is All You Need", ("Ashish", "Vaswani")),
            api_item("HASPDF01", "BERT", ("Jacob", "Devlin")),
        ]),
    );
    routes.insert("/users/1/items/NOATT001/children".into(), json!([]));
    routes.insert(
        "/users/1/items/MISSING1/children".into(),
        json!([api_pdf("ATTMISS1", "attention.pdf")]),
    );
    routes.insert(
        "/users/1/items/HASPDF01/children".into(),
        json!([api_pdf("ATTBERT1", "bert.pdf")]),
    );
    routes
}

// ============ Local replica ============

#[tokio::test]
async fn test_local_lists_collections_with_counts() {
    let lib = ml_papers().await;
    let collections = local(&lib).list_collections().await.unwrap();

    let names: Vec<&str> = collections.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["ML Papers", "Vision", "Physics"]);
    assert_eq!(collections[0].item_count, 3);
    assert_eq!(collections[0].subcollection_count, 1);
    assert_eq!(collections[1].parent_key.as_deref(), Some("MLCOLL01"));
}

#[tokio::test]
async fn test_local_items_are_hydrated() {
    let lib = ml_papers().await;
    let items = local(&lib).collection_items("MLCOLL01").await.unwrap();

    assert_eq!(keys(&items), vec!["NOATT001", "MISSING1", "HASPDF01"]);
    let bert = &items[2];
    assert_eq!(bert.title, "BERT");
    assert_eq!(bert.authors_str(), "Jacob Devlin");
    assert_eq!(bert.tags, vec!["nlp"]);
    assert_eq!(bert.attachments.len(), 1);
    assert_eq!(bert.attachments[0].filename.as_deref(), Some("bert.pdf"));
    assert!(bert.collections.contains(&"MLCOLL01".to_string()));
    assert!(items[0].attachments.is_empty());
}

#[tokio::test]
async fn test_search_ranks_by_score_then_recency_and_pages_after_sorting() {
    let mut lib = FixtureLibrary::new().await;
    lib.add_item(ItemSpec::new("T1", "Transformer").added("2024-01-01 00:00:00"))
        .await;
    lib.add_item(ItemSpec::new("T2", "Transformer transformer").added("2024-01-01 00:00:00"))
        .await;
    lib.add_item(
        ItemSpec::new("T3", "Sequence models")
            .abstract_note("uses a transformer")
            .added("2024-01-05 00:00:00"),
    )
    .await;
    lib.add_item(ItemSpec::new("T4", "The Transformer").added("2024-01-03 00:00:00"))
        .await;
    lib.add_item(
        ItemSpec::new("T5", "Attention")
            .abstract_note("transformer and transformer")
            .added("2024-01-02 00:00:00"),
    )
    .await;
    lib.add_item(ItemSpec::new("X1", "Convolutions").added("2024-01-09 00:00:00"))
        .await;
    let source = local(&lib);

    let page = source.search_items("transformer", 2, 0).await.unwrap();
    assert_eq!(keys(&page), vec!["T2", "T4"]);

    let page = source.search_items("transformer", 2, 2).await.unwrap();
    assert_eq!(keys(&page), vec!["T5", "T1"]);

    let page = source.search_items("transformer", 2, 4).await.unwrap();
    assert_eq!(keys(&page), vec!["T3"]);

    assert!(source.search_items("   ", 10, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_soft_deleted_rows_are_hidden() {
    let lib = ml_papers().await;
    lib.delete_item("QUANTUM1").await;
    lib.delete_collection("VISION01").await;
    let source = local(&lib);

    let collections = source.list_collections().await.unwrap();
    assert!(collections.iter().all(|c| c.key != "VISION01"));
    assert_eq!(
        collections.iter().find(|c| c.key == "MLCOLL01").unwrap().subcollection_count,
        0
    );
    assert!(source.collection_items("PHYS0001").await.unwrap().is_empty());
    assert!(matches!(
        source.collection_items("VISION01").await,
        Err(Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_item_attachments_for_unknown_item() {
    let lib = ml_papers().await;
    let err = local(&lib).item_attachments("NOPE0000").await.unwrap_err();
    assert!(matches!(err, Error::NotFound { kind: "item", .. }));
}

// ============ Web API ============

#[tokio::test]
async fn test_local_and_remote_return_same_item_keys() {
    let lib = ml_papers().await;
    let base = serve_api(ml_routes()).await;

    let from_local = local(&lib).collection_items("MLCOLL01").await.unwrap();
    let from_remote = remote(&base).collection_items("MLCOLL01").await.unwrap();

    let a: BTreeSet<String> = keys(&from_local).into_iter().collect();
    let b: BTreeSet<String> = keys(&from_remote).into_iter().collect();
    assert_eq!(a, b);

    let attachment_keys = |items: &[Item]| -> BTreeSet<String> {
        items
            .iter()
            .flat_map(|i| i.attachments.iter().map(|a| a.key.clone()))
            .collect()
    };
    assert_eq!(attachment_keys(&from_local), attachment_keys(&from_remote));
}

fn api_item_with_abstract(key: &str, title: &str, abstract_note: &str, added: &str) -> Value {
    let mut item = api_item(key, title, ("A", "Author"));
    item["data"]["abstractNote"] = json!(abstract_note);
    item["data"]["dateAdded"] = json!(added);
    item
}

#[tokio::test]
async fn test_local_and_remote_rank_keyword_search_alike() {
    let lib = ml_papers().await;
    let mut routes = ml_routes();
    // listed in an order unrelated to relevance
    routes.insert(
        "/users/1/items/top".into(),
        json!([
            api_item_with_abstract(
                "NOATT001",
                "Deep Residual Learning",
                "Residual networks ease the training of deep networks.",
                "2024-01-01T10:00:00Z"
            ),
            api_item_with_abstract(
                "MISSING1",
                "Attention Is All You Need",
                "The transformer relies entirely on attention.",
                "2024-01-02T10:00:00Z"
            ),
            api_item_with_abstract(
                "HASPDF01",
                "BERT",
                "Bidirectional transformer pre-training.",
                "2024-01-03T10:00:00Z"
            ),
            api_item_with_abstract("QUANTUM1", "Quantum Field Theory", "", "2024-01-05T10:00:00Z"),
            api_item_with_abstract("VIT00001", "Vision Transformer", "", "2024-01-04T10:00:00Z"),
        ]),
    );
    routes.insert("/users/1/items/VIT00001/children".into(), json!([]));
    let base = serve_api(routes).await;

    let from_local = local(&lib).search_items("transformer", 10, 0).await.unwrap();
    let from_remote = remote(&base).search_items("transformer", 10, 0).await.unwrap();
    assert_eq!(keys(&from_local), vec!["VIT00001", "HASPDF01", "MISSING1"]);
    assert_eq!(keys(&from_remote), keys(&from_local));

    let local_page = local(&lib).search_items("transformer", 2, 1).await.unwrap();
    let remote_page = remote(&base).search_items("transformer", 2, 1).await.unwrap();
    assert_eq!(keys(&local_page), vec!["HASPDF01", "MISSING1"]);
    assert_eq!(keys(&remote_page), keys(&local_page));
    assert_eq!(remote_page[0].attachments[0].key, "ATTBERT1");
}

#[tokio::test]
async fn test_remote_collections_parse_parent() {
    let base = serve_api(ml_routes()).await;
    let collections = remote(&base).list_collections().await.unwrap();
    assert_eq!(collections.len(), 3);
    assert_eq!(collections[1].parent_key.as_deref(), Some("MLCOLL01"));
    assert_eq!(collections[0].parent_key, None);
}

#[tokio::test]
async fn test_remote_pages_until_total() {
    let mut routes = Routes::new();
    let items: Vec<Value> = (0..7)
        .map(|i| api_item(&format!("K{:07}", i), "paper", ("A", "B")))
        .collect();
    routes.insert("/users/1/items/top".into(), Value::Array(items));
    for i in 0..7 {
        routes.insert(format!("/users/1/items/K{:07}/children", i), json!([]));
    }
    let base = serve_api(routes).await;
    let config = RemoteConfig {
        library_id: Some("1".to_string()),
        api_base: base,
        page_size: 3,
        ..Default::default()
    };
    let source = RemoteLibrary::from_config(&config).unwrap();

    let all = source.search_items("paper", 100, 0).await.unwrap();
    assert_eq!(all.len(), 7);
    let page = source.search_items("paper", 2, 5).await.unwrap();
    assert_eq!(keys(&page), vec!["K0000005", "K0000006"]);
}

#[tokio::test]
async fn test_failing_child_fetch_is_isolated_to_one_item() {
    let mut routes = ml_routes();
    routes.insert("/users/1/items/MISSING1/children".into(), Value::Null);
    let base = serve_api(routes).await;

    let items = remote(&base).collection_items("MLCOLL01").await.unwrap();
    assert_eq!(items.len(), 3);
    let missing = items.iter().find(|i| i.key == "MISSING1").unwrap();
    assert!(missing.attachments.is_empty());
    let bert = items.iter().find(|i| i.key == "HASPDF01").unwrap();
    assert_eq!(bert.attachments.len(), 1);
}

#[tokio::test]
async fn test_remote_unknown_collection_is_not_found() {
    let base = serve_api(ml_routes()).await;
    let err = remote(&base).collection_items("ZZZZZZZZ").await.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

// ============ Fallback client ============

#[tokio::test]
async fn test_client_falls_back_when_local_missing_and_resolves_paths() {
    let lib = ml_papers().await;
    let base = serve_api(ml_routes()).await;
    let client = LibraryClient::new(
        Some(Arc::new(LocalLibrary::new("/nonexistent/zotero.sqlite"))),
        Some(remote(&base)),
        AttachmentResolver::new(lib.data_dir.clone(), None),
    );

    let items = client.collection_items("MLCOLL01").await.unwrap();
    assert_eq!(items.len(), 3);
    let bert = items.iter().find(|i| i.key == "HASPDF01").unwrap();
    let resolved = bert.attachments[0].resolved_path.as_ref().unwrap();
    assert!(resolved.ends_with("storage/ATTBERT1/bert.pdf"));
    let missing = items.iter().find(|i| i.key == "MISSING1").unwrap();
    assert!(missing.attachments[0].resolved_path.is_none());
}

#[tokio::test]
async fn test_client_prefers_local_even_when_empty() {
    let mut lib = FixtureLibrary::new().await;
    lib.add_collection("EMPTY001", "Empty", None).await;
    let mut routes = Routes::new();
    routes.insert(
        "/users/1/collections/EMPTY001/items/top".into(),
        json!([api_item("REMOTE01", "Only remote", ("A", "B"))]),
    );
    routes.insert("/users/1/items/REMOTE01/children".into(), json!([]));
    let base = serve_api(routes).await;

    let client = LibraryClient::new(
        Some(local(&lib)),
        Some(remote(&base)),
        AttachmentResolver::new(lib.data_dir.clone(), None),
    );
    assert!(client.collection_items("EMPTY001").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_client_source_status() {
    let base = serve_api(ml_routes()).await;
    let client = LibraryClient::new(
        Some(Arc::new(LocalLibrary::new("/nonexistent/zotero.sqlite"))),
        Some(remote(&base)),
        AttachmentResolver::new("/nonexistent", None),
    );
    let statuses = client.source_status().await;
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[0].name, "local");
    assert!(!statuses[0].healthy);
    assert_eq!(statuses[1].name, "remote");
    assert!(statuses[1].healthy);
}

// ============ Collection manager ============

fn manager(lib: &FixtureLibrary) -> CollectionManager {
    CollectionManager::new(LibraryClient::new(
        Some(local(lib)),
        None,
        AttachmentResolver::new(lib.data_dir.clone(), None),
    ))
}

#[tokio::test]
async fn test_name_resolution_is_stable() {
    let lib = ml_papers().await;
    let manager = manager(&lib);

    let exact = manager.resolve_by_name("ML Papers").await.unwrap().unwrap();
    let folded = manager.resolve_by_name("ml papers").await.unwrap().unwrap();
    let partial = manager.resolve_by_name("papers").await.unwrap().unwrap();
    assert_eq!(exact.key, "MLCOLL01");
    assert_eq!(folded.key, exact.key);
    assert_eq!(partial.key, exact.key);
    assert_eq!(
        manager.resolve_by_name("papers").await.unwrap().unwrap().key,
        partial.key
    );
    assert!(manager.resolve_by_name("Chemistry").await.unwrap().is_none());
}

#[tokio::test]
async fn test_recursive_items_are_deduplicated() {
    let lib = ml_papers().await;
    let manager = manager(&lib);

    let direct = manager.get_collection_items("ML Papers", false, false).await.unwrap();
    assert_eq!(keys(&direct), vec!["NOATT001", "MISSING1", "HASPDF01"]);

    let all = manager.get_collection_items("ML Papers", true, false).await.unwrap();
    assert_eq!(keys(&all), vec!["NOATT001", "MISSING1", "HASPDF01", "VIT00001"]);

    let pdf_only = manager.get_collection_items("ML Papers", true, true).await.unwrap();
    assert_eq!(keys(&pdf_only), vec!["HASPDF01"]);
}

#[tokio::test]
async fn test_unknown_collection_name_is_not_found() {
    let lib = ml_papers().await;
    let err = manager(&lib)
        .get_collection_items("Chemistry", false, false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { kind: "collection", .. }));
}

#[tokio::test]
async fn test_collection_tree_nests_children() {
    let lib = ml_papers().await;
    let tree = manager(&lib).collection_tree().await.unwrap();
    let roots: Vec<&str> = tree.iter().map(|n| n.collection.name.as_str()).collect();
    assert_eq!(roots, vec!["ML Papers", "Physics"]);
    assert_eq!(tree[0].children.len(), 1);
    assert_eq!(tree[0].children[0].collection.name, "Vision");
}

#[tokio::test]
async fn test_collection_tree_sorts_siblings_at_every_depth() {
    let mut lib = ml_papers().await;
    lib.add_collection("SEGM0001", "Segmentation", Some("VISION01")).await;
    lib.add_collection("DETECT01", "detection", Some("VISION01")).await;
    lib.add_collection("AUDIO001", "Audio", Some("MLCOLL01")).await;

    let tree = manager(&lib).collection_tree().await.unwrap();
    let ml = &tree[0];
    let children: Vec<&str> = ml.children.iter().map(|n| n.collection.name.as_str()).collect();
    assert_eq!(children, vec!["Audio", "Vision"]);

    let vision = &ml.children[1];
    let grandchildren: Vec<&str> = vision
        .children
        .iter()
        .map(|n| n.collection.name.as_str())
        .collect();
    assert_eq!(grandchildren, vec!["detection", "Segmentation"]);
    assert!(vision.children.iter().all(|n| n.children.is_empty()));
}
