//! Library source health and collection listing.
//!
//! `zidx sources` checks every configured reader (local replica, web API)
//! and prints one row per source. `zidx collections` prints the collection
//! list, flat or as an indented tree.

use anyhow::Result;

use crate::collection::CollectionNode;
use crate::session::Session;

pub async fn run_sources(session: &Session) -> Result<()> {
    let statuses = session.collections().client().source_status().await;

    println!("{:<10} {:<8} DETAIL", "SOURCE", "HEALTHY");
    for status in &statuses {
        println!(
            "{:<10} {:<8} {}",
            status.name, status.healthy, status.detail
        );
    }
    Ok(())
}

pub async fn run_collections(session: &Session, tree: bool, refresh: bool) -> Result<()> {
    let collections = session.list_collections(refresh).await?;
    if collections.is_empty() {
        println!("No collections.");
        return Ok(());
    }

    if tree {
        for node in session.collections().collection_tree().await? {
            print_node(&node, 0);
        }
        return Ok(());
    }

    println!("{:<10} {:>6} {:>6}  NAME", "KEY", "ITEMS", "SUBS");
    for c in &collections {
        println!(
            "{:<10} {:>6} {:>6}  {}",
            c.key, c.item_count, c.subcollection_count, c.name
        );
    }
    Ok(())
}

fn print_node(node: &CollectionNode, depth: usize) {
    println!(
        "{}{} ({}) [{}]",
        "  ".repeat(depth),
        node.collection.name,
        node.collection.item_count,
        node.collection.key
    );
    for child in &node.children {
        print_node(child, depth + 1);
    }
}
