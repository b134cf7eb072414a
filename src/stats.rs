//! Session and index statistics.
//!
//! `zidx stats` summarizes what the session knows: the current collection,
//! scanned documents and how many have PDF text, and the state of the vector
//! index. An unavailable index is reported inline rather than failing the
//! command.

use anyhow::Result;

use crate::error::Error;
use crate::session::Session;
use crate::vector_store::INDEX_FILE;

/// Run the stats command and print a summary.
pub async fn run_stats(session: &Session) -> Result<()> {
    let scan = session.scanner().statistics();
    let current = session.current_documents().await;
    let indexed = session.indexed_ids().await;
    let collection = session.current_collection().await;

    println!("zidx: session stats");
    println!("===================");
    println!();
    println!(
        "  Collection:  {}",
        collection.as_deref().unwrap_or("(none scanned)")
    );
    println!("  Current:     {} documents", current.len());
    println!("  Cached:      {} documents", scan.total_documents);
    println!(
        "  With PDF:    {} / {} ({}%)",
        scan.with_pdf,
        scan.total_documents,
        percent(scan.with_pdf, scan.total_documents)
    );
    println!(
        "  Loaded:      {} / {} ({} pages)",
        scan.pdf_loaded, scan.with_pdf, scan.total_pages
    );
    println!("  Tags:        {}", scan.unique_tags);
    if let Some(newest) = current.iter().map(|d| d.scanned_at).max() {
        println!(
            "  Scanned:     {}",
            format_ts_relative(newest.timestamp())
        );
    }
    println!();

    println!("  Index:");
    match session.index().stats().await {
        Ok(stats) => {
            let db_path = stats.persist_dir.join(INDEX_FILE);
            let db_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);
            println!("    Collection:  {}", stats.collection_name);
            println!("    Database:    {}", db_path.display());
            println!("    Size:        {}", format_bytes(db_size));
            println!("    Chunks:      {}", stats.total_chunks);
            println!(
                "    Indexed:     {} / {} current documents",
                current.iter().filter(|d| indexed.contains(&d.id)).count(),
                current.len()
            );
        }
        Err(Error::IndexUnavailable {
            reason,
            remediation,
        }) => {
            println!("    unavailable: {}", reason);
            println!("    fix:         {}", remediation);
        }
        Err(e) => return Err(e.into()),
    }
    println!();

    Ok(())
}

fn percent(part: usize, total: usize) -> usize {
    if total > 0 {
        part * 100 / total
    } else {
        0
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp relative to now (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
