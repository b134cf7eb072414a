//! Search commands.
//!
//! - `zidx search` is semantic search over the current (last scanned)
//!   collection. Documents not yet in the index are embedded first.
//! - `zidx items` is keyword search over the whole library, served by the
//!   local replica or the web API.

use anyhow::Result;

use crate::models::DocumentInfo;
use crate::session::Session;

/// CLI entry point for `zidx search`.
pub async fn run_search(session: &Session, query: &str, limit: usize) -> Result<()> {
    if session.current_collection().await.is_none() {
        eprintln!("No collection scanned yet; results come from the existing index only.");
    }

    let results = session.search(query, limit).await?;
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let authors = result.metadata["authors"].as_str().unwrap_or("Unknown");
        println!(
            "{}. [{:.2}] {} / {}",
            i + 1,
            result.score,
            authors,
            result.title
        );
        println!(
            "    chunk: {} of {}",
            result.metadata["chunk_index"].as_u64().unwrap_or(0) + 1,
            result.metadata["total_chunks"].as_u64().unwrap_or(1)
        );
        println!(
            "    excerpt: \"{}\"",
            result.snippet.replace('\n', " ").trim()
        );
        println!("    id: {}", result.doc_id);
        println!();
    }
    Ok(())
}

/// CLI entry point for `zidx items`.
pub async fn run_items(session: &Session, query: &str, limit: usize, offset: usize) -> Result<()> {
    let docs = session.search_library(query, limit, offset).await?;
    if docs.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, doc) in docs.iter().enumerate() {
        print_document_line(offset + i + 1, doc);
    }
    Ok(())
}

pub(crate) fn print_document_line(n: usize, doc: &DocumentInfo) {
    let pdf = if doc.pdf_loaded {
        "pdf+text"
    } else if doc.has_pdf {
        "pdf"
    } else {
        "-"
    };
    println!("{}. [{}] {} / {}", n, pdf, doc.authors, doc.title);
    if let Some(date) = doc.date.as_deref().filter(|d| !d.is_empty()) {
        println!("    date: {}", date);
    }
    if let Some(publication) = doc.publication.as_deref().filter(|p| !p.is_empty()) {
        println!("    publication: {}", publication);
    }
    if let Some(path) = &doc.pdf_path {
        println!("    pdf: {}", path.display());
    }
    println!("    id: {}", doc.id);
    println!();
}
