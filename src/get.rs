//! Document commands: scan a collection, show one document, load PDF text.

use anyhow::Result;

use crate::error::Error;
use crate::search::print_document_line;
use crate::session::Session;

/// CLI entry point for `zidx scan`.
pub async fn run_scan(session: &Session, name: &str, recursive: bool, load_pdf: bool) -> Result<()> {
    let docs = match session.scan(name, recursive, load_pdf).await {
        Ok(docs) => docs,
        Err(e @ Error::NotFound { .. }) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    let with_pdf = docs.iter().filter(|d| d.has_pdf).count();
    let loaded = docs.iter().filter(|d| d.pdf_loaded).count();
    println!(
        "Scanned {}: {} documents, {} with PDF, {} loaded",
        session.current_collection().await.unwrap_or_default(),
        docs.len(),
        with_pdf,
        loaded
    );
    println!();
    for (i, doc) in docs.iter().enumerate() {
        print_document_line(i + 1, doc);
    }
    Ok(())
}

/// CLI entry point for `zidx get`.
pub async fn run_get(session: &Session, id: &str, show_chunks: bool) -> Result<()> {
    let doc = match session.get_document(id) {
        Some(d) => d,
        None => {
            eprintln!("Error: document not found: {}", id);
            std::process::exit(1);
        }
    };

    println!("--- Document ---");
    println!("id:           {}", doc.id);
    println!("item_key:     {}", doc.item_key);
    println!("title:        {}", doc.title);
    println!("authors:      {}", doc.authors);
    if let Some(ref date) = doc.date {
        println!("date:         {}", date);
    }
    if let Some(ref publication) = doc.publication {
        println!("publication:  {}", publication);
    }
    if let Some(ref doi) = doc.doi {
        println!("doi:          {}", doi);
    }
    if !doc.tags.is_empty() {
        println!("tags:         {}", doc.tags.join(", "));
    }
    match &doc.pdf_path {
        Some(path) => println!("pdf:          {}", path.display()),
        None => println!("pdf:          {}", if doc.has_pdf { "(unresolved)" } else { "none" }),
    }
    if doc.pdf_loaded {
        println!("pages:        {}", doc.pdf_pages);
    }
    println!("scanned_at:   {}", doc.scanned_at.format("%Y-%m-%d %H:%M"));
    println!();

    if let Some(ref abs) = doc.abstract_note {
        println!("--- Abstract ---");
        println!("{}", abs);
        println!();
    }

    if show_chunks {
        let chunks = session.index().get_document_chunks(&doc.id).await?;
        println!("--- Chunks ({}) ---", chunks.len());
        for chunk in &chunks {
            println!("[chunk {}]", chunk.ordinal);
            println!("{}", chunk.text);
            println!();
        }
    }

    Ok(())
}

/// CLI entry point for `zidx load`: one document by id, or every pending one.
pub async fn run_load(session: &Session, id: Option<&str>, all: bool) -> Result<()> {
    if all {
        let loaded = session.scanner().load_all_pdf_contents().await;
        println!("Loaded {} documents.", loaded);
        return Ok(());
    }

    let Some(id) = id else {
        anyhow::bail!("Specify a document id or --all");
    };
    if session.ensure_pdf_loaded(id).await? {
        let pages = session.get_document(id).map(|d| d.pdf_pages).unwrap_or(0);
        println!("Loaded {} ({} pages).", id, pages);
    } else {
        println!("No PDF text available for {}.", id);
    }
    Ok(())
}
