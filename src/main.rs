//! # zidx
//!
//! Command-line front end for `zotero-index`: browse a Zotero library, scan
//! collections into documents, load PDF text, and search the semantic index.
//!
//! ## Usage
//!
//! ```bash
//! zidx --config ./config/zidx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `zidx sources` | Check the local replica and the web API |
//! | `zidx collections` | List collections (`--tree` for nesting) |
//! | `zidx scan "<name>"` | Scan a collection into the session |
//! | `zidx items "<query>"` | Keyword search over the whole library |
//! | `zidx search "<query>"` | Semantic search over the scanned collection |
//! | `zidx get <id>` | Show one scanned document |
//! | `zidx load <id>` | Extract a document's PDF text |
//! | `zidx stats` | Session and index summary |
//! | `zidx index reset` | Empty the vector index |
//!
//! Every command restores the session snapshot on start and saves it on exit,
//! so a `scan` followed by a `search` in a later invocation works as expected.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use zotero_index::config::{self, Config};
use zotero_index::progress::ProgressMode;
use zotero_index::session::{Components, Session};
use zotero_index::{get, search, sources, stats};

/// zidx: a local-first mirror and semantic index for Zotero libraries.
#[derive(Parser)]
#[command(
    name = "zidx",
    about = "A local-first mirror and semantic index for Zotero reference libraries",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/zidx.toml`. When the file does not exist the
    /// built-in defaults are used (local replica under `~/Zotero`).
    #[arg(long, global = true, default_value = "./config/zidx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List collections.
    Collections {
        /// Print the collection hierarchy.
        #[arg(long)]
        tree: bool,

        /// Bypass the cached collection list.
        #[arg(long)]
        refresh: bool,
    },

    /// Show configured library sources and whether they respond.
    Sources,

    /// Scan a collection by name and make it the current document set.
    ///
    /// Names match exactly, then case-insensitively, then as a substring.
    Scan {
        name: String,

        /// Include items from every subcollection.
        #[arg(short, long)]
        recursive: bool,

        /// Extract PDF text while scanning.
        #[arg(long)]
        load_pdf: bool,

        /// Progress output on stderr. Defaults to human when stderr is a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Keyword search over titles and abstracts of the whole library.
    Items {
        query: String,

        #[arg(long, default_value_t = 20)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Semantic search over the current collection.
    ///
    /// Documents not yet indexed are embedded before the query runs.
    Search {
        query: String,

        #[arg(long, default_value_t = 5)]
        limit: usize,
    },

    /// Show a scanned document.
    Get {
        id: String,

        /// Also print the document's indexed chunks.
        #[arg(long)]
        chunks: bool,
    },

    /// Extract PDF text for one document, or for all pending documents.
    Load {
        id: Option<String>,

        #[arg(long, conflicts_with = "id")]
        all: bool,
    },

    /// Session and index statistics.
    Stats,

    /// Vector index maintenance.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Drop every chunk in the configured index collection.
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        Config::default()
    };

    let progress = match &cli.command {
        Commands::Scan { progress, .. } => progress.unwrap_or_else(ProgressMode::default_for_tty),
        Commands::Search { .. } | Commands::Load { .. } => ProgressMode::default_for_tty(),
        _ => ProgressMode::Off,
    };
    let mut components = Components::from_config(&cfg)?;
    components.progress = progress.reporter();
    let session = Session::open_with(&cfg, components).await;

    let result = run(&session, cli.command).await;
    session.shutdown().await?;
    result
}

async fn run(session: &Session, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Collections { tree, refresh } => {
            sources::run_collections(session, tree, refresh).await?;
        }
        Commands::Sources => {
            sources::run_sources(session).await?;
        }
        Commands::Scan {
            name,
            recursive,
            load_pdf,
            ..
        } => {
            get::run_scan(session, &name, recursive, load_pdf).await?;
        }
        Commands::Items {
            query,
            limit,
            offset,
        } => {
            search::run_items(session, &query, limit, offset).await?;
        }
        Commands::Search { query, limit } => {
            search::run_search(session, &query, limit).await?;
        }
        Commands::Get { id, chunks } => {
            get::run_get(session, &id, chunks).await?;
        }
        Commands::Load { id, all } => {
            get::run_load(session, id.as_deref(), all).await?;
        }
        Commands::Stats => {
            stats::run_stats(session).await?;
        }
        Commands::Index {
            action: IndexAction::Reset,
        } => {
            session.reset_index().await?;
            println!("Index cleared.");
        }
    }
    Ok(())
}
