//! # zotero-index
//!
//! A local-first mirror and semantic index for Zotero reference libraries.
//!
//! Library metadata is read from the local Zotero database (opened read-only)
//! and falls back to the Zotero Web API when the replica is missing or
//! unreadable. Collections are scanned into [`models::DocumentInfo`] records,
//! PDF text is extracted lazily, and documents are chunked and embedded into
//! a SQLite-backed vector index on demand. A [`session::Session`] ties it
//! together and persists its state across restarts.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌────────────┐   ┌──────────┐
//! │ Local SQLite │──▶│   Library   │──▶│ Collection │──▶│ Document │
//! │  Web API     │   │   Client    │   │  Manager   │   │ Scanner  │
//! └──────────────┘   └─────────────┘   └────────────┘   └────┬─────┘
//!                                                            │
//!                    ┌─────────────┐   ┌────────────┐        │
//!                    │   Session   │──▶│   Index    │◀───────┘
//!                    │  (snapshot) │   │  Manager   │
//!                    └─────────────┘   └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Library error type |
//! | [`traits`] | Source, extractor, and vector store seams |
//! | [`connector_local`] | Read-only local Zotero database reader |
//! | [`connector_remote`] | Zotero Web API reader |
//! | [`attachment`] | Attachment path resolution |
//! | [`client`] | Local-first client with remote fallback |
//! | [`collection`] | Collection cache, name resolution, recursion |
//! | [`extract`] | PDF text extraction |
//! | [`scanner`] | Document scanning and lazy PDF loading |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`vector_store`] | SQLite and in-memory vector stores |
//! | [`index`] | Lazily initialized semantic index |
//! | [`session`] | Session coordinator and snapshots |
//! | [`progress`] | Progress reporting on stderr |
//! | [`db`] | Database connections |
//! | [`migrate`] | Index schema |

pub mod attachment;
pub mod chunk;
pub mod client;
pub mod collection;
pub mod config;
pub mod connector_local;
pub mod connector_remote;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod get;
pub mod index;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod scanner;
pub mod search;
pub mod session;
pub mod sources;
pub mod stats;
pub mod traits;
pub mod vector_store;

pub use error::{Error, Result};
