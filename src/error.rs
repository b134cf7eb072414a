//! Library error type.
//!
//! Infrastructure failures ([`Error::SourceUnavailable`]) are kept apart from
//! empty or missing results ([`Error::NotFound`]) so the client can decide
//! when to fall back to the remote source.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The local replica or the remote API could not be reached or read.
    #[error("{backend} source unavailable: {reason}")]
    SourceUnavailable { backend: &'static str, reason: String },

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("text extraction failed for {}: {reason}", path.display())]
    Extraction { path: PathBuf, reason: String },

    /// The vector index could not be initialized. Cached after the first failure.
    #[error("index unavailable: {reason} ({remediation})")]
    IndexUnavailable { reason: String, remediation: String },

    #[error("index error: {0}")]
    Index(String),

    #[error("chunk already indexed: {0}")]
    DuplicateChunk(String),

    /// One item of a concurrent fetch failed. Logged; the batch continues.
    #[error("enrichment failed for {item}: {reason}")]
    PartialBatchFailure { item: String, reason: String },

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn local(reason: impl std::fmt::Display) -> Self {
        Error::SourceUnavailable {
            backend: "local",
            reason: reason.to_string(),
        }
    }

    pub(crate) fn remote(reason: impl std::fmt::Display) -> Self {
        Error::SourceUnavailable {
            backend: "remote",
            reason: reason.to_string(),
        }
    }

    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// True for failures that should trigger a fallback to another source.
    pub fn is_source_unavailable(&self) -> bool {
        matches!(self, Error::SourceUnavailable { .. })
    }
}
