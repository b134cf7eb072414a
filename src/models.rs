//! Core data models shared by the sources, scanner, index, and session.
//!
//! [`Collection`], [`Item`], and [`Attachment`] are canonical library
//! entities; both the local replica reader and the remote reader produce
//! them. [`DocumentInfo`] is the merged record the rest of the system
//! works with. [`IndexChunk`] and [`SearchResult`] belong to the vector index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A named node in the collection tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub key: String,
    pub name: String,
    pub parent_key: Option<String>,
    #[serde(default)]
    pub item_count: u32,
    #[serde(default)]
    pub subcollection_count: u32,
}

/// A creator (author, editor, ...) of an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creator {
    pub creator_type: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    /// Single-field name, used for institutional authors.
    #[serde(default)]
    pub name: Option<String>,
}

impl Creator {
    pub fn author(first_name: &str, last_name: &str) -> Self {
        Self {
            creator_type: "author".to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            name: None,
        }
    }

    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => format!("{} {}", self.first_name, self.last_name)
                .trim()
                .to_string(),
        }
    }
}

/// How an attachment file is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LinkMode {
    ImportedFile,
    ImportedUrl,
    LinkedFile,
    LinkedUrl,
    EmbeddedImage,
    #[default]
    Unknown,
}

impl LinkMode {
    /// Map the integer stored in `itemAttachments.linkMode`.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => LinkMode::ImportedFile,
            1 => LinkMode::ImportedUrl,
            2 => LinkMode::LinkedFile,
            3 => LinkMode::LinkedUrl,
            4 => LinkMode::EmbeddedImage,
            _ => LinkMode::Unknown,
        }
    }

    /// Map the string used by the web API (`imported_file`, ...).
    pub fn from_api(value: &str) -> Self {
        match value {
            "imported_file" => LinkMode::ImportedFile,
            "imported_url" => LinkMode::ImportedUrl,
            "linked_file" => LinkMode::LinkedFile,
            "linked_url" => LinkMode::LinkedUrl,
            "embedded_image" => LinkMode::EmbeddedImage,
            _ => LinkMode::Unknown,
        }
    }
}

/// A file associated with an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub key: String,
    #[serde(default)]
    pub title: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    /// Path as recorded by the library, e.g. `storage:paper.pdf`.
    #[serde(default)]
    pub path: Option<String>,
    /// Existing local file, filled in by the attachment resolver.
    #[serde(default)]
    pub resolved_path: Option<PathBuf>,
    #[serde(default)]
    pub link_mode: LinkMode,
}

impl Attachment {
    pub fn is_pdf(&self) -> bool {
        if let Some(ct) = self.content_type.as_deref().filter(|ct| !ct.is_empty()) {
            return ct.eq_ignore_ascii_case("application/pdf");
        }
        self.filename
            .as_deref()
            .map(|f| f.to_ascii_lowercase().ends_with(".pdf"))
            .unwrap_or(false)
    }
}

/// A bibliographic record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub key: String,
    pub item_type: String,
    pub title: String,
    #[serde(default)]
    pub creators: Vec<Creator>,
    pub abstract_note: Option<String>,
    pub date: Option<String>,
    pub publication: Option<String>,
    pub doi: Option<String>,
    pub url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub collections: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub date_added: Option<DateTime<Utc>>,
    pub date_modified: Option<DateTime<Utc>>,
}

impl Item {
    pub fn new(key: &str, item_type: &str, title: &str) -> Self {
        Self {
            key: key.to_string(),
            item_type: item_type.to_string(),
            title: title.to_string(),
            creators: Vec::new(),
            abstract_note: None,
            date: None,
            publication: None,
            doi: None,
            url: None,
            tags: Vec::new(),
            collections: Vec::new(),
            attachments: Vec::new(),
            date_added: None,
            date_modified: None,
        }
    }

    /// Comma-joined names of creators with the `author` role, or `"Unknown"`.
    pub fn authors_str(&self) -> String {
        let names: Vec<String> = self
            .creators
            .iter()
            .filter(|c| c.creator_type == "author")
            .map(Creator::display_name)
            .filter(|n| !n.is_empty())
            .collect();
        if names.is_empty() {
            "Unknown".to_string()
        } else {
            names.join(", ")
        }
    }

    pub fn pdf_attachments(&self) -> impl Iterator<Item = &Attachment> {
        self.attachments.iter().filter(|a| a.is_pdf())
    }

    pub fn has_pdf(&self) -> bool {
        self.pdf_attachments().next().is_some()
    }

    /// Short citation: `Authors. (date). Title. Publication`.
    pub fn citation(&self) -> String {
        let mut parts = vec![self.authors_str()];
        if let Some(date) = self.date.as_deref().filter(|d| !d.is_empty()) {
            parts.push(format!("({})", date));
        }
        parts.push(self.title.clone());
        if let Some(publication) = self.publication.as_deref().filter(|p| !p.is_empty()) {
            parts.push(publication.to_string());
        }
        parts.join(". ")
    }
}

/// Canonical document record built from an item and its representative PDF.
///
/// Invariant: `pdf_loaded` implies `has_pdf`. The reverse need not hold: an
/// item may carry a PDF attachment that no local path resolves to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub id: String,
    pub item_key: String,
    pub title: String,
    #[serde(default)]
    pub authors: String,
    #[serde(rename = "abstract")]
    pub abstract_note: Option<String>,
    pub publication: Option<String>,
    pub date: Option<String>,
    pub doi: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub pdf_path: Option<PathBuf>,
    #[serde(default)]
    pub pdf_content: Option<String>,
    #[serde(default)]
    pub pdf_pages: u32,
    #[serde(default)]
    pub has_pdf: bool,
    #[serde(default)]
    pub pdf_loaded: bool,
    pub scanned_at: DateTime<Utc>,
    pub date_added: Option<String>,
}

impl DocumentInfo {
    /// Build a document from an item. When `representative` is given the id
    /// is scoped to that attachment and its resolved path is recorded.
    pub fn from_item(item: &Item, representative: Option<&Attachment>) -> Self {
        let id = match representative {
            Some(att) => format!("{}_{}", item.key, att.key),
            None => item.key.clone(),
        };
        Self {
            id,
            item_key: item.key.clone(),
            title: item.title.clone(),
            authors: item.authors_str(),
            abstract_note: item.abstract_note.clone(),
            publication: item.publication.clone(),
            date: item.date.clone(),
            doi: item.doi.clone(),
            tags: item.tags.clone(),
            pdf_path: representative.and_then(|a| a.resolved_path.clone()),
            pdf_content: None,
            pdf_pages: 0,
            has_pdf: item.has_pdf(),
            pdf_loaded: false,
            scanned_at: Utc::now(),
            date_added: item.date_added.map(|d| d.to_rfc3339()),
        }
    }

    /// Text fed to the chunker: labelled sections joined by blank lines, with
    /// the extracted content cut to `content_prefix_chars` characters.
    pub fn summary_text(&self, content_prefix_chars: usize) -> String {
        let mut parts = Vec::new();
        if !self.title.is_empty() {
            parts.push(format!("Title: {}", self.title));
        }
        if !self.authors.is_empty() {
            parts.push(format!("Authors: {}", self.authors));
        }
        if let Some(abs) = self.abstract_note.as_deref().filter(|a| !a.is_empty()) {
            parts.push(format!("Abstract: {}", abs));
        }
        if let Some(content) = self.pdf_content.as_deref().filter(|c| !c.is_empty()) {
            let prefix: String = content.chars().take(content_prefix_chars).collect();
            parts.push(format!("Content: {}", prefix));
        }
        parts.join("\n\n")
    }
}

/// A slice of a document's summary text stored in the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexChunk {
    /// `{doc_id}_chunk_{ordinal}`
    pub id: String,
    pub doc_id: String,
    pub ordinal: u32,
    pub total_chunks: u32,
    pub text: String,
    pub title: String,
    pub authors: String,
}

impl IndexChunk {
    pub fn chunk_id(doc_id: &str, ordinal: u32) -> String {
        format!("{}_chunk_{}", doc_id, ordinal)
    }

    pub fn metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "doc_id": self.doc_id,
            "title": self.title,
            "authors": self.authors,
            "chunk_index": self.ordinal,
            "total_chunks": self.total_chunks,
        })
    }
}

/// A ranked hit from the semantic index.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub doc_id: String,
    pub title: String,
    pub score: f32,
    pub snippet: String,
    pub metadata: serde_json::Value,
}
