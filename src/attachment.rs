//! Attachment path resolution.
//!
//! Maps an [`Attachment`] to an existing local file. Zotero records stored
//! files as `storage:<filename>` (relative to `<data_dir>/storage/<key>/`),
//! relative linked files as `attachments:<path>` (relative to the configured
//! base attachment directory), and absolute linked files as plain paths.
//! Attachments fetched from the web API carry no path at all, so the storage
//! convention `<data_dir>/storage/<key>/<filename>` is tried last.

use std::path::{Path, PathBuf};

use crate::config::LibraryConfig;
use crate::models::{Attachment, LinkMode};

#[derive(Debug, Clone)]
pub struct AttachmentResolver {
    data_dir: PathBuf,
    base_dir: Option<PathBuf>,
}

impl AttachmentResolver {
    pub fn new(data_dir: impl Into<PathBuf>, base_dir: Option<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            base_dir,
        }
    }

    pub fn from_config(config: &LibraryConfig) -> Self {
        Self::new(&config.data_dir, config.base_attachment_dir.clone())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Existing local file for this attachment, if any.
    pub fn resolve(&self, attachment: &Attachment) -> Option<PathBuf> {
        if attachment.link_mode == LinkMode::LinkedUrl {
            return None;
        }

        if let Some(existing) = attachment.resolved_path.as_ref().filter(|p| p.is_file()) {
            return Some(existing.clone());
        }

        let recorded = attachment
            .path
            .as_deref()
            .and_then(|p| self.resolve_recorded(&attachment.key, p));
        if recorded.is_some() {
            return recorded;
        }

        let filename = attachment
            .filename
            .as_deref()
            .filter(|f| !f.is_empty())?;
        existing_file(self.storage_dir(&attachment.key).join(filename))
    }

    /// Fill in `resolved_path` for each attachment.
    pub fn resolve_all(&self, attachments: &mut [Attachment]) {
        for att in attachments.iter_mut() {
            att.resolved_path = self.resolve(att);
        }
    }

    fn storage_dir(&self, key: &str) -> PathBuf {
        self.data_dir.join("storage").join(key)
    }

    fn resolve_recorded(&self, key: &str, recorded: &str) -> Option<PathBuf> {
        if let Some(name) = recorded.strip_prefix("storage:") {
            return existing_file(self.storage_dir(key).join(name));
        }
        if let Some(rel) = recorded.strip_prefix("attachments:") {
            let base = self.base_dir.as_ref()?;
            return existing_file(base.join(rel));
        }
        let path = Path::new(recorded);
        if path.is_absolute() {
            return existing_file(path.to_path_buf());
        }
        None
    }
}

fn existing_file(path: PathBuf) -> Option<PathBuf> {
    if path.is_file() {
        Some(path)
    } else {
        None
    }
}

/// Filename component of a recorded attachment path.
pub fn filename_from_recorded(recorded: &str) -> Option<String> {
    let rest = recorded
        .strip_prefix("storage:")
        .or_else(|| recorded.strip_prefix("attachments:"))
        .unwrap_or(recorded);
    Path::new(rest)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn attachment(key: &str, filename: Option<&str>, path: Option<&str>) -> Attachment {
        Attachment {
            key: key.to_string(),
            title: String::new(),
            filename: filename.map(String::from),
            content_type: Some("application/pdf".into()),
            path: path.map(String::from),
            resolved_path: None,
            link_mode: LinkMode::ImportedFile,
        }
    }

    #[test]
    fn test_resolves_storage_prefix() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("storage").join("ABCD1234");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("paper.pdf"), b"%PDF-1.4").unwrap();

        let resolver = AttachmentResolver::new(tmp.path(), None);
        let att = attachment("ABCD1234", None, Some("storage:paper.pdf"));
        assert_eq!(resolver.resolve(&att), Some(dir.join("paper.pdf")));
    }

    #[test]
    fn test_falls_back_to_storage_convention() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("storage").join("KEY");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("remote.pdf"), b"%PDF-1.4").unwrap();

        let resolver = AttachmentResolver::new(tmp.path(), None);
        let att = attachment("KEY", Some("remote.pdf"), None);
        assert_eq!(resolver.resolve(&att), Some(dir.join("remote.pdf")));
    }

    #[test]
    fn test_missing_file_does_not_resolve() {
        let tmp = TempDir::new().unwrap();
        let resolver = AttachmentResolver::new(tmp.path(), None);
        let att = attachment("KEY", Some("gone.pdf"), Some("storage:gone.pdf"));
        assert_eq!(resolver.resolve(&att), None);
    }

    #[test]
    fn test_relative_linked_file_needs_base_dir() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("papers");
        fs::create_dir_all(&base).unwrap();
        fs::write(base.join("linked.pdf"), b"%PDF-1.4").unwrap();
        let att = attachment("KEY", None, Some("attachments:linked.pdf"));

        assert_eq!(AttachmentResolver::new(tmp.path(), None).resolve(&att), None);
        let resolver = AttachmentResolver::new(tmp.path(), Some(base.clone()));
        assert_eq!(resolver.resolve(&att), Some(base.join("linked.pdf")));
    }

    #[test]
    fn test_filename_from_recorded() {
        assert_eq!(
            filename_from_recorded("storage:paper.pdf").as_deref(),
            Some("paper.pdf")
        );
        assert_eq!(
            filename_from_recorded("/home/u/docs/x.pdf").as_deref(),
            Some("x.pdf")
        );
    }
}
