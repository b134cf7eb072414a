//! PDF text extraction.
//!
//! [`PdfExtractor`] is the default [`TextExtractor`]. Parsing runs on the
//! blocking pool; a parser panic surfaces as an [`Error::Extraction`] for
//! that file only.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::traits::{ExtractedText, TextExtractor};

const PDF_MAGIC: &[u8] = b"%PDF";

#[derive(Debug, Clone, Default)]
pub struct PdfExtractor;

#[async_trait]
impl TextExtractor for PdfExtractor {
    async fn extract(&self, path: &Path) -> Result<ExtractedText> {
        let owned = path.to_path_buf();
        let bytes = tokio::fs::read(&owned)
            .await
            .map_err(|e| extraction_err(&owned, e))?;
        check_pdf(&owned, &bytes)?;

        let worker_path = owned.clone();
        let pages = tokio::task::spawn_blocking(move || {
            pdf_extract::extract_text_from_mem_by_pages(&bytes)
                .map_err(|e| extraction_err(&worker_path, e))
        })
        .await
        .map_err(|e| extraction_err(&owned, format!("extractor panicked: {}", e)))??;

        Ok(ExtractedText {
            pages: pages.len() as u32,
            text: clean_text(&pages.join("\n\n")),
        })
    }
}

fn extraction_err(path: &Path, reason: impl std::fmt::Display) -> Error {
    Error::Extraction {
        path: PathBuf::from(path),
        reason: reason.to_string(),
    }
}

/// Reject empty files and files that are neither named `.pdf` nor start with `%PDF`.
fn check_pdf(path: &Path, bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() {
        return Err(extraction_err(path, "file is empty"));
    }
    let named_pdf = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);
    if !named_pdf && !bytes.starts_with(PDF_MAGIC) {
        return Err(extraction_err(path, "not a PDF file"));
    }
    Ok(())
}

/// Collapse runs of blank lines to one blank line and runs of spaces to one
/// space, then trim.
pub fn clean_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut newlines = 0usize;
    let mut last_space = false;
    for ch in raw.chars() {
        match ch {
            '\r' => continue,
            '\n' => {
                newlines += 1;
                last_space = false;
                if newlines <= 2 {
                    out.push('\n');
                }
            }
            ' ' => {
                newlines = 0;
                if !last_space {
                    out.push(' ');
                }
                last_space = true;
            }
            _ => {
                newlines = 0;
                last_space = false;
                out.push(ch);
            }
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_clean_text_collapses_whitespace() {
        assert_eq!(clean_text("  a   b\n\n\n\n c  "), "a b\n\n c");
        assert_eq!(clean_text("line\r\nnext"), "line\nnext");
    }

    #[tokio::test]
    async fn test_missing_file_is_extraction_error() {
        let err = PdfExtractor
            .extract(Path::new("/nonexistent/paper.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Extraction { .. }));
    }

    #[tokio::test]
    async fn test_empty_file_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("empty.pdf");
        std::fs::write(&path, b"").unwrap();
        let err = PdfExtractor.extract(&path).await.unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[tokio::test]
    async fn test_non_pdf_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes.txt");
        std::fs::write(&path, b"plain text").unwrap();
        let err = PdfExtractor.extract(&path).await.unwrap_err();
        assert!(err.to_string().contains("not a PDF"));
    }

    #[tokio::test]
    async fn test_corrupt_pdf_is_extraction_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broken.pdf");
        std::fs::write(&path, b"%PDF-1.4\nthis is not really a pdf").unwrap();
        let err = PdfExtractor.extract(&path).await.unwrap_err();
        assert!(matches!(err, Error::Extraction { .. }));
    }
}
